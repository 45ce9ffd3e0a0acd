//! `PushTransport` trait — abstraction over the controller's push channel.
//!
//! A transport produces raw event objects, one at a time and in the order the
//! controller emitted them. Decoding and dispatch are the push client's job.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use crate::error::PushError;

/// One undecoded event object, as delivered by the controller.
pub type RawMessage = Value;

/// A stream of raw messages from one subscription.
///
/// `Err` items are fatal to the subscription; the stream is not polled again.
pub type RawMessageStream = Pin<Box<dyn Stream<Item = Result<RawMessage, PushError>> + Send>>;

/// Abstracts over different push channel backends.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Endpoint this transport talks to (used in logs and errors).
    fn endpoint(&self) -> &str;

    /// Open a new subscription.
    async fn open(&self) -> Result<RawMessageStream, PushError>;
}
