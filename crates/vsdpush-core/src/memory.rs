//! In-memory push transport.
//!
//! Useful for tests and for embedding the push client behind another event
//! source. Messages are fed through a [`ChannelFeed`]; each `open()` takes the
//! receiving side, so a transport supports a single subscription.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;

use crate::error::PushError;
use crate::transport::{PushTransport, RawMessage, RawMessageStream};

/// Producer side of a [`ChannelTransport`].
#[derive(Clone)]
pub struct ChannelFeed {
    tx: mpsc::UnboundedSender<Result<RawMessage, PushError>>,
}

impl ChannelFeed {
    /// Queue a raw message. Returns `false` once the subscription has gone away.
    pub fn push(&self, raw: RawMessage) -> bool {
        self.tx.unbounded_send(Ok(raw)).is_ok()
    }

    /// Queue a transport failure, ending the subscription.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.tx
            .unbounded_send(Err(PushError::Transport(reason.into())))
            .is_ok()
    }

    /// End the stream cleanly.
    pub fn close(&self) {
        self.tx.close_channel();
    }
}

/// A `PushTransport` backed by an unbounded channel.
pub struct ChannelTransport {
    endpoint: String,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Result<RawMessage, PushError>>>>,
    refuse: Option<String>,
}

impl ChannelTransport {
    pub fn new() -> (Self, ChannelFeed) {
        let (tx, rx) = mpsc::unbounded();
        let transport = Self {
            endpoint: "memory://push".into(),
            rx: Mutex::new(Some(rx)),
            refuse: None,
        };
        (transport, ChannelFeed { tx })
    }

    /// A transport whose `open()` always fails with `reason`.
    pub fn refusing(reason: impl Into<String>) -> Self {
        Self {
            endpoint: "memory://push".into(),
            rx: Mutex::new(None),
            refuse: Some(reason.into()),
        }
    }
}

#[async_trait]
impl PushTransport for ChannelTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn open(&self) -> Result<RawMessageStream, PushError> {
        if let Some(reason) = &self.refuse {
            return Err(PushError::Connect {
                endpoint: self.endpoint.clone(),
                reason: reason.clone(),
            });
        }
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| PushError::Connect {
                endpoint: self.endpoint.clone(),
                reason: "channel transport already opened".into(),
            })?;
        Ok(rx.boxed())
    }
}
