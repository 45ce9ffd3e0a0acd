//! `LongPollTransport` — the controller push channel over HTTP long polling.
//!
//! Each poll is `GET {base}/events[?uuid=<session>]`. The server holds the
//! request until events are available and answers with one batch:
//!
//! ```text
//! { "uuid": "…", "events": [ {"entityType": …, "type": …, "entities": […]}, … ] }
//! ```
//!
//! The uuid of the last batch is passed on the next poll so no event is
//! skipped or delivered twice. The first poll runs inside `open()`, so an
//! unreachable or unauthenticated channel fails the subscription up front.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{channel::mpsc, SinkExt, Stream, StreamExt};
use reqwest::Method;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vsdpush_core::error::{ControllerError, PushError};
use vsdpush_core::event::PushBatch;
use vsdpush_core::transport::{PushTransport, RawMessage, RawMessageStream};

use crate::session::{read_json, VsdSession};

/// Tuning for [`LongPollTransport`].
#[derive(Debug, Clone)]
pub struct LongPollConfig {
    /// Client-side limit for one held poll; expiry just re-polls.
    pub poll_timeout: Duration,
    /// Events buffered between the poll task and the consumer.
    pub channel_capacity: usize,
}

impl Default for LongPollConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(90),
            channel_capacity: 256,
        }
    }
}

/// Push transport polling the controller's `/events` resource.
#[derive(Debug)]
pub struct LongPollTransport {
    session: Arc<VsdSession>,
    config: LongPollConfig,
    endpoint: String,
}

impl LongPollTransport {
    pub fn new(session: Arc<VsdSession>, config: LongPollConfig) -> Self {
        let endpoint = format!("{}/events", session.base_url());
        Self {
            session,
            config,
            endpoint,
        }
    }

    pub fn default_for(session: Arc<VsdSession>) -> Self {
        Self::new(session, LongPollConfig::default())
    }
}

#[async_trait]
impl PushTransport for LongPollTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn open(&self) -> Result<RawMessageStream, PushError> {
        let connect_err = |reason: String| PushError::Connect {
            endpoint: self.endpoint.clone(),
            reason,
        };

        let first = poll_once(&self.session, None, self.config.poll_timeout)
            .await
            .map_err(|e| connect_err(e.to_string()))?;
        info!(endpoint = %self.endpoint, uuid = ?first.uuid, "push channel open");

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let task = tokio::spawn(run_poll_loop(
            Arc::clone(&self.session),
            self.config.poll_timeout,
            first,
            tx,
        ));

        Ok(PollStream { rx, task }.boxed())
    }
}

// ─── Stream handle ────────────────────────────────────────────────────────────

/// Receiving side of a subscription. Dropping it aborts the poll task, which
/// may otherwise sit in a held request until the poll timeout.
struct PollStream {
    rx: mpsc::Receiver<Result<RawMessage, PushError>>,
    task: JoinHandle<()>,
}

impl Stream for PollStream {
    type Item = Result<RawMessage, PushError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_next_unpin(cx)
    }
}

impl Drop for PollStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ─── Poll loop ────────────────────────────────────────────────────────────────

enum PollError {
    /// The held request hit the client-side timeout.
    Idle,
    Failed(ControllerError),
}

impl std::fmt::Display for PollError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "poll timed out"),
            Self::Failed(e) => write!(f, "{e}"),
        }
    }
}

async fn run_poll_loop(
    session: Arc<VsdSession>,
    poll_timeout: Duration,
    first: PushBatch,
    mut tx: mpsc::Sender<Result<RawMessage, PushError>>,
) {
    let mut uuid = first.uuid;
    let mut pending = first.events;

    loop {
        for raw in pending.drain(..) {
            if tx.send(Ok(raw)).await.is_err() {
                debug!("push consumer gone, ending poll loop");
                return;
            }
        }

        match poll_once(&session, uuid.as_deref(), poll_timeout).await {
            Ok(batch) => {
                debug!(uuid = ?batch.uuid, events = batch.events.len(), "push batch");
                if batch.uuid.is_some() {
                    uuid = batch.uuid;
                }
                pending = batch.events;
            }
            Err(PollError::Idle) => continue,
            Err(PollError::Failed(e)) => {
                warn!(error = %e, "push poll failed");
                let _ = tx.send(Err(PushError::Transport(e.to_string()))).await;
                return;
            }
        }
    }
}

async fn poll_once(
    session: &VsdSession,
    uuid: Option<&str>,
    poll_timeout: Duration,
) -> Result<PushBatch, PollError> {
    let mut req = session
        .request(Method::GET, "events")
        .map_err(PollError::Failed)?
        .timeout(poll_timeout);
    if let Some(uuid) = uuid {
        req = req.query(&[("uuid", uuid)]);
    }

    let resp = req.send().await.map_err(|e| {
        if e.is_timeout() {
            PollError::Idle
        } else {
            PollError::Failed(ControllerError::Http(e.to_string()))
        }
    })?;
    let body = read_json(resp).await.map_err(PollError::Failed)?;
    PushBatch::decode(&body)
        .map_err(|e| PollError::Failed(ControllerError::Other(format!("bad push batch: {e}"))))
}
