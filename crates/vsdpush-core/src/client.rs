//! `PushCenter` — owns one push subscription and its receive task.
//!
//! State transitions:
//! - `Idle` → `Connecting`:            `start()` called
//! - `Connecting` → `Streaming`:       transport opened
//! - `Connecting` → `Faulted`:         transport refused the subscription
//! - `Streaming` → `Stopped`:          `stop()` called
//! - `Streaming` → `Faulted`:          transport error or end of stream
//! - `Stopped` / `Faulted` → `Connecting`: `start()` called again
//!
//! The client never reconnects on its own; whoever owns it decides.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::PushError;
use crate::event::Event;
use crate::registry::{EventHandler, HandlerRegistry, IdentityFilter, RegistrationId};
use crate::transport::{PushTransport, RawMessageStream};

/// Lifecycle state of a [`PushCenter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    Streaming,
    Stopped,
    Faulted,
}

impl ClientState {
    fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Streaming)
    }
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Streaming => write!(f, "streaming"),
            Self::Stopped => write!(f, "stopped"),
            Self::Faulted => write!(f, "faulted"),
        }
    }
}

/// Metrics snapshot for the push client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushMetrics {
    pub messages_received: u64,
    pub events_dispatched: u64,
    pub decode_errors: u64,
    pub handler_failures: u64,
}

struct Shared {
    state: watch::Sender<ClientState>,
    fault: Mutex<Option<String>>,
    metrics: Mutex<PushMetrics>,
}

impl Shared {
    fn set_state(&self, next: ClientState) {
        self.state.send_replace(next);
    }

    /// Move to `Faulted` unless a stop already won the race.
    fn fault(&self, reason: String) {
        let mut applied = false;
        self.state.send_if_modified(|state| {
            if *state == ClientState::Streaming {
                *state = ClientState::Faulted;
                applied = true;
                true
            } else {
                false
            }
        });
        if applied {
            error!(reason = %reason, "push stream faulted");
            *self.fault.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);
        }
    }

    fn metrics(&self) -> std::sync::MutexGuard<'_, PushMetrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Session {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Push notification client.
///
/// Handlers may be registered before or after `start()`. They run on the
/// receive task, one event at a time, in registration order.
pub struct PushCenter {
    transport: Arc<dyn PushTransport>,
    registry: HandlerRegistry,
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
    // Serialises start() calls so two callers cannot both open the transport.
    start_lock: tokio::sync::Mutex<()>,
}

impl PushCenter {
    pub fn new(transport: Arc<dyn PushTransport>) -> Self {
        let (state, _) = watch::channel(ClientState::Idle);
        Self {
            transport,
            registry: HandlerRegistry::new(),
            shared: Arc::new(Shared {
                state,
                fault: Mutex::new(None),
                metrics: Mutex::new(PushMetrics::default()),
            }),
            session: Mutex::new(None),
            start_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// Register a handler for events accepted by `filter`.
    pub fn register(
        &self,
        filter: impl Into<IdentityFilter>,
        handler: Arc<dyn EventHandler>,
    ) -> RegistrationId {
        self.registry.register(filter, handler)
    }

    pub fn unregister(&self, id: RegistrationId) -> bool {
        self.registry.unregister(id)
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn state(&self) -> ClientState {
        *self.shared.state.borrow()
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<ClientState> {
        self.shared.state.subscribe()
    }

    /// Reason of the last fault, if the client is `Faulted`.
    pub fn fault_reason(&self) -> Option<String> {
        self.shared
            .fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn metrics(&self) -> PushMetrics {
        self.shared.metrics().clone()
    }

    /// Open the subscription and spawn the receive task.
    pub async fn start(&self) -> Result<(), PushError> {
        let _guard = self.start_lock.lock().await;

        if self.state().is_active() {
            return Err(PushError::AlreadyStarted);
        }
        self.reap_session().await;

        *self.shared.fault.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.shared.set_state(ClientState::Connecting);
        info!(endpoint = %self.endpoint(), "opening push channel");

        let stream = match self.transport.open().await {
            Ok(stream) => stream,
            Err(e) => {
                let reason = e.to_string();
                error!(endpoint = %self.endpoint(), error = %reason, "push channel connect failed");
                *self.shared.fault.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(reason.clone());
                self.shared.set_state(ClientState::Faulted);
                return Err(match e {
                    PushError::Connect { .. } => e,
                    other => PushError::Connect {
                        endpoint: self.endpoint().to_string(),
                        reason: other.to_string(),
                    },
                });
            }
        };

        let connected = self.shared.state.send_if_modified(|state| {
            if *state == ClientState::Connecting {
                *state = ClientState::Streaming;
                true
            } else {
                false
            }
        });
        if !connected {
            // stop() arrived while the transport was opening.
            return Err(PushError::StreamClosed);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(receive_loop(
            stream,
            self.registry.clone(),
            Arc::clone(&self.shared),
            stop_rx,
        ));
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Session { stop_tx, task });
        info!(endpoint = %self.endpoint(), "push channel streaming");
        Ok(())
    }

    /// Stop streaming. Safe to call from any task, including a handler.
    ///
    /// The receive task finishes the dispatch in progress, then exits.
    pub fn stop(&self) {
        let changed = self.shared.state.send_if_modified(|state| {
            if state.is_active() {
                *state = ClientState::Stopped;
                true
            } else {
                false
            }
        });
        if let Some(session) = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            let _ = session.stop_tx.send(true);
        }
        if changed {
            info!(endpoint = %self.endpoint(), "push channel stopped");
        }
    }

    /// Wait up to `grace` for the receive task to exit after `stop()` or a fault.
    /// Returns `true` if no task is left running.
    pub async fn join(&self, grace: Duration) -> bool {
        if self.state().is_active() {
            return false;
        }
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut session) = session else {
            return true;
        };
        match tokio::time::timeout(grace, &mut session.task).await {
            Ok(_) => true,
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "push receive task still running");
                *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(session);
                false
            }
        }
    }

    /// Resolves once the subscription ends: `Faulted` if the transport
    /// failed, `StreamClosed` if the client was stopped or never started.
    pub async fn fault(&self) -> PushError {
        let mut rx = self.shared.state.subscribe();
        let ended = rx
            .wait_for(|state| !state.is_active())
            .await
            .map(|state| *state)
            .unwrap_or(ClientState::Stopped);
        match ended {
            ClientState::Faulted => PushError::Faulted {
                reason: self
                    .fault_reason()
                    .unwrap_or_else(|| "unknown transport failure".into()),
            },
            _ => PushError::StreamClosed,
        }
    }

    /// Await the previous receive task after a stop or fault so a restart
    /// does not overlap with it.
    async fn reap_session(&self) {
        let previous = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = previous {
            let _ = session.stop_tx.send(true);
            let _ = session.task.await;
        }
    }
}

impl Drop for PushCenter {
    fn drop(&mut self) {
        if let Some(session) = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = session.stop_tx.send(true);
        }
    }
}

impl std::fmt::Debug for PushCenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushCenter")
            .field("endpoint", &self.endpoint())
            .field("state", &self.state())
            .field("handlers", &self.registry.len())
            .finish()
    }
}

async fn receive_loop(
    mut stream: RawMessageStream,
    registry: HandlerRegistry,
    shared: Arc<Shared>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            next = stream.next() => next,
        };

        let raw = match next {
            Some(Ok(raw)) => raw,
            Some(Err(e)) => {
                warn!(error = %e, "push transport error");
                shared.fault(e.to_string());
                break;
            }
            None => {
                shared.fault(PushError::StreamClosed.to_string());
                break;
            }
        };

        shared.metrics().messages_received += 1;
        let event = match Event::decode(&raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "dropping undecodable push message");
                shared.metrics().decode_errors += 1;
                continue;
            }
        };

        debug!(
            entity_type = %event.entity_type,
            action = %event.action,
            entities = event.data.len(),
            "push event"
        );
        let report = registry.dispatch(&event).await;
        let mut metrics = shared.metrics();
        metrics.events_dispatched += 1;
        metrics.handler_failures += report.failed as u64;
    }
    debug!("push receive loop ended");
}
