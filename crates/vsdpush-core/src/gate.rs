//! Single-shot completion gate.
//!
//! Turns an asynchronous match observed on the push receive task into a
//! blocking wait on the caller's task. The value travels through a
//! `tokio::sync::oneshot` channel, so the waiter is parked (no polling) and
//! always receives a fully constructed value.
//!
//! ```no_run
//! # async fn example() {
//! use std::time::Duration;
//! use vsdpush_core::gate::CompletionGate;
//!
//! let gate = CompletionGate::<String>::new();
//! let handle = gate.handle();
//! tokio::spawn(async move { handle.signal("done".to_string()); });
//! let value = gate.wait(Duration::from_secs(5)).await;
//! # }
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::GateError;

type Outcome<T> = Result<T, GateError>;

/// Cloneable signalling side of a [`CompletionGate`].
///
/// Safe to use from any task or thread. The first `signal` or `cancel`
/// consumes the underlying sender; every later call is a no-op.
pub struct GateHandle<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<Outcome<T>>>>>,
}

impl<T> Clone for GateHandle<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> GateHandle<T> {
    fn take(&self) -> Option<oneshot::Sender<Outcome<T>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Record `value` and wake the waiter.
    ///
    /// Returns `true` only for the call that was honored. A gate that was
    /// already signaled, cancelled or whose wait has returned ignores it.
    pub fn signal(&self, value: T) -> bool {
        match self.take() {
            Some(tx) => tx.send(Ok(value)).is_ok(),
            None => false,
        }
    }

    /// Wake the waiter with [`GateError::Cancelled`] and make the gate terminal.
    pub fn cancel(&self) -> bool {
        match self.take() {
            Some(tx) => {
                let _ = tx.send(Err(GateError::Cancelled));
                true
            }
            None => false,
        }
    }

    /// `true` once the gate has been signaled, cancelled or waited out.
    pub fn is_terminal(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(true, |tx| tx.is_closed())
    }
}

impl<T> std::fmt::Debug for GateHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateHandle")
            .field("terminal", &self.is_terminal())
            .finish()
    }
}

/// Waiting side of a single-shot gate. Created per wait, consumed by [`wait`](Self::wait).
pub struct CompletionGate<T> {
    rx: oneshot::Receiver<Outcome<T>>,
    handle: GateHandle<T>,
}

impl<T> CompletionGate<T> {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            rx,
            handle: GateHandle {
                slot: Arc::new(Mutex::new(Some(tx))),
            },
        }
    }

    /// A signalling handle for this gate.
    pub fn handle(&self) -> GateHandle<T> {
        self.handle.clone()
    }

    /// Block until the gate is signaled, cancelled, or `timeout` elapses.
    ///
    /// A zero `timeout` returns immediately when nothing has been recorded yet.
    /// Whatever the outcome, the gate is terminal afterwards.
    pub async fn wait(self, timeout: Duration) -> Result<T, GateError> {
        let Self { rx, handle } = self;
        let outcome = tokio::time::timeout(timeout, rx).await;
        // Drop the sender so late signals report `false`.
        drop(handle.take());
        match outcome {
            Ok(Ok(result)) => result,
            // Sender dropped without a value: every handle is gone.
            Ok(Err(_)) => Err(GateError::Cancelled),
            Err(_) => Err(GateError::Timeout {
                ms: timeout.as_millis() as u64,
            }),
        }
    }
}

impl<T> Default for CompletionGate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for CompletionGate<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionGate")
            .field("handle", &self.handle)
            .finish()
    }
}
