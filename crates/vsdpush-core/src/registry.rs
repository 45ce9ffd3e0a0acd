//! Event handler trait + registry.
//!
//! Registrations are kept in a copy-on-write list: `register` / `unregister`
//! swap in a new `Arc<Vec<_>>`, and `dispatch` works on the `Arc` it cloned
//! when it started. Removing a handler therefore never disturbs a dispatch
//! pass that is already running, but does affect the next event.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::FutureExt;

use crate::error::HandlerError;
use crate::event::Event;

/// Which events a handler wants to see.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityFilter {
    /// Every event, whatever its entity type.
    All,
    /// Only events whose `entity_type` equals this name.
    Entity(String),
}

impl IdentityFilter {
    /// Wire name of the wildcard identity.
    pub const ALL_IDENTITY: &'static str = "all";

    pub fn entity(name: impl Into<String>) -> Self {
        Self::Entity(name.into())
    }

    pub fn accepts(&self, event: &Event) -> bool {
        match self {
            Self::All => true,
            Self::Entity(name) => *name == event.entity_type,
        }
    }
}

impl From<&str> for IdentityFilter {
    fn from(s: &str) -> Self {
        if s == Self::ALL_IDENTITY {
            Self::All
        } else {
            Self::Entity(s.to_string())
        }
    }
}

impl std::fmt::Display for IdentityFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str(Self::ALL_IDENTITY),
            Self::Entity(name) => f.write_str(name),
        }
    }
}

/// Trait for caller-provided push event handlers.
///
/// Handlers run on the push client's receive task, one event at a time.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

/// Blanket impl so plain closures can be registered.
#[async_trait]
impl<F> EventHandler for F
where
    F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        self(event)
    }
}

/// Identifier returned by [`HandlerRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(pub u64);

impl std::fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone)]
struct Registration {
    id: RegistrationId,
    filter: IdentityFilter,
    handler: Arc<dyn EventHandler>,
}

/// Result of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that completed successfully.
    pub delivered: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

/// Registry of push event handlers, shared between the owner and the receive task.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    entries: Arc<Mutex<Arc<Vec<Registration>>>>,
    next_id: Arc<AtomicU64>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events accepted by `filter`.
    pub fn register(
        &self,
        filter: impl Into<IdentityFilter>,
        handler: Arc<dyn EventHandler>,
    ) -> RegistrationId {
        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let filter = filter.into();
        tracing::debug!(%id, %filter, "registering push handler");

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::with_capacity(entries.len() + 1);
        next.extend(entries.iter().cloned());
        next.push(Registration { id, filter, handler });
        *entries = Arc::new(next);
        id
    }

    /// Remove a registration. Returns `false` if it was already gone.
    pub fn unregister(&self, id: RegistrationId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if !entries.iter().any(|r| r.id == id) {
            return false;
        }
        let next: Vec<Registration> = entries.iter().filter(|r| r.id != id).cloned().collect();
        *entries = Arc::new(next);
        tracing::debug!(%id, "unregistered push handler");
        true
    }

    fn snapshot(&self) -> Arc<Vec<Registration>> {
        Arc::clone(&self.entries.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Deliver `event` to every matching handler, in registration order.
    ///
    /// A failing or panicking handler is logged and counted; the remaining
    /// handlers still receive the event.
    pub async fn dispatch(&self, event: &Event) -> DispatchReport {
        let snapshot = self.snapshot();
        let mut report = DispatchReport::default();

        for registration in snapshot.iter().filter(|r| r.filter.accepts(event)) {
            let outcome = AssertUnwindSafe(registration.handler.handle(event))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::warn!(
                        id = %registration.id,
                        entity_type = %event.entity_type,
                        error = %e,
                        "push handler failed"
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    tracing::warn!(
                        id = %registration.id,
                        entity_type = %event.entity_type,
                        "push handler panicked"
                    );
                }
            }
        }
        report
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ActionType;

    fn event(entity_type: &str) -> Event {
        Event {
            entity_type: entity_type.to_string(),
            action: ActionType::Create,
            data: vec![],
            update_mechanism: None,
            received_at: None,
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> Arc<dyn EventHandler> {
        let log = Arc::clone(log);
        Arc::new(move |_: &Event| -> Result<(), HandlerError> {
            log.lock().unwrap().push(tag);
            Ok(())
        })
    }

    #[test]
    fn all_identity_parses_to_wildcard() {
        assert_eq!(IdentityFilter::from("all"), IdentityFilter::All);
        assert_eq!(IdentityFilter::from("vport"), IdentityFilter::entity("vport"));
        assert_eq!(IdentityFilter::All.to_string(), "all");
    }

    #[tokio::test]
    async fn dispatch_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = HandlerRegistry::new();
        registry.register("all", recorder(&log, "a"));
        registry.register("vport", recorder(&log, "skip"));
        registry.register("nsgnotification", recorder(&log, "b"));
        registry.register(IdentityFilter::All, recorder(&log, "c"));

        let report = registry.dispatch(&event("nsgnotification")).await;

        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(report, DispatchReport { delivered: 3, failed: 0 });
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_others() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = HandlerRegistry::new();
        registry.register(
            "all",
            Arc::new(|_: &Event| -> Result<(), HandlerError> { Err(HandlerError::new("boom")) }),
        );
        registry.register("all", Arc::new(|_: &Event| -> Result<(), HandlerError> {
            panic!("handler bug")
        }));
        registry.register("all", recorder(&log, "after"));

        let report = registry.dispatch(&event("job")).await;

        assert_eq!(*log.lock().unwrap(), vec!["after"]);
        assert_eq!(report, DispatchReport { delivered: 1, failed: 2 });
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = HandlerRegistry::new();
        let id = registry.register("all", recorder(&log, "x"));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());

        registry.dispatch(&event("job")).await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unregister_during_dispatch_keeps_current_pass() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = HandlerRegistry::new();
        let second = Arc::new(Mutex::new(None::<RegistrationId>));

        let remover = {
            let registry = registry.clone();
            let second = Arc::clone(&second);
            let log = Arc::clone(&log);
            move |_: &Event| -> Result<(), HandlerError> {
                log.lock().unwrap().push("first");
                if let Some(id) = *second.lock().unwrap() {
                    registry.unregister(id);
                }
                Ok(())
            }
        };
        registry.register("all", Arc::new(remover));
        let id = registry.register("all", recorder(&log, "second"));
        *second.lock().unwrap() = Some(id);

        registry.dispatch(&event("job")).await;
        registry.dispatch(&event("job")).await;

        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "first"]);
    }

    #[tokio::test]
    async fn mutation_from_another_thread_during_dispatch() {
        const ROUNDS: u32 = 5000;
        let registry = HandlerRegistry::new();
        let hits = Arc::new(AtomicU64::new(0));
        {
            let hits = Arc::clone(&hits);
            registry.register(
                "all",
                Arc::new(move |_: &Event| -> Result<(), HandlerError> {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
        }

        let churn = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for _ in 0..ROUNDS {
                    let id = registry.register(
                        "vport",
                        Arc::new(|_: &Event| -> Result<(), HandlerError> { Ok(()) }),
                    );
                    assert!(registry.unregister(id));
                }
            })
        };

        for _ in 0..ROUNDS {
            registry.dispatch(&event("job")).await;
        }
        churn.join().unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), u64::from(ROUNDS));
        assert_eq!(registry.len(), 1);
    }
}
