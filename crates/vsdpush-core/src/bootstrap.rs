//! Bootstrap URL retrieval.
//!
//! Sequence:
//! 1. resolve the target gateway by name (ambiguity aborts before any side effect)
//! 2. arm a [`CompletionGate`] and register a handler that signals it
//! 3. start the push channel
//! 4. create the notification job on the gateway
//! 5. wait for the matching notification, racing the push channel's faults
//! 6. hand the captured URL to the [`ResultSink`]
//!
//! The handler is registered before the job is created so a notification
//! that arrives before the job response cannot be missed. Job submission is
//! never retried here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::client::PushCenter;
use crate::config::BootstrapConfig;
use crate::controller::{Controller, Enterprise, Gateway, Job};
use crate::error::{BootstrapError, HandlerError};
use crate::event::{lookup_str, Event, NotificationMatch};
use crate::gate::{CompletionGate, GateHandle};
use crate::registry::{EventHandler, IdentityFilter};
use crate::sink::ResultSink;
use crate::transport::PushTransport;

/// Path of the bootstrap URL inside a registration notification entity.
pub const LINK_PATH: &str = "message.link";

const STOP_GRACE: Duration = Duration::from_secs(5);

/// What happened to the captured URL once it reached the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkReport {
    /// Stored at the given location.
    Stored(String),
    /// The sink failed; the URL is still in [`BootstrapOutcome::link`].
    Failed(String),
}

/// Successful bootstrap result.
#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    pub enterprise: Enterprise,
    pub gateway: Gateway,
    pub job: Job,
    pub link: String,
    pub saved: SinkReport,
}

/// Handler that extracts the link from the first matching notification.
struct LinkCapture {
    notification: NotificationMatch,
    gate: GateHandle<String>,
}

#[async_trait]
impl EventHandler for LinkCapture {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let Some(entity) = self.notification.find(event) else {
            return Ok(());
        };
        let link = lookup_str(entity, LINK_PATH).ok_or_else(|| {
            HandlerError::new(format!("matching notification has no {LINK_PATH}"))
        })?;
        info!(link, "bootstrap notification received");
        if !self.gate.signal(link.to_string()) {
            debug!("wait already completed, ignoring notification");
        }
        Ok(())
    }
}

/// Runs the bootstrap URL flow against one controller.
pub struct BootstrapOrchestrator {
    config: BootstrapConfig,
    controller: Arc<dyn Controller>,
    transport: Arc<dyn PushTransport>,
    sink: Arc<dyn ResultSink>,
}

impl BootstrapOrchestrator {
    pub fn new(
        config: BootstrapConfig,
        controller: Arc<dyn Controller>,
        transport: Arc<dyn PushTransport>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            config,
            controller,
            transport,
            sink,
        }
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    pub async fn run(&self) -> Result<BootstrapOutcome, BootstrapError> {
        self.config.validate()?;
        let (enterprise, gateway) = self.resolve_target().await?;
        info!(
            enterprise = %enterprise.name,
            gateway = %gateway.name,
            gateway_id = %gateway.id,
            "found gateway"
        );

        let push = PushCenter::new(Arc::clone(&self.transport));
        let captured = self.capture_link(&push, &gateway).await;
        push.stop();
        if !push.join(STOP_GRACE).await {
            warn!("push receive task did not exit within the grace period");
        }
        let (job, link) = captured?;

        let saved = match self.sink.store(&self.config.target_name, &link).await {
            Ok(location) => SinkReport::Stored(location),
            Err(e) => {
                error!(error = %e, "failed to store bootstrap URL");
                SinkReport::Failed(e.to_string())
            }
        };

        Ok(BootstrapOutcome {
            enterprise,
            gateway,
            job,
            link,
            saved,
        })
    }

    /// Find exactly one gateway named `target_name` across all enterprises.
    pub async fn resolve_target(&self) -> Result<(Enterprise, Gateway), BootstrapError> {
        let name = self.config.target_name.trim();
        let lookup_err = |source| BootstrapError::Lookup {
            name: name.to_string(),
            source,
        };

        let enterprises = self.controller.enterprises().await.map_err(lookup_err)?;
        info!(count = enterprises.len(), "enterprises retrieved");

        let mut found = Vec::new();
        for enterprise in enterprises {
            let gateways = self
                .controller
                .gateways(&enterprise, name)
                .await
                .map_err(lookup_err)?;
            for gateway in gateways.into_iter().filter(|g| g.name == name) {
                found.push((enterprise.clone(), gateway));
            }
        }

        match found.len() {
            0 => Err(BootstrapError::TargetNotFound { name: name.to_string() }),
            1 => Ok(found.remove(0)),
            _ => Err(BootstrapError::AmbiguousTarget {
                name: name.to_string(),
                candidates: found
                    .iter()
                    .map(|(e, g)| format!("{}/{}", e.name, g.id))
                    .collect(),
            }),
        }
    }

    async fn capture_link(
        &self,
        push: &PushCenter,
        gateway: &Gateway,
    ) -> Result<(Job, String), BootstrapError> {
        let notification = self.config.notification();
        let filter = IdentityFilter::entity(notification.entity_type.clone());
        let gate = CompletionGate::<String>::new();
        let signal = gate.handle();

        let id = push.register(
            filter,
            Arc::new(LinkCapture {
                notification,
                gate: signal.clone(),
            }),
        );

        if let Err(e) = push.start().await {
            push.unregister(id);
            return Err(e.into());
        }

        let job = match self
            .controller
            .create_job(gateway, &self.config.notification_type)
            .await
        {
            Ok(job) => job,
            Err(e) => {
                error!(gateway_id = %gateway.id, error = %e, "job submission failed");
                signal.cancel();
                push.unregister(id);
                return Err(BootstrapError::JobTrigger(e));
            }
        };
        info!(job_id = %job.id, command = %job.command, "job created, waiting for notification");

        let timeout = self.config.timeout();
        let outcome = tokio::select! {
            biased;
            link = gate.wait(timeout) => link.map_err(BootstrapError::from),
            fault = push.fault() => {
                signal.cancel();
                Err(BootstrapError::Push(fault))
            }
        };
        push.unregister(id);
        outcome.map(|link| (job, link))
    }
}

impl std::fmt::Debug for BootstrapOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapOrchestrator")
            .field("config", &self.config)
            .field("push_endpoint", &self.transport.endpoint())
            .finish()
    }
}
