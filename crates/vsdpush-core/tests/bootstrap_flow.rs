//! End-to-end bootstrap flow against an in-memory controller and push channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};

use vsdpush_core::{
    BootstrapConfig, BootstrapError, BootstrapOrchestrator, ChannelFeed, ChannelTransport,
    CompletionGate, Controller, ControllerError, Enterprise, Event, GateError, Gateway,
    HandlerError, IdentityFilter, Job, NotificationMatch, PushCenter, PushError, PushTransport,
    RawMessageStream, ResultSink, SinkError, SinkReport,
};

// ─── Fakes ────────────────────────────────────────────────────────────────────

struct FakeController {
    enterprises: Vec<Enterprise>,
    gateways: HashMap<String, Vec<Gateway>>,
    feed: ChannelFeed,
    /// Raw events the "server" emits once a job is accepted.
    on_job: Vec<Value>,
    fail_job: bool,
    fail_stream_on_job: bool,
    jobs: Mutex<Vec<(String, String)>>,
}

impl FakeController {
    fn new(feed: ChannelFeed) -> Self {
        Self {
            enterprises: vec![],
            gateways: HashMap::new(),
            feed,
            on_job: vec![],
            fail_job: false,
            fail_stream_on_job: false,
            jobs: Mutex::new(vec![]),
        }
    }

    fn with_gateway(mut self, enterprise: &str, gateway_id: &str, name: &str) -> Self {
        let ent_id = format!("ent-{enterprise}");
        if !self.enterprises.iter().any(|e| e.id == ent_id) {
            self.enterprises.push(Enterprise {
                id: ent_id.clone(),
                name: enterprise.to_string(),
            });
        }
        self.gateways.entry(ent_id.clone()).or_default().push(Gateway {
            id: gateway_id.to_string(),
            name: name.to_string(),
            parent_id: Some(ent_id),
            bootstrap_status: None,
        });
        self
    }

    fn emitting(mut self, raw: Value) -> Self {
        self.on_job.push(raw);
        self
    }

    fn job_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

#[async_trait]
impl Controller for FakeController {
    async fn enterprises(&self) -> Result<Vec<Enterprise>, ControllerError> {
        Ok(self.enterprises.clone())
    }

    async fn gateways(
        &self,
        enterprise: &Enterprise,
        name: &str,
    ) -> Result<Vec<Gateway>, ControllerError> {
        Ok(self
            .gateways
            .get(&enterprise.id)
            .map(|gws| gws.iter().filter(|g| g.name == name).cloned().collect())
            .unwrap_or_default())
    }

    async fn create_job(&self, gateway: &Gateway, command: &str) -> Result<Job, ControllerError> {
        if self.fail_job {
            return Err(ControllerError::Status {
                status: 409,
                body: "job already running".into(),
            });
        }
        self.jobs
            .lock()
            .unwrap()
            .push((gateway.id.clone(), command.to_string()));
        for raw in &self.on_job {
            self.feed.push(raw.clone());
        }
        if self.fail_stream_on_job {
            self.feed.fail("connection reset by peer");
        }
        Ok(Job {
            id: "job-1".into(),
            command: command.to_string(),
            status: Some("RUNNING".into()),
        })
    }
}

/// Counts `open()` calls on the wrapped transport.
struct CountingTransport {
    inner: ChannelTransport,
    opens: Arc<AtomicUsize>,
}

#[async_trait]
impl PushTransport for CountingTransport {
    fn endpoint(&self) -> &str {
        self.inner.endpoint()
    }

    async fn open(&self) -> Result<RawMessageStream, PushError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.inner.open().await
    }
}

#[derive(Default)]
struct MemorySink {
    stored: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn store(&self, name: &str, payload: &str) -> Result<String, SinkError> {
        self.stored
            .lock()
            .unwrap()
            .push((name.to_string(), payload.to_string()));
        Ok(format!("memory://{name}"))
    }
}

struct FailingSink;

#[async_trait]
impl ResultSink for FailingSink {
    async fn store(&self, _name: &str, _payload: &str) -> Result<String, SinkError> {
        Err(SinkError::Other("disk full".into()))
    }
}

fn registration(link: &str) -> Value {
    json!({
        "entityType": "nsgnotification",
        "type": "CREATE",
        "entities": [{
            "notificationType": "NOTIFY_NSG_REGISTRATION",
            "message": { "link": link }
        }]
    })
}

struct Harness {
    controller: Arc<FakeController>,
    opens: Arc<AtomicUsize>,
    sink: Arc<MemorySink>,
    orchestrator: BootstrapOrchestrator,
}

fn harness(config: BootstrapConfig, build: impl FnOnce(FakeController) -> FakeController) -> Harness {
    let (inner, feed) = ChannelTransport::new();
    let opens = Arc::new(AtomicUsize::new(0));
    let transport = Arc::new(CountingTransport {
        inner,
        opens: Arc::clone(&opens),
    });
    let controller = Arc::new(build(FakeController::new(feed)));
    let sink = Arc::new(MemorySink::default());
    let orchestrator = BootstrapOrchestrator::new(
        config,
        controller.clone(),
        transport,
        sink.clone(),
    );
    Harness {
        controller,
        opens,
        sink,
        orchestrator,
    }
}

// ─── Orchestrator ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn fetches_and_stores_bootstrap_url() {
    let h = harness(BootstrapConfig::for_target("nsg-paris"), |c| {
        c.with_gateway("acme", "gw-1", "nsg-paris")
            .with_gateway("acme", "gw-2", "nsg-lyon")
            .emitting(json!({ "entityType": "vport", "type": "UPDATE", "entities": [{}] }))
            .emitting(json!({ "garbage": true }))
            .emitting(json!({
                "entityType": "nsgnotification",
                "type": "CREATE",
                "entities": [{ "notificationType": "NOTIFY_OTHER" }]
            }))
            .emitting(registration("https://x/y"))
            .emitting(registration("https://x/late"))
    });

    let outcome = h.orchestrator.run().await.unwrap();

    assert_eq!(outcome.link, "https://x/y");
    assert_eq!(outcome.gateway.id, "gw-1");
    assert_eq!(outcome.enterprise.name, "acme");
    assert_eq!(outcome.job.command, "NOTIFY_NSG_REGISTRATION");
    assert_eq!(outcome.saved, SinkReport::Stored("memory://nsg-paris".into()));
    assert_eq!(
        *h.sink.stored.lock().unwrap(),
        vec![("nsg-paris".to_string(), "https://x/y".to_string())]
    );
    assert_eq!(
        *h.controller.jobs.lock().unwrap(),
        vec![("gw-1".to_string(), "NOTIFY_NSG_REGISTRATION".to_string())]
    );
}

#[tokio::test]
async fn ambiguous_target_aborts_before_side_effects() {
    let h = harness(BootstrapConfig::for_target("nsg-paris"), |c| {
        c.with_gateway("acme", "gw-1", "nsg-paris")
            .with_gateway("globex", "gw-9", "nsg-paris")
    });

    let err = h.orchestrator.run().await.unwrap_err();

    match err {
        BootstrapError::AmbiguousTarget { name, candidates } => {
            assert_eq!(name, "nsg-paris");
            assert_eq!(candidates, vec!["acme/gw-1".to_string(), "globex/gw-9".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.controller.job_count(), 0);
    assert_eq!(h.opens.load(Ordering::SeqCst), 0);
    assert!(h.sink.stored.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_target_is_reported() {
    let h = harness(BootstrapConfig::for_target("nsg-nowhere"), |c| {
        c.with_gateway("acme", "gw-1", "nsg-paris")
    });
    let err = h.orchestrator.run().await.unwrap_err();
    assert!(matches!(err, BootstrapError::TargetNotFound { .. }));
    assert_eq!(h.opens.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn job_failure_skips_the_wait() {
    let mut config = BootstrapConfig::for_target("nsg-paris");
    config.timeout_secs = 30;
    let h = harness(config, |mut c| {
        c.fail_job = true;
        c.with_gateway("acme", "gw-1", "nsg-paris")
    });

    let started = Instant::now();
    let err = h.orchestrator.run().await.unwrap_err();

    assert!(matches!(err, BootstrapError::JobTrigger(ControllerError::Status { status: 409, .. })));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(h.sink.stored.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_notification_times_out() {
    let mut config = BootstrapConfig::for_target("nsg-paris");
    config.timeout_secs = 1;
    let h = harness(config, |c| c.with_gateway("acme", "gw-1", "nsg-paris"));

    let err = h.orchestrator.run().await.unwrap_err();

    assert!(matches!(err, BootstrapError::Gate(GateError::Timeout { ms: 1000 })));
    assert!(err.is_expected());
    assert_eq!(h.controller.job_count(), 1);
}

#[tokio::test]
async fn transport_fault_during_wait_is_surfaced() {
    let h = harness(BootstrapConfig::for_target("nsg-paris"), |mut c| {
        c.fail_stream_on_job = true;
        c.with_gateway("acme", "gw-1", "nsg-paris")
    });

    let err = h.orchestrator.run().await.unwrap_err();

    assert!(matches!(err, BootstrapError::Push(PushError::Faulted { .. })));
    assert_eq!(h.controller.job_count(), 1);
}

#[tokio::test]
async fn sink_failure_is_reported_not_fatal() {
    let (transport, feed) = ChannelTransport::new();
    let controller = Arc::new(
        FakeController::new(feed)
            .with_gateway("acme", "gw-1", "nsg-paris")
            .emitting(registration("https://x/y")),
    );
    let orchestrator = BootstrapOrchestrator::new(
        BootstrapConfig::for_target("nsg-paris"),
        controller,
        Arc::new(transport),
        Arc::new(FailingSink),
    );

    let outcome = orchestrator.run().await.unwrap();

    assert_eq!(outcome.link, "https://x/y");
    assert!(matches!(outcome.saved, SinkReport::Failed(ref reason) if reason.contains("disk full")));
}

#[tokio::test]
async fn invalid_config_is_rejected_up_front() {
    let mut config = BootstrapConfig::for_target("nsg-paris");
    config.timeout_secs = 0;
    let h = harness(config, |c| c.with_gateway("acme", "gw-1", "nsg-paris"));
    assert!(matches!(h.orchestrator.run().await, Err(BootstrapError::Config(_))));
    assert_eq!(h.opens.load(Ordering::SeqCst), 0);
}

// ─── Push client + gate scenarios ─────────────────────────────────────────────

#[tokio::test]
async fn wildcard_handler_captures_registration_link() {
    let (transport, feed) = ChannelTransport::new();
    let push = PushCenter::new(Arc::new(transport));
    let gate = CompletionGate::<String>::new();
    let signal = gate.handle();
    let predicate = NotificationMatch::nsg_registration();

    push.register(
        IdentityFilter::from("all"),
        Arc::new(move |event: &Event| -> Result<(), HandlerError> {
            if let Some(entity) = predicate.find(event) {
                let link = vsdpush_core::event::lookup_str(entity, "message.link")
                    .ok_or_else(|| HandlerError::new("no link"))?;
                signal.signal(link.to_string());
            }
            Ok(())
        }),
    );
    push.start().await.unwrap();
    feed.push(registration("https://x/y"));

    assert_eq!(gate.wait(Duration::from_secs(5)).await.unwrap(), "https://x/y");
    push.stop();
    assert!(push.join(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn stop_and_cancel_release_a_pending_wait() {
    let (transport, _feed) = ChannelTransport::new();
    let push = Arc::new(PushCenter::new(Arc::new(transport)));
    let gate = CompletionGate::<String>::new();
    let signal = gate.handle();
    push.start().await.unwrap();

    let waiter = tokio::spawn(gate.wait(Duration::from_secs(60)));

    let stopper = {
        let push = Arc::clone(&push);
        tokio::spawn(async move {
            push.stop();
            signal.cancel();
        })
    };
    stopper.await.unwrap();

    assert!(push.join(Duration::from_secs(1)).await);
    assert_eq!(waiter.await.unwrap(), Err(GateError::Cancelled));
}
