//! vsdpush CLI — fetch NSG bootstrap URLs and watch controller push events.
//!
//! Usage:
//! ```bash
//! # Trigger the registration notification and save the bootstrap URL
//! vsdpush bootstrap-url --nsg nsg-paris --url https://vsd.example.com:8443
//!
//! # Print every push event until Ctrl-C
//! vsdpush watch --url https://vsd.example.com:8443
//!
//! # Print the next 5 nsgnotification events
//! vsdpush watch --entity nsgnotification --count 5
//! ```

use std::env;
use std::num::NonZeroU64;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::Notify;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vsdpush_core::{
    BootstrapConfig, BootstrapOrchestrator, Event, FileSink, HandlerError, IdentityFilter,
    PushCenter, SinkReport,
};
use vsdpush_http::{LongPollTransport, RestController, SessionConfig, VsdSession};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }
    init_tracing(has_flag(&args, "--json-logs"));

    let result = match args[1].as_str() {
        "bootstrap-url" => cmd_bootstrap_url(&args[2..]).await,
        "watch" => cmd_watch(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("vsdpush {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("vsdpush {}", env!("CARGO_PKG_VERSION"));
    println!("Fetch NSG bootstrap URLs and watch VSD push notifications\n");
    println!("USAGE:");
    println!("    vsdpush <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    bootstrap-url  Trigger NOTIFY_NSG_REGISTRATION and save the bootstrap URL");
    println!("    watch          Print push events as they arrive");
    println!("    version        Print version");
    println!("    help           Print this help\n");
    println!("CONNECTION FLAGS:");
    println!("    --url <URL>          Controller URL        [default: https://localhost:8443]");
    println!("    --user <NAME>        Username              [default: csproot]");
    println!("    --password <PWD>     Password              [default: csproot]");
    println!("    --org <NAME>         Organization          [default: csp]");
    println!("    --api-version <V>    REST API version      [default: v6]");
    println!("    --insecure           Accept invalid TLS certificates");
    println!("    --config <FILE>      JSON config file; flags override it");
    println!("    --json-logs          Emit JSON logs on stderr\n");
    println!("BOOTSTRAP-URL FLAGS:");
    println!("    --nsg <NAME>         Gateway name          [required]");
    println!("    --timeout <SECS>     Notification timeout  [default: 120]");
    println!("    --out-dir <DIR>      Where the URL file is written [default: .]\n");
    println!("WATCH FLAGS:");
    println!("    --entity <TYPE>      Only print events of this entity type");
    println!("    --count <N>          Exit after N events");
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn cmd_bootstrap_url(args: &[String]) -> Result<()> {
    let config = load_config(args)?;
    let session = connect(&config).await?;

    let orchestrator = BootstrapOrchestrator::new(
        config.clone(),
        Arc::new(RestController::new(Arc::clone(&session))),
        Arc::new(LongPollTransport::default_for(session)),
        Arc::new(FileSink::new(&config.output_dir)),
    );
    let outcome = orchestrator.run().await?;

    println!("Gateway:       {} ({})", outcome.gateway.name, outcome.gateway.id);
    println!("Enterprise:    {}", outcome.enterprise.name);
    println!("Bootstrap URL: {}", outcome.link);
    match outcome.saved {
        SinkReport::Stored(location) => println!("Saved to:      {location}"),
        SinkReport::Failed(reason) => eprintln!("Warning: URL not saved: {reason}"),
    }
    Ok(())
}

async fn cmd_watch(args: &[String]) -> Result<()> {
    let config = load_config(args)?;
    let filter = parse_flag(args, "--entity")
        .map(|entity| IdentityFilter::from(entity.as_str()))
        .unwrap_or(IdentityFilter::All);
    let limit = parse_flag(args, "--count")
        .map(|n| parse_count(&n))
        .transpose()?;

    let session = connect(&config).await?;
    let push = PushCenter::new(Arc::new(LongPollTransport::default_for(session)));

    let limit_reached = Arc::new(Notify::new());
    let notify = Arc::clone(&limit_reached);
    let seen = Arc::new(AtomicU64::new(0));
    let seen_total = Arc::clone(&seen);
    push.register(
        filter.clone(),
        Arc::new(move |event: &Event| -> Result<(), HandlerError> {
            let text = serde_json::to_string_pretty(&event.to_json())
                .map_err(|e| HandlerError::new(e.to_string()))?;
            println!("{text}");
            let n = seen.fetch_add(1, Ordering::Relaxed) + 1;
            if limit.is_some_and(|limit| n >= limit.get()) {
                notify.notify_one();
            }
            Ok(())
        }),
    );
    push.start().await?;
    eprintln!("Watching {} events on {} (Ctrl-C to stop)", filter, push.endpoint());

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => Ok(()),
        _ = limit_reached.notified(), if limit.is_some() => {
            tracing::info!(events = seen_total.load(Ordering::Relaxed), "event limit reached");
            Ok(())
        }
        fault = push.fault() => Err(fault),
    };

    push.stop();
    push.join(Duration::from_secs(5)).await;
    let metrics = push.metrics();
    tracing::info!(
        received = metrics.messages_received,
        dispatched = metrics.events_dispatched,
        decode_errors = metrics.decode_errors,
        "watch finished"
    );
    Ok(result?)
}

/// Config file (if any) with command-line flags layered on top.
fn load_config(args: &[String]) -> Result<BootstrapConfig> {
    let mut config = match parse_flag(args, "--config") {
        Some(path) => BootstrapConfig::from_json_file(&path)
            .with_context(|| format!("loading config from {path}"))?,
        None => BootstrapConfig::default(),
    };

    if let Some(v) = parse_flag(args, "--url") {
        config.endpoint = v;
    }
    if let Some(v) = parse_flag(args, "--user") {
        config.credentials.username = v;
    }
    if let Some(v) = parse_flag(args, "--password") {
        config.credentials.password = v;
    }
    if let Some(v) = parse_flag(args, "--org") {
        config.credentials.enterprise = v;
    }
    if let Some(v) = parse_flag(args, "--api-version") {
        config.api_version = v;
    }
    if let Some(v) = parse_flag(args, "--nsg") {
        config.target_name = v;
    }
    if let Some(v) = parse_flag(args, "--out-dir") {
        config.output_dir = v.into();
    }
    if let Some(v) = parse_flag(args, "--timeout") {
        config.timeout_secs = v
            .parse()
            .with_context(|| format!("--timeout must be a number of seconds, got '{v}'"))?;
    }
    if has_flag(args, "--insecure") {
        config.insecure = true;
    }
    if !config.endpoint.starts_with("http://") && !config.endpoint.starts_with("https://") {
        bail!("--url must be an http(s) URL, got '{}'", config.endpoint);
    }
    Ok(config)
}

async fn connect(config: &BootstrapConfig) -> Result<Arc<VsdSession>> {
    let session = VsdSession::new(SessionConfig::from_bootstrap(config))?;
    session
        .start()
        .await
        .with_context(|| format!("logging in to {}", config.endpoint))?;
    Ok(Arc::new(session))
}

fn parse_count(value: &str) -> Result<NonZeroU64> {
    value
        .parse::<NonZeroU64>()
        .with_context(|| format!("--count must be a positive integer, got '{value}'"))
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}
