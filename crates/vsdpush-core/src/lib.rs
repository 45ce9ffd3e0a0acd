//! vsdpush-core — push notifications and the bootstrap URL flow for VSD controllers.
//!
//! # Overview
//!
//! - [`Event`] / [`NotificationMatch`] — decoded push events and typed predicates
//! - [`HandlerRegistry`] — identity-filtered handler fan-out
//! - [`PushCenter`] — owns a [`PushTransport`] subscription and its receive task
//! - [`CompletionGate`] — single-shot signal from a handler to a waiting task
//! - [`BootstrapOrchestrator`] — gateway lookup, job trigger and wait, wired together
//!
//! ## Data flow
//! ```text
//! PushTransport (raw JSON, in order)
//!       │
//!       ▼
//! Event::decode ──(DecodeError: logged, skipped)
//!       │
//!       ▼
//! HandlerRegistry::dispatch ─► handler ─► NotificationMatch::find
//!                                              │ match
//!                                              ▼
//!                                       GateHandle::signal
//!                                              │
//!                                              ▼
//!                       BootstrapOrchestrator (CompletionGate::wait) ─► ResultSink
//! ```

pub mod bootstrap;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod gate;
pub mod memory;
pub mod registry;
pub mod sink;
pub mod transport;

pub use bootstrap::{BootstrapOrchestrator, BootstrapOutcome, SinkReport};
pub use client::{ClientState, PushCenter, PushMetrics};
pub use config::{BootstrapConfig, Credentials};
pub use controller::{Controller, Enterprise, Gateway, Job};
pub use error::{
    BootstrapError, ConfigError, ControllerError, DecodeError, GateError, HandlerError, PushError,
    SinkError,
};
pub use event::{ActionType, Event, NotificationMatch, PushBatch};
pub use gate::{CompletionGate, GateHandle};
pub use memory::{ChannelFeed, ChannelTransport};
pub use registry::{DispatchReport, EventHandler, HandlerRegistry, IdentityFilter, RegistrationId};
pub use sink::{FileSink, ResultSink};
pub use transport::{PushTransport, RawMessage, RawMessageStream};
