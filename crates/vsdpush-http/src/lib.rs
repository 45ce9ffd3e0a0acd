//! vsdpush-http — reqwest-backed collaborators for `vsdpush-core`.
//!
//! - [`VsdSession`] — login handshake and authenticated requests
//! - [`RestController`] — enterprise / gateway lookup and job creation
//! - [`LongPollTransport`] — the `/events` long-poll push channel

pub mod push;
pub mod rest;
pub mod session;

pub use push::{LongPollConfig, LongPollTransport};
pub use rest::RestController;
pub use session::{SessionConfig, VsdSession};
