//! Error types for the push pipeline and the bootstrap flow.

use thiserror::Error;

/// Errors raised while decoding a raw push message into an [`Event`](crate::event::Event).
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Errors from the push stream client and its transports.
#[derive(Debug, Error)]
pub enum PushError {
    /// The subscription could not be established.
    #[error("Push channel connection failed: {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// `start()` was called on a client that is already connecting or streaming.
    #[error("Push client already started")]
    AlreadyStarted,

    /// The stream ended while a reader was waiting on it.
    #[error("Push stream closed")]
    StreamClosed,

    /// The client lost its transport while streaming.
    #[error("Push stream faulted: {reason}")]
    Faulted { reason: String },

    /// A transport-level receive failure.
    #[error("Push transport error: {0}")]
    Transport(String),
}

impl PushError {
    /// Returns `true` if the error ends the current subscription.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::AlreadyStarted)
    }
}

/// Outcomes of [`CompletionGate::wait`](crate::gate::CompletionGate::wait) other than success.
///
/// Both are expected results, the caller decides what to do next.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("Timed out after {ms}ms waiting for notification")]
    Timeout { ms: u64 },

    #[error("Wait cancelled")]
    Cancelled,
}

/// Error returned by a failing event handler.
#[derive(Debug, Clone, Error)]
#[error("Handler error: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Errors from the controller REST collaborator.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors from a result sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

/// Configuration loading / validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Terminal errors of the bootstrap flow.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Lookup of '{name}' failed: {source}")]
    Lookup {
        name: String,
        #[source]
        source: ControllerError,
    },

    #[error("No gateway named '{name}'")]
    TargetNotFound { name: String },

    #[error("More than one gateway named '{name}' ({})", .candidates.join(", "))]
    AmbiguousTarget { name: String, candidates: Vec<String> },

    #[error(transparent)]
    Push(#[from] PushError),

    #[error("Job submission failed: {0}")]
    JobTrigger(#[source] ControllerError),

    #[error(transparent)]
    Gate(#[from] GateError),
}

impl BootstrapError {
    /// Returns `true` for outcomes the caller may reasonably act on again
    /// (a timeout or a cancelled wait), as opposed to hard failures.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::Gate(_))
    }
}
