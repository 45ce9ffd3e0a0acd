//! Bootstrap configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::event::NotificationMatch;

/// Controller login credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
    /// Organization (enterprise) the user logs into.
    #[serde(default = "default_enterprise")]
    pub enterprise: String,
}

fn default_username() -> String { "csproot".into() }
fn default_password() -> String { "csproot".into() }
fn default_enterprise() -> String { "csp".into() }

impl Default for Credentials {
    fn default() -> Self {
        Self {
            username: default_username(),
            password: default_password(),
            enterprise: default_enterprise(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("enterprise", &self.enterprise)
            .finish()
    }
}

/// Everything the bootstrap flow needs, passed in at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Controller base URL, e.g. "https://vsd.example.com:8443"
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub credentials: Credentials,
    /// Name of the gateway to fetch the bootstrap URL for
    #[serde(default)]
    pub target_name: String,
    /// How long to wait for the notification
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Job command and notification type to wait for
    #[serde(default = "default_notification_type")]
    pub notification_type: String,
    /// Directory the result file is written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// REST API version segment ("v6" → /nuage/api/v6)
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Accept invalid TLS certificates
    #[serde(default)]
    pub insecure: bool,
}

fn default_endpoint() -> String { "https://localhost:8443".into() }
fn default_timeout_secs() -> u64 { 120 }
fn default_notification_type() -> String { NotificationMatch::NSG_REGISTRATION.into() }
fn default_output_dir() -> PathBuf { PathBuf::from(".") }
fn default_api_version() -> String { "v6".into() }

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            credentials: Credentials::default(),
            target_name: String::new(),
            timeout_secs: default_timeout_secs(),
            notification_type: default_notification_type(),
            output_dir: default_output_dir(),
            api_version: default_api_version(),
            insecure: false,
        }
    }
}

impl BootstrapConfig {
    /// Default settings for `target_name`.
    pub fn for_target(target_name: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Predicate for the notification this configuration waits for.
    pub fn notification(&self) -> NotificationMatch {
        NotificationMatch::nsg_notification(self.notification_type.clone())
    }

    /// Reject settings the bootstrap flow cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_name.trim().is_empty() {
            return Err(ConfigError::Invalid("target name is required".into()));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout must be greater than zero".into()));
        }
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "endpoint must be an http(s) URL, got '{}'",
                self.endpoint
            )));
        }
        if self.notification_type.is_empty() {
            return Err(ConfigError::Invalid("notification type is required".into()));
        }
        Ok(())
    }
}
