//! Authenticated session against the controller REST API.
//!
//! The handshake is a single `GET {base}/me` with basic auth `user:password`
//! and the `X-Nuage-Organization` header. The response carries an API key;
//! every later request authenticates as `user:APIKey`.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;

use vsdpush_core::config::{BootstrapConfig, Credentials};
use vsdpush_core::error::ControllerError;

/// Header carrying the enterprise the user logs into.
pub const ORGANIZATION_HEADER: &str = "X-Nuage-Organization";

/// Connection settings for a [`VsdSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoint: String,
    pub api_version: String,
    pub credentials: Credentials,
    /// Accept self-signed controller certificates.
    pub insecure: bool,
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let defaults = BootstrapConfig::default();
        Self {
            endpoint: defaults.endpoint,
            api_version: defaults.api_version,
            credentials: defaults.credentials,
            insecure: false,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl SessionConfig {
    pub fn from_bootstrap(config: &BootstrapConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            api_version: config.api_version.clone(),
            credentials: config.credentials.clone(),
            insecure: config.insecure,
            ..Self::default()
        }
    }

    /// `{endpoint}/nuage/api/{version}`, without a trailing slash.
    pub fn base_url(&self) -> String {
        format!(
            "{}/nuage/api/{}",
            self.endpoint.trim_end_matches('/'),
            self.api_version
        )
    }
}

/// A logged-in (or not yet logged-in) controller session.
pub struct VsdSession {
    config: SessionConfig,
    base_url: String,
    http: reqwest::Client,
    api_key: RwLock<Option<String>>,
}

impl VsdSession {
    pub fn new(config: SessionConfig) -> Result<Self, ControllerError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .map_err(|e| ControllerError::Http(e.to_string()))?;
        Ok(Self {
            base_url: config.base_url(),
            config,
            http,
            api_key: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.api_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Perform the login handshake and keep the returned API key.
    pub async fn start(&self) -> Result<(), ControllerError> {
        let creds = &self.config.credentials;
        let url = format!("{}/me", self.base_url);
        tracing::debug!(url = %url, user = %creds.username, "logging in");

        let resp = self
            .http
            .get(&url)
            .basic_auth(&creds.username, Some(&creds.password))
            .header(ORGANIZATION_HEADER, &creds.enterprise)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| ControllerError::Http(e.to_string()))?;

        let body = read_json(resp).await?;
        let key = extract_api_key(&body)
            .ok_or_else(|| ControllerError::Auth("login response carries no APIKey".into()))?;

        *self.api_key.write().unwrap_or_else(PoisonError::into_inner) = Some(key);
        tracing::info!(
            endpoint = %self.config.endpoint,
            enterprise = %creds.enterprise,
            "session started"
        );
        Ok(())
    }

    /// An authenticated request for `path` (relative to the API base).
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ControllerError> {
        let key = self
            .api_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| ControllerError::Auth("session not started".into()))?;
        let creds = &self.config.credentials;
        Ok(self
            .http
            .request(method, format!("{}/{}", self.base_url, path.trim_start_matches('/')))
            .basic_auth(&creds.username, Some(key))
            .header(ORGANIZATION_HEADER, &creds.enterprise))
    }

    /// Send `req` with the session's request timeout and decode the JSON body.
    pub async fn send(&self, req: RequestBuilder) -> Result<Value, ControllerError> {
        let resp = req
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| ControllerError::Http(e.to_string()))?;
        read_json(resp).await
    }
}

impl std::fmt::Debug for VsdSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VsdSession")
            .field("base_url", &self.base_url)
            .field("user", &self.config.credentials.username)
            .field("started", &self.is_started())
            .finish()
    }
}

/// Check the status and decode the body. An empty body (e.g. `204`) is `Null`.
pub async fn read_json(resp: Response) -> Result<Value, ControllerError> {
    let status = resp.status();
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| ControllerError::Http(e.to_string()))?;

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ControllerError::Auth(format!(
            "HTTP {}: {}",
            status.as_u16(),
            String::from_utf8_lossy(&bytes)
        )));
    }
    if !status.is_success() {
        return Err(ControllerError::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(&bytes)?)
}

/// The `APIKey` of a `/me` response (an object, or a one-element array of it).
pub fn extract_api_key(body: &Value) -> Option<String> {
    let me = match body {
        Value::Array(items) => items.first()?,
        other => other,
    };
    me.get("APIKey")?.as_str().map(str::to_string)
}
