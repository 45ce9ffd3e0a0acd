//! `Controller` over the REST API of a [`VsdSession`].

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use vsdpush_core::controller::{Controller, Enterprise, Gateway, Job};
use vsdpush_core::error::ControllerError;

use crate::session::VsdSession;

/// Header carrying a server-side filter expression.
pub const FILTER_HEADER: &str = "X-Nuage-Filter";

/// REST-backed [`Controller`].
#[derive(Debug, Clone)]
pub struct RestController {
    session: Arc<VsdSession>,
}

impl RestController {
    pub fn new(session: Arc<VsdSession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<VsdSession> {
        &self.session
    }

    async fn list<T: DeserializeOwned>(
        &self,
        path: &str,
        filter: Option<String>,
    ) -> Result<Vec<T>, ControllerError> {
        let mut req = self.session.request(Method::GET, path)?;
        if let Some(filter) = filter {
            req = req.header(FILTER_HEADER, filter);
        }
        let body = self.session.send(req).await?;
        decode_list(body)
    }
}

#[async_trait]
impl Controller for RestController {
    async fn enterprises(&self) -> Result<Vec<Enterprise>, ControllerError> {
        self.list("enterprises", None).await
    }

    async fn gateways(
        &self,
        enterprise: &Enterprise,
        name: &str,
    ) -> Result<Vec<Gateway>, ControllerError> {
        let path = format!("enterprises/{}/nsgateways", enterprise.id);
        let gateways: Vec<Gateway> = self.list(&path, Some(name_filter(name))).await?;
        tracing::debug!(
            enterprise = %enterprise.name,
            name,
            matches = gateways.len(),
            "gateway lookup"
        );
        Ok(gateways)
    }

    async fn create_job(&self, gateway: &Gateway, command: &str) -> Result<Job, ControllerError> {
        let req = self
            .session
            .request(Method::POST, &format!("nsgateways/{}/jobs", gateway.id))?
            .json(&json!({ "command": command }));
        let body = self.session.send(req).await?;
        decode_list::<Job>(body)?
            .into_iter()
            .next()
            .ok_or_else(|| ControllerError::Other("job creation returned no job".into()))
    }
}

/// `name == "<name>"`, with embedded quotes escaped.
pub fn name_filter(name: &str) -> String {
    format!("name == \"{}\"", name.replace('"', "\\\""))
}

/// Decode a list response. `null` (empty body) is an empty list and a single
/// object is a list of one.
pub fn decode_list<T: DeserializeOwned>(body: Value) -> Result<Vec<T>, ControllerError> {
    match body {
        Value::Null => Ok(Vec::new()),
        Value::Array(_) => Ok(serde_json::from_value(body)?),
        other => Ok(vec![serde_json::from_value(other)?]),
    }
}
