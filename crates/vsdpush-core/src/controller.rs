//! The `Controller` trait — REST operations the bootstrap flow depends on.
//!
//! Only the handful of fields the flow reads are modelled; everything else
//! the controller returns is ignored.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ControllerError;

/// An enterprise (organization) visible to the logged-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enterprise {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
}

/// A network services gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gateway {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    #[serde(rename = "parentID", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(rename = "bootstrapStatus", default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_status: Option<String>,
}

/// A job created on a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "ID", default)]
    pub id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Request/response collaborator for the controller REST API.
#[async_trait]
pub trait Controller: Send + Sync {
    /// All enterprises visible to the session.
    async fn enterprises(&self) -> Result<Vec<Enterprise>, ControllerError>;

    /// Gateways of `enterprise` whose name equals `name`.
    async fn gateways(
        &self,
        enterprise: &Enterprise,
        name: &str,
    ) -> Result<Vec<Gateway>, ControllerError>;

    /// Ask the controller to run `command` on `gateway`.
    ///
    /// Success only means the job was accepted; its effects show up later
    /// as push notifications.
    async fn create_job(&self, gateway: &Gateway, command: &str) -> Result<Job, ControllerError>;
}
