//! Push event wire types and the stateless decoder.
//!
//! The controller delivers push notifications in batches:
//!
//! ```json
//! { "uuid": "b6f1...", "events": [
//!     { "entityType": "nsgnotification", "type": "CREATE",
//!       "updateMechanism": "DEFAULT", "eventReceivedTime": 1706000000000,
//!       "entities": [ { "notificationType": "NOTIFY_NSG_REGISTRATION",
//!                       "message": { "link": "https://..." } } ] }
//! ] }
//! ```
//!
//! Every entry of `events` decodes into one [`Event`].

use serde_json::{Map, Value};

use crate::error::DecodeError;

/// The action carried by a push event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionType {
    Create,
    Update,
    Delete,
    Revoke,
    Grant,
    /// Any action string this crate does not know about.
    Other(String),
}

impl ActionType {
    pub fn parse(s: &str) -> Self {
        match s {
            "CREATE" => Self::Create,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "REVOKE" => Self::Revoke,
            "GRANT" => Self::Grant,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Revoke => "REVOKE",
            Self::Grant => "GRANT",
            Self::Other(s) => s,
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded push event. Immutable once decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// REST name of the entity that changed (e.g. `"nsgnotification"`).
    pub entity_type: String,
    pub action: ActionType,
    /// Entity payloads in wire order.
    pub data: Vec<Map<String, Value>>,
    pub update_mechanism: Option<String>,
    /// Server receive time, milliseconds since the Unix epoch.
    pub received_at: Option<u64>,
}

impl Event {
    /// Decode a single raw event object.
    pub fn decode(raw: &Value) -> Result<Self, DecodeError> {
        let obj = raw.as_object().ok_or_else(|| DecodeError::InvalidField {
            field: "<root>".into(),
            reason: "expected a JSON object".into(),
        })?;

        let entity_type = required_str(obj, "entityType")?.to_string();
        let action = ActionType::parse(required_str(obj, "type")?);

        let entities = obj
            .get("entities")
            .ok_or_else(|| DecodeError::MissingField { field: "entities".into() })?
            .as_array()
            .ok_or_else(|| DecodeError::InvalidField {
                field: "entities".into(),
                reason: "expected an array".into(),
            })?;

        let data = entities
            .iter()
            .enumerate()
            .map(|(idx, entity)| {
                entity
                    .as_object()
                    .cloned()
                    .ok_or_else(|| DecodeError::InvalidField {
                        field: format!("entities[{idx}]"),
                        reason: "expected an object".into(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let update_mechanism = obj
            .get("updateMechanism")
            .and_then(Value::as_str)
            .map(String::from);
        let received_at = obj.get("eventReceivedTime").and_then(Value::as_u64);

        Ok(Self {
            entity_type,
            action,
            data,
            update_mechanism,
            received_at,
        })
    }

    /// Parse `bytes` as JSON, then [`decode`](Self::decode) it.
    pub fn decode_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        let raw: Value = serde_json::from_slice(bytes)?;
        Self::decode(&raw)
    }

    /// Re-encode to the wire shape (used for display by the CLI).
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("entityType".into(), Value::String(self.entity_type.clone()));
        obj.insert("type".into(), Value::String(self.action.to_string()));
        obj.insert(
            "entities".into(),
            Value::Array(self.data.iter().cloned().map(Value::Object).collect()),
        );
        if let Some(m) = &self.update_mechanism {
            obj.insert("updateMechanism".into(), Value::String(m.clone()));
        }
        if let Some(t) = self.received_at {
            obj.insert("eventReceivedTime".into(), Value::from(t));
        }
        Value::Object(obj)
    }
}

fn required_str<'a>(obj: &'a Map<String, Value>, field: &str) -> Result<&'a str, DecodeError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(DecodeError::MissingField { field: field.into() }),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(DecodeError::InvalidField {
            field: field.into(),
            reason: "expected a string".into(),
        }),
    }
}

/// One long-poll response: the session cursor and the raw events it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct PushBatch {
    /// Cursor to send back on the next poll.
    pub uuid: Option<String>,
    pub events: Vec<Value>,
}

impl PushBatch {
    /// Split a poll response body. Individual events are left raw so that a
    /// single malformed event does not discard the rest of the batch.
    pub fn decode(body: &Value) -> Result<Self, DecodeError> {
        let obj = body.as_object().ok_or_else(|| DecodeError::InvalidField {
            field: "<root>".into(),
            reason: "expected a JSON object".into(),
        })?;
        let uuid = obj.get("uuid").and_then(Value::as_str).map(String::from);
        let events = match obj.get("events") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => {
                return Err(DecodeError::InvalidField {
                    field: "events".into(),
                    reason: "expected an array".into(),
                })
            }
        };
        Ok(Self { uuid, events })
    }
}

/// Look up a string at a dotted path inside an entity payload, e.g. `"message.link"`.
pub fn lookup_str<'a>(entity: &'a Map<String, Value>, path: &str) -> Option<&'a str> {
    lookup(entity, path).and_then(Value::as_str)
}

/// Look up any value at a dotted path inside an entity payload.
pub fn lookup<'a>(entity: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = entity.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Typed predicate describing the notification a caller is waiting for.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationMatch {
    pub entity_type: String,
    pub action: Option<ActionType>,
    /// `(dotted path, expected value)` pairs that must all hold on one entity.
    pub fields: Vec<(String, Value)>,
}

impl NotificationMatch {
    pub const NSG_NOTIFICATION: &'static str = "nsgnotification";
    pub const NSG_REGISTRATION: &'static str = "NOTIFY_NSG_REGISTRATION";

    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            action: None,
            fields: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: ActionType) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_field(mut self, path: impl Into<String>, expected: impl Into<Value>) -> Self {
        self.fields.push((path.into(), expected.into()));
        self
    }

    /// `nsgnotification` / `CREATE` / `notificationType == <notification_type>`.
    pub fn nsg_notification(notification_type: impl Into<String>) -> Self {
        Self::new(Self::NSG_NOTIFICATION)
            .with_action(ActionType::Create)
            .with_field("notificationType", Value::String(notification_type.into()))
    }

    pub fn nsg_registration() -> Self {
        Self::nsg_notification(Self::NSG_REGISTRATION)
    }

    /// Returns the first entity of `event` that satisfies the predicate.
    pub fn find<'a>(&self, event: &'a Event) -> Option<&'a Map<String, Value>> {
        if event.entity_type != self.entity_type {
            return None;
        }
        if let Some(action) = &self.action {
            if &event.action != action {
                return None;
            }
        }
        event.data.iter().find(|entity| {
            self.fields
                .iter()
                .all(|(path, expected)| lookup(entity, path) == Some(expected))
        })
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.find(event).is_some()
    }
}
