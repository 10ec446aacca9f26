//! Wire messages exchanged with the player.
//!
//! Every message is one JSON object terminated by `\n`. Requests carry a
//! `request_id` the player echoes back; property-change events carry the
//! observed property `name` instead.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Value of the `error` field on a successful response.
pub const SUCCESS: &str = "success";

/// Value of the `event` field on property-change notifications.
pub const PROPERTY_CHANGE: &str = "property-change";

/// Outbound command.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Request {
    pub command: Vec<Value>,
    pub request_id: i64,
}

impl Request {
    pub fn new(command: Vec<Value>, request_id: i64) -> Self {
        Self { command, request_id }
    }

    /// Serialize into a single newline-terminated line.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Inbound message: either a command response or an event.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Response {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub request_id: Option<i64>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Observer id on property-change events.
    #[serde(default)]
    pub id: Option<i64>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.error.as_deref() == Some(SUCCESS)
    }

    pub fn is_property_change(&self) -> bool {
        self.event.as_deref() == Some(PROPERTY_CHANGE)
    }

    /// Request id when present and nonzero.
    pub fn correlation_id(&self) -> Option<i64> {
        self.request_id.filter(|id| *id != 0)
    }

    pub fn into_data(self) -> Value {
        self.data.unwrap_or(Value::Null)
    }
}

/// One property-change event as delivered to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservePropertyResponse {
    pub property: String,
    pub data: Value,
}
