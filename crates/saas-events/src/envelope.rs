use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::events::EventName;

/// Normalized body POSTed to every subscriber: `{event, timestamp, data, triggeredBy}`.
///
/// Built once per dispatch and shared by every delivery session it fans out
/// to. It is never stored on its own; audit records keep a JSON snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub event: EventName,

    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,

    pub data: Value,

    #[serde(rename = "triggeredBy")]
    pub triggered_by: Option<String>,
}

impl EventEnvelope {
    /// Create an envelope stamped with the current UTC time.
    pub fn new(event: impl Into<EventName>, data: Value, triggered_by: Option<String>) -> Self {
        Self {
            event: event.into(),
            timestamp: OffsetDateTime::now_utc(),
            data,
            triggered_by,
        }
    }

    /// JSON value form of the envelope, as kept in audit snapshots.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
