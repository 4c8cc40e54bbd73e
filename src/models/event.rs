//! Event model: an immutable record of one entity-level change produced by a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of change an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    EntityAppeared,
    EntityChanged,
    EntityDisappeared,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntityAppeared => "entity_appeared",
            Self::EntityChanged => "entity_changed",
            Self::EntityDisappeared => "entity_disappeared",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "entity_appeared" => Some(Self::EntityAppeared),
            "entity_changed" => Some(Self::EntityChanged),
            "entity_disappeared" => Some(Self::EntityDisappeared),
            _ => None,
        }
    }
}

/// A persisted change event. The payload shape varies by type:
///
/// - `entity_appeared`: `{"entity": <content>}`
/// - `entity_changed`: `{"changes": [{"field","old","new"}, ...], "entity": <new content>}`
/// - `entity_disappeared`: `{"entity": {"external_id": <eid>}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub org_id: String,
    pub event_type: EventType,
    pub watch_id: String,
    pub watch_run_id: Option<String>,
    pub entity_id: Option<String>,
    pub payload: String,
    pub occurred_at: DateTime<Utc>,
}
