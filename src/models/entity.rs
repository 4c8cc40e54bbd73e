//! Entity model: a structured record extracted from one container node on a page.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Presence status of a stored entity.
///
/// Entities are never deleted by the pipeline; when one disappears from an
/// extraction it is marked stale, and a later reappearance resurrects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Active,
    Stale,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Stale => "stale",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "stale" => Some(Self::Stale),
            _ => None,
        }
    }
}

/// A persisted entity, keyed by (watch_id, external_id).
///
/// `external_id` is a deterministic 32-hex-character digest over the watch's
/// identity fields. `content` is the raw JSON object of field values; callers
/// that need the decoded map parse it themselves so a malformed row can be
/// skipped without failing the whole load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub org_id: String,
    pub watch_id: String,
    pub schema_type: String,
    pub external_id: String,
    pub content: String,
    pub status: EntityStatus,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}
