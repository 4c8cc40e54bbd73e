//! Watch model: a user-configured monitored URL with a schedule and extraction rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchStatus {
    Active,
    Paused,
    Error,
}

impl WatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// A watch declares "monitor this URL on this schedule with these rules".
///
/// `next_run_at` is advanced by the scheduler only after a run completes;
/// `consecutive_failures` drives the circuit breaker that flips the status
/// to [`WatchStatus::Error`] after repeated failed runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Watch {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub url: String,
    /// Standard 5-field cron expression (minute, hour, dom, month, dow).
    pub schedule: String,
    /// Names of extracted fields whose values jointly identify an entity.
    pub identity_fields: Vec<String>,
    /// Serialized extraction rules, parsed at run time.
    pub extraction_rules: String,
    pub schema_type: String,
    pub status: WatchStatus,
    pub next_run_at: Option<DateTime<Utc>>,
    pub consecutive_failures: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}
