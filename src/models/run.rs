//! Watch run model: one execution attempt of the pipeline for one watch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a watch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Counters accumulated while executing a single run.
///
/// The counters reflect the attempted work of the diff even when a
/// downstream persistence call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStats {
    pub found: i32,
    pub new: i32,
    pub changed: i32,
    pub removed: i32,
}

/// One execution attempt. Created in `running` state before the pipeline
/// starts and completed with counters (and an error message on failure).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchRun {
    pub id: String,
    pub org_id: String,
    pub watch_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub entities_found: Option<i32>,
    pub entities_new: Option<i32>,
    pub entities_changed: Option<i32>,
    pub entities_removed: Option<i32>,
    pub events_emitted: Option<i32>,
    pub error_message: Option<String>,
}
