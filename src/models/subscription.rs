//! Subscription model: a user rule that directs matching events to a channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A subscription selects events by org, event type, and optionally a single
/// watch, then narrows further with AND-composed filter conditions. The
/// channel config is channel-specific JSON; for email it carries the
/// recipient list under `to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub org_id: String,
    pub name: String,
    /// Event type whitelist, e.g. `["entity_changed", "entity_disappeared"]`.
    pub event_types: Vec<String>,
    /// Restrict to one watch; `None` means events from any watch.
    pub watch_id: Option<String>,
    /// Serialized filter conditions (`{"conditions": [...]}`).
    pub filters: String,
    pub channel_type: String,
    pub channel_config: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}
