//! Repository layer for database persistence.
//!
//! All database access uses Diesel ORM; SQLite gets an async interface via
//! diesel-async's SyncConnectionWrapper. Every cross-component hand-off in
//! the worker goes through these rows; there is no shared in-memory state.

mod deliveries;
mod entities;
mod events;
mod pool;
mod records;
mod runs;
mod subscriptions;
mod watches;

pub use deliveries::DeliveryRepository;
pub use entities::EntityRepository;
pub use events::EventRepository;
pub use pool::{AsyncSqlitePool, DieselError};
pub use runs::RunRepository;
pub use subscriptions::SubscriptionRepository;
pub use watches::WatchRepository;

use chrono::{DateTime, Utc};
use diesel_async::SimpleAsyncConnection;

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// Database context that owns the connection factory and hands out
/// repositories. Create one per process and clone freely.
#[derive(Clone)]
pub struct DbContext {
    pool: AsyncSqlitePool,
}

impl DbContext {
    /// Create a context from a database URL (`sqlite:` URLs or plain paths).
    pub fn from_url(database_url: &str) -> Self {
        Self {
            pool: AsyncSqlitePool::new(database_url),
        }
    }

    pub fn watches(&self) -> WatchRepository {
        WatchRepository::new(self.pool.clone())
    }

    pub fn runs(&self) -> RunRepository {
        RunRepository::new(self.pool.clone())
    }

    pub fn entities(&self) -> EntityRepository {
        EntityRepository::new(self.pool.clone())
    }

    pub fn events(&self) -> EventRepository {
        EventRepository::new(self.pool.clone())
    }

    pub fn subscriptions(&self) -> SubscriptionRepository {
        SubscriptionRepository::new(self.pool.clone())
    }

    pub fn deliveries(&self) -> DeliveryRepository {
        DeliveryRepository::new(self.pool.clone())
    }

    /// Create the tables and indexes if they don't exist.
    pub async fn init_schema(&self) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        conn.batch_execute(
            r#"
            CREATE TABLE IF NOT EXISTS watches (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                schedule TEXT NOT NULL,
                identity_fields TEXT NOT NULL DEFAULT '["name"]',
                extraction_rules TEXT NOT NULL DEFAULT '{}',
                schema_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                next_run_at TEXT,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS watch_runs (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                watch_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'running',
                started_at TEXT NOT NULL,
                completed_at TEXT,
                entities_found INTEGER,
                entities_new INTEGER,
                entities_changed INTEGER,
                entities_removed INTEGER,
                events_emitted INTEGER,
                error_message TEXT,
                FOREIGN KEY (watch_id) REFERENCES watches(id)
            );

            CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                watch_id TEXT NOT NULL,
                schema_type TEXT NOT NULL,
                external_id TEXT NOT NULL,
                content TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                first_seen_at TEXT NOT NULL,
                last_seen_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(org_id, watch_id, schema_type, external_id),
                FOREIGN KEY (watch_id) REFERENCES watches(id)
            );

            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                watch_id TEXT NOT NULL,
                watch_run_id TEXT,
                entity_id TEXT,
                payload TEXT NOT NULL,
                occurred_at TEXT NOT NULL,
                FOREIGN KEY (watch_id) REFERENCES watches(id)
            );

            CREATE TABLE IF NOT EXISTS subscriptions (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                name TEXT NOT NULL,
                event_types TEXT NOT NULL,
                watch_id TEXT,
                filters TEXT NOT NULL DEFAULT '{}',
                channel_type TEXT NOT NULL DEFAULT 'email',
                channel_config TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS deliveries (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                subscription_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 5,
                next_retry_at TEXT,
                last_error TEXT,
                delivered_at TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (event_id) REFERENCES events(id),
                FOREIGN KEY (subscription_id) REFERENCES subscriptions(id)
            );

            CREATE INDEX IF NOT EXISTS idx_watches_next_run ON watches(status, next_run_at);
            CREATE INDEX IF NOT EXISTS idx_watch_runs_watch ON watch_runs(watch_id);
            CREATE INDEX IF NOT EXISTS idx_entities_watch_status ON entities(watch_id, status);
            CREATE INDEX IF NOT EXISTS idx_events_watch ON events(watch_id);
            CREATE INDEX IF NOT EXISTS idx_events_run ON events(watch_run_id);
            CREATE INDEX IF NOT EXISTS idx_subscriptions_org ON subscriptions(org_id, status);
            CREATE INDEX IF NOT EXISTS idx_deliveries_pending ON deliveries(status, next_retry_at);
            "#,
        )
        .await
    }
}
