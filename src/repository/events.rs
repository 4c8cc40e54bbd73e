//! Event repository: append-only change events.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::models::{Event, EventType};
use crate::schema::events;

use super::pool::{AsyncSqlitePool, DieselError};
use super::records::{EventRecord, NewEvent};

#[derive(Clone)]
pub struct EventRepository {
    pool: AsyncSqlitePool,
}

impl EventRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Insert an event row and return the persisted event.
    pub async fn insert(
        &self,
        org_id: &str,
        event_type: EventType,
        watch_id: &str,
        watch_run_id: Option<&str>,
        entity_id: Option<&str>,
        payload: &str,
    ) -> Result<Event, DieselError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let occurred_at = now.to_rfc3339();

        let record = NewEvent {
            id: &id,
            org_id,
            event_type: event_type.as_str(),
            watch_id,
            watch_run_id,
            entity_id,
            payload,
            occurred_at: &occurred_at,
        };

        let mut conn = self.pool.get().await?;
        diesel::insert_into(events::table)
            .values(&record)
            .execute(&mut conn)
            .await?;

        Ok(Event {
            id,
            org_id: org_id.to_string(),
            event_type,
            watch_id: watch_id.to_string(),
            watch_run_id: watch_run_id.map(|s| s.to_string()),
            entity_id: entity_id.map(|s| s.to_string()),
            payload: payload.to_string(),
            occurred_at: now,
        })
    }

    /// Events produced by one run, oldest first.
    pub async fn get_by_run(&self, watch_run_id: &str) -> Result<Vec<Event>, DieselError> {
        let mut conn = self.pool.get().await?;

        events::table
            .filter(events::watch_run_id.eq(watch_run_id))
            .order(events::occurred_at.asc())
            .load::<EventRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(Event::from).collect())
    }
}
