//! Watch run repository: run rows bracketing each pipeline execution.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::models::{RunStats, RunStatus, WatchRun};
use crate::schema::watch_runs;

use super::pool::{AsyncSqlitePool, DieselError};
use super::records::{NewWatchRun, WatchRunRecord};

#[derive(Clone)]
pub struct RunRepository {
    pool: AsyncSqlitePool,
}

impl RunRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Create a run row in `running` state and return its id.
    pub async fn create(&self, org_id: &str, watch_id: &str) -> Result<String, DieselError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let record = NewWatchRun {
            id: &id,
            org_id,
            watch_id,
            status: RunStatus::Running.as_str(),
            started_at: &now,
        };

        let mut conn = self.pool.get().await?;
        diesel::insert_into(watch_runs::table)
            .values(&record)
            .execute(&mut conn)
            .await?;
        Ok(id)
    }

    /// Finalize a run with its status, counters, and optional error message.
    pub async fn complete(
        &self,
        id: &str,
        status: RunStatus,
        stats: RunStats,
        events_emitted: i32,
        error_message: Option<&str>,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        diesel::update(watch_runs::table.filter(watch_runs::id.eq(id)))
            .set((
                watch_runs::status.eq(status.as_str()),
                watch_runs::completed_at.eq(Utc::now().to_rfc3339()),
                watch_runs::entities_found.eq(stats.found),
                watch_runs::entities_new.eq(stats.new),
                watch_runs::entities_changed.eq(stats.changed),
                watch_runs::entities_removed.eq(stats.removed),
                watch_runs::events_emitted.eq(events_emitted),
                watch_runs::error_message.eq(error_message),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<WatchRun>, DieselError> {
        let mut conn = self.pool.get().await?;

        watch_runs::table
            .filter(watch_runs::id.eq(id))
            .first::<WatchRunRecord>(&mut conn)
            .await
            .optional()
            .map(|record| record.map(WatchRun::from))
    }
}
