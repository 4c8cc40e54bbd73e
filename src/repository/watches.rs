//! Watch repository: due-watch selection and post-run metadata updates.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::models::{Watch, WatchStatus};
use crate::schema::watches;

use super::pool::{AsyncSqlitePool, DieselError};
use super::records::{NewWatch, WatchRecord};

#[derive(Clone)]
pub struct WatchRepository {
    pool: AsyncSqlitePool,
}

impl WatchRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Watches eligible for a scheduled run: active, not soft-deleted, and
    /// `next_run_at` unset or in the past. Watches in `error` status are
    /// excluded until manually re-activated.
    pub async fn get_due(&self, now: DateTime<Utc>) -> Result<Vec<Watch>, DieselError> {
        let now = now.to_rfc3339();
        let mut conn = self.pool.get().await?;

        watches::table
            .filter(watches::status.eq(WatchStatus::Active.as_str()))
            .filter(watches::deleted_at.is_null())
            .filter(watches::next_run_at.is_null().or(watches::next_run_at.le(&now)))
            .order(watches::next_run_at.asc())
            .load::<WatchRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(Watch::from).collect())
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Watch>, DieselError> {
        let mut conn = self.pool.get().await?;

        watches::table
            .filter(watches::id.eq(id))
            .filter(watches::deleted_at.is_null())
            .first::<WatchRecord>(&mut conn)
            .await
            .optional()
            .map(|record| record.map(Watch::from))
    }

    /// Persist post-run metadata: the advanced `next_run_at`, the failure
    /// counter, and the (possibly tripped) status.
    pub async fn update_after_run(
        &self,
        id: &str,
        next_run_at: DateTime<Utc>,
        consecutive_failures: i32,
        status: WatchStatus,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        diesel::update(watches::table.filter(watches::id.eq(id)))
            .set((
                watches::next_run_at.eq(next_run_at.to_rfc3339()),
                watches::consecutive_failures.eq(consecutive_failures),
                watches::status.eq(status.as_str()),
                watches::updated_at.eq(Utc::now().to_rfc3339()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Insert a new watch. Watch authoring normally happens in the web app;
    /// this exists for seeding and tests.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        org_id: &str,
        name: &str,
        url: &str,
        schedule: &str,
        identity_fields: &[String],
        extraction_rules: &str,
        schema_type: &str,
    ) -> Result<Watch, DieselError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let identity_json =
            serde_json::to_string(identity_fields).map_err(super::pool::to_diesel_error)?;

        let record = NewWatch {
            id: &id,
            org_id,
            name,
            url,
            schedule,
            identity_fields: &identity_json,
            extraction_rules,
            schema_type,
            status: WatchStatus::Active.as_str(),
            next_run_at: Some(&now),
            consecutive_failures: 0,
            created_at: &now,
            updated_at: &now,
            deleted_at: None,
        };

        let mut conn = self.pool.get().await?;
        diesel::insert_into(watches::table)
            .values(&record)
            .execute(&mut conn)
            .await?;

        self.get_by_id(&id)
            .await?
            .ok_or(diesel::result::Error::NotFound)
    }
}
