//! Subscription repository: candidate lookup for event matching.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::models::Subscription;
use crate::schema::subscriptions;

use super::pool::{AsyncSqlitePool, DieselError};
use super::records::{NewSubscription, SubscriptionRecord};

#[derive(Clone)]
pub struct SubscriptionRepository {
    pool: AsyncSqlitePool,
}

impl SubscriptionRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Active subscriptions of an org that subscribe to `event_type` and are
    /// either unscoped or scoped to `watch_id`. The event-type and watch
    /// whitelists live in JSON columns, so they are applied after the load.
    pub async fn match_candidates(
        &self,
        org_id: &str,
        event_type: &str,
        watch_id: &str,
    ) -> Result<Vec<Subscription>, DieselError> {
        let mut conn = self.pool.get().await?;

        let records = subscriptions::table
            .filter(subscriptions::org_id.eq(org_id))
            .filter(subscriptions::status.eq("active"))
            .filter(subscriptions::deleted_at.is_null())
            .load::<SubscriptionRecord>(&mut conn)
            .await?;

        Ok(records
            .into_iter()
            .map(Subscription::from)
            .filter(|sub| sub.event_types.iter().any(|t| t == event_type))
            .filter(|sub| match &sub.watch_id {
                Some(scoped) => scoped == watch_id,
                None => true,
            })
            .collect())
    }

    /// Insert a subscription. Authoring normally happens in the web app;
    /// this exists for seeding and tests.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        org_id: &str,
        name: &str,
        event_types: &[String],
        watch_id: Option<&str>,
        filters: &str,
        channel_type: &str,
        channel_config: &str,
    ) -> Result<Subscription, DieselError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let event_types_json =
            serde_json::to_string(event_types).map_err(super::pool::to_diesel_error)?;

        let record = NewSubscription {
            id: &id,
            org_id,
            name,
            event_types: &event_types_json,
            watch_id,
            filters,
            channel_type,
            channel_config,
            status: "active",
            created_at: &now,
            updated_at: &now,
            deleted_at: None,
        };

        let mut conn = self.pool.get().await?;
        diesel::insert_into(subscriptions::table)
            .values(&record)
            .execute(&mut conn)
            .await?;

        let found = subscriptions::table
            .filter(subscriptions::id.eq(&id))
            .first::<SubscriptionRecord>(&mut conn)
            .await?;
        Ok(Subscription::from(found))
    }
}
