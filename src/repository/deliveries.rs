//! Delivery repository: the at-least-once retry state machine's ground truth.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::models::{Delivery, DeliveryStatus, PendingDelivery};
use crate::schema::{deliveries, events, subscriptions};

use super::pool::{AsyncSqlitePool, DieselError};
use super::records::{DeliveryRecord, NewDelivery, PendingDeliveryRow};

/// Default attempt budget for a new delivery.
const DEFAULT_MAX_ATTEMPTS: i32 = 5;

#[derive(Clone)]
pub struct DeliveryRepository {
    pool: AsyncSqlitePool,
}

impl DeliveryRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Create a pending delivery for an (event, subscription) pair, due
    /// immediately.
    pub async fn insert(
        &self,
        org_id: &str,
        event_id: &str,
        subscription_id: &str,
    ) -> Result<String, DieselError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let record = NewDelivery {
            id: &id,
            org_id,
            event_id,
            subscription_id,
            status: DeliveryStatus::Pending.as_str(),
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            next_retry_at: Some(&now),
            created_at: &now,
        };

        let mut conn = self.pool.get().await?;
        diesel::insert_into(deliveries::table)
            .values(&record)
            .execute(&mut conn)
            .await?;
        Ok(id)
    }

    /// Pending deliveries whose retry time has arrived (or was never set),
    /// joined with the event and subscription columns the processor needs.
    pub async fn get_pending(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PendingDelivery>, DieselError> {
        let now = now.to_rfc3339();
        let mut conn = self.pool.get().await?;

        deliveries::table
            .inner_join(events::table)
            .inner_join(subscriptions::table)
            .filter(deliveries::status.eq(DeliveryStatus::Pending.as_str()))
            .filter(
                deliveries::next_retry_at
                    .is_null()
                    .or(deliveries::next_retry_at.le(&now)),
            )
            .order(deliveries::created_at.asc())
            .select((
                deliveries::id,
                deliveries::attempts,
                deliveries::max_attempts,
                events::event_type,
                events::payload,
                subscriptions::name,
                subscriptions::channel_config,
            ))
            .load::<PendingDeliveryRow>(&mut conn)
            .await
            .map(|rows| rows.into_iter().map(PendingDelivery::from).collect())
    }

    pub async fn mark_delivered(&self, id: &str) -> Result<(), DieselError> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.pool.get().await?;

        diesel::update(deliveries::table.filter(deliveries::id.eq(id)))
            .set((
                deliveries::status.eq(DeliveryStatus::Delivered.as_str()),
                deliveries::attempts.eq(deliveries::attempts + 1),
                deliveries::delivered_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Record a failed attempt and schedule the next one.
    pub async fn mark_retry(
        &self,
        id: &str,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        diesel::update(deliveries::table.filter(deliveries::id.eq(id)))
            .set((
                deliveries::status.eq(DeliveryStatus::Pending.as_str()),
                deliveries::attempts.eq(deliveries::attempts + 1),
                deliveries::next_retry_at.eq(next_retry_at.to_rfc3339()),
                deliveries::last_error.eq(last_error),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Record a terminal failure.
    pub async fn mark_failed(&self, id: &str, last_error: &str) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        diesel::update(deliveries::table.filter(deliveries::id.eq(id)))
            .set((
                deliveries::status.eq(DeliveryStatus::Failed.as_str()),
                deliveries::attempts.eq(deliveries::attempts + 1),
                deliveries::last_error.eq(last_error),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Delivery>, DieselError> {
        let mut conn = self.pool.get().await?;

        deliveries::table
            .filter(deliveries::id.eq(id))
            .first::<DeliveryRecord>(&mut conn)
            .await
            .optional()
            .map(|record| record.map(Delivery::from))
    }
}
