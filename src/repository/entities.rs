//! Entity repository: upserts, active loads, and bulk stale-marking.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::models::{Entity, EntityStatus};
use crate::schema::entities;

use super::pool::{AsyncSqlitePool, DieselError};
use super::records::{EntityRecord, NewEntity};

#[derive(Clone)]
pub struct EntityRepository {
    pool: AsyncSqlitePool,
}

impl EntityRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or refresh an entity by its (org, watch, schema, external_id)
    /// identity. An existing row gets the new content and is resurrected to
    /// `active` if it had gone stale. Returns the entity row id.
    pub async fn upsert(
        &self,
        org_id: &str,
        watch_id: &str,
        schema_type: &str,
        external_id: &str,
        content: &str,
    ) -> Result<String, DieselError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let record = NewEntity {
            id: &id,
            org_id,
            watch_id,
            schema_type,
            external_id,
            content,
            status: EntityStatus::Active.as_str(),
            first_seen_at: &now,
            last_seen_at: &now,
            created_at: &now,
            updated_at: &now,
        };

        let mut conn = self.pool.get().await?;
        diesel::insert_into(entities::table)
            .values(&record)
            .on_conflict((
                entities::org_id,
                entities::watch_id,
                entities::schema_type,
                entities::external_id,
            ))
            .do_update()
            .set((
                entities::content.eq(content),
                entities::status.eq(EntityStatus::Active.as_str()),
                entities::last_seen_at.eq(&now),
                entities::updated_at.eq(&now),
            ))
            .returning(entities::id)
            .get_result::<String>(&mut conn)
            .await
    }

    /// All active entities for a watch. Stale entities are excluded so a
    /// reappearance diffs as `appeared` rather than silently unchanged.
    pub async fn get_active_by_watch(&self, watch_id: &str) -> Result<Vec<Entity>, DieselError> {
        let mut conn = self.pool.get().await?;

        entities::table
            .filter(entities::watch_id.eq(watch_id))
            .filter(entities::status.eq(EntityStatus::Active.as_str()))
            .order(entities::external_id.asc())
            .load::<EntityRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(Entity::from).collect())
    }

    /// Bulk-mark the given external ids stale for a watch.
    pub async fn mark_stale(
        &self,
        watch_id: &str,
        external_ids: &[String],
    ) -> Result<usize, DieselError> {
        if external_ids.is_empty() {
            return Ok(0);
        }
        let now = Utc::now().to_rfc3339();
        let mut conn = self.pool.get().await?;

        diesel::update(
            entities::table
                .filter(entities::watch_id.eq(watch_id))
                .filter(entities::external_id.eq_any(external_ids)),
        )
        .set((
            entities::status.eq(EntityStatus::Stale.as_str()),
            entities::updated_at.eq(&now),
        ))
        .execute(&mut conn)
        .await
    }
}
