//! Diesel row records and their conversions into domain models.

use diesel::prelude::*;
use serde_json::Value;

use crate::models::{
    Delivery, DeliveryStatus, Entity, EntityStatus, Event, EventType, PendingDelivery, RunStatus,
    Subscription, Watch, WatchRun, WatchStatus,
};
use crate::schema;

use super::{parse_datetime, parse_datetime_opt};

/// Decode a TEXT column holding a JSON array of strings.
fn parse_string_array(raw: &str) -> Vec<String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        _ => Vec::new(),
    }
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::watches)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct WatchRecord {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub url: String,
    pub schedule: String,
    pub identity_fields: String,
    pub extraction_rules: String,
    pub schema_type: String,
    pub status: String,
    pub next_run_at: Option<String>,
    pub consecutive_failures: i32,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

impl From<WatchRecord> for Watch {
    fn from(r: WatchRecord) -> Self {
        Watch {
            status: WatchStatus::from_str(&r.status).unwrap_or(WatchStatus::Paused),
            identity_fields: parse_string_array(&r.identity_fields),
            next_run_at: parse_datetime_opt(r.next_run_at),
            created_at: parse_datetime(&r.created_at),
            updated_at: parse_datetime(&r.updated_at),
            deleted_at: parse_datetime_opt(r.deleted_at),
            id: r.id,
            org_id: r.org_id,
            name: r.name,
            url: r.url,
            schedule: r.schedule,
            extraction_rules: r.extraction_rules,
            schema_type: r.schema_type,
            consecutive_failures: r.consecutive_failures,
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::watches)]
pub struct NewWatch<'a> {
    pub id: &'a str,
    pub org_id: &'a str,
    pub name: &'a str,
    pub url: &'a str,
    pub schedule: &'a str,
    pub identity_fields: &'a str,
    pub extraction_rules: &'a str,
    pub schema_type: &'a str,
    pub status: &'a str,
    pub next_run_at: Option<&'a str>,
    pub consecutive_failures: i32,
    pub created_at: &'a str,
    pub updated_at: &'a str,
    pub deleted_at: Option<&'a str>,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::watch_runs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct WatchRunRecord {
    pub id: String,
    pub org_id: String,
    pub watch_id: String,
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub entities_found: Option<i32>,
    pub entities_new: Option<i32>,
    pub entities_changed: Option<i32>,
    pub entities_removed: Option<i32>,
    pub events_emitted: Option<i32>,
    pub error_message: Option<String>,
}

impl From<WatchRunRecord> for WatchRun {
    fn from(r: WatchRunRecord) -> Self {
        WatchRun {
            status: RunStatus::from_str(&r.status).unwrap_or(RunStatus::Failed),
            started_at: parse_datetime(&r.started_at),
            completed_at: parse_datetime_opt(r.completed_at),
            id: r.id,
            org_id: r.org_id,
            watch_id: r.watch_id,
            entities_found: r.entities_found,
            entities_new: r.entities_new,
            entities_changed: r.entities_changed,
            entities_removed: r.entities_removed,
            events_emitted: r.events_emitted,
            error_message: r.error_message,
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::watch_runs)]
pub struct NewWatchRun<'a> {
    pub id: &'a str,
    pub org_id: &'a str,
    pub watch_id: &'a str,
    pub status: &'a str,
    pub started_at: &'a str,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::entities)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EntityRecord {
    pub id: String,
    pub org_id: String,
    pub watch_id: String,
    pub schema_type: String,
    pub external_id: String,
    pub content: String,
    pub status: String,
    pub first_seen_at: String,
    pub last_seen_at: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<EntityRecord> for Entity {
    fn from(r: EntityRecord) -> Self {
        Entity {
            status: EntityStatus::from_str(&r.status).unwrap_or(EntityStatus::Active),
            first_seen_at: parse_datetime(&r.first_seen_at),
            last_seen_at: parse_datetime(&r.last_seen_at),
            id: r.id,
            org_id: r.org_id,
            watch_id: r.watch_id,
            schema_type: r.schema_type,
            external_id: r.external_id,
            content: r.content,
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::entities)]
pub struct NewEntity<'a> {
    pub id: &'a str,
    pub org_id: &'a str,
    pub watch_id: &'a str,
    pub schema_type: &'a str,
    pub external_id: &'a str,
    pub content: &'a str,
    pub status: &'a str,
    pub first_seen_at: &'a str,
    pub last_seen_at: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::events)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EventRecord {
    pub id: String,
    pub org_id: String,
    pub event_type: String,
    pub watch_id: String,
    pub watch_run_id: Option<String>,
    pub entity_id: Option<String>,
    pub payload: String,
    pub occurred_at: String,
}

impl From<EventRecord> for Event {
    fn from(r: EventRecord) -> Self {
        Event {
            event_type: EventType::from_str(&r.event_type).unwrap_or(EventType::EntityChanged),
            occurred_at: parse_datetime(&r.occurred_at),
            id: r.id,
            org_id: r.org_id,
            watch_id: r.watch_id,
            watch_run_id: r.watch_run_id,
            entity_id: r.entity_id,
            payload: r.payload,
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::events)]
pub struct NewEvent<'a> {
    pub id: &'a str,
    pub org_id: &'a str,
    pub event_type: &'a str,
    pub watch_id: &'a str,
    pub watch_run_id: Option<&'a str>,
    pub entity_id: Option<&'a str>,
    pub payload: &'a str,
    pub occurred_at: &'a str,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::subscriptions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SubscriptionRecord {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub event_types: String,
    pub watch_id: Option<String>,
    pub filters: String,
    pub channel_type: String,
    pub channel_config: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

impl From<SubscriptionRecord> for Subscription {
    fn from(r: SubscriptionRecord) -> Self {
        Subscription {
            event_types: parse_string_array(&r.event_types),
            created_at: parse_datetime(&r.created_at),
            id: r.id,
            org_id: r.org_id,
            name: r.name,
            watch_id: r.watch_id,
            filters: r.filters,
            channel_type: r.channel_type,
            channel_config: r.channel_config,
            status: r.status,
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::subscriptions)]
pub struct NewSubscription<'a> {
    pub id: &'a str,
    pub org_id: &'a str,
    pub name: &'a str,
    pub event_types: &'a str,
    pub watch_id: Option<&'a str>,
    pub filters: &'a str,
    pub channel_type: &'a str,
    pub channel_config: &'a str,
    pub status: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
    pub deleted_at: Option<&'a str>,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::deliveries)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DeliveryRecord {
    pub id: String,
    pub org_id: String,
    pub event_id: String,
    pub subscription_id: String,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_retry_at: Option<String>,
    pub last_error: Option<String>,
    pub delivered_at: Option<String>,
    pub created_at: String,
}

impl From<DeliveryRecord> for Delivery {
    fn from(r: DeliveryRecord) -> Self {
        Delivery {
            status: DeliveryStatus::from_str(&r.status).unwrap_or(DeliveryStatus::Pending),
            next_retry_at: parse_datetime_opt(r.next_retry_at),
            delivered_at: parse_datetime_opt(r.delivered_at),
            created_at: parse_datetime(&r.created_at),
            id: r.id,
            org_id: r.org_id,
            event_id: r.event_id,
            subscription_id: r.subscription_id,
            attempts: r.attempts,
            max_attempts: r.max_attempts,
            last_error: r.last_error,
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::deliveries)]
pub struct NewDelivery<'a> {
    pub id: &'a str,
    pub org_id: &'a str,
    pub event_id: &'a str,
    pub subscription_id: &'a str,
    pub status: &'a str,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_retry_at: Option<&'a str>,
    pub created_at: &'a str,
}

/// Joined row for the delivery processor's due-delivery query.
#[derive(Queryable, Debug, Clone)]
pub struct PendingDeliveryRow {
    pub id: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub event_type: String,
    pub event_payload: String,
    pub subscription_name: String,
    pub channel_config: String,
}

impl From<PendingDeliveryRow> for PendingDelivery {
    fn from(r: PendingDeliveryRow) -> Self {
        PendingDelivery {
            id: r.id,
            attempts: r.attempts,
            max_attempts: r.max_attempts,
            event_type: r.event_type,
            event_payload: r.event_payload,
            subscription_name: r.subscription_name,
            channel_config: r.channel_config,
        }
    }
}
