//! Serializes diff outcomes into event payloads, persists them, and hands
//! each event to the matcher.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::differ::{DiffResult, EntityDiff, FieldChange};
use crate::matcher::Matcher;
use crate::models::EventType;
use crate::repository::EventRepository;

/// Identifiers shared by every event of one run.
pub struct EmitContext<'a> {
    pub org_id: &'a str,
    pub watch_id: &'a str,
    pub watch_run_id: &'a str,
}

#[derive(Serialize)]
struct ChangedPayload<'a> {
    changes: &'a [FieldChange],
    entity: &'a crate::differ::EntityContent,
}

/// The emitter owns the diff-to-event translation. The matcher is injected
/// at construction; it needs nothing back from the emitter.
pub struct Emitter {
    events: EventRepository,
    matcher: Matcher,
}

impl Emitter {
    pub fn new(events: EventRepository, matcher: Matcher) -> Self {
        Self { events, matcher }
    }

    /// Persist one event per diff entry (appeared, then changed, then
    /// disappeared) and hand each to the matcher. A failed insert or
    /// match is a warning and never blocks later events. Returns the
    /// number of events persisted.
    pub async fn emit_diff_events(
        &self,
        ctx: &EmitContext<'_>,
        diff: &DiffResult,
        entity_ids: &BTreeMap<String, String>,
    ) -> usize {
        let mut count = 0;

        for d in &diff.appeared {
            let payload = json!({ "entity": d.content }).to_string();
            count += self
                .emit_one(ctx, EventType::EntityAppeared, d, entity_ids, &payload)
                .await;
        }

        for d in &diff.changed {
            let payload = match serde_json::to_string(&ChangedPayload {
                changes: &d.changes,
                entity: &d.content,
            }) {
                Ok(p) => p,
                Err(err) => {
                    warn!(external_id = %d.external_id, error = %err, "failed to build changed payload");
                    continue;
                }
            };
            count += self
                .emit_one(ctx, EventType::EntityChanged, d, entity_ids, &payload)
                .await;
        }

        for d in &diff.disappeared {
            let payload = json!({ "entity": { "external_id": d.external_id } }).to_string();
            count += self
                .emit_one(ctx, EventType::EntityDisappeared, d, entity_ids, &payload)
                .await;
        }

        count
    }

    async fn emit_one(
        &self,
        ctx: &EmitContext<'_>,
        event_type: EventType,
        d: &EntityDiff,
        entity_ids: &BTreeMap<String, String>,
        payload: &str,
    ) -> usize {
        let entity_id = entity_ids.get(&d.external_id).map(|s| s.as_str());

        let event = match self
            .events
            .insert(
                ctx.org_id,
                event_type,
                ctx.watch_id,
                Some(ctx.watch_run_id),
                entity_id,
                payload,
            )
            .await
        {
            Ok(event) => event,
            Err(err) => {
                warn!(
                    external_id = %d.external_id,
                    event_type = event_type.as_str(),
                    error = %err,
                    "failed to insert event"
                );
                return 0;
            }
        };

        if let Err(err) = self.matcher.create_deliveries(&event).await {
            warn!(event_id = %event.id, error = %err, "failed to match event to subscriptions");
        }
        1
    }
}
