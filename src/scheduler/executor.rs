//! Runs one watch to completion: fetch, clean, extract, identity-hash,
//! diff, persist, emit.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::blueprint::{self, ExtractionRules};
use crate::differ::{self, canonical_string, EntityContent};
use crate::emitter::{EmitContext, Emitter};
use crate::fetcher::{FetchError, HtmlFetcher};
use crate::models::{RunStats, RunStatus, Watch, WatchStatus};
use crate::repository::{DbContext, DieselError};

/// Failed runs tolerated before the circuit breaker flips the watch to
/// `error` status.
const MAX_CONSECUTIVE_FAILURES: i32 = 3;

/// A fatal error in one watch run. Persistence problems on the upsert /
/// stale-mark / event path are not represented here: they are logged
/// warnings that leave the diff's accounting intact.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("watch {0} not found")]
    WatchNotFound(String),
    #[error("parsing extraction rules: {0}")]
    Rules(#[from] serde_json::Error),
    #[error("fetching HTML: {0}")]
    Fetch(#[from] FetchError),
    #[error("extracting entities: {0}")]
    Extract(#[from] blueprint::ExtractError),
    #[error("database error: {0}")]
    Db(#[from] DieselError),
}

pub struct Executor {
    db: DbContext,
    fetcher: Arc<dyn HtmlFetcher>,
    emitter: Emitter,
}

impl Executor {
    pub fn new(db: DbContext, fetcher: Arc<dyn HtmlFetcher>, emitter: Emitter) -> Self {
        Self {
            db,
            fetcher,
            emitter,
        }
    }

    /// Execute a due watch. Never propagates an error: the outcome lands in
    /// the run row and the watch's post-run metadata.
    pub async fn execute(&self, watch: &Watch) {
        info!(watch_id = %watch.id, watch_name = %watch.name, "executing watch run");

        let run_id = match self.db.runs().create(&watch.org_id, &watch.id).await {
            Ok(id) => id,
            Err(err) => {
                error!(watch_id = %watch.id, error = %err, "failed to create watch run");
                return;
            }
        };

        let outcome = self.execute_run(watch, &run_id).await;
        self.finish_run(watch, &run_id, outcome).await;
    }

    /// Manual trigger: bypasses the due gate but otherwise runs the full
    /// pipeline. Returns the run id even when execution failed so callers
    /// can inspect the run row.
    pub async fn execute_by_id(&self, watch_id: &str) -> Result<String, RunError> {
        let watch = self
            .db
            .watches()
            .get_by_id(watch_id)
            .await?
            .ok_or_else(|| RunError::WatchNotFound(watch_id.to_string()))?;

        let run_id = self.db.runs().create(&watch.org_id, &watch.id).await?;

        let outcome = self.execute_run(&watch, &run_id).await;
        let failed = outcome.error.is_some();
        self.finish_run(&watch, &run_id, outcome).await;

        if failed {
            info!(watch_id, run_id = %run_id, "manual run failed");
        }
        Ok(run_id)
    }

    async fn finish_run(&self, watch: &Watch, run_id: &str, outcome: RunOutcome) {
        let (status, error_message) = match &outcome.error {
            None => (RunStatus::Completed, None),
            Some(err) => (RunStatus::Failed, Some(err.to_string())),
        };

        if let Err(err) = self
            .db
            .runs()
            .complete(
                run_id,
                status,
                outcome.stats,
                outcome.events_emitted,
                error_message.as_deref(),
            )
            .await
        {
            error!(run_id, error = %err, "failed to complete watch run");
        }

        self.update_watch_after_run(watch, outcome.error.is_some())
            .await;
    }

    async fn execute_run(&self, watch: &Watch, run_id: &str) -> RunOutcome {
        let mut outcome = RunOutcome::default();

        match self.run_pipeline(watch, run_id, &mut outcome).await {
            Ok(()) => outcome,
            Err(err) => {
                outcome.error = Some(err);
                outcome
            }
        }
    }

    async fn run_pipeline(
        &self,
        watch: &Watch,
        run_id: &str,
        outcome: &mut RunOutcome,
    ) -> Result<(), RunError> {
        let rules: ExtractionRules = serde_json::from_str(&watch.extraction_rules)?;

        let raw_html = self.fetcher.fetch_html(&watch.url).await?;
        let cleaned = blueprint::clean(&raw_html);
        let extracted_raw = blueprint::extract(&cleaned, &rules)?;

        outcome.stats.found = extracted_raw.len() as i32;
        info!(watch_id = %watch.id, count = extracted_raw.len(), "entities extracted");

        // Identity-hash each entity. On a collision the last extraction wins.
        let mut extracted: BTreeMap<String, EntityContent> = BTreeMap::new();
        for entity in extracted_raw {
            let eid = compute_external_id(&entity, &watch.identity_fields);
            if extracted.insert(eid.clone(), entity).is_some() {
                warn!(watch_id = %watch.id, external_id = %eid, "identity collision, keeping last");
            }
        }

        let mut stored: BTreeMap<String, EntityContent> = BTreeMap::new();
        let mut entity_ids: BTreeMap<String, String> = BTreeMap::new();
        for row in self.db.entities().get_active_by_watch(&watch.id).await? {
            match serde_json::from_str::<EntityContent>(&row.content) {
                Ok(content) => {
                    stored.insert(row.external_id.clone(), content);
                    entity_ids.insert(row.external_id, row.id);
                }
                Err(err) => {
                    warn!(entity_id = %row.id, error = %err, "skipping stored entity with malformed content");
                }
            }
        }

        let diff = differ::diff(&extracted, &stored);
        outcome.stats.new = diff.appeared.len() as i32;
        outcome.stats.changed = diff.changed.len() as i32;
        outcome.stats.removed = diff.disappeared.len() as i32;

        info!(
            watch_id = %watch.id,
            appeared = diff.appeared.len(),
            changed = diff.changed.len(),
            disappeared = diff.disappeared.len(),
            unchanged = diff.unchanged,
            "diff complete"
        );

        // Persistence from here on is warning-only so the diff's accounting
        // in the run row survives partial failures.
        for d in diff.appeared.iter().chain(diff.changed.iter()) {
            let content = match serde_json::to_string(&d.content) {
                Ok(c) => c,
                Err(err) => {
                    warn!(external_id = %d.external_id, error = %err, "failed to serialize entity content");
                    continue;
                }
            };
            match self
                .db
                .entities()
                .upsert(
                    &watch.org_id,
                    &watch.id,
                    &watch.schema_type,
                    &d.external_id,
                    &content,
                )
                .await
            {
                Ok(entity_id) => {
                    entity_ids.insert(d.external_id.clone(), entity_id);
                }
                Err(err) => {
                    warn!(external_id = %d.external_id, error = %err, "failed to upsert entity");
                }
            }
        }

        if !diff.disappeared.is_empty() {
            let stale_ids: Vec<String> = diff
                .disappeared
                .iter()
                .map(|d| d.external_id.clone())
                .collect();
            if let Err(err) = self.db.entities().mark_stale(&watch.id, &stale_ids).await {
                warn!(watch_id = %watch.id, error = %err, "failed to mark entities stale");
            }
        }

        let ctx = EmitContext {
            org_id: &watch.org_id,
            watch_id: &watch.id,
            watch_run_id: run_id,
        };
        outcome.events_emitted = self.emitter.emit_diff_events(&ctx, &diff, &entity_ids).await as i32;

        Ok(())
    }

    async fn update_watch_after_run(&self, watch: &Watch, failed: bool) {
        let now = Utc::now();
        let mut failures = watch.consecutive_failures;
        let mut status = watch.status;

        if failed {
            failures += 1;
            if failures >= MAX_CONSECUTIVE_FAILURES {
                status = WatchStatus::Error;
                warn!(watch_id = %watch.id, failures, "watch circuit breaker tripped");
            }
        } else {
            failures = 0;
        }

        let next_run = compute_next_run(&watch.schedule, now);

        if let Err(err) = self
            .db
            .watches()
            .update_after_run(&watch.id, next_run, failures, status)
            .await
        {
            error!(watch_id = %watch.id, error = %err, "failed to update watch after run");
        }
    }
}

#[derive(Default)]
struct RunOutcome {
    stats: RunStats,
    events_emitted: i32,
    error: Option<RunError>,
}

/// Deterministic external id over the watch's identity fields: the field
/// names are sorted so declaration order never changes the hash, values are
/// joined with NUL to avoid boundary ambiguity, and the first 16 bytes of
/// the SHA-256 give 32 hex chars.
pub fn compute_external_id(entity: &EntityContent, identity_fields: &[String]) -> String {
    let mut fields: Vec<&String> = identity_fields.iter().collect();
    fields.sort();

    let mut parts: Vec<String> = Vec::with_capacity(fields.len());
    for field in fields {
        let part = match entity.get(field.as_str()) {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(value) => canonical_string(value).trim().to_string(),
        };
        parts.push(part);
    }

    let digest = Sha256::digest(parts.join("\x00").as_bytes());
    hex::encode(&digest[..16])
}

/// Next occurrence of a standard 5-field cron expression after `from`.
/// Unparseable expressions fall back to one hour out.
pub fn compute_next_run(schedule: &str, from: DateTime<Utc>) -> DateTime<Utc> {
    // The cron crate wants a seconds field; schedules are stored without one.
    let with_seconds = format!("0 {}", schedule.trim());
    match cron::Schedule::from_str(&with_seconds) {
        Ok(sched) => sched.after(&from).next().unwrap_or(from + Duration::hours(1)),
        Err(_) => from + Duration::hours(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn entity(pairs: &[(&str, serde_json::Value)]) -> EntityContent {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn external_id_is_32_lowercase_hex() {
        let e = entity(&[("name", json!("X")), ("sku", json!("A"))]);
        let id = compute_external_id(&e, &["sku".to_string(), "name".to_string()]);
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn external_id_ignores_identity_field_order() {
        let e = entity(&[("name", json!("X")), ("sku", json!("A"))]);
        let a = compute_external_id(&e, &["sku".to_string(), "name".to_string()]);
        let b = compute_external_id(&e, &["name".to_string(), "sku".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn external_id_treats_missing_and_null_alike() {
        let missing = entity(&[("name", json!("X"))]);
        let null = entity(&[("name", json!("X")), ("sku", serde_json::Value::Null)]);
        let fields = vec!["name".to_string(), "sku".to_string()];
        assert_eq!(
            compute_external_id(&missing, &fields),
            compute_external_id(&null, &fields)
        );
    }

    #[test]
    fn external_id_trims_string_values() {
        let padded = entity(&[("name", json!("  X  "))]);
        let bare = entity(&[("name", json!("X"))]);
        let fields = vec!["name".to_string()];
        assert_eq!(
            compute_external_id(&padded, &fields),
            compute_external_id(&bare, &fields)
        );
    }

    #[test]
    fn external_id_distinguishes_values() {
        let fields = vec!["name".to_string()];
        let a = compute_external_id(&entity(&[("name", json!("A"))]), &fields);
        let b = compute_external_id(&entity(&[("name", json!("B"))]), &fields);
        assert_ne!(a, b);
    }

    #[test]
    fn next_run_follows_cron_expression() {
        let from = Utc.with_ymd_and_hms(2025, 6, 1, 10, 17, 30).unwrap();
        // Every 30 minutes: next boundary after 10:17:30 is 10:30:00.
        let next = compute_next_run("*/30 * * * *", from);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 1, 10, 30, 0).unwrap());
    }

    #[test]
    fn next_run_daily_expression() {
        let from = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
        let next = compute_next_run("15 6 * * *", from);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 2, 6, 15, 0).unwrap());
    }

    #[test]
    fn bad_cron_falls_back_to_one_hour() {
        let from = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
        let next = compute_next_run("not a cron", from);
        assert_eq!(next, from + Duration::hours(1));
    }
}
