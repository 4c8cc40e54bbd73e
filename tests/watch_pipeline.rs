//! End-to-end pipeline tests against a temporary database: extraction,
//! diffing, event emission, subscription matching, delivery, and the
//! failure circuit breaker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::tempdir;

use blueprinter_worker::delivery::{Processor, SendError, SendRequest, Sender};
use blueprinter_worker::emitter::Emitter;
use blueprinter_worker::fetcher::{FetchError, HtmlFetcher};
use blueprinter_worker::matcher::Matcher;
use blueprinter_worker::models::{DeliveryStatus, EntityStatus, EventType, RunStatus, Watch, WatchStatus};
use blueprinter_worker::repository::DbContext;
use blueprinter_worker::scheduler::{Executor, RunError};

struct StubFetcher {
    html: Mutex<String>,
}

impl StubFetcher {
    fn new(html: &str) -> Self {
        Self {
            html: Mutex::new(html.to_string()),
        }
    }

    fn set_html(&self, html: &str) {
        *self.html.lock().unwrap() = html.to_string();
    }
}

#[async_trait]
impl HtmlFetcher for StubFetcher {
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        let html = self.html.lock().unwrap().clone();
        if html.is_empty() {
            return Err(FetchError::EmptyBody {
                url: url.to_string(),
            });
        }
        Ok(html)
    }
}

/// Records requests; fails while `failures_remaining` is positive.
struct RecordingSender {
    failures_remaining: AtomicUsize,
    sent: Mutex<Vec<SendRequest>>,
}

impl RecordingSender {
    fn new(failures: usize) -> Self {
        Self {
            failures_remaining: AtomicUsize::new(failures),
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Sender for RecordingSender {
    async fn send(&self, req: SendRequest) -> Result<(), SendError> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(SendError::Api {
                status: 500,
                message: "synthetic outage".to_string(),
            });
        }
        self.sent.lock().unwrap().push(req);
        Ok(())
    }
}

const RULES: &str = r#"{
    "container": "//div[@class='product']",
    "fields": {
        "name": {"xpath": ".//span[@class='name']", "type": "string", "attribute": "text"},
        "price": {"xpath": ".//span[@class='price']", "type": "number", "attribute": "text"}
    }
}"#;

fn product_page(products: &[(&str, &str)]) -> String {
    let rows: String = products
        .iter()
        .map(|(name, price)| {
            format!(
                "<div class='product'><span class='name'>{name}</span><span class='price'>{price}</span></div>"
            )
        })
        .collect();
    format!("<html><body>{rows}</body></html>")
}

async fn setup() -> (DbContext, Arc<StubFetcher>, Arc<Executor>, Watch, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("worker.db");
    let db = DbContext::from_url(&db_path.display().to_string());
    db.init_schema().await.unwrap();

    let watch = db
        .watches()
        .create(
            "org-1",
            "shop watch",
            "https://shop.example.com",
            "*/30 * * * *",
            &["name".to_string()],
            RULES,
            "ecommerce_product",
        )
        .await
        .unwrap();

    let fetcher = Arc::new(StubFetcher::new(&product_page(&[("A", "$10"), ("B", "$20")])));
    let matcher = Matcher::new(db.subscriptions(), db.deliveries());
    let emitter = Emitter::new(db.events(), matcher);
    let dyn_fetcher: Arc<dyn HtmlFetcher> = fetcher.clone();
    let executor = Arc::new(Executor::new(db.clone(), dyn_fetcher, emitter));

    (db, fetcher, executor, watch, dir)
}

#[tokio::test]
async fn pipeline_emits_appeared_changed_disappeared_across_runs() {
    let (db, fetcher, executor, watch, _dir) = setup().await;

    db.subscriptions()
        .create(
            "org-1",
            "everything",
            &[
                "entity_appeared".to_string(),
                "entity_changed".to_string(),
                "entity_disappeared".to_string(),
            ],
            None,
            "{}",
            "email",
            r#"{"to":["ops@example.com"]}"#,
        )
        .await
        .unwrap();

    // First run: both products appear.
    let run1 = executor.execute_by_id(&watch.id).await.unwrap();
    let run = db.runs().get_by_id(&run1).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.entities_found, Some(2));
    assert_eq!(run.entities_new, Some(2));
    assert_eq!(run.entities_changed, Some(0));
    assert_eq!(run.entities_removed, Some(0));
    assert_eq!(run.events_emitted, Some(2));

    let entities = db.entities().get_active_by_watch(&watch.id).await.unwrap();
    assert_eq!(entities.len(), 2);
    for entity in &entities {
        assert_eq!(entity.external_id.len(), 32);
        assert!(entity.external_id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    let events = db.events().get_by_run(&run1).await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.event_type == EventType::EntityAppeared));

    // Second run: nothing changed, nothing emitted.
    let run2 = executor.execute_by_id(&watch.id).await.unwrap();
    let run = db.runs().get_by_id(&run2).await.unwrap().unwrap();
    assert_eq!(run.entities_found, Some(2));
    assert_eq!(run.entities_new, Some(0));
    assert_eq!(run.entities_changed, Some(0));
    assert_eq!(run.entities_removed, Some(0));
    assert!(db.events().get_by_run(&run2).await.unwrap().is_empty());

    // Third run: A's price drops, B disappears, C appears.
    fetcher.set_html(&product_page(&[("A", "$8"), ("C", "$30")]));
    let run3 = executor.execute_by_id(&watch.id).await.unwrap();
    let run = db.runs().get_by_id(&run3).await.unwrap().unwrap();
    assert_eq!(run.entities_found, Some(2));
    assert_eq!(run.entities_new, Some(1));
    assert_eq!(run.entities_changed, Some(1));
    assert_eq!(run.entities_removed, Some(1));
    assert_eq!(run.events_emitted, Some(3));

    let events = db.events().get_by_run(&run3).await.unwrap();
    let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(
        types,
        vec![
            EventType::EntityAppeared,
            EventType::EntityChanged,
            EventType::EntityDisappeared,
        ]
    );

    let changed = &events[1];
    let payload: serde_json::Value = serde_json::from_str(&changed.payload).unwrap();
    assert_eq!(payload["changes"][0]["field"], "price");
    assert_eq!(payload["changes"][0]["old"], serde_json::json!(10.0));
    assert_eq!(payload["changes"][0]["new"], serde_json::json!(8.0));
    assert_eq!(payload["entity"]["name"], "A");

    // B went stale, A and C stay active.
    let active = db.entities().get_active_by_watch(&watch.id).await.unwrap();
    assert_eq!(active.len(), 2);
    let all_statuses: Vec<EntityStatus> = active.iter().map(|e| e.status).collect();
    assert!(all_statuses.iter().all(|s| *s == EntityStatus::Active));

    // Five deliveries total: 2 + 0 + 3 events, each matched by the
    // filterless subscription.
    let pending = db.deliveries().get_pending(chrono::Utc::now()).await.unwrap();
    assert_eq!(pending.len(), 5);

    // The watch's schedule advanced and the failure counter stayed clean.
    let watch = db.watches().get_by_id(&watch.id).await.unwrap().unwrap();
    assert_eq!(watch.consecutive_failures, 0);
    assert_eq!(watch.status, WatchStatus::Active);
    assert!(watch.next_run_at.unwrap() > chrono::Utc::now());
}

#[tokio::test]
async fn filtered_subscription_only_gets_matching_events() {
    let (db, fetcher, executor, watch, _dir) = setup().await;

    db.subscriptions()
        .create(
            "org-1",
            "price drops",
            &["entity_changed".to_string()],
            Some(&watch.id),
            r#"{"conditions":[{"field":"price","operator":"decreased"}]}"#,
            "email",
            r#"{"to":["deals@example.com"]}"#,
        )
        .await
        .unwrap();

    executor.execute_by_id(&watch.id).await.unwrap();
    // Appeared events don't reach a changed-only subscription.
    assert!(db.deliveries().get_pending(chrono::Utc::now()).await.unwrap().is_empty());

    // Price increase: changed event, but the decrease filter rejects it.
    fetcher.set_html(&product_page(&[("A", "$15"), ("B", "$20")]));
    executor.execute_by_id(&watch.id).await.unwrap();
    assert!(db.deliveries().get_pending(chrono::Utc::now()).await.unwrap().is_empty());

    // Price drop: now it matches.
    fetcher.set_html(&product_page(&[("A", "$12"), ("B", "$20")]));
    executor.execute_by_id(&watch.id).await.unwrap();
    let pending = db.deliveries().get_pending(chrono::Utc::now()).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].subscription_name, "price drops");
}

#[tokio::test]
async fn delivery_processor_sends_and_marks_delivered() {
    let (db, _fetcher, executor, watch, _dir) = setup().await;

    db.subscriptions()
        .create(
            "org-1",
            "new items",
            &["entity_appeared".to_string()],
            None,
            "{}",
            "email",
            r#"{"to":["alerts@example.com","backup@example.com"]}"#,
        )
        .await
        .unwrap();
    executor.execute_by_id(&watch.id).await.unwrap();

    let sender = Arc::new(RecordingSender::new(0));
    let processor = Processor::new(db.deliveries(), sender.clone());
    processor.poll().await;

    let sent = sender.sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].to, vec!["alerts@example.com", "backup@example.com"]);
    assert!(sent[0].subject.contains("New entity"));
    drop(sent);

    assert!(db.deliveries().get_pending(chrono::Utc::now()).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_send_schedules_a_retry() {
    let (db, _fetcher, executor, watch, _dir) = setup().await;

    db.subscriptions()
        .create(
            "org-1",
            "flaky channel",
            &["entity_appeared".to_string()],
            None,
            "{}",
            "email",
            r#"{"to":["x@example.com"]}"#,
        )
        .await
        .unwrap();
    executor.execute_by_id(&watch.id).await.unwrap();

    let before = db.deliveries().get_pending(chrono::Utc::now()).await.unwrap();
    assert_eq!(before.len(), 2);
    let ids: Vec<String> = before.iter().map(|d| d.id.clone()).collect();

    let sender = Arc::new(RecordingSender::new(usize::MAX));
    let processor = Processor::new(db.deliveries(), sender);
    processor.poll().await;

    // Both deliveries recorded the failure and backed off into the future.
    for id in &ids {
        let row = db.deliveries().get_by_id(id).await.unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::Pending);
        assert_eq!(row.attempts, 1);
        assert!(row.last_error.as_deref().unwrap().contains("synthetic outage"));
        assert!(row.next_retry_at.unwrap() > chrono::Utc::now());
    }
    assert!(db.deliveries().get_pending(chrono::Utc::now()).await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_recipients_fail_terminally() {
    let (db, _fetcher, executor, watch, _dir) = setup().await;

    db.subscriptions()
        .create(
            "org-1",
            "misconfigured",
            &["entity_appeared".to_string()],
            None,
            "{}",
            "email",
            r#"{"to":[]}"#,
        )
        .await
        .unwrap();
    executor.execute_by_id(&watch.id).await.unwrap();

    let pending = db.deliveries().get_pending(chrono::Utc::now()).await.unwrap();
    let ids: Vec<String> = pending.iter().map(|d| d.id.clone()).collect();

    let sender = Arc::new(RecordingSender::new(0));
    let processor = Processor::new(db.deliveries(), sender.clone());
    processor.poll().await;

    assert!(sender.sent.lock().unwrap().is_empty());
    for id in &ids {
        let row = db.deliveries().get_by_id(id).await.unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::Failed);
    }
}

#[tokio::test]
async fn circuit_breaker_disables_watch_after_three_failures() {
    let (db, fetcher, executor, watch, _dir) = setup().await;
    fetcher.set_html("");

    for expected_failures in 1..=3 {
        let run_id = executor.execute_by_id(&watch.id).await.unwrap();
        let run = db.runs().get_by_id(&run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error_message.as_deref().unwrap().contains("fetching HTML"));

        let current = db.watches().get_by_id(&watch.id).await.unwrap().unwrap();
        assert_eq!(current.consecutive_failures, expected_failures);

        if expected_failures < 3 {
            assert_eq!(current.status, WatchStatus::Active);
        } else {
            assert_eq!(current.status, WatchStatus::Error);
        }
    }

    // An error watch drops out of due selection entirely.
    assert!(db.watches().get_due(chrono::Utc::now()).await.unwrap().is_empty());

    // A successful fetch before tripping would have reset the counter; show
    // the reset path on a fresh watch.
    let watch2 = db
        .watches()
        .create(
            "org-1",
            "second",
            "https://other.example.com",
            "*/5 * * * *",
            &["name".to_string()],
            RULES,
            "ecommerce_product",
        )
        .await
        .unwrap();
    fetcher.set_html(&product_page(&[("A", "$1")]));
    executor.execute_by_id(&watch2.id).await.unwrap();
    let current = db.watches().get_by_id(&watch2.id).await.unwrap().unwrap();
    assert_eq!(current.consecutive_failures, 0);
    assert_eq!(current.status, WatchStatus::Active);
}

#[tokio::test]
async fn manual_run_of_unknown_watch_errors() {
    let (_db, _fetcher, executor, _watch, _dir) = setup().await;
    let result = executor.execute_by_id("no-such-watch").await;
    assert!(matches!(result, Err(RunError::WatchNotFound(_))));
}

#[tokio::test]
async fn executor_consumes_due_watches_from_selection() {
    let (db, _fetcher, executor, watch, _dir) = setup().await;

    let due = db.watches().get_due(chrono::Utc::now()).await.unwrap();
    assert_eq!(due.len(), 1);

    executor.execute(&due[0]).await;

    // next_run_at advanced past now, so the watch is no longer due.
    assert!(db.watches().get_due(chrono::Utc::now()).await.unwrap().is_empty());
    let refreshed = db.watches().get_by_id(&watch.id).await.unwrap().unwrap();
    assert!(refreshed.next_run_at.unwrap() > chrono::Utc::now());
}
