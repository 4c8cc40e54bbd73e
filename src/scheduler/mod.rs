//! Polls the database for due watches and executes them with bounded
//! concurrency.

mod executor;

pub use executor::{compute_external_id, compute_next_run, Executor, RunError};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::repository::WatchRepository;

const POLL_INTERVAL: Duration = Duration::from_secs(30);
const MAX_CONCURRENT: usize = 5;

pub struct Scheduler {
    executor: Arc<Executor>,
    watches: WatchRepository,
}

impl Scheduler {
    pub fn new(executor: Arc<Executor>, watches: WatchRepository) -> Self {
        Self { executor, watches }
    }

    /// Run the polling loop until cancelled. The first poll happens
    /// immediately on startup.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            poll_interval_secs = POLL_INTERVAL.as_secs(),
            max_concurrent = MAX_CONCURRENT,
            "scheduler started"
        );
        let mut ticker = tokio::time::interval(POLL_INTERVAL);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("scheduler stopping");
                    return;
                }
                _ = ticker.tick() => {
                    self.poll().await;
                }
            }
        }
    }

    /// One poll: claim every due watch and run them, at most
    /// `MAX_CONCURRENT` in flight. The tick blocks until all spawned runs
    /// drain, so ticks cannot pile up faster than runs complete. A failing
    /// watch never fails the poll cycle.
    async fn poll(&self) {
        let due = match self.watches.get_due(Utc::now()).await {
            Ok(due) => due,
            Err(err) => {
                error!(error = %err, "failed to get due watches");
                return;
            }
        };

        if due.is_empty() {
            return;
        }
        info!(count = due.len(), "found due watches");

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT));
        let mut handles = Vec::with_capacity(due.len());

        for watch in due {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let executor = self.executor.clone();
            handles.push(tokio::spawn(async move {
                executor.execute(&watch).await;
                drop(permit);
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Manual trigger for one watch, bypassing the due gate. Returns the
    /// run id even if execution failed, as long as a run row was created.
    pub async fn run_single(&self, watch_id: &str) -> Result<String, RunError> {
        self.executor.execute_by_id(watch_id).await
    }
}
