//! Blueprinter worker: monitors web pages on a schedule, extracts
//! structured entities with XPath blueprints, diffs them against the
//! store, and delivers change notifications.

pub mod blueprint;
pub mod config;
pub mod delivery;
pub mod differ;
pub mod emitter;
pub mod fetcher;
pub mod filter;
pub mod matcher;
pub mod models;
pub mod repository;
pub mod scheduler;
pub mod schema;
pub mod server;
pub mod utils;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use blueprint::authoring::AuthoringClient;
use config::Config;
use delivery::{Processor, ResendSender};
use emitter::Emitter;
use fetcher::FirecrawlClient;
use matcher::Matcher;
use repository::DbContext;
use scheduler::{Executor, Scheduler};
use server::AppState;

/// Wire everything together and run until interrupted.
pub async fn run() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let db = DbContext::from_url(&config.database_url);
    db.init_schema().await?;
    info!("database ready");

    let fetcher: Arc<dyn fetcher::HtmlFetcher> =
        Arc::new(FirecrawlClient::new(config.firecrawl_api_key.clone()));
    let authoring = Arc::new(AuthoringClient::new(
        config.openai_api_key.clone(),
        config.openai_model.clone(),
    ));
    let sender: Arc<dyn delivery::Sender> = Arc::new(ResendSender::new(
        config.resend_api_key.clone(),
        config.resend_from_email.clone(),
    ));

    let matcher = Matcher::new(db.subscriptions(), db.deliveries());
    let emitter = Emitter::new(db.events(), matcher);
    let executor = Arc::new(Executor::new(db.clone(), fetcher.clone(), emitter));
    let scheduler = Arc::new(Scheduler::new(executor, db.watches()));
    let processor = Processor::new(db.deliveries(), sender);

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    {
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await });
    }
    {
        let cancel = cancel.clone();
        tokio::spawn(async move { processor.run(cancel).await });
    }

    let state = AppState {
        fetcher,
        authoring,
        scheduler: Some(scheduler),
        api_key: config.worker_api_key.clone(),
    };
    server::serve(state, config.port, cancel).await?;

    info!("worker stopped");
    Ok(())
}

/// Cancel the shared token on SIGINT or SIGTERM.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(sig) => sig,
                Err(err) => {
                    tracing::error!(error = %err, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    cancel.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        info!("shutdown signal received");
        cancel.cancel();
    });
}
