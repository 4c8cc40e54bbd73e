//! Delivery processor: polls pending deliveries and sends them with
//! exponential backoff retries.

mod email;
mod resend;
mod sender;

pub use email::build_email_content;
pub use resend::ResendSender;
pub use sender::{SendError, SendRequest, Sender};

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::models::PendingDelivery;
use crate::repository::DeliveryRepository;

const POLL_INTERVAL: StdDuration = StdDuration::from_secs(10);
const MAX_CONCURRENT: usize = 3;

/// Retry backoff ladder; attempts past the table reuse the last entry.
const RETRY_BACKOFF_SECS: [i64; 4] = [60, 300, 1800, 7200];

/// Backoff before the next attempt, given the number of attempts so far.
fn backoff_for_attempt(attempts: i32) -> Duration {
    let idx = (attempts.max(0) as usize).min(RETRY_BACKOFF_SECS.len() - 1);
    Duration::seconds(RETRY_BACKOFF_SECS[idx])
}

#[derive(Deserialize)]
struct ChannelConfig {
    #[serde(default)]
    to: Vec<String>,
}

pub struct Processor {
    deliveries: DeliveryRepository,
    sender: Arc<dyn Sender>,
}

impl Processor {
    pub fn new(deliveries: DeliveryRepository, sender: Arc<dyn Sender>) -> Self {
        Self { deliveries, sender }
    }

    /// Run the polling loop until cancelled. The first poll happens
    /// immediately on startup.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            poll_interval_secs = POLL_INTERVAL.as_secs(),
            max_concurrent = MAX_CONCURRENT,
            "delivery processor started"
        );
        let mut ticker = tokio::time::interval(POLL_INTERVAL);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("delivery processor stopping");
                    return;
                }
                _ = ticker.tick() => {
                    self.poll().await;
                }
            }
        }
    }

    /// One poll: send every due delivery, at most `MAX_CONCURRENT` in
    /// flight, draining before the tick returns.
    pub async fn poll(&self) {
        let pending = match self.deliveries.get_pending(Utc::now()).await {
            Ok(pending) => pending,
            Err(err) => {
                error!(error = %err, "failed to get pending deliveries");
                return;
            }
        };

        if pending.is_empty() {
            return;
        }
        info!(count = pending.len(), "found pending deliveries");

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT));
        let mut handles = Vec::with_capacity(pending.len());

        for delivery in pending {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let deliveries = self.deliveries.clone();
            let sender = self.sender.clone();
            handles.push(tokio::spawn(async move {
                process_delivery(&deliveries, sender.as_ref(), &delivery).await;
                drop(permit);
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn process_delivery(
    deliveries: &DeliveryRepository,
    sender: &dyn Sender,
    delivery: &PendingDelivery,
) {
    // Unusable channel config is terminal; retrying cannot fix it.
    let config: ChannelConfig = match serde_json::from_str(&delivery.channel_config) {
        Ok(config) => config,
        Err(err) => {
            mark_failed(deliveries, delivery, &format!("parsing channel config: {err}")).await;
            return;
        }
    };
    if config.to.is_empty() {
        mark_failed(deliveries, delivery, "no recipients in channel config").await;
        return;
    }

    let (subject, html_body) = match build_email_content(
        &delivery.event_type,
        &delivery.event_payload,
        &delivery.subscription_name,
    ) {
        Ok(content) => content,
        Err(err) => {
            mark_failed(deliveries, delivery, &format!("building email content: {err}")).await;
            return;
        }
    };

    let result = sender
        .send(SendRequest {
            to: config.to.clone(),
            subject,
            html_body,
        })
        .await;

    match result {
        Ok(()) => {
            if let Err(err) = deliveries.mark_delivered(&delivery.id).await {
                error!(delivery_id = %delivery.id, error = %err, "failed to mark delivery as delivered");
                return;
            }
            info!(
                delivery_id = %delivery.id,
                event_type = %delivery.event_type,
                subscription = %delivery.subscription_name,
                recipients = ?config.to,
                "delivery sent"
            );
        }
        Err(send_err) => {
            handle_send_error(deliveries, delivery, &send_err.to_string()).await;
        }
    }
}

async fn handle_send_error(
    deliveries: &DeliveryRepository,
    delivery: &PendingDelivery,
    send_err: &str,
) {
    let next_attempt = delivery.attempts + 1;
    if next_attempt >= delivery.max_attempts {
        mark_failed(deliveries, delivery, send_err).await;
        return;
    }

    let next_retry = Utc::now() + backoff_for_attempt(delivery.attempts);
    if let Err(err) = deliveries.mark_retry(&delivery.id, next_retry, send_err).await {
        error!(delivery_id = %delivery.id, error = %err, "failed to mark delivery for retry");
        return;
    }

    warn!(
        delivery_id = %delivery.id,
        attempt = next_attempt,
        next_retry_at = %next_retry,
        error = %send_err,
        "delivery failed, scheduled retry"
    );
}

async fn mark_failed(deliveries: &DeliveryRepository, delivery: &PendingDelivery, reason: &str) {
    if let Err(err) = deliveries.mark_failed(&delivery.id, reason).await {
        error!(delivery_id = %delivery.id, error = %err, "failed to mark delivery as failed");
        return;
    }
    error!(
        delivery_id = %delivery.id,
        attempts = delivery.attempts + 1,
        error = %reason,
        "delivery permanently failed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_ladder_is_monotonic_and_caps_at_two_hours() {
        let ladder: Vec<i64> = (0..6).map(|a| backoff_for_attempt(a).num_seconds()).collect();
        assert_eq!(ladder, vec![60, 300, 1800, 7200, 7200, 7200]);
        assert!(ladder.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn backoff_tolerates_negative_attempts() {
        assert_eq!(backoff_for_attempt(-1).num_seconds(), 60);
    }
}
