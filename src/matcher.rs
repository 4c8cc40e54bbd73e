//! Matches events to subscriptions and creates delivery rows.

use tracing::{info, warn};

use crate::filter;
use crate::models::Event;
use crate::repository::{DeliveryRepository, DieselError, SubscriptionRepository};

pub struct Matcher {
    subscriptions: SubscriptionRepository,
    deliveries: DeliveryRepository,
}

impl Matcher {
    pub fn new(subscriptions: SubscriptionRepository, deliveries: DeliveryRepository) -> Self {
        Self {
            subscriptions,
            deliveries,
        }
    }

    /// Find subscriptions matching the event and create a pending delivery
    /// for each. A subscription whose filters fail to parse or evaluate is
    /// skipped, not fatal.
    pub async fn create_deliveries(&self, event: &Event) -> Result<(), DieselError> {
        let candidates = self
            .subscriptions
            .match_candidates(&event.org_id, event.event_type.as_str(), &event.watch_id)
            .await?;

        if candidates.is_empty() {
            return Ok(());
        }

        let mut matched = 0;
        for sub in &candidates {
            let filters = match filter::parse_filters(&sub.filters) {
                Ok(f) => f,
                Err(err) => {
                    warn!(subscription_id = %sub.id, error = %err, "failed to parse subscription filters");
                    continue;
                }
            };

            let ok = match filter::matches(event.event_type, &event.payload, &filters) {
                Ok(ok) => ok,
                Err(err) => {
                    warn!(subscription_id = %sub.id, error = %err, "failed to evaluate filters");
                    continue;
                }
            };
            if !ok {
                continue;
            }

            self.deliveries
                .insert(&event.org_id, &event.id, &sub.id)
                .await?;
            matched += 1;
        }

        if matched > 0 {
            info!(
                event_id = %event.id,
                event_type = event.event_type.as_str(),
                subscriptions_matched = matched,
                "created deliveries"
            );
        }
        Ok(())
    }
}
