use crate::error::{EventingError, Result};
use crate::models::{Subscription, SubscriptionSpec};
use crate::storage::EventingStore;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Subscription management: a subscription binds one or more topics and
/// carries delivery policy (ordering, max deliveries, TTL, delivery delay)
#[derive(Clone)]
pub struct SubscriptionRegistry {
    store: Arc<dyn EventingStore>,
}

impl SubscriptionRegistry {
    pub fn new(store: Arc<dyn EventingStore>) -> Self {
        Self { store }
    }

    /// Upsert a subscription by name; identity is kept stable across updates
    pub async fn create_or_update_subscription(
        &self,
        spec: SubscriptionSpec,
    ) -> Result<Subscription> {
        spec.validate()?;

        // Every link must reference an existing topic
        for link in &spec.topic_subscriptions {
            if self.store.get_topic(&link.topic_id).await?.is_none() {
                return Err(EventingError::Validation(format!(
                    "Linked topic {} does not exist",
                    link.topic_id
                )));
            }
        }

        let subscription = match self.store.get_subscription_by_name(&spec.name).await? {
            Some(mut existing) => {
                existing.apply_spec(spec);
                existing
            }
            None => Subscription::from_spec(spec),
        };

        self.store.upsert_subscription(&subscription).await?;
        tracing::debug!(
            subscription_id = %subscription.id,
            name = %subscription.name,
            ordered = subscription.ordered,
            max_deliveries = subscription.max_deliveries,
            "Subscription upserted"
        );
        Ok(subscription)
    }

    /// Get a subscription by name; absence is an expected outcome, not an error
    pub async fn get_subscription_by_name(&self, name: &str) -> Result<Option<Subscription>> {
        self.store.get_subscription_by_name(name).await
    }

    /// Delete a subscription. Already-materialized deliveries are not
    /// touched; they become inert but stay queryable for audit.
    pub async fn delete_subscription(&self, id: &Uuid) -> Result<()> {
        if self.store.get_subscription(id).await?.is_none() {
            return Err(EventingError::NotFound(format!(
                "Subscription {} not found",
                id
            )));
        }

        self.store.delete_subscription(id).await?;
        tracing::info!(subscription_id = %id, "Subscription deleted");
        Ok(())
    }
}
