use crate::error::{EventingError, Result};
use crate::models::Topic;
use crate::storage::EventingStore;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Topic management: topics are pure routing destinations
#[derive(Clone)]
pub struct TopicRegistry {
    store: Arc<dyn EventingStore>,
}

impl TopicRegistry {
    pub fn new(store: Arc<dyn EventingStore>) -> Self {
        Self { store }
    }

    /// Upsert a topic by name; identity is kept stable across updates
    pub async fn create_or_update_topic(
        &self,
        name: &str,
        notes: Option<String>,
    ) -> Result<Topic> {
        if name.trim().is_empty() {
            return Err(EventingError::Validation(
                "Topic name must not be empty".to_string(),
            ));
        }

        let topic = match self.store.get_topic_by_name(name).await? {
            Some(mut existing) => {
                existing.notes = notes;
                existing.updated_at = Utc::now();
                existing
            }
            None => Topic::new(name.to_string(), notes),
        };

        self.store.upsert_topic(&topic).await?;
        tracing::debug!(topic_id = %topic.id, name = %topic.name, "Topic upserted");
        Ok(topic)
    }

    /// Get a topic by name; absence is an expected outcome, not an error
    pub async fn get_topic_by_name(&self, name: &str) -> Result<Option<Topic>> {
        self.store.get_topic_by_name(name).await
    }

    /// Delete a topic.
    ///
    /// With `incl_subscriptions`, links referencing the topic are removed
    /// from their subscriptions; without it, remaining links make the delete
    /// fail with a conflict. Historical events and deliveries are never
    /// touched; only routing capability is removed.
    pub async fn delete_topic(&self, id: &Uuid, incl_subscriptions: bool) -> Result<()> {
        if self.store.get_topic(id).await?.is_none() {
            return Err(EventingError::NotFound(format!("Topic {} not found", id)));
        }

        let mut referencing: Vec<_> = self
            .store
            .list_subscriptions()
            .await?
            .into_iter()
            .filter(|sub| sub.is_linked_to(id))
            .collect();

        if !referencing.is_empty() {
            if !incl_subscriptions {
                return Err(EventingError::Conflict(format!(
                    "Topic {} is still referenced by {} subscription(s)",
                    id,
                    referencing.len()
                )));
            }

            for subscription in &mut referencing {
                subscription
                    .topic_subscriptions
                    .retain(|link| link.topic_id != *id);
                subscription.updated_at = Utc::now();
                self.store.upsert_subscription(subscription).await?;
            }
        }

        self.store.delete_topic(id).await?;
        tracing::info!(topic_id = %id, unlinked = referencing.len(), "Topic deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SubscriptionSpec, TopicSubscription};
    use crate::registry::SubscriptionRegistry;
    use crate::storage::InMemoryStore;

    fn registry() -> (Arc<InMemoryStore>, TopicRegistry) {
        let store = Arc::new(InMemoryStore::new());
        (store.clone(), TopicRegistry::new(store))
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_by_name() {
        let (_store, registry) = registry();

        let first = registry
            .create_or_update_topic("orders", Some("v1".to_string()))
            .await
            .unwrap();
        let second = registry
            .create_or_update_topic("orders", Some("v2".to_string()))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.notes.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_empty_name_is_rejected() {
        let (_store, registry) = registry();
        let err = registry
            .create_or_update_topic("  ", None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_delete_missing_topic() {
        let (_store, registry) = registry();
        let err = registry
            .delete_topic(&Uuid::new_v4(), false)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_delete_with_links() {
        let (store, registry) = registry();
        let subscriptions = SubscriptionRegistry::new(store.clone());

        let topic = registry.create_or_update_topic("orders", None).await.unwrap();
        subscriptions
            .create_or_update_subscription(SubscriptionSpec {
                name: "worker".to_string(),
                ordered: false,
                max_deliveries: 1,
                ttl_secs: None,
                delivery_delay_secs: None,
                topic_subscriptions: vec![TopicSubscription {
                    topic_id: topic.id,
                    enabled: true,
                }],
            })
            .await
            .unwrap();

        // Blocked while a link still references the topic
        let err = registry.delete_topic(&topic.id, false).await.unwrap_err();
        assert_eq!(err.error_code(), "CONFLICT");

        // Cascade removes the link but keeps the subscription
        registry.delete_topic(&topic.id, true).await.unwrap();
        let remaining = store
            .get_subscription_by_name("worker")
            .await
            .unwrap()
            .unwrap();
        assert!(remaining.topic_subscriptions.is_empty());
    }
}
