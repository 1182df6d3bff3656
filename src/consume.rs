use crate::codec::{JsonCodec, PayloadCodec};
use crate::error::{EventingError, Result};
use crate::models::Reason;
use crate::storage::{DeliveryResolution, EventingStore};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Extra candidates fetched beyond `max_count` so poisoned or TTL-expired
/// rows encountered mid-scan do not starve a batch
const CANDIDATE_HEADROOM: usize = 32;

/// A leased delivery handed to the caller, hidden from other consumers until
/// `invisible_until`
#[derive(Debug, Clone)]
pub struct ConsumedEvent<T> {
    /// Delivery identifier, used to resolve the lease
    pub id: Uuid,

    /// Lease token; required by `mark_consumed` / `mark_failed`
    pub delivery_key: Uuid,

    /// Source event
    pub event_id: Uuid,

    /// Attempts so far, including this one
    pub delivery_count: u32,

    /// End of the visibility window; an unresolved lease lapses here and the
    /// delivery becomes eligible again
    pub invisible_until: DateTime<Utc>,

    /// Headers stored alongside the event
    pub headers: HashMap<String, String>,

    /// Functional key, when the publisher supplied one
    pub functional_key: Option<String>,

    /// Deserialized payload
    pub payload: T,
}

/// Consumes events from named subscriptions with lease-based delivery
///
/// `consume_next` grants time-bound exclusive leases; `mark_consumed` and
/// `mark_failed` resolve them. An unresolved lease simply lapses after its
/// visibility timeout and the delivery is redelivered, bounded by the
/// subscription's delivery budget.
#[derive(Clone)]
pub struct EventConsumer<C: PayloadCodec = JsonCodec> {
    store: Arc<dyn EventingStore>,
    codec: C,
}

impl EventConsumer<JsonCodec> {
    pub fn new(store: Arc<dyn EventingStore>) -> Self {
        Self::with_codec(store, JsonCodec)
    }
}

impl<C: PayloadCodec> EventConsumer<C> {
    pub fn with_codec(store: Arc<dyn EventingStore>, codec: C) -> Self {
        Self { store, codec }
    }

    /// Lease up to `max_count` deliverable events, in publish order.
    ///
    /// Returns immediately with zero or more leases; never blocks waiting for
    /// work. Each call re-evaluates candidates fresh, lazily reclaiming
    /// lapsed leases, expiring TTL-breached rows and poisoning rows whose
    /// delivery budget is exhausted.
    ///
    /// A payload incompatible with `T` surfaces a deserialization error; the
    /// delivery attempt is already counted at that point and any leases
    /// granted earlier in the same call resolve through their visibility
    /// timeout.
    pub async fn consume_next<T: DeserializeOwned>(
        &self,
        subscription_name: &str,
        visibility_timeout_secs: u64,
        max_count: usize,
    ) -> Result<Vec<ConsumedEvent<T>>> {
        let subscription = self
            .store
            .get_subscription_by_name(subscription_name)
            .await?
            .ok_or_else(|| {
                EventingError::NotFound(format!(
                    "Subscription '{}' not found",
                    subscription_name
                ))
            })?;

        let now = Utc::now();
        let candidates = self
            .store
            .delivery_candidates(
                &subscription.id,
                now,
                subscription.ordered,
                max_count.saturating_add(CANDIDATE_HEADROOM),
            )
            .await?;

        let mut consumed = Vec::new();
        for candidate in candidates {
            if consumed.len() == max_count {
                break;
            }

            if candidate.ttl_breached(subscription.ttl_secs, now) {
                if self
                    .store
                    .expire_delivery(
                        &candidate.id,
                        candidate.delivery_count,
                        Reason::TtlElapsed,
                        now,
                    )
                    .await?
                {
                    tracing::debug!(
                        delivery_id = %candidate.id,
                        subscription = %subscription.name,
                        "Delivery expired past TTL"
                    );
                }
                continue;
            }

            // The attempt about to be granted would overrun the budget:
            // poison instead and keep scanning
            if candidate.delivery_count + 1 > subscription.max_deliveries {
                if self
                    .store
                    .expire_delivery(
                        &candidate.id,
                        candidate.delivery_count,
                        Reason::MaxDeliveriesReached,
                        now,
                    )
                    .await?
                {
                    tracing::warn!(
                        delivery_id = %candidate.id,
                        subscription = %subscription.name,
                        delivery_count = candidate.delivery_count,
                        "Delivery poisoned after exhausting its budget"
                    );
                }
                continue;
            }

            let leased = match self
                .store
                .try_lease_delivery(
                    &candidate.id,
                    candidate.delivery_count,
                    visibility_timeout_secs,
                    subscription.ordered,
                    now,
                )
                .await?
            {
                Some(leased) => leased,
                // Lost the race to a concurrent consumer
                None => continue,
            };

            let event = self
                .store
                .get_event(&leased.event_id)
                .await?
                .ok_or_else(|| {
                    EventingError::Storage(format!(
                        "Event {} missing for delivery {}",
                        leased.event_id, leased.id
                    ))
                })?;

            let delivery_key = leased.delivery_key.ok_or_else(|| {
                EventingError::Storage(format!("Delivery {} leased without a key", leased.id))
            })?;

            let payload: T = self.codec.deserialize(&event.payload)?;

            tracing::debug!(
                delivery_id = %leased.id,
                subscription = %subscription.name,
                delivery_count = leased.delivery_count,
                invisible_until = %leased.invisible_until,
                "Delivery leased"
            );

            consumed.push(ConsumedEvent {
                id: leased.id,
                delivery_key,
                event_id: event.id,
                delivery_count: leased.delivery_count,
                invisible_until: leased.invisible_until,
                headers: event.headers,
                functional_key: leased.functional_key,
                payload,
            });
        }

        Ok(consumed)
    }

    /// Lease the single next deliverable event, if any
    pub async fn consume_one<T: DeserializeOwned>(
        &self,
        subscription_name: &str,
        visibility_timeout_secs: u64,
    ) -> Result<Option<ConsumedEvent<T>>> {
        Ok(self
            .consume_next(subscription_name, visibility_timeout_secs, 1)
            .await?
            .into_iter()
            .next())
    }

    /// Mark a leased delivery as successfully processed.
    ///
    /// Resolves only while the delivery is in progress under the given key; a
    /// stale or mismatched key is a not-found error and mutates nothing.
    pub async fn mark_consumed(&self, delivery_id: &Uuid, delivery_key: &Uuid) -> Result<()> {
        let resolved = self
            .store
            .resolve_delivery(
                delivery_id,
                delivery_key,
                DeliveryResolution::Consumed,
                Utc::now(),
            )
            .await?;

        if resolved {
            tracing::debug!(delivery_id = %delivery_id, "Delivery consumed");
            Ok(())
        } else {
            Err(EventingError::NotFound(format!(
                "No in-progress delivery {} held under the given key",
                delivery_id
            )))
        }
    }

    /// Deliberately give up on a leased delivery.
    ///
    /// Failed deliveries are terminal and never retried, regardless of the
    /// remaining delivery budget. To get a redelivery instead, resolve
    /// nothing and let the lease lapse.
    pub async fn mark_failed(
        &self,
        delivery_id: &Uuid,
        delivery_key: &Uuid,
        reason: Reason,
    ) -> Result<()> {
        let resolved = self
            .store
            .resolve_delivery(
                delivery_id,
                delivery_key,
                DeliveryResolution::Failed(reason),
                Utc::now(),
            )
            .await?;

        if resolved {
            tracing::debug!(delivery_id = %delivery_id, "Delivery failed");
            Ok(())
        } else {
            Err(EventingError::NotFound(format!(
                "No in-progress delivery {} held under the given key",
                delivery_id
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeliveryState, SubscriptionSpec, TopicSubscription};
    use crate::publish::EventPublisher;
    use crate::registry::{SubscriptionRegistry, TopicRegistry};
    use crate::storage::InMemoryStore;

    async fn setup(max_deliveries: u32) -> (Arc<InMemoryStore>, EventPublisher, EventConsumer) {
        let store = Arc::new(InMemoryStore::new());
        let topic = TopicRegistry::new(store.clone())
            .create_or_update_topic("orders", None)
            .await
            .unwrap();
        SubscriptionRegistry::new(store.clone())
            .create_or_update_subscription(SubscriptionSpec {
                name: "worker".to_string(),
                ordered: false,
                max_deliveries,
                ttl_secs: None,
                delivery_delay_secs: None,
                topic_subscriptions: vec![TopicSubscription {
                    topic_id: topic.id,
                    enabled: true,
                }],
            })
            .await
            .unwrap();

        (
            store.clone(),
            EventPublisher::new(store.clone()),
            EventConsumer::new(store),
        )
    }

    #[tokio::test]
    async fn test_unknown_subscription() {
        let store: Arc<dyn EventingStore> = Arc::new(InMemoryStore::new());
        let consumer = EventConsumer::new(store);
        let err = consumer
            .consume_next::<String>("nope", 60, 1)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_lease_and_mark_consumed() {
        let (store, publisher, consumer) = setup(3).await;
        publisher
            .publish("orders", HashMap::new(), &"hello".to_string(), None)
            .await
            .unwrap();

        let leased = consumer
            .consume_one::<String>("worker", 60)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leased.payload, "hello");
        assert_eq!(leased.delivery_count, 1);

        // Leased rows are invisible to further calls
        assert!(consumer
            .consume_one::<String>("worker", 60)
            .await
            .unwrap()
            .is_none());

        consumer
            .mark_consumed(&leased.id, &leased.delivery_key)
            .await
            .unwrap();

        let row = store.get_delivery(&leased.id).await.unwrap().unwrap();
        assert_eq!(row.state, DeliveryState::Consumed);
    }

    #[tokio::test]
    async fn test_mark_failed_is_terminal() {
        let (store, publisher, consumer) = setup(5).await;
        publisher
            .publish("orders", HashMap::new(), &1u32, None)
            .await
            .unwrap();

        let leased = consumer.consume_one::<u32>("worker", 60).await.unwrap().unwrap();
        consumer
            .mark_failed(
                &leased.id,
                &leased.delivery_key,
                Reason::Other("broken".to_string()),
            )
            .await
            .unwrap();

        let row = store.get_delivery(&leased.id).await.unwrap().unwrap();
        assert_eq!(row.state, DeliveryState::Failed);
        assert_eq!(row.failure_reason, Some(Reason::Other("broken".to_string())));

        // Budget left over, but Failed is never redelivered
        assert!(consumer
            .consume_one::<u32>("worker", 60)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_stale_key_never_mutates() {
        let (store, publisher, consumer) = setup(3).await;
        publisher
            .publish("orders", HashMap::new(), &1u32, None)
            .await
            .unwrap();

        let leased = consumer.consume_one::<u32>("worker", 60).await.unwrap().unwrap();
        let err = consumer
            .mark_consumed(&leased.id, &Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");

        let row = store.get_delivery(&leased.id).await.unwrap().unwrap();
        assert_eq!(row.state, DeliveryState::InProgress);

        // Resolving twice: the first settles the lease, the second holds a
        // spent key
        consumer
            .mark_consumed(&leased.id, &leased.delivery_key)
            .await
            .unwrap();
        let err = consumer
            .mark_consumed(&leased.id, &leased.delivery_key)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_deserialization_error_counts_the_attempt() {
        let (store, publisher, consumer) = setup(3).await;
        publisher
            .publish("orders", HashMap::new(), &"not a number".to_string(), None)
            .await
            .unwrap();

        let err = consumer.consume_one::<u32>("worker", 60).await.unwrap_err();
        assert_eq!(err.error_code(), "DESERIALIZATION_ERROR");

        let subscription = store
            .get_subscription_by_name("worker")
            .await
            .unwrap()
            .unwrap();
        let rows = store
            .deliveries_for_subscription(&subscription.id)
            .await
            .unwrap();
        assert_eq!(rows[0].delivery_count, 1);
        assert_eq!(rows[0].state, DeliveryState::InProgress);
    }
}
