use crate::error::{EventingError, Result};
use crate::models::{Delivery, DeliveryState, Event, Reason, Subscription, Topic};
use crate::storage::{head_of_line, DeliveryResolution, EventingStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// In-memory eventing store (for embedding and testing)
///
/// Delivery selection and state transitions for one subscription are
/// serialized through a per-subscription mutex, which makes the
/// candidate-query/lease-grant cycle atomic at delivery granularity while
/// leaving different subscriptions fully concurrent.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    topics: Arc<DashMap<Uuid, Topic>>,
    topic_names: Arc<DashMap<String, Uuid>>,
    subscriptions: Arc<DashMap<Uuid, Subscription>>,
    subscription_names: Arc<DashMap<String, Uuid>>,
    events: Arc<DashMap<Uuid, Event>>,
    deliveries: Arc<DashMap<Uuid, Delivery>>,
    subscription_deliveries: Arc<DashMap<Uuid, Vec<Uuid>>>,
    subscription_locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
    sequence: Arc<AtomicU64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscription_lock(&self, subscription_id: &Uuid) -> Arc<Mutex<()>> {
        self.subscription_locks
            .entry(*subscription_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Deliveries of one subscription in publish order. Caller holds the
    /// subscription lock when consistency with a subsequent mutation matters.
    fn subscription_rows(&self, subscription_id: &Uuid) -> Vec<Delivery> {
        let ids = self
            .subscription_deliveries
            .get(subscription_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        let mut rows: Vec<Delivery> = ids
            .iter()
            .filter_map(|id| self.deliveries.get(id).map(|entry| entry.value().clone()))
            .collect();
        rows.sort_by_key(|d| d.event_sequence);
        rows
    }
}

#[async_trait]
impl EventingStore for InMemoryStore {
    async fn upsert_topic(&self, topic: &Topic) -> Result<()> {
        if let Some(existing_id) = self.topic_names.get(&topic.name) {
            if *existing_id.value() != topic.id {
                return Err(EventingError::Conflict(format!(
                    "Topic name '{}' already taken",
                    topic.name
                )));
            }
        }

        // Renames must drop the old name index entry
        if let Some(previous) = self.topics.get(&topic.id) {
            if previous.name != topic.name {
                self.topic_names.remove(&previous.name);
            }
        }

        self.topic_names.insert(topic.name.clone(), topic.id);
        self.topics.insert(topic.id, topic.clone());
        Ok(())
    }

    async fn get_topic(&self, id: &Uuid) -> Result<Option<Topic>> {
        Ok(self.topics.get(id).map(|entry| entry.value().clone()))
    }

    async fn get_topic_by_name(&self, name: &str) -> Result<Option<Topic>> {
        match self.topic_names.get(name) {
            Some(id) => Ok(self.topics.get(id.value()).map(|entry| entry.value().clone())),
            None => Ok(None),
        }
    }

    async fn delete_topic(&self, id: &Uuid) -> Result<()> {
        match self.topics.remove(id) {
            Some((_, topic)) => {
                self.topic_names.remove(&topic.name);
                Ok(())
            }
            None => Err(EventingError::NotFound(format!("Topic {} not found", id))),
        }
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<()> {
        if let Some(existing_id) = self.subscription_names.get(&subscription.name) {
            if *existing_id.value() != subscription.id {
                return Err(EventingError::Conflict(format!(
                    "Subscription name '{}' already taken",
                    subscription.name
                )));
            }
        }

        if let Some(previous) = self.subscriptions.get(&subscription.id) {
            if previous.name != subscription.name {
                self.subscription_names.remove(&previous.name);
            }
        }

        self.subscription_names
            .insert(subscription.name.clone(), subscription.id);
        self.subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn get_subscription(&self, id: &Uuid) -> Result<Option<Subscription>> {
        Ok(self.subscriptions.get(id).map(|entry| entry.value().clone()))
    }

    async fn get_subscription_by_name(&self, name: &str) -> Result<Option<Subscription>> {
        match self.subscription_names.get(name) {
            Some(id) => Ok(self
                .subscriptions
                .get(id.value())
                .map(|entry| entry.value().clone())),
            None => Ok(None),
        }
    }

    async fn delete_subscription(&self, id: &Uuid) -> Result<()> {
        // Deliveries are intentionally left behind for audit
        match self.subscriptions.remove(id) {
            Some((_, subscription)) => {
                self.subscription_names.remove(&subscription.name);
                Ok(())
            }
            None => Err(EventingError::NotFound(format!(
                "Subscription {} not found",
                id
            ))),
        }
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn subscriptions_for_topic(&self, topic_id: &Uuid) -> Result<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .topic_subscriptions
                    .iter()
                    .any(|link| link.topic_id == *topic_id && link.enabled)
            })
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn next_sequence(&self) -> Result<u64> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn insert_event_with_deliveries(
        &self,
        event: &Event,
        deliveries: &[Delivery],
    ) -> Result<()> {
        self.events.insert(event.id, event.clone());

        for delivery in deliveries {
            self.deliveries.insert(delivery.id, delivery.clone());
            self.subscription_deliveries
                .entry(delivery.subscription_id)
                .or_default()
                .push(delivery.id);
        }

        tracing::debug!(
            event_id = %event.id,
            sequence = event.sequence,
            fan_out = deliveries.len(),
            "Event persisted"
        );
        Ok(())
    }

    async fn get_event(&self, id: &Uuid) -> Result<Option<Event>> {
        Ok(self.events.get(id).map(|entry| entry.value().clone()))
    }

    async fn get_delivery(&self, id: &Uuid) -> Result<Option<Delivery>> {
        Ok(self.deliveries.get(id).map(|entry| entry.value().clone()))
    }

    async fn deliveries_for_subscription(&self, subscription_id: &Uuid) -> Result<Vec<Delivery>> {
        Ok(self.subscription_rows(subscription_id))
    }

    async fn delivery_candidates(
        &self,
        subscription_id: &Uuid,
        now: DateTime<Utc>,
        ordered: bool,
        limit: usize,
    ) -> Result<Vec<Delivery>> {
        let lock = self.subscription_lock(subscription_id);
        let _guard = lock.lock();

        let rows = self.subscription_rows(subscription_id);
        let candidates = rows
            .iter()
            .filter(|d| d.is_claimable(now))
            .filter(|d| !ordered || head_of_line(&rows, d))
            .take(limit)
            .cloned()
            .collect();
        Ok(candidates)
    }

    async fn try_lease_delivery(
        &self,
        delivery_id: &Uuid,
        expected_count: u32,
        visibility_timeout_secs: u64,
        enforce_ordering: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>> {
        let subscription_id = match self.deliveries.get(delivery_id) {
            Some(entry) => entry.value().subscription_id,
            None => {
                return Err(EventingError::NotFound(format!(
                    "Delivery {} not found",
                    delivery_id
                )))
            }
        };

        let lock = self.subscription_lock(&subscription_id);
        let _guard = lock.lock();

        // Re-read and re-verify under the lock; a concurrent leaser loses here
        let current = match self.deliveries.get(delivery_id) {
            Some(entry) => entry.value().clone(),
            None => return Ok(None),
        };

        if !current.is_claimable(now) || current.delivery_count != expected_count {
            return Ok(None);
        }

        if enforce_ordering && current.functional_key.is_some() {
            let rows = self.subscription_rows(&subscription_id);
            if !head_of_line(&rows, &current) {
                return Ok(None);
            }
        }

        let mut leased = current;
        leased.begin_lease(visibility_timeout_secs, now);
        self.deliveries.insert(leased.id, leased.clone());
        Ok(Some(leased))
    }

    async fn resolve_delivery(
        &self,
        delivery_id: &Uuid,
        delivery_key: &Uuid,
        resolution: DeliveryResolution,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let subscription_id = match self.deliveries.get(delivery_id) {
            Some(entry) => entry.value().subscription_id,
            None => return Ok(false),
        };

        let lock = self.subscription_lock(&subscription_id);
        let _guard = lock.lock();

        let current = match self.deliveries.get(delivery_id) {
            Some(entry) => entry.value().clone(),
            None => return Ok(false),
        };

        // A stale or mismatched key must never mutate state
        if current.state != DeliveryState::InProgress
            || current.delivery_key != Some(*delivery_key)
        {
            return Ok(false);
        }

        let mut resolved = current;
        match resolution {
            DeliveryResolution::Consumed => resolved.resolve(DeliveryState::Consumed, None, now),
            DeliveryResolution::Failed(reason) => {
                resolved.resolve(DeliveryState::Failed, Some(reason), now)
            }
        }
        self.deliveries.insert(resolved.id, resolved);
        Ok(true)
    }

    async fn expire_delivery(
        &self,
        delivery_id: &Uuid,
        expected_count: u32,
        reason: Reason,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let subscription_id = match self.deliveries.get(delivery_id) {
            Some(entry) => entry.value().subscription_id,
            None => return Ok(false),
        };

        let lock = self.subscription_lock(&subscription_id);
        let _guard = lock.lock();

        let current = match self.deliveries.get(delivery_id) {
            Some(entry) => entry.value().clone(),
            None => return Ok(false),
        };

        if current.state.is_terminal() || current.delivery_count != expected_count {
            return Ok(false);
        }

        let mut expired = current;
        expired.resolve(DeliveryState::Expired, Some(reason), now);
        self.deliveries.insert(expired.id, expired);
        Ok(true)
    }
}
