use crate::error::{EventingError, Result};
use crate::models::{Delivery, DeliveryState, Event, Reason, Subscription, Topic};
use crate::storage::{head_of_line, DeliveryResolution, EventingStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::ConflictableTransactionError;
use sled::{Db, Transactional};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Persistent eventing store using the Sled embedded database
///
/// One tree per entity plus name and subscription/sequence index trees. The
/// fan-out of a publish goes through a single multi-tree transaction; delivery
/// state transitions run under the same per-subscription lock discipline as
/// the in-memory store, so selection and mutation stay atomic at delivery
/// granularity within the owning process.
#[derive(Clone)]
pub struct SledStore {
    db: Arc<Db>,
    topics_tree: sled::Tree,
    topic_names_tree: sled::Tree,
    subscriptions_tree: sled::Tree,
    subscription_names_tree: sled::Tree,
    events_tree: sled::Tree,
    deliveries_tree: sled::Tree,
    delivery_index_tree: sled::Tree,
    subscription_locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SledStore {
    /// Create a new Sled store at the specified path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref();
        let db = sled::open(&path)?;

        let topics_tree = db.open_tree("topics")?;
        let topic_names_tree = db.open_tree("topic_names")?;
        let subscriptions_tree = db.open_tree("subscriptions")?;
        let subscription_names_tree = db.open_tree("subscription_names")?;
        let events_tree = db.open_tree("events")?;
        let deliveries_tree = db.open_tree("deliveries")?;
        let delivery_index_tree = db.open_tree("deliveries_by_subscription")?;

        tracing::info!("Initialized Sled store at {:?}", path_str);

        Ok(Self {
            db: Arc::new(db),
            topics_tree,
            topic_names_tree,
            subscriptions_tree,
            subscription_names_tree,
            events_tree,
            deliveries_tree,
            delivery_index_tree,
            subscription_locks: Arc::new(DashMap::new()),
        })
    }

    /// Serialize a row to bytes
    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value)
            .map_err(|e| EventingError::Storage(format!("Failed to serialize row: {}", e)))
    }

    /// Deserialize a row from bytes
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes)
            .map_err(|e| EventingError::Storage(format!("Failed to deserialize row: {}", e)))
    }

    /// Index key ordering deliveries of one subscription by publish sequence
    fn index_key(delivery: &Delivery) -> Vec<u8> {
        let mut key = Vec::with_capacity(40);
        key.extend_from_slice(delivery.subscription_id.as_bytes());
        key.extend_from_slice(&delivery.event_sequence.to_be_bytes());
        key.extend_from_slice(delivery.id.as_bytes());
        key
    }

    fn subscription_lock(&self, subscription_id: &Uuid) -> Arc<Mutex<()>> {
        self.subscription_locks
            .entry(*subscription_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Deliveries of one subscription in publish order (index prefix scan)
    fn subscription_rows(&self, subscription_id: &Uuid) -> Result<Vec<Delivery>> {
        let mut rows = Vec::new();
        for entry in self.delivery_index_tree.scan_prefix(subscription_id.as_bytes()) {
            let (_, delivery_id) = entry?;
            if let Some(bytes) = self.deliveries_tree.get(&delivery_id)? {
                rows.push(Self::decode::<Delivery>(&bytes)?);
            }
        }
        Ok(rows)
    }

    fn read_delivery(&self, id: &Uuid) -> Result<Option<Delivery>> {
        match self.deliveries_tree.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_delivery(&self, delivery: &Delivery) -> Result<()> {
        self.deliveries_tree
            .insert(delivery.id.as_bytes(), Self::encode(delivery)?)?;
        Ok(())
    }
}

#[async_trait]
impl EventingStore for SledStore {
    async fn upsert_topic(&self, topic: &Topic) -> Result<()> {
        if let Some(existing) = self.topic_names_tree.get(topic.name.as_bytes())? {
            let existing_id = Uuid::from_slice(&existing)
                .map_err(|e| EventingError::Storage(e.to_string()))?;
            if existing_id != topic.id {
                return Err(EventingError::Conflict(format!(
                    "Topic name '{}' already taken",
                    topic.name
                )));
            }
        }

        if let Some(bytes) = self.topics_tree.get(topic.id.as_bytes())? {
            let previous: Topic = Self::decode(&bytes)?;
            if previous.name != topic.name {
                self.topic_names_tree.remove(previous.name.as_bytes())?;
            }
        }

        self.topic_names_tree
            .insert(topic.name.as_bytes(), topic.id.as_bytes().to_vec())?;
        self.topics_tree
            .insert(topic.id.as_bytes(), Self::encode(topic)?)?;
        Ok(())
    }

    async fn get_topic(&self, id: &Uuid) -> Result<Option<Topic>> {
        match self.topics_tree.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_topic_by_name(&self, name: &str) -> Result<Option<Topic>> {
        match self.topic_names_tree.get(name.as_bytes())? {
            Some(id_bytes) => match self.topics_tree.get(&id_bytes)? {
                Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    async fn delete_topic(&self, id: &Uuid) -> Result<()> {
        match self.topics_tree.remove(id.as_bytes())? {
            Some(bytes) => {
                let topic: Topic = Self::decode(&bytes)?;
                self.topic_names_tree.remove(topic.name.as_bytes())?;
                Ok(())
            }
            None => Err(EventingError::NotFound(format!("Topic {} not found", id))),
        }
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<()> {
        if let Some(existing) = self
            .subscription_names_tree
            .get(subscription.name.as_bytes())?
        {
            let existing_id = Uuid::from_slice(&existing)
                .map_err(|e| EventingError::Storage(e.to_string()))?;
            if existing_id != subscription.id {
                return Err(EventingError::Conflict(format!(
                    "Subscription name '{}' already taken",
                    subscription.name
                )));
            }
        }

        if let Some(bytes) = self.subscriptions_tree.get(subscription.id.as_bytes())? {
            let previous: Subscription = Self::decode(&bytes)?;
            if previous.name != subscription.name {
                self.subscription_names_tree
                    .remove(previous.name.as_bytes())?;
            }
        }

        self.subscription_names_tree.insert(
            subscription.name.as_bytes(),
            subscription.id.as_bytes().to_vec(),
        )?;
        self.subscriptions_tree
            .insert(subscription.id.as_bytes(), Self::encode(subscription)?)?;
        Ok(())
    }

    async fn get_subscription(&self, id: &Uuid) -> Result<Option<Subscription>> {
        match self.subscriptions_tree.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_subscription_by_name(&self, name: &str) -> Result<Option<Subscription>> {
        match self.subscription_names_tree.get(name.as_bytes())? {
            Some(id_bytes) => match self.subscriptions_tree.get(&id_bytes)? {
                Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    async fn delete_subscription(&self, id: &Uuid) -> Result<()> {
        // Deliveries are intentionally left behind for audit
        match self.subscriptions_tree.remove(id.as_bytes())? {
            Some(bytes) => {
                let subscription: Subscription = Self::decode(&bytes)?;
                self.subscription_names_tree
                    .remove(subscription.name.as_bytes())?;
                Ok(())
            }
            None => Err(EventingError::NotFound(format!(
                "Subscription {} not found",
                id
            ))),
        }
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        let mut subscriptions = Vec::new();
        for entry in self.subscriptions_tree.iter() {
            let (_, bytes) = entry?;
            subscriptions.push(Self::decode::<Subscription>(&bytes)?);
        }
        Ok(subscriptions)
    }

    async fn subscriptions_for_topic(&self, topic_id: &Uuid) -> Result<Vec<Subscription>> {
        let subscriptions = self.list_subscriptions().await?;
        Ok(subscriptions
            .into_iter()
            .filter(|sub| {
                sub.topic_subscriptions
                    .iter()
                    .any(|link| link.topic_id == *topic_id && link.enabled)
            })
            .collect())
    }

    async fn next_sequence(&self) -> Result<u64> {
        Ok(self.db.generate_id()?)
    }

    async fn insert_event_with_deliveries(
        &self,
        event: &Event,
        deliveries: &[Delivery],
    ) -> Result<()> {
        let event_key = event.id.as_bytes().to_vec();
        let event_bytes = Self::encode(event)?;
        let delivery_rows: Vec<(Vec<u8>, Vec<u8>, Vec<u8>)> = deliveries
            .iter()
            .map(|d| {
                Ok((
                    d.id.as_bytes().to_vec(),
                    Self::encode(d)?,
                    Self::index_key(d),
                ))
            })
            .collect::<Result<_>>()?;

        // One transaction across all three trees: either the event and every
        // fan-out row land, or none of them do
        (
            &self.events_tree,
            &self.deliveries_tree,
            &self.delivery_index_tree,
        )
            .transaction(|(events, deliveries_tree, index)| {
                events.insert(event_key.clone(), event_bytes.clone())?;
                for (id, bytes, index_key) in &delivery_rows {
                    deliveries_tree.insert(id.clone(), bytes.clone())?;
                    index.insert(index_key.clone(), id.clone())?;
                }
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e| EventingError::Storage(format!("Publish transaction failed: {:?}", e)))?;

        tracing::debug!(
            event_id = %event.id,
            sequence = event.sequence,
            fan_out = deliveries.len(),
            "Event persisted"
        );
        Ok(())
    }

    async fn get_event(&self, id: &Uuid) -> Result<Option<Event>> {
        match self.events_tree.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_delivery(&self, id: &Uuid) -> Result<Option<Delivery>> {
        self.read_delivery(id)
    }

    async fn deliveries_for_subscription(&self, subscription_id: &Uuid) -> Result<Vec<Delivery>> {
        self.subscription_rows(subscription_id)
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

        let rows = self.subscription_rows(subscription_id)?;
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
        let subscription_id = match self.read_delivery(delivery_id)? {
            Some(delivery) => delivery.subscription_id,
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
        let current = match self.read_delivery(delivery_id)? {
            Some(delivery) => delivery,
            None => return Ok(None),
        };

        if !current.is_claimable(now) || current.delivery_count != expected_count {
            return Ok(None);
        }

        if enforce_ordering && current.functional_key.is_some() {
            let rows = self.subscription_rows(&subscription_id)?;
            if !head_of_line(&rows, &current) {
                return Ok(None);
            }
        }

        let mut leased = current;
        leased.begin_lease(visibility_timeout_secs, now);
        self.write_delivery(&leased)?;
        Ok(Some(leased))
    }

    async fn resolve_delivery(
        &self,
        delivery_id: &Uuid,
        delivery_key: &Uuid,
        resolution: DeliveryResolution,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let subscription_id = match self.read_delivery(delivery_id)? {
            Some(delivery) => delivery.subscription_id,
            None => return Ok(false),
        };

        let lock = self.subscription_lock(&subscription_id);
        let _guard = lock.lock();

        let current = match self.read_delivery(delivery_id)? {
            Some(delivery) => delivery,
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
        self.write_delivery(&resolved)?;
        Ok(true)
    }

    async fn expire_delivery(
        &self,
        delivery_id: &Uuid,
        expected_count: u32,
        reason: Reason,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let subscription_id = match self.read_delivery(delivery_id)? {
            Some(delivery) => delivery.subscription_id,
            None => return Ok(false),
        };

        let lock = self.subscription_lock(&subscription_id);
        let _guard = lock.lock();

        let current = match self.read_delivery(delivery_id)? {
            Some(delivery) => delivery,
            None => return Ok(false),
        };

        if current.state.is_terminal() || current.delivery_count != expected_count {
            return Ok(false);
        }

        let mut expired = current;
        expired.resolve(DeliveryState::Expired, Some(reason), now);
        self.write_delivery(&expired)?;
        Ok(true)
    }
}
