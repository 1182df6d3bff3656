pub mod factory;
pub mod memory;
pub mod sled_store;

pub use factory::{create_in_memory_store, create_store};
pub use memory::InMemoryStore;
pub use sled_store::SledStore;

use crate::error::Result;
use crate::models::{Delivery, Event, Reason, Subscription, Topic};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A keyed row is head-of-line when no earlier non-terminal row in the same
/// subscription shares its functional key. Null-keyed rows are never blocked.
///
/// `rows` must cover every delivery of the subscription; backends call this
/// inside their per-subscription critical section so the verdict stays
/// consistent with the lease grant.
pub(crate) fn head_of_line(rows: &[Delivery], delivery: &Delivery) -> bool {
    let key = match &delivery.functional_key {
        Some(key) => key,
        None => return true,
    };

    !rows.iter().any(|other| {
        other.id != delivery.id
            && other.event_sequence < delivery.event_sequence
            && !other.state.is_terminal()
            && other.functional_key.as_deref() == Some(key.as_str())
    })
}

/// Terminal outcome requested for an in-progress delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResolution {
    /// Successfully processed
    Consumed,

    /// Deliberately given up; never retried
    Failed(Reason),
}

/// Abstract durable store for topics, subscriptions, events and delivery leases
///
/// This is the only boundary the engine crosses. All delivery state
/// transitions are atomic conditional updates: two concurrent consumers can
/// never lease the same row, and a resolution call never succeeds against a
/// lease it does not currently hold.
#[async_trait]
pub trait EventingStore: Send + Sync {
    // --- Topics ---

    /// Insert or replace a topic; the unique-name index must stay consistent
    async fn upsert_topic(&self, topic: &Topic) -> Result<()>;

    /// Get a topic by ID
    async fn get_topic(&self, id: &Uuid) -> Result<Option<Topic>>;

    /// Get a topic by name
    async fn get_topic_by_name(&self, name: &str) -> Result<Option<Topic>>;

    /// Delete a topic; historical events and deliveries are untouched
    async fn delete_topic(&self, id: &Uuid) -> Result<()>;

    // --- Subscriptions ---

    /// Insert or replace a subscription, including its topic links
    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<()>;

    /// Get a subscription by ID
    async fn get_subscription(&self, id: &Uuid) -> Result<Option<Subscription>>;

    /// Get a subscription by name
    async fn get_subscription_by_name(&self, name: &str) -> Result<Option<Subscription>>;

    /// Delete a subscription; materialized deliveries stay queryable for audit
    async fn delete_subscription(&self, id: &Uuid) -> Result<()>;

    /// List all subscriptions
    async fn list_subscriptions(&self) -> Result<Vec<Subscription>>;

    /// Subscriptions holding an enabled link to the given topic
    async fn subscriptions_for_topic(&self, topic_id: &Uuid) -> Result<Vec<Subscription>>;

    // --- Events ---

    /// Mint the next monotonic publish sequence number
    async fn next_sequence(&self) -> Result<u64>;

    /// Persist an event and its fan-out deliveries as one atomic unit:
    /// either everything becomes visible, or nothing does
    async fn insert_event_with_deliveries(
        &self,
        event: &Event,
        deliveries: &[Delivery],
    ) -> Result<()>;

    /// Get an event by ID
    async fn get_event(&self, id: &Uuid) -> Result<Option<Event>>;

    // --- Deliveries ---

    /// Get a delivery by ID
    async fn get_delivery(&self, id: &Uuid) -> Result<Option<Delivery>>;

    /// All deliveries for a subscription, ordered by publish sequence (audit)
    async fn deliveries_for_subscription(&self, subscription_id: &Uuid) -> Result<Vec<Delivery>>;

    /// Claimable deliveries for a subscription at `now`: Pending or
    /// lease-expired InProgress rows with `invisible_until <= now`, ordered by
    /// publish sequence. With `ordered`, rows whose functional key is blocked
    /// by an earlier non-terminal same-key row are filtered out; null-keyed
    /// rows are never blocked.
    async fn delivery_candidates(
        &self,
        subscription_id: &Uuid,
        now: DateTime<Utc>,
        ordered: bool,
        limit: usize,
    ) -> Result<Vec<Delivery>>;

    /// Atomically grant a lease on a claimable delivery.
    ///
    /// The grant succeeds only if the row is still claimable at `now` and its
    /// `delivery_count` equals `expected_count` (the compare half of the
    /// compare-and-swap; a concurrent leaser bumps the count). With
    /// `enforce_ordering`, head-of-line position for the row's functional key
    /// is re-verified inside the same critical section. Returns the updated
    /// row with its freshly minted delivery key, or `None` if the race was
    /// lost.
    async fn try_lease_delivery(
        &self,
        delivery_id: &Uuid,
        expected_count: u32,
        visibility_timeout_secs: u64,
        enforce_ordering: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>>;

    /// Atomically resolve an in-progress delivery, conditional on the row
    /// being `InProgress` with a matching delivery key. Returns `false`
    /// without mutating anything when the lease is not currently held.
    async fn resolve_delivery(
        &self,
        delivery_id: &Uuid,
        delivery_key: &Uuid,
        resolution: DeliveryResolution,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Atomically transition a claimable delivery to the terminal `Expired`
    /// state (TTL elapsed or delivery budget exhausted), conditional on
    /// `delivery_count` still equalling `expected_count`. Returns `false`
    /// when the row changed underneath.
    async fn expire_delivery(
        &self,
        delivery_id: &Uuid,
        expected_count: u32,
        reason: Reason,
        now: DateTime<Utc>,
    ) -> Result<bool>;
}
