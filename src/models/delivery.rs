use crate::models::{Event, Subscription};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Delivery lifecycle state
///
/// `Pending → InProgress → {Consumed | Failed | Expired}`, with
/// `InProgress → Pending` happening implicitly when `invisible_until` elapses.
/// `Consumed`, `Failed` and `Expired` are terminal; rows are retained for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum DeliveryState {
    /// Awaiting delivery (or redelivery after a lapsed lease)
    Pending,

    /// Leased to a consumer until `invisible_until`
    InProgress,

    /// Successfully processed
    Consumed,

    /// Deliberately given up by the consumer; never retried
    Failed,

    /// Poisoned: max deliveries exhausted or TTL elapsed; never redelivered
    Expired,
}

impl DeliveryState {
    /// Terminal states are never mutated again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryState::Consumed | DeliveryState::Failed | DeliveryState::Expired
        )
    }
}

/// Failure cause recorded for audit, never interpreted by the core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reason {
    /// Delivery budget exhausted without consumption
    MaxDeliveriesReached,

    /// Undelivered event outlived the subscription TTL
    TtlElapsed,

    /// Caller-supplied free-text reason
    Other(String),
}

/// One subscription-specific instance of an event awaiting or under consumption
///
/// Event and subscription are identity references; their lifetimes are
/// independent of any delivery referencing them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    /// Unique identifier
    pub id: Uuid,

    /// Source event
    pub event_id: Uuid,

    /// Owning subscription
    pub subscription_id: Uuid,

    /// Publish order, copied from the event so selection needs no join
    pub event_sequence: u64,

    /// Functional key, copied from the event for ordering
    pub functional_key: Option<String>,

    /// Publish timestamp, copied from the event for TTL checks
    pub published_at: DateTime<Utc>,

    /// Current lifecycle state
    pub state: DeliveryState,

    /// Delivery attempts so far
    pub delivery_count: u32,

    /// Opaque token minted on each lease grant; required to resolve that lease
    pub delivery_key: Option<Uuid>,

    /// Not selectable for delivery while now < this value
    pub invisible_until: DateTime<Utc>,

    /// Recorded cause for Failed/Expired rows
    pub failure_reason: Option<Reason>,

    /// When the delivery reached a terminal state
    pub resolved_at: Option<DateTime<Utc>>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    /// Materialize a pending delivery for one subscription at publish time
    pub fn new(event: &Event, subscription: &Subscription, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id: event.id,
            subscription_id: subscription.id,
            event_sequence: event.sequence,
            functional_key: event.functional_key.clone(),
            published_at: event.published_at,
            state: DeliveryState::Pending,
            delivery_count: 0,
            delivery_key: None,
            invisible_until: now + subscription.delivery_delay(),
            failure_reason: None,
            resolved_at: None,
            updated_at: now,
        }
    }

    /// Whether the row can be leased at `now`: Pending past its visibility
    /// gate, or an InProgress row whose lease has lapsed
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.state,
            DeliveryState::Pending | DeliveryState::InProgress
        ) && self.invisible_until <= now
    }

    /// Whether the source event outlived the subscription TTL without being consumed
    pub fn ttl_breached(&self, ttl_secs: Option<u64>, now: DateTime<Utc>) -> bool {
        match ttl_secs {
            Some(secs) => self.published_at + Duration::seconds(secs as i64) <= now,
            None => false,
        }
    }

    /// Grant a lease: count the attempt, hide the row for the visibility
    /// window and mint a fresh delivery key
    pub fn begin_lease(&mut self, visibility_timeout_secs: u64, now: DateTime<Utc>) -> Uuid {
        let key = Uuid::new_v4();
        self.delivery_count += 1;
        self.state = DeliveryState::InProgress;
        self.delivery_key = Some(key);
        self.invisible_until = now + Duration::seconds(visibility_timeout_secs as i64);
        self.updated_at = now;
        key
    }

    /// Resolve the current lease into a terminal state
    pub fn resolve(&mut self, state: DeliveryState, reason: Option<Reason>, now: DateTime<Utc>) {
        self.state = state;
        self.delivery_key = None;
        self.failure_reason = reason;
        self.resolved_at = Some(now);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubscriptionSpec;
    use std::collections::HashMap;

    fn subscription(delay_secs: Option<u64>) -> Subscription {
        Subscription::from_spec(SubscriptionSpec {
            name: "test".to_string(),
            ordered: false,
            max_deliveries: 2,
            ttl_secs: None,
            delivery_delay_secs: delay_secs,
            topic_subscriptions: Vec::new(),
        })
    }

    fn delivery(delay_secs: Option<u64>) -> Delivery {
        let event = Event::new(Uuid::new_v4(), 1, vec![1, 2, 3], HashMap::new(), None);
        Delivery::new(&event, &subscription(delay_secs), Utc::now())
    }

    #[test]
    fn test_new_delivery_is_pending() {
        let delivery = delivery(None);
        assert_eq!(delivery.state, DeliveryState::Pending);
        assert_eq!(delivery.delivery_count, 0);
        assert!(delivery.delivery_key.is_none());
        assert!(delivery.is_claimable(Utc::now()));
    }

    #[test]
    fn test_delivery_delay_postpones_visibility() {
        let delivery = delivery(Some(30));
        let now = Utc::now();
        assert!(!delivery.is_claimable(now));
        assert!(delivery.is_claimable(now + Duration::seconds(31)));
    }

    #[test]
    fn test_lease_hides_row_until_timeout() {
        let mut delivery = delivery(None);
        let now = Utc::now();

        let key = delivery.begin_lease(60, now);

        assert_eq!(delivery.state, DeliveryState::InProgress);
        assert_eq!(delivery.delivery_count, 1);
        assert_eq!(delivery.delivery_key, Some(key));
        assert!(!delivery.is_claimable(now));
        assert!(delivery.is_claimable(now + Duration::seconds(61)));
    }

    #[test]
    fn test_resolve_clears_key_and_is_terminal() {
        let mut delivery = delivery(None);
        let now = Utc::now();
        delivery.begin_lease(60, now);

        delivery.resolve(
            DeliveryState::Failed,
            Some(Reason::Other("gave up".to_string())),
            now,
        );

        assert!(delivery.state.is_terminal());
        assert!(delivery.delivery_key.is_none());
        assert!(!delivery.is_claimable(now + Duration::seconds(3600)));
    }

    #[test]
    fn test_ttl_breached() {
        let delivery = delivery(None);
        let now = Utc::now();
        assert!(!delivery.ttl_breached(None, now));
        assert!(!delivery.ttl_breached(Some(60), now));
        assert!(delivery.ttl_breached(Some(60), now + Duration::seconds(61)));
    }
}
