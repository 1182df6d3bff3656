use crate::models::TopicSubscription;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A named consumer-facing binding to one or more topics, with delivery policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique identifier, immutable once created
    pub id: Uuid,

    /// Unique subscription name
    pub name: String,

    /// Enforce strict per-functional-key in-order delivery
    pub ordered: bool,

    /// Delivery attempts before an event is abandoned (poisoned)
    pub max_deliveries: u32,

    /// Seconds an undelivered event may live before expiry
    pub ttl_secs: Option<u64>,

    /// Seconds to postpone first visibility after publish
    pub delivery_delay_secs: Option<u64>,

    /// Topics this subscription consumes from
    pub topic_subscriptions: Vec<TopicSubscription>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Build a subscription from a validated spec, minting a fresh identity
    pub fn from_spec(spec: SubscriptionSpec) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            name: spec.name,
            ordered: spec.ordered,
            max_deliveries: spec.max_deliveries,
            ttl_secs: spec.ttl_secs,
            delivery_delay_secs: spec.delivery_delay_secs,
            topic_subscriptions: spec.topic_subscriptions,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply an updated spec while keeping identity and creation time
    pub fn apply_spec(&mut self, spec: SubscriptionSpec) {
        self.name = spec.name;
        self.ordered = spec.ordered;
        self.max_deliveries = spec.max_deliveries;
        self.ttl_secs = spec.ttl_secs;
        self.delivery_delay_secs = spec.delivery_delay_secs;
        self.topic_subscriptions = spec.topic_subscriptions;
        self.updated_at = Utc::now();
    }

    /// Delay applied to first visibility after publish
    pub fn delivery_delay(&self) -> Duration {
        Duration::seconds(self.delivery_delay_secs.unwrap_or(0) as i64)
    }

    /// Check whether the subscription holds a link to the given topic,
    /// enabled or not
    pub fn is_linked_to(&self, topic_id: &Uuid) -> bool {
        self.topic_subscriptions
            .iter()
            .any(|link| link.topic_id == *topic_id)
    }
}

/// Caller-supplied subscription definition, validated before upsert
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubscriptionSpec {
    /// Unique subscription name
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    /// Enforce strict per-functional-key in-order delivery
    #[serde(default)]
    pub ordered: bool,

    /// Delivery attempts before an event is abandoned
    #[validate(range(min = 1))]
    pub max_deliveries: u32,

    /// Seconds an undelivered event may live before expiry
    pub ttl_secs: Option<u64>,

    /// Seconds to postpone first visibility after publish
    pub delivery_delay_secs: Option<u64>,

    /// Topics this subscription consumes from
    #[serde(default)]
    pub topic_subscriptions: Vec<TopicSubscription>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, max_deliveries: u32) -> SubscriptionSpec {
        SubscriptionSpec {
            name: name.to_string(),
            ordered: false,
            max_deliveries,
            ttl_secs: None,
            delivery_delay_secs: None,
            topic_subscriptions: Vec::new(),
        }
    }

    #[test]
    fn test_spec_validation() {
        assert!(spec("orders", 1).validate().is_ok());
        assert!(spec("", 1).validate().is_err());
        assert!(spec("orders", 0).validate().is_err());
    }

    #[test]
    fn test_apply_spec_keeps_identity() {
        let mut sub = Subscription::from_spec(spec("orders", 2));
        let id = sub.id;
        let created_at = sub.created_at;

        sub.apply_spec(spec("orders", 5));

        assert_eq!(sub.id, id);
        assert_eq!(sub.created_at, created_at);
        assert_eq!(sub.max_deliveries, 5);
    }

    #[test]
    fn test_delivery_delay_defaults_to_zero() {
        let sub = Subscription::from_spec(spec("orders", 1));
        assert_eq!(sub.delivery_delay(), Duration::zero());
    }
}
