//! Resonance — a durable, ordered, at-least-once eventing engine.
//!
//! Producers publish typed events to named topics; consumers pull events
//! through named subscriptions with lease-based (visibility-timeout)
//! delivery, bounded redelivery and optional strict per-key ordering.
//!
//! The delivery contract is at-least-once: no event is lost, no event is
//! silently stuck, ordering is honored when requested, and many consumer
//! processes can run concurrently against shared storage. Consumers are
//! expected to be idempotent.
//!
//! ```no_run
//! use resonance::{
//!     EventConsumer, EventPublisher, SubscriptionRegistry, SubscriptionSpec,
//!     TopicRegistry, TopicSubscription,
//! };
//! use resonance::storage::create_in_memory_store;
//! use std::collections::HashMap;
//!
//! # async fn demo() -> resonance::Result<()> {
//! let store = create_in_memory_store();
//!
//! let topic = TopicRegistry::new(store.clone())
//!     .create_or_update_topic("payments", None)
//!     .await?;
//!
//! SubscriptionRegistry::new(store.clone())
//!     .create_or_update_subscription(SubscriptionSpec {
//!         name: "payment-worker".into(),
//!         ordered: true,
//!         max_deliveries: 2,
//!         ttl_secs: Some(3600),
//!         delivery_delay_secs: None,
//!         topic_subscriptions: vec![TopicSubscription { topic_id: topic.id, enabled: true }],
//!     })
//!     .await?;
//!
//! EventPublisher::new(store.clone())
//!     .publish("payments", HashMap::new(), &("Robert", 40), Some("cust-1".into()))
//!     .await?;
//!
//! let consumer = EventConsumer::new(store);
//! if let Some(event) = consumer.consume_one::<(String, u32)>("payment-worker", 60).await? {
//!     // process, then settle the lease
//!     consumer.mark_consumed(&event.id, &event.delivery_key).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod consume;
pub mod error;
pub mod models;
pub mod publish;
pub mod reaper;
pub mod registry;
pub mod storage;

pub use codec::{JsonCodec, PayloadCodec};
pub use config::Config;
pub use consume::{ConsumedEvent, EventConsumer};
pub use error::{EventingError, Result};
pub use models::{
    Delivery, DeliveryState, Event, Reason, Subscription, SubscriptionSpec, Topic,
    TopicSubscription,
};
pub use publish::EventPublisher;
pub use reaper::{LeaseReaper, SweepStats};
pub use registry::{SubscriptionRegistry, TopicRegistry};
pub use storage::{DeliveryResolution, EventingStore, InMemoryStore, SledStore};

/// Initialize structured logging from `RUST_LOG`, defaulting to `info`.
///
/// Embedding applications that already install their own subscriber skip this.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
