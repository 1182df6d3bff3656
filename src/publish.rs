use crate::codec::{JsonCodec, PayloadCodec};
use crate::error::{EventingError, Result};
use crate::models::{Delivery, Event};
use crate::storage::EventingStore;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Publishes typed events to named topics, fanning out one pending delivery
/// per enabled, bound subscription at publish time
#[derive(Clone)]
pub struct EventPublisher<C: PayloadCodec = JsonCodec> {
    store: Arc<dyn EventingStore>,
    codec: C,
}

impl EventPublisher<JsonCodec> {
    pub fn new(store: Arc<dyn EventingStore>) -> Self {
        Self::with_codec(store, JsonCodec)
    }
}

impl<C: PayloadCodec> EventPublisher<C> {
    pub fn with_codec(store: Arc<dyn EventingStore>, codec: C) -> Self {
        Self { store, codec }
    }

    /// Publish a typed payload to a topic.
    ///
    /// The event and every fan-out delivery are persisted as one atomic unit;
    /// nothing is visible until the write commits. There is no implicit retry
    /// on failure, so callers re-publish themselves and accept at-least-once
    /// duplication (or dedupe with their own key).
    pub async fn publish<T: Serialize>(
        &self,
        topic_name: &str,
        headers: HashMap<String, String>,
        payload: &T,
        functional_key: Option<String>,
    ) -> Result<Event> {
        let topic = self
            .store
            .get_topic_by_name(topic_name)
            .await?
            .ok_or_else(|| {
                EventingError::NotFound(format!("Topic '{}' not found", topic_name))
            })?;

        let blob = self.codec.serialize(payload)?;
        let sequence = self.store.next_sequence().await?;
        let event = Event::new(topic.id, sequence, blob, headers, functional_key);

        let subscriptions = self.store.subscriptions_for_topic(&topic.id).await?;
        let now = Utc::now();
        let deliveries: Vec<Delivery> = subscriptions
            .iter()
            .map(|subscription| Delivery::new(&event, subscription, now))
            .collect();

        self.store
            .insert_event_with_deliveries(&event, &deliveries)
            .await?;

        tracing::info!(
            event_id = %event.id,
            topic = %topic.name,
            sequence = event.sequence,
            fan_out = deliveries.len(),
            "Event published"
        );
        Ok(event)
    }
}
