use resonance::{
    Delivery, DeliveryResolution, DeliveryState, Event, EventingStore, InMemoryStore, Reason,
    SledStore, Subscription, SubscriptionSpec, Topic, TopicSubscription,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

fn subscription_spec(name: &str, topic_id: Option<Uuid>) -> SubscriptionSpec {
    SubscriptionSpec {
        name: name.to_string(),
        ordered: false,
        max_deliveries: 3,
        ttl_secs: None,
        delivery_delay_secs: None,
        topic_subscriptions: topic_id
            .map(|topic_id| {
                vec![TopicSubscription {
                    topic_id,
                    enabled: true,
                }]
            })
            .unwrap_or_default(),
    }
}

async fn publish_one(
    store: &Arc<dyn EventingStore>,
    subscription: &Subscription,
    topic_id: Uuid,
) -> (Event, Delivery) {
    let sequence = store.next_sequence().await.unwrap();
    let event = Event::new(topic_id, sequence, b"{}".to_vec(), HashMap::new(), None);
    let delivery = Delivery::new(&event, subscription, Utc::now());
    store
        .insert_event_with_deliveries(&event, std::slice::from_ref(&delivery))
        .await
        .unwrap();
    (event, delivery)
}

/// Contract suite that runs against any EventingStore implementation
async fn run_store_contract(store: Arc<dyn EventingStore>) {
    // Topic round trip through both indexes
    let topic = Topic::new("contract-topic".to_string(), Some("notes".to_string()));
    store.upsert_topic(&topic).await.unwrap();
    assert_eq!(
        store.get_topic(&topic.id).await.unwrap().unwrap().name,
        "contract-topic"
    );
    assert_eq!(
        store
            .get_topic_by_name("contract-topic")
            .await
            .unwrap()
            .unwrap()
            .id,
        topic.id
    );
    assert!(store.get_topic_by_name("absent").await.unwrap().is_none());

    // Subscription round trip and topic filtering
    let subscription =
        Subscription::from_spec(subscription_spec("contract-sub", Some(topic.id)));
    store.upsert_subscription(&subscription).await.unwrap();
    let bound = store.subscriptions_for_topic(&topic.id).await.unwrap();
    assert_eq!(bound.len(), 1);
    assert_eq!(bound[0].id, subscription.id);

    let mut disabled = subscription.clone();
    disabled.topic_subscriptions[0].enabled = false;
    store.upsert_subscription(&disabled).await.unwrap();
    assert!(store
        .subscriptions_for_topic(&topic.id)
        .await
        .unwrap()
        .is_empty());
    store.upsert_subscription(&subscription).await.unwrap();

    // Sequences are strictly increasing
    let first = store.next_sequence().await.unwrap();
    let second = store.next_sequence().await.unwrap();
    assert!(second > first);

    // Publish, lease, resolve
    let (event, delivery) = publish_one(&store, &subscription, topic.id).await;
    assert_eq!(
        store.get_event(&event.id).await.unwrap().unwrap().sequence,
        event.sequence
    );

    let now = Utc::now();
    let candidates = store
        .delivery_candidates(&subscription.id, now, false, 10)
        .await
        .unwrap();
    assert_eq!(candidates.len(), 1);

    let leased = store
        .try_lease_delivery(&delivery.id, 0, 60, false, now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(leased.state, DeliveryState::InProgress);
    assert_eq!(leased.delivery_count, 1);

    // Leased rows disappear from the candidate set
    assert!(store
        .delivery_candidates(&subscription.id, now, false, 10)
        .await
        .unwrap()
        .is_empty());

    // Stale key resolution is refused without side effects
    assert!(!store
        .resolve_delivery(
            &delivery.id,
            &Uuid::new_v4(),
            DeliveryResolution::Consumed,
            now
        )
        .await
        .unwrap());
    assert!(store
        .resolve_delivery(
            &delivery.id,
            &leased.delivery_key.unwrap(),
            DeliveryResolution::Failed(Reason::Other("done".to_string())),
            now,
        )
        .await
        .unwrap());
    let resolved = store.get_delivery(&delivery.id).await.unwrap().unwrap();
    assert_eq!(resolved.state, DeliveryState::Failed);

    // Terminal rows are immune to expiry
    assert!(!store
        .expire_delivery(&delivery.id, 1, Reason::TtlElapsed, now)
        .await
        .unwrap());

    // Deleting the subscription leaves delivery history queryable for audit
    store.delete_subscription(&subscription.id).await.unwrap();
    assert!(store
        .get_subscription(&subscription.id)
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        store
            .deliveries_for_subscription(&subscription.id)
            .await
            .unwrap()
            .len(),
        1
    );

    // Deleting the topic leaves the event untouched
    store.delete_topic(&topic.id).await.unwrap();
    assert!(store.get_event(&event.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_in_memory_store_contract() {
    run_store_contract(Arc::new(InMemoryStore::new())).await;
}

#[tokio::test]
async fn test_sled_store_contract() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let store = SledStore::new(dir.path().join("db"))?;
    run_store_contract(Arc::new(store)).await;
    Ok(())
}
