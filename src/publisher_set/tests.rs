use super::*;
use crate::kafka::MemoryCluster;
use crate::registry::TopicSchema;
use crate::schema::{FieldSchema, MessageSchema};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct UserEvent {
    name: String,
    user_id: u64,
}

fn user_event(name: &str, user_id: u64) -> UserEvent {
    UserEvent {
        name: name.to_string(),
        user_id,
    }
}

fn user_registry() -> TopicRegistry {
    TopicRegistry::builder()
        .topic(TopicSchema::new(
            "user.events",
            "user.events",
            MessageSchema::new()
                .field("name", FieldSchema::string())
                .field("user_id", FieldSchema::integer()),
        ))
        .topic(TopicSchema::new(
            "orders",
            "shop.orders",
            MessageSchema::new().field("order_id", FieldSchema::string()),
        ))
        .build()
        .unwrap()
}

fn network_set(cluster: &Arc<MemoryCluster>) -> PublisherSet {
    let cluster: Arc<dyn Cluster> = cluster.clone();
    PublisherSet::build(user_registry(), Some(cluster))
}

#[tokio::test]
async fn test_disabled_set_is_transparent() {
    let publishers = PublisherSet::build(user_registry(), None);
    let users = publishers.get("user.events").unwrap();

    assert!(!publishers.is_enabled());
    assert!(matches!(users, PublisherHandle::Noop(_)));

    // No-op handles accept anything, even before setup
    users.send(&[user_event("evt1", 1)]).await.unwrap();
    users.send::<UserEvent>(&[]).await.unwrap();
    users.send(&[json!({"not": "a user"})]).await.unwrap();

    let report = publishers.setup().await.unwrap();
    assert_eq!(report, ProvisionReport::default());
    assert_eq!(publishers.state(), PublisherState::Ready);

    publishers.close().await.unwrap();
    users.send(&[user_event("evt2", 2)]).await.unwrap();
}

#[tokio::test]
async fn test_send_before_setup_is_rejected() {
    let cluster = Arc::new(MemoryCluster::new());
    let publishers = network_set(&cluster);

    assert_eq!(publishers.state(), PublisherState::Uninitialized);

    let users = publishers.typed::<UserEvent>("user.events").unwrap();
    let result = users.send(&[user_event("evt1", 1)]).await;

    assert!(matches!(result, Err(Error::NotReady)));
    assert_eq!(cluster.network_calls(), 0);
}

#[tokio::test]
async fn test_user_events_scenario() {
    let cluster = Arc::new(MemoryCluster::new());
    let publishers = network_set(&cluster);

    let report = publishers.setup().await.unwrap();
    assert_eq!(report.created, vec!["shop.orders", "user.events"]);
    assert_eq!(publishers.state(), PublisherState::Ready);

    let topic = cluster.topic("user.events").unwrap();
    assert_eq!((topic.partitions, topic.replication_factor), (1, 2));

    let second = publishers.setup().await.unwrap();
    assert!(second.created.is_empty());
    assert_eq!(cluster.create_calls().len(), 2);

    let users = publishers.typed::<UserEvent>("user.events").unwrap();
    users.send(&[user_event("evt1", 7)]).await.unwrap();

    let delivered = cluster.messages("user.events");
    assert_eq!(delivered.len(), 1);
    let decoded: UserEvent = publishers
        .registry()
        .get("user.events")
        .unwrap()
        .decode(&delivered[0].value)
        .unwrap();
    assert_eq!(decoded, user_event("evt1", 7));
}

#[tokio::test]
async fn test_invalid_message_rejects_whole_batch() {
    let cluster = Arc::new(MemoryCluster::new());
    let publishers = network_set(&cluster);
    publishers.setup().await.unwrap();

    let users = publishers.get("user.events").unwrap();
    let batch = vec![
        json!({"name": "a", "user_id": 1}),
        json!({"name": "b", "user_id": "two"}),
        json!({"name": "c", "user_id": 3}),
    ];

    match users.send(&batch).await {
        Err(Error::Validation(failures)) => assert_eq!(failures.failed_indexes(), vec![1]),
        other => panic!("expected validation error, got {:?}", other),
    }
    assert!(cluster.messages("user.events").is_empty());

    // The caller can fix the batch and retry
    let fixed = vec![
        json!({"name": "a", "user_id": 1}),
        json!({"name": "b", "user_id": 2}),
        json!({"name": "c", "user_id": 3}),
    ];
    users.send(&fixed).await.unwrap();
    assert_eq!(cluster.messages("user.events").len(), 3);
}

#[tokio::test]
async fn test_batch_order_is_preserved() {
    let cluster = Arc::new(MemoryCluster::new());
    let publishers = network_set(&cluster);
    publishers.setup().await.unwrap();

    let batch: Vec<UserEvent> = (0..50).map(|i| user_event(&format!("evt{}", i), i)).collect();
    publishers
        .typed::<UserEvent>("user.events")
        .unwrap()
        .send(&batch)
        .await
        .unwrap();

    let topic = publishers.registry().get("user.events").unwrap().clone();
    let received: Vec<UserEvent> = cluster
        .messages("user.events")
        .iter()
        .map(|envelope| topic.decode(&envelope.value).unwrap())
        .collect();
    assert_eq!(received, batch);
}

#[tokio::test]
async fn test_empty_batch_sends_nothing() {
    let cluster = Arc::new(MemoryCluster::new());
    let publishers = network_set(&cluster);
    publishers.setup().await.unwrap();
    let calls = cluster.network_calls();

    publishers
        .typed::<UserEvent>("user.events")
        .unwrap()
        .send(&[])
        .await
        .unwrap();

    assert_eq!(cluster.network_calls(), calls);
}

#[tokio::test]
async fn test_delivery_error_is_returned() {
    let cluster = Arc::new(MemoryCluster::new());
    let publishers = network_set(&cluster);
    publishers.setup().await.unwrap();
    cluster.fail_delivery(true);

    let users = publishers.typed::<UserEvent>("user.events").unwrap();
    let err = users.send(&[user_event("evt1", 1)]).await.unwrap_err();

    assert!(matches!(&err, Error::Delivery { topic, .. } if topic == "user.events"));
    assert!(!err.is_fatal());
    assert_eq!(publishers.state(), PublisherState::Ready);

    cluster.fail_delivery(false);
    users.send(&[user_event("evt1", 1)]).await.unwrap();
}

#[tokio::test]
async fn test_provisioning_failure_closes_set() {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.fail_listing(true);
    let publishers = network_set(&cluster);

    let err = publishers.setup().await.unwrap_err();
    assert!(matches!(err, Error::Provisioning(_)));
    assert!(err.is_fatal());
    assert_eq!(publishers.state(), PublisherState::Closed);

    let users = publishers.typed::<UserEvent>("user.events").unwrap();
    assert!(matches!(
        users.send(&[user_event("evt1", 1)]).await,
        Err(Error::Closed)
    ));
    assert!(matches!(publishers.setup().await, Err(Error::Closed)));
}

#[tokio::test]
async fn test_setup_timeout_closes_set() {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.delay_requests(Duration::from_millis(500));
    let publishers = network_set(&cluster);

    let result = publishers.setup_with_timeout(Duration::from_millis(20)).await;

    assert!(matches!(result, Err(Error::Timeout { .. })));
    assert_eq!(publishers.state(), PublisherState::Closed);
}

#[tokio::test]
async fn test_close_during_setup_waits_and_fails_setup() {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.delay_requests(Duration::from_millis(200));
    let publishers = Arc::new(network_set(&cluster));

    let setup = {
        let publishers = publishers.clone();
        tokio::spawn(async move { publishers.setup().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    publishers.close().await.unwrap();

    // Provisioning finished before the cluster was released
    assert_eq!(cluster.create_calls().len(), 2);
    assert_eq!(cluster.close_calls(), 1);
    assert!(matches!(setup.await.unwrap(), Err(Error::Closed)));
    assert_eq!(publishers.state(), PublisherState::Closed);

    let users = publishers.typed::<UserEvent>("user.events").unwrap();
    assert!(matches!(
        users.send(&[user_event("evt1", 1)]).await,
        Err(Error::Closed)
    ));
}

#[tokio::test]
async fn test_close_waits_for_in_flight_sends() {
    let cluster = Arc::new(MemoryCluster::new());
    let publishers = network_set(&cluster);
    publishers.setup().await.unwrap();
    cluster.delay_requests(Duration::from_millis(200));

    let users = publishers.typed::<UserEvent>("user.events").unwrap();
    let in_flight = {
        let users = users.clone();
        tokio::spawn(async move { users.send(&[user_event("evt1", 1)]).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    publishers.close().await.unwrap();

    assert!(in_flight.await.unwrap().is_ok());
    assert_eq!(cluster.messages("user.events").len(), 1);
    assert!(cluster.is_closed());
    assert_eq!(publishers.state(), PublisherState::Closed);
    assert!(matches!(
        users.send(&[user_event("evt2", 2)]).await,
        Err(Error::Closed)
    ));

    publishers.close().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_sends_across_topics() {
    let cluster = Arc::new(MemoryCluster::new());
    let publishers = network_set(&cluster);
    publishers.setup().await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..10u64 {
        let users = publishers.typed::<UserEvent>("user.events").unwrap();
        let orders = publishers.publisher("orders").unwrap();
        tasks.push(tokio::spawn(async move {
            users.send(&[user_event("evt", i)]).await?;
            orders
                .send(&[json!({"order_id": format!("o{}", i)})])
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(cluster.messages("user.events").len(), 10);
    assert_eq!(cluster.messages("shop.orders").len(), 10);
}

#[tokio::test]
async fn test_unknown_logical_topic() {
    let publishers = PublisherSet::build(user_registry(), None);

    assert!(publishers.get("missing").is_none());
    assert!(matches!(
        publishers.typed::<UserEvent>("missing"),
        Err(Error::Registry(_))
    ));

    let names: Vec<&str> = publishers.iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["orders", "user.events"]);
    assert_eq!(publishers.publishers().len(), 2);
}
