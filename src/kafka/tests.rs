use super::*;
use crate::config::{ClusterConfig, ProducerConfig, ProvisioningConfig};
use crate::registry::{TopicRegistry, TopicSchema};
use crate::schema::MessageSchema;
use crate::Error;

fn registry(topics: &[(&str, &str)]) -> TopicRegistry {
    topics
        .iter()
        .fold(TopicRegistry::builder(), |builder, (logical, physical)| {
            builder.topic(TopicSchema::new(*logical, *physical, MessageSchema::new()))
        })
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_setup_creates_missing_topics_with_defaults() {
    let cluster = MemoryCluster::new();
    let registry = registry(&[("user.events", "user.events")]);

    let report = TopicProvisioner::default()
        .setup(&registry, &cluster)
        .await
        .unwrap();

    assert_eq!(report.created, vec!["user.events".to_string()]);
    assert!(report.existing.is_empty());
    assert_eq!(
        cluster.create_calls(),
        vec![NewTopicSpec {
            name: "user.events".to_string(),
            partitions: 1,
            replication_factor: 2,
        }]
    );

    let topic = cluster.topic("user.events").unwrap();
    assert_eq!(topic.partitions, 1);
    assert_eq!(topic.replication_factor, 2);
}

#[tokio::test]
async fn test_setup_is_idempotent() {
    let cluster = MemoryCluster::new();
    let registry = registry(&[("user.events", "user.events"), ("orders", "shop.orders")]);
    let provisioner = TopicProvisioner::default();

    provisioner.setup(&registry, &cluster).await.unwrap();
    let second = provisioner.setup(&registry, &cluster).await.unwrap();

    assert!(second.created.is_empty());
    assert_eq!(second.existing, vec!["shop.orders", "user.events"]);
    assert_eq!(cluster.create_calls().len(), 2);
    assert_eq!(cluster.topic_names(), vec!["shop.orders", "user.events"]);
}

#[tokio::test]
async fn test_setup_skips_existing_and_dedupes_physical_topics() {
    let cluster = MemoryCluster::new().with_topic("shop.orders");
    let registry = registry(&[
        ("orders", "shop.orders"),
        ("user.created", "users"),
        ("user.deleted", "users"),
    ]);

    let report = TopicProvisioner::default()
        .setup(&registry, &cluster)
        .await
        .unwrap();

    assert_eq!(report.created, vec!["users"]);
    assert_eq!(report.existing, vec!["shop.orders"]);
    assert_eq!(cluster.create_calls().len(), 1);
}

#[tokio::test]
async fn test_setup_listing_failure_creates_nothing() {
    let cluster = MemoryCluster::new();
    cluster.fail_listing(true);

    let result = TopicProvisioner::default()
        .setup(&registry(&[("user.events", "user.events")]), &cluster)
        .await;

    assert!(matches!(result, Err(Error::Provisioning(_))));
    assert!(cluster.create_calls().is_empty());
    assert!(cluster.topic_names().is_empty());
}

#[tokio::test]
async fn test_setup_tolerates_concurrent_creation() {
    let cluster = MemoryCluster::new();
    cluster.race_creation_of("user.events");

    let report = TopicProvisioner::default()
        .setup(&registry(&[("user.events", "user.events")]), &cluster)
        .await
        .unwrap();

    assert!(report.created.is_empty());
    assert_eq!(report.existing, vec!["user.events"]);
    assert_eq!(cluster.create_calls().len(), 1);
}

#[tokio::test]
async fn test_provisioner_from_config() {
    let config = ProvisioningConfig {
        partitions: 6,
        replication_factor: 3,
        operation_timeout_secs: 10,
    };
    let cluster = MemoryCluster::new();

    TopicProvisioner::from_config(&config)
        .setup(&registry(&[("t", "t")]), &cluster)
        .await
        .unwrap();

    let topic = cluster.topic("t").unwrap();
    assert_eq!((topic.partitions, topic.replication_factor), (6, 3));
}

#[tokio::test]
async fn test_memory_cluster_rejects_unknown_topic() {
    let cluster = MemoryCluster::new();
    let result = cluster
        .send_batch("missing", vec![Envelope::new(&b"{}"[..])])
        .await;

    assert!(matches!(result, Err(Error::Delivery { topic, .. }) if topic == "missing"));
}

fn test_cluster_config() -> ClusterConfig {
    let brokers = std::env::var("TEST_KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string());
    let mut cluster = ClusterConfig::new(brokers.split(',').map(|s| s.trim().to_string()));
    cluster.connect_timeout_secs = 10;
    cluster
}

fn test_producer_config() -> ProducerConfig {
    ProducerConfig {
        compression: "none".to_string(),
        linger_ms: 0,
        ..ProducerConfig::default()
    }
}

#[tokio::test]
#[ignore] // Requires running Kafka
async fn test_connection_provisions_and_sends() {
    let connection = ClusterConnection::connect(
        &test_cluster_config(),
        &test_producer_config(),
        &ProvisioningConfig {
            replication_factor: 1,
            ..ProvisioningConfig::default()
        },
    )
    .await
    .unwrap();

    let topic = format!("test_{}.events", std::process::id());
    let provisioner = TopicProvisioner::new(1, 1);
    let registry = registry(&[("events", topic.as_str())]);

    provisioner.setup(&registry, &connection).await.unwrap();
    let second = provisioner.setup(&registry, &connection).await.unwrap();
    assert!(second.created.is_empty());
    assert!(connection.list_topics().await.unwrap().contains(&topic));

    connection
        .send_batch(
            &topic,
            vec![
                Envelope::new(&br#"{"n":1}"#[..]).with_key("k"),
                Envelope::new(&br#"{"n":2}"#[..]).with_header("content-type", "application/json"),
            ],
        )
        .await
        .unwrap();

    connection.close().await.unwrap();
    connection.close().await.unwrap();
    assert!(connection.is_closed());
    assert!(matches!(
        connection.send_batch(&topic, vec![]).await,
        Err(Error::Closed)
    ));
}
