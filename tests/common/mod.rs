#![allow(dead_code)]

use event_bridge::config::{ClusterConfig, Config, ProducerConfig, ProvisioningConfig, TopicConfig};
use event_bridge::schema::{FieldSchema, MessageSchema};
use std::collections::BTreeMap;
use std::env;

pub fn user_event_schema() -> MessageSchema {
    MessageSchema::new()
        .field("name", FieldSchema::string())
        .field("user_id", FieldSchema::integer())
}

/// Get test configuration from environment variables
pub fn get_test_config() -> Config {
    let brokers: Vec<String> = env::var("TEST_KAFKA_BROKERS")
        .unwrap_or_else(|_| "localhost:9092".to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .collect();

    let mut cluster = ClusterConfig::new(brokers);
    if let (Ok(username), Ok(password)) =
        (env::var("TEST_KAFKA_USERNAME"), env::var("TEST_KAFKA_PASSWORD"))
    {
        cluster = cluster.with_auth(username, password);
    }

    let producer = ProducerConfig {
        compression: "none".to_string(), // No compression for tests
        linger_ms: 0,                    // Immediate sending for tests
        ..ProducerConfig::default()
    };

    let provisioning = ProvisioningConfig {
        // Single-broker test clusters cannot hold two replicas
        replication_factor: env::var("TEST_KAFKA_REPLICATION")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1),
        ..ProvisioningConfig::default()
    };

    let mut topics = BTreeMap::new();
    topics.insert(
        "user.events".to_string(),
        TopicConfig {
            topic: format!("test_{}.user.events", std::process::id()),
            schema: Some(user_event_schema()),
            key: Default::default(),
        },
    );

    Config {
        cluster: Some(cluster),
        producer,
        provisioning,
        topics,
    }
}
