//! Walks the publishing lifecycle end to end.
//!
//! With a config file argument it connects to the configured cluster (or
//! runs with no-op publishers if the file has no `[cluster]` section):
//!
//! ```text
//! cargo run --example publish_events -- event-bridge.toml
//! ```
//!
//! Without arguments it runs against an in-memory cluster.

use event_bridge::kafka::{Cluster, MemoryCluster};
use event_bridge::logging::init_logging;
use event_bridge::{Config, FieldSchema, MessageSchema, PublisherSet, TopicRegistry, TopicSchema};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Serialize)]
struct UserEvent {
    name: String,
    user_id: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(false, true);

    let memory = Arc::new(MemoryCluster::new());
    let publishers = match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from {}", path);
            let config = Config::from_file(&path)?;
            PublisherSet::connect(&config).await?
        }
        None => {
            let registry = TopicRegistry::builder()
                .topic(TopicSchema::new(
                    "user.events",
                    "user.events",
                    MessageSchema::new()
                        .field("name", FieldSchema::string())
                        .field("user_id", FieldSchema::integer()),
                ))
                .build()?;
            let cluster: Arc<dyn Cluster> = memory.clone();
            PublisherSet::build(registry, Some(cluster))
        }
    };

    let report = publishers.setup_with_timeout(Duration::from_secs(60)).await?;
    info!(created = ?report.created, existing = ?report.existing, "Setup finished");

    let users = publishers.typed::<UserEvent>("user.events")?;
    let events: Vec<UserEvent> = (1..=3)
        .map(|i| UserEvent {
            name: format!("evt{}", i),
            user_id: i,
        })
        .collect();
    users.send(&events).await?;
    info!(count = events.len(), "Sent user events");

    publishers.close().await?;

    for envelope in memory.messages("user.events") {
        info!(payload = %String::from_utf8_lossy(&envelope.value), "Stored message");
    }

    Ok(())
}
