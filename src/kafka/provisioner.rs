use crate::config::ProvisioningConfig;
use crate::registry::TopicRegistry;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, error, info, instrument};

pub const DEFAULT_PARTITIONS: i32 = 1;
pub const DEFAULT_REPLICATION_FACTOR: i32 = 2;

/// A create-topic request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTopicSpec {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// Someone else created the topic first.
    AlreadyExists,
}

/// Administrative operations used during provisioning.
#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    async fn list_topics(&self) -> Result<HashSet<String>>;

    async fn create_topic(&self, topic: &NewTopicSpec) -> Result<CreateOutcome>;
}

/// Outcome of one provisioning run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Topics this run created, sorted.
    pub created: Vec<String>,
    /// Registered topics that were already on the cluster, sorted.
    pub existing: Vec<String>,
}

/// Makes sure every registered physical topic exists on the cluster.
#[derive(Debug, Clone)]
pub struct TopicProvisioner {
    partitions: i32,
    replication_factor: i32,
}

impl Default for TopicProvisioner {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITIONS, DEFAULT_REPLICATION_FACTOR)
    }
}

impl TopicProvisioner {
    pub fn new(partitions: i32, replication_factor: i32) -> Self {
        Self {
            partitions,
            replication_factor,
        }
    }

    pub fn from_config(config: &ProvisioningConfig) -> Self {
        Self::new(config.partitions, config.replication_factor)
    }

    /// Creates the registered topics missing from the cluster.
    ///
    /// Fails without creating anything if the topic listing fails. Running it
    /// again with the same registry makes no create calls.
    #[instrument(skip_all, fields(topics = registry.len()))]
    pub async fn setup<A>(&self, registry: &TopicRegistry, admin: &A) -> Result<ProvisionReport>
    where
        A: ClusterAdmin + ?Sized,
    {
        let server_topics = admin.list_topics().await.map_err(|e| {
            error!("Failed to list topics: {}", e);
            Error::Provisioning(format!("failed to list topics: {}", e))
        })?;

        let mut report = ProvisionReport::default();

        for topic in registry.physical_topics() {
            if server_topics.contains(topic) {
                debug!("Topic '{}' already exists", topic);
                report.existing.push(topic.to_string());
                continue;
            }

            let spec = NewTopicSpec {
                name: topic.to_string(),
                partitions: self.partitions,
                replication_factor: self.replication_factor,
            };

            match admin.create_topic(&spec).await {
                Ok(CreateOutcome::Created) => {
                    info!(
                        service = "kafka",
                        topic = %spec.name,
                        partitions = spec.partitions,
                        replication_factor = spec.replication_factor,
                        "Created topic '{}'",
                        spec.name
                    );
                    report.created.push(spec.name);
                }
                Ok(CreateOutcome::AlreadyExists) => {
                    debug!("Topic '{}' was created concurrently", spec.name);
                    report.existing.push(spec.name);
                }
                Err(e) => {
                    error!("Failed to create topic '{}': {}", spec.name, e);
                    return Err(Error::Provisioning(format!(
                        "failed to create topic '{}': {}",
                        spec.name, e
                    )));
                }
            }
        }

        info!(
            service = "kafka",
            created = report.created.len(),
            existing = report.existing.len(),
            "All topics have been created"
        );

        Ok(report)
    }
}
