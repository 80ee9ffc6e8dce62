use super::producer::{Envelope, KafkaProducer, MessageProducer};
use super::provisioner::{ClusterAdmin, CreateOutcome, NewTopicSpec};
use crate::config::{ClusterConfig, ProducerConfig, ProvisioningConfig};
use crate::{Error, Result};
use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::ClientConfig;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// A broker cluster as seen by the publishing core: admin operations, the
/// shared producer, and a one-shot release.
#[async_trait]
pub trait Cluster: ClusterAdmin + MessageProducer {
    /// Waits for in-flight messages and releases the connection.
    ///
    /// Calling it again is a no-op.
    async fn close(&self) -> Result<()>;
}

struct KafkaClients {
    admin: AdminClient<DefaultClientContext>,
    producer: KafkaProducer,
}

/// Network handle to a Kafka cluster.
///
/// Owns the admin client and the single producer shared by every publisher.
/// The clients are released by [`Cluster::close`] or on drop.
pub struct ClusterConnection {
    clients: RwLock<Option<Arc<KafkaClients>>>,
    brokers: Vec<String>,
    metadata_timeout: Duration,
    operation_timeout: Duration,
    close_timeout: Duration,
}

impl ClusterConnection {
    /// Opens the admin and producer clients and checks that the brokers
    /// answer a metadata request, which also exercises authentication.
    #[instrument(skip_all, fields(brokers = ?cluster.brokers))]
    pub async fn connect(
        cluster: &ClusterConfig,
        producer: &ProducerConfig,
        provisioning: &ProvisioningConfig,
    ) -> Result<Self> {
        let brokers = cluster.bootstrap_servers()?;
        let client_config = client_config(cluster, &brokers);

        let admin: AdminClient<DefaultClientContext> = client_config
            .create()
            .map_err(|e| Error::Connection(format!("failed to create admin client: {}", e)))?;
        let producer = KafkaProducer::new(&client_config, producer)?;
        let clients = Arc::new(KafkaClients { admin, producer });

        let (broker_count, _) = fetch_metadata(clients.clone(), cluster.connect_timeout())
            .await
            .map_err(|e| {
                Error::Connection(format!(
                    "brokers unreachable or authentication failed: {}",
                    e
                ))
            })?;

        info!(
            brokers = broker_count,
            authenticated = cluster.auth.is_some(),
            "Connected to Kafka cluster"
        );

        Ok(Self {
            clients: RwLock::new(Some(clients)),
            brokers,
            metadata_timeout: cluster.connect_timeout(),
            operation_timeout: provisioning.operation_timeout(),
            close_timeout: cluster.close_timeout(),
        })
    }

    pub fn brokers(&self) -> &[String] {
        &self.brokers
    }

    pub fn is_closed(&self) -> bool {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Messages handed to librdkafka but not yet acknowledged.
    pub fn in_flight_count(&self) -> i32 {
        self.clients()
            .map(|c| c.producer.in_flight_count())
            .unwrap_or(0)
    }

    fn clients(&self) -> Result<Arc<KafkaClients>> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::Closed)
    }
}

/// Returns the broker count and the names of all topics.
async fn fetch_metadata(
    clients: Arc<KafkaClients>,
    timeout: Duration,
) -> Result<(usize, HashSet<String>)> {
    // fetch_metadata blocks the calling thread
    let metadata = tokio::task::spawn_blocking(move || {
        clients.admin.inner().fetch_metadata(None, timeout)
    })
    .await
    .map_err(|e| Error::Connection(format!("metadata task failed: {}", e)))??;

    let topics = metadata
        .topics()
        .iter()
        .map(|topic| topic.name().to_string())
        .collect();

    Ok((metadata.brokers().len(), topics))
}

/// Connection-level librdkafka settings shared by the admin client and the
/// producer.
fn client_config(cluster: &ClusterConfig, brokers: &[String]) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", brokers.join(","))
        .set("client.id", &cluster.client_id);

    match &cluster.auth {
        Some(auth) => {
            client_config
                .set("security.protocol", "SASL_SSL")
                .set("sasl.mechanisms", "SCRAM-SHA-256")
                .set("sasl.username", &auth.username)
                .set("sasl.password", &auth.password);
        }
        None => {
            client_config.set("security.protocol", "PLAINTEXT");
        }
    }

    client_config
}

#[async_trait]
impl ClusterAdmin for ClusterConnection {
    async fn list_topics(&self) -> Result<HashSet<String>> {
        let (_, topics) = fetch_metadata(self.clients()?, self.metadata_timeout).await?;
        Ok(topics)
    }

    async fn create_topic(&self, topic: &NewTopicSpec) -> Result<CreateOutcome> {
        let clients = self.clients()?;
        let new_topic = NewTopic::new(
            &topic.name,
            topic.partitions,
            TopicReplication::Fixed(topic.replication_factor),
        );
        let opts = AdminOptions::new().operation_timeout(Some(self.operation_timeout));

        let results = clients.admin.create_topics(&[new_topic], &opts).await?;

        for result in results {
            match result {
                Ok(name) => debug!("Create request for '{}' acknowledged", name),
                Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    return Ok(CreateOutcome::AlreadyExists)
                }
                Err((_, code)) => return Err(Error::Kafka(KafkaError::AdminOp(code))),
            }
        }

        Ok(CreateOutcome::Created)
    }
}

#[async_trait]
impl MessageProducer for ClusterConnection {
    async fn send_batch(&self, topic: &str, envelopes: Vec<Envelope>) -> Result<()> {
        let clients = self.clients()?;
        clients.producer.send_batch(topic, envelopes).await
    }
}

#[async_trait]
impl Cluster for ClusterConnection {
    #[instrument(skip(self))]
    async fn close(&self) -> Result<()> {
        let taken = self
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(clients) = taken else {
            debug!("Connection already closed");
            return Ok(());
        };

        let timeout = self.close_timeout;
        let flushed = tokio::task::spawn_blocking(move || {
            let result = clients.producer.flush(timeout);
            drop(clients);
            result
        })
        .await
        .map_err(|e| Error::Connection(format!("close task failed: {}", e)))?;

        match flushed {
            Ok(()) => info!("Kafka connection closed"),
            Err(e) => {
                warn!("Kafka connection closed with undelivered messages: {}", e);
                return Err(e);
            }
        }

        Ok(())
    }
}

impl Drop for ClusterConnection {
    fn drop(&mut self) {
        let open = self
            .clients
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if open.is_some() {
            warn!("Kafka connection dropped without close; queued messages may be lost");
        }
    }
}
