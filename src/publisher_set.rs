//! The publisher set handed to application code.
//!
//! # Example
//!
//! ```rust,no_run
//! use event_bridge::{Config, PublisherSet};
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct UserEvent {
//!     id: String,
//! }
//!
//! # async fn example() -> event_bridge::Result<()> {
//! let config = Config::from_file("event-bridge.toml")?;
//! let publishers = PublisherSet::connect(&config).await?;
//! publishers.setup().await?;
//!
//! let users = publishers.typed::<UserEvent>("user.events")?;
//! users.send(&[UserEvent { id: "u1".to_string() }]).await?;
//!
//! publishers.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::kafka::{Cluster, ClusterConnection, ProvisionReport, TopicProvisioner};
use crate::publisher::{
    Lifecycle, NetworkPublisher, NoopPublisher, PublisherHandle, PublisherState, TypedPublisher,
};
use crate::registry::TopicRegistry;
use crate::{Config, Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// One publisher handle per logical topic, plus the readiness state they
/// share.
///
/// Network sends are accepted only between a successful [`setup`](Self::setup)
/// and [`close`](Self::close).
pub struct PublisherSet {
    registry: TopicRegistry,
    cluster: Option<Arc<dyn Cluster>>,
    provisioner: TopicProvisioner,
    lifecycle: Arc<Lifecycle>,
    publishers: BTreeMap<String, PublisherHandle>,
}

impl PublisherSet {
    /// Builds one handle per registered topic.
    ///
    /// Without a cluster every handle is a no-op.
    pub fn build(registry: TopicRegistry, cluster: Option<Arc<dyn Cluster>>) -> Self {
        let lifecycle = Arc::new(Lifecycle::new());

        let publishers = registry
            .iter()
            .map(|topic| {
                let handle = match &cluster {
                    Some(cluster) => PublisherHandle::Network(NetworkPublisher::new(
                        topic.clone(),
                        cluster.clone(),
                        lifecycle.clone(),
                    )),
                    None => PublisherHandle::Noop(NoopPublisher::new(topic.clone())),
                };
                (topic.logical_name.clone(), handle)
            })
            .collect();

        Self {
            registry,
            cluster,
            provisioner: TopicProvisioner::default(),
            lifecycle,
            publishers,
        }
    }

    /// Builds the registry from `config`, connects when a cluster is
    /// configured, and builds the set. Call [`setup`](Self::setup) next.
    pub async fn connect(config: &Config) -> Result<Self> {
        let registry = TopicRegistry::from_config(&config.topics)?;

        let cluster: Option<Arc<dyn Cluster>> = match &config.cluster {
            Some(cluster) => Some(Arc::new(
                ClusterConnection::connect(cluster, &config.producer, &config.provisioning).await?,
            )),
            None => {
                info!("No Kafka cluster configured; publishing is disabled");
                None
            }
        };

        Ok(Self::build(registry, cluster)
            .with_provisioner(TopicProvisioner::from_config(&config.provisioning)))
    }

    pub fn with_provisioner(mut self, provisioner: TopicProvisioner) -> Self {
        self.provisioner = provisioner;
        self
    }

    /// Provisions topics and makes the set ready.
    ///
    /// Runs once; calling it again after success returns an empty report. A
    /// failed or cancelled setup closes the set for good, and so does a
    /// [`close`](Self::close) issued while it runs, which then waits for it.
    #[instrument(skip(self))]
    pub async fn setup(&self) -> Result<ProvisionReport> {
        // Keeps close() from releasing the cluster while topics are created
        let _running = self.lifecycle.enter().await;

        if let Err(state) = self
            .lifecycle
            .transition(PublisherState::Uninitialized, PublisherState::Provisioning)
        {
            return match state {
                PublisherState::Ready => Ok(ProvisionReport::default()),
                PublisherState::Closed => Err(Error::Closed),
                _ => Err(Error::NotReady),
            };
        }

        let mut guard = ProvisioningGuard {
            lifecycle: &self.lifecycle,
            armed: true,
        };

        let report = match &self.cluster {
            Some(cluster) => match self.provisioner.setup(&self.registry, cluster.as_ref()).await {
                Ok(report) => report,
                Err(e) => {
                    error!("Provisioning failed; publishers will reject all sends: {}", e);
                    return Err(e);
                }
            },
            None => ProvisionReport::default(),
        };

        guard.armed = false;
        if let Err(state) = self
            .lifecycle
            .transition(PublisherState::Provisioning, PublisherState::Ready)
        {
            warn!(?state, "Publishers were closed during setup");
            return Err(Error::Closed);
        }
        info!(topics = self.publishers.len(), enabled = self.is_enabled(), "Publishers ready");
        Ok(report)
    }

    /// Like [`setup`](Self::setup) with a deadline. Timing out closes the set.
    pub async fn setup_with_timeout(&self, timeout: Duration) -> Result<ProvisionReport> {
        tokio::time::timeout(timeout, self.setup())
            .await
            .map_err(|_| Error::Timeout {
                message: format!("topic provisioning did not complete within {:?}", timeout),
            })?
    }

    /// Rejects new sends, waits for in-flight ones, then closes the cluster
    /// connection. Safe to call more than once.
    #[instrument(skip(self))]
    pub async fn close(&self) -> Result<()> {
        let previous = self.lifecycle.close();
        self.lifecycle.drain().await;

        if let Some(cluster) = &self.cluster {
            cluster.close().await?;
        }

        if previous != PublisherState::Closed {
            info!("Publishers closed");
        }
        Ok(())
    }

    pub fn state(&self) -> PublisherState {
        self.lifecycle.state()
    }

    /// Whether sends reach a cluster.
    pub fn is_enabled(&self) -> bool {
        self.cluster.is_some()
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    pub fn get(&self, logical_name: &str) -> Option<&PublisherHandle> {
        self.publishers.get(logical_name)
    }

    pub fn publisher(&self, logical_name: &str) -> Result<PublisherHandle> {
        self.get(logical_name)
            .cloned()
            .ok_or_else(|| Error::Registry(format!("unknown logical topic '{}'", logical_name)))
    }

    pub fn typed<T: Serialize>(&self, logical_name: &str) -> Result<TypedPublisher<T>> {
        self.publisher(logical_name).map(TypedPublisher::new)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PublisherHandle)> {
        self.publishers.iter().map(|(name, handle)| (name.as_str(), handle))
    }

    /// Clones every handle into a map keyed by logical name.
    pub fn publishers(&self) -> BTreeMap<String, PublisherHandle> {
        self.publishers.clone()
    }
}

/// Closes the set if setup fails or its future is dropped midway.
struct ProvisioningGuard<'a> {
    lifecycle: &'a Lifecycle,
    armed: bool,
}

impl Drop for ProvisioningGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("Setup did not complete; closing publishers");
            self.lifecycle.close();
        }
    }
}

#[cfg(test)]
mod tests;
