//! In-process cluster for tests and local development.
//!
//! [`MemoryCluster`] implements the same admin and producer seams as
//! [`ClusterConnection`](super::ClusterConnection), records every call, and
//! can be told to fail.

use super::connection::Cluster;
use super::producer::{Envelope, MessageProducer};
use super::provisioner::{ClusterAdmin, CreateOutcome, NewTopicSpec};
use crate::{Error, Result};
use async_trait::async_trait;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryTopic {
    pub partitions: i32,
    pub replication_factor: i32,
    pub messages: Vec<Envelope>,
}

#[derive(Debug, Default)]
struct State {
    topics: BTreeMap<String, MemoryTopic>,
    create_calls: Vec<NewTopicSpec>,
    list_calls: usize,
    send_calls: usize,
    close_calls: usize,
    closed: bool,
    fail_listing: bool,
    fail_delivery: bool,
    racing_creators: HashSet<String>,
    request_delay: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: Mutex<State>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a topic that exists before provisioning runs.
    pub fn with_topic(self, name: &str) -> Self {
        self.lock().topics.insert(name.to_string(), empty_topic(1, 1));
        self
    }

    /// Makes `list_topics` fail.
    pub fn fail_listing(&self, fail: bool) {
        self.lock().fail_listing = fail;
    }

    /// Makes every produce request fail as if the broker never acknowledged it.
    pub fn fail_delivery(&self, fail: bool) {
        self.lock().fail_delivery = fail;
    }

    /// Simulates another process creating `name` between list and create.
    pub fn race_creation_of(&self, name: &str) {
        self.lock().racing_creators.insert(name.to_string());
    }

    /// Holds every topic listing and `send_batch` for `delay`.
    pub fn delay_requests(&self, delay: Duration) {
        self.lock().request_delay = Some(delay);
    }

    pub fn topic(&self, name: &str) -> Option<MemoryTopic> {
        self.lock().topics.get(name).cloned()
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.lock().topics.keys().cloned().collect()
    }

    /// Messages stored on `name`, in append order.
    pub fn messages(&self, name: &str) -> Vec<Envelope> {
        self.topic(name).map(|t| t.messages).unwrap_or_default()
    }

    pub fn create_calls(&self) -> Vec<NewTopicSpec> {
        self.lock().create_calls.clone()
    }

    /// Total admin and produce requests received.
    pub fn network_calls(&self) -> usize {
        let state = self.lock();
        state.list_calls + state.create_calls.len() + state.send_calls
    }

    pub fn close_calls(&self) -> usize {
        self.lock().close_calls
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn empty_topic(partitions: i32, replication_factor: i32) -> MemoryTopic {
    MemoryTopic {
        partitions,
        replication_factor,
        messages: Vec::new(),
    }
}

#[async_trait]
impl ClusterAdmin for MemoryCluster {
    async fn list_topics(&self) -> Result<HashSet<String>> {
        let delay = {
            let mut state = self.lock();
            state.list_calls += 1;
            state.request_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.lock();
        if state.fail_listing {
            return Err(Error::Kafka(KafkaError::MetadataFetch(
                RDKafkaErrorCode::BrokerTransportFailure,
            )));
        }
        Ok(state.topics.keys().cloned().collect())
    }

    async fn create_topic(&self, topic: &NewTopicSpec) -> Result<CreateOutcome> {
        let mut state = self.lock();
        state.create_calls.push(topic.clone());

        if state.racing_creators.remove(&topic.name) {
            state.topics.insert(
                topic.name.clone(),
                empty_topic(topic.partitions, topic.replication_factor),
            );
        }
        if state.topics.contains_key(&topic.name) {
            return Ok(CreateOutcome::AlreadyExists);
        }

        state.topics.insert(
            topic.name.clone(),
            empty_topic(topic.partitions, topic.replication_factor),
        );
        Ok(CreateOutcome::Created)
    }
}

#[async_trait]
impl MessageProducer for MemoryCluster {
    async fn send_batch(&self, topic: &str, envelopes: Vec<Envelope>) -> Result<()> {
        let delay = {
            let mut state = self.lock();
            state.send_calls += 1;
            state.request_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        let delivery_error = |code| Error::Delivery {
            topic: topic.to_string(),
            source: KafkaError::MessageProduction(code),
        };

        if state.closed {
            return Err(Error::Closed);
        }
        if state.fail_delivery {
            return Err(delivery_error(RDKafkaErrorCode::MessageTimedOut));
        }
        match state.topics.get_mut(topic) {
            Some(log) => {
                log.messages.extend(envelopes);
                Ok(())
            }
            None => Err(delivery_error(RDKafkaErrorCode::UnknownTopicOrPartition)),
        }
    }
}

#[async_trait]
impl Cluster for MemoryCluster {
    async fn close(&self) -> Result<()> {
        let mut state = self.lock();
        state.close_calls += 1;
        state.closed = true;
        Ok(())
    }
}
