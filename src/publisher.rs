//! Per-topic publishers.
//!
//! Every logical topic gets a [`PublisherHandle`]. A handle is either a
//! [`NetworkPublisher`], which validates, encodes and forwards batches to the
//! shared producer, or a [`NoopPublisher`] used when no cluster is configured.
//! Both expose the same `send`.

use crate::error::{MessageFailure, ValidationFailures, Violation};
use crate::kafka::{Cluster, Envelope};
use crate::registry::TopicSchema;
use crate::{Error, Result};
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, instrument, warn};

pub const CONTENT_TYPE_HEADER: &str = "content-type";
pub const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Uninitialized,
    Provisioning,
    Ready,
    Closed,
}

impl PublisherState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PublisherState::Uninitialized,
            1 => PublisherState::Provisioning,
            2 => PublisherState::Ready,
            _ => PublisherState::Closed,
        }
    }
}

/// Shared readiness state of a publisher set.
///
/// Sends and setup hold a read guard on `gate` while they run so that closing
/// can wait for them by taking the write side.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: AtomicU8,
    gate: RwLock<()>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(PublisherState::Uninitialized as u8),
            gate: RwLock::new(()),
        }
    }

    pub(crate) fn state(&self) -> PublisherState {
        PublisherState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves from `from` to `to`, returning the actual state on mismatch.
    pub(crate) fn transition(
        &self,
        from: PublisherState,
        to: PublisherState,
    ) -> std::result::Result<(), PublisherState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(PublisherState::from_u8)
    }

    /// Marks the set closed and returns the previous state.
    pub(crate) fn close(&self) -> PublisherState {
        PublisherState::from_u8(
            self.state
                .swap(PublisherState::Closed as u8, Ordering::AcqRel),
        )
    }

    /// Holds off [`drain`](Self::drain) until the guard is dropped.
    pub(crate) async fn enter(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().await
    }

    /// Admits a send if the set is ready.
    async fn admit(&self) -> Result<RwLockReadGuard<'_, ()>> {
        let guard = self.enter().await;
        match self.state() {
            PublisherState::Ready => Ok(guard),
            PublisherState::Uninitialized | PublisherState::Provisioning => Err(Error::NotReady),
            PublisherState::Closed => Err(Error::Closed),
        }
    }

    /// Waits until every admitted send has finished.
    pub(crate) async fn drain(&self) {
        let _exclusive = self.gate.write().await;
    }
}

/// Publisher bound to a cluster.
#[derive(Clone)]
pub struct NetworkPublisher {
    topic: Arc<TopicSchema>,
    cluster: Arc<dyn Cluster>,
    lifecycle: Arc<Lifecycle>,
}

impl NetworkPublisher {
    pub(crate) fn new(
        topic: Arc<TopicSchema>,
        cluster: Arc<dyn Cluster>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            topic,
            cluster,
            lifecycle,
        }
    }

    #[instrument(skip_all, fields(topic = %self.topic.logical_name, count = messages.len()))]
    pub async fn send<T: Serialize>(&self, messages: &[T]) -> Result<()> {
        let _admission = self.lifecycle.admit().await?;

        let envelopes = encode_batch(&self.topic, messages)?;
        if envelopes.is_empty() {
            return Ok(());
        }

        self.cluster
            .send_batch(&self.topic.physical_topic, envelopes)
            .await?;
        debug!("Batch delivered to '{}'", self.topic.physical_topic);
        Ok(())
    }
}

impl fmt::Debug for NetworkPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkPublisher")
            .field("topic", &self.topic.logical_name)
            .field("physical_topic", &self.topic.physical_topic)
            .finish()
    }
}

/// Publisher used when publishing is disabled. Every send succeeds.
#[derive(Debug, Clone)]
pub struct NoopPublisher {
    topic: Arc<TopicSchema>,
}

impl NoopPublisher {
    pub(crate) fn new(topic: Arc<TopicSchema>) -> Self {
        Self { topic }
    }

    pub async fn send<T: Serialize>(&self, _messages: &[T]) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum PublisherHandle {
    Network(NetworkPublisher),
    Noop(NoopPublisher),
}

impl PublisherHandle {
    /// Validates and sends `messages` as one batch.
    ///
    /// If any message is invalid nothing is sent. A batch cancelled or failed
    /// after submission may still have been delivered.
    pub async fn send<T: Serialize>(&self, messages: &[T]) -> Result<()> {
        match self {
            PublisherHandle::Network(publisher) => publisher.send(messages).await,
            PublisherHandle::Noop(publisher) => publisher.send(messages).await,
        }
    }

    /// Like [`send`](Self::send) with a deadline.
    pub async fn send_with_timeout<T: Serialize>(
        &self,
        messages: &[T],
        timeout: Duration,
    ) -> Result<()> {
        tokio::time::timeout(timeout, self.send(messages))
            .await
            .map_err(|_| Error::Timeout {
                message: format!(
                    "send to '{}' did not complete within {:?}",
                    self.logical_name(),
                    timeout
                ),
            })?
    }

    pub fn topic(&self) -> &TopicSchema {
        match self {
            PublisherHandle::Network(publisher) => &publisher.topic,
            PublisherHandle::Noop(publisher) => &publisher.topic,
        }
    }

    pub fn logical_name(&self) -> &str {
        &self.topic().logical_name
    }

    pub fn physical_topic(&self) -> &str {
        &self.topic().physical_topic
    }
}

/// A [`PublisherHandle`] bound to one message type.
pub struct TypedPublisher<T> {
    handle: PublisherHandle,
    _message: PhantomData<fn(&T)>,
}

impl<T: Serialize> TypedPublisher<T> {
    pub(crate) fn new(handle: PublisherHandle) -> Self {
        Self {
            handle,
            _message: PhantomData,
        }
    }

    pub async fn send(&self, messages: &[T]) -> Result<()> {
        self.handle.send(messages).await
    }

    pub async fn send_with_timeout(&self, messages: &[T], timeout: Duration) -> Result<()> {
        self.handle.send_with_timeout(messages, timeout).await
    }

    pub fn handle(&self) -> &PublisherHandle {
        &self.handle
    }
}

impl<T> Clone for TypedPublisher<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            _message: PhantomData,
        }
    }
}

impl<T> fmt::Debug for TypedPublisher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypedPublisher").field(&self.handle).finish()
    }
}

/// Validates the whole batch, then encodes it. Any invalid message rejects
/// the batch.
pub(crate) fn encode_batch<T: Serialize>(
    topic: &TopicSchema,
    messages: &[T],
) -> Result<Vec<Envelope>> {
    let mut values = Vec::with_capacity(messages.len());
    let mut failures = Vec::new();

    for (index, message) in messages.iter().enumerate() {
        let violations = match serde_json::to_value(message) {
            Ok(value) => {
                let result = topic.message_schema.validate(&value);
                values.push(value);
                match result {
                    Ok(()) => continue,
                    Err(violations) => violations,
                }
            }
            Err(e) => vec![Violation::new("$", format!("not representable as JSON: {}", e))],
        };
        failures.push(MessageFailure { index, violations });
    }

    if !failures.is_empty() {
        warn!(
            topic = %topic.logical_name,
            invalid = failures.len(),
            batch = messages.len(),
            "Rejected batch with invalid messages"
        );
        return Err(Error::Validation(ValidationFailures {
            topic: topic.logical_name.clone(),
            batch_len: messages.len(),
            failures,
        }));
    }

    values
        .iter()
        .map(|value| -> Result<Envelope> {
            let payload = topic.message_schema.encode(value)?;
            let mut envelope = Envelope::new(payload)
                .with_header(CONTENT_TYPE_HEADER, Bytes::from_static(JSON_CONTENT_TYPE.as_bytes()));
            if let Some(key) = topic.key_strategy.extract_key(&topic.logical_name, value) {
                envelope = envelope.with_key(key);
            }
            Ok(envelope)
        })
        .collect()
}
