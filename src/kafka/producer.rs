use crate::config::ProducerConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(50);

/// Wire unit handed to a [`MessageProducer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub headers: Option<BTreeMap<String, Bytes>>,
}

impl Envelope {
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self {
            key: None,
            value: value.into(),
            headers: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }
}

/// Shared send path to the cluster.
///
/// Implementations are called concurrently without external locking.
#[async_trait]
pub trait MessageProducer: Send + Sync {
    /// Sends `envelopes` to `topic` as one operation, preserving their order.
    async fn send_batch(&self, topic: &str, envelopes: Vec<Envelope>) -> Result<()>;
}

pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    /// Creates the producer on top of the connection-level client settings.
    pub fn new(base: &ClientConfig, config: &ProducerConfig) -> Result<Self> {
        let mut client_config = base.clone();
        client_config
            .set("compression.type", &config.compression)
            .set("acks", &config.acks)
            .set("linger.ms", config.linger_ms.to_string())
            .set("batch.size", config.batch_size.to_string())
            .set("message.timeout.ms", config.message_timeout_ms.to_string());

        // Idempotence keeps batch order intact across internal retries, but
        // librdkafka only allows it with acks=all.
        if config.acks == "all" || config.acks == "-1" {
            client_config.set("enable.idempotence", "true");
        } else {
            warn!(acks = %config.acks, "Idempotent producer disabled; batch order may change on retry");
        }

        let producer: FutureProducer = client_config
            .create()
            .map_err(|e| Error::Connection(format!("failed to create producer: {}", e)))?;

        Ok(Self { producer })
    }

    /// Waits for queued messages to be delivered.
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        self.producer.flush(timeout).map_err(Error::Kafka)
    }

    pub fn in_flight_count(&self) -> i32 {
        self.producer.in_flight_count()
    }
}

#[async_trait]
impl MessageProducer for KafkaProducer {
    #[instrument(skip(self, envelopes), fields(count = envelopes.len()))]
    async fn send_batch(&self, topic: &str, envelopes: Vec<Envelope>) -> Result<()> {
        let delivery_error = |source: KafkaError| Error::Delivery {
            topic: topic.to_string(),
            source,
        };

        // Enqueue one at a time so librdkafka sees the batch in input order.
        let mut deliveries = Vec::with_capacity(envelopes.len());
        for envelope in &envelopes {
            let mut record = FutureRecord::<[u8], [u8]>::to(topic).payload(&envelope.value[..]);
            if let Some(key) = &envelope.key {
                record = record.key(&key[..]);
            }
            if let Some(headers) = &envelope.headers {
                record = record.headers(owned_headers(headers));
            }

            // A full local queue frees up as earlier messages are delivered.
            // Retrying the same record keeps the batch in order.
            let delivery = loop {
                match self.producer.send_result(record) {
                    Ok(delivery) => break delivery,
                    Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), returned)) => {
                        record = returned;
                        tokio::time::sleep(QUEUE_FULL_BACKOFF).await;
                    }
                    Err((e, _)) => return Err(delivery_error(e)),
                }
            };
            deliveries.push(delivery);
        }

        for result in join_all(deliveries).await {
            match result {
                Ok(Ok((partition, offset))) => {
                    debug!(partition, offset, "Message delivered");
                }
                Ok(Err((e, _message))) => return Err(delivery_error(e)),
                Err(_canceled) => return Err(delivery_error(KafkaError::Canceled)),
            }
        }

        Ok(())
    }
}

fn owned_headers(headers: &BTreeMap<String, Bytes>) -> OwnedHeaders {
    headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(headers.len()), |acc, (key, value)| {
            acc.insert(Header {
                key: key.as_str(),
                value: Some(&value[..]),
            })
        })
}
