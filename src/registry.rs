//! Logical topic registry.
//!
//! The registry is built once at startup and is read-only afterwards. Each
//! entry binds a logical name used by application code to the physical Kafka
//! topic and the schema its messages must satisfy.

use crate::config::TopicConfig;
use crate::kafka::KeyStrategy;
use crate::schema::MessageSchema;
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const MAX_TOPIC_NAME_LEN: usize = 249;

#[derive(Debug, Clone)]
pub struct TopicSchema {
    pub logical_name: String,
    pub physical_topic: String,
    pub message_schema: MessageSchema,
    pub key_strategy: KeyStrategy,
}

impl TopicSchema {
    pub fn new(
        logical_name: impl Into<String>,
        physical_topic: impl Into<String>,
        message_schema: MessageSchema,
    ) -> Self {
        Self {
            logical_name: logical_name.into(),
            physical_topic: physical_topic.into(),
            message_schema,
            key_strategy: KeyStrategy::None,
        }
    }

    pub fn with_key_strategy(mut self, key_strategy: KeyStrategy) -> Self {
        self.key_strategy = key_strategy;
        self
    }

    /// Parses a payload produced for this topic, validating it against the
    /// message schema before deserializing into `T`.
    pub fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T> {
        let value: Value = serde_json::from_slice(payload)?;
        if let Err(violations) = self.message_schema.validate(&value) {
            return Err(Error::Validation(crate::error::ValidationFailures {
                topic: self.logical_name.clone(),
                batch_len: 1,
                failures: vec![crate::error::MessageFailure {
                    index: 0,
                    violations,
                }],
            }));
        }
        Ok(serde_json::from_value(value)?)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TopicRegistry {
    topics: BTreeMap<String, Arc<TopicSchema>>,
}

impl TopicRegistry {
    pub fn builder() -> TopicRegistryBuilder {
        TopicRegistryBuilder::default()
    }

    pub fn from_config(topics: &BTreeMap<String, TopicConfig>) -> Result<Self> {
        let mut builder = Self::builder();

        for (logical_name, topic) in topics {
            let schema = topic.schema.clone().ok_or_else(|| {
                Error::Registry(format!("topic '{}' has no message schema", logical_name))
            })?;
            builder = builder.topic(
                TopicSchema::new(logical_name, &topic.topic, schema)
                    .with_key_strategy(topic.key.clone()),
            );
        }

        builder.build()
    }

    pub fn get(&self, logical_name: &str) -> Option<&Arc<TopicSchema>> {
        self.topics.get(logical_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TopicSchema>> {
        self.topics.values()
    }

    /// Distinct physical topic names, sorted.
    pub fn physical_topics(&self) -> BTreeSet<&str> {
        self.topics
            .values()
            .map(|t| t.physical_topic.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct TopicRegistryBuilder {
    topics: Vec<TopicSchema>,
}

impl TopicRegistryBuilder {
    pub fn topic(mut self, topic: TopicSchema) -> Self {
        self.topics.push(topic);
        self
    }

    pub fn build(self) -> Result<TopicRegistry> {
        let mut topics = BTreeMap::new();

        for topic in self.topics {
            if topic.logical_name.is_empty() {
                return Err(Error::Registry("logical topic name is empty".to_string()));
            }
            validate_topic_name(&topic.physical_topic).map_err(|reason| {
                Error::Registry(format!(
                    "topic '{}' maps to invalid physical topic '{}': {}",
                    topic.logical_name, topic.physical_topic, reason
                ))
            })?;
            if topics.contains_key(&topic.logical_name) {
                return Err(Error::Registry(format!(
                    "duplicate logical topic name '{}'",
                    topic.logical_name
                )));
            }
            topics.insert(topic.logical_name.clone(), Arc::new(topic));
        }

        Ok(TopicRegistry { topics })
    }
}

fn validate_topic_name(name: &str) -> std::result::Result<(), &'static str> {
    if name.is_empty() {
        return Err("name is empty");
    }
    if name.len() > MAX_TOPIC_NAME_LEN {
        return Err("name is longer than 249 characters");
    }
    if name == "." || name == ".." {
        return Err("name cannot be '.' or '..'");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err("name may only contain ASCII alphanumerics, '.', '_' and '-'");
    }
    Ok(())
}
