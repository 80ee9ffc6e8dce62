use crate::kafka::KeyStrategy;
use crate::schema::MessageSchema;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Absent when publishing is disabled.
    #[serde(default)]
    pub cluster: Option<ClusterConfig>,
    #[serde(default)]
    pub producer: ProducerConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    #[serde(default)]
    pub topics: BTreeMap<String, TopicConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    pub brokers: Vec<String>,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_close_timeout")]
    pub close_timeout_secs: u64,
}

/// SASL/SCRAM credentials. TLS is always on when these are present.
#[derive(Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProducerConfig {
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_acks")]
    pub acks: String,
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Upper bound for delivery including librdkafka's own retries.
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvisioningConfig {
    #[serde(default = "default_partitions")]
    pub partitions: i32,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: i32,
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TopicConfig {
    /// Physical topic name on the cluster.
    pub topic: String,
    #[serde(default)]
    pub schema: Option<MessageSchema>,
    #[serde(default)]
    pub key: KeyStrategy,
}

impl Config {
    /// Loads `path` and overlays `EVENT_BRIDGE_*` environment variables.
    ///
    /// The `topics` section comes from the file alone, with key case kept:
    /// logical topic names and schema field names are case-sensitive, while
    /// merged `config` sources lowercase every key.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = config::File::from(path.as_ref());
        let settings = config::Config::builder()
            .add_source(file.clone())
            .add_source(
                config::Environment::with_prefix("EVENT_BRIDGE")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("cluster.brokers")
                    .try_parsing(true),
            )
            .build()?;

        let mut loaded: Config = settings.try_deserialize()?;
        if let Some(topics) = config::Source::collect(&file)?.remove("topics") {
            loaded.topics = topics.try_deserialize()?;
        }
        Ok(loaded)
    }

    pub fn publishing_enabled(&self) -> bool {
        self.cluster.is_some()
    }
}

impl ClusterConfig {
    pub fn new<I, S>(brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            brokers: brokers.into_iter().map(Into::into).collect(),
            auth: None,
            client_id: default_client_id(),
            connect_timeout_secs: default_connect_timeout(),
            close_timeout_secs: default_close_timeout(),
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(AuthConfig {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Broker endpoints in configured order with duplicates removed.
    ///
    /// Every entry must be `host:port` with a numeric port.
    pub fn bootstrap_servers(&self) -> Result<Vec<String>> {
        let mut servers: Vec<String> = Vec::with_capacity(self.brokers.len());

        for broker in &self.brokers {
            let broker = broker.trim();
            let valid = match broker.rsplit_once(':') {
                Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
                None => false,
            };
            if !valid {
                return Err(Error::Connection(format!(
                    "invalid broker address '{}', expected host:port",
                    broker
                )));
            }
            if !servers.iter().any(|s| s == broker) {
                servers.push(broker.to_string());
            }
        }

        if servers.is_empty() {
            return Err(Error::Connection("no brokers configured".to_string()));
        }
        Ok(servers)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}

impl ProvisioningConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            compression: default_compression(),
            acks: default_acks(),
            linger_ms: default_linger_ms(),
            batch_size: default_batch_size(),
            message_timeout_ms: default_message_timeout_ms(),
        }
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            replication_factor: default_replication_factor(),
            operation_timeout_secs: default_operation_timeout(),
        }
    }
}

fn default_client_id() -> String {
    "event-bridge".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_close_timeout() -> u64 {
    30
}

fn default_compression() -> String {
    "snappy".to_string()
}

fn default_acks() -> String {
    "all".to_string()
}

fn default_linger_ms() -> u32 {
    100
}

fn default_batch_size() -> usize {
    16384
}

fn default_message_timeout_ms() -> u64 {
    30_000
}

fn default_partitions() -> i32 {
    1
}

fn default_replication_factor() -> i32 {
    2
}

fn default_operation_timeout() -> u64 {
    30
}
