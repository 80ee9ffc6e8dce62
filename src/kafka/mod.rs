pub mod connection;
pub mod key_strategy;
pub mod memory;
pub mod producer;
pub mod provisioner;

#[cfg(test)]
mod tests;

pub use connection::{Cluster, ClusterConnection};
pub use key_strategy::KeyStrategy;
pub use memory::MemoryCluster;
pub use producer::{Envelope, KafkaProducer, MessageProducer};
pub use provisioner::{
    ClusterAdmin, CreateOutcome, NewTopicSpec, ProvisionReport, TopicProvisioner,
};
