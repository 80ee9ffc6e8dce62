pub mod config;
pub mod error;
pub mod logging;
pub mod publisher;
pub mod publisher_set;
pub mod registry;
pub mod schema;

pub mod kafka;

pub use config::Config;
pub use error::{Error, Result};
pub use publisher::{PublisherHandle, PublisherState, TypedPublisher};
pub use publisher_set::PublisherSet;
pub use registry::{TopicRegistry, TopicSchema};
pub use schema::{FieldSchema, MessageSchema};
