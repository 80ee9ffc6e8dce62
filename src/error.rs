//! Error types and result handling for event-bridge.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use event_bridge::{Error, Result};
//!
//! fn publish() -> Result<()> {
//!     Err(Error::NotReady)
//! }
//!
//! match publish() {
//!     Ok(()) => println!("Published"),
//!     Err(e) if e.is_fatal() => eprintln!("Startup failure: {}", e),
//!     Err(e) => eprintln!("Send rejected: {}", e),
//! }
//! ```

use std::fmt;
use thiserror::Error;

/// The main error type for event-bridge operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be loaded or is malformed.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// The topic registry could not be built from the supplied topics.
    #[error("Registry error: {0}")]
    Registry(String),

    /// Brokers unreachable or authentication rejected.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Listing or creating topics failed during setup.
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    /// One or more messages of a batch failed schema validation.
    /// Nothing from the batch was sent.
    #[error("Validation error: {0}")]
    Validation(ValidationFailures),

    /// The broker rejected or never acknowledged a produce request.
    #[error("Delivery error on topic '{topic}': {source}")]
    Delivery {
        /// Physical topic the batch was sent to
        topic: String,
        /// Underlying client error
        #[source]
        source: rdkafka::error::KafkaError,
    },

    /// `send` called before provisioning finished.
    #[error("Publisher is not ready: setup has not completed")]
    NotReady,

    /// `send` called after the publisher set was closed.
    #[error("Publisher is closed")]
    Closed,

    /// A caller-supplied deadline elapsed.
    ///
    /// For sends the batch may still have reached the broker.
    #[error("Timeout error: {message}")]
    Timeout {
        /// Description of what timed out
        message: String,
    },

    /// JSON encoding or decoding error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Kafka client error outside of a produce request.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

impl Error {
    /// Returns `true` for errors that should stop process startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::Registry(_) | Error::Connection(_) | Error::Provisioning(_)
        )
    }
}

/// A convenient Result type alias for event-bridge operations.
///
/// This is equivalent to `std::result::Result<T, event_bridge::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// A single schema violation inside one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// JSON path of the offending value, e.g. `$.user.id`
    pub path: String,
    /// What was wrong with it
    pub reason: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// All violations found for one message of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFailure {
    /// Position of the message in the batch
    pub index: usize,
    pub violations: Vec<Violation>,
}

/// Every failing message of a rejected batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailures {
    /// Logical topic the batch was addressed to
    pub topic: String,
    /// Size of the rejected batch
    pub batch_len: usize,
    pub failures: Vec<MessageFailure>,
}

impl ValidationFailures {
    /// Indexes of the messages that failed, in batch order.
    pub fn failed_indexes(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.index).collect()
    }
}

impl fmt::Display for ValidationFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} messages for topic '{}' are invalid",
            self.failures.len(),
            self.batch_len,
            self.topic
        )?;
        for failure in &self.failures {
            let reasons: Vec<String> = failure.violations.iter().map(|v| v.to_string()).collect();
            write!(f, "; message {}: {}", failure.index, reasons.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Connection("down".to_string()).is_fatal());
        assert!(Error::Provisioning("list failed".to_string()).is_fatal());
        assert!(!Error::NotReady.is_fatal());
        assert!(!Error::Closed.is_fatal());
    }

    #[test]
    fn test_validation_failures_display() {
        let failures = ValidationFailures {
            topic: "user.events".to_string(),
            batch_len: 3,
            failures: vec![MessageFailure {
                index: 1,
                violations: vec![
                    Violation::new("$.id", "expected string, got number"),
                    Violation::new("$.name", "missing required field"),
                ],
            }],
        };

        let rendered = Error::Validation(failures.clone()).to_string();
        assert!(rendered.contains("1 of 3 messages for topic 'user.events'"));
        assert!(rendered.contains("message 1: $.id: expected string, got number, $.name"));
        assert_eq!(failures.failed_indexes(), vec![1]);
    }
}
