use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// How the partition key of an outgoing message is derived.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Messages are sent without a key.
    #[default]
    None,
    /// Dotted path into the message, e.g. `user.id`.
    Field { path: String },
    /// Several paths joined with `:`. No key if any of them is missing.
    Composite { fields: Vec<String> },
    /// The logical topic name.
    LogicalName,
}

impl KeyStrategy {
    pub fn extract_key(&self, logical_name: &str, message: &Value) -> Option<String> {
        match self {
            KeyStrategy::None => None,
            KeyStrategy::Field { path } => extract_field_value(message, path),
            KeyStrategy::Composite { fields } => extract_composite_key(message, fields),
            KeyStrategy::LogicalName => Some(logical_name.to_string()),
        }
    }
}

fn extract_field_value(record: &Value, field_path: &str) -> Option<String> {
    let mut current = record;

    for part in field_path.split('.') {
        match current.get(part) {
            Some(value) => current = value,
            None => {
                debug!("Field '{}' not found in message", part);
                return None;
            }
        }
    }

    match current {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        _ => Some(current.to_string()),
    }
}

fn extract_composite_key(record: &Value, fields: &[String]) -> Option<String> {
    let mut key_parts = Vec::with_capacity(fields.len());

    for field in fields {
        match extract_field_value(record, field) {
            Some(value) => key_parts.push(value),
            None => {
                debug!("Missing field '{}' for composite key", field);
                return None;
            }
        }
    }

    if key_parts.is_empty() {
        None
    } else {
        Some(key_parts.join(":"))
    }
}
