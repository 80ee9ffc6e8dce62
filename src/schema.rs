//! Declarative message schemas.
//!
//! A [`MessageSchema`] describes the JSON object shape a logical topic
//! accepts. Schemas are loaded from configuration or built in code:
//!
//! ```rust
//! use event_bridge::schema::{FieldSchema, MessageSchema};
//! use serde_json::json;
//!
//! let schema = MessageSchema::new()
//!     .field("id", FieldSchema::string())
//!     .field("amount", FieldSchema::integer())
//!     .field("note", FieldSchema::string().optional());
//!
//! assert!(schema.validate(&json!({"id": "a", "amount": 3})).is_ok());
//! assert!(schema.validate(&json!({"id": 7, "amount": 3})).is_err());
//! ```

use crate::error::Violation;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Shape of one message: a JSON object with named fields.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct MessageSchema {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSchema>,
    /// Reject fields that are not declared.
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FieldSchema {
    #[serde(flatten)]
    pub kind: FieldKind,
    /// Field may be absent.
    #[serde(default)]
    pub optional: bool,
    /// Field may be `null`.
    #[serde(default)]
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Object {
        #[serde(default)]
        fields: BTreeMap<String, FieldSchema>,
        #[serde(default)]
        strict: bool,
    },
    Array {
        items: Box<FieldSchema>,
    },
    Enum {
        values: Vec<String>,
    },
    Any,
}

impl MessageSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, field: FieldSchema) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Checks `message` against the schema, collecting every violation.
    pub fn validate(&self, message: &Value) -> std::result::Result<(), Vec<Violation>> {
        let mut violations = Vec::new();
        match message {
            Value::Object(_) => {
                check_object(message, &self.fields, self.strict, "$", &mut violations)
            }
            other => violations.push(Violation::new(
                "$",
                format!("expected object, got {}", type_name(other)),
            )),
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// Canonical wire encoding: compact JSON with sorted object keys.
    pub fn encode(&self, message: &Value) -> Result<Vec<u8>> {
        // serde_json::Map is ordered by key unless `preserve_order` is enabled
        Ok(serde_json::to_vec(message)?)
    }
}

impl FieldSchema {
    fn of(kind: FieldKind) -> Self {
        Self {
            kind,
            optional: false,
            nullable: false,
        }
    }

    pub fn string() -> Self {
        Self::of(FieldKind::String)
    }

    pub fn number() -> Self {
        Self::of(FieldKind::Number)
    }

    pub fn integer() -> Self {
        Self::of(FieldKind::Integer)
    }

    pub fn boolean() -> Self {
        Self::of(FieldKind::Boolean)
    }

    pub fn any() -> Self {
        Self::of(FieldKind::Any)
    }

    pub fn object(schema: MessageSchema) -> Self {
        Self::of(FieldKind::Object {
            fields: schema.fields,
            strict: schema.strict,
        })
    }

    pub fn array(items: FieldSchema) -> Self {
        Self::of(FieldKind::Array {
            items: Box::new(items),
        })
    }

    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::of(FieldKind::Enum {
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    fn check(&self, value: &Value, path: &str, violations: &mut Vec<Violation>) {
        if value.is_null() {
            if !self.nullable {
                violations.push(Violation::new(path, "value must not be null"));
            }
            return;
        }

        match &self.kind {
            FieldKind::Any => {}
            FieldKind::String => expect(value.is_string(), "string", value, path, violations),
            FieldKind::Number => expect(value.is_number(), "number", value, path, violations),
            FieldKind::Integer => expect(
                value.is_i64() || value.is_u64(),
                "integer",
                value,
                path,
                violations,
            ),
            FieldKind::Boolean => expect(value.is_boolean(), "boolean", value, path, violations),
            FieldKind::Enum { values } => match value.as_str() {
                Some(s) if values.iter().any(|v| v == s) => {}
                Some(s) => violations.push(Violation::new(
                    path,
                    format!("'{}' is not one of [{}]", s, values.join(", ")),
                )),
                None => expect(false, "string", value, path, violations),
            },
            FieldKind::Object { fields, strict } => {
                if value.is_object() {
                    check_object(value, fields, *strict, path, violations);
                } else {
                    expect(false, "object", value, path, violations);
                }
            }
            FieldKind::Array { items } => match value.as_array() {
                Some(elements) => {
                    for (i, element) in elements.iter().enumerate() {
                        items.check(element, &format!("{}[{}]", path, i), violations);
                    }
                }
                None => expect(false, "array", value, path, violations),
            },
        }
    }
}

fn check_object(
    value: &Value,
    fields: &BTreeMap<String, FieldSchema>,
    strict: bool,
    path: &str,
    violations: &mut Vec<Violation>,
) {
    let Some(object) = value.as_object() else {
        return;
    };

    for (name, field) in fields {
        let field_path = format!("{}.{}", path, name);
        match object.get(name) {
            Some(v) => field.check(v, &field_path, violations),
            None if field.optional => {}
            None => violations.push(Violation::new(field_path, "missing required field")),
        }
    }

    if strict {
        for name in object.keys().filter(|k| !fields.contains_key(*k)) {
            violations.push(Violation::new(format!("{}.{}", path, name), "unknown field"));
        }
    }
}

fn expect(ok: bool, expected: &str, value: &Value, path: &str, violations: &mut Vec<Violation>) {
    if !ok {
        violations.push(Violation::new(
            path,
            format!("expected {}, got {}", expected, type_name(value)),
        ));
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
