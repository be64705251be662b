//! Structured metadata attached to messages and conversations.

use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::collections::BTreeMap;

/// A metadata map keyed by field name.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A single metadata value.
///
/// Covers the JSON shapes channels and clients actually attach. Serializes
/// as the plain JSON value, so a round trip through the durable tier or the
/// HTTP API is lossless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// A boolean flag.
    Bool(bool),
    /// An integer or floating point number.
    Number(Number),
    /// A text value.
    String(String),
    /// An ordered list of values.
    List(Vec<MetadataValue>),
    /// A nested record.
    Record(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    /// Returns the string value, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as an `i64`, if it is an integral number.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    /// Returns the nested record, if this is a record.
    #[must_use]
    pub fn as_record(&self) -> Option<&BTreeMap<String, MetadataValue>> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}
