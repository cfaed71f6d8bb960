//! Span attribute bags.
//!
//! OTLP attributes are open-ended `AnyValue`s; the pipeline only consumes
//! the four scalar kinds, so anything else is dropped during conversion.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracescale_proto::common::{AnyValue, KeyValue, any_value};

/// Attribute key carrying the emitting service on a resource.
pub const SERVICE_NAME_KEY: &str = "service.name";

/// Service name assumed when a resource does not declare one.
pub const UNKNOWN_SERVICE: &str = "unknown_service";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    fn from_proto(value: &AnyValue) -> Option<Self> {
        match value.value.as_ref()? {
            any_value::Value::StringValue(s) => Some(AttributeValue::String(s.clone())),
            any_value::Value::IntValue(i) => Some(AttributeValue::Int(*i)),
            any_value::Value::DoubleValue(d) => Some(AttributeValue::Double(*d)),
            any_value::Value::BoolValue(b) => Some(AttributeValue::Bool(*b)),
        }
    }
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeValue::String(s) => f.write_str(s),
            AttributeValue::Int(i) => write!(f, "{i}"),
            AttributeValue::Double(d) => write!(f, "{d}"),
            AttributeValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Ordered key/value bag attached to each span.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes(BTreeMap<String, AttributeValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert OTLP key/values, skipping unset and non-scalar values.
    pub fn from_key_values(kvs: &[KeyValue]) -> Self {
        let mut attrs = Self::new();
        for kv in kvs {
            if let Some(value) = kv.value.as_ref().and_then(AttributeValue::from_proto) {
                attrs.0.insert(kv.key.clone(), value);
            }
        }
        attrs
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(AttributeValue::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: AttributeValue) {
        self.0.insert(key.into(), value);
    }

    /// Copy entries from `other` whose keys are not already present.
    pub fn merge_missing(&mut self, other: &Attributes) {
        for (key, value) in &other.0 {
            self.0.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.0.iter()
    }
}
