//! Output records produced for one advertisement.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A single measurement value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Measurement name to value, as produced by a protocol decoder. Iteration
/// and serialisation are sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SensorData(BTreeMap<String, Value>);

impl SensorData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Insert under `name`, or `name_2`, `name_3`, ... when already taken.
    pub fn insert_unique(&mut self, name: &str, value: impl Into<Value>) {
        let mut key = name.to_string();
        let mut n = 2;
        while self.0.contains_key(&key) {
            key = format!("{name}_{n}");
            n += 1;
        }
        self.0.insert(key, value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for SensorData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Presence of a whitelisted tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerData {
    /// Identity supplied by the protocol decoder, when it differs from the MAC.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracker_id: Option<String>,
    /// MAC as uppercase hex without separators.
    pub mac: String,
    pub is_connected: bool,
    pub rssi: i8,
    pub local_name: String,
}
