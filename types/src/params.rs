//! Evaluation parameters and their canonical form.

use std::fmt::Write;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ParamsHash;

/// Arbitrary parameter map handed to a substrate's compute function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(Map<String, Value>);

impl Params {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    #[must_use]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Params {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Turns a parameter map into the bytes its cache key is hashed from.
///
/// Two maps the caller considers equal must canonicalize to identical bytes.
pub trait Canonicalizer: Send + Sync {
    fn canonicalize(&self, params: &Params) -> Vec<u8>;

    fn hash(&self, params: &Params) -> ParamsHash {
        ParamsHash::of(&self.canonicalize(params))
    }
}

/// Compact JSON with object keys sorted at every depth.
///
/// Numbers keep their JSON spelling, so `1` and `1.0` are distinct keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCanonicalizer;

impl Canonicalizer for JsonCanonicalizer {
    fn canonicalize(&self, params: &Params) -> Vec<u8> {
        let mut out = String::new();
        write_object(&mut out, &params.0);
        out.into_bytes()
    }
}

fn write_object(out: &mut String, map: &Map<String, Value>) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(out, key);
        out.push(':');
        write_value(out, &map[key]);
    }
    out.push('}');
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => write_object(out, map),
    }
}

fn write_string(out: &mut String, s: &str) {
    // serde_json's string escaping is already canonical.
    match serde_json::to_string(s) {
        Ok(quoted) => out.push_str(&quoted),
        Err(_) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
    }
}

/// Result of materializing a substrate at a coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Materialized {
    /// The coordinate's rank is outside the substrate's signature.
    Empty,
    Value(Value),
}

impl Materialized {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Materialized::Empty)
    }

    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Materialized::Empty => None,
            Materialized::Value(value) => Some(value),
        }
    }

    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Materialized::Empty => None,
            Materialized::Value(value) => Some(value),
        }
    }
}
