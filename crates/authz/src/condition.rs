//! Free-form condition maps.
//!
//! Policies, role-permission constraints and resource attributes carry
//! string-keyed maps of loosely typed values, persisted as JSONB. The map is
//! exposed to the evaluator as an immutable value type; nothing downstream
//! mutates a stored condition.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One condition value: string, number, bool, list or nested map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<ConditionValue>),
    Map(BTreeMap<String, ConditionValue>),
}

impl ConditionValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConditionValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ConditionValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConditionValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ConditionValue]> {
        match self {
            ConditionValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Loose equality against a JSON value, used when matching request
    /// attributes (which arrive as `serde_json::Value`) to conditions.
    pub fn matches_json(&self, other: &serde_json::Value) -> bool {
        match (self, other) {
            (ConditionValue::String(s), serde_json::Value::String(o)) => s == o,
            (ConditionValue::Bool(b), serde_json::Value::Bool(o)) => b == o,
            (ConditionValue::Number(n), serde_json::Value::Number(o)) => {
                o.as_f64().map(|o| (o - n).abs() < f64::EPSILON).unwrap_or(false)
            }
            _ => false,
        }
    }
}

impl From<&str> for ConditionValue {
    fn from(value: &str) -> Self {
        ConditionValue::String(value.to_string())
    }
}

impl From<String> for ConditionValue {
    fn from(value: String) -> Self {
        ConditionValue::String(value)
    }
}

impl From<f64> for ConditionValue {
    fn from(value: f64) -> Self {
        ConditionValue::Number(value)
    }
}

impl From<bool> for ConditionValue {
    fn from(value: bool) -> Self {
        ConditionValue::Bool(value)
    }
}

/// String-keyed condition map, stored as a JSONB column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionMap(BTreeMap<String, ConditionValue>);

impl ConditionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ConditionValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConditionValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&ConditionValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ConditionValue::as_str)
    }

    pub fn get_list(&self, key: &str) -> Option<&[ConditionValue]> {
        self.get(key).and_then(ConditionValue::as_list)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConditionValue)> {
        self.0.iter()
    }
}

impl FromIterator<(String, ConditionValue)> for ConditionMap {
    fn from_iter<T: IntoIterator<Item = (String, ConditionValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
