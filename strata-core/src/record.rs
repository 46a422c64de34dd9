//! Sample records
//!
//! A record is an ordered map from field name to value. Datasets own one
//! record per sample and hand out deep copies to the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::idx::Tensor;

/// A single field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Tensor(Tensor),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Value::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Tensor> for Value {
    fn from(t: Tensor) -> Self {
        Value::Tensor(t)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

/// Field name to value map for one sample
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.fields.get_mut(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Tensor stored under `key`, if that field is a tensor
    pub fn tensor(&self, key: &str) -> Option<&Tensor> {
        self.get(key).and_then(Value::as_tensor)
    }

    /// Integer stored under `key`, if that field is an integer
    pub fn int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_int)
    }

    /// Drop every field not named in `keys`
    pub fn retain_keys(&mut self, keys: &[String]) {
        self.fields.retain(|k, _| keys.iter().any(|keep| keep == k));
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_is_deep() {
        let original = Record::new()
            .with("img", Tensor::from_u8(vec![2], vec![1, 2]).unwrap())
            .with("gt_label", 3i64);

        let mut copy = original.clone();
        copy.insert("gt_label", 9i64);
        copy.remove("img");

        assert_eq!(original.int("gt_label"), Some(3));
        assert!(original.tensor("img").is_some());
    }

    #[test]
    fn test_retain_keys() {
        let mut record = Record::new().with("a", 1i64).with("b", 2i64).with("c", 3i64);
        record.retain_keys(&["a".to_string(), "c".to_string()]);
        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["a", "c"]);
    }

    #[test]
    fn test_json_shape() {
        let record = Record::new().with("filename", "a.png").with("label", 2i64);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"filename":"a.png","label":2}"#);
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
