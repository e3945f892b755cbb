//! Custom fields attached to a cut
//!
//! Custom fields are an ordered map from names to tagged values. A value is
//! either a handle to stored data (array, temporal array, nested recording or
//! feature matrix) or an opaque JSON value carried through untouched.

use crate::manifest::{Array, Features, Recording, TemporalArray, Tensor};
use ndarray::Array2;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Value of a custom field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CustomValue {
    Array(Array),
    TemporalArray(TemporalArray),
    Recording(Arc<Recording>),
    Features(Arc<Features>),
    Value(serde_json::Value),
}

impl CustomValue {
    /// True for handles to stored data, false for opaque values
    pub fn is_data(&self) -> bool {
        !matches!(self, CustomValue::Value(_))
    }

    pub fn as_data(&self) -> Option<DataRef<'_>> {
        match self {
            CustomValue::Array(a) => Some(DataRef::Array(a)),
            CustomValue::TemporalArray(a) => Some(DataRef::TemporalArray(a)),
            CustomValue::Recording(r) => Some(DataRef::Recording(r)),
            CustomValue::Features(f) => Some(DataRef::Features(f)),
            CustomValue::Value(_) => None,
        }
    }
}

impl From<serde_json::Value> for CustomValue {
    fn from(value: serde_json::Value) -> Self {
        CustomValue::Value(value)
    }
}

/// Borrowed view of one data store referenced by a cut
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DataRef<'a> {
    Recording(&'a Recording),
    Features(&'a Features),
    Array(&'a Array),
    TemporalArray(&'a TemporalArray),
}

impl DataRef<'_> {
    pub fn is_in_memory(&self) -> bool {
        match self {
            DataRef::Recording(r) => r.is_in_memory(),
            DataRef::Features(f) => f.is_in_memory(),
            DataRef::Array(a) => a.is_in_memory(),
            DataRef::TemporalArray(a) => a.is_in_memory(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        match self {
            DataRef::Recording(r) => r.is_placeholder(),
            DataRef::Features(f) => f.is_placeholder(),
            DataRef::Array(a) => a.is_placeholder(),
            DataRef::TemporalArray(a) => a.is_placeholder(),
        }
    }
}

/// Loaded payload of a data field
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// `(channels, samples)` audio
    Audio {
        samples: Array2<f32>,
        sampling_rate: u32,
    },
    Tensor(Tensor),
}

/// Ordered custom field map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomFields {
    entries: Vec<(String, CustomValue)>,
}

impl CustomFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&CustomValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace a value, keeping the original position on replace
    pub fn insert(&mut self, key: impl Into<String>, value: CustomValue) -> Option<CustomValue> {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<CustomValue> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str, &CustomValue) -> bool) {
        self.entries.retain(|(k, v)| keep(k, v));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CustomValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Apply `f` to every value, keeping keys and order
    pub fn map_values(&self, mut f: impl FnMut(&str, &CustomValue) -> CustomValue) -> CustomFields {
        CustomFields {
            entries: self.entries.iter().map(|(k, v)| (k.clone(), f(k, v))).collect(),
        }
    }
}

impl FromIterator<(String, CustomValue)> for CustomFields {
    fn from_iter<I: IntoIterator<Item = (String, CustomValue)>>(iter: I) -> Self {
        let mut fields = CustomFields::new();
        for (k, v) in iter {
            fields.insert(k, v);
        }
        fields
    }
}

impl Serialize for CustomFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CustomFields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldsVisitor;

        impl<'de> Visitor<'de> for FieldsVisitor {
            type Value = CustomFields;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of custom fields")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<CustomFields, A::Error> {
                let mut fields = CustomFields::new();
                while let Some((key, value)) = access.next_entry::<String, CustomValue>()? {
                    fields.insert(key, value);
                }
                Ok(fields)
            }
        }

        deserializer.deserialize_map(FieldsVisitor)
    }
}
