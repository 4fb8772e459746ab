//! Case-insensitive metadata lookup
//!
//! Encoders disagree on key casing: OBS sends `flashVer` and `tcUrl`,
//! others send `flashver` and `tcurl`. Command objects and `onMetaData`
//! payloads are therefore wrapped in [`Metadata`], which looks keys up
//! case-insensitively while preserving the original map for forwarding.

use std::collections::HashMap;

use super::value::Amf0Value;

/// A property map with case-insensitive key access.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata(HashMap<String, Amf0Value>);

impl Metadata {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Wrap a decoded object/ECMA-array property map.
    pub fn from_map(map: HashMap<String, Amf0Value>) -> Self {
        Self(map)
    }

    /// Extract the property map from an object-like value, if it is one.
    pub fn from_value(value: &Amf0Value) -> Option<Self> {
        value.as_object().map(|m| Self(m.clone()))
    }

    /// Look up a key ignoring ASCII case.
    pub fn get(&self, key: &str) -> Option<&Amf0Value> {
        if let Some(v) = self.0.get(key) {
            return Some(v);
        }
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key)?.as_bool()
    }

    /// The underlying map, original casing intact.
    pub fn as_map(&self) -> &HashMap<String, Amf0Value> {
        &self.0
    }

    /// Convert back into an object value for re-encoding.
    pub fn into_value(self) -> Amf0Value {
        Amf0Value::Object(self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<String, Amf0Value>> for Metadata {
    fn from(map: HashMap<String, Amf0Value>) -> Self {
        Self(map)
    }
}
