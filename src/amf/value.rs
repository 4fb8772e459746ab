//! AMF0 value types
//!
//! Command and data messages carry a tree of typed values. This enum covers
//! the AMF0 type set used by RTMP; AMF3 payloads are handled by stripping
//! the AVM+ prefix byte and decoding the remainder as AMF0.

use std::collections::HashMap;

/// A decoded AMF0 value.
#[derive(Debug, Clone, PartialEq)]
pub enum Amf0Value {
    /// IEEE 754 double (marker 0x00)
    Number(f64),

    /// Boolean (marker 0x01)
    Boolean(bool),

    /// UTF-8 string (marker 0x02, or 0x0C when longer than 65535 bytes)
    String(String),

    /// Key-value object (marker 0x03)
    Object(HashMap<String, Amf0Value>),

    /// Null (marker 0x05)
    Null,

    /// Undefined (marker 0x06)
    Undefined,

    /// Associative array with a count hint (marker 0x08)
    EcmaArray(HashMap<String, Amf0Value>),

    /// Dense array (marker 0x0A)
    StrictArray(Vec<Amf0Value>),

    /// Milliseconds since the Unix epoch (marker 0x0B)
    Date(f64),
}

impl Amf0Value {
    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Amf0Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Amf0Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Try to get this value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Amf0Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get this value's properties. Objects and ECMA arrays both
    /// behave as property maps on the wire.
    pub fn as_object(&self) -> Option<&HashMap<String, Amf0Value>> {
        match self {
            Amf0Value::Object(m) | Amf0Value::EcmaArray(m) => Some(m),
            _ => None,
        }
    }

    /// Check if this value is null or undefined.
    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, Amf0Value::Null | Amf0Value::Undefined)
    }

    /// Get a property from an object value.
    pub fn get(&self, key: &str) -> Option<&Amf0Value> {
        self.as_object()?.get(key)
    }
}

impl From<bool> for Amf0Value {
    fn from(v: bool) -> Self {
        Amf0Value::Boolean(v)
    }
}

impl From<f64> for Amf0Value {
    fn from(v: f64) -> Self {
        Amf0Value::Number(v)
    }
}

impl From<u32> for Amf0Value {
    fn from(v: u32) -> Self {
        Amf0Value::Number(v as f64)
    }
}

impl From<String> for Amf0Value {
    fn from(v: String) -> Self {
        Amf0Value::String(v)
    }
}

impl From<&str> for Amf0Value {
    fn from(v: &str) -> Self {
        Amf0Value::String(v.to_string())
    }
}

impl From<HashMap<String, Amf0Value>> for Amf0Value {
    fn from(v: HashMap<String, Amf0Value>) -> Self {
        Amf0Value::Object(v)
    }
}

/// Build an object value from key/value pairs.
#[macro_export]
macro_rules! amf_object {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut map = ::std::collections::HashMap::new();
        $(map.insert($key.to_string(), $crate::amf::Amf0Value::from($value));)*
        $crate::amf::Amf0Value::Object(map)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        let s = Amf0Value::String("test".into());
        assert_eq!(s.as_str(), Some("test"));
        assert_eq!(s.as_number(), None);

        let n = Amf0Value::Number(42.0);
        assert_eq!(n.as_number(), Some(42.0));
        assert_eq!(n.as_str(), None);

        let obj = amf_object! { "key" => "value" };
        assert_eq!(obj.get("key").and_then(|v| v.as_str()), Some("value"));
        assert_eq!(obj.get("missing"), None);
    }

    #[test]
    fn test_ecma_array_reads_as_object() {
        let mut map = HashMap::new();
        map.insert("width".to_string(), Amf0Value::Number(1920.0));
        let arr = Amf0Value::EcmaArray(map);
        assert_eq!(arr.get("width").and_then(|v| v.as_number()), Some(1920.0));
    }

    #[test]
    fn test_from_conversions() {
        let v: Amf0Value = "test".into();
        assert!(matches!(v, Amf0Value::String(_)));

        let v: Amf0Value = 42.0.into();
        assert!(matches!(v, Amf0Value::Number(_)));

        let v: Amf0Value = true.into();
        assert!(matches!(v, Amf0Value::Boolean(true)));
    }
}
