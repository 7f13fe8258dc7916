//! Decoded field values
//!
//! Every leaf of a parse tree decodes to a [`Value`]. Field sets may expose
//! a computed value too (for example a gamma chunk exposing its float).

use std::fmt;

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Serialize, Serializer};

use crate::charset::{make_printable, Charset};
use crate::text_handler::{human_datetime, human_duration};

/// Typed value of a field
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    UInt(u64),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Text(String),
    DateTime(NaiveDateTime),
    Duration(TimeDelta),
}

impl Value {
    /// Unsigned view of integer-like values
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Bool(b) => Some(u64::from(*b)),
            Value::UInt(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Signed view of integer-like values
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::UInt(v) => i64::try_from(*v).ok(),
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::UInt(v) => Some(*v as f64),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::UInt(v) => Some(*v != 0),
            Value::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Short type name, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::UInt(_) => "unsigned integer",
            Value::Int(_) => "signed integer",
            Value::Float(_) => "float",
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::DateTime(_) => "datetime",
            Value::Duration(_) => "duration",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::UInt(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:?}", v),
            Value::Bytes(b) => write!(f, "\"{}\"", make_printable(b, Charset::Iso8859_1, false)),
            Value::Text(s) => f.write_str(s),
            Value::DateTime(dt) => f.write_str(&human_datetime(dt)),
            Value::Duration(d) => f.write_str(&human_duration(d)),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::UInt(v) => serializer.serialize_u64(*v),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Bytes(b) => serializer.serialize_bytes(b),
            Value::Text(s) => serializer.serialize_str(s),
            Value::DateTime(_) | Value::Duration(_) => serializer.collect_str(self),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::UInt(u64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(value.to_vec())
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        match self {
            Value::Text(s) => s == other,
            Value::Bytes(b) => b.as_slice() == other.as_bytes(),
            _ => false,
        }
    }
}

impl PartialEq<&[u8]> for Value {
    fn eq(&self, other: &&[u8]) -> bool {
        self.as_bytes() == Some(*other)
    }
}

impl PartialEq<u64> for Value {
    fn eq(&self, other: &u64) -> bool {
        self.as_u64() == Some(*other)
    }
}

impl PartialEq<bool> for Value {
    fn eq(&self, other: &bool) -> bool {
        matches!(self, Value::Bool(b) if b == other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_display() {
        assert_eq!(Value::UInt(331).to_string(), "331");
        assert_eq!(Value::Int(-4).to_string(), "-4");
        assert_eq!(Value::Float(1.0).to_string(), "1.0");
        assert_eq!(Value::Bytes(b"\x1F\x8B".to_vec()).to_string(), "\"\\x1F\\x8b\"");
        assert_eq!(Value::Text("test.txt".into()).to_string(), "test.txt");

        let dt = NaiveDate::from_ymd_opt(2006, 7, 29)
            .unwrap()
            .and_hms_opt(12, 20, 44)
            .unwrap();
        assert_eq!(Value::DateTime(dt).to_string(), "2006-07-29 12:20:44");
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(Value::Text("MSCF".into()), "MSCF");
        assert_eq!(Value::Bytes(b"MSCF".to_vec()), "MSCF");
        assert_eq!(Value::UInt(46), 46u64);
        assert_eq!(Value::Bool(true), true);
        assert_ne!(Value::UInt(1), true);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Value::Int(-1).as_u64(), None);
        assert_eq!(Value::UInt(7).as_i64(), Some(7));
        assert_eq!(Value::Bool(true).as_u64(), Some(1));
        assert_eq!(Value::from("abc").as_bytes(), Some(&b"abc"[..]));
    }

    #[test]
    fn test_serialize() {
        assert_eq!(serde_json::to_string(&Value::UInt(5)).unwrap(), "5");
        assert_eq!(serde_json::to_string(&Value::Text("a".into())).unwrap(), "\"a\"");
    }
}
