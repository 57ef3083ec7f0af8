//! Tagged values and maps carried by tuples.
//!
//! Every payload flowing through a topology is a [`Map`] from string keys to
//! [`Value`]s. Values are deep-clonable, structurally comparable, and convert
//! to and from `serde_json::Value` for interop with JSON-speaking sources and
//! sinks.

use std::cmp::Ordering;
use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A mapping from string keys to tagged values.
pub type Map = HashMap<String, Value>;

/// A tagged value.
///
/// `Int` and `Float` are distinct variants but compare and compute against
/// each other with numeric promotion. `Blob` holds raw bytes; `Timestamp`
/// is a UTC instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
  /// The null value.
  Null,
  /// A boolean.
  Bool(bool),
  /// A 64-bit signed integer.
  Int(i64),
  /// A 64-bit float.
  Float(f64),
  /// A UTF-8 string.
  String(String),
  /// Raw bytes.
  Blob(Bytes),
  /// A UTC timestamp.
  Timestamp(DateTime<Utc>),
  /// An ordered sequence of values.
  Array(Vec<Value>),
  /// A nested map.
  Map(Map),
}

impl Value {
  /// Returns the name of this value's type tag.
  pub fn type_name(&self) -> &'static str {
    match self {
      Value::Null => "null",
      Value::Bool(_) => "bool",
      Value::Int(_) => "int",
      Value::Float(_) => "float",
      Value::String(_) => "string",
      Value::Blob(_) => "blob",
      Value::Timestamp(_) => "timestamp",
      Value::Array(_) => "array",
      Value::Map(_) => "map",
    }
  }

  /// Returns true if this is `Null`.
  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }

  /// Returns the inner bool, or a `TypeMismatch` error.
  pub fn as_bool(&self) -> Result<bool> {
    match self {
      Value::Bool(b) => Ok(*b),
      other => Err(Error::TypeMismatch {
        expected: "bool",
        actual: other.type_name(),
      }),
    }
  }

  /// Returns the inner integer, or a `TypeMismatch` error.
  pub fn as_int(&self) -> Result<i64> {
    match self {
      Value::Int(i) => Ok(*i),
      other => Err(Error::TypeMismatch {
        expected: "int",
        actual: other.type_name(),
      }),
    }
  }

  /// Returns the value as a float, promoting integers.
  pub fn as_float(&self) -> Result<f64> {
    match self {
      Value::Int(i) => Ok(*i as f64),
      Value::Float(f) => Ok(*f),
      other => Err(Error::TypeMismatch {
        expected: "float",
        actual: other.type_name(),
      }),
    }
  }

  /// Returns the inner string slice, or a `TypeMismatch` error.
  pub fn as_str(&self) -> Result<&str> {
    match self {
      Value::String(s) => Ok(s),
      other => Err(Error::TypeMismatch {
        expected: "string",
        actual: other.type_name(),
      }),
    }
  }

  /// Returns the inner map, or a `TypeMismatch` error.
  pub fn as_map(&self) -> Result<&Map> {
    match self {
      Value::Map(m) => Ok(m),
      other => Err(Error::TypeMismatch {
        expected: "map",
        actual: other.type_name(),
      }),
    }
  }

  /// Coerces this value to a boolean.
  ///
  /// `Null` is false; numbers are true when non-zero (NaN is false);
  /// strings, blobs, arrays, and maps are true when non-empty; timestamps
  /// are always true.
  pub fn to_bool(&self) -> bool {
    match self {
      Value::Null => false,
      Value::Bool(b) => *b,
      Value::Int(i) => *i != 0,
      Value::Float(f) => *f != 0.0 && !f.is_nan(),
      Value::String(s) => !s.is_empty(),
      Value::Blob(b) => !b.is_empty(),
      Value::Timestamp(_) => true,
      Value::Array(a) => !a.is_empty(),
      Value::Map(m) => !m.is_empty(),
    }
  }

  /// Checked structural equality.
  ///
  /// `Int` and `Float` compare numerically across tags. Comparing values of
  /// any other differing tags is an error; this is what makes a bad GROUP BY
  /// key surface as an error instead of a silent mismatch.
  pub fn equals(&self, other: &Value) -> Result<bool> {
    match (self, other) {
      (Value::Null, Value::Null) => Ok(true),
      (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
      (Value::Int(a), Value::Int(b)) => Ok(a == b),
      (Value::Float(a), Value::Float(b)) => Ok(a == b),
      (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => Ok(*a as f64 == *b),
      (Value::String(a), Value::String(b)) => Ok(a == b),
      (Value::Blob(a), Value::Blob(b)) => Ok(a == b),
      (Value::Timestamp(a), Value::Timestamp(b)) => Ok(a == b),
      (Value::Array(a), Value::Array(b)) => {
        if a.len() != b.len() {
          return Ok(false);
        }
        for (x, y) in a.iter().zip(b.iter()) {
          if !x.equals(y)? {
            return Ok(false);
          }
        }
        Ok(true)
      }
      (Value::Map(a), Value::Map(b)) => {
        if a.len() != b.len() {
          return Ok(false);
        }
        for (k, x) in a {
          match b.get(k) {
            Some(y) if x.equals(y)? => {}
            _ => return Ok(false),
          }
        }
        Ok(true)
      }
      (a, b) => Err(Error::Incomparable {
        left: a.type_name(),
        right: b.type_name(),
      }),
    }
  }

  /// Checked ordering for comparison operators and min/max aggregates.
  ///
  /// Defined for numeric pairs (with promotion), strings, booleans, and
  /// timestamps. Anything else is `Incomparable`.
  pub fn compare(&self, other: &Value) -> Result<Ordering> {
    match (self, other) {
      (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
      (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b).ok_or(Error::Incomparable {
        left: "int",
        right: "float",
      }),
      (Value::Float(a), Value::Int(b)) => {
        a.partial_cmp(&(*b as f64)).ok_or(Error::Incomparable {
          left: "float",
          right: "int",
        })
      }
      (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).ok_or(Error::Incomparable {
        left: "float",
        right: "float",
      }),
      (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
      (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
      (Value::Timestamp(a), Value::Timestamp(b)) => Ok(a.cmp(b)),
      (a, b) => Err(Error::Incomparable {
        left: a.type_name(),
        right: b.type_name(),
      }),
    }
  }
}

/// Looks up a dotted path (e.g. `"stream1.price"`) in a nested map.
pub fn get_path<'a>(map: &'a Map, path: &str) -> Option<&'a Value> {
  let mut segments = path.split('.');
  let mut current = map.get(segments.next()?)?;
  for segment in segments {
    match current {
      Value::Map(m) => current = m.get(segment)?,
      _ => return None,
    }
  }
  Some(current)
}

impl From<serde_json::Value> for Value {
  fn from(v: serde_json::Value) -> Self {
    match v {
      serde_json::Value::Null => Value::Null,
      serde_json::Value::Bool(b) => Value::Bool(b),
      serde_json::Value::Number(n) => {
        if let Some(i) = n.as_i64() {
          Value::Int(i)
        } else {
          Value::Float(n.as_f64().unwrap_or(f64::NAN))
        }
      }
      serde_json::Value::String(s) => Value::String(s),
      serde_json::Value::Array(a) => Value::Array(a.into_iter().map(Value::from).collect()),
      serde_json::Value::Object(o) => {
        Value::Map(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
      }
    }
  }
}

impl From<Value> for serde_json::Value {
  fn from(v: Value) -> Self {
    match v {
      Value::Null => serde_json::Value::Null,
      Value::Bool(b) => serde_json::Value::Bool(b),
      Value::Int(i) => serde_json::Value::from(i),
      Value::Float(f) => serde_json::Value::from(f),
      Value::String(s) => serde_json::Value::String(s),
      Value::Blob(b) => {
        serde_json::Value::Array(b.iter().map(|byte| serde_json::Value::from(*byte)).collect())
      }
      Value::Timestamp(ts) => serde_json::Value::String(ts.to_rfc3339()),
      Value::Array(a) => serde_json::Value::Array(a.into_iter().map(Into::into).collect()),
      Value::Map(m) => {
        serde_json::Value::Object(m.into_iter().map(|(k, v)| (k, v.into())).collect())
      }
    }
  }
}
