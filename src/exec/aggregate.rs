//! Aggregate functions, dispatched by identifier.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::Value;

/// The built-in aggregate functions.
///
/// Null inputs are skipped, following SQL semantics: `count` counts
/// non-null inputs, and the others yield `Null` over an empty (or all-null)
/// input set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateFunc {
  /// Number of non-null inputs.
  Count,
  /// Numeric sum.
  Sum,
  /// Numeric mean, always a float.
  Avg,
  /// Minimum by value ordering.
  Min,
  /// Maximum by value ordering.
  Max,
}

impl AggregateFunc {
  /// Resolves a function by its identifier.
  pub fn lookup(name: &str) -> Result<Self> {
    match name {
      "count" => Ok(AggregateFunc::Count),
      "sum" => Ok(AggregateFunc::Sum),
      "avg" => Ok(AggregateFunc::Avg),
      "min" => Ok(AggregateFunc::Min),
      "max" => Ok(AggregateFunc::Max),
      other => Err(Error::UnknownAggregate(other.to_string())),
    }
  }

  /// The function's identifier.
  pub fn name(&self) -> &'static str {
    match self {
      AggregateFunc::Count => "count",
      AggregateFunc::Sum => "sum",
      AggregateFunc::Avg => "avg",
      AggregateFunc::Min => "min",
      AggregateFunc::Max => "max",
    }
  }

  /// Computes the aggregate over the collected inputs.
  pub fn apply(&self, inputs: &[Value]) -> Result<Value> {
    let values: Vec<&Value> = inputs.iter().filter(|v| !v.is_null()).collect();
    match self {
      AggregateFunc::Count => Ok(Value::Int(values.len() as i64)),
      AggregateFunc::Sum => sum(&values),
      AggregateFunc::Avg => {
        if values.is_empty() {
          return Ok(Value::Null);
        }
        let total = sum(&values)?.as_float()?;
        Ok(Value::Float(total / values.len() as f64))
      }
      AggregateFunc::Min => extremum(&values, std::cmp::Ordering::Less),
      AggregateFunc::Max => extremum(&values, std::cmp::Ordering::Greater),
    }
  }
}

fn sum(values: &[&Value]) -> Result<Value> {
  if values.is_empty() {
    return Ok(Value::Null);
  }
  let all_int = values.iter().all(|v| matches!(v, Value::Int(_)));
  if all_int {
    let mut total: i64 = 0;
    for v in values {
      total = total.wrapping_add(v.as_int()?);
    }
    Ok(Value::Int(total))
  } else {
    let mut total = 0.0;
    for v in values {
      total += v.as_float()?;
    }
    Ok(Value::Float(total))
  }
}

fn extremum(values: &[&Value], keep: std::cmp::Ordering) -> Result<Value> {
  let mut iter = values.iter();
  let Some(first) = iter.next() else {
    return Ok(Value::Null);
  };
  let mut best: &Value = first;
  for v in iter {
    if v.compare(best)? == keep {
      best = v;
    }
  }
  Ok(best.clone())
}
