//! Scalar expressions evaluated against a row map.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::{get_path, Map, Value};

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
  /// Addition; also concatenates two strings.
  Add,
  /// Subtraction.
  Subtract,
  /// Multiplication.
  Multiply,
  /// Division. Integer division by zero is an error.
  Divide,
  /// Modulo. Integer modulo by zero is an error.
  Modulo,
  /// Equality (checked structural equality).
  Eq,
  /// Inequality.
  Ne,
  /// Less than.
  Lt,
  /// Less than or equal.
  Le,
  /// Greater than.
  Gt,
  /// Greater than or equal.
  Ge,
  /// Logical AND (operands coerced with `to_bool`, short-circuiting).
  And,
  /// Logical OR (operands coerced with `to_bool`, short-circuiting).
  Or,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
  /// Logical negation via `to_bool`.
  Not,
  /// Numeric negation.
  Minus,
}

/// A scalar expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
  /// A literal value.
  Const(Value),
  /// A dotted-path field reference into the row (e.g. `"trades.price"`).
  Field(String),
  /// A unary operation.
  UnaryOp {
    /// The operator.
    op: UnOp,
    /// The operand.
    expr: Box<Expr>,
  },
  /// A binary operation.
  BinaryOp {
    /// The left operand.
    left: Box<Expr>,
    /// The operator.
    op: BinOp,
    /// The right operand.
    right: Box<Expr>,
  },
}

impl Expr {
  /// Shorthand for a field reference.
  pub fn field(path: impl Into<String>) -> Expr {
    Expr::Field(path.into())
  }

  /// Shorthand for a literal.
  pub fn lit(value: Value) -> Expr {
    Expr::Const(value)
  }

  /// Shorthand for a binary operation.
  pub fn binary(left: Expr, op: BinOp, right: Expr) -> Expr {
    Expr::BinaryOp {
      left: Box::new(left),
      op,
      right: Box::new(right),
    }
  }

  /// Evaluates this expression against a row.
  ///
  /// A field reference that does not resolve is a `NoSuchField` error,
  /// not a null.
  pub fn eval(&self, row: &Map) -> Result<Value> {
    match self {
      Expr::Const(v) => Ok(v.clone()),
      Expr::Field(path) => get_path(row, path)
        .cloned()
        .ok_or_else(|| Error::NoSuchField(path.clone())),
      Expr::UnaryOp { op, expr } => {
        let v = expr.eval(row)?;
        match op {
          UnOp::Not => Ok(Value::Bool(!v.to_bool())),
          UnOp::Minus => match v {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(Error::TypeMismatch {
              expected: "int or float",
              actual: other.type_name(),
            }),
          },
        }
      }
      Expr::BinaryOp { left, op, right } => match op {
        BinOp::And => {
          let l = left.eval(row)?;
          if !l.to_bool() {
            return Ok(Value::Bool(false));
          }
          Ok(Value::Bool(right.eval(row)?.to_bool()))
        }
        BinOp::Or => {
          let l = left.eval(row)?;
          if l.to_bool() {
            return Ok(Value::Bool(true));
          }
          Ok(Value::Bool(right.eval(row)?.to_bool()))
        }
        _ => {
          let l = left.eval(row)?;
          let r = right.eval(row)?;
          apply_binop(*op, &l, &r)
        }
      },
    }
  }
}

fn apply_binop(op: BinOp, l: &Value, r: &Value) -> Result<Value> {
  match op {
    BinOp::Eq => Ok(Value::Bool(l.equals(r)?)),
    BinOp::Ne => Ok(Value::Bool(!l.equals(r)?)),
    BinOp::Lt => Ok(Value::Bool(l.compare(r)?.is_lt())),
    BinOp::Le => Ok(Value::Bool(l.compare(r)?.is_le())),
    BinOp::Gt => Ok(Value::Bool(l.compare(r)?.is_gt())),
    BinOp::Ge => Ok(Value::Bool(l.compare(r)?.is_ge())),
    BinOp::Add => match (l, r) {
      (Value::String(a), Value::String(b)) => {
        let mut s = a.clone();
        s.push_str(b);
        Ok(Value::String(s))
      }
      _ => numeric_binop(op, l, r),
    },
    BinOp::Subtract | BinOp::Multiply | BinOp::Divide | BinOp::Modulo => numeric_binop(op, l, r),
    BinOp::And | BinOp::Or => unreachable!("short-circuited in eval"),
  }
}

fn numeric_binop(op: BinOp, l: &Value, r: &Value) -> Result<Value> {
  if let (Value::Int(a), Value::Int(b)) = (l, r) {
    return match op {
      BinOp::Add => Ok(Value::Int(a.wrapping_add(*b))),
      BinOp::Subtract => Ok(Value::Int(a.wrapping_sub(*b))),
      BinOp::Multiply => Ok(Value::Int(a.wrapping_mul(*b))),
      BinOp::Divide => {
        if *b == 0 {
          Err(Error::DivisionByZero)
        } else {
          Ok(Value::Int(a.wrapping_div(*b)))
        }
      }
      BinOp::Modulo => {
        if *b == 0 {
          Err(Error::DivisionByZero)
        } else {
          Ok(Value::Int(a.wrapping_rem(*b)))
        }
      }
      _ => unreachable!(),
    };
  }
  let a = l.as_float()?;
  let b = r.as_float()?;
  let result = match op {
    BinOp::Add => a + b,
    BinOp::Subtract => a - b,
    BinOp::Multiply => a * b,
    BinOp::Divide => a / b,
    BinOp::Modulo => a % b,
    _ => unreachable!(),
  };
  Ok(Value::Float(result))
}
