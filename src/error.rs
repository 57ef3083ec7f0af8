//! Error types for topology construction, node lifecycle, and plan execution.

use std::fmt;

use crate::node::NodeKind;
use crate::state::NodeState;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the engine.
///
/// Lifecycle errors (`DuplicateName`, `NoSuchNode`, ...) are returned to the
/// caller and never affect running nodes. `User` wraps failures propagated
/// out of user-supplied source/operator/sink code.
#[derive(Debug)]
pub enum Error {
  /// The name is already in use by a node of any kind.
  DuplicateName(String),
  /// No node with the given name exists.
  NoSuchNode(String),
  /// A typed lookup found a node of a different kind.
  WrongKind {
    /// The name that was looked up.
    name: String,
    /// The kind requested by the caller.
    expected: NodeKind,
    /// The kind actually registered under the name.
    actual: NodeKind,
  },
  /// The named upstream cannot feed a downstream (e.g. a sink as upstream).
  WrongDirection {
    /// The upstream that was named.
    upstream: String,
    /// Its kind.
    kind: NodeKind,
  },
  /// The same upstream was declared twice for the same downstream.
  DuplicateEdge {
    /// The upstream node name.
    upstream: String,
    /// The downstream node name.
    downstream: String,
  },
  /// Adding the edge would close a cycle.
  WouldCycle {
    /// The upstream node name.
    upstream: String,
    /// The downstream node name.
    downstream: String,
  },
  /// The edge's input name violates the operator's input constraints.
  DisallowedInputName {
    /// The downstream node whose constraints were violated.
    node: String,
    /// The effective input name of the rejected edge.
    input_name: String,
  },
  /// A mutation was attempted on a stopping or stopped topology.
  TopologyStopped,
  /// A write or subscription reached an entity that is stopping or stopped.
  AlreadyStopped,
  /// An illegal lifecycle transition was requested.
  WrongState {
    /// The state the entity was in.
    from: NodeState,
    /// The state that was requested.
    to: NodeState,
  },
  /// An error propagated from user source/operator/sink code.
  User(Box<dyn std::error::Error + Send + Sync>),
  /// A value had an unexpected type tag.
  TypeMismatch {
    /// The expected type tag.
    expected: &'static str,
    /// The actual type tag.
    actual: &'static str,
  },
  /// Two values cannot be compared.
  Incomparable {
    /// Type tag of the left operand.
    left: &'static str,
    /// Type tag of the right operand.
    right: &'static str,
  },
  /// Integer division or modulo by zero.
  DivisionByZero,
  /// No aggregate function is registered under the given name.
  UnknownAggregate(String),
  /// An expression referenced a field missing from the row.
  NoSuchField(String),
}

impl Error {
  /// Wraps an arbitrary user error.
  pub fn user<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Error::User(Box::new(err))
  }

  /// Creates a `User` error from a plain message.
  pub fn custom(msg: impl Into<String>) -> Self {
    Error::User(msg.into().into())
  }
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Error::DuplicateName(name) => {
        write!(f, "node name '{}' is already in use", name)
      }
      Error::NoSuchNode(name) => write!(f, "node '{}' was not found", name),
      Error::WrongKind {
        name,
        expected,
        actual,
      } => write!(f, "node '{}' is a {}, not a {}", name, actual, expected),
      Error::WrongDirection { upstream, kind } => write!(
        f,
        "node '{}' is a {} and cannot be used as an upstream",
        upstream, kind
      ),
      Error::DuplicateEdge {
        upstream,
        downstream,
      } => write!(f, "'{}' is already an input of '{}'", upstream, downstream),
      Error::WouldCycle {
        upstream,
        downstream,
      } => write!(
        f,
        "connecting '{}' to '{}' would create a cycle",
        upstream, downstream
      ),
      Error::DisallowedInputName { node, input_name } => write!(
        f,
        "node '{}' does not accept an input named '{}'",
        node, input_name
      ),
      Error::TopologyStopped => write!(f, "the topology is already stopped"),
      Error::AlreadyStopped => write!(f, "the node is already stopped"),
      Error::WrongState { from, to } => {
        write!(f, "illegal state transition from {} to {}", from, to)
      }
      Error::User(err) => write!(f, "user error: {}", err),
      Error::TypeMismatch { expected, actual } => {
        write!(f, "expected a {} value but got a {}", expected, actual)
      }
      Error::Incomparable { left, right } => {
        write!(f, "cannot compare a {} value with a {} value", left, right)
      }
      Error::DivisionByZero => write!(f, "integer division by zero"),
      Error::UnknownAggregate(name) => {
        write!(f, "unknown aggregate function '{}'", name)
      }
      Error::NoSuchField(path) => write!(f, "no field at path '{}'", path),
    }
  }
}

impl std::error::Error for Error {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Error::User(err) => Some(err.as_ref()),
      _ => None,
    }
  }
}
