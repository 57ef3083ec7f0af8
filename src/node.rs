//! User-facing node behavior traits.
//!
//! A topology hosts three node kinds: [`Source`]s produce tuples, [`Operator`]s
//! transform them, and [`Sink`]s consume them. The engine owns one dedicated
//! worker per node and calls these hooks from it; all methods take `&self`, so
//! implementations keep their mutable state behind interior mutability.

use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::config::Context;
use crate::error::Result;
use crate::pipe::Writer;
use crate::state::StateMachine;
use crate::tuple::Tuple;

/// The three node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
  /// A tuple producer.
  Source,
  /// A stateful transformer.
  Operator,
  /// A consumer.
  Sink,
}

impl fmt::Display for NodeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      NodeKind::Source => "source",
      NodeKind::Operator => "operator",
      NodeKind::Sink => "sink",
    };
    write!(f, "{}", s)
  }
}

/// Per-node configuration accepted by the `add_*` methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
  /// Capacity of the node's bounded input queue. Clamped to at least 8.
  /// Sources have no input queue and ignore this.
  pub queue_capacity: usize,
}

impl Default for NodeConfig {
  fn default() -> Self {
    Self {
      queue_capacity: 1024,
    }
  }
}

/// A tuple producer.
///
/// `generate_stream` is invoked at most once, on the node's dedicated
/// worker. It pushes tuples through the supplied writer until it has
/// nothing more to produce or until writes start failing with
/// `AlreadyStopped`.
#[async_trait]
pub trait Source: Send + Sync {
  /// Produces the stream. Returning (with or without an error) moves the
  /// source to `Stopping` and then `Stopped`; an error stops only this
  /// source, never the topology.
  async fn generate_stream(&self, ctx: &Context, writer: &dyn Writer) -> Result<()>;

  /// Called when the node is asked to stop, before the engine waits for
  /// `generate_stream` to return. A source that can block outside the
  /// writer should interrupt itself here. The default does nothing.
  async fn stop(&self, ctx: &Context) -> Result<()> {
    let _ = ctx;
    Ok(())
  }
}

/// Requirements an operator declares about the names of its input edges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputConstraints {
  /// The input names this operator accepts. An edge whose effective input
  /// name (the upstream name, or the edge's rename) is not in the set is
  /// rejected at wiring time.
  pub allowed_input_names: std::collections::HashSet<String>,
}

/// A stateful transformer.
#[async_trait]
pub trait Operator: Send + Sync {
  /// Called once before the node starts receiving tuples. An error here
  /// fails the `add_operator` call. The default does nothing.
  async fn init(&self, ctx: &Context) -> Result<()> {
    let _ = ctx;
    Ok(())
  }

  /// Input requirements enforced when edges are wired. The default,
  /// `None`, accepts any input.
  fn input_constraints(&self) -> Option<InputConstraints> {
    None
  }

  /// Called for every tuple pulled off the input queue, in arrival order.
  /// An error is logged with the node identity and the tuple is dropped;
  /// the node keeps running.
  async fn process(&self, ctx: &Context, tuple: Tuple, writer: &dyn Writer) -> Result<()>;

  /// Called exactly once, after the worker has drained the input queue and
  /// signaled end-of-stream downstream. An error is logged and otherwise
  /// ignored. The default does nothing.
  async fn terminate(&self, ctx: &Context) -> Result<()> {
    let _ = ctx;
    Ok(())
  }
}

/// The function type wrapped by [`OperatorFunc`].
pub type OperatorFn =
  for<'a> fn(&'a Context, Tuple, &'a dyn Writer) -> BoxFuture<'a, Result<()>>;

/// Wraps a plain function as an [`Operator`] with a no-op terminator.
///
/// ```
/// use futures::future::BoxFuture;
/// use tupleflow::{Context, OperatorFunc, Result, Tuple, Writer};
///
/// fn forward<'a>(ctx: &'a Context, t: Tuple, w: &'a dyn Writer) -> BoxFuture<'a, Result<()>> {
///   Box::pin(async move { w.write(ctx, t).await })
/// }
///
/// let op = OperatorFunc::new(forward);
/// ```
pub struct OperatorFunc {
  f: OperatorFn,
}

impl OperatorFunc {
  /// Wraps the given function.
  pub fn new(f: OperatorFn) -> Self {
    Self { f }
  }
}

#[async_trait]
impl Operator for OperatorFunc {
  async fn process(&self, ctx: &Context, tuple: Tuple, writer: &dyn Writer) -> Result<()> {
    (self.f)(ctx, tuple, writer).await
  }
}

/// A consumer.
#[async_trait]
pub trait Sink: Send + Sync {
  /// Called for every tuple pulled off the input queue, in arrival order.
  /// Errors are logged and the tuple is dropped; the node keeps running.
  async fn write(&self, ctx: &Context, tuple: Tuple) -> Result<()>;

  /// Called exactly once after the worker has drained the input queue.
  /// An error is logged and otherwise ignored. The default does nothing.
  async fn close(&self, ctx: &Context) -> Result<()> {
    let _ = ctx;
    Ok(())
  }
}

/// The kind-agnostic view of a registered node.
#[async_trait]
pub trait Node: Send + Sync {
  /// The node's unique name within its topology.
  fn name(&self) -> &str;

  /// Which of the three kinds this node is.
  fn kind(&self) -> NodeKind;

  /// The node's lifecycle state.
  fn state(&self) -> &StateMachine;

  /// Stops the node and waits until it reaches `Stopped`. Idempotent.
  async fn stop(&self) -> Result<()>;
}
