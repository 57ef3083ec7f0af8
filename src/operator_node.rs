//! The operator wrapper: a bounded input queue, a dedicated worker, and an
//! outbound fan-out.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::config::Context;
use crate::error::{Error, Result};
use crate::node::{InputConstraints, Node, NodeKind, Operator};
use crate::pipe::{EdgeConfig, FanOut, NodeWriter, PipeMessage};
use crate::state::{NodeState, StateMachine};
use crate::topology::TopologyCore;
use crate::tuple::EventType;

/// An operator registered in a topology.
///
/// The worker pulls tuples in arrival order and hands each to the user's
/// `process`. Per-edge FIFO holds for every single upstream; tuples from
/// different upstreams interleave arbitrarily. `terminate` runs exactly
/// once, after the queue is drained and downstream has been signaled
/// end-of-stream.
pub struct OperatorNode {
  name: String,
  ctx: Arc<Context>,
  state: StateMachine,
  pub(crate) fanout: Arc<FanOut>,
  pub(crate) sender: mpsc::Sender<PipeMessage>,
  pub(crate) upstreams: Arc<Mutex<HashSet<String>>>,
  graceful: watch::Sender<bool>,
  topology: Weak<TopologyCore>,
  constraints: Option<InputConstraints>,
  last_error: Mutex<Option<Error>>,
}

impl OperatorNode {
  pub(crate) fn new(
    ctx: Arc<Context>,
    name: impl Into<String>,
    topology: Weak<TopologyCore>,
    queue_capacity: usize,
    constraints: Option<InputConstraints>,
  ) -> (Arc<Self>, mpsc::Receiver<PipeMessage>) {
    let name = name.into();
    let (sender, receiver) = mpsc::channel(queue_capacity.max(8));
    let (graceful, _) = watch::channel(false);
    let node = Arc::new(Self {
      fanout: Arc::new(FanOut::new(name.clone())),
      name,
      ctx,
      state: StateMachine::new(NodeState::Initialized),
      sender,
      upstreams: Arc::new(Mutex::new(HashSet::new())),
      graceful,
      topology,
      constraints,
      last_error: Mutex::new(None),
    });
    (node, receiver)
  }

  /// Spawns the worker and marks the node running.
  pub(crate) fn start(
    self: &Arc<Self>,
    operator: Arc<dyn Operator>,
    receiver: mpsc::Receiver<PipeMessage>,
  ) {
    self.state.try_advance(NodeState::Starting);
    let node = Arc::clone(self);
    tokio::spawn(async move { node.run(operator, receiver).await });
    self.state.try_advance(NodeState::Running);
  }

  /// Subscribes this operator to the named upstream.
  ///
  /// Fails with `NoSuchNode` for unknown upstreams, `WrongDirection` when
  /// the upstream is a sink, `DuplicateEdge` when the edge already exists,
  /// `WouldCycle` when the edge would close a cycle, and `AlreadyStopped`
  /// when the upstream is no longer accepting subscribers.
  pub fn input(&self, upstream: &str, config: Option<EdgeConfig>) -> Result<()> {
    if let Some(constraints) = &self.constraints {
      let effective = config
        .as_ref()
        .and_then(|c| c.input_name.clone())
        .unwrap_or_else(|| upstream.to_string());
      if !constraints.allowed_input_names.contains(&effective) {
        return Err(Error::DisallowedInputName {
          node: self.name.clone(),
          input_name: effective,
        });
      }
    }
    let core = self.topology.upgrade().ok_or(Error::TopologyStopped)?;
    core.connect(
      upstream,
      &self.name,
      self.sender.clone(),
      self.state.clone(),
      &self.upstreams,
      config,
    )
  }

  /// Lets the worker finish once every upstream has delivered
  /// end-of-stream. Part of coordinated shutdown.
  pub(crate) fn enable_graceful_stop(&self) {
    self.graceful.send_replace(true);
  }

  /// The error recorded from the terminate hook, if any.
  pub fn last_error(&self) -> Option<String> {
    self.last_error.lock().unwrap().as_ref().map(Error::to_string)
  }

  async fn run(&self, operator: Arc<dyn Operator>, mut rx: mpsc::Receiver<PipeMessage>) {
    let writer = NodeWriter::new(self.name.clone(), self.state.clone(), Arc::clone(&self.fanout));
    let mut graceful = self.graceful.subscribe();
    loop {
      if *graceful.borrow() && self.upstreams.lock().unwrap().is_empty() {
        break;
      }
      tokio::select! {
        msg = rx.recv() => match msg {
          Some(PipeMessage::Tuple(mut tuple)) => {
            tuple.trace_event(&self.ctx, EventType::Received, &self.name);
            let (timestamp, batch_id) = (tuple.timestamp, tuple.batch_id);
            if let Err(err) = operator.process(&self.ctx, tuple, &writer).await {
              warn!(
                node = %self.name,
                tuple_timestamp = %timestamp,
                batch_id,
                error = %err,
                "process failed; tuple dropped"
              );
            }
          }
          Some(PipeMessage::Eos { from }) => {
            self.upstreams.lock().unwrap().remove(&from);
          }
          None => break,
        },
        res = graceful.changed() => {
          if res.is_err() {
            break;
          }
        }
        _ = self.state.wait(NodeState::Stopping) => {
          // Explicit stop: pending input is discarded, not processed.
          while rx.try_recv().is_ok() {}
          break;
        }
      }
    }
    self.state.try_advance(NodeState::Stopping);
    self.fanout.close().await;
    if let Err(err) = operator.terminate(&self.ctx).await {
      warn!(node = %self.name, error = %err, "terminate failed");
      *self.last_error.lock().unwrap() = Some(err);
    }
    rx.close();
    while rx.try_recv().is_ok() {}
    self.state.try_advance(NodeState::Stopped);
    debug!(node = %self.name, "operator stopped");
  }
}

#[async_trait]
impl Node for OperatorNode {
  fn name(&self) -> &str {
    &self.name
  }

  fn kind(&self) -> NodeKind {
    NodeKind::Operator
  }

  fn state(&self) -> &StateMachine {
    &self.state
  }

  async fn stop(&self) -> Result<()> {
    self.state.try_advance(NodeState::Stopping);
    self.state.wait(NodeState::Stopped).await;
    Ok(())
  }
}
