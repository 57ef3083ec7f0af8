//! The sink wrapper: like an operator, minus the outbound fan-out.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::config::Context;
use crate::error::{Error, Result};
use crate::node::{Node, NodeKind, Sink};
use crate::pipe::{EdgeConfig, PipeMessage};
use crate::state::{NodeState, StateMachine};
use crate::topology::TopologyCore;
use crate::tuple::EventType;

/// A sink registered in a topology.
///
/// On shutdown, after the input queue has drained, `close` runs exactly
/// once.
pub struct SinkNode {
  name: String,
  ctx: Arc<Context>,
  state: StateMachine,
  pub(crate) sender: mpsc::Sender<PipeMessage>,
  pub(crate) upstreams: Arc<Mutex<HashSet<String>>>,
  graceful: watch::Sender<bool>,
  topology: Weak<TopologyCore>,
  last_error: Mutex<Option<Error>>,
}

impl SinkNode {
  pub(crate) fn new(
    ctx: Arc<Context>,
    name: impl Into<String>,
    topology: Weak<TopologyCore>,
    queue_capacity: usize,
  ) -> (Arc<Self>, mpsc::Receiver<PipeMessage>) {
    let name = name.into();
    let (sender, receiver) = mpsc::channel(queue_capacity.max(8));
    let (graceful, _) = watch::channel(false);
    let node = Arc::new(Self {
      name,
      ctx,
      state: StateMachine::new(NodeState::Initialized),
      sender,
      upstreams: Arc::new(Mutex::new(HashSet::new())),
      graceful,
      topology,
      last_error: Mutex::new(None),
    });
    (node, receiver)
  }

  /// Spawns the worker and marks the node running.
  pub(crate) fn start(
    self: &Arc<Self>,
    sink: Arc<dyn Sink>,
    receiver: mpsc::Receiver<PipeMessage>,
  ) {
    self.state.try_advance(NodeState::Starting);
    let node = Arc::clone(self);
    tokio::spawn(async move { node.run(sink, receiver).await });
    self.state.try_advance(NodeState::Running);
  }

  /// Subscribes this sink to the named upstream. Error cases match
  /// [`OperatorNode::input`](crate::operator_node::OperatorNode::input).
  pub fn input(&self, upstream: &str, config: Option<EdgeConfig>) -> Result<()> {
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

  /// The error recorded from the close hook, if any.
  pub fn last_error(&self) -> Option<String> {
    self.last_error.lock().unwrap().as_ref().map(Error::to_string)
  }

  async fn run(&self, sink: Arc<dyn Sink>, mut rx: mpsc::Receiver<PipeMessage>) {
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
            if let Err(err) = sink.write(&self.ctx, tuple).await {
              warn!(
                node = %self.name,
                tuple_timestamp = %timestamp,
                batch_id,
                error = %err,
                "sink write failed; tuple dropped"
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
    if let Err(err) = sink.close(&self.ctx).await {
      warn!(node = %self.name, error = %err, "close failed");
      *self.last_error.lock().unwrap() = Some(err);
    }
    rx.close();
    while rx.try_recv().is_ok() {}
    self.state.try_advance(NodeState::Stopped);
    debug!(node = %self.name, "sink stopped");
  }
}

#[async_trait]
impl Node for SinkNode {
  fn name(&self) -> &str {
    &self.name
  }

  fn kind(&self) -> NodeKind {
    NodeKind::Sink
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
