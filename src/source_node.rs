//! The source wrapper: runs a user [`Source`] on a dedicated worker.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::config::Context;
use crate::error::{Error, Result};
use crate::node::{Node, NodeKind, Source};
use crate::pipe::{FanOut, NodeWriter};
use crate::state::{NodeState, StateMachine};

/// A source registered in a topology.
///
/// The wrapper invokes the user's `generate_stream` exactly once on its
/// worker task. When the source is asked to stop, the writer starts
/// rejecting with `AlreadyStopped`; once `generate_stream` returns, the
/// fan-out signals end-of-stream downstream and the node reaches `Stopped`.
pub struct SourceNode {
  name: String,
  ctx: Arc<Context>,
  state: StateMachine,
  source: Arc<dyn Source>,
  pub(crate) fanout: Arc<FanOut>,
  last_error: Mutex<Option<Error>>,
}

impl SourceNode {
  pub(crate) fn new(ctx: Arc<Context>, name: impl Into<String>, source: Arc<dyn Source>) -> Arc<Self> {
    let name = name.into();
    Arc::new(Self {
      fanout: Arc::new(FanOut::new(name.clone())),
      name,
      ctx,
      state: StateMachine::new(NodeState::Initialized),
      source,
      last_error: Mutex::new(None),
    })
  }

  /// Spawns the worker and marks the node running.
  pub(crate) fn start(self: &Arc<Self>) {
    self.state.try_advance(NodeState::Starting);
    let node = Arc::clone(self);
    tokio::spawn(async move { node.run().await });
    self.state.try_advance(NodeState::Running);
  }

  async fn run(&self) {
    let writer = NodeWriter::new(self.name.clone(), self.state.clone(), Arc::clone(&self.fanout));
    // Wait for start() to finish the transition; any later state satisfies
    // this too, in which case generation is skipped.
    let state = self.state.wait(NodeState::Running).await;
    if state < NodeState::Stopping {
      debug!(node = %self.name, "source generating");
      match self.source.generate_stream(&self.ctx, &writer).await {
        Ok(()) => {}
        Err(Error::AlreadyStopped) => {}
        Err(err) => {
          error!(node = %self.name, error = %err, "source terminated with an error");
          *self.last_error.lock().unwrap() = Some(err);
        }
      }
    }
    self.state.try_advance(NodeState::Stopping);
    self.fanout.close().await;
    self.state.try_advance(NodeState::Stopped);
    debug!(node = %self.name, "source stopped");
  }

  /// Pauses emission. The writer blocks until `resume` or stop.
  pub fn pause(&self) -> Result<()> {
    self.state.set(NodeState::Paused)
  }

  /// Resumes a paused source.
  pub fn resume(&self) -> Result<()> {
    self.state.set(NodeState::Running)
  }

  /// The error `generate_stream` returned, if any.
  pub fn last_error(&self) -> Option<String> {
    self.last_error.lock().unwrap().as_ref().map(Error::to_string)
  }
}

#[async_trait]
impl Node for SourceNode {
  fn name(&self) -> &str {
    &self.name
  }

  fn kind(&self) -> NodeKind {
    NodeKind::Source
  }

  fn state(&self) -> &StateMachine {
    &self.state
  }

  async fn stop(&self) -> Result<()> {
    if self.state.try_advance(NodeState::Stopping) {
      // Give the source a chance to interrupt a blocked generate loop.
      if let Err(err) = self.source.stop(&self.ctx).await {
        warn!(node = %self.name, error = %err, "source stop hook failed");
      }
    }
    self.state.wait(NodeState::Stopped).await;
    Ok(())
  }
}
