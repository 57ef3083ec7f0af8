//! The in-memory edge fabric.
//!
//! Every source and operator owns a [`FanOut`]: the output endpoint that
//! multiplexes a written tuple onto the bounded input queue of each current
//! subscriber. Delivery is a blocking enqueue per subscriber in subscription
//! order, cancelled edge-locally when either side of the edge starts
//! stopping. End-of-stream travels in-band as a [`PipeMessage::Eos`]
//! sentinel so that drain-then-terminate respects per-edge FIFO.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::Context;
use crate::error::{Error, Result};
use crate::exec::Expr;
use crate::state::{NodeState, StateMachine};
use crate::tuple::{EventType, Tuple};

/// A message travelling through a node's input queue.
#[derive(Debug, Clone)]
pub(crate) enum PipeMessage {
  /// A data tuple.
  Tuple(Tuple),
  /// End-of-stream from the named upstream. Queued behind every tuple the
  /// upstream ever delivered on this edge.
  Eos {
    /// The upstream that finished.
    from: String,
  },
}

/// Per-edge configuration.
#[derive(Debug, Clone, Default)]
pub struct EdgeConfig {
  /// Rewrites `Tuple::input_name` on delivery. Defaults to the upstream
  /// node's name.
  pub input_name: Option<String>,
  /// Drops tuples for which this expression does not evaluate truthy,
  /// before they enter the downstream queue.
  pub filter: Option<Expr>,
}

/// The write endpoint handed to sources and operators.
#[async_trait]
pub trait Writer: Send + Sync {
  /// Routes one tuple to every current subscriber.
  ///
  /// Blocks while a subscriber's queue is full. Fails with
  /// `AlreadyStopped` once the writing node itself is stopping.
  async fn write(&self, ctx: &Context, tuple: Tuple) -> Result<()>;
}

/// One subscriber of a fan-out.
#[derive(Clone)]
struct Subscriber {
  name: String,
  sender: mpsc::Sender<PipeMessage>,
  state: StateMachine,
  config: EdgeConfig,
}

/// The output endpoint of a source or operator.
pub(crate) struct FanOut {
  /// Name of the owning node; becomes `input_name` downstream unless the
  /// edge renames it.
  owner: String,
  subscribers: Mutex<Vec<Subscriber>>,
  closed: AtomicBool,
}

impl FanOut {
  pub(crate) fn new(owner: impl Into<String>) -> Self {
    Self {
      owner: owner.into(),
      subscribers: Mutex::new(Vec::new()),
      closed: AtomicBool::new(false),
    }
  }

  /// Registers a downstream queue. The new subscriber sees tuples from the
  /// next write on; a write whose snapshot was taken earlier is not
  /// redelivered.
  pub(crate) fn subscribe(
    &self,
    name: impl Into<String>,
    sender: mpsc::Sender<PipeMessage>,
    state: StateMachine,
    config: EdgeConfig,
  ) -> Result<()> {
    if self.closed.load(Ordering::Acquire) {
      return Err(Error::AlreadyStopped);
    }
    self.subscribers.lock().unwrap().push(Subscriber {
      name: name.into(),
      sender,
      state,
      config,
    });
    Ok(())
  }

  /// Drops every subscription held for the named downstream.
  pub(crate) fn unsubscribe(&self, name: &str) {
    self.subscribers.lock().unwrap().retain(|s| s.name != name);
  }

  /// Names of the current subscribers, in subscription order.
  pub(crate) fn subscriber_names(&self) -> Vec<String> {
    self
      .subscribers
      .lock()
      .unwrap()
      .iter()
      .map(|s| s.name.clone())
      .collect()
  }

  /// Delivers one tuple to every subscriber in the current snapshot.
  ///
  /// Subscribers that are stopping are skipped silently; with no
  /// subscribers at all the write succeeds as a no-op. A blocked enqueue
  /// aborts with `AlreadyStopped` when the writing node reaches
  /// `Stopping`, which keeps shutdown finite even while downstream queues
  /// are full.
  pub(crate) async fn write(&self, tuple: Tuple, own_state: &StateMachine) -> Result<()> {
    let snapshot: Vec<Subscriber> = self.subscribers.lock().unwrap().clone();
    for sub in snapshot {
      if sub.state.get() >= NodeState::Stopping {
        continue;
      }
      if let Some(filter) = &sub.config.filter {
        match filter.eval(&tuple.data) {
          Ok(v) => {
            if !v.to_bool() {
              continue;
            }
          }
          Err(err) => {
            warn!(
              edge_from = %self.owner,
              edge_to = %sub.name,
              error = %err,
              "edge filter failed; dropping tuple on this edge"
            );
            continue;
          }
        }
      }
      let mut delivered = tuple.clone();
      delivered.input_name = sub
        .config
        .input_name
        .clone()
        .unwrap_or_else(|| self.owner.clone());
      tokio::select! {
        res = sub.sender.send(PipeMessage::Tuple(delivered)) => {
          if res.is_err() {
            // The downstream worker already went away.
            continue;
          }
        }
        _ = sub.state.wait(NodeState::Stopping) => continue,
        _ = own_state.wait(NodeState::Stopping) => return Err(Error::AlreadyStopped),
      }
    }
    Ok(())
  }

  /// Appends the end-of-stream sentinel to every subscriber's queue and
  /// empties the list. Later writes become no-ops and later subscriptions
  /// fail.
  pub(crate) async fn close(&self) {
    self.closed.store(true, Ordering::Release);
    let drained: Vec<Subscriber> = {
      let mut subs = self.subscribers.lock().unwrap();
      std::mem::take(&mut *subs)
    };
    for sub in drained {
      if sub.state.get() >= NodeState::Stopping {
        continue;
      }
      let eos = PipeMessage::Eos {
        from: self.owner.clone(),
      };
      tokio::select! {
        _ = sub.sender.send(eos) => {}
        _ = sub.state.wait(NodeState::Stopping) => {}
      }
    }
  }
}

/// The [`Writer`] implementation wired into a source's or operator's
/// user-facing hook: enforces the owner's lifecycle, annotates the trace,
/// and forwards to the fan-out.
pub struct NodeWriter {
  name: String,
  state: StateMachine,
  fanout: std::sync::Arc<FanOut>,
}

impl NodeWriter {
  pub(crate) fn new(
    name: impl Into<String>,
    state: StateMachine,
    fanout: std::sync::Arc<FanOut>,
  ) -> Self {
    Self {
      name: name.into(),
      state,
      fanout,
    }
  }
}

#[async_trait]
impl Writer for NodeWriter {
  async fn write(&self, ctx: &Context, mut tuple: Tuple) -> Result<()> {
    loop {
      let state = self.state.get();
      if state >= NodeState::Stopping {
        return Err(Error::AlreadyStopped);
      }
      if state == NodeState::Paused {
        self.state.wait_resumed().await;
        continue;
      }
      break;
    }
    tuple.trace_event(ctx, EventType::Output, &self.name);
    self.fanout.write(tuple, &self.state).await
  }
}
