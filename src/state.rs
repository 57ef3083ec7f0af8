//! The node lifecycle state machine.
//!
//! Every node, and the topology itself, owns a [`StateMachine`]: a monotonic
//! state value behind a `tokio::sync::watch` channel. All transitions are
//! broadcast, so any number of tasks can [`StateMachine::wait`] for a state
//! concurrently with transitions happening on other tasks.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{Error, Result};

/// Lifecycle states, ordered.
///
/// States only move forward along this ordering, with one exception:
/// `Paused -> Running` (resume). `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeState {
  /// Created but not yet started.
  Initialized,
  /// Start requested; the worker is coming up.
  Starting,
  /// The worker is processing.
  Running,
  /// Temporarily not emitting; resumable.
  Paused,
  /// Shutdown requested; draining.
  Stopping,
  /// Terminal state. The input queue is drained and closed.
  Stopped,
}

impl fmt::Display for NodeState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      NodeState::Initialized => "initialized",
      NodeState::Starting => "starting",
      NodeState::Running => "running",
      NodeState::Paused => "paused",
      NodeState::Stopping => "stopping",
      NodeState::Stopped => "stopped",
    };
    write!(f, "{}", s)
  }
}

/// A broadcastable lifecycle state variable.
///
/// Cloning a `StateMachine` yields another handle onto the same state.
#[derive(Clone)]
pub struct StateMachine {
  tx: Arc<watch::Sender<NodeState>>,
}

impl fmt::Debug for StateMachine {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("StateMachine").field(&self.get()).finish()
  }
}

impl StateMachine {
  /// Creates a state machine starting in the given state.
  pub fn new(initial: NodeState) -> Self {
    let (tx, _) = watch::channel(initial);
    Self { tx: Arc::new(tx) }
  }

  /// Non-blocking snapshot of the current state.
  pub fn get(&self) -> NodeState {
    *self.tx.borrow()
  }

  /// Atomic transition. Rejects illegal transitions with `WrongState`.
  ///
  /// Setting the current state again is a no-op. Every accepted transition
  /// is broadcast to all waiters.
  pub fn set(&self, to: NodeState) -> Result<()> {
    let mut result = Ok(());
    self.tx.send_if_modified(|current| {
      if to == *current {
        return false;
      }
      let legal = to > *current || (*current == NodeState::Paused && to == NodeState::Running);
      if legal {
        *current = to;
        true
      } else {
        result = Err(Error::WrongState {
          from: *current,
          to,
        });
        false
      }
    });
    result
  }

  /// Moves forward to `to` if the current state is earlier; otherwise a
  /// no-op. Returns true when a transition happened.
  pub fn try_advance(&self, to: NodeState) -> bool {
    self.tx.send_if_modified(|current| {
      if *current < to {
        *current = to;
        true
      } else {
        false
      }
    })
  }

  /// Atomically transitions to `to` when the current state satisfies the
  /// predicate. Returns true when the transition happened.
  pub fn advance_if(&self, pred: impl Fn(NodeState) -> bool, to: NodeState) -> bool {
    self.tx.send_if_modified(|current| {
      if pred(*current) && *current < to {
        *current = to;
        true
      } else {
        false
      }
    })
  }

  /// Blocks until the current state is at or past `target`.
  ///
  /// A waiter for `Running` may be woken by `Running` or any later state.
  /// Returns the state that satisfied the wait.
  pub async fn wait(&self, target: NodeState) -> NodeState {
    let mut rx = self.tx.subscribe();
    let result = match rx.wait_for(|s| *s >= target).await {
      Ok(state) => *state,
      // The sender lives as long as this handle, so this arm is unreachable
      // in practice; report the terminal state if it ever fires.
      Err(_) => NodeState::Stopped,
    };
    result
  }

  /// Blocks while the state is `Paused`. Returns the first non-paused state.
  pub async fn wait_resumed(&self) -> NodeState {
    let mut rx = self.tx.subscribe();
    let result = match rx.wait_for(|s| *s != NodeState::Paused).await {
      Ok(state) => *state,
      Err(_) => NodeState::Stopped,
    };
    result
  }
}
