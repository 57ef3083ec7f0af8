//! The dynamic topology: nodes may be added, wired, and removed while the
//! topology is running.
//!
//! The topology owns the name-to-node registry (names are unique across all
//! three kinds), hands out wrapper handles, and orchestrates coordinated
//! shutdown: sources are stopped in parallel, end-of-stream cascades through
//! the fabric in topological order, and the topology reaches `Stopped` only
//! after every node has.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::Context;
use crate::error::{Error, Result};
use crate::node::{Node, NodeConfig, NodeKind, Operator, Sink, Source};
use crate::operator_node::OperatorNode;
use crate::pipe::{EdgeConfig, FanOut, PipeMessage};
use crate::sink_node::SinkNode;
use crate::source_node::SourceNode;
use crate::state::{NodeState, StateMachine};

/// A registry entry: a tagged, shared reference to one of the three
/// wrapper types.
#[derive(Clone)]
pub(crate) enum NodeEntry {
  Source(Arc<SourceNode>),
  Operator(Arc<OperatorNode>),
  Sink(Arc<SinkNode>),
}

impl NodeEntry {
  fn kind(&self) -> NodeKind {
    match self {
      NodeEntry::Source(_) => NodeKind::Source,
      NodeEntry::Operator(_) => NodeKind::Operator,
      NodeEntry::Sink(_) => NodeKind::Sink,
    }
  }

  fn state(&self) -> &StateMachine {
    match self {
      NodeEntry::Source(n) => n.state(),
      NodeEntry::Operator(n) => n.state(),
      NodeEntry::Sink(n) => n.state(),
    }
  }

  fn as_node(&self) -> Arc<dyn Node> {
    match self {
      NodeEntry::Source(n) => Arc::clone(n) as Arc<dyn Node>,
      NodeEntry::Operator(n) => Arc::clone(n) as Arc<dyn Node>,
      NodeEntry::Sink(n) => Arc::clone(n) as Arc<dyn Node>,
    }
  }

  fn fanout(&self) -> Option<&Arc<FanOut>> {
    match self {
      NodeEntry::Source(n) => Some(&n.fanout),
      NodeEntry::Operator(n) => Some(&n.fanout),
      NodeEntry::Sink(_) => None,
    }
  }

  fn enable_graceful_stop(&self) {
    match self {
      NodeEntry::Source(_) => {}
      NodeEntry::Operator(n) => n.enable_graceful_stop(),
      NodeEntry::Sink(n) => n.enable_graceful_stop(),
    }
  }
}

/// Shared topology state referenced weakly by node handles.
pub(crate) struct TopologyCore {
  name: String,
  ctx: Arc<Context>,
  state: StateMachine,
  registry: Mutex<HashMap<String, NodeEntry>>,
}

impl TopologyCore {
  /// Wires `upstream -> downstream`. Called by the `input` methods of
  /// operator and sink handles; the registry lock serializes all edge
  /// mutations.
  pub(crate) fn connect(
    &self,
    upstream: &str,
    downstream: &str,
    sender: mpsc::Sender<PipeMessage>,
    downstream_state: StateMachine,
    downstream_upstreams: &Mutex<HashSet<String>>,
    config: Option<EdgeConfig>,
  ) -> Result<()> {
    let registry = self.registry.lock().unwrap();
    let entry = registry
      .get(upstream)
      .ok_or_else(|| Error::NoSuchNode(upstream.to_string()))?;
    let fanout = entry.fanout().ok_or_else(|| Error::WrongDirection {
      upstream: upstream.to_string(),
      kind: entry.kind(),
    })?;
    if entry.state().get() >= NodeState::Stopping {
      return Err(Error::AlreadyStopped);
    }

    let mut upstreams = downstream_upstreams.lock().unwrap();
    if upstreams.contains(upstream) {
      return Err(Error::DuplicateEdge {
        upstream: upstream.to_string(),
        downstream: downstream.to_string(),
      });
    }

    // Coordinated shutdown assumes a DAG: reject an edge whose target can
    // already reach its source.
    let mut stack = vec![downstream.to_string()];
    let mut visited = HashSet::new();
    while let Some(name) = stack.pop() {
      if name == upstream {
        return Err(Error::WouldCycle {
          upstream: upstream.to_string(),
          downstream: downstream.to_string(),
        });
      }
      if !visited.insert(name.clone()) {
        continue;
      }
      if let Some(f) = registry.get(&name).and_then(NodeEntry::fanout) {
        stack.extend(f.subscriber_names());
      }
    }

    fanout.subscribe(downstream, sender, downstream_state, config.unwrap_or_default())?;
    upstreams.insert(upstream.to_string());
    debug!(topology = %self.name, %upstream, %downstream, "edge added");
    Ok(())
  }

  /// Inserts an entry, enforcing name uniqueness across all kinds and
  /// refusing mutation of a stopping topology. The topology state is
  /// checked under the registry lock so that `stop` cannot miss a node
  /// added concurrently.
  fn register(&self, name: &str, entry: NodeEntry) -> Result<()> {
    let mut registry = self.registry.lock().unwrap();
    if self.state.get() >= NodeState::Stopping {
      return Err(Error::TopologyStopped);
    }
    if registry.contains_key(name) {
      return Err(Error::DuplicateName(name.to_string()));
    }
    registry.insert(name.to_string(), entry);
    Ok(())
  }

  fn lookup(&self, name: &str) -> Result<NodeEntry> {
    self
      .registry
      .lock()
      .unwrap()
      .get(name)
      .cloned()
      .ok_or_else(|| Error::NoSuchNode(name.to_string()))
  }

  fn snapshot(&self) -> Vec<(String, NodeEntry)> {
    self
      .registry
      .lock()
      .unwrap()
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect()
  }
}

/// A dynamic topology.
///
/// Created in the `Running` state; nodes added to it start automatically.
pub struct Topology {
  core: Arc<TopologyCore>,
}

impl Clone for Topology {
  /// Clones share the same registry and lifecycle state.
  fn clone(&self) -> Self {
    Self {
      core: Arc::clone(&self.core),
    }
  }
}

impl Topology {
  /// Creates an empty running topology.
  pub fn new(ctx: Context, name: impl Into<String>) -> Self {
    Self {
      core: Arc::new(TopologyCore {
        name: name.into(),
        ctx: Arc::new(ctx),
        state: StateMachine::new(NodeState::Running),
        registry: Mutex::new(HashMap::new()),
      }),
    }
  }

  /// The topology's name.
  pub fn name(&self) -> &str {
    &self.core.name
  }

  /// The topology-wide lifecycle state.
  pub fn state(&self) -> &StateMachine {
    &self.core.state
  }

  /// The shared execution context.
  pub fn context(&self) -> &Arc<Context> {
    &self.core.ctx
  }

  /// Adds a source and starts its worker.
  pub fn add_source(
    &self,
    name: &str,
    source: Arc<dyn Source>,
    config: Option<NodeConfig>,
  ) -> Result<Arc<SourceNode>> {
    let node = self.add_source_stopped(name, source, config)?;
    node.start();
    Ok(node)
  }

  /// Adds a source without starting it. Used by the static topology,
  /// which wires all edges before any source runs.
  pub(crate) fn add_source_stopped(
    &self,
    name: &str,
    source: Arc<dyn Source>,
    _config: Option<NodeConfig>,
  ) -> Result<Arc<SourceNode>> {
    let node = SourceNode::new(Arc::clone(&self.core.ctx), name, source);
    self.core.register(name, NodeEntry::Source(Arc::clone(&node)))?;
    info!(topology = %self.core.name, node = %name, "source added");
    Ok(node)
  }

  /// Adds an operator and starts its worker. The operator's `init` hook
  /// runs first; an init error fails the call and nothing is registered.
  pub async fn add_operator(
    &self,
    name: &str,
    operator: Arc<dyn Operator>,
    config: Option<NodeConfig>,
  ) -> Result<Arc<OperatorNode>> {
    let capacity = config.unwrap_or_default().queue_capacity;
    let (node, receiver) = OperatorNode::new(
      Arc::clone(&self.core.ctx),
      name,
      Arc::downgrade(&self.core),
      capacity,
      operator.input_constraints(),
    );
    self
      .core
      .register(name, NodeEntry::Operator(Arc::clone(&node)))?;
    if let Err(err) = operator.init(&self.core.ctx).await {
      self.core.registry.lock().unwrap().remove(name);
      return Err(err);
    }
    node.start(operator, receiver);
    info!(topology = %self.core.name, node = %name, "operator added");
    Ok(node)
  }

  /// Adds a sink and starts its worker.
  pub fn add_sink(
    &self,
    name: &str,
    sink: Arc<dyn Sink>,
    config: Option<NodeConfig>,
  ) -> Result<Arc<SinkNode>> {
    let capacity = config.unwrap_or_default().queue_capacity;
    let (node, receiver) = SinkNode::new(
      Arc::clone(&self.core.ctx),
      name,
      Arc::downgrade(&self.core),
      capacity,
    );
    self.core.register(name, NodeEntry::Sink(Arc::clone(&node)))?;
    node.start(sink, receiver);
    info!(topology = %self.core.name, node = %name, "sink added");
    Ok(node)
  }

  /// Stops a node, detaches it from every fan-out, and removes it from
  /// the registry. Downstream nodes keep running; tuples already queued
  /// for the removed node are discarded, and tuples produced upstream
  /// while the removal is in flight may be lost.
  pub async fn remove(&self, name: &str) -> Result<()> {
    let entry = self.core.lookup(name)?;
    entry.as_node().stop().await?;
    let mut registry = self.core.registry.lock().unwrap();
    for other in registry.values() {
      if let Some(fanout) = other.fanout() {
        fanout.unsubscribe(name);
      }
    }
    registry.remove(name);
    drop(registry);
    info!(topology = %self.core.name, node = %name, "node removed");
    Ok(())
  }

  /// Coordinated shutdown.
  ///
  /// Drains in-flight tuples, terminates nodes in topological order via
  /// the end-of-stream cascade, and returns once every node and the
  /// topology itself are `Stopped`. Idempotent: concurrent and repeated
  /// calls all wait for the same terminal state.
  pub async fn stop(&self) -> Result<()> {
    let initiated = self.core.state.advance_if(
      |s| s == NodeState::Running || s == NodeState::Paused,
      NodeState::Stopping,
    );
    if !initiated {
      self.core.state.wait(NodeState::Stopped).await;
      return Ok(());
    }
    info!(topology = %self.core.name, "stopping");

    let entries = self.core.snapshot();
    for (_, entry) in &entries {
      entry.enable_graceful_stop();
    }

    let sources: Vec<Arc<SourceNode>> = entries
      .iter()
      .filter_map(|(_, e)| match e {
        NodeEntry::Source(n) => Some(Arc::clone(n)),
        _ => None,
      })
      .collect();
    join_all(sources.iter().map(|s| s.stop())).await;

    join_all(
      entries
        .iter()
        .map(|(_, e)| e.state().wait(NodeState::Stopped)),
    )
    .await;

    self.core.state.try_advance(NodeState::Stopped);
    info!(topology = %self.core.name, "stopped");
    Ok(())
  }

  /// Looks up any node by name.
  pub fn node(&self, name: &str) -> Result<Arc<dyn Node>> {
    Ok(self.core.lookup(name)?.as_node())
  }

  /// Looks up a source by name; `WrongKind` if the name belongs to
  /// another kind.
  pub fn source(&self, name: &str) -> Result<Arc<SourceNode>> {
    match self.core.lookup(name)? {
      NodeEntry::Source(n) => Ok(n),
      other => Err(Error::WrongKind {
        name: name.to_string(),
        expected: NodeKind::Source,
        actual: other.kind(),
      }),
    }
  }

  /// Looks up an operator by name; `WrongKind` if the name belongs to
  /// another kind.
  pub fn operator(&self, name: &str) -> Result<Arc<OperatorNode>> {
    match self.core.lookup(name)? {
      NodeEntry::Operator(n) => Ok(n),
      other => Err(Error::WrongKind {
        name: name.to_string(),
        expected: NodeKind::Operator,
        actual: other.kind(),
      }),
    }
  }

  /// Looks up a sink by name; `WrongKind` if the name belongs to another
  /// kind.
  pub fn sink(&self, name: &str) -> Result<Arc<SinkNode>> {
    match self.core.lookup(name)? {
      NodeEntry::Sink(n) => Ok(n),
      other => Err(Error::WrongKind {
        name: name.to_string(),
        expected: NodeKind::Sink,
        actual: other.kind(),
      }),
    }
  }

  /// All registered nodes.
  pub fn nodes(&self) -> HashMap<String, Arc<dyn Node>> {
    self
      .core
      .snapshot()
      .into_iter()
      .map(|(name, e)| (name, e.as_node()))
      .collect()
  }

  /// All registered sources.
  pub fn sources(&self) -> HashMap<String, Arc<SourceNode>> {
    self
      .core
      .snapshot()
      .into_iter()
      .filter_map(|(name, e)| match e {
        NodeEntry::Source(n) => Some((name, n)),
        _ => None,
      })
      .collect()
  }

  /// All registered operators.
  pub fn operators(&self) -> HashMap<String, Arc<OperatorNode>> {
    self
      .core
      .snapshot()
      .into_iter()
      .filter_map(|(name, e)| match e {
        NodeEntry::Operator(n) => Some((name, n)),
        _ => None,
      })
      .collect()
  }

  /// All registered sinks.
  pub fn sinks(&self) -> HashMap<String, Arc<SinkNode>> {
    self
      .core
      .snapshot()
      .into_iter()
      .filter_map(|(name, e)| match e {
        NodeEntry::Sink(n) => Some((name, n)),
        _ => None,
      })
      .collect()
  }

  /// Enables graceful stop on every current node. Used by the static
  /// topology before its sources start.
  pub(crate) fn enable_graceful_stop_all(&self) {
    for (_, entry) in self.core.snapshot() {
      entry.enable_graceful_stop();
    }
  }

  /// Waits until every current node is `Stopped`, then marks the topology
  /// stopped. Used by the static topology's run-to-completion.
  pub(crate) async fn wait_all_stopped(&self) {
    let entries = self.core.snapshot();
    join_all(
      entries
        .iter()
        .map(|(_, e)| e.state().wait(NodeState::Stopped)),
    )
    .await;
    self.core.state.try_advance(NodeState::Stopping);
    self.core.state.try_advance(NodeState::Stopped);
  }
}
