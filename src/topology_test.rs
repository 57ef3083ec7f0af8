//! Dynamic topology test suite.
//!
//! Covers registration and lookups, edge validation, the concrete
//! linear/fork/join shutdown scenarios, node removal with rewiring, and
//! the exactly-once termination guarantees.

use std::sync::Arc;

use crate::config::{Config, Context};
use crate::error::Error;
use crate::node::{Node, NodeKind, OperatorFunc};
use crate::operator_node::OperatorNode;
use crate::sink_node::SinkNode;
use crate::source_node::SourceNode;
use crate::state::NodeState;
use crate::test_support::{
  forward, fresh_tuples, BlockingForwardOperator, CollectingSink, EmitterSource, TerminateCounter,
};
use crate::topology::Topology;
use crate::tuple::EventType;

fn topology() -> Topology {
  Topology::new(Context::default(), "dt1")
}

// ============================================================================
// Registration and lookups
// ============================================================================

#[tokio::test]
async fn test_stop_of_empty_topology() {
  let t = topology();
  t.stop().await.unwrap();
  assert_eq!(t.state().get(), NodeState::Stopped);

  // A stopped topology refuses every mutation.
  let src = EmitterSource::new(fresh_tuples(1));
  assert!(matches!(
    t.add_source("s", src, None),
    Err(Error::TopologyStopped)
  ));
  let op = TerminateCounter::new(BlockingForwardOperator::new(8));
  assert!(matches!(
    t.add_operator("b", op, None).await,
    Err(Error::TopologyStopped)
  ));
  let sink = CollectingSink::new();
  assert!(matches!(
    t.add_sink("si", sink, None),
    Err(Error::TopologyStopped)
  ));
}

#[tokio::test]
async fn test_added_nodes_run_automatically() {
  let t = topology();
  let sn = t
    .add_source("source1", EmitterSource::new(fresh_tuples(1)), None)
    .unwrap();
  assert_eq!(sn.state().get(), NodeState::Running);

  let bn = t
    .add_operator("box1", TerminateCounter::new(BlockingForwardOperator::new(8)), None)
    .await
    .unwrap();
  assert_eq!(bn.state().get(), NodeState::Running);

  let sin = t.add_sink("sink1", CollectingSink::new(), None).unwrap();
  assert_eq!(sin.state().get(), NodeState::Running);

  t.stop().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_names_rejected_across_kinds() {
  let t = topology();
  t.add_source("shared", EmitterSource::new(fresh_tuples(1)), None)
    .unwrap();

  assert!(matches!(
    t.add_source("shared", EmitterSource::new(fresh_tuples(1)), None),
    Err(Error::DuplicateName(_))
  ));
  assert!(matches!(
    t.add_operator("shared", TerminateCounter::new(BlockingForwardOperator::new(8)), None)
      .await,
    Err(Error::DuplicateName(_))
  ));
  assert!(matches!(
    t.add_sink("shared", CollectingSink::new(), None),
    Err(Error::DuplicateName(_))
  ));

  t.stop().await.unwrap();
}

#[tokio::test]
async fn test_typed_lookups() {
  let t = topology();
  t.add_source("source", EmitterSource::new(fresh_tuples(1)), None)
    .unwrap();
  t.add_operator("box1", TerminateCounter::new(BlockingForwardOperator::new(8)), None)
    .await
    .unwrap();
  t.add_sink("sink", CollectingSink::new(), None).unwrap();

  assert!(t.source("source").is_ok());
  assert!(t.operator("box1").is_ok());
  assert!(t.sink("sink").is_ok());
  assert_eq!(t.node("source").unwrap().kind(), NodeKind::Source);

  assert!(matches!(
    t.operator("source"),
    Err(Error::WrongKind { expected: NodeKind::Operator, .. })
  ));
  assert!(matches!(
    t.sink("source"),
    Err(Error::WrongKind { expected: NodeKind::Sink, .. })
  ));
  assert!(matches!(
    t.source("box1"),
    Err(Error::WrongKind { expected: NodeKind::Source, .. })
  ));
  assert!(matches!(t.source("nope"), Err(Error::NoSuchNode(_))));
  assert!(matches!(t.node("nope"), Err(Error::NoSuchNode(_))));

  assert_eq!(t.nodes().len(), 3);
  assert_eq!(t.sources().len(), 1);
  assert_eq!(t.operators().len(), 1);
  assert_eq!(t.sinks().len(), 1);

  t.stop().await.unwrap();
}

#[tokio::test]
async fn test_direct_node_stop_terminates_once() {
  let t = topology();
  let tc = TerminateCounter::new(BlockingForwardOperator::new(8));
  let bn = t.add_operator("box1", tc.clone(), None).await.unwrap();

  bn.stop().await.unwrap();
  assert_eq!(bn.state().get(), NodeState::Stopped);
  assert_eq!(tc.terminate_count(), 1);

  // Stopping the topology afterwards must not terminate it again.
  t.stop().await.unwrap();
  assert_eq!(tc.terminate_count(), 1);
}

// ============================================================================
// Edge validation
// ============================================================================

#[tokio::test]
async fn test_input_validation() {
  let t = topology();
  t.add_source("source", EmitterSource::new(fresh_tuples(8)), None)
    .unwrap();
  let bn1 = t
    .add_operator("box1", TerminateCounter::new(BlockingForwardOperator::new(8)), None)
    .await
    .unwrap();
  let bn2 = t
    .add_operator("box2", Arc::new(OperatorFunc::new(forward)), None)
    .await
    .unwrap();
  let sin = t.add_sink("sink", CollectingSink::new(), None).unwrap();

  assert!(matches!(
    bn1.input("nope", None),
    Err(Error::NoSuchNode(_))
  ));

  bn1.input("source", None).unwrap();
  assert!(matches!(
    bn1.input("source", None),
    Err(Error::DuplicateEdge { .. })
  ));

  // A sink can never be an upstream.
  assert!(matches!(
    bn1.input("sink", None),
    Err(Error::WrongDirection { .. })
  ));

  // box1 -> box2 exists; box2 -> box1 would close a cycle, as would a
  // self-edge.
  bn2.input("box1", None).unwrap();
  assert!(matches!(
    bn1.input("box2", None),
    Err(Error::WouldCycle { .. })
  ));
  assert!(matches!(
    bn1.input("box1", None),
    Err(Error::WouldCycle { .. })
  ));

  sin.input("box2", None).unwrap();
  assert!(matches!(
    sin.input("box2", None),
    Err(Error::DuplicateEdge { .. })
  ));

  t.stop().await.unwrap();
}

// ============================================================================
// Linear pipeline: source -> box1 -> box2 -> sink
// ============================================================================

struct LinearFixture {
  topology: Topology,
  source: Arc<EmitterSource>,
  source_node: Arc<SourceNode>,
  b1: Arc<BlockingForwardOperator>,
  tc1: Arc<TerminateCounter>,
  tc2: Arc<TerminateCounter>,
  bn1: Arc<OperatorNode>,
  bn2: Arc<OperatorNode>,
  sink: Arc<CollectingSink>,
  sink_node: Arc<SinkNode>,
}

async fn linear_fixture(b1_permits: usize) -> LinearFixture {
  let topology = Topology::new(Context::default(), "dt1");

  let source = EmitterSource::new(fresh_tuples(8));
  let source_node = topology.add_source("source", source.clone(), None).unwrap();

  let b1 = BlockingForwardOperator::new(b1_permits);
  let tc1 = TerminateCounter::new(b1.clone());
  let bn1 = topology.add_operator("box1", tc1.clone(), None).await.unwrap();
  bn1.input("source", None).unwrap();

  let tc2 = TerminateCounter::new(Arc::new(OperatorFunc::new(forward)));
  let bn2 = topology.add_operator("box2", tc2.clone(), None).await.unwrap();
  bn2.input("box1", None).unwrap();

  let sink = CollectingSink::new();
  let sink_node = topology.add_sink("sink", sink.clone(), None).unwrap();
  sink_node.input("box2", None).unwrap();

  LinearFixture {
    topology,
    source,
    source_node,
    b1,
    tc1,
    tc2,
    bn1,
    bn2,
    sink,
    sink_node,
  }
}

impl LinearFixture {
  /// Shutdown postconditions shared by every scenario: everything is
  /// stopped and every termination hook ran exactly once.
  fn check_post_conditions(&self) {
    assert_eq!(self.topology.state().get(), NodeState::Stopped);
    assert_eq!(self.source_node.state().get(), NodeState::Stopped);
    assert_eq!(self.bn1.state().get(), NodeState::Stopped);
    assert_eq!(self.bn2.state().get(), NodeState::Stopped);
    assert_eq!(self.sink_node.state().get(), NodeState::Stopped);
    assert_eq!(self.tc1.terminate_count(), 1);
    assert_eq!(self.tc2.terminate_count(), 1);
    assert_eq!(self.sink.close_count(), 1);
  }
}

#[tokio::test]
async fn test_linear_stop_without_tuples() {
  let f = linear_fixture(8).await;
  f.topology.stop().await.unwrap();
  f.check_post_conditions();
  assert_eq!(f.sink.len(), 0);
}

#[tokio::test]
async fn test_linear_stop_after_sink_received_all() {
  let f = linear_fixture(8).await;
  f.source.emit(4).await;
  f.sink.wait(4).await;
  f.topology.stop().await.unwrap();
  f.check_post_conditions();
  assert_eq!(f.sink.len(), 4);
}

#[tokio::test]
async fn test_linear_stop_before_delivery_drains_in_flight() {
  // box1 holds everything back; four tuples are already queued for it
  // when the shutdown starts. They must still reach the sink.
  let f = linear_fixture(0).await;
  f.source.emit(4).await;

  let stopper = {
    let t = f.topology.clone();
    tokio::spawn(async move { t.stop().await })
  };
  f.topology.state().wait(NodeState::Stopping).await;
  f.b1.release(8);
  stopper.await.unwrap().unwrap();

  f.check_post_conditions();
  assert_eq!(f.sink.len(), 4);
}

#[tokio::test]
async fn test_linear_stop_midway_delivers_the_rest() {
  let f = linear_fixture(2).await;
  f.source.emit(8).await;
  f.sink.wait(2).await;

  let stopper = {
    let t = f.topology.clone();
    tokio::spawn(async move { t.stop().await })
  };
  f.topology.state().wait(NodeState::Stopping).await;
  f.b1.release(6);
  stopper.await.unwrap().unwrap();

  f.check_post_conditions();
  assert_eq!(f.sink.len(), 8);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
  let f = linear_fixture(8).await;
  f.source.emit(4).await;
  f.sink.wait(4).await;

  f.topology.stop().await.unwrap();
  f.check_post_conditions();
  let received = f.sink.len();

  // Further stops return the same terminal state and do not re-run any
  // termination hook.
  f.topology.stop().await.unwrap();
  f.topology.stop().await.unwrap();
  f.check_post_conditions();
  assert_eq!(f.sink.len(), received);
}

#[tokio::test]
async fn test_concurrent_stops_converge() {
  let f = linear_fixture(8).await;
  f.source.emit(4).await;
  f.sink.wait(4).await;

  let a = {
    let t = f.topology.clone();
    tokio::spawn(async move { t.stop().await })
  };
  let b = {
    let t = f.topology.clone();
    tokio::spawn(async move { t.stop().await })
  };
  a.await.unwrap().unwrap();
  b.await.unwrap().unwrap();
  f.check_post_conditions();
}

// ============================================================================
// Removal
// ============================================================================

#[tokio::test]
async fn test_remove_source_keeps_downstream_running() {
  let f = linear_fixture(8).await;
  f.source.emit(2).await;
  f.topology.remove("source").await.unwrap();

  assert_eq!(f.source_node.state().get(), NodeState::Stopped);
  assert!(matches!(f.topology.source("source"), Err(Error::NoSuchNode(_))));

  // Tuples emitted before the removal still flow through.
  f.sink.wait(2).await;
  assert_eq!(f.sink.len(), 2);

  f.topology.stop().await.unwrap();
  f.check_post_conditions();
}

#[tokio::test]
async fn test_remove_operator_then_rewire_through_new_one() {
  let f = linear_fixture(8).await;
  f.source.emit(2).await;
  f.sink.wait(2).await;

  f.topology.remove("box1").await.unwrap();
  assert_eq!(f.bn1.state().get(), NodeState::Stopped);
  assert!(matches!(f.topology.operator("box1"), Err(Error::NoSuchNode(_))));

  // These two are emitted into the void left by the removal.
  f.source.emit(2).await;
  assert_eq!(f.sink.len(), 2);

  let bn3 = f
    .topology
    .add_operator("box3", Arc::new(OperatorFunc::new(forward)), None)
    .await
    .unwrap();
  bn3.input("source", None).unwrap();
  f.bn2.input("box3", None).unwrap();
  f.source.emit(4).await;

  f.sink.wait(6).await;
  assert_eq!(f.sink.len(), 6);

  f.topology.stop().await.unwrap();
  assert_eq!(f.sink.len(), 6);
}

#[tokio::test]
async fn test_remove_operator_then_connect_sink_to_source() {
  let f = linear_fixture(8).await;
  f.source.emit(2).await;
  f.sink.wait(2).await;

  f.topology.remove("box1").await.unwrap();
  f.source.emit(2).await;

  f.sink_node.input("source", None).unwrap();
  f.source.emit(4).await;

  f.sink.wait(6).await;
  assert_eq!(f.sink.len(), 6);

  f.topology.stop().await.unwrap();
}

#[tokio::test]
async fn test_remove_sink_discards_later_tuples() {
  let f = linear_fixture(8).await;
  f.source.emit(2).await;
  f.sink.wait(2).await;

  f.topology.remove("sink").await.unwrap();
  assert_eq!(f.sink_node.state().get(), NodeState::Stopped);
  assert_eq!(f.sink.close_count(), 1);
  assert!(matches!(f.topology.sink("sink"), Err(Error::NoSuchNode(_))));

  f.source.emit(2).await;
  assert_eq!(f.sink.len(), 2);

  f.topology.stop().await.unwrap();
}

// ============================================================================
// Fork: source -> {box1 -> si1, box2 -> si2}
// ============================================================================

struct ForkFixture {
  topology: Topology,
  source: Arc<EmitterSource>,
  b1: Arc<BlockingForwardOperator>,
  tc1: Arc<TerminateCounter>,
  tc2: Arc<TerminateCounter>,
  si1: Arc<CollectingSink>,
  si2: Arc<CollectingSink>,
}

async fn fork_fixture(b1_permits: usize, b2_permits: usize) -> ForkFixture {
  let topology = Topology::new(Context::default(), "dt1");

  let source = EmitterSource::new(fresh_tuples(8));
  topology.add_source("source", source.clone(), None).unwrap();

  let b1 = BlockingForwardOperator::new(b1_permits);
  let tc1 = TerminateCounter::new(b1.clone());
  let bn1 = topology.add_operator("box1", tc1.clone(), None).await.unwrap();
  bn1.input("source", None).unwrap();

  let b2 = BlockingForwardOperator::new(b2_permits);
  let tc2 = TerminateCounter::new(b2);
  let bn2 = topology.add_operator("box2", tc2.clone(), None).await.unwrap();
  bn2.input("source", None).unwrap();

  let si1 = CollectingSink::new();
  let sin1 = topology.add_sink("si1", si1.clone(), None).unwrap();
  sin1.input("box1", None).unwrap();

  let si2 = CollectingSink::new();
  let sin2 = topology.add_sink("si2", si2.clone(), None).unwrap();
  sin2.input("box2", None).unwrap();

  ForkFixture {
    topology,
    source,
    b1,
    tc1,
    tc2,
    si1,
    si2,
  }
}

impl ForkFixture {
  fn check_post_conditions(&self) {
    assert_eq!(self.topology.state().get(), NodeState::Stopped);
    assert_eq!(self.tc1.terminate_count(), 1);
    assert_eq!(self.tc2.terminate_count(), 1);
    assert_eq!(self.si1.close_count(), 1);
    assert_eq!(self.si2.close_count(), 1);
  }
}

#[tokio::test]
async fn test_fork_delivers_to_both_sinks() {
  let f = fork_fixture(8, 8).await;
  f.source.emit(8).await;
  f.si1.wait(8).await;
  f.si2.wait(8).await;
  f.topology.stop().await.unwrap();

  f.check_post_conditions();
  assert_eq!(f.si1.len(), 8);
  assert_eq!(f.si2.len(), 8);
}

#[tokio::test]
async fn test_fork_stop_drains_blocked_branch() {
  let f = fork_fixture(0, 8).await;
  f.source.emit(4).await;
  f.si2.wait(4).await;

  let stopper = {
    let t = f.topology.clone();
    tokio::spawn(async move { t.stop().await })
  };
  f.topology.state().wait(NodeState::Stopping).await;
  f.b1.release(8);
  stopper.await.unwrap().unwrap();

  f.check_post_conditions();
  assert_eq!(f.si1.len(), 4);
  assert_eq!(f.si2.len(), 4);
}

// ============================================================================
// Join: {source1, source2} -> box1 -> sink
// ============================================================================

#[tokio::test]
async fn test_join_counts_from_both_sources() {
  let t = topology();
  let all = fresh_tuples(8);

  let so1 = EmitterSource::new(all[0..4].to_vec());
  t.add_source("source1", so1.clone(), None).unwrap();
  let so2 = EmitterSource::new(all[4..8].to_vec());
  t.add_source("source2", so2.clone(), None).unwrap();

  let tc = TerminateCounter::new(BlockingForwardOperator::new(8));
  let bn = t.add_operator("box1", tc.clone(), None).await.unwrap();
  bn.input("source1", None).unwrap();
  bn.input("source2", None).unwrap();

  let sink = CollectingSink::new();
  let sn = t.add_sink("sink", sink.clone(), None).unwrap();
  sn.input("box1", None).unwrap();

  so1.emit(4).await;
  so2.emit(4).await;
  sink.wait(8).await;
  t.stop().await.unwrap();

  // Ordering across the two edges is unspecified; only the count holds.
  assert_eq!(sink.len(), 8);
  assert_eq!(tc.terminate_count(), 1);
  assert_eq!(sink.close_count(), 1);
  assert_eq!(t.state().get(), NodeState::Stopped);
}

#[tokio::test]
async fn test_join_one_sided_emission() {
  let t = topology();
  let so1 = EmitterSource::new(fresh_tuples(4));
  t.add_source("source1", so1.clone(), None).unwrap();
  let so2 = EmitterSource::new(fresh_tuples(4));
  t.add_source("source2", so2, None).unwrap();

  let bn = t
    .add_operator("box1", Arc::new(OperatorFunc::new(forward)), None)
    .await
    .unwrap();
  bn.input("source1", None).unwrap();
  bn.input("source2", None).unwrap();

  let sink = CollectingSink::new();
  let sn = t.add_sink("sink", sink.clone(), None).unwrap();
  sn.input("box1", None).unwrap();

  so1.emit(3).await;
  sink.wait(3).await;
  t.stop().await.unwrap();
  assert_eq!(sink.len(), 3);
}

// ============================================================================
// Ordering, tracing, pause
// ============================================================================

#[tokio::test]
async fn test_per_edge_fifo_order() {
  let f = linear_fixture(8).await;
  f.source.emit(8).await;
  f.sink.wait(8).await;
  f.topology.stop().await.unwrap();

  let seqs: Vec<i64> = f
    .sink
    .tuples()
    .iter()
    .map(|t| t.data.get("seq").unwrap().as_int().unwrap())
    .collect();
  assert_eq!(seqs, vec![1, 2, 3, 4, 5, 6, 7, 8]);
}

#[tokio::test]
async fn test_tuple_tracing_records_hops() {
  let ctx = Context::new(Config::new().with_tuple_trace(true));
  let t = Topology::new(ctx, "traced");

  let source = EmitterSource::new(fresh_tuples(1));
  t.add_source("source", source.clone(), None).unwrap();
  let sink = CollectingSink::new();
  let sn = t.add_sink("sink", sink.clone(), None).unwrap();
  sn.input("source", None).unwrap();

  source.emit(1).await;
  sink.wait(1).await;
  t.stop().await.unwrap();

  let received = f_first(&sink);
  assert_eq!(received.input_name, "source");
  let events: Vec<(EventType, String)> = received
    .trace
    .iter()
    .map(|e| (e.event_type, e.msg.clone()))
    .collect();
  assert_eq!(
    events,
    vec![
      (EventType::Output, "source".to_string()),
      (EventType::Received, "sink".to_string()),
    ]
  );
}

fn f_first(sink: &CollectingSink) -> crate::tuple::Tuple {
  sink.tuples().into_iter().next().unwrap()
}

#[tokio::test]
async fn test_tracing_disabled_leaves_tuples_clean() {
  let f = linear_fixture(8).await;
  f.source.emit(1).await;
  f.sink.wait(1).await;
  f.topology.stop().await.unwrap();
  assert!(f_first(&f.sink).trace.is_empty());
}

#[tokio::test]
async fn test_source_pause_and_resume() {
  let t = topology();
  let source = EmitterSource::new(fresh_tuples(4));
  let sn = t.add_source("source", source.clone(), None).unwrap();
  let sink = CollectingSink::new();
  let sin = t.add_sink("sink", sink.clone(), None).unwrap();
  sin.input("source", None).unwrap();

  sn.pause().unwrap();
  assert_eq!(sn.state().get(), NodeState::Paused);

  // Credits granted while paused are spent only after the resume.
  source.emit_nb(2);
  sn.resume().unwrap();
  assert_eq!(sn.state().get(), NodeState::Running);
  sink.wait(2).await;

  t.stop().await.unwrap();
  assert_eq!(sink.len(), 2);
}

#[tokio::test]
async fn test_input_constraints_enforced_at_wiring() {
  use crate::error::Result;
  use crate::node::{InputConstraints, Operator};
  use crate::pipe::{EdgeConfig, Writer};
  use crate::tuple::Tuple;
  use async_trait::async_trait;

  // Accepts only edges named "left" or "right".
  struct TwoNamedInputs;

  #[async_trait]
  impl Operator for TwoNamedInputs {
    fn input_constraints(&self) -> Option<InputConstraints> {
      Some(InputConstraints {
        allowed_input_names: ["left", "right"].iter().map(|s| s.to_string()).collect(),
      })
    }

    async fn process(&self, ctx: &Context, tuple: Tuple, writer: &dyn Writer) -> Result<()> {
      writer.write(ctx, tuple).await
    }
  }

  let t = topology();
  let source = EmitterSource::new(fresh_tuples(2));
  t.add_source("source", source.clone(), None).unwrap();
  let bn = t
    .add_operator("join", Arc::new(TwoNamedInputs), None)
    .await
    .unwrap();

  // The bare upstream name is not allowed; renaming the edge is.
  assert!(matches!(
    bn.input("source", None),
    Err(Error::DisallowedInputName { .. })
  ));
  bn.input(
    "source",
    Some(EdgeConfig {
      input_name: Some("left".to_string()),
      filter: None,
    }),
  )
  .unwrap();

  let sink = CollectingSink::new();
  let sn = t.add_sink("sink", sink.clone(), None).unwrap();
  sn.input("join", None).unwrap();

  source.emit(2).await;
  sink.wait(2).await;
  t.stop().await.unwrap();

  assert_eq!(sink.len(), 2);
  assert_eq!(sink.tuples()[0].input_name, "join");
}

#[tokio::test]
async fn test_wait_observes_topology_stopping_order() {
  let f = linear_fixture(8).await;
  let state = f.topology.state().clone();
  let observer = tokio::spawn(async move {
    let at_stopping = state.wait(NodeState::Stopping).await;
    let at_stopped = state.wait(NodeState::Stopped).await;
    (at_stopping, at_stopped)
  });

  f.topology.stop().await.unwrap();
  let (at_stopping, at_stopped) = observer.await.unwrap();
  assert!(at_stopping >= NodeState::Stopping);
  assert_eq!(at_stopped, NodeState::Stopped);
}
