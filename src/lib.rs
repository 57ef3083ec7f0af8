//! # tupleflow
//!
//! A streaming dataflow engine. Users construct topologies of
//! tuple-processing nodes: sources produce tuples, operators transform
//! them, and sinks consume them. Two topology flavors share the same node
//! model:
//!
//! - a [`Topology`] is dynamic: nodes may be added, wired, and removed
//!   while it is running, and [`Topology::stop`] drains in-flight tuples,
//!   terminates nodes in topological order, and invokes each node's
//!   termination hook exactly once;
//! - a [`StaticTopology`] is built once via [`StaticTopologyBuilder`] and
//!   run to completion.
//!
//! All routing is in-process: every node runs one dedicated worker, and
//! workers communicate exclusively through bounded FIFO queues with
//! per-edge backpressure. The [`exec`] module adds a grouped-aggregation
//! execution plan for a streaming query layer on top of the same tuple
//! model.

pub mod config;
pub mod error;
pub mod exec;
pub mod node;
pub mod operator_node;
pub mod pipe;
pub mod sink_node;
pub mod source_node;
pub mod state;
pub mod static_topology;
pub mod topology;
pub mod tuple;
pub mod value;

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod topology_test;

pub use config::{Config, Context};
pub use error::{Error, Result};
pub use node::{
  InputConstraints, Node, NodeConfig, NodeKind, Operator, OperatorFn, OperatorFunc, Sink, Source,
};
pub use operator_node::OperatorNode;
pub use pipe::{EdgeConfig, NodeWriter, Writer};
pub use sink_node::SinkNode;
pub use source_node::SourceNode;
pub use state::{NodeState, StateMachine};
pub use static_topology::{Declarer, SourceDeclarer, StaticTopology, StaticTopologyBuilder};
pub use topology::Topology;
pub use tuple::{EventType, TraceEvent, Tuple};
pub use value::{get_path, Map, Value};
