//! The tuple: a single message unit with a payload map and routing metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Context;
use crate::value::Map;

/// The kind of processing step recorded in a trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
  /// The tuple was dequeued by a node's worker.
  Received,
  /// The tuple was written to a node's fan-out.
  Output,
  /// Anything else worth recording by user code.
  Other,
}

/// One hop in a tuple's journey through the topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
  /// When the hop happened.
  pub timestamp: DateTime<Utc>,
  /// What kind of hop it was.
  pub event_type: EventType,
  /// The node involved.
  pub msg: String,
}

/// A single message unit.
///
/// Tuples are logically immutable once written to a fan-out; a writer that
/// needs to mutate a received tuple must [`Tuple::copy`] it first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tuple {
  /// The payload.
  pub data: Map,
  /// The name under which this tuple entered the receiving node. Set on
  /// delivery; defaults to the upstream node's name unless the edge
  /// renames it.
  pub input_name: String,
  /// Event time.
  pub timestamp: DateTime<Utc>,
  /// When the engine first saw the tuple.
  pub proc_timestamp: DateTime<Utc>,
  /// Batch this tuple belongs to.
  pub batch_id: i64,
  /// Per-hop trace, populated only when tuple tracing is enabled.
  pub trace: Vec<TraceEvent>,
}

impl Tuple {
  /// Creates a tuple with the given payload; both timestamps are now.
  pub fn new(data: Map) -> Self {
    let now = Utc::now();
    Self {
      data,
      input_name: String::new(),
      timestamp: now,
      proc_timestamp: now,
      batch_id: 0,
      trace: Vec::new(),
    }
  }

  /// Sets the event timestamp.
  #[must_use]
  pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
    self.timestamp = ts;
    self
  }

  /// Sets the batch id.
  #[must_use]
  pub fn with_batch_id(mut self, batch_id: i64) -> Self {
    self.batch_id = batch_id;
    self
  }

  /// Deep copy for writers that intend to mutate.
  pub fn copy(&self) -> Tuple {
    self.clone()
  }

  /// Appends a trace event when tracing is enabled in the context.
  pub fn trace_event(&mut self, ctx: &Context, event_type: EventType, msg: &str) {
    if ctx.config.tuple_trace_enabled {
      self.trace.push(TraceEvent {
        timestamp: Utc::now(),
        event_type,
        msg: msg.to_string(),
      });
    }
  }
}
