//! Engine configuration and the shared execution context.

use serde::{Deserialize, Serialize};

/// Engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
  /// When true, every hop through the topology appends a trace event to
  /// the tuple. Off by default; tracing deep-copies grow with every hop.
  #[serde(default)]
  pub tuple_trace_enabled: bool,
}

impl Config {
  /// Creates the default configuration.
  pub fn new() -> Self {
    Self::default()
  }

  /// Enables or disables per-hop tuple tracing.
  #[must_use]
  pub fn with_tuple_trace(mut self, enabled: bool) -> Self {
    self.tuple_trace_enabled = enabled;
    self
  }
}

/// Shared execution context handed to every user hook.
///
/// Wrapped in an `Arc` and cloned into each node's worker. Logging goes
/// through `tracing` and needs no handle here.
#[derive(Debug, Clone, Default)]
pub struct Context {
  /// The engine configuration.
  pub config: Config,
}

impl Context {
  /// Creates a context with the given configuration.
  pub fn new(config: Config) -> Self {
    Self { config }
  }
}
