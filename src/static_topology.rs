//! The static topology: built once, then run to completion.
//!
//! The builder accumulates declarations and validation errors lazily; each
//! `add_*`/`input` call returns a declarer whose `err` surfaces the first
//! problem with that declaration. `build` freezes the plan, and
//! [`StaticTopology::run`] executes it until end-of-stream has propagated
//! naturally through every node. There is no post-build mutation surface.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Context;
use crate::error::{Error, Result};
use crate::node::{NodeKind, Operator, Sink, Source};
use crate::pipe::EdgeConfig;
use crate::topology::Topology;

enum BehaviorDef {
  Source(Arc<dyn Source>),
  Operator(Arc<dyn Operator>),
  Sink(Arc<dyn Sink>),
}

impl BehaviorDef {
  fn kind(&self) -> NodeKind {
    match self {
      BehaviorDef::Source(_) => NodeKind::Source,
      BehaviorDef::Operator(_) => NodeKind::Operator,
      BehaviorDef::Sink(_) => NodeKind::Sink,
    }
  }
}

struct NodeDef {
  name: String,
  behavior: BehaviorDef,
  inputs: Vec<(String, Option<EdgeConfig>)>,
}

/// Accumulates node and edge declarations for a static topology.
pub struct StaticTopologyBuilder {
  name: String,
  defs: Vec<NodeDef>,
  index: HashMap<String, usize>,
  errors: Vec<Error>,
}

impl StaticTopologyBuilder {
  /// Creates a builder for a topology with the given name.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      defs: Vec::new(),
      index: HashMap::new(),
      errors: Vec::new(),
    }
  }

  /// Declares a source.
  pub fn add_source(&mut self, name: &str, source: Arc<dyn Source>) -> SourceDeclarer<'_> {
    let err = self.declare(name, BehaviorDef::Source(source)).err();
    SourceDeclarer { builder: self, err }
  }

  /// Declares an operator. Wire its inputs through the returned declarer.
  pub fn add_operator(&mut self, name: &str, operator: Arc<dyn Operator>) -> Declarer<'_> {
    match self.declare(name, BehaviorDef::Operator(operator)) {
      Ok(def) => Declarer {
        builder: self,
        def: Some(def),
        err: None,
      },
      Err(err) => Declarer {
        builder: self,
        def: None,
        err: Some(err),
      },
    }
  }

  /// Declares a sink. Wire its inputs through the returned declarer.
  pub fn add_sink(&mut self, name: &str, sink: Arc<dyn Sink>) -> Declarer<'_> {
    match self.declare(name, BehaviorDef::Sink(sink)) {
      Ok(def) => Declarer {
        builder: self,
        def: Some(def),
        err: None,
      },
      Err(err) => Declarer {
        builder: self,
        def: None,
        err: Some(err),
      },
    }
  }

  /// Freezes the plan. Fails with the first accumulated declaration error.
  pub fn build(mut self) -> Result<StaticTopology> {
    if !self.errors.is_empty() {
      return Err(self.errors.remove(0));
    }
    Ok(StaticTopology {
      name: self.name,
      defs: self.defs,
    })
  }

  fn declare(&mut self, name: &str, behavior: BehaviorDef) -> std::result::Result<usize, usize> {
    if self.index.contains_key(name) {
      return Err(self.record(Error::DuplicateName(name.to_string())));
    }
    let def = self.defs.len();
    self.defs.push(NodeDef {
      name: name.to_string(),
      behavior,
      inputs: Vec::new(),
    });
    self.index.insert(name.to_string(), def);
    Ok(def)
  }

  fn record(&mut self, err: Error) -> usize {
    self.errors.push(err);
    self.errors.len() - 1
  }

  /// True when `target` is reachable from `start` over the declared edges.
  fn reaches(&self, start: &str, target: &str) -> bool {
    let mut stack = vec![start.to_string()];
    let mut visited = std::collections::HashSet::new();
    while let Some(name) = stack.pop() {
      if name == target {
        return true;
      }
      if !visited.insert(name.clone()) {
        continue;
      }
      for def in &self.defs {
        if def.inputs.iter().any(|(up, _)| *up == name) {
          stack.push(def.name.clone());
        }
      }
    }
    false
  }
}

/// Declarer returned for sources. Sources have no inputs; only the
/// accumulated error can be inspected.
pub struct SourceDeclarer<'a> {
  builder: &'a StaticTopologyBuilder,
  err: Option<usize>,
}

impl SourceDeclarer<'_> {
  /// The error recorded for this declaration, if any.
  pub fn err(&self) -> Option<&Error> {
    self.err.map(|i| &self.builder.errors[i])
  }
}

/// Declarer returned for operators and sinks; chains `input` calls and
/// surfaces the first error via `err`.
pub struct Declarer<'a> {
  builder: &'a mut StaticTopologyBuilder,
  def: Option<usize>,
  err: Option<usize>,
}

impl Declarer<'_> {
  /// Declares an edge from the named upstream to this node. Errors are
  /// accumulated, not returned; later calls on a failed declarer are
  /// no-ops.
  pub fn input(mut self, upstream: &str, config: Option<EdgeConfig>) -> Self {
    let Some(def) = self.def else {
      return self;
    };
    if self.err.is_some() {
      return self;
    }
    let name = self.builder.defs[def].name.clone();
    let validated = match self.builder.index.get(upstream) {
      None => Err(Error::NoSuchNode(upstream.to_string())),
      Some(&up_def) => {
        let kind = self.builder.defs[up_def].behavior.kind();
        if kind == NodeKind::Sink {
          Err(Error::WrongDirection {
            upstream: upstream.to_string(),
            kind,
          })
        } else if self.builder.defs[def]
          .inputs
          .iter()
          .any(|(up, _)| up == upstream)
        {
          Err(Error::DuplicateEdge {
            upstream: upstream.to_string(),
            downstream: name.clone(),
          })
        } else if self.builder.reaches(&name, upstream) {
          Err(Error::WouldCycle {
            upstream: upstream.to_string(),
            downstream: name.clone(),
          })
        } else {
          Ok(())
        }
      }
    };
    match validated {
      Ok(()) => {
        self.builder.defs[def]
          .inputs
          .push((upstream.to_string(), config));
      }
      Err(err) => {
        self.err = Some(self.builder.record(err));
      }
    }
    self
  }

  /// The error recorded for this declaration, if any.
  pub fn err(&self) -> Option<&Error> {
    self.err.map(|i| &self.builder.errors[i])
  }
}

/// A frozen topology plan.
pub struct StaticTopology {
  name: String,
  defs: Vec<NodeDef>,
}

impl StaticTopology {
  /// Runs the topology to completion.
  ///
  /// All workers start with graceful stop enabled and every edge wired
  /// before any source produces, so nothing is lost at startup. The call
  /// returns after every source's `generate_stream` has returned and
  /// end-of-stream has propagated through all operators and sinks.
  pub async fn run(self, ctx: Context) -> Result<()> {
    let topology = Topology::new(ctx, self.name);

    let mut sources = Vec::new();
    for def in &self.defs {
      match &def.behavior {
        BehaviorDef::Source(s) => {
          sources.push(topology.add_source_stopped(&def.name, Arc::clone(s), None)?);
        }
        BehaviorDef::Operator(o) => {
          topology.add_operator(&def.name, Arc::clone(o), None).await?;
        }
        BehaviorDef::Sink(s) => {
          topology.add_sink(&def.name, Arc::clone(s), None)?;
        }
      }
    }

    for def in &self.defs {
      for (upstream, config) in &def.inputs {
        match def.behavior.kind() {
          NodeKind::Operator => {
            topology.operator(&def.name)?.input(upstream, config.clone())?;
          }
          NodeKind::Sink => {
            topology.sink(&def.name)?.input(upstream, config.clone())?;
          }
          NodeKind::Source => unreachable!("sources declare no inputs"),
        }
      }
    }

    topology.enable_graceful_stop_all();
    for source in &sources {
      source.start();
    }
    topology.wait_all_stopped().await;
    Ok(())
  }
}
