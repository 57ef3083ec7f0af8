//! The grouped-aggregation execution plan.
//!
//! Stateless between calls apart from the windowed buffers and the two
//! result slices: on each input tuple the plan recomputes the windowed
//! output groups in full and hands back the current result set, keeping the
//! previous one around so a downstream emitter can diff the two.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::exec::aggregate::AggregateFunc;
use crate::exec::expr::Expr;
use crate::exec::window::{StreamBuffer, WindowSpec};
use crate::tuple::Tuple;
use crate::value::{Map, Value};

/// One aggregate invocation inside a projection, e.g. the `count(a)` in
/// `count(a) + 1 AS c`.
#[derive(Debug, Clone)]
pub struct AggregateCall {
  /// Stable identifier. The computed result is stored into the group's
  /// representative row under this key, where the projection expression
  /// references it as a field.
  pub id: String,
  /// The function to dispatch to.
  pub func: AggregateFunc,
  /// Evaluated per combined row; the results form the function's input.
  pub input: Expr,
}

/// One output column.
#[derive(Debug, Clone)]
pub struct Projection {
  /// The user-visible output key.
  pub alias: String,
  /// Evaluated against the group's representative row, after aggregate
  /// results have been stored into it.
  pub expr: Expr,
  /// The aggregate invocations this projection depends on; empty for a
  /// plain projection.
  pub aggregates: Vec<AggregateCall>,
}

impl Projection {
  /// A plain, aggregate-free projection.
  pub fn flat(alias: impl Into<String>, expr: Expr) -> Self {
    Self {
      alias: alias.into(),
      expr,
      aggregates: Vec::new(),
    }
  }

  /// An aggregate-bearing projection.
  pub fn with_aggregates(
    alias: impl Into<String>,
    expr: Expr,
    aggregates: Vec<AggregateCall>,
  ) -> Self {
    Self {
      alias: alias.into(),
      expr,
      aggregates,
    }
  }
}

/// The logical-plan input this executor consumes. Produced by an external
/// planner.
#[derive(Debug, Clone)]
pub struct LogicalPlan {
  /// Optional row filter; its result is coerced to bool, with null as
  /// false.
  pub filter: Option<Expr>,
  /// Grouping expressions, in order. Their values form the group key.
  pub group_by: Vec<Expr>,
  /// Output columns, in order.
  pub projections: Vec<Projection>,
  /// One upstream buffer per source referenced by the query, with the
  /// window each buffer keeps.
  pub streams: Vec<(String, WindowSpec)>,
}

/// Rows of one group while a query runs over the buffer.
struct GroupData {
  /// The group key, in grouping-expression order.
  key: Vec<Value>,
  /// Collected inputs per aggregate identifier.
  agg_inputs: HashMap<String, Vec<Value>>,
  /// A deep copy of the first combined row seen for this group; aggregate
  /// results are stored into it before the projections are evaluated.
  row: Map,
}

/// Executes a grouping query over the windowed buffers.
pub struct GroupByExecutionPlan {
  filter: Option<Expr>,
  group_by: Vec<Expr>,
  projections: Vec<Projection>,
  buffers: BTreeMap<String, StreamBuffer>,
  prev_results: Vec<Map>,
  cur_results: Vec<Map>,
}

impl GroupByExecutionPlan {
  /// Builds the executor for a logical plan.
  pub fn new(plan: LogicalPlan) -> Self {
    let buffers = plan
      .streams
      .into_iter()
      .map(|(name, window)| (name, StreamBuffer::new(window)))
      .collect();
    Self {
      filter: plan.filter,
      group_by: plan.group_by,
      projections: plan.projections,
      buffers,
      prev_results: Vec::new(),
      cur_results: Vec::new(),
    }
  }

  /// Results of the latest completed run.
  pub fn cur_results(&self) -> &[Map] {
    &self.cur_results
  }

  /// Results of the run before the latest one.
  pub fn prev_results(&self) -> &[Map] {
    &self.prev_results
  }

  /// Feeds one tuple into its stream buffer and recomputes the query.
  ///
  /// Returns the current result set, one map per group, in unspecified
  /// order. The tuple is routed by `input_name`; a tuple from a stream the
  /// plan does not reference is a `NoSuchNode` error.
  pub fn process(&mut self, tuple: &Tuple) -> Result<Vec<Map>> {
    let buffer = self
      .buffers
      .get_mut(&tuple.input_name)
      .ok_or_else(|| Error::NoSuchNode(tuple.input_name.clone()))?;
    buffer.push(tuple.timestamp, tuple.data.clone());
    self.perform_query_on_buffer()?;
    Ok(self.cur_results.clone())
  }

  /// Runs the query over the buffered rows.
  ///
  /// The previous `cur_results` moves to `prev_results`, and the new
  /// output reuses the storage that backed the old `prev_results`. On an
  /// error the visible results are as if the call never happened, except
  /// that `prev_results` is guaranteed to sit on storage disjoint from
  /// `cur_results`, which the downstream istream/dstream diffing relies
  /// on.
  fn perform_query_on_buffer(&mut self) -> Result<()> {
    let mut output = std::mem::take(&mut self.prev_results);
    output.clear();
    self.prev_results = std::mem::take(&mut self.cur_results);

    match self.run_query(&mut output) {
      Ok(()) => {
        self.cur_results = output;
        Ok(())
      }
      Err(err) => {
        self.cur_results = std::mem::replace(&mut self.prev_results, output);
        Err(err)
      }
    }
  }

  fn run_query(&self, output: &mut Vec<Map>) -> Result<()> {
    let mut groups: Vec<GroupData> = Vec::new();
    let streams: Vec<&String> = self.buffers.keys().collect();
    let mut holder = Map::new();
    self.each_combination(&streams, 0, &mut holder, &mut groups)?;
    for group in &mut groups {
      self.eval_group(group, output)?;
    }
    Ok(())
  }

  /// Enumerates the cartesian product of the per-stream buffers, building
  /// combined rows shaped like `{"streamA": {..}, "streamB": {..}}`.
  fn each_combination(
    &self,
    streams: &[&String],
    depth: usize,
    holder: &mut Map,
    groups: &mut Vec<GroupData>,
  ) -> Result<()> {
    let Some(name) = streams.get(depth) else {
      return self.eval_item(holder, groups);
    };
    for row in self.buffers[*name].rows() {
      holder.insert((*name).clone(), Value::Map(row.clone()));
      self.each_combination(streams, depth + 1, holder, groups)?;
    }
    holder.remove(*name);
    Ok(())
  }

  /// Filters one combined row, assigns it to its group, and collects the
  /// aggregate inputs.
  fn eval_item(&self, row: &Map, groups: &mut Vec<GroupData>) -> Result<()> {
    if let Some(filter) = &self.filter {
      // to_bool sends null to false, so a null filter result skips the
      // row without special-casing.
      if !filter.eval(row)?.to_bool() {
        return Ok(());
      }
    }

    let mut key = Vec::with_capacity(self.group_by.len());
    for expr in &self.group_by {
      key.push(expr.eval(row)?);
    }

    let index = self.find_or_create_group(key, row, groups)?;
    let group = &mut groups[index];
    for projection in &self.projections {
      for call in &projection.aggregates {
        let value = call.input.eval(row)?;
        group.agg_inputs.entry(call.id.clone()).or_default().push(value);
      }
    }
    Ok(())
  }

  /// Looks up the group with the given key by element-wise checked
  /// equality, creating it if absent with a deep copy of `row` as its
  /// representative.
  fn find_or_create_group(
    &self,
    key: Vec<Value>,
    row: &Map,
    groups: &mut Vec<GroupData>,
  ) -> Result<usize> {
    for (index, group) in groups.iter().enumerate() {
      if group.key.len() != key.len() {
        continue;
      }
      let mut matches = true;
      for (a, b) in group.key.iter().zip(key.iter()) {
        if !a.equals(b)? {
          matches = false;
          break;
        }
      }
      if matches {
        return Ok(index);
      }
    }

    let mut agg_inputs = HashMap::new();
    for projection in &self.projections {
      for call in &projection.aggregates {
        agg_inputs.insert(call.id.clone(), Vec::new());
      }
    }
    groups.push(GroupData {
      key,
      agg_inputs,
      row: row.clone(),
    });
    Ok(groups.len() - 1)
  }

  /// Computes the aggregates of one group, stores them into the
  /// representative row, and evaluates every projection into one output
  /// row.
  fn eval_group(&self, group: &mut GroupData, output: &mut Vec<Map>) -> Result<()> {
    let mut result = Map::with_capacity(self.projections.len());
    for projection in &self.projections {
      for call in &projection.aggregates {
        let inputs = group
          .agg_inputs
          .get(call.id.as_str())
          .map(Vec::as_slice)
          .unwrap_or(&[]);
        let value = call.func.apply(inputs)?;
        group.row.insert(call.id.clone(), value);
      }
      let value = projection.expr.eval(&group.row)?;
      result.insert(projection.alias.clone(), value);
    }
    output.push(result);
    Ok(())
  }
}
