//! Bridges an execution plan into the node model.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::config::Context;
use crate::error::Result;
use crate::exec::plan::GroupByExecutionPlan;
use crate::node::Operator;
use crate::pipe::Writer;
use crate::tuple::Tuple;

/// An [`Operator`] that feeds every incoming tuple to a
/// [`GroupByExecutionPlan`] and writes each row of the resulting set
/// downstream as a fresh tuple.
///
/// The emitted tuples inherit the event timestamp and batch id of the
/// tuple that triggered the recomputation.
pub struct PlanOperator {
  plan: Mutex<GroupByExecutionPlan>,
}

impl PlanOperator {
  /// Wraps an execution plan.
  pub fn new(plan: GroupByExecutionPlan) -> Self {
    Self {
      plan: Mutex::new(plan),
    }
  }
}

#[async_trait]
impl Operator for PlanOperator {
  async fn process(&self, ctx: &Context, tuple: Tuple, writer: &dyn Writer) -> Result<()> {
    let rows = self.plan.lock().unwrap().process(&tuple)?;
    for row in rows {
      let out = Tuple::new(row)
        .with_timestamp(tuple.timestamp)
        .with_batch_id(tuple.batch_id);
      writer.write(ctx, out).await?;
    }
    Ok(())
  }
}
