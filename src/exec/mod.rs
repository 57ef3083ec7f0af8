//! The streaming query execution layer.
//!
//! Consumes logical plans produced by an external planner and executes them
//! over windowed buffers of tuple data. The only plan shape implemented
//! here is the grouped aggregation of [`GroupByExecutionPlan`];
//! [`PlanOperator`] hosts a plan inside a topology.

pub mod aggregate;
pub mod expr;
pub mod operator;
pub mod plan;
pub mod window;

pub use aggregate::AggregateFunc;
pub use expr::{BinOp, Expr, UnOp};
pub use operator::PlanOperator;
pub use plan::{AggregateCall, GroupByExecutionPlan, LogicalPlan, Projection};
pub use window::{StreamBuffer, WindowSpec};
