//! Query execution engine using the Volcano iterator model

pub mod eval;
pub mod operator;
pub mod planner;
pub mod record;

pub use eval::Evaluator;
pub use operator::{OperatorBox, PhysicalOperator};
pub use planner::{ExecutionPlan, QueryPlanner};
pub use record::{Record, Value};

use crate::error::GraphResult;
use crate::query::ast::Query;
use crate::query::result::ResultSet;
use crate::transaction::Snapshot;

/// Plans a parsed query and binds it to the snapshot it will read
pub fn execute(query: &Query, snapshot: Snapshot) -> GraphResult<ResultSet> {
    let plan = QueryPlanner::new().plan(query)?;
    Ok(ResultSet::new(snapshot, plan))
}
