pub mod agg;
pub mod delete;
pub mod filter;
pub mod insert;
pub mod join;
pub mod limit;
pub mod project;
pub mod scan;
pub mod update;

pub use agg::{AggregateFn, AggregationExecutor, HavingPredicate};
pub use delete::DeleteExecutor;
pub use filter::FilterExecutor;
pub use insert::InsertExecutor;
pub use join::{NestedIndexJoinExecutor, NestedLoopJoinExecutor};
pub use limit::LimitExecutor;
pub use project::ProjectionExecutor;
pub use scan::{IndexScanExecutor, SeqScanExecutor};
pub use update::UpdateExecutor;
