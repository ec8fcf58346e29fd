use crate::common::types::Rid;
use crate::query::executor::{BoxedExecutor, ExecResult, Executor, Predicate};
use crate::storage::table::Tuple;

/// Drops child rows that fail the predicate.
pub struct FilterExecutor {
    child: BoxedExecutor,
    predicate: Predicate,
}

impl FilterExecutor {
    pub fn new(child: BoxedExecutor, predicate: Predicate) -> Self {
        Self { child, predicate }
    }
}

impl Executor for FilterExecutor {
    fn init(&mut self) -> ExecResult<()> {
        self.child.init()
    }

    fn next(&mut self) -> ExecResult<Option<(Tuple, Rid)>> {
        while let Some((tuple, rid)) = self.child.next()? {
            if (self.predicate)(&tuple) {
                return Ok(Some((tuple, rid)));
            }
        }
        Ok(None)
    }
}
