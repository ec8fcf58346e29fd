use crate::common::types::Rid;
use crate::query::executor::{BoxedExecutor, ExecResult, Executor};
use crate::storage::table::Tuple;

/// Projects child rows onto a subset of columns, by index.
pub struct ProjectionExecutor {
    child: BoxedExecutor,
    columns: Vec<usize>,
}

impl ProjectionExecutor {
    pub fn new(child: BoxedExecutor, columns: Vec<usize>) -> Self {
        Self { child, columns }
    }
}

impl Executor for ProjectionExecutor {
    fn init(&mut self) -> ExecResult<()> {
        self.child.init()
    }

    fn next(&mut self) -> ExecResult<Option<(Tuple, Rid)>> {
        match self.child.next()? {
            Some((tuple, rid)) => {
                let mut values = Vec::with_capacity(self.columns.len());
                for &col in &self.columns {
                    values.push(tuple.value_at(col)?.clone());
                }
                Ok(Some((Tuple::new(values), rid)))
            }
            None => Ok(None),
        }
    }
}
