use crate::common::types::Rid;
use crate::query::executor::{BoxedExecutor, ExecResult, Executor};
use crate::storage::table::Tuple;

/// Skips the first `offset` child rows and emits at most `limit` after.
pub struct LimitExecutor {
    child: BoxedExecutor,
    offset: usize,
    limit: usize,
    skipped: usize,
    emitted: usize,
}

impl LimitExecutor {
    pub fn new(child: BoxedExecutor, offset: usize, limit: usize) -> Self {
        Self {
            child,
            offset,
            limit,
            skipped: 0,
            emitted: 0,
        }
    }
}

impl Executor for LimitExecutor {
    fn init(&mut self) -> ExecResult<()> {
        self.skipped = 0;
        self.emitted = 0;
        self.child.init()
    }

    fn next(&mut self) -> ExecResult<Option<(Tuple, Rid)>> {
        while self.skipped < self.offset {
            if self.child.next()?.is_none() {
                return Ok(None);
            }
            self.skipped += 1;
        }

        if self.emitted >= self.limit {
            return Ok(None);
        }

        match self.child.next()? {
            Some(row) => {
                self.emitted += 1;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }
}
