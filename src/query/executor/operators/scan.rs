use std::sync::Arc;

use crate::catalog::TableInfo;
use crate::common::types::Rid;
use crate::index::btree::{BTreeIterator, I64Key};
use crate::query::executor::{ExecResult, ExecutionError, Executor, ExecutorContext, Predicate};
use crate::storage::table::{TableIterator, Tuple};

/// Sequential scan over a table heap. Under REPEATABLE_READ every visited
/// row is shared-locked and stays locked; under READ_COMMITTED the lock is
/// dropped right after the predicate is evaluated.
pub struct SeqScanExecutor {
    ctx: ExecutorContext,
    table_name: String,
    predicate: Option<Predicate>,
    iter: Option<TableIterator>,
}

impl SeqScanExecutor {
    pub fn new(ctx: ExecutorContext, table_name: impl Into<String>, predicate: Option<Predicate>) -> Self {
        Self {
            ctx,
            table_name: table_name.into(),
            predicate,
            iter: None,
        }
    }
}

impl Executor for SeqScanExecutor {
    fn init(&mut self) -> ExecResult<()> {
        let table = self.ctx.catalog.table(&self.table_name)?;
        self.iter = Some(table.heap.iter());
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<(Tuple, Rid)>> {
        let iter = self.iter.as_mut().ok_or(ExecutionError::NotInitialized)?;

        while let Some((rid, tuple)) = iter.next_tuple()? {
            let acquired = self.ctx.lock_for_read(rid)?;
            let passes = match &self.predicate {
                Some(predicate) => predicate(&tuple),
                None => true,
            };
            self.ctx.release_read_lock(rid, acquired)?;
            if passes {
                return Ok(Some((tuple, rid)));
            }
        }
        Ok(None)
    }
}

/// Index scan: walks the B+ tree leaf chain from an optional start key,
/// stopping past an optional inclusive end key, and resolves each RID
/// against the table heap under the same locking policy as SeqScan.
pub struct IndexScanExecutor {
    ctx: ExecutorContext,
    table_name: String,
    index_name: String,
    start_key: Option<i64>,
    end_key: Option<i64>,
    predicate: Option<Predicate>,
    table: Option<Arc<TableInfo>>,
    iter: Option<BTreeIterator<I64Key>>,
}

impl IndexScanExecutor {
    pub fn new(
        ctx: ExecutorContext,
        table_name: impl Into<String>,
        index_name: impl Into<String>,
        start_key: Option<i64>,
        end_key: Option<i64>,
        predicate: Option<Predicate>,
    ) -> Self {
        Self {
            ctx,
            table_name: table_name.into(),
            index_name: index_name.into(),
            start_key,
            end_key,
            predicate,
            table: None,
            iter: None,
        }
    }
}

impl Executor for IndexScanExecutor {
    fn init(&mut self) -> ExecResult<()> {
        let table = self.ctx.catalog.table(&self.table_name)?;
        let index = self.ctx.catalog.index(&self.table_name, &self.index_name)?;

        let iter = match self.start_key {
            Some(start) => index.index.iter_from(&I64Key::from_i64(start))?,
            None => index.index.iter()?,
        };

        self.table = Some(table);
        self.iter = Some(iter);
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<(Tuple, Rid)>> {
        let iter = self.iter.as_mut().ok_or(ExecutionError::NotInitialized)?;
        let table = self.table.as_ref().ok_or(ExecutionError::NotInitialized)?;

        while let Some((key, rid)) = iter.next_entry()? {
            if let Some(end) = self.end_key {
                if key.to_i64() > end {
                    return Ok(None);
                }
            }

            let acquired = self.ctx.lock_for_read(rid)?;
            let tuple = table.heap.get_tuple(rid)?;
            let passes = match (&tuple, &self.predicate) {
                (Some(t), Some(predicate)) => predicate(t),
                (Some(_), None) => true,
                (None, _) => false,
            };
            self.ctx.release_read_lock(rid, acquired)?;

            if passes {
                if let Some(t) = tuple {
                    return Ok(Some((t, rid)));
                }
            }
        }
        Ok(None)
    }
}
