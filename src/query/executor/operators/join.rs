use std::sync::Arc;

use crate::catalog::{IndexInfo, TableInfo};
use crate::common::types::Rid;
use crate::index::btree::I64Key;
use crate::query::executor::{
    BoxedExecutor, ExecResult, Executor, ExecutionError, ExecutorContext, JoinPredicate,
    KeyExtractor,
};
use crate::storage::table::Tuple;

/// Classic nested-loop join: for every outer row, rescan the inner child
/// and emit the concatenation of every matching pair. The emitted RID is
/// the outer row's.
pub struct NestedLoopJoinExecutor {
    left: BoxedExecutor,
    right: BoxedExecutor,
    predicate: JoinPredicate,
    current_left: Option<(Tuple, Rid)>,
}

impl NestedLoopJoinExecutor {
    pub fn new(left: BoxedExecutor, right: BoxedExecutor, predicate: JoinPredicate) -> Self {
        Self {
            left,
            right,
            predicate,
            current_left: None,
        }
    }
}

impl Executor for NestedLoopJoinExecutor {
    fn init(&mut self) -> ExecResult<()> {
        self.left.init()?;
        self.right.init()?;
        self.current_left = self.left.next()?;
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<(Tuple, Rid)>> {
        loop {
            let (left_tuple, left_rid) = match &self.current_left {
                Some(row) => row.clone(),
                None => return Ok(None),
            };

            match self.right.next()? {
                Some((right_tuple, _)) => {
                    if (self.predicate)(&left_tuple, &right_tuple) {
                        return Ok(Some((left_tuple.join(&right_tuple), left_rid)));
                    }
                }
                None => {
                    // Inner exhausted: advance the outer and restart it.
                    self.current_left = self.left.next()?;
                    self.right.init()?;
                }
            }
        }
    }
}

/// Index nested-loop join: probes the inner table's B+ tree with a key
/// extracted from each outer row. Matched inner rows are read under the
/// scan locking policy.
pub struct NestedIndexJoinExecutor {
    ctx: ExecutorContext,
    child: BoxedExecutor,
    inner_table_name: String,
    inner_index_name: String,
    key_extractor: KeyExtractor,
    inner_table: Option<Arc<TableInfo>>,
    inner_index: Option<Arc<IndexInfo>>,
}

impl NestedIndexJoinExecutor {
    pub fn new(
        ctx: ExecutorContext,
        child: BoxedExecutor,
        inner_table_name: impl Into<String>,
        inner_index_name: impl Into<String>,
        key_extractor: KeyExtractor,
    ) -> Self {
        Self {
            ctx,
            child,
            inner_table_name: inner_table_name.into(),
            inner_index_name: inner_index_name.into(),
            key_extractor,
            inner_table: None,
            inner_index: None,
        }
    }
}

impl Executor for NestedIndexJoinExecutor {
    fn init(&mut self) -> ExecResult<()> {
        let table = self.ctx.catalog.table(&self.inner_table_name)?;
        let index = self
            .ctx
            .catalog
            .index(&self.inner_table_name, &self.inner_index_name)?;
        self.inner_table = Some(table);
        self.inner_index = Some(index);
        self.child.init()
    }

    fn next(&mut self) -> ExecResult<Option<(Tuple, Rid)>> {
        let table = self.inner_table.as_ref().ok_or(ExecutionError::NotInitialized)?;
        let index = self.inner_index.as_ref().ok_or(ExecutionError::NotInitialized)?;

        while let Some((outer_tuple, outer_rid)) = self.child.next()? {
            let key = match (self.key_extractor)(&outer_tuple) {
                Some(key) => key,
                None => continue,
            };

            if let Some(inner_rid) = index.index.get(&I64Key::from_i64(key))? {
                let acquired = self.ctx.lock_for_read(inner_rid)?;
                let inner_tuple = table.heap.get_tuple(inner_rid)?;
                self.ctx.release_read_lock(inner_rid, acquired)?;

                if let Some(inner) = inner_tuple {
                    return Ok(Some((outer_tuple.join(&inner), outer_rid)));
                }
            }
        }
        Ok(None)
    }
}
