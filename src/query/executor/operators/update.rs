use std::sync::Arc;

use crate::catalog::{IndexInfo, TableInfo};
use crate::common::types::Rid;
use crate::query::executor::{
    BoxedExecutor, ExecResult, Executor, ExecutionError, ExecutorContext, UpdateFn,
};
use crate::storage::table::Tuple;
use crate::transaction::{WriteOp, WriteRecord};

/// Rewrites the rows the child produces. The affected RID is locked
/// exclusively (upgrading a held shared lock), the pre-image journaled,
/// and every index maintained as delete-old-key + insert-new-key.
pub struct UpdateExecutor {
    ctx: ExecutorContext,
    table_name: String,
    update_fn: UpdateFn,
    child: BoxedExecutor,
    table: Option<Arc<TableInfo>>,
    indexes: Vec<Arc<IndexInfo>>,
}

impl UpdateExecutor {
    pub fn new(
        ctx: ExecutorContext,
        table_name: impl Into<String>,
        update_fn: UpdateFn,
        child: BoxedExecutor,
    ) -> Self {
        Self {
            ctx,
            table_name: table_name.into(),
            update_fn,
            child,
            table: None,
            indexes: Vec::new(),
        }
    }
}

impl Executor for UpdateExecutor {
    fn init(&mut self) -> ExecResult<()> {
        // The table must resolve before its indexes.
        let table = self.ctx.catalog.table(&self.table_name)?;
        self.indexes = self.ctx.catalog.table_indexes(&self.table_name);
        self.table = Some(table);
        self.child.init()
    }

    fn next(&mut self) -> ExecResult<Option<(Tuple, Rid)>> {
        let (old_tuple, rid) = match self.child.next()? {
            Some(row) => row,
            None => return Ok(None),
        };
        let table = self.table.as_ref().ok_or(ExecutionError::NotInitialized)?;

        self.ctx.lock_for_write(rid)?;

        let new_tuple = (self.update_fn)(&old_tuple);
        if !table.heap.update_tuple(&new_tuple, rid)? {
            return Err(ExecutionError::UpdateDoesNotFit(rid));
        }

        self.ctx.txn.append_write_record(WriteRecord::Table {
            rid,
            oid: table.oid,
            op: WriteOp::Update,
            tuple: old_tuple.clone(),
        });

        for index in &self.indexes {
            let old_key = old_tuple.key_from_tuple(&index.key_attrs)?;
            let new_key = new_tuple.key_from_tuple(&index.key_attrs)?;
            index.index.remove(&old_key)?;
            index.index.insert(new_key, rid)?;
            self.ctx.txn.append_write_record(WriteRecord::Index {
                rid,
                index_oid: index.oid,
                op: WriteOp::Update,
                key_tuple: new_tuple.clone(),
                old_key_tuple: Some(old_tuple.clone()),
            });
        }

        Ok(Some((new_tuple, rid)))
    }
}
