use std::sync::Arc;

use crate::catalog::{IndexInfo, TableInfo};
use crate::common::types::Rid;
use crate::query::executor::{
    BoxedExecutor, ExecResult, Executor, ExecutionError, ExecutorContext,
};
use crate::storage::table::Tuple;
use crate::transaction::{WriteOp, WriteRecord};

/// Tombstones the rows the child produces. The delete becomes final at
/// commit; until then the journaled pre-image can resurrect the row.
pub struct DeleteExecutor {
    ctx: ExecutorContext,
    table_name: String,
    child: BoxedExecutor,
    table: Option<Arc<TableInfo>>,
    indexes: Vec<Arc<IndexInfo>>,
}

impl DeleteExecutor {
    pub fn new(ctx: ExecutorContext, table_name: impl Into<String>, child: BoxedExecutor) -> Self {
        Self {
            ctx,
            table_name: table_name.into(),
            child,
            table: None,
            indexes: Vec::new(),
        }
    }
}

impl Executor for DeleteExecutor {
    fn init(&mut self) -> ExecResult<()> {
        let table = self.ctx.catalog.table(&self.table_name)?;
        self.indexes = self.ctx.catalog.table_indexes(&self.table_name);
        self.table = Some(table);
        self.child.init()
    }

    fn next(&mut self) -> ExecResult<Option<(Tuple, Rid)>> {
        let (tuple, rid) = match self.child.next()? {
            Some(row) => row,
            None => return Ok(None),
        };
        let table = self.table.as_ref().ok_or(ExecutionError::NotInitialized)?;

        self.ctx.lock_for_write(rid)?;

        table.heap.mark_delete(rid)?;
        self.ctx.txn.append_write_record(WriteRecord::Table {
            rid,
            oid: table.oid,
            op: WriteOp::Delete,
            tuple: tuple.clone(),
        });

        for index in &self.indexes {
            let key = tuple.key_from_tuple(&index.key_attrs)?;
            index.index.remove(&key)?;
            self.ctx.txn.append_write_record(WriteRecord::Index {
                rid,
                index_oid: index.oid,
                op: WriteOp::Delete,
                key_tuple: tuple.clone(),
                old_key_tuple: None,
            });
        }

        Ok(Some((tuple, rid)))
    }
}
