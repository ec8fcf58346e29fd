use std::sync::Arc;

use crate::catalog::{IndexInfo, TableInfo};
use crate::common::types::Rid;
use crate::query::executor::{
    BoxedExecutor, ExecResult, Executor, ExecutionError, ExecutorContext,
};
use crate::storage::table::Tuple;
use crate::transaction::{WriteOp, WriteRecord};

/// Inserts rows from a literal list or a child plan. Each new RID is
/// exclusively locked and journaled (heap record first, then one journal
/// entry per maintained index) so an abort can undo everything.
pub struct InsertExecutor {
    ctx: ExecutorContext,
    table_name: String,
    rows: Option<Vec<Tuple>>,
    child: Option<BoxedExecutor>,
    table: Option<Arc<TableInfo>>,
    indexes: Vec<Arc<IndexInfo>>,
    cursor: usize,
}

impl InsertExecutor {
    /// Insert the given literal rows.
    pub fn from_rows(ctx: ExecutorContext, table_name: impl Into<String>, rows: Vec<Tuple>) -> Self {
        Self {
            ctx,
            table_name: table_name.into(),
            rows: Some(rows),
            child: None,
            table: None,
            indexes: Vec::new(),
            cursor: 0,
        }
    }

    /// Insert everything the child produces.
    pub fn from_child(ctx: ExecutorContext, table_name: impl Into<String>, child: BoxedExecutor) -> Self {
        Self {
            ctx,
            table_name: table_name.into(),
            rows: None,
            child: Some(child),
            table: None,
            indexes: Vec::new(),
            cursor: 0,
        }
    }

    fn next_input(&mut self) -> ExecResult<Option<Tuple>> {
        if let Some(rows) = &self.rows {
            let tuple = rows.get(self.cursor).cloned();
            self.cursor += 1;
            return Ok(tuple);
        }
        match self.child.as_mut() {
            Some(child) => Ok(child.next()?.map(|(tuple, _)| tuple)),
            None => Ok(None),
        }
    }
}

impl Executor for InsertExecutor {
    fn init(&mut self) -> ExecResult<()> {
        let table = self.ctx.catalog.table(&self.table_name)?;
        self.indexes = self.ctx.catalog.table_indexes(&self.table_name);
        self.table = Some(table);
        self.cursor = 0;
        if let Some(child) = self.child.as_mut() {
            child.init()?;
        }
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<(Tuple, Rid)>> {
        let tuple = match self.next_input()? {
            Some(tuple) => tuple,
            None => return Ok(None),
        };
        let table = self.table.as_ref().ok_or(ExecutionError::NotInitialized)?;

        let rid = table.heap.insert_tuple(&tuple)?;
        self.ctx.lock_manager.lock_exclusive(&self.ctx.txn, rid)?;

        self.ctx.txn.append_write_record(WriteRecord::Table {
            rid,
            oid: table.oid,
            op: WriteOp::Insert,
            tuple: tuple.clone(),
        });

        for index in &self.indexes {
            let key = tuple.key_from_tuple(&index.key_attrs)?;
            if !index.index.insert(key, rid)? {
                return Err(ExecutionError::DuplicateKey);
            }
            self.ctx.txn.append_write_record(WriteRecord::Index {
                rid,
                index_oid: index.oid,
                op: WriteOp::Insert,
                key_tuple: tuple.clone(),
                old_key_tuple: None,
            });
        }

        Ok(Some((tuple, rid)))
    }
}
