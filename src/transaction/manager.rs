use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use parking_lot::Mutex;
use log::{debug, warn};
use thiserror::Error;

use crate::catalog::Catalog;
use crate::common::types::TxnId;
use crate::index::btree::BTreeError;
use crate::storage::table::{TableError, TupleError};
use crate::transaction::lock_manager::LockManager;
use crate::transaction::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState, WriteOp, WriteRecord,
};

#[derive(Error, Debug)]
pub enum TxnManagerError {
    #[error("Transaction {0} is not active")]
    UnknownTransaction(TxnId),

    #[error("Table error during undo: {0}")]
    Table(#[from] TableError),

    #[error("Index error during undo: {0}")]
    BTree(#[from] BTreeError),

    #[error("Tuple error during undo: {0}")]
    Tuple(#[from] TupleError),

    #[error("Lock error: {0}")]
    Lock(#[from] TransactionError),
}

/// Creates and finishes transactions. Commit finalizes tombstoned deletes
/// and releases locks; abort replays the write journal in reverse against
/// the table heaps and indexes before releasing locks.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    catalog: Arc<Catalog>,
    active: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>, catalog: Arc<Catalog>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            catalog,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Start a transaction in the growing phase with a fresh monotonic id.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active.lock().insert(txn_id, txn.clone());
        debug!("transaction {} began ({:?})", txn_id, isolation_level);
        txn
    }

    pub fn transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active.lock().get(&txn_id).cloned()
    }

    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active.lock().keys().copied().collect()
    }

    /// Commit: finalize tombstoned deletes, release every lock, transition
    /// to COMMITTED.
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TxnManagerError> {
        for record in txn.take_write_set() {
            if let WriteRecord::Table {
                rid,
                oid,
                op: WriteOp::Delete,
                ..
            } = record
            {
                if let Some(table) = self.catalog.table_by_oid(oid) {
                    table.heap.apply_delete(rid)?;
                }
            }
        }

        self.release_locks(txn);
        txn.set_state(TransactionState::Committed);
        self.active.lock().remove(&txn.id());
        debug!("transaction {} committed", txn.id());
        Ok(())
    }

    /// Abort: replay the write journal back-to-front, undoing every table
    /// and index effect, then release locks and transition to ABORTED.
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), TxnManagerError> {
        let write_set = txn.take_write_set();
        for record in write_set.into_iter().rev() {
            match record {
                WriteRecord::Table { rid, oid, op, tuple } => {
                    let table = match self.catalog.table_by_oid(oid) {
                        Some(table) => table,
                        None => {
                            warn!("undo skipped: table oid {} vanished", oid);
                            continue;
                        }
                    };
                    match op {
                        WriteOp::Insert => table.heap.apply_delete(rid)?,
                        WriteOp::Delete => table.heap.rollback_delete(rid)?,
                        WriteOp::Update => {
                            table.heap.update_tuple(&tuple, rid)?;
                        }
                    }
                }
                WriteRecord::Index {
                    rid,
                    index_oid,
                    op,
                    key_tuple,
                    old_key_tuple,
                } => {
                    let index_info = match self.catalog.index_by_oid(index_oid) {
                        Some(info) => info,
                        None => {
                            warn!("undo skipped: index oid {} vanished", index_oid);
                            continue;
                        }
                    };
                    let key = key_tuple.key_from_tuple(&index_info.key_attrs)?;
                    match op {
                        WriteOp::Insert => index_info.index.remove(&key)?,
                        WriteOp::Delete => {
                            index_info.index.insert(key, rid)?;
                        }
                        WriteOp::Update => {
                            index_info.index.remove(&key)?;
                            if let Some(old) = old_key_tuple {
                                let old_key = old.key_from_tuple(&index_info.key_attrs)?;
                                index_info.index.insert(old_key, rid)?;
                            }
                        }
                    }
                }
            }
        }

        self.release_locks(txn);
        txn.set_state(TransactionState::Aborted);
        self.active.lock().remove(&txn.id());
        debug!("transaction {} aborted", txn.id());
        Ok(())
    }

    fn release_locks(&self, txn: &Arc<Transaction>) {
        for rid in txn.locked_rids() {
            if let Err(e) = self.lock_manager.unlock(txn, rid) {
                warn!("releasing lock on {} failed: {}", rid, e);
            }
        }
    }
}
