// Volcano-style query execution
//
// Every operator pulls (tuple, rid) pairs from its child through the
// `Executor` trait. Expression evaluation is a collaborator: predicates,
// projections, and update functions enter as closures.

pub mod operators;

use std::sync::Arc;
use thiserror::Error;

use crate::catalog::{Catalog, CatalogError};
use crate::common::types::Rid;
use crate::index::btree::BTreeError;
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::table::{TableError, Tuple, TupleError};
use crate::transaction::{IsolationLevel, LockManager, Transaction, TransactionError};

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Table error: {0}")]
    Table(#[from] TableError),

    #[error("Tuple error: {0}")]
    Tuple(#[from] TupleError),

    #[error("Index error: {0}")]
    BTree(#[from] BTreeError),

    #[error("Buffer pool error: {0}")]
    Buffer(#[from] BufferPoolError),

    #[error("Duplicate key in unique index")]
    DuplicateKey,

    #[error("Updated tuple no longer fits in place at {0}")]
    UpdateDoesNotFit(Rid),

    #[error("Executor not initialized")]
    NotInitialized,
}

pub type ExecResult<T> = Result<T, ExecutionError>;

/// The iterator interface every operator implements. `init` is idempotent
/// per scan and re-positions the operator at its beginning; `next` returns
/// `None` at end of stream.
pub trait Executor: Send {
    fn init(&mut self) -> ExecResult<()>;
    fn next(&mut self) -> ExecResult<Option<(Tuple, Rid)>>;
}

pub type BoxedExecutor = Box<dyn Executor>;

/// Shared handles an operator needs; cheap to clone, no globals.
#[derive(Clone)]
pub struct ExecutorContext {
    pub txn: Arc<Transaction>,
    pub catalog: Arc<Catalog>,
    pub buffer_pool: Arc<BufferPoolManager>,
    pub lock_manager: Arc<LockManager>,
}

impl ExecutorContext {
    pub fn new(
        txn: Arc<Transaction>,
        catalog: Arc<Catalog>,
        buffer_pool: Arc<BufferPoolManager>,
        lock_manager: Arc<LockManager>,
    ) -> Self {
        Self {
            txn,
            catalog,
            buffer_pool,
            lock_manager,
        }
    }

    /// Take a shared lock ahead of reading a tuple, per the isolation
    /// policy. Returns true when this call acquired the lock (so a
    /// READ_COMMITTED scan knows to release it after the predicate).
    pub(crate) fn lock_for_read(&self, rid: Rid) -> ExecResult<bool> {
        match self.txn.isolation_level() {
            IsolationLevel::ReadUncommitted => Ok(false),
            IsolationLevel::ReadCommitted | IsolationLevel::RepeatableRead => {
                if self.txn.is_shared_locked(rid) || self.txn.is_exclusive_locked(rid) {
                    return Ok(false);
                }
                self.lock_manager.lock_shared(&self.txn, rid)?;
                Ok(true)
            }
        }
    }

    /// Drop a read lock immediately after the predicate, READ_COMMITTED only.
    pub(crate) fn release_read_lock(&self, rid: Rid, acquired: bool) -> ExecResult<()> {
        if acquired
            && self.txn.isolation_level() == IsolationLevel::ReadCommitted
            && self.txn.is_shared_locked(rid)
        {
            self.lock_manager.unlock(&self.txn, rid)?;
        }
        Ok(())
    }

    /// Take an exclusive lock for a write, upgrading a held shared lock.
    pub(crate) fn lock_for_write(&self, rid: Rid) -> ExecResult<()> {
        if self.txn.is_exclusive_locked(rid) {
            return Ok(());
        }
        if self.txn.is_shared_locked(rid) {
            self.lock_manager.lock_upgrade(&self.txn, rid)?;
        } else {
            self.lock_manager.lock_exclusive(&self.txn, rid)?;
        }
        Ok(())
    }
}

/// Row predicate supplied by the expression collaborator
pub type Predicate = Arc<dyn Fn(&Tuple) -> bool + Send + Sync>;

/// Join predicate over (left, right) rows
pub type JoinPredicate = Arc<dyn Fn(&Tuple, &Tuple) -> bool + Send + Sync>;

/// Produces the updated image of a row
pub type UpdateFn = Arc<dyn Fn(&Tuple) -> Tuple + Send + Sync>;

/// Extracts the inner-index join key from an outer row
pub type KeyExtractor = Arc<dyn Fn(&Tuple) -> Option<i64> + Send + Sync>;
