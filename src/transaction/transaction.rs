use std::collections::HashSet;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{IndexOid, Rid, TableOid, TxnId};
use crate::storage::table::Tuple;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking state machine. A transaction only ever moves forward
/// through these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {0} attempted to lock while not in the growing phase")]
    StateViolation(TxnId),

    #[error("Transaction {0} requested a shared lock under READ_UNCOMMITTED")]
    LockOnReadUncommitted(TxnId),

    #[error("Transaction {0} was chosen as a deadlock victim")]
    Deadlock(TxnId),

    #[error("Transaction {0} released a lock it does not hold")]
    LockNotHeld(TxnId),

    #[error("Transaction {0} is not active")]
    UnknownTransaction(TxnId),
}

/// The kind of write a journal entry undoes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Insert,
    Delete,
    Update,
}

/// One entry of a transaction's write journal, replayed in reverse on
/// abort. Table records carry the pre-image for updates and deletes;
/// index records carry the key tuples to swap back.
#[derive(Debug, Clone)]
pub enum WriteRecord {
    Table {
        rid: Rid,
        oid: TableOid,
        op: WriteOp,
        tuple: Tuple,
    },
    Index {
        rid: Rid,
        index_oid: IndexOid,
        op: WriteOp,
        key_tuple: Tuple,
        old_key_tuple: Option<Tuple>,
    },
}

/// An active transaction: state machine, lock sets, and the write journal
/// used for abort undo. Shared across threads behind an `Arc`; the lock
/// manager and the executors both mutate it.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
    write_set: Mutex<Vec<WriteRecord>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
            write_set: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn is_shared_locked(&self, rid: Rid) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn is_exclusive_locked(&self, rid: Rid) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    pub(crate) fn add_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub(crate) fn add_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub(crate) fn remove_shared_lock(&self, rid: Rid) -> bool {
        self.shared_lock_set.lock().remove(&rid)
    }

    pub(crate) fn remove_exclusive_lock(&self, rid: Rid) -> bool {
        self.exclusive_lock_set.lock().remove(&rid)
    }

    /// Snapshot of every RID this transaction currently holds a lock on
    pub fn locked_rids(&self) -> Vec<Rid> {
        let mut rids: Vec<Rid> = self.shared_lock_set.lock().iter().copied().collect();
        rids.extend(self.exclusive_lock_set.lock().iter().copied());
        rids
    }

    /// Append an undo entry; the journal is replayed back-to-front on abort.
    pub fn append_write_record(&self, record: WriteRecord) {
        self.write_set.lock().push(record);
    }

    pub(crate) fn take_write_set(&self) -> Vec<WriteRecord> {
        std::mem::take(&mut *self.write_set.lock())
    }
}
