pub mod lock_manager;
pub mod manager;
pub mod transaction;

pub use lock_manager::{LockManager, LockManagerConfig};
pub use manager::{TransactionManager, TxnManagerError};
pub use transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState, WriteOp, WriteRecord,
};
