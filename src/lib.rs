// Export public modules
pub mod catalog;
pub mod common;
pub mod database;
pub mod index;
pub mod query;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use catalog::Catalog;
pub use database::Database;
pub use index::btree::BPlusTree;
pub use storage::buffer::{BufferPoolError, BufferPoolManager};
pub use transaction::{IsolationLevel, LockManager, Transaction, TransactionManager};
