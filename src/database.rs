use std::path::Path;
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::query::executor::ExecutorContext;
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::disk::DiskManager;
use crate::transaction::{
    IsolationLevel, LockManager, LockManagerConfig, Transaction, TransactionManager,
    TxnManagerError,
};

/// The assembled engine. Components are constructed in dependency order —
/// disk manager, buffer pool, lock manager, catalog, transaction manager —
/// and live for the process; executors borrow them through a context
/// handle rather than reaching for globals.
pub struct Database {
    buffer_pool: Arc<BufferPoolManager>,
    lock_manager: Arc<LockManager>,
    catalog: Arc<Catalog>,
    txn_manager: TransactionManager,
}

impl Database {
    pub fn open(db_path: impl AsRef<Path>, pool_size: usize) -> Result<Self, BufferPoolError> {
        Self::open_with_config(db_path, pool_size, LockManagerConfig::default())
    }

    pub fn open_with_config(
        db_path: impl AsRef<Path>,
        pool_size: usize,
        lock_config: LockManagerConfig,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, disk_manager));

        let lock_manager = Arc::new(LockManager::new(lock_config));
        let catalog = Arc::new(Catalog::new(buffer_pool.clone()));
        let txn_manager = TransactionManager::new(lock_manager.clone(), catalog.clone());

        Ok(Self {
            buffer_pool,
            lock_manager,
            catalog,
            txn_manager,
        })
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.buffer_pool
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn txn_manager(&self) -> &TransactionManager {
        &self.txn_manager
    }

    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        self.txn_manager.begin(isolation_level)
    }

    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TxnManagerError> {
        self.txn_manager.commit(txn)
    }

    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), TxnManagerError> {
        self.txn_manager.abort(txn)
    }

    /// Context handle an executor tree runs under
    pub fn executor_context(&self, txn: Arc<Transaction>) -> ExecutorContext {
        ExecutorContext::new(
            txn,
            self.catalog.clone(),
            self.buffer_pool.clone(),
            self.lock_manager.clone(),
        )
    }

    /// Write every dirty page back before shutdown.
    pub fn flush_all(&self) -> Result<(), BufferPoolError> {
        self.buffer_pool.flush_all()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.buffer_pool.flush_all() {
            log::warn!("flush on close failed: {}", e);
        }
    }
}
