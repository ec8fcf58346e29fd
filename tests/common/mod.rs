use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use sirindb::Database;
use sirindb::catalog::{Column, DataType, Schema};
use sirindb::storage::buffer::BufferPoolManager;
use sirindb::storage::disk::DiskManager;

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager with a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let disk_manager = Arc::new(DiskManager::new(path)?);
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, disk_manager));
    Ok((buffer_pool, file))
}

// Open a full database over a temporary file
#[allow(dead_code)]
pub fn open_test_database(pool_size: usize) -> Result<(Database, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let db = Database::open(path, pool_size)?;
    Ok((db, file))
}

// Schema used by most executor tests: (id INTEGER, name TEXT, active BOOLEAN)
#[allow(dead_code)]
pub fn people_schema() -> Schema {
    Schema::new(vec![
        Column::new("id", DataType::Integer),
        Column::new("name", DataType::Text),
        Column::new("active", DataType::Boolean),
    ])
}
