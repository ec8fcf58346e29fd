use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use parking_lot::RwLock;
use thiserror::Error;

use crate::catalog::schema::Schema;
use crate::common::types::{IndexOid, TableOid};
use crate::index::btree::{BPlusTree, BTreeError, I64Key};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::table::{TableHeap, TableError};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Table '{0}' already exists")]
    TableAlreadyExists(String),

    #[error("Index '{0}' on table '{1}' not found")]
    IndexNotFound(String, String),

    #[error("Index '{0}' on table '{1}' already exists")]
    IndexAlreadyExists(String, String),

    #[error("Table error: {0}")]
    Table(#[from] TableError),

    #[error("Index error: {0}")]
    BTree(#[from] BTreeError),
}

/// Everything the engine knows about one table
pub struct TableInfo {
    pub schema: Schema,
    pub name: String,
    pub heap: TableHeap,
    pub oid: TableOid,
}

/// Everything the engine knows about one index. Indexes key on a single
/// integer column, named by `key_attrs[0]`.
pub struct IndexInfo {
    pub name: String,
    pub table_name: String,
    pub index: BPlusTree<I64Key>,
    pub key_attrs: Vec<usize>,
    pub oid: IndexOid,
}

/// Process-lifetime registry of tables and indexes. Owned by the
/// `Database`; there are no module-level singletons.
pub struct Catalog {
    buffer_pool: Arc<BufferPoolManager>,
    tables: RwLock<HashMap<TableOid, Arc<TableInfo>>>,
    table_names: RwLock<HashMap<String, TableOid>>,
    indexes: RwLock<HashMap<IndexOid, Arc<IndexInfo>>>,
    /// table name -> index name -> index oid
    index_names: RwLock<HashMap<String, HashMap<String, IndexOid>>>,
    next_table_oid: AtomicU32,
    next_index_oid: AtomicU32,
}

impl Catalog {
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            tables: RwLock::new(HashMap::new()),
            table_names: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
            index_names: RwLock::new(HashMap::new()),
            next_table_oid: AtomicU32::new(0),
            next_index_oid: AtomicU32::new(0),
        }
    }

    /// Create a table with a fresh heap.
    pub fn create_table(
        &self,
        name: impl Into<String>,
        schema: Schema,
    ) -> Result<Arc<TableInfo>, CatalogError> {
        let name = name.into();
        if self.table_names.read().contains_key(&name) {
            return Err(CatalogError::TableAlreadyExists(name));
        }

        let heap = TableHeap::create(self.buffer_pool.clone())?;
        let oid = self.next_table_oid.fetch_add(1, Ordering::SeqCst);
        let info = Arc::new(TableInfo {
            schema,
            name: name.clone(),
            heap,
            oid,
        });

        self.tables.write().insert(oid, info.clone());
        self.table_names.write().insert(name, oid);
        Ok(info)
    }

    pub fn table(&self, name: &str) -> Result<Arc<TableInfo>, CatalogError> {
        let oid = *self
            .table_names
            .read()
            .get(name)
            .ok_or_else(|| CatalogError::TableNotFound(name.to_string()))?;
        self.table_by_oid(oid)
            .ok_or_else(|| CatalogError::TableNotFound(name.to_string()))
    }

    pub fn table_by_oid(&self, oid: TableOid) -> Option<Arc<TableInfo>> {
        self.tables.read().get(&oid).cloned()
    }

    /// Create a B+ tree index over one integer column of an existing table.
    /// Existing rows are not back-filled; DDL in this engine runs before DML.
    pub fn create_index(
        &self,
        index_name: impl Into<String>,
        table_name: &str,
        key_attrs: Vec<usize>,
    ) -> Result<Arc<IndexInfo>, CatalogError> {
        let index_name = index_name.into();
        let table = self.table(table_name)?;

        {
            let names = self.index_names.read();
            if names
                .get(table_name)
                .is_some_and(|m| m.contains_key(&index_name))
            {
                return Err(CatalogError::IndexAlreadyExists(
                    index_name,
                    table_name.to_string(),
                ));
            }
        }

        let qualified = format!("{}.{}", table.name, index_name);
        let index = BPlusTree::<I64Key>::with_default_sizes(qualified, self.buffer_pool.clone())?;
        let oid = self.next_index_oid.fetch_add(1, Ordering::SeqCst);
        let info = Arc::new(IndexInfo {
            name: index_name.clone(),
            table_name: table_name.to_string(),
            index,
            key_attrs,
            oid,
        });

        self.indexes.write().insert(oid, info.clone());
        self.index_names
            .write()
            .entry(table_name.to_string())
            .or_default()
            .insert(index_name, oid);
        Ok(info)
    }

    pub fn index(&self, table_name: &str, index_name: &str) -> Result<Arc<IndexInfo>, CatalogError> {
        let oid = {
            let names = self.index_names.read();
            names
                .get(table_name)
                .and_then(|m| m.get(index_name))
                .copied()
                .ok_or_else(|| {
                    CatalogError::IndexNotFound(index_name.to_string(), table_name.to_string())
                })?
        };
        self.index_by_oid(oid).ok_or_else(|| {
            CatalogError::IndexNotFound(index_name.to_string(), table_name.to_string())
        })
    }

    pub fn index_by_oid(&self, oid: IndexOid) -> Option<Arc<IndexInfo>> {
        self.indexes.read().get(&oid).cloned()
    }

    /// All indexes registered on a table
    pub fn table_indexes(&self, table_name: &str) -> Vec<Arc<IndexInfo>> {
        let oids: Vec<IndexOid> = self
            .index_names
            .read()
            .get(table_name)
            .map(|m| m.values().copied().collect())
            .unwrap_or_default();
        let indexes = self.indexes.read();
        oids.iter().filter_map(|oid| indexes.get(oid).cloned()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema::{Column, DataType};
    use crate::storage::disk::DiskManager;
    use tempfile::NamedTempFile;

    fn make_catalog() -> (Catalog, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let disk = Arc::new(DiskManager::new(file.path()).unwrap());
        let pool = Arc::new(BufferPoolManager::new(32, disk));
        (Catalog::new(pool), file)
    }

    fn people_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::Integer),
            Column::new("name", DataType::Text),
        ])
    }

    #[test]
    fn test_create_and_lookup_table() {
        let (catalog, _file) = make_catalog();

        let info = catalog.create_table("people", people_schema()).unwrap();
        assert_eq!(info.name, "people");

        let by_name = catalog.table("people").unwrap();
        assert_eq!(by_name.oid, info.oid);
        assert!(catalog.table_by_oid(info.oid).is_some());

        assert!(matches!(
            catalog.table("missing"),
            Err(CatalogError::TableNotFound(_))
        ));
        assert!(matches!(
            catalog.create_table("people", people_schema()),
            Err(CatalogError::TableAlreadyExists(_))
        ));
    }

    #[test]
    fn test_create_and_lookup_index() {
        let (catalog, _file) = make_catalog();
        catalog.create_table("people", people_schema()).unwrap();

        let info = catalog.create_index("people_id", "people", vec![0]).unwrap();
        assert_eq!(info.table_name, "people");

        let found = catalog.index("people", "people_id").unwrap();
        assert_eq!(found.oid, info.oid);
        assert_eq!(catalog.table_indexes("people").len(), 1);
        assert!(catalog.table_indexes("nobody").is_empty());

        assert!(matches!(
            catalog.index("people", "missing"),
            Err(CatalogError::IndexNotFound(_, _))
        ));
        assert!(matches!(
            catalog.create_index("people_id", "people", vec![0]),
            Err(CatalogError::IndexAlreadyExists(_, _))
        ));
    }

    #[test]
    fn test_oids_are_monotonic() {
        let (catalog, _file) = make_catalog();
        let a = catalog.create_table("a", people_schema()).unwrap();
        let b = catalog.create_table("b", people_schema()).unwrap();
        assert!(b.oid > a.oid);
    }
}
