pub mod catalog;
pub mod schema;

pub use catalog::{Catalog, CatalogError, IndexInfo, TableInfo};
pub use schema::{Column, DataType, Schema};
