use thiserror::Error;
use crate::common::types::PageId;
use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("Buffer pool error: {0}")]
    Buffer(#[from] BufferPoolError),

    #[error("Corrupted node page {0}: {1}")]
    Corrupted(PageId, String),

    #[error("Header page has no room for another index record")]
    HeaderFull,
}
