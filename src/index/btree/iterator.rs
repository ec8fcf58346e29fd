use std::sync::Arc;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::BTreeNode;
use crate::storage::buffer::BufferPoolManager;

/// Cursor over the leaf chain in key order. Each step pins the current
/// leaf just long enough to read one entry; an invalid page id marks the
/// end of the scan.
pub struct BTreeIterator<K: IndexKey> {
    buffer_pool: Arc<BufferPoolManager>,
    page_id: PageId,
    index: usize,
    _marker: std::marker::PhantomData<fn() -> K>,
}

impl<K: IndexKey> BTreeIterator<K> {
    pub(crate) fn new(buffer_pool: Arc<BufferPoolManager>, page_id: PageId, index: usize) -> Self {
        Self {
            buffer_pool,
            page_id,
            index,
            _marker: std::marker::PhantomData,
        }
    }

    pub(crate) fn end(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self::new(buffer_pool, INVALID_PAGE_ID, 0)
    }

    pub fn is_end(&self) -> bool {
        self.page_id == INVALID_PAGE_ID
    }

    /// Yield the entry under the cursor and advance, following the leaf
    /// chain across page boundaries.
    pub fn next_entry(&mut self) -> Result<Option<(K, Rid)>, BTreeError> {
        while self.page_id != INVALID_PAGE_ID {
            let page_id = self.page_id;
            let page = self.buffer_pool.fetch_page(page_id)?;
            let entry = {
                let guard = page.read();
                let node = BTreeNode::<K>::decode(&guard)?;
                if self.index < node.keys.len() {
                    let entry = (node.keys[self.index], node.rids[self.index]);
                    self.index += 1;
                    Some(entry)
                } else {
                    // Leaf exhausted; hop to the next one.
                    self.page_id = node.next_page_id;
                    self.index = 0;
                    None
                }
            };
            self.buffer_pool.unpin_page(page_id, false)?;
            if entry.is_some() {
                return Ok(entry);
            }
        }
        Ok(None)
    }
}
