use std::sync::Arc;
use thiserror::Error;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::storage::buffer::{BufferPoolManager, BufferPoolError};
use crate::storage::page::{PageManager, PageError};
use crate::storage::table::tuple::{Tuple, TupleError};

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Buffer pool error: {0}")]
    Buffer(#[from] BufferPoolError),

    #[error("Page error: {0}")]
    Page(#[from] PageError),

    #[error("Tuple error: {0}")]
    Tuple(#[from] TupleError),

    #[error("Tuple does not fit in an empty page")]
    TupleTooLarge,
}

/// A table heap: a chain of slotted pages reached through the buffer pool.
/// Cheap to clone; clones share the same first page.
#[derive(Clone)]
pub struct TableHeap {
    buffer_pool: Arc<BufferPoolManager>,
    page_manager: PageManager,
    first_page_id: PageId,
}

impl TableHeap {
    /// Create a heap with one empty page.
    pub fn create(buffer_pool: Arc<BufferPoolManager>) -> Result<Self, TableError> {
        let page_manager = PageManager::new();
        let (page, first_page_id) = buffer_pool.new_page()?;
        {
            let mut guard = page.write();
            page_manager.init_page(&mut guard);
        }
        buffer_pool.unpin_page(first_page_id, true)?;

        Ok(Self {
            buffer_pool,
            page_manager,
            first_page_id,
        })
    }

    /// Re-open an existing heap by its first page id.
    pub fn open(buffer_pool: Arc<BufferPoolManager>, first_page_id: PageId) -> Self {
        Self {
            buffer_pool,
            page_manager: PageManager::new(),
            first_page_id,
        }
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Insert a tuple, first-fit along the page chain, appending a fresh
    /// page at the tail when every page is full.
    pub fn insert_tuple(&self, tuple: &Tuple) -> Result<Rid, TableError> {
        use crate::storage::page::layout::{SLOT_SIZE, TABLE_PAGE_HEADER_SIZE};

        let bytes = tuple.to_bytes()?;
        if bytes.len() + SLOT_SIZE + TABLE_PAGE_HEADER_SIZE > crate::common::types::PAGE_SIZE {
            return Err(TableError::TupleTooLarge);
        }
        let mut page_id = self.first_page_id;

        loop {
            let page = self.buffer_pool.fetch_page(page_id)?;
            let mut guard = page.write();

            match self.page_manager.insert_record(&mut guard, &bytes) {
                Ok(slot) => {
                    drop(guard);
                    self.buffer_pool.unpin_page(page_id, true)?;
                    return Ok(Rid::new(page_id, slot));
                }
                Err(PageError::InsufficientSpace) => {
                    let next = self.page_manager.header(&guard).next_page_id;
                    if next != INVALID_PAGE_ID {
                        drop(guard);
                        self.buffer_pool.unpin_page(page_id, false)?;
                        page_id = next;
                        continue;
                    }

                    // Tail reached: chain a new page and retry there.
                    let (new_page, new_page_id) = self.buffer_pool.new_page()?;
                    {
                        let mut new_guard = new_page.write();
                        self.page_manager.init_page(&mut new_guard);
                        self.page_manager.set_prev_page_id(&mut new_guard, page_id);
                    }
                    self.page_manager.set_next_page_id(&mut guard, new_page_id);
                    drop(guard);
                    self.buffer_pool.unpin_page(page_id, true)?;
                    self.buffer_pool.unpin_page(new_page_id, true)?;
                    page_id = new_page_id;
                }
                Err(e) => {
                    drop(guard);
                    self.buffer_pool.unpin_page(page_id, false)?;
                    return Err(e.into());
                }
            }
        }
    }

    /// Fetch a live tuple; `None` when the slot is tombstoned or dead.
    pub fn get_tuple(&self, rid: Rid) -> Result<Option<Tuple>, TableError> {
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = {
            let guard = page.read();
            match self.page_manager.get_record(&guard, rid.slot) {
                Ok(bytes) => Some(Tuple::from_bytes(&bytes)?),
                Err(PageError::RecordDeleted(_)) => None,
                Err(e) => {
                    drop(guard);
                    self.buffer_pool.unpin_page(rid.page_id, false)?;
                    return Err(e.into());
                }
            }
        };
        self.buffer_pool.unpin_page(rid.page_id, false)?;
        Ok(result)
    }

    /// Overwrite a tuple in place. Returns false when the new payload does
    /// not fit in the slot (the RID must stay stable, so no relocation).
    pub fn update_tuple(&self, tuple: &Tuple, rid: Rid) -> Result<bool, TableError> {
        let bytes = tuple.to_bytes()?;
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let outcome = {
            let mut guard = page.write();
            self.page_manager.update_record(&mut guard, rid.slot, &bytes)
        };
        match outcome {
            Ok(()) => {
                self.buffer_pool.unpin_page(rid.page_id, true)?;
                Ok(true)
            }
            Err(PageError::InsufficientSpace) => {
                self.buffer_pool.unpin_page(rid.page_id, false)?;
                Ok(false)
            }
            Err(e) => {
                self.buffer_pool.unpin_page(rid.page_id, false)?;
                Err(e.into())
            }
        }
    }

    /// Tombstone a tuple (undoable until commit).
    pub fn mark_delete(&self, rid: Rid) -> Result<(), TableError> {
        self.with_page_mut(rid, |pm, guard| pm.mark_delete(guard, rid.slot))
    }

    /// Clear a tombstone during abort undo.
    pub fn rollback_delete(&self, rid: Rid) -> Result<(), TableError> {
        self.with_page_mut(rid, |pm, guard| pm.rollback_delete(guard, rid.slot))
    }

    /// Kill the slot for good (commit-time delete, or undo of an insert).
    pub fn apply_delete(&self, rid: Rid) -> Result<(), TableError> {
        self.with_page_mut(rid, |pm, guard| pm.apply_delete(guard, rid.slot))
    }

    /// Iterate the live tuples in heap order.
    pub fn iter(&self) -> TableIterator {
        TableIterator {
            heap: self.clone(),
            page_id: self.first_page_id,
            next_slot: 0,
        }
    }

    fn with_page_mut<F>(&self, rid: Rid, f: F) -> Result<(), TableError>
    where
        F: FnOnce(&PageManager, &mut crate::common::types::Page) -> Result<(), PageError>,
    {
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let outcome = {
            let mut guard = page.write();
            f(&self.page_manager, &mut guard)
        };
        self.buffer_pool.unpin_page(rid.page_id, outcome.is_ok())?;
        outcome.map_err(Into::into)
    }
}

/// Cursor over a table heap's live tuples. Pins one page per step.
pub struct TableIterator {
    heap: TableHeap,
    page_id: PageId,
    next_slot: u32,
}

impl TableIterator {
    /// Advance to the next live tuple, or `None` at end of heap.
    pub fn next_tuple(&mut self) -> Result<Option<(Rid, Tuple)>, TableError> {
        while self.page_id != INVALID_PAGE_ID {
            let fetched_page_id = self.page_id;
            let page = self.heap.buffer_pool.fetch_page(fetched_page_id)?;
            let found = {
                let guard = page.read();
                let slot_count = self.heap.page_manager.slot_count(&guard);
                let mut hit = None;
                while self.next_slot < slot_count {
                    let slot = self.next_slot;
                    self.next_slot += 1;
                    if self.heap.page_manager.is_live(&guard, slot)? {
                        let bytes = self.heap.page_manager.get_record(&guard, slot)?;
                        hit = Some((Rid::new(fetched_page_id, slot), Tuple::from_bytes(&bytes)?));
                        break;
                    }
                }
                if hit.is_none() {
                    self.page_id = self.heap.page_manager.header(&guard).next_page_id;
                    self.next_slot = 0;
                }
                hit
            };
            self.heap.buffer_pool.unpin_page(fetched_page_id, false)?;
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }
}
