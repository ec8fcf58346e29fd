use thiserror::Error;

use crate::common::types::{Page, PageId, PAGE_SIZE};
use crate::storage::page::header::TablePageHeader;
use crate::storage::page::layout::{SlotEntry, SLOT_SIZE, TABLE_PAGE_HEADER_SIZE};

#[derive(Error, Debug)]
pub enum PageError {
    #[error("Insufficient space in page")]
    InsufficientSpace,

    #[error("Invalid slot id {0}")]
    InvalidSlot(u32),

    #[error("Record in slot {0} was deleted")]
    RecordDeleted(u32),
}

/// Operations over a slotted table page.
///
/// Record payloads grow downward from the header; the slot directory grows
/// upward from the page tail. Slots are never reused so record ids stay
/// stable for the lifetime of the page, which is what the lock manager
/// keys on.
#[derive(Clone)]
pub struct PageManager;

impl PageManager {
    pub fn new() -> Self {
        Self
    }

    pub fn init_page(&self, page: &mut Page) {
        let header = TablePageHeader::new();
        page.data[0..TABLE_PAGE_HEADER_SIZE].copy_from_slice(&header.to_bytes());
    }

    pub fn header(&self, page: &Page) -> TablePageHeader {
        TablePageHeader::from_bytes(&page.data[0..TABLE_PAGE_HEADER_SIZE])
    }

    pub fn set_header(&self, page: &mut Page, header: &TablePageHeader) {
        page.data[0..TABLE_PAGE_HEADER_SIZE].copy_from_slice(&header.to_bytes());
    }

    pub fn set_next_page_id(&self, page: &mut Page, next: PageId) {
        let mut header = self.header(page);
        header.next_page_id = next;
        self.set_header(page, &header);
    }

    pub fn set_prev_page_id(&self, page: &mut Page, prev: PageId) {
        let mut header = self.header(page);
        header.prev_page_id = prev;
        self.set_header(page, &header);
    }

    /// Insert a record, returning its slot id.
    pub fn insert_record(&self, page: &mut Page, data: &[u8]) -> Result<u32, PageError> {
        let mut header = self.header(page);

        let record_size = data.len() as u32;
        let slot_array_end = PAGE_SIZE - SLOT_SIZE * header.slot_count as usize;
        let needed = record_size as usize + SLOT_SIZE;

        if header.free_space_offset as usize + needed > slot_array_end {
            return Err(PageError::InsufficientSpace);
        }

        let offset = header.free_space_offset;
        page.data[offset as usize..offset as usize + data.len()].copy_from_slice(data);

        let slot = SlotEntry {
            offset,
            length: record_size,
            tombstoned: false,
        };
        let slot_pos = slot_array_end - SLOT_SIZE;
        page.data[slot_pos..slot_pos + SLOT_SIZE].copy_from_slice(&slot.to_bytes());

        let slot_id = header.slot_count;
        header.slot_count += 1;
        header.free_space_offset += record_size;
        self.set_header(page, &header);

        Ok(slot_id)
    }

    /// Read a live record. Tombstoned and dead slots read as deleted.
    pub fn get_record(&self, page: &Page, slot_id: u32) -> Result<Vec<u8>, PageError> {
        let slot = self.slot(page, slot_id)?;
        if slot.tombstoned || slot.is_dead() {
            return Err(PageError::RecordDeleted(slot_id));
        }
        let start = slot.offset as usize;
        Ok(page.data[start..start + slot.length as usize].to_vec())
    }

    /// Overwrite a record in place. Fails when the new payload does not fit
    /// in the slot's existing allocation.
    pub fn update_record(&self, page: &mut Page, slot_id: u32, data: &[u8]) -> Result<(), PageError> {
        let mut slot = self.slot(page, slot_id)?;
        if slot.tombstoned || slot.is_dead() {
            return Err(PageError::RecordDeleted(slot_id));
        }
        if data.len() as u32 > slot.length {
            return Err(PageError::InsufficientSpace);
        }

        let start = slot.offset as usize;
        page.data[start..start + data.len()].copy_from_slice(data);
        slot.length = data.len() as u32;
        self.write_slot(page, slot_id, &slot);

        Ok(())
    }

    /// Set the tombstone bit; the record stays physically present so an
    /// abort can bring it back.
    pub fn mark_delete(&self, page: &mut Page, slot_id: u32) -> Result<(), PageError> {
        let mut slot = self.slot(page, slot_id)?;
        if slot.tombstoned || slot.is_dead() {
            return Err(PageError::RecordDeleted(slot_id));
        }
        slot.tombstoned = true;
        self.write_slot(page, slot_id, &slot);
        Ok(())
    }

    /// Clear the tombstone bit after an aborted delete.
    pub fn rollback_delete(&self, page: &mut Page, slot_id: u32) -> Result<(), PageError> {
        let mut slot = self.slot(page, slot_id)?;
        if slot.is_dead() {
            return Err(PageError::RecordDeleted(slot_id));
        }
        slot.tombstoned = false;
        self.write_slot(page, slot_id, &slot);
        Ok(())
    }

    /// Kill a slot for good (commit of a delete, or undo of an insert).
    pub fn apply_delete(&self, page: &mut Page, slot_id: u32) -> Result<(), PageError> {
        let mut slot = self.slot(page, slot_id)?;
        slot.length = 0;
        slot.tombstoned = false;
        self.write_slot(page, slot_id, &slot);
        Ok(())
    }

    /// Whether the slot currently holds a visible record
    pub fn is_live(&self, page: &Page, slot_id: u32) -> Result<bool, PageError> {
        let slot = self.slot(page, slot_id)?;
        Ok(!slot.tombstoned && !slot.is_dead())
    }

    pub fn slot_count(&self, page: &Page) -> u32 {
        self.header(page).slot_count
    }

    fn slot(&self, page: &Page, slot_id: u32) -> Result<SlotEntry, PageError> {
        let header = self.header(page);
        if slot_id >= header.slot_count {
            return Err(PageError::InvalidSlot(slot_id));
        }
        let pos = PAGE_SIZE - SLOT_SIZE * (slot_id as usize + 1);
        Ok(SlotEntry::from_bytes(&page.data[pos..pos + SLOT_SIZE]))
    }

    fn write_slot(&self, page: &mut Page, slot_id: u32, slot: &SlotEntry) {
        let pos = PAGE_SIZE - SLOT_SIZE * (slot_id as usize + 1);
        page.data[pos..pos + SLOT_SIZE].copy_from_slice(&slot.to_bytes());
    }
}

impl Default for PageManager {
    fn default() -> Self {
        Self::new()
    }
}
