use byteorder::{ByteOrder, LittleEndian};
use crate::common::types::{PageId, INVALID_PAGE_ID};
use crate::storage::page::layout::TABLE_PAGE_HEADER_SIZE;

/// In-memory view of a table page's header fields.
#[derive(Debug, Clone, Copy)]
pub struct TablePageHeader {
    pub next_page_id: PageId,
    pub prev_page_id: PageId,
    pub slot_count: u32,
    pub free_space_offset: u32,
}

impl TablePageHeader {
    pub fn new() -> Self {
        Self {
            next_page_id: INVALID_PAGE_ID,
            prev_page_id: INVALID_PAGE_ID,
            slot_count: 0,
            free_space_offset: TABLE_PAGE_HEADER_SIZE as u32,
        }
    }

    pub fn to_bytes(&self) -> [u8; TABLE_PAGE_HEADER_SIZE] {
        let mut bytes = [0u8; TABLE_PAGE_HEADER_SIZE];
        LittleEndian::write_u32(&mut bytes[0..4], self.next_page_id);
        LittleEndian::write_u32(&mut bytes[4..8], self.prev_page_id);
        LittleEndian::write_u32(&mut bytes[8..12], self.slot_count);
        LittleEndian::write_u32(&mut bytes[12..16], self.free_space_offset);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            next_page_id: LittleEndian::read_u32(&bytes[0..4]),
            prev_page_id: LittleEndian::read_u32(&bytes[4..8]),
            slot_count: LittleEndian::read_u32(&bytes[8..12]),
            free_space_offset: LittleEndian::read_u32(&bytes[12..16]),
        }
    }
}

impl Default for TablePageHeader {
    fn default() -> Self {
        Self::new()
    }
}
