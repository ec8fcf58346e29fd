use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PAGE_SIZE};
use crate::index::btree::error::BTreeError;

/// The header page stores `(index name, root page id)` records so that
/// indexes can be re-opened by name at startup. It lives at the well-known
/// `HEADER_PAGE_ID` and is updated on every root change.
///
/// Layout: a u32 record count, then packed records of
/// `[name_len: u16][name bytes][root_page_id: u32]`.
pub struct HeaderPage;

impl HeaderPage {
    /// Look up the root page id recorded for an index name.
    pub fn get_root(page: &Page, name: &str) -> Option<PageId> {
        let mut offset = 4;
        let count = LittleEndian::read_u32(&page.data[0..4]);
        for _ in 0..count {
            let (record_name_len, record_root_offset) = Self::record_at(page, offset);
            let name_bytes = &page.data[offset + 2..offset + 2 + record_name_len];
            if name_bytes == name.as_bytes() {
                return Some(LittleEndian::read_u32(
                    &page.data[record_root_offset..record_root_offset + 4],
                ));
            }
            offset = record_root_offset + 4;
        }
        None
    }

    /// Append a record for a new index name.
    pub fn insert_record(page: &mut Page, name: &str, root: PageId) -> Result<(), BTreeError> {
        let count = LittleEndian::read_u32(&page.data[0..4]);
        let mut offset = 4;
        for _ in 0..count {
            let (_, record_root_offset) = Self::record_at(page, offset);
            offset = record_root_offset + 4;
        }

        let record_len = 2 + name.len() + 4;
        if offset + record_len > PAGE_SIZE {
            return Err(BTreeError::HeaderFull);
        }

        LittleEndian::write_u16(&mut page.data[offset..offset + 2], name.len() as u16);
        page.data[offset + 2..offset + 2 + name.len()].copy_from_slice(name.as_bytes());
        LittleEndian::write_u32(
            &mut page.data[offset + 2 + name.len()..offset + record_len],
            root,
        );
        LittleEndian::write_u32(&mut page.data[0..4], count + 1);

        Ok(())
    }

    /// Overwrite the root recorded for an existing index name. Returns false
    /// when the name is unknown.
    pub fn update_record(page: &mut Page, name: &str, root: PageId) -> bool {
        let count = LittleEndian::read_u32(&page.data[0..4]);
        let mut offset = 4;
        for _ in 0..count {
            let (record_name_len, record_root_offset) = Self::record_at(page, offset);
            let matches = {
                let name_bytes = &page.data[offset + 2..offset + 2 + record_name_len];
                name_bytes == name.as_bytes()
            };
            if matches {
                LittleEndian::write_u32(
                    &mut page.data[record_root_offset..record_root_offset + 4],
                    root,
                );
                return true;
            }
            offset = record_root_offset + 4;
        }
        false
    }

    fn record_at(page: &Page, offset: usize) -> (usize, usize) {
        let name_len = LittleEndian::read_u16(&page.data[offset..offset + 2]) as usize;
        (name_len, offset + 2 + name_len)
    }
}
