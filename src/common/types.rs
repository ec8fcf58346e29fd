use std::sync::Arc;
use parking_lot::RwLock;
use serde::{Serialize, Deserialize};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type; 0 is reserved as the invalid page ID
pub type PageId = u32;

/// Sentinel for "no page"
pub const INVALID_PAGE_ID: PageId = 0;

/// Page ID of the well-known header page (first page the disk manager hands out)
pub const HEADER_PAGE_ID: PageId = 1;

/// Transaction ID type
pub type TxnId = u32;

/// Buffer pool frame ID type
pub type FrameId = u32;

/// LSN (Log Sequence Number) type
pub type Lsn = u64;

/// Table OID type
pub type TableOid = u32;

/// Index OID type
pub type IndexOid = u32;

/// Record identifier: a tuple's location in a table heap.
/// This is the granularity at which the lock manager operates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    pub fn invalid() -> Self {
        Self { page_id: INVALID_PAGE_ID, slot: 0 }
    }

    pub fn is_valid(&self) -> bool {
        self.page_id != INVALID_PAGE_ID
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot)
    }
}

/// Page structure
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
    pub lsn: Lsn,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
            lsn: 0,
        }
    }

    /// Zero the payload, keeping the page identity
    pub fn reset_memory(&mut self) {
        self.data = [0; PAGE_SIZE];
    }
}

/// Smart pointer to a page. The RwLock is the page latch; it is independent
/// of the buffer pool's own mutex.
pub type PagePtr = Arc<RwLock<Page>>;

/// Owned read guard on a page latch (usable across stack frames, as latch
/// crabbing requires)
pub type PageReadGuard = parking_lot::ArcRwLockReadGuard<parking_lot::RawRwLock, Page>;

/// Owned write guard on a page latch
pub type PageWriteGuard = parking_lot::ArcRwLockWriteGuard<parking_lot::RawRwLock, Page>;
