use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, Rid, INVALID_PAGE_ID, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;

/// Node page header layout:
///   [0]      kind (1 = leaf, 2 = internal)
///   [1..5]   lsn
///   [5..9]   size
///   [9..13]  max_size
///   [13..17] parent_page_id
///   [17..21] page_id
///   [21..25] next_page_id (leaves only)
/// followed by packed fixed-width (key, value) slots.
const KIND_LEAF: u8 = 1;
const KIND_INTERNAL: u8 = 2;

const INTERNAL_HEADER_SIZE: usize = 21;
const LEAF_HEADER_SIZE: usize = 25;

/// Size of an encoded Rid (page id + slot)
const RID_SIZE: usize = 8;
/// Size of an encoded child page id
const CHILD_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Internal,
}

/// Placeholder key for an internal node's slot 0
pub fn dummy_key<K: IndexKey>() -> K {
    K::decode(&vec![0u8; K::ENCODED_LEN])
}

/// Largest number of (key, rid) slots a leaf page can hold
pub fn leaf_capacity<K: IndexKey>() -> u32 {
    ((PAGE_SIZE - LEAF_HEADER_SIZE) / (K::ENCODED_LEN + RID_SIZE)) as u32
}

/// Largest number of (key, child) slots an internal page can hold
pub fn internal_capacity<K: IndexKey>() -> u32 {
    ((PAGE_SIZE - INTERNAL_HEADER_SIZE) / (K::ENCODED_LEN + CHILD_SIZE)) as u32
}

/// Decoded form of a B+ tree node page.
///
/// Leaves keep `keys` and `rids` aligned. Internal nodes keep `keys` and
/// `children` aligned, with `keys[0]` a dummy: the key at slot i (i >= 1)
/// separates children i-1 and i.
#[derive(Debug, Clone)]
pub struct BTreeNode<K> {
    pub kind: NodeKind,
    pub lsn: u32,
    pub max_size: u32,
    pub parent_page_id: PageId,
    pub page_id: PageId,
    pub next_page_id: PageId,
    pub keys: Vec<K>,
    pub rids: Vec<Rid>,
    pub children: Vec<PageId>,
}

impl<K: IndexKey> BTreeNode<K> {
    pub fn new_leaf(page_id: PageId, parent_page_id: PageId, max_size: u32) -> Self {
        Self {
            kind: NodeKind::Leaf,
            lsn: 0,
            max_size,
            parent_page_id,
            page_id,
            next_page_id: INVALID_PAGE_ID,
            keys: Vec::new(),
            rids: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn new_internal(page_id: PageId, parent_page_id: PageId, max_size: u32) -> Self {
        Self {
            kind: NodeKind::Internal,
            lsn: 0,
            max_size,
            parent_page_id,
            page_id,
            next_page_id: INVALID_PAGE_ID,
            keys: Vec::new(),
            rids: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    pub fn size(&self) -> u32 {
        match self.kind {
            NodeKind::Leaf => self.keys.len() as u32,
            NodeKind::Internal => self.children.len() as u32,
        }
    }

    pub fn min_size(&self) -> u32 {
        match self.kind {
            NodeKind::Leaf => self.max_size / 2,
            NodeKind::Internal => (self.max_size / 2).max(2),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_page_id == INVALID_PAGE_ID
    }

    /// Safe for insert: adding one entry cannot force a split.
    pub fn is_safe_for_insert(&self) -> bool {
        match self.kind {
            NodeKind::Leaf => self.size() + 1 < self.max_size,
            NodeKind::Internal => self.size() < self.max_size,
        }
    }

    /// Safe for remove: dropping one entry cannot underflow.
    pub fn is_safe_for_remove(&self) -> bool {
        self.size() > self.min_size()
    }

    /// First index i with keys[i] >= key (leaf search)
    pub fn key_index(&self, key: &K) -> usize {
        debug_assert!(self.is_leaf());
        match self.keys.binary_search(key) {
            Ok(i) => i,
            Err(i) => i,
        }
    }

    /// Point lookup within a leaf
    pub fn lookup_leaf(&self, key: &K) -> Option<Rid> {
        debug_assert!(self.is_leaf());
        self.keys.binary_search(key).ok().map(|i| self.rids[i])
    }

    /// Insert (key, rid) into a leaf in key order; false on duplicate.
    pub fn insert_into_leaf(&mut self, key: K, rid: Rid) -> bool {
        debug_assert!(self.is_leaf());
        match self.keys.binary_search(&key) {
            Ok(_) => false,
            Err(i) => {
                self.keys.insert(i, key);
                self.rids.insert(i, rid);
                true
            }
        }
    }

    /// Remove a key from a leaf; false when absent.
    pub fn remove_from_leaf(&mut self, key: &K) -> bool {
        debug_assert!(self.is_leaf());
        match self.keys.binary_search(key) {
            Ok(i) => {
                self.keys.remove(i);
                self.rids.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    /// Child pointer to descend for `key`: largest i with keys[i] <= key,
    /// searching from slot 1 (slot 0's key is the dummy).
    pub fn child_lookup(&self, key: &K) -> PageId {
        debug_assert!(!self.is_leaf());
        let separators = &self.keys[1..];
        let idx = separators.partition_point(|k| k <= key);
        self.children[idx]
    }

    /// Slot index of a child page id within an internal node
    pub fn value_index(&self, child: PageId) -> Option<usize> {
        debug_assert!(!self.is_leaf());
        self.children.iter().position(|&c| c == child)
    }

    /// Insert (key, child) immediately after the slot holding `old_child`.
    pub fn insert_node_after(&mut self, old_child: PageId, key: K, new_child: PageId) {
        debug_assert!(!self.is_leaf());
        let idx = self
            .value_index(old_child)
            .expect("old child must be present in parent");
        self.keys.insert(idx + 1, key);
        self.children.insert(idx + 1, new_child);
    }

    /// Initialize a fresh root after a split rose through the old root.
    pub fn populate_new_root(&mut self, left: PageId, key: K, right: PageId) {
        debug_assert!(!self.is_leaf());
        self.keys = vec![dummy_key::<K>(), key];
        self.children = vec![left, right];
    }

    /// Remove the slot at `index` from an internal node.
    pub fn remove_at(&mut self, index: usize) {
        debug_assert!(!self.is_leaf());
        self.keys.remove(index);
        self.children.remove(index);
    }

    /// Serialize into a page buffer.
    pub fn encode(&self, page: &mut Page) {
        let data = &mut page.data;
        data[0] = match self.kind {
            NodeKind::Leaf => KIND_LEAF,
            NodeKind::Internal => KIND_INTERNAL,
        };
        LittleEndian::write_u32(&mut data[1..5], self.lsn);
        LittleEndian::write_u32(&mut data[5..9], self.size());
        LittleEndian::write_u32(&mut data[9..13], self.max_size);
        LittleEndian::write_u32(&mut data[13..17], self.parent_page_id);
        LittleEndian::write_u32(&mut data[17..21], self.page_id);

        match self.kind {
            NodeKind::Leaf => {
                debug_assert!(self.size() <= leaf_capacity::<K>());
                LittleEndian::write_u32(&mut data[21..25], self.next_page_id);
                let slot_size = K::ENCODED_LEN + RID_SIZE;
                for (i, (key, rid)) in self.keys.iter().zip(self.rids.iter()).enumerate() {
                    let base = LEAF_HEADER_SIZE + i * slot_size;
                    key.encode(&mut data[base..base + K::ENCODED_LEN]);
                    let vbase = base + K::ENCODED_LEN;
                    LittleEndian::write_u32(&mut data[vbase..vbase + 4], rid.page_id);
                    LittleEndian::write_u32(&mut data[vbase + 4..vbase + 8], rid.slot);
                }
            }
            NodeKind::Internal => {
                debug_assert!(self.size() <= internal_capacity::<K>());
                let slot_size = K::ENCODED_LEN + CHILD_SIZE;
                for (i, (key, child)) in self.keys.iter().zip(self.children.iter()).enumerate() {
                    let base = INTERNAL_HEADER_SIZE + i * slot_size;
                    key.encode(&mut data[base..base + K::ENCODED_LEN]);
                    let vbase = base + K::ENCODED_LEN;
                    LittleEndian::write_u32(&mut data[vbase..vbase + 4], *child);
                }
            }
        }
    }

    /// Deserialize from a page buffer.
    pub fn decode(page: &Page) -> Result<Self, BTreeError> {
        let data = &page.data;
        let kind = match data[0] {
            KIND_LEAF => NodeKind::Leaf,
            KIND_INTERNAL => NodeKind::Internal,
            other => {
                return Err(BTreeError::Corrupted(
                    page.page_id,
                    format!("unknown node kind byte {other}"),
                ))
            }
        };

        let lsn = LittleEndian::read_u32(&data[1..5]);
        let size = LittleEndian::read_u32(&data[5..9]) as usize;
        let max_size = LittleEndian::read_u32(&data[9..13]);
        let parent_page_id = LittleEndian::read_u32(&data[13..17]);
        let page_id = LittleEndian::read_u32(&data[17..21]);

        let mut node = Self {
            kind,
            lsn,
            max_size,
            parent_page_id,
            page_id,
            next_page_id: INVALID_PAGE_ID,
            keys: Vec::with_capacity(size),
            rids: Vec::new(),
            children: Vec::new(),
        };

        match kind {
            NodeKind::Leaf => {
                if size > leaf_capacity::<K>() as usize {
                    return Err(BTreeError::Corrupted(
                        page.page_id,
                        format!("leaf size {size} exceeds capacity"),
                    ));
                }
                node.next_page_id = LittleEndian::read_u32(&data[21..25]);
                let slot_size = K::ENCODED_LEN + RID_SIZE;
                node.rids.reserve(size);
                for i in 0..size {
                    let base = LEAF_HEADER_SIZE + i * slot_size;
                    node.keys.push(K::decode(&data[base..base + K::ENCODED_LEN]));
                    let vbase = base + K::ENCODED_LEN;
                    node.rids.push(Rid::new(
                        LittleEndian::read_u32(&data[vbase..vbase + 4]),
                        LittleEndian::read_u32(&data[vbase + 4..vbase + 8]),
                    ));
                }
            }
            NodeKind::Internal => {
                if size > internal_capacity::<K>() as usize {
                    return Err(BTreeError::Corrupted(
                        page.page_id,
                        format!("internal size {size} exceeds capacity"),
                    ));
                }
                let slot_size = K::ENCODED_LEN + CHILD_SIZE;
                node.children.reserve(size);
                for i in 0..size {
                    let base = INTERNAL_HEADER_SIZE + i * slot_size;
                    node.keys.push(K::decode(&data[base..base + K::ENCODED_LEN]));
                    let vbase = base + K::ENCODED_LEN;
                    node.children.push(LittleEndian::read_u32(&data[vbase..vbase + 4]));
                }
            }
        }

        Ok(node)
    }
}
