use std::collections::HashSet;
use std::sync::Arc;
use parking_lot::{RwLock, RwLockWriteGuard};
use log::debug;

use crate::common::types::{
    PageId, PageReadGuard, PageWriteGuard, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID,
};
use crate::index::btree::error::BTreeError;
use crate::index::btree::header::HeaderPage;
use crate::index::btree::iterator::BTreeIterator;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::{dummy_key, internal_capacity, leaf_capacity, BTreeNode};
use crate::storage::buffer::BufferPoolManager;

/// Per-operation journal of held page latches and pages scheduled for
/// physical deletion. Released in one sweep when the operation completes.
struct LatchContext {
    path: Vec<(PageId, PageWriteGuard)>,
    deleted: HashSet<PageId>,
}

impl LatchContext {
    fn new() -> Self {
        Self {
            path: Vec::new(),
            deleted: HashSet::new(),
        }
    }

    fn push(&mut self, page_id: PageId, guard: PageWriteGuard) {
        self.path.push((page_id, guard));
    }

    fn contains(&self, page_id: PageId) -> bool {
        self.path.iter().any(|(pid, _)| *pid == page_id)
    }

    fn guard_mut(&mut self, page_id: PageId) -> &mut PageWriteGuard {
        self.path
            .iter_mut()
            .find(|(pid, _)| *pid == page_id)
            .map(|(_, guard)| guard)
            .expect("page must be latched on the current path")
    }

    /// Unlatch and unpin everything currently held; the crab moves down.
    fn release_ancestors(&mut self, buffer_pool: &BufferPoolManager) -> Result<(), BTreeError> {
        for (page_id, guard) in self.path.drain(..) {
            drop(guard);
            buffer_pool.unpin_page(page_id, true)?;
        }
        Ok(())
    }

    /// Unlatch, unpin, and physically delete the pages marked for deletion.
    /// A page kept pinned elsewhere (an iterator mid-hop) skips deletion
    /// and is merely orphaned.
    fn release_all(self, buffer_pool: &BufferPoolManager) -> Result<(), BTreeError> {
        for (page_id, guard) in self.path {
            drop(guard);
            buffer_pool.unpin_page(page_id, true)?;
            if self.deleted.contains(&page_id) {
                let _ = buffer_pool.delete_page(page_id);
            }
        }
        Ok(())
    }
}

/// Which write operation a descent is crabbing for
#[derive(Clone, Copy, PartialEq, Eq)]
enum WriteOp {
    Insert,
    Remove,
}

/// A disk-resident B+ tree mapping fixed-width keys to record ids.
///
/// Concurrent structure modification uses latch crabbing: the dedicated
/// root latch and every page latch on the descent are held until the child
/// proves safe for the pending operation, at which point all ancestors are
/// released. Only unique keys are supported.
pub struct BPlusTree<K: IndexKey> {
    index_name: String,
    buffer_pool: Arc<BufferPoolManager>,
    /// Root identity can change, so it has its own latch, distinct from any
    /// page latch and always acquired first.
    root_page_id: RwLock<PageId>,
    leaf_max_size: u32,
    internal_max_size: u32,
    _marker: std::marker::PhantomData<fn() -> K>,
}

impl<K: IndexKey> BPlusTree<K> {
    /// Open (or register) the named index, with explicit node fan-outs.
    pub fn new(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self, BTreeError> {
        assert!(leaf_max_size >= 3 && leaf_max_size <= leaf_capacity::<K>());
        assert!(internal_max_size >= 3 && internal_max_size <= internal_capacity::<K>());

        let index_name = index_name.into();
        let header = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let (root, registered) = {
            let guard = header.read();
            match HeaderPage::get_root(&guard, &index_name) {
                Some(root) => (root, true),
                None => (INVALID_PAGE_ID, false),
            }
        };
        if !registered {
            let mut guard = header.write();
            HeaderPage::insert_record(&mut guard, &index_name, INVALID_PAGE_ID)?;
        }
        buffer_pool.unpin_page(HEADER_PAGE_ID, !registered)?;

        Ok(Self {
            index_name,
            buffer_pool,
            root_page_id: RwLock::new(root),
            leaf_max_size,
            internal_max_size,
            _marker: std::marker::PhantomData,
        })
    }

    /// Open the named index with fan-outs derived from the key width.
    pub fn with_default_sizes(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
    ) -> Result<Self, BTreeError> {
        let leaf_max = leaf_capacity::<K>();
        let internal_max = internal_capacity::<K>();
        Self::new(index_name, buffer_pool, leaf_max, internal_max)
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.read() == INVALID_PAGE_ID
    }

    pub fn name(&self) -> &str {
        &self.index_name
    }

    /// Point lookup. Readers crab with shared latches: the parent latch is
    /// dropped as soon as the child is latched.
    pub fn get(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let (leaf_pid, guard) = match self.find_leaf_shared(Some(key))? {
            Some(found) => found,
            None => return Ok(None),
        };
        let node = BTreeNode::<K>::decode(&guard)?;
        let result = node.lookup_leaf(key);
        drop(guard);
        self.buffer_pool.unpin_page(leaf_pid, false)?;
        Ok(result)
    }

    /// Insert a unique key. Returns false when the key already exists.
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        let mut root_latch = self.root_page_id.write();

        if *root_latch == INVALID_PAGE_ID {
            self.start_new_tree(&mut root_latch, key, rid)?;
            return Ok(true);
        }

        let mut root_guard = Some(root_latch);
        let mut ctx = LatchContext::new();
        let leaf_pid =
            self.find_leaf_exclusive(&mut ctx, &mut root_guard, &key, WriteOp::Insert)?;

        let mut leaf = BTreeNode::<K>::decode(ctx.guard_mut(leaf_pid))?;
        if leaf.lookup_leaf(&key).is_some() {
            ctx.release_all(&self.buffer_pool)?;
            return Ok(false);
        }

        leaf.insert_into_leaf(key, rid);
        if leaf.size() == leaf.max_size {
            let (separator, sibling_pid) = self.split_leaf(&mut ctx, &mut leaf)?;
            let parent_pid = leaf.parent_page_id;
            leaf.encode(ctx.guard_mut(leaf_pid));
            self.insert_into_parent(&mut ctx, &mut root_guard, leaf_pid, parent_pid, separator, sibling_pid)?;
        } else {
            leaf.encode(ctx.guard_mut(leaf_pid));
        }

        ctx.release_all(&self.buffer_pool)?;
        Ok(true)
    }

    /// Remove a key; absent keys are ignored.
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        let root_latch = self.root_page_id.write();

        if *root_latch == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut root_guard = Some(root_latch);
        let mut ctx = LatchContext::new();
        let leaf_pid =
            self.find_leaf_exclusive(&mut ctx, &mut root_guard, key, WriteOp::Remove)?;

        let mut leaf = BTreeNode::<K>::decode(ctx.guard_mut(leaf_pid))?;
        if !leaf.remove_from_leaf(key) {
            ctx.release_all(&self.buffer_pool)?;
            return Ok(());
        }
        leaf.encode(ctx.guard_mut(leaf_pid));

        self.handle_underflow(&mut ctx, &mut root_guard, leaf_pid)?;
        ctx.release_all(&self.buffer_pool)?;
        Ok(())
    }

    /// Iterator positioned at the smallest key.
    pub fn iter(&self) -> Result<BTreeIterator<K>, BTreeError> {
        match self.find_leaf_shared(None)? {
            Some((leaf_pid, guard)) => {
                drop(guard);
                self.buffer_pool.unpin_page(leaf_pid, false)?;
                Ok(BTreeIterator::new(self.buffer_pool.clone(), leaf_pid, 0))
            }
            None => Ok(BTreeIterator::end(self.buffer_pool.clone())),
        }
    }

    /// Iterator positioned at the first key >= `key`.
    pub fn iter_from(&self, key: &K) -> Result<BTreeIterator<K>, BTreeError> {
        match self.find_leaf_shared(Some(key))? {
            Some((leaf_pid, guard)) => {
                let node = BTreeNode::<K>::decode(&guard)?;
                let index = node.key_index(key);
                drop(guard);
                self.buffer_pool.unpin_page(leaf_pid, false)?;
                Ok(BTreeIterator::new(self.buffer_pool.clone(), leaf_pid, index))
            }
            None => Ok(BTreeIterator::end(self.buffer_pool.clone())),
        }
    }

    /// Shared-latch descent to the leaf for `key` (or the leftmost leaf
    /// when no key is given). Returns the still-latched, pinned leaf.
    fn find_leaf_shared(
        &self,
        key: Option<&K>,
    ) -> Result<Option<(PageId, PageReadGuard)>, BTreeError> {
        let root_latch = self.root_page_id.read();
        let root_pid = *root_latch;
        if root_pid == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut root_latch = Some(root_latch);
        let mut pid = root_pid;
        let page = self.buffer_pool.fetch_page(pid)?;
        let mut guard: PageReadGuard = page.read_arc();

        loop {
            let node = BTreeNode::<K>::decode(&guard)?;
            if node.is_leaf() {
                return Ok(Some((pid, guard)));
            }
            let child_pid = match key {
                Some(k) => node.child_lookup(k),
                None => node.children[0],
            };

            let child_page = self.buffer_pool.fetch_page(child_pid)?;
            let child_guard = child_page.read_arc();

            // Child latched: readers are always safe, release the parent.
            drop(guard);
            self.buffer_pool.unpin_page(pid, false)?;
            root_latch.take();

            pid = child_pid;
            guard = child_guard;
        }
    }

    /// Exclusive-latch crabbing descent. Every latched page goes into the
    /// context; ancestors (and the root latch) are dropped whenever the
    /// newly latched child is safe for `op`.
    fn find_leaf_exclusive(
        &self,
        ctx: &mut LatchContext,
        root_guard: &mut Option<RwLockWriteGuard<'_, PageId>>,
        key: &K,
        op: WriteOp,
    ) -> Result<PageId, BTreeError> {
        let mut pid = **root_guard.as_ref().expect("root latch held for write descent");
        let page = self.buffer_pool.fetch_page(pid)?;
        ctx.push(pid, page.write_arc());

        loop {
            let node = BTreeNode::<K>::decode(ctx.guard_mut(pid))?;
            if node.is_leaf() {
                return Ok(pid);
            }

            let child_pid = node.child_lookup(key);
            let child_page = self.buffer_pool.fetch_page(child_pid)?;
            let child_guard = child_page.write_arc();

            let child_node = BTreeNode::<K>::decode(&child_guard)?;
            let safe = match op {
                WriteOp::Insert => child_node.is_safe_for_insert(),
                WriteOp::Remove => child_node.is_safe_for_remove(),
            };
            if safe {
                ctx.release_ancestors(&self.buffer_pool)?;
                *root_guard = None;
            }

            ctx.push(child_pid, child_guard);
            pid = child_pid;
        }
    }

    fn start_new_tree(
        &self,
        root_guard: &mut RwLockWriteGuard<'_, PageId>,
        key: K,
        rid: Rid,
    ) -> Result<(), BTreeError> {
        let (page, page_id) = self.buffer_pool.new_page()?;

        let mut root = BTreeNode::<K>::new_leaf(page_id, INVALID_PAGE_ID, self.leaf_max_size);
        root.insert_into_leaf(key, rid);
        {
            let mut guard = page.write();
            root.encode(&mut guard);
        }
        self.buffer_pool.unpin_page(page_id, true)?;

        **root_guard = page_id;
        self.update_root_record(page_id)?;
        Ok(())
    }

    /// Split a full leaf: upper half moves to a fresh sibling, which is
    /// spliced into the leaf chain. Returns the separator key and the
    /// sibling's page id; the sibling joins the latch context.
    fn split_leaf(
        &self,
        ctx: &mut LatchContext,
        leaf: &mut BTreeNode<K>,
    ) -> Result<(K, PageId), BTreeError> {
        let (page, sibling_pid) = self.buffer_pool.new_page()?;
        ctx.push(sibling_pid, page.write_arc());

        let mut sibling =
            BTreeNode::<K>::new_leaf(sibling_pid, leaf.parent_page_id, self.leaf_max_size);

        let total = leaf.keys.len();
        let keep = total / 2;
        sibling.keys = leaf.keys.split_off(keep);
        sibling.rids = leaf.rids.split_off(keep);
        sibling.next_page_id = leaf.next_page_id;
        leaf.next_page_id = sibling_pid;

        let separator = sibling.keys[0];
        sibling.encode(ctx.guard_mut(sibling_pid));
        debug!("split leaf {} -> sibling {}", leaf.page_id, sibling_pid);
        Ok((separator, sibling_pid))
    }

    /// Hook the new right-hand node into the parent, cascading splits
    /// upward and growing a new root when the split rose through the root.
    fn insert_into_parent(
        &self,
        ctx: &mut LatchContext,
        root_guard: &mut Option<RwLockWriteGuard<'_, PageId>>,
        old_pid: PageId,
        parent_pid: PageId,
        key: K,
        new_pid: PageId,
    ) -> Result<(), BTreeError> {
        if parent_pid == INVALID_PAGE_ID {
            // The split rose through the root: grow the tree by one level.
            let (page, new_root_pid) = self.buffer_pool.new_page()?;
            ctx.push(new_root_pid, page.write_arc());

            let mut new_root =
                BTreeNode::<K>::new_internal(new_root_pid, INVALID_PAGE_ID, self.internal_max_size);
            new_root.populate_new_root(old_pid, key, new_pid);
            new_root.encode(ctx.guard_mut(new_root_pid));

            self.set_parent_pointer(ctx, old_pid, new_root_pid)?;
            self.set_parent_pointer(ctx, new_pid, new_root_pid)?;

            let root_latch = root_guard
                .as_mut()
                .expect("root latch held while growing a new root");
            **root_latch = new_root_pid;
            self.update_root_record(new_root_pid)?;
            debug!("tree grew a new root {}", new_root_pid);
            return Ok(());
        }

        let mut parent = BTreeNode::<K>::decode(ctx.guard_mut(parent_pid))?;
        parent.insert_node_after(old_pid, key, new_pid);
        self.set_parent_pointer(ctx, new_pid, parent_pid)?;

        if parent.size() <= self.internal_max_size {
            parent.encode(ctx.guard_mut(parent_pid));
            return Ok(());
        }

        // Parent overflowed: split it and push the middle key further up.
        let (page, sibling_pid) = self.buffer_pool.new_page()?;
        ctx.push(sibling_pid, page.write_arc());

        let mut sibling =
            BTreeNode::<K>::new_internal(sibling_pid, parent.parent_page_id, self.internal_max_size);

        let total = parent.children.len();
        let keep = total / 2;
        sibling.keys = parent.keys.split_off(keep);
        sibling.children = parent.children.split_off(keep);

        let push_up = sibling.keys[0];
        for child in sibling.children.clone() {
            self.set_parent_pointer(ctx, child, sibling_pid)?;
        }

        let grandparent_pid = parent.parent_page_id;
        parent.encode(ctx.guard_mut(parent_pid));
        sibling.encode(ctx.guard_mut(sibling_pid));

        self.insert_into_parent(ctx, root_guard, parent_pid, grandparent_pid, push_up, sibling_pid)
    }

    /// Handle a node that may have underflowed after a deletion.
    fn handle_underflow(
        &self,
        ctx: &mut LatchContext,
        root_guard: &mut Option<RwLockWriteGuard<'_, PageId>>,
        pid: PageId,
    ) -> Result<(), BTreeError> {
        let node = BTreeNode::<K>::decode(ctx.guard_mut(pid))?;

        if node.is_root() {
            return self.adjust_root(ctx, root_guard, &node);
        }
        if node.size() >= node.min_size() {
            return Ok(());
        }
        self.coalesce_or_redistribute(ctx, root_guard, pid)
    }

    /// Shrink the tree at the top: an empty leaf root empties the tree, an
    /// internal root with a single child hands the root to that child.
    fn adjust_root(
        &self,
        ctx: &mut LatchContext,
        root_guard: &mut Option<RwLockWriteGuard<'_, PageId>>,
        root: &BTreeNode<K>,
    ) -> Result<(), BTreeError> {
        if root.is_leaf() {
            if root.size() == 0 {
                let root_latch = root_guard
                    .as_mut()
                    .expect("root latch held while emptying the tree");
                **root_latch = INVALID_PAGE_ID;
                self.update_root_record(INVALID_PAGE_ID)?;
                ctx.deleted.insert(root.page_id);
            }
            return Ok(());
        }

        if root.size() == 1 {
            let new_root_pid = root.children[0];
            self.set_parent_pointer(ctx, new_root_pid, INVALID_PAGE_ID)?;

            let root_latch = root_guard
                .as_mut()
                .expect("root latch held while collapsing the root");
            **root_latch = new_root_pid;
            self.update_root_record(new_root_pid)?;
            ctx.deleted.insert(root.page_id);
            debug!("root collapsed into child {}", new_root_pid);
        }
        Ok(())
    }

    /// Fix an underflowed non-root node by merging with or borrowing from
    /// a sibling. The left sibling is preferred when one exists.
    fn coalesce_or_redistribute(
        &self,
        ctx: &mut LatchContext,
        root_guard: &mut Option<RwLockWriteGuard<'_, PageId>>,
        pid: PageId,
    ) -> Result<(), BTreeError> {
        let node = BTreeNode::<K>::decode(ctx.guard_mut(pid))?;
        let parent_pid = node.parent_page_id;
        let parent = BTreeNode::<K>::decode(ctx.guard_mut(parent_pid))?;

        let node_index = parent
            .value_index(pid)
            .expect("underflowed node must be a child of its parent");

        // Separator between the chosen pair sits at parent.keys[value_index].
        let (sibling_slot, value_index) = if node_index == 0 {
            (1usize, 1usize)
        } else {
            (node_index - 1, node_index)
        };
        let sibling_pid = parent.children[sibling_slot];

        let sibling_page = self.buffer_pool.fetch_page(sibling_pid)?;
        ctx.push(sibling_pid, sibling_page.write_arc());
        let sibling = BTreeNode::<K>::decode(ctx.guard_mut(sibling_pid))?;

        let total = sibling.size() + node.size();
        let fits = if node.is_leaf() {
            total < self.leaf_max_size
        } else {
            total <= self.internal_max_size
        };

        if fits {
            self.coalesce(ctx, root_guard, pid, sibling_pid, parent_pid, node_index, value_index)
        } else {
            self.redistribute(ctx, pid, sibling_pid, parent_pid, node_index, value_index)
        }
    }

    /// Merge the right-hand member of the (node, sibling) pair into the
    /// left-hand member, then drop the separator from the parent.
    #[allow(clippy::too_many_arguments)]
    fn coalesce(
        &self,
        ctx: &mut LatchContext,
        root_guard: &mut Option<RwLockWriteGuard<'_, PageId>>,
        pid: PageId,
        sibling_pid: PageId,
        parent_pid: PageId,
        node_index: usize,
        value_index: usize,
    ) -> Result<(), BTreeError> {
        let (left_pid, right_pid) = if node_index == 0 {
            (pid, sibling_pid)
        } else {
            (sibling_pid, pid)
        };

        let parent = BTreeNode::<K>::decode(ctx.guard_mut(parent_pid))?;
        let middle_key = parent.keys[value_index];

        let mut left = BTreeNode::<K>::decode(ctx.guard_mut(left_pid))?;
        let mut right = BTreeNode::<K>::decode(ctx.guard_mut(right_pid))?;

        if left.is_leaf() {
            left.keys.append(&mut right.keys);
            left.rids.append(&mut right.rids);
            left.next_page_id = right.next_page_id;
        } else {
            // The separator comes down to head the moved run of children.
            right.keys[0] = middle_key;
            let moved = right.children.clone();
            left.keys.append(&mut right.keys);
            left.children.append(&mut right.children);
            for child in moved {
                self.set_parent_pointer(ctx, child, left_pid)?;
            }
        }

        left.encode(ctx.guard_mut(left_pid));
        ctx.deleted.insert(right_pid);
        debug!("coalesced node {} into {}", right_pid, left_pid);

        // Drop the separator; the parent may underflow in turn.
        let mut parent = BTreeNode::<K>::decode(ctx.guard_mut(parent_pid))?;
        parent.remove_at(value_index);
        parent.encode(ctx.guard_mut(parent_pid));
        self.handle_underflow(ctx, root_guard, parent_pid)
    }

    /// Move a single entry between siblings and refresh the separator key.
    #[allow(clippy::too_many_arguments)]
    fn redistribute(
        &self,
        ctx: &mut LatchContext,
        pid: PageId,
        sibling_pid: PageId,
        parent_pid: PageId,
        node_index: usize,
        value_index: usize,
    ) -> Result<(), BTreeError> {
        let mut node = BTreeNode::<K>::decode(ctx.guard_mut(pid))?;
        let mut sibling = BTreeNode::<K>::decode(ctx.guard_mut(sibling_pid))?;
        let mut parent = BTreeNode::<K>::decode(ctx.guard_mut(parent_pid))?;

        if node_index > 0 {
            // Sibling is to the left: its last entry becomes node's first.
            if node.is_leaf() {
                let key = sibling.keys.pop().expect("left sibling cannot be empty");
                let rid = sibling.rids.pop().expect("left sibling cannot be empty");
                node.keys.insert(0, key);
                node.rids.insert(0, rid);
                parent.keys[value_index] = node.keys[0];
            } else {
                let moved_child = sibling.children.pop().expect("left sibling cannot be empty");
                let moved_key = sibling.keys.pop().expect("left sibling cannot be empty");
                node.keys[0] = parent.keys[value_index];
                node.keys.insert(0, dummy_key::<K>());
                node.children.insert(0, moved_child);
                parent.keys[value_index] = moved_key;
                self.set_parent_pointer(ctx, moved_child, pid)?;
            }
        } else {
            // Sibling is to the right: its first entry becomes node's last.
            if node.is_leaf() {
                let key = sibling.keys.remove(0);
                let rid = sibling.rids.remove(0);
                node.keys.push(key);
                node.rids.push(rid);
                parent.keys[value_index] = sibling.keys[0];
            } else {
                let moved_child = sibling.children.remove(0);
                sibling.keys.remove(0);
                node.keys.push(parent.keys[value_index]);
                node.children.push(moved_child);
                parent.keys[value_index] = sibling.keys[0];
                sibling.keys[0] = dummy_key::<K>();
                self.set_parent_pointer(ctx, moved_child, pid)?;
            }
        }

        node.encode(ctx.guard_mut(pid));
        sibling.encode(ctx.guard_mut(sibling_pid));
        parent.encode(ctx.guard_mut(parent_pid));
        Ok(())
    }

    /// Rewrite a child's parent pointer, going through the latch context
    /// when we already hold the child's latch.
    fn set_parent_pointer(
        &self,
        ctx: &mut LatchContext,
        child_pid: PageId,
        parent_pid: PageId,
    ) -> Result<(), BTreeError> {
        if ctx.contains(child_pid) {
            let guard = ctx.guard_mut(child_pid);
            let mut node = BTreeNode::<K>::decode(guard)?;
            node.parent_page_id = parent_pid;
            node.encode(guard);
            return Ok(());
        }

        let page = self.buffer_pool.fetch_page(child_pid)?;
        {
            let mut guard = page.write();
            let mut node = BTreeNode::<K>::decode(&guard)?;
            node.parent_page_id = parent_pid;
            node.encode(&mut guard);
        }
        self.buffer_pool.unpin_page(child_pid, true)?;
        Ok(())
    }

    /// Persist a root change into the header page.
    fn update_root_record(&self, root: PageId) -> Result<(), BTreeError> {
        let header = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut guard = header.write();
            if !HeaderPage::update_record(&mut guard, &self.index_name, root) {
                HeaderPage::insert_record(&mut guard, &self.index_name, root)?;
            }
        }
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;
        Ok(())
    }
}
