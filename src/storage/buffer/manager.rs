use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};
use log::debug;

use crate::common::types::{Page, PageId, PagePtr, FrameId, INVALID_PAGE_ID};
use crate::storage::disk::DiskManager;
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;

/// A buffer pool frame. The `page` Arc is the frame's permanent buffer;
/// the page living inside it changes over the frame's lifetime.
struct Frame {
    page: PagePtr,
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl Frame {
    fn new() -> Self {
        Self {
            page: Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))),
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

/// All pool metadata lives behind one mutex; page contents are guarded by
/// the per-page latches instead.
struct PoolInner {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruReplacer,
}

/// Buffer pool manager: maps page ids onto a fixed set of frames, pinning
/// pages for callers and evicting unpinned pages through the LRU replacer.
pub struct BufferPoolManager {
    pool_size: usize,
    disk_manager: Arc<DiskManager>,
    inner: Mutex<PoolInner>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            frames.push(Frame::new());
            free_list.push_back(i as FrameId);
        }

        Self {
            pool_size,
            disk_manager,
            inner: Mutex::new(PoolInner {
                frames,
                page_table: HashMap::new(),
                free_list,
                replacer: LruReplacer::new(pool_size),
            }),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Fetch a page, pinning it. The caller must pair this with `unpin_page`.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot fetch the invalid page id".to_string(),
            ));
        }

        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &mut inner.frames[frame_id as usize];
            frame.pin_count += 1;
            let ptr = frame.page.clone();
            inner.replacer.pin(frame_id);
            return Ok(ptr);
        }

        let frame_id = self.take_victim_frame(&mut inner)?;

        // Read the page in while holding the pool mutex; the frame is not
        // yet visible through the page table so no latch conflict is possible.
        {
            let frame = &inner.frames[frame_id as usize];
            let mut page_guard = frame.page.write();
            self.disk_manager.read_page(page_id, &mut page_guard)?;
        }

        let frame = &mut inner.frames[frame_id as usize];
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        let ptr = frame.page.clone();
        inner.page_table.insert(page_id, frame_id);

        Ok(ptr)
    }

    /// Allocate a fresh page on disk and pin it into a frame.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = self.take_victim_frame(&mut inner)?;
        let page_id = self.disk_manager.allocate_page()?;

        {
            let frame = &inner.frames[frame_id as usize];
            let mut page_guard = frame.page.write();
            page_guard.reset_memory();
            page_guard.page_id = page_id;
            page_guard.lsn = 0;
        }

        let frame = &mut inner.frames[frame_id as usize];
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = true;
        let ptr = frame.page.clone();
        inner.page_table.insert(page_id, frame_id);

        Ok((ptr, page_id))
    }

    /// Drop one pin on a page, ORing in the dirty bit. When the pin count
    /// reaches zero the frame becomes a victim candidate.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = *inner
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let frame = &mut inner.frames[frame_id as usize];
        if frame.pin_count == 0 {
            return Err(BufferPoolError::InvalidOperation(format!(
                "unpin of page {} with zero pin count",
                page_id
            )));
        }

        frame.pin_count -= 1;
        if is_dirty {
            frame.is_dirty = true;
        }

        if frame.pin_count == 0 {
            inner.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a resident page back to disk and clear its dirty bit.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = *inner
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let frame = &mut inner.frames[frame_id as usize];
        {
            let page_guard = frame.page.read();
            self.disk_manager.write_page(&page_guard)?;
        }
        frame.is_dirty = false;

        Ok(())
    }

    /// Flush every resident page.
    pub fn flush_all(&self) -> Result<(), BufferPoolError> {
        let page_ids: Vec<PageId> = {
            let inner = self.inner.lock();
            inner.page_table.keys().copied().collect()
        };

        for page_id in page_ids {
            self.flush_page(page_id)?;
        }

        Ok(())
    }

    /// Delete a page from the pool and deallocate it on disk. Fails if the
    /// page is pinned; succeeds trivially if the page is not resident.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => {
                self.disk_manager.deallocate_page(page_id)?;
                return Ok(());
            }
        };

        if inner.frames[frame_id as usize].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        inner.page_table.remove(&page_id);
        inner.replacer.pin(frame_id);

        let frame = &mut inner.frames[frame_id as usize];
        {
            let mut page_guard = frame.page.write();
            page_guard.reset_memory();
            page_guard.page_id = INVALID_PAGE_ID;
        }
        frame.page_id = INVALID_PAGE_ID;
        frame.pin_count = 0;
        frame.is_dirty = false;

        inner.free_list.push_back(frame_id);
        self.disk_manager.deallocate_page(page_id)?;

        Ok(())
    }

    /// Find a frame for a new binding: free list first, then LRU victim.
    /// Writes back the victim's page if dirty and unmaps it.
    fn take_victim_frame(&self, inner: &mut PoolInner) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = inner.replacer.victim().ok_or(BufferPoolError::PoolExhausted)?;

        let (old_page_id, dirty) = {
            let frame = &inner.frames[frame_id as usize];
            (frame.page_id, frame.is_dirty)
        };

        if dirty {
            debug!("evicting dirty page {}, writing back", old_page_id);
            let frame = &inner.frames[frame_id as usize];
            let page_guard = frame.page.read();
            self.disk_manager.write_page(&page_guard)?;
        }

        if old_page_id != INVALID_PAGE_ID {
            inner.page_table.remove(&old_page_id);
        }

        Ok(frame_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn make_pool(pool_size: usize) -> (Arc<BufferPoolManager>, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let disk = Arc::new(DiskManager::new(file.path()).unwrap());
        (Arc::new(BufferPoolManager::new(pool_size, disk)), file)
    }

    #[test]
    fn test_new_page_and_fetch() {
        let (pool, _file) = make_pool(4);

        let (page, pid) = pool.new_page().unwrap();
        {
            let mut guard = page.write();
            guard.data[0] = 42;
        }
        pool.unpin_page(pid, true).unwrap();

        let fetched = pool.fetch_page(pid).unwrap();
        assert_eq!(fetched.read().data[0], 42);
        pool.unpin_page(pid, false).unwrap();
    }

    #[test]
    fn test_pool_exhaustion() {
        let (pool, _file) = make_pool(2);

        let (_p1, pid1) = pool.new_page().unwrap();
        let (_p2, pid2) = pool.new_page().unwrap();

        // All frames pinned: no third page.
        assert!(matches!(pool.new_page(), Err(BufferPoolError::PoolExhausted)));

        pool.unpin_page(pid1, false).unwrap();
        let (_p3, _pid3) = pool.new_page().unwrap();
        assert!(matches!(pool.new_page(), Err(BufferPoolError::PoolExhausted)));

        pool.unpin_page(pid2, false).unwrap();
    }

    #[test]
    fn test_dirty_eviction_roundtrip() {
        let (pool, _file) = make_pool(1);

        let (page, pid_a) = pool.new_page().unwrap();
        {
            let mut guard = page.write();
            guard.data[100] = 0x5A;
        }
        pool.unpin_page(pid_a, true).unwrap();

        // Forces writeback of pid_a before the frame is rebound.
        let (_page_b, pid_b) = pool.new_page().unwrap();
        pool.unpin_page(pid_b, false).unwrap();

        let fetched = pool.fetch_page(pid_a).unwrap();
        assert_eq!(fetched.read().data[100], 0x5A);
        pool.unpin_page(pid_a, false).unwrap();
    }

    #[test]
    fn test_delete_page() {
        let (pool, _file) = make_pool(2);

        let (_page, pid) = pool.new_page().unwrap();
        assert!(matches!(
            pool.delete_page(pid),
            Err(BufferPoolError::PagePinned(_))
        ));

        pool.unpin_page(pid, false).unwrap();
        pool.delete_page(pid).unwrap();

        // Deleting a non-resident page succeeds.
        pool.delete_page(pid).unwrap();
    }

    #[test]
    fn test_unpin_twice_fails() {
        let (pool, _file) = make_pool(2);
        let (_page, pid) = pool.new_page().unwrap();
        pool.unpin_page(pid, false).unwrap();
        assert!(pool.unpin_page(pid, false).is_err());
    }
}
