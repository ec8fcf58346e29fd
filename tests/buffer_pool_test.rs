use anyhow::Result;
use sirindb::common::types::PAGE_SIZE;
use sirindb::storage::buffer::BufferPoolError;

mod common;
use common::create_test_buffer_pool;

#[test]
fn test_create_and_write_pages() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, pid) = buffer_pool.new_page()?;
    {
        let mut guard = page.write();
        guard.data[0] = 1;
        guard.data[PAGE_SIZE - 1] = 2;
    }
    buffer_pool.unpin_page(pid, true)?;

    let fetched = buffer_pool.fetch_page(pid)?;
    {
        let guard = fetched.read();
        assert_eq!(guard.data[0], 1);
        assert_eq!(guard.data[PAGE_SIZE - 1], 2);
    }
    buffer_pool.unpin_page(pid, false)?;
    Ok(())
}

#[test]
fn test_lru_eviction_order() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    // Fill the pool with three pages, then unpin in order 1, 2, 3.
    let mut pids = Vec::new();
    for _ in 0..3 {
        let (_, pid) = buffer_pool.new_page()?;
        pids.push(pid);
    }
    for &pid in &pids {
        buffer_pool.unpin_page(pid, true)?;
    }

    // Touch the first page again so it becomes most recently used.
    buffer_pool.fetch_page(pids[0])?;
    buffer_pool.unpin_page(pids[0], false)?;

    // A fourth page must evict the least recently used: pids[1].
    let (_, pid4) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(pid4, true)?;

    // pids[0] and pids[2] stay resident, so fetching them is cheap and
    // re-fetching the evicted page re-reads it from disk intact.
    let page = buffer_pool.fetch_page(pids[1])?;
    assert_eq!(page.read().page_id, pids[1]);
    buffer_pool.unpin_page(pids[1], false)?;
    Ok(())
}

#[test]
fn test_dirty_page_writeback_on_eviction() -> Result<()> {
    // One frame: every new page forces a writeback of the previous one.
    let (buffer_pool, _temp_file) = create_test_buffer_pool(1)?;

    let (page_a, pid_a) = buffer_pool.new_page()?;
    {
        let mut guard = page_a.write();
        guard.data[123] = 0xBE;
    }
    buffer_pool.unpin_page(pid_a, true)?;

    let (_, pid_b) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(pid_b, false)?;

    let again = buffer_pool.fetch_page(pid_a)?;
    assert_eq!(again.read().data[123], 0xBE);
    buffer_pool.unpin_page(pid_a, false)?;
    Ok(())
}

#[test]
fn test_all_pinned_is_an_error() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(2)?;

    let (_, pid_a) = buffer_pool.new_page()?;
    let (_, pid_b) = buffer_pool.new_page()?;

    assert!(matches!(
        buffer_pool.new_page(),
        Err(BufferPoolError::PoolExhausted)
    ));
    assert!(matches!(
        buffer_pool.fetch_page(999),
        Err(BufferPoolError::PoolExhausted)
    ));

    buffer_pool.unpin_page(pid_a, false)?;
    buffer_pool.unpin_page(pid_b, false)?;
    Ok(())
}

#[test]
fn test_pin_count_tracks_fetches() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(1)?;

    let (_, pid) = buffer_pool.new_page()?;
    buffer_pool.fetch_page(pid)?;

    // Two pins: one unpin is not enough to evict.
    buffer_pool.unpin_page(pid, false)?;
    assert!(buffer_pool.new_page().is_err());

    buffer_pool.unpin_page(pid, false)?;
    let (_, pid2) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(pid2, false)?;
    Ok(())
}

#[test]
fn test_flush_and_reopen() -> Result<()> {
    let (temp_file, path) = common::create_temp_db_file()?;

    let pid = {
        let disk = std::sync::Arc::new(sirindb::storage::disk::DiskManager::new(&path)?);
        let pool = sirindb::storage::buffer::BufferPoolManager::new(4, disk);
        let (page, pid) = pool.new_page()?;
        page.write().data[7] = 42;
        pool.unpin_page(pid, true)?;
        pool.flush_all()?;
        pid
    };

    // A fresh pool over the same file sees the flushed bytes.
    let disk = std::sync::Arc::new(sirindb::storage::disk::DiskManager::new(&path)?);
    let pool = sirindb::storage::buffer::BufferPoolManager::new(4, disk);
    let page = pool.fetch_page(pid)?;
    assert_eq!(page.read().data[7], 42);
    pool.unpin_page(pid, false)?;

    drop(temp_file);
    Ok(())
}
