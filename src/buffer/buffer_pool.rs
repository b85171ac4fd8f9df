use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};

use crate::buffer::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::config::BufferPoolConfig;
use crate::error::{CopseError, CopseResult};
use crate::storage::disk_manager::DiskManager;
use crate::utils::cache::lru_k::LruKReplacer;
use crate::utils::cache::Replacer;

// A frame in memory, holding one disk page while pinned.
#[derive(Debug)]
pub struct Page {
    pub page_id: PageId,
    data: [u8; PAGE_SIZE],
    pub pin_count: u32,
    pub is_dirty: bool,
}

impl Page {
    pub fn empty() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            data: [0; PAGE_SIZE],
            pin_count: 0,
            is_dirty: false,
        }
    }

    pub fn set_data(&mut self, data: &[u8]) {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        self.data.copy_from_slice(data);
        self.is_dirty = true;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_as_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data)
    }

    fn reset(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.data = [0; PAGE_SIZE];
        self.pin_count = 0;
        self.is_dirty = false;
    }
}

/// Page cache over the disk manager. Every `fetch_page`/`new_page` pins the
/// returned page; the caller must balance it with exactly one `unpin_page`.
#[derive(Debug)]
pub struct BufferPoolManager {
    pool: Vec<Arc<RwLock<Page>>>,
    page_table: Arc<DashMap<PageId, FrameId>>,
    free_list: Mutex<VecDeque<FrameId>>,
    replacer: Mutex<LruKReplacer>,
    pub disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn with_config(config: BufferPoolConfig, disk_manager: Arc<DiskManager>) -> Self {
        Self::new(config.buffer_pool_size, config.lru_k_k, disk_manager)
    }

    pub fn new(pool_size: usize, k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut pool = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for frame_id in 0..pool_size {
            pool.push(Arc::new(RwLock::new(Page::empty())));
            free_list.push_back(frame_id);
        }
        Self {
            pool,
            page_table: Arc::new(DashMap::new()),
            free_list: Mutex::new(free_list),
            replacer: Mutex::new(LruKReplacer::new(pool_size, k)),
            disk_manager,
        }
    }

    /// Allocates a fresh zeroed page, pinned.
    pub fn new_page(&self) -> CopseResult<Arc<RwLock<Page>>> {
        let frame_id = self.allocate_frame()?;
        let new_page_id = self.disk_manager.allocate_page();

        let page = self.pool[frame_id].clone();
        {
            let mut guard = page.write();
            guard.reset();
            guard.page_id = new_page_id;
            guard.pin_count = 1;
            guard.is_dirty = true;
        }
        self.page_table.insert(new_page_id, frame_id);

        {
            let mut replacer = self.replacer.lock();
            replacer.record_access(frame_id)?;
            replacer.set_evictable(frame_id, false)?;
        }

        debug!("allocated page {} in frame {}", new_page_id, frame_id);
        Ok(page)
    }

    /// Returns the requested page, pinned.
    pub fn fetch_page(&self, page_id: PageId) -> CopseResult<Arc<RwLock<Page>>> {
        if page_id == INVALID_PAGE_ID {
            return Err(CopseError::Internal(
                "cannot fetch the invalid page id".to_string(),
            ));
        }

        if let Some(entry) = self.page_table.get(&page_id) {
            let frame_id = *entry;
            drop(entry);

            let page = self.pool[frame_id].clone();
            page.write().pin_count += 1;
            let mut replacer = self.replacer.lock();
            replacer.record_access(frame_id)?;
            replacer.set_evictable(frame_id, false)?;
            return Ok(page);
        }

        let frame_id = self.allocate_frame()?;
        let data = self.disk_manager.read_page(page_id)?;

        let page = self.pool[frame_id].clone();
        {
            let mut guard = page.write();
            guard.page_id = page_id;
            guard.data.copy_from_slice(&data);
            guard.pin_count = 1;
            guard.is_dirty = false;
        }
        self.page_table.insert(page_id, frame_id);

        {
            let mut replacer = self.replacer.lock();
            replacer.record_access(frame_id)?;
            replacer.set_evictable(frame_id, false)?;
        }

        Ok(page)
    }

    /// Drops one pin. The page becomes evictable once its pin count reaches
    /// zero; `is_dirty` is sticky until the page is flushed.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> CopseResult<bool> {
        let Some(entry) = self.page_table.get(&page_id) else {
            warn!("unpin called on page {} not in the buffer pool", page_id);
            return Ok(false);
        };
        let frame_id = *entry;
        drop(entry);

        let page = self.pool[frame_id].clone();
        let mut guard = page.write();
        if guard.pin_count == 0 {
            warn!("unpin called on page {} with pin count 0", page_id);
            return Ok(false);
        }
        guard.pin_count -= 1;
        if is_dirty {
            guard.is_dirty = true;
        }
        let now_unpinned = guard.pin_count == 0;
        drop(guard);

        if now_unpinned {
            self.replacer.lock().set_evictable(frame_id, true)?;
        }
        Ok(true)
    }

    /// Drops an unpinned page from the pool and frees its frame. Fails on a
    /// pinned page.
    pub fn delete_page(&self, page_id: PageId) -> CopseResult<bool> {
        let Some((_, frame_id)) = self.page_table.remove(&page_id) else {
            return Ok(false);
        };

        let page = self.pool[frame_id].clone();
        {
            let mut guard = page.write();
            if guard.pin_count > 0 {
                self.page_table.insert(page_id, frame_id);
                return Err(CopseError::Internal(format!(
                    "cannot delete pinned page {} (pin count {})",
                    page_id, guard.pin_count
                )));
            }
            guard.reset();
        }

        self.replacer.lock().remove(frame_id);
        self.free_list.lock().push_back(frame_id);
        self.disk_manager.deallocate_page(page_id);
        debug!("deleted page {} from frame {}", page_id, frame_id);
        Ok(true)
    }

    pub fn flush_page(&self, page_id: PageId) -> CopseResult<bool> {
        let Some(entry) = self.page_table.get(&page_id) else {
            return Ok(false);
        };
        let frame_id = *entry;
        drop(entry);

        let page = self.pool[frame_id].clone();
        let mut guard = page.write();
        if !guard.is_dirty {
            return Ok(true);
        }
        let data = guard.data_as_bytes();
        guard.is_dirty = false;
        drop(guard);
        self.disk_manager.write_page(page_id, &data)?;
        Ok(true)
    }

    pub fn flush_all_pages(&self) -> CopseResult<()> {
        let page_ids: Vec<PageId> = self.page_table.iter().map(|entry| *entry.key()).collect();
        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Current pin count of a resident page, if any.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let frame_id = *self.page_table.get(&page_id)?;
        Some(self.pool[frame_id].read().pin_count)
    }

    /// Number of resident pages still holding at least one pin.
    pub fn pinned_page_count(&self) -> usize {
        self.page_table
            .iter()
            .filter(|entry| self.pool[*entry.value()].read().pin_count > 0)
            .count()
    }

    fn allocate_frame(&self) -> CopseResult<FrameId> {
        if let Some(frame_id) = self.free_list.lock().pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = self.replacer.lock().evict() else {
            return Err(CopseError::OutOfMemory(
                "buffer pool is full and no page is evictable".to_string(),
            ));
        };

        let page = self.pool[frame_id].clone();
        let mut guard = page.write();
        let old_page_id = guard.page_id;
        if old_page_id != INVALID_PAGE_ID {
            if guard.is_dirty {
                self.disk_manager.write_page(old_page_id, guard.data())?;
                guard.is_dirty = false;
            }
            self.page_table.remove(&old_page_id);
            debug!("evicted page {} from frame {}", old_page_id, frame_id);
        }
        Ok(frame_id)
    }
}
