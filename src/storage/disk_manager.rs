use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use log::debug;
use parking_lot::Mutex;

use crate::buffer::{AtomicPageId, PageId, PAGE_SIZE};
use crate::error::{CopseError, CopseResult};

/// Reads and writes fixed-size pages of a single database file. Page ids are
/// handed out monotonically; freed pages are not recycled.
#[derive(Debug)]
pub struct DiskManager {
    db_file: Mutex<File>,
    next_page_id: AtomicPageId,
}

impl DiskManager {
    pub fn try_new(db_path: impl Into<PathBuf>) -> CopseResult<Self> {
        let db_path = db_path.into();
        let db_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&db_path)?;
        let file_len = db_file.metadata()?.len();
        let next_page_id = (file_len as usize / PAGE_SIZE) as PageId;
        debug!(
            "opened database file {:?} with {} pages",
            db_path, next_page_id
        );
        Ok(Self {
            db_file: Mutex::new(db_file),
            next_page_id: AtomicPageId::new(next_page_id),
        })
    }

    pub fn read_page(&self, page_id: PageId) -> CopseResult<[u8; PAGE_SIZE]> {
        if page_id < 0 {
            return Err(CopseError::Internal(format!(
                "cannot read invalid page id {}",
                page_id
            )));
        }
        let mut buf = [0u8; PAGE_SIZE];
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))?;
        // a page allocated but never flushed reads back as zeroes
        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(buf)
    }

    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> CopseResult<()> {
        if data.len() != PAGE_SIZE {
            return Err(CopseError::Internal(format!(
                "page data must be {} bytes, got {}",
                PAGE_SIZE,
                data.len()
            )));
        }
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }

    pub fn allocate_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn deallocate_page(&self, _page_id: PageId) {
        // page ids are monotonic; the slot simply goes unused
    }

    pub fn num_pages(&self) -> PageId {
        self.next_page_id.load(Ordering::SeqCst)
    }
}
