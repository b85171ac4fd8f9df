pub mod buffer_pool;

pub use buffer_pool::{BufferPoolManager, Page};

use std::sync::atomic::AtomicI32;
use std::sync::Arc;

use parking_lot::RwLock;

pub type PageRef = Arc<RwLock<Page>>;

pub type PageId = i32;
pub type FrameId = usize;
pub type AtomicPageId = AtomicI32;

pub const PAGE_SIZE: usize = 512;
pub const INVALID_PAGE_ID: PageId = -1;
pub const HEADER_PAGE_ID: PageId = 0;
pub const BUFFER_POOL_SIZE: usize = 1000;
