use std::sync::Arc;

use crate::buffer::{BufferPoolManager, PageId, INVALID_PAGE_ID};
use crate::error::CopseResult;
use crate::index::comparator::KeyComparator;
use crate::storage::codec::BPlusTreeLeafPageCodec;
use crate::storage::page::LeafKV;

/// Forward iterator over the leaf chain. Only a `(page_id, index)` position
/// is retained between steps; every step re-fetches the page and unpins it
/// clean before returning, so an idle iterator pins nothing.
pub struct IndexIterator {
    buffer_pool: Arc<BufferPoolManager>,
    comparator: KeyComparator,
    current_page_id: PageId,
    current_index: usize,
    ended: bool,
}

impl IndexIterator {
    pub(crate) fn new(
        buffer_pool: Arc<BufferPoolManager>,
        comparator: KeyComparator,
        page_id: PageId,
    ) -> CopseResult<Self> {
        let page = buffer_pool.fetch_page(page_id)?;
        let decoded = BPlusTreeLeafPageCodec::decode(page.read().data(), comparator);
        buffer_pool.unpin_page(page_id, false)?;
        let (leaf, _) = decoded?;
        Ok(Self {
            buffer_pool,
            comparator,
            current_page_id: page_id,
            current_index: 0,
            ended: leaf.header.current_size == 0,
        })
    }

    pub(crate) fn ended(buffer_pool: Arc<BufferPoolManager>, comparator: KeyComparator) -> Self {
        Self {
            buffer_pool,
            comparator,
            current_page_id: INVALID_PAGE_ID,
            current_index: 0,
            ended: true,
        }
    }

    pub fn is_end(&self) -> bool {
        self.ended
    }

    /// Returns the record at the current position and advances: first
    /// within the page, then along `next_page_id`, ending after the last
    /// record of the last leaf.
    pub fn next(&mut self) -> CopseResult<Option<LeafKV>> {
        if self.ended {
            return Ok(None);
        }

        let page = self.buffer_pool.fetch_page(self.current_page_id)?;
        let leaf = match BPlusTreeLeafPageCodec::decode(page.read().data(), self.comparator) {
            Ok((leaf, _)) => leaf,
            Err(e) => {
                self.buffer_pool.unpin_page(self.current_page_id, false)?;
                return Err(e);
            }
        };
        let page_id = leaf.header.page_id;

        if self.current_index >= leaf.header.current_size as usize {
            // the leaf shrank underneath the iterator
            self.buffer_pool.unpin_page(page_id, false)?;
            self.ended = true;
            return Ok(None);
        }

        let item = leaf.item_at(self.current_index).clone();
        if self.current_index + 1 < leaf.header.current_size as usize {
            self.current_index += 1;
        } else if leaf.next_page_id() != INVALID_PAGE_ID {
            self.current_page_id = leaf.next_page_id();
            self.current_index = 0;
        } else {
            self.ended = true;
        }

        self.buffer_pool.unpin_page(page_id, false)?;
        Ok(Some(item))
    }
}
