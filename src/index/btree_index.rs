use std::cmp::Ordering;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::buffer::{
    AtomicPageId, BufferPoolManager, PageId, PageRef, HEADER_PAGE_ID, INVALID_PAGE_ID,
};
use crate::config::BTreeConfig;
use crate::error::{CopseError, CopseResult};
use crate::index::btree_iterator::IndexIterator;
use crate::index::comparator::KeyComparator;
use crate::storage::codec::{BPlusTreePageCodec, HeaderPageCodec};
use crate::storage::page::{
    BPlusTreeInternalPage, BPlusTreeLeafPage, BPlusTreePage, HeaderPage, RecordId,
};

/// Disk-resident B+ tree over unique byte keys.
///
/// Pages are fetched from the buffer pool, decoded, mutated and encoded
/// back; every fetch is balanced by exactly one unpin on every path. One
/// tree-wide latch serializes mutations against lookups and iteration.
pub struct BPlusTreeIndex {
    pub index_name: String,
    pub buffer_pool: Arc<BufferPoolManager>,
    pub comparator: KeyComparator,
    pub internal_max_size: u32,
    pub leaf_max_size: u32,
    root_page_id: AtomicPageId,
    tree_latch: RwLock<()>,
}

impl BPlusTreeIndex {
    pub fn with_config(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        comparator: KeyComparator,
        config: BTreeConfig,
    ) -> CopseResult<Self> {
        Self::new(
            index_name,
            buffer_pool,
            comparator,
            config.internal_max_size,
            config.leaf_max_size,
        )
    }

    /// Opens the index named `index_name`, bootstrapping the header page on
    /// a fresh database and loading the root page id from its record.
    pub fn new(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        comparator: KeyComparator,
        internal_max_size: u32,
        leaf_max_size: u32,
    ) -> CopseResult<Self> {
        let index_name = index_name.into();

        if buffer_pool.disk_manager.num_pages() == 0 {
            let header_page = buffer_pool.new_page()?;
            let header_page_id = header_page.read().page_id;
            if header_page_id != HEADER_PAGE_ID {
                return Err(CopseError::Internal(format!(
                    "header page allocated as page {} instead of {}",
                    header_page_id, HEADER_PAGE_ID
                )));
            }
            header_page
                .write()
                .set_data(&HeaderPageCodec::encode(&HeaderPage::new()));
            buffer_pool.unpin_page(header_page_id, true)?;
        }

        let header_page = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let decoded = HeaderPageCodec::decode(header_page.read().data());
        buffer_pool.unpin_page(HEADER_PAGE_ID, false)?;
        let (header, _) = decoded?;
        let root_page_id = header.get_root_id(&index_name).unwrap_or(INVALID_PAGE_ID);

        Ok(Self {
            index_name,
            buffer_pool,
            comparator,
            internal_max_size,
            leaf_max_size,
            root_page_id: AtomicPageId::new(root_page_id),
            tree_latch: RwLock::new(()),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id.load(AtomicOrdering::SeqCst)
    }

    fn set_root_page_id(&self, root_page_id: PageId) {
        self.root_page_id.store(root_page_id, AtomicOrdering::SeqCst);
    }

    /// Point lookup. Never dirties a page.
    pub fn get(&self, key: &[u8]) -> CopseResult<Option<RecordId>> {
        let _latch = self.tree_latch.read();
        let Some((_, leaf)) = self.find_leaf_page(key, false)? else {
            return Ok(None);
        };
        let result = leaf.look_up(key);
        self.buffer_pool.unpin_page(leaf.header.page_id, false)?;
        Ok(result)
    }

    /// Inserts a unique key; false if the key is already present.
    pub fn insert(&self, key: &[u8], rid: RecordId) -> CopseResult<bool> {
        let _latch = self.tree_latch.write();
        if self.is_empty() {
            self.start_new_tree(key, rid)?;
            return Ok(true);
        }
        self.insert_into_leaf(key, rid)
    }

    /// Removes a key; absent keys are a no-op.
    pub fn delete(&self, key: &[u8]) -> CopseResult<()> {
        let _latch = self.tree_latch.write();
        if self.is_empty() {
            return Ok(());
        }
        let Some((leaf_page, mut leaf)) = self.find_leaf_page(key, false)? else {
            return Ok(());
        };
        let leaf_id = leaf.header.page_id;
        leaf.remove_and_delete_record(key);

        if leaf.header.current_size < leaf.min_size() {
            let mut node = BPlusTreePage::Leaf(leaf);
            self.coalesce_or_redistribute(&leaf_page, &mut node)?;
            return Ok(());
        }

        self.write_tree_page(&leaf_page, &BPlusTreePage::Leaf(leaf));
        self.buffer_pool.unpin_page(leaf_id, true)?;
        Ok(())
    }

    /// Iterator positioned on the leftmost record.
    pub fn begin(&self) -> CopseResult<IndexIterator> {
        let _latch = self.tree_latch.read();
        let Some((_, leaf)) = self.find_leaf_page(&[], true)? else {
            return Ok(IndexIterator::ended(
                self.buffer_pool.clone(),
                self.comparator,
            ));
        };
        let page_id = leaf.header.page_id;
        self.buffer_pool.unpin_page(page_id, false)?;
        IndexIterator::new(self.buffer_pool.clone(), self.comparator, page_id)
    }

    /// Iterator positioned on the leaf that may contain `key`.
    pub fn begin_at(&self, key: &[u8]) -> CopseResult<IndexIterator> {
        let _latch = self.tree_latch.read();
        let Some((_, leaf)) = self.find_leaf_page(key, false)? else {
            return Ok(IndexIterator::ended(
                self.buffer_pool.clone(),
                self.comparator,
            ));
        };
        let page_id = leaf.header.page_id;
        self.buffer_pool.unpin_page(page_id, false)?;
        IndexIterator::new(self.buffer_pool.clone(), self.comparator, page_id)
    }

    /// Descends to the leaf for `key` (or the leftmost leaf), unpinning
    /// each internal page before fetching its child. The leaf stays pinned
    /// for the caller.
    fn find_leaf_page(
        &self,
        key: &[u8],
        leftmost: bool,
    ) -> CopseResult<Option<(PageRef, BPlusTreeLeafPage)>> {
        let mut page_id = self.root_page_id();
        if page_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        loop {
            let (page, tree_page) = self.fetch_tree_page(page_id)?;
            match tree_page {
                BPlusTreePage::Internal(internal) => {
                    let child_id = if leftmost {
                        internal.value_at(0)
                    } else {
                        internal.look_up(key)
                    };
                    self.buffer_pool.unpin_page(page_id, false)?;
                    page_id = child_id;
                }
                BPlusTreePage::Leaf(leaf) => return Ok(Some((page, leaf))),
            }
        }
    }

    fn start_new_tree(&self, key: &[u8], rid: RecordId) -> CopseResult<()> {
        let root_page = self.buffer_pool.new_page()?;
        let root_page_id = root_page.read().page_id;

        let mut leaf = BPlusTreeLeafPage::new(
            root_page_id,
            INVALID_PAGE_ID,
            self.leaf_max_size,
            self.comparator,
        );
        leaf.insert(key, rid);
        self.write_tree_page(&root_page, &BPlusTreePage::Leaf(leaf));

        self.set_root_page_id(root_page_id);
        self.update_root_page_id(true)?;
        self.buffer_pool.unpin_page(root_page_id, true)?;
        debug!("started new tree with root {}", root_page_id);
        Ok(())
    }

    fn insert_into_leaf(&self, key: &[u8], rid: RecordId) -> CopseResult<bool> {
        let Some((leaf_page, mut leaf)) = self.find_leaf_page(key, false)? else {
            return Err(CopseError::Internal(
                "tree is unexpectedly empty".to_string(),
            ));
        };
        let leaf_id = leaf.header.page_id;

        if leaf.look_up(key).is_some() {
            self.buffer_pool.unpin_page(leaf_id, false)?;
            return Ok(false);
        }

        if leaf.header.current_size < leaf.header.max_size {
            leaf.insert(key, rid);
            self.write_tree_page(&leaf_page, &BPlusTreePage::Leaf(leaf));
            self.buffer_pool.unpin_page(leaf_id, true)?;
            return Ok(true);
        }

        // the leaf is full: split, then place the key in the proper half
        let mut old_node = BPlusTreePage::Leaf(leaf);
        let (sibling_page, mut new_node, _) = self.split(&mut old_node)?;
        let new_id = new_node.page_id();
        let separator = match &new_node {
            BPlusTreePage::Leaf(sibling) => sibling.key_at(0).clone(),
            BPlusTreePage::Internal(_) => {
                return Err(CopseError::Internal(
                    "leaf split produced an internal sibling".to_string(),
                ))
            }
        };

        {
            let (BPlusTreePage::Leaf(leaf), BPlusTreePage::Leaf(sibling)) =
                (&mut old_node, &mut new_node)
            else {
                return Err(CopseError::Internal(
                    "leaf split produced an internal sibling".to_string(),
                ));
            };
            if (self.comparator)(&separator, key) == Ordering::Less {
                sibling.insert(key, rid);
            } else {
                leaf.insert(key, rid);
            }
        }

        self.insert_into_parent(&mut old_node, separator, &mut new_node)?;

        self.write_tree_page(&sibling_page, &new_node);
        self.buffer_pool.unpin_page(new_id, true)?;
        self.write_tree_page(&leaf_page, &old_node);
        self.buffer_pool.unpin_page(leaf_id, true)?;
        Ok(true)
    }

    /// Allocates a sibling of the same kind and moves the upper half of the
    /// node into it. Relocated internal children are reparented; their page
    /// ids are returned so callers can spot a decoded copy among them. The
    /// sibling page stays pinned for the caller.
    fn split(
        &self,
        node: &mut BPlusTreePage,
    ) -> CopseResult<(PageRef, BPlusTreePage, Vec<PageId>)> {
        let new_page = self.buffer_pool.new_page()?;
        let new_page_id = new_page.read().page_id;

        match node {
            BPlusTreePage::Leaf(leaf) => {
                let mut sibling = BPlusTreeLeafPage::new(
                    new_page_id,
                    leaf.header.parent_page_id,
                    leaf.header.max_size,
                    self.comparator,
                );
                leaf.move_half_to(&mut sibling);
                sibling.header.next_page_id = leaf.header.next_page_id;
                leaf.header.next_page_id = new_page_id;
                debug!("split leaf {} into {}", leaf.header.page_id, new_page_id);
                Ok((new_page, BPlusTreePage::Leaf(sibling), Vec::new()))
            }
            BPlusTreePage::Internal(internal) => {
                let mut sibling = BPlusTreeInternalPage::new(
                    new_page_id,
                    internal.header.parent_page_id,
                    internal.header.max_size,
                    self.comparator,
                );
                let moved = internal.move_half_to(&mut sibling);
                self.reparent_children(&moved, new_page_id)?;
                debug!(
                    "split internal {} into {}",
                    internal.header.page_id, new_page_id
                );
                Ok((new_page, BPlusTreePage::Internal(sibling), moved))
            }
        }
    }

    /// Registers a freshly split-off sibling under the parent of `old_node`,
    /// splitting the parent (and recursing) when it is full, or installing a
    /// new root when `old_node` was the root. Updates the parent pointers of
    /// the decoded nodes; the caller writes them back.
    fn insert_into_parent(
        &self,
        old_node: &mut BPlusTreePage,
        key: Vec<u8>,
        new_node: &mut BPlusTreePage,
    ) -> CopseResult<()> {
        if old_node.parent_page_id() == INVALID_PAGE_ID {
            let root_page = self.buffer_pool.new_page()?;
            let root_page_id = root_page.read().page_id;
            let mut root = BPlusTreeInternalPage::new(
                root_page_id,
                INVALID_PAGE_ID,
                self.internal_max_size,
                self.comparator,
            );
            root.populate_new_root(old_node.page_id(), key, new_node.page_id());
            old_node.set_parent_page_id(root_page_id);
            new_node.set_parent_page_id(root_page_id);
            self.write_tree_page(&root_page, &BPlusTreePage::Internal(root));
            self.set_root_page_id(root_page_id);
            self.update_root_page_id(false)?;
            self.buffer_pool.unpin_page(root_page_id, true)?;
            debug!("installed new root {}", root_page_id);
            return Ok(());
        }

        let (parent_page, parent) = self.fetch_internal_page(old_node.parent_page_id())?;
        let parent_id = parent.header.page_id;

        if parent.header.current_size < parent.header.max_size {
            let mut parent = parent;
            parent.insert_node_after(old_node.page_id(), key, new_node.page_id());
            new_node.set_parent_page_id(parent_id);
            self.write_tree_page(&parent_page, &BPlusTreePage::Internal(parent));
            self.buffer_pool.unpin_page(parent_id, true)?;
            return Ok(());
        }

        // the parent is full as well
        let mut parent_node = BPlusTreePage::Internal(parent);
        let (sibling_page, mut sibling_node, moved) = self.split(&mut parent_node)?;
        let sibling_id = sibling_node.page_id();
        let promoted = match &sibling_node {
            BPlusTreePage::Internal(sibling) => sibling.key_at(0).clone(),
            BPlusTreePage::Leaf(_) => {
                return Err(CopseError::Internal(
                    "internal split produced a leaf sibling".to_string(),
                ))
            }
        };

        if moved.contains(&old_node.page_id()) {
            // the split relocated the old child under the new sibling; keep
            // the decoded copy in line with what was written to its page
            old_node.set_parent_page_id(sibling_id);
        }

        if (self.comparator)(&promoted, &key) == Ordering::Less {
            let BPlusTreePage::Internal(sibling) = &mut sibling_node else {
                return Err(CopseError::Internal(
                    "internal split produced a leaf sibling".to_string(),
                ));
            };
            let anchor = sibling.look_up(&key);
            sibling.insert_node_after(anchor, key, new_node.page_id());
            new_node.set_parent_page_id(sibling_id);
        } else {
            let BPlusTreePage::Internal(parent) = &mut parent_node else {
                return Err(CopseError::Internal(
                    "parent must be an internal page".to_string(),
                ));
            };
            let anchor = parent.look_up(&key);
            parent.insert_node_after(anchor, key, new_node.page_id());
            new_node.set_parent_page_id(parent_id);
        }

        if parent_node.parent_page_id() == INVALID_PAGE_ID {
            // the split parent was the root
            let root_page = self.buffer_pool.new_page()?;
            let root_page_id = root_page.read().page_id;
            let mut root = BPlusTreeInternalPage::new(
                root_page_id,
                INVALID_PAGE_ID,
                self.internal_max_size,
                self.comparator,
            );
            root.populate_new_root(parent_id, promoted, sibling_id);
            parent_node.set_parent_page_id(root_page_id);
            sibling_node.set_parent_page_id(root_page_id);
            self.write_tree_page(&root_page, &BPlusTreePage::Internal(root));
            self.set_root_page_id(root_page_id);
            self.update_root_page_id(false)?;
            self.buffer_pool.unpin_page(root_page_id, true)?;
            debug!("installed new root {}", root_page_id);
        } else {
            self.insert_into_parent(&mut parent_node, promoted, &mut sibling_node)?;
        }

        self.write_tree_page(&sibling_page, &sibling_node);
        self.buffer_pool.unpin_page(sibling_id, true)?;
        self.write_tree_page(&parent_page, &parent_node);
        self.buffer_pool.unpin_page(parent_id, true)?;
        Ok(())
    }

    /// Rebalances an underflowing node, taking over its page: whatever the
    /// outcome (kept, merged away, root adjusted), the node has been
    /// written back or deleted and its pin released when this returns. The
    /// node's page must hit disk before any recursion on the parent, whose
    /// reparenting pass re-reads children from their pages. Returns true
    /// when the node's page was deleted.
    fn coalesce_or_redistribute(
        &self,
        node_page: &PageRef,
        node: &mut BPlusTreePage,
    ) -> CopseResult<bool> {
        let node_id = node.page_id();

        if node.parent_page_id() == INVALID_PAGE_ID {
            // the root is exempt from the minimum; it shrinks structurally
            let delete_root = match node {
                BPlusTreePage::Leaf(leaf) => leaf.header.current_size == 0,
                BPlusTreePage::Internal(internal) => internal.header.current_size <= 1,
            };
            if !delete_root {
                self.write_tree_page(node_page, node);
                self.buffer_pool.unpin_page(node_id, true)?;
                return Ok(false);
            }
            if let BPlusTreePage::Internal(internal) = node {
                let internal = internal.clone();
                return self.adjust_root(&internal);
            }
            // the last key left the leaf root: the tree is empty again
            self.buffer_pool.unpin_page(node_id, true)?;
            self.buffer_pool.delete_page(node_id)?;
            self.set_root_page_id(INVALID_PAGE_ID);
            self.update_root_page_id(false)?;
            debug!("tree became empty, deleted root {}", node_id);
            return Ok(true);
        }

        let (parent_page, mut parent) = self.fetch_internal_page(node.parent_page_id())?;
        let parent_id = parent.header.page_id;
        let Some(node_index) = parent.value_index(node_id) else {
            self.buffer_pool.unpin_page(parent_id, false)?;
            self.buffer_pool.unpin_page(node_id, false)?;
            return Err(CopseError::Internal(format!(
                "page {} missing from its parent {}",
                node_id, parent_id
            )));
        };

        let (merge_index, redistribute_index) = match self.check_merge_sibling(
            &parent,
            node_index,
            node.current_size(),
            node.max_size(),
        ) {
            Ok(candidates) => candidates,
            Err(e) => {
                self.buffer_pool.unpin_page(parent_id, false)?;
                self.buffer_pool.unpin_page(node_id, false)?;
                return Err(e);
            }
        };

        let node_deleted;
        let mut merged = false;
        if let Some(sibling_index) = merge_index {
            let sibling_id = parent.value_at(sibling_index);
            let (sibling_page, mut sibling) = self.fetch_tree_page(sibling_id)?;
            merged = true;
            if sibling_index < node_index {
                // the left sibling receives; the node is the donor
                self.coalesce(&mut sibling, node, &mut parent, node_index)?;
                self.write_tree_page(&sibling_page, &sibling);
                self.buffer_pool.unpin_page(sibling_id, true)?;
                node_deleted = true;
            } else {
                // the node receives; the right sibling is the donor
                self.coalesce(node, &mut sibling, &mut parent, sibling_index)?;
                self.write_tree_page(node_page, node);
                self.buffer_pool.unpin_page(node_id, true)?;
                node_deleted = false;
            }
        } else {
            let sibling_id = parent.value_at(redistribute_index);
            let (sibling_page, mut sibling) = self.fetch_tree_page(sibling_id)?;
            if redistribute_index < node_index {
                self.redistribute_from_left(&mut sibling, node, &mut parent, node_index)?;
            } else {
                self.redistribute_from_right(&mut sibling, node, &mut parent, redistribute_index)?;
            }
            self.write_tree_page(&sibling_page, &sibling);
            self.buffer_pool.unpin_page(sibling_id, true)?;
            self.write_tree_page(node_page, node);
            self.buffer_pool.unpin_page(node_id, true)?;
            node_deleted = false;
        }

        if merged && parent.header.current_size < parent.min_size() {
            let mut parent_node = BPlusTreePage::Internal(parent);
            self.coalesce_or_redistribute(&parent_page, &mut parent_node)?;
        } else {
            self.write_tree_page(&parent_page, &BPlusTreePage::Internal(parent));
            self.buffer_pool.unpin_page(parent_id, true)?;
        }

        Ok(node_deleted)
    }

    /// Moves everything out of the donor (always the higher-index child)
    /// into the recipient, deletes the donor page and drops its slot from
    /// the parent.
    fn coalesce(
        &self,
        recipient: &mut BPlusTreePage,
        donor: &mut BPlusTreePage,
        parent: &mut BPlusTreeInternalPage,
        donor_index: usize,
    ) -> CopseResult<()> {
        let donor_id = donor.page_id();
        let recipient_id = recipient.page_id();

        match (recipient, donor) {
            (BPlusTreePage::Leaf(recipient), BPlusTreePage::Leaf(donor)) => {
                donor.move_all_to(recipient);
            }
            (BPlusTreePage::Internal(recipient), BPlusTreePage::Internal(donor)) => {
                // the separator comes down as the key of the donor's sentinel
                let separator = parent.key_at(donor_index).clone();
                let moved = donor.move_all_to(recipient, separator);
                self.reparent_children(&moved, recipient_id)?;
            }
            _ => {
                return Err(CopseError::Internal(
                    "cannot merge a leaf page with an internal page".to_string(),
                ))
            }
        }

        self.buffer_pool.unpin_page(donor_id, true)?;
        self.buffer_pool.delete_page(donor_id)?;
        parent.remove(donor_index);
        debug!("merged page {} into {}", donor_id, recipient_id);
        Ok(())
    }

    /// The left sibling donates its last entry to the node's front.
    fn redistribute_from_left(
        &self,
        sibling: &mut BPlusTreePage,
        node: &mut BPlusTreePage,
        parent: &mut BPlusTreeInternalPage,
        separator_index: usize,
    ) -> CopseResult<()> {
        match (sibling, node) {
            (BPlusTreePage::Leaf(sibling), BPlusTreePage::Leaf(node)) => {
                sibling.move_last_to_front_of(node);
                parent.set_key_at(separator_index, node.key_at(0).clone());
            }
            (BPlusTreePage::Internal(sibling), BPlusTreePage::Internal(node)) => {
                let separator = parent.key_at(separator_index).clone();
                let (new_separator, moved_child) = sibling.move_last_to_front_of(node, separator);
                self.reparent_children(&[moved_child], node.header.page_id)?;
                parent.set_key_at(separator_index, new_separator);
            }
            _ => {
                return Err(CopseError::Internal(
                    "cannot redistribute between a leaf page and an internal page".to_string(),
                ))
            }
        }
        Ok(())
    }

    /// The right sibling donates its first entry to the node's end.
    fn redistribute_from_right(
        &self,
        sibling: &mut BPlusTreePage,
        node: &mut BPlusTreePage,
        parent: &mut BPlusTreeInternalPage,
        separator_index: usize,
    ) -> CopseResult<()> {
        match (sibling, node) {
            (BPlusTreePage::Leaf(sibling), BPlusTreePage::Leaf(node)) => {
                sibling.move_first_to_end_of(node);
                parent.set_key_at(separator_index, sibling.key_at(0).clone());
            }
            (BPlusTreePage::Internal(sibling), BPlusTreePage::Internal(node)) => {
                let separator = parent.key_at(separator_index).clone();
                let (new_separator, moved_child) = sibling.move_first_to_end_of(node, separator);
                self.reparent_children(&[moved_child], node.header.page_id)?;
                parent.set_key_at(separator_index, new_separator);
            }
            _ => {
                return Err(CopseError::Internal(
                    "cannot redistribute between a leaf page and an internal page".to_string(),
                ))
            }
        }
        Ok(())
    }

    /// Promotes the sole child of a shrunken internal root and deletes the
    /// old root.
    fn adjust_root(&self, old_root: &BPlusTreeInternalPage) -> CopseResult<bool> {
        let old_root_id = old_root.header.page_id;
        let new_root_id = old_root.value_at(0);

        let (child_page, mut child) = self.fetch_tree_page(new_root_id)?;
        child.set_parent_page_id(INVALID_PAGE_ID);
        self.write_tree_page(&child_page, &child);
        self.buffer_pool.unpin_page(new_root_id, true)?;

        self.set_root_page_id(new_root_id);
        self.buffer_pool.unpin_page(old_root_id, true)?;
        self.buffer_pool.delete_page(old_root_id)?;
        self.update_root_page_id(false)?;
        debug!("root collapsed: {} -> {}", old_root_id, new_root_id);
        Ok(true)
    }

    /// Sizes up the node's siblings (each fetched briefly and unpinned
    /// clean). With two siblings the smaller is the merge candidate and the
    /// larger the redistribution candidate; a merge is feasible only if the
    /// combined size fits one page.
    fn check_merge_sibling(
        &self,
        parent: &BPlusTreeInternalPage,
        node_index: usize,
        node_size: u32,
        node_max_size: u32,
    ) -> CopseResult<(Option<usize>, usize)> {
        let left_index = if node_index == 0 {
            None
        } else {
            Some(node_index - 1)
        };
        let right_index = if node_index + 1 < parent.header.current_size as usize {
            Some(node_index + 1)
        } else {
            None
        };

        let sibling_size = |index: usize| -> CopseResult<u32> {
            let sibling_id = parent.value_at(index);
            let (_, sibling) = self.fetch_tree_page(sibling_id)?;
            let size = sibling.current_size();
            self.buffer_pool.unpin_page(sibling_id, false)?;
            Ok(size)
        };

        match (left_index, right_index) {
            (None, None) => Err(CopseError::Internal(format!(
                "page at parent index {} has no siblings",
                node_index
            ))),
            (Some(left), None) => {
                let left_size = sibling_size(left)?;
                Ok(((left_size + node_size <= node_max_size).then_some(left), left))
            }
            (None, Some(right)) => {
                let right_size = sibling_size(right)?;
                Ok((
                    (right_size + node_size <= node_max_size).then_some(right),
                    right,
                ))
            }
            (Some(left), Some(right)) => {
                let left_size = sibling_size(left)?;
                let right_size = sibling_size(right)?;
                if left_size <= right_size {
                    Ok((
                        (left_size + node_size <= node_max_size).then_some(left),
                        right,
                    ))
                } else {
                    Ok((
                        (right_size + node_size <= node_max_size).then_some(right),
                        left,
                    ))
                }
            }
        }
    }

    /// Records the current root page id in the header page. Insert-record
    /// mode is used when the index first materializes, update mode for
    /// every later root change.
    fn update_root_page_id(&self, insert_record: bool) -> CopseResult<()> {
        let header_page = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let (mut header, _) = match HeaderPageCodec::decode(header_page.read().data()) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.buffer_pool.unpin_page(HEADER_PAGE_ID, false)?;
                return Err(e);
            }
        };
        let root_page_id = self.root_page_id();
        if insert_record {
            if !header.insert_record(&self.index_name, root_page_id) {
                header.update_record(&self.index_name, root_page_id);
            }
        } else {
            header.update_record(&self.index_name, root_page_id);
        }
        header_page
            .write()
            .set_data(&HeaderPageCodec::encode(&header));
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;
        Ok(())
    }

    /// Rewrites the parent pointer of each relocated child.
    fn reparent_children(&self, children: &[PageId], new_parent_id: PageId) -> CopseResult<()> {
        for child_id in children {
            let (child_page, mut child) = self.fetch_tree_page(*child_id)?;
            child.set_parent_page_id(new_parent_id);
            self.write_tree_page(&child_page, &child);
            self.buffer_pool.unpin_page(*child_id, true)?;
        }
        Ok(())
    }

    pub fn fetch_tree_page(&self, page_id: PageId) -> CopseResult<(PageRef, BPlusTreePage)> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let decoded = {
            let guard = page.read();
            BPlusTreePageCodec::decode(guard.data(), self.comparator)
        };
        match decoded {
            Ok((tree_page, _)) => Ok((page, tree_page)),
            Err(e) => {
                self.buffer_pool.unpin_page(page_id, false)?;
                Err(e)
            }
        }
    }

    fn fetch_internal_page(
        &self,
        page_id: PageId,
    ) -> CopseResult<(PageRef, BPlusTreeInternalPage)> {
        let (page, tree_page) = self.fetch_tree_page(page_id)?;
        match tree_page {
            BPlusTreePage::Internal(internal) => Ok((page, internal)),
            BPlusTreePage::Leaf(_) => {
                self.buffer_pool.unpin_page(page_id, false)?;
                Err(CopseError::Internal(format!(
                    "page {} is a leaf, expected an internal page",
                    page_id
                )))
            }
        }
    }

    fn write_tree_page(&self, page: &PageRef, tree_page: &BPlusTreePage) {
        page.write().set_data(&BPlusTreePageCodec::encode(tree_page));
    }
}
