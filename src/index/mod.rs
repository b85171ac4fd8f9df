pub mod btree_index;
pub mod btree_iterator;
pub mod comparator;

pub use btree_index::BPlusTreeIndex;
pub use btree_iterator::IndexIterator;
pub use comparator::{default_comparator, KeyComparator};
