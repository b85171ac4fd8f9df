use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::TempDir;

use copse::buffer::{BufferPoolManager, PageId, HEADER_PAGE_ID, INVALID_PAGE_ID};
use copse::config::{BTreeConfig, BufferPoolConfig};
use copse::index::comparator::default_comparator;
use copse::index::BPlusTreeIndex;
use copse::storage::codec::HeaderPageCodec;
use copse::storage::disk_manager::DiskManager;
use copse::storage::page::{BPlusTreePage, RecordId};

fn setup_tree(pool_size: usize, leaf_max: u32, internal_max: u32) -> (TempDir, BPlusTreeIndex) {
    let temp_dir = TempDir::new().unwrap();
    let disk_manager = Arc::new(DiskManager::try_new(temp_dir.path().join("test.db")).unwrap());
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, 2, disk_manager));
    let tree = BPlusTreeIndex::new(
        "test_index",
        buffer_pool,
        default_comparator,
        internal_max,
        leaf_max,
    )
    .unwrap();
    (temp_dir, tree)
}

fn key(i: u64) -> Vec<u8> {
    i.to_be_bytes().to_vec()
}

fn rid(i: u64) -> RecordId {
    RecordId::new(i as PageId, (i % 7) as u32)
}

/// Walks the whole tree checking the structural invariants: occupancy
/// bounds, parent back-pointers, separator keys equal to the minimum of
/// their right subtree, uniform depth, and in-leaf ordering. Returns the
/// tree height and the leaves in key order.
fn check_subtree(
    tree: &BPlusTreeIndex,
    page_id: PageId,
    expected_parent: PageId,
    leaves: &mut Vec<(PageId, Vec<u8>, Vec<u8>, PageId)>,
) -> (Vec<u8>, usize) {
    let (_, page) = tree.fetch_tree_page(page_id).unwrap();
    tree.buffer_pool.unpin_page(page_id, false).unwrap();

    match page {
        BPlusTreePage::Leaf(leaf) => {
            assert_eq!(leaf.header.page_id, page_id);
            assert_eq!(leaf.header.parent_page_id, expected_parent);
            assert!(leaf.header.current_size <= leaf.header.max_size);
            if expected_parent != INVALID_PAGE_ID {
                assert!(leaf.header.current_size >= leaf.min_size());
            }
            assert_eq!(leaf.array.len(), leaf.header.current_size as usize);
            for pair in leaf.array.windows(2) {
                assert!(pair[0].0 < pair[1].0, "leaf keys out of order");
            }
            leaves.push((
                page_id,
                leaf.key_at(0).clone(),
                leaf.key_at(leaf.array.len() - 1).clone(),
                leaf.next_page_id(),
            ));
            (leaf.key_at(0).clone(), 1)
        }
        BPlusTreePage::Internal(internal) => {
            assert_eq!(internal.header.page_id, page_id);
            assert_eq!(internal.header.parent_page_id, expected_parent);
            assert!(internal.header.current_size <= internal.header.max_size);
            if expected_parent != INVALID_PAGE_ID {
                assert!(internal.header.current_size >= internal.min_size());
            } else {
                assert!(internal.header.current_size >= 2);
            }
            assert_eq!(internal.array.len(), internal.header.current_size as usize);

            let children = internal.values();
            let mut deduped = children.clone();
            deduped.sort_unstable();
            deduped.dedup();
            assert_eq!(deduped.len(), children.len(), "duplicate child pointer");

            let mut subtree_min = None;
            let mut depth = None;
            for (index, (separator, child)) in internal.array.iter().enumerate() {
                let (child_min, child_depth) = check_subtree(tree, *child, page_id, leaves);
                match depth {
                    None => depth = Some(child_depth),
                    Some(expected) => assert_eq!(expected, child_depth, "uneven depth"),
                }
                if index == 0 {
                    subtree_min = Some(child_min);
                } else {
                    assert_eq!(
                        separator, &child_min,
                        "separator must equal the minimum of its right subtree"
                    );
                }
            }
            (subtree_min.unwrap(), depth.unwrap() + 1)
        }
    }
}

fn check_tree_integrity(tree: &BPlusTreeIndex) -> usize {
    if tree.is_empty() {
        assert_eq!(tree.root_page_id(), INVALID_PAGE_ID);
        return 0;
    }
    let mut leaves = Vec::new();
    let (_, height) = check_subtree(tree, tree.root_page_id(), INVALID_PAGE_ID, &mut leaves);

    // the leaf chain visits the leaves in key order and terminates once
    for pair in leaves.windows(2) {
        let (_, _, last_key, next) = &pair[0];
        let (next_page_id, first_key, _, _) = &pair[1];
        assert_eq!(next, next_page_id, "broken leaf chain");
        assert!(last_key < first_key, "leaf chain out of order");
    }
    assert_eq!(leaves.last().unwrap().3, INVALID_PAGE_ID);

    // no operation may leave a page pinned
    assert_eq!(tree.buffer_pool.pinned_page_count(), 0);
    height
}

fn header_root_id(tree: &BPlusTreeIndex) -> Option<PageId> {
    let header_page = tree.buffer_pool.fetch_page(HEADER_PAGE_ID).unwrap();
    let (header, _) = HeaderPageCodec::decode(header_page.read().data()).unwrap();
    tree.buffer_pool.unpin_page(HEADER_PAGE_ID, false).unwrap();
    header.get_root_id("test_index")
}

#[test]
fn test_split_leaf_scenario() {
    let (_temp_dir, tree) = setup_tree(50, 4, 4);
    for i in 1..=5 {
        assert!(tree.insert(&key(i), rid(i)).unwrap());
    }

    let (_, root) = tree.fetch_tree_page(tree.root_page_id()).unwrap();
    tree.buffer_pool
        .unpin_page(tree.root_page_id(), false)
        .unwrap();
    let BPlusTreePage::Internal(root) = root else {
        panic!("root should have become internal");
    };
    assert_eq!(root.header.current_size, 2);
    assert_eq!(root.key_at(1), &key(3));

    // the two leaves hold [1,2] and [3,4,5]
    let mut leaves = Vec::new();
    check_subtree(&tree, tree.root_page_id(), INVALID_PAGE_ID, &mut leaves);
    assert_eq!(leaves.len(), 2);
    assert_eq!(leaves[0].1, key(1));
    assert_eq!(leaves[0].2, key(2));
    assert_eq!(leaves[1].1, key(3));
    assert_eq!(leaves[1].2, key(5));

    assert_eq!(tree.get(&key(3)).unwrap(), Some(rid(3)));
    check_tree_integrity(&tree);
}

#[test]
fn test_split_propagates_scenario() {
    let (_temp_dir, tree) = setup_tree(50, 4, 4);
    for i in 1..=16 {
        assert!(tree.insert(&key(i), rid(i)).unwrap());
    }

    assert_eq!(check_tree_integrity(&tree), 3);

    // iteration yields 1..16 in order
    let mut iter = tree.begin().unwrap();
    let mut expected = 1u64;
    while let Some((k, v)) = iter.next().unwrap() {
        assert_eq!(k, key(expected));
        assert_eq!(v, rid(expected));
        expected += 1;
    }
    assert_eq!(expected, 17);
    assert!(iter.is_end());
}

#[test]
fn test_duplicate_insert_scenario() {
    let (_temp_dir, tree) = setup_tree(50, 4, 4);
    assert!(tree.insert(&key(7), RecordId::new(7, 0)).unwrap());
    assert!(!tree.insert(&key(7), RecordId::new(7, 1)).unwrap());
    assert_eq!(tree.get(&key(7)).unwrap(), Some(RecordId::new(7, 0)));
    check_tree_integrity(&tree);
}

#[test]
fn test_coalesce_scenario() {
    let (_temp_dir, tree) = setup_tree(50, 4, 4);
    for i in 1..=5 {
        tree.insert(&key(i), rid(i)).unwrap();
    }
    tree.delete(&key(5)).unwrap();
    tree.delete(&key(4)).unwrap();

    // the tree collapsed back to a single leaf [1,2,3]
    assert_eq!(check_tree_integrity(&tree), 1);
    let (_, root) = tree.fetch_tree_page(tree.root_page_id()).unwrap();
    tree.buffer_pool
        .unpin_page(tree.root_page_id(), false)
        .unwrap();
    assert!(root.is_leaf_page());
    assert_eq!(root.current_size(), 3);
}

#[test]
fn test_deleting_absent_keys_is_noop() {
    let (_temp_dir, tree) = setup_tree(50, 4, 4);
    for i in 1..=8 {
        tree.insert(&key(i), rid(i)).unwrap();
    }
    tree.delete(&key(100)).unwrap();
    tree.delete(&key(0)).unwrap();
    for i in 1..=8 {
        assert_eq!(tree.get(&key(i)).unwrap(), Some(rid(i)));
    }
    check_tree_integrity(&tree);
}

#[test]
fn test_random_round_trip() {
    let (_temp_dir, tree) = setup_tree(50, 4, 4);
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let mut keys: Vec<u64> = (0..200).collect();
    keys.shuffle(&mut rng);
    for i in &keys {
        assert!(tree.insert(&key(*i), rid(*i)).unwrap());
    }
    check_tree_integrity(&tree);
    for i in 0..200 {
        assert_eq!(tree.get(&key(i)).unwrap(), Some(rid(i)));
    }

    keys.shuffle(&mut rng);
    for (removed, i) in keys.iter().enumerate() {
        tree.delete(&key(*i)).unwrap();
        assert_eq!(tree.get(&key(*i)).unwrap(), None);
        if removed % 40 == 0 {
            check_tree_integrity(&tree);
        }
    }

    // the tree is empty again and the header record reflects it
    assert!(tree.is_empty());
    assert_eq!(tree.root_page_id(), INVALID_PAGE_ID);
    assert_eq!(header_root_id(&tree), Some(INVALID_PAGE_ID));
    assert_eq!(tree.buffer_pool.pinned_page_count(), 0);
}

#[test]
fn test_iteration_is_sorted_after_random_inserts() {
    let (_temp_dir, tree) = setup_tree(50, 4, 4);
    let mut rng = StdRng::seed_from_u64(42);

    let mut keys: Vec<u64> = (0..150).map(|i| i * 3).collect();
    keys.shuffle(&mut rng);
    for i in &keys {
        tree.insert(&key(*i), rid(*i)).unwrap();
    }

    let mut iter = tree.begin().unwrap();
    let mut previous: Option<Vec<u8>> = None;
    let mut count = 0;
    while let Some((k, _)) = iter.next().unwrap() {
        if let Some(previous) = &previous {
            assert!(previous < &k, "iteration must be strictly ascending");
        }
        previous = Some(k);
        count += 1;
    }
    assert_eq!(count, 150);
    check_tree_integrity(&tree);
}

#[test]
fn test_begin_at_starts_on_the_right_leaf() {
    let (_temp_dir, tree) = setup_tree(50, 4, 4);
    for i in 1..=32 {
        tree.insert(&key(i), rid(i)).unwrap();
    }

    // the iterator starts on the leaf that contains the key
    let mut iter = tree.begin_at(&key(20)).unwrap();
    let (first, _) = iter.next().unwrap().unwrap();
    assert!(first <= key(20));
    let mut seen_target = first == key(20);
    while let Some((k, _)) = iter.next().unwrap() {
        seen_target |= k == key(20);
        if k >= key(32) {
            break;
        }
    }
    assert!(seen_target);
}

#[test]
fn test_pin_conservation_across_operations() {
    let (_temp_dir, tree) = setup_tree(50, 4, 4);
    for i in 0..64 {
        tree.insert(&key(i), rid(i)).unwrap();
        assert_eq!(tree.buffer_pool.pinned_page_count(), 0);
    }
    for i in (0..64).step_by(2) {
        tree.delete(&key(i)).unwrap();
        assert_eq!(tree.buffer_pool.pinned_page_count(), 0);
    }
    tree.get(&key(1)).unwrap();
    tree.get(&key(63)).unwrap();
    tree.get(&key(1000)).unwrap();
    assert_eq!(tree.buffer_pool.pinned_page_count(), 0);
    check_tree_integrity(&tree);
}

#[test]
fn test_tree_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    {
        let disk_manager = Arc::new(DiskManager::try_new(&db_path).unwrap());
        let buffer_pool = Arc::new(BufferPoolManager::new(50, 2, disk_manager));
        let tree =
            BPlusTreeIndex::new("test_index", buffer_pool, default_comparator, 4, 4).unwrap();
        for i in 1..=40 {
            tree.insert(&key(i), rid(i)).unwrap();
        }
        tree.buffer_pool.flush_all_pages().unwrap();
    }

    // a new buffer pool over the same file finds the root via the header
    let disk_manager = Arc::new(DiskManager::try_new(&db_path).unwrap());
    let buffer_pool = Arc::new(BufferPoolManager::new(50, 2, disk_manager));
    let tree = BPlusTreeIndex::new("test_index", buffer_pool, default_comparator, 4, 4).unwrap();
    assert!(!tree.is_empty());
    for i in 1..=40 {
        assert_eq!(tree.get(&key(i)).unwrap(), Some(rid(i)));
    }
    check_tree_integrity(&tree);
}

#[test]
fn test_two_indexes_share_the_header_page() {
    let temp_dir = TempDir::new().unwrap();
    let disk_manager = Arc::new(DiskManager::try_new(temp_dir.path().join("test.db")).unwrap());
    let buffer_pool = Arc::new(BufferPoolManager::new(50, 2, disk_manager));

    let orders =
        BPlusTreeIndex::new("orders_pk", buffer_pool.clone(), default_comparator, 4, 4).unwrap();
    let users =
        BPlusTreeIndex::new("users_pk", buffer_pool.clone(), default_comparator, 4, 4).unwrap();

    orders.insert(&key(1), rid(1)).unwrap();
    users.insert(&key(2), rid(2)).unwrap();

    assert_ne!(orders.root_page_id(), users.root_page_id());
    assert_eq!(orders.get(&key(1)).unwrap(), Some(rid(1)));
    assert_eq!(orders.get(&key(2)).unwrap(), None);
    assert_eq!(users.get(&key(2)).unwrap(), Some(rid(2)));

    let header_page = buffer_pool.fetch_page(HEADER_PAGE_ID).unwrap();
    let (header, _) = HeaderPageCodec::decode(header_page.read().data()).unwrap();
    buffer_pool.unpin_page(HEADER_PAGE_ID, false).unwrap();
    assert_eq!(header.get_root_id("orders_pk"), Some(orders.root_page_id()));
    assert_eq!(header.get_root_id("users_pk"), Some(users.root_page_id()));
}

#[test]
fn test_default_configs() {
    let temp_dir = TempDir::new().unwrap();
    let disk_manager = Arc::new(DiskManager::try_new(temp_dir.path().join("test.db")).unwrap());
    let buffer_pool = Arc::new(BufferPoolManager::with_config(
        BufferPoolConfig::default(),
        disk_manager,
    ));
    let tree = BPlusTreeIndex::with_config(
        "test_index",
        buffer_pool,
        default_comparator,
        BTreeConfig::default(),
    )
    .unwrap();

    for i in 0..100 {
        tree.insert(&key(i), rid(i)).unwrap();
    }
    for i in 0..100 {
        assert_eq!(tree.get(&key(i)).unwrap(), Some(rid(i)));
    }
    check_tree_integrity(&tree);
}

#[test]
fn test_unique_keys_keep_first_value() {
    let (_temp_dir, tree) = setup_tree(50, 4, 4);
    let mut rng = StdRng::seed_from_u64(7);

    let mut keys: Vec<u64> = (0..60).collect();
    keys.shuffle(&mut rng);
    for i in &keys {
        assert!(tree.insert(&key(*i), rid(*i)).unwrap());
    }
    // a second pass with different values changes nothing
    for i in &keys {
        assert!(!tree.insert(&key(*i), RecordId::new(-7, 99)).unwrap());
    }
    for i in 0..60 {
        assert_eq!(tree.get(&key(i)).unwrap(), Some(rid(i)));
    }
    check_tree_integrity(&tree);
}
