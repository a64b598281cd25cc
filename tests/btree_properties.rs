use kdb::access::{BTree, BTreeConfig};
use kdb::storage::page::cell::{self, Cell, Key};
use kdb::storage::page::{
    BTreeInternalPage, BTreeLeafPage, InternalHeader, LeafHeader, Node, Page, PageId,
};
use kdb::storage::{Pager, StorageError, PAGE_SIZE};
use proptest::collection::{btree_set, vec};
use proptest::prelude::*;
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use std::collections::BTreeSet;
use tempfile::tempdir;

const LEAF_POINTER_CAPACITY: usize = (PAGE_SIZE - 20) / 4;
const INTERNAL_KEY_CAPACITY: usize = (PAGE_SIZE - 20) / 8;

fn fresh_tree(config: BTreeConfig) -> (BTree, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let pager = Pager::create(&dir.path().join("prop.db")).unwrap();
    (BTree::new_tree(pager, config).unwrap(), dir)
}

fn insert(tree: &mut BTree, key: Key) {
    tree.insert(Cell::new(key, &key.to_be_bytes()).as_bytes()).unwrap();
}

fn scan(tree: &BTree) -> Vec<Key> {
    tree.cursor()
        .unwrap()
        .map(|entry| cell::key_of(&entry.unwrap()).unwrap())
        .collect()
}

fn small_config() -> impl Strategy<Value = BTreeConfig> {
    (2usize..=6, 2usize..=5).prop_map(|(leaf, internal)| BTreeConfig::new(leaf, internal).unwrap())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn leaf_header_round_trip(
        is_root in any::<bool>(),
        parent in any::<u32>(),
        allocation_pointer in any::<u32>(),
        pointers in vec(any::<u32>(), 0..LEAF_POINTER_CAPACITY),
    ) {
        let header = LeafHeader {
            is_root,
            parent_page_num: PageId(parent),
            allocation_pointer,
            cell_pointers: pointers,
        };
        let decoded = LeafHeader::decode(PageId(0), &header.encode()).unwrap();
        prop_assert_eq!(decoded, header);
    }

    #[test]
    fn internal_header_round_trip(
        is_root in any::<bool>(),
        parent in any::<u32>(),
        right in any::<u32>(),
        entries in vec((any::<u32>(), any::<u32>()), 0..INTERNAL_KEY_CAPACITY),
    ) {
        let header = InternalHeader {
            is_root,
            parent_page_num: PageId(parent),
            keys: entries.iter().map(|(k, _)| *k).collect(),
            children: entries.iter().map(|(_, c)| PageId(*c)).collect(),
            right_child_page_num: PageId(right),
        };
        let page = BTreeInternalPage::new(PageId(1), header.clone());
        let decoded = InternalHeader::decode(PageId(1), &page.data()[..]).unwrap();
        prop_assert_eq!(decoded.children.len(), decoded.keys.len());
        prop_assert_eq!(decoded, header);
    }

    #[test]
    fn traversal_is_sorted_and_complete(
        keys in btree_set(any::<u32>(), 0..300),
        seed in any::<u64>(),
        config in small_config(),
    ) {
        let (mut tree, _dir) = fresh_tree(config);
        let mut order: Vec<Key> = keys.iter().copied().collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        for key in &order {
            insert(&mut tree, *key);
        }

        tree.check_invariants().unwrap();
        let expected: Vec<Key> = keys.into_iter().collect();
        prop_assert_eq!(scan(&tree), expected);
    }

    #[test]
    fn delete_then_search_misses(
        n in 1u32..150,
        pick in any::<prop::sample::Index>(),
        config in small_config(),
    ) {
        let (mut tree, _dir) = fresh_tree(config);
        for key in 1..=n {
            insert(&mut tree, key);
        }
        let k = pick.index(n as usize) as u32 + 1;

        prop_assert!(tree.delete(k).unwrap());
        prop_assert!(matches!(tree.search(k), Err(StorageError::KeyNotFound(key)) if key == k));
        tree.check_invariants().unwrap();
        let expected: Vec<Key> = (1..=n).filter(|&key| key != k).collect();
        prop_assert_eq!(scan(&tree), expected);
    }

    #[test]
    fn mixed_workload_matches_model(
        ops in vec((any::<bool>(), 0u32..200), 1..400),
        config in small_config(),
    ) {
        let (mut tree, _dir) = fresh_tree(config);
        let mut model = BTreeSet::new();

        for (is_insert, key) in ops {
            if is_insert {
                let result = tree.insert(Cell::new(key, b"v").as_bytes());
                if model.insert(key) {
                    prop_assert!(result.is_ok());
                } else {
                    prop_assert!(matches!(result, Err(StorageError::DuplicateKey(_))));
                }
            } else {
                prop_assert_eq!(tree.delete(key).unwrap(), model.remove(&key));
            }
        }

        tree.check_invariants().unwrap();
        prop_assert_eq!(scan(&tree), model.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn single_split_partitions_around_separator(leaf_max in 2usize..=12) {
        let config = BTreeConfig::new(leaf_max, 3).unwrap();
        let (mut tree, _dir) = fresh_tree(config);
        for key in 1..=(leaf_max as u32 + 1) {
            insert(&mut tree, key);
        }

        let pager = tree.pager().clone();
        let root = tree.root_page_num();
        let header = match Node::decode(root, &pager.get_page(root).unwrap()).unwrap() {
            Node::Internal(header) => header,
            Node::Leaf(_) => panic!("expected an internal root"),
        };
        prop_assert_eq!(header.keys.len(), 1);
        let separator = header.keys[0];

        let leaf_keys = |page: PageId| {
            BTreeLeafPage::from_data(page, pager.get_page(page).unwrap())
                .unwrap()
                .keys()
        };
        let left = leaf_keys(header.children[0]);
        let right = leaf_keys(header.right_child_page_num);

        prop_assert_eq!(left.len() + right.len(), leaf_max + 1);
        prop_assert!(left.iter().all(|&k| k <= separator));
        prop_assert!(right.iter().all(|&k| k > separator));
        prop_assert_eq!(tree.height().unwrap(), 2);
    }
}

#[test]
fn lazy_init_is_idempotent() {
    let dir = tempdir().unwrap();
    let pager = Pager::create(&dir.path().join("lazy.db")).unwrap();
    let page = pager.get_free_page().unwrap();

    let first = Node::decode(page, &pager.get_page(page).unwrap()).unwrap();
    let second = Node::decode(page, &pager.get_page(page).unwrap()).unwrap();
    assert_eq!(first, second);
    assert!(pager.get_page(page).unwrap().iter().all(|&b| b == 0));

    let tree = BTree::open(pager.clone(), page, BTreeConfig::default()).unwrap();
    tree.find(5).unwrap();
    let formatted = pager.get_page(page).unwrap();
    tree.find(5).unwrap();
    assert_eq!(&formatted[..], &pager.get_page(page).unwrap()[..]);
}
