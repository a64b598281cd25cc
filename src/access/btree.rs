//! Disk-backed B+-tree over the page arena.
//!
//! Nodes reference each other only by page number and every node is re-read
//! from the [`Pager`] when it is needed, so no page content is held across
//! calls. Separators are max-keyed: `keys[i]` is the largest key stored under
//! `children[i]`, and a lookup key equal to a separator descends left.

pub mod config;
pub mod cursor;
mod delete;

pub use self::config::BTreeConfig;
pub use self::cursor::Cursor;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::cell::{self, Key};
use crate::storage::page::{
    node_type_of, BTreeInternalPage, BTreeLeafPage, InternalHeader, Node, NodeType, Page, PageId,
};
use crate::storage::{Pager, PAGE_SIZE};
use log::debug;
use std::fmt::Write as _;

pub struct BTree {
    pager: Pager,
    root_page: PageId,
    config: BTreeConfig,
}

impl BTree {
    /// Create an empty tree whose root is a fresh leaf page.
    pub fn new_tree(pager: Pager, config: BTreeConfig) -> StorageResult<Self> {
        config.validate()?;

        let root_page = pager.get_free_page()?;
        let root = BTreeLeafPage::new(root_page, true, root_page);
        pager.write_page(root_page, root.data())?;
        debug!("created tree with root leaf {}", root_page);

        Ok(Self {
            pager,
            root_page,
            config,
        })
    }

    /// Open an existing tree rooted at `root_page`. A never-written root is
    /// formatted as an empty leaf on first access.
    pub fn open(pager: Pager, root_page: PageId, config: BTreeConfig) -> StorageResult<Self> {
        config.validate()?;

        let data = pager.get_page(root_page)?;
        if node_type_of(root_page, &data[..])? != NodeType::Uninitialized {
            let node = Node::decode(root_page, &data)?;
            if !node.is_root() {
                return Err(StorageError::corrupt_page(
                    root_page,
                    "page is not marked as a tree root",
                ));
            }
        }

        Ok(Self {
            pager,
            root_page,
            config,
        })
    }

    pub fn root_page_num(&self) -> PageId {
        self.root_page
    }

    pub fn config(&self) -> &BTreeConfig {
        &self.config
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    /// Page number of the leaf that owns `key`.
    pub fn find(&self, key: Key) -> StorageResult<PageId> {
        let mut page_id = self.root_page;
        let mut depth = 0u32;

        loop {
            let data = self.pager.get_page(page_id)?;
            match node_type_of(page_id, &data[..])? {
                NodeType::Leaf => return Ok(page_id),
                NodeType::Uninitialized => {
                    self.format_empty_leaf(page_id)?;
                    return Ok(page_id);
                }
                NodeType::Internal => {
                    let header = InternalHeader::decode(page_id, &data[..])?;
                    page_id = header.child_for(key);
                }
            }

            depth += 1;
            if depth > self.pager.num_pages() {
                return Err(StorageError::corrupt_page(page_id, "cycle in child pointers"));
            }
        }
    }

    /// Insert a framed cell. Fails with `DuplicateKey` if its key is present and
    /// with `PageOverflow` if the cell exceeds the configured maximum size.
    pub fn insert(&mut self, cell: &[u8]) -> StorageResult<()> {
        let (key, size) = cell::read_cell(cell, 0)?;
        let cell = &cell[..size];

        let max_size = self.config.max_cell_size();
        if size > max_size {
            return Err(StorageError::PageOverflow {
                required: size,
                available: max_size,
            });
        }

        loop {
            let leaf_id = self.find(key)?;
            let mut leaf = self.load_leaf(leaf_id)?;
            if leaf.search(key).is_ok() {
                return Err(StorageError::DuplicateKey(key));
            }

            if leaf.num_cells() < self.config.leaf_max_cells {
                leaf.insert_cell(cell)?;
                return self.store_leaf(&leaf);
            }

            self.split_leaf(leaf)?;
        }
    }

    /// Point lookup returning the stored cell.
    pub fn search(&self, key: Key) -> StorageResult<Vec<u8>> {
        self.get(key)?.ok_or(StorageError::KeyNotFound(key))
    }

    pub fn get(&self, key: Key) -> StorageResult<Option<Vec<u8>>> {
        let leaf = self.load_leaf(self.find(key)?)?;
        Ok(leaf
            .search(key)
            .ok()
            .and_then(|index| leaf.cell(index))
            .map(|cell| cell.to_vec()))
    }

    pub fn contains(&self, key: Key) -> StorageResult<bool> {
        let leaf = self.load_leaf(self.find(key)?)?;
        Ok(leaf.search(key).is_ok())
    }

    /// Replace the cell stored under `key` with `new_cell`. Returns `Ok(false)`
    /// if `key` is absent. When the new cell carries a different key the row is
    /// moved, which fails with `DuplicateKey` if that key is already taken.
    pub fn update(&mut self, key: Key, new_cell: &[u8]) -> StorageResult<bool> {
        let (new_key, size) = cell::read_cell(new_cell, 0)?;
        let new_cell = &new_cell[..size];

        let max_size = self.config.max_cell_size();
        if size > max_size {
            return Err(StorageError::PageOverflow {
                required: size,
                available: max_size,
            });
        }

        let leaf_id = self.find(key)?;
        let mut leaf = self.load_leaf(leaf_id)?;
        let index = match leaf.search(key) {
            Ok(index) => index,
            Err(_) => return Ok(false),
        };

        if new_key == key {
            leaf.remove_cell(index);
            leaf.insert_cell(new_cell)?;
            self.store_leaf(&leaf)?;
            return Ok(true);
        }

        if self.contains(new_key)? {
            return Err(StorageError::DuplicateKey(new_key));
        }
        self.delete(key)?;
        self.insert(new_cell)?;
        Ok(true)
    }

    /// Number of levels, counting the leaves. A tree whose root is a leaf has height 1.
    pub fn height(&self) -> StorageResult<usize> {
        let mut page_id = self.root_page;
        let mut height = 1;

        loop {
            match self.load_node(page_id)? {
                Node::Leaf(_) => return Ok(height),
                Node::Internal(header) => {
                    page_id = header.child_at(0).unwrap_or(header.right_child_page_num);
                    height += 1;
                }
            }
            if height > self.pager.num_pages() as usize + 1 {
                return Err(StorageError::corrupt_page(page_id, "cycle in child pointers"));
            }
        }
    }

    /// Number of cells in the tree.
    pub fn len(&self) -> StorageResult<usize> {
        let mut count = 0;
        for cell in self.cursor()? {
            cell?;
            count += 1;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.cursor()?.at_end())
    }

    /// Cursor positioned at the smallest key.
    pub fn cursor(&self) -> StorageResult<Cursor> {
        Cursor::new(self.pager.clone(), self)
    }

    /// Indented dump of the tree, one line per page.
    pub fn describe(&self) -> StorageResult<String> {
        let mut out = String::new();
        self.describe_node(self.root_page, 0, &mut out)?;
        Ok(out)
    }

    fn describe_node(&self, page_id: PageId, depth: usize, out: &mut String) -> StorageResult<()> {
        let indent = "  ".repeat(depth);
        match self.load_node(page_id)? {
            Node::Leaf(_) => {
                let leaf = self.load_leaf(page_id)?;
                let _ = writeln!(out, "{}leaf {} keys={:?}", indent, page_id, leaf.keys());
            }
            Node::Internal(header) => {
                let _ = writeln!(out, "{}internal {} keys={:?}", indent, page_id, header.keys);
                for child in header.all_children() {
                    self.describe_node(child, depth + 1, out)?;
                }
            }
        }
        Ok(())
    }

    /// Walk the whole tree and verify its structure: root and parent links,
    /// node occupancy, sorted leaves, separators equal to subtree maxima, and
    /// every leaf at the same depth.
    pub fn check_invariants(&self) -> StorageResult<()> {
        self.check_node(self.root_page, self.root_page, None, None, 0)
            .map(|_| ())
    }

    /// Returns the subtree maximum and the depth of its leaves.
    fn check_node(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        lower: Option<Key>,
        upper: Option<Key>,
        depth: usize,
    ) -> StorageResult<(Option<Key>, usize)> {
        let corrupt = |reason: String| StorageError::corrupt_page(page_id, reason);
        let is_root = page_id == self.root_page;

        if depth > self.pager.num_pages() as usize {
            return Err(corrupt("cycle in child pointers".to_string()));
        }

        let node = self.load_node(page_id)?;
        if node.is_root() != is_root {
            return Err(corrupt(format!("is_root flag is {}", node.is_root())));
        }
        if node.parent_page_num() != expected_parent {
            return Err(corrupt(format!(
                "parent is {} but expected {}",
                node.parent_page_num(),
                expected_parent
            )));
        }

        let in_range = |key: Key| lower.map_or(true, |l| key > l) && upper.map_or(true, |u| key <= u);

        match node {
            Node::Leaf(_) => {
                let leaf = self.load_leaf(page_id)?;
                leaf.validate()?;

                let n = leaf.num_cells();
                if n > self.config.leaf_max_cells {
                    return Err(corrupt(format!("leaf holds {} cells", n)));
                }
                if !is_root && n < self.config.leaf_min_cells() {
                    return Err(corrupt(format!("leaf underflow with {} cells", n)));
                }
                if let Some(key) = leaf.keys().into_iter().find(|&k| !in_range(k)) {
                    return Err(corrupt(format!(
                        "key {} outside ({:?}, {:?}]",
                        key, lower, upper
                    )));
                }

                Ok((leaf.max_key(), depth))
            }
            Node::Internal(header) => {
                BTreeInternalPage::new(page_id, header.clone()).validate()?;

                let n = header.num_keys();
                if n > self.config.internal_max_keys {
                    return Err(corrupt(format!("internal node holds {} keys", n)));
                }
                let min = if is_root { 1 } else { self.config.internal_min_keys() };
                if n < min {
                    return Err(corrupt(format!("internal underflow with {} keys", n)));
                }
                if let Some(&key) = header.keys.iter().find(|&&k| !in_range(k)) {
                    return Err(corrupt(format!(
                        "separator {} outside ({:?}, {:?}]",
                        key, lower, upper
                    )));
                }

                let mut leaf_depth = None;
                let mut subtree_max = None;
                for (i, child) in header.all_children().into_iter().enumerate() {
                    let child_lower = if i == 0 { lower } else { Some(header.keys[i - 1]) };
                    let child_upper = if i < n { Some(header.keys[i]) } else { upper };
                    let (max, d) = self.check_node(child, page_id, child_lower, child_upper, depth + 1)?;

                    if i < n && max != Some(header.keys[i]) {
                        return Err(corrupt(format!(
                            "separator {} but child {} holds max {:?}",
                            header.keys[i], child, max
                        )));
                    }
                    if *leaf_depth.get_or_insert(d) != d {
                        return Err(corrupt("leaves at different depths".to_string()));
                    }
                    subtree_max = max;
                }

                Ok((subtree_max, leaf_depth.unwrap_or(depth)))
            }
        }
    }

    fn split_leaf(&mut self, mut leaf: BTreeLeafPage) -> StorageResult<()> {
        let cells = leaf.cells();
        let total = cells.len();
        let left_count = total - total / 2;
        let separator = cell::key_of(&cells[left_count - 1])?;

        let left_id = leaf.page_id();
        let right_id = self.pager.get_free_page()?;

        if leaf.is_root() {
            let root_id = self.pager.get_free_page()?;

            leaf.set_is_root(false);
            leaf.set_parent_page_num(root_id);
            leaf.set_cells(&cells[..left_count])?;
            let mut right = BTreeLeafPage::new(right_id, false, root_id);
            right.set_cells(&cells[left_count..])?;
            self.store_leaf(&leaf)?;
            self.store_leaf(&right)?;

            let root = InternalHeader {
                is_root: true,
                parent_page_num: root_id,
                keys: vec![separator],
                children: vec![left_id],
                right_child_page_num: right_id,
            };
            self.store_internal(root_id, root)?;
            self.root_page = root_id;

            debug!(
                "split root leaf {} -> [{}, {}] under new root {} (separator {})",
                left_id, left_id, right_id, root_id, separator
            );
            return Ok(());
        }

        let parent_id = leaf.parent_page_num();
        leaf.set_cells(&cells[..left_count])?;
        let mut right = BTreeLeafPage::new(right_id, false, parent_id);
        right.set_cells(&cells[left_count..])?;
        self.store_leaf(&leaf)?;
        self.store_leaf(&right)?;
        debug!(
            "split leaf {} -> [{}, {}] (separator {})",
            left_id, left_id, right_id, separator
        );

        self.insert_into_parent(parent_id, left_id, separator, right_id)
    }

    /// Register `right_id` as the sibling directly after `left_id`, with
    /// `separator` now the maximum of `left_id`.
    fn insert_into_parent(
        &mut self,
        parent_id: PageId,
        left_id: PageId,
        separator: Key,
        right_id: PageId,
    ) -> StorageResult<()> {
        let mut header = self.load_internal(parent_id)?;
        let index = header.child_index(left_id).ok_or_else(|| {
            StorageError::corrupt_page(parent_id, format!("page {} is not a child", left_id))
        })?;

        let mut keys = header.keys.clone();
        let mut children = header.all_children();
        keys.insert(index, separator);
        children.insert(index + 1, right_id);

        if keys.len() <= self.config.internal_max_keys {
            header.set_children(keys, children);
            return self.store_internal(parent_id, header);
        }

        self.split_internal(parent_id, header, keys, children)
    }

    /// Split an internal node that would hold `keys`/`children`, promoting the
    /// middle separator.
    fn split_internal(
        &mut self,
        page_id: PageId,
        header: InternalHeader,
        keys: Vec<Key>,
        children: Vec<PageId>,
    ) -> StorageResult<()> {
        let mid = keys.len() / 2;
        let promoted = keys[mid];
        let right_id = self.pager.get_free_page()?;

        let left_keys = keys[..mid].to_vec();
        let left_children = children[..mid + 1].to_vec();
        let right_keys = keys[mid + 1..].to_vec();
        let right_children = children[mid + 1..].to_vec();

        let (parent_id, new_root) = if header.is_root {
            let root_id = self.pager.get_free_page()?;
            (root_id, true)
        } else {
            (header.parent_page_num, false)
        };

        let left = InternalHeader::from_children(false, parent_id, left_keys, left_children);
        let right = InternalHeader::from_children(false, parent_id, right_keys, right_children);
        let moved = right.all_children();
        self.store_internal(page_id, left)?;
        self.store_internal(right_id, right)?;
        for child in moved {
            self.set_parent(child, right_id)?;
        }

        if new_root {
            let root = InternalHeader {
                is_root: true,
                parent_page_num: parent_id,
                keys: vec![promoted],
                children: vec![page_id],
                right_child_page_num: right_id,
            };
            self.store_internal(parent_id, root)?;
            self.root_page = parent_id;
            debug!(
                "split root internal {} -> [{}, {}] under new root {} (separator {})",
                page_id, page_id, right_id, parent_id, promoted
            );
            return Ok(());
        }

        debug!(
            "split internal {} -> [{}, {}] (separator {})",
            page_id, page_id, right_id, promoted
        );
        self.insert_into_parent(parent_id, page_id, promoted, right_id)
    }

    fn format_empty_leaf(&self, page_id: PageId) -> StorageResult<BTreeLeafPage> {
        let leaf = BTreeLeafPage::new(page_id, page_id == self.root_page, page_id);
        self.pager.write_page(page_id, leaf.data())?;
        debug!("formatted uninitialized page {} as empty leaf", page_id);
        Ok(leaf)
    }

    pub(crate) fn load_node(&self, page_id: PageId) -> StorageResult<Node> {
        let data = self.pager.get_page(page_id)?;
        if node_type_of(page_id, &data[..])? == NodeType::Uninitialized {
            return Ok(Node::Leaf(self.format_empty_leaf(page_id)?.header()));
        }
        Node::decode(page_id, &data)
    }

    pub(crate) fn load_leaf(&self, page_id: PageId) -> StorageResult<BTreeLeafPage> {
        let data = self.pager.get_page(page_id)?;
        match node_type_of(page_id, &data[..])? {
            NodeType::Leaf => BTreeLeafPage::from_data(page_id, data),
            NodeType::Uninitialized => self.format_empty_leaf(page_id),
            NodeType::Internal => Err(StorageError::corrupt_page(page_id, "expected a leaf")),
        }
    }

    pub(crate) fn load_internal(&self, page_id: PageId) -> StorageResult<InternalHeader> {
        let data = self.pager.get_page(page_id)?;
        InternalHeader::decode(page_id, &data[..])
    }

    pub(crate) fn store_leaf(&self, leaf: &BTreeLeafPage) -> StorageResult<()> {
        self.pager.write_page(leaf.page_id(), leaf.data())
    }

    pub(crate) fn store_internal(&self, page_id: PageId, header: InternalHeader) -> StorageResult<()> {
        if header.encoded_len() > PAGE_SIZE {
            return Err(StorageError::PageOverflow {
                required: header.encoded_len(),
                available: PAGE_SIZE,
            });
        }
        let page = BTreeInternalPage::new(page_id, header);
        self.pager.write_page(page_id, page.data())
    }

    /// Rewrite the root flag and parent link of any node.
    pub(crate) fn relink(&self, page_id: PageId, is_root: bool, parent: PageId) -> StorageResult<()> {
        match self.load_node(page_id)? {
            Node::Internal(mut header) => {
                header.is_root = is_root;
                header.parent_page_num = parent;
                self.store_internal(page_id, header)
            }
            Node::Leaf(_) => {
                let mut leaf = self.load_leaf(page_id)?;
                leaf.set_is_root(is_root);
                leaf.set_parent_page_num(parent);
                self.store_leaf(&leaf)
            }
        }
    }

    pub(crate) fn set_parent(&self, page_id: PageId, parent: PageId) -> StorageResult<()> {
        self.relink(page_id, false, parent)
    }
}
