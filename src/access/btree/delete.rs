//! Deletion and underflow repair.
//!
//! A non-root node that drops below its minimum first tries to borrow from
//! an adjacent sibling under the same parent; if the pair cannot be split
//! into two nodes at or above the minimum it is merged into the left node and
//! the parent loses one separator, which may cascade upward. An internal root
//! left without separators is replaced by its only child.

use super::BTree;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::cell::{self, Key};
use crate::storage::page::{InternalHeader, PageId};
use log::debug;

impl BTree {
    /// Remove the cell stored under `key`. Returns `Ok(false)` if it is absent.
    pub fn delete(&mut self, key: Key) -> StorageResult<bool> {
        let leaf_id = self.find(key)?;
        let mut leaf = self.load_leaf(leaf_id)?;
        let index = match leaf.search(key) {
            Ok(index) => index,
            Err(_) => return Ok(false),
        };

        let removed_max = index + 1 == leaf.num_cells();
        leaf.remove_cell(index);
        self.store_leaf(&leaf)?;

        if leaf.is_root() {
            return Ok(true);
        }

        let parent_id = leaf.parent_page_num();
        if leaf.num_cells() < self.config.leaf_min_cells() {
            self.rebalance_leaf(leaf_id, parent_id)?;
        } else if removed_max {
            if let Some(max) = leaf.max_key() {
                self.update_separator(leaf_id, parent_id, max)?;
            }
        }

        Ok(true)
    }

    /// Record `new_max` as the maximum of the subtree at `child`. The separator
    /// describing a subtree lives at the first ancestor where the subtree is not
    /// the rightmost child; rightmost children have no separator of their own.
    fn update_separator(&self, child: PageId, parent: PageId, new_max: Key) -> StorageResult<()> {
        let mut child = child;
        let mut parent_id = parent;

        loop {
            let mut header = self.load_internal(parent_id)?;
            let index = child_position(&header, parent_id, child)?;

            if index < header.num_keys() {
                if header.keys[index] != new_max {
                    header.keys[index] = new_max;
                    self.store_internal(parent_id, header)?;
                }
                return Ok(());
            }
            if header.is_root {
                return Ok(());
            }

            child = parent_id;
            parent_id = header.parent_page_num;
        }
    }

    /// Pick the sibling pair used to repair `child`: the left neighbour if
    /// there is one, otherwise the right. Returns the index of the left member.
    fn sibling_pair(
        &self,
        parent: &InternalHeader,
        parent_id: PageId,
        child: PageId,
    ) -> StorageResult<usize> {
        let index = child_position(parent, parent_id, child)?;
        if parent.num_keys() == 0 {
            return Err(StorageError::corrupt_page(
                parent_id,
                "internal node without separators has no siblings",
            ));
        }
        Ok(index.saturating_sub(1))
    }

    fn rebalance_leaf(&mut self, leaf_id: PageId, parent_id: PageId) -> StorageResult<()> {
        let mut parent = self.load_internal(parent_id)?;
        let j = self.sibling_pair(&parent, parent_id, leaf_id)?;
        let children = parent.all_children();
        let (left_id, right_id) = (children[j], children[j + 1]);

        let mut left = self.load_leaf(left_id)?;
        let mut right = self.load_leaf(right_id)?;
        let mut cells = left.cells();
        cells.extend(right.cells());
        let total = cells.len();

        let merged_max = match cells.last() {
            Some(last) => cell::key_of(last)?,
            None => return Err(StorageError::corrupt_page(parent_id, "sibling leaves both empty")),
        };

        if total >= 2 * self.config.leaf_min_cells() {
            let left_count = total - total / 2;
            let separator = cell::key_of(&cells[left_count - 1])?;

            left.set_cells(&cells[..left_count])?;
            right.set_cells(&cells[left_count..])?;
            self.store_leaf(&left)?;
            self.store_leaf(&right)?;

            parent.keys[j] = separator;
            self.store_internal(parent_id, parent)?;
            debug!(
                "redistributed leaves {} and {} ({} + {} cells, separator {})",
                left_id,
                right_id,
                left_count,
                total - left_count,
                separator
            );

            return self.update_separator(right_id, parent_id, merged_max);
        }

        left.set_cells(&cells)?;
        self.store_leaf(&left)?;

        let mut keys = parent.keys.clone();
        let mut children = children;
        keys.remove(j);
        children.remove(j + 1);
        parent.set_children(keys, children);
        self.store_internal(parent_id, parent)?;
        debug!("merged leaf {} into {} ({} cells)", right_id, left_id, total);

        self.update_separator(left_id, parent_id, merged_max)?;
        self.rebalance_internal(parent_id)
    }

    fn rebalance_internal(&mut self, page_id: PageId) -> StorageResult<()> {
        let header = self.load_internal(page_id)?;

        if header.is_root {
            if header.num_keys() == 0 {
                let new_root = header.right_child_page_num;
                self.relink(new_root, true, new_root)?;
                self.root_page = new_root;
                debug!("collapsed root {} into child {}", page_id, new_root);
            }
            return Ok(());
        }

        let min = self.config.internal_min_keys();
        if header.num_keys() >= min {
            return Ok(());
        }

        let parent_id = header.parent_page_num;
        let mut parent = self.load_internal(parent_id)?;
        let j = self.sibling_pair(&parent, parent_id, page_id)?;
        let siblings = parent.all_children();
        let (left_id, right_id) = (siblings[j], siblings[j + 1]);

        let mut left = self.load_internal(left_id)?;
        let mut right = self.load_internal(right_id)?;
        let left_before = left.all_children();
        let right_before = right.all_children();

        let mut keys = left.keys.clone();
        keys.push(parent.keys[j]);
        keys.extend_from_slice(&right.keys);
        let mut children = left_before.clone();
        children.extend_from_slice(&right_before);

        if keys.len() >= 2 * min + 1 {
            let mid = keys.len() / 2;
            let separator = keys[mid];

            left.set_children(keys[..mid].to_vec(), children[..mid + 1].to_vec());
            right.set_children(keys[mid + 1..].to_vec(), children[mid + 1..].to_vec());
            let left_after = left.all_children();
            let right_after = right.all_children();
            self.store_internal(left_id, left)?;
            self.store_internal(right_id, right)?;

            for &child in left_after.iter().filter(|c| !left_before.contains(c)) {
                self.set_parent(child, left_id)?;
            }
            for &child in right_after.iter().filter(|c| !right_before.contains(c)) {
                self.set_parent(child, right_id)?;
            }

            parent.keys[j] = separator;
            self.store_internal(parent_id, parent)?;
            debug!(
                "redistributed internal nodes {} and {} (separator {})",
                left_id, right_id, separator
            );
            return Ok(());
        }

        left.set_children(keys, children);
        self.store_internal(left_id, left)?;
        for &child in &right_before {
            self.set_parent(child, left_id)?;
        }

        let mut parent_keys = parent.keys.clone();
        parent_keys.remove(j);
        let mut parent_children = siblings;
        parent_children.remove(j + 1);
        parent.set_children(parent_keys, parent_children);
        self.store_internal(parent_id, parent)?;
        debug!("merged internal node {} into {}", right_id, left_id);

        self.rebalance_internal(parent_id)
    }
}

fn child_position(header: &InternalHeader, parent_id: PageId, child: PageId) -> StorageResult<usize> {
    header.child_index(child).ok_or_else(|| {
        StorageError::corrupt_page(parent_id, format!("page {} is not a child", child))
    })
}
