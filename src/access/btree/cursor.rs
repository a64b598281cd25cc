//! In-order traversal over the leaves of a tree.
//!
//! The cursor keeps only a `(page, cell index)` position. Moving past the
//! last cell of a leaf climbs parent links to the first ancestor where the
//! current subtree is not the rightmost child, then descends along first
//! children into the next leaf. Pages are re-read on every step.

use super::BTree;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{node_type_of, BTreeLeafPage, InternalHeader, Node, NodeType, PageId};
use crate::storage::Pager;

pub struct Cursor {
    pager: Pager,
    root_page: PageId,
    page_id: PageId,
    cell_index: usize,
    end: bool,
    pending: Option<StorageError>,
}

impl Cursor {
    /// Position a cursor at the smallest key of `tree`.
    pub fn new(pager: Pager, tree: &BTree) -> StorageResult<Self> {
        let root_page = tree.root_page_num();
        let mut cursor = Self {
            pager,
            root_page,
            page_id: root_page,
            cell_index: 0,
            end: false,
            pending: None,
        };
        cursor.page_id = cursor.leftmost_leaf(root_page)?;
        cursor.settle()?;
        Ok(cursor)
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn cell_index(&self) -> usize {
        self.cell_index
    }

    pub fn at_end(&self) -> bool {
        self.end
    }

    /// The cell under the cursor, or `None` once the traversal is exhausted.
    pub fn current(&self) -> StorageResult<Option<Vec<u8>>> {
        if self.end {
            return Ok(None);
        }
        Ok(self
            .read_leaf(self.page_id)?
            .and_then(|leaf| leaf.cell(self.cell_index).map(|cell| cell.to_vec())))
    }

    /// Step to the next cell in key order. Has no effect at the end.
    pub fn advance(&mut self) -> StorageResult<()> {
        if self.end {
            return Ok(());
        }
        self.cell_index += 1;
        self.settle()
    }

    /// Move forward until the position names an existing cell or the end is reached.
    fn settle(&mut self) -> StorageResult<()> {
        while !self.end {
            let num_cells = self
                .read_leaf(self.page_id)?
                .map_or(0, |leaf| leaf.num_cells());
            if self.cell_index < num_cells {
                return Ok(());
            }
            self.next_leaf()?;
        }
        Ok(())
    }

    fn next_leaf(&mut self) -> StorageResult<()> {
        let mut child = self.page_id;

        loop {
            if child == self.root_page {
                self.end = true;
                return Ok(());
            }

            let data = self.pager.get_page(child)?;
            let node = Node::decode(child, &data)?;
            if node.is_root() {
                self.end = true;
                return Ok(());
            }

            let parent_id = node.parent_page_num();
            let parent = InternalHeader::decode(parent_id, &self.pager.get_page(parent_id)?[..])?;
            let index = parent.child_index(child).ok_or_else(|| {
                StorageError::corrupt_page(parent_id, format!("page {} is not a child", child))
            })?;

            if index < parent.num_keys() {
                if let Some(next) = parent.child_at(index + 1) {
                    self.page_id = self.leftmost_leaf(next)?;
                    self.cell_index = 0;
                    return Ok(());
                }
            }

            child = parent_id;
        }
    }

    fn leftmost_leaf(&self, start: PageId) -> StorageResult<PageId> {
        let mut page_id = start;
        let mut depth = 0u32;

        loop {
            let data = self.pager.get_page(page_id)?;
            match node_type_of(page_id, &data[..])? {
                NodeType::Leaf | NodeType::Uninitialized => return Ok(page_id),
                NodeType::Internal => {
                    let header = InternalHeader::decode(page_id, &data[..])?;
                    page_id = header.child_at(0).unwrap_or(header.right_child_page_num);
                }
            }

            depth += 1;
            if depth > self.pager.num_pages() {
                return Err(StorageError::corrupt_page(page_id, "cycle in child pointers"));
            }
        }
    }

    /// The leaf at `page_id`, or `None` for a page that was never formatted.
    fn read_leaf(&self, page_id: PageId) -> StorageResult<Option<BTreeLeafPage>> {
        let data = self.pager.get_page(page_id)?;
        match node_type_of(page_id, &data[..])? {
            NodeType::Leaf => BTreeLeafPage::from_data(page_id, data).map(Some),
            NodeType::Uninitialized => Ok(None),
            NodeType::Internal => Err(StorageError::corrupt_page(page_id, "cursor expected a leaf")),
        }
    }
}

impl Iterator for Cursor {
    type Item = StorageResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending.take() {
            return Some(Err(err));
        }

        match self.current() {
            Ok(Some(cell)) => {
                if let Err(err) = self.advance() {
                    self.end = true;
                    self.pending = Some(err);
                }
                Some(Ok(cell))
            }
            Ok(None) => None,
            Err(err) => {
                self.end = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::btree::BTreeConfig;
    use crate::storage::page::cell::{self, Cell, Key};
    use tempfile::tempdir;

    fn tree_with_keys(keys: impl IntoIterator<Item = Key>) -> StorageResult<(BTree, tempfile::TempDir)> {
        let dir = tempdir()?;
        let pager = Pager::create(&dir.path().join("test.db"))?;
        let mut tree = BTree::new_tree(pager, BTreeConfig::default())?;
        for key in keys {
            tree.insert(Cell::new(key, format!("row {}", key).as_bytes()).as_bytes())?;
        }
        Ok((tree, dir))
    }

    #[test]
    fn test_empty_tree_starts_at_end() -> StorageResult<()> {
        let (tree, _dir) = tree_with_keys([])?;
        let mut cursor = tree.cursor()?;

        assert!(cursor.at_end());
        assert_eq!(cursor.current()?, None);
        cursor.advance()?;
        assert!(cursor.at_end());
        assert!(cursor.next().is_none());

        Ok(())
    }

    #[test]
    fn test_manual_stepping() -> StorageResult<()> {
        let (tree, _dir) = tree_with_keys([1, 2, 3, 4])?;
        let mut cursor = Cursor::new(tree.pager().clone(), &tree)?;

        assert_eq!(cursor.page_id(), PageId(0));
        let mut seen = Vec::new();
        while let Some(cell) = cursor.current()? {
            seen.push(cell::key_of(&cell)?);
            cursor.advance()?;
        }
        assert_eq!(seen, vec![1, 2, 3, 4]);
        assert!(cursor.at_end());

        cursor.advance()?;
        assert!(cursor.at_end());
        assert_eq!(cursor.current()?, None);

        Ok(())
    }

    #[test]
    fn test_position_crosses_leaves() -> StorageResult<()> {
        let (tree, _dir) = tree_with_keys([1, 2, 3, 4])?;
        let mut cursor = tree.cursor()?;

        assert_eq!((cursor.page_id(), cursor.cell_index()), (PageId(0), 0));
        cursor.advance()?;
        assert_eq!((cursor.page_id(), cursor.cell_index()), (PageId(0), 1));
        cursor.advance()?;
        assert_eq!((cursor.page_id(), cursor.cell_index()), (PageId(1), 0));

        Ok(())
    }

    #[test]
    fn test_iterator_yields_cells_in_order() -> StorageResult<()> {
        let (tree, _dir) = tree_with_keys((1..=100).rev())?;

        let cells = tree.cursor()?.collect::<StorageResult<Vec<_>>>()?;
        assert_eq!(cells.len(), 100);
        for (i, cell) in cells.iter().enumerate() {
            let key = i as Key + 1;
            assert_eq!(cell::key_of(cell)?, key);
            assert_eq!(cell::data_of(cell)?, format!("row {}", key).as_bytes());
        }

        Ok(())
    }

    #[test]
    fn test_fresh_cursors_restart() -> StorageResult<()> {
        let (tree, _dir) = tree_with_keys(1..=10)?;

        let mut first = tree.cursor()?;
        first.nth(4);
        let second: Vec<_> = tree.cursor()?.collect::<StorageResult<_>>()?;
        assert_eq!(second.len(), 10);
        assert_eq!(first.count(), 5);

        Ok(())
    }

    #[test]
    fn test_corrupt_next_leaf_is_reported_once() -> StorageResult<()> {
        let (tree, _dir) = tree_with_keys([1, 2, 3, 4])?;
        let mut cursor = tree.cursor()?;

        let mut data = tree.pager().get_page(PageId(1))?;
        data[0..4].copy_from_slice(&7u32.to_le_bytes());
        tree.pager().write_page(PageId(1), &data)?;

        let keys = cursor
            .by_ref()
            .take(2)
            .map(|entry| cell::key_of(&entry?))
            .collect::<StorageResult<Vec<_>>>()?;
        assert_eq!(keys, vec![1, 2]);

        assert!(matches!(
            cursor.next(),
            Some(Err(StorageError::CorruptPage { page_id: PageId(1), .. }))
        ));
        assert!(cursor.at_end());
        assert!(cursor.next().is_none());

        Ok(())
    }

    #[test]
    fn test_unformatted_root_is_empty() -> StorageResult<()> {
        let dir = tempdir()?;
        let pager = Pager::create(&dir.path().join("test.db"))?;
        let root = pager.get_free_page()?;
        let tree = BTree::open(pager.clone(), root, BTreeConfig::default())?;

        let cursor = Cursor::new(pager.clone(), &tree)?;
        assert!(cursor.at_end());
        assert!(pager.get_page(root)?.iter().all(|&b| b == 0));

        Ok(())
    }
}
