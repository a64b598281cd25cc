//! Page identifiers and node-level decoding.
//!
//! Every B+-tree page starts with a 4-byte node tag:
//!
//! ```text
//! 0 = internal node, 1 = leaf node
//! ```
//!
//! A page whose leading header is entirely zero has never been formatted and
//! is reported as [`NodeType::Uninitialized`]; the tree formats such pages as
//! empty leaves on first touch.

pub mod btree_internal_page;
pub mod btree_leaf_page;
pub mod cell;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::PAGE_SIZE;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use btree_internal_page::{BTreeInternalPage, InternalHeader};
pub use btree_leaf_page::{BTreeLeafPage, LeafHeader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub trait Page {
    fn page_id(&self) -> PageId;
    fn data(&self) -> &[u8; PAGE_SIZE];
    fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE];
}

pub const NODE_TYPE_INTERNAL: u32 = 0;
pub const NODE_TYPE_LEAF: u32 = 1;

/// Size of the fixed part shared by both node headers: five 4-byte fields.
pub const NODE_HEADER_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Internal,
    Leaf,
    Uninitialized,
}

/// Read the node tag of a page.
pub fn node_type_of(page_id: PageId, data: &[u8]) -> StorageResult<NodeType> {
    if data.len() < NODE_HEADER_SIZE {
        return Err(StorageError::corrupt_page(page_id, "page shorter than node header"));
    }

    match LittleEndian::read_u32(&data[0..4]) {
        NODE_TYPE_LEAF => Ok(NodeType::Leaf),
        NODE_TYPE_INTERNAL => {
            if data[..NODE_HEADER_SIZE].iter().all(|&b| b == 0) {
                Ok(NodeType::Uninitialized)
            } else {
                Ok(NodeType::Internal)
            }
        }
        tag => Err(StorageError::corrupt_page(
            page_id,
            format!("unknown node tag {}", tag),
        )),
    }
}

/// The decoded header of a tree page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Leaf(LeafHeader),
    Internal(InternalHeader),
}

impl Node {
    /// Decode the header of a page. Uninitialized pages decode as an empty,
    /// non-root leaf whose parent is the page itself.
    pub fn decode(page_id: PageId, data: &[u8; PAGE_SIZE]) -> StorageResult<Self> {
        match node_type_of(page_id, data)? {
            NodeType::Leaf => Ok(Node::Leaf(LeafHeader::decode(page_id, data)?)),
            NodeType::Internal => Ok(Node::Internal(InternalHeader::decode(page_id, data)?)),
            NodeType::Uninitialized => Ok(Node::Leaf(LeafHeader::empty(false, page_id))),
        }
    }

    pub fn is_root(&self) -> bool {
        match self {
            Node::Leaf(h) => h.is_root,
            Node::Internal(h) => h.is_root,
        }
    }

    pub fn parent_page_num(&self) -> PageId {
        match self {
            Node::Leaf(h) => h.parent_page_num,
            Node::Internal(h) => h.parent_page_num,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_page_is_uninitialized() {
        let data = [0u8; PAGE_SIZE];
        assert_eq!(
            node_type_of(PageId(0), &data).unwrap(),
            NodeType::Uninitialized
        );
        assert_eq!(
            Node::decode(PageId(4), &data).unwrap(),
            Node::Leaf(LeafHeader::empty(false, PageId(4)))
        );
    }

    #[test]
    fn test_node_tags() {
        let leaf = BTreeLeafPage::new(PageId(1), true, PageId(1));
        assert_eq!(node_type_of(PageId(1), leaf.data()).unwrap(), NodeType::Leaf);

        let internal = InternalHeader {
            is_root: true,
            parent_page_num: PageId(2),
            keys: vec![10],
            children: vec![PageId(0)],
            right_child_page_num: PageId(1),
        };
        let page = BTreeInternalPage::new(PageId(2), internal);
        assert_eq!(
            node_type_of(PageId(2), page.data()).unwrap(),
            NodeType::Internal
        );
    }

    #[test]
    fn test_unknown_tag_is_corrupt() {
        let mut data = [0u8; PAGE_SIZE];
        data[0] = 7;
        assert!(matches!(
            node_type_of(PageId(9), &data),
            Err(StorageError::CorruptPage { page_id: PageId(9), .. })
        ));
        assert!(Node::decode(PageId(9), &data).is_err());
    }

    #[test]
    fn test_decode_dispatch() {
        let leaf = BTreeLeafPage::new(PageId(3), false, PageId(8));
        match Node::decode(PageId(3), leaf.data()).unwrap() {
            Node::Leaf(h) => {
                assert!(!h.is_root);
                assert_eq!(h.parent_page_num, PageId(8));
                assert_eq!(h.num_cells(), 0);
            }
            Node::Internal(_) => panic!("expected leaf"),
        }
    }
}
