//! Internal node layout.
//!
//! ```text
//! [0..4]    node_type: u32 = 0
//! [4..8]    is_root: u32 (0/1)
//! [8..12]   parent_page_num: u32
//! [12..16]  num_keys: u32
//! [16..20]  right_child_page_num: u32
//! [20..]    key[num_keys]: u32
//! [..]      child[num_keys]: u32
//! ```
//!
//! `key[i]` is the largest key stored under `child[i]`. The right child holds
//! every key greater than the last separator, so a node with `n` keys has
//! `n + 1` children.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::cell::Key;
use crate::storage::page::{Page, PageId, NODE_HEADER_SIZE, NODE_TYPE_INTERNAL};
use crate::storage::PAGE_SIZE;
use byteorder::{ByteOrder, LittleEndian};

pub const INTERNAL_HEADER_SIZE: usize = NODE_HEADER_SIZE;

/// Bytes per separator: one key and one child page number.
pub const INTERNAL_ENTRY_SIZE: usize = 8;

/// Largest number of separators that fits in a page.
pub const INTERNAL_MAX_ENTRIES: usize = (PAGE_SIZE - INTERNAL_HEADER_SIZE) / INTERNAL_ENTRY_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalHeader {
    pub is_root: bool,
    pub parent_page_num: PageId,
    pub keys: Vec<Key>,
    /// The first `keys.len()` children; the last child is `right_child_page_num`.
    pub children: Vec<PageId>,
    pub right_child_page_num: PageId,
}

impl InternalHeader {
    /// Build a header from `n` separators and `n + 1` children in key order.
    pub fn from_children(
        is_root: bool,
        parent_page_num: PageId,
        keys: Vec<Key>,
        mut all_children: Vec<PageId>,
    ) -> Self {
        debug_assert_eq!(all_children.len(), keys.len() + 1);
        let right_child_page_num = all_children.pop().unwrap_or(parent_page_num);
        Self {
            is_root,
            parent_page_num,
            keys,
            children: all_children,
            right_child_page_num,
        }
    }

    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    /// All `n + 1` children in key order, the right child last.
    pub fn all_children(&self) -> Vec<PageId> {
        let mut all = self.children.clone();
        all.push(self.right_child_page_num);
        all
    }

    /// Replace separators and children, `all_children` holding one more entry than `keys`.
    pub fn set_children(&mut self, keys: Vec<Key>, all_children: Vec<PageId>) {
        let rebuilt = Self::from_children(self.is_root, self.parent_page_num, keys, all_children);
        self.keys = rebuilt.keys;
        self.children = rebuilt.children;
        self.right_child_page_num = rebuilt.right_child_page_num;
    }

    /// Position of `child` among the `n + 1` children.
    pub fn child_index(&self, child: PageId) -> Option<usize> {
        if self.right_child_page_num == child {
            return Some(self.children.len());
        }
        self.children.iter().position(|&c| c == child)
    }

    pub fn child_at(&self, index: usize) -> Option<PageId> {
        match index.cmp(&self.children.len()) {
            std::cmp::Ordering::Less => Some(self.children[index]),
            std::cmp::Ordering::Equal => Some(self.right_child_page_num),
            std::cmp::Ordering::Greater => None,
        }
    }

    /// The child whose subtree owns `key`. Ties go left: a key equal to a
    /// separator lives in the subtree that separator describes.
    pub fn child_for(&self, key: Key) -> PageId {
        match self.keys.iter().position(|&sep| key <= sep) {
            Some(i) => self.children[i],
            None => self.right_child_page_num,
        }
    }

    pub fn encoded_len(&self) -> usize {
        INTERNAL_HEADER_SIZE + self.keys.len() * INTERNAL_ENTRY_SIZE
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.encoded_len()];
        self.write_to(&mut buf);
        buf
    }

    /// Write the header into the front of `buf`, which must hold `encoded_len()` bytes.
    pub fn write_to(&self, buf: &mut [u8]) {
        let n = self.keys.len();
        LittleEndian::write_u32(&mut buf[0..4], NODE_TYPE_INTERNAL);
        LittleEndian::write_u32(&mut buf[4..8], self.is_root as u32);
        LittleEndian::write_u32(&mut buf[8..12], self.parent_page_num.0);
        LittleEndian::write_u32(&mut buf[12..16], n as u32);
        LittleEndian::write_u32(&mut buf[16..20], self.right_child_page_num.0);

        let keys_start = INTERNAL_HEADER_SIZE;
        let children_start = keys_start + n * 4;
        for (i, key) in self.keys.iter().enumerate() {
            let offset = keys_start + i * 4;
            LittleEndian::write_u32(&mut buf[offset..offset + 4], *key);
        }
        for (i, child) in self.children.iter().enumerate() {
            let offset = children_start + i * 4;
            LittleEndian::write_u32(&mut buf[offset..offset + 4], child.0);
        }
    }

    pub fn decode(page_id: PageId, buf: &[u8]) -> StorageResult<Self> {
        if buf.len() < INTERNAL_HEADER_SIZE {
            return Err(StorageError::corrupt_page(page_id, "internal header truncated"));
        }

        let node_type = LittleEndian::read_u32(&buf[0..4]);
        if node_type != NODE_TYPE_INTERNAL {
            return Err(StorageError::corrupt_page(
                page_id,
                format!("expected internal tag, found {}", node_type),
            ));
        }

        let is_root = match LittleEndian::read_u32(&buf[4..8]) {
            0 => false,
            1 => true,
            other => {
                return Err(StorageError::corrupt_page(
                    page_id,
                    format!("is_root must be 0 or 1, got {}", other),
                ));
            }
        };

        let n = LittleEndian::read_u32(&buf[12..16]) as usize;
        if n > INTERNAL_MAX_ENTRIES || INTERNAL_HEADER_SIZE + n * INTERNAL_ENTRY_SIZE > buf.len() {
            return Err(StorageError::corrupt_page(
                page_id,
                format!("{} keys do not fit the page", n),
            ));
        }

        let keys_start = INTERNAL_HEADER_SIZE;
        let children_start = keys_start + n * 4;
        let keys = (0..n)
            .map(|i| LittleEndian::read_u32(&buf[keys_start + i * 4..keys_start + i * 4 + 4]))
            .collect();
        let children = (0..n)
            .map(|i| {
                PageId(LittleEndian::read_u32(
                    &buf[children_start + i * 4..children_start + i * 4 + 4],
                ))
            })
            .collect();

        Ok(Self {
            is_root,
            parent_page_num: PageId(LittleEndian::read_u32(&buf[8..12])),
            keys,
            children,
            right_child_page_num: PageId(LittleEndian::read_u32(&buf[16..20])),
        })
    }
}

/// An internal node bound to its page bytes.
pub struct BTreeInternalPage {
    page_id: PageId,
    header: InternalHeader,
    data: Box<[u8; PAGE_SIZE]>,
}

impl BTreeInternalPage {
    pub fn new(page_id: PageId, header: InternalHeader) -> Self {
        let mut page = Self {
            page_id,
            header: header.clone(),
            data: Box::new([0; PAGE_SIZE]),
        };
        page.set_header(header);
        page
    }

    pub fn from_data(page_id: PageId, data: Box<[u8; PAGE_SIZE]>) -> StorageResult<Self> {
        let header = InternalHeader::decode(page_id, &data[..])?;
        Ok(Self {
            page_id,
            header,
            data,
        })
    }

    pub fn header(&self) -> &InternalHeader {
        &self.header
    }

    pub fn into_header(self) -> InternalHeader {
        self.header
    }

    /// Replace the node content and re-encode the page.
    pub fn set_header(&mut self, header: InternalHeader) {
        self.data.fill(0);
        header.write_to(&mut self.data[..]);
        self.header = header;
    }

    pub fn num_keys(&self) -> usize {
        self.header.num_keys()
    }

    /// Separators strictly ascending, one child per separator plus the right
    /// child, and no page listed twice.
    pub fn validate(&self) -> StorageResult<()> {
        let corrupt = |reason: String| StorageError::corrupt_page(self.page_id, reason);
        let header = &self.header;

        if header.children.len() != header.keys.len() {
            return Err(corrupt(format!(
                "{} keys but {} children",
                header.keys.len(),
                header.children.len()
            )));
        }
        if header.keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(corrupt(format!("separators not ascending: {:?}", header.keys)));
        }

        let mut children = header.all_children();
        if children.contains(&self.page_id) {
            return Err(corrupt("node lists itself as a child".to_string()));
        }
        children.sort_unstable();
        if children.windows(2).any(|w| w[0] == w[1]) {
            return Err(corrupt("duplicate child page".to_string()));
        }

        Ok(())
    }
}

impl Page for BTreeInternalPage {
    fn page_id(&self) -> PageId {
        self.page_id
    }

    fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }
}
