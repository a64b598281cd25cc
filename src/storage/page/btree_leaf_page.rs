//! Leaf node layout.
//!
//! ```text
//! [0..4]    node_type: u32 = 1
//! [4..8]    is_root: u32 (0/1)
//! [8..12]   parent_page_num: u32
//! [12..16]  num_cells: u32
//! [16..20]  allocation_pointer: u32   (offset of the lowest cell byte)
//! [20..]    cell_pointer[num_cells]: u32, sorted by cell key
//! ...       free space
//! ...       cells, packed back-to-front from the end of the page
//! ```

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::cell::{self, Key, CELL_HEADER_SIZE, KEY_SIZE};
use crate::storage::page::{Page, PageId, NODE_HEADER_SIZE, NODE_TYPE_LEAF};
use crate::storage::PAGE_SIZE;
use byteorder::{ByteOrder, LittleEndian};

pub const LEAF_HEADER_SIZE: usize = NODE_HEADER_SIZE;
pub const CELL_POINTER_SIZE: usize = 4;

/// Largest number of cell pointers that fits behind the header.
pub const LEAF_MAX_POINTERS: usize = (PAGE_SIZE - LEAF_HEADER_SIZE) / CELL_POINTER_SIZE;

/// Decoded leaf header. `num_cells` is the length of `cell_pointers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafHeader {
    pub is_root: bool,
    pub parent_page_num: PageId,
    pub allocation_pointer: u32,
    pub cell_pointers: Vec<u32>,
}

impl LeafHeader {
    pub fn empty(is_root: bool, parent_page_num: PageId) -> Self {
        Self {
            is_root,
            parent_page_num,
            allocation_pointer: PAGE_SIZE as u32,
            cell_pointers: Vec::new(),
        }
    }

    pub fn num_cells(&self) -> usize {
        self.cell_pointers.len()
    }

    /// Bytes occupied by the header and its pointer array.
    pub fn encoded_len(&self) -> usize {
        LEAF_HEADER_SIZE + self.cell_pointers.len() * CELL_POINTER_SIZE
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.encoded_len()];
        self.write_to(&mut buf);
        buf
    }

    /// Write the header into the front of `buf`, which must hold `encoded_len()` bytes.
    pub fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], NODE_TYPE_LEAF);
        LittleEndian::write_u32(&mut buf[4..8], self.is_root as u32);
        LittleEndian::write_u32(&mut buf[8..12], self.parent_page_num.0);
        LittleEndian::write_u32(&mut buf[12..16], self.cell_pointers.len() as u32);
        LittleEndian::write_u32(&mut buf[16..20], self.allocation_pointer);
        for (i, ptr) in self.cell_pointers.iter().enumerate() {
            let offset = LEAF_HEADER_SIZE + i * CELL_POINTER_SIZE;
            LittleEndian::write_u32(&mut buf[offset..offset + CELL_POINTER_SIZE], *ptr);
        }
    }

    pub fn decode(page_id: PageId, buf: &[u8]) -> StorageResult<Self> {
        if buf.len() < LEAF_HEADER_SIZE {
            return Err(StorageError::corrupt_page(page_id, "leaf header truncated"));
        }

        let node_type = LittleEndian::read_u32(&buf[0..4]);
        if node_type != NODE_TYPE_LEAF {
            return Err(StorageError::corrupt_page(
                page_id,
                format!("expected leaf tag, found {}", node_type),
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

        let num_cells = LittleEndian::read_u32(&buf[12..16]) as usize;
        let end = LEAF_HEADER_SIZE + num_cells * CELL_POINTER_SIZE;
        if num_cells > LEAF_MAX_POINTERS || end > buf.len() {
            return Err(StorageError::corrupt_page(
                page_id,
                format!("{} cell pointers do not fit the page", num_cells),
            ));
        }

        let cell_pointers = (0..num_cells)
            .map(|i| {
                let offset = LEAF_HEADER_SIZE + i * CELL_POINTER_SIZE;
                LittleEndian::read_u32(&buf[offset..offset + CELL_POINTER_SIZE])
            })
            .collect();

        Ok(Self {
            is_root,
            parent_page_num: PageId(LittleEndian::read_u32(&buf[8..12])),
            allocation_pointer: LittleEndian::read_u32(&buf[16..20]),
            cell_pointers,
        })
    }
}

pub struct BTreeLeafPage {
    page_id: PageId,
    data: Box<[u8; PAGE_SIZE]>,
}

impl BTreeLeafPage {
    pub fn new(page_id: PageId, is_root: bool, parent_page_num: PageId) -> Self {
        let mut page = Self {
            page_id,
            data: Box::new([0; PAGE_SIZE]),
        };
        LeafHeader::empty(is_root, parent_page_num).write_to(&mut page.data[..]);
        page
    }

    /// Wrap page bytes as a leaf, checking the header and the framing of every cell.
    pub fn from_data(page_id: PageId, data: Box<[u8; PAGE_SIZE]>) -> StorageResult<Self> {
        let header = LeafHeader::decode(page_id, &data[..])?;
        let header_end = header.encoded_len();

        let alloc = header.allocation_pointer as usize;
        if alloc < header_end || alloc > PAGE_SIZE {
            return Err(StorageError::corrupt_page(
                page_id,
                format!("allocation pointer {} outside cell area", alloc),
            ));
        }

        for &ptr in &header.cell_pointers {
            let ptr = ptr as usize;
            if ptr < alloc {
                return Err(StorageError::corrupt_page(
                    page_id,
                    format!("cell pointer {} below allocation pointer {}", ptr, alloc),
                ));
            }
            cell::read_cell(&data[..], ptr).map_err(|e| {
                StorageError::corrupt_page(page_id, format!("bad cell at {}: {}", ptr, e))
            })?;
        }

        Ok(Self { page_id, data })
    }

    pub fn header(&self) -> LeafHeader {
        LeafHeader {
            is_root: self.is_root(),
            parent_page_num: self.parent_page_num(),
            allocation_pointer: self.allocation_pointer() as u32,
            cell_pointers: (0..self.num_cells()).map(|i| self.cell_pointer(i) as u32).collect(),
        }
    }

    pub fn into_data(self) -> Box<[u8; PAGE_SIZE]> {
        self.data
    }

    fn read_field(&self, offset: usize) -> u32 {
        LittleEndian::read_u32(&self.data[offset..offset + 4])
    }

    fn write_field(&mut self, offset: usize, val: u32) {
        LittleEndian::write_u32(&mut self.data[offset..offset + 4], val);
    }

    pub fn is_root(&self) -> bool {
        self.read_field(4) != 0
    }

    pub fn set_is_root(&mut self, is_root: bool) {
        self.write_field(4, is_root as u32);
    }

    pub fn parent_page_num(&self) -> PageId {
        PageId(self.read_field(8))
    }

    pub fn set_parent_page_num(&mut self, parent: PageId) {
        self.write_field(8, parent.0);
    }

    pub fn num_cells(&self) -> usize {
        self.read_field(12) as usize
    }

    fn set_num_cells(&mut self, n: usize) {
        self.write_field(12, n as u32);
    }

    pub fn allocation_pointer(&self) -> usize {
        self.read_field(16) as usize
    }

    fn set_allocation_pointer(&mut self, offset: usize) {
        self.write_field(16, offset as u32);
    }

    fn pointer_offset(index: usize) -> usize {
        LEAF_HEADER_SIZE + index * CELL_POINTER_SIZE
    }

    fn cell_pointer(&self, index: usize) -> usize {
        self.read_field(Self::pointer_offset(index)) as usize
    }

    fn set_cell_pointer(&mut self, index: usize, offset: usize) {
        self.write_field(Self::pointer_offset(index), offset as u32);
    }

    /// Free bytes between the pointer array and the lowest cell.
    pub fn free_space(&self) -> usize {
        self.allocation_pointer()
            .saturating_sub(Self::pointer_offset(self.num_cells()))
    }

    fn cell_size_at(&self, offset: usize) -> usize {
        let data_size = self.read_field(offset + 4) as usize;
        CELL_HEADER_SIZE + KEY_SIZE + data_size
    }

    /// Raw bytes of the cell at `index` in key order.
    pub fn cell(&self, index: usize) -> Option<&[u8]> {
        if index >= self.num_cells() {
            return None;
        }
        let offset = self.cell_pointer(index);
        let size = self.cell_size_at(offset);
        Some(&self.data[offset..offset + size])
    }

    pub fn key_at(&self, index: usize) -> Option<Key> {
        if index >= self.num_cells() {
            return None;
        }
        Some(self.read_field(self.cell_pointer(index) + CELL_HEADER_SIZE))
    }

    pub fn keys(&self) -> Vec<Key> {
        (0..self.num_cells()).filter_map(|i| self.key_at(i)).collect()
    }

    pub fn cells(&self) -> Vec<Vec<u8>> {
        (0..self.num_cells())
            .filter_map(|i| self.cell(i).map(|c| c.to_vec()))
            .collect()
    }

    pub fn min_key(&self) -> Option<Key> {
        self.key_at(0)
    }

    pub fn max_key(&self) -> Option<Key> {
        self.num_cells().checked_sub(1).and_then(|i| self.key_at(i))
    }

    /// Binary search by key: `Ok(index)` if present, `Err(insert_position)` otherwise.
    pub fn search(&self, key: Key) -> Result<usize, usize> {
        let mut left = 0;
        let mut right = self.num_cells();

        while left < right {
            let mid = left + (right - left) / 2;
            match self.read_field(self.cell_pointer(mid) + CELL_HEADER_SIZE).cmp(&key) {
                std::cmp::Ordering::Less => left = mid + 1,
                std::cmp::Ordering::Equal => return Ok(mid),
                std::cmp::Ordering::Greater => right = mid,
            }
        }

        Err(left)
    }

    /// Insert a cell at its key position. Fails with `PageOverflow` before touching
    /// the page if the cell and its pointer do not fit in the free space.
    pub fn insert_cell(&mut self, cell_bytes: &[u8]) -> StorageResult<usize> {
        let (key, size) = cell::read_cell(cell_bytes, 0)?;
        let cell_bytes = &cell_bytes[..size];

        let index = match self.search(key) {
            Ok(_) => return Err(StorageError::DuplicateKey(key)),
            Err(index) => index,
        };

        let required = size + CELL_POINTER_SIZE;
        let available = self.free_space();
        if required > available {
            return Err(StorageError::PageOverflow {
                required,
                available,
            });
        }

        let cell_offset = self.allocation_pointer() - size;
        self.data[cell_offset..cell_offset + size].copy_from_slice(cell_bytes);

        let num_cells = self.num_cells();
        if index < num_cells {
            let src = Self::pointer_offset(index);
            let dst = Self::pointer_offset(index + 1);
            let len = (num_cells - index) * CELL_POINTER_SIZE;
            self.data.copy_within(src..src + len, dst);
        }
        self.set_cell_pointer(index, cell_offset);
        self.set_num_cells(num_cells + 1);
        self.set_allocation_pointer(cell_offset);

        Ok(index)
    }

    /// Remove the cell at `index`, returning its bytes. The cell area is compacted
    /// so the freed bytes become free space again.
    pub fn remove_cell(&mut self, index: usize) -> Option<Vec<u8>> {
        let removed = self.cell(index)?.to_vec();

        let num_cells = self.num_cells();
        if index + 1 < num_cells {
            let src = Self::pointer_offset(index + 1);
            let dst = Self::pointer_offset(index);
            let len = (num_cells - index - 1) * CELL_POINTER_SIZE;
            self.data.copy_within(src..src + len, dst);
        }
        self.set_num_cells(num_cells - 1);
        self.compact();

        Some(removed)
    }

    /// Repack all cells against the end of the page in key order.
    pub fn compact(&mut self) {
        let cells = self.cells();
        let mut upper = PAGE_SIZE;

        for (i, cell) in cells.iter().enumerate() {
            upper -= cell.len();
            self.data[upper..upper + cell.len()].copy_from_slice(cell);
            self.set_cell_pointer(i, upper);
        }

        let lower = Self::pointer_offset(cells.len());
        self.data[lower..upper].fill(0);
        self.set_allocation_pointer(upper);
    }

    /// Drop every cell, keeping the root flag and parent.
    pub fn clear(&mut self) {
        let is_root = self.is_root();
        let parent = self.parent_page_num();
        self.data.fill(0);
        LeafHeader::empty(is_root, parent).write_to(&mut self.data[..]);
    }

    /// Replace the page's cells with `cells`.
    pub fn set_cells<C: AsRef<[u8]>>(&mut self, cells: &[C]) -> StorageResult<()> {
        self.clear();
        for cell in cells {
            self.insert_cell(cell.as_ref())?;
        }
        Ok(())
    }

    /// Keys strictly ascending through the pointer array, allocation pointer at the
    /// lowest cell, no cell overlapping another or the pointer array.
    pub fn validate(&self) -> StorageResult<()> {
        let corrupt = |reason: String| StorageError::corrupt_page(self.page_id, reason);

        let header_end = Self::pointer_offset(self.num_cells());
        let alloc = self.allocation_pointer();
        if alloc < header_end || alloc > PAGE_SIZE {
            return Err(corrupt(format!("allocation pointer {} out of range", alloc)));
        }

        let mut extents: Vec<(usize, usize)> = Vec::with_capacity(self.num_cells());
        for i in 0..self.num_cells() {
            let offset = self.cell_pointer(i);
            let (_, size) = cell::read_cell(&self.data[..], offset)
                .map_err(|e| corrupt(format!("cell {}: {}", i, e)))?;
            if offset < header_end {
                return Err(corrupt(format!("cell {} overlaps the pointer array", i)));
            }
            extents.push((offset, offset + size));
        }

        let expected_alloc = extents.iter().map(|(s, _)| *s).min().unwrap_or(PAGE_SIZE);
        if alloc != expected_alloc {
            return Err(corrupt(format!(
                "allocation pointer {} but lowest cell at {}",
                alloc, expected_alloc
            )));
        }

        extents.sort_unstable();
        if extents.windows(2).any(|w| w[0].1 > w[1].0) {
            return Err(corrupt("overlapping cells".to_string()));
        }

        let keys = self.keys();
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(corrupt(format!("keys not strictly ascending: {:?}", keys)));
        }

        Ok(())
    }
}

impl Page for BTreeLeafPage {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::cell::Cell;

    fn page_with_keys(keys: &[Key]) -> BTreeLeafPage {
        let mut page = BTreeLeafPage::new(PageId(1), false, PageId(0));
        for &k in keys {
            page.insert_cell(Cell::new(k, format!("data_{}", k).as_bytes()).as_bytes())
                .unwrap();
        }
        page
    }

    #[test]
    fn test_header_round_trip() {
        let original = LeafHeader {
            is_root: true,
            parent_page_num: PageId(0),
            allocation_pointer: 100,
            cell_pointers: vec![200, 300, 400],
        };
        let encoded = original.encode();
        assert_eq!(encoded.len(), LEAF_HEADER_SIZE + 12);
        assert_eq!(LeafHeader::decode(PageId(0), &encoded).unwrap(), original);

        let empty = LeafHeader {
            is_root: false,
            parent_page_num: PageId(5),
            allocation_pointer: 50,
            cell_pointers: vec![],
        };
        assert_eq!(LeafHeader::decode(PageId(0), &empty.encode()).unwrap(), empty);
    }

    #[test]
    fn test_header_layout() {
        let header = LeafHeader {
            is_root: true,
            parent_page_num: PageId(3),
            allocation_pointer: 4000,
            cell_pointers: vec![4000],
        };
        let bytes = header.encode();
        assert_eq!(&bytes[0..4], &1u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &3u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &1u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &4000u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &4000u32.to_le_bytes());
    }

    #[test]
    fn test_decode_rejects_internal_tag() {
        let mut bytes = LeafHeader::empty(true, PageId(0)).encode();
        bytes[0] = 0;
        assert!(LeafHeader::decode(PageId(2), &bytes).is_err());
    }

    #[test]
    fn test_new_leaf_page() {
        let page = BTreeLeafPage::new(PageId(42), true, PageId(42));

        assert_eq!(page.page_id(), PageId(42));
        assert!(page.is_root());
        assert_eq!(page.parent_page_num(), PageId(42));
        assert_eq!(page.num_cells(), 0);
        assert_eq!(page.allocation_pointer(), PAGE_SIZE);
        assert_eq!(page.free_space(), PAGE_SIZE - LEAF_HEADER_SIZE);
        assert_eq!(page.max_key(), None);
        page.validate().unwrap();
    }

    #[test]
    fn test_insert_keeps_key_order() {
        let page = page_with_keys(&[30, 10, 20, 5]);

        assert_eq!(page.keys(), vec![5, 10, 20, 30]);
        assert_eq!(page.min_key(), Some(5));
        assert_eq!(page.max_key(), Some(30));
        page.validate().unwrap();
    }

    #[test]
    fn test_cells_stored_back_to_front() {
        let page = page_with_keys(&[1, 2]);
        let header = page.header();

        let first = Cell::new(1, b"data_1");
        assert_eq!(header.cell_pointers[0] as usize, PAGE_SIZE - first.len());
        assert_eq!(header.allocation_pointer, *header.cell_pointers.iter().min().unwrap());
        assert_eq!(page.cell(0).unwrap(), first.as_bytes());
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut page = page_with_keys(&[1, 2]);
        let result = page.insert_cell(Cell::new(2, b"again").as_bytes());
        assert!(matches!(result, Err(StorageError::DuplicateKey(2))));
        assert_eq!(page.num_cells(), 2);
    }

    #[test]
    fn test_page_overflow_leaves_page_untouched() {
        let mut page = BTreeLeafPage::new(PageId(1), false, PageId(0));
        let big = Cell::new(1, &vec![7u8; 3000]);
        page.insert_cell(big.as_bytes()).unwrap();

        let before = *page.data();
        let result = page.insert_cell(Cell::new(2, &vec![8u8; 2000]).as_bytes());
        assert!(matches!(result, Err(StorageError::PageOverflow { .. })));
        assert_eq!(&before[..], &page.data()[..]);
    }

    #[test]
    fn test_remove_cell_compacts() {
        let mut page = page_with_keys(&[1, 2, 3]);
        let free_before = page.free_space();

        let removed = page.remove_cell(1).unwrap();
        assert_eq!(cell::key_of(&removed).unwrap(), 2);
        assert_eq!(page.keys(), vec![1, 3]);
        assert_eq!(page.free_space(), free_before + removed.len() + CELL_POINTER_SIZE);
        page.validate().unwrap();

        assert!(page.remove_cell(5).is_none());
    }

    #[test]
    fn test_search() {
        let page = page_with_keys(&[10, 20, 30]);
        assert_eq!(page.search(20), Ok(1));
        assert_eq!(page.search(5), Err(0));
        assert_eq!(page.search(25), Err(2));
        assert_eq!(page.search(40), Err(3));

        let empty = BTreeLeafPage::new(PageId(1), true, PageId(1));
        assert_eq!(empty.search(1), Err(0));
    }

    #[test]
    fn test_set_cells_and_clear() {
        let mut page = page_with_keys(&[1, 2, 3, 4]);
        page.set_is_root(true);
        let cells = page.cells();

        page.set_cells(&cells[2..]).unwrap();
        assert_eq!(page.keys(), vec![3, 4]);
        assert!(page.is_root());
        page.validate().unwrap();

        page.clear();
        assert_eq!(page.num_cells(), 0);
        assert_eq!(page.allocation_pointer(), PAGE_SIZE);
    }

    #[test]
    fn test_from_data_round_trip() {
        let page = page_with_keys(&[4, 8, 15]);
        let data = page.into_data();

        let restored = BTreeLeafPage::from_data(PageId(1), data).unwrap();
        assert_eq!(restored.keys(), vec![4, 8, 15]);
        assert_eq!(restored.cell(2).unwrap(), Cell::new(15, b"data_15").as_bytes());
    }

    #[test]
    fn test_from_data_rejects_bad_pointer() {
        let mut page = page_with_keys(&[1]);
        let ptr_offset = LEAF_HEADER_SIZE;
        page.data_mut()[ptr_offset..ptr_offset + 4].copy_from_slice(&10u32.to_le_bytes());

        assert!(matches!(
            BTreeLeafPage::from_data(PageId(1), page.into_data()),
            Err(StorageError::CorruptPage { .. })
        ));
    }

    #[test]
    fn test_validate_detects_unsorted_pointers() {
        let mut page = page_with_keys(&[1, 2]);
        let p0 = page.cell_pointer(0);
        let p1 = page.cell_pointer(1);
        page.set_cell_pointer(0, p1);
        page.set_cell_pointer(1, p0);
        assert!(page.validate().is_err());
    }
}
