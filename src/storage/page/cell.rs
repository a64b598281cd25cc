//! Cell framing.
//!
//! A cell is one stored row as an opaque, self-describing byte string:
//!
//! ```text
//! [0..4]   key_size: u32   (always 4)
//! [4..8]   data_size: u32
//! [8..12]  key: u32
//! [12..]   data: [u8; data_size]   (column header + column bytes, owned by the record codec)
//! ```
//!
//! `data_size` includes the record codec's column header, so the total size
//! is `8 + key_size + data_size`. The tree only ever needs the key and that
//! size, both recoverable from the two length prefixes without any schema
//! knowledge.

use crate::storage::error::{StorageError, StorageResult};
use byteorder::{ByteOrder, LittleEndian};

pub type Key = u32;

pub const CELL_HEADER_SIZE: usize = 8;
pub const KEY_SIZE: usize = 4;

/// Extract the sort key of a cell.
pub fn key_of(cell: &[u8]) -> StorageResult<Key> {
    read_cell(cell, 0).map(|(key, _)| key)
}

/// Total framed size of a cell in bytes.
pub fn size_of(cell: &[u8]) -> StorageResult<usize> {
    read_cell(cell, 0).map(|(_, size)| size)
}

/// The opaque data portion of a cell.
pub fn data_of(cell: &[u8]) -> StorageResult<&[u8]> {
    let (_, size) = read_cell(cell, 0)?;
    Ok(&cell[CELL_HEADER_SIZE + KEY_SIZE..size])
}

/// Decode the key and framed size of the cell starting at `offset` in `buf`.
pub fn read_cell(buf: &[u8], offset: usize) -> StorageResult<(Key, usize)> {
    let corrupt = |reason: String| StorageError::CorruptCell { offset, reason };

    if offset + CELL_HEADER_SIZE > buf.len() {
        return Err(corrupt("cell header runs past the buffer".to_string()));
    }

    let key_size = LittleEndian::read_u32(&buf[offset..offset + 4]) as usize;
    let data_size = LittleEndian::read_u32(&buf[offset + 4..offset + 8]) as usize;
    if key_size != KEY_SIZE {
        return Err(corrupt(format!("key size must be {}, got {}", KEY_SIZE, key_size)));
    }

    let size = CELL_HEADER_SIZE + key_size + data_size;
    if offset + size > buf.len() {
        return Err(corrupt(format!(
            "cell of {} bytes runs past the buffer end {}",
            size,
            buf.len()
        )));
    }

    let key_start = offset + CELL_HEADER_SIZE;
    let key = LittleEndian::read_u32(&buf[key_start..key_start + KEY_SIZE]);
    Ok((key, size))
}

/// Builder and owned form of a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    bytes: Vec<u8>,
}

impl Cell {
    pub fn new(key: Key, data: &[u8]) -> Self {
        let mut bytes = vec![0u8; CELL_HEADER_SIZE + KEY_SIZE + data.len()];
        LittleEndian::write_u32(&mut bytes[0..4], KEY_SIZE as u32);
        LittleEndian::write_u32(&mut bytes[4..8], data.len() as u32);
        LittleEndian::write_u32(&mut bytes[8..12], key);
        bytes[CELL_HEADER_SIZE + KEY_SIZE..].copy_from_slice(data);
        Self { bytes }
    }

    /// Wrap framed bytes, validating the framing.
    pub fn from_bytes(bytes: Vec<u8>) -> StorageResult<Self> {
        let size = size_of(&bytes)?;
        if size != bytes.len() {
            return Err(StorageError::CorruptCell {
                offset: 0,
                reason: format!("framed size {} but {} bytes given", size, bytes.len()),
            });
        }
        Ok(Self { bytes })
    }

    pub fn key(&self) -> Key {
        LittleEndian::read_u32(&self.bytes[8..12])
    }

    pub fn data(&self) -> &[u8] {
        &self.bytes[CELL_HEADER_SIZE + KEY_SIZE..]
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl AsRef<[u8]> for Cell {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}
