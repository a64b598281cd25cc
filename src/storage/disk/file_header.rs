//! Fixed-size header at the start of the database file.
//!
//! ```text
//! [0..6]    version tag, ASCII "kdb000"
//! [6..10]   next_free_page: u32
//! [10..14]  has_free_list: u32 (0/1)
//! [14..18]  catalog_root_page: u32 (u32::MAX = no catalog)
//! [18..100] reserved, zero
//! ```

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use byteorder::{ByteOrder, LittleEndian};

pub const FILE_HEADER_SIZE: usize = 100;
pub const VERSION_TAG: &[u8; 6] = b"kdb000";

const NO_PAGE: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: [u8; 6],
    pub next_free_page: u32,
    pub has_free_list: bool,
    pub catalog_root_page: Option<PageId>,
}

impl FileHeader {
    pub fn new() -> Self {
        Self {
            version: *VERSION_TAG,
            next_free_page: 0,
            has_free_list: false,
            catalog_root_page: None,
        }
    }

    pub fn to_bytes(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut buf = [0u8; FILE_HEADER_SIZE];
        buf[0..6].copy_from_slice(&self.version);
        LittleEndian::write_u32(&mut buf[6..10], self.next_free_page);
        LittleEndian::write_u32(&mut buf[10..14], self.has_free_list as u32);
        LittleEndian::write_u32(
            &mut buf[14..18],
            self.catalog_root_page.map(|p| p.0).unwrap_or(NO_PAGE),
        );
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> StorageResult<Self> {
        if buf.len() < FILE_HEADER_SIZE {
            return Err(StorageError::InvalidFileHeader(format!(
                "expected {} bytes, got {}",
                FILE_HEADER_SIZE,
                buf.len()
            )));
        }

        let mut version = [0u8; 6];
        version.copy_from_slice(&buf[0..6]);
        if &version != VERSION_TAG {
            return Err(StorageError::InvalidFileHeader(format!(
                "unknown version tag {:?}",
                String::from_utf8_lossy(&version)
            )));
        }

        let has_free_list = match LittleEndian::read_u32(&buf[10..14]) {
            0 => false,
            1 => true,
            other => {
                return Err(StorageError::InvalidFileHeader(format!(
                    "has_free_list must be 0 or 1, got {}",
                    other
                )));
            }
        };

        let catalog_root = LittleEndian::read_u32(&buf[14..18]);

        Ok(Self {
            version,
            next_free_page: LittleEndian::read_u32(&buf[6..10]),
            has_free_list,
            catalog_root_page: (catalog_root != NO_PAGE).then_some(PageId(catalog_root)),
        })
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}
