use crate::storage::disk::file_header::{FileHeader, FILE_HEADER_SIZE};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const PAGE_SIZE: usize = 4096;

/// Raw file access: the file header at offset 0, then contiguous data pages at
/// `FILE_HEADER_SIZE + page_id * PAGE_SIZE`.
pub struct PageManager {
    file: File,
}

impl PageManager {
    /// Create (or truncate) a database file and write a fresh header.
    pub fn create(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mut pm = Self { file };
        pm.write_header(&FileHeader::new())?;
        Ok(pm)
    }

    /// Open an existing database file.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }

    pub fn read_header(&mut self) -> StorageResult<FileHeader> {
        let file_size = self.file.metadata()?.len();
        if file_size < FILE_HEADER_SIZE as u64 {
            return Err(StorageError::InvalidFileHeader(format!(
                "file is {} bytes, shorter than the header",
                file_size
            )));
        }

        let mut buf = [0u8; FILE_HEADER_SIZE];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut buf)?;
        FileHeader::from_bytes(&buf)
    }

    pub fn write_header(&mut self, header: &FileHeader) -> StorageResult<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header.to_bytes())?;
        self.file.flush()?;
        Ok(())
    }

    /// Read a page into `buf`. Pages beyond the end of the file read as zeroes.
    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> StorageResult<()> {
        let offset = Self::page_offset(page_id);
        let file_size = self.file.metadata()?.len();

        if offset + PAGE_SIZE as u64 > file_size {
            buf.fill(0);
            return Ok(());
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_page(&mut self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> StorageResult<()> {
        let offset = Self::page_offset(page_id);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.flush()?;
        Ok(())
    }

    /// Number of whole data pages currently present in the file.
    pub fn num_pages(&self) -> StorageResult<u32> {
        let file_size = self.file.metadata()?.len();
        if file_size <= FILE_HEADER_SIZE as u64 {
            return Ok(0);
        }
        Ok(((file_size - FILE_HEADER_SIZE as u64) / PAGE_SIZE as u64) as u32)
    }

    pub fn sync(&mut self) -> StorageResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn page_offset(page_id: PageId) -> u64 {
        FILE_HEADER_SIZE as u64 + page_id.0 as u64 * PAGE_SIZE as u64
    }
}
