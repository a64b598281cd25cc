//! Page cache and allocator on top of [`PageManager`].
//!
//! The pager is the single owner of page buffers. Callers receive copies of the
//! cached bytes, modify them, and hand them back through [`Pager::write_page`],
//! which updates the cache and writes the page through to the file before
//! returning. The cache is an unbounded map keyed by page id; nothing is evicted
//! until the last handle is dropped.
//!
//! `Pager` is a cheap handle: clones share the same file, cache and allocation
//! counter, so a tree and any number of cursors can address one page arena.

use crate::storage::disk::{FileHeader, PageManager, PAGE_SIZE};
use crate::storage::error::StorageResult;
use crate::storage::page::PageId;
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct Pager {
    inner: Arc<Mutex<PagerState>>,
}

struct PagerState {
    page_manager: PageManager,
    header: FileHeader,
    cache: HashMap<PageId, Box<[u8; PAGE_SIZE]>>,
    num_pages: u32,
}

impl PagerState {
    fn persist_header(&mut self) -> StorageResult<()> {
        self.header.next_free_page = self.num_pages;
        self.page_manager.write_header(&self.header)
    }
}

impl Pager {
    /// Open the database file at `path`, creating it if it does not exist.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if !path.exists() {
            return Self::create(path);
        }

        let mut page_manager = PageManager::open(path)?;
        let header = page_manager.read_header()?;
        let num_pages = header.next_free_page.max(page_manager.num_pages()?);
        debug!(
            "opened {:?}: {} pages, catalog root {:?}",
            path, num_pages, header.catalog_root_page
        );

        Ok(Self::from_parts(page_manager, header, num_pages))
    }

    /// Create a fresh database file at `path`, truncating any existing file.
    pub fn create(path: &Path) -> StorageResult<Self> {
        let page_manager = PageManager::create(path)?;
        debug!("created {:?}", path);
        Ok(Self::from_parts(page_manager, FileHeader::new(), 0))
    }

    fn from_parts(page_manager: PageManager, header: FileHeader, num_pages: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PagerState {
                page_manager,
                header,
                cache: HashMap::new(),
                num_pages,
            })),
        }
    }

    /// Fetch a copy of the page. Pages that were never written come back zero-filled.
    pub fn get_page(&self, page_id: PageId) -> StorageResult<Box<[u8; PAGE_SIZE]>> {
        let mut state = self.inner.lock();
        if let Some(data) = state.cache.get(&page_id) {
            return Ok(data.clone());
        }

        let mut data = Box::new([0u8; PAGE_SIZE]);
        state.page_manager.read_page(page_id, &mut data)?;
        trace!("loaded page {} from disk", page_id);
        state.cache.insert(page_id, data.clone());
        Ok(data)
    }

    /// Store the page in the cache and write it through to the file.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> StorageResult<()> {
        let mut state = self.inner.lock();
        state.page_manager.write_page(page_id, data)?;
        trace!("wrote page {}", page_id);

        match state.cache.get_mut(&page_id) {
            Some(cached) => cached.copy_from_slice(data),
            None => {
                state.cache.insert(page_id, Box::new(*data));
            }
        }

        if page_id.0 >= state.num_pages {
            state.num_pages = page_id.0 + 1;
            state.persist_header()?;
        }
        Ok(())
    }

    /// Allocate a new page number. Page numbers are never reused.
    pub fn get_free_page(&self) -> StorageResult<PageId> {
        let mut state = self.inner.lock();
        let page_id = PageId(state.num_pages);
        state.num_pages += 1;
        state.persist_header()?;
        trace!("allocated page {}", page_id);
        Ok(page_id)
    }

    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }

    pub fn has_free_list(&self) -> bool {
        self.inner.lock().header.has_free_list
    }

    pub fn file_header(&self) -> FileHeader {
        self.inner.lock().header.clone()
    }

    pub fn catalog_root(&self) -> Option<PageId> {
        self.inner.lock().header.catalog_root_page
    }

    pub fn set_catalog_root(&self, root: PageId) -> StorageResult<()> {
        let mut state = self.inner.lock();
        if state.header.catalog_root_page == Some(root) {
            return Ok(());
        }
        state.header.catalog_root_page = Some(root);
        state.persist_header()
    }

    /// Force written pages to stable storage.
    pub fn flush(&self) -> StorageResult<()> {
        self.inner.lock().page_manager.sync()
    }

    /// Release this handle. Every write is already in the file, so nothing is flushed.
    pub fn close(self) {
        debug!("closing pager handle");
    }
}
