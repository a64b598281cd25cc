//! Storage layer implementation for kdb.
//!
//! This module provides the foundation for persistent data storage using a page-based
//! architecture. Key components:
//!
//! - **Page**: Fixed-size (4KB) blocks of data, the basic unit of I/O
//! - **PageManager**: Handles reading/writing pages and the file header on disk
//! - **Pager**: Write-through page cache and monotonic page allocator
//! - **BTreeLeafPage / BTreeInternalPage**: Bit-exact node layouts for the B+-tree
//!
//! Every page write is synchronous. There is no write-ahead log, so a multi-page
//! mutation interrupted half-way is not rolled back.

pub mod disk;
pub mod error;
pub mod page;
pub mod pager;

pub use disk::{PageManager, FILE_HEADER_SIZE, PAGE_SIZE};
pub use error::{StorageError, StorageResult};
pub use page::{Node, NodeType, Page, PageId};
pub use pager::Pager;
