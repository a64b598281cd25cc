pub mod file_header;
pub mod page_manager;

pub use file_header::{FileHeader, FILE_HEADER_SIZE, VERSION_TAG};
pub use page_manager::{PageManager, PAGE_SIZE};
