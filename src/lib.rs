mod btree;
mod config;
mod error;
pub mod ffi;
mod file;
mod page;
pub mod workload;

pub use btree::{BPlusTree, Range};
pub use config::{IndexConfig, DEFAULT_CAPACITY_PAGES, DEFAULT_INDEX_FILE, DEFAULT_MAX_SCAN_LEAVES};
pub use error::{Error, Result};
pub use file::PageStore;
pub use page::{
    Key, PageHeader, PageId, PageType, Tuple, HEADER_SIZE, INTERNAL_CAPACITY, INVALID_PAGE_ID,
    LEAF_CAPACITY, META_PAGE_ID, PAGE_SIZE, TUPLE_SIZE,
};
