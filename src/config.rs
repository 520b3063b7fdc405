use std::path::{Path, PathBuf};

/// Name of the backing file when no other path is configured.
pub const DEFAULT_INDEX_FILE: &str = "index.bin";

/// 256 MiB of 4 KiB pages.
pub const DEFAULT_CAPACITY_PAGES: usize = 65536;

/// Upper bound on the number of leaves a single range scan may visit.
pub const DEFAULT_MAX_SCAN_LEAVES: usize = 50_000;

/// Configuration of an index and its backing file.
///
/// ```rust
/// use mmap_bplus_index::IndexConfig;
///
/// let config = IndexConfig::default()
///     .path("/tmp/example-index.bin")
///     .capacity_pages(1024);
/// assert_eq!(1024, config.capacity_pages);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    pub path: PathBuf,
    pub capacity_pages: usize,
    pub max_scan_leaves: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_INDEX_FILE),
            capacity_pages: DEFAULT_CAPACITY_PAGES,
            max_scan_leaves: DEFAULT_MAX_SCAN_LEAVES,
        }
    }
}

impl IndexConfig {
    /// Set the location of the backing file.
    pub fn path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = path.as_ref().to_path_buf();
        self
    }

    /// Set the fixed number of pages the backing file can hold.
    /// The file is sized to `capacity_pages * PAGE_SIZE` bytes.
    pub fn capacity_pages(mut self, capacity_pages: usize) -> Self {
        self.capacity_pages = capacity_pages;
        self
    }

    /// Set how many leaves a range scan may visit before it is aborted.
    pub fn max_scan_leaves(mut self, max_scan_leaves: usize) -> Self {
        self.max_scan_leaves = max_scan_leaves;
        self
    }
}
