use tracing::{debug, warn};

use crate::{
    config::IndexConfig,
    error::{Error, Result},
    file::PageStore,
    page::{Key, PageId, PageType, Tuple, INVALID_PAGE_ID, LEAF_CAPACITY},
};

use node::{InternalEntry, LeafEntry, NodeEntry, NodeFile, SearchResult};

mod node;

/// Descending more levels than this can only happen with cyclic page links.
const MAX_DEPTH: usize = 64;

/// B+Tree index over `i32` keys and fixed-size [`Tuple`] values, stored in a
/// memory mapped [`PageStore`].
///
/// Operations similar to the interface of [`std::collections::BTreeMap`] are implemented.
/// But since the index works with files, all of them return a `Result` to allow error-handling.
/// A missing key or a duplicate insert is not an error, but reported through the
/// returned `Option` or `bool`.
///
/// Removing entries never merges or frees pages, a leaf can become (and stay) empty.
pub struct BPlusTree {
    nodes: NodeFile,
    root_id: PageId,
    max_scan_leaves: usize,
}

impl BPlusTree {
    /// Open the index file of the configuration, creating it if it does not exist yet.
    pub fn open(config: &IndexConfig) -> Result<BPlusTree> {
        let store = PageStore::open(config)?;
        BPlusTree::with_store(store, config)
    }

    /// Create an index on an already opened page store.
    pub fn with_store(store: PageStore, config: &IndexConfig) -> Result<BPlusTree> {
        let root_id = store.root_page_id()?;
        let nodes = NodeFile::new(store);
        let root = nodes.header(root_id)?;
        if root.page_type != PageType::Leaf && root.page_type != PageType::Internal {
            return Err(Error::corrupted(
                root_id,
                format!("root must be a tree page, but is {:?}", root.page_type),
            ));
        }
        Ok(BPlusTree {
            nodes,
            root_id,
            max_scan_leaves: config.max_scan_leaves,
        })
    }

    /// ID of the current root page.
    pub fn root_page_id(&self) -> PageId {
        self.root_id
    }

    /// The underlying page store.
    pub fn store(&self) -> &PageStore {
        self.nodes.store()
    }

    /// Searches for a key in the index and returns the value if found.
    pub fn get(&self, key: Key) -> Result<Option<Tuple>> {
        let leaf_id = self.find_leaf(key)?;
        match self.nodes.binary_search::<LeafEntry>(leaf_id, key)? {
            SearchResult::Found(i) => Ok(Some(self.nodes.entry::<LeafEntry>(leaf_id, i)?.value)),
            SearchResult::NotFound(_) => Ok(None),
        }
    }

    /// Returns whether the index contains the given key.
    pub fn contains_key(&self, key: Key) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Insert a new entry into the index.
    ///
    /// Returns `false` without changing anything if the key already exists.
    ///
    /// If the leaf needs to be split and the store does not have enough free pages
    /// for all the pages the split allocates, [`Error::StoreExhausted`] is
    /// returned before anything is changed.
    pub fn insert(&mut self, key: Key, value: Tuple) -> Result<bool> {
        let leaf_id = self.find_leaf(key)?;
        let idx = match self.nodes.binary_search::<LeafEntry>(leaf_id, key)? {
            SearchResult::Found(_) => return Ok(false),
            SearchResult::NotFound(i) => i,
        };

        let entry = LeafEntry { key, value };
        let header = self.nodes.typed_header(leaf_id, PageType::Leaf)?;
        if header.num_items < LEAF_CAPACITY {
            self.nodes.insert_entry_at(leaf_id, idx, &entry)?;
        } else {
            let needed = self.pages_needed_for_split(leaf_id)?;
            let free = self.nodes.store().free_pages();
            if free < needed {
                return Err(Error::StoreExhausted {
                    capacity: self.nodes.store().capacity(),
                    needed,
                    free,
                });
            }
            self.split_leaf(leaf_id, idx, entry)?;
        }
        Ok(true)
    }

    /// Removes the key from the index.
    ///
    /// Returns `false` if the key did not exist.
    pub fn remove(&mut self, key: Key) -> Result<bool> {
        let leaf_id = self.find_leaf(key)?;
        match self.nodes.binary_search::<LeafEntry>(leaf_id, key)? {
            SearchResult::Found(i) => {
                self.nodes.remove_entry_at::<LeafEntry>(leaf_id, i)?;
                Ok(true)
            }
            SearchResult::NotFound(_) => Ok(false),
        }
    }

    /// Return an iterator over all entries with `low <= key <= high`, ordered by key.
    ///
    /// # Example
    ///
    /// ```rust
    /// use mmap_bplus_index::{BPlusTree, IndexConfig, Error};
    ///
    /// fn main() -> std::result::Result<(), Error> {
    ///     let dir = tempfile::tempdir()?;
    ///     let config = IndexConfig::default().path(dir.path().join("idx.bin")).capacity_pages(64);
    ///     let mut t = BPlusTree::open(&config)?;
    ///     t.insert(1, "a".into())?;
    ///     t.insert(200, "c".into())?;
    ///     t.insert(20, "b".into())?;
    ///
    ///     for e in t.range(0, 100)? {
    ///         let (k, v) = e?;
    ///         dbg!(k, v);
    ///     }
    ///     Ok(())
    /// }
    /// ```
    ///
    /// At most `max_scan_leaves` leaves are visited. When more leaves would be needed,
    /// the iterator returns [`Error::ScanAborted`] after the entries found so far.
    pub fn range(&self, low: Key, high: Key) -> Result<Range<'_>> {
        let first_leaf = self.find_leaf(low)?;
        Range::new(&self.nodes, first_leaf, low, high, self.max_scan_leaves)
    }

    /// Synchronously flush all changes to disk.
    pub fn flush(&self) -> Result<()> {
        self.nodes.store().sync()
    }

    /// Flush all changes and release the backing file.
    pub fn close(self) -> Result<()> {
        self.nodes.into_store().close()
    }

    /// Number of levels from the root to the leaves.
    pub fn height(&self) -> Result<usize> {
        let mut height = 1;
        let mut current = self.root_id;
        loop {
            let header = self.nodes.header(current)?;
            match header.page_type {
                PageType::Leaf => return Ok(height),
                PageType::Internal => {
                    current = header.extra_ptr;
                    height += 1;
                    if height > MAX_DEPTH {
                        return Err(Error::corrupted(current, "tree is too deep"));
                    }
                }
                other => {
                    return Err(Error::corrupted(
                        current,
                        format!("{other:?} page is not part of the tree"),
                    ))
                }
            }
        }
    }

    /// Find the leaf that is responsible for the given key.
    pub fn find_leaf(&self, key: Key) -> Result<PageId> {
        let mut current = self.root_id;
        for _ in 0..MAX_DEPTH {
            let header = self.nodes.header(current)?;
            match header.page_type {
                PageType::Leaf => return Ok(current),
                PageType::Internal => current = self.nodes.route(current, key)?,
                other => {
                    return Err(Error::corrupted(
                        current,
                        format!("{other:?} page is not part of the tree"),
                    ))
                }
            }
        }
        Err(Error::corrupted(
            current,
            format!("no leaf found after descending {MAX_DEPTH} levels"),
        ))
    }

    /// Number of pages allocated when splitting the given full leaf.
    ///
    /// The split continues upwards through every full ancestor and needs a new
    /// root if it reaches the top.
    fn pages_needed_for_split(&self, leaf_id: PageId) -> Result<usize> {
        let mut needed = 1;
        let mut current = self.nodes.header(leaf_id)?.parent_id;
        while current != INVALID_PAGE_ID {
            let parent = self.nodes.typed_header(current, PageType::Internal)?;
            if parent.num_items < InternalEntry::CAPACITY {
                return Ok(needed);
            }
            needed += 1;
            if needed > MAX_DEPTH {
                return Err(Error::corrupted(current, "tree is too deep"));
            }
            current = parent.parent_id;
        }
        // A new root above the old one
        Ok(needed + 1)
    }

    fn update_root(&mut self, new_root: PageId) -> Result<()> {
        self.nodes.store_mut().set_root_page_id(new_root)?;
        self.root_id = new_root;
        debug!(root_id = new_root, "installed new root");
        Ok(())
    }

    /// Split the full leaf into two, inserting the new entry at position `idx` on the way.
    fn split_leaf(&mut self, old_id: PageId, idx: usize, entry: LeafEntry) -> Result<()> {
        let old = self.nodes.typed_header(old_id, PageType::Leaf)?;

        let mut buffer = self.nodes.entries::<LeafEntry>(old_id)?;
        buffer.insert(idx, entry);

        let new_id = self.nodes.allocate_node(old.parent_id, PageType::Leaf)?;

        let mid = buffer.len() / 2;
        self.nodes.replace_entries(old_id, &buffer[..mid])?;
        self.nodes.replace_entries(new_id, &buffer[mid..])?;

        // Link the new leaf into the leaf chain directly after the old one
        let mut new_header = self.nodes.header(new_id)?;
        new_header.next_leaf = old.next_leaf;
        self.nodes.write_header(&new_header)?;
        let mut old_header = self.nodes.header(old_id)?;
        old_header.next_leaf = new_id;
        self.nodes.write_header(&old_header)?;

        let separator = buffer[mid].key;
        debug!(old_id, new_id, separator, "split leaf");
        self.insert_into_parent(old_id, separator, new_id)
    }

    /// Register `right_id` as the new right sibling of `left_id` in their parent.
    /// All keys in `right_id` are greater or equal to the separator key.
    fn insert_into_parent(&mut self, left_id: PageId, separator: Key, right_id: PageId) -> Result<()> {
        let parent_id = self.nodes.header(left_id)?.parent_id;

        if parent_id == INVALID_PAGE_ID {
            // The left page was the root, create a new one above both pages
            let root_id = self
                .nodes
                .allocate_node(INVALID_PAGE_ID, PageType::Internal)?;
            let mut root = self.nodes.header(root_id)?;
            root.extra_ptr = left_id;
            self.nodes.write_header(&root)?;
            self.nodes.replace_entries(
                root_id,
                &[InternalEntry {
                    key: separator,
                    child: right_id,
                }],
            )?;
            self.nodes.set_parent(left_id, root_id)?;
            self.nodes.set_parent(right_id, root_id)?;
            return self.update_root(root_id);
        }

        let entry = InternalEntry {
            key: separator,
            child: right_id,
        };
        let idx = match self.nodes.binary_search::<InternalEntry>(parent_id, separator)? {
            SearchResult::Found(_) => {
                return Err(Error::corrupted(
                    parent_id,
                    format!("separator {separator} already exists"),
                ))
            }
            SearchResult::NotFound(i) => i,
        };

        let parent = self.nodes.typed_header(parent_id, PageType::Internal)?;
        if parent.num_items < InternalEntry::CAPACITY {
            self.nodes.insert_entry_at(parent_id, idx, &entry)
        } else {
            self.split_internal(parent_id, idx, entry)
        }
    }

    /// Split the full internal page into two.
    ///
    /// The middle entry is not kept in any of the halves: its key moves up to the
    /// parent and its child becomes the extra pointer of the new right page.
    fn split_internal(&mut self, old_id: PageId, idx: usize, entry: InternalEntry) -> Result<()> {
        let old = self.nodes.typed_header(old_id, PageType::Internal)?;

        let mut buffer = self.nodes.entries::<InternalEntry>(old_id)?;
        buffer.insert(idx, entry);

        let new_id = self
            .nodes
            .allocate_node(old.parent_id, PageType::Internal)?;

        let mid = buffer.len() / 2;
        let promoted = buffer[mid];
        self.nodes.replace_entries(old_id, &buffer[..mid])?;
        self.nodes.replace_entries(new_id, &buffer[(mid + 1)..])?;

        let mut new_header = self.nodes.header(new_id)?;
        new_header.extra_ptr = promoted.child;
        self.nodes.write_header(&new_header)?;

        // All children of the new page need to know their new parent
        for child in self.nodes.children(new_id)? {
            self.nodes.set_parent(child, new_id)?;
        }

        debug!(old_id, new_id, separator = promoted.key, "split internal page");
        self.insert_into_parent(old_id, promoted.key, new_id)
    }

    /// Walks the whole tree and checks its structural invariants.
    ///
    /// Returns the number of entries in the tree.
    pub fn check_consistency(&self) -> Result<usize> {
        let mut leaves = Vec::new();
        let mut leaf_depth = None;
        self.check_subtree(
            self.root_id,
            INVALID_PAGE_ID,
            (None, None),
            1,
            &mut leaf_depth,
            &mut leaves,
        )?;

        // The leaf chain must visit the same leaves in the same order
        let mut current = match leaves.first() {
            Some(first) => *first,
            None => return Err(Error::corrupted(self.root_id, "tree has no leaves")),
        };
        let mut number_of_entries = 0;
        let mut previous_key: Option<Key> = None;
        for (i, expected) in leaves.iter().enumerate() {
            if current != *expected {
                return Err(Error::corrupted(
                    current,
                    format!("leaf chain visits page {current} at position {i}, expected {expected}"),
                ));
            }
            for e in self.nodes.entries::<LeafEntry>(current)? {
                if previous_key.map_or(false, |p| p >= e.key) {
                    return Err(Error::corrupted(current, "leaf chain is not in ascending order"));
                }
                previous_key = Some(e.key);
                number_of_entries += 1;
            }
            current = self.nodes.header(current)?.next_leaf;
        }
        if current != INVALID_PAGE_ID {
            return Err(Error::corrupted(current, "leaf chain continues after the last leaf"));
        }
        Ok(number_of_entries)
    }

    fn check_subtree(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        bounds: (Option<Key>, Option<Key>),
        depth: usize,
        leaf_depth: &mut Option<usize>,
        leaves: &mut Vec<PageId>,
    ) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(Error::corrupted(page_id, "tree is too deep"));
        }
        let header = self.nodes.header(page_id)?;
        if header.parent_id != expected_parent {
            return Err(Error::corrupted(
                page_id,
                format!(
                    "parent is {}, but page is a child of {expected_parent}",
                    header.parent_id
                ),
            ));
        }

        let keys: Vec<Key> = match header.page_type {
            PageType::Leaf => self
                .nodes
                .entries::<LeafEntry>(page_id)?
                .iter()
                .map(|e| e.key)
                .collect(),
            PageType::Internal => self
                .nodes
                .entries::<InternalEntry>(page_id)?
                .iter()
                .map(|e| e.key)
                .collect(),
            other => {
                return Err(Error::corrupted(
                    page_id,
                    format!("{other:?} page is not part of the tree"),
                ))
            }
        };
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::corrupted(page_id, "keys are not strictly ascending"));
        }
        let (lower, upper) = bounds;
        let out_of_bounds = keys.iter().any(|k| {
            lower.map_or(false, |l| *k < l) || upper.map_or(false, |u| *k >= u)
        });
        if out_of_bounds {
            return Err(Error::corrupted(page_id, "key outside of the separator bounds"));
        }

        if header.is_leaf() {
            match leaf_depth {
                Some(d) if *d != depth => {
                    return Err(Error::corrupted(page_id, "leaves are on different levels"))
                }
                _ => *leaf_depth = Some(depth),
            }
            leaves.push(page_id);
        } else {
            if keys.is_empty() {
                return Err(Error::corrupted(page_id, "internal page without separators"));
            }
            let children = self.nodes.children(page_id)?;
            for (i, child) in children.iter().enumerate() {
                let child_lower = if i == 0 { lower } else { Some(keys[i - 1]) };
                let child_upper = if i < keys.len() { Some(keys[i]) } else { upper };
                self.check_subtree(
                    *child,
                    page_id,
                    (child_lower, child_upper),
                    depth + 1,
                    leaf_depth,
                    leaves,
                )?;
            }
        }
        Ok(())
    }
}

/// Iterator over the entries of a key range, following the leaf chain.
pub struct Range<'a> {
    nodes: &'a NodeFile,
    low: Key,
    high: Key,
    leaf_id: PageId,
    num_items: usize,
    next_leaf: PageId,
    position: usize,
    leaves_visited: usize,
    max_leaves: usize,
    finished: bool,
}

impl<'a> Range<'a> {
    fn new(
        nodes: &'a NodeFile,
        first_leaf: PageId,
        low: Key,
        high: Key,
        max_leaves: usize,
    ) -> Result<Range<'a>> {
        let mut result = Range {
            nodes,
            low,
            high,
            leaf_id: first_leaf,
            num_items: 0,
            next_leaf: INVALID_PAGE_ID,
            position: 0,
            leaves_visited: 0,
            max_leaves,
            finished: low > high,
        };
        if !result.finished {
            result.enter_leaf(first_leaf)?;
        }
        Ok(result)
    }

    /// Number of leaves that have been visited so far.
    pub fn leaves_visited(&self) -> usize {
        self.leaves_visited
    }

    fn enter_leaf(&mut self, leaf_id: PageId) -> Result<()> {
        let header = self.nodes.typed_header(leaf_id, PageType::Leaf)?;
        self.leaf_id = leaf_id;
        self.num_items = header.num_items;
        self.next_leaf = header.next_leaf;
        self.position = 0;
        self.leaves_visited += 1;
        Ok(())
    }

    /// Whether the leaf could hold keys that are still part of the range.
    /// Empty leaves don't tell, so the scan must go on.
    fn may_continue_in(&self, leaf_id: PageId) -> Result<bool> {
        let header = self.nodes.typed_header(leaf_id, PageType::Leaf)?;
        if header.num_items == 0 {
            return Ok(true);
        }
        let first = self.nodes.entry::<LeafEntry>(leaf_id, 0)?;
        Ok(first.key <= self.high)
    }

    fn advance(&mut self) -> Result<Option<(Key, Tuple)>> {
        loop {
            if self.position >= self.num_items {
                if self.next_leaf == INVALID_PAGE_ID {
                    return Ok(None);
                }
                if self.leaves_visited >= self.max_leaves {
                    if !self.may_continue_in(self.next_leaf)? {
                        return Ok(None);
                    }
                    warn!(
                        leaves_visited = self.leaves_visited,
                        low = self.low,
                        high = self.high,
                        "aborting range scan"
                    );
                    return Err(Error::ScanAborted {
                        leaves_visited: self.leaves_visited,
                    });
                }
                self.enter_leaf(self.next_leaf)?;
                continue;
            }

            let entry = self.nodes.entry::<LeafEntry>(self.leaf_id, self.position)?;
            self.position += 1;
            if entry.key < self.low {
                continue;
            }
            if entry.key > self.high {
                return Ok(None);
            }
            return Ok(Some((entry.key, entry.value)));
        }
    }
}

impl<'a> Iterator for Range<'a> {
    type Item = Result<(Key, Tuple)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.advance() {
            Ok(Some(result)) => Some(Ok(result)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
