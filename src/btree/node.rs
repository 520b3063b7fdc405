use crate::error::{Error, Result};
use crate::file::PageStore;
use crate::page::{
    internal_entry, leaf_entry, Key, PageHeader, PageId, PageType, Tuple, HEADER_SIZE,
    INTERNAL_CAPACITY, INTERNAL_ENTRY_SIZE, LEAF_CAPACITY, LEAF_ENTRY_SIZE, TUPLE_SIZE,
};

/// Result of searching a key in the sorted entries of a single page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    Found(usize),
    NotFound(usize),
}

/// A fixed-size entry stored in the payload of a tree page.
pub trait NodeEntry: Sized + Copy {
    const SIZE: usize;
    const CAPACITY: usize;
    const PAGE_TYPE: PageType;

    fn key(&self) -> Key;
    fn read(data: &[u8]) -> Self;
    fn write(&self, data: &mut [u8]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafEntry {
    pub key: Key,
    pub value: Tuple,
}

impl NodeEntry for LeafEntry {
    const SIZE: usize = LEAF_ENTRY_SIZE;
    const CAPACITY: usize = LEAF_CAPACITY;
    const PAGE_TYPE: PageType = PageType::Leaf;

    fn key(&self) -> Key {
        self.key
    }

    fn read(data: &[u8]) -> Self {
        let view = leaf_entry::View::new(data);
        let mut value = [0; TUPLE_SIZE];
        value.copy_from_slice(&view.value().data()[..]);
        LeafEntry {
            key: view.key().read(),
            value: Tuple::new(value),
        }
    }

    fn write(&self, data: &mut [u8]) {
        let mut view = leaf_entry::View::new(data);
        view.key_mut().write(self.key);
        view.value_mut().data_mut()[..].copy_from_slice(self.value.as_bytes());
    }
}

/// Separator key with the child page for all keys greater or equal to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalEntry {
    pub key: Key,
    pub child: PageId,
}

impl NodeEntry for InternalEntry {
    const SIZE: usize = INTERNAL_ENTRY_SIZE;
    const CAPACITY: usize = INTERNAL_CAPACITY;
    const PAGE_TYPE: PageType = PageType::Internal;

    fn key(&self) -> Key {
        self.key
    }

    fn read(data: &[u8]) -> Self {
        let view = internal_entry::View::new(data);
        InternalEntry {
            key: view.key().read(),
            child: view.child_page_id().read(),
        }
    }

    fn write(&self, data: &mut [u8]) {
        let mut view = internal_entry::View::new(data);
        view.key_mut().write(self.key);
        view.child_page_id_mut().write(self.child);
    }
}

fn entry_offset<E: NodeEntry>(idx: usize) -> usize {
    HEADER_SIZE + idx * E::SIZE
}

/// Typed access to the tree pages of a [`PageStore`].
///
/// All entry accessors check the page type and the number of items in the header,
/// so a mismatch between a page and the expected entry layout is reported as
/// corruption instead of silently reading garbage.
pub struct NodeFile {
    store: PageStore,
}

impl NodeFile {
    pub fn new(store: PageStore) -> NodeFile {
        NodeFile { store }
    }

    pub fn store(&self) -> &PageStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut PageStore {
        &mut self.store
    }

    pub fn into_store(self) -> PageStore {
        self.store
    }

    pub fn header(&self, page_id: PageId) -> Result<PageHeader> {
        let header = PageHeader::read(page_id, self.store.get(page_id)?)?;
        if header.page_id != page_id {
            return Err(Error::corrupted(
                page_id,
                format!("header claims to be page {}", header.page_id),
            ));
        }
        Ok(header)
    }

    pub fn write_header(&mut self, header: &PageHeader) -> Result<()> {
        header.write(self.store.get_mut(header.page_id)?)
    }

    /// Header of a page that must be of the given type.
    pub fn typed_header(&self, page_id: PageId, page_type: PageType) -> Result<PageHeader> {
        let header = self.header(page_id)?;
        if header.page_type != page_type {
            return Err(Error::corrupted(
                page_id,
                format!(
                    "expected a {page_type:?} page, but found {:?}",
                    header.page_type
                ),
            ));
        }
        Ok(header)
    }

    /// Allocate a new, empty node of the given type.
    ///
    /// Returns the ID of the new node.
    pub fn allocate_node(&mut self, parent_id: PageId, page_type: PageType) -> Result<PageId> {
        let page_id = self.store.allocate_page()?;
        self.write_header(&PageHeader::new(page_id, parent_id, page_type))?;
        Ok(page_id)
    }

    pub fn set_parent(&mut self, page_id: PageId, parent_id: PageId) -> Result<()> {
        let mut header = self.header(page_id)?;
        header.parent_id = parent_id;
        self.write_header(&header)
    }

    pub fn entry<E: NodeEntry>(&self, page_id: PageId, idx: usize) -> Result<E> {
        let header = self.typed_header(page_id, E::PAGE_TYPE)?;
        if idx >= header.num_items {
            return Err(Error::EntryOutOfBounds {
                page_id,
                index: idx,
            });
        }
        let offset = entry_offset::<E>(idx);
        let page = self.store.get(page_id)?;
        Ok(E::read(&page[offset..(offset + E::SIZE)]))
    }

    /// Copies all entries of a page into a vector.
    pub fn entries<E: NodeEntry>(&self, page_id: PageId) -> Result<Vec<E>> {
        let header = self.typed_header(page_id, E::PAGE_TYPE)?;
        let page = self.store.get(page_id)?;
        let result = (0..header.num_items)
            .map(|i| {
                let offset = entry_offset::<E>(i);
                E::read(&page[offset..(offset + E::SIZE)])
            })
            .collect();
        Ok(result)
    }

    /// Replaces all entries of a page and sets its number of items accordingly.
    pub fn replace_entries<E: NodeEntry>(&mut self, page_id: PageId, entries: &[E]) -> Result<()> {
        let mut header = self.typed_header(page_id, E::PAGE_TYPE)?;
        if entries.len() > E::CAPACITY {
            return Err(Error::EntryOutOfBounds {
                page_id,
                index: entries.len() - 1,
            });
        }
        let page = self.store.get_mut(page_id)?;
        for (i, e) in entries.iter().enumerate() {
            let offset = entry_offset::<E>(i);
            e.write(&mut page[offset..(offset + E::SIZE)]);
        }
        header.num_items = entries.len();
        self.write_header(&header)
    }

    /// Insert an entry at the given position.
    ///
    /// Every entry at or after `idx` moves one slot to the right.
    pub fn insert_entry_at<E: NodeEntry>(
        &mut self,
        page_id: PageId,
        idx: usize,
        entry: &E,
    ) -> Result<()> {
        let mut header = self.typed_header(page_id, E::PAGE_TYPE)?;
        if idx > header.num_items || header.num_items >= E::CAPACITY {
            return Err(Error::EntryOutOfBounds {
                page_id,
                index: idx,
            });
        }

        let page = self.store.get_mut(page_id)?;
        let start = entry_offset::<E>(idx);
        let end = entry_offset::<E>(header.num_items);
        page.copy_within(start..end, start + E::SIZE);
        entry.write(&mut page[start..(start + E::SIZE)]);

        header.num_items += 1;
        self.write_header(&header)
    }

    /// Remove the entry at the given position.
    ///
    /// Every entry after `idx` moves one slot to the left.
    pub fn remove_entry_at<E: NodeEntry>(&mut self, page_id: PageId, idx: usize) -> Result<E> {
        let mut header = self.typed_header(page_id, E::PAGE_TYPE)?;
        if idx >= header.num_items {
            return Err(Error::EntryOutOfBounds {
                page_id,
                index: idx,
            });
        }

        let page = self.store.get_mut(page_id)?;
        let start = entry_offset::<E>(idx);
        let end = entry_offset::<E>(header.num_items);
        let removed = E::read(&page[start..(start + E::SIZE)]);
        page.copy_within((start + E::SIZE)..end, start);
        // Don't leave a stale copy of the last entry behind
        page[(end - E::SIZE)..end].fill(0);

        header.num_items -= 1;
        self.write_header(&header)?;
        Ok(removed)
    }

    /// Binary search for the key in the sorted entries of a page.
    ///
    /// If the key is not found, the position where it would be inserted is returned.
    pub fn binary_search<E: NodeEntry>(&self, page_id: PageId, key: Key) -> Result<SearchResult> {
        let header = self.typed_header(page_id, E::PAGE_TYPE)?;
        let page = self.store.get(page_id)?;

        let mut low = 0;
        let mut high = header.num_items;
        while low < high {
            let mid = low + (high - low) / 2;
            let offset = entry_offset::<E>(mid);
            let mid_key = E::read(&page[offset..(offset + E::SIZE)]).key();
            if mid_key == key {
                return Ok(SearchResult::Found(mid));
            } else if mid_key < key {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        Ok(SearchResult::NotFound(low))
    }

    /// The child of an internal page that is responsible for the given key.
    ///
    /// This is the child of the last separator that is less or equal to the key,
    /// or the extra pointer if all separators are larger.
    pub fn route(&self, page_id: PageId, key: Key) -> Result<PageId> {
        let header = self.typed_header(page_id, PageType::Internal)?;
        let child = match self.binary_search::<InternalEntry>(page_id, key)? {
            SearchResult::Found(i) => self.entry::<InternalEntry>(page_id, i)?.child,
            SearchResult::NotFound(0) => header.extra_ptr,
            SearchResult::NotFound(i) => self.entry::<InternalEntry>(page_id, i - 1)?.child,
        };
        Ok(child)
    }

    /// All children of an internal page, starting with the extra pointer.
    pub fn children(&self, page_id: PageId) -> Result<Vec<PageId>> {
        let header = self.typed_header(page_id, PageType::Internal)?;
        let mut result = Vec::with_capacity(header.num_items + 1);
        result.push(header.extra_ptr);
        result.extend(
            self.entries::<InternalEntry>(page_id)?
                .into_iter()
                .map(|e| e.child),
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests;
