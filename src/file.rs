use std::fs::{File, OpenOptions};
use std::ops::Range;

use memmap2::{MmapMut, MmapOptions};
use tracing::{info, trace, warn};

use crate::config::IndexConfig;
use crate::error::{Error, Result};
use crate::page::{
    meta_data, PageHeader, PageId, PageType, HEADER_SIZE, INVALID_PAGE_ID, META_DATA_SIZE,
    META_PAGE_ID, PAGE_SIZE,
};

/// Fixed-capacity file of pages, mapped into memory.
///
/// Page 0 is the meta page holding the root page ID and the allocation counter.
/// Pages are handed out as slices directly over the mapped bytes, there is no
/// copy or cache in between.
pub struct PageStore {
    mmap: MmapMut,
    // Kept open for the lifetime of the mapping
    _file: File,
    capacity: usize,
    next_page_id: PageId,
    closed: bool,
}

impl PageStore {
    /// Opens (and if necessary creates) the backing file and maps it.
    ///
    /// On the first open of an empty file, the meta page and an empty root leaf
    /// are created and flushed to disk.
    pub fn open(config: &IndexConfig) -> Result<PageStore> {
        let capacity = config.capacity_pages;
        if capacity < 2 {
            return Err(Error::CapacityTooSmall(capacity));
        }
        // All page IDs must be representable on disk
        let _: PageId = capacity.try_into()?;

        let total_size = capacity
            .checked_mul(PAGE_SIZE)
            .ok_or(Error::CapacityTooSmall(capacity))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&config.path)?;
        let file_size = file.metadata()?.len();
        let total_size_u64: u64 = total_size.try_into()?;
        if file_size < total_size_u64 {
            file.set_len(total_size_u64)?;
        }

        let mmap = unsafe { MmapOptions::new().len(total_size).map_mut(&file)? };

        let mut store = PageStore {
            mmap,
            _file: file,
            capacity,
            next_page_id: 1,
            // Nothing is written back until the meta page has been validated
            closed: true,
        };

        let meta = PageHeader::read(META_PAGE_ID, store.get(META_PAGE_ID)?)?;
        match meta.page_type {
            PageType::Invalid => store.initialize()?,
            PageType::Meta => store.recover()?,
            other => {
                return Err(Error::corrupted(
                    META_PAGE_ID,
                    format!("expected meta page, but found {other:?} page"),
                ))
            }
        }
        store.closed = false;
        info!(
            path = %config.path.display(),
            capacity,
            allocated = store.next_page_id,
            "opened page store"
        );
        Ok(store)
    }

    fn initialize(&mut self) -> Result<()> {
        let meta = PageHeader::new(META_PAGE_ID, INVALID_PAGE_ID, PageType::Meta);
        meta.write(self.get_mut(META_PAGE_ID)?)?;
        self.next_page_id = 1;

        let root_id = self.allocate_page()?;
        PageHeader::new(root_id, INVALID_PAGE_ID, PageType::Leaf).write(self.get_mut(root_id)?)?;
        self.set_root_page_id(root_id)?;

        self.sync()?;
        info!(root_id, "initialized new index file");
        Ok(())
    }

    fn recover(&mut self) -> Result<()> {
        let (root_id, allocated) = {
            let view = self.meta_view()?;
            (
                view.root_page_id().read(),
                view.total_pages_allocated().read(),
            )
        };
        let next_page_id = allocated.max(1);
        let next_index: usize = next_page_id.try_into()?;
        if next_index > self.capacity {
            return Err(Error::corrupted(
                META_PAGE_ID,
                format!(
                    "{next_page_id} pages allocated, but capacity is {}",
                    self.capacity
                ),
            ));
        }
        if root_id < 1 || root_id >= next_page_id {
            return Err(Error::corrupted(
                META_PAGE_ID,
                format!("root page {root_id} was never allocated"),
            ));
        }
        self.next_page_id = next_page_id;
        info!(root_id, allocated = next_page_id, "recovered existing index file");
        Ok(())
    }

    /// Number of pages the backing file can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of pages allocated so far, including the meta page.
    pub fn total_pages_allocated(&self) -> PageId {
        self.next_page_id
    }

    /// Number of pages that can still be allocated.
    pub fn free_pages(&self) -> usize {
        let allocated: usize = self.next_page_id.try_into().unwrap_or(self.capacity);
        self.capacity.saturating_sub(allocated)
    }

    fn page_range(&self, page_id: PageId) -> Result<Range<usize>> {
        let index: usize = page_id
            .try_into()
            .map_err(|_| Error::NoSuchPage(page_id))?;
        if index >= self.capacity {
            return Err(Error::NoSuchPage(page_id));
        }
        let offset = index * PAGE_SIZE;
        Ok(offset..(offset + PAGE_SIZE))
    }

    /// Returns the bytes of the page with the given ID.
    pub fn get(&self, page_id: PageId) -> Result<&[u8]> {
        let range = self.page_range(page_id)?;
        Ok(&self.mmap[range])
    }

    /// Returns the mutable bytes of the page with the given ID.
    pub fn get_mut(&mut self, page_id: PageId) -> Result<&mut [u8]> {
        let range = self.page_range(page_id)?;
        Ok(&mut self.mmap[range])
    }

    /// Allocate a new, zero-initialized page.
    ///
    /// Returns the ID of the new page or [`Error::StoreExhausted`] if all pages are in use.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        let page_id = self.next_page_id;
        let index: usize = page_id.try_into()?;
        if index >= self.capacity {
            return Err(Error::StoreExhausted {
                capacity: self.capacity,
                needed: 1,
                free: 0,
            });
        }

        self.get_mut(page_id)?.fill(0);
        self.next_page_id += 1;
        self.write_allocation_counter()?;

        trace!(page_id, "allocated page");
        Ok(page_id)
    }

    pub fn root_page_id(&self) -> Result<PageId> {
        let page = self.get(META_PAGE_ID)?;
        let view = meta_data::View::new(&page[HEADER_SIZE..(HEADER_SIZE + META_DATA_SIZE)]);
        Ok(view.root_page_id().read())
    }

    pub fn set_root_page_id(&mut self, root_id: PageId) -> Result<()> {
        self.meta_view()?.root_page_id_mut().write(root_id);
        Ok(())
    }

    fn meta_view(&mut self) -> Result<meta_data::View<&mut [u8]>> {
        let page = self.get_mut(META_PAGE_ID)?;
        Ok(meta_data::View::new(
            &mut page[HEADER_SIZE..(HEADER_SIZE + META_DATA_SIZE)],
        ))
    }

    fn write_allocation_counter(&mut self) -> Result<()> {
        let next_page_id = self.next_page_id;
        let is_meta = PageHeader::read(META_PAGE_ID, self.get(META_PAGE_ID)?)?.page_type
            == PageType::Meta;
        if is_meta {
            self.meta_view()?
                .total_pages_allocated_mut()
                .write(next_page_id);
        }
        Ok(())
    }

    /// Synchronously flushes all mapped pages to disk.
    pub fn sync(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }

    /// Writes the allocation counter back, flushes and releases the mapping.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.write_allocation_counter()?;
        self.sync()
    }
}

impl Drop for PageStore {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let result = self.write_allocation_counter().and_then(|_| self.sync());
        if let Err(e) = result {
            warn!(error = %e, "could not flush page store when dropping it");
        }
    }
}

#[cfg(test)]
mod tests;
