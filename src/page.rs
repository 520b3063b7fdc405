use std::fmt;
use std::mem::size_of;

use binary_layout::prelude::*;

use crate::error::{Error, Result};

pub type PageId = i32;
pub type Key = i32;

/// Size of a single page, the unit of storage, mapping and I/O.
pub const PAGE_SIZE: usize = 4096;
/// Width of the fixed-size value stored for each key.
pub const TUPLE_SIZE: usize = 100;

pub const INVALID_PAGE_ID: PageId = -1;
pub const META_PAGE_ID: PageId = 0;

// Every page starts with this header, all fields are 32 bit integers.
define_layout!(page_header, LittleEndian, {
    page_id: i32,
    parent_id: i32,
    page_type: i32,
    num_items: i32,
    next_leaf: i32,
    extra_ptr: i32,
});

// Payload of the meta page, directly after its header
define_layout!(meta_data, LittleEndian, {
    root_page_id: i32,
    total_pages_allocated: i32,
});

define_layout!(leaf_entry, LittleEndian, {
    key: i32,
    value: [u8; 100],
});

define_layout!(internal_entry, LittleEndian, {
    key: i32,
    child_page_id: i32,
});

pub const HEADER_SIZE: usize = 6 * size_of::<i32>();
pub const META_DATA_SIZE: usize = 2 * size_of::<i32>();
pub const LEAF_ENTRY_SIZE: usize = size_of::<i32>() + TUPLE_SIZE;
pub const INTERNAL_ENTRY_SIZE: usize = 2 * size_of::<i32>();

/// Maximum number of key/value entries in a leaf page.
pub const LEAF_CAPACITY: usize = (PAGE_SIZE - HEADER_SIZE) / LEAF_ENTRY_SIZE;
/// Maximum number of separator entries in an internal page.
pub const INTERNAL_CAPACITY: usize = (PAGE_SIZE - HEADER_SIZE) / INTERNAL_ENTRY_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Invalid,
    Internal,
    Leaf,
    Meta,
}

impl PageType {
    pub fn from_raw(raw: i32) -> Option<PageType> {
        match raw {
            0 => Some(PageType::Invalid),
            1 => Some(PageType::Internal),
            2 => Some(PageType::Leaf),
            3 => Some(PageType::Meta),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            PageType::Invalid => 0,
            PageType::Internal => 1,
            PageType::Leaf => 2,
            PageType::Meta => 3,
        }
    }

    /// Number of entries a page of this type can hold.
    pub fn capacity(self) -> usize {
        match self {
            PageType::Internal => INTERNAL_CAPACITY,
            PageType::Leaf => LEAF_CAPACITY,
            PageType::Invalid | PageType::Meta => 0,
        }
    }
}

/// Decoded copy of the header at the start of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub page_id: PageId,
    pub parent_id: PageId,
    pub page_type: PageType,
    pub num_items: usize,
    pub next_leaf: PageId,
    pub extra_ptr: PageId,
}

impl PageHeader {
    /// Header of a freshly initialized page without entries, parent or siblings.
    pub fn new(page_id: PageId, parent_id: PageId, page_type: PageType) -> PageHeader {
        PageHeader {
            page_id,
            parent_id,
            page_type,
            num_items: 0,
            next_leaf: INVALID_PAGE_ID,
            extra_ptr: INVALID_PAGE_ID,
        }
    }

    /// Reads and validates the header of the page with the given ID.
    pub fn read(page_id: PageId, page: &[u8]) -> Result<PageHeader> {
        let view = page_header::View::new(&page[..HEADER_SIZE]);

        let raw_type = view.page_type().read();
        let page_type = PageType::from_raw(raw_type)
            .ok_or_else(|| Error::corrupted(page_id, format!("unknown page type {raw_type}")))?;

        let raw_items = view.num_items().read();
        let num_items: usize = raw_items
            .try_into()
            .map_err(|_| Error::corrupted(page_id, format!("negative item count {raw_items}")))?;
        if num_items > page_type.capacity() {
            return Err(Error::corrupted(
                page_id,
                format!("{num_items} items exceed the capacity of a {page_type:?} page"),
            ));
        }

        Ok(PageHeader {
            page_id: view.page_id().read(),
            parent_id: view.parent_id().read(),
            page_type,
            num_items,
            next_leaf: view.next_leaf().read(),
            extra_ptr: view.extra_ptr().read(),
        })
    }

    pub fn write(&self, page: &mut [u8]) -> Result<()> {
        let mut view = page_header::View::new(&mut page[..HEADER_SIZE]);
        view.page_id_mut().write(self.page_id);
        view.parent_id_mut().write(self.parent_id);
        view.page_type_mut().write(self.page_type.as_raw());
        view.num_items_mut().write(self.num_items.try_into()?);
        view.next_leaf_mut().write(self.next_leaf);
        view.extra_ptr_mut().write(self.extra_ptr);
        Ok(())
    }

    pub fn is_leaf(&self) -> bool {
        self.page_type == PageType::Leaf
    }
}

/// Fixed-width value stored with every key.
///
/// Shorter input is zero-padded, longer input is truncated.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tuple([u8; TUPLE_SIZE]);

impl Tuple {
    pub fn new(bytes: [u8; TUPLE_SIZE]) -> Tuple {
        Tuple(bytes)
    }

    pub fn from_bytes(data: &[u8]) -> Tuple {
        let mut bytes = [0; TUPLE_SIZE];
        let len = data.len().min(TUPLE_SIZE);
        bytes[..len].copy_from_slice(&data[..len]);
        Tuple(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TUPLE_SIZE] {
        &self.0
    }

    pub fn into_bytes(self) -> [u8; TUPLE_SIZE] {
        self.0
    }

    /// The value without its zero padding at the end.
    pub fn trimmed(&self) -> &[u8] {
        let end = self
            .0
            .iter()
            .rposition(|b| *b != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        &self.0[..end]
    }
}

impl Default for Tuple {
    fn default() -> Self {
        Tuple([0; TUPLE_SIZE])
    }
}

impl From<&str> for Tuple {
    fn from(s: &str) -> Self {
        Tuple::from_bytes(s.as_bytes())
    }
}

impl From<[u8; TUPLE_SIZE]> for Tuple {
    fn from(bytes: [u8; TUPLE_SIZE]) -> Self {
        Tuple(bytes)
    }
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tuple({:?})", String::from_utf8_lossy(self.trimmed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_sizes() {
        assert_eq!(24, HEADER_SIZE);
        assert_eq!(8, META_DATA_SIZE);
        assert_eq!(104, LEAF_ENTRY_SIZE);
        assert_eq!(8, INTERNAL_ENTRY_SIZE);

        assert_eq!(39, LEAF_CAPACITY);
        assert_eq!(509, INTERNAL_CAPACITY);
    }

    #[test]
    fn entry_byte_layout() {
        let mut data = vec![0; LEAF_ENTRY_SIZE];
        let mut view = leaf_entry::View::new(&mut data[..]);
        view.key_mut().write(-2);
        view.value_mut().data_mut()[TUPLE_SIZE - 1] = 0xff;
        assert_eq!(&(-2i32).to_le_bytes(), &data[0..4]);
        assert_eq!(0xff, data[LEAF_ENTRY_SIZE - 1]);

        let mut data = vec![0; INTERNAL_ENTRY_SIZE];
        let mut view = internal_entry::View::new(&mut data[..]);
        view.key_mut().write(5);
        view.child_page_id_mut().write(9);
        assert_eq!(&5i32.to_le_bytes(), &data[0..4]);
        assert_eq!(&9i32.to_le_bytes(), &data[4..8]);
    }

    #[test]
    fn header_byte_layout() {
        let mut page = vec![0; PAGE_SIZE];
        let header = PageHeader {
            page_id: 7,
            parent_id: INVALID_PAGE_ID,
            page_type: PageType::Leaf,
            num_items: 3,
            next_leaf: 12,
            extra_ptr: INVALID_PAGE_ID,
        };
        header.write(&mut page).unwrap();

        assert_eq!(&7i32.to_le_bytes(), &page[0..4]);
        assert_eq!(&(-1i32).to_le_bytes(), &page[4..8]);
        assert_eq!(&2i32.to_le_bytes(), &page[8..12]);
        assert_eq!(&3i32.to_le_bytes(), &page[12..16]);
        assert_eq!(&12i32.to_le_bytes(), &page[16..20]);
        assert_eq!(&(-1i32).to_le_bytes(), &page[20..24]);

        assert_eq!(header, PageHeader::read(7, &page).unwrap());
    }

    #[test]
    fn corrupted_headers_are_rejected() {
        let mut page = vec![0; PAGE_SIZE];
        page[8..12].copy_from_slice(&42i32.to_le_bytes());
        assert!(matches!(
            PageHeader::read(3, &page),
            Err(Error::CorruptedPage { page_id: 3, .. })
        ));

        PageHeader::new(3, INVALID_PAGE_ID, PageType::Leaf)
            .write(&mut page)
            .unwrap();
        page[12..16].copy_from_slice(&(-5i32).to_le_bytes());
        assert!(PageHeader::read(3, &page).is_err());

        page[12..16].copy_from_slice(&((LEAF_CAPACITY + 1) as i32).to_le_bytes());
        assert!(PageHeader::read(3, &page).is_err());
    }

    #[test]
    fn tuple_padding_and_truncation() {
        let t = Tuple::from("abc");
        assert_eq!(b"abc", t.trimmed());
        assert_eq!(0, t.as_bytes()[3]);
        assert_eq!(0, t.as_bytes()[TUPLE_SIZE - 1]);

        let long = "x".repeat(150);
        let t = Tuple::from(long.as_str());
        assert_eq!(TUPLE_SIZE, t.trimmed().len());

        assert_eq!(0, Tuple::default().trimmed().len());
    }
}
