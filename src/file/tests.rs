use tempfile::TempDir;

use super::*;

fn config_in(dir: &TempDir, capacity_pages: usize) -> IndexConfig {
    IndexConfig::default()
        .path(dir.path().join("index.bin"))
        .capacity_pages(capacity_pages)
}

#[test]
fn cold_start_creates_meta_and_root() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir, 16);
    let store = PageStore::open(&config).unwrap();

    // The file is sized to its full capacity
    let file_size = std::fs::metadata(&config.path).unwrap().len();
    assert_eq!((16 * PAGE_SIZE) as u64, file_size);

    assert_eq!(16, store.capacity());
    assert_eq!(2, store.total_pages_allocated());
    assert_eq!(1, store.root_page_id().unwrap());

    let meta = PageHeader::read(0, store.get(0).unwrap()).unwrap();
    assert_eq!(PageType::Meta, meta.page_type);
    let root = PageHeader::read(1, store.get(1).unwrap()).unwrap();
    assert_eq!(PageType::Leaf, root.page_type);
    assert_eq!(1, root.page_id);
    assert_eq!(INVALID_PAGE_ID, root.parent_id);
    assert_eq!(INVALID_PAGE_ID, root.next_leaf);
    assert_eq!(0, root.num_items);
}

#[test]
fn allocate_pages() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = PageStore::open(&config_in(&dir, 16)).unwrap();

    let p1 = store.allocate_page().unwrap();
    let p2 = store.allocate_page().unwrap();
    let p3 = store.allocate_page().unwrap();

    assert_eq!(2, p1);
    assert_eq!(3, p2);
    assert_eq!(4, p3);
    assert_eq!(5, store.total_pages_allocated());

    // New pages are zero-initialized
    assert!(store.get(p2).unwrap().iter().all(|b| *b == 0));
    assert_eq!(PAGE_SIZE, store.get(p2).unwrap().len());
}

#[test]
fn allocated_page_is_zeroed_even_if_file_had_data() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = PageStore::open(&config_in(&dir, 8)).unwrap();
    store.get_mut(5).unwrap().fill(0xAB);

    while store.total_pages_allocated() < 5 {
        store.allocate_page().unwrap();
    }
    let id = store.allocate_page().unwrap();
    assert_eq!(5, id);
    assert!(store.get(id).unwrap().iter().all(|b| *b == 0));
}

#[test]
fn mutations_are_visible_through_new_views() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = PageStore::open(&config_in(&dir, 8)).unwrap();
    let id = store.allocate_page().unwrap();

    store.get_mut(id).unwrap()[100] = 42;
    assert_eq!(42, store.get(id).unwrap()[100]);
}

#[test]
fn invalid_page_ids() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = PageStore::open(&config_in(&dir, 8)).unwrap();

    assert!(matches!(store.get(-1), Err(Error::NoSuchPage(-1))));
    assert!(matches!(store.get(8), Err(Error::NoSuchPage(8))));
    assert!(matches!(store.get_mut(100), Err(Error::NoSuchPage(100))));
    // The last page is still valid, even if not allocated
    assert!(store.get(7).is_ok());
}

#[test]
fn store_exhausted_is_recoverable() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = PageStore::open(&config_in(&dir, 4)).unwrap();

    assert_eq!(2, store.allocate_page().unwrap());
    assert_eq!(3, store.allocate_page().unwrap());

    assert!(matches!(
        store.allocate_page(),
        Err(Error::StoreExhausted {
            capacity: 4,
            needed: 1,
            free: 0
        })
    ));
    // A failed allocation does not change the counter
    assert_eq!(4, store.total_pages_allocated());
    assert!(store.allocate_page().is_err());
}

#[test]
fn capacity_too_small() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        PageStore::open(&config_in(&dir, 1)),
        Err(Error::CapacityTooSmall(1))
    ));
}

#[test]
fn warm_start_recovers_meta_data() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir, 32);

    {
        let mut store = PageStore::open(&config).unwrap();
        for _ in 0..5 {
            store.allocate_page().unwrap();
        }
        store.set_root_page_id(4).unwrap();
        store.get_mut(4).unwrap()[HEADER_SIZE] = 99;
        store.close().unwrap();
    }

    let store = PageStore::open(&config).unwrap();
    assert_eq!(7, store.total_pages_allocated());
    assert_eq!(4, store.root_page_id().unwrap());
    assert_eq!(99, store.get(4).unwrap()[HEADER_SIZE]);
}

#[test]
fn drop_writes_allocation_counter() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir, 32);

    {
        let mut store = PageStore::open(&config).unwrap();
        store.allocate_page().unwrap();
        store.allocate_page().unwrap();
    }

    let store = PageStore::open(&config).unwrap();
    assert_eq!(4, store.total_pages_allocated());
}

#[test]
fn corrupted_meta_page() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir, 8);

    {
        let mut store = PageStore::open(&config).unwrap();
        // Pretend the meta page is a leaf
        let mut header = PageHeader::read(0, store.get(0).unwrap()).unwrap();
        header.page_type = PageType::Leaf;
        header.write(store.get_mut(0).unwrap()).unwrap();
        store.close().unwrap();
    }
    assert!(matches!(
        PageStore::open(&config),
        Err(Error::CorruptedPage { page_id: 0, .. })
    ));
}

#[test]
fn meta_page_with_more_pages_than_capacity() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut store = PageStore::open(&config_in(&dir, 32)).unwrap();
        for _ in 0..20 {
            store.allocate_page().unwrap();
        }
        store.close().unwrap();
    }
    // Reopening the same file with a smaller capacity can't work
    assert!(matches!(
        PageStore::open(&config_in(&dir, 8)),
        Err(Error::CorruptedPage { page_id: 0, .. })
    ));
}
