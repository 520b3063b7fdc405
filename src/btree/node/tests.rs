use tempfile::TempDir;

use super::*;
use crate::config::IndexConfig;
use crate::page::INVALID_PAGE_ID;

fn node_file(dir: &TempDir) -> NodeFile {
    let config = IndexConfig::default()
        .path(dir.path().join("nodes.bin"))
        .capacity_pages(64);
    NodeFile::new(PageStore::open(&config).unwrap())
}

fn leaf(key: Key) -> LeafEntry {
    LeafEntry {
        key,
        value: Tuple::from(format!("value {key}").as_str()),
    }
}

fn leaf_keys(f: &NodeFile, id: PageId) -> Vec<Key> {
    f.entries::<LeafEntry>(id)
        .unwrap()
        .into_iter()
        .map(|e| e.key)
        .collect()
}

#[test]
fn allocate_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let mut f = node_file(&dir);
    let n1 = f.allocate_node(INVALID_PAGE_ID, PageType::Leaf).unwrap();
    let n2 = f.allocate_node(n1, PageType::Internal).unwrap();

    assert_eq!(2, n1);
    assert_eq!(3, n2);

    let h1 = f.header(n1).unwrap();
    assert_eq!(0, h1.num_items);
    assert!(h1.is_leaf());
    assert_eq!(INVALID_PAGE_ID, h1.next_leaf);

    let h2 = f.header(n2).unwrap();
    assert_eq!(PageType::Internal, h2.page_type);
    assert_eq!(n1, h2.parent_id);
}

#[test]
fn insert_at_shifts_entries_right() {
    let dir = tempfile::tempdir().unwrap();
    let mut f = node_file(&dir);
    let id = f.allocate_node(INVALID_PAGE_ID, PageType::Leaf).unwrap();

    f.insert_entry_at(id, 0, &leaf(10)).unwrap();
    f.insert_entry_at(id, 1, &leaf(30)).unwrap();
    f.insert_entry_at(id, 1, &leaf(20)).unwrap();
    f.insert_entry_at(id, 0, &leaf(5)).unwrap();

    assert_eq!(vec![5, 10, 20, 30], leaf_keys(&f, id));
    assert_eq!(4, f.header(id).unwrap().num_items);
    assert_eq!(leaf(20), f.entry::<LeafEntry>(id, 2).unwrap());

    // Positions past the end would leave a gap
    assert!(matches!(
        f.insert_entry_at(id, 6, &leaf(40)),
        Err(Error::EntryOutOfBounds { index: 6, .. })
    ));
}

#[test]
fn insert_into_full_page() {
    let dir = tempfile::tempdir().unwrap();
    let mut f = node_file(&dir);
    let id = f.allocate_node(INVALID_PAGE_ID, PageType::Leaf).unwrap();

    for i in 0..LEAF_CAPACITY {
        f.insert_entry_at(id, i, &leaf(i as Key)).unwrap();
    }
    assert!(f
        .insert_entry_at(id, LEAF_CAPACITY, &leaf(1000))
        .is_err());
    assert_eq!(LEAF_CAPACITY, f.header(id).unwrap().num_items);
}

#[test]
fn remove_at_shifts_entries_left() {
    let dir = tempfile::tempdir().unwrap();
    let mut f = node_file(&dir);
    let id = f.allocate_node(INVALID_PAGE_ID, PageType::Leaf).unwrap();
    let entries: Vec<_> = [1, 2, 3, 4].into_iter().map(leaf).collect();
    f.replace_entries(id, &entries).unwrap();

    assert_eq!(leaf(2), f.remove_entry_at::<LeafEntry>(id, 1).unwrap());
    assert_eq!(vec![1, 3, 4], leaf_keys(&f, id));
    assert_eq!(leaf(4), f.remove_entry_at::<LeafEntry>(id, 2).unwrap());
    assert_eq!(vec![1, 3], leaf_keys(&f, id));
    assert!(f.remove_entry_at::<LeafEntry>(id, 2).is_err());
}

#[test]
fn entry_type_must_match_page_type() {
    let dir = tempfile::tempdir().unwrap();
    let mut f = node_file(&dir);
    let id = f.allocate_node(INVALID_PAGE_ID, PageType::Internal).unwrap();

    assert!(matches!(
        f.insert_entry_at(id, 0, &leaf(1)),
        Err(Error::CorruptedPage { .. })
    ));
    assert!(f.entries::<LeafEntry>(id).is_err());
}

#[test]
fn binary_search_positions() {
    let dir = tempfile::tempdir().unwrap();
    let mut f = node_file(&dir);
    let id = f.allocate_node(INVALID_PAGE_ID, PageType::Leaf).unwrap();

    assert_eq!(
        SearchResult::NotFound(0),
        f.binary_search::<LeafEntry>(id, 3).unwrap()
    );

    let entries: Vec<_> = [10, 20, 30].into_iter().map(leaf).collect();
    f.replace_entries(id, &entries).unwrap();

    assert_eq!(
        SearchResult::NotFound(0),
        f.binary_search::<LeafEntry>(id, 3).unwrap()
    );
    assert_eq!(
        SearchResult::Found(0),
        f.binary_search::<LeafEntry>(id, 10).unwrap()
    );
    assert_eq!(
        SearchResult::NotFound(2),
        f.binary_search::<LeafEntry>(id, 25).unwrap()
    );
    assert_eq!(
        SearchResult::Found(2),
        f.binary_search::<LeafEntry>(id, 30).unwrap()
    );
    assert_eq!(
        SearchResult::NotFound(3),
        f.binary_search::<LeafEntry>(id, 31).unwrap()
    );
}

#[test]
fn route_on_less_or_equal() {
    let dir = tempfile::tempdir().unwrap();
    let mut f = node_file(&dir);
    let id = f.allocate_node(INVALID_PAGE_ID, PageType::Internal).unwrap();
    let mut header = f.header(id).unwrap();
    header.extra_ptr = 100;
    f.write_header(&header).unwrap();
    f.replace_entries(
        id,
        &[
            InternalEntry { key: 10, child: 101 },
            InternalEntry { key: 20, child: 102 },
        ],
    )
    .unwrap();

    assert_eq!(100, f.route(id, i32::MIN).unwrap());
    assert_eq!(100, f.route(id, 9).unwrap());
    // Ties go to the right
    assert_eq!(101, f.route(id, 10).unwrap());
    assert_eq!(101, f.route(id, 19).unwrap());
    assert_eq!(102, f.route(id, 20).unwrap());
    assert_eq!(102, f.route(id, i32::MAX).unwrap());

    assert_eq!(vec![100, 101, 102], f.children(id).unwrap());
}

#[test]
fn entries_are_stored_in_page_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let mut f = node_file(&dir);
    let id = f.allocate_node(INVALID_PAGE_ID, PageType::Internal).unwrap();
    f.insert_entry_at(id, 0, &InternalEntry { key: 7, child: 9 })
        .unwrap();

    let page = f.store().get(id).unwrap();
    assert_eq!(&7i32.to_le_bytes(), &page[HEADER_SIZE..(HEADER_SIZE + 4)]);
    assert_eq!(
        &9i32.to_le_bytes(),
        &page[(HEADER_SIZE + 4)..(HEADER_SIZE + 8)]
    );
}
