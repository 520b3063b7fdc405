#![no_main]
use libfuzzer_sys::fuzz_target;

use mmap_bplus_index::{BPlusTree, Error, IndexConfig, Tuple};
use std::collections::BTreeMap;

fuzz_target!(|data: (Vec<(i32, u32)>, Vec<i32>)| {
    let dir = tempfile::tempdir().unwrap();
    let config = IndexConfig::default()
        .path(dir.path().join("fuzz.bin"))
        .capacity_pages(1024);
    let mut m = BTreeMap::default();
    let mut fixture = BPlusTree::open(&config).unwrap();

    for (key, value) in data.0 {
        let value = Tuple::from(value.to_string().as_str());
        // Existing keys keep their first value
        let inserted = !m.contains_key(&key);
        m.entry(key).or_insert(value);
        assert_eq!(inserted, fixture.insert(key, value).unwrap());
    }
    for key in data.1 {
        assert_eq!(m.remove(&key).is_some(), fixture.remove(key).unwrap());
    }

    assert_eq!(m.len(), fixture.check_consistency().unwrap());

    for (k, v1) in m.iter() {
        assert!(fixture.contains_key(*k).unwrap());
        assert_eq!(Some(*v1), fixture.get(*k).unwrap());
    }

    let m: Vec<_> = m.into_iter().collect();
    let fixture_result: Result<Vec<_>, Error> = fixture.range(i32::MIN, i32::MAX).unwrap().collect();
    assert_eq!(m, fixture_result.unwrap());
});
