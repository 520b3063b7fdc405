use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use fake::Fake;
use mmap_bplus_index::{BPlusTree, IndexConfig, Tuple};
use rand::{rngs::SmallRng, seq::SliceRandom, SeedableRng};
use tempfile::TempDir;

const N_ENTRIES: i32 = 10_000;

fn create_tree(dir: &TempDir) -> BPlusTree {
    let config = IndexConfig::default()
        .path(dir.path().join("bench.bin"))
        .capacity_pages(4096);
    BPlusTree::open(&config).unwrap()
}

fn fill(tree: &mut BPlusTree, keys: &[i32]) {
    let name_faker = fake::faker::name::en::Name();
    for key in keys {
        let name: String = name_faker.fake();
        tree.insert(*key, Tuple::from(name.as_str())).unwrap();
    }
}

fn insertion(c: &mut Criterion) {
    let mut g = c.benchmark_group("insert 10.000 entries");
    g.sample_size(10);

    let sequential: Vec<i32> = (0..N_ENTRIES).collect();
    let mut random = sequential.clone();
    random.shuffle(&mut SmallRng::seed_from_u64(42));

    g.bench_function("sequential keys", |b| {
        b.iter_batched(
            || tempfile::tempdir().unwrap(),
            |dir| {
                let mut tree = create_tree(&dir);
                fill(&mut tree, &sequential);
                tree
            },
            BatchSize::PerIteration,
        )
    });

    g.bench_function("random keys", |b| {
        b.iter_batched(
            || tempfile::tempdir().unwrap(),
            |dir| {
                let mut tree = create_tree(&dir);
                fill(&mut tree, &random);
                tree
            },
            BatchSize::PerIteration,
        )
    });

    g.finish()
}

fn search(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let mut tree = create_tree(&dir);
    let keys: Vec<i32> = (0..N_ENTRIES).collect();
    fill(&mut tree, &keys);

    let search_value = Tuple::from("known value");
    tree.remove(N_ENTRIES / 2).unwrap();
    tree.insert(N_ENTRIES / 2, search_value).unwrap();

    c.bench_function("get existing key", |b| {
        b.iter(|| {
            let found = tree.get(N_ENTRIES / 2).unwrap().unwrap();
            assert_eq!(search_value, found);
        })
    });

    c.bench_function("get missing key", |b| {
        b.iter(|| {
            assert!(tree.get(N_ENTRIES + 1).unwrap().is_none());
        })
    });

    c.bench_function("range over 1.000 keys", |b| {
        b.iter(|| {
            let n = tree
                .range(2_000, 2_999)
                .unwrap()
                .filter(|e| e.is_ok())
                .count();
            assert_eq!(1_000, n);
        })
    });
}

criterion_group!(benches, insertion, search);
criterion_main!(benches);
