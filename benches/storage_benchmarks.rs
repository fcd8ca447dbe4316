use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use dtn_bundle_store::{
    AllSelector, Bundle, BundleId, BundleStorage, DiskBundleStorage,
    DiskStorageConfigBuilder, MemoryBundleStorage, MetaBundle, RedbBundleStorage,
    RedbStorageConfigBuilder,
};
use std::{fs, path::PathBuf};

fn generate_bundles(count: u64, payload: usize) -> Vec<Bundle> {
    (0..count)
        .map(|seq| {
            Bundle::new(BundleId::new("dtn://bench/app", 1000, seq), "dtn://peer/app")
                .with_lifetime(3600)
                .with_payload(vec![0x5A; payload])
        })
        .collect()
}

fn bench_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("bench_{}_{:08x}", tag, rand::random::<u32>()))
}

fn open_disk(path: &PathBuf) -> DiskBundleStorage {
    let config = DiskStorageConfigBuilder::default()
        .path(path.clone())
        .build()
        .unwrap();
    DiskBundleStorage::open(config).unwrap()
}

fn open_redb(path: &PathBuf) -> RedbBundleStorage {
    let config = RedbStorageConfigBuilder::default()
        .db_path(path.join("bundles.redb"))
        .build()
        .unwrap();
    RedbBundleStorage::open(config).unwrap()
}

fn store_all(storage: &dyn BundleStorage, bundles: &[Bundle]) {
    for bundle in bundles {
        storage.store(bundle).unwrap();
    }
    storage.wait();
}

fn bench_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage_store");
    group.sample_size(10);

    for &count in &[100u64, 1_000] {
        let bundles = generate_bundles(count, 1024);

        group.bench_with_input(BenchmarkId::new("memory", count), &bundles, |b, data| {
            b.iter_batched(
                || MemoryBundleStorage::unlimited().unwrap(),
                |storage| store_all(&storage, data),
                BatchSize::SmallInput,
            )
        });

        let path = bench_dir("disk_store");
        group.bench_with_input(BenchmarkId::new("disk", count), &bundles, |b, data| {
            b.iter_batched(
                || {
                    let storage = open_disk(&path);
                    storage.clear().unwrap();
                    storage.wait();
                    storage
                },
                |storage| store_all(&storage, data),
                BatchSize::PerIteration,
            )
        });
        let _ = fs::remove_dir_all(&path);

        let path = bench_dir("redb_store");
        group.bench_with_input(BenchmarkId::new("redb", count), &bundles, |b, data| {
            b.iter_batched(
                || {
                    let storage = open_redb(&path);
                    storage.clear().unwrap();
                    storage
                },
                |storage| store_all(&storage, data),
                BatchSize::PerIteration,
            )
        });
        let _ = fs::remove_dir_all(&path);
    }

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage_get");
    let bundles = generate_bundles(1_000, 1024);

    let memory = MemoryBundleStorage::unlimited().unwrap();
    store_all(&memory, &bundles);

    let disk_path = bench_dir("disk_get");
    let disk = open_disk(&disk_path);
    store_all(&disk, &bundles);

    let redb_path = bench_dir("redb_get");
    let redb = open_redb(&redb_path);
    store_all(&redb, &bundles);

    let backends: [(&str, &dyn BundleStorage); 3] =
        [("memory", &memory), ("disk", &disk), ("redb", &redb)];
    for (name, storage) in backends {
        group.bench_function(BenchmarkId::new(name, bundles.len()), |b| {
            b.iter(|| {
                for bundle in &bundles {
                    storage.get(bundle.id()).unwrap();
                }
            })
        });
    }
    group.finish();

    drop((disk, redb));
    let _ = fs::remove_dir_all(disk_path);
    let _ = fs::remove_dir_all(redb_path);
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage_select");

    for &count in &[1_000u64, 10_000] {
        let storage = MemoryBundleStorage::unlimited().unwrap();
        store_all(&storage, &generate_bundles(count, 16));

        group.bench_with_input(BenchmarkId::new("memory_all", count), &storage, |b, storage| {
            b.iter(|| {
                let mut found: Vec<MetaBundle> = Vec::new();
                storage.select(&AllSelector::new(0), &mut found).unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_store, bench_get, bench_select);
criterion_main!(benches);
