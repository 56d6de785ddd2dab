use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::time::Duration;
use weak_hashmap::{supplemental_hash, BucketTable, Tracked};

fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
    std::iter::from_fn(move || {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        Some(s)
    })
}

fn hash(x: u64) -> u32 {
    supplemental_hash((x as u32) ^ ((x >> 32) as u32))
}

fn filled(n: usize, seed: u64) -> (BucketTable<u64, u64>, Vec<Tracked<u64>>) {
    let mut t = BucketTable::with_capacity(n.next_power_of_two() * 2, 0.75).unwrap();
    let keys: Vec<_> = lcg(seed).take(n).map(Tracked::new).collect();
    for (i, k) in keys.iter().enumerate() {
        t.insert(hash(**k), Tracked::downgrade(k), i as u64);
    }
    (t, keys)
}

fn bench_insert_100k(c: &mut Criterion) {
    c.bench_function("bucket_table::insert_100k", |b| {
        b.iter_batched(
            || lcg(1).take(100_000).map(Tracked::new).collect::<Vec<_>>(),
            |keys| {
                let mut t = BucketTable::with_capacity(1 << 18, 0.75).unwrap();
                for (i, k) in keys.iter().enumerate() {
                    t.insert(hash(**k), Tracked::downgrade(k), i as u64);
                }
                black_box((t, keys))
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_find_hit(c: &mut Criterion) {
    c.bench_function("bucket_table::find_hit", |b| {
        let (t, keys) = filled(50_000, 7);
        let mut it = keys.iter().cycle();
        b.iter(|| {
            let k = it.next().unwrap();
            black_box(t.find(hash(**k), |w| w.ptr_eq(k)));
        })
    });
}

fn bench_remove_all_50k(c: &mut Criterion) {
    c.bench_function("bucket_table::remove_all_50k", |b| {
        b.iter_batched(
            || {
                let (t, keys) = filled(50_000, 9);
                let handles: Vec<_> = keys
                    .iter()
                    .map(|k| t.find(hash(**k), |w| w.ptr_eq(k)).unwrap())
                    .collect();
                (t, keys, handles)
            },
            |(mut t, keys, handles)| {
                for h in handles {
                    black_box(t.remove(h));
                }
                black_box((t, keys))
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_rehash_half_dead(c: &mut Criterion) {
    c.bench_function("bucket_table::rehash_50k_half_dead", |b| {
        b.iter_batched(
            || {
                let (t, mut keys) = filled(50_000, 13);
                keys.truncate(25_000);
                (t, keys)
            },
            |(mut t, keys)| {
                let mut stale = Vec::new();
                let cap = t.capacity() * 2;
                let old = t.rehash_into(cap, &mut stale);
                t.reset_threshold();
                black_box((t, keys, old, stale))
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(30)
        .measurement_time(Duration::from_secs(8))
        .warm_up_time(Duration::from_secs(2))
}

criterion_group! {
    name = benches;
    config = bench_config();
    targets = bench_insert_100k, bench_find_hit, bench_remove_all_50k, bench_rehash_half_dead
}
criterion_main!(benches);
