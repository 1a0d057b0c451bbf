use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use plancache::cache::PlanCache;
use plancache::config::PlanCacheConfigBuilder;
use plancache::fingerprint::Fingerprint;

fn build_cache(max_entries: u32) -> PlanCache {
    let config = PlanCacheConfigBuilder {
        max_entries,
        ..Default::default()
    }
    .build()
    .unwrap();
    PlanCache::new(config, 16 * 1024 * 1024)
}

fn bench_insertion(c: &mut Criterion) {
    let mut group = c.benchmark_group("insertion");
    for size in [100u32, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let cache = build_cache(size);
                for i in 0..size as u64 {
                    cache.try_insert(
                        Fingerprint::new(0, 1, i, 0),
                        b"generic plan payload",
                        &[i as u32],
                        &[],
                        20.0,
                        5.0,
                    );
                }
                black_box(cache.len());
            });
        });
    }
    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let cache = build_cache(10_000);
    for i in 0..10_000u64 {
        cache.try_insert(
            Fingerprint::new(0, 1, i, 0),
            b"generic plan payload",
            &[i as u32],
            &[],
            20.0,
            5.0,
        );
    }

    c.bench_function("lookup_hit", |b| {
        let key = Fingerprint::new(0, 1, 500, 0);
        b.iter(|| black_box(cache.plan_request(&key)));
    });

    c.bench_function("lookup_miss", |b| {
        let key = Fingerprint::new(0, 1, 999_999, 0);
        b.iter(|| black_box(cache.plan_request(&key)));
    });
}

criterion_group!(benches, bench_insertion, bench_lookup);
criterion_main!(benches);
