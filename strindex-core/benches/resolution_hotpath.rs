use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use strindex_core::{FetchType, KeyCollection, KeyResult, KeyResults};

fn bench_keys(orgs: u64, strings_per_org: usize) -> KeyCollection {
    KeyCollection::from_iter((0..orgs).flat_map(|org_id| {
        (0..strings_per_org).map(move |i| (org_id, format!("tag.value.{}", i)))
    }))
}

fn half_resolved(keys: &KeyCollection) -> KeyResults {
    let mut results = KeyResults::new();
    results.add_key_results(
        keys.as_tuples()
            .into_iter()
            .enumerate()
            .filter(|(i, _)| i % 2 == 0)
            .map(|(i, (org_id, s))| KeyResult::new(org_id, s, Some(i as u64 + 1))),
        Some(FetchType::CacheHit),
        None,
    );
    results
}

fn bench_resolution(c: &mut Criterion) {
    let keys = bench_keys(50, 200);
    let cached = half_resolved(&keys);

    c.bench_function("results/get_unmapped_keys", |b| {
        b.iter(|| {
            let mut results = cached.clone();
            let residual = results.get_unmapped_keys(black_box(&keys));
            black_box(residual.size());
        });
    });

    c.bench_function("results/merge_and_project", |b| {
        let mut db = KeyResults::new();
        db.add_key_results(
            keys.as_tuples()
                .into_iter()
                .map(|(org_id, s)| KeyResult::new(org_id, s, Some(7))),
            Some(FetchType::DbRead),
            None,
        );
        b.iter(|| {
            let merged = cached.merge(black_box(&db));
            black_box(merged.get_mapped_key_strings_to_ints().len());
        });
    });
}

criterion_group!(benches, bench_resolution);
criterion_main!(benches);
