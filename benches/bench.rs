// Criterion benchmarks for the matching hot path

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use propsync::core::{compute_diff, is_compatible, Matcher};
use propsync::models::{
    AmenityFlags, AmenityPrefs, Buyer, Listing, ListingStatus, RemoteAssociationRecord,
};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};

fn create_listing() -> Listing {
    Listing {
        tenant_id: "t1".to_string(),
        external_id: "l1".to_string(),
        price: Decimal::from(200_000),
        rooms: 3,
        area: 80,
        zone: "Z1".to_string(),
        amenities: AmenityFlags::default(),
        status: ListingStatus::Active,
        media_urls: vec![],
    }
}

fn create_buyer(id: usize) -> Buyer {
    Buyer {
        tenant_id: "t1".to_string(),
        external_id: format!("b{id}"),
        name: None,
        max_budget: Decimal::from(150_000 + (id as i64 % 10) * 20_000),
        min_rooms: (id % 4) as u32,
        min_area: 40 + (id % 5) as u32 * 10,
        desired_zones: vec![format!("Z{}", id % 3)],
        amenity_prefs: AmenityPrefs::default(),
    }
}

fn bench_predicate(c: &mut Criterion) {
    let listing = create_listing();
    let buyer = create_buyer(1);

    c.bench_function("is_compatible", |b| {
        b.iter(|| is_compatible(black_box(&listing), black_box(&buyer)));
    });
}

fn bench_desired_set(c: &mut Criterion) {
    let matcher = Matcher::new();
    let listing = create_listing();

    let mut group = c.benchmark_group("desired_buyers_for_listing");
    for size in [100, 1_000, 10_000] {
        let buyers: Vec<Buyer> = (0..size).map(create_buyer).collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &buyers, |b, buyers| {
            b.iter(|| matcher.desired_buyers_for_listing(black_box(&listing), buyers));
        });
    }
    group.finish();
}

fn bench_diff(c: &mut Criterion) {
    let desired: BTreeSet<String> = (0..500).map(|i| format!("b{i}")).collect();
    let observed: HashMap<String, RemoteAssociationRecord> = (250..750)
        .map(|i| {
            (
                format!("b{i}"),
                RemoteAssociationRecord {
                    relation_id: Some(format!("rel_{i}")),
                    left_id: "l1".to_string(),
                    right_id: format!("b{i}"),
                },
            )
        })
        .collect();

    c.bench_function("compute_diff_500x500", |b| {
        b.iter(|| compute_diff(black_box(&desired), black_box(&observed)));
    });
}

criterion_group!(benches, bench_predicate, bench_desired_set, bench_diff);
criterion_main!(benches);
