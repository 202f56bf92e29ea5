//! Benchmarks for depth engine operations

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use depth_sync::orderbook::{BootstrapMode, DepthEngine};
use depth_sync::{BootstrapSnapshot, DepthUpdate, PriceLevel, Sequence, UpdateKind};
use rust_decimal::Decimal;
use std::str::FromStr;

fn create_snapshot(levels: usize) -> BootstrapSnapshot {
    let bids: Vec<PriceLevel> = (0..levels)
        .map(|i| PriceLevel {
            price: Decimal::from(50000 - i as i64),
            quantity: Decimal::from_str("1.5").unwrap(),
        })
        .collect();

    let asks: Vec<PriceLevel> = (0..levels)
        .map(|i| PriceLevel {
            price: Decimal::from(50001 + i as i64),
            quantity: Decimal::from_str("1.5").unwrap(),
        })
        .collect();

    BootstrapSnapshot {
        sequence: 1000,
        timestamp: 1672531200000,
        bids,
        asks,
    }
}

fn create_update(prev: u64) -> DepthUpdate {
    DepthUpdate {
        symbol: "BTCUSDT".to_string(),
        kind: UpdateKind::Diff,
        sequence: Some(Sequence {
            first: prev + 1,
            last: prev + 1,
            prev: Some(prev),
        }),
        event_time: 1672531200000,
        bids: vec![PriceLevel {
            price: Decimal::from(49999),
            quantity: Decimal::from_str("2.0").unwrap(),
        }],
        asks: vec![PriceLevel {
            price: Decimal::from(50001),
            quantity: Decimal::from_str("2.5").unwrap(),
        }],
    }
}

fn synced_engine(levels: usize) -> DepthEngine {
    let mut engine = DepthEngine::new("BTCUSDT", BootstrapMode::Rest);
    let generation = engine.begin_bootstrap();
    engine.complete_bootstrap(generation, &create_snapshot(levels));
    engine.feed(create_update(1000));
    engine
}

fn benchmark_bootstrap(c: &mut Criterion) {
    let snapshot = create_snapshot(1000);

    c.bench_function("bootstrap_1000_levels", |b| {
        b.iter(|| {
            let mut engine = DepthEngine::new("BTCUSDT", BootstrapMode::Rest);
            let generation = engine.begin_bootstrap();
            engine.complete_bootstrap(generation, black_box(&snapshot));
        })
    });
}

fn benchmark_feed(c: &mut Criterion) {
    let mut engine = synced_engine(1000);
    let mut prev = 1001;

    c.bench_function("feed_and_materialize_1000_levels", |b| {
        b.iter(|| {
            black_box(engine.feed(create_update(prev)));
            prev += 1;
        })
    });
}

fn benchmark_materialize(c: &mut Criterion) {
    let engine = synced_engine(1000);

    c.bench_function("materialize_1000_levels", |b| {
        b.iter(|| {
            black_box(engine.materialize());
        })
    });
}

criterion_group!(
    benches,
    benchmark_bootstrap,
    benchmark_feed,
    benchmark_materialize
);
criterion_main!(benches);
