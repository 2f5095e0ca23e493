//! Criterion harness for matching-path latency.
//!
//! Measures:
//! - Add that rests (no match)
//! - Add that fully crosses, at several book depths
//! - Cancel at several book sizes
//! - Mixed workload

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nanex::{OrderBook, OutputEvent, Side};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

fn bench_add_no_match(c: &mut Criterion) {
    let mut book = OrderBook::new(0, 64 * 1024, 256);
    let mut events: Vec<OutputEvent> = Vec::with_capacity(64);
    let mut coid = 0u64;

    c.bench_function("add_no_match", |b| {
        b.iter(|| {
            coid += 1;
            events.clear();
            // Bids at 10, asks never arrive: pure insert path. The cancel
            // keeps the pool at steady state across arbitrarily many
            // iterations.
            book.add(1, coid, Side::Buy, 10, 100, &mut events);
            black_box(&events);
            events.clear();
            book.cancel(1, coid, &mut events);
        })
    });
}

fn bench_add_full_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_full_match");

    for depth in [1u64, 10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let mut book = OrderBook::new(0, 64 * 1024, 256);
            let mut events: Vec<OutputEvent> = Vec::with_capacity(64);

            for i in 0..depth {
                book.add(1, i, Side::Sell, 100, 100, &mut events);
                events.clear();
            }

            let mut coid = 1_000_000u64;
            b.iter(|| {
                coid += 2;
                events.clear();
                book.add(2, coid, Side::Buy, 100, 100, &mut events);
                black_box(&events);
                // Replenish the consumed ask.
                events.clear();
                book.add(1, coid + 1, Side::Sell, 100, 100, &mut events);
            })
        });
    }

    group.finish();
}

fn bench_cancel(c: &mut Criterion) {
    let mut group = c.benchmark_group("cancel");

    for book_size in [100u64, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(book_size), &book_size, |b, &book_size| {
            let mut book = OrderBook::new(0, 64 * 1024, 256);
            let mut events: Vec<OutputEvent> = Vec::with_capacity(64);

            // Non-overlapping sides so nothing matches.
            for i in 0..book_size {
                let (side, price) = if i % 2 == 0 {
                    (Side::Buy, 40 + (i % 50) as i64)
                } else {
                    (Side::Sell, 150 + (i % 50) as i64)
                };
                book.add(1, i, side, price, 100, &mut events);
                events.clear();
            }

            let mut cancel_coid = 0u64;
            let mut next_coid = book_size;
            b.iter(|| {
                events.clear();
                book.cancel(1, cancel_coid, &mut events);
                black_box(&events);

                // Replenish in the same slot pattern.
                let (side, price) = if cancel_coid % 2 == 0 {
                    (Side::Buy, 40 + (cancel_coid % 50) as i64)
                } else {
                    (Side::Sell, 150 + (cancel_coid % 50) as i64)
                };
                events.clear();
                book.add(1, next_coid, side, price, 100, &mut events);
                cancel_coid = next_coid;
                next_coid += 1;
            })
        });
    }

    group.finish();
}

fn bench_mixed_workload(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed_workload");

    group.bench_function("70_add_30_cancel", |b| {
        let mut book = OrderBook::new(0, 64 * 1024, 256);
        let mut events: Vec<OutputEvent> = Vec::with_capacity(64);
        let mut rng = ChaCha8Rng::seed_from_u64(0xDEADBEEF);
        let mut coid = 0u64;

        for _ in 0..1_000 {
            coid += 1;
            let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
            book.add(1, coid, side, rng.gen_range(90..110), rng.gen_range(1..500), &mut events);
            events.clear();
        }

        b.iter(|| {
            events.clear();
            // Bias to cancels once the book is deep, so the pool never
            // exhausts no matter how long criterion samples.
            if book.order_count() < 30_000 && rng.gen_bool(0.7) {
                coid += 1;
                let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
                book.add(1, coid, side, rng.gen_range(90..110), rng.gen_range(1..500), &mut events);
            } else {
                let victim = rng.gen_range(1..=coid);
                book.cancel(1, victim, &mut events);
            }
            black_box(&events);
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_add_no_match,
    bench_add_full_match,
    bench_cancel,
    bench_mixed_workload,
);

criterion_main!(benches);
