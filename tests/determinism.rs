//! Determinism - identical request streams must produce identical event
//! streams and identical final book state, run after run.

use nanex::{ClientRequest, ExchangeConfig, MatchingEngine, OutputEvent, Side};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Deterministic request stream: mixed NEW/CANCEL over a few instruments.
fn generate_requests(seed: u64, count: usize) -> Vec<ClientRequest> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut requests = Vec::with_capacity(count);
    let mut live: Vec<(u32, u32, u64)> = Vec::new(); // (client, ticker, coid)
    let mut next_coid = 1u64;

    for _ in 0..count {
        if live.is_empty() || rng.gen_bool(0.7) {
            let client = rng.gen_range(1..20);
            let ticker = rng.gen_range(0..4u32);
            let coid = next_coid;
            next_coid += 1;
            requests.push(ClientRequest::new(
                client,
                ticker,
                coid,
                if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell },
                rng.gen_range(90..110),
                rng.gen_range(1..200),
            ));
            live.push((client, ticker, coid));
        } else {
            let (client, ticker, coid) = live.swap_remove(rng.gen_range(0..live.len()));
            requests.push(ClientRequest::cancel(client, ticker, coid));
        }
    }
    requests
}

fn hash_outputs(responses: &[nanex::ClientResponse], updates: &[nanex::MarketUpdate]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for r in responses {
        (r.kind as u8).hash(&mut hasher);
        r.client_id.hash(&mut hasher);
        r.client_order_id.hash(&mut hasher);
        r.market_order_id.hash(&mut hasher);
        r.price.hash(&mut hasher);
        r.exec_qty.hash(&mut hasher);
        r.leaves_qty.hash(&mut hasher);
    }
    for u in updates {
        (u.kind as u8).hash(&mut hasher);
        u.order_id.hash(&mut hasher);
        u.ticker_id.hash(&mut hasher);
        u.price.hash(&mut hasher);
        u.qty.hash(&mut hasher);
        u.priority.hash(&mut hasher);
    }
    hasher.finish()
}

/// Run the stream through a fresh engine, returning (output hash, state hash).
fn run_engine(requests: &[ClientRequest]) -> (u64, u64) {
    let config = ExchangeConfig {
        num_tickers: 4,
        order_pool_capacity: 16 * 1024,
        ..Default::default()
    };
    let (_req_tx, req_rx) = nanex::ring(16);
    let (resp_tx, mut resp_rx) = nanex::ring::<nanex::ClientResponse>(64 * 1024);
    let (upd_tx, mut upd_rx) = nanex::ring::<nanex::MarketUpdate>(64 * 1024);
    let mut engine = MatchingEngine::new(&config, req_rx, resp_tx, upd_tx);

    // Drain per request: process() spins when an outbound ring fills, and
    // there is no other thread here to empty it.
    let mut responses = Vec::new();
    let mut updates = Vec::new();
    for request in requests {
        engine.process(request);
        while let Some(r) = resp_rx.try_pop() {
            responses.push(r);
        }
        while let Some(u) = upd_rx.try_pop() {
            updates.push(u);
        }
    }

    let mut state = DefaultHasher::new();
    for ticker in 0..4 {
        engine.book(ticker).unwrap().state_hash().hash(&mut state);
    }
    (hash_outputs(&responses, &updates), state.finish())
}

#[test]
fn test_determinism_small() {
    const SEED: u64 = 0xDEADBEEF;
    const COUNT: usize = 1_000;
    const RUNS: usize = 10;

    let requests = generate_requests(SEED, COUNT);
    let (first_output, first_state) = run_engine(&requests);

    for run in 1..RUNS {
        let (output, state) = run_engine(&requests);
        assert_eq!(output, first_output, "output hash mismatch on run {run}");
        assert_eq!(state, first_state, "state hash mismatch on run {run}");
    }
}

#[test]
fn test_determinism_large() {
    const SEED: u64 = 0xCAFEBABE;
    const COUNT: usize = 50_000;
    const RUNS: usize = 3;

    let requests = generate_requests(SEED, COUNT);
    let (first_output, first_state) = run_engine(&requests);

    for run in 1..RUNS {
        let (output, state) = run_engine(&requests);
        assert_eq!(output, first_output, "output hash mismatch on run {run}");
        assert_eq!(state, first_state, "state hash mismatch on run {run}");
    }
}

#[test]
fn test_different_seeds_differ() {
    let (a, _) = run_engine(&generate_requests(1, 1_000));
    let (b, _) = run_engine(&generate_requests(2, 1_000));
    assert_ne!(a, b, "different seeds should produce different outputs");
}

/// Book-level event ordering is deterministic too: replaying the same
/// stream element-wise gives the same OutputEvent sequence.
#[test]
fn test_event_sequence_reproducible() {
    let requests = generate_requests(0xFACE, 2_000);

    let collect = || {
        let mut book = nanex::OrderBook::new(0, 16 * 1024, 256);
        let mut all = Vec::new();
        let mut events = Vec::new();
        for request in requests.iter().filter(|r| r.ticker_id == 0) {
            events.clear();
            match request.kind {
                nanex::RequestKind::New => book.add(
                    request.client_id,
                    request.client_order_id,
                    request.side,
                    request.price,
                    request.qty,
                    &mut events,
                ),
                nanex::RequestKind::Cancel => {
                    book.cancel(request.client_id, request.client_order_id, &mut events)
                }
                nanex::RequestKind::Invalid => {}
            }
            all.extend(events.iter().copied());
        }
        all
    };

    let a: Vec<OutputEvent> = collect();
    let b: Vec<OutputEvent> = collect();
    assert_eq!(a, b);
}
