//! Matching engine - the single writer for all order books.
//!
//! One thread owns every book and is the sole consumer of the inbound
//! request ring and sole producer of the response and market-update rings.
//! Book operations return an ordered event stream; the engine routes each
//! element to its ring in that order, so the cross-ring guarantee (TRADE
//! before the fill response it explains) survives the split.
//!
//! Back-pressure policy: the engine spins when an outbound ring is full.
//! It never drops a response or an update; inbound producers throttle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use tracing::info;

use crate::config::ExchangeConfig;
use crate::messages::{
    ClientRequest, ClientResponse, MarketUpdate, OutputEvent, RequestKind, ResponseKind,
};
use crate::order_book::OrderBook;
use crate::ring::{Consumer, Producer};
use crate::timing::LatencyStats;
use crate::types::{Side, TickerId, ORDER_ID_INVALID, PRICE_INVALID, QTY_INVALID};

/// The matching engine state, prior to `start()` moving it onto its thread.
pub struct MatchingEngine {
    books: Vec<OrderBook>,
    requests: Consumer<ClientRequest>,
    responses: Producer<ClientResponse>,
    updates: Producer<MarketUpdate>,
    run: Arc<AtomicBool>,
    latency: Option<LatencyStats>,
    events: Vec<OutputEvent>,
}

impl MatchingEngine {
    /// Build the engine with one book per configured ticker.
    pub fn new(
        config: &ExchangeConfig,
        requests: Consumer<ClientRequest>,
        responses: Producer<ClientResponse>,
        updates: Producer<MarketUpdate>,
    ) -> Self {
        let books = (0..config.num_tickers)
            .map(|ticker| {
                OrderBook::new(
                    ticker as TickerId,
                    config.order_pool_capacity,
                    config.level_pool_capacity,
                )
            })
            .collect();
        Self {
            books,
            requests,
            responses,
            updates,
            run: Arc::new(AtomicBool::new(false)),
            latency: config.latency_stats.then(LatencyStats::new),
            events: Vec::with_capacity(256),
        }
    }

    /// Process one request: dispatch to the named instrument's book, then
    /// fan the resulting events out to the outbound rings in order.
    ///
    /// Public for tests and benches; production traffic arrives through the
    /// request ring.
    pub fn process(&mut self, request: &ClientRequest) {
        let started = self.latency.as_ref().map(|_| Instant::now());

        self.events.clear();

        let ticker = request.ticker_id as usize;
        if ticker >= self.books.len() || request.kind == RequestKind::Invalid {
            self.responses.push_spin(ClientResponse {
                kind: ResponseKind::CancelRejected,
                client_id: request.client_id,
                ticker_id: request.ticker_id,
                client_order_id: request.client_order_id,
                market_order_id: ORDER_ID_INVALID,
                side: Side::Invalid,
                price: PRICE_INVALID,
                exec_qty: QTY_INVALID,
                leaves_qty: QTY_INVALID,
            });
            return;
        }

        let book = &mut self.books[ticker];
        match request.kind {
            RequestKind::New => book.add(
                request.client_id,
                request.client_order_id,
                request.side,
                request.price,
                request.qty,
                &mut self.events,
            ),
            RequestKind::Cancel => {
                book.cancel(request.client_id, request.client_order_id, &mut self.events)
            }
            RequestKind::Invalid => unreachable!("filtered above"),
        }

        for event in self.events.drain(..) {
            match event {
                OutputEvent::Response(response) => self.responses.push_spin(response),
                OutputEvent::Update(update) => self.updates.push_spin(update),
            }
        }

        if let (Some(stats), Some(started)) = (self.latency.as_mut(), started) {
            stats.record(started.elapsed().as_nanos() as u64);
        }
    }

    /// Read-only access to a book, for tests and the exchange dashboard.
    pub fn book(&self, ticker_id: TickerId) -> Option<&OrderBook> {
        self.books.get(ticker_id as usize)
    }

    /// Spawn the engine thread. The loop drains the request ring, yielding
    /// between polls, and exits once stopped AND the ring is empty.
    pub fn start(mut self) -> std::io::Result<EngineHandle> {
        self.run.store(true, Ordering::Release);
        let run = Arc::clone(&self.run);

        let thread = std::thread::Builder::new()
            .name("nanex-engine".into())
            .spawn(move || {
                pin_to_last_core();
                info!("matching engine running, {} instruments", self.books.len());
                self.run_loop();
                if let Some(stats) = &self.latency {
                    let summary = stats.summary();
                    info!(
                        requests = summary.count,
                        p50_ns = summary.p50,
                        p90_ns = summary.p90,
                        p99_ns = summary.p99,
                        max_ns = summary.max,
                        "engine latency"
                    );
                }
                info!("matching engine stopped");
            })?;

        Ok(EngineHandle {
            run,
            thread: Some(thread),
        })
    }

    fn run_loop(&mut self) {
        loop {
            if let Some(request) = self.requests.peek() {
                let request = *request;
                self.requests.release();
                self.process(&request);
            } else if !self.run.load(Ordering::Acquire) {
                break;
            } else {
                std::hint::spin_loop();
            }
        }
    }
}

/// Controls a running engine thread. Dropping it stops and joins.
pub struct EngineHandle {
    run: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Signal the engine to drain its request ring and exit, then join.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.run.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Pin the current thread to the last available core; the last core is the
/// one most deployments keep clear of interrupt load.
fn pin_to_last_core() {
    if let Some(core_ids) = core_affinity::get_core_ids() {
        if let Some(last) = core_ids.last() {
            core_affinity::set_for_current(*last);
        }
    }
}
