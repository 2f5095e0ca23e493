//! Trading harness: connects a client to the exchange and runs one of the
//! sample algos against live market data.
//!
//! ```text
//! trader CLIENT_ID ALGO_TYPE [CLIP THRESH MAX_ORDER_SIZE MAX_POS MAX_LOSS]...
//! ```
//!
//! `ALGO_TYPE` is MAKER, TAKER or RANDOM; one quintuple configures one
//! ticker, remaining tickers use defaults. Logs to
//! `trading_main_<CLIENT_ID>.log`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use nanex::{
    ring, AlgoType, ClientOrderId, ClientRequest, ClientResponse, Consumer, ExchangeConfig,
    MarketDataConsumer, MarketUpdate, OrderGateway, Price, Qty, ResponseKind, ShadowBook, Side,
    TickerId, TickerParams, UpdateKind,
};

#[derive(Debug, Parser)]
#[command(name = "trader", about = "nanex trading harness")]
struct Cli {
    /// Participant identity presented to the exchange.
    client_id: u32,

    /// MAKER, TAKER or RANDOM.
    algo: String,

    /// Per-ticker quintuples: CLIP THRESH MAX_ORDER_SIZE MAX_POS MAX_LOSS.
    params: Vec<f64>,

    /// Order server address.
    #[arg(long, default_value = "127.0.0.1:12345")]
    server: SocketAddr,

    /// Number of order actions before the harness exits.
    #[arg(long, default_value_t = 10_000)]
    actions: usize,
}

fn parse_ticker_params(raw: &[f64], num_tickers: usize) -> anyhow::Result<Vec<TickerParams>> {
    if raw.len() % 5 != 0 {
        bail!(
            "ticker parameters come in quintuples CLIP THRESH MAX_ORDER_SIZE MAX_POS MAX_LOSS, got {} values",
            raw.len()
        );
    }
    let mut params = vec![TickerParams::default(); num_tickers];
    for (ticker, chunk) in raw.chunks(5).take(num_tickers).enumerate() {
        params[ticker] = TickerParams {
            clip: chunk[0] as Qty,
            threshold: chunk[1],
            max_order_size: chunk[2] as Qty,
            max_position: chunk[3] as i64,
            max_loss: chunk[4],
        };
    }
    Ok(params)
}

/// Client-side state fed by the gateway and market-data rings.
struct Harness {
    requests: nanex::Producer<ClientRequest>,
    responses: Consumer<ClientResponse>,
    updates: Consumer<MarketUpdate>,
    client_id: u32,
    books: Vec<ShadowBook>,
    position: Vec<i64>,
    last_trade: Vec<Option<Price>>,
    next_order_id: ClientOrderId,
    fills: u64,
    rejects: u64,
}

impl Harness {
    fn new(
        requests: nanex::Producer<ClientRequest>,
        responses: Consumer<ClientResponse>,
        updates: Consumer<MarketUpdate>,
        client_id: u32,
        num_tickers: usize,
    ) -> Self {
        Self {
            requests,
            responses,
            updates,
            client_id,
            books: (0..num_tickers).map(|t| ShadowBook::new(t as TickerId)).collect(),
            position: vec![0; num_tickers],
            last_trade: vec![None; num_tickers],
            next_order_id: 1,
            fills: 0,
            rejects: 0,
        }
    }

    fn send_new(&mut self, ticker: TickerId, side: Side, price: Price, qty: Qty) -> ClientOrderId {
        let order_id = self.next_order_id;
        self.next_order_id += 1;
        self.requests
            .push_spin(ClientRequest::new(self.client_id, ticker, order_id, side, price, qty));
        order_id
    }

    fn send_cancel(&mut self, ticker: TickerId, order_id: ClientOrderId) {
        self.requests
            .push_spin(ClientRequest::cancel(self.client_id, ticker, order_id));
    }

    /// Drain both inbound rings into local state.
    fn poll(&mut self) {
        while let Some(response) = self.responses.try_pop() {
            match response.kind {
                ResponseKind::Filled => {
                    self.fills += 1;
                    let ticker = response.ticker_id as usize;
                    if ticker < self.position.len() {
                        let signed = response.exec_qty as i64;
                        self.position[ticker] += match response.side {
                            Side::Buy => signed,
                            Side::Sell => -signed,
                            Side::Invalid => 0,
                        };
                    }
                }
                ResponseKind::CancelRejected => self.rejects += 1,
                _ => {}
            }
        }
        while let Some(update) = self.updates.try_pop() {
            let ticker = update.ticker_id as usize;
            if update.kind == UpdateKind::Trade {
                if ticker < self.last_trade.len() {
                    self.last_trade[ticker] = Some(update.price);
                }
            } else if ticker < self.books.len() {
                self.books[ticker].apply(&update);
            }
        }
    }
}

fn run_random(harness: &mut Harness, actions: usize, running: &AtomicBool, params: &[TickerParams]) {
    let mut rng = StdRng::seed_from_u64(harness.client_id as u64);
    let num_tickers = harness.books.len();
    let base_prices: Vec<Price> = (0..num_tickers).map(|_| rng.gen_range(100..200)).collect();
    let mut sent: Vec<(TickerId, ClientOrderId)> = Vec::new();

    for _ in 0..actions {
        if !running.load(Ordering::Acquire) {
            break;
        }
        let ticker = rng.gen_range(0..num_tickers);
        let price = base_prices[ticker] + rng.gen_range(1..=10);
        let qty = 1 + rng.gen_range(1..=params[ticker].max_order_size.max(2));
        let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };

        let order_id = harness.send_new(ticker as TickerId, side, price, qty);
        sent.push((ticker as TickerId, order_id));

        // Cancel a random earlier order, like as not already gone.
        let victim = sent[rng.gen_range(0..sent.len())];
        harness.send_cancel(victim.0, victim.1);

        harness.poll();
    }
}

fn run_maker(harness: &mut Harness, actions: usize, running: &AtomicBool, params: &[TickerParams]) {
    let mut quotes: Vec<Option<(Price, ClientOrderId, ClientOrderId)>> =
        vec![None; harness.books.len()];
    let mut actions_left = actions;

    while actions_left > 0 && running.load(Ordering::Acquire) {
        harness.poll();
        for ticker in 0..harness.books.len() {
            let Some(reference) = harness.last_trade[ticker] else { continue };
            let stale = quotes[ticker].map_or(true, |(center, _, _)| center != reference);
            if !stale {
                continue;
            }
            if let Some((_, bid_id, ask_id)) = quotes[ticker].take() {
                harness.send_cancel(ticker as TickerId, bid_id);
                harness.send_cancel(ticker as TickerId, ask_id);
            }
            let clip = params[ticker].clip.max(1);
            let bid_id = harness.send_new(ticker as TickerId, Side::Buy, reference - 1, clip);
            let ask_id = harness.send_new(ticker as TickerId, Side::Sell, reference + 1, clip);
            quotes[ticker] = Some((reference, bid_id, ask_id));
            actions_left = actions_left.saturating_sub(2);
        }
        std::thread::yield_now();
    }
}

fn run_taker(harness: &mut Harness, actions: usize, running: &AtomicBool, params: &[TickerParams]) {
    let mut rng = StdRng::seed_from_u64(harness.client_id as u64);
    let mut actions_left = actions;

    while actions_left > 0 && running.load(Ordering::Acquire) {
        harness.poll();
        for ticker in 0..harness.books.len() {
            let p = &params[ticker];
            if rng.gen_bool(p.threshold.clamp(0.0, 1.0)) {
                continue;
            }
            let book = &harness.books[ticker];
            let position = harness.position[ticker];
            let (side, price) = if position <= 0 {
                match book.best_ask() {
                    Some(ask) => (Side::Buy, ask),
                    None => continue,
                }
            } else {
                match book.best_bid() {
                    Some(bid) => (Side::Sell, bid),
                    None => continue,
                }
            };
            if position.abs() >= p.max_position {
                continue;
            }
            harness.send_new(ticker as TickerId, side, price, p.clip.max(1));
            actions_left = actions_left.saturating_sub(1);
        }
        std::thread::yield_now();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_file = std::fs::File::create(format!("trading_main_{}.log", cli.client_id))
        .context("create trading log")?;
    tracing_subscriber::fmt()
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();

    let algo: AlgoType = cli.algo.parse().map_err(anyhow::Error::msg)?;
    let config = ExchangeConfig::default();
    let params = parse_ticker_params(&cli.params, config.num_tickers)?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::Release))
            .context("install SIGINT handler")?;
    }

    // Rings: strategy -> gateway, gateway -> strategy, consumer -> strategy.
    let (request_tx, request_rx) = ring(16 * 1024);
    let (response_tx, response_rx) = ring(16 * 1024);
    let (update_tx, update_rx) = ring(64 * 1024);

    let gateway = OrderGateway::connect(cli.server, cli.client_id, request_rx, response_tx)
        .context("connect to order server")?
        .start()
        .context("start gateway")?;
    let consumer = MarketDataConsumer::new(&config, update_tx)
        .context("join market data groups")?
        .start()
        .context("start market data consumer")?;

    info!(client_id = cli.client_id, ?algo, "trader up");

    let mut harness = Harness::new(
        request_tx,
        response_rx,
        update_rx,
        cli.client_id,
        config.num_tickers,
    );

    match algo {
        AlgoType::Random => run_random(&mut harness, cli.actions, &running, &params),
        AlgoType::Maker => run_maker(&mut harness, cli.actions, &running, &params),
        AlgoType::Taker => run_taker(&mut harness, cli.actions, &running, &params),
    }

    // Let in-flight responses land before reporting.
    std::thread::sleep(Duration::from_millis(200));
    harness.poll();
    info!(
        fills = harness.fills,
        rejects = harness.rejects,
        position = ?harness.position,
        "trader done"
    );

    consumer.stop();
    gateway.stop();
    Ok(())
}
