//! Exchange process: wires the request/response/update rings between the
//! order server, the matching engine and the market data publisher, then
//! idles until SIGINT initiates a graceful drain.
//!
//! Logs to `exchange_main.log`. Exit code 0 on graceful shutdown; fatal
//! internal errors (pool exhaustion, invariant violations) panic and exit
//! non-zero.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use nanex::{ring, ExchangeConfig, MarketDataPublisher, MatchingEngine, OrderServer};

fn main() -> anyhow::Result<()> {
    let log_file = std::fs::File::create("exchange_main.log").context("create exchange_main.log")?;
    tracing_subscriber::fmt()
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();

    let config = ExchangeConfig::default();
    config.validate().context("invalid exchange config")?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::Release))
            .context("install SIGINT handler")?;
    }

    // The lock-free rings between order server <-> engine and
    // engine -> publisher.
    let (request_tx, request_rx) = ring(config.request_ring_capacity);
    let (response_tx, response_rx) = ring(config.response_ring_capacity);
    let (update_tx, update_rx) = ring(config.update_ring_capacity);

    info!("starting matching engine");
    let engine = MatchingEngine::new(&config, request_rx, response_tx, update_tx)
        .start()
        .context("start matching engine")?;

    info!("starting market data publisher");
    let publisher = MarketDataPublisher::new(&config, update_rx)
        .context("bind publisher sockets")?
        .start()
        .context("start market data publisher")?;

    info!("starting order server");
    let server = OrderServer::bind(&config, request_tx, response_rx)
        .context("bind order server")?
        .start()
        .context("start order server")?;

    info!(port = config.order_port, "exchange up");

    while running.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(100));
    }

    // Graceful drain: stop intake, let the engine empty the request ring,
    // let the publisher empty the update ring, then flush responses.
    info!("shutdown requested");
    server.stop_intake();
    engine.stop();
    publisher.stop();
    server.stop();
    info!("exchange down");

    Ok(())
}
