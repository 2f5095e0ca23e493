//! Market data publisher - incremental stream plus periodic snapshots.
//!
//! Consumes the engine's market-update ring. Every update is stamped with
//! the global sequence number (starts at 1, strictly increasing, no gaps,
//! spanning all instruments) and a wall-clock timestamp, sent on the
//! incremental multicast group, and mirrored into a per-instrument shadow
//! book. At the configured cadence the shadow books are dumped as a full
//! snapshot on the separate snapshot group, carrying the incremental
//! boundary receivers need to splice the streams.
//!
//! The publisher never blocks the engine: its only back-channel is FULL on
//! its input ring. Socket send errors are logged and retried a bounded
//! number of times.

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{info, warn};
use zerocopy::AsBytes;

use crate::config::ExchangeConfig;
use crate::messages::{MarketDataPacket, MarketUpdate};
use crate::ring::Consumer;
use crate::shadow::{synthesize_snapshot, ShadowBook};
use crate::timing::nanos;
use crate::types::{SeqNum, TickerId};

const SEND_RETRIES: usize = 3;

pub struct MarketDataPublisher {
    updates: Consumer<MarketUpdate>,
    incremental_socket: UdpSocket,
    incremental_addr: SocketAddrV4,
    snapshot_socket: UdpSocket,
    snapshot_addr: SocketAddrV4,
    /// Next incremental sequence number to assign.
    next_seq: SeqNum,
    shadow: Vec<ShadowBook>,
    snapshot_interval: Duration,
    run: Arc<AtomicBool>,
}

impl MarketDataPublisher {
    pub fn new(config: &ExchangeConfig, updates: Consumer<MarketUpdate>) -> std::io::Result<Self> {
        let incremental_socket = multicast_sender()?;
        let snapshot_socket = multicast_sender()?;
        let shadow = (0..config.num_tickers)
            .map(|ticker| ShadowBook::new(ticker as TickerId))
            .collect();
        Ok(Self {
            updates,
            incremental_socket,
            incremental_addr: SocketAddrV4::new(config.incremental_group, config.incremental_port),
            snapshot_socket,
            snapshot_addr: SocketAddrV4::new(config.snapshot_group, config.snapshot_port),
            next_seq: 1,
            shadow,
            snapshot_interval: config.snapshot_interval,
            run: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Spawn the publisher thread. Exits once stopped AND the input ring is
    /// drained.
    pub fn start(mut self) -> std::io::Result<PublisherHandle> {
        self.run.store(true, Ordering::Release);
        let run = Arc::clone(&self.run);

        let thread = std::thread::Builder::new()
            .name("nanex-publisher".into())
            .spawn(move || {
                info!(
                    incremental = %self.incremental_addr,
                    snapshot = %self.snapshot_addr,
                    "market data publisher running"
                );
                self.run_loop();
                info!(published = self.next_seq - 1, "market data publisher stopped");
            })?;

        Ok(PublisherHandle {
            run,
            thread: Some(thread),
        })
    }

    fn run_loop(&mut self) {
        let mut last_snapshot = Instant::now();
        loop {
            if let Some(update) = self.updates.peek() {
                let update = *update;
                self.updates.release();
                self.publish_incremental(&update);
            } else if !self.run.load(Ordering::Acquire) {
                break;
            } else {
                std::hint::spin_loop();
            }

            if last_snapshot.elapsed() >= self.snapshot_interval {
                self.publish_snapshot();
                last_snapshot = Instant::now();
            }
        }
    }

    fn publish_incremental(&mut self, update: &MarketUpdate) {
        let packet = MarketDataPacket::encode(self.next_seq, nanos(), update);
        send_with_retry(&self.incremental_socket, self.incremental_addr, &packet);
        self.next_seq += 1;
        let ticker = update.ticker_id as usize;
        if ticker < self.shadow.len() {
            self.shadow[ticker].apply(update);
        }
    }

    fn publish_snapshot(&mut self) {
        let last_seq = self.next_seq - 1;
        let messages = synthesize_snapshot(&self.shadow, last_seq);
        // Snapshot-channel packets carry their own sequence, restarting at 0
        // each cycle; receivers use it only to check completeness.
        for (snapshot_seq, message) in messages.iter().enumerate() {
            let packet = MarketDataPacket::encode(snapshot_seq as SeqNum, nanos(), message);
            send_with_retry(&self.snapshot_socket, self.snapshot_addr, &packet);
        }
        info!(covered_seq = last_seq, messages = messages.len(), "snapshot published");
    }
}

pub struct PublisherHandle {
    run: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PublisherHandle {
    /// Signal the publisher to drain its ring and exit, then join.
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

impl Drop for PublisherHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn multicast_sender() -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.set_multicast_ttl_v4(1)?;
    socket.set_multicast_loop_v4(true)?;
    Ok(socket)
}

fn send_with_retry(socket: &UdpSocket, addr: SocketAddrV4, packet: &MarketDataPacket) {
    for attempt in 1..=SEND_RETRIES {
        match socket.send_to(packet.as_bytes(), addr) {
            Ok(_) => return,
            Err(error) => {
                warn!(%error, attempt, %addr, "market data send failed");
            }
        }
    }
}
