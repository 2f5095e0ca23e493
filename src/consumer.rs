//! Market data consumer - client-side stream assembly with gap recovery.
//!
//! In-sync operation forwards incremental updates in sequence order. A gap
//! (observed sequence ahead of the expected one) switches to recovery:
//! both streams are buffered, and once a complete snapshot is on hand whose
//! boundary the buffered incrementals can extend without a hole, the
//! snapshot body is replayed followed by the buffered tail, and the
//! consumer is in sync again.
//!
//! The stream-assembly state machine ([`Synchronizer`]) is pure so it can
//! be driven without sockets; [`MarketDataConsumer`] wraps it with the two
//! multicast subscriptions and an output ring.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::config::ExchangeConfig;
use crate::messages::{MarketDataPacket, MarketUpdate, UpdateKind, MARKET_DATA_PACKET_SIZE};
use crate::ring::Producer;
use crate::types::SeqNum;

/// Pure stream-assembly state machine shared by the socket consumer and the
/// recovery tests.
pub struct Synchronizer {
    /// Next incremental sequence number expected while in sync.
    next_expected: SeqNum,
    in_recovery: bool,
    /// Incrementals buffered during recovery, keyed by global sequence.
    pending_incrementals: BTreeMap<SeqNum, MarketUpdate>,
    /// Snapshot messages of the cycle being assembled, keyed by the
    /// per-snapshot sequence.
    pending_snapshot: BTreeMap<u64, MarketUpdate>,
}

impl Synchronizer {
    pub fn new() -> Self {
        Self {
            next_expected: 1,
            in_recovery: false,
            pending_incrementals: BTreeMap::new(),
            pending_snapshot: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn in_recovery(&self) -> bool {
        self.in_recovery
    }

    #[inline]
    pub fn next_expected(&self) -> SeqNum {
        self.next_expected
    }

    /// Feed one incremental-stream message. In-order updates (and, after a
    /// recovery completes, the replayed backlog) are appended to `out`.
    pub fn on_incremental(&mut self, seq: SeqNum, update: MarketUpdate, out: &mut Vec<MarketUpdate>) {
        if self.in_recovery {
            if seq >= self.next_expected {
                self.pending_incrementals.insert(seq, update);
            }
            return;
        }

        if seq == self.next_expected {
            self.next_expected += 1;
            out.push(update);
        } else if seq > self.next_expected {
            warn!(
                expected = self.next_expected,
                got = seq,
                "incremental gap, entering snapshot recovery"
            );
            self.in_recovery = true;
            self.pending_incrementals.insert(seq, update);
        }
        // seq < next_expected: stale duplicate, drop.
    }

    /// Feed one snapshot-stream message. `snapshot_seq` is the per-cycle
    /// sequence assigned by the publisher.
    pub fn on_snapshot(&mut self, snapshot_seq: u64, update: MarketUpdate, out: &mut Vec<MarketUpdate>) {
        if !self.in_recovery {
            return;
        }

        if update.kind == UpdateKind::SnapshotStart {
            // A new cycle obsoletes any partial one.
            self.pending_snapshot.clear();
        }
        self.pending_snapshot.insert(snapshot_seq, update);

        if update.kind == UpdateKind::SnapshotEnd {
            self.try_complete_recovery(out);
        }
    }

    fn try_complete_recovery(&mut self, out: &mut Vec<MarketUpdate>) {
        // The cycle must run 0..=n without holes, bracketed by START/END
        // agreeing on the covered incremental boundary.
        let Some((&first_key, first)) = self.pending_snapshot.iter().next() else {
            return;
        };
        let Some((&last_key, last)) = self.pending_snapshot.iter().next_back() else {
            return;
        };
        if first_key != 0
            || first.kind != UpdateKind::SnapshotStart
            || last.kind != UpdateKind::SnapshotEnd
            || last.order_id != first.order_id
            || self.pending_snapshot.len() as u64 != last_key + 1
        {
            self.pending_snapshot.clear();
            return;
        }

        let boundary: SeqNum = first.order_id;

        // The buffered tail must extend the boundary without a hole.
        self.pending_incrementals = self.pending_incrementals.split_off(&(boundary + 1));
        let mut resume_at = boundary + 1;
        for &seq in self.pending_incrementals.keys() {
            if seq != resume_at {
                break;
            }
            resume_at += 1;
        }
        let usable_tail = resume_at - (boundary + 1);
        let contiguous_to_end = usable_tail == self.pending_incrementals.len() as u64;
        if !contiguous_to_end {
            debug!(boundary, "snapshot boundary not yet bridged, waiting");
            self.pending_snapshot.clear();
            return;
        }

        for update in self.pending_snapshot.values() {
            out.push(*update);
        }
        for update in self.pending_incrementals.values() {
            out.push(*update);
        }

        info!(boundary, replayed = self.pending_incrementals.len(), "snapshot recovery complete");
        self.next_expected = resume_at;
        self.in_recovery = false;
        self.pending_snapshot.clear();
        self.pending_incrementals.clear();
    }
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Socket-facing consumer thread: two multicast subscriptions feeding the
/// synchronizer, in-order updates pushed onto the output ring.
pub struct MarketDataConsumer {
    incremental_socket: UdpSocket,
    snapshot_socket: UdpSocket,
    synchronizer: Synchronizer,
    out: Producer<MarketUpdate>,
    run: Arc<AtomicBool>,
}

impl MarketDataConsumer {
    pub fn new(config: &ExchangeConfig, out: Producer<MarketUpdate>) -> std::io::Result<Self> {
        Ok(Self {
            incremental_socket: multicast_receiver(config.incremental_group, config.incremental_port)?,
            snapshot_socket: multicast_receiver(config.snapshot_group, config.snapshot_port)?,
            synchronizer: Synchronizer::new(),
            out,
            run: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn start(mut self) -> std::io::Result<ConsumerHandle> {
        self.run.store(true, Ordering::Release);
        let run = Arc::clone(&self.run);

        let thread = std::thread::Builder::new()
            .name("nanex-md-consumer".into())
            .spawn(move || {
                info!("market data consumer running");
                self.run_loop();
                info!("market data consumer stopped");
            })?;

        Ok(ConsumerHandle {
            run,
            thread: Some(thread),
        })
    }

    fn run_loop(&mut self) {
        let mut buf = [0u8; MARKET_DATA_PACKET_SIZE];
        let mut ready = Vec::new();
        while self.run.load(Ordering::Acquire) {
            let mut idle = true;

            match self.incremental_socket.recv_from(&mut buf) {
                Ok((len, _)) => {
                    idle = false;
                    match MarketDataPacket::decode(&buf[..len]) {
                        Ok((seq, update)) => self.synchronizer.on_incremental(seq, update, &mut ready),
                        Err(error) => warn!(%error, "bad incremental packet"),
                    }
                }
                Err(error) if would_block(&error) => {}
                Err(error) => warn!(%error, "incremental recv failed"),
            }

            match self.snapshot_socket.recv_from(&mut buf) {
                Ok((len, _)) => {
                    idle = false;
                    match MarketDataPacket::decode(&buf[..len]) {
                        Ok((seq, update)) => self.synchronizer.on_snapshot(seq, update, &mut ready),
                        Err(error) => warn!(%error, "bad snapshot packet"),
                    }
                }
                Err(error) if would_block(&error) => {}
                Err(error) => warn!(%error, "snapshot recv failed"),
            }

            for update in ready.drain(..) {
                self.out.push_spin(update);
            }

            if idle {
                std::hint::spin_loop();
            }
        }
    }
}

pub struct ConsumerHandle {
    run: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ConsumerHandle {
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

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn multicast_receiver(group: Ipv4Addr, port: u16) -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
    socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

fn would_block(error: &std::io::Error) -> bool {
    error.kind() == std::io::ErrorKind::WouldBlock
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shadow::{synthesize_snapshot, ShadowBook};
    use crate::types::Side;

    fn add(order_id: u64, price: i64) -> MarketUpdate {
        MarketUpdate {
            kind: UpdateKind::Add,
            order_id,
            ticker_id: 0,
            side: Side::Buy,
            price,
            qty: 10,
            priority: order_id,
        }
    }

    #[test]
    fn test_in_sync_passthrough() {
        let mut sync = Synchronizer::new();
        let mut out = Vec::new();

        sync.on_incremental(1, add(1, 100), &mut out);
        sync.on_incremental(2, add(2, 101), &mut out);

        assert_eq!(out.len(), 2);
        assert!(!sync.in_recovery());
        assert_eq!(sync.next_expected(), 3);
    }

    #[test]
    fn test_duplicate_is_dropped() {
        let mut sync = Synchronizer::new();
        let mut out = Vec::new();

        sync.on_incremental(1, add(1, 100), &mut out);
        sync.on_incremental(1, add(1, 100), &mut out);

        assert_eq!(out.len(), 1);
        assert!(!sync.in_recovery());
    }

    #[test]
    fn test_gap_enters_recovery_and_snapshot_heals() {
        let mut sync = Synchronizer::new();
        let mut out = Vec::new();

        sync.on_incremental(1, add(1, 100), &mut out);
        // Sequences 2..=3 lost.
        sync.on_incremental(4, add(4, 103), &mut out);
        assert!(sync.in_recovery());
        assert_eq!(out.len(), 1);
        out.clear();

        // Snapshot covering up to sequence 3.
        let mut book = ShadowBook::new(0);
        for update in [add(1, 100), add(2, 101), add(3, 102)] {
            book.apply(&update);
        }
        let snapshot = synthesize_snapshot(std::slice::from_ref(&book), 3);
        for (i, message) in snapshot.iter().enumerate() {
            sync.on_snapshot(i as u64, *message, &mut out);
        }

        assert!(!sync.in_recovery());
        assert_eq!(sync.next_expected(), 5);

        // Replayed: snapshot body then the buffered tail.
        let mut replica = ShadowBook::new(0);
        for update in &out {
            replica.apply(update);
        }
        let mut expected = ShadowBook::new(0);
        for update in [add(1, 100), add(2, 101), add(3, 102), add(4, 103)] {
            expected.apply(&update);
        }
        assert_eq!(replica.sorted_orders(), expected.sorted_orders());
    }

    #[test]
    fn test_snapshot_ignored_while_in_sync() {
        let mut sync = Synchronizer::new();
        let mut out = Vec::new();

        sync.on_incremental(1, add(1, 100), &mut out);
        let snapshot = synthesize_snapshot(&[ShadowBook::new(0)], 1);
        for (i, message) in snapshot.iter().enumerate() {
            sync.on_snapshot(i as u64, *message, &mut out);
        }

        assert_eq!(out.len(), 1);
        assert!(!sync.in_recovery());
        assert_eq!(sync.next_expected(), 2);
    }

    #[test]
    fn test_incomplete_snapshot_does_not_heal() {
        let mut sync = Synchronizer::new();
        let mut out = Vec::new();

        sync.on_incremental(5, add(5, 100), &mut out);
        assert!(sync.in_recovery());

        let book = ShadowBook::new(0);
        let snapshot = synthesize_snapshot(std::slice::from_ref(&book), 3);
        // Drop an interior message: recovery must not complete off it.
        for (i, message) in snapshot.iter().enumerate() {
            if i == 1 {
                continue;
            }
            sync.on_snapshot(i as u64, *message, &mut out);
        }
        assert!(sync.in_recovery());
    }

    #[test]
    fn test_snapshot_too_old_waits_for_next() {
        let mut sync = Synchronizer::new();
        let mut out = Vec::new();

        // Missed 1..=4, buffered 6; snapshot only covers through 3, and 4..5
        // are gone: boundary 3 cannot be bridged to 6.
        sync.on_incremental(6, add(6, 100), &mut out);
        let snapshot = synthesize_snapshot(&[ShadowBook::new(0)], 3);
        for (i, message) in snapshot.iter().enumerate() {
            sync.on_snapshot(i as u64, *message, &mut out);
        }
        assert!(sync.in_recovery());
        assert!(out.is_empty());

        // A later snapshot through 6 heals.
        let snapshot = synthesize_snapshot(&[ShadowBook::new(0)], 6);
        for (i, message) in snapshot.iter().enumerate() {
            sync.on_snapshot(i as u64, *message, &mut out);
        }
        assert!(!sync.in_recovery());
        assert_eq!(sync.next_expected(), 7);
    }
}
