//! Order server - TCP intake for client requests, response fan-out.
//!
//! Nonblocking listener plus per-connection buffers framing the fixed-size
//! wire records. The first valid request on a connection claims its client
//! id; a connection that breaks its inbound sequence, changes client id, or
//! sends garbage is dropped (its resting orders stay in the book).
//!
//! A FIFO sequencer stamps every decoded request with its arrival time and
//! releases each poll batch to the engine ring in arrival order, so
//! requests from one connection are processed in send order and batches
//! from different connections merge by arrival.
//!
//! Shutdown is two-phase: intake stops first (no accepts, no reads) while
//! responses continue to flush, then the thread drains and exits.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info, warn};
use zerocopy::AsBytes;

use crate::config::ExchangeConfig;
use crate::messages::{
    ClientRequest, ClientResponse, OrderRequestPacket, OrderResponsePacket,
    ORDER_REQUEST_PACKET_SIZE,
};
use crate::ring::{Consumer, Producer};
use crate::timing::nanos;
use crate::types::{ClientId, MAX_CLIENTS};

const READ_CHUNK: usize = 4096;
const FINAL_FLUSH_ATTEMPTS: usize = 1000;

struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    rx: Vec<u8>,
    tx: Vec<u8>,
    client_id: Option<ClientId>,
    next_inbound_seq: u64,
    dead: bool,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            rx: Vec::new(),
            tx: Vec::new(),
            client_id: None,
            next_inbound_seq: 1,
            dead: false,
        }
    }
}

pub struct OrderServer {
    listener: TcpListener,
    connections: Vec<Connection>,
    requests: Producer<ClientRequest>,
    responses: Consumer<ClientResponse>,
    /// Per-client outbound sequence, survives reconnects.
    next_outbound_seq: rustc_hash::FxHashMap<ClientId, u64>,
    /// Client ids owned by a live connection.
    claimed: rustc_hash::FxHashSet<ClientId>,
    /// FIFO sequencer batch: (arrival nanos, request).
    pending: Vec<(u64, ClientRequest)>,
    intake: Arc<AtomicBool>,
    run: Arc<AtomicBool>,
}

impl OrderServer {
    /// Bind the listener; does not accept until `start`.
    pub fn bind(
        config: &ExchangeConfig,
        requests: Producer<ClientRequest>,
        responses: Consumer<ClientResponse>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.order_port))?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            connections: Vec::new(),
            requests,
            responses,
            next_outbound_seq: rustc_hash::FxHashMap::default(),
            claimed: rustc_hash::FxHashSet::default(),
            pending: Vec::new(),
            intake: Arc::new(AtomicBool::new(false)),
            run: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn start(mut self) -> std::io::Result<ServerHandle> {
        self.intake.store(true, Ordering::Release);
        self.run.store(true, Ordering::Release);
        let intake = Arc::clone(&self.intake);
        let run = Arc::clone(&self.run);

        let local = self.listener.local_addr();
        let thread = std::thread::Builder::new()
            .name("nanex-order-server".into())
            .spawn(move || {
                self.run_loop();
                self.final_drain();
                info!("order server stopped");
            })?;
        if let Ok(addr) = local {
            info!(%addr, "order server listening");
        }

        Ok(ServerHandle {
            intake,
            run,
            thread: Some(thread),
        })
    }

    fn run_loop(&mut self) {
        while self.run.load(Ordering::Acquire) {
            let intake = self.intake.load(Ordering::Acquire);
            if intake {
                self.accept_new();
                self.read_connections();
                self.release_batch();
            }
            self.route_responses();
            self.flush_connections();
            self.reap_dead();
            std::hint::spin_loop();
        }
    }

    /// After stop: push out whatever the engine already answered.
    fn final_drain(&mut self) {
        self.route_responses();
        for _ in 0..FINAL_FLUSH_ATTEMPTS {
            self.flush_connections();
            if self.connections.iter().all(|c| c.dead || c.tx.is_empty()) {
                break;
            }
            std::thread::yield_now();
        }
    }

    fn accept_new(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if self.connections.len() >= MAX_CLIENTS {
                        warn!(%peer, "connection limit reached, refusing");
                        drop(stream);
                        continue;
                    }
                    if let Err(error) = stream.set_nonblocking(true) {
                        warn!(%error, %peer, "failed to configure connection");
                        continue;
                    }
                    let _ = stream.set_nodelay(true);
                    info!(%peer, "connection accepted");
                    self.connections.push(Connection::new(stream, peer));
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(error) => {
                    warn!(%error, "accept failed");
                    break;
                }
            }
        }
    }

    fn read_connections(&mut self) {
        let mut buf = [0u8; READ_CHUNK];
        for conn in &mut self.connections {
            if conn.dead {
                continue;
            }
            loop {
                match conn.stream.read(&mut buf) {
                    Ok(0) => {
                        info!(peer = %conn.peer, "connection closed by peer");
                        conn.dead = true;
                        break;
                    }
                    Ok(n) => conn.rx.extend_from_slice(&buf[..n]),
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(error) => {
                        warn!(%error, peer = %conn.peer, "read failed");
                        conn.dead = true;
                        break;
                    }
                }
            }
        }

        // Frame and validate outside the read loop so each connection's
        // requests keep their arrival order within the batch.
        for conn in self.connections.iter_mut() {
            while !conn.dead && conn.rx.len() >= ORDER_REQUEST_PACKET_SIZE {
                let (seq, request) =
                    match OrderRequestPacket::decode(&conn.rx[..ORDER_REQUEST_PACKET_SIZE]) {
                        Ok(decoded) => decoded,
                        Err(error) => {
                            warn!(%error, peer = %conn.peer, "undecodable request, dropping connection");
                            conn.dead = true;
                            break;
                        }
                    };
                conn.rx.drain(..ORDER_REQUEST_PACKET_SIZE);

                if seq != conn.next_inbound_seq {
                    warn!(
                        peer = %conn.peer,
                        expected = conn.next_inbound_seq,
                        got = seq,
                        "inbound sequence break, dropping connection"
                    );
                    conn.dead = true;
                    break;
                }
                conn.next_inbound_seq += 1;

                match conn.client_id {
                    None => {
                        // First valid request claims the id; one live
                        // connection per client id.
                        if !self.claimed.insert(request.client_id) {
                            warn!(
                                peer = %conn.peer,
                                client_id = request.client_id,
                                "client id already connected, dropping"
                            );
                            conn.dead = true;
                            break;
                        }
                        conn.client_id = Some(request.client_id);
                    }
                    Some(owner) if owner != request.client_id => {
                        warn!(
                            peer = %conn.peer,
                            owner,
                            got = request.client_id,
                            "client id changed mid-connection, dropping"
                        );
                        conn.dead = true;
                        break;
                    }
                    Some(_) => {}
                }

                self.pending.push((nanos(), request));
            }
        }
    }

    /// FIFO sequencer: release the batch to the engine in arrival order.
    fn release_batch(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        self.pending.sort_by_key(|(arrival, _)| *arrival);
        for (_, request) in self.pending.drain(..) {
            self.requests.push_spin(request);
        }
    }

    fn route_responses(&mut self) {
        while let Some(response) = self.responses.peek() {
            let response = *response;
            self.responses.release();

            let seq = self
                .next_outbound_seq
                .entry(response.client_id)
                .or_insert(1);
            let packet = OrderResponsePacket::encode(*seq, &response);
            *seq += 1;

            match self
                .connections
                .iter_mut()
                .find(|c| !c.dead && c.client_id == Some(response.client_id))
            {
                Some(conn) => conn.tx.extend_from_slice(packet.as_bytes()),
                None => debug!(client_id = response.client_id, "response for disconnected client dropped"),
            }
        }
    }

    fn flush_connections(&mut self) {
        for conn in &mut self.connections {
            if conn.dead || conn.tx.is_empty() {
                continue;
            }
            match conn.stream.write(&conn.tx) {
                Ok(n) => {
                    conn.tx.drain(..n);
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(error) => {
                    warn!(%error, peer = %conn.peer, "write failed");
                    conn.dead = true;
                }
            }
        }
    }

    fn reap_dead(&mut self) {
        for conn in self.connections.iter().filter(|c| c.dead) {
            if let Some(client_id) = conn.client_id {
                self.claimed.remove(&client_id);
            }
        }
        self.connections.retain(|c| !c.dead);
    }
}

/// Controls a running order server. Shutdown is two-phase: `stop_intake`
/// first, `stop` after the engine has drained.
pub struct ServerHandle {
    intake: Arc<AtomicBool>,
    run: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Stop accepting connections and reading requests; responses still
    /// flush.
    pub fn stop_intake(&self) {
        self.intake.store(false, Ordering::Release);
    }

    /// Flush remaining responses and join the thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.intake.store(false, Ordering::Release);
        self.run.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
