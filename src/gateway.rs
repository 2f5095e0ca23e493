//! Order gateway - client side of the order wire.
//!
//! Connects to the exchange's order server, frames outgoing requests with
//! the per-connection sequence the server validates, and verifies the
//! per-client sequence on incoming execution reports. Strategy code talks
//! to it through a pair of rings.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{info, warn};
use zerocopy::AsBytes;

use crate::messages::{
    ClientRequest, ClientResponse, OrderRequestPacket, OrderResponsePacket,
    ORDER_RESPONSE_PACKET_SIZE,
};
use crate::ring::{Consumer, Producer};
use crate::types::ClientId;

pub struct OrderGateway {
    stream: TcpStream,
    client_id: ClientId,
    requests: Consumer<ClientRequest>,
    responses: Producer<ClientResponse>,
    next_outbound_seq: u64,
    next_expected_seq: u64,
    rx: Vec<u8>,
    tx: Vec<u8>,
    run: Arc<AtomicBool>,
}

impl OrderGateway {
    /// Connect to the order server at `addr`.
    pub fn connect(
        addr: SocketAddr,
        client_id: ClientId,
        requests: Consumer<ClientRequest>,
        responses: Producer<ClientResponse>,
    ) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nonblocking(true)?;
        let _ = stream.set_nodelay(true);
        info!(%addr, client_id, "order gateway connected");
        Ok(Self {
            stream,
            client_id,
            requests,
            responses,
            next_outbound_seq: 1,
            next_expected_seq: 1,
            rx: Vec::new(),
            tx: Vec::new(),
            run: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn start(mut self) -> std::io::Result<GatewayHandle> {
        self.run.store(true, Ordering::Release);
        let run = Arc::clone(&self.run);

        let thread = std::thread::Builder::new()
            .name("nanex-gateway".into())
            .spawn(move || {
                self.run_loop();
                info!("order gateway stopped");
            })?;

        Ok(GatewayHandle {
            run,
            thread: Some(thread),
        })
    }

    fn run_loop(&mut self) {
        while self.run.load(Ordering::Acquire) {
            self.send_requests();
            self.receive_responses();
            std::hint::spin_loop();
        }
        // Flush anything the strategy queued before stop.
        self.send_requests();
    }

    fn send_requests(&mut self) {
        while let Some(request) = self.requests.peek() {
            let mut request = *request;
            self.requests.release();
            // The wire carries this gateway's identity regardless of what
            // the strategy filled in.
            request.client_id = self.client_id;
            let packet = OrderRequestPacket::encode(self.next_outbound_seq, &request);
            self.next_outbound_seq += 1;
            self.tx.extend_from_slice(packet.as_bytes());
        }

        if self.tx.is_empty() {
            return;
        }
        match self.stream.write(&self.tx) {
            Ok(n) => {
                self.tx.drain(..n);
            }
            Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(error) => {
                warn!(%error, "gateway write failed");
                self.run.store(false, Ordering::Release);
            }
        }
    }

    fn receive_responses(&mut self) {
        let mut buf = [0u8; 4096];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    warn!("order server closed the connection");
                    self.run.store(false, Ordering::Release);
                    break;
                }
                Ok(n) => self.rx.extend_from_slice(&buf[..n]),
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(error) => {
                    warn!(%error, "gateway read failed");
                    self.run.store(false, Ordering::Release);
                    break;
                }
            }
        }

        while self.rx.len() >= ORDER_RESPONSE_PACKET_SIZE {
            match OrderResponsePacket::decode(&self.rx[..ORDER_RESPONSE_PACKET_SIZE]) {
                Ok((seq, response)) => {
                    if seq != self.next_expected_seq {
                        warn!(
                            expected = self.next_expected_seq,
                            got = seq,
                            "response sequence break"
                        );
                    }
                    self.next_expected_seq = seq + 1;
                    self.responses.push_spin(response);
                }
                Err(error) => {
                    warn!(%error, "undecodable response, disconnecting");
                    self.run.store(false, Ordering::Release);
                    break;
                }
            }
            self.rx.drain(..ORDER_RESPONSE_PACKET_SIZE);
        }
    }
}

pub struct GatewayHandle {
    run: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl GatewayHandle {
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

impl Drop for GatewayHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
