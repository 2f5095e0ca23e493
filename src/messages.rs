//! Message types flowing through the rings, and their wire encodings.
//!
//! In-memory messages are plain data (`Copy`), default-constructible to an
//! INVALID kind so ring slots can pre-fill, and carry no heap state. Wire
//! packets are `#[repr(C)]` little-endian fixed-size records with explicit
//! padding, cast to/from bytes with zerocopy; enums travel as `u8`
//! discriminants and are validated on decode.

use thiserror::Error;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::types::{
    ClientId, ClientOrderId, OrderId, Price, Priority, Qty, SeqNum, Side, TickerId,
    CLIENT_ID_INVALID, CLIENT_ORDER_ID_INVALID, ORDER_ID_INVALID, PRICE_INVALID,
    PRIORITY_INVALID, QTY_INVALID, TICKER_ID_INVALID,
};

// ============================================================================
// Engine messages
// ============================================================================

/// Inbound request kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestKind {
    #[default]
    Invalid = 0,
    New = 1,
    Cancel = 2,
}

/// Outbound response kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseKind {
    #[default]
    Invalid = 0,
    Accepted = 1,
    Canceled = 2,
    Filled = 3,
    CancelRejected = 4,
}

/// Market-data update kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum UpdateKind {
    #[default]
    Invalid = 0,
    Add = 1,
    Modify = 2,
    Cancel = 3,
    Trade = 4,
    Clear = 5,
    SnapshotStart = 6,
    SnapshotEnd = 7,
}

/// A participant's order instruction, as consumed by the matching engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientRequest {
    pub kind: RequestKind,
    pub client_id: ClientId,
    pub ticker_id: TickerId,
    pub client_order_id: ClientOrderId,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
}

impl ClientRequest {
    pub fn new(
        client_id: ClientId,
        ticker_id: TickerId,
        client_order_id: ClientOrderId,
        side: Side,
        price: Price,
        qty: Qty,
    ) -> Self {
        Self {
            kind: RequestKind::New,
            client_id,
            ticker_id,
            client_order_id,
            side,
            price,
            qty,
        }
    }

    pub fn cancel(client_id: ClientId, ticker_id: TickerId, client_order_id: ClientOrderId) -> Self {
        Self {
            kind: RequestKind::Cancel,
            client_id,
            ticker_id,
            client_order_id,
            side: Side::Invalid,
            price: PRICE_INVALID,
            qty: QTY_INVALID,
        }
    }
}

impl Default for ClientRequest {
    fn default() -> Self {
        Self {
            kind: RequestKind::Invalid,
            client_id: CLIENT_ID_INVALID,
            ticker_id: TICKER_ID_INVALID,
            client_order_id: CLIENT_ORDER_ID_INVALID,
            side: Side::Invalid,
            price: PRICE_INVALID,
            qty: QTY_INVALID,
        }
    }
}

/// The engine's answer to a participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientResponse {
    pub kind: ResponseKind,
    pub client_id: ClientId,
    pub ticker_id: TickerId,
    pub client_order_id: ClientOrderId,
    pub market_order_id: OrderId,
    pub side: Side,
    pub price: Price,
    pub exec_qty: Qty,
    pub leaves_qty: Qty,
}

impl Default for ClientResponse {
    fn default() -> Self {
        Self {
            kind: ResponseKind::Invalid,
            client_id: CLIENT_ID_INVALID,
            ticker_id: TICKER_ID_INVALID,
            client_order_id: CLIENT_ORDER_ID_INVALID,
            market_order_id: ORDER_ID_INVALID,
            side: Side::Invalid,
            price: PRICE_INVALID,
            exec_qty: QTY_INVALID,
            leaves_qty: QTY_INVALID,
        }
    }
}

/// A book delta or trade, as handed to the market-data publisher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarketUpdate {
    pub kind: UpdateKind,
    pub order_id: OrderId,
    pub ticker_id: TickerId,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
    pub priority: Priority,
}

impl Default for MarketUpdate {
    fn default() -> Self {
        Self {
            kind: UpdateKind::Invalid,
            order_id: ORDER_ID_INVALID,
            ticker_id: TICKER_ID_INVALID,
            side: Side::Invalid,
            price: PRICE_INVALID,
            qty: QTY_INVALID,
            priority: PRIORITY_INVALID,
        }
    }
}

/// One element of the ordered output stream a book operation produces.
///
/// The relative order of responses and market updates is significant: a
/// TRADE update precedes the fill responses for the same event, so a
/// consumer that routes these to separate rings preserves that ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputEvent {
    Response(ClientResponse),
    Update(MarketUpdate),
}

// ============================================================================
// Wire packets
// ============================================================================

/// Decode failure for a wire packet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated packet: got {got} bytes, need {need}")]
    Truncated { got: usize, need: usize },
    #[error("invalid kind discriminant {0}")]
    InvalidKind(u8),
    #[error("invalid side discriminant {0}")]
    InvalidSide(u8),
}

#[inline]
fn side_from_wire(raw: u8) -> Result<Side, DecodeError> {
    match raw {
        0 => Ok(Side::Invalid),
        1 => Ok(Side::Buy),
        2 => Ok(Side::Sell),
        other => Err(DecodeError::InvalidSide(other)),
    }
}

/// Order entry record, client -> exchange. 40 bytes on the wire.
#[derive(Clone, Copy, Debug, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct OrderRequestPacket {
    /// Per-connection sequence, starts at 1.
    pub seq_num: u64,
    pub client_order_id: u64,
    pub price: i64,
    pub client_id: u32,
    pub ticker_id: u32,
    pub qty: u32,
    pub kind: u8,
    pub side: u8,
    pub _pad: [u8; 2],
}

pub const ORDER_REQUEST_PACKET_SIZE: usize = std::mem::size_of::<OrderRequestPacket>();

const _: () = assert!(ORDER_REQUEST_PACKET_SIZE == 40, "request packet layout drifted");

impl OrderRequestPacket {
    pub fn encode(seq_num: u64, request: &ClientRequest) -> Self {
        Self {
            seq_num,
            client_order_id: request.client_order_id,
            price: request.price,
            client_id: request.client_id,
            ticker_id: request.ticker_id,
            qty: request.qty,
            kind: request.kind as u8,
            side: request.side as u8,
            _pad: [0; 2],
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<(u64, ClientRequest), DecodeError> {
        let packet = Self::read_from(bytes).ok_or(DecodeError::Truncated {
            got: bytes.len(),
            need: ORDER_REQUEST_PACKET_SIZE,
        })?;
        let kind = match packet.kind {
            0 => RequestKind::Invalid,
            1 => RequestKind::New,
            2 => RequestKind::Cancel,
            other => return Err(DecodeError::InvalidKind(other)),
        };
        Ok((
            packet.seq_num,
            ClientRequest {
                kind,
                client_id: packet.client_id,
                ticker_id: packet.ticker_id,
                client_order_id: packet.client_order_id,
                side: side_from_wire(packet.side)?,
                price: packet.price,
                qty: packet.qty,
            },
        ))
    }
}

/// Execution report record, exchange -> client. 56 bytes on the wire.
#[derive(Clone, Copy, Debug, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct OrderResponsePacket {
    /// Per-client outbound sequence, starts at 1.
    pub seq_num: u64,
    pub client_order_id: u64,
    pub market_order_id: u64,
    pub price: i64,
    pub client_id: u32,
    pub ticker_id: u32,
    pub exec_qty: u32,
    pub leaves_qty: u32,
    pub kind: u8,
    pub side: u8,
    pub _pad: [u8; 6],
}

pub const ORDER_RESPONSE_PACKET_SIZE: usize = std::mem::size_of::<OrderResponsePacket>();

const _: () = assert!(ORDER_RESPONSE_PACKET_SIZE == 56, "response packet layout drifted");

impl OrderResponsePacket {
    pub fn encode(seq_num: u64, response: &ClientResponse) -> Self {
        Self {
            seq_num,
            client_order_id: response.client_order_id,
            market_order_id: response.market_order_id,
            price: response.price,
            client_id: response.client_id,
            ticker_id: response.ticker_id,
            exec_qty: response.exec_qty,
            leaves_qty: response.leaves_qty,
            kind: response.kind as u8,
            side: response.side as u8,
            _pad: [0; 6],
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<(u64, ClientResponse), DecodeError> {
        let packet = Self::read_from(bytes).ok_or(DecodeError::Truncated {
            got: bytes.len(),
            need: ORDER_RESPONSE_PACKET_SIZE,
        })?;
        let kind = match packet.kind {
            0 => ResponseKind::Invalid,
            1 => ResponseKind::Accepted,
            2 => ResponseKind::Canceled,
            3 => ResponseKind::Filled,
            4 => ResponseKind::CancelRejected,
            other => return Err(DecodeError::InvalidKind(other)),
        };
        Ok((
            packet.seq_num,
            ClientResponse {
                kind,
                client_id: packet.client_id,
                ticker_id: packet.ticker_id,
                client_order_id: packet.client_order_id,
                market_order_id: packet.market_order_id,
                side: side_from_wire(packet.side)?,
                price: packet.price,
                exec_qty: packet.exec_qty,
                leaves_qty: packet.leaves_qty,
            },
        ))
    }
}

/// Market-data record, publisher -> consumers. 56 bytes on the wire.
///
/// On the incremental stream `seq_num` is the global gapless counter; on the
/// snapshot stream it restarts at 0 for every snapshot cycle and only serves
/// the completeness check.
#[derive(Clone, Copy, Debug, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct MarketDataPacket {
    pub seq_num: u64,
    /// Publisher wall-clock nanos; instrumentation only.
    pub ts_ns: u64,
    pub order_id: u64,
    pub priority: u64,
    pub price: i64,
    pub ticker_id: u32,
    pub qty: u32,
    pub kind: u8,
    pub side: u8,
    pub _pad: [u8; 6],
}

pub const MARKET_DATA_PACKET_SIZE: usize = std::mem::size_of::<MarketDataPacket>();

const _: () = assert!(MARKET_DATA_PACKET_SIZE == 56, "market data packet layout drifted");

impl MarketDataPacket {
    pub fn encode(seq_num: SeqNum, ts_ns: u64, update: &MarketUpdate) -> Self {
        Self {
            seq_num,
            ts_ns,
            order_id: update.order_id,
            priority: update.priority,
            price: update.price,
            ticker_id: update.ticker_id,
            qty: update.qty,
            kind: update.kind as u8,
            side: update.side as u8,
            _pad: [0; 6],
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<(SeqNum, MarketUpdate), DecodeError> {
        let packet = Self::read_from(bytes).ok_or(DecodeError::Truncated {
            got: bytes.len(),
            need: MARKET_DATA_PACKET_SIZE,
        })?;
        let kind = match packet.kind {
            0 => UpdateKind::Invalid,
            1 => UpdateKind::Add,
            2 => UpdateKind::Modify,
            3 => UpdateKind::Cancel,
            4 => UpdateKind::Trade,
            5 => UpdateKind::Clear,
            6 => UpdateKind::SnapshotStart,
            7 => UpdateKind::SnapshotEnd,
            other => return Err(DecodeError::InvalidKind(other)),
        };
        Ok((
            packet.seq_num,
            MarketUpdate {
                kind,
                order_id: packet.order_id,
                ticker_id: packet.ticker_id,
                side: side_from_wire(packet.side)?,
                price: packet.price,
                qty: packet.qty,
                priority: packet.priority,
            },
        ))
    }
}
