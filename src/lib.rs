//! # nanex
//!
//! A low-latency electronic trading exchange core: a single-writer matching
//! engine with price-time FIFO priority, the SPSC transport fabric feeding
//! it, and a two-stream market data pipeline (gapless incrementals plus
//! periodic snapshots for late joiners).
//!
//! ## Design Principles
//!
//! - **Single-Writer**: one thread owns every order book exclusively
//! - **Pool Allocation**: no heap allocation on the hot path; orders and
//!   price levels are pool-backed nodes addressed by 32-bit indices
//! - **Dense Tick Grid**: `price -> level` is one bounds-checked array load
//! - **Never Drop Outbound**: the engine spins on full rings; inbound
//!   producers throttle
//!
//! ## Architecture
//!
//! ```text
//! [TCP Order Server] --> [SPSC Request Ring] --> [Engine Thread (Pinned)]
//!          ^                                            |         |
//!          +------------ [SPSC Response Ring] ----------+         |
//!                                                                 v
//!                        [SPSC Update Ring] --> [Publisher Thread]
//!                                                |            |
//!                                       incremental mcast   snapshot mcast
//! ```

pub mod config;
pub mod consumer;
pub mod engine;
pub mod gateway;
pub mod messages;
pub mod order_book;
pub mod order_server;
pub mod pool;
pub mod price_level;
pub mod publisher;
pub mod ring;
pub mod shadow;
pub mod timing;
pub mod types;

// Re-exports for convenience
pub use config::{AlgoType, ExchangeConfig, TickerParams};
pub use consumer::{MarketDataConsumer, Synchronizer};
pub use engine::{EngineHandle, MatchingEngine};
pub use gateway::OrderGateway;
pub use messages::{
    ClientRequest, ClientResponse, MarketUpdate, OutputEvent, RequestKind, ResponseKind,
    UpdateKind,
};
pub use order_book::{OrderBook, RestingOrder};
pub use order_server::OrderServer;
pub use pool::{Pool, PoolIndex, NULL_INDEX};
pub use price_level::{LevelNode, OrderNode};
pub use publisher::MarketDataPublisher;
pub use ring::{ring, Consumer, Producer};
pub use shadow::{synthesize_snapshot, ShadowBook, ShadowOrder};
pub use types::{
    ClientId, ClientOrderId, OrderId, Price, Priority, Qty, SeqNum, Side, TickerId,
};
