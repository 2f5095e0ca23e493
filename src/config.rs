//! Process configuration for the exchange and the trading harness.
//!
//! Plain structs with defaults matching the deployed topology; capacities
//! are validated up front because every ring and pool requires a power of
//! two and the tick grid is fixed at startup.

use std::net::Ipv4Addr;
use std::time::Duration;

use thiserror::Error;

use crate::types::{Qty, MAX_TICKERS};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{what} must be a power of two, got {got}")]
    NotPowerOfTwo { what: &'static str, got: usize },
    #[error("num_tickers {got} exceeds MAX_TICKERS {max}")]
    TooManyTickers { got: usize, max: usize },
    #[error("{0} must be a multicast address")]
    NotMulticast(Ipv4Addr),
}

/// Everything the exchange process needs to come up.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// TCP port the order server listens on.
    pub order_port: u16,
    /// Multicast group/port for the periodic snapshot stream.
    pub snapshot_group: Ipv4Addr,
    pub snapshot_port: u16,
    /// Multicast group/port for the incremental stream.
    pub incremental_group: Ipv4Addr,
    pub incremental_port: u16,
    /// Instruments traded, indexed `0..num_tickers`.
    pub num_tickers: usize,
    pub request_ring_capacity: usize,
    pub response_ring_capacity: usize,
    pub update_ring_capacity: usize,
    /// Per-instrument pool sizes.
    pub order_pool_capacity: u32,
    pub level_pool_capacity: u32,
    /// Time between full snapshot emissions.
    pub snapshot_interval: Duration,
    /// Record per-request engine latency into a histogram.
    pub latency_stats: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            order_port: 12345,
            snapshot_group: Ipv4Addr::new(233, 252, 14, 1),
            snapshot_port: 20000,
            incremental_group: Ipv4Addr::new(233, 252, 14, 3),
            incremental_port: 20001,
            num_tickers: MAX_TICKERS,
            request_ring_capacity: 64 * 1024,
            response_ring_capacity: 64 * 1024,
            update_ring_capacity: 64 * 1024,
            order_pool_capacity: 16 * 1024,
            level_pool_capacity: 256,
            snapshot_interval: Duration::from_secs(60),
            latency_stats: false,
        }
    }
}

impl ExchangeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (what, got) in [
            ("request_ring_capacity", self.request_ring_capacity),
            ("response_ring_capacity", self.response_ring_capacity),
            ("update_ring_capacity", self.update_ring_capacity),
            ("order_pool_capacity", self.order_pool_capacity as usize),
            ("level_pool_capacity", self.level_pool_capacity as usize),
        ] {
            if !got.is_power_of_two() {
                return Err(ConfigError::NotPowerOfTwo { what, got });
            }
        }
        if self.num_tickers > MAX_TICKERS {
            return Err(ConfigError::TooManyTickers {
                got: self.num_tickers,
                max: MAX_TICKERS,
            });
        }
        for group in [self.snapshot_group, self.incremental_group] {
            if !group.is_multicast() {
                return Err(ConfigError::NotMulticast(group));
            }
        }
        Ok(())
    }
}

/// Harness algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgoType {
    Maker,
    Taker,
    Random,
}

impl std::str::FromStr for AlgoType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MAKER" => Ok(AlgoType::Maker),
            "TAKER" => Ok(AlgoType::Taker),
            "RANDOM" => Ok(AlgoType::Random),
            other => Err(format!("unknown algo type '{other}' (expected MAKER, TAKER or RANDOM)")),
        }
    }
}

/// Per-ticker parameters for the harness algos, parsed from the CLI
/// quintuples `CLIP THRESH MAX_ORDER_SIZE MAX_POS MAX_LOSS`.
#[derive(Debug, Clone, Copy)]
pub struct TickerParams {
    pub clip: Qty,
    pub threshold: f64,
    pub max_order_size: Qty,
    pub max_position: i64,
    pub max_loss: f64,
}

impl Default for TickerParams {
    fn default() -> Self {
        Self {
            clip: 10,
            threshold: 0.5,
            max_order_size: 100,
            max_position: 100,
            max_loss: 1000.0,
        }
    }
}
