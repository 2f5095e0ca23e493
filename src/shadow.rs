//! Shadow book - passive order state rebuilt from market updates.
//!
//! The snapshot synthesizer keeps one per instrument to turn the incremental
//! stream back into resting orders; the market-data consumer uses the same
//! replay rules after a gap. Unlike the matching book there is no matching
//! here: ADD/MODIFY/CANCEL/CLEAR mutate state, TRADE is informational (the
//! book change it causes arrives as its companion MODIFY or CANCEL).

use rustc_hash::FxHashMap;

use crate::messages::{MarketUpdate, UpdateKind};
use crate::types::{
    OrderId, Price, Priority, Qty, SeqNum, Side, TickerId, ORDER_ID_INVALID, PRICE_INVALID,
    PRIORITY_INVALID, QTY_INVALID,
};

/// A passively tracked resting order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShadowOrder {
    pub order_id: OrderId,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
    pub priority: Priority,
}

/// Passive replica of one instrument's resting orders.
#[derive(Debug, Clone)]
pub struct ShadowBook {
    ticker_id: TickerId,
    orders: FxHashMap<OrderId, ShadowOrder>,
}

impl ShadowBook {
    pub fn new(ticker_id: TickerId) -> Self {
        Self {
            ticker_id,
            orders: FxHashMap::default(),
        }
    }

    #[inline]
    pub fn ticker_id(&self) -> TickerId {
        self.ticker_id
    }

    /// Apply one market update addressed to this instrument.
    pub fn apply(&mut self, update: &MarketUpdate) {
        debug_assert!(
            !matches!(
                update.kind,
                UpdateKind::Add | UpdateKind::Modify | UpdateKind::Cancel | UpdateKind::Clear
            ) || update.ticker_id == self.ticker_id,
            "update for ticker {} applied to shadow book {}",
            update.ticker_id,
            self.ticker_id
        );
        match update.kind {
            UpdateKind::Add => {
                self.orders.insert(
                    update.order_id,
                    ShadowOrder {
                        order_id: update.order_id,
                        side: update.side,
                        price: update.price,
                        qty: update.qty,
                        priority: update.priority,
                    },
                );
            }
            UpdateKind::Modify => match self.orders.get_mut(&update.order_id) {
                Some(order) => order.qty = update.qty,
                None => {
                    self.orders.insert(
                        update.order_id,
                        ShadowOrder {
                            order_id: update.order_id,
                            side: update.side,
                            price: update.price,
                            qty: update.qty,
                            priority: update.priority,
                        },
                    );
                }
            },
            UpdateKind::Cancel => {
                self.orders.remove(&update.order_id);
            }
            UpdateKind::Clear => {
                self.orders.clear();
            }
            // The book change a trade causes arrives as MODIFY/CANCEL.
            UpdateKind::Trade
            | UpdateKind::SnapshotStart
            | UpdateKind::SnapshotEnd
            | UpdateKind::Invalid => {}
        }
    }

    /// Resting orders in deterministic `(Side, Price, Priority)` order, so
    /// two replicas of the same state dump identically.
    pub fn sorted_orders(&self) -> Vec<ShadowOrder> {
        let mut orders: Vec<ShadowOrder> = self.orders.values().copied().collect();
        orders.sort_by_key(|o| (o.side as u8, o.price, o.priority));
        orders
    }

    /// Best (highest) bid currently resting, if any.
    pub fn best_bid(&self) -> Option<Price> {
        self.orders
            .values()
            .filter(|o| o.side == Side::Buy)
            .map(|o| o.price)
            .max()
    }

    /// Best (lowest) ask currently resting, if any.
    pub fn best_ask(&self) -> Option<Price> {
        self.orders
            .values()
            .filter(|o| o.side == Side::Sell)
            .map(|o| o.price)
            .min()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Digest over the deterministic dump, for replica comparison.
    pub fn state_hash(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        for order in self.sorted_orders() {
            order.order_id.hash(&mut hasher);
            (order.side as u8).hash(&mut hasher);
            order.price.hash(&mut hasher);
            order.qty.hash(&mut hasher);
            order.priority.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Assemble the snapshot message sequence for the given books:
/// SNAPSHOT_START, then per instrument a CLEAR followed by one ADD per
/// resting order in deterministic order, then SNAPSHOT_END.
///
/// `last_seq` is the last incremental sequence number the snapshot covers;
/// START and END carry it in their `order_id` field so receivers know where
/// to splice the incremental stream.
pub fn synthesize_snapshot(books: &[ShadowBook], last_seq: SeqNum) -> Vec<MarketUpdate> {
    let mut messages = Vec::new();
    messages.push(MarketUpdate {
        kind: UpdateKind::SnapshotStart,
        order_id: last_seq,
        ..MarketUpdate::default()
    });
    for book in books {
        messages.push(MarketUpdate {
            kind: UpdateKind::Clear,
            order_id: ORDER_ID_INVALID,
            ticker_id: book.ticker_id(),
            side: Side::Invalid,
            price: PRICE_INVALID,
            qty: QTY_INVALID,
            priority: PRIORITY_INVALID,
        });
        for order in book.sorted_orders() {
            messages.push(MarketUpdate {
                kind: UpdateKind::Add,
                order_id: order.order_id,
                ticker_id: book.ticker_id(),
                side: order.side,
                price: order.price,
                qty: order.qty,
                priority: order.priority,
            });
        }
    }
    messages.push(MarketUpdate {
        kind: UpdateKind::SnapshotEnd,
        order_id: last_seq,
        ..MarketUpdate::default()
    });
    messages
}
