//! Order book - per-instrument limit order book with price-time priority.
//!
//! Owned by the matching engine thread; never accessed concurrently. Orders
//! and price levels are pool-allocated nodes; the ladder on each side is a
//! doubly-linked list of levels (bids descending, asks ascending) and each
//! level carries the FIFO of its resting orders. A dense array maps the
//! integer tick directly to its level node, so locating a level is one
//! bounds-checked load.
//!
//! Book operations emit their responses and market updates into a caller
//! provided buffer in a significant order: a TRADE precedes the fill
//! responses it explains, and the resting order's book delta follows them
//! before the walk moves on.

use rustc_hash::FxHashMap;

use crate::messages::{
    ClientResponse, MarketUpdate, OutputEvent, ResponseKind, UpdateKind,
};
use crate::pool::{Pool, PoolIndex, NULL_INDEX};
use crate::price_level::{LevelNode, OrderNode};
use crate::types::{
    ClientId, ClientOrderId, OrderId, Price, Priority, Qty, Side, TickerId, MAX_PRICE_LEVELS,
    ORDER_ID_INVALID, PRICE_INVALID, PRIORITY_INVALID, QTY_INVALID,
};

/// Snapshot of one resting order, for inspection and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RestingOrder {
    pub market_order_id: OrderId,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
    pub priority: Priority,
}

/// Per-instrument central limit order book.
pub struct OrderBook {
    ticker_id: TickerId,
    orders: Pool<OrderNode>,
    levels: Pool<LevelNode>,
    /// Dense tick grid: `price -> level index`, `NULL_INDEX` when absent.
    price_to_level: Box<[PoolIndex]>,
    /// Highest bid level, `NULL_INDEX` when no bids.
    best_bid: PoolIndex,
    /// Lowest ask level, `NULL_INDEX` when no asks.
    best_ask: PoolIndex,
    /// Reverse lookup for cancels; key uniqueness across live orders is an
    /// invariant.
    client_orders: FxHashMap<(ClientId, ClientOrderId), PoolIndex>,
    /// Next engine-assigned order id, monotonic for this book's lifetime.
    next_order_id: OrderId,
}

impl OrderBook {
    /// Create an empty book for `ticker_id` with pre-sized pools.
    pub fn new(ticker_id: TickerId, order_capacity: u32, level_capacity: u32) -> Self {
        Self {
            ticker_id,
            orders: Pool::new(order_capacity),
            levels: Pool::new(level_capacity),
            price_to_level: vec![NULL_INDEX; MAX_PRICE_LEVELS].into_boxed_slice(),
            best_bid: NULL_INDEX,
            best_ask: NULL_INDEX,
            client_orders: FxHashMap::with_capacity_and_hasher(
                order_capacity as usize,
                Default::default(),
            ),
            next_order_id: 1,
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Process a NEW order: match against the opposite side, then rest any
    /// residual quantity at `price`.
    ///
    /// Malformed requests (invalid side, zero/invalid quantity, price off the
    /// tick grid, duplicate `(client, client_order_id)`) are answered with a
    /// `CancelRejected` response and leave the book untouched.
    pub fn add(
        &mut self,
        client_id: ClientId,
        client_order_id: ClientOrderId,
        side: Side,
        price: Price,
        qty: Qty,
        events: &mut Vec<OutputEvent>,
    ) {
        if !side.is_valid()
            || qty == 0
            || qty == QTY_INVALID
            || price < 0
            || price as usize >= MAX_PRICE_LEVELS
            || self.client_orders.contains_key(&(client_id, client_order_id))
        {
            events.push(OutputEvent::Response(self.reject(client_id, client_order_id)));
            return;
        }

        let market_order_id = self.next_order_id;
        self.next_order_id += 1;

        let leaves = self.match_incoming(
            client_id,
            client_order_id,
            market_order_id,
            side,
            price,
            qty,
            events,
        );

        if leaves > 0 {
            self.insert_resting(client_id, client_order_id, market_order_id, side, price, leaves, events);
        }
    }

    /// Cancel the order identified by `(client_id, client_order_id)`.
    ///
    /// Unknown or foreign-client ids are answered with `CancelRejected` and
    /// no market update; a partially filled order cancels its remainder.
    pub fn cancel(
        &mut self,
        client_id: ClientId,
        client_order_id: ClientOrderId,
        events: &mut Vec<OutputEvent>,
    ) {
        let Some(&order_idx) = self.client_orders.get(&(client_id, client_order_id)) else {
            events.push(OutputEvent::Response(self.reject(client_id, client_order_id)));
            return;
        };

        let node = *self.orders.get(order_idx);
        let level_idx = self.price_to_level[node.price as usize];
        assert!(
            level_idx != NULL_INDEX,
            "reverse map points at price {} with no level on ticker {}",
            node.price,
            self.ticker_id
        );

        let level_empty = self
            .levels
            .get_mut(level_idx)
            .unlink(&mut self.orders, order_idx);
        if level_empty {
            self.remove_level(level_idx);
        }
        self.orders.release(order_idx);
        self.client_orders.remove(&(client_id, client_order_id));

        events.push(OutputEvent::Response(ClientResponse {
            kind: ResponseKind::Canceled,
            client_id,
            ticker_id: self.ticker_id,
            client_order_id,
            market_order_id: node.order_id,
            side: node.side,
            price: node.price,
            exec_qty: 0,
            leaves_qty: node.qty,
        }));
        events.push(OutputEvent::Update(MarketUpdate {
            kind: UpdateKind::Cancel,
            order_id: node.order_id,
            ticker_id: self.ticker_id,
            side: node.side,
            price: node.price,
            qty: node.qty,
            priority: node.priority,
        }));
    }

    // ========================================================================
    // Matching
    // ========================================================================

    /// Walk the opposite ladder from its best level while prices cross,
    /// consuming resting orders in FIFO order. Returns the aggressor's
    /// unfilled remainder.
    fn match_incoming(
        &mut self,
        client_id: ClientId,
        client_order_id: ClientOrderId,
        market_order_id: OrderId,
        side: Side,
        limit: Price,
        qty: Qty,
        events: &mut Vec<OutputEvent>,
    ) -> Qty {
        let mut remaining = qty;

        loop {
            if remaining == 0 {
                break;
            }

            let level_idx = match side {
                Side::Buy => self.best_ask,
                Side::Sell => self.best_bid,
                Side::Invalid => unreachable!("side validated in add"),
            };
            if level_idx == NULL_INDEX {
                break;
            }

            let level_price = self.levels.get(level_idx).price;
            let crosses = match side {
                Side::Buy => level_price <= limit,
                Side::Sell => level_price >= limit,
                Side::Invalid => unreachable!(),
            };
            if !crosses {
                break;
            }

            let maker_idx = self.levels.get(level_idx).head;
            debug_assert!(maker_idx != NULL_INDEX, "non-empty level with null head");
            let maker = *self.orders.get(maker_idx);

            let fill = remaining.min(maker.qty);
            remaining -= fill;
            let maker_leaves = maker.qty - fill;

            // Tape first: the trade precedes the responses acknowledging it.
            events.push(OutputEvent::Update(MarketUpdate {
                kind: UpdateKind::Trade,
                order_id: ORDER_ID_INVALID,
                ticker_id: self.ticker_id,
                side,
                price: level_price,
                qty: fill,
                priority: PRIORITY_INVALID,
            }));
            events.push(OutputEvent::Response(ClientResponse {
                kind: ResponseKind::Filled,
                client_id,
                ticker_id: self.ticker_id,
                client_order_id,
                market_order_id,
                side,
                price: level_price,
                exec_qty: fill,
                leaves_qty: remaining,
            }));
            events.push(OutputEvent::Response(ClientResponse {
                kind: ResponseKind::Filled,
                client_id: maker.client_id,
                ticker_id: self.ticker_id,
                client_order_id: maker.client_order_id,
                market_order_id: maker.order_id,
                side: maker.side,
                price: level_price,
                exec_qty: fill,
                leaves_qty: maker_leaves,
            }));

            if maker_leaves == 0 {
                // Resting order fully consumed: drop it from the level and
                // the book before touching the next one.
                let level_empty = {
                    let level = self.levels.get_mut(level_idx);
                    let popped = level.pop_front(&mut self.orders);
                    debug_assert_eq!(popped, Some(maker_idx));
                    level.is_empty()
                };
                self.client_orders
                    .remove(&(maker.client_id, maker.client_order_id));
                self.orders.release(maker_idx);

                events.push(OutputEvent::Update(MarketUpdate {
                    kind: UpdateKind::Cancel,
                    order_id: maker.order_id,
                    ticker_id: self.ticker_id,
                    side: maker.side,
                    price: maker.price,
                    qty: 0,
                    priority: PRIORITY_INVALID,
                }));

                if level_empty {
                    self.remove_level(level_idx);
                }
            } else {
                self.orders.get_mut(maker_idx).qty = maker_leaves;
                let level = self.levels.get_mut(level_idx);
                level.subtract_qty(fill);

                events.push(OutputEvent::Update(MarketUpdate {
                    kind: UpdateKind::Modify,
                    order_id: maker.order_id,
                    ticker_id: self.ticker_id,
                    side: maker.side,
                    price: maker.price,
                    qty: maker_leaves,
                    priority: maker.priority,
                }));
            }
        }

        remaining
    }

    /// Rest the aggressor's residual at `price` on its own side.
    fn insert_resting(
        &mut self,
        client_id: ClientId,
        client_order_id: ClientOrderId,
        market_order_id: OrderId,
        side: Side,
        price: Price,
        leaves: Qty,
        events: &mut Vec<OutputEvent>,
    ) {
        let slot = price as usize;
        let mut level_idx = self.price_to_level[slot];
        if level_idx == NULL_INDEX {
            level_idx = self.insert_level(side, price);
        }
        debug_assert_eq!(
            self.levels.get(level_idx).side,
            side,
            "crossed level survived matching"
        );

        let priority = self.levels.get_mut(level_idx).take_priority();
        let order_idx = self
            .orders
            .acquire(OrderNode {
                order_id: market_order_id,
                client_id,
                client_order_id,
                side,
                price,
                qty: leaves,
                priority,
                prev: NULL_INDEX,
                next: NULL_INDEX,
            })
            .unwrap_or_else(|| panic!("order pool exhausted on ticker {}", self.ticker_id));

        self.levels
            .get_mut(level_idx)
            .push_back(&mut self.orders, order_idx);
        self.client_orders
            .insert((client_id, client_order_id), order_idx);

        events.push(OutputEvent::Response(ClientResponse {
            kind: ResponseKind::Accepted,
            client_id,
            ticker_id: self.ticker_id,
            client_order_id,
            market_order_id,
            side,
            price,
            exec_qty: 0,
            leaves_qty: leaves,
        }));
        events.push(OutputEvent::Update(MarketUpdate {
            kind: UpdateKind::Add,
            order_id: market_order_id,
            ticker_id: self.ticker_id,
            side,
            price,
            qty: leaves,
            priority,
        }));
    }

    // ========================================================================
    // Ladder maintenance
    // ========================================================================

    /// Allocate a level for `side` at `price` and splice it into the ladder:
    /// scan from the side's best until the first worse-priced level and
    /// insert before it.
    fn insert_level(&mut self, side: Side, price: Price) -> PoolIndex {
        let new_idx = self
            .levels
            .acquire(LevelNode::new(side, price))
            .unwrap_or_else(|| panic!("level pool exhausted on ticker {}", self.ticker_id));
        self.price_to_level[price as usize] = new_idx;

        let best = match side {
            Side::Buy => self.best_bid,
            Side::Sell => self.best_ask,
            Side::Invalid => unreachable!(),
        };

        let mut prev = NULL_INDEX;
        let mut cur = best;
        while cur != NULL_INDEX {
            let cur_price = self.levels.get(cur).price;
            let cur_is_worse = match side {
                Side::Buy => cur_price < price,
                Side::Sell => cur_price > price,
                Side::Invalid => unreachable!(),
            };
            if cur_is_worse {
                break;
            }
            prev = cur;
            cur = self.levels.get(cur).next;
        }

        {
            let node = self.levels.get_mut(new_idx);
            node.prev = prev;
            node.next = cur;
        }
        if prev == NULL_INDEX {
            match side {
                Side::Buy => self.best_bid = new_idx,
                Side::Sell => self.best_ask = new_idx,
                Side::Invalid => unreachable!(),
            }
        } else {
            self.levels.get_mut(prev).next = new_idx;
        }
        if cur != NULL_INDEX {
            self.levels.get_mut(cur).prev = new_idx;
        }

        new_idx
    }

    /// Unlink an empty level from its ladder and release it.
    fn remove_level(&mut self, level_idx: PoolIndex) {
        let level = *self.levels.get(level_idx);
        debug_assert!(level.is_empty(), "removing a non-empty level");

        self.price_to_level[level.price as usize] = NULL_INDEX;

        if level.prev == NULL_INDEX {
            match level.side {
                Side::Buy => self.best_bid = level.next,
                Side::Sell => self.best_ask = level.next,
                Side::Invalid => unreachable!(),
            }
        } else {
            self.levels.get_mut(level.prev).next = level.next;
        }
        if level.next != NULL_INDEX {
            self.levels.get_mut(level.next).prev = level.prev;
        }

        self.levels.release(level_idx);
    }

    fn reject(&self, client_id: ClientId, client_order_id: ClientOrderId) -> ClientResponse {
        ClientResponse {
            kind: ResponseKind::CancelRejected,
            client_id,
            ticker_id: self.ticker_id,
            client_order_id,
            market_order_id: ORDER_ID_INVALID,
            side: Side::Invalid,
            price: PRICE_INVALID,
            exec_qty: QTY_INVALID,
            leaves_qty: QTY_INVALID,
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    #[inline]
    pub fn ticker_id(&self) -> TickerId {
        self.ticker_id
    }

    /// Highest bid price, if any bids rest.
    #[inline]
    pub fn best_bid(&self) -> Option<Price> {
        (self.best_bid != NULL_INDEX).then(|| self.levels.get(self.best_bid).price)
    }

    /// Lowest ask price, if any asks rest.
    #[inline]
    pub fn best_ask(&self) -> Option<Price> {
        (self.best_ask != NULL_INDEX).then(|| self.levels.get(self.best_ask).price)
    }

    /// `best_ask - best_bid` when both sides exist.
    pub fn spread(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// `(total_qty, order_count)` resting at `price` on `side`.
    pub fn depth_at(&self, side: Side, price: Price) -> (u64, u32) {
        if price < 0 || price as usize >= MAX_PRICE_LEVELS {
            return (0, 0);
        }
        let level_idx = self.price_to_level[price as usize];
        if level_idx == NULL_INDEX {
            return (0, 0);
        }
        let level = self.levels.get(level_idx);
        if level.side != side {
            return (0, 0);
        }
        (level.total_qty, level.count)
    }

    /// Number of live resting orders.
    pub fn order_count(&self) -> usize {
        self.client_orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.client_orders.is_empty()
    }

    /// Bid ladder prices from best to worst.
    pub fn bid_prices(&self) -> Vec<Price> {
        self.ladder_prices(self.best_bid)
    }

    /// Ask ladder prices from best to worst.
    pub fn ask_prices(&self) -> Vec<Price> {
        self.ladder_prices(self.best_ask)
    }

    fn ladder_prices(&self, mut cur: PoolIndex) -> Vec<Price> {
        let mut prices = Vec::new();
        while cur != NULL_INDEX {
            let level = self.levels.get(cur);
            prices.push(level.price);
            cur = level.next;
        }
        prices
    }

    /// The resting order for `(client_id, client_order_id)`, if live.
    pub fn find_order(&self, client_id: ClientId, client_order_id: ClientOrderId) -> Option<RestingOrder> {
        let &order_idx = self.client_orders.get(&(client_id, client_order_id))?;
        let node = self.orders.get(order_idx);
        Some(RestingOrder {
            market_order_id: node.order_id,
            side: node.side,
            price: node.price,
            qty: node.qty,
            priority: node.priority,
        })
    }

    /// All orders resting at `price` on `side`, FIFO order (head first).
    pub fn level_orders(&self, side: Side, price: Price) -> Vec<RestingOrder> {
        let mut result = Vec::new();
        if price < 0 || price as usize >= MAX_PRICE_LEVELS {
            return result;
        }
        let level_idx = self.price_to_level[price as usize];
        if level_idx == NULL_INDEX || self.levels.get(level_idx).side != side {
            return result;
        }
        let mut cur = self.levels.get(level_idx).head;
        while cur != NULL_INDEX {
            let node = self.orders.get(cur);
            result.push(RestingOrder {
                market_order_id: node.order_id,
                side: node.side,
                price: node.price,
                qty: node.qty,
                priority: node.priority,
            });
            cur = node.next;
        }
        result
    }

    /// Order-independent digest of the full book state, for determinism
    /// checks.
    pub fn state_hash(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        for best in [self.best_bid, self.best_ask] {
            let mut cur = best;
            while cur != NULL_INDEX {
                let level = self.levels.get(cur);
                (level.side as u8).hash(&mut hasher);
                level.price.hash(&mut hasher);
                let mut order = level.head;
                while order != NULL_INDEX {
                    let node = self.orders.get(order);
                    node.order_id.hash(&mut hasher);
                    node.client_id.hash(&mut hasher);
                    node.client_order_id.hash(&mut hasher);
                    node.qty.hash(&mut hasher);
                    node.priority.hash(&mut hasher);
                    order = node.next;
                }
                cur = level.next;
            }
        }
        hasher.finish()
    }
}

impl std::fmt::Debug for OrderBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBook")
            .field("ticker_id", &self.ticker_id)
            .field("best_bid", &self.best_bid())
            .field("best_ask", &self.best_ask())
            .field("order_count", &self.client_orders.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> OrderBook {
        OrderBook::new(0, 1024, 256)
    }

    fn add(
        book: &mut OrderBook,
        client: ClientId,
        coid: ClientOrderId,
        side: Side,
        price: Price,
        qty: Qty,
    ) -> Vec<OutputEvent> {
        let mut events = Vec::new();
        book.add(client, coid, side, price, qty, &mut events);
        events
    }

    fn cancel(book: &mut OrderBook, client: ClientId, coid: ClientOrderId) -> Vec<OutputEvent> {
        let mut events = Vec::new();
        book.cancel(client, coid, &mut events);
        events
    }

    fn trades(events: &[OutputEvent]) -> Vec<MarketUpdate> {
        events
            .iter()
            .filter_map(|e| match e {
                OutputEvent::Update(u) if u.kind == UpdateKind::Trade => Some(*u),
                _ => None,
            })
            .collect()
    }

    fn responses(events: &[OutputEvent], kind: ResponseKind) -> Vec<ClientResponse> {
        events
            .iter()
            .filter_map(|e| match e {
                OutputEvent::Response(r) if r.kind == kind => Some(*r),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_empty_book() {
        let book = book();
        assert!(book.is_empty());
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), None);
        assert_eq!(book.spread(), None);
    }

    #[test]
    fn test_rest_bid_no_match() {
        let mut book = book();
        let events = add(&mut book, 1, 1, Side::Buy, 100, 10);

        assert_eq!(events.len(), 2);
        let accepted = responses(&events, ResponseKind::Accepted);
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].leaves_qty, 10);
        assert_eq!(accepted[0].market_order_id, 1);

        match events[1] {
            OutputEvent::Update(u) => {
                assert_eq!(u.kind, UpdateKind::Add);
                assert_eq!(u.price, 100);
                assert_eq!(u.qty, 10);
                assert_eq!(u.priority, 1);
            }
            _ => panic!("expected ADD after ACCEPTED"),
        }

        assert_eq!(book.best_bid(), Some(100));
        assert_eq!(book.best_ask(), None);
        assert_eq!(book.order_count(), 1);
    }

    #[test]
    fn test_best_price_ordering() {
        let mut book = book();
        add(&mut book, 1, 1, Side::Buy, 100, 10);
        add(&mut book, 1, 2, Side::Buy, 105, 10);
        add(&mut book, 1, 3, Side::Buy, 95, 10);
        assert_eq!(book.best_bid(), Some(105));
        assert_eq!(book.bid_prices(), vec![105, 100, 95]);

        add(&mut book, 2, 1, Side::Sell, 110, 10);
        add(&mut book, 2, 2, Side::Sell, 108, 10);
        add(&mut book, 2, 3, Side::Sell, 120, 10);
        assert_eq!(book.best_ask(), Some(108));
        assert_eq!(book.ask_prices(), vec![108, 110, 120]);

        assert_eq!(book.spread(), Some(3));
    }

    #[test]
    fn test_full_cross_empties_book() {
        let mut book = book();
        add(&mut book, 1, 1, Side::Buy, 100, 10);
        let events = add(&mut book, 2, 1, Side::Sell, 95, 10);

        let trade_events = trades(&events);
        assert_eq!(trade_events.len(), 1);
        assert_eq!(trade_events[0].price, 100);
        assert_eq!(trade_events[0].qty, 10);

        let fills = responses(&events, ResponseKind::Filled);
        assert_eq!(fills.len(), 2);
        // Aggressor's fill first, then the resting order's.
        assert_eq!(fills[0].client_id, 2);
        assert_eq!(fills[0].price, 100);
        assert_eq!(fills[1].client_id, 1);
        assert_eq!(fills[1].leaves_qty, 0);

        assert!(responses(&events, ResponseKind::Accepted).is_empty());
        assert!(book.is_empty());
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), None);
    }

    #[test]
    fn test_trade_precedes_fill_responses() {
        let mut book = book();
        add(&mut book, 1, 1, Side::Buy, 100, 10);
        let events = add(&mut book, 2, 1, Side::Sell, 100, 10);

        let trade_pos = events
            .iter()
            .position(|e| matches!(e, OutputEvent::Update(u) if u.kind == UpdateKind::Trade))
            .unwrap();
        let first_fill_pos = events
            .iter()
            .position(|e| matches!(e, OutputEvent::Response(r) if r.kind == ResponseKind::Filled))
            .unwrap();
        assert!(trade_pos < first_fill_pos);
    }

    #[test]
    fn test_partial_cross_taker_rests() {
        let mut book = book();
        add(&mut book, 1, 1, Side::Sell, 100, 50);
        let events = add(&mut book, 2, 1, Side::Buy, 100, 80);

        let fills = responses(&events, ResponseKind::Filled);
        assert_eq!(fills[0].exec_qty, 50);
        assert_eq!(fills[0].leaves_qty, 30);

        let accepted = responses(&events, ResponseKind::Accepted);
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].leaves_qty, 30);

        assert_eq!(book.best_bid(), Some(100));
        assert_eq!(book.best_ask(), None);
        assert_eq!(book.depth_at(Side::Buy, 100), (30, 1));
    }

    #[test]
    fn test_partial_cross_maker_remains() {
        let mut book = book();
        add(&mut book, 1, 1, Side::Sell, 100, 100);
        let events = add(&mut book, 2, 1, Side::Buy, 100, 30);

        // The resting order shrinks in place and a MODIFY reports it.
        let modify = events.iter().find_map(|e| match e {
            OutputEvent::Update(u) if u.kind == UpdateKind::Modify => Some(*u),
            _ => None,
        });
        assert_eq!(modify.unwrap().qty, 70);

        assert_eq!(book.order_count(), 1);
        assert_eq!(book.depth_at(Side::Sell, 100), (70, 1));
    }

    #[test]
    fn test_match_walks_levels_best_first() {
        let mut book = book();
        add(&mut book, 1, 1, Side::Sell, 100, 50);
        add(&mut book, 1, 2, Side::Sell, 101, 50);
        add(&mut book, 1, 3, Side::Sell, 102, 50);

        let events = add(&mut book, 2, 1, Side::Buy, 102, 120);
        let trade_events = trades(&events);
        assert_eq!(trade_events.len(), 3);
        assert_eq!((trade_events[0].price, trade_events[0].qty), (100, 50));
        assert_eq!((trade_events[1].price, trade_events[1].qty), (101, 50));
        assert_eq!((trade_events[2].price, trade_events[2].qty), (102, 20));

        assert_eq!(book.best_ask(), Some(102));
        assert_eq!(book.depth_at(Side::Sell, 102), (30, 1));
    }

    #[test]
    fn test_time_priority_within_level() {
        let mut book = book();
        add(&mut book, 1, 1, Side::Buy, 100, 5);
        add(&mut book, 2, 1, Side::Buy, 100, 5);

        let events = add(&mut book, 3, 1, Side::Sell, 100, 5);
        let fills = responses(&events, ResponseKind::Filled);
        // Resting fill went to the earlier order (client 1).
        assert_eq!(fills[1].client_id, 1);

        assert!(book.find_order(1, 1).is_none());
        let survivor = book.find_order(2, 1).unwrap();
        assert_eq!(survivor.qty, 5);
        assert_eq!(book.depth_at(Side::Buy, 100), (5, 1));
    }

    #[test]
    fn test_cancel_resting_order() {
        let mut book = book();
        add(&mut book, 1, 1, Side::Buy, 100, 10);
        let events = cancel(&mut book, 1, 1);

        assert_eq!(events.len(), 2);
        let canceled = responses(&events, ResponseKind::Canceled);
        assert_eq!(canceled.len(), 1);
        assert_eq!(canceled[0].leaves_qty, 10);
        match events[1] {
            OutputEvent::Update(u) => assert_eq!(u.kind, UpdateKind::Cancel),
            _ => panic!("expected CANCEL update"),
        }

        assert!(book.is_empty());
        assert_eq!(book.best_bid(), None);
    }

    #[test]
    fn test_cancel_unknown_is_rejected_without_update() {
        let mut book = book();
        let events = cancel(&mut book, 9, 42);

        assert_eq!(events.len(), 1);
        assert_eq!(responses(&events, ResponseKind::CancelRejected).len(), 1);
    }

    #[test]
    fn test_cancel_foreign_client_is_rejected() {
        let mut book = book();
        add(&mut book, 1, 7, Side::Buy, 100, 10);
        let events = cancel(&mut book, 2, 7);

        assert_eq!(responses(&events, ResponseKind::CancelRejected).len(), 1);
        assert_eq!(book.order_count(), 1);
    }

    #[test]
    fn test_duplicate_client_order_id_rejected() {
        let mut book = book();
        add(&mut book, 1, 1, Side::Buy, 100, 10);
        let events = add(&mut book, 1, 1, Side::Buy, 101, 10);

        assert_eq!(responses(&events, ResponseKind::CancelRejected).len(), 1);
        assert_eq!(book.order_count(), 1);
        assert_eq!(book.best_bid(), Some(100));
    }

    #[test]
    fn test_malformed_new_rejected() {
        let mut book = book();
        assert_eq!(
            responses(&add(&mut book, 1, 1, Side::Buy, 100, 0), ResponseKind::CancelRejected).len(),
            1
        );
        assert_eq!(
            responses(
                &add(&mut book, 1, 2, Side::Invalid, 100, 10),
                ResponseKind::CancelRejected
            )
            .len(),
            1
        );
        assert_eq!(
            responses(
                &add(&mut book, 1, 3, Side::Buy, MAX_PRICE_LEVELS as Price, 10),
                ResponseKind::CancelRejected
            )
            .len(),
            1
        );
        assert_eq!(
            responses(&add(&mut book, 1, 4, Side::Buy, -1, 10), ResponseKind::CancelRejected).len(),
            1
        );
        assert!(book.is_empty());
    }

    #[test]
    fn test_order_ids_are_monotonic() {
        let mut book = book();
        let a = responses(&add(&mut book, 1, 1, Side::Buy, 100, 10), ResponseKind::Accepted);
        let b = responses(&add(&mut book, 1, 2, Side::Buy, 101, 10), ResponseKind::Accepted);
        cancel(&mut book, 1, 1);
        let c = responses(&add(&mut book, 1, 3, Side::Buy, 102, 10), ResponseKind::Accepted);

        assert_eq!(a[0].market_order_id, 1);
        assert_eq!(b[0].market_order_id, 2);
        // Ids are never reused after cancel.
        assert_eq!(c[0].market_order_id, 3);
    }

    #[test]
    fn test_priority_restarts_with_new_level() {
        let mut book = book();
        add(&mut book, 1, 1, Side::Buy, 100, 10);
        add(&mut book, 1, 2, Side::Buy, 100, 10);
        assert_eq!(book.find_order(1, 2).unwrap().priority, 2);

        cancel(&mut book, 1, 1);
        cancel(&mut book, 1, 2);

        // The level was destroyed with its last order; a fresh one restarts.
        add(&mut book, 1, 3, Side::Buy, 100, 10);
        assert_eq!(book.find_order(1, 3).unwrap().priority, 1);
    }

    #[test]
    fn test_ladder_relinks_on_middle_removal() {
        let mut book = book();
        add(&mut book, 1, 1, Side::Sell, 100, 10);
        add(&mut book, 1, 2, Side::Sell, 101, 10);
        add(&mut book, 1, 3, Side::Sell, 102, 10);

        cancel(&mut book, 1, 2);
        assert_eq!(book.ask_prices(), vec![100, 102]);

        cancel(&mut book, 1, 1);
        assert_eq!(book.ask_prices(), vec![102]);
        assert_eq!(book.best_ask(), Some(102));
    }

    #[test]
    fn test_fifo_consumption_across_same_level() {
        let mut book = book();
        add(&mut book, 1, 1, Side::Sell, 100, 10);
        add(&mut book, 2, 1, Side::Sell, 100, 10);
        add(&mut book, 3, 1, Side::Sell, 100, 10);

        let events = add(&mut book, 4, 1, Side::Buy, 100, 20);
        let fills = responses(&events, ResponseKind::Filled);
        let maker_fills: Vec<ClientId> = fills
            .iter()
            .filter(|f| f.client_id != 4)
            .map(|f| f.client_id)
            .collect();
        assert_eq!(maker_fills, vec![1, 2]);

        let rest = book.level_orders(Side::Sell, 100);
        assert_eq!(rest.len(), 1);
        assert_eq!(book.find_order(3, 1).unwrap().qty, 10);
    }

    #[test]
    fn test_state_hash_tracks_content() {
        let mut a = book();
        let mut b = book();
        for (coid, price) in [(1u64, 100i64), (2, 101), (3, 99)] {
            add(&mut a, 1, coid, Side::Buy, price, 10);
            add(&mut b, 1, coid, Side::Buy, price, 10);
        }
        assert_eq!(a.state_hash(), b.state_hash());

        cancel(&mut b, 1, 2);
        assert_ne!(a.state_hash(), b.state_hash());
    }

    #[test]
    #[should_panic(expected = "order pool exhausted")]
    fn test_order_pool_exhaustion_is_fatal() {
        let mut book = OrderBook::new(0, 4, 256);
        for coid in 0..5u64 {
            add(&mut book, 1, coid, Side::Buy, 100 + coid as Price, 10);
        }
    }
}
