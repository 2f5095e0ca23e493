//! Price level - one price point on one side of a book.
//!
//! A level owns a FIFO of resting orders as an intrusive doubly-linked list
//! threaded through pool indices, and is itself a node in the doubly-linked
//! price ladder for its side. Both node types live in pools owned by the
//! book; "destroying" a node returns it to its pool.

use crate::pool::{Pool, PoolIndex, NULL_INDEX};
use crate::types::{
    ClientId, ClientOrderId, OrderId, Price, Priority, Qty, Side, CLIENT_ID_INVALID,
    CLIENT_ORDER_ID_INVALID, ORDER_ID_INVALID, PRICE_INVALID, PRIORITY_INVALID, QTY_INVALID,
};

/// A resting order. Linked into its level's FIFO via `prev`/`next`.
#[derive(Clone, Copy, Debug)]
pub struct OrderNode {
    pub order_id: OrderId,
    pub client_id: ClientId,
    pub client_order_id: ClientOrderId,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
    pub priority: Priority,
    pub prev: PoolIndex,
    pub next: PoolIndex,
}

impl Default for OrderNode {
    fn default() -> Self {
        Self {
            order_id: ORDER_ID_INVALID,
            client_id: CLIENT_ID_INVALID,
            client_order_id: CLIENT_ORDER_ID_INVALID,
            side: Side::Invalid,
            price: PRICE_INVALID,
            qty: QTY_INVALID,
            priority: PRIORITY_INVALID,
            prev: NULL_INDEX,
            next: NULL_INDEX,
        }
    }
}

/// A price level node. Linked into its side's ladder via `prev`/`next`
/// (towards-better / towards-worse price respectively).
#[derive(Clone, Copy, Debug)]
pub struct LevelNode {
    pub side: Side,
    pub price: Price,
    /// Oldest order at this price - first to match.
    pub head: PoolIndex,
    /// Newest order at this price.
    pub tail: PoolIndex,
    /// Aggregate resting quantity; derivable from the list, kept for O(1)
    /// depth queries.
    pub total_qty: u64,
    pub count: u32,
    /// Next priority to hand out at this level; starts at 1.
    pub next_priority: Priority,
    /// Towards the better price (closer to the top of the ladder).
    pub prev: PoolIndex,
    /// Towards the worse price.
    pub next: PoolIndex,
}

impl Default for LevelNode {
    fn default() -> Self {
        Self {
            side: Side::Invalid,
            price: PRICE_INVALID,
            head: NULL_INDEX,
            tail: NULL_INDEX,
            total_qty: 0,
            count: 0,
            next_priority: 1,
            prev: NULL_INDEX,
            next: NULL_INDEX,
        }
    }
}

impl LevelNode {
    /// Fresh level for `side` at `price`, empty FIFO, priority counter at 1.
    pub fn new(side: Side, price: Price) -> Self {
        Self {
            side,
            price,
            ..Self::default()
        }
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Hand out the next time priority at this level.
    #[inline]
    pub fn take_priority(&mut self) -> Priority {
        let priority = self.next_priority;
        self.next_priority += 1;
        priority
    }

    /// Append `index` at the tail (strict time priority: newest last).
    /// The node's `qty` must already be set.
    #[inline]
    pub fn push_back(&mut self, orders: &mut Pool<OrderNode>, index: PoolIndex) {
        let qty = orders.get(index).qty;

        if self.tail == NULL_INDEX {
            debug_assert!(self.head == NULL_INDEX);
            self.head = index;
            self.tail = index;
            let node = orders.get_mut(index);
            node.prev = NULL_INDEX;
            node.next = NULL_INDEX;
        } else {
            orders.get_mut(self.tail).next = index;
            let node = orders.get_mut(index);
            node.prev = self.tail;
            node.next = NULL_INDEX;
            self.tail = index;
        }

        self.count += 1;
        self.total_qty += qty as u64;
    }

    /// Remove and return the head (oldest) order, or `None` if empty.
    /// The node is not released back to its pool; the caller does that.
    #[inline]
    pub fn pop_front(&mut self, orders: &mut Pool<OrderNode>) -> Option<PoolIndex> {
        if self.head == NULL_INDEX {
            return None;
        }

        let index = self.head;
        let node = orders.get(index);
        let next = node.next;
        let qty = node.qty;

        if next == NULL_INDEX {
            self.head = NULL_INDEX;
            self.tail = NULL_INDEX;
        } else {
            self.head = next;
            orders.get_mut(next).prev = NULL_INDEX;
        }

        self.count -= 1;
        self.total_qty -= qty as u64;

        let node = orders.get_mut(index);
        node.prev = NULL_INDEX;
        node.next = NULL_INDEX;

        Some(index)
    }

    /// Unlink `index` from anywhere in the FIFO (cancel path).
    ///
    /// Returns `true` if the level is now empty. The node is not released
    /// back to its pool; the caller does that.
    #[inline]
    pub fn unlink(&mut self, orders: &mut Pool<OrderNode>, index: PoolIndex) -> bool {
        let node = orders.get(index);
        let prev = node.prev;
        let next = node.next;
        let qty = node.qty;

        if prev == NULL_INDEX && next == NULL_INDEX {
            // Only order at this level.
            debug_assert!(self.head == index && self.tail == index);
            self.head = NULL_INDEX;
            self.tail = NULL_INDEX;
        } else if prev == NULL_INDEX {
            // Head of the FIFO.
            debug_assert!(self.head == index);
            self.head = next;
            orders.get_mut(next).prev = NULL_INDEX;
        } else if next == NULL_INDEX {
            // Tail of the FIFO.
            debug_assert!(self.tail == index);
            self.tail = prev;
            orders.get_mut(prev).next = NULL_INDEX;
        } else {
            orders.get_mut(prev).next = next;
            orders.get_mut(next).prev = prev;
        }

        self.count -= 1;
        self.total_qty -= qty as u64;

        let node = orders.get_mut(index);
        node.prev = NULL_INDEX;
        node.next = NULL_INDEX;

        self.count == 0
    }

    /// Account for a partial fill applied directly to a node's `qty`.
    #[inline]
    pub fn subtract_qty(&mut self, qty: Qty) {
        debug_assert!(self.total_qty >= qty as u64);
        self.total_qty -= qty as u64;
    }
}
