//! Per-product order book (§4.2).
//!
//! Two price-ordered collections (bids descending, asks ascending); at
//! each price level orders form a FIFO by `created_at`/`sequence`. Every
//! resting order is also addressable by id for cancellation. Grounded on
//! the pack's `BTreeMap<price, _>` book shape
//! (`brbtavares-tucano/examples/binance-data-stream/src/data/orderbook.rs`),
//! generalized here from a read-only market-data mirror into a mutable
//! matching book with an id index and FIFO queues per level.

use crate::ids::{OrderId, ProductId};
use crate::matching::order::{Order, Side};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
    pub order_count: usize,
}

/// SPEC_FULL.md §5 supplemented read model: best bid/ask plus their
/// derived mid and spread, over the same state `Snapshot` already exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BestBidAsk {
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub mid: Option<Decimal>,
    pub spread: Option<Decimal>,
}

pub struct OrderBook {
    pub product_id: ProductId,
    /// Ascending by price; best bid is the highest key.
    bids: BTreeMap<Decimal, VecDeque<OrderId>>,
    /// Ascending by price; best ask is the lowest key.
    asks: BTreeMap<Decimal, VecDeque<OrderId>>,
    orders: HashMap<OrderId, Order>,
    last_trade_price: Option<Decimal>,
    sequence: u64,
}

impl OrderBook {
    pub fn new(product_id: ProductId) -> Self {
        Self {
            product_id,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            orders: HashMap::new(),
            last_trade_price: None,
            sequence: 0,
        }
    }

    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn levels(&self, side: Side) -> &BTreeMap<Decimal, VecDeque<OrderId>> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn levels_mut(&mut self, side: Side) -> &mut BTreeMap<Decimal, VecDeque<OrderId>> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    pub fn best_price(&self, side: Side) -> Option<Decimal> {
        match side {
            Side::Buy => self.bids.keys().next_back().copied(),
            Side::Sell => self.asks.keys().next().copied(),
        }
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.best_price(Side::Buy)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.best_price(Side::Sell)
    }

    pub fn last_trade_price(&self) -> Option<Decimal> {
        self.last_trade_price
    }

    pub fn best_bid_ask(&self) -> BestBidAsk {
        let best_bid = self.best_bid();
        let best_ask = self.best_ask();
        let (mid, spread) = match (best_bid, best_ask) {
            (Some(bid), Some(ask)) => (Some((bid + ask) / Decimal::TWO), Some(ask - bid)),
            _ => (None, None),
        };
        BestBidAsk { best_bid, best_ask, mid, spread }
    }

    pub fn set_last_trade_price(&mut self, price: Decimal) {
        self.last_trade_price = Some(price);
    }

    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub fn get_mut(&mut self, id: OrderId) -> Option<&mut Order> {
        self.orders.get_mut(&id)
    }

    /// The opposite side's top-of-book order id, respecting price-time
    /// priority (best price first, then FIFO within that level).
    pub fn top(&self, side: Side) -> Option<OrderId> {
        let queue = match side {
            Side::Buy => self.bids.values().next_back(),
            Side::Sell => self.asks.values().next(),
        }?;
        queue.front().copied()
    }

    /// Rests a limit order at its price level, in FIFO order (§4.2 step 4).
    pub fn rest(&mut self, order: Order) {
        let side = order.side;
        let price = order.price.expect("only limit orders rest");
        let id = order.id;
        self.orders.insert(id, order);
        self.levels_mut(side).entry(price).or_default().push_back(id);
    }

    /// Removes an order from both the book and the id index (fully filled
    /// or cancelled).
    pub fn remove(&mut self, id: OrderId) -> Option<Order> {
        let order = self.orders.remove(&id)?;
        if let Some(price) = order.price {
            let side = order.side;
            if let Some(queue) = self.levels_mut(side).get_mut(&price) {
                queue.retain(|&oid| oid != id);
                if queue.is_empty() {
                    self.levels_mut(side).remove(&price);
                }
            }
        }
        Some(order)
    }

    pub fn snapshot(&self, side: Side, depth: usize) -> Vec<PriceLevel> {
        let iter: Box<dyn Iterator<Item = (&Decimal, &VecDeque<OrderId>)>> = match side {
            Side::Buy => Box::new(self.bids.iter().rev()),
            Side::Sell => Box::new(self.asks.iter()),
        };
        iter.take(depth)
            .map(|(price, queue)| PriceLevel {
                price: *price,
                quantity: queue
                    .iter()
                    .filter_map(|id| self.orders.get(id))
                    .map(|o| o.remaining())
                    .sum(),
                order_count: queue.len(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::AgentId;
    use crate::matching::order::OrderType;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn limit(side: Side, price: Decimal, qty: Decimal) -> Order {
        Order::new(AgentId::new(), ProductId::new(), side, OrderType::Limit, Some(price), qty, Utc::now())
    }

    #[test]
    fn best_bid_is_highest_price() {
        let mut book = OrderBook::new(ProductId::new());
        book.rest(limit(Side::Buy, dec!(99), dec!(1)));
        book.rest(limit(Side::Buy, dec!(101), dec!(1)));
        book.rest(limit(Side::Buy, dec!(100), dec!(1)));
        assert_eq!(book.best_bid(), Some(dec!(101)));
    }

    #[test]
    fn best_ask_is_lowest_price() {
        let mut book = OrderBook::new(ProductId::new());
        book.rest(limit(Side::Sell, dec!(105), dec!(1)));
        book.rest(limit(Side::Sell, dec!(103), dec!(1)));
        assert_eq!(book.best_ask(), Some(dec!(103)));
    }

    #[test]
    fn fifo_within_price_level() {
        let mut book = OrderBook::new(ProductId::new());
        let first = limit(Side::Buy, dec!(100), dec!(1));
        let first_id = first.id;
        book.rest(first);
        book.rest(limit(Side::Buy, dec!(100), dec!(1)));
        assert_eq!(book.top(Side::Buy), Some(first_id));
    }

    #[test]
    fn remove_clears_empty_level() {
        let mut book = OrderBook::new(ProductId::new());
        let order = limit(Side::Sell, dec!(100), dec!(1));
        let id = order.id;
        book.rest(order);
        book.remove(id);
        assert_eq!(book.best_ask(), None);
    }
}
