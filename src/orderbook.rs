//! Per-instrument order book (C1): price-time priority ladders with a
//! `DashMap` order-id index, grounded on the teacher's
//! `services::matching::orderbook::Orderbook`.
//!
//! The order-id index is a *weak* lookup per the REDESIGN FLAGS in
//! SPEC_FULL.md §10 — resting orders are owned exclusively by their price
//! level's `VecDeque`; the index only remembers where to find them.

use crate::error::MatchingError;
use crate::model::{Order, OrderType, Price, Side, Trade};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

const RECENT_TRADES_CAPACITY: usize = 100;

/// One price level's resting queue, in strict FIFO (time priority) order.
#[derive(Default)]
struct Level {
    orders: VecDeque<Order>,
    total_quantity: u64,
}

impl Level {
    fn push(&mut self, order: Order) {
        self.total_quantity += order.remaining_quantity();
        self.orders.push_back(order);
    }

    fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

/// A price ladder keyed by whole cents; callers choose traversal order
/// (`.iter()` vs `.iter().rev()`) appropriate to bids vs asks.
type Ladder = BTreeMap<i64, Level>;

/// Per-instrument order book.
pub struct OrderBook {
    instrument_id: String,
    bids: RwLock<Ladder>,
    asks: RwLock<Ladder>,
    /// order_id -> (side, price) weak lookup for O(log n) cancel/lookup.
    index: DashMap<Uuid, (Side, Price)>,
    recent_trades: RwLock<VecDeque<Trade>>,
}

impl OrderBook {
    pub fn new(instrument_id: impl Into<String>) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            bids: RwLock::new(BTreeMap::new()),
            asks: RwLock::new(BTreeMap::new()),
            index: DashMap::new(),
            recent_trades: RwLock::new(VecDeque::with_capacity(RECENT_TRADES_CAPACITY)),
        }
    }

    pub fn instrument_id(&self) -> &str {
        &self.instrument_id
    }

    fn ladder(&self, side: Side) -> &RwLock<Ladder> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    pub fn best_bid(&self) -> Option<(Price, u64)> {
        let bids = self.bids.read();
        bids.iter()
            .next_back()
            .map(|(p, level)| (Price::from_cents(*p), level.total_quantity))
    }

    pub fn best_ask(&self) -> Option<(Price, u64)> {
        let asks = self.asks.read();
        asks.iter()
            .next()
            .map(|(p, level)| (Price::from_cents(*p), level.total_quantity))
    }

    /// Submit an order: match it against the opposite side, then rest any
    /// unfilled limit remainder. Market orders never rest.
    pub fn add_order(&self, mut order: Order) -> Result<Vec<Trade>, MatchingError> {
        if order.instrument_id != self.instrument_id {
            return Err(MatchingError::InstrumentMismatch {
                order: order.instrument_id.clone(),
                book: self.instrument_id.clone(),
            });
        }
        if self.index.contains_key(&order.order_id) {
            return Err(MatchingError::DuplicateOrderId(order.order_id.to_string()));
        }

        let trades = self.match_against_book(&mut order);

        if order.order_type == OrderType::Limit && order.remaining_quantity() > 0 {
            self.rest(order);
        }

        Ok(trades)
    }

    /// Rest an order directly without matching it first. Used by the batch
    /// engine to seat orders left over after `execute_batch` has already
    /// decided the clearing allocation.
    pub(crate) fn rest_unmatched(&self, order: Order) {
        if order.remaining_quantity() > 0 {
            self.rest(order);
        }
    }

    /// Record a trade produced outside `match_against_book`, e.g. by the
    /// batch engine's uniform-price clearing. Kept so `get_recent_trades`
    /// reflects batch fills the same way it reflects continuous ones.
    pub(crate) fn record_trade(&self, trade: Trade) {
        self.push_recent_trade(trade);
    }

    /// Walk the opposite side from the best price, filling the incoming
    /// order as far as price and available liquidity allow. Leaves the book
    /// unchanged if no acceptable level exists.
    fn match_against_book(&self, incoming: &mut Order) -> Vec<Trade> {
        let mut trades = Vec::new();
        let opposite = incoming.side.opposite();
        let mut ladder = self.ladder(opposite).write();

        let price_levels: Vec<i64> = match opposite {
            // Asks ascend (best = lowest first); bids descend (best = highest first).
            Side::Sell => ladder.keys().copied().collect(),
            Side::Buy => ladder.keys().rev().copied().collect(),
        };

        for level_price in price_levels {
            if incoming.remaining_quantity() == 0 {
                break;
            }

            if let Some(limit_price) = incoming.price {
                let acceptable = match incoming.side {
                    Side::Buy => level_price <= limit_price.cents(),
                    Side::Sell => level_price >= limit_price.cents(),
                };
                if !acceptable {
                    break;
                }
            }

            let Some(level) = ladder.get_mut(&level_price) else {
                continue;
            };

            while incoming.remaining_quantity() > 0 {
                let Some(resting) = level.orders.front_mut() else {
                    break;
                };

                let fill_qty = incoming.remaining_quantity().min(resting.remaining_quantity());
                let trade_price = resting.price.expect("resting orders always carry a price");

                let (buyer_id, seller_id, buyer_order_id, seller_order_id) = match incoming.side {
                    Side::Buy => (
                        incoming.trader_id.clone(),
                        resting.trader_id.clone(),
                        incoming.order_id,
                        resting.order_id,
                    ),
                    Side::Sell => (
                        resting.trader_id.clone(),
                        incoming.trader_id.clone(),
                        resting.order_id,
                        incoming.order_id,
                    ),
                };

                let trade = Trade {
                    trade_id: Uuid::new_v4(),
                    instrument_id: self.instrument_id.clone(),
                    buyer_id,
                    seller_id,
                    buyer_order_id,
                    seller_order_id,
                    price: trade_price,
                    quantity: fill_qty,
                    aggressor_side: incoming.side,
                    timestamp: chrono::Utc::now().timestamp_millis(),
                };

                incoming.fill(fill_qty);
                resting.fill(fill_qty);
                level.total_quantity -= fill_qty;

                if resting.is_filled() {
                    let filled = level.orders.pop_front().expect("front just matched");
                    self.index.remove(&filled.order_id);
                }

                self.push_recent_trade(trade.clone());
                trades.push(trade);
            }

            if level.is_empty() {
                ladder.remove(&level_price);
            }
        }

        trades
    }

    fn rest(&self, order: Order) {
        let price = order.price.expect("limit order checked before rest");
        let side = order.side;
        let order_id = order.order_id;
        let mut ladder = self.ladder(side).write();
        ladder.entry(price.cents()).or_default().push(order);
        self.index.insert(order_id, (side, price));
    }

    pub fn cancel_order(&self, order_id: Uuid) -> Option<Order> {
        let (side, price) = self.index.remove(&order_id)?.1;
        let mut ladder = self.ladder(side).write();
        let level = ladder.get_mut(&price.cents())?;
        let pos = level.orders.iter().position(|o| o.order_id == order_id)?;
        let removed = level.orders.remove(pos).expect("position just found");
        level.total_quantity -= removed.remaining_quantity();
        if level.is_empty() {
            ladder.remove(&price.cents());
        }
        Some(removed)
    }

    pub fn has_order(&self, order_id: &Uuid) -> bool {
        self.index.contains_key(order_id)
    }

    fn push_recent_trade(&self, trade: Trade) {
        let mut recent = self.recent_trades.write();
        if recent.len() == RECENT_TRADES_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(trade);
    }

    pub fn get_recent_trades(&self, limit: usize) -> Vec<Trade> {
        let recent = self.recent_trades.read();
        recent.iter().rev().take(limit).cloned().collect()
    }

    /// Ordered depth snapshot capped at `levels` price levels per side.
    pub fn depth_snapshot(&self, levels: usize) -> DepthSnapshot {
        let bids = self.bids.read();
        let asks = self.asks.read();
        DepthSnapshot {
            bids: bids
                .iter()
                .rev()
                .take(levels)
                .map(|(p, l)| (Price::from_cents(*p), l.total_quantity))
                .collect(),
            asks: asks
                .iter()
                .take(levels)
                .map(|(p, l)| (Price::from_cents(*p), l.total_quantity))
                .collect(),
        }
    }

    /// All resting orders, used by the phase-transition handler to cancel
    /// everything at market close.
    pub fn all_resting_order_ids(&self) -> Vec<Uuid> {
        self.index.iter().map(|entry| *entry.key()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DepthSnapshot {
    pub bids: Vec<(Price, u64)>,
    pub asks: Vec<(Price, u64)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn limit(side: Side, qty: u64, price: rust_decimal::Decimal, trader: &str) -> Order {
        Order::new(
            Uuid::new_v4(),
            "SPX_4500_CALL",
            side,
            OrderType::Limit,
            qty,
            Some(Price::from_decimal(price).unwrap()),
            trader,
            None,
            0,
        )
        .unwrap()
    }

    #[test]
    fn resting_limit_order_appears_in_best_bid() {
        let book = OrderBook::new("SPX_4500_CALL");
        book.add_order(limit(Side::Buy, 10, dec!(128.50), "TEAM_A")).unwrap();
        assert_eq!(book.best_bid().unwrap().0.to_decimal(), dec!(128.50));
        assert_eq!(book.best_bid().unwrap().1, 10);
    }

    #[test]
    fn matched_limit_orders_fill_at_resting_price() {
        let book = OrderBook::new("SPX_4500_CALL");
        book.add_order(limit(Side::Sell, 20, dec!(128.00), "TEAM_A")).unwrap();
        let trades = book.add_order(limit(Side::Buy, 15, dec!(128.50), "TEAM_B")).unwrap();

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price.to_decimal(), dec!(128.00));
        assert_eq!(trades[0].quantity, 15);
        assert_eq!(trades[0].aggressor_side, Side::Buy);

        let (ask_price, ask_qty) = book.best_ask().unwrap();
        assert_eq!(ask_price.to_decimal(), dec!(128.00));
        assert_eq!(ask_qty, 5);
    }

    #[test]
    fn zero_fill_walk_leaves_book_unchanged_when_no_acceptable_level() {
        let book = OrderBook::new("SPX_4500_CALL");
        book.add_order(limit(Side::Sell, 10, dec!(129.00), "TEAM_A")).unwrap();
        let trades = book.add_order(limit(Side::Buy, 10, dec!(128.00), "TEAM_B")).unwrap();
        assert!(trades.is_empty());
        assert_eq!(book.best_ask().unwrap().1, 10);
        assert_eq!(book.best_bid().unwrap().1, 10);
    }

    #[test]
    fn market_order_against_empty_side_produces_no_trades_and_does_not_rest() {
        let book = OrderBook::new("SPX_4500_CALL");
        let market = Order::new(
            Uuid::new_v4(),
            "SPX_4500_CALL",
            Side::Buy,
            OrderType::Market,
            10,
            None,
            "TEAM_A",
            None,
            0,
        )
        .unwrap();
        let order_id = market.order_id;
        let trades = book.add_order(market).unwrap();
        assert!(trades.is_empty());
        assert!(!book.has_order(&order_id));
        assert!(book.best_bid().is_none());
    }

    #[test]
    fn self_trade_is_permitted() {
        let book = OrderBook::new("SPX_4500_CALL");
        book.add_order(limit(Side::Sell, 10, dec!(100.0), "TEAM_A")).unwrap();
        let trades = book.add_order(limit(Side::Buy, 10, dec!(100.0), "TEAM_A")).unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].buyer_id, "TEAM_A");
        assert_eq!(trades[0].seller_id, "TEAM_A");
    }

    #[test]
    fn cancel_removes_order_and_prunes_empty_level() {
        let book = OrderBook::new("SPX_4500_CALL");
        let order = limit(Side::Sell, 12, dec!(129.00), "TEAM_A");
        let order_id = order.order_id;
        book.add_order(order).unwrap();

        let cancelled = book.cancel_order(order_id).unwrap();
        assert_eq!(cancelled.order_id, order_id);
        assert!(!book.has_order(&order_id));
        assert!(book.best_ask().is_none());
    }

    #[test]
    fn cancel_of_nonexistent_order_returns_none() {
        let book = OrderBook::new("SPX_4500_CALL");
        assert!(book.cancel_order(Uuid::new_v4()).is_none());
    }

    #[test]
    fn depth_snapshot_caps_levels_and_orders_by_priority() {
        let book = OrderBook::new("SPX_4500_CALL");
        book.add_order(limit(Side::Buy, 1, dec!(100.0), "A")).unwrap();
        book.add_order(limit(Side::Buy, 1, dec!(101.0), "B")).unwrap();
        book.add_order(limit(Side::Buy, 1, dec!(102.0), "C")).unwrap();

        let snapshot = book.depth_snapshot(2);
        assert_eq!(snapshot.bids.len(), 2);
        assert_eq!(snapshot.bids[0].0.to_decimal(), dec!(102.0));
        assert_eq!(snapshot.bids[1].0.to_decimal(), dec!(101.0));
    }
}
