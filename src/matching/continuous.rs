//! Continuous matching: submit, match immediately, report the outcome.

use crate::error::MatchingError;
use crate::model::{Order, OrderStatus, OrderResult};
use crate::orderbook::OrderBook;

/// Stateless — continuous matching has no pending bucket, it just drives
/// `OrderBook::add_order` and translates fills into an `OrderResult`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContinuousEngine;

impl ContinuousEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn submit(&self, order: Order, book: &OrderBook) -> Result<OrderResult, MatchingError> {
        let order_id = order.order_id;
        let quantity = order.quantity;
        let trades = book.add_order(order)?;

        let filled: u64 = trades.iter().map(|t| t.quantity).sum();
        let remaining = quantity - filled;
        let status = if remaining == 0 {
            OrderStatus::Filled
        } else if filled > 0 {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::New
        };

        Ok(OrderResult::new(order_id, status, trades, remaining))
    }
}
