//! Matching Engine (C2): two variants selected by the current market phase,
//! both submitting into a per-instrument [`crate::orderbook::OrderBook`].
//!
//! Grounded on the teacher's `services::matching::orderbook::Orderbook`
//! (continuous side) and on `examples/original_source/.../batch_auction_strategies.py`
//! (batch side — the Maximum Volume algorithm).

mod batch;
mod continuous;

pub use batch::{AuctionClearingResult, BatchEngine};
pub use continuous::ContinuousEngine;
