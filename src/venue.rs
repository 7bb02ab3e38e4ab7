//! Exchange Venue (C4): composes instruments, order books, and both
//! matching engines; routes submissions by the current phase's
//! `execution_style` and enforces instrument/ownership rules.
//!
//! Grounded on the teacher's `services::matching::orchestrator` for the
//! "one service composing books + engines" shape, stripped of its
//! persistence layer per the no-persistence Non-goal.

use crate::error::{MatchingError, VenueError};
use crate::matching::{AuctionClearingResult, BatchEngine, ContinuousEngine};
use crate::model::{Instrument, Order, OrderResult};
use crate::orderbook::OrderBook;
use crate::phase::{ExecutionStyle, PhaseState};
use dashmap::DashMap;
use uuid::Uuid;

pub struct ExchangeVenue {
    instruments: DashMap<String, Instrument>,
    books: DashMap<String, OrderBook>,
    continuous: ContinuousEngine,
    batch: BatchEngine,
    /// order_id -> (instrument_id, trader_id), recorded at submission time so
    /// `cancel_order` can check ownership without the caller supplying the
    /// instrument. A weak, append-only lookup — see the order-book's own
    /// index for the same pattern.
    order_owner: DashMap<Uuid, (String, String)>,
}

impl Default for ExchangeVenue {
    fn default() -> Self {
        Self::new()
    }
}

impl ExchangeVenue {
    pub fn new() -> Self {
        Self {
            instruments: DashMap::new(),
            books: DashMap::new(),
            continuous: ContinuousEngine::new(),
            batch: BatchEngine::new(),
            order_owner: DashMap::new(),
        }
    }

    pub fn list_instrument(&self, instrument_id: &str) -> Option<Instrument> {
        self.instruments.get(instrument_id).map(|entry| entry.clone())
    }

    pub fn add_instrument(&self, instrument: Instrument) -> Result<(), VenueError> {
        if self.instruments.contains_key(&instrument.symbol) {
            return Err(VenueError::DuplicateInstrument(instrument.symbol));
        }
        self.books.insert(instrument.symbol.clone(), OrderBook::new(&instrument.symbol));
        self.instruments.insert(instrument.symbol.clone(), instrument);
        Ok(())
    }

    pub fn depth_snapshot(&self, instrument_id: &str, levels: usize) -> Option<crate::orderbook::DepthSnapshot> {
        self.books.get(instrument_id).map(|book| book.depth_snapshot(levels))
    }

    pub fn submit_order(&self, order: Order, phase: &PhaseState) -> Result<OrderResult, VenueError> {
        if !phase.order_submission_allowed {
            return Err(VenueError::SubmissionNotAllowed);
        }
        if !self.instruments.contains_key(&order.instrument_id) {
            return Err(VenueError::Matching(MatchingError::UnknownInstrument(order.instrument_id)));
        }

        let order_id = order.order_id;
        let instrument_id = order.instrument_id.clone();
        let trader_id = order.trader_id.clone();

        let result = match phase.execution_style {
            ExecutionStyle::Continuous => {
                let book = self.books.get(&instrument_id).expect("instrument checked above");
                self.continuous.submit(order, &book)?
            }
            ExecutionStyle::Batch => self.batch.submit(order)?,
            ExecutionStyle::None => {
                return Err(VenueError::SubmissionNotAllowed);
            }
        };

        self.order_owner.insert(order_id, (instrument_id, trader_id));
        Ok(result)
    }

    pub fn cancel_order(&self, order_id: Uuid, trader_id: &str, phase: &PhaseState) -> Result<Order, VenueError> {
        if !phase.order_cancellation_allowed {
            return Err(VenueError::CancellationNotAllowed);
        }

        let (instrument_id, owner) = self
            .order_owner
            .get(&order_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| VenueError::OrderNotFound(order_id.to_string()))?;

        if owner != trader_id {
            return Err(VenueError::NotOwner { order_id: order_id.to_string() });
        }

        let book = self
            .books
            .get(&instrument_id)
            .ok_or_else(|| VenueError::OrderNotFound(order_id.to_string()))?;

        match book.cancel_order(order_id) {
            Some(order) => {
                self.order_owner.remove(&order_id);
                Ok(order)
            }
            None => Err(VenueError::OrderNotFound(order_id.to_string())),
        }
    }

    /// Run the opening auction across every instrument with a nonempty
    /// pending bucket. Invoked by the phase-transition handler.
    pub fn execute_batch(&self) -> Vec<AuctionClearingResult> {
        self.batch.execute_batch(&self.books)
    }

    /// Cancel every resting order across every book. Invoked by the
    /// phase-transition handler on CONTINUOUS -> CLOSED.
    pub fn cancel_all_resting(&self) -> Vec<Uuid> {
        let mut cancelled = Vec::new();
        for book in self.books.iter() {
            for order_id in book.all_resting_order_ids() {
                if book.cancel_order(order_id).is_some() {
                    self.order_owner.remove(&order_id);
                    cancelled.push(order_id);
                }
            }
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OrderType, Price, Side};
    use crate::phase::PhaseType;
    use rust_decimal_macros::dec;

    fn continuous_phase() -> PhaseState {
        PhaseState {
            phase_type: PhaseType::Continuous,
            order_submission_allowed: true,
            order_cancellation_allowed: true,
            matching_enabled: true,
            execution_style: ExecutionStyle::Continuous,
        }
    }

    fn sample_order(side: Side, trader: &str) -> Order {
        Order::new(
            Uuid::new_v4(),
            "SPX_4500_CALL",
            side,
            OrderType::Limit,
            10,
            Some(Price::from_decimal(dec!(100.0)).unwrap()),
            trader,
            None,
            0,
        )
        .unwrap()
    }

    #[test]
    fn duplicate_instrument_listing_is_rejected() {
        let venue = ExchangeVenue::new();
        venue.add_instrument(Instrument::new("SPX_4500_CALL")).unwrap();
        let err = venue.add_instrument(Instrument::new("SPX_4500_CALL")).unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_INSTRUMENT");
    }

    #[test]
    fn submit_order_rejects_unknown_instrument() {
        let venue = ExchangeVenue::new();
        let err = venue.submit_order(sample_order(Side::Buy, "TEAM_A"), &continuous_phase()).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_INSTRUMENT");
    }

    #[test]
    fn unauthorized_cancel_does_not_disclose_ownership() {
        let venue = ExchangeVenue::new();
        venue.add_instrument(Instrument::new("SPX_4500_CALL")).unwrap();
        let order = sample_order(Side::Sell, "TEAM_A");
        let order_id = order.order_id;
        venue.submit_order(order, &continuous_phase()).unwrap();

        let err = venue.cancel_order(order_id, "TEAM_B", &continuous_phase()).unwrap_err();
        assert_eq!(err.code(), "NOT_OWNER");

        // The order is still resting and cancellable by its rightful owner.
        assert!(venue.cancel_order(order_id, "TEAM_A", &continuous_phase()).is_ok());
    }

    #[test]
    fn cancel_of_nonexistent_order_is_not_found() {
        let venue = ExchangeVenue::new();
        let err = venue.cancel_order(Uuid::new_v4(), "TEAM_A", &continuous_phase()).unwrap_err();
        assert_eq!(err.code(), "ORDER_NOT_FOUND");
    }

    #[test]
    fn submission_blocked_when_phase_disallows_it() {
        let venue = ExchangeVenue::new();
        venue.add_instrument(Instrument::new("SPX_4500_CALL")).unwrap();
        let mut closed = continuous_phase();
        closed.order_submission_allowed = false;
        let err = venue.submit_order(sample_order(Side::Buy, "TEAM_A"), &closed).unwrap_err();
        assert_eq!(err.code(), "SUBMISSION_NOT_ALLOWED");
    }
}
