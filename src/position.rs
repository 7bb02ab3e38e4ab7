//! Position Store (C8): in-memory, per-team signed integer positions behind
//! a single mutex.
//!
//! Grounded on `examples/original_source/.../domain/positions/position_service.py`
//! (`PositionManagementService`, an `RLock`-guarded `Dict[str, Dict[str, int]]`
//! that zero-initialises missing entries on update). `parking_lot::Mutex` is
//! the teacher's lock of choice throughout the matching/validator code.

use parking_lot::Mutex;
use std::collections::HashMap;

/// `team_id -> (instrument_id -> signed quantity)`, one mutex for the whole
/// map — per spec §5 "Position Store is shared... protected by its own mutex".
#[derive(Default)]
pub struct PositionStore {
    positions: Mutex<HashMap<String, HashMap<String, i64>>>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: a team with no entry yet gets an empty position map.
    pub fn initialize(&self, team_id: &str) {
        self.positions.lock().entry(team_id.to_string()).or_default();
    }

    /// Add `delta` to `(team, instrument)`, initialising missing entries to
    /// zero first.
    pub fn update(&self, team_id: &str, instrument_id: &str, delta: i64) {
        let mut positions = self.positions.lock();
        let team = positions.entry(team_id.to_string()).or_default();
        *team.entry(instrument_id.to_string()).or_insert(0) += delta;
    }

    pub fn get(&self, team_id: &str, instrument_id: &str) -> i64 {
        self.positions
            .lock()
            .get(team_id)
            .and_then(|team| team.get(instrument_id))
            .copied()
            .unwrap_or(0)
    }

    /// An independent copy — the caller must not observe further mutations.
    pub fn get_all(&self, team_id: &str) -> HashMap<String, i64> {
        self.positions.lock().get(team_id).cloned().unwrap_or_default()
    }

    pub fn total_absolute(&self, team_id: &str) -> i64 {
        self.positions
            .lock()
            .get(team_id)
            .map(|team| team.values().map(|q| q.abs()).sum())
            .unwrap_or(0)
    }

    /// Apply a trade's conservation law: `+quantity` to the buyer,
    /// `-quantity` to the seller, skipping the counterparty update on a
    /// self-trade (buyer_id == seller_id) so the net effect is zero, applied
    /// exactly once rather than applied-then-undone.
    pub fn apply_trade(&self, instrument_id: &str, buyer_id: &str, seller_id: &str, quantity: u64) {
        let quantity = quantity as i64;
        if buyer_id == seller_id {
            return;
        }
        self.update(buyer_id, instrument_id, quantity);
        self.update(seller_id, instrument_id, -quantity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_initialises_missing_entries_to_zero() {
        let store = PositionStore::new();
        store.update("TEAM_A", "SPX_4500_CALL", 10);
        assert_eq!(store.get("TEAM_A", "SPX_4500_CALL"), 10);
        store.update("TEAM_A", "SPX_4500_CALL", -3);
        assert_eq!(store.get("TEAM_A", "SPX_4500_CALL"), 7);
    }

    #[test]
    fn get_all_is_an_independent_copy() {
        let store = PositionStore::new();
        store.update("TEAM_A", "SPX_4500_CALL", 5);
        let mut snapshot = store.get_all("TEAM_A");
        snapshot.insert("SPX_4500_CALL".to_string(), 999);
        assert_eq!(store.get("TEAM_A", "SPX_4500_CALL"), 5);
    }

    #[test]
    fn total_absolute_sums_magnitudes_across_instruments() {
        let store = PositionStore::new();
        store.update("TEAM_A", "SPX_4500_CALL", 10);
        store.update("TEAM_A", "SPX_4500_PUT", -4);
        assert_eq!(store.total_absolute("TEAM_A"), 14);
    }

    #[test]
    fn trade_conservation_applies_opposite_deltas_to_both_sides() {
        let store = PositionStore::new();
        store.apply_trade("SPX_4500_CALL", "TEAM_A", "TEAM_B", 10);
        assert_eq!(store.get("TEAM_A", "SPX_4500_CALL"), 10);
        assert_eq!(store.get("TEAM_B", "SPX_4500_CALL"), -10);
    }

    #[test]
    fn self_trade_nets_to_zero_and_skips_counterparty_update() {
        let store = PositionStore::new();
        store.apply_trade("SPX_4500_CALL", "TEAM_A", "TEAM_A", 10);
        assert_eq!(store.get("TEAM_A", "SPX_4500_CALL"), 0);
    }

    #[test]
    fn initialize_is_idempotent() {
        let store = PositionStore::new();
        store.initialize("TEAM_A");
        store.update("TEAM_A", "SPX_4500_CALL", 5);
        store.initialize("TEAM_A");
        assert_eq!(store.get("TEAM_A", "SPX_4500_CALL"), 5);
    }
}
