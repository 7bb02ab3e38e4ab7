//! Constraint-Based Validator (C5): an ordered list of pluggable pre-trade
//! checks per role, plus a per-team rate-limit store.
//!
//! Grounded on `examples/original_source/.../validation/order_validator.py`
//! (`ConstraintType` + `ConstraintConfig` + one `check` dispatch per
//! constraint) and the teacher's `auth::rate_limit::RateLimiter` for the
//! counter-store shape, adapted to the spec's strict per-wall-second
//! semantics (not a sliding window).

use crate::error::ValidationError;
use crate::model::{Order, OrderType, Side};
use crate::phase::PhaseType;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// `(order, trader_id, trader_role, current_positions, orders_in_current_second, tick_phase)`.
pub struct ValidationContext<'a> {
    pub order: &'a Order,
    pub trader_id: &'a str,
    pub trader_role: &'a str,
    pub current_positions: &'a HashMap<String, i64>,
    pub orders_in_current_second: u32,
    pub phase: PhaseType,
}

/// One constraint type, tagged with its parameters. New variants extend the
/// registry without touching the dispatch site in other constraints.
#[derive(Debug, Clone)]
pub enum ConstraintType {
    PositionLimit { max_position: i64, symmetric: bool },
    PortfolioLimit { max_total_position: i64 },
    OrderSize { min_size: u64, max_size: u64 },
    OrderRate { max_orders_per_second: u32 },
    OrderTypeAllowed { allowed: Vec<OrderType> },
    TradingWindow { allowed_phases: Vec<PhaseType> },
    PriceRange { min: Decimal, max: Decimal },
    /// Supplemental: restricts a role to a configured instrument subset.
    InstrumentAllowed { allowed: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct ConstraintConfig {
    pub constraint: ConstraintType,
    pub error_code: String,
    pub error_message: String,
}

/// Evaluate one constraint against a context; `Ok(())` passes, `Err(detail)`
/// carries a human-readable reason (the caller attaches `error_code`).
fn check(constraint: &ConstraintType, ctx: &ValidationContext) -> Result<(), String> {
    match constraint {
        ConstraintType::PositionLimit { max_position, symmetric } => {
            let current = ctx.current_positions.get(&ctx.order.instrument_id).copied().unwrap_or(0);
            let delta = ctx.order.quantity as i64 * ctx.order.side.signum();
            let new_position = current + delta;

            let ok = if *symmetric {
                new_position >= -max_position && new_position <= *max_position
            } else {
                new_position.abs() <= *max_position
            };
            if ok {
                Ok(())
            } else {
                Err(format!("position {new_position} would violate limit {max_position}"))
            }
        }
        ConstraintType::PortfolioLimit { max_total_position } => {
            let current_total: i64 = ctx.current_positions.values().map(|p| p.abs()).sum();
            let current_instrument = ctx.current_positions.get(&ctx.order.instrument_id).copied().unwrap_or(0);
            let delta = ctx.order.quantity as i64 * ctx.order.side.signum();
            let new_instrument = (current_instrument + delta).abs();
            let new_total = current_total - current_instrument.abs() + new_instrument;

            if new_total <= *max_total_position {
                Ok(())
            } else {
                Err(format!("total position {new_total} would exceed {max_total_position}"))
            }
        }
        ConstraintType::OrderSize { min_size, max_size } => {
            if ctx.order.quantity >= *min_size && ctx.order.quantity <= *max_size {
                Ok(())
            } else {
                Err(format!("order size {} not in [{min_size}, {max_size}]", ctx.order.quantity))
            }
        }
        ConstraintType::OrderRate { max_orders_per_second } => {
            if ctx.orders_in_current_second < *max_orders_per_second {
                Ok(())
            } else {
                Err(format!("already submitted {} orders this second", ctx.orders_in_current_second))
            }
        }
        ConstraintType::OrderTypeAllowed { allowed } => {
            if allowed.contains(&ctx.order.order_type) {
                Ok(())
            } else {
                Err(format!("order type not allowed for role {}", ctx.trader_role))
            }
        }
        ConstraintType::TradingWindow { allowed_phases } => {
            if allowed_phases.contains(&ctx.phase) {
                Ok(())
            } else {
                Err("trading window is closed".to_string())
            }
        }
        ConstraintType::PriceRange { min, max } => match ctx.order.price {
            Some(price) => {
                let decimal = price.to_decimal();
                if decimal >= *min && decimal <= *max {
                    Ok(())
                } else {
                    Err(format!("price {decimal} not in [{min}, {max}]"))
                }
            }
            None => Ok(()),
        },
        ConstraintType::InstrumentAllowed { allowed } => {
            if allowed.iter().any(|symbol| symbol == &ctx.order.instrument_id) {
                Ok(())
            } else {
                Err(format!("instrument {} not allowed for role {}", ctx.order.instrument_id, ctx.trader_role))
            }
        }
    }
}

/// Role -> ordered constraint list, plus the universal constraints appended
/// implicitly to every role (per spec §4.5 — trading window is one).
#[derive(Debug, Clone, Default)]
pub struct ValidatorConfig {
    pub role_constraints: HashMap<String, Vec<ConstraintConfig>>,
    pub universal_constraints: Vec<ConstraintConfig>,
}

/// Per-team rate-limit counters, strictly per-wall-second (not sliding).
/// A single mutex guards the whole map, matching spec §4.5 exactly.
struct RateLimitStore {
    windows: Mutex<HashMap<String, (u32, i64)>>,
}

impl RateLimitStore {
    fn new() -> Self {
        Self { windows: Mutex::new(HashMap::new()) }
    }

    /// Read-only: does not mutate on read.
    fn count(&self, team_id: &str, now_sec: i64) -> u32 {
        let windows = self.windows.lock();
        match windows.get(team_id) {
            Some((count, window_start)) if *window_start == now_sec => *count,
            _ => 0,
        }
    }

    fn record(&self, team_id: &str, now_sec: i64) {
        let mut windows = self.windows.lock();
        windows
            .entry(team_id.to_string())
            .and_modify(|(count, window_start)| {
                if *window_start == now_sec {
                    *count += 1;
                } else {
                    *count = 1;
                    *window_start = now_sec;
                }
            })
            .or_insert((1, now_sec));
    }
}

pub struct Validator {
    config: ValidatorConfig,
    rate_limit: RateLimitStore,
}

impl Validator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config, rate_limit: RateLimitStore::new() }
    }

    pub fn rate_limit_count(&self, team_id: &str, now_sec: i64) -> u32 {
        self.rate_limit.count(team_id, now_sec)
    }

    pub fn record_submission(&self, team_id: &str, now_sec: i64) {
        self.rate_limit.record(team_id, now_sec);
    }

    /// Run the role's constraints in config order, then the universal ones.
    /// Returns the first violation.
    pub fn validate_order(&self, ctx: &ValidationContext) -> Result<(), ValidationError> {
        let empty: Vec<ConstraintConfig> = Vec::new();
        let role_list = self.config.role_constraints.get(ctx.trader_role).unwrap_or(&empty);

        for cfg in role_list.iter().chain(self.config.universal_constraints.iter()) {
            if let Err(detail) = check(&cfg.constraint, ctx) {
                tracing::debug!(code = %cfg.error_code, %detail, team_id = %ctx.trader_id, "constraint rejected order");
                return Err(ValidationError::ConstraintViolated {
                    code: cfg.error_code.clone(),
                    message: cfg.error_message.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OrderType, Price};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn order(side: Side, qty: u64) -> Order {
        Order::new(
            Uuid::new_v4(),
            "SPX_4500_CALL",
            side,
            OrderType::Limit,
            qty,
            Some(Price::from_decimal(dec!(100.0)).unwrap()),
            "TEAM_MM",
            None,
            0,
        )
        .unwrap()
    }

    #[test]
    fn position_limit_rejection_scenario() {
        // spec.md §8 scenario 3: TEAM_MM has +45, symmetric limit ±50, submit buy 10.
        let mut positions = HashMap::new();
        positions.insert("SPX_4500_CALL".to_string(), 45);
        let o = order(Side::Buy, 10);
        let ctx = ValidationContext {
            order: &o,
            trader_id: "TEAM_MM",
            trader_role: "market_maker",
            current_positions: &positions,
            orders_in_current_second: 0,
            phase: PhaseType::Continuous,
        };

        let mut config = ValidatorConfig::default();
        config.role_constraints.insert(
            "market_maker".to_string(),
            vec![ConstraintConfig {
                constraint: ConstraintType::PositionLimit { max_position: 50, symmetric: true },
                error_code: "MM_POS_LIMIT".to_string(),
                error_message: "position limit exceeded".to_string(),
            }],
        );
        let validator = Validator::new(config);

        let err = validator.validate_order(&ctx).unwrap_err();
        match err {
            ValidationError::ConstraintViolated { code, .. } => assert_eq!(code, "MM_POS_LIMIT"),
            _ => panic!("expected constraint violation"),
        }
    }

    #[test]
    fn rate_limit_rejects_the_n_plus_1th_order_in_the_same_second() {
        let o = order(Side::Buy, 1);
        let mut config = ValidatorConfig::default();
        config.universal_constraints.push(ConstraintConfig {
            constraint: ConstraintType::OrderRate { max_orders_per_second: 3 },
            error_code: "ORDER_RATE".to_string(),
            error_message: "rate exceeded".to_string(),
        });
        let validator = Validator::new(config);

        for _ in 0..3 {
            validator.record_submission("TEAM_A", 1000);
        }
        let count = validator.rate_limit_count("TEAM_A", 1000);
        let positions = HashMap::new();
        let ctx = ValidationContext {
            order: &o,
            trader_id: "TEAM_A",
            trader_role: "retail",
            current_positions: &positions,
            orders_in_current_second: count,
            phase: PhaseType::Continuous,
        };

        let err = validator.validate_order(&ctx).unwrap_err();
        match err {
            ValidationError::ConstraintViolated { code, .. } => assert_eq!(code, "ORDER_RATE"),
            _ => panic!("expected rate limit violation"),
        }
    }

    #[test]
    fn rate_limit_count_resets_outside_the_window() {
        let validator = Validator::new(ValidatorConfig::default());
        validator.record_submission("TEAM_A", 1000);
        assert_eq!(validator.rate_limit_count("TEAM_A", 1000), 1);
        assert_eq!(validator.rate_limit_count("TEAM_A", 1001), 0);
    }

    #[test]
    fn universal_constraint_applies_even_without_role_entry() {
        let o = order(Side::Buy, 1);
        let mut config = ValidatorConfig::default();
        config.universal_constraints.push(ConstraintConfig {
            constraint: ConstraintType::TradingWindow { allowed_phases: vec![PhaseType::Continuous] },
            error_code: "TRADING_WINDOW_CLOSED".to_string(),
            error_message: "market is closed".to_string(),
        });
        let validator = Validator::new(config);
        let positions = HashMap::new();
        let ctx = ValidationContext {
            order: &o,
            trader_id: "TEAM_A",
            trader_role: "unconfigured_role",
            current_positions: &positions,
            orders_in_current_second: 0,
            phase: PhaseType::Closed,
        };

        let err = validator.validate_order(&ctx).unwrap_err();
        match err {
            ValidationError::ConstraintViolated { code, .. } => assert_eq!(code, "TRADING_WINDOW_CLOSED"),
            _ => panic!("expected trading window violation"),
        }
    }
}
