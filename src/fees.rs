//! Fee Calculator (C9): stateless role × (maker|taker) -> rebate/charge.
//!
//! Grounded on `examples/original_source/.../domain/positions/fee_service.py`
//! (`TradingFeeService.calculate_fee`, sign convention: positive = rebate
//! received, negative = fee paid) and `fee_config.py`'s `FeeSchedule`.

use crate::model::Side;
use rust_decimal::Decimal;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidityType {
    Maker,
    Taker,
}

impl LiquidityType {
    /// Per spec §4.9: taker if the aggressor and this order's side match,
    /// maker otherwise (the resting side was matched against).
    pub fn determine(aggressor_side: Side, order_side: Side) -> Self {
        if aggressor_side == order_side {
            LiquidityType::Taker
        } else {
            LiquidityType::Maker
        }
    }
}

/// Per-role rate schedule. `maker_rebate`/`taker_fee` are signed: positive =
/// money received by the trader, negative = money paid.
#[derive(Debug, Clone, Copy)]
pub struct FeeSchedule {
    pub maker_rebate: Decimal,
    pub taker_fee: Decimal,
}

impl FeeSchedule {
    fn rate(&self, liquidity: LiquidityType) -> Decimal {
        match liquidity {
            LiquidityType::Maker => self.maker_rebate,
            LiquidityType::Taker => self.taker_fee,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeeError {
    #[error("no fee schedule configured for role {0}")]
    UnknownRole(String),
}

/// Stateless; every method can be called concurrently without synchronisation.
#[derive(Debug, Clone, Default)]
pub struct FeeCalculator {
    role_fees: HashMap<String, FeeSchedule>,
}

impl FeeCalculator {
    pub fn new(role_fees: HashMap<String, FeeSchedule>) -> Self {
        Self { role_fees }
    }

    /// `quantity * schedule[role].rate(liquidity_type)`. Unknown role fails
    /// explicitly; liquidity type is a closed enum so it cannot be unknown.
    pub fn calculate(&self, quantity: u64, role: &str, liquidity: LiquidityType) -> Result<Decimal, FeeError> {
        let schedule = self.role_fees.get(role).ok_or_else(|| FeeError::UnknownRole(role.to_string()))?;
        Ok(Decimal::from(quantity) * schedule.rate(liquidity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn calculator() -> FeeCalculator {
        let mut role_fees = HashMap::new();
        role_fees.insert(
            "market_maker".to_string(),
            FeeSchedule { maker_rebate: dec!(0.02), taker_fee: dec!(-0.01) },
        );
        role_fees.insert(
            "retail".to_string(),
            FeeSchedule { maker_rebate: dec!(-0.01), taker_fee: dec!(-0.03) },
        );
        FeeCalculator::new(role_fees)
    }

    #[test]
    fn maker_rebate_is_positive_for_market_maker() {
        let fee = calculator().calculate(100, "market_maker", LiquidityType::Maker).unwrap();
        assert_eq!(fee, dec!(2.00));
    }

    #[test]
    fn taker_fee_is_negative_for_retail() {
        let fee = calculator().calculate(50, "retail", LiquidityType::Taker).unwrap();
        assert_eq!(fee, dec!(-1.50));
    }

    #[test]
    fn unknown_role_fails_explicitly() {
        let err = calculator().calculate(1, "unknown_role", LiquidityType::Maker).unwrap_err();
        assert!(matches!(err, FeeError::UnknownRole(role) if role == "unknown_role"));
    }

    #[test]
    fn determine_liquidity_is_taker_when_sides_match() {
        assert_eq!(LiquidityType::determine(Side::Buy, Side::Buy), LiquidityType::Taker);
        assert_eq!(LiquidityType::determine(Side::Buy, Side::Sell), LiquidityType::Maker);
    }
}
