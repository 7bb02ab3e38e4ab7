//! Core data model (spec §3).
//!
//! `Price` mirrors the teacher's `PriceLevel` scaled-integer trick (see
//! `services::matching::types::PriceLevel` in the teacher repo) but scales
//! to whole cents rather than 1e8, since spec prices are penny increments,
//! not arbitrary-precision crypto prices.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// A price quantised to whole cents, compared and ordered exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Price(i64);

impl Price {
    /// Build a `Price` from a decimal dollar amount, rejecting anything that
    /// is not an exact penny increment or is not strictly positive.
    pub fn from_decimal(value: Decimal) -> Result<Self, String> {
        if value <= Decimal::ZERO {
            return Err(format!("price {value} must be positive"));
        }
        let cents = value * Decimal::from(100);
        if cents.fract() != Decimal::ZERO {
            return Err(format!("price {value} is not a penny increment"));
        }
        let cents = cents
            .to_string()
            .parse::<i64>()
            .map_err(|_| format!("price {value} out of range"))?;
        Ok(Price(cents))
    }

    pub fn from_cents(cents: i64) -> Self {
        Price(cents)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn to_decimal(&self) -> Decimal {
        Decimal::from(self.0) / Decimal::from(100)
    }

    pub fn midpoint(a: Price, b: Price) -> Price {
        Price((a.0 + b.0) / 2)
    }
}

impl TryFrom<Decimal> for Price {
    type Error = String;
    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Price::from_decimal(value)
    }
}

impl From<Price> for Decimal {
    fn from(value: Price) -> Self {
        value.to_decimal()
    }
}

impl Ord for Price {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for Price {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Signed direction applied to a position for a fill of this side.
    pub fn signum(self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

/// Option flavor for an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

/// Immutable instrument definition, created once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub strike: Option<Decimal>,
    pub expiry: Option<chrono::NaiveDate>,
    pub option_type: Option<OptionType>,
    pub underlying: Option<String>,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            strike: None,
            expiry: None,
            option_type: None,
            underlying: None,
        }
    }
}

/// Terminal + transient order status as reported in an [`OrderResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingNew,
    New,
    PartiallyFilled,
    Filled,
    Rejected,
    Cancelled,
    Error,
}

/// An order as it travels through the pipeline.
///
/// Invariant: `0 <= filled_quantity <= quantity` and
/// `remaining_quantity == quantity - filled_quantity`, enforced by
/// [`Order::fill`] — nothing else is allowed to adjust `filled_quantity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub instrument_id: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: u64,
    pub price: Option<Price>,
    pub trader_id: String,
    pub client_order_id: Option<String>,
    pub timestamp: i64,
    pub filled_quantity: u64,
}

impl Order {
    pub fn new(
        order_id: Uuid,
        instrument_id: impl Into<String>,
        side: Side,
        order_type: OrderType,
        quantity: u64,
        price: Option<Price>,
        trader_id: impl Into<String>,
        client_order_id: Option<String>,
        timestamp: i64,
    ) -> Result<Self, String> {
        if quantity == 0 {
            return Err("order quantity must be positive".to_string());
        }
        match order_type {
            OrderType::Limit if price.is_none() => {
                return Err("limit orders require a price".to_string())
            }
            OrderType::Market if price.is_some() => {
                return Err("market orders must not carry a price".to_string())
            }
            _ => {}
        }
        Ok(Self {
            order_id,
            instrument_id: instrument_id.into(),
            side,
            order_type,
            quantity,
            price,
            trader_id: trader_id.into(),
            client_order_id,
            timestamp,
            filled_quantity: 0,
        })
    }

    pub fn remaining_quantity(&self) -> u64 {
        self.quantity - self.filled_quantity
    }

    /// Apply a fill, maintaining the `filled + remaining == quantity` invariant.
    pub fn fill(&mut self, amount: u64) {
        debug_assert!(self.filled_quantity + amount <= self.quantity);
        self.filled_quantity = (self.filled_quantity + amount).min(self.quantity);
    }

    pub fn is_filled(&self) -> bool {
        self.remaining_quantity() == 0
    }
}

/// A completed match between two orders. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: Uuid,
    pub instrument_id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub buyer_order_id: Uuid,
    pub seller_order_id: Uuid,
    pub price: Price,
    pub quantity: u64,
    pub aggressor_side: Side,
    pub timestamp: i64,
}

impl Trade {
    /// The side of the two parties that was resting in the book.
    pub fn maker_side(&self) -> Side {
        self.aggressor_side.opposite()
    }

    pub fn maker_order_id(&self) -> Uuid {
        match self.aggressor_side {
            Side::Buy => self.seller_order_id,
            Side::Sell => self.buyer_order_id,
        }
    }

    pub fn taker_order_id(&self) -> Uuid {
        match self.aggressor_side {
            Side::Buy => self.buyer_order_id,
            Side::Sell => self.seller_order_id,
        }
    }

    pub fn maker_id(&self) -> &str {
        match self.aggressor_side {
            Side::Buy => &self.seller_id,
            Side::Sell => &self.buyer_id,
        }
    }

    pub fn taker_id(&self) -> &str {
        match self.aggressor_side {
            Side::Buy => &self.buyer_id,
            Side::Sell => &self.seller_id,
        }
    }
}

/// Result returned by the matching engine / venue for a submitted order.
#[derive(Debug, Clone, Serialize)]
pub struct OrderResult {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub fills: Vec<Trade>,
    pub remaining_quantity: u64,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl OrderResult {
    pub fn new(order_id: Uuid, status: OrderStatus, fills: Vec<Trade>, remaining_quantity: u64) -> Self {
        Self {
            order_id,
            status,
            fills,
            remaining_quantity,
            error_code: None,
            error_message: None,
        }
    }

    pub fn error(order_id: Uuid, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            order_id,
            status: OrderStatus::Error,
            fills: Vec::new(),
            remaining_quantity: 0,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
        }
    }

    pub fn rejected(order_id: Uuid, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            order_id,
            status: OrderStatus::Rejected,
            fills: Vec::new(),
            remaining_quantity: 0,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::PendingNew | OrderStatus::New | OrderStatus::PartiallyFilled | OrderStatus::Filled
        )
    }
}
