//! Core types - Strong typing for safety

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Sub, SubAssign};
use uuid::Uuid;

/// Tradeable symbol (e.g., "AAPL", "BTC/USDT")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Symbol::new(s)
    }
}

/// Price with arbitrary precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    pub const ZERO: Price = Price(Decimal::ZERO);

    pub fn new(value: impl Into<Decimal>) -> Self {
        Self(value.into())
    }

    pub fn from_f64(value: f64) -> Self {
        Self(Decimal::try_from(value).unwrap_or(Decimal::ZERO))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Round to `dp` decimal places (venue tick size)
    pub fn round_dp(&self, dp: u32) -> Self {
        Self(self.0.round_dp(dp))
    }
}

impl std::fmt::Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Quantity/Size
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Quantity(Decimal);

impl Quantity {
    pub const ZERO: Quantity = Quantity(Decimal::ZERO);

    pub fn new(value: impl Into<Decimal>) -> Self {
        Self(value.into())
    }

    pub fn from_f64(value: f64) -> Self {
        Self(Decimal::try_from(value).unwrap_or(Decimal::ZERO))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Notional value at `price`
    pub fn notional(&self, price: Price) -> Decimal {
        self.0 * price.as_decimal()
    }

    /// Round to `dp` decimal places (lot size)
    pub fn round_dp(&self, dp: u32) -> Self {
        Self(self.0.round_dp(dp))
    }
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        Quantity(self.0 + rhs.0)
    }
}

impl Sub for Quantity {
    type Output = Quantity;

    fn sub(self, rhs: Quantity) -> Quantity {
        Quantity(self.0 - rhs.0)
    }
}

impl AddAssign for Quantity {
    fn add_assign(&mut self, rhs: Quantity) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Quantity {
    fn sub_assign(&mut self, rhs: Quantity) {
        self.0 -= rhs.0;
    }
}

impl std::iter::Sum for Quantity {
    fn sum<I: Iterator<Item = Quantity>>(iter: I) -> Self {
        iter.fold(Quantity::ZERO, |acc, q| acc + q)
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1 for buys, -1 for sells
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// Still working at the venue (or about to be)
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Open | OrderStatus::PartiallyFilled
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Open => "OPEN",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        };
        write!(f, "{}", s)
    }
}

/// What a caller asks the order manager for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Quantity,
    pub price: Option<Price>,
    /// Set when the order is a child slice of an execution algorithm
    pub parent_id: Option<Uuid>,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<Symbol>, side: Side, quantity: Quantity) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            parent_id: None,
        }
    }

    pub fn limit(symbol: impl Into<Symbol>, side: Side, quantity: Quantity, price: Price) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            parent_id: None,
        }
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

/// Order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Quantity,
    pub price: Option<Price>,
    pub status: OrderStatus,
    pub filled_quantity: Quantity,
    /// Volume-weighted average of all fills
    pub avg_fill_price: Option<Price>,
    pub reject_reason: Option<String>,
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(request: OrderRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            symbol: request.symbol,
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            price: request.price,
            status: OrderStatus::Pending,
            filled_quantity: Quantity::ZERO,
            avg_fill_price: None,
            reject_reason: None,
            parent_id: request.parent_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn remaining(&self) -> Quantity {
        self.quantity - self.filled_quantity
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// A single execution against an order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub quantity: Quantity,
    pub price: Price,
    /// Venue's total filled quantity once this fill is applied
    #[serde(default)]
    pub cumulative: Option<Quantity>,
    pub timestamp: DateTime<Utc>,
}

/// Venue-side update for one order: an acknowledgement, a fill or a status change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub fill: Option<Fill>,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionReport {
    pub fn status(order_id: Uuid, status: OrderStatus) -> Self {
        Self {
            order_id,
            status,
            fill: None,
            reason: None,
            timestamp: Utc::now(),
        }
    }

    pub fn fill(order_id: Uuid, status: OrderStatus, quantity: Quantity, price: Price) -> Self {
        let now = Utc::now();
        Self {
            order_id,
            status,
            fill: Some(Fill {
                quantity,
                price,
                cumulative: None,
                timestamp: now,
            }),
            reason: None,
            timestamp: now,
        }
    }

    /// Attach the venue's cumulative filled quantity to a fill report
    pub fn with_cumulative(mut self, cumulative: Quantity) -> Self {
        if let Some(fill) = self.fill.as_mut() {
            fill.cumulative = Some(cumulative);
        }
        self
    }

    pub fn rejected(order_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::status(order_id, OrderStatus::Rejected)
        }
    }
}

/// Ticker/Market data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: Symbol,
    pub bid: Price,
    pub ask: Price,
    pub last: Price,
    pub volume: Quantity,
    pub timestamp: DateTime<Utc>,
}

impl Ticker {
    pub fn mid(&self) -> Price {
        Price::new((self.bid.as_decimal() + self.ask.as_decimal()) / Decimal::TWO)
    }

    pub fn spread(&self) -> Decimal {
        self.ask.as_decimal() - self.bid.as_decimal()
    }
}

/// Trade signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub symbol: Symbol,
    pub signal_type: SignalType,
    pub price: Price,
    pub quantity: Quantity,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn new(
        symbol: Symbol,
        signal_type: SignalType,
        price: Price,
        quantity: Quantity,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol,
            signal_type,
            price,
            quantity,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    /// Side of the order that would act on this signal
    pub fn side(&self) -> Side {
        match self.signal_type {
            SignalType::EntryLong | SignalType::ExitShort => Side::Buy,
            SignalType::EntryShort | SignalType::ExitLong => Side::Sell,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    EntryLong,
    EntryShort,
    ExitLong,
    ExitShort,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_symbol_is_uppercased() {
        assert_eq!(Symbol::new("aapl").as_str(), "AAPL");
        assert_eq!(Symbol::from("goog"), Symbol::new("GOOG"));
    }

    #[test]
    fn test_quantity_arithmetic() {
        let mut q = Quantity::new(dec!(10));
        q += Quantity::new(dec!(2.5));
        q -= Quantity::new(dec!(0.5));
        assert_eq!(q, Quantity::new(dec!(12)));
        let total: Quantity = vec![Quantity::new(dec!(1)), Quantity::new(dec!(2))]
            .into_iter()
            .sum();
        assert_eq!(total, Quantity::new(dec!(3)));
    }

    #[test]
    fn test_ticker_mid_and_spread() {
        let ticker = Ticker {
            symbol: Symbol::new("AAPL"),
            bid: Price::new(dec!(149.9)),
            ask: Price::new(dec!(150.1)),
            last: Price::new(dec!(150)),
            volume: Quantity::ZERO,
            timestamp: Utc::now(),
        };
        assert_eq!(ticker.mid(), Price::new(dec!(150)));
        assert_eq!(ticker.spread(), dec!(0.2));
    }

    #[test]
    fn test_signal_side() {
        let s = Signal::new(
            Symbol::new("AAPL"),
            SignalType::ExitLong,
            Price::new(dec!(1)),
            Quantity::new(dec!(1)),
            "exit",
        );
        assert_eq!(s.side(), Side::Sell);
    }
}
