//! Order lifecycle - state machine and fill accounting

use chrono::Utc;
use rust_decimal::Decimal;

use crate::core::{Error, Order, OrderStatus, Price, Quantity, Result};

/// Whether the state machine permits `from -> to`
pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Pending, Open | PartiallyFilled | Filled | Cancelled | Rejected)
            | (Open, PartiallyFilled | Filled | Cancelled | Expired)
            | (PartiallyFilled, PartiallyFilled | Filled | Cancelled | Expired)
    )
}

impl Order {
    /// Move to `to`, or fail with `Error::InvalidTransition`
    pub fn transition(&mut self, to: OrderStatus) -> Result<()> {
        if !can_transition(self.status, to) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Terminal rejection carrying the venue's (or gate's) reason
    pub fn reject(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(OrderStatus::Rejected)?;
        self.reject_reason = Some(reason.into());
        Ok(())
    }

    /// Account for an execution of `qty` at `price`.
    ///
    /// Keeps `avg_fill_price` volume-weighted and derives the status from the
    /// filled quantity. Over-fills are refused without touching the order.
    pub fn apply_fill(&mut self, qty: Quantity, price: Price) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::InvalidState(format!(
                "cannot fill order {} in status {}",
                self.id, self.status
            )));
        }
        let new_filled = self.check_fill(qty, price)?;

        let next = if new_filled == self.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.transition(next)?;
        self.accumulate(qty, price, new_filled);
        Ok(())
    }

    /// Book a fill the venue made before a cancel or expiry took effect.
    /// The status stays Cancelled/Expired.
    pub fn apply_late_fill(&mut self, qty: Quantity, price: Price) -> Result<()> {
        if !matches!(self.status, OrderStatus::Cancelled | OrderStatus::Expired) {
            return Err(Error::InvalidState(format!(
                "late fill on order {} in status {}",
                self.id, self.status
            )));
        }
        let new_filled = self.check_fill(qty, price)?;
        self.accumulate(qty, price, new_filled);
        self.updated_at = Utc::now();
        Ok(())
    }

    fn check_fill(&self, qty: Quantity, price: Price) -> Result<Quantity> {
        if !qty.is_positive() {
            return Err(Error::Trading(format!("fill quantity must be positive, got {}", qty)));
        }
        if !price.is_positive() {
            return Err(Error::Trading(format!("fill price must be positive, got {}", price)));
        }
        let new_filled = self.filled_quantity + qty;
        if new_filled > self.quantity {
            return Err(Error::Trading(format!(
                "over-fill on {}: filled {} + {} > {}",
                self.id, self.filled_quantity, qty, self.quantity
            )));
        }
        Ok(new_filled)
    }

    fn accumulate(&mut self, qty: Quantity, price: Price, new_filled: Quantity) {
        let prev_notional = match self.avg_fill_price {
            Some(avg) => self.filled_quantity.notional(avg),
            None => Decimal::ZERO,
        };
        let total = prev_notional + qty.notional(price);
        self.avg_fill_price = Some(Price::new(total / new_filled.as_decimal()));
        self.filled_quantity = new_filled;
    }
}
