//! Market making - two-sided quotes around the mid with volatility and inventory skew

use serde::Serialize;
use std::collections::VecDeque;
use tracing::{info, warn};

use crate::core::{Order, Price, Quantity, Side, Signal, SignalType, Symbol, Ticker};

use super::Strategy;

#[derive(Debug, Clone)]
pub struct MarketMakingParams {
    pub base_spread: f64,
    pub min_spread: f64,
    pub max_spread: f64,
    /// Absolute inventory bound
    pub max_inventory: f64,
    pub quote_size: f64,
    pub max_loss: f64,
    pub max_daily_volume: f64,
    /// Mids kept for the realised volatility estimate
    pub volatility_window: usize,
}

impl Default for MarketMakingParams {
    fn default() -> Self {
        Self {
            base_spread: 0.05,
            min_spread: 0.01,
            max_spread: 1.0,
            max_inventory: 10.0,
            quote_size: 1.0,
            max_loss: 500.0,
            max_daily_volume: 10_000.0,
            volatility_window: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
    pub spread: f64,
}

pub struct MarketMaker {
    symbol: Symbol,
    params: MarketMakingParams,
    mids: VecDeque<f64>,
    inventory: f64,
    daily_volume: f64,
    loss: f64,
    halted: bool,
}

impl MarketMaker {
    pub fn new(symbol: impl Into<Symbol>, params: MarketMakingParams) -> Self {
        Self {
            symbol: symbol.into(),
            mids: VecDeque::with_capacity(params.volatility_window + 1),
            params,
            inventory: 0.0,
            daily_volume: 0.0,
            loss: 0.0,
            halted: false,
        }
    }

    pub fn inventory(&self) -> f64 {
        self.inventory
    }

    pub fn daily_volume(&self) -> f64 {
        self.daily_volume
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    fn clamp_spread(&self, spread: f64) -> f64 {
        spread.clamp(self.params.min_spread, self.params.max_spread)
    }

    /// Population std of successive mid changes over the window
    pub fn volatility(&self) -> f64 {
        if self.mids.len() < 3 {
            return 0.0;
        }
        let changes: Vec<f64> = self
            .mids
            .iter()
            .zip(self.mids.iter().skip(1))
            .map(|(a, b)| b - a)
            .collect();
        let mean = changes.iter().sum::<f64>() / changes.len() as f64;
        (changes.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / changes.len() as f64).sqrt()
    }

    /// Widen for volatility, then skew by inventory (long inventory widens)
    pub fn quote_spread(&self, volatility: f64) -> f64 {
        let spread = self.clamp_spread(self.params.base_spread + volatility);
        let skew = (self.inventory / self.params.max_inventory) * 0.5;
        self.clamp_spread(spread + skew)
    }

    pub fn quote(&self, mid: f64) -> Quote {
        let spread = self.quote_spread(self.volatility());
        Quote {
            bid: mid - spread / 2.0,
            ask: mid + spread / 2.0,
            spread,
        }
    }

    /// |inventory| / max, in [0, 1]
    pub fn position_risk(&self) -> f64 {
        (self.inventory / self.params.max_inventory).abs()
    }

    /// Apply a signed inventory change, bounded to +/- max
    pub fn apply_fill(&mut self, side: Side, quantity: f64) {
        let delta = match side {
            Side::Buy => quantity,
            Side::Sell => -quantity,
        };
        let max = self.params.max_inventory;
        self.inventory = (self.inventory + delta).clamp(-max, max);
        self.daily_volume += quantity;
        info!(symbol = %self.symbol, "Inventory {:.4}, daily volume {:.2}", self.inventory, self.daily_volume);
    }

    pub fn record_pnl(&mut self, pnl: f64) {
        if pnl < 0.0 {
            self.loss -= pnl;
        }
    }

    /// Latches `halted` once the loss or daily volume limit is reached
    pub fn check_risk_limits(&mut self) -> bool {
        if self.halted {
            return false;
        }
        if self.loss >= self.params.max_loss {
            warn!(symbol = %self.symbol, "Max loss threshold breached. Quoting stopped.");
            self.halted = true;
        } else if self.daily_volume >= self.params.max_daily_volume {
            warn!(symbol = %self.symbol, "Max daily volume threshold breached. Quoting stopped.");
            self.halted = true;
        }
        !self.halted
    }

    /// New trading day
    pub fn reset_daily(&mut self) {
        self.daily_volume = 0.0;
        self.loss = 0.0;
        self.halted = false;
    }

    fn push_mid(&mut self, mid: f64) {
        self.mids.push_back(mid);
        if self.mids.len() > self.params.volatility_window {
            self.mids.pop_front();
        }
    }
}

impl Strategy for MarketMaker {
    fn name(&self) -> &str {
        "market_making"
    }

    fn on_tick(&mut self, ticker: &Ticker) -> Vec<Signal> {
        if ticker.symbol != self.symbol {
            return vec![];
        }
        let mid = ticker.mid().as_f64();
        self.push_mid(mid);
        if !self.check_risk_limits() {
            return vec![];
        }

        let quote = self.quote(mid);
        let size = Quantity::from_f64(self.params.quote_size);
        let max = self.params.max_inventory;
        let mut signals = Vec::with_capacity(2);
        if self.inventory + self.params.quote_size <= max {
            signals.push(Signal::new(
                self.symbol.clone(),
                SignalType::EntryLong,
                Price::from_f64(quote.bid).round_dp(4),
                size,
                format!("bid, spread {:.4}", quote.spread),
            ));
        }
        if self.inventory - self.params.quote_size >= -max {
            signals.push(Signal::new(
                self.symbol.clone(),
                SignalType::EntryShort,
                Price::from_f64(quote.ask).round_dp(4),
                size,
                format!("ask, spread {:.4}", quote.spread),
            ));
        }
        signals
    }

    /// Expects each order once, when it is done filling
    fn on_fill(&mut self, order: &Order) {
        if order.symbol == self.symbol && order.filled_quantity.is_positive() {
            self.apply_fill(order.side, order.filled_quantity.as_f64());
        }
    }

    fn reset(&mut self) {
        self.mids.clear();
        self.inventory = 0.0;
        self.reset_daily();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ticker(mid: f64) -> Ticker {
        Ticker {
            symbol: Symbol::new("AAPL"),
            bid: Price::from_f64(mid - 0.01),
            ask: Price::from_f64(mid + 0.01),
            last: Price::from_f64(mid),
            volume: Quantity::ZERO,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_spread_skews_with_inventory() {
        let mut mm = MarketMaker::new("AAPL", MarketMakingParams::default());
        assert!((mm.quote_spread(0.0) - 0.05).abs() < 1e-12);
        assert_eq!(mm.quote_spread(5.0), 1.0);

        mm.apply_fill(Side::Buy, 5.0);
        assert!((mm.quote_spread(0.0) - 0.30).abs() < 1e-12);
        mm.apply_fill(Side::Sell, 20.0);
        assert_eq!(mm.inventory(), -10.0);
        assert_eq!(mm.quote_spread(0.0), 0.01);
        assert_eq!(mm.position_risk(), 1.0);
    }

    #[test]
    fn test_quotes_are_symmetric_around_mid() {
        let mut mm = MarketMaker::new("AAPL", MarketMakingParams::default());
        let signals = mm.on_tick(&ticker(100.0));
        assert_eq!(signals.len(), 2);
        assert!((signals[0].price.as_f64() - 99.975).abs() < 1e-9);
        assert!((signals[1].price.as_f64() - 100.025).abs() < 1e-9);
        assert!(mm.on_tick(&Ticker {
            symbol: Symbol::new("GOOG"),
            ..ticker(100.0)
        })
        .is_empty());
    }

    #[test]
    fn test_volatility_widens_spread() {
        let mut mm = MarketMaker::new("AAPL", MarketMakingParams::default());
        for mid in [100.0, 100.2, 99.9, 100.3, 99.8] {
            mm.on_tick(&ticker(mid));
        }
        assert!(mm.volatility() > 0.2);
        assert!(mm.quote(100.0).spread > 0.25);
    }

    #[test]
    fn test_inventory_bound_drops_one_side() {
        let mut mm = MarketMaker::new("AAPL", MarketMakingParams::default());
        mm.apply_fill(Side::Buy, 10.0);
        let signals = mm.on_tick(&ticker(100.0));
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal_type, SignalType::EntryShort);
    }

    #[test]
    fn test_limits_halt_quoting_until_next_day() {
        let params = MarketMakingParams {
            max_daily_volume: 3.0,
            ..MarketMakingParams::default()
        };
        let mut mm = MarketMaker::new("AAPL", params);
        mm.apply_fill(Side::Buy, 2.0);
        mm.apply_fill(Side::Sell, 1.0);
        assert!(mm.on_tick(&ticker(100.0)).is_empty());
        assert!(mm.is_halted());

        mm.reset_daily();
        mm.record_pnl(-600.0);
        assert!(mm.on_tick(&ticker(100.0)).is_empty());
        mm.reset_daily();
        mm.record_pnl(250.0);
        assert_eq!(mm.on_tick(&ticker(100.0)).len(), 2);
    }
}
