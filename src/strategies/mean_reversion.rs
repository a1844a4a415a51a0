//! Mean reversion - z-score entries with protective exits and crossover confirmation

use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

use crate::core::{Quantity, Signal, SignalType, Symbol, Ticker};
use crate::monitoring::PerformanceSummary;

use super::Strategy;
use super::momentum::MovingAverage;

#[derive(Debug, Clone)]
pub struct MeanReversionParams {
    /// Lookback for the rolling mean and deviation
    pub window: usize,
    pub z_threshold: f64,
    pub capital: f64,
    /// Fraction below entry that closes the position
    pub stop_loss: Option<f64>,
    /// Fraction above entry that closes the position
    pub take_profit: Option<f64>,
    /// Require the window/2 average above the window*2 average before trading
    pub confirm_crossover: bool,
}

impl Default for MeanReversionParams {
    fn default() -> Self {
        Self {
            window: 20,
            z_threshold: 2.0,
            capital: 100_000.0,
            stop_loss: Some(0.02),
            take_profit: Some(0.05),
            confirm_crossover: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitReason {
    Signal,
    StopLoss,
    TakeProfit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedTrade {
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub profit: f64,
    pub reason: ExitReason,
}

impl ClosedTrade {
    pub fn return_pct(&self) -> f64 {
        (self.exit_price - self.entry_price) / self.entry_price
    }
}

/// Long-only: buys stretched dips, sells stretched rallies
pub struct MeanReversionStrategy {
    symbol: Symbol,
    params: MeanReversionParams,
    window: VecDeque<f64>,
    short_ma: MovingAverage,
    long_ma: MovingAverage,
    capital: f64,
    /// Units held and their entry price
    position: Option<(f64, f64)>,
    trades: Vec<ClosedTrade>,
}

impl MeanReversionStrategy {
    pub fn new(symbol: impl Into<Symbol>, params: MeanReversionParams) -> Self {
        let window = params.window.max(2);
        Self {
            symbol: symbol.into(),
            window: VecDeque::with_capacity(window + 1),
            short_ma: MovingAverage::new((window / 2).max(1)),
            long_ma: MovingAverage::new(window * 2),
            capital: params.capital,
            position: None,
            trades: Vec::new(),
            params: MeanReversionParams { window, ..params },
        }
    }

    pub fn capital(&self) -> f64 {
        self.capital
    }

    pub fn position(&self) -> f64 {
        self.position.map(|(units, _)| units).unwrap_or(0.0)
    }

    pub fn trades(&self) -> &[ClosedTrade] {
        &self.trades
    }

    /// Latest price against the window, sample deviation; None until the window fills
    pub fn z_score(&self) -> Option<f64> {
        let n = self.window.len();
        if n < self.params.window {
            return None;
        }
        let last = *self.window.back()?;
        let mean = self.window.iter().sum::<f64>() / n as f64;
        let var = self.window.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        if var == 0.0 {
            return None;
        }
        Some((last - mean) / var.sqrt())
    }

    /// Short average above long; None until the long average is ready
    pub fn crossover(&self) -> Option<bool> {
        Some(self.short_ma.average()? > self.long_ma.average()?)
    }

    fn protective_exit(&self, price: f64) -> Option<ExitReason> {
        let (_, entry) = self.position?;
        if self.params.stop_loss.is_some_and(|sl| price <= entry * (1.0 - sl)) {
            return Some(ExitReason::StopLoss);
        }
        if self.params.take_profit.is_some_and(|tp| price >= entry * (1.0 + tp)) {
            return Some(ExitReason::TakeProfit);
        }
        None
    }

    fn close(&mut self, price: f64, reason: ExitReason) -> Option<f64> {
        let (units, entry) = self.position.take()?;
        let profit = (price - entry) * units;
        self.capital += profit;
        info!(
            symbol = %self.symbol,
            "Closed {} @ {:.2} ({:?}): PnL {:.2}, capital {:.2}",
            units,
            price,
            reason,
            profit,
            self.capital
        );
        self.trades.push(ClosedTrade {
            entry_price: entry,
            exit_price: price,
            quantity: units,
            profit,
            reason,
        });
        Some(units)
    }

    /// Feed one price; returns the action and the units it covers
    pub fn on_price(&mut self, price: f64) -> Option<(SignalType, f64)> {
        self.window.push_back(price);
        if self.window.len() > self.params.window {
            self.window.pop_front();
        }
        self.short_ma.add(price);
        self.long_ma.add(price);

        if let Some(reason) = self.protective_exit(price) {
            let units = self.close(price, reason)?;
            return Some((SignalType::ExitLong, units));
        }

        let z = self.z_score()?;
        let confirmed = !self.params.confirm_crossover || self.crossover()?;
        debug!(symbol = %self.symbol, "z {:.3} confirmed {}", z, confirmed);
        if !confirmed {
            return None;
        }

        if z < -self.params.z_threshold && self.position.is_none() {
            let units = (self.capital / price).floor();
            if units <= 0.0 {
                warn!(symbol = %self.symbol, "Capital {:.2} too small to buy at {}", self.capital, price);
                return None;
            }
            info!(symbol = %self.symbol, "Mean reversion BUY {} at {} (z {:.2})", units, price, z);
            self.position = Some((units, price));
            return Some((SignalType::EntryLong, units));
        }
        if z > self.params.z_threshold && self.position.is_some() {
            let units = self.close(price, ExitReason::Signal)?;
            return Some((SignalType::ExitLong, units));
        }
        None
    }

    /// Equity after each closed trade against per-trade returns and profits
    pub fn performance(&self) -> PerformanceSummary {
        let mut equity = vec![self.params.capital];
        let mut running = self.params.capital;
        for trade in &self.trades {
            running += trade.profit;
            equity.push(running);
        }
        let returns: Vec<f64> = self.trades.iter().map(ClosedTrade::return_pct).collect();
        let profits: Vec<f64> = self.trades.iter().map(|t| t.profit).collect();
        PerformanceSummary::new(&equity, &returns).with_trades(&profits)
    }
}

impl Strategy for MeanReversionStrategy {
    fn name(&self) -> &str {
        "mean_reversion"
    }

    fn on_tick(&mut self, ticker: &Ticker) -> Vec<Signal> {
        if ticker.symbol != self.symbol {
            return vec![];
        }
        match self.on_price(ticker.last.as_f64()) {
            Some((signal_type, units)) => vec![Signal::new(
                self.symbol.clone(),
                signal_type,
                ticker.last,
                Quantity::from_f64(units),
                format!("z {:.2}", self.z_score().unwrap_or(0.0)),
            )],
            None => vec![],
        }
    }

    fn reset(&mut self) {
        self.window.clear();
        self.short_ma.clear();
        self.long_ma.clear();
        self.capital = self.params.capital;
        self.position = None;
        self.trades.clear();
    }
}
