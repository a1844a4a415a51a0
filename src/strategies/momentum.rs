//! Momentum strategy with moving-average confirmation

use std::collections::VecDeque;
use tracing::{info, warn};

use crate::core::{Order, Price, Quantity, Side, Signal, SignalType, Symbol, Ticker};

use super::Strategy;

/// Momentum parameters
#[derive(Debug, Clone)]
pub struct MomentumParams {
    /// Short moving average period, also the momentum lookback
    pub short_period: usize,
    pub long_period: usize,
    /// Fractional price change that counts as momentum
    pub threshold: f64,
    pub position_size: f64,
    pub max_position: f64,
    /// Fraction of peak equity
    pub max_drawdown: f64,
    pub initial_equity: f64,
}

impl Default for MomentumParams {
    fn default() -> Self {
        Self {
            short_period: 5,
            long_period: 10,
            threshold: 0.02,
            position_size: 1000.0,
            max_position: 5000.0,
            max_drawdown: 0.2,
            initial_equity: 100_000.0,
        }
    }
}

/// Simple moving average over the last `period` values
#[derive(Debug, Clone)]
pub struct MovingAverage {
    period: usize,
    values: VecDeque<f64>,
}

impl MovingAverage {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            values: VecDeque::with_capacity(period + 1),
        }
    }

    pub fn add(&mut self, value: f64) {
        self.values.push_back(value);
        if self.values.len() > self.period {
            self.values.pop_front();
        }
    }

    pub fn is_ready(&self) -> bool {
        self.values.len() >= self.period
    }

    /// None until `period` values have been seen
    pub fn average(&self) -> Option<f64> {
        if !self.is_ready() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

pub struct MomentumStrategy {
    symbol: Symbol,
    params: MomentumParams,
    prices: VecDeque<f64>,
    short_ma: MovingAverage,
    long_ma: MovingAverage,
    position_open: bool,
    cash: f64,
    equity: f64,
    peak_equity: f64,
}

impl MomentumStrategy {
    pub fn new(symbol: impl Into<Symbol>, params: MomentumParams) -> Self {
        Self {
            symbol: symbol.into(),
            short_ma: MovingAverage::new(params.short_period),
            long_ma: MovingAverage::new(params.long_period),
            prices: VecDeque::with_capacity(params.short_period + 2),
            position_open: false,
            cash: params.initial_equity,
            equity: params.initial_equity,
            peak_equity: params.initial_equity,
            params,
        }
    }

    /// (p_t - p_{t-n}) / p_{t-n}, None until n + 1 prices are known
    pub fn momentum(&self) -> Option<f64> {
        let n = self.params.short_period;
        if self.prices.len() <= n {
            return None;
        }
        let last = *self.prices.back()?;
        let base = self.prices[self.prices.len() - 1 - n];
        if base == 0.0 {
            return None;
        }
        Some((last - base) / base)
    }

    pub fn is_position_open(&self) -> bool {
        self.position_open
    }

    pub fn equity(&self) -> f64 {
        self.equity
    }

    pub fn drawdown(&self) -> f64 {
        if self.peak_equity <= 0.0 {
            return 0.0;
        }
        (self.peak_equity - self.equity) / self.peak_equity
    }

    fn within_limits(&self) -> bool {
        if self.params.position_size > self.params.max_position {
            warn!(symbol = %self.symbol, "Position size {} over limit {}", self.params.position_size, self.params.max_position);
            return false;
        }
        if self.drawdown() > self.params.max_drawdown {
            warn!(symbol = %self.symbol, "Drawdown {:.2}% over limit", self.drawdown() * 100.0);
            return false;
        }
        true
    }

    fn mark_to_market(&mut self, price: f64) {
        let holding = if self.position_open { self.params.position_size * price } else { 0.0 };
        self.equity = self.cash + holding;
        self.peak_equity = self.peak_equity.max(self.equity);
    }

    /// Feed one price; returns the action taken, if any
    pub fn on_price(&mut self, price: f64) -> Option<SignalType> {
        self.prices.push_back(price);
        if self.prices.len() > self.params.short_period + 1 {
            self.prices.pop_front();
        }
        self.short_ma.add(price);
        self.long_ma.add(price);
        self.mark_to_market(price);

        let momentum = self.momentum()?;
        if momentum > self.params.threshold && !self.position_open {
            let (short, long) = (self.short_ma.average()?, self.long_ma.average()?);
            if short > long && self.within_limits() {
                info!(symbol = %self.symbol, "Momentum detected: BUY at price {}", price);
                self.position_open = true;
                self.cash -= self.params.position_size * price;
                return Some(SignalType::EntryLong);
            }
        } else if momentum < -self.params.threshold && self.position_open {
            info!(symbol = %self.symbol, "Momentum detected: SELL at price {}", price);
            self.position_open = false;
            self.cash += self.params.position_size * price;
            return Some(SignalType::ExitLong);
        }
        None
    }
}

impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        "momentum"
    }

    fn on_tick(&mut self, ticker: &Ticker) -> Vec<Signal> {
        if ticker.symbol != self.symbol {
            return vec![];
        }
        let price = ticker.last.as_f64();
        match self.on_price(price) {
            Some(signal_type) => vec![Signal::new(
                self.symbol.clone(),
                signal_type,
                ticker.last,
                Quantity::from_f64(self.params.position_size),
                format!("momentum {:.4}", self.momentum().unwrap_or(0.0)),
            )],
            None => vec![],
        }
    }

    fn on_fill(&mut self, order: &Order) {
        if order.symbol == self.symbol {
            let price = order.avg_fill_price.unwrap_or(Price::ZERO);
            info!(symbol = %self.symbol, side = %order.side, "Fill {} @ {}", order.filled_quantity, price);
            if order.side == Side::Sell && order.filled_quantity.is_positive() {
                self.position_open = false;
            }
        }
    }

    fn reset(&mut self) {
        self.prices.clear();
        self.short_ma.clear();
        self.long_ma.clear();
        self.position_open = false;
        self.cash = self.params.initial_equity;
        self.equity = self.params.initial_equity;
        self.peak_equity = self.params.initial_equity;
    }
}
