//! Synthetic market data - seeded random-walk tickers

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

use crate::core::config::SimulationConfig;
use crate::core::{Price, Quantity, Symbol, Ticker};

const DEFAULT_PRICE: f64 = 100.0;
const DEFAULT_SPREAD: f64 = 0.02;
const DEFAULT_VOLATILITY: f64 = 0.002;
const DEFAULT_VOLUME: f64 = 1_000.0;

#[derive(Debug, Clone)]
struct Walk {
    price: f64,
    spread: f64,
    volatility: f64,
    base_volume: f64,
}

/// Random-walk ticker generator
pub struct SyntheticFeed {
    rng: StdRng,
    walks: BTreeMap<Symbol, Walk>,
}

impl SyntheticFeed {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            walks: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        let mut feed = Self::new(config.seed);
        for s in &config.symbols {
            feed.add_symbol(Symbol::new(s.symbol.as_str()), s.initial_price, s.spread, s.volatility);
        }
        feed
    }

    pub fn with_symbol(mut self, symbol: impl Into<Symbol>, price: f64, spread: f64, volatility: f64) -> Self {
        self.add_symbol(symbol.into(), price, spread, volatility);
        self
    }

    pub fn add_symbol(&mut self, symbol: Symbol, price: f64, spread: f64, volatility: f64) {
        self.walks.insert(
            symbol,
            Walk {
                price,
                spread,
                volatility,
                base_volume: DEFAULT_VOLUME,
            },
        );
    }

    /// Start a walk with default parameters unless the symbol is known
    pub fn ensure_symbol(&mut self, symbol: &Symbol) {
        if !self.walks.contains_key(symbol) {
            self.add_symbol(symbol.clone(), DEFAULT_PRICE, DEFAULT_SPREAD, DEFAULT_VOLATILITY);
        }
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.walks.keys().cloned().collect()
    }

    pub fn price(&self, symbol: &Symbol) -> Option<f64> {
        self.walks.get(symbol).map(|w| w.price)
    }

    /// Step one symbol: price *= 1 + (u - 0.5) * volatility
    pub fn next_ticker(&mut self, symbol: &Symbol) -> Option<Ticker> {
        let walk = self.walks.get_mut(symbol)?;
        let u: f64 = self.rng.random();
        walk.price = (walk.price * (1.0 + (u - 0.5) * walk.volatility)).max(0.01);
        let volume = walk.base_volume * self.rng.random_range(0.5..1.5);

        Some(Ticker {
            symbol: symbol.clone(),
            bid: Price::from_f64(walk.price - walk.spread / 2.0).round_dp(4),
            ask: Price::from_f64(walk.price + walk.spread / 2.0).round_dp(4),
            last: Price::from_f64(walk.price).round_dp(4),
            volume: Quantity::from_f64(volume).round_dp(0),
            timestamp: Utc::now(),
        })
    }

    /// Step every symbol once, in symbol order
    pub fn next_all(&mut self) -> Vec<Ticker> {
        let symbols = self.symbols();
        symbols.iter().filter_map(|s| self.next_ticker(s)).collect()
    }

    /// `n` consecutive prices of one symbol
    pub fn price_series(&mut self, symbol: &Symbol, n: usize) -> Vec<f64> {
        (0..n)
            .filter_map(|_| self.next_ticker(symbol).map(|t| t.last.as_f64()))
            .collect()
    }
}
