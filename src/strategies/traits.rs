//! Strategy trait and runner

use tracing::{info, warn};

use crate::core::{Order, OrderRequest, Signal, Ticker};
use crate::execution::OrderManager;

/// Base strategy trait
pub trait Strategy: Send {
    /// Strategy name
    fn name(&self) -> &str;

    /// Process ticker and generate signals
    fn on_tick(&mut self, ticker: &Ticker) -> Vec<Signal>;

    /// Handle an order that was (partially) filled on the strategy's behalf
    fn on_fill(&mut self, _order: &Order) {}

    /// Drop all state, e.g. between sessions or when switching instruments
    fn reset(&mut self);
}

/// Strategy runner - fans ticks out to every strategy
#[derive(Default)]
pub struct StrategyRunner {
    strategies: Vec<Box<dyn Strategy>>,
}

impl StrategyRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_strategy(&mut self, strategy: impl Strategy + 'static) {
        info!("Registered strategy: {}", strategy.name());
        self.strategies.push(Box::new(strategy));
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Process ticker and collect signals from all strategies
    pub fn process_tick(&mut self, ticker: &Ticker) -> Vec<Signal> {
        let mut signals = vec![];
        for strategy in &mut self.strategies {
            let emitted = strategy.on_tick(ticker);
            if !emitted.is_empty() {
                info!(strategy = strategy.name(), symbol = %ticker.symbol, "{} signal(s)", emitted.len());
            }
            signals.extend(emitted);
        }
        signals
    }

    pub fn on_fill(&mut self, order: &Order) {
        for strategy in &mut self.strategies {
            strategy.on_fill(order);
        }
    }

    pub fn reset(&mut self) {
        for strategy in &mut self.strategies {
            strategy.reset();
        }
    }

    /// Submit each signal as a limit order at the signal price.
    ///
    /// Failed submissions are logged and skipped.
    pub async fn execute_signals(&self, om: &OrderManager, signals: &[Signal]) -> Vec<Order> {
        let mut orders = Vec::with_capacity(signals.len());
        for signal in signals {
            let request = OrderRequest::limit(signal.symbol.clone(), signal.side(), signal.quantity, signal.price);
            match om.create_order(request).await {
                Ok(order) => orders.push(order),
                Err(e) => warn!(signal_id = %signal.id, "Signal not executed: {}", e),
            }
        }
        orders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SymbolConfig;
    use crate::core::{OrderStatus, Price, Quantity, SignalType, Symbol};
    use crate::exchanges::SimulatedExchange;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    /// Emits a long entry on every tick
    struct Always {
        ticks: usize,
        fills: usize,
    }

    impl Strategy for Always {
        fn name(&self) -> &str {
            "always"
        }

        fn on_tick(&mut self, ticker: &Ticker) -> Vec<Signal> {
            self.ticks += 1;
            vec![Signal::new(
                ticker.symbol.clone(),
                SignalType::EntryLong,
                ticker.ask,
                Quantity::new(dec!(1)),
                "tick",
            )]
        }

        fn on_fill(&mut self, _order: &Order) {
            self.fills += 1;
        }

        fn reset(&mut self) {
            self.ticks = 0;
        }
    }

    fn ticker() -> Ticker {
        Ticker {
            symbol: Symbol::new("AAPL"),
            bid: Price::new(dec!(149.99)),
            ask: Price::new(dec!(150.01)),
            last: Price::new(dec!(150)),
            volume: Quantity::new(dec!(1000)),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_runner_fans_out_and_executes() {
        let mut runner = StrategyRunner::new();
        runner.add_strategy(Always { ticks: 0, fills: 0 });
        runner.add_strategy(Always { ticks: 0, fills: 0 });
        assert_eq!(runner.names(), ["always", "always"]);

        let signals = runner.process_tick(&ticker());
        assert_eq!(signals.len(), 2);

        let ex = Arc::new(SimulatedExchange::new(
            1,
            vec![SymbolConfig {
                symbol: "AAPL".into(),
                initial_price: 150.0,
                spread: 0.02,
                volatility: 0.0,
                liquidity: 1000.0,
            }],
        ));
        let om = OrderManager::new(ex);
        let orders = runner.execute_signals(&om, &signals).await;
        assert_eq!(orders.len(), 2);
        assert!(orders.iter().all(|o| o.status == OrderStatus::Filled));

        runner.on_fill(&orders[0]);
        runner.reset();
    }
}
