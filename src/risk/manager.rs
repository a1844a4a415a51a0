//! Portfolio risk manager - positions, trade history and performance metrics

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{error, info};

use super::RiskError;
use crate::core::Symbol;
use crate::core::config::RiskConfig;

const DEFAULT_RISK_FREE_RATE: f64 = 0.02;

/// One closed trade
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRecord {
    pub symbol: Symbol,
    pub profit: f64,
    pub loss: f64,
}

impl TradeRecord {
    pub fn new(symbol: impl Into<Symbol>, profit: f64, loss: f64) -> Self {
        Self {
            symbol: symbol.into(),
            profit,
            loss,
        }
    }

    pub fn net(&self) -> f64 {
        self.profit - self.loss
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskMetric {
    MaxDrawdown,
    Volatility,
    SharpeRatio,
}

impl fmt::Display for RiskMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskMetric::MaxDrawdown => write!(f, "max_drawdown"),
            RiskMetric::Volatility => write!(f, "volatility"),
            RiskMetric::SharpeRatio => write!(f, "sharpe_ratio"),
        }
    }
}

/// Ceiling on a portfolio metric; breached when the metric exceeds `value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricLimit {
    pub name: String,
    pub metric: RiskMetric,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradeMetrics {
    pub total_trades: usize,
    pub total_profit: f64,
    pub total_loss: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeSummary {
    pub total_position_size: f64,
    pub total_loss: f64,
    pub trade_metrics: HashMap<Symbol, TradeMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskReport {
    pub positions: HashMap<Symbol, f64>,
    pub daily_loss: HashMap<Symbol, f64>,
    pub trade_metrics: HashMap<Symbol, TradeMetrics>,
    pub current_loss: f64,
    pub max_drawdown: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
}

impl fmt::Display for RiskReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Risk Report")?;
        writeln!(f, "  Current loss:  {:.2}", self.current_loss)?;
        writeln!(f, "  Max drawdown:  {:.2}", self.max_drawdown)?;
        writeln!(f, "  Volatility:    {:.4}", self.volatility)?;
        writeln!(f, "  Sharpe ratio:  {:.4}", self.sharpe_ratio)?;

        let mut symbols: Vec<_> = self.positions.keys().chain(self.trade_metrics.keys()).collect();
        symbols.sort();
        symbols.dedup();
        for symbol in symbols {
            let m = self.trade_metrics.get(symbol).cloned().unwrap_or_default();
            writeln!(
                f,
                "  {:<8} position {:>10.2}  daily loss {:>10.2}  trades {:>4}  profit {:>10.2}  loss {:>10.2}",
                symbol,
                self.positions.get(symbol).copied().unwrap_or(0.0),
                self.daily_loss.get(symbol).copied().unwrap_or(0.0),
                m.total_trades,
                m.total_profit,
                m.total_loss
            )?;
        }
        Ok(())
    }
}

/// Session-level risk book across symbols
#[derive(Debug)]
pub struct RiskManager {
    max_position_size: f64,
    max_daily_loss: f64,
    limits: Vec<MetricLimit>,
    current_position_size: f64,
    current_loss: f64,
    trade_history: Vec<TradeRecord>,
    daily_loss: HashMap<Symbol, f64>,
    positions: HashMap<Symbol, f64>,
    trade_metrics: HashMap<Symbol, TradeMetrics>,
    trading_day: NaiveDate,
}

impl RiskManager {
    pub fn new(max_position_size: f64, max_daily_loss: f64, limits: Vec<MetricLimit>) -> Self {
        Self {
            max_position_size,
            max_daily_loss,
            limits,
            current_position_size: 0.0,
            current_loss: 0.0,
            trade_history: Vec::new(),
            daily_loss: HashMap::new(),
            positions: HashMap::new(),
            trade_metrics: HashMap::new(),
            trading_day: Utc::now().date_naive(),
        }
    }

    pub fn from_config(config: &RiskConfig) -> Self {
        Self::new(config.max_position_size, config.max_daily_loss, config.metric_limits.clone())
    }

    pub fn update_position(&mut self, symbol: impl Into<Symbol>, delta: f64) {
        let symbol = symbol.into();
        let position = self.positions.entry(symbol.clone()).or_insert(0.0);
        *position += delta;
        self.current_position_size += delta;
        info!(
            symbol = %symbol,
            "Updated position size: {}. Total: {}",
            position, self.current_position_size
        );
    }

    pub fn record_trade(&mut self, trade: TradeRecord) {
        self.record_trade_at(trade, Utc::now());
    }

    /// Record a trade; per-symbol daily losses roll over when `now` is a new day
    pub fn record_trade_at(&mut self, trade: TradeRecord, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.trading_day {
            self.daily_loss.clear();
            self.trading_day = today;
        }

        self.current_loss += trade.loss;
        *self.daily_loss.entry(trade.symbol.clone()).or_insert(0.0) += trade.loss;

        let metrics = self.trade_metrics.entry(trade.symbol.clone()).or_default();
        metrics.total_trades += 1;
        metrics.total_profit += trade.profit;
        metrics.total_loss += trade.loss;

        info!(
            symbol = %trade.symbol,
            profit = trade.profit,
            loss = trade.loss,
            "Recorded trade. Current loss: {}",
            self.current_loss
        );
        self.trade_history.push(trade);
    }

    pub fn check_risk_limits(&self) -> Result<(), RiskError> {
        if self.current_position_size.abs() > self.max_position_size {
            error!("Risk violation: total position size exceeds limit");
            return Err(RiskError::PositionOverflow {
                current: self.current_position_size,
                delta: 0.0,
                max: self.max_position_size,
            });
        }
        if self.current_loss > self.max_daily_loss {
            error!("Risk violation: daily loss exceeds limit");
            return Err(RiskError::DailyLossExceeded(self.current_loss, self.max_daily_loss));
        }
        for limit in &self.limits {
            let value = self.metric(limit.metric);
            if value > limit.value {
                error!("Risk violation: {} exceeded", limit.name);
                return Err(RiskError::MetricBreached {
                    metric: limit.name.clone(),
                    value,
                    limit: limit.value,
                });
            }
        }
        Ok(())
    }

    pub fn metric(&self, metric: RiskMetric) -> f64 {
        match metric {
            RiskMetric::MaxDrawdown => self.max_drawdown(),
            RiskMetric::Volatility => self.volatility(),
            RiskMetric::SharpeRatio => self.sharpe_ratio(DEFAULT_RISK_FREE_RATE),
        }
    }

    /// Largest peak-to-trough fall of cumulative net PnL
    pub fn max_drawdown(&self) -> f64 {
        let mut equity = 0.0_f64;
        let mut peak = 0.0_f64;
        let mut max_dd = 0.0_f64;
        for trade in &self.trade_history {
            equity += trade.net();
            peak = peak.max(equity);
            max_dd = max_dd.max(peak - equity);
        }
        max_dd
    }

    /// Sample standard deviation of per-trade net PnL
    pub fn volatility(&self) -> f64 {
        let n = self.trade_history.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.trade_history.iter().map(TradeRecord::net).sum::<f64>() / n as f64;
        let var = self
            .trade_history
            .iter()
            .map(|t| (t.net() - mean).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;
        var.sqrt()
    }

    pub fn sharpe_ratio(&self, risk_free_rate: f64) -> f64 {
        let vol = self.volatility();
        if vol == 0.0 {
            return 0.0;
        }
        let mean = self.trade_history.iter().map(TradeRecord::net).sum::<f64>()
            / self.trade_history.len() as f64;
        (mean - risk_free_rate) / vol
    }

    pub fn trade_summary(&self) -> TradeSummary {
        let summary = TradeSummary {
            total_position_size: self.current_position_size,
            total_loss: self.current_loss,
            trade_metrics: self.trade_metrics.clone(),
        };
        info!(
            "Trade Summary: position {}, loss {}, symbols {}",
            summary.total_position_size,
            summary.total_loss,
            summary.trade_metrics.len()
        );
        summary
    }

    pub fn risk_report(&self) -> RiskReport {
        RiskReport {
            positions: self.positions.clone(),
            daily_loss: self.daily_loss.clone(),
            trade_metrics: self.trade_metrics.clone(),
            current_loss: self.current_loss,
            max_drawdown: self.max_drawdown(),
            volatility: self.volatility(),
            sharpe_ratio: self.sharpe_ratio(DEFAULT_RISK_FREE_RATE),
        }
    }

    /// End-of-session reset; per-symbol positions are kept
    pub fn reset_risk(&mut self) {
        self.current_position_size = 0.0;
        self.current_loss = 0.0;
        self.trade_history.clear();
        self.daily_loss.clear();
        self.trade_metrics.clear();
        info!("Risk metrics reset for the day.");
    }

    /// Halts the session (and resets) once the loss reaches the daily limit
    pub fn enforce_stop_loss(&mut self) -> bool {
        if self.current_loss >= self.max_daily_loss {
            error!("Enforcing stop-loss: trading session will be halted.");
            self.reset_risk();
            return true;
        }
        false
    }

    pub fn enforce_position_limits(&self) -> bool {
        for (symbol, size) in &self.positions {
            if size.abs() > self.max_position_size {
                error!(symbol = %symbol, "Position limit violated: size {} exceeds limit", size);
                return false;
            }
        }
        true
    }

    /// Per-symbol limits, then stop-loss, then the portfolio checks
    pub fn real_time_monitoring(&mut self) -> Result<(), RiskError> {
        if !self.enforce_position_limits() {
            return Err(RiskError::TradingPaused("per-symbol position limit".into()));
        }
        if self.enforce_stop_loss() {
            return Err(RiskError::TradingPaused("stop-loss enforced".into()));
        }
        self.check_risk_limits()
    }

    pub fn symbol_exposure(&self, symbol: &Symbol) -> f64 {
        self.positions.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn daily_loss_for_symbol(&self, symbol: &Symbol) -> f64 {
        self.daily_loss.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn trade_history(&self) -> &[TradeRecord] {
        &self.trade_history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn manager(limits: Vec<MetricLimit>) -> RiskManager {
        RiskManager::new(1000.0, 5000.0, limits)
    }

    fn trades() -> Vec<TradeRecord> {
        vec![
            TradeRecord::new("AAPL", 500.0, 100.0),
            TradeRecord::new("GOOG", 700.0, 300.0),
            TradeRecord::new("AAPL", 200.0, 600.0),
        ]
    }

    #[test]
    fn test_metrics() {
        let mut rm = manager(vec![]);
        for t in trades() {
            rm.record_trade(t);
        }
        // net: 400, 400, -400 -> equity 400, 800, 400
        assert_eq!(rm.max_drawdown(), 400.0);
        // mean 133.33, sample var = (266.67^2 * 2 + 533.33^2) / 2
        let expected = ((2.0 * (800.0_f64 / 3.0).powi(2) + (1600.0_f64 / 3.0).powi(2)) / 2.0).sqrt();
        assert!((rm.volatility() - expected).abs() < 1e-9);
        let sharpe = (400.0 / 3.0 - 0.02) / expected;
        assert!((rm.sharpe_ratio(0.02) - sharpe).abs() < 1e-9);
        assert_eq!(rm.daily_loss_for_symbol(&Symbol::new("AAPL")), 700.0);

        let summary = rm.trade_summary();
        assert_eq!(summary.total_loss, 1000.0);
        assert_eq!(summary.trade_metrics[&Symbol::new("AAPL")].total_trades, 2);
    }

    #[test]
    fn test_single_trade_has_no_volatility() {
        let mut rm = manager(vec![]);
        rm.record_trade(TradeRecord::new("AAPL", 10.0, 0.0));
        assert_eq!(rm.volatility(), 0.0);
        assert_eq!(rm.sharpe_ratio(0.02), 0.0);
    }

    #[test]
    fn test_metric_limit_breach() {
        let mut rm = manager(vec![MetricLimit {
            name: "Max Drawdown".into(),
            metric: RiskMetric::MaxDrawdown,
            value: 300.0,
        }]);
        let mut trades = trades().into_iter();
        rm.record_trade(trades.next().unwrap());
        assert!(rm.check_risk_limits().is_ok());
        rm.record_trade(trades.next().unwrap());
        rm.record_trade(trades.next().unwrap());
        match rm.check_risk_limits() {
            Err(RiskError::MetricBreached { metric, value, .. }) => {
                assert_eq!(metric, "Max Drawdown");
                assert_eq!(value, 400.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_position_and_loss_limits() {
        let mut rm = manager(vec![]);
        rm.update_position("AAPL", 800.0);
        rm.update_position("GOOG", 300.0);
        assert!(rm.enforce_position_limits());
        assert!(matches!(rm.check_risk_limits(), Err(RiskError::PositionOverflow { .. })));
        assert_eq!(rm.symbol_exposure(&Symbol::new("aapl")), 800.0);

        let mut rm = manager(vec![]);
        rm.update_position("AAPL", -1500.0);
        assert!(!rm.enforce_position_limits());
        assert!(rm.real_time_monitoring().is_err());
    }

    #[test]
    fn test_stop_loss_resets_session() {
        let mut rm = manager(vec![]);
        rm.record_trade(TradeRecord::new("AAPL", 0.0, 5000.0));
        assert!(matches!(rm.real_time_monitoring(), Err(RiskError::TradingPaused(_))));
        assert_eq!(rm.trade_history().len(), 0);
        assert!(rm.real_time_monitoring().is_ok());
    }

    #[test]
    fn test_daily_loss_rolls_over() {
        let mut rm = manager(vec![]);
        let day1 = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap();
        rm.record_trade_at(TradeRecord::new("AAPL", 0.0, 100.0), day1);
        rm.record_trade_at(TradeRecord::new("AAPL", 0.0, 50.0), day1 + Duration::hours(1));
        assert_eq!(rm.daily_loss_for_symbol(&Symbol::new("AAPL")), 150.0);

        rm.record_trade_at(TradeRecord::new("AAPL", 0.0, 20.0), day1 + Duration::days(1));
        assert_eq!(rm.daily_loss_for_symbol(&Symbol::new("AAPL")), 20.0);
        // session loss is not per-day
        assert_eq!(rm.risk_report().current_loss, 170.0);
    }

    #[test]
    fn test_metric_limits_from_toml() {
        let config: RiskConfig = toml::from_str(
            r#"
            [[metric_limits]]
            name = "Volatility"
            metric = "volatility"
            value = 0.05
            "#,
        )
        .unwrap();
        let rm = RiskManager::from_config(&config);
        assert_eq!(rm.limits[0].metric, RiskMetric::Volatility);
    }
}
