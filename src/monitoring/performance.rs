//! Performance metrics over return series, trade results and fills

use serde::Serialize;
use std::fmt;

use crate::core::{Error, Order, Price, Result, Side};

/// Trading periods per year for annualised volatility
pub const PERIODS_PER_YEAR: f64 = 252.0;

fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    Some(xs.iter().sum::<f64>() / xs.len() as f64)
}

/// Population standard deviation
fn std_dev(xs: &[f64]) -> Option<f64> {
    let m = mean(xs)?;
    Some((xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64).sqrt())
}

/// Mean excess return over its dispersion; None without returns or dispersion
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64) -> Option<f64> {
    let excess: Vec<f64> = returns.iter().map(|r| r - risk_free_rate).collect();
    let vol = std_dev(&excess)?;
    if vol == 0.0 {
        return None;
    }
    Some(mean(&excess)? / vol)
}

/// Like Sharpe, but only returns below the risk-free rate count as risk
pub fn sortino_ratio(returns: &[f64], risk_free_rate: f64) -> Option<f64> {
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < risk_free_rate).collect();
    let downside_risk = std_dev(&downside)?;
    if downside_risk == 0.0 {
        return None;
    }
    Some((mean(returns)? - risk_free_rate) / downside_risk)
}

pub fn annualized_volatility(returns: &[f64], periods: f64) -> Option<f64> {
    Some(std_dev(returns)? * periods.sqrt())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Drawdown {
    /// Deepest fall from a running peak, as a positive fraction of that peak
    pub max_drawdown: f64,
    /// Points from the trough until the curve regains the peak; None if it never does
    pub recovery: Option<usize>,
}

pub fn drawdown(equity: &[f64]) -> Option<Drawdown> {
    let first = *equity.first()?;
    let mut peak = first;
    let mut worst = 0.0_f64;
    let mut trough = 0;
    let mut trough_peak = first;
    for (i, &value) in equity.iter().enumerate() {
        peak = peak.max(value);
        if peak > 0.0 {
            let dd = 1.0 - value / peak;
            if dd > worst {
                worst = dd;
                trough = i;
                trough_peak = peak;
            }
        }
    }
    if worst == 0.0 {
        return Some(Drawdown { max_drawdown: 0.0, recovery: Some(0) });
    }
    let recovery = equity[trough..].iter().position(|&v| v >= trough_peak);
    Some(Drawdown { max_drawdown: worst, recovery })
}

/// Winning trades per losing trade; infinite without losses
pub fn win_loss_ratio(trades: &[f64]) -> f64 {
    let wins = trades.iter().filter(|t| **t > 0.0).count();
    let losses = trades.iter().filter(|t| **t < 0.0).count();
    if losses == 0 {
        return f64::INFINITY;
    }
    wins as f64 / losses as f64
}

/// Gross profit over gross loss; infinite without losses
pub fn profit_factor(trades: &[f64]) -> f64 {
    let gross_profit: f64 = trades.iter().filter(|t| **t > 0.0).sum();
    let gross_loss: f64 = trades.iter().filter(|t| **t < 0.0).sum();
    if gross_loss == 0.0 {
        return f64::INFINITY;
    }
    gross_profit / gross_loss.abs()
}

/// Average result per trade
pub fn expectancy(trades: &[f64]) -> Option<f64> {
    mean(trades)
}

/// Longest runs of winning and losing trades. Flat trades break both.
pub fn max_consecutive(trades: &[f64]) -> (usize, usize) {
    let (mut wins, mut losses) = (0, 0);
    let (mut max_wins, mut max_losses) = (0, 0);
    for &t in trades {
        if t > 0.0 {
            wins += 1;
            losses = 0;
        } else if t < 0.0 {
            losses += 1;
            wins = 0;
        } else {
            wins = 0;
            losses = 0;
        }
        max_wins = max_wins.max(wins);
        max_losses = max_losses.max(losses);
    }
    (max_wins, max_losses)
}

/// Mean of execution minus market price, paired point by point
pub fn slippage(execution: &[f64], market: &[f64]) -> Result<Option<f64>> {
    if execution.len() != market.len() {
        return Err(Error::InvalidParameter(format!(
            "execution and market prices must have the same length ({} vs {})",
            execution.len(),
            market.len()
        )));
    }
    let diffs: Vec<f64> = execution.iter().zip(market).map(|(e, m)| e - m).collect();
    Ok(mean(&diffs))
}

/// Quantity-weighted adverse slippage of filled orders against a reference price.
/// Positive means buys paid above it or sells received below it.
pub fn fill_slippage(orders: &[Order], reference: Price) -> Option<f64> {
    let reference = reference.as_f64();
    let (mut cost, mut filled) = (0.0, 0.0);
    for order in orders {
        let Some(avg) = order.avg_fill_price else { continue };
        let qty = order.filled_quantity.as_f64();
        if qty <= 0.0 {
            continue;
        }
        let diff = match order.side {
            Side::Buy => avg.as_f64() - reference,
            Side::Sell => reference - avg.as_f64(),
        };
        cost += diff * qty;
        filled += qty;
    }
    if filled == 0.0 {
        return None;
    }
    Some(cost / filled)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradeStats {
    pub trades: usize,
    pub win_loss_ratio: f64,
    pub profit_factor: f64,
    pub expectancy: Option<f64>,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
}

impl TradeStats {
    pub fn from_trades(trades: &[f64]) -> Self {
        let (max_consecutive_wins, max_consecutive_losses) = max_consecutive(trades);
        Self {
            trades: trades.len(),
            win_loss_ratio: win_loss_ratio(trades),
            profit_factor: profit_factor(trades),
            expectancy: expectancy(trades),
            max_consecutive_wins,
            max_consecutive_losses,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub sharpe_ratio: Option<f64>,
    pub sortino_ratio: Option<f64>,
    pub volatility: Option<f64>,
    pub drawdown: Option<Drawdown>,
    pub trades: Option<TradeStats>,
    pub slippage: Option<f64>,
}

impl PerformanceSummary {
    pub fn new(equity: &[f64], returns: &[f64]) -> Self {
        Self {
            sharpe_ratio: sharpe_ratio(returns, 0.0),
            sortino_ratio: sortino_ratio(returns, 0.0),
            volatility: annualized_volatility(returns, PERIODS_PER_YEAR),
            drawdown: drawdown(equity),
            trades: None,
            slippage: None,
        }
    }

    pub fn with_trades(mut self, trades: &[f64]) -> Self {
        self.trades = Some(TradeStats::from_trades(trades));
        self
    }

    pub fn with_slippage(mut self, slippage: Option<f64>) -> Self {
        self.slippage = slippage;
        self
    }
}

fn opt(f: &mut fmt::Formatter<'_>, label: &str, value: Option<f64>) -> fmt::Result {
    match value {
        Some(v) => writeln!(f, "{}: {:.4}", label, v),
        None => writeln!(f, "{}: n/a", label),
    }
}

impl fmt::Display for PerformanceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Performance Summary")?;
        opt(f, "Sharpe Ratio", self.sharpe_ratio)?;
        opt(f, "Sortino Ratio", self.sortino_ratio)?;
        opt(f, "Volatility", self.volatility)?;
        opt(f, "Max Drawdown", self.drawdown.map(|d| d.max_drawdown))?;
        if let Some(t) = &self.trades {
            writeln!(f, "Trades: {}", t.trades)?;
            writeln!(f, "Win/Loss Ratio: {:.2}", t.win_loss_ratio)?;
            writeln!(f, "Profit Factor: {:.2}", t.profit_factor)?;
            opt(f, "Expectancy", t.expectancy)?;
            writeln!(f, "Max Consecutive Wins: {}", t.max_consecutive_wins)?;
            writeln!(f, "Max Consecutive Losses: {}", t.max_consecutive_losses)?;
        }
        opt(f, "Slippage", self.slippage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OrderRequest, OrderStatus, Quantity};
    use rust_decimal_macros::dec;

    const TRADES: [f64; 7] = [10.0, 5.0, -3.0, -2.0, -1.0, 8.0, 0.0];

    #[test]
    fn test_ratios() {
        assert_eq!(sharpe_ratio(&[], 0.0), None);
        assert_eq!(sharpe_ratio(&[0.01, 0.01], 0.0), None);
        // mean 0.01, population sd 0.02
        let sharpe = sharpe_ratio(&[0.03, -0.01], 0.0).unwrap();
        assert!((sharpe - 0.5).abs() < 1e-12);

        // one downside point has no dispersion
        assert_eq!(sortino_ratio(&[0.03, -0.01], 0.0), None);
        // downside [-0.01, -0.03]: sd 0.01, mean of all 0.0
        let sortino = sortino_ratio(&[0.04, -0.01, -0.03, 0.0], 0.0).unwrap();
        assert!(sortino.abs() < 1e-12);
        let sortino = sortino_ratio(&[0.08, -0.01, -0.03, 0.0], 0.0).unwrap();
        assert!((sortino - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_drawdown_and_recovery() {
        assert_eq!(drawdown(&[]), None);
        let flat = drawdown(&[100.0, 101.0, 102.0]).unwrap();
        assert_eq!(flat.max_drawdown, 0.0);

        let dd = drawdown(&[100.0, 120.0, 90.0, 110.0, 121.0]).unwrap();
        assert!((dd.max_drawdown - 0.25).abs() < 1e-12);
        assert_eq!(dd.recovery, Some(2));

        let dd = drawdown(&[100.0, 80.0, 90.0]).unwrap();
        assert_eq!(dd.recovery, None);
    }

    #[test]
    fn test_trade_stats() {
        assert!((win_loss_ratio(&TRADES) - 1.0).abs() < 1e-12);
        assert!((profit_factor(&TRADES) - 23.0 / 6.0).abs() < 1e-12);
        assert!((expectancy(&TRADES).unwrap() - 17.0 / 7.0).abs() < 1e-12);
        assert_eq!(max_consecutive(&TRADES), (2, 3));

        assert_eq!(win_loss_ratio(&[1.0, 2.0]), f64::INFINITY);
        assert_eq!(profit_factor(&[1.0]), f64::INFINITY);
        assert_eq!(expectancy(&[]), None);
    }

    #[test]
    fn test_slippage_requires_paired_prices() {
        let s = slippage(&[100.1, 99.8], &[100.0, 100.0]).unwrap().unwrap();
        assert!((s - (-0.05)).abs() < 1e-9);
        assert_eq!(slippage(&[], &[]).unwrap(), None);
        assert!(matches!(slippage(&[1.0], &[]), Err(Error::InvalidParameter(_))));
    }

    fn filled(side: Side, qty: rust_decimal::Decimal, price: rust_decimal::Decimal) -> Order {
        let mut o = Order::new(OrderRequest::market("AAPL", side, Quantity::new(qty)));
        o.transition(OrderStatus::Open).unwrap();
        o.apply_fill(Quantity::new(qty), Price::new(price)).unwrap();
        o
    }

    #[test]
    fn test_fill_slippage_is_side_aware() {
        let orders = vec![
            filled(Side::Buy, dec!(10), dec!(100.02)),
            filled(Side::Buy, dec!(30), dec!(100.06)),
            Order::new(OrderRequest::market("AAPL", Side::Buy, Quantity::new(dec!(5)))),
        ];
        // (10 * 0.02 + 30 * 0.06) / 40
        let s = fill_slippage(&orders, Price::new(dec!(100))).unwrap();
        assert!((s - 0.05).abs() < 1e-9);

        let sells = vec![filled(Side::Sell, dec!(10), dec!(99.9))];
        let s = fill_slippage(&sells, Price::new(dec!(100))).unwrap();
        assert!((s - 0.1).abs() < 1e-9);
        assert_eq!(fill_slippage(&orders[2..], Price::new(dec!(100))), None);
    }

    #[test]
    fn test_summary_report() {
        let equity = [100.0, 103.0, 101.0, 106.0];
        let returns = [0.03, -0.0194, 0.0495];
        let summary = PerformanceSummary::new(&equity, &returns)
            .with_trades(&TRADES)
            .with_slippage(Some(0.05));
        assert!(summary.sharpe_ratio.is_some());
        assert_eq!(summary.trades.as_ref().unwrap().trades, 7);

        let text = summary.to_string();
        assert!(text.contains("Max Consecutive Losses: 3"));
        assert!(text.contains("Sortino Ratio: n/a"));
        assert!(text.contains("Slippage: 0.0500"));
    }
}
