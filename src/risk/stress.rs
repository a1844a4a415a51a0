//! Stress testing - shock a static portfolio under market scenarios

use rand::Rng;
use serde::Serialize;
use std::fmt;

use crate::core::config::StressConfig;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StressAsset {
    pub name: String,
    pub value: f64,
    pub position_size: f64,
}

/// Market condition: fractional price change, volatility and liquidity in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarketScenario {
    pub price_change: f64,
    pub volatility: f64,
    pub liquidity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioResult {
    pub scenario: MarketScenario,
    pub portfolio_value: f64,
    /// Percent fall from the initial value (negative when the portfolio gained)
    pub drawdown_pct: f64,
    pub volatility_impact_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StressReport {
    pub initial_value: f64,
    pub results: Vec<ScenarioResult>,
}

impl StressReport {
    pub fn worst_drawdown(&self) -> Option<&ScenarioResult> {
        self.results
            .iter()
            .max_by(|a, b| a.drawdown_pct.total_cmp(&b.drawdown_pct))
    }
}

impl fmt::Display for StressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Stress Test Report")?;
        writeln!(f, "Initial Portfolio Value: {:.2}", self.initial_value)?;
        writeln!(f, "-----------------------------------------")?;
        for (i, r) in self.results.iter().enumerate() {
            writeln!(f, "Scenario {}:", i + 1)?;
            writeln!(f, " - Price Change: {:.2}%", r.scenario.price_change * 100.0)?;
            writeln!(f, " - Volatility: {:.2}%", r.scenario.volatility * 100.0)?;
            writeln!(f, " - Liquidity: {:.2}%", r.scenario.liquidity * 100.0)?;
            writeln!(f, " - Portfolio Value: {:.2}", r.portfolio_value)?;
            writeln!(f, " - Drawdown: {:.2}%", r.drawdown_pct)?;
            writeln!(f, " - Volatility Impact: {:.2}%", r.volatility_impact_pct)?;
            writeln!(f, "-----------------------------------------")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StressTest {
    assets: Vec<StressAsset>,
    scenarios: Vec<MarketScenario>,
}

impl StressTest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &StressConfig) -> Self {
        let mut test = Self::new();
        for a in &config.assets {
            test.add_asset(&a.name, a.value, a.position_size);
        }
        for s in &config.scenarios {
            test.add_scenario(s.price_change, s.volatility, s.liquidity);
        }
        test
    }

    pub fn add_asset(&mut self, name: &str, value: f64, position_size: f64) {
        self.assets.push(StressAsset {
            name: name.to_string(),
            value,
            position_size,
        });
    }

    pub fn add_scenario(&mut self, price_change: f64, volatility: f64, liquidity: f64) {
        self.scenarios.push(MarketScenario {
            price_change,
            volatility,
            liquidity,
        });
    }

    pub fn initial_value(&self) -> f64 {
        self.assets.iter().map(|a| a.value * a.position_size).sum()
    }

    /// shock = price change + volatility * U[0, 1); illiquid markets pass more of it through
    fn shocked_value<R: Rng>(asset: &StressAsset, scenario: &MarketScenario, rng: &mut R) -> f64 {
        let shock = scenario.price_change + scenario.volatility * rng.random::<f64>();
        let liquidity_factor = 1.0 - scenario.liquidity.clamp(0.0, 1.0);
        asset.value * (1.0 + shock * liquidity_factor) * asset.position_size
    }

    pub fn run<R: Rng>(&self, rng: &mut R) -> StressReport {
        let initial_value = self.initial_value();
        let results = self
            .scenarios
            .iter()
            .map(|scenario| {
                let portfolio_value: f64 = self
                    .assets
                    .iter()
                    .map(|a| Self::shocked_value(a, scenario, rng))
                    .sum();
                let drawdown_pct = if initial_value == 0.0 {
                    0.0
                } else {
                    (initial_value - portfolio_value) / initial_value * 100.0
                };
                ScenarioResult {
                    scenario: *scenario,
                    portfolio_value,
                    drawdown_pct,
                    volatility_impact_pct: scenario.volatility * 100.0,
                }
            })
            .collect();
        StressReport {
            initial_value,
            results,
        }
    }
}
