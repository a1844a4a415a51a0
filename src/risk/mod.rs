//! Risk management - pre-trade limits, portfolio risk, compliance and stress tests

pub mod compliance;
pub mod limits;
pub mod manager;
pub mod stress;

pub use compliance::{ComplianceMonitor, ComplianceReport, ComplianceViolation};
pub use limits::{RiskError, RiskLimits, RiskSummary};
pub use manager::{MetricLimit, RiskManager, RiskMetric, RiskReport, TradeRecord, TradeSummary};
pub use stress::{MarketScenario, StressReport, StressTest};
