//! Monitoring - latency tracking, market data anomaly detection and performance metrics

pub mod anomaly;
pub mod latency;
pub mod performance;

pub use anomaly::{AnomalyDetector, AnomalyKind};
pub use latency::{LatencyAlert, LatencyMonitor, LatencyStats, SessionSummary};
pub use performance::{Drawdown, PerformanceSummary, TradeStats};
