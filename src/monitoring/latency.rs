//! Latency monitor - rolling round-trip statistics with a self-raising threshold

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::core::config::LatencyConfig;

/// Sent on the alert channel the first time the average breaches the threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyAlert {
    pub average_ms: f64,
    pub threshold_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyStats {
    pub samples: usize,
    pub average_ms: f64,
    pub std_dev_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub threshold_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub total_executions: u64,
    pub elapsed_secs: f64,
    pub average_ms: f64,
    pub high_latency_count: u64,
    pub high_latency_pct: f64,
}

impl std::fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Monitoring Session Summary:")?;
        writeln!(f, "Total Executions: {}", self.total_executions)?;
        writeln!(f, "Elapsed Time: {:.2} seconds", self.elapsed_secs)?;
        writeln!(f, "Average Latency: {:.4} ms", self.average_ms)?;
        write!(
            f,
            "High Latency Count: {} ({:.2}%)",
            self.high_latency_count, self.high_latency_pct
        )
    }
}

struct State {
    latencies: VecDeque<f64>,
    threshold_ms: f64,
    high_latency_count: u64,
    total_executions: u64,
    alert_triggered: bool,
}

/// Thread-safe latency monitor; share it as `Arc<LatencyMonitor>`.
pub struct LatencyMonitor {
    window: usize,
    started: Instant,
    state: Mutex<State>,
    alert_tx: Option<flume::Sender<LatencyAlert>>,
}

impl LatencyMonitor {
    pub fn new(threshold_ms: f64, window: usize) -> Self {
        Self {
            window: window.max(1),
            started: Instant::now(),
            state: Mutex::new(State {
                latencies: VecDeque::with_capacity(window.max(1)),
                threshold_ms,
                high_latency_count: 0,
                total_executions: 0,
                alert_triggered: false,
            }),
            alert_tx: None,
        }
    }

    pub fn from_config(config: &LatencyConfig) -> Self {
        Self::new(config.threshold_ms, config.window)
    }

    /// Deliver alerts on `tx` in addition to the error log
    pub fn with_alerts(mut self, tx: flume::Sender<LatencyAlert>) -> Self {
        self.alert_tx = Some(tx);
        self
    }

    pub fn record(&self, latency_ms: f64) {
        let mut state = self.state.lock();
        if state.latencies.len() == self.window {
            state.latencies.pop_front();
        }
        state.latencies.push_back(latency_ms);
        state.total_executions += 1;
        tracing::debug!("Latency recorded: {:.4} ms", latency_ms);
    }

    pub fn average(&self) -> f64 {
        mean(&self.state.lock().latencies)
    }

    /// Sample standard deviation (0 with fewer than two samples)
    pub fn std_dev(&self) -> f64 {
        sample_std(&self.state.lock().latencies)
    }

    /// Nearest-rank percentile using index `floor(len * p / 100)`
    pub fn percentile(&self, p: f64) -> f64 {
        percentile(&self.state.lock().latencies, p)
    }

    pub fn threshold(&self) -> f64 {
        self.state.lock().threshold_ms
    }

    pub fn is_alert_triggered(&self) -> bool {
        self.state.lock().alert_triggered
    }

    /// False (and counted) when the rolling average is above the threshold
    pub fn check_threshold(&self) -> bool {
        let mut state = self.state.lock();
        let avg = mean(&state.latencies);
        if avg > state.threshold_ms {
            state.high_latency_count += 1;
            warn!("Latency threshold exceeded: {:.4} ms", avg);
            return false;
        }
        true
    }

    /// Raise the threshold to mean + 2σ when that is higher. Never lowers it.
    pub fn adjust_threshold(&self) {
        let mut state = self.state.lock();
        let std = sample_std(&state.latencies);
        if std > 0.0 {
            let candidate = mean(&state.latencies) + 2.0 * std;
            if candidate > state.threshold_ms {
                info!(
                    "Adjusting latency threshold from {:.4} ms to {:.4} ms",
                    state.threshold_ms, candidate
                );
                state.threshold_ms = candidate;
            }
        }
    }

    /// Alert once until `reset_alert`
    pub fn trigger_alert(&self) {
        let alert = {
            let mut state = self.state.lock();
            if state.alert_triggered {
                return;
            }
            state.alert_triggered = true;
            LatencyAlert {
                average_ms: mean(&state.latencies),
                threshold_ms: state.threshold_ms,
            }
        };

        error!("🚨 ALERT: High latency detected. Average latency: {:.4} ms", alert.average_ms);
        if let Some(tx) = &self.alert_tx {
            if tx.try_send(alert).is_err() {
                warn!("Latency alert channel unavailable");
            }
        }
    }

    pub fn reset_alert(&self) {
        self.state.lock().alert_triggered = false;
        info!("Latency alert reset");
    }

    /// Time `fut`, record it, then run the threshold, alert and adjustment steps
    pub async fn measure<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let start = Instant::now();
        let out = fut.await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        self.record(elapsed_ms);
        if !self.check_threshold() {
            self.trigger_alert();
        }
        self.adjust_threshold();
        out
    }

    pub fn statistics(&self) -> LatencyStats {
        let state = self.state.lock();
        let stats = LatencyStats {
            samples: state.latencies.len(),
            average_ms: mean(&state.latencies),
            std_dev_ms: sample_std(&state.latencies),
            p95_ms: percentile(&state.latencies, 95.0),
            p99_ms: percentile(&state.latencies, 99.0),
            threshold_ms: state.threshold_ms,
        };
        info!(
            "Latency Statistics: Average: {:.4} ms, Std Dev: {:.4} ms, 95th Percentile: {:.4} ms, 99th Percentile: {:.4} ms",
            stats.average_ms, stats.std_dev_ms, stats.p95_ms, stats.p99_ms
        );
        stats
    }

    pub fn session_summary(&self) -> SessionSummary {
        let state = self.state.lock();
        let high_latency_pct = if state.total_executions > 0 {
            state.high_latency_count as f64 / state.total_executions as f64 * 100.0
        } else {
            0.0
        };
        SessionSummary {
            total_executions: state.total_executions,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            average_ms: mean(&state.latencies),
            high_latency_count: state.high_latency_count,
            high_latency_pct,
        }
    }
}

fn mean(xs: &VecDeque<f64>) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn sample_std(xs: &VecDeque<f64>) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    var.sqrt()
}

fn percentile(xs: &VecDeque<f64>, p: f64) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = xs.iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = ((sorted.len() as f64 * p / 100.0).floor() as usize).min(sorted.len() - 1);
    sorted[idx]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_rolling_window_and_stats() {
        let m = LatencyMonitor::new(5.0, 3);
        for x in [1.0, 2.0, 3.0, 4.0] {
            m.record(x);
        }
        // 1.0 rolled out
        assert_eq!(m.average(), 3.0);
        assert!((m.std_dev() - 1.0).abs() < 1e-12);
        assert_eq!(m.percentile(0.0), 2.0);
        assert_eq!(m.percentile(100.0), 4.0);
        assert_eq!(m.session_summary().total_executions, 4);
    }

    #[test]
    fn test_empty_monitor() {
        let m = LatencyMonitor::new(5.0, 10);
        assert_eq!(m.average(), 0.0);
        assert_eq!(m.std_dev(), 0.0);
        assert_eq!(m.percentile(95.0), 0.0);
        assert!(m.check_threshold());
    }

    #[test]
    fn test_threshold_breach_counts() {
        let m = LatencyMonitor::new(5.0, 10);
        m.record(8.0);
        assert!(!m.check_threshold());
        m.record(1.0);
        assert!(m.check_threshold());
        let s = m.session_summary();
        assert_eq!(s.high_latency_count, 1);
        assert_eq!(s.high_latency_pct, 50.0);
    }

    #[test]
    fn test_adjust_threshold_only_raises() {
        let m = LatencyMonitor::new(5.0, 10);
        m.record(1.0);
        m.record(1.0);
        m.record(1.0);
        m.adjust_threshold();
        assert_eq!(m.threshold(), 5.0);

        m.record(10.0);
        m.adjust_threshold();
        // mean 3.25, sample std 4.5
        assert!((m.threshold() - 12.25).abs() < 1e-9);
    }

    #[test]
    fn test_alert_fires_once() {
        let (tx, rx) = flume::unbounded();
        let m = LatencyMonitor::new(5.0, 10).with_alerts(tx);
        m.record(9.0);
        m.trigger_alert();
        m.trigger_alert();
        assert_eq!(rx.len(), 1);
        assert!(m.is_alert_triggered());
        m.reset_alert();
        m.trigger_alert();
        assert_eq!(rx.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_measure_records_elapsed_time() {
        let (tx, rx) = flume::unbounded();
        let m = LatencyMonitor::new(5.0, 10).with_alerts(tx);
        let v = m
            .measure(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                7
            })
            .await;
        assert_eq!(v, 7);
        assert!(m.average() >= 20.0);
        assert_eq!(rx.try_recv().map(|a| a.threshold_ms), Ok(5.0));
        let summary = m.session_summary();
        assert_eq!(summary.high_latency_count, 1);
    }
}
