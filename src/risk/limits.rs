//! Risk Gate - hard pre-trade limits to prevent catastrophic losses.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::config::RiskConfig;
use crate::core::{Order, Side};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiskError {
    #[error("position {current} + order {delta} exceeds max position {max}")]
    PositionOverflow { current: f64, delta: f64, max: f64 },

    #[error("trade loss {0} exceeds max per-trade loss {1}")]
    TradeLossTooLarge(f64, f64),

    #[error("daily loss {0} exceeds max daily loss {1}")]
    DailyLossExceeded(f64, f64),

    #[error("{0} orders in the last minute (max {1})")]
    OrderRateExceeded(usize, usize),

    #[error("{metric} {value:.4} breaches limit {limit:.4}")]
    MetricBreached {
        metric: String,
        value: f64,
        limit: f64,
    },

    #[error("trading paused: {0}")]
    TradingPaused(String),
}

/// Snapshot of the gate's counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskSummary {
    pub current_position_size: f64,
    pub current_loss_per_day: f64,
    pub current_trade_loss: f64,
    pub orders_last_minute: usize,
    pub daily_limit_breached: bool,
}

impl std::fmt::Display for RiskSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Risk Summary:")?;
        writeln!(f, "  Current Position Size: {}", self.current_position_size)?;
        writeln!(f, "  Current Daily Loss: {}", self.current_loss_per_day)?;
        writeln!(f, "  Current Trade Loss: {}", self.current_trade_loss)?;
        writeln!(f, "  Orders Last Minute: {}", self.orders_last_minute)?;
        write!(f, "  Daily Limit Breached: {}", self.daily_limit_breached)
    }
}

/// Risk Gate - enforces trading limits before order submission.
#[derive(Debug)]
pub struct RiskLimits {
    config: RiskConfig,
    current_position_size: f64,
    current_loss_per_day: f64,
    current_trade_loss: f64,
    order_times: VecDeque<DateTime<Utc>>,
    daily_limit_breached: bool,
    closed_positions: Vec<(DateTime<Utc>, f64)>,
    paused: bool,
    pause_reason: Option<String>,
}

impl RiskLimits {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            current_position_size: 0.0,
            current_loss_per_day: 0.0,
            current_trade_loss: 0.0,
            order_times: VecDeque::new(),
            daily_limit_breached: false,
            closed_positions: Vec::new(),
            paused: false,
            pause_reason: None,
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn position(&self) -> f64 {
        self.current_position_size
    }

    pub fn can_take_position(&self, delta: f64) -> bool {
        if (self.current_position_size + delta).abs() > self.config.max_position_size {
            warn!(
                "PositionLimitExceeded: attempted {}, current {}",
                delta, self.current_position_size
            );
            return false;
        }
        true
    }

    /// Apply a signed position change (fills)
    pub fn update_position(&mut self, delta: f64) {
        self.current_position_size += delta;
        info!("PositionUpdate: new position size {}", self.current_position_size);
    }

    pub fn can_take_loss(&self, loss: f64) -> bool {
        if loss.abs() > self.config.max_loss_per_trade {
            warn!("TradeLossLimitExceeded: attempted trade loss {}", loss);
            return false;
        }
        true
    }

    pub fn record_trade_loss(&mut self, loss: f64) {
        self.current_trade_loss += loss;
        self.current_loss_per_day += loss;
        info!(
            "TradeLossUpdate: trade loss {}, daily loss {}",
            self.current_trade_loss, self.current_loss_per_day
        );
    }

    /// Returns false (and latches the breach flag) once the daily loss is exceeded
    pub fn check_daily_loss_limit(&mut self) -> bool {
        if self.current_loss_per_day.abs() > self.config.max_daily_loss {
            warn!("DailyLossLimitExceeded: {}", self.current_loss_per_day);
            self.daily_limit_breached = true;
            return false;
        }
        true
    }

    /// Fires when the position value has fallen to the (negative) threshold
    pub fn should_trigger_stop_loss(&self, position_value: f64) -> bool {
        if position_value <= self.config.stop_loss_threshold {
            warn!("StopLossTriggered: position value {}", position_value);
            return true;
        }
        false
    }

    /// Count an order against the sliding 60s window. A refused order is not counted.
    pub fn check_order_rate(&mut self, now: DateTime<Utc>) -> bool {
        let window_start = now - Duration::seconds(60);
        while self.order_times.front().is_some_and(|t| *t <= window_start) {
            self.order_times.pop_front();
        }

        if self.order_times.len() >= self.config.max_orders_per_minute {
            warn!("OrderRateLimitExceeded: {} orders in the last minute", self.order_times.len());
            return false;
        }
        self.order_times.push_back(now);
        true
    }

    pub fn close_position(&mut self, value: f64) {
        self.closed_positions.push((Utc::now(), value));
        self.current_position_size = 0.0;
        info!("PositionClosed: value {}", value);
    }

    pub fn closed_positions(&self) -> &[(DateTime<Utc>, f64)] {
        &self.closed_positions
    }

    pub fn reset_daily_limits(&mut self) {
        self.current_loss_per_day = 0.0;
        self.current_trade_loss = 0.0;
        self.daily_limit_breached = false;
        info!("DailyReset: daily risk limits have been reset");
    }

    pub fn summary(&self) -> RiskSummary {
        RiskSummary {
            current_position_size: self.current_position_size,
            current_loss_per_day: self.current_loss_per_day,
            current_trade_loss: self.current_trade_loss,
            orders_last_minute: self.order_times.len(),
            daily_limit_breached: self.daily_limit_breached,
        }
    }

    /// Daily loss, then order rate. Passing counts one order.
    pub fn evaluate(&mut self, now: DateTime<Utc>) -> Result<(), RiskError> {
        if !self.check_daily_loss_limit() {
            return Err(RiskError::DailyLossExceeded(
                self.current_loss_per_day,
                self.config.max_daily_loss,
            ));
        }
        if !self.check_order_rate(now) {
            return Err(RiskError::OrderRateExceeded(
                self.order_times.len(),
                self.config.max_orders_per_minute,
            ));
        }
        info!("RiskEvaluation passed: {:?}", self.summary());
        Ok(())
    }

    /// Gate used before an order leaves the order manager
    pub fn check_order(&mut self, order: &Order, now: DateTime<Utc>) -> Result<(), RiskError> {
        if self.paused {
            return Err(RiskError::TradingPaused(
                self.pause_reason.clone().unwrap_or_else(|| "unknown".into()),
            ));
        }

        let delta = match order.side {
            Side::Buy => order.quantity.as_f64(),
            Side::Sell => -order.quantity.as_f64(),
        };
        if !self.can_take_position(delta) {
            return Err(RiskError::PositionOverflow {
                current: self.current_position_size,
                delta,
                max: self.config.max_position_size,
            });
        }

        self.evaluate(now)
    }

    /// Pause all trading.
    pub fn pause(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("⏸️ Trading paused: {}", reason);
        self.paused = true;
        self.pause_reason = Some(reason);
    }

    /// Resume trading.
    pub fn resume(&mut self) {
        info!("▶️ Trading resumed");
        self.paused = false;
        self.pause_reason = None;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}
