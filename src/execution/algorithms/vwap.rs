//! VWAP - execute when the running volume-weighted price beats a target

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ExecutionSummary, StopReason};
use crate::core::config::VwapConfig;
use crate::core::{OrderRequest, OrderType, Price, Quantity, Result, Side};
use crate::execution::OrderManager;

/// Running sum of price·volume over volume
#[derive(Debug, Clone, Default)]
pub struct VwapTracker {
    total_volume: f64,
    total_price_volume: f64,
    samples: usize,
}

impl VwapTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-positive prices or volumes are ignored
    pub fn add_market_data(&mut self, price: f64, volume: f64) {
        if volume <= 0.0 || price <= 0.0 {
            debug!("ignoring market data {} x {}", price, volume);
            return;
        }
        self.total_price_volume += price * volume;
        self.total_volume += volume;
        self.samples += 1;
    }

    /// 0 until some volume has been seen
    pub fn vwap(&self) -> f64 {
        if self.total_volume == 0.0 {
            return 0.0;
        }
        self.total_price_volume / self.total_volume
    }

    pub fn total_volume(&self) -> f64 {
        self.total_volume
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VwapStatistics {
    pub executions: usize,
    pub non_executions: usize,
    pub executed_volume: f64,
    pub average_execution_price: Option<f64>,
}

/// Side-aware VWAP executor
pub struct VwapExecutor {
    side: Side,
    config: VwapConfig,
    tracker: VwapTracker,
    execution_prices: Vec<f64>,
    execution_volumes: Vec<f64>,
    non_executions: usize,
}

impl VwapExecutor {
    pub fn new(side: Side, config: VwapConfig) -> Self {
        Self {
            side,
            config,
            tracker: VwapTracker::new(),
            execution_prices: Vec::new(),
            execution_volumes: Vec::new(),
            non_executions: 0,
        }
    }

    pub fn add_market_data(&mut self, price: f64, volume: f64) {
        self.tracker.add_market_data(price, volume);
    }

    pub fn vwap(&self) -> f64 {
        self.tracker.vwap()
    }

    pub fn tracker(&self) -> &VwapTracker {
        &self.tracker
    }

    fn beats_target(&self, vwap: f64, target: f64) -> bool {
        match self.side {
            Side::Buy => vwap <= target,
            Side::Sell => vwap >= target,
        }
    }

    /// clamp(base · exp(-adverse / target), min, max) where `adverse` is how far
    /// the VWAP sits on the wrong side of the target
    pub fn execution_volume(&self, vwap: f64, target: f64) -> f64 {
        let adverse = match self.side {
            Side::Buy => vwap - target,
            Side::Sell => target - vwap,
        };
        (self.config.base_volume * (-adverse / target).exp())
            .clamp(self.config.min_volume, self.config.max_volume)
    }

    /// Decide one execution against `target`; returns the volume when executed
    pub fn execute(&mut self, target: f64) -> Option<f64> {
        let volume = self.decide(target)?;
        self.record_execution(self.tracker.vwap(), volume);
        Some(volume)
    }

    /// Volume to trade against `target`, without booking it as executed
    fn decide(&mut self, target: f64) -> Option<f64> {
        if self.tracker.samples() == 0 {
            self.non_executions += 1;
            info!("No market data yet, no execution.");
            return None;
        }
        if target <= 0.0 {
            self.non_executions += 1;
            warn!("Invalid target price {}, no execution.", target);
            return None;
        }

        let vwap = self.tracker.vwap();
        if self.beats_target(vwap, target) {
            Some(self.execution_volume(vwap, target))
        } else {
            self.non_executions += 1;
            info!(side = %self.side, "VWAP {:.4} misses target {:.4}, no execution.", vwap, target);
            None
        }
    }

    fn record_execution(&mut self, price: f64, volume: f64) {
        self.execution_prices.push(price);
        self.execution_volumes.push(volume);
        info!(side = %self.side, "Executing order at VWAP: {:.4}, Volume: {:.2}", price, volume);
    }

    /// Slice size as a share of observed market volume, capped by what is left
    pub fn participation_quantity(market_volume: Quantity, rate: f64, remaining: Quantity) -> Quantity {
        let rate = Decimal::try_from(rate).unwrap_or(Decimal::ZERO);
        let slice = Quantity::new((market_volume.as_decimal() * rate).floor());
        slice.min(remaining)
    }

    /// Decide against `target` and, when executing, submit the volume as a limit
    /// child order at the current VWAP. `template.quantity` caps the child size.
    pub async fn execute_with(
        &mut self,
        om: &OrderManager,
        template: OrderRequest,
        target: f64,
    ) -> Result<ExecutionSummary> {
        let parent_id = Uuid::new_v4();
        let mut summary = ExecutionSummary::new("VWAP", parent_id, template.quantity);

        let Some(volume) = self.decide(target) else {
            summary.stop_reason = StopReason::TargetNotMet;
            summary.finalize();
            return Ok(summary);
        };

        let quantity = Quantity::from_f64(volume).round_dp(0).min(template.quantity);
        let price = Price::from_f64(self.vwap()).round_dp(4);
        let request = OrderRequest {
            order_type: OrderType::Limit,
            side: self.side,
            quantity,
            price: Some(price),
            parent_id: Some(parent_id),
            ..template
        };

        let order = match om.create_order(request).await {
            Ok(order) => order,
            Err(e) => {
                self.non_executions += 1;
                return Err(e);
            }
        };
        self.record_execution(price.as_f64(), quantity.as_f64());
        summary.submitted = quantity;
        summary.child_orders.push(order.id);
        summary.completed = summary.submitted >= summary.requested;
        summary.stop_reason = if summary.completed {
            StopReason::Completed
        } else {
            StopReason::ScheduleExhausted
        };
        summary.finalize();
        Ok(summary)
    }

    pub fn statistics(&self) -> VwapStatistics {
        let executions = self.execution_prices.len();
        let stats = VwapStatistics {
            executions,
            non_executions: self.non_executions,
            executed_volume: self.execution_volumes.iter().sum(),
            average_execution_price: (executions > 0)
                .then(|| self.execution_prices.iter().sum::<f64>() / executions as f64),
        };
        info!(
            "Execution Statistics: executions {}, non-executions {}, executed volume {:.2}",
            stats.executions, stats.non_executions, stats.executed_volume
        );
        stats
    }

    /// Start a new session
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.execution_prices.clear();
        self.execution_volumes.clear();
        self.non_executions = 0;
        info!("VWAP execution reset for a new session.");
    }
}
