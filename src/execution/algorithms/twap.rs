//! TWAP - equal slices at a fixed interval over a time window

use rust_decimal::Decimal;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use super::{ExecutionSummary, StopReason};
use crate::core::config::TwapConfig;
use crate::core::{Error, OrderRequest, Quantity, Result};
use crate::execution::OrderManager;

/// Precomputed slice sizes
#[derive(Debug, Clone, PartialEq)]
pub struct TwapSchedule {
    total: Quantity,
    interval: Duration,
    duration: Duration,
    slices: Vec<Quantity>,
}

impl TwapSchedule {
    pub fn new(total: Quantity, interval: Duration, duration: Duration) -> Result<Self> {
        if !total.is_positive() {
            return Err(Error::InvalidParameter(
                "total order size must be greater than zero".into(),
            ));
        }
        if interval.is_zero() {
            return Err(Error::InvalidParameter(
                "time interval must be greater than zero".into(),
            ));
        }
        if duration < interval {
            return Err(Error::InvalidParameter(
                "total duration must be at least the time interval".into(),
            ));
        }

        let n = (duration.as_nanos() / interval.as_nanos()) as u64;
        let per_slice = (total.as_decimal() / Decimal::from(n)).ceil();

        let mut slices = Vec::with_capacity(n as usize);
        let mut scheduled = Decimal::ZERO;
        for _ in 0..n {
            let volume = per_slice.min(total.as_decimal() - scheduled);
            if volume <= Decimal::ZERO {
                break;
            }
            slices.push(Quantity::new(volume));
            scheduled += volume;
        }

        let schedule = Self {
            total,
            interval,
            duration,
            slices,
        };
        info!("Order Schedule: {:?}", schedule.slices.iter().map(|q| q.to_string()).collect::<Vec<_>>());
        Ok(schedule)
    }

    pub fn from_config(config: &TwapConfig) -> Result<Self> {
        Self::new(
            Quantity::from_f64(config.total_quantity),
            Duration::from_millis(config.interval_ms),
            Duration::from_millis(config.duration_ms),
        )
    }

    pub fn slices(&self) -> &[Quantity] {
        &self.slices
    }

    pub fn total(&self) -> Quantity {
        self.total
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

pub struct TwapExecutor {
    schedule: TwapSchedule,
}

impl TwapExecutor {
    pub fn new(schedule: TwapSchedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> &TwapSchedule {
        &self.schedule
    }

    /// Submit each slice as a child of a fresh parent id.
    ///
    /// `template` supplies symbol, side, type and price; its quantity is ignored.
    pub async fn execute(&self, om: &OrderManager, template: OrderRequest) -> ExecutionSummary {
        let parent_id = Uuid::new_v4();
        let mut summary = ExecutionSummary::new("TWAP", parent_id, self.schedule.total);
        let start = Instant::now();

        info!(parent_id = %parent_id, symbol = %template.symbol, "⏱️ Starting TWAP execution...");

        let n = self.schedule.slices.len();
        for (i, &volume) in self.schedule.slices.iter().enumerate() {
            if start.elapsed() >= self.schedule.duration {
                warn!(parent_id = %parent_id, "Total execution time exceeded. Ending execution.");
                summary.stop_reason = StopReason::DurationElapsed;
                break;
            }

            let request = OrderRequest {
                quantity: volume,
                parent_id: Some(parent_id),
                ..template.clone()
            };
            match om.create_order(request).await {
                Ok(order) => {
                    summary.submitted += volume;
                    summary.child_orders.push(order.id);
                    info!(parent_id = %parent_id, slice = i + 1, "Executed slice of volume: {}", volume);
                }
                Err(e) => warn!(parent_id = %parent_id, slice = i + 1, "Error executing order slice: {}", e),
            }

            if summary.submitted >= summary.requested {
                break;
            }
            if i + 1 < n {
                tokio::time::sleep(self.schedule.interval).await;
            }
        }

        summary.completed = summary.submitted >= summary.requested;
        if summary.completed {
            summary.stop_reason = StopReason::Completed;
            info!(parent_id = %parent_id, "TWAP execution complete. Total executed volume: {}", summary.submitted);
        }
        summary.finalize();
        summary
    }
}
