//! Execution algorithms - slice a parent quantity into child orders

pub mod iceberg;
pub mod twap;
pub mod vwap;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::core::Quantity;

pub use iceberg::{IcebergControl, IcebergOrder, IcebergParams};
pub use twap::{TwapExecutor, TwapSchedule};
pub use vwap::{VwapExecutor, VwapStatistics, VwapTracker};

/// Why an algorithm run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// Whole parent quantity submitted
    Completed,
    /// Schedule ran out with some slices not submitted
    ScheduleExhausted,
    DurationElapsed,
    Cancelled,
    StopLoss,
    TakeProfit,
    /// VWAP was worse than the target
    TargetNotMet,
    SubmitFailed(String),
}

/// Outcome of one algorithm run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub algorithm: &'static str,
    pub parent_id: Uuid,
    pub requested: Quantity,
    pub submitted: Quantity,
    pub child_orders: Vec<Uuid>,
    pub completed: bool,
    pub stop_reason: StopReason,
}

impl ExecutionSummary {
    pub(crate) fn new(algorithm: &'static str, parent_id: Uuid, requested: Quantity) -> Self {
        Self {
            algorithm,
            parent_id,
            requested,
            submitted: Quantity::ZERO,
            child_orders: Vec::new(),
            completed: false,
            stop_reason: StopReason::ScheduleExhausted,
        }
    }

    pub fn remaining(&self) -> Quantity {
        self.requested - self.submitted
    }

    /// Log the closing line of a run
    pub fn finalize(&self) {
        if self.completed {
            info!(
                algorithm = self.algorithm,
                parent_id = %self.parent_id,
                children = self.child_orders.len(),
                "✅ Execution finalized, submitted {}",
                self.submitted
            );
        } else {
            info!(
                algorithm = self.algorithm,
                parent_id = %self.parent_id,
                reason = ?self.stop_reason,
                "Finalizing execution with remaining volume: {}",
                self.remaining()
            );
        }
    }
}
