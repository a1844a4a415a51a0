//! Execution layer - Order lifecycle and execution algorithms

pub mod algorithms;
pub mod lifecycle;
pub mod order_manager;

pub use algorithms::{
    ExecutionSummary, IcebergControl, IcebergOrder, IcebergParams, StopReason, TwapExecutor,
    TwapSchedule, VwapExecutor, VwapStatistics, VwapTracker,
};
pub use lifecycle::can_transition;
pub use order_manager::{OrderManager, OrderSummary};
