//! Iceberg - release a small visible slice at a time, with stop-loss and take-profit guards

use rand::rngs::StdRng;
use rand::Rng;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{ExecutionSummary, StopReason};
use crate::core::config::IcebergConfig;
use crate::core::{Error, OrderRequest, Price, Quantity, Result, Side, Symbol};
use crate::execution::OrderManager;

#[derive(Debug, Clone)]
pub struct IcebergParams {
    pub symbol: Symbol,
    pub side: Side,
    pub total: Quantity,
    pub visible: Quantity,
    pub limit_price: Price,
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl IcebergParams {
    /// Visible size and delay range from config; no stop-loss or take-profit
    pub fn from_config(
        config: &IcebergConfig,
        symbol: impl Into<Symbol>,
        side: Side,
        total: Quantity,
        limit_price: Price,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            total,
            visible: Quantity::from_f64(config.visible_size),
            limit_price,
            stop_loss: None,
            take_profit: None,
            min_delay: Duration::from_millis(config.min_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    pub fn with_guards(mut self, stop_loss: Option<Price>, take_profit: Option<Price>) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }
}

/// Pause/resume/cancel handle, cheap to clone across tasks
#[derive(Clone, Default)]
pub struct IcebergControl {
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl IcebergControl {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("Order execution paused.");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
        info!("Order execution resumed.");
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        info!("Order cancelled. Remaining quantity will not be released.");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn wait_while_paused(&self) {
        loop {
            let notified = self.notify.notified();
            if !self.is_paused() || self.is_cancelled() {
                return;
            }
            info!("Execution is paused. Waiting...");
            notified.await;
        }
    }

    /// Sleep for `delay` unless cancelled first
    async fn sleep(&self, delay: Duration) {
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = notified => {}
        }
    }
}

pub struct IcebergOrder {
    params: IcebergParams,
    control: IcebergControl,
    rng: StdRng,
    released: Quantity,
}

impl IcebergOrder {
    pub fn new(params: IcebergParams, rng: StdRng) -> Result<Self> {
        if !params.total.is_positive() || !params.visible.is_positive() {
            return Err(Error::InvalidParameter(
                "iceberg total and visible size must be positive".into(),
            ));
        }
        if !params.limit_price.is_positive() {
            return Err(Error::InvalidParameter("iceberg limit price must be positive".into()));
        }
        if params.min_delay > params.max_delay {
            return Err(Error::InvalidParameter("iceberg delay range is inverted".into()));
        }
        Ok(Self {
            params,
            control: IcebergControl::default(),
            rng,
            released: Quantity::ZERO,
        })
    }

    pub fn control(&self) -> IcebergControl {
        self.control.clone()
    }

    pub fn released(&self) -> Quantity {
        self.released
    }

    pub fn remaining(&self) -> Quantity {
        self.params.total - self.released
    }

    /// Quantity not yet shown to the market beyond the next visible slice
    pub fn hidden_quantity(&self) -> Quantity {
        let hidden = self.remaining() - self.params.visible;
        if hidden.is_positive() { hidden } else { Quantity::ZERO }
    }

    pub fn progress_pct(&self) -> f64 {
        let pct = self.released.as_decimal() / self.params.total.as_decimal() * Decimal::ONE_HUNDRED;
        Quantity::new(pct).as_f64()
    }

    fn stop_loss_hit(&self, price: Price) -> bool {
        match (self.params.stop_loss, self.params.side) {
            (Some(stop), Side::Buy) => price <= stop,
            (Some(stop), Side::Sell) => price >= stop,
            (None, _) => false,
        }
    }

    fn take_profit_hit(&self, price: Price) -> bool {
        match (self.params.take_profit, self.params.side) {
            (Some(tp), Side::Buy) => price >= tp,
            (Some(tp), Side::Sell) => price <= tp,
            (None, _) => false,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let lo = self.params.min_delay.as_millis() as u64;
        let hi = self.params.max_delay.as_millis() as u64;
        Duration::from_millis(self.rng.random_range(lo..=hi))
    }

    /// Pull every working slice and return the quantity actually filled across all slices
    async fn unwind_children(&self, om: &OrderManager, parent_id: Uuid) -> Quantity {
        let mut filled = Quantity::ZERO;
        for child in om.children_of(&parent_id) {
            let id = child.id;
            let child = if child.is_active() {
                match om.cancel_order(&id).await {
                    Ok(cancelled) => cancelled,
                    // venue may have finished it already
                    Err(e) => {
                        warn!(order_id = %id, "Slice cancel failed: {}", e);
                        om.sync_order(&id).await.unwrap_or(child)
                    }
                }
            } else {
                child
            };
            filled += child.filled_quantity;
        }
        filled
    }

    /// Run until the whole quantity is released, a guard fires or the run is cancelled
    pub async fn execute(&mut self, om: &OrderManager) -> Result<ExecutionSummary> {
        let parent_id = Uuid::new_v4();
        let mut summary = ExecutionSummary::new("ICEBERG", parent_id, self.params.total);
        let symbol = self.params.symbol.clone();

        info!(
            parent_id = %parent_id,
            symbol = %symbol,
            side = %self.params.side,
            "🧊 Iceberg started: total {}, visible {}",
            self.params.total,
            self.params.visible
        );

        loop {
            self.control.wait_while_paused().await;
            if self.control.is_cancelled() {
                summary.stop_reason = StopReason::Cancelled;
                break;
            }
            if !self.remaining().is_positive() {
                break;
            }

            let market_price = om.exchange().fetch_ticker(&symbol).await?.last;

            if self.stop_loss_hit(market_price) {
                warn!(parent_id = %parent_id, "Stop loss triggered at price {}", market_price);
                summary.stop_reason = StopReason::StopLoss;
                let filled = self.unwind_children(om, parent_id).await;
                if filled.is_positive() {
                    let flatten = OrderRequest::market(symbol.clone(), self.params.side.opposite(), filled)
                        .with_parent(parent_id);
                    match om.create_order(flatten).await {
                        Ok(order) => {
                            error!(parent_id = %parent_id, "Executing stop loss order for {} {}", filled, symbol);
                            summary.child_orders.push(order.id);
                        }
                        Err(e) => error!(parent_id = %parent_id, "Stop loss order failed: {}", e),
                    }
                }
                break;
            }

            if self.take_profit_hit(market_price) {
                info!(parent_id = %parent_id, "Take profit reached at price {}", market_price);
                summary.stop_reason = StopReason::TakeProfit;
                break;
            }

            let slice = self.params.visible.min(self.remaining());
            let request = OrderRequest::limit(symbol.clone(), self.params.side, slice, self.params.limit_price)
                .with_parent(parent_id);
            match om.create_order(request).await {
                Ok(order) => {
                    self.released += slice;
                    summary.child_orders.push(order.id);
                    info!(
                        parent_id = %parent_id,
                        "Released {} of {} at {}; hidden {}; progress {:.2}%",
                        slice,
                        symbol,
                        self.params.limit_price,
                        self.hidden_quantity(),
                        self.progress_pct()
                    );
                }
                Err(e) => {
                    error!(parent_id = %parent_id, "Iceberg slice failed: {}", e);
                    summary.stop_reason = StopReason::SubmitFailed(e.to_string());
                    break;
                }
            }

            if !self.remaining().is_positive() {
                break;
            }
            let delay = self.next_delay();
            self.control.sleep(delay).await;
        }

        summary.submitted = self.released;
        summary.completed = !self.remaining().is_positive();
        if summary.completed {
            summary.stop_reason = StopReason::Completed;
            info!(parent_id = %parent_id, "Execution completed successfully.");
        }
        summary.finalize();
        Ok(summary)
    }
}
