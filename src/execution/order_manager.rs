//! Order manager - owns every order's lifecycle between callers and the venue

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::{
    Error, Exchange, ExecutionReport, Order, OrderRequest, OrderStatus, OrderType, Price, Quantity,
    Result, Side,
};
use crate::monitoring::LatencyMonitor;
use crate::risk::RiskLimits;

/// Order counts per status
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrderSummary {
    pub total: usize,
    pub by_status: HashMap<OrderStatus, usize>,
}

impl OrderSummary {
    pub fn count(&self, status: OrderStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Order manager - handles order lifecycle
pub struct OrderManager {
    exchange: Arc<dyn Exchange>,
    orders: Arc<RwLock<HashMap<Uuid, Order>>>,
    risk: Option<Arc<Mutex<RiskLimits>>>,
    latency: Option<Arc<LatencyMonitor>>,
}

impl OrderManager {
    pub fn new(exchange: Arc<dyn Exchange>) -> Self {
        Self {
            exchange,
            orders: Arc::new(RwLock::new(HashMap::new())),
            risk: None,
            latency: None,
        }
    }

    /// Run every new order through `risk` and feed it fills
    pub fn with_risk(mut self, risk: Arc<Mutex<RiskLimits>>) -> Self {
        self.risk = Some(risk);
        self
    }

    /// Time exchange round-trips
    pub fn with_latency(mut self, monitor: Arc<LatencyMonitor>) -> Self {
        self.latency = Some(monitor);
        self
    }

    pub fn exchange(&self) -> &Arc<dyn Exchange> {
        &self.exchange
    }

    /// Validate, gate, store and send a new order
    pub async fn create_order(&self, request: OrderRequest) -> Result<Order> {
        if !request.quantity.is_positive() {
            return Err(Error::InvalidParameter(format!(
                "order quantity must be positive, got {}",
                request.quantity
            )));
        }
        if request.order_type == OrderType::Limit
            && !request.price.is_some_and(|p| p.is_positive())
        {
            return Err(Error::InvalidParameter(
                "limit order requires a positive price".into(),
            ));
        }

        let mut order = Order::new(request);
        let id = order.id;

        if let Some(risk) = &self.risk {
            let verdict = risk.lock().check_order(&order, Utc::now());
            if let Err(e) = verdict {
                warn!(order_id = %id, symbol = %order.symbol, "🛑 Risk gate refused order: {}", e);
                order.reject(e.to_string())?;
                self.log_order("CREATE", &order);
                self.orders.write().insert(id, order);
                return Err(Error::Risk(e));
            }
        }

        self.orders.write().insert(id, order.clone());
        self.log_order("CREATE", &order);

        match self.timed(self.exchange.place_order(&order)).await {
            Ok(ack) => self.process_update(ack),
            Err(e) => {
                warn!(order_id = %id, "❌ Send failed: {}", e);
                if let Some(o) = self.orders.write().get_mut(&id) {
                    if o.status.is_active() && o.reject(e.to_string()).is_err() {
                        debug!(order_id = %id, "order moved on before reject");
                    }
                }
                Err(e)
            }
        }
    }

    /// Cancel an active order at the venue, then locally
    pub async fn cancel_order(&self, order_id: &Uuid) -> Result<Order> {
        let order = self.get_order(order_id).ok_or(Error::OrderNotFound(*order_id))?;
        if !order.is_active() {
            warn!(
                order_id = %order_id,
                "[ORDER MANAGER] Order cancel failed: status {}",
                order.status
            );
            return Err(Error::InvalidState(format!(
                "cannot cancel order {} in status {}",
                order_id, order.status
            )));
        }

        self.timed(self.exchange.cancel_order(order_id)).await?;

        // Fills the venue made before the cancel may still be in flight
        let remote = match self.timed(self.exchange.get_order(order_id)).await {
            Ok(remote) => Some(remote),
            Err(e) => {
                warn!(order_id = %order_id, "Post-cancel reconcile failed: {}", e);
                None
            }
        };

        let (cancelled, caught_up) = {
            let mut orders = self.orders.write();
            let o = orders.get_mut(order_id).ok_or(Error::OrderNotFound(*order_id))?;
            let mut caught_up = Quantity::ZERO;
            if let Some(remote) = remote.filter(|r| r.filled_quantity > o.filled_quantity) {
                caught_up = remote.filled_quantity - o.filled_quantity;
                o.filled_quantity = remote.filled_quantity;
                o.avg_fill_price = remote.avg_fill_price;
            }
            o.transition(OrderStatus::Cancelled)?;
            (o.clone(), caught_up)
        };
        if caught_up.is_positive() {
            info!(order_id = %order_id, "🔄 Booked {} filled before cancel", caught_up);
            self.book_position(cancelled.side, caught_up);
        }
        self.log_order("CANCEL", &cancelled);
        Ok(cancelled)
    }

    /// Replace price and quantity of an order that has no fills yet
    pub async fn modify_order(
        &self,
        order_id: &Uuid,
        new_price: Price,
        new_quantity: Quantity,
    ) -> Result<Order> {
        if !new_quantity.is_positive() || !new_price.is_positive() {
            return Err(Error::InvalidParameter(
                "modified price and quantity must be positive".into(),
            ));
        }

        let mut modified = self.get_order(order_id).ok_or(Error::OrderNotFound(*order_id))?;
        if !Self::modifiable(&modified) {
            warn!(
                order_id = %order_id,
                "[ORDER MANAGER] Order modification failed: status {}",
                modified.status
            );
            return Err(Error::InvalidState(format!(
                "cannot modify order {} in status {}",
                order_id, modified.status
            )));
        }

        modified.price = Some(new_price);
        modified.quantity = new_quantity;
        modified.updated_at = Utc::now();

        self.timed(self.exchange.modify_order(&modified)).await?;

        {
            let mut orders = self.orders.write();
            let current = orders.get_mut(order_id).ok_or(Error::OrderNotFound(*order_id))?;
            if !Self::modifiable(current) {
                return Err(Error::InvalidState(format!(
                    "order {} changed to {} during modify",
                    order_id, current.status
                )));
            }
            current.price = modified.price;
            current.quantity = modified.quantity;
            current.updated_at = modified.updated_at;
        }
        self.log_order("MODIFY", &modified);
        Ok(modified)
    }

    fn modifiable(order: &Order) -> bool {
        matches!(order.status, OrderStatus::Pending | OrderStatus::Open)
            && order.filled_quantity.is_zero()
    }

    /// Apply one execution report through the state machine
    pub fn process_update(&self, report: ExecutionReport) -> Result<Order> {
        let (updated, booked) = {
            let mut orders = self.orders.write();
            let order = orders.get_mut(&report.order_id).ok_or_else(|| {
                warn!(order_id = %report.order_id, "[ORDER MANAGER] Order update failed: not found");
                Error::OrderNotFound(report.order_id)
            })?;

            let mut booked = None;
            match (&report.fill, report.status) {
                // Already counted, by an earlier report or by cancel reconciliation
                (Some(fill), _) if fill.cumulative.is_some_and(|cum| cum <= order.filled_quantity) => {
                    debug!(order_id = %order.id, "fill already booked");
                }
                (Some(fill), _)
                    if matches!(order.status, OrderStatus::Cancelled | OrderStatus::Expired) =>
                {
                    order.apply_late_fill(fill.quantity, fill.price)?;
                    booked = Some(fill.quantity);
                }
                (Some(fill), _) => {
                    order.apply_fill(fill.quantity, fill.price)?;
                    booked = Some(fill.quantity);
                }
                (None, status) if status == order.status => {
                    debug!(order_id = %order.id, "duplicate {} report", status);
                }
                // Ack arriving after a fill from the same venue
                (None, OrderStatus::Open)
                    if matches!(order.status, OrderStatus::PartiallyFilled | OrderStatus::Filled) =>
                {
                    debug!(order_id = %order.id, "stale OPEN report");
                }
                (None, OrderStatus::Rejected) => {
                    order.reject(report.reason.clone().unwrap_or_else(|| "rejected by venue".into()))?
                }
                (None, status) => order.transition(status)?,
            }
            (order.clone(), booked)
        };

        if let Some(qty) = booked {
            self.book_position(updated.side, qty);
        }

        self.log_order("UPDATE", &updated);
        Ok(updated)
    }

    fn book_position(&self, side: Side, qty: Quantity) {
        if let Some(risk) = &self.risk {
            let delta = match side {
                Side::Buy => qty.as_f64(),
                Side::Sell => -qty.as_f64(),
            };
            risk.lock().update_position(delta);
        }
    }

    /// Consume venue reports until every sender is gone
    pub async fn run_event_loop(&self, reports: flume::Receiver<ExecutionReport>) {
        info!("📡 Order event loop started");
        while let Ok(report) = reports.recv_async().await {
            let id = report.order_id;
            if let Err(e) = self.process_update(report) {
                warn!(order_id = %id, "Execution report not applied: {}", e);
            }
        }
        info!("📡 Order event loop stopped");
    }

    /// Adopt the venue's view of an order
    pub async fn sync_order(&self, order_id: &Uuid) -> Result<Order> {
        let remote = self.timed(self.exchange.get_order(order_id)).await?;

        let (synced, caught_up) = {
            let mut orders = self.orders.write();
            let local = orders.get_mut(order_id).ok_or(Error::OrderNotFound(*order_id))?;
            let caught_up = if remote.filled_quantity > local.filled_quantity {
                remote.filled_quantity - local.filled_quantity
            } else {
                Quantity::ZERO
            };
            if local.status != remote.status || local.filled_quantity != remote.filled_quantity {
                info!(
                    order_id = %order_id,
                    "🔄 Reconciled {} / {} -> {} / {}",
                    local.status, local.filled_quantity, remote.status, remote.filled_quantity
                );
            }
            local.status = remote.status;
            local.filled_quantity = remote.filled_quantity;
            local.avg_fill_price = remote.avg_fill_price;
            local.quantity = remote.quantity;
            local.price = remote.price;
            if remote.reject_reason.is_some() {
                local.reject_reason = remote.reject_reason;
            }
            local.updated_at = Utc::now();
            (local.clone(), caught_up)
        };
        if caught_up.is_positive() {
            self.book_position(synced.side, caught_up);
        }
        self.log_order("SYNC", &synced);
        Ok(synced)
    }

    /// Get order by ID
    pub fn get_order(&self, order_id: &Uuid) -> Option<Order> {
        self.orders.read().get(order_id).cloned()
    }

    /// All orders, oldest first
    pub fn all_orders(&self) -> Vec<Order> {
        self.collect(|_| true)
    }

    pub fn active_orders(&self) -> Vec<Order> {
        self.collect(|o| o.is_active())
    }

    pub fn filled_orders(&self) -> Vec<Order> {
        self.collect(|o| o.status == OrderStatus::Filled)
    }

    /// Child orders submitted by an execution algorithm run
    pub fn children_of(&self, parent_id: &Uuid) -> Vec<Order> {
        self.collect(|o| o.parent_id.as_ref() == Some(parent_id))
    }

    pub fn is_order_active(&self, order_id: &Uuid) -> bool {
        self.orders.read().get(order_id).is_some_and(|o| o.is_active())
    }

    /// Log one SUMMARY line per order and return the per-status counts
    pub fn summary(&self) -> OrderSummary {
        let orders = self.all_orders();
        info!("[ORDER MANAGER] Order Summary: {} orders", orders.len());

        let mut summary = OrderSummary {
            total: orders.len(),
            ..Default::default()
        };
        for order in &orders {
            self.log_order("SUMMARY", order);
            *summary.by_status.entry(order.status).or_insert(0) += 1;
        }
        summary
    }

    fn collect(&self, keep: impl Fn(&Order) -> bool) -> Vec<Order> {
        let mut out: Vec<Order> = self.orders.read().values().filter(|o| keep(o)).cloned().collect();
        out.sort_by_key(|o| o.created_at);
        out
    }

    async fn timed<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        match &self.latency {
            Some(monitor) => monitor.measure(fut).await,
            None => fut.await,
        }
    }

    fn log_order(&self, action: &str, order: &Order) {
        info!(
            action,
            order_id = %order.id,
            symbol = %order.symbol,
            side = %order.side,
            price = ?order.price.map(|p| p.as_decimal()),
            quantity = %order.quantity,
            filled = %order.filled_quantity,
            status = %order.status,
            "[ORDER MANAGER]"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{RiskConfig, SymbolConfig};
    use crate::exchanges::SimulatedExchange;
    use rust_decimal_macros::dec;

    fn venue() -> Arc<SimulatedExchange> {
        Arc::new(SimulatedExchange::new(
            7,
            vec![SymbolConfig {
                symbol: "AAPL".into(),
                initial_price: 150.0,
                spread: 0.02,
                volatility: 0.0,
                liquidity: 1_000.0,
            }],
        ))
    }

    fn resting_buy(qty: rust_decimal::Decimal) -> OrderRequest {
        OrderRequest::limit("AAPL", Side::Buy, Quantity::new(qty), Price::new(dec!(140)))
    }

    #[tokio::test]
    async fn test_create_resting_limit_order() {
        let om = OrderManager::new(venue());
        let order = om.create_order(resting_buy(dec!(100))).await.unwrap();
        assert_eq!(order.status, OrderStatus::Open);
        assert!(om.is_order_active(&order.id));
        assert_eq!(om.active_orders().len(), 1);
    }

    #[tokio::test]
    async fn test_marketable_order_fills_on_ack() {
        let om = OrderManager::new(venue());
        let order = om
            .create_order(OrderRequest::market("AAPL", Side::Buy, Quantity::new(dec!(10))))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.avg_fill_price, Some(Price::new(dec!(150.01))));
        assert_eq!(om.filled_orders().len(), 1);
    }

    #[tokio::test]
    async fn test_validation() {
        let om = OrderManager::new(venue());
        let err = om.create_order(resting_buy(dec!(0))).await.unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));

        let mut req = resting_buy(dec!(1));
        req.price = None;
        assert!(matches!(om.create_order(req).await, Err(Error::InvalidParameter(_))));
        assert!(om.all_orders().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_active_only() {
        let om = OrderManager::new(venue());
        let order = om.create_order(resting_buy(dec!(100))).await.unwrap();
        let cancelled = om.cancel_order(&order.id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let err = om.cancel_order(&order.id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert!(matches!(
            om.cancel_order(&Uuid::new_v4()).await,
            Err(Error::OrderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_modify_keeps_identity() {
        let om = OrderManager::new(venue());
        let order = om.create_order(resting_buy(dec!(100))).await.unwrap();
        let modified = om
            .modify_order(&order.id, Price::new(dec!(141)), Quantity::new(dec!(80)))
            .await
            .unwrap();
        assert_eq!(modified.id, order.id);
        assert_eq!(modified.side, Side::Buy);
        assert_eq!(modified.price, Some(Price::new(dec!(141))));
        assert_eq!(om.get_order(&order.id).unwrap().quantity, Quantity::new(dec!(80)));

        let venue_view = om.exchange().get_order(&order.id).await.unwrap();
        assert_eq!(venue_view.quantity, Quantity::new(dec!(80)));
    }

    #[tokio::test]
    async fn test_modify_refused_after_fill() {
        let om = OrderManager::new(venue());
        let order = om.create_order(resting_buy(dec!(100))).await.unwrap();
        om.process_update(ExecutionReport::fill(
            order.id,
            OrderStatus::PartiallyFilled,
            Quantity::new(dec!(10)),
            Price::new(dec!(140)),
        ))
        .unwrap();
        let err = om
            .modify_order(&order.id, Price::new(dec!(141)), Quantity::new(dec!(80)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_process_update_paths() {
        let om = OrderManager::new(venue());
        let order = om.create_order(resting_buy(dec!(100))).await.unwrap();

        let o = om
            .process_update(ExecutionReport::fill(
                order.id,
                OrderStatus::PartiallyFilled,
                Quantity::new(dec!(50)),
                Price::new(dec!(140)),
            ))
            .unwrap();
        assert_eq!(o.status, OrderStatus::PartiallyFilled);

        // stale ack is ignored
        let o = om
            .process_update(ExecutionReport::status(order.id, OrderStatus::Open))
            .unwrap();
        assert_eq!(o.status, OrderStatus::PartiallyFilled);

        let err = om
            .process_update(ExecutionReport::fill(
                order.id,
                OrderStatus::Filled,
                Quantity::new(dec!(60)),
                Price::new(dec!(140)),
            ))
            .unwrap_err();
        assert!(matches!(err, Error::Trading(_)));

        let o = om
            .process_update(ExecutionReport::status(order.id, OrderStatus::Expired))
            .unwrap();
        assert_eq!(o.status, OrderStatus::Expired);

        assert!(matches!(
            om.process_update(ExecutionReport::status(Uuid::new_v4(), OrderStatus::Open)),
            Err(Error::OrderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_send_failure_rejects_order() {
        let ex = venue();
        ex.reject_next(1);
        let om = OrderManager::new(ex);
        let err = om.create_order(resting_buy(dec!(5))).await.unwrap_err();
        assert!(matches!(err, Error::Exchange(_)));

        let orders = om.all_orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Rejected);
        assert!(orders[0].reject_reason.is_some());
    }

    #[tokio::test]
    async fn test_risk_gate_rejects_and_tracks_fills() {
        let risk = Arc::new(Mutex::new(RiskLimits::new(RiskConfig {
            max_position_size: 50.0,
            max_orders_per_minute: 100,
            ..RiskConfig::default()
        })));
        let om = OrderManager::new(venue()).with_risk(risk.clone());

        om.create_order(OrderRequest::market("AAPL", Side::Buy, Quantity::new(dec!(40))))
            .await
            .unwrap();
        assert_eq!(risk.lock().position(), 40.0);

        let err = om
            .create_order(OrderRequest::market("AAPL", Side::Buy, Quantity::new(dec!(20))))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Risk(_)));
        assert_eq!(om.summary().count(OrderStatus::Rejected), 1);
    }

    #[tokio::test]
    async fn test_event_loop_applies_venue_fills() {
        let ex = venue();
        let reports = ex.executions();
        let om = Arc::new(OrderManager::new(ex.clone()));

        let order = om
            .create_order(OrderRequest::limit(
                "AAPL",
                Side::Buy,
                Quantity::new(dec!(100)),
                Price::new(dec!(150.005)),
            ))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Open);

        ex.set_price(&"AAPL".into(), 149.0).unwrap();
        ex.tick();

        let loop_om = om.clone();
        let handle = tokio::spawn(async move { loop_om.run_event_loop(reports).await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(om.get_order(&order.id).unwrap().status, OrderStatus::Filled);
        handle.abort();
    }

    #[tokio::test]
    async fn test_fill_racing_a_cancel_is_kept() {
        let ex = Arc::new(SimulatedExchange::new(
            7,
            vec![SymbolConfig {
                symbol: "AAPL".into(),
                initial_price: 150.0,
                spread: 0.02,
                volatility: 0.0,
                liquidity: 30.0,
            }],
        ));
        let reports = ex.executions();
        let risk = Arc::new(Mutex::new(RiskLimits::new(RiskConfig::default())));
        let om = OrderManager::new(ex.clone()).with_risk(risk.clone());

        let order = om.create_order(resting_buy(dec!(100))).await.unwrap();
        ex.set_price(&"AAPL".into(), 139.0).unwrap();
        assert_eq!(ex.tick(), 1);

        // fill report still queued when the cancel lands
        let cancelled = om.cancel_order(&order.id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.filled_quantity, Quantity::new(dec!(30)));

        let late = om.process_update(reports.try_recv().unwrap()).unwrap();
        assert_eq!(late.filled_quantity, Quantity::new(dec!(30)));
        assert_eq!(late.status, OrderStatus::Cancelled);
        assert_eq!(risk.lock().position(), 30.0);

        let venue_view = om.exchange().get_order(&order.id).await.unwrap();
        assert_eq!(venue_view.filled_quantity, late.filled_quantity);
    }

    #[tokio::test]
    async fn test_late_fill_without_reconcile_is_booked() {
        let om = OrderManager::new(venue());
        let order = om.create_order(resting_buy(dec!(100))).await.unwrap();
        om.cancel_order(&order.id).await.unwrap();

        let o = om
            .process_update(ExecutionReport::fill(
                order.id,
                OrderStatus::PartiallyFilled,
                Quantity::new(dec!(20)),
                Price::new(dec!(140)),
            ))
            .unwrap();
        assert_eq!(o.status, OrderStatus::Cancelled);
        assert_eq!(o.filled_quantity, Quantity::new(dec!(20)));
    }

    #[tokio::test]
    async fn test_sync_and_children() {
        let ex = venue();
        let om = OrderManager::new(ex.clone());
        let parent = Uuid::new_v4();
        let child = om
            .create_order(resting_buy(dec!(10)).with_parent(parent))
            .await
            .unwrap();
        om.create_order(resting_buy(dec!(10))).await.unwrap();
        assert_eq!(om.children_of(&parent).len(), 1);

        ex.expire(&child.id).unwrap();
        let synced = om.sync_order(&child.id).await.unwrap();
        assert_eq!(synced.status, OrderStatus::Expired);
        assert_eq!(synced.parent_id, Some(parent));
    }

    #[tokio::test]
    async fn test_latency_is_recorded() {
        let monitor = Arc::new(LatencyMonitor::new(5.0, 10));
        let om = OrderManager::new(venue()).with_latency(monitor.clone());
        om.create_order(resting_buy(dec!(1))).await.unwrap();
        assert_eq!(monitor.session_summary().total_executions, 1);
    }
}
