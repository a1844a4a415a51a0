//! Simulated venue - random-walk prices, touch matching, execution report stream

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::config::{SimulationConfig, SymbolConfig};
use crate::core::{
    Error, Exchange, ExecutionReport, Order, OrderStatus, OrderType, Price, Quantity, Result, Side,
    Symbol, Ticker,
};

/// Venue quotes are rounded to this many decimals
const PRICE_DP: u32 = 4;

struct Market {
    mid: f64,
    spread: f64,
    volatility: f64,
    liquidity: Quantity,
    /// Market volume printed on the last tick
    last_volume: Quantity,
    last: Price,
}

impl Market {
    fn bid(&self) -> Price {
        Price::from_f64(self.mid - self.spread / 2.0).round_dp(PRICE_DP)
    }

    fn ask(&self) -> Price {
        Price::from_f64(self.mid + self.spread / 2.0).round_dp(PRICE_DP)
    }

    /// Price a taker on `side` would pay or receive
    fn touch(&self, side: Side) -> Price {
        match side {
            Side::Buy => self.ask(),
            Side::Sell => self.bid(),
        }
    }

    fn marketable(&self, order: &Order) -> bool {
        match (order.order_type, order.price) {
            (OrderType::Market, _) => true,
            (OrderType::Limit, Some(limit)) => match order.side {
                Side::Buy => limit >= self.ask(),
                Side::Sell => limit <= self.bid(),
            },
            (OrderType::Limit, None) => false,
        }
    }
}

struct State {
    rng: StdRng,
    markets: HashMap<Symbol, Market>,
    orders: HashMap<Uuid, Order>,
    /// Resting order ids in arrival order (time priority)
    resting: Vec<Uuid>,
    reject_next: usize,
}

/// In-process exchange
pub struct SimulatedExchange {
    name: String,
    state: Mutex<State>,
    reports_tx: flume::Sender<ExecutionReport>,
    reports_rx: flume::Receiver<ExecutionReport>,
}

impl SimulatedExchange {
    pub fn new(seed: u64, symbols: Vec<SymbolConfig>) -> Self {
        let markets = symbols
            .into_iter()
            .map(|s| {
                let last = Price::from_f64(s.initial_price).round_dp(PRICE_DP);
                (
                    Symbol::new(s.symbol),
                    Market {
                        mid: s.initial_price,
                        spread: s.spread,
                        volatility: s.volatility,
                        liquidity: Quantity::from_f64(s.liquidity),
                        last_volume: Quantity::ZERO,
                        last,
                    },
                )
            })
            .collect();

        let (reports_tx, reports_rx) = flume::unbounded();
        Self {
            name: "simulated".to_string(),
            state: Mutex::new(State {
                rng: StdRng::seed_from_u64(seed),
                markets,
                orders: HashMap::new(),
                resting: Vec::new(),
                reject_next: 0,
            }),
            reports_tx,
            reports_rx,
        }
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(config.seed, config.symbols.clone())
    }

    /// Receiver for fills and status changes produced by `tick` and `expire`
    pub fn executions(&self) -> flume::Receiver<ExecutionReport> {
        self.reports_rx.clone()
    }

    /// Refuse the next `n` submissions with an exchange error
    pub fn reject_next(&self, n: usize) {
        self.state.lock().reject_next = n;
    }

    /// Pin a symbol's mid price
    pub fn set_price(&self, symbol: &Symbol, mid: f64) -> Result<()> {
        let mut state = self.state.lock();
        let market = state
            .markets
            .get_mut(symbol)
            .ok_or_else(|| Error::Exchange(format!("unknown symbol {}", symbol)))?;
        market.mid = mid;
        market.last = Price::from_f64(mid).round_dp(PRICE_DP);
        Ok(())
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        let mut out: Vec<Symbol> = self.state.lock().markets.keys().cloned().collect();
        out.sort();
        out
    }

    /// Advance every price one step and match resting orders.
    /// Returns the number of execution reports emitted.
    pub fn tick(&self) -> usize {
        let mut state = self.state.lock();
        let State {
            rng,
            markets,
            orders,
            resting,
            ..
        } = &mut *state;

        let mut symbols: Vec<Symbol> = markets.keys().cloned().collect();
        symbols.sort();
        for symbol in &symbols {
            if let Some(m) = markets.get_mut(symbol) {
                let shock = (rng.random::<f64>() - 0.5) * m.volatility;
                m.mid = (m.mid * (1.0 + shock)).max(0.01);
                m.last_volume = Quantity::from_f64(m.liquidity.as_f64() * rng.random_range(0.5..1.5));
                m.last = Price::from_f64(m.mid).round_dp(PRICE_DP);
            }
        }

        // Liquidity available this tick, per symbol and side
        let mut available: HashMap<(Symbol, Side), Quantity> = HashMap::new();
        let mut emitted = 0;

        for id in resting.iter() {
            let Some(order) = orders.get_mut(id) else { continue };
            let Some(market) = markets.get(&order.symbol) else { continue };
            if !order.is_active() || !market.marketable(order) {
                continue;
            }

            let avail = available
                .entry((order.symbol.clone(), order.side))
                .or_insert(market.liquidity);
            let qty = order.remaining().min(*avail);
            if qty.is_zero() {
                continue;
            }

            let price = market.touch(order.side);
            if let Err(e) = order.apply_fill(qty, price) {
                warn!(order_id = %id, "venue fill failed: {}", e);
                continue;
            }
            *avail -= qty;

            debug!(order_id = %id, %qty, %price, "venue fill");
            let report = ExecutionReport::fill(*id, order.status, qty, price)
                .with_cumulative(order.filled_quantity);
            if self.reports_tx.send(report).is_ok() {
                emitted += 1;
            }
        }

        resting.retain(|id| orders.get(id).is_some_and(|o| o.is_active()));
        emitted
    }

    /// Expire a working order (end of session), reporting it on the execution stream
    pub fn expire(&self, order_id: &Uuid) -> Result<()> {
        let mut state = self.state.lock();
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| Error::Exchange(format!("unknown order {}", order_id)))?;
        order
            .transition(OrderStatus::Expired)
            .map_err(|e| Error::Exchange(e.to_string()))?;
        state.resting.retain(|id| id != order_id);
        // receiver is owned by self, so send cannot fail
        let _ = self
            .reports_tx
            .send(ExecutionReport::status(*order_id, OrderStatus::Expired));
        Ok(())
    }
}

#[async_trait]
impl Exchange for SimulatedExchange {
    fn name(&self) -> &str {
        &self.name
    }

    async fn place_order(&self, order: &Order) -> Result<ExecutionReport> {
        let mut state = self.state.lock();

        if state.reject_next > 0 {
            state.reject_next -= 1;
            warn!(order_id = %order.id, "🚫 Simulated venue reject");
            return Err(Error::Exchange("simulated venue reject".into()));
        }
        if !order.quantity.is_positive() {
            return Err(Error::Exchange(format!("invalid quantity {}", order.quantity)));
        }
        if state.orders.contains_key(&order.id) {
            return Err(Error::Exchange(format!("duplicate order id {}", order.id)));
        }

        let market = state
            .markets
            .get(&order.symbol)
            .ok_or_else(|| Error::Exchange(format!("unknown symbol {}", order.symbol)))?;

        let mut venue_order = order.clone();
        venue_order.status = OrderStatus::Pending;
        venue_order.filled_quantity = Quantity::ZERO;
        venue_order.avg_fill_price = None;

        let fill_qty = if market.marketable(&venue_order) {
            venue_order.quantity.min(market.liquidity)
        } else {
            Quantity::ZERO
        };
        let price = market.touch(venue_order.side);

        let ack = if fill_qty.is_positive() {
            venue_order
                .apply_fill(fill_qty, price)
                .map_err(|e| Error::Exchange(e.to_string()))?;
            ExecutionReport::fill(order.id, venue_order.status, fill_qty, price)
                .with_cumulative(venue_order.filled_quantity)
        } else {
            venue_order
                .transition(OrderStatus::Open)
                .map_err(|e| Error::Exchange(e.to_string()))?;
            ExecutionReport::status(order.id, OrderStatus::Open)
        };

        info!(
            venue = %self.name,
            order_id = %order.id,
            symbol = %order.symbol,
            filled = %fill_qty,
            status = %venue_order.status,
            "📥 Order accepted"
        );

        if venue_order.is_active() {
            state.resting.push(order.id);
        }
        state.orders.insert(order.id, venue_order);
        Ok(ack)
    }

    async fn cancel_order(&self, order_id: &Uuid) -> Result<()> {
        let mut state = self.state.lock();
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| Error::Exchange(format!("unknown order {}", order_id)))?;
        if !order.is_active() {
            return Err(Error::Exchange(format!(
                "order {} is {} and cannot be cancelled",
                order_id, order.status
            )));
        }
        order
            .transition(OrderStatus::Cancelled)
            .map_err(|e| Error::Exchange(e.to_string()))?;
        state.resting.retain(|id| id != order_id);
        Ok(())
    }

    async fn modify_order(&self, order: &Order) -> Result<()> {
        let mut state = self.state.lock();
        let venue_order = state
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| Error::Exchange(format!("unknown order {}", order.id)))?;
        if !venue_order.is_active() || !venue_order.filled_quantity.is_zero() {
            return Err(Error::Exchange(format!(
                "order {} is {} and cannot be modified",
                order.id, venue_order.status
            )));
        }
        venue_order.price = order.price;
        venue_order.quantity = order.quantity;
        venue_order.updated_at = Utc::now();
        Ok(())
    }

    async fn get_order(&self, order_id: &Uuid) -> Result<Order> {
        self.state
            .lock()
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| Error::Exchange(format!("unknown order {}", order_id)))
    }

    async fn fetch_ticker(&self, symbol: &Symbol) -> Result<Ticker> {
        let state = self.state.lock();
        let m = state
            .markets
            .get(symbol)
            .ok_or_else(|| Error::Exchange(format!("unknown symbol {}", symbol)))?;
        Ok(Ticker {
            symbol: symbol.clone(),
            bid: m.bid(),
            ask: m.ask(),
            last: m.last,
            volume: m.last_volume,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::OrderRequest;
    use rust_decimal_macros::dec;

    fn venue(liquidity: f64, volatility: f64) -> SimulatedExchange {
        SimulatedExchange::new(
            1,
            vec![SymbolConfig {
                symbol: "AAPL".into(),
                initial_price: 100.0,
                spread: 0.1,
                volatility,
                liquidity,
            }],
        )
    }

    fn order(req: OrderRequest) -> Order {
        Order::new(req)
    }

    #[tokio::test]
    async fn test_market_order_partial_fill_rests_remainder() {
        let ex = venue(30.0, 0.0);
        let o = order(OrderRequest::market("AAPL", Side::Sell, Quantity::new(dec!(50))));
        let ack = ex.place_order(&o).await.unwrap();
        assert_eq!(ack.status, OrderStatus::PartiallyFilled);
        let fill = ack.fill.unwrap();
        assert_eq!(fill.quantity, Quantity::new(dec!(30)));
        assert_eq!(fill.price, Price::new(dec!(99.95)));

        let rx = ex.executions();
        assert_eq!(ex.tick(), 1);
        let report = rx.try_recv().unwrap();
        assert_eq!(report.status, OrderStatus::Filled);
        assert_eq!(report.fill.unwrap().quantity, Quantity::new(dec!(20)));
        assert_eq!(ex.get_order(&o.id).await.unwrap().status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn test_passive_limit_rests_until_marketable() {
        let ex = venue(1_000.0, 0.0);
        let o = order(OrderRequest::limit(
            "AAPL",
            Side::Buy,
            Quantity::new(dec!(10)),
            Price::new(dec!(99)),
        ));
        let ack = ex.place_order(&o).await.unwrap();
        assert_eq!(ack.status, OrderStatus::Open);
        assert!(ack.fill.is_none());
        assert_eq!(ex.tick(), 0);

        ex.set_price(&Symbol::new("AAPL"), 98.0).unwrap();
        assert_eq!(ex.tick(), 1);
        let fill = ex.executions().try_recv().unwrap().fill.unwrap();
        assert_eq!(fill.price, Price::new(dec!(98.05)));
    }

    #[tokio::test]
    async fn test_unknown_symbol_and_orders() {
        let ex = venue(100.0, 0.0);
        let o = order(OrderRequest::market("MSFT", Side::Buy, Quantity::new(dec!(1))));
        assert!(matches!(ex.place_order(&o).await, Err(Error::Exchange(_))));
        assert!(matches!(ex.cancel_order(&o.id).await, Err(Error::Exchange(_))));
        assert!(matches!(ex.get_order(&o.id).await, Err(Error::Exchange(_))));
        assert!(matches!(ex.fetch_ticker(&Symbol::new("MSFT")).await, Err(Error::Exchange(_))));
    }

    #[tokio::test]
    async fn test_cancel_and_modify_finished_orders_fail() {
        let ex = venue(100.0, 0.0);
        let o = order(OrderRequest::market("AAPL", Side::Buy, Quantity::new(dec!(1))));
        ex.place_order(&o).await.unwrap();
        assert!(ex.cancel_order(&o.id).await.is_err());
        assert!(ex.modify_order(&o).await.is_err());
    }

    #[tokio::test]
    async fn test_reject_next() {
        let ex = venue(100.0, 0.0);
        ex.reject_next(1);
        let a = order(OrderRequest::market("AAPL", Side::Buy, Quantity::new(dec!(1))));
        let b = order(OrderRequest::market("AAPL", Side::Buy, Quantity::new(dec!(1))));
        assert!(ex.place_order(&a).await.is_err());
        assert!(ex.place_order(&b).await.is_ok());
    }

    #[tokio::test]
    async fn test_seeded_walk_is_deterministic() {
        let a = venue(100.0, 0.01);
        let b = venue(100.0, 0.01);
        for _ in 0..20 {
            a.tick();
            b.tick();
        }
        let sym = Symbol::new("AAPL");
        let ta = a.fetch_ticker(&sym).await.unwrap();
        let tb = b.fetch_ticker(&sym).await.unwrap();
        assert_eq!(ta.mid(), tb.mid());
        assert!(ta.ask > ta.bid);
        assert!(ta.volume.is_positive());
    }

    #[tokio::test]
    async fn test_time_priority_shares_liquidity() {
        let ex = venue(15.0, 0.0);
        let first = order(OrderRequest::limit("AAPL", Side::Buy, Quantity::new(dec!(10)), Price::new(dec!(99))));
        let second = order(OrderRequest::limit("AAPL", Side::Buy, Quantity::new(dec!(10)), Price::new(dec!(99))));
        ex.place_order(&first).await.unwrap();
        ex.place_order(&second).await.unwrap();
        ex.set_price(&Symbol::new("AAPL"), 90.0).unwrap();
        assert_eq!(ex.tick(), 2);
        assert_eq!(ex.get_order(&first.id).await.unwrap().status, OrderStatus::Filled);
        let second = ex.get_order(&second.id).await.unwrap();
        assert_eq!(second.filled_quantity, Quantity::new(dec!(5)));
    }
}
