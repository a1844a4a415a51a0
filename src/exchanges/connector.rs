//! Exchange connector - background session task with bounded order and market data queues
//!
//! The transports only log what they would put on the wire. Market data is
//! synthesised for subscribed symbols.

use parking_lot::RwLock;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::config::ExchangeConfig;
use crate::core::{Error, Order, Result, Symbol, Ticker};
use crate::feeds::SyntheticFeed;

/// Session protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Fix,
    WebSocket,
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fix" => Ok(Protocol::Fix),
            "websocket" | "ws" => Ok(Protocol::WebSocket),
            other => Err(Error::Config(format!("unknown protocol: {}", other))),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Fix => write!(f, "FIX"),
            Protocol::WebSocket => write!(f, "WebSocket"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

/// Wire session driven by the connector task
pub trait Transport: Send + 'static {
    fn connect(&mut self) -> Result<()>;

    fn send_order(&mut self, order: &Order) -> Result<()>;

    /// Next market data message for one of `subscriptions`, if any
    fn poll_market_data(&mut self, subscriptions: &[Symbol]) -> Option<Ticker>;

    fn disconnect(&mut self);
}

/// Rotates through subscriptions, one synthetic ticker per poll
struct SyntheticQuotes {
    feed: SyntheticFeed,
    cursor: usize,
}

impl SyntheticQuotes {
    fn new(seed: u64) -> Self {
        Self {
            feed: SyntheticFeed::new(seed),
            cursor: 0,
        }
    }

    fn next(&mut self, subscriptions: &[Symbol]) -> Option<Ticker> {
        if subscriptions.is_empty() {
            return None;
        }
        let symbol = &subscriptions[self.cursor % subscriptions.len()];
        self.cursor = self.cursor.wrapping_add(1);
        self.feed.ensure_symbol(symbol);
        self.feed.next_ticker(symbol)
    }
}

fn check_credentials(credentials: &Credentials) -> Result<()> {
    if credentials.api_key.is_empty() || credentials.api_secret.is_empty() {
        return Err(Error::Exchange("missing API credentials".into()));
    }
    Ok(())
}

pub struct FixTransport {
    credentials: Credentials,
    quotes: SyntheticQuotes,
    seq_num: u64,
}

impl FixTransport {
    pub fn new(credentials: Credentials, seed: u64) -> Self {
        Self {
            credentials,
            quotes: SyntheticQuotes::new(seed),
            seq_num: 0,
        }
    }
}

impl Transport for FixTransport {
    fn connect(&mut self) -> Result<()> {
        check_credentials(&self.credentials)?;
        info!("🔌 Connecting via FIX protocol...");
        Ok(())
    }

    fn send_order(&mut self, order: &Order) -> Result<()> {
        self.seq_num += 1;
        let body = serde_json::to_string(order)?;
        info!(seq = self.seq_num, "📤 Sending order via FIX: {}", body);
        Ok(())
    }

    fn poll_market_data(&mut self, subscriptions: &[Symbol]) -> Option<Ticker> {
        self.quotes.next(subscriptions)
    }

    fn disconnect(&mut self) {
        info!("🔌 Disconnecting FIX protocol...");
    }
}

pub struct WebSocketTransport {
    credentials: Credentials,
    quotes: SyntheticQuotes,
}

impl WebSocketTransport {
    pub fn new(credentials: Credentials, seed: u64) -> Self {
        Self {
            credentials,
            quotes: SyntheticQuotes::new(seed),
        }
    }
}

impl Transport for WebSocketTransport {
    fn connect(&mut self) -> Result<()> {
        check_credentials(&self.credentials)?;
        info!("🔌 Connecting via WebSocket...");
        Ok(())
    }

    fn send_order(&mut self, order: &Order) -> Result<()> {
        let body = serde_json::to_string(order)?;
        info!("📤 Sending order via WebSocket: {}", body);
        Ok(())
    }

    fn poll_market_data(&mut self, subscriptions: &[Symbol]) -> Option<Ticker> {
        self.quotes.next(subscriptions)
    }

    fn disconnect(&mut self) {
        info!("🔌 Disconnecting WebSocket...");
    }
}

/// Counters shared with the session task
#[derive(Default)]
struct Counters {
    orders_sent: AtomicU64,
    market_data_dropped: AtomicU64,
}

/// Exchange connector - one background session per `connect`
pub struct ExchangeConnector {
    protocol: Protocol,
    credentials: Credentials,
    queue_capacity: usize,
    poll_interval: Duration,
    seed: u64,
    connected: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    subscriptions: Arc<RwLock<Vec<Symbol>>>,
    counters: Arc<Counters>,
    orders_tx: Option<flume::Sender<Order>>,
    market_rx: Option<flume::Receiver<Ticker>>,
    task: Option<JoinHandle<()>>,
}

impl ExchangeConnector {
    pub fn new(protocol: Protocol, credentials: Credentials) -> Self {
        Self {
            protocol,
            credentials,
            queue_capacity: 1024,
            poll_interval: Duration::from_millis(10),
            seed: 0,
            connected: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            counters: Arc::new(Counters::default()),
            orders_tx: None,
            market_rx: None,
            task: None,
        }
    }

    pub fn from_config(config: &ExchangeConfig) -> Result<Self> {
        let protocol = config.protocol.parse()?;
        let credentials = Credentials {
            api_key: config.api_key.clone().unwrap_or_default(),
            api_secret: config.api_secret.clone().unwrap_or_default(),
        };
        Ok(Self::new(protocol, credentials)
            .with_queue_capacity(config.queue_capacity)
            .with_poll_interval(Duration::from_millis(config.poll_interval_ms)))
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Seed for the synthetic market data
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn orders_sent(&self) -> u64 {
        self.counters.orders_sent.load(Ordering::Relaxed)
    }

    pub fn market_data_dropped(&self) -> u64 {
        self.counters.market_data_dropped.load(Ordering::Relaxed)
    }

    fn transport(&self) -> Box<dyn Transport> {
        match self.protocol {
            Protocol::Fix => Box::new(FixTransport::new(self.credentials.clone(), self.seed)),
            Protocol::WebSocket => {
                Box::new(WebSocketTransport::new(self.credentials.clone(), self.seed))
            }
        }
    }

    /// Start the session task and wait until the transport is up
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            info!("Already connected via {}", self.protocol);
            return Ok(());
        }

        let (orders_tx, orders_rx) = flume::bounded(self.queue_capacity);
        let (market_tx, market_rx) = flume::bounded(self.queue_capacity);
        let (ready_tx, ready_rx) = oneshot::channel();

        self.stop = Arc::new(AtomicBool::new(false));
        let session = Session {
            transport: self.transport(),
            orders_rx,
            market_tx,
            subscriptions: self.subscriptions.clone(),
            stop: self.stop.clone(),
            connected: self.connected.clone(),
            counters: self.counters.clone(),
            poll_interval: self.poll_interval,
        };
        let task = tokio::spawn(session.run(ready_tx));

        match ready_rx.await {
            Ok(Ok(())) => {
                info!("✅ Connected via {}", self.protocol);
                self.orders_tx = Some(orders_tx);
                self.market_rx = Some(market_rx);
                self.task = Some(task);
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Connection failed: {}", e);
                Err(e)
            }
            Err(_) => {
                error!("Connection task ended before becoming ready");
                Err(Error::Exchange("connection task aborted".into()))
            }
        }
    }

    /// Queue an order for the session task
    pub fn send_order(&self, order: Order) -> Result<()> {
        if !self.is_connected() {
            warn!(order_id = %order.id, "Not connected. Cannot send order.");
            return Err(Error::NotConnected);
        }
        let tx = self.orders_tx.as_ref().ok_or(Error::NotConnected)?;
        tx.try_send(order).map_err(|e| match e {
            flume::TrySendError::Full(o) => {
                warn!(order_id = %o.id, "Order queue full");
                Error::Backpressure(format!("order queue full ({} pending)", self.queue_capacity))
            }
            flume::TrySendError::Disconnected(_) => Error::NotConnected,
        })
    }

    pub fn subscribe_market_data(&self, symbol: impl Into<Symbol>) {
        let symbol = symbol.into();
        let mut subs = self.subscriptions.write();
        if !subs.contains(&symbol) {
            info!("📊 Subscribed to {}", symbol);
            subs.push(symbol);
        }
    }

    /// Next queued market data message, if any
    pub fn get_market_data(&self) -> Option<Ticker> {
        self.market_rx.as_ref()?.try_recv().ok()
    }

    /// Stop the session task and wait for it to close the transport
    pub async fn disconnect(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Connection task failed: {}", e);
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        self.orders_tx = None;
        self.market_rx = None;
        info!("Disconnected from {}", self.protocol);
    }
}

impl Drop for ExchangeConnector {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

struct Session {
    transport: Box<dyn Transport>,
    orders_rx: flume::Receiver<Order>,
    market_tx: flume::Sender<Ticker>,
    subscriptions: Arc<RwLock<Vec<Symbol>>>,
    stop: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    counters: Arc<Counters>,
    poll_interval: Duration,
}

impl Session {
    async fn run(mut self, ready: oneshot::Sender<Result<()>>) {
        if let Err(e) = self.transport.connect() {
            let _ = ready.send(Err(e));
            return;
        }
        self.connected.store(true, Ordering::SeqCst);
        if ready.send(Ok(())).is_err() {
            warn!("Connector dropped before session became ready");
        }

        while !self.stop.load(Ordering::SeqCst) {
            self.flush_orders();

            let subs = self.subscriptions.read().clone();
            if let Some(ticker) = self.transport.poll_market_data(&subs) {
                if let Err(flume::TrySendError::Full(t)) = self.market_tx.try_send(ticker) {
                    self.counters.market_data_dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(symbol = %t.symbol, "Market data queue full, dropping update");
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }

        // accepted orders go out before the transport closes
        let flushed = self.flush_orders();
        if flushed > 0 {
            info!("Flushed {} queued orders before disconnect", flushed);
        }
        self.transport.disconnect();
        self.connected.store(false, Ordering::SeqCst);
    }

    fn flush_orders(&mut self) -> usize {
        let mut sent = 0;
        while let Ok(order) = self.orders_rx.try_recv() {
            match self.transport.send_order(&order) {
                Ok(()) => {
                    self.counters.orders_sent.fetch_add(1, Ordering::Relaxed);
                    sent += 1;
                }
                Err(e) => error!(order_id = %order.id, "Transport send failed: {}", e),
            }
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OrderRequest, Quantity, Side};
    use rust_decimal_macros::dec;

    fn creds() -> Credentials {
        Credentials {
            api_key: "key".into(),
            api_secret: "secret".into(),
        }
    }

    fn order() -> Order {
        Order::new(OrderRequest::market("AAPL", Side::Buy, Quantity::new(dec!(100))))
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!("FIX".parse::<Protocol>().unwrap(), Protocol::Fix);
        assert_eq!("websocket".parse::<Protocol>().unwrap(), Protocol::WebSocket);
        assert!(matches!("smoke".parse::<Protocol>(), Err(Error::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_requires_connection() {
        let mut c = ExchangeConnector::new(Protocol::Fix, creds());
        assert!(matches!(c.send_order(order()), Err(Error::NotConnected)));

        c.connect().await.unwrap();
        assert!(c.is_connected());
        c.send_order(order()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(c.orders_sent(), 1);

        c.disconnect().await;
        assert!(!c.is_connected());
        assert!(matches!(c.send_order(order()), Err(Error::NotConnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_twice_is_noop() {
        let mut c = ExchangeConnector::new(Protocol::WebSocket, creds());
        c.connect().await.unwrap();
        c.connect().await.unwrap();
        assert!(c.is_connected());
        c.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_fails_without_credentials() {
        let mut c = ExchangeConnector::new(Protocol::Fix, Credentials::default());
        assert!(matches!(c.connect().await, Err(Error::Exchange(_))));
        assert!(!c.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_market_data_for_subscriptions() {
        let mut c = ExchangeConnector::new(Protocol::Fix, creds()).with_seed(5);
        c.connect().await.unwrap();
        assert!(c.get_market_data().is_none());

        c.subscribe_market_data("AAPL");
        c.subscribe_market_data("aapl");
        tokio::time::sleep(Duration::from_millis(100)).await;
        let t = c.get_market_data().unwrap();
        assert_eq!(t.symbol, Symbol::new("AAPL"));
        c.disconnect().await;
        assert!(c.get_market_data().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_queue_backpressure() {
        let mut c = ExchangeConnector::new(Protocol::Fix, creds())
            .with_queue_capacity(1)
            .with_poll_interval(Duration::from_secs(3600));
        c.connect().await.unwrap();
        c.send_order(order()).unwrap();
        assert!(matches!(c.send_order(order()), Err(Error::Backpressure(_))));
        c.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_sends_queued_orders() {
        let mut c = ExchangeConnector::new(Protocol::Fix, creds())
            .with_poll_interval(Duration::from_secs(3600));
        c.connect().await.unwrap();
        c.send_order(order()).unwrap();
        c.send_order(order()).unwrap();
        assert_eq!(c.orders_sent(), 0);

        c.disconnect().await;
        assert_eq!(c.orders_sent(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_inbound_queue_drops_new_data() {
        let mut c = ExchangeConnector::new(Protocol::Fix, creds()).with_queue_capacity(1);
        c.subscribe_market_data("AAPL");
        c.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(c.market_data_dropped() > 0);
        assert!(c.get_market_data().is_some());
        c.disconnect().await;
    }
}
