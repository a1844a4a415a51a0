use anyhow::Context;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt, reload};

use hft_platform::core::{Config, Exchange, OrderRequest, OrderStatus, Price, Quantity, Side, Symbol};
use hft_platform::exchanges::{ExchangeConnector, SimulatedExchange};
use hft_platform::execution::{
    IcebergOrder, IcebergParams, OrderManager, TwapExecutor, TwapSchedule, VwapExecutor,
};
use hft_platform::monitoring::performance::fill_slippage;
use hft_platform::monitoring::{AnomalyDetector, LatencyMonitor};
use hft_platform::risk::{ComplianceMonitor, RiskLimits, RiskManager};
use hft_platform::strategies::{
    MarketMaker, MarketMakingParams, MeanReversionParams, MeanReversionStrategy, MomentumParams,
    MomentumStrategy, StatArbParams, StatisticalArbitrage, StrategyRunner,
};

const VWAP_WARMUP_TICKS: usize = 20;
const STRATEGY_TICKS: usize = 50;
const ANOMALY_THRESHOLD: f64 = 3.0;
const ANOMALY_WINDOW: usize = 20;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // 1. Logging before anything else: RUST_LOG wins, otherwise info until the config names a level
    let (filter, filter_handle) = reload::Layer::new(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(false).with_level(true))
        .init();

    let config = Config::load_default();
    if std::env::var_os("RUST_LOG").is_none() {
        filter_handle.reload(EnvFilter::new(&config.app.log_level))?;
    }

    info!("🦀 {} starting (simulated venue)...", config.app.name);

    // 2. Venue, risk gate, latency monitor, order manager
    let venue = Arc::new(SimulatedExchange::from_config(&config.simulation));
    let symbols = venue.symbols();
    let symbol = symbols.first().cloned().context("no simulation symbols configured")?;

    let (alert_tx, alert_rx) = flume::unbounded();
    let latency = Arc::new(LatencyMonitor::from_config(&config.latency).with_alerts(alert_tx));
    let risk = Arc::new(Mutex::new(RiskLimits::new(config.risk.clone())));
    let om = Arc::new(
        OrderManager::new(venue.clone())
            .with_risk(risk.clone())
            .with_latency(latency.clone()),
    );

    let reports = venue.executions();
    let loop_om = om.clone();
    let event_loop = tokio::spawn(async move { loop_om.run_event_loop(reports).await });

    let (stop_tx, stop_rx) = flume::bounded::<()>(1);
    let tick_venue = venue.clone();
    let tick_interval = Duration::from_millis(config.simulation.tick_interval_ms);
    let ticker_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    tick_venue.tick();
                }
                _ = stop_rx.recv_async() => break,
            }
        }
    });

    // 3. Execution algorithms, run concurrently
    let twap = TwapExecutor::new(TwapSchedule::from_config(&config.execution.twap)?);

    let mut vwap = VwapExecutor::new(Side::Buy, config.execution.vwap.clone());
    for _ in 0..VWAP_WARMUP_TICKS {
        venue.tick();
        let t = venue.fetch_ticker(&symbol).await?;
        vwap.add_market_data(t.last.as_f64(), t.volume.as_f64());
    }
    let vwap_quantity = VwapExecutor::participation_quantity(
        Quantity::from_f64(vwap.tracker().total_volume()),
        config.execution.vwap.participation_rate,
        Quantity::from_f64(config.execution.vwap.max_volume),
    );
    let vwap_target = vwap.vwap() * 1.001;

    let last = venue.fetch_ticker(&symbol).await?.last;
    let iceberg_total = Quantity::from_f64(config.execution.iceberg.visible_size * 5.0);
    let iceberg_params = IcebergParams::from_config(
        &config.execution.iceberg,
        symbol.clone(),
        Side::Buy,
        iceberg_total,
        Price::from_f64(last.as_f64() * 0.999).round_dp(4),
    )
    .with_guards(
        Some(Price::from_f64(last.as_f64() * 0.95).round_dp(4)),
        Some(Price::from_f64(last.as_f64() * 1.05).round_dp(4)),
    );
    let mut iceberg = IcebergOrder::new(iceberg_params, StdRng::seed_from_u64(config.simulation.seed))?;

    let (twap_summary, vwap_summary, iceberg_summary) = futures::join!(
        twap.execute(&om, OrderRequest::market(symbol.clone(), Side::Buy, Quantity::ZERO)),
        vwap.execute_with(
            &om,
            OrderRequest::market(symbol.clone(), Side::Buy, vwap_quantity),
            vwap_target
        ),
        iceberg.execute(&om),
    );
    info!("TWAP: {:?}, submitted {}", twap_summary.stop_reason, twap_summary.submitted);
    if let Some(slip) = fill_slippage(&om.children_of(&twap_summary.parent_id), last) {
        info!("TWAP slippage vs arrival {}: {:.4}", last, slip);
    }
    match vwap_summary {
        Ok(s) => info!("VWAP: {:?}, submitted {}", s.stop_reason, s.submitted),
        Err(e) => error!("VWAP execution failed: {}", e),
    }
    match iceberg_summary {
        Ok(s) => info!("ICEBERG: {:?}, submitted {}", s.stop_reason, s.submitted),
        Err(e) => error!("Iceberg execution failed: {}", e),
    }
    vwap.statistics();

    // 4. Order amendments on whatever is still resting
    if let Some(resting) = om.active_orders().into_iter().find(|o| o.filled_quantity.is_zero()) {
        if let Some(price) = resting.price {
            let lower = Price::from_f64(price.as_f64() * 0.999).round_dp(4);
            if let Err(e) = om.modify_order(&resting.id, lower, resting.quantity).await {
                warn!("Modify failed: {}", e);
            }
        }
    }
    for order in om.active_orders() {
        if let Err(e) = om.cancel_order(&order.id).await {
            warn!(order_id = %order.id, "Cancel failed: {}", e);
        }
    }

    // 5. Strategies on live venue tickers
    let mut runner = StrategyRunner::new();
    runner.add_strategy(MomentumStrategy::new(
        symbol.clone(),
        MomentumParams {
            position_size: 10.0,
            max_position: 100.0,
            ..MomentumParams::default()
        },
    ));
    runner.add_strategy(MarketMaker::new(symbol.clone(), MarketMakingParams::default()));
    runner.add_strategy(MeanReversionStrategy::new(
        symbol.clone(),
        MeanReversionParams {
            capital: 10_000.0,
            ..MeanReversionParams::default()
        },
    ));
    if let Some(second) = symbols.get(1) {
        runner.add_strategy(StatisticalArbitrage::new(
            symbol.clone(),
            second.clone(),
            StatArbParams::default(),
        ));
    }

    let mut detector = AnomalyDetector::new(ANOMALY_THRESHOLD, ANOMALY_WINDOW)?;
    let mut strategy_orders = Vec::new();
    for _ in 0..STRATEGY_TICKS {
        venue.tick();
        let mut signals = Vec::new();
        for s in &symbols {
            let ticker = venue.fetch_ticker(s).await?;
            if *s == symbol {
                for kind in detector.add_data(ticker.last.as_f64()) {
                    warn!(symbol = %s, price = %ticker.last, "Anomaly: {}", AnomalyDetector::describe(kind));
                }
            }
            signals.extend(runner.process_tick(&ticker));
        }
        strategy_orders.extend(runner.execute_signals(&om, &signals).await);
    }
    for order in &strategy_orders {
        if let Some(current) = om.get_order(&order.id) {
            if current.status == OrderStatus::Filled {
                runner.on_fill(&current);
            }
        }
    }

    // 6. Connector session over the configured protocol
    match ExchangeConnector::from_config(&config.exchange) {
        Ok(connector) => run_connector(connector.with_seed(config.simulation.seed), &om, &symbols).await,
        Err(e) => warn!("Connector not configured: {}", e),
    }

    // 7. Post-trade: portfolio risk and compliance over filled orders
    let mut risk_manager = RiskManager::from_config(&config.risk);
    let mut compliance = ComplianceMonitor::from_config(&config.compliance)?;
    for order in om.filled_orders() {
        let qty = order.filled_quantity.as_f64();
        let signed = match order.side {
            Side::Buy => qty,
            Side::Sell => -qty,
        };
        risk_manager.update_position(order.symbol.clone(), signed);
        compliance.update_trade_volume(order.symbol.as_str(), qty);
        let position = risk_manager.symbol_exposure(&order.symbol);
        if compliance.check_position(order.symbol.as_str(), position).is_ok() {
            if let Err(e) = compliance.update_position(order.symbol.as_str(), position) {
                warn!("{}", e);
            }
        }
    }
    if let Err(e) = risk_manager.real_time_monitoring() {
        warn!("Portfolio risk check: {}", e);
    }
    for violation in compliance.check_compliance() {
        warn!("Compliance: {}", violation);
    }

    // 8. Shutdown and summaries
    let _ = stop_tx.send(());
    let _ = ticker_task.await;
    event_loop.abort();

    for alert in alert_rx.drain() {
        warn!("Latency alert: average {:.3} ms over {:.3} ms", alert.average_ms, alert.threshold_ms);
    }

    let summary = om.summary();
    println!("\nOrders: {} total", summary.total);
    for status in [
        OrderStatus::Filled,
        OrderStatus::PartiallyFilled,
        OrderStatus::Open,
        OrderStatus::Cancelled,
        OrderStatus::Rejected,
        OrderStatus::Expired,
    ] {
        println!("  {:<17} {}", status, summary.count(status));
    }
    println!("\n{}", risk.lock().summary());
    println!("\n{}", risk_manager.risk_report());
    println!("{}", compliance.generate_report());
    latency.statistics();
    println!("{}", latency.session_summary());

    Ok(())
}

async fn run_connector(mut connector: ExchangeConnector, om: &OrderManager, symbols: &[Symbol]) {
    if let Err(e) = connector.connect().await {
        warn!("Connector ({}) failed to connect: {}", connector.protocol(), e);
        return;
    }
    for s in symbols {
        connector.subscribe_market_data(s.clone());
    }
    for order in om.filled_orders().into_iter().take(3) {
        if let Err(e) = connector.send_order(order) {
            warn!("Connector send failed: {}", e);
        }
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut received = 0;
    while let Some(ticker) = connector.get_market_data() {
        received += 1;
        if received == 1 {
            info!(symbol = %ticker.symbol, "First connector quote: {} / {}", ticker.bid, ticker.ask);
        }
    }
    info!(
        protocol = %connector.protocol(),
        "Connector sent {} orders, received {} quotes, dropped {}",
        connector.orders_sent(),
        received,
        connector.market_data_dropped()
    );
    connector.disconnect().await;
}
