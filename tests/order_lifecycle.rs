use parking_lot::Mutex;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use hft_platform::core::config::{RiskConfig, SymbolConfig};
use hft_platform::core::{Exchange, OrderRequest, OrderStatus, Price, Quantity, Side, Symbol};
use hft_platform::exchanges::SimulatedExchange;
use hft_platform::execution::{OrderManager, StopReason, TwapExecutor, TwapSchedule};
use hft_platform::risk::{RiskError, RiskLimits};
use hft_platform::Error;

fn venue(liquidity: f64) -> Arc<SimulatedExchange> {
    Arc::new(SimulatedExchange::new(
        11,
        vec![SymbolConfig {
            symbol: "AAPL".into(),
            initial_price: 150.0,
            spread: 0.02,
            volatility: 0.0,
            liquidity,
        }],
    ))
}

/// Apply every report the venue has emitted so far
fn drain(venue: &SimulatedExchange, om: &OrderManager) {
    for report in venue.executions().drain() {
        om.process_update(report).expect("report applies");
    }
}

#[tokio::test]
async fn limit_order_rests_then_is_modified_and_cancelled() {
    let venue = venue(1_000.0);
    let om = OrderManager::new(venue.clone());

    let order = om
        .create_order(OrderRequest::limit(
            "AAPL",
            Side::Buy,
            Quantity::new(dec!(10)),
            Price::new(dec!(149)),
        ))
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Open);
    assert!(om.is_order_active(&order.id));

    let modified = om
        .modify_order(&order.id, Price::new(dec!(148.5)), Quantity::new(dec!(12)))
        .await
        .unwrap();
    assert_eq!(modified.price, Some(Price::new(dec!(148.5))));
    assert_eq!(om.get_order(&order.id).unwrap().quantity, Quantity::new(dec!(12)));

    let cancelled = om.cancel_order(&order.id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert!(matches!(
        om.cancel_order(&order.id).await,
        Err(Error::InvalidState(_))
    ));
    assert!(matches!(
        om.modify_order(&order.id, Price::new(dec!(150)), Quantity::new(dec!(1))).await,
        Err(Error::InvalidState(_))
    ));
    assert!(om.active_orders().is_empty());
}

#[tokio::test]
async fn resting_order_fills_when_price_moves_through_it() {
    let venue = venue(1_000.0);
    let om = OrderManager::new(venue.clone());
    let symbol = Symbol::new("AAPL");

    let order = om
        .create_order(OrderRequest::limit(
            "AAPL",
            Side::Buy,
            Quantity::new(dec!(10)),
            Price::new(dec!(149)),
        ))
        .await
        .unwrap();
    assert_eq!(venue.tick(), 0);

    venue.set_price(&symbol, 148.0).unwrap();
    assert_eq!(venue.tick(), 1);
    drain(&venue, &om);

    let filled = om.get_order(&order.id).unwrap();
    assert_eq!(filled.status, OrderStatus::Filled);
    assert_eq!(filled.filled_quantity, Quantity::new(dec!(10)));
    assert_eq!(filled.avg_fill_price, Some(Price::new(dec!(148.01))));
    assert_eq!(om.filled_orders().len(), 1);
}

#[tokio::test]
async fn thin_liquidity_partially_fills_across_ticks() {
    let venue = venue(5.0);
    let risk = Arc::new(Mutex::new(RiskLimits::new(RiskConfig::default())));
    let om = OrderManager::new(venue.clone()).with_risk(risk.clone());

    let order = om
        .create_order(OrderRequest::market("AAPL", Side::Buy, Quantity::new(dec!(8))))
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::PartiallyFilled);
    assert_eq!(order.filled_quantity, Quantity::new(dec!(5)));

    venue.tick();
    drain(&venue, &om);
    let order = om.get_order(&order.id).unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.remaining(), Quantity::ZERO);
    assert!((risk.lock().position() - 8.0).abs() < 1e-9);
}

#[tokio::test]
async fn refused_orders_are_recorded_as_rejected() {
    let venue = venue(1_000.0);
    let risk = Arc::new(Mutex::new(RiskLimits::new(RiskConfig {
        max_position_size: 10.0,
        ..RiskConfig::default()
    })));
    let om = OrderManager::new(venue.clone()).with_risk(risk);

    let result = om
        .create_order(OrderRequest::market("AAPL", Side::Buy, Quantity::new(dec!(11))))
        .await;
    assert!(matches!(
        result,
        Err(Error::Risk(RiskError::PositionOverflow { .. }))
    ));

    venue.reject_next(1);
    let result = om
        .create_order(OrderRequest::market("AAPL", Side::Buy, Quantity::new(dec!(1))))
        .await;
    assert!(matches!(result, Err(Error::Exchange(_))));

    let orders = om.all_orders();
    assert_eq!(orders.len(), 2);
    assert!(orders.iter().all(|o| o.status == OrderStatus::Rejected));
    assert!(orders.iter().all(|o| o.reject_reason.is_some()));
    assert_eq!(om.summary().count(OrderStatus::Rejected), 2);

    assert!(matches!(
        om.create_order(OrderRequest::market("AAPL", Side::Buy, Quantity::ZERO)).await,
        Err(Error::InvalidParameter(_))
    ));
}

#[tokio::test]
async fn venue_expiry_reaches_the_order_manager_through_the_event_loop() {
    let venue = venue(1_000.0);
    let om = Arc::new(OrderManager::new(venue.clone()));
    let reports = venue.executions();
    let loop_om = om.clone();
    let event_loop = tokio::spawn(async move { loop_om.run_event_loop(reports).await });

    let order = om
        .create_order(OrderRequest::limit(
            "AAPL",
            Side::Sell,
            Quantity::new(dec!(3)),
            Price::new(dec!(155)),
        ))
        .await
        .unwrap();
    venue.expire(&order.id).unwrap();

    for _ in 0..100 {
        if om.get_order(&order.id).unwrap().status == OrderStatus::Expired {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(om.get_order(&order.id).unwrap().status, OrderStatus::Expired);
    event_loop.abort();
}

#[tokio::test(start_paused = true)]
async fn twap_children_are_linked_to_their_parent() {
    let venue = venue(1_000_000.0);
    let om = OrderManager::new(venue.clone());
    let schedule = TwapSchedule::new(
        Quantity::new(dec!(10)),
        Duration::from_millis(100),
        Duration::from_millis(500),
    )
    .unwrap();

    let summary = TwapExecutor::new(schedule)
        .execute(&om, OrderRequest::market("AAPL", Side::Buy, Quantity::ZERO))
        .await;

    assert!(summary.completed);
    assert_eq!(summary.stop_reason, StopReason::Completed);
    assert_eq!(summary.submitted, Quantity::new(dec!(10)));

    let children = om.children_of(&summary.parent_id);
    assert_eq!(children.len(), 5);
    assert!(children.iter().all(|c| c.status == OrderStatus::Filled));
    assert!(children.iter().all(|c| c.quantity == Quantity::new(dec!(2))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancels_racing_venue_fills_keep_both_books_in_step() {
    let venue = venue(7.0);
    let risk = Arc::new(Mutex::new(RiskLimits::new(RiskConfig::default())));
    let om = Arc::new(OrderManager::new(venue.clone()).with_risk(risk.clone()));
    let reports = venue.executions();
    let loop_om = om.clone();
    let event_loop = tokio::spawn(async move { loop_om.run_event_loop(reports).await });

    let mut ids = Vec::new();
    for _ in 0..8 {
        let order = om
            .create_order(OrderRequest::limit(
                "AAPL",
                Side::Buy,
                Quantity::new(dec!(20)),
                Price::new(dec!(149)),
            ))
            .await
            .unwrap();
        ids.push(order.id);
    }
    // every bid is now marketable, 7 shares per tick
    venue.set_price(&Symbol::new("AAPL"), 148.0).unwrap();

    let tick_venue = venue.clone();
    let ticker = tokio::spawn(async move {
        for _ in 0..30 {
            tick_venue.tick();
            tokio::task::yield_now().await;
        }
    });
    let cancel_om = om.clone();
    let cancel_ids = ids.clone();
    let canceller = tokio::spawn(async move {
        for id in cancel_ids {
            // losing the race to a full fill is expected
            let _ = cancel_om.cancel_order(&id).await;
            tokio::task::yield_now().await;
        }
    });
    ticker.await.unwrap();
    canceller.await.unwrap();

    let in_step = |local: &hft_platform::core::Order, remote: &hft_platform::core::Order| {
        local.status == remote.status && local.filled_quantity == remote.filled_quantity
    };
    for _ in 0..500 {
        let mut done = true;
        for id in &ids {
            let remote = om.exchange().get_order(id).await.unwrap();
            if !in_step(&om.get_order(id).unwrap(), &remote) {
                done = false;
            }
        }
        if done {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let mut venue_filled = 0.0;
    for id in &ids {
        let local = om.get_order(id).unwrap();
        let remote = om.exchange().get_order(id).await.unwrap();
        assert_eq!(local.filled_quantity, remote.filled_quantity, "order {}", id);
        assert_eq!(local.status, remote.status, "order {}", id);
        assert!(!local.is_active());
        venue_filled += remote.filled_quantity.as_f64();
    }
    assert!((risk.lock().position() - venue_filled).abs() < 1e-9);
    event_loop.abort();
}
