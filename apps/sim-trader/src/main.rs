//! Paper-trading walkthrough of the execution core
//!
//! Wires limits -> risk -> positions -> engine -> mock broker, registers
//! callbacks, pushes marks, runs a small order flow and prints the
//! resulting metrics. Run with `RUST_LOG=info` to watch the lifecycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::info;
use rust_decimal_macros::dec;

use hermes_core::{OrderRequest, OrderSide, TimeInForce};
use hermes_execution::{
    BroadcastBus, EngineConfig, EventBus, ExecutionEngine, ExecutionProvider, MockBroker,
    MockBrokerConfig,
};
use hermes_position::{MemoryWriter, PositionManager};
use hermes_risk::{RiskLimits, RiskManager};

fn main() {
    env_logger::init();

    let positions = Arc::new(PositionManager::new());
    let risk = Arc::new(RiskManager::new(RiskLimits::default()));
    risk.set_position_manager(Arc::clone(&positions));

    let bus = Arc::new(BroadcastBus::default());
    let mut bus_rx = bus.subscribe();

    let engine = ExecutionEngine::new(
        EngineConfig::default(),
        Arc::clone(&risk),
        Arc::clone(&positions),
        Arc::clone(&bus) as Arc<dyn EventBus>,
    );

    let broker = MockBroker::new(MockBrokerConfig {
        fill_latency_ms: 50,
        partial_fill_count: 2,
        ..Default::default()
    });
    broker.connect();
    engine.register_provider("mock", Arc::clone(&broker) as _);

    engine.register_order_callback(|update| {
        info!(
            "order callback: id={}, status={}, filled={}",
            update.order_id,
            update.status.as_str(),
            update.filled_qty
        );
    });
    engine.register_fill_callback(|fill| {
        info!(
            "fill callback: order={}, qty={} @ {}",
            fill.order_id, fill.quantity, fill.price
        );
    });

    // Push marks before any market order
    broker.set_market_price("EUR/USD", dec!(1.1000));
    let mut prices = HashMap::new();
    prices.insert("EUR/USD".to_string(), dec!(1.1000));
    risk.update_market_prices(prices);

    // Open a position, add to it, then take profit
    let orders = vec![
        OrderRequest::market("demo-1", "EUR/USD", OrderSide::Buy, dec!(100))
            .with_strategy("demo"),
        OrderRequest::limit(
            "demo-2",
            "EUR/USD",
            OrderSide::Buy,
            dec!(50),
            dec!(1.1010),
            TimeInForce::Gtc,
        )
        .with_strategy("demo"),
        OrderRequest::limit(
            "demo-3",
            "EUR/USD",
            OrderSide::Sell,
            dec!(150),
            dec!(1.1050),
            TimeInForce::Gtc,
        )
        .with_strategy("demo"),
    ];

    for order in orders {
        let update = engine.submit(order);
        println!(
            "submitted {} -> {} {}",
            update.order_id,
            update.status.as_str(),
            update.reason
        );
        thread::sleep(Duration::from_millis(200));
    }

    thread::sleep(Duration::from_millis(300));

    while let Ok(message) = bus_rx.try_recv() {
        println!("bus [{}] {}", message.topic, message.payload);
    }

    let prices: HashMap<String, _> = [("EUR/USD".to_string(), dec!(1.1050))].into();
    let stats = positions.stats(&prices);
    println!(
        "positions: open={}, realized={}, unrealized={}, commission={}",
        stats.open_positions,
        stats.total_realized_pnl,
        stats.total_unrealized_pnl,
        stats.total_commission_paid
    );

    let metrics = risk.metrics();
    println!(
        "risk: daily_pnl={}, exposure={}, submitted={}, halted={}",
        metrics.daily_pnl, metrics.total_exposure, metrics.orders_submitted_today,
        metrics.halt_active
    );

    let engine_stats = engine.stats();
    println!(
        "engine: submitted={}, fills={}, volume={}",
        engine_stats.orders_submitted, engine_stats.fills_received, engine_stats.total_volume
    );

    let writer = MemoryWriter::new();
    match positions.persist(&writer) {
        Ok(()) => println!("persisted {} position rows", writer.rows().len()),
        Err(e) => eprintln!("persist failed: {}", e),
    }

    engine.shutdown();
}
