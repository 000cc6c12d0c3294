//! Mock broker adapter
//!
//! A deterministic broker backend for testing and simulation. Behavior is
//! configurable: fill latency, a Bernoulli rejection roll, partial-fill
//! count, and slippage in basis points.
//!
//! Accepted orders are filled asynchronously by a small pool of worker
//! threads fed through a channel; `disconnect` drains the pool. Cancelling
//! an order marks it so any fills not yet emitted are suppressed. Workers
//! never hold the broker lock while calling into the engine sink.

use std::collections::HashMap;
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use hermes_core::{
    now_ns, Fill, OrderModification, OrderRequest, OrderSide, OrderStatus, OrderType, OrderUpdate,
    QTY_EPSILON,
};

use crate::provider::{EngineEventSink, ExecutionProvider, ProviderError, ProviderResult};

/// Fallback reference for market orders with no mark set
const DEFAULT_MARK: Decimal = dec!(100);
/// Flat 1bp commission per unit, applied to every fill
const COMMISSION_PER_UNIT: Decimal = dec!(0.0001);
/// Worker threads draining the fill queue
const FILL_WORKERS: usize = 4;

#[derive(Debug, Clone)]
pub struct MockBrokerConfig {
    pub name: String,
    /// Simulated fill delay
    pub fill_latency_ms: u64,
    /// 0.0 = never reject, 1.0 = always reject
    pub rejection_rate: f64,
    /// How many fills each order is split into (minimum 1)
    pub partial_fill_count: u32,
    /// Slippage applied against the order's side
    pub slippage_bps: Decimal,
    /// Seed for the rejection roll, for reproducible runs
    pub seed: Option<u64>,
}

impl Default for MockBrokerConfig {
    fn default() -> Self {
        Self {
            name: "mock-broker".to_string(),
            fill_latency_ms: 100,
            rejection_rate: 0.0,
            partial_fill_count: 1,
            slippage_bps: Decimal::ZERO,
            seed: None,
        }
    }
}

/// Counters for assertions in tests
#[derive(Debug, Clone, Default)]
pub struct MockStats {
    pub orders_received: u64,
    pub orders_filled: u64,
    pub orders_rejected: u64,
    pub orders_cancelled: u64,
    pub fills_generated: u64,
}

struct MockOrder {
    request: OrderRequest,
    update: OrderUpdate,
    cancelled: bool,
}

struct MockState {
    connected: bool,
    sink: Option<Weak<dyn EngineEventSink>>,
    orders: HashMap<String, MockOrder>,
    market_prices: HashMap<String, Decimal>,
    stats: MockStats,
    rng: StdRng,
}

struct FillRunner {
    tx: Sender<String>,
    workers: Vec<JoinHandle<()>>,
}

/// Configurable in-process broker backend
pub struct MockBroker {
    config: MockBrokerConfig,
    self_ref: Weak<MockBroker>,
    state: Mutex<MockState>,
    runner: Mutex<Option<FillRunner>>,
}

impl MockBroker {
    pub fn new(config: MockBrokerConfig) -> std::sync::Arc<Self> {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        info!("[MOCK] Mock broker initialized: {}", config.name);
        std::sync::Arc::new_cyclic(|me| Self {
            config,
            self_ref: me.clone(),
            state: Mutex::new(MockState {
                connected: false,
                sink: None,
                orders: HashMap::new(),
                market_prices: HashMap::new(),
                stats: MockStats::default(),
                rng,
            }),
            runner: Mutex::new(None),
        })
    }

    /// Set the reference price used for market-order fills
    pub fn set_market_price(&self, instrument: &str, price: Decimal) {
        let mut state = self.state.lock();
        state.market_prices.insert(instrument.to_string(), price);
        debug!(
            "[MOCK] Market price set: {}={} ({})",
            instrument, price, self.config.name
        );
    }

    pub fn stats(&self) -> MockStats {
        self.state.lock().stats.clone()
    }

    fn spawn_workers(&self, rx: Receiver<String>) -> Vec<JoinHandle<()>> {
        (0..FILL_WORKERS)
            .map(|_| {
                let rx = rx.clone();
                let me = self.self_ref.clone();
                thread::spawn(move || {
                    while let Ok(order_id) = rx.recv() {
                        match me.upgrade() {
                            Some(broker) => broker.run_fill_sequence(&order_id),
                            None => break,
                        }
                    }
                })
            })
            .collect()
    }

    /// Emit the scheduled fill sequence for one order
    ///
    /// Runs on a worker thread. Every iteration re-checks the cancelled flag
    /// under the lock, then releases it before calling the sink.
    fn run_fill_sequence(&self, order_id: &str) {
        thread::sleep(Duration::from_millis(self.config.fill_latency_ms));

        let fill_count = self.config.partial_fill_count.max(1);
        let mut per_fill: Option<Decimal> = None;

        for i in 0..fill_count {
            let emitted = {
                let mut guard = self.state.lock();
                let state = &mut *guard;
                if !state.connected {
                    return;
                }
                let order = match state.orders.get_mut(order_id) {
                    Some(order) => order,
                    None => return,
                };
                if order.cancelled || order.update.status.is_terminal() {
                    debug!("[MOCK] Order {} cancelled, suppressing fills", order_id);
                    return;
                }
                let remaining = order.update.remaining_qty;
                if remaining <= QTY_EPSILON {
                    return;
                }

                // Split the quantity evenly; the last fill absorbs rounding
                let slice =
                    *per_fill.get_or_insert_with(|| remaining / Decimal::from(fill_count));
                let quantity = if i + 1 == fill_count {
                    remaining
                } else {
                    slice.min(remaining)
                };
                let price = fill_price(&self.config, &order.request, &state.market_prices);

                let fill = Fill {
                    fill_id: format!("{}-{}", self.config.name, Uuid::new_v4()),
                    order_id: order_id.to_string(),
                    instrument: order.request.instrument.clone(),
                    side: order.request.side,
                    quantity,
                    price,
                    commission: quantity * COMMISSION_PER_UNIT,
                    timestamp_ns: now_ns(),
                };

                let previously_filled = order.update.filled_qty;
                order.update.filled_qty += quantity;
                order.update.remaining_qty -= quantity;
                order.update.avg_fill_price = (order.update.avg_fill_price * previously_filled
                    + price * quantity)
                    / order.update.filled_qty;
                order.update.update_ts_ns = fill.timestamp_ns;
                if order.update.remaining_qty <= QTY_EPSILON {
                    order.update.status = OrderStatus::Filled;
                    state.stats.orders_filled += 1;
                } else {
                    order.update.status = OrderStatus::PartiallyFilled;
                }
                state.stats.fills_generated += 1;

                info!(
                    "[MOCK] Fill generated: order={}, qty={}, price={}, remaining={}",
                    order_id, quantity, price, order.update.remaining_qty
                );

                (fill, state.sink.clone())
            };

            let (fill, sink) = emitted;
            if let Some(sink) = sink.and_then(|weak| weak.upgrade()) {
                sink.on_fill(fill);
            }

            if i + 1 < fill_count {
                thread::sleep(Duration::from_millis(
                    self.config.fill_latency_ms / fill_count as u64,
                ));
            }
        }
    }
}

impl ExecutionProvider for MockBroker {
    fn submit(&self, order: &OrderRequest) -> ProviderResult<OrderUpdate> {
        let update = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.stats.orders_received += 1;

            if !state.connected {
                return Err(ProviderError::NotConnected);
            }

            if should_reject(&mut state.rng, self.config.rejection_rate) {
                state.stats.orders_rejected += 1;
                warn!("[MOCK] Rejected order {} (simulated)", order.order_id);
                return Ok(OrderUpdate::rejected(
                    order.order_id.clone(),
                    order.quantity,
                    "Rejected by mock broker (simulated)",
                ));
            }

            if !order.validate() {
                state.stats.orders_rejected += 1;
                return Ok(OrderUpdate::rejected(
                    order.order_id.clone(),
                    order.quantity,
                    "Invalid order parameters",
                ));
            }

            let update = OrderUpdate::acknowledged(order.order_id.clone(), order.quantity);
            state.orders.insert(
                order.order_id.clone(),
                MockOrder {
                    request: order.clone(),
                    update: update.clone(),
                    cancelled: false,
                },
            );
            info!(
                "[MOCK] Accepted order: id={}, instrument={}, side={}, qty={}",
                order.order_id,
                order.instrument,
                order.side.as_str(),
                order.quantity
            );
            update
        };

        // Queue the fill job outside the state lock
        if let Some(runner) = self.runner.lock().as_ref() {
            let _ = runner.tx.send(order.order_id.clone());
        }

        Ok(update)
    }

    fn cancel(&self, order_id: &str) -> ProviderResult<OrderUpdate> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let order = match state.orders.get_mut(order_id) {
            Some(order) => order,
            None => {
                return Ok(OrderUpdate::rejected(
                    order_id,
                    Decimal::ZERO,
                    "Order not found",
                ))
            }
        };

        if order.update.status.is_terminal() {
            let mut update = order.update.clone();
            update.reason = "Order already in terminal state".to_string();
            return Ok(update);
        }

        order.cancelled = true;
        order.update.status = OrderStatus::Cancelled;
        order.update.reason = "Cancelled by user".to_string();
        order.update.update_ts_ns = now_ns();
        let update = order.update.clone();
        state.stats.orders_cancelled += 1;

        info!("[MOCK] Cancelled order: {}", order_id);
        Ok(update)
    }

    fn modify(&self, modification: &OrderModification) -> ProviderResult<OrderUpdate> {
        let mut state = self.state.lock();

        let order = match state.orders.get_mut(&modification.order_id) {
            Some(order) => order,
            None => {
                return Ok(OrderUpdate::rejected(
                    modification.order_id.clone(),
                    Decimal::ZERO,
                    "Order not found",
                ))
            }
        };

        if order.update.status.is_terminal() {
            let mut update = order.update.clone();
            update.reason = "Order already in terminal state".to_string();
            return Ok(update);
        }

        if let Some(price) = modification.new_price {
            order.request.price = Some(price);
            info!(
                "[MOCK] Modified order {} price: {}",
                modification.order_id, price
            );
        }
        if let Some(quantity) = modification.new_quantity {
            order.request.quantity = quantity;
            order.update.remaining_qty = quantity - order.update.filled_qty;
            info!(
                "[MOCK] Modified order {} quantity: {}",
                modification.order_id, quantity
            );
        }
        if let Some(stop) = modification.new_stop_price {
            order.request.stop_price = Some(stop);
        }

        order.update.status = OrderStatus::Acknowledged;
        order.update.update_ts_ns = now_ns();
        Ok(order.update.clone())
    }

    fn status(&self, order_id: &str) -> Option<OrderUpdate> {
        self.state
            .lock()
            .orders
            .get(order_id)
            .map(|order| order.update.clone())
    }

    fn connect(&self) {
        {
            let mut state = self.state.lock();
            if state.connected {
                return;
            }
            state.connected = true;
        }

        let mut runner = self.runner.lock();
        if runner.is_none() {
            let (tx, rx) = crossbeam_channel::unbounded::<String>();
            let workers = self.spawn_workers(rx);
            *runner = Some(FillRunner { tx, workers });
        }
        info!("[MOCK] Mock broker connected: {}", self.config.name);
    }

    fn disconnect(&self) {
        {
            let mut state = self.state.lock();
            if !state.connected && self.runner.lock().is_none() {
                return;
            }
            state.connected = false;
        }

        // Close the queue and drain the workers
        let runner = self.runner.lock().take();
        if let Some(FillRunner { tx, workers }) = runner {
            drop(tx);
            for handle in workers {
                let _ = handle.join();
            }
        }
        info!("[MOCK] Mock broker disconnected: {}", self.config.name);
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn bind(&self, sink: Weak<dyn EngineEventSink>) {
        self.state.lock().sink = Some(sink);
    }
}

fn should_reject(rng: &mut StdRng, rate: f64) -> bool {
    if rate <= 0.0 {
        return false;
    }
    if rate >= 1.0 {
        return true;
    }
    rng.gen::<f64>() < rate
}

/// Reference price for a fill, with slippage applied against the taker
fn fill_price(
    config: &MockBrokerConfig,
    request: &OrderRequest,
    prices: &HashMap<String, Decimal>,
) -> Decimal {
    let mark = prices.get(&request.instrument).copied();
    let base = match request.order_type {
        OrderType::Market | OrderType::Stop => mark.or(request.price).unwrap_or(DEFAULT_MARK),
        OrderType::Limit | OrderType::StopLimit => request.price.or(mark).unwrap_or(DEFAULT_MARK),
    };

    if config.slippage_bps > Decimal::ZERO {
        let factor = config.slippage_bps / dec!(10000);
        match request.side {
            OrderSide::Buy => base * (Decimal::ONE + factor),
            OrderSide::Sell => base * (Decimal::ONE - factor),
        }
    } else {
        base
    }
}
