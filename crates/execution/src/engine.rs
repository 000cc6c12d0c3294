//! Execution engine: routing, lifecycle tracking and fan-out
//!
//! The engine owns the active-orders map and the completed-orders history.
//! `submit` runs the risk gate, routes to a provider, and records the
//! returned state; adapters later deliver fills and status updates through
//! the [`EngineEventSink`] impl, which reconciles order state, feeds the
//! position and risk managers, publishes bus events and fans out to
//! registered callbacks.
//!
//! Lock order is engine, then risk, then position. Callbacks are invoked
//! with the engine lock held and must not re-enter the engine.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use hermes_core::{
    Fill, OrderModification, OrderRequest, OrderStatus, OrderUpdate, QTY_EPSILON,
};
use hermes_position::PositionManager;
use hermes_risk::RiskManager;

use crate::callbacks::{CallbackRegistry, SubscriberId};
use crate::provider::{EngineEventSink, ExecutionProvider};
use crate::publisher::{
    BusError, EventBus, FillEventRecord, OrderEventRecord, FILLS_TOPIC, ORDERS_TOPIC,
};

/// How many bus failures are logged before going quiet
const MAX_LOGGED_BUS_ERRORS: u64 = 10;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Completed orders kept for status queries
    pub completed_history_cap: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            completed_history_cap: 1000,
        }
    }
}

/// Engine-side tracking for one order
struct OrderState {
    request: OrderRequest,
    update: OrderUpdate,
    provider: String,
    submit_ts_ns: i64,
    last_update_ns: i64,
    /// (quantity, price) per fill, for the volume-weighted average
    fills: Vec<(Decimal, Decimal)>,
}

/// Counters exposed by `stats()`
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub orders_submitted: u64,
    pub orders_rejected: u64,
    pub orders_cancelled: u64,
    pub fills_received: u64,
    pub active_orders: usize,
    pub total_volume: Decimal,
    pub last_fill_ts_ns: i64,
}

struct EngineState {
    providers: HashMap<String, Arc<dyn ExecutionProvider>>,
    default_provider: Option<String>,
    instrument_routing: HashMap<String, String>,
    active_orders: HashMap<String, OrderState>,
    completed_orders: HashMap<String, OrderState>,
    completed_order_ids: VecDeque<String>,
    order_callbacks: CallbackRegistry<OrderUpdate>,
    fill_callbacks: CallbackRegistry<Fill>,
    stats: EngineStats,
}

/// The only entry point strategies use to act on the market
pub struct ExecutionEngine {
    config: EngineConfig,
    risk: Arc<RiskManager>,
    positions: Arc<PositionManager>,
    bus: Arc<dyn EventBus>,
    state: Mutex<EngineState>,
    shutdown_requested: AtomicBool,
    publish_errors: AtomicU64,
}

impl ExecutionEngine {
    pub fn new(
        config: EngineConfig,
        risk: Arc<RiskManager>,
        positions: Arc<PositionManager>,
        bus: Arc<dyn EventBus>,
    ) -> Arc<Self> {
        info!("[EXEC] Execution engine initialized");
        Arc::new(Self {
            config,
            risk,
            positions,
            bus,
            state: Mutex::new(EngineState {
                providers: HashMap::new(),
                default_provider: None,
                instrument_routing: HashMap::new(),
                active_orders: HashMap::new(),
                completed_orders: HashMap::new(),
                completed_order_ids: VecDeque::new(),
                order_callbacks: CallbackRegistry::new(),
                fill_callbacks: CallbackRegistry::new(),
                stats: EngineStats::default(),
            }),
            shutdown_requested: AtomicBool::new(false),
            publish_errors: AtomicU64::new(0),
        })
    }

    /// Register a broker adapter. The first registration becomes the default
    /// route; the engine binds itself into the adapter as the event sink.
    pub fn register_provider(self: &Arc<Self>, name: &str, provider: Arc<dyn ExecutionProvider>) {
        let sink_arc: Arc<dyn EngineEventSink> = self.clone();
        let sink: Weak<dyn EngineEventSink> = Arc::downgrade(&sink_arc);
        provider.bind(sink);

        let mut state = self.state.lock();
        if state.default_provider.is_none() {
            state.default_provider = Some(name.to_string());
        }
        state.providers.insert(name.to_string(), provider);
        info!("[EXEC] Registered execution provider: {}", name);
    }

    /// Route an instrument to a specific provider; unknown names are ignored
    pub fn set_instrument_provider(&self, instrument: &str, provider_name: &str) {
        let mut state = self.state.lock();
        if !state.providers.contains_key(provider_name) {
            error!("[EXEC] Unknown provider: {}", provider_name);
            return;
        }
        state
            .instrument_routing
            .insert(instrument.to_string(), provider_name.to_string());
        info!("[EXEC] Routing {} -> {}", instrument, provider_name);
    }

    /// Submit an order on behalf of a strategy
    ///
    /// All failures surface in the returned update as Rejected or Error;
    /// this method never panics across the boundary.
    pub fn submit(&self, order: OrderRequest) -> OrderUpdate {
        if self.shutdown_requested.load(Ordering::SeqCst) {
            let update = OrderUpdate::rejected(
                order.order_id.clone(),
                order.quantity,
                "Execution engine shutting down",
            );
            self.state.lock().stats.orders_rejected += 1;
            warn!("[EXEC] Order rejected (shutdown): id={}", order.order_id);
            self.publish_order(&update);
            return update;
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;

        debug!(
            "[EXEC] Checking order: id={}, instrument={}, side={}, qty={}",
            order.order_id,
            order.instrument,
            order.side.as_str(),
            order.quantity
        );

        // Limit types are valued at their limit price; the risk manager
        // resolves marks for everything else from its price snapshot.
        let reference_price = if order.order_type.requires_price() {
            order.price
        } else {
            None
        };

        let risk_result = self.risk.check_order(&order, reference_price);
        if !risk_result.allowed {
            let update = OrderUpdate::rejected(
                order.order_id.clone(),
                order.quantity,
                format!("Risk check failed: {}", risk_result.reason),
            );
            state.stats.orders_rejected += 1;
            self.risk.on_order_rejected(&order.order_id);
            warn!(
                "[EXEC] Order rejected (risk): id={}, reason={}",
                order.order_id, update.reason
            );
            self.publish_order(&update);
            state.order_callbacks.dispatch(&update);
            return update;
        }

        // Instrument routing override, then the default provider
        let provider_name = state
            .instrument_routing
            .get(&order.instrument)
            .cloned()
            .or_else(|| state.default_provider.clone());
        let provider =
            provider_name.as_ref().and_then(|name| state.providers.get(name).cloned());

        let (provider_name, provider) = match (provider_name, provider) {
            (Some(name), Some(provider)) => (name, provider),
            _ => {
                let update = OrderUpdate::rejected(
                    order.order_id.clone(),
                    order.quantity,
                    format!("No execution provider available for {}", order.instrument),
                );
                state.stats.orders_rejected += 1;
                self.risk.on_order_rejected(&order.order_id);
                error!(
                    "[EXEC] Order rejected (no provider): id={}, instrument={}",
                    order.order_id, order.instrument
                );
                self.publish_order(&update);
                state.order_callbacks.dispatch(&update);
                return update;
            }
        };

        if !provider.is_connected() {
            let update = OrderUpdate::rejected(
                order.order_id.clone(),
                order.quantity,
                format!("Provider not connected: {}", provider_name),
            );
            state.stats.orders_rejected += 1;
            self.risk.on_order_rejected(&order.order_id);
            error!(
                "[EXEC] Order rejected (disconnected): id={}, provider={}",
                order.order_id, provider_name
            );
            self.publish_order(&update);
            state.order_callbacks.dispatch(&update);
            return update;
        }

        info!(
            "[EXEC] Submitting order: id={}, instrument={}, qty={} via {}",
            order.order_id, order.instrument, order.quantity, provider_name
        );

        let update = match provider.submit(&order) {
            Ok(update) => {
                if update.status == OrderStatus::Rejected {
                    state.stats.orders_rejected += 1;
                    self.risk.on_order_rejected(&order.order_id);
                    warn!(
                        "[EXEC] Order rejected by provider: id={}, reason={}",
                        order.order_id, update.reason
                    );
                } else {
                    let ts = update.update_ts_ns;
                    state.active_orders.insert(
                        order.order_id.clone(),
                        OrderState {
                            request: order.clone(),
                            update: update.clone(),
                            provider: provider_name,
                            submit_ts_ns: ts,
                            last_update_ns: ts,
                            fills: Vec::new(),
                        },
                    );
                    state.stats.orders_submitted += 1;
                    info!(
                        "[EXEC] Order submitted: id={}, status={}",
                        order.order_id,
                        update.status.as_str()
                    );
                }
                update
            }
            Err(e) => {
                state.stats.orders_rejected += 1;
                self.risk.on_order_rejected(&order.order_id);
                error!(
                    "[EXEC] Order submission failed: id={}, error={}",
                    order.order_id, e
                );
                OrderUpdate::error(
                    order.order_id.clone(),
                    order.quantity,
                    format!("Provider failure: {}", e),
                )
            }
        };

        self.publish_order(&update);
        state.order_callbacks.dispatch(&update);
        update
    }

    /// Cancel an active order
    ///
    /// If a fill raced ahead and the order is already terminal, the current
    /// (possibly Filled) state is returned instead.
    pub fn cancel(&self, order_id: &str) -> OrderUpdate {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let provider_name = match state.active_orders.get(order_id) {
            Some(os) => os.provider.clone(),
            None => {
                if let Some(completed) = state.completed_orders.get(order_id) {
                    debug!(
                        "[EXEC] Cancel for completed order {}: returning terminal state",
                        order_id
                    );
                    return completed.update.clone();
                }
                warn!("[EXEC] Cancel failed: order {} not found", order_id);
                return OrderUpdate::rejected(
                    order_id,
                    Decimal::ZERO,
                    "Order not found or already completed",
                );
            }
        };

        let provider = match state.providers.get(&provider_name).cloned() {
            Some(provider) => provider,
            None => {
                error!(
                    "[EXEC] Cancel failed: provider {} not available",
                    provider_name
                );
                return OrderUpdate::rejected(
                    order_id,
                    Decimal::ZERO,
                    format!("Provider not available: {}", provider_name),
                );
            }
        };

        info!("[EXEC] Cancelling order: id={}", order_id);

        let update = match provider.cancel(order_id) {
            Ok(update) => {
                if update.status == OrderStatus::Cancelled {
                    state.stats.orders_cancelled += 1;
                    self.risk.on_order_cancelled(order_id);
                    if let Some(os) = state.active_orders.get_mut(order_id) {
                        os.update = update.clone();
                        os.last_update_ns = update.update_ts_ns;
                    }
                    Self::finalize(state, order_id, self.config.completed_history_cap);
                    info!("[EXEC] Order cancelled: id={}", order_id);
                }
                update
            }
            Err(e) => {
                error!("[EXEC] Cancel failed: id={}, error={}", order_id, e);
                OrderUpdate::error(order_id, Decimal::ZERO, format!("Cancel failure: {}", e))
            }
        };

        self.publish_order(&update);
        state.order_callbacks.dispatch(&update);
        update
    }

    /// Modify an active order
    pub fn modify(&self, modification: &OrderModification) -> OrderUpdate {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let provider_name = match state.active_orders.get(&modification.order_id) {
            Some(os) => os.provider.clone(),
            None => {
                warn!(
                    "[EXEC] Modify failed: order {} not found",
                    modification.order_id
                );
                return OrderUpdate::rejected(
                    modification.order_id.clone(),
                    Decimal::ZERO,
                    "Order not found or already completed",
                );
            }
        };

        let provider = match state.providers.get(&provider_name).cloned() {
            Some(provider) => provider,
            None => {
                error!(
                    "[EXEC] Modify failed: provider {} not available",
                    provider_name
                );
                return OrderUpdate::rejected(
                    modification.order_id.clone(),
                    Decimal::ZERO,
                    format!("Provider not available: {}", provider_name),
                );
            }
        };

        info!("[EXEC] Modifying order: id={}", modification.order_id);

        let update = match provider.modify(modification) {
            Ok(update) => {
                if update.status.is_active() {
                    if let Some(os) = state.active_orders.get_mut(&modification.order_id) {
                        if let Some(price) = modification.new_price {
                            os.request.price = Some(price);
                        }
                        if let Some(quantity) = modification.new_quantity {
                            os.request.quantity = quantity;
                        }
                        if let Some(stop) = modification.new_stop_price {
                            os.request.stop_price = Some(stop);
                        }
                        os.update = update.clone();
                        os.last_update_ns = update.update_ts_ns;
                    }
                    info!(
                        "[EXEC] Order modified: id={}, status={}",
                        modification.order_id,
                        update.status.as_str()
                    );
                }
                update
            }
            Err(e) => {
                error!(
                    "[EXEC] Modify failed: id={}, error={}",
                    modification.order_id, e
                );
                OrderUpdate::error(
                    modification.order_id.clone(),
                    Decimal::ZERO,
                    format!("Modify failure: {}", e),
                )
            }
        };

        self.publish_order(&update);
        state.order_callbacks.dispatch(&update);
        update
    }

    /// Current status of an order, from the active map or recent history
    pub fn status(&self, order_id: &str) -> Option<OrderUpdate> {
        let state = self.state.lock();
        state
            .active_orders
            .get(order_id)
            .or_else(|| state.completed_orders.get(order_id))
            .map(|os| os.update.clone())
    }

    /// Snapshot of every active order's latest update
    pub fn active_orders(&self) -> HashMap<String, OrderUpdate> {
        let state = self.state.lock();
        state
            .active_orders
            .iter()
            .map(|(id, os)| (id.clone(), os.update.clone()))
            .collect()
    }

    /// Subscribe to order status updates
    pub fn register_order_callback(
        &self,
        callback: impl Fn(&OrderUpdate) + Send + Sync + 'static,
    ) -> SubscriberId {
        self.state.lock().order_callbacks.register(Box::new(callback))
    }

    pub fn deregister_order_callback(&self, id: SubscriberId) -> bool {
        self.state.lock().order_callbacks.deregister(id)
    }

    /// Subscribe to fills
    pub fn register_fill_callback(
        &self,
        callback: impl Fn(&Fill) + Send + Sync + 'static,
    ) -> SubscriberId {
        self.state.lock().fill_callbacks.register(Box::new(callback))
    }

    pub fn deregister_fill_callback(&self, id: SubscriberId) -> bool {
        self.state.lock().fill_callbacks.deregister(id)
    }

    pub fn stats(&self) -> EngineStats {
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        stats.active_orders = state.active_orders.len();
        stats
    }

    /// Cancel everything in flight and disconnect every provider
    ///
    /// Idempotent; completes even when individual cancels or disconnects
    /// fail.
    pub fn shutdown(&self) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("[EXEC] Shutting down execution engine");

        let (order_ids, providers): (Vec<String>, Vec<Arc<dyn ExecutionProvider>>) = {
            let state = self.state.lock();
            (
                state.active_orders.keys().cloned().collect(),
                state.providers.values().cloned().collect(),
            )
        };

        for order_id in order_ids {
            let update = self.cancel(&order_id);
            if update.status != OrderStatus::Cancelled {
                warn!(
                    "[EXEC] Could not cancel {} during shutdown: {}",
                    order_id, update.reason
                );
            }
        }

        for provider in providers {
            provider.disconnect();
            info!("[EXEC] Disconnected provider: {}", provider.name());
        }

        info!("[EXEC] Execution engine shutdown complete");
    }

    fn finalize(state: &mut EngineState, order_id: &str, cap: usize) {
        if let Some(os) = state.active_orders.remove(order_id) {
            debug!(
                "[EXEC] Order finalized: id={}, submitted_at={}, last_update_at={}",
                order_id, os.submit_ts_ns, os.last_update_ns
            );
            state.completed_orders.insert(order_id.to_string(), os);
            state.completed_order_ids.push_back(order_id.to_string());
            while state.completed_order_ids.len() > cap {
                if let Some(oldest) = state.completed_order_ids.pop_front() {
                    state.completed_orders.remove(&oldest);
                }
            }
        }
    }

    fn publish_order(&self, update: &OrderUpdate) {
        match serde_json::to_string(&OrderEventRecord::from(update)) {
            Ok(payload) => {
                if let Err(e) = self.bus.publish(ORDERS_TOPIC, &payload) {
                    self.note_publish_error(&e);
                }
            }
            Err(e) => error!("[EXEC] Failed to encode order event: {}", e),
        }
    }

    fn publish_fill(&self, fill: &Fill) {
        match serde_json::to_string(&FillEventRecord::from(fill)) {
            Ok(payload) => {
                if let Err(e) = self.bus.publish(FILLS_TOPIC, &payload) {
                    self.note_publish_error(&e);
                }
            }
            Err(e) => error!("[EXEC] Failed to encode fill event: {}", e),
        }
    }

    fn note_publish_error(&self, error: &BusError) {
        let seen = self.publish_errors.fetch_add(1, Ordering::Relaxed);
        if seen < MAX_LOGGED_BUS_ERRORS {
            error!("[EXEC] Failed to publish event: {}", error);
        } else if seen == MAX_LOGGED_BUS_ERRORS {
            error!(
                "[EXEC] Further bus errors suppressed after {}",
                MAX_LOGGED_BUS_ERRORS
            );
        }
    }
}

impl EngineEventSink for ExecutionEngine {
    fn on_fill(&self, fill: Fill) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        info!(
            "[EXEC] Fill received: id={}, order={}, instrument={}, side={}, qty={}, price={}",
            fill.fill_id,
            fill.order_id,
            fill.instrument,
            fill.side.as_str(),
            fill.quantity,
            fill.price
        );

        // Accounting first, then engine-side tracking
        self.positions.on_fill(&fill);
        self.risk.on_fill(&fill);

        state.stats.fills_received += 1;
        state.stats.total_volume += fill.quantity;
        state.stats.last_fill_ts_ns = fill.timestamp_ns;

        let mut fully_filled = false;
        if let Some(os) = state.active_orders.get_mut(&fill.order_id) {
            os.fills.push((fill.quantity, fill.price));
            os.update.filled_qty += fill.quantity;
            os.update.remaining_qty = os.request.quantity - os.update.filled_qty;
            os.update.avg_fill_price = volume_weighted_price(&os.fills);
            os.update.update_ts_ns = fill.timestamp_ns;
            os.last_update_ns = fill.timestamp_ns;

            if os.update.remaining_qty <= QTY_EPSILON {
                os.update.status = OrderStatus::Filled;
                fully_filled = true;
            } else {
                os.update.status = OrderStatus::PartiallyFilled;
            }
        }

        if fully_filled {
            Self::finalize(state, &fill.order_id, self.config.completed_history_cap);
            info!("[EXEC] Order fully filled: id={}", fill.order_id);
        }

        self.publish_fill(&fill);
        state.fill_callbacks.dispatch(&fill);
    }

    fn on_order_update(&self, update: OrderUpdate) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        debug!(
            "[EXEC] Order update: id={}, status={}",
            update.order_id,
            update.status.as_str()
        );

        match state.active_orders.get_mut(&update.order_id) {
            Some(os) => {
                os.update = update.clone();
                os.last_update_ns = update.update_ts_ns;
            }
            None => {
                // Already terminal; no further updates are emitted
                debug!(
                    "[EXEC] Ignoring update for unknown order: id={}",
                    update.order_id
                );
                return;
            }
        }

        if update.status.is_terminal() {
            match update.status {
                OrderStatus::Cancelled | OrderStatus::Expired => {
                    self.risk.on_order_cancelled(&update.order_id)
                }
                OrderStatus::Rejected | OrderStatus::Error => {
                    self.risk.on_order_rejected(&update.order_id)
                }
                // A Filled update releases through the fill path
                _ => {}
            }
            Self::finalize(state, &update.order_id, self.config.completed_history_cap);
        }

        self.publish_order(&update);
        state.order_callbacks.dispatch(&update);
    }
}

/// Volume-weighted average over (quantity, price) pairs
fn volume_weighted_price(fills: &[(Decimal, Decimal)]) -> Decimal {
    let total_qty: Decimal = fills.iter().map(|(qty, _)| *qty).sum();
    if total_qty <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let total_value: Decimal = fills.iter().map(|(qty, price)| qty * price).sum();
    total_value / total_qty
}
