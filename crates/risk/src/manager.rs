//! Pre-trade gating, capital reservation and halt arbitration
//!
//! Every check runs under the manager's single mutex, in a fixed order, and
//! short-circuits on the first failure. Approval records a capital
//! reservation keyed by order id; the reservation is released on the first
//! fill, on rejection, or on cancellation of the parent order.
//!
//! The halt flag is sticky: once set it stays set until `reset_daily`, and
//! the first-observed reason is preserved.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use hermes_core::{now_ns, Fill, OrderRequest};
use hermes_position::PositionManager;

use crate::limits::RiskLimits;
use crate::metrics::{RiskCheckResult, RiskMetrics};

const ONE_MINUTE_NS: i64 = 60_000_000_000;

#[derive(Default)]
struct RiskState {
    positions: Option<Arc<PositionManager>>,
    market_prices: HashMap<String, Decimal>,
    /// order_id -> capital reserved at approval
    reserved_by_order: HashMap<String, Decimal>,
    /// Approval timestamps inside the rolling rate-limit window
    recent_order_ts_ns: Vec<i64>,
    daily_pnl: Decimal,
    daily_high_pnl: Decimal,
    orders_submitted_today: u32,
    orders_filled_today: u32,
    orders_rejected_today: u32,
    orders_cancelled_today: u32,
    /// Some(reason) while halted
    halt_reason: Option<String>,
}

impl RiskState {
    fn total_reserved(&self) -> Decimal {
        self.reserved_by_order.values().copied().sum()
    }

    fn current_exposure(&self) -> Decimal {
        match &self.positions {
            Some(pm) => pm.total_exposure(&self.market_prices),
            None => Decimal::ZERO,
        }
    }

    fn recompute_daily_pnl(&mut self) {
        if let Some(pm) = &self.positions {
            self.daily_pnl =
                pm.total_realized_pnl() + pm.total_unrealized_pnl(&self.market_prices);
        }
    }

    fn reject(&mut self, order_id: &str, reason: String) -> RiskCheckResult {
        self.orders_rejected_today += 1;
        warn!("[RISK] Order rejected: id={}, reason={}", order_id, reason);
        RiskCheckResult::rejected(reason)
    }
}

/// Enforces trading limits ahead of every submission
pub struct RiskManager {
    limits: RiskLimits,
    state: Mutex<RiskState>,
}

impl RiskManager {
    pub fn new(limits: RiskLimits) -> Self {
        info!(
            "[RISK] Risk manager initialized: max_position={}, max_exposure={}, max_daily_loss={}",
            limits.max_position_size, limits.max_total_exposure, limits.max_daily_loss
        );
        Self {
            limits,
            state: Mutex::new(RiskState::default()),
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Wire in the position manager. One-time; later calls are ignored.
    pub fn set_position_manager(&self, positions: Arc<PositionManager>) {
        let mut state = self.state.lock();
        if state.positions.is_some() {
            warn!("[RISK] Position manager already wired, ignoring");
            return;
        }
        state.positions = Some(positions);
    }

    /// Replace the market-price snapshot used for exposure and mark-to-market
    pub fn update_market_prices(&self, prices: HashMap<String, Decimal>) {
        let mut state = self.state.lock();
        state.market_prices = prices;
        state.recompute_daily_pnl();
    }

    /// Pre-trade check; approval reserves capital for the order
    ///
    /// `reference_price` is the engine-supplied mark for order types without
    /// a limit price. Limit and stop-limit orders are valued at their limit
    /// price; market and stop orders fall back to the latest market-price
    /// snapshot, and are rejected when no mark is known.
    pub fn check_order(
        &self,
        order: &OrderRequest,
        reference_price: Option<Decimal>,
    ) -> RiskCheckResult {
        let mut state = self.state.lock();

        // 1. Halt gate
        if let Some(reason) = &state.halt_reason {
            let reason = format!("Trading halted: {}", reason);
            return state.reject(&order.order_id, reason);
        }

        // 2. Parameter validation
        if order.quantity <= Decimal::ZERO {
            return state.reject(&order.order_id, "Invalid quantity: must be > 0".to_string());
        }
        if order.order_type.requires_price()
            && !order.price.map(|p| p > Decimal::ZERO).unwrap_or(false)
        {
            return state.reject(
                &order.order_id,
                "Invalid limit price: must be > 0".to_string(),
            );
        }
        if order.order_type.requires_stop_price()
            && !order.stop_price.map(|p| p > Decimal::ZERO).unwrap_or(false)
        {
            return state.reject(
                &order.order_id,
                "Invalid stop price: must be > 0".to_string(),
            );
        }

        // 3. Single-order size
        if order.quantity > self.limits.max_order_size {
            let reason = format!(
                "Order size exceeds limit: {} > {}",
                order.quantity, self.limits.max_order_size
            );
            return state.reject(&order.order_id, reason);
        }

        // 4. Rolling one-minute rate limit
        let now = now_ns();
        state
            .recent_order_ts_ns
            .retain(|ts| now - ts <= ONE_MINUTE_NS);
        if state.recent_order_ts_ns.len() >= self.limits.max_orders_per_minute as usize {
            let reason = format!(
                "Order rate limit exceeded: {} orders/min",
                self.limits.max_orders_per_minute
            );
            return state.reject(&order.order_id, reason);
        }

        // 5. Daily order count
        if state.orders_submitted_today >= self.limits.max_orders_per_day {
            let reason = format!(
                "Daily order limit exceeded: {}",
                self.limits.max_orders_per_day
            );
            return state.reject(&order.order_id, reason);
        }

        // 6. Order value at the reference price
        let reference = if order.order_type.requires_price() {
            order.price
        } else {
            reference_price.or_else(|| state.market_prices.get(&order.instrument).copied())
        };
        let order_price = match reference {
            Some(p) => p,
            None => {
                let reason = format!(
                    "No market price for {}: update market prices before submitting market orders",
                    order.instrument
                );
                return state.reject(&order.order_id, reason);
            }
        };
        let order_value = (order.quantity * order_price).abs();

        // 7-8. Projected position after the order fills
        let current_qty = match &state.positions {
            Some(pm) => pm.quantity(&order.instrument),
            None => Decimal::ZERO,
        };
        let new_qty = current_qty + order.signed_quantity();
        if new_qty.abs() > self.limits.max_position_size {
            let reason = format!(
                "Position size limit exceeded: new_qty={}, limit={}",
                new_qty, self.limits.max_position_size
            );
            return state.reject(&order.order_id, reason);
        }

        // 9. Projected exposure, reservations included
        let current_exposure = state.current_exposure();
        let total_reserved = state.total_reserved();
        if current_exposure + total_reserved + order_value > self.limits.max_total_exposure {
            let reason = format!(
                "Exposure limit exceeded: would add {}, limit={}",
                order_value, self.limits.max_total_exposure
            );
            return state.reject(&order.order_id, reason);
        }

        // 10. Daily loss gate - breach halts further trading
        if state.daily_pnl < -self.limits.max_daily_loss {
            let reason = format!(
                "Daily loss limit exceeded: {}, limit={}",
                state.daily_pnl, -self.limits.max_daily_loss
            );
            state.halt_reason = Some(reason.clone());
            error!(
                "[RISK] Order rejected and HALT: id={}, reason={}",
                order.order_id, reason
            );
            state.orders_rejected_today += 1;
            return RiskCheckResult::rejected(reason);
        }

        // 11. Free-capital requirement
        let used_capital = current_exposure + total_reserved + order_value;
        let free_capital = self.limits.bankroll - used_capital;
        let min_free = self.limits.bankroll * self.limits.min_free_capital_pct;
        if free_capital < min_free {
            let reason = format!(
                "Insufficient free capital: {} < {}",
                free_capital, min_free
            );
            return state.reject(&order.order_id, reason);
        }

        // Approved: reserve capital and record the submission
        state
            .reserved_by_order
            .insert(order.order_id.clone(), order_value);
        state.recent_order_ts_ns.push(now);
        state.orders_submitted_today += 1;

        info!(
            "[RISK] Order approved: id={}, instrument={}, qty={}, reserved={}",
            order.order_id, order.instrument, order.quantity, order_value
        );

        RiskCheckResult::approved(order_value, current_exposure + order_value, new_qty.abs())
    }

    /// Release the order's reservation, refresh PnL, and arm the drawdown halt
    pub fn on_fill(&self, fill: &Fill) {
        let mut state = self.state.lock();

        state.orders_filled_today += 1;

        if let Some(reserved) = state.reserved_by_order.remove(&fill.order_id) {
            debug!(
                "[RISK] Freeing reserved capital for order {}: {}",
                fill.order_id, reserved
            );
        }

        state.recompute_daily_pnl();
        if state.daily_pnl > state.daily_high_pnl {
            state.daily_high_pnl = state.daily_pnl;
        }

        let drawdown = state.daily_high_pnl - state.daily_pnl;
        if drawdown > self.limits.max_drawdown_from_high && state.halt_reason.is_none() {
            let reason = format!("Max drawdown from high exceeded: {}", drawdown);
            error!("[RISK] HALT TRIGGERED: {}", reason);
            state.halt_reason = Some(reason);
        }
    }

    /// Release the reservation for a rejected order
    pub fn on_order_rejected(&self, order_id: &str) {
        let mut state = self.state.lock();
        state.orders_rejected_today += 1;
        if let Some(reserved) = state.reserved_by_order.remove(order_id) {
            debug!(
                "[RISK] Freeing reserved capital for rejected order {}: {}",
                order_id, reserved
            );
        }
    }

    /// Release the reservation for a cancelled (or expired) order
    pub fn on_order_cancelled(&self, order_id: &str) {
        let mut state = self.state.lock();
        state.orders_cancelled_today += 1;
        if let Some(reserved) = state.reserved_by_order.remove(order_id) {
            debug!(
                "[RISK] Freeing reserved capital for cancelled order {}: {}",
                order_id, reserved
            );
        }
    }

    pub fn should_halt(&self) -> bool {
        self.state.lock().halt_reason.is_some()
    }

    pub fn halt_reason(&self) -> Option<String> {
        self.state.lock().halt_reason.clone()
    }

    /// Point-in-time snapshot of risk state
    pub fn metrics(&self) -> RiskMetrics {
        let state = self.state.lock();

        let (total_exposure, realized_pnl, unrealized_pnl) = match &state.positions {
            Some(pm) => (
                pm.total_exposure(&state.market_prices),
                pm.total_realized_pnl(),
                pm.total_unrealized_pnl(&state.market_prices),
            ),
            None => (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO),
        };

        let account_utilization = if self.limits.bankroll > Decimal::ZERO {
            total_exposure / self.limits.bankroll * dec!(100)
        } else {
            Decimal::ZERO
        };

        RiskMetrics {
            total_exposure,
            total_reserved: state.total_reserved(),
            account_utilization,
            daily_pnl: state.daily_pnl,
            realized_pnl,
            unrealized_pnl,
            daily_high_pnl: state.daily_high_pnl,
            max_dd_today: state.daily_high_pnl - state.daily_pnl,
            orders_submitted_today: state.orders_submitted_today,
            orders_filled_today: state.orders_filled_today,
            orders_rejected_today: state.orders_rejected_today,
            orders_cancelled_today: state.orders_cancelled_today,
            halt_active: state.halt_reason.is_some(),
            halt_reason: state.halt_reason.clone(),
            timestamp_ns: now_ns(),
        }
    }

    /// Clear daily PnL, counters, rate-limit history, reservations and halt
    pub fn reset_daily(&self) {
        let mut state = self.state.lock();
        state.daily_pnl = Decimal::ZERO;
        state.daily_high_pnl = Decimal::ZERO;
        state.orders_submitted_today = 0;
        state.orders_filled_today = 0;
        state.orders_rejected_today = 0;
        state.orders_cancelled_today = 0;
        state.recent_order_ts_ns.clear();
        state.reserved_by_order.clear();
        state.halt_reason = None;
        info!("[RISK] Daily counters reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_core::{OrderSide, TimeInForce};

    fn make_limits() -> RiskLimits {
        RiskLimits::default()
    }

    fn make_manager() -> (RiskManager, Arc<PositionManager>) {
        let positions = Arc::new(PositionManager::new());
        let risk = RiskManager::new(make_limits());
        risk.set_position_manager(Arc::clone(&positions));
        (risk, positions)
    }

    fn limit_buy(id: &str, quantity: Decimal, price: Decimal) -> OrderRequest {
        OrderRequest::limit(id, "EUR/USD", OrderSide::Buy, quantity, price, TimeInForce::Gtc)
    }

    fn make_fill(order_id: &str, side: OrderSide, quantity: Decimal, price: Decimal) -> Fill {
        Fill {
            fill_id: format!("f-{}", order_id),
            order_id: order_id.to_string(),
            instrument: "EUR/USD".to_string(),
            side,
            quantity,
            price,
            commission: Decimal::ZERO,
            timestamp_ns: now_ns(),
        }
    }

    #[test]
    fn test_approval_reserves_capital() {
        let (risk, _) = make_manager();
        let result = risk.check_order(&limit_buy("ord-1", dec!(100), dec!(1.1000)), None);

        assert!(result.allowed);
        assert_eq!(result.reason, "OK");
        assert_eq!(result.reserved_capital, dec!(110.0));
        assert_eq!(risk.metrics().total_reserved, dec!(110.0));
        assert_eq!(risk.metrics().orders_submitted_today, 1);
    }

    #[test]
    fn test_invalid_quantity_rejected() {
        let (risk, _) = make_manager();
        let result = risk.check_order(&limit_buy("ord-1", dec!(0), dec!(1.1)), None);
        assert!(!result.allowed);
        assert!(result.reason.contains("Invalid quantity"));
        assert_eq!(risk.metrics().orders_rejected_today, 1);
        assert_eq!(risk.metrics().total_reserved, dec!(0));
    }

    #[test]
    fn test_missing_limit_price_rejected() {
        let (risk, _) = make_manager();
        let mut order = limit_buy("ord-1", dec!(10), dec!(1.1));
        order.price = None;
        let result = risk.check_order(&order, None);
        assert!(!result.allowed);
        assert!(result.reason.contains("Invalid limit price"));
    }

    #[test]
    fn test_missing_stop_price_rejected() {
        let (risk, _) = make_manager();
        let mut order = OrderRequest::stop("ord-1", "EUR/USD", OrderSide::Sell, dec!(10), dec!(1.09));
        order.stop_price = None;
        let result = risk.check_order(&order, Some(dec!(1.10)));
        assert!(!result.allowed);
        assert!(result.reason.contains("Invalid stop price"));
    }

    #[test]
    fn test_order_size_boundary() {
        let (risk, _) = make_manager();

        // Exactly at the limit is approved
        let at_limit = limit_buy("ord-1", dec!(500), dec!(1.1));
        assert!(risk.check_order(&at_limit, None).allowed);

        // One tick over is rejected
        let over = limit_buy("ord-2", dec!(500.01), dec!(1.1));
        let result = risk.check_order(&over, None);
        assert!(!result.allowed);
        assert!(result.reason.contains("Order size exceeds limit"));
    }

    #[test]
    fn test_rate_limit_window() {
        let mut limits = make_limits();
        limits.max_orders_per_minute = 2;
        let risk = RiskManager::new(limits);
        risk.set_position_manager(Arc::new(PositionManager::new()));

        assert!(risk.check_order(&limit_buy("a", dec!(1), dec!(1.1)), None).allowed);
        assert!(risk.check_order(&limit_buy("b", dec!(1), dec!(1.1)), None).allowed);

        let result = risk.check_order(&limit_buy("c", dec!(1), dec!(1.1)), None);
        assert!(!result.allowed);
        assert!(result.reason.contains("rate limit"));
    }

    #[test]
    fn test_daily_order_cap() {
        let mut limits = make_limits();
        limits.max_orders_per_day = 1;
        let risk = RiskManager::new(limits);
        risk.set_position_manager(Arc::new(PositionManager::new()));

        assert!(risk.check_order(&limit_buy("a", dec!(1), dec!(1.1)), None).allowed);
        let result = risk.check_order(&limit_buy("b", dec!(1), dec!(1.1)), None);
        assert!(!result.allowed);
        assert!(result.reason.contains("Daily order limit"));
    }

    #[test]
    fn test_market_order_requires_mark() {
        let (risk, _) = make_manager();
        let order = OrderRequest::market("ord-1", "EUR/USD", OrderSide::Buy, dec!(10));

        // No snapshot, no caller-supplied mark
        let result = risk.check_order(&order, None);
        assert!(!result.allowed);
        assert!(result.reason.contains("No market price"));

        // With a snapshot the same order passes
        let mut prices = HashMap::new();
        prices.insert("EUR/USD".to_string(), dec!(1.1000));
        risk.update_market_prices(prices);
        let result = risk.check_order(&order, None);
        assert!(result.allowed);
        assert_eq!(result.reserved_capital, dec!(11.0));
    }

    #[test]
    fn test_position_limit_projection() {
        let (risk, positions) = make_manager();
        positions.on_fill(&make_fill("seed", OrderSide::Buy, dec!(900), dec!(1.0)));

        // 900 + 150 would break the 1000 cap
        let result = risk.check_order(&limit_buy("ord-1", dec!(150), dec!(1.0)), None);
        assert!(!result.allowed);
        assert!(result.reason.contains("Position size limit"));

        // Selling from a long position is fine
        let sell = OrderRequest::limit(
            "ord-2",
            "EUR/USD",
            OrderSide::Sell,
            dec!(150),
            dec!(1.0),
            TimeInForce::Gtc,
        );
        assert!(risk.check_order(&sell, None).allowed);
    }

    #[test]
    fn test_exposure_limit_counts_reservations() {
        let mut limits = make_limits();
        limits.max_total_exposure = dec!(1000);
        limits.bankroll = dec!(1000000);
        let risk = RiskManager::new(limits);
        risk.set_position_manager(Arc::new(PositionManager::new()));

        // Reserve 600 of the 1000 budget
        assert!(risk.check_order(&limit_buy("a", dec!(6), dec!(100)), None).allowed);

        // Another 600 would cross even though nothing filled yet
        let result = risk.check_order(&limit_buy("b", dec!(6), dec!(100)), None);
        assert!(!result.allowed);
        assert!(result.reason.contains("Exposure limit"));
    }

    #[test]
    fn test_free_capital_gate() {
        let mut limits = make_limits();
        limits.bankroll = dec!(1000);
        limits.min_free_capital_pct = dec!(0.5);
        limits.max_total_exposure = dec!(10000);
        let risk = RiskManager::new(limits);
        risk.set_position_manager(Arc::new(PositionManager::new()));

        // 600 used of 1000 leaves 400 free, below the 500 floor
        let result = risk.check_order(&limit_buy("a", dec!(6), dec!(100)), None);
        assert!(!result.allowed);
        assert!(result.reason.contains("Insufficient free capital"));

        // 400 used leaves 600 free
        assert!(risk.check_order(&limit_buy("b", dec!(4), dec!(100)), None).allowed);
    }

    #[test]
    fn test_daily_loss_halts_and_sticks() {
        let (risk, positions) = make_manager();

        // Long 30 @ 2000, marked down to 1800: -6000 on the day
        positions.on_fill(&Fill {
            instrument: "XAU/USD".to_string(),
            ..make_fill("seed", OrderSide::Buy, dec!(30), dec!(2000))
        });
        let mut prices = HashMap::new();
        prices.insert("XAU/USD".to_string(), dec!(1800));
        risk.update_market_prices(prices);

        let order = OrderRequest::limit(
            "ord-1",
            "XAU/USD",
            OrderSide::Buy,
            dec!(1),
            dec!(1800),
            TimeInForce::Gtc,
        );
        let result = risk.check_order(&order, None);
        assert!(!result.allowed);
        assert!(result.reason.contains("Daily loss"));
        assert!(risk.should_halt());

        // Halt gates every further order until the daily reset
        let again = risk.check_order(&order, None);
        assert!(!again.allowed);
        assert!(again.reason.contains("Trading halted"));

        risk.reset_daily();
        assert!(!risk.should_halt());
        assert!(risk.check_order(&order, None).allowed);
    }

    #[test]
    fn test_drawdown_halt_preserves_first_reason() {
        let mut limits = make_limits();
        limits.max_drawdown_from_high = dec!(100);
        let risk = RiskManager::new(limits);
        let positions = Arc::new(PositionManager::new());
        risk.set_position_manager(Arc::clone(&positions));

        // Run PnL up to +200, then give 150 of it back
        positions.on_fill(&make_fill("o1", OrderSide::Buy, dec!(1000), dec!(1.00)));
        let mut prices = HashMap::new();
        prices.insert("EUR/USD".to_string(), dec!(1.20));
        risk.update_market_prices(prices.clone());
        risk.on_fill(&make_fill("o1", OrderSide::Buy, dec!(0.00000001), dec!(1.20)));
        assert!(!risk.should_halt());

        prices.insert("EUR/USD".to_string(), dec!(1.05));
        risk.update_market_prices(prices);
        risk.on_fill(&make_fill("o2", OrderSide::Buy, dec!(0.00000001), dec!(1.05)));

        assert!(risk.should_halt());
        let first = risk.halt_reason().unwrap();
        assert!(first.contains("drawdown from high"));

        // A second trigger must not overwrite the stored reason
        risk.on_fill(&make_fill("o3", OrderSide::Buy, dec!(0.00000001), dec!(1.02)));
        assert_eq!(risk.halt_reason().unwrap(), first);
    }

    #[test]
    fn test_reservation_released_on_each_outcome() {
        let (risk, _) = make_manager();

        risk.check_order(&limit_buy("fill-me", dec!(10), dec!(1.0)), None);
        risk.check_order(&limit_buy("cancel-me", dec!(10), dec!(1.0)), None);
        risk.check_order(&limit_buy("reject-me", dec!(10), dec!(1.0)), None);
        assert_eq!(risk.metrics().total_reserved, dec!(30.0));

        risk.on_fill(&make_fill("fill-me", OrderSide::Buy, dec!(10), dec!(1.0)));
        assert_eq!(risk.metrics().total_reserved, dec!(20.0));

        risk.on_order_cancelled("cancel-me");
        assert_eq!(risk.metrics().total_reserved, dec!(10.0));

        risk.on_order_rejected("reject-me");
        assert_eq!(risk.metrics().total_reserved, dec!(0));
        assert_eq!(risk.metrics().orders_cancelled_today, 1);
    }

    #[test]
    fn test_metrics_snapshot() {
        let (risk, positions) = make_manager();
        positions.on_fill(&make_fill("o1", OrderSide::Buy, dec!(100), dec!(1.00)));
        let mut prices = HashMap::new();
        prices.insert("EUR/USD".to_string(), dec!(1.10));
        risk.update_market_prices(prices);

        let metrics = risk.metrics();
        assert_eq!(metrics.total_exposure, dec!(110.0));
        assert_eq!(metrics.unrealized_pnl, dec!(10.0));
        assert_eq!(metrics.daily_pnl, dec!(10.0));
        assert!(!metrics.halt_active);
        assert!(metrics.timestamp_ns > 0);
    }
}
