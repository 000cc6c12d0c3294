use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::side::OrderSide;
use crate::time_in_force::TimeInForce;
use crate::values::now_ns;
use crate::OrderType;

/// Order intent from a strategy
///
/// The `order_id` is caller-assigned and must be unique within a process run;
/// the core never generates order ids of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Caller-assigned unique order ID
    pub order_id: String,
    /// Instrument being traded (EUR/USD, AAPL, ...)
    pub instrument: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Required for Limit and StopLimit orders
    pub price: Option<Decimal>,
    /// Required for Stop and StopLimit orders
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    /// Which strategy placed this order
    pub strategy_id: String,
    /// When the request was created (nanoseconds)
    pub submit_ts_ns: i64,
}

impl OrderRequest {
    /// Create a market order request
    pub fn market(
        order_id: impl Into<String>,
        instrument: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            instrument: instrument.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            stop_price: None,
            // Market orders are immediate by nature
            time_in_force: TimeInForce::Ioc,
            strategy_id: String::new(),
            submit_ts_ns: now_ns(),
        }
    }

    /// Create a limit order request
    pub fn limit(
        order_id: impl Into<String>,
        instrument: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        time_in_force: TimeInForce,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            instrument: instrument.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            stop_price: None,
            time_in_force,
            strategy_id: String::new(),
            submit_ts_ns: now_ns(),
        }
    }

    /// Create a stop order request
    pub fn stop(
        order_id: impl Into<String>,
        instrument: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        stop_price: Decimal,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            instrument: instrument.into(),
            side,
            order_type: OrderType::Stop,
            quantity,
            price: None,
            stop_price: Some(stop_price),
            time_in_force: TimeInForce::Gtc,
            strategy_id: String::new(),
            submit_ts_ns: now_ns(),
        }
    }

    /// Create a stop-limit order request
    pub fn stop_limit(
        order_id: impl Into<String>,
        instrument: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        stop_price: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            instrument: instrument.into(),
            side,
            order_type: OrderType::StopLimit,
            quantity,
            price: Some(price),
            stop_price: Some(stop_price),
            time_in_force: TimeInForce::Gtc,
            strategy_id: String::new(),
            submit_ts_ns: now_ns(),
        }
    }

    /// Attribute the order to a strategy
    pub fn with_strategy(mut self, strategy_id: impl Into<String>) -> Self {
        self.strategy_id = strategy_id.into();
        self
    }

    /// Override the time in force
    pub fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = tif;
        self
    }

    /// Validate price fields against the order type
    pub fn validate(&self) -> bool {
        if self.quantity <= Decimal::ZERO {
            return false;
        }
        let price_ok = !self.order_type.requires_price()
            || self.price.map(|p| p > Decimal::ZERO).unwrap_or(false);
        let stop_ok = !self.order_type.requires_stop_price()
            || self.stop_price.map(|p| p > Decimal::ZERO).unwrap_or(false);
        price_ok && stop_ok
    }

    /// Fill quantity with the side's sign applied
    pub fn signed_quantity(&self) -> Decimal {
        self.side.signum() * self.quantity
    }
}

/// In-flight order modification request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderModification {
    /// Which order to modify
    pub order_id: String,
    pub new_price: Option<Decimal>,
    pub new_quantity: Option<Decimal>,
    pub new_stop_price: Option<Decimal>,
    pub timestamp_ns: i64,
}

impl OrderModification {
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            new_price: None,
            new_quantity: None,
            new_stop_price: None,
            timestamp_ns: now_ns(),
        }
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.new_price = Some(price);
        self
    }

    pub fn with_quantity(mut self, quantity: Decimal) -> Self {
        self.new_quantity = Some(quantity);
        self
    }

    pub fn with_stop_price(mut self, stop_price: Decimal) -> Self {
        self.new_stop_price = Some(stop_price);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_market_order_defaults() {
        let order = OrderRequest::market("ord-1", "EUR/USD", OrderSide::Buy, dec!(100));
        assert_eq!(order.order_type, OrderType::Market);
        assert_eq!(order.time_in_force, TimeInForce::Ioc);
        assert!(order.price.is_none());
        assert!(order.validate());
    }

    #[test]
    fn test_limit_order_requires_positive_price() {
        let order = OrderRequest::limit(
            "ord-2",
            "EUR/USD",
            OrderSide::Sell,
            dec!(50),
            dec!(1.1000),
            TimeInForce::Gtc,
        );
        assert!(order.validate());

        let mut bad = order.clone();
        bad.price = Some(dec!(0));
        assert!(!bad.validate());

        let mut missing = order;
        missing.price = None;
        assert!(!missing.validate());
    }

    #[test]
    fn test_stop_limit_requires_both_prices() {
        let order = OrderRequest::stop_limit(
            "ord-3",
            "EUR/USD",
            OrderSide::Sell,
            dec!(10),
            dec!(1.0950),
            dec!(1.0940),
        );
        assert!(order.validate());

        let mut bad = order;
        bad.stop_price = None;
        assert!(!bad.validate());
    }

    #[test]
    fn test_signed_quantity() {
        let buy = OrderRequest::market("b", "EUR/USD", OrderSide::Buy, dec!(25));
        let sell = OrderRequest::market("s", "EUR/USD", OrderSide::Sell, dec!(25));
        assert_eq!(buy.signed_quantity(), dec!(25));
        assert_eq!(sell.signed_quantity(), dec!(-25));
    }

    #[test]
    fn test_nonpositive_quantity_invalid() {
        let order = OrderRequest::market("z", "EUR/USD", OrderSide::Buy, dec!(0));
        assert!(!order.validate());
    }
}
