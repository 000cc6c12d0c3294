//! Event-bus publishing
//!
//! The engine publishes two logical topics: `orders` (status updates) and
//! `fills` (executions), each as a self-describing JSON record. The bus
//! itself is injected; when it is disabled or unreachable the engine keeps
//! operating and logs a bounded number of errors.

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

use hermes_core::{Fill, OrderUpdate};

pub const ORDERS_TOPIC: &str = "orders";
pub const FILLS_TOPIC: &str = "fills";

#[derive(Error, Debug)]
pub enum BusError {
    #[error("bus unavailable: {0}")]
    Unavailable(String),
}

/// Outbound message bus for order and fill events
pub trait EventBus: Send + Sync {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError>;
}

/// Wire form of an order event on the `orders` topic
#[derive(Debug, Serialize)]
pub struct OrderEventRecord<'a> {
    pub order_id: &'a str,
    pub status: &'static str,
    pub filled_qty: Decimal,
    pub remaining_qty: Decimal,
    pub avg_fill_price: Decimal,
    pub reason: &'a str,
    pub timestamp_ns: i64,
}

impl<'a> From<&'a OrderUpdate> for OrderEventRecord<'a> {
    fn from(update: &'a OrderUpdate) -> Self {
        Self {
            order_id: &update.order_id,
            status: update.status.as_str(),
            filled_qty: update.filled_qty,
            remaining_qty: update.remaining_qty,
            avg_fill_price: update.avg_fill_price,
            reason: &update.reason,
            timestamp_ns: update.update_ts_ns,
        }
    }
}

/// Wire form of a fill event on the `fills` topic
#[derive(Debug, Serialize)]
pub struct FillEventRecord<'a> {
    pub fill_id: &'a str,
    pub order_id: &'a str,
    pub instrument: &'a str,
    pub side: &'static str,
    pub quantity: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
    pub timestamp_ns: i64,
}

impl<'a> From<&'a Fill> for FillEventRecord<'a> {
    fn from(fill: &'a Fill) -> Self {
        Self {
            fill_id: &fill.fill_id,
            order_id: &fill.order_id,
            instrument: &fill.instrument,
            side: fill.side.as_str(),
            quantity: fill.quantity,
            price: fill.price,
            commission: fill.commission,
            timestamp_ns: fill.timestamp_ns,
        }
    }
}

/// Bus that drops everything; used when publishing is disabled
pub struct NullBus;

impl EventBus for NullBus {
    fn publish(&self, _topic: &str, _payload: &str) -> Result<(), BusError> {
        Ok(())
    }
}

/// A published message as seen by in-process subscribers
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
}

/// In-process bus backed by a broadcast channel
///
/// Sends are non-blocking and best-effort: with no subscribers the message is
/// dropped, which is not an error.
pub struct BroadcastBus {
    tx: broadcast::Sender<BusMessage>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to every published message
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus for BroadcastBus {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        // Ignore send errors (no subscribers)
        let _ = self.tx.send(BusMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_core::{OrderSide, OrderStatus};
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_record_field_names() {
        let mut update = OrderUpdate::new("ord-1", OrderStatus::PartiallyFilled, dec!(100));
        update.filled_qty = dec!(40);
        update.remaining_qty = dec!(60);
        update.avg_fill_price = dec!(1.1);
        update.update_ts_ns = 42;

        let json = serde_json::to_string(&OrderEventRecord::from(&update)).unwrap();
        assert!(json.contains("\"order_id\":\"ord-1\""));
        assert!(json.contains("\"status\":\"PARTIALLY_FILLED\""));
        assert!(json.contains("\"filled_qty\":\"40\""));
        assert!(json.contains("\"remaining_qty\":\"60\""));
        assert!(json.contains("\"avg_fill_price\":\"1.1\""));
        assert!(json.contains("\"reason\":\"\""));
        assert!(json.contains("\"timestamp_ns\":42"));
    }

    #[test]
    fn test_fill_record_field_names() {
        let fill = Fill {
            fill_id: "f-1".to_string(),
            order_id: "ord-1".to_string(),
            instrument: "EUR/USD".to_string(),
            side: OrderSide::Sell,
            quantity: dec!(10),
            price: dec!(1.1),
            commission: dec!(0.001),
            timestamp_ns: 7,
        };

        let json = serde_json::to_string(&FillEventRecord::from(&fill)).unwrap();
        assert!(json.contains("\"fill_id\":\"f-1\""));
        assert!(json.contains("\"side\":\"SELL\""));
        assert!(json.contains("\"quantity\":\"10\""));
        assert!(json.contains("\"commission\":\"0.001\""));
    }

    #[test]
    fn test_broadcast_bus_delivers() {
        let bus = BroadcastBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(ORDERS_TOPIC, "{}").unwrap();
        let message = rx.try_recv().unwrap();
        assert_eq!(message.topic, "orders");
        assert_eq!(message.payload, "{}");
    }

    #[test]
    fn test_broadcast_bus_without_subscribers_is_ok() {
        let bus = BroadcastBus::new(16);
        assert!(bus.publish(FILLS_TOPIC, "{}").is_ok());
    }
}
