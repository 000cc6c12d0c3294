use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::values::now_ns;
use crate::OrderStatus;

/// Order state report from the engine or a broker adapter
///
/// `filled_qty + remaining_qty` always equals the request quantity (within
/// tolerance), and `avg_fill_price` is volume-weighted over the order's
/// fills. Once a terminal status has been reported, no further updates are
/// emitted for the order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpdate {
    /// Links back to the originating `OrderRequest`
    pub order_id: String,
    pub status: OrderStatus,
    /// Cumulative filled quantity
    pub filled_qty: Decimal,
    /// Quantity still open
    pub remaining_qty: Decimal,
    /// Volume-weighted average price of fills so far
    pub avg_fill_price: Decimal,
    /// Populated for Rejected / Error / Cancelled outcomes
    pub reason: String,
    /// When the update was produced (nanoseconds)
    pub update_ts_ns: i64,
}

impl OrderUpdate {
    /// A fresh, unfilled update in the given status
    pub fn new(order_id: impl Into<String>, status: OrderStatus, quantity: Decimal) -> Self {
        Self {
            order_id: order_id.into(),
            status,
            filled_qty: Decimal::ZERO,
            remaining_qty: quantity,
            avg_fill_price: Decimal::ZERO,
            reason: String::new(),
            update_ts_ns: now_ns(),
        }
    }

    /// Acknowledged-by-broker update
    pub fn acknowledged(order_id: impl Into<String>, quantity: Decimal) -> Self {
        Self::new(order_id, OrderStatus::Acknowledged, quantity)
    }

    /// Rejected update with a reason
    pub fn rejected(
        order_id: impl Into<String>,
        quantity: Decimal,
        reason: impl Into<String>,
    ) -> Self {
        let mut update = Self::new(order_id, OrderStatus::Rejected, quantity);
        update.reason = reason.into();
        update
    }

    /// Error update with a reason
    pub fn error(
        order_id: impl Into<String>,
        quantity: Decimal,
        reason: impl Into<String>,
    ) -> Self {
        let mut update = Self::new(order_id, OrderStatus::Error, quantity);
        update.reason = reason.into();
        update
    }

    /// Check if the order is terminal (no more updates expected)
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_rejected_carries_reason() {
        let update = OrderUpdate::rejected("ord-1", dec!(10), "no liquidity");
        assert_eq!(update.status, OrderStatus::Rejected);
        assert_eq!(update.reason, "no liquidity");
        assert_eq!(update.filled_qty, dec!(0));
        assert_eq!(update.remaining_qty, dec!(10));
        assert!(update.is_terminal());
    }

    #[test]
    fn test_acknowledged_not_terminal() {
        let update = OrderUpdate::acknowledged("ord-2", dec!(5));
        assert!(!update.is_terminal());
        assert!(update.update_ts_ns > 0);
    }
}
