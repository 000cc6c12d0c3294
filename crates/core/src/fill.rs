use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::side::OrderSide;

/// A single execution event: `quantity` units traded at `price`
///
/// Instrument and side always match the parent order, and the sum of fill
/// quantities for an order never exceeds the requested quantity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    /// Unique fill ID (broker-assigned)
    pub fill_id: String,
    /// Parent order
    pub order_id: String,
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    /// Broker commission for this fill
    pub commission: Decimal,
    /// When the fill occurred (nanoseconds)
    pub timestamp_ns: i64,
}

impl Fill {
    /// Fill quantity with the side's sign applied (Buy = +, Sell = -)
    pub fn signed_quantity(&self) -> Decimal {
        self.side.signum() * self.quantity
    }

    /// Traded value of this fill (always positive)
    pub fn notional(&self) -> Decimal {
        (self.quantity * self.price).abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_fill(side: OrderSide, quantity: Decimal, price: Decimal) -> Fill {
        Fill {
            fill_id: "f-1".to_string(),
            order_id: "ord-1".to_string(),
            instrument: "EUR/USD".to_string(),
            side,
            quantity,
            price,
            commission: dec!(0.01),
            timestamp_ns: 1,
        }
    }

    #[test]
    fn test_signed_quantity() {
        assert_eq!(
            make_fill(OrderSide::Buy, dec!(100), dec!(1.1)).signed_quantity(),
            dec!(100)
        );
        assert_eq!(
            make_fill(OrderSide::Sell, dec!(100), dec!(1.1)).signed_quantity(),
            dec!(-100)
        );
    }

    #[test]
    fn test_notional() {
        let fill = make_fill(OrderSide::Sell, dec!(100), dec!(1.1));
        assert_eq!(fill.notional(), dec!(110.0));
    }
}
