use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Risk configuration limits
///
/// All monetary fields are in account currency. `min_free_capital_pct` is a
/// fraction in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Max contracts per instrument (absolute, signed position)
    pub max_position_size: Decimal,
    /// Max exposure across all positions, reservations included
    pub max_total_exposure: Decimal,
    /// Max size for a single order
    pub max_order_size: Decimal,
    /// Max loss per day before halting
    pub max_daily_loss: Decimal,
    /// Max drawdown from the daily PnL high before halting
    pub max_drawdown_from_high: Decimal,
    /// Orders allowed in any rolling 60 s window
    pub max_orders_per_minute: u32,
    /// Orders allowed per day
    pub max_orders_per_day: u32,
    /// Total capital
    pub bankroll: Decimal,
    /// Fraction of the bankroll that must stay unreserved
    pub min_free_capital_pct: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size: dec!(1000),
            max_total_exposure: dec!(100000),
            max_order_size: dec!(500),
            max_daily_loss: dec!(5000),
            max_drawdown_from_high: dec!(1000),
            max_orders_per_minute: 100,
            max_orders_per_day: 10000,
            bankroll: dec!(100000),
            min_free_capital_pct: dec!(0.1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let limits = RiskLimits::default();
        assert!(limits.max_order_size <= limits.max_position_size);
        assert!(limits.min_free_capital_pct >= dec!(0));
        assert!(limits.min_free_capital_pct <= dec!(1));
    }
}
