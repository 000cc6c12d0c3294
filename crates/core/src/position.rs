use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::values::is_flat;

/// Current holdings in one instrument
///
/// The quantity is signed: positive = long, negative = short, zero = flat.
/// `entry_price` is the volume-weighted average entry of the currently open
/// leg; `realized_pnl` accumulates only when the position is reduced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub instrument: String,
    /// Signed quantity (+ long, - short)
    pub quantity: Decimal,
    /// Weighted average entry price of the open leg
    pub entry_price: Decimal,
    /// PnL realized today from closed portions
    pub realized_pnl: Decimal,
    /// Total commission paid today
    pub total_commission: Decimal,
    /// Fills applied today
    pub num_fills_today: u64,
    /// Last modification time (nanoseconds)
    pub last_update_ns: i64,
}

impl Position {
    /// A flat position for an instrument that has never traded
    pub fn flat(instrument: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            quantity: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            total_commission: Decimal::ZERO,
            num_fills_today: 0,
            last_update_ns: 0,
        }
    }

    /// Returns true if the quantity is within tolerance of zero
    pub fn is_flat(&self) -> bool {
        is_flat(self.quantity)
    }

    /// Mark-to-market PnL of the open leg at the given price
    pub fn unrealized_at(&self, mark_price: Decimal) -> Decimal {
        if self.is_flat() {
            return Decimal::ZERO;
        }
        self.quantity * (mark_price - self.entry_price)
    }

    /// Absolute exposure at the given price
    pub fn notional_at(&self, mark_price: Decimal) -> Decimal {
        (self.quantity * mark_price).abs()
    }
}
