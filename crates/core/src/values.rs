//! Small shared helpers: quantity tolerance and nanosecond timestamps.

use chrono::Utc;
use rust_decimal::Decimal;

/// Quantities with an absolute value below this are treated as flat.
pub const QTY_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 8);

/// Returns true if the quantity is within tolerance of zero
pub fn is_flat(quantity: Decimal) -> bool {
    quantity.abs() < QTY_EPSILON
}

/// Current wall-clock time in nanoseconds since the Unix epoch
pub fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(0)
}
