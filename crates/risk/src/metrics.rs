use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outcome of a pre-trade risk check
#[derive(Debug, Clone)]
pub struct RiskCheckResult {
    /// Can this order proceed?
    pub allowed: bool,
    /// "OK" or the rejection reason
    pub reason: String,
    /// Capital reserved for this order if approved
    pub reserved_capital: Decimal,
    /// Total exposure if the order fills
    pub projected_exposure: Decimal,
    /// Absolute position size if the order fills
    pub projected_position_size: Decimal,
}

impl RiskCheckResult {
    pub fn approved(
        reserved_capital: Decimal,
        projected_exposure: Decimal,
        projected_position_size: Decimal,
    ) -> Self {
        Self {
            allowed: true,
            reason: "OK".to_string(),
            reserved_capital,
            projected_exposure,
            projected_position_size,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            reserved_capital: Decimal::ZERO,
            projected_exposure: Decimal::ZERO,
            projected_position_size: Decimal::ZERO,
        }
    }
}

/// Point-in-time snapshot of risk state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskMetrics {
    /// Sum of |qty * price| across all positions
    pub total_exposure: Decimal,
    /// Capital currently reserved for in-flight orders
    pub total_reserved: Decimal,
    /// Exposure as a percentage of the bankroll
    pub account_utilization: Decimal,

    /// Realized + unrealized PnL today
    pub daily_pnl: Decimal,
    /// Closed trades only
    pub realized_pnl: Decimal,
    /// Open positions mark-to-market
    pub unrealized_pnl: Decimal,
    /// Highest PnL reached today
    pub daily_high_pnl: Decimal,
    /// Drawdown from the daily high
    pub max_dd_today: Decimal,

    pub orders_submitted_today: u32,
    pub orders_filled_today: u32,
    pub orders_rejected_today: u32,
    pub orders_cancelled_today: u32,

    pub halt_active: bool,
    /// Why halted, when halted
    pub halt_reason: Option<String>,

    pub timestamp_ns: i64,
}
