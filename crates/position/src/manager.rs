//! Position tracking under concurrent fill updates
//!
//! One mutex guards the whole book. `on_fill` applies signed quantities
//! (Buy = +, Sell = -), maintains the volume-weighted average entry of the
//! open leg, and realizes PnL on reductions. Queries return snapshots;
//! callers never see a reference into the locked state.

use std::collections::HashMap;

use log::{info, warn};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use hermes_core::{is_flat, Fill, Position, QTY_EPSILON};

use crate::persist::{PersistError, PositionWriter};

/// Aggregate snapshot across all positions
#[derive(Debug, Clone, Default)]
pub struct PositionStats {
    /// Positions with a non-flat quantity
    pub open_positions: usize,
    pub total_realized_pnl: Decimal,
    /// Mark-to-market over instruments with a supplied price
    pub total_unrealized_pnl: Decimal,
    pub total_commission_paid: Decimal,
    pub fills_today: u64,
}

#[derive(Default)]
struct Book {
    positions: HashMap<String, Position>,
    total_realized_pnl: Decimal,
    fills_today: u64,
}

/// Authoritative per-instrument position and PnL accounting
pub struct PositionManager {
    book: Mutex<Book>,
}

impl PositionManager {
    pub fn new() -> Self {
        info!("[POSITION] Position manager initialized");
        Self {
            book: Mutex::new(Book::default()),
        }
    }

    /// Apply a fill to the book
    ///
    /// Fills with a non-positive quantity are logged and ignored; the caller
    /// guarantees each fill is delivered exactly once.
    pub fn on_fill(&self, fill: &Fill) {
        if fill.quantity <= Decimal::ZERO {
            warn!(
                "[POSITION] Ignoring fill with non-positive quantity: fill_id={}, qty={}",
                fill.fill_id, fill.quantity
            );
            return;
        }

        let signed_qty = fill.signed_quantity();
        let mut guard = self.book.lock();
        let book = &mut *guard;
        book.fills_today += 1;

        let pos = book
            .positions
            .entry(fill.instrument.clone())
            .or_insert_with(|| Position::flat(fill.instrument.clone()));

        let was_flat = is_flat(pos.quantity);
        let same_direction = pos.quantity * signed_qty > Decimal::ZERO;

        if same_direction || was_flat {
            // Increasing the position or opening from flat
            pos.entry_price =
                weighted_entry(pos.quantity, pos.entry_price, signed_qty, fill.price);
            pos.quantity += signed_qty;
            if was_flat {
                info!(
                    "[POSITION] Position opened: instrument={}, qty={}, entry_price={}",
                    fill.instrument, pos.quantity, pos.entry_price
                );
            } else {
                info!(
                    "[POSITION] Position increased: instrument={}, new_qty={}, new_entry={}",
                    fill.instrument, pos.quantity, pos.entry_price
                );
            }
        } else {
            // Reducing or reversing - realize PnL on the closed portion
            let realized = realized_on_close(pos.quantity, pos.entry_price, signed_qty, fill.price);
            pos.realized_pnl += realized;
            book.total_realized_pnl += realized;

            let old_qty = pos.quantity;
            pos.quantity += signed_qty;

            let crossed_zero = (old_qty > Decimal::ZERO && pos.quantity < -QTY_EPSILON)
                || (old_qty < Decimal::ZERO && pos.quantity > QTY_EPSILON);
            if crossed_zero {
                // The excess opens a fresh leg at the fill price
                pos.entry_price = fill.price;
                info!(
                    "[POSITION] Position reversed: instrument={}, new_qty={}, realized_pnl={}",
                    fill.instrument, pos.quantity, realized
                );
            } else if pos.is_flat() {
                info!(
                    "[POSITION] Position closed: instrument={}, realized_pnl={}",
                    fill.instrument, realized
                );
            } else {
                info!(
                    "[POSITION] Position reduced: instrument={}, new_qty={}, realized_pnl={}",
                    fill.instrument, pos.quantity, realized
                );
            }
        }

        pos.num_fills_today += 1;
        pos.total_commission += fill.commission;
        pos.last_update_ns = fill.timestamp_ns;
    }

    /// Snapshot of the position for an instrument; flat if never traded
    pub fn position(&self, instrument: &str) -> Position {
        self.book
            .lock()
            .positions
            .get(instrument)
            .cloned()
            .unwrap_or_else(|| Position::flat(instrument))
    }

    /// Snapshot of every tracked position
    pub fn all_positions(&self) -> HashMap<String, Position> {
        self.book.lock().positions.clone()
    }

    /// Signed quantity for an instrument; zero if never traded
    pub fn quantity(&self, instrument: &str) -> Decimal {
        self.book
            .lock()
            .positions
            .get(instrument)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO)
    }

    /// True if the instrument has a non-flat position
    pub fn has_position(&self, instrument: &str) -> bool {
        self.book
            .lock()
            .positions
            .get(instrument)
            .map(|p| !p.is_flat())
            .unwrap_or(false)
    }

    /// Mark-to-market PnL for one instrument at the given price
    pub fn unrealized_pnl(&self, instrument: &str, mark_price: Decimal) -> Decimal {
        self.book
            .lock()
            .positions
            .get(instrument)
            .map(|p| p.unrealized_at(mark_price))
            .unwrap_or(Decimal::ZERO)
    }

    /// Mark-to-market PnL summed over instruments present in both maps
    pub fn total_unrealized_pnl(&self, prices: &HashMap<String, Decimal>) -> Decimal {
        let book = self.book.lock();
        book.positions
            .iter()
            .filter(|(_, pos)| !pos.is_flat())
            .filter_map(|(instrument, pos)| {
                prices.get(instrument).map(|mark| pos.unrealized_at(*mark))
            })
            .sum()
    }

    /// Sum of |quantity * price| over instruments with a supplied price
    pub fn total_exposure(&self, prices: &HashMap<String, Decimal>) -> Decimal {
        let book = self.book.lock();
        book.positions
            .iter()
            .filter(|(_, pos)| !pos.is_flat())
            .filter_map(|(instrument, pos)| {
                prices.get(instrument).map(|mark| pos.notional_at(*mark))
            })
            .sum()
    }

    /// Realized PnL accumulated today across all instruments
    pub fn total_realized_pnl(&self) -> Decimal {
        self.book.lock().total_realized_pnl
    }

    /// Aggregate snapshot
    pub fn stats(&self, prices: &HashMap<String, Decimal>) -> PositionStats {
        let book = self.book.lock();
        let mut stats = PositionStats {
            total_realized_pnl: book.total_realized_pnl,
            fills_today: book.fills_today,
            ..Default::default()
        };

        for (instrument, pos) in &book.positions {
            if !pos.is_flat() {
                stats.open_positions += 1;
            }
            stats.total_commission_paid += pos.total_commission;
            if let Some(mark) = prices.get(instrument) {
                stats.total_unrealized_pnl += pos.unrealized_at(*mark);
            }
        }

        stats
    }

    /// Zero the daily counters; positions carry overnight
    ///
    /// Quantity and entry price are preserved, only realized PnL, fill
    /// counts and commission reset.
    pub fn reset_daily(&self) {
        let mut book = self.book.lock();
        book.total_realized_pnl = Decimal::ZERO;
        book.fills_today = 0;
        for pos in book.positions.values_mut() {
            pos.realized_pnl = Decimal::ZERO;
            pos.num_fills_today = 0;
            pos.total_commission = Decimal::ZERO;
        }
        info!("[POSITION] Daily position counters reset");
    }

    /// Serialize the current snapshot through a collaborator-provided writer
    pub fn persist(&self, writer: &dyn PositionWriter) -> Result<(), PersistError> {
        let snapshot: Vec<Position> = {
            let book = self.book.lock();
            book.positions.values().cloned().collect()
        };

        for position in &snapshot {
            writer.write_position(position)?;
        }
        info!("[POSITION] Persisted {} positions", snapshot.len());
        Ok(())
    }
}

impl Default for PositionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Value-weighted average entry: (q*pe + f*pf) / (q + f)
fn weighted_entry(
    current_qty: Decimal,
    current_entry: Decimal,
    fill_qty: Decimal,
    fill_price: Decimal,
) -> Decimal {
    let total_qty = current_qty + fill_qty;
    if is_flat(total_qty) {
        return Decimal::ZERO;
    }
    (current_qty * current_entry + fill_qty * fill_price) / total_qty
}

/// PnL realized by closing min(|position|, |fill|) units against the entry
fn realized_on_close(
    position_qty: Decimal,
    entry_price: Decimal,
    fill_qty: Decimal,
    fill_price: Decimal,
) -> Decimal {
    if position_qty * fill_qty >= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let close_qty = position_qty.abs().min(fill_qty.abs());
    if position_qty > Decimal::ZERO {
        // Long position, selling
        close_qty * (fill_price - entry_price)
    } else {
        // Short position, buying back
        close_qty * (entry_price - fill_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_core::OrderSide;
    use rust_decimal_macros::dec;

    fn make_fill(side: OrderSide, quantity: Decimal, price: Decimal) -> Fill {
        Fill {
            fill_id: format!("f-{}", quantity),
            order_id: "ord-1".to_string(),
            instrument: "EUR/USD".to_string(),
            side,
            quantity,
            price,
            commission: Decimal::ZERO,
            timestamp_ns: 1,
        }
    }

    #[test]
    fn test_open_long_then_close_flat() {
        let pm = PositionManager::new();
        pm.on_fill(&make_fill(OrderSide::Buy, dec!(100), dec!(1.1000)));

        let pos = pm.position("EUR/USD");
        assert_eq!(pos.quantity, dec!(100));
        assert_eq!(pos.entry_price, dec!(1.1000));
        assert_eq!(pos.realized_pnl, dec!(0));

        pm.on_fill(&make_fill(OrderSide::Sell, dec!(100), dec!(1.1050)));
        let pos = pm.position("EUR/USD");
        assert!(pos.is_flat());
        assert_eq!(pos.realized_pnl, dec!(5.0));
        assert_eq!(pm.total_realized_pnl(), dec!(5.0));
    }

    #[test]
    fn test_weighted_average_entry() {
        let pm = PositionManager::new();
        pm.on_fill(&make_fill(OrderSide::Buy, dec!(100), dec!(1.1000)));
        pm.on_fill(&make_fill(OrderSide::Buy, dec!(50), dec!(1.1100)));

        let pos = pm.position("EUR/USD");
        assert_eq!(pos.quantity, dec!(150));
        // (100*1.1000 + 50*1.1100) / 150 = 1.103333...
        let expected = dec!(165.50) / dec!(150);
        assert!((pos.entry_price - expected).abs() < dec!(0.0000001));
    }

    #[test]
    fn test_reduce_keeps_entry() {
        let pm = PositionManager::new();
        pm.on_fill(&make_fill(OrderSide::Buy, dec!(100), dec!(1.1000)));
        pm.on_fill(&make_fill(OrderSide::Sell, dec!(40), dec!(1.1100)));

        let pos = pm.position("EUR/USD");
        assert_eq!(pos.quantity, dec!(60));
        assert_eq!(pos.entry_price, dec!(1.1000));
        assert_eq!(pos.realized_pnl, dec!(0.40));
    }

    #[test]
    fn test_reverse_through_zero() {
        let pm = PositionManager::new();
        pm.on_fill(&make_fill(OrderSide::Buy, dec!(100), dec!(1.1000)));
        pm.on_fill(&make_fill(OrderSide::Sell, dec!(150), dec!(1.1100)));

        let pos = pm.position("EUR/USD");
        assert_eq!(pos.quantity, dec!(-50));
        assert_eq!(pos.entry_price, dec!(1.1100));
        // 100 closed units * (1.1100 - 1.1000)
        assert_eq!(pos.realized_pnl, dec!(10.0));
    }

    #[test]
    fn test_short_round_trip() {
        let pm = PositionManager::new();
        pm.on_fill(&make_fill(OrderSide::Sell, dec!(100), dec!(1.1000)));
        let pos = pm.position("EUR/USD");
        assert_eq!(pos.quantity, dec!(-100));
        assert_eq!(pos.entry_price, dec!(1.1000));

        pm.on_fill(&make_fill(OrderSide::Buy, dec!(100), dec!(1.0900)));
        let pos = pm.position("EUR/USD");
        assert!(pos.is_flat());
        assert_eq!(pos.realized_pnl, dec!(1.0));
    }

    #[test]
    fn test_unknown_instrument_is_flat() {
        let pm = PositionManager::new();
        let pos = pm.position("GBP/USD");
        assert!(pos.is_flat());
        assert_eq!(pm.quantity("GBP/USD"), dec!(0));
        assert!(!pm.has_position("GBP/USD"));
    }

    #[test]
    fn test_nonpositive_fill_ignored() {
        let pm = PositionManager::new();
        pm.on_fill(&make_fill(OrderSide::Buy, dec!(0), dec!(1.1)));
        pm.on_fill(&make_fill(OrderSide::Buy, dec!(-5), dec!(1.1)));
        assert!(pm.position("EUR/USD").is_flat());
        assert_eq!(pm.stats(&HashMap::new()).fills_today, 0);
    }

    #[test]
    fn test_unrealized_and_exposure() {
        let pm = PositionManager::new();
        pm.on_fill(&make_fill(OrderSide::Buy, dec!(100), dec!(1.1000)));

        assert_eq!(pm.unrealized_pnl("EUR/USD", dec!(1.1200)), dec!(2.0));

        let mut prices = HashMap::new();
        prices.insert("EUR/USD".to_string(), dec!(1.1200));
        assert_eq!(pm.total_unrealized_pnl(&prices), dec!(2.0));
        assert_eq!(pm.total_exposure(&prices), dec!(112.0));

        // Instruments without a price contribute zero
        prices.clear();
        assert_eq!(pm.total_unrealized_pnl(&prices), dec!(0));
        assert_eq!(pm.total_exposure(&prices), dec!(0));
    }

    #[test]
    fn test_reset_daily_keeps_positions() {
        let pm = PositionManager::new();
        pm.on_fill(&make_fill(OrderSide::Buy, dec!(100), dec!(1.1000)));
        pm.on_fill(&make_fill(OrderSide::Sell, dec!(50), dec!(1.1100)));
        assert_eq!(pm.total_realized_pnl(), dec!(0.50));

        pm.reset_daily();

        let pos = pm.position("EUR/USD");
        assert_eq!(pos.quantity, dec!(50));
        assert_eq!(pos.entry_price, dec!(1.1000));
        assert_eq!(pos.realized_pnl, dec!(0));
        assert_eq!(pos.num_fills_today, 0);
        assert_eq!(pm.total_realized_pnl(), dec!(0));
    }

    #[test]
    fn test_commission_accumulates() {
        let pm = PositionManager::new();
        let mut fill = make_fill(OrderSide::Buy, dec!(100), dec!(1.1));
        fill.commission = dec!(0.25);
        pm.on_fill(&fill);
        let mut fill = make_fill(OrderSide::Buy, dec!(100), dec!(1.1));
        fill.commission = dec!(0.75);
        pm.on_fill(&fill);

        assert_eq!(pm.position("EUR/USD").total_commission, dec!(1.00));
        assert_eq!(
            pm.stats(&HashMap::new()).total_commission_paid,
            dec!(1.00)
        );
    }

    #[test]
    fn test_epsilon_quantity_treated_as_flat() {
        let pm = PositionManager::new();
        pm.on_fill(&make_fill(OrderSide::Buy, dec!(100), dec!(1.1)));
        pm.on_fill(&make_fill(OrderSide::Sell, dec!(99.999999995), dec!(1.1)));
        assert!(pm.position("EUR/USD").is_flat());
        assert!(!pm.has_position("EUR/USD"));
    }
}
