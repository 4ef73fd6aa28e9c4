// =============================================================================
// Volume Weighted Average Price
// =============================================================================

use crate::types::TimeAndSale;

/// VWAP of `(price, quantity)` prints. Non-positive or non-finite
/// quantities are skipped; `None` when nothing traded.
pub fn vwap(prints: &[(f64, f64)]) -> Option<f64> {
    let (notional, volume) = prints
        .iter()
        .filter(|(p, q)| p.is_finite() && q.is_finite() && *q > 0.0)
        .fold((0.0, 0.0), |(n, v), (p, q)| (n + p * q, v + q));
    if volume == 0.0 {
        return None;
    }
    let value = notional / volume;
    value.is_finite().then_some(value)
}

/// VWAP over a time-and-sales tape.
pub fn tape_vwap(tape: &[TimeAndSale]) -> Option<f64> {
    let prints: Vec<(f64, f64)> = tape.iter().map(|t| (t.price, t.quantity)).collect();
    vwap(&prints)
}
