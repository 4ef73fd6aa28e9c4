// =============================================================================
// Rate of Change (ROC)
// =============================================================================
//
//   ROC_t = (close_t - close_{t-n}) / close_{t-n} * 100
// =============================================================================

/// ROC series starting at `closes[period]`. A zero base close yields 0.
pub fn calculate_roc(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() <= period {
        return Vec::new();
    }

    closes
        .iter()
        .zip(&closes[period..])
        .map(|(&base, &now)| if base == 0.0 { 0.0 } else { (now - base) / base * 100.0 })
        .collect()
}

pub fn current_roc(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() <= period {
        return None;
    }
    let now = closes[closes.len() - 1];
    let base = closes[closes.len() - 1 - period];
    if base == 0.0 {
        return Some(0.0);
    }
    let roc = (now - base) / base * 100.0;
    roc.is_finite().then_some(roc)
}
