// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================
//
// Unweighted mean of the last `period` closes, computed with a running sum so
// a full series costs O(n).
// =============================================================================

/// SMA series; element `i` covers `closes[i ..= i + period - 1]`.
///
/// Empty when `period == 0` or there are fewer than `period` closes. The
/// series stops at the first non-finite window.
pub fn calculate_sma(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }

    let period_f = period as f64;
    let mut sum: f64 = closes[..period].iter().sum();
    let mut result = Vec::with_capacity(closes.len() - period + 1);

    if !sum.is_finite() {
        return result;
    }
    result.push(sum / period_f);

    for i in period..closes.len() {
        sum += closes[i] - closes[i - period];
        let avg = sum / period_f;
        if !avg.is_finite() {
            break;
        }
        result.push(avg);
    }

    result
}

/// Most recent SMA value.
pub fn current_sma(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    // Sum the tail directly; a running sum would accumulate drift.
    let avg = closes[closes.len() - period..].iter().sum::<f64>() / period as f64;
    avg.is_finite().then_some(avg)
}
