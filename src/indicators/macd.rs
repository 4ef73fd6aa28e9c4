// =============================================================================
// MACD: Moving Average Convergence / Divergence
// =============================================================================
//
//   MACD      = EMA(fast) - EMA(slow)
//   signal    = EMA(signal) of the MACD line
//   histogram = MACD - signal
//
// The MACD line starts where the slow EMA does (close index `slow - 1`).
// =============================================================================

use serde::Serialize;

use super::ema::calculate_ema;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MacdSeries {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    /// Aligned with `signal`.
    pub histogram: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MacdPoint {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Full MACD series. Empty unless `0 < fast < slow`, `signal > 0` and there
/// are at least `slow` closes. The signal line needs a further `signal - 1`
/// MACD values.
pub fn calculate_macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> MacdSeries {
    if fast == 0 || signal == 0 || fast >= slow || closes.len() < slow {
        return MacdSeries::default();
    }

    let fast_ema = calculate_ema(closes, fast);
    let slow_ema = calculate_ema(closes, slow);
    let offset = slow - fast;

    let macd: Vec<f64> = slow_ema
        .iter()
        .enumerate()
        .map_while(|(i, s)| fast_ema.get(i + offset).map(|f| f - s))
        .collect();

    let signal_line = calculate_ema(&macd, signal);
    let histogram = signal_line
        .iter()
        .enumerate()
        .map(|(i, s)| macd[i + signal - 1] - s)
        .collect();

    MacdSeries {
        macd,
        signal: signal_line,
        histogram,
    }
}

/// Latest MACD / signal / histogram triple.
pub fn current_macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<MacdPoint> {
    let series = calculate_macd(closes, fast, slow, signal);
    let sig = *series.signal.last()?;
    let hist = *series.histogram.last()?;
    let macd = *series.macd.get(series.signal.len() + signal - 2)?;
    Some(MacdPoint {
        macd,
        signal: sig,
        histogram: hist,
    })
}
