// =============================================================================
// Stochastic Oscillator
// =============================================================================
//
//   %K = (close - lowest low) / (highest high - lowest low) * 100
//   %D = SMA(smooth) of %K
//
// A window with no range reads as %K = 50.
// =============================================================================

use serde::Serialize;

use super::sma::calculate_sma;
use crate::types::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StochasticPoint {
    pub k: f64,
    pub d: f64,
}

/// %K series, one value per bar from index `period - 1`.
pub fn calculate_stochastic(bars: &[Bar], period: usize) -> Vec<f64> {
    if period == 0 || bars.len() < period {
        return Vec::new();
    }

    bars.windows(period)
        .map(|w| {
            let high = w.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
            let low = w.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
            let close = w[period - 1].close;
            if high == low {
                50.0
            } else {
                (close - low) / (high - low) * 100.0
            }
        })
        .collect()
}

/// Latest %K and %D. Needs `period + smooth - 1` bars.
pub fn current_stochastic(bars: &[Bar], period: usize, smooth: usize) -> Option<StochasticPoint> {
    let k_series = calculate_stochastic(bars, period);
    let k = *k_series.last()?;
    let d = *calculate_sma(&k_series, smooth).last()?;
    (k.is_finite() && d.is_finite()).then_some(StochasticPoint { k, d })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(tick: u32, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            tick,
            open: close,
            high,
            low,
            close,
        }
    }

    #[test]
    fn close_at_high_is_100() {
        let bars: Vec<Bar> = (0..5).map(|i| bar(i, 10.0 + i as f64, 9.0, 10.0 + i as f64)).collect();
        let k = calculate_stochastic(&bars, 3);
        assert_eq!(k.len(), 3);
        assert!(k.iter().all(|v| (v - 100.0).abs() < 1e-10));
    }

    #[test]
    fn midpoint_and_flat() {
        let bars = vec![bar(1, 12.0, 8.0, 10.0), bar(2, 12.0, 8.0, 10.0)];
        assert_eq!(calculate_stochastic(&bars, 2), vec![50.0]);
        let flat: Vec<Bar> = (0..4).map(|i| Bar::flat(i, 7.0)).collect();
        assert!(calculate_stochastic(&flat, 2).iter().all(|v| *v == 50.0));
    }

    #[test]
    fn d_is_mean_of_k() {
        let bars = vec![
            bar(1, 10.0, 0.0, 0.0),
            bar(2, 10.0, 0.0, 10.0),
            bar(3, 10.0, 0.0, 5.0),
            bar(4, 10.0, 0.0, 10.0),
        ];
        let p = current_stochastic(&bars, 2, 3).unwrap();
        assert!((p.k - 100.0).abs() < 1e-10);
        assert!((p.d - (100.0 + 50.0 + 100.0) / 3.0).abs() < 1e-10);
        assert!(current_stochastic(&bars, 2, 4).is_none());
    }
}
