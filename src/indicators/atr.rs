// =============================================================================
// Average True Range (ATR): Wilder's Smoothing
// =============================================================================
//
//   TR    = max(H - L, |H - prevC|, |L - prevC|)
//   ATR_0 = mean of the first `period` TRs
//   ATR_t = (ATR_{t-1} * (period - 1) + TR_t) / period
// =============================================================================

use crate::types::Bar;

/// True range of each bar against its predecessor (`bars.len() - 1` values).
pub(crate) fn true_ranges(bars: &[Bar]) -> Vec<f64> {
    bars.windows(2)
        .map(|w| {
            let (prev, bar) = (&w[0], &w[1]);
            (bar.high - bar.low)
                .max((bar.high - prev.close).abs())
                .max((bar.low - prev.close).abs())
        })
        .collect()
}

/// Latest ATR. Needs `period + 1` bars.
pub fn calculate_atr(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

    let trs = true_ranges(bars);
    let period_f = period as f64;
    let seed = trs[..period].iter().sum::<f64>() / period_f;

    let atr = trs[period..]
        .iter()
        .try_fold(seed, |atr, &tr| {
            let next = (atr * (period_f - 1.0) + tr) / period_f;
            next.is_finite().then_some(next)
        })?;

    atr.is_finite().then_some(atr)
}

/// ATR as a percentage of the last close.
pub fn calculate_atr_pct(bars: &[Bar], period: usize) -> Option<f64> {
    let atr = calculate_atr(bars, period)?;
    let close = bars.last()?.close;
    if close == 0.0 {
        return None;
    }
    Some(atr / close * 100.0)
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
    fn atr_guards() {
        let bars: Vec<Bar> = (0..10).map(|i| bar(i, 11.0, 9.0, 10.0)).collect();
        assert!(calculate_atr(&bars, 0).is_none());
        assert!(calculate_atr(&bars, 10).is_none());
        assert!(calculate_atr(&bars, 9).is_some());
    }

    #[test]
    fn constant_range_gives_that_range() {
        let bars: Vec<Bar> = (0..30).map(|i| bar(i, 12.0, 8.0, 10.0)).collect();
        let atr = calculate_atr(&bars, 14).unwrap();
        assert!((atr - 4.0).abs() < 1e-10);
        let pct = calculate_atr_pct(&bars, 14).unwrap();
        assert!((pct - 40.0).abs() < 1e-10);
    }

    #[test]
    fn gap_counts_against_previous_close() {
        let bars = vec![
            bar(1, 10.0, 9.0, 9.0),
            bar(2, 15.0, 14.0, 14.5),
            bar(3, 15.0, 14.0, 14.5),
        ];
        assert_eq!(true_ranges(&bars), vec![6.0, 1.0]);
        let atr = calculate_atr(&bars, 2).unwrap();
        assert!((atr - 3.5).abs() < 1e-10);
    }

    #[test]
    fn nan_poisons_the_result() {
        let mut bars: Vec<Bar> = (0..6).map(|i| bar(i, 11.0, 9.0, 10.0)).collect();
        bars[4].high = f64::NAN;
        assert!(calculate_atr(&bars, 2).is_none());
    }
}
