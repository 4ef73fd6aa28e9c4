// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
//   k     = 2 / (period + 1)
//   EMA_t = close_t * k + EMA_{t-1} * (1 - k)
//
// Seeded with the SMA of the first `period` closes, so the first output lines
// up with `closes[period - 1]`.
// =============================================================================

use serde::Serialize;

/// EMA series for `closes`.
///
/// Empty when `period == 0` or `closes.len() < period`. Production stops at
/// the first non-finite value; a broken series is worse than a short one.
pub fn calculate_ema(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }
    let seed: f64 = closes[..period].iter().sum::<f64>() / period as f64;
    ema_from_seed(seed, &closes[period..], period)
}

/// Continue an EMA from `seed` over `rest`. The seed is the first element
/// of the output.
pub(crate) fn ema_from_seed(seed: f64, rest: &[f64], period: usize) -> Vec<f64> {
    if !seed.is_finite() || period == 0 {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);

    let mut result = Vec::with_capacity(rest.len() + 1);
    result.push(seed);

    let mut prev = seed;
    for &close in rest {
        let ema = close * k + prev * (1.0 - k);
        if !ema.is_finite() {
            break;
        }
        result.push(ema);
        prev = ema;
    }
    result
}

/// Ordering of the 9 / 21 / 55 EMA stack.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendAlignment {
    pub bullish: bool,
    /// `|EMA9 - EMA55| / EMA55`.
    pub strength: f64,
}

/// `Some` only when EMA9 > EMA21 > EMA55 (bullish) or EMA9 < EMA21 < EMA55
/// (bearish). Needs 55 closes.
pub fn ema_trend_aligned(closes: &[f64]) -> Option<TrendAlignment> {
    if closes.len() < 55 {
        return None;
    }

    let e9 = *calculate_ema(closes, 9).last()?;
    let e21 = *calculate_ema(closes, 21).last()?;
    let e55 = *calculate_ema(closes, 55).last()?;

    let bullish = e9 > e21 && e21 > e55;
    let bearish = e9 < e21 && e21 < e55;
    if (!bullish && !bearish) || e55 == 0.0 {
        return None;
    }

    let strength = (e9 - e55).abs() / e55;
    strength.is_finite().then_some(TrendAlignment { bullish, strength })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn ascending(n: usize) -> Vec<f64> {
        (1..=n).map(|i| i as f64).collect()
    }

    #[test]
    fn ema_guards() {
        assert!(calculate_ema(&[], 5).is_empty());
        assert!(calculate_ema(&[1.0, 2.0, 3.0], 0).is_empty());
        assert!(calculate_ema(&[1.0, 2.0], 5).is_empty());
    }

    #[test]
    fn ema_period_equals_length_is_sma() {
        let ema = calculate_ema(&[2.0, 4.0, 6.0], 3);
        assert_eq!(ema.len(), 1);
        assert!((ema[0] - 4.0).abs() < 1e-10);
    }

    #[test]
    fn ema_known_values() {
        let closes: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        let ema = calculate_ema(&closes, 5);
        assert_eq!(ema.len(), 6);

        let k = 2.0 / 6.0;
        let mut expected = 3.0;
        assert!((ema[0] - expected).abs() < 1e-10);
        for (i, &c) in closes[5..].iter().enumerate() {
            expected = c * k + expected * (1.0 - k);
            assert!((ema[i + 1] - expected).abs() < 1e-10);
        }
    }

    #[test]
    fn ema_stops_on_nan() {
        let ema = calculate_ema(&[1.0, 2.0, 3.0, f64::NAN, 5.0], 3);
        assert_eq!(ema.len(), 1);
    }

    #[test]
    fn trend_needs_55_closes() {
        assert!(ema_trend_aligned(&ascending(54)).is_none());
    }

    #[test]
    fn trend_bullish_and_bearish() {
        let up = ema_trend_aligned(&ascending(200)).unwrap();
        assert!(up.bullish);
        assert!(up.strength > 0.0);

        let down: Vec<f64> = (1..=200).rev().map(|x| x as f64).collect();
        assert!(!ema_trend_aligned(&down).unwrap().bullish);
    }

    #[test]
    fn trend_flat_is_none() {
        assert!(ema_trend_aligned(&[100.0; 200]).is_none());
    }
}
