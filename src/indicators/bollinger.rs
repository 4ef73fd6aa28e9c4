// =============================================================================
// Bollinger Bands
// =============================================================================
//
//   middle = SMA(period)
//   upper  = middle + k * sigma        (population standard deviation)
//   lower  = middle - k * sigma
//   width  = (upper - lower) / middle * 100
//   %B     = (close - lower) / (upper - lower)
// =============================================================================

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BollingerResult {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// Band width as a percentage of the middle band.
    pub width: f64,
}

/// Bands over the last `period` closes.
///
/// `None` on short input, a zero middle band, or a non-finite result.
pub fn calculate_bollinger(closes: &[f64], period: usize, k: f64) -> Option<BollingerResult> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let n = period as f64;
    let middle = window.iter().sum::<f64>() / n;
    if middle == 0.0 {
        return None;
    }

    let sigma = (window.iter().map(|c| (c - middle).powi(2)).sum::<f64>() / n).sqrt();
    let upper = middle + k * sigma;
    let lower = middle - k * sigma;
    let width = (upper - lower) / middle * 100.0;

    width.is_finite().then_some(BollingerResult {
        upper,
        middle,
        lower,
        width,
    })
}

/// Position of the last close inside the bands. 0 is the lower band, 1 the
/// upper. Collapsed bands read as 0.5.
pub fn bollinger_percent_b(closes: &[f64], period: usize, k: f64) -> Option<f64> {
    let bands = calculate_bollinger(closes, period, k)?;
    let last = *closes.last()?;
    let span = bands.upper - bands.lower;
    if span == 0.0 {
        return Some(0.5);
    }
    let pb = (last - bands.lower) / span;
    pb.is_finite().then_some(pb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_surround_the_mean() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let bb = calculate_bollinger(&closes, 20, 2.0).unwrap();
        assert!((bb.middle - 10.5).abs() < 1e-10);
        assert!(bb.upper > bb.middle && bb.lower < bb.middle);
        assert!(((bb.upper - bb.middle) - (bb.middle - bb.lower)).abs() < 1e-10);
    }

    #[test]
    fn only_last_window_counts() {
        let mut closes = vec![1000.0; 10];
        closes.extend(std::iter::repeat(50.0).take(20));
        let bb = calculate_bollinger(&closes, 20, 2.0).unwrap();
        assert!((bb.middle - 50.0).abs() < 1e-10);
        assert!(bb.width.abs() < 1e-10);
    }

    #[test]
    fn short_or_zero_input() {
        assert!(calculate_bollinger(&[1.0, 2.0], 20, 2.0).is_none());
        assert!(calculate_bollinger(&[0.0; 20], 20, 2.0).is_none());
        assert!(calculate_bollinger(&[1.0; 20], 0, 2.0).is_none());
    }

    #[test]
    fn percent_b() {
        assert_eq!(bollinger_percent_b(&[10.0; 20], 20, 2.0), Some(0.5));

        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let pb = bollinger_percent_b(&closes, 20, 2.0).unwrap();
        assert!(pb > 0.5 && pb < 1.0);
    }
}
