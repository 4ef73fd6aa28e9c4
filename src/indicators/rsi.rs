// =============================================================================
// Relative Strength Index (RSI): Wilder's Smoothing
// =============================================================================
//
//   deltas       = close_t - close_{t-1}
//   avg_gain_0   = mean of the first `period` gains     (losses likewise)
//   avg_gain_t   = (avg_gain_{t-1} * (period - 1) + gain_t) / period
//   RSI          = 100 - 100 / (1 + avg_gain / avg_loss)
//
// Labels: >= 70 OVERBOUGHT, <= 30 OVERSOLD, otherwise NEUTRAL.
// =============================================================================

pub const OVERBOUGHT: f64 = 70.0;
pub const OVERSOLD: f64 = 30.0;

/// RSI series, one value per close from index `period` onward.
///
/// Empty when `period == 0` or there are fewer than `period + 1` closes.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let period_f = period as f64;

    let (gain_sum, loss_sum) = deltas[..period]
        .iter()
        .fold((0.0_f64, 0.0_f64), |(g, l), &d| {
            if d > 0.0 {
                (g + d, l)
            } else {
                (g, l - d)
            }
        });
    let mut avg_gain = gain_sum / period_f;
    let mut avg_loss = loss_sum / period_f;

    let mut result = Vec::with_capacity(deltas.len() - period + 1);
    match rsi_from_averages(avg_gain, avg_loss) {
        Some(v) => result.push(v),
        None => return result,
    }

    for &delta in &deltas[period..] {
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;

        match rsi_from_averages(avg_gain, avg_loss) {
            Some(v) => result.push(v),
            None => break,
        }
    }

    result
}

/// Latest RSI with its label.
pub fn current_rsi(closes: &[f64], period: usize) -> Option<(f64, &'static str)> {
    let value = *calculate_rsi(closes, period).last()?;
    Some((value, rsi_label(value)))
}

pub fn rsi_label(value: f64) -> &'static str {
    if value >= OVERBOUGHT {
        "OVERBOUGHT"
    } else if value <= OVERSOLD {
        "OVERSOLD"
    } else {
        "NEUTRAL"
    }
}

/// No movement at all reads as 50, only gains as 100.
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let rsi = if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    };
    rsi.is_finite().then_some(rsi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_guards() {
        assert!(calculate_rsi(&[], 14).is_empty());
        assert!(calculate_rsi(&[1.0, 2.0, 3.0], 0).is_empty());
        let fourteen: Vec<f64> = (1..=14).map(|x| x as f64).collect();
        assert!(calculate_rsi(&fourteen, 14).is_empty());
    }

    #[test]
    fn rsi_extremes() {
        let up: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        assert!(calculate_rsi(&up, 14).iter().all(|v| (v - 100.0).abs() < 1e-10));

        let down: Vec<f64> = (1..=30).rev().map(|x| x as f64).collect();
        assert!(calculate_rsi(&down, 14).iter().all(|v| v.abs() < 1e-10));

        let flat = vec![25.0; 30];
        assert!(calculate_rsi(&flat, 14).iter().all(|v| (v - 50.0).abs() < 1e-10));
    }

    #[test]
    fn rsi_series_length() {
        let closes: Vec<f64> = (0..40).map(|i| 10.0 + (i as f64).sin()).collect();
        assert_eq!(calculate_rsi(&closes, 14).len(), 40 - 14);
    }

    #[test]
    fn rsi_stays_in_range() {
        let closes = [
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ];
        for v in calculate_rsi(&closes, 14) {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn labels() {
        let up: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        assert_eq!(current_rsi(&up, 14).unwrap().1, "OVERBOUGHT");
        let down: Vec<f64> = (1..=30).rev().map(|x| x as f64).collect();
        assert_eq!(current_rsi(&down, 14).unwrap().1, "OVERSOLD");
        assert_eq!(rsi_label(55.0), "NEUTRAL");
        assert!(current_rsi(&[], 14).is_none());
    }
}
