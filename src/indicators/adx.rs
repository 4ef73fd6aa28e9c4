// =============================================================================
// Average Directional Index (ADX)
// =============================================================================
//
//   +DM = H - prevH  when it beats prevL - L and is positive, else 0
//   -DM = prevL - L  when it beats H - prevH and is positive, else 0
//   Wilder-sum +DM, -DM and TR over `period`, derive +DI / -DI, then
//   DX  = |+DI - -DI| / (+DI + -DI) * 100
//   ADX = Wilder average of DX over `period`.
//
// > 25 reads as trending, < 20 as ranging.
// =============================================================================

use super::atr::true_ranges;
use crate::types::Bar;

/// Latest ADX. Needs `2 * period + 1` bars; `None` when the bars carry no
/// range at all.
pub fn calculate_adx(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < 2 * period + 1 {
        return None;
    }

    let trs = true_ranges(bars);
    let (plus_dm, minus_dm): (Vec<f64>, Vec<f64>) = bars
        .windows(2)
        .map(|w| {
            let up = w[1].high - w[0].high;
            let down = w[0].low - w[1].low;
            (
                if up > down && up > 0.0 { up } else { 0.0 },
                if down > up && down > 0.0 { down } else { 0.0 },
            )
        })
        .unzip();

    let period_f = period as f64;
    let mut s_plus: f64 = plus_dm[..period].iter().sum();
    let mut s_minus: f64 = minus_dm[..period].iter().sum();
    let mut s_tr: f64 = trs[..period].iter().sum();

    let mut dx = Vec::with_capacity(trs.len() - period + 1);
    dx.push(directional_index(s_plus, s_minus, s_tr)?);
    for i in period..trs.len() {
        s_plus += plus_dm[i] - s_plus / period_f;
        s_minus += minus_dm[i] - s_minus / period_f;
        s_tr += trs[i] - s_tr / period_f;
        dx.push(directional_index(s_plus, s_minus, s_tr)?);
    }

    let seed = dx[..period].iter().sum::<f64>() / period_f;
    let adx = dx[period..]
        .iter()
        .fold(seed, |adx, &d| (adx * (period_f - 1.0) + d) / period_f);

    adx.is_finite().then_some(adx)
}

fn directional_index(plus: f64, minus: f64, tr: f64) -> Option<f64> {
    if tr == 0.0 {
        return None;
    }
    let plus_di = plus / tr * 100.0;
    let minus_di = minus / tr * 100.0;
    let sum = plus_di + minus_di;
    if sum == 0.0 {
        return Some(0.0);
    }
    let dx = (plus_di - minus_di).abs() / sum * 100.0;
    dx.is_finite().then_some(dx)
}
