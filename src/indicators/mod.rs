// =============================================================================
// Technical Indicators
// =============================================================================
//
// Side-effect-free indicator math over price series pulled from the RIT
// history and time-and-sales endpoints. Series functions return an empty
// `Vec` and point functions return `None` when the input is too short or a
// value turns non-finite, so callers never chart garbage.

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod roc;
pub mod rsi;
pub mod sma;
pub mod stochastic;
pub mod vwap;

use serde::{Deserialize, Serialize};

use crate::types::{Bar, TimeAndSale};

fn default_rsi_period() -> usize {
    14
}

fn default_sma_period() -> usize {
    20
}

fn default_ema_fast() -> usize {
    12
}

fn default_ema_slow() -> usize {
    26
}

fn default_macd_signal() -> usize {
    9
}

fn default_bollinger_period() -> usize {
    20
}

fn default_bollinger_std() -> f64 {
    2.0
}

fn default_atr_period() -> usize {
    14
}

fn default_stochastic_period() -> usize {
    14
}

fn default_stochastic_smooth() -> usize {
    3
}

fn default_roc_period() -> usize {
    10
}

/// Look-back settings for every indicator shown on the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorParams {
    #[serde(default = "default_sma_period")]
    pub sma_period: usize,
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "default_ema_fast")]
    pub ema_fast: usize,
    #[serde(default = "default_ema_slow")]
    pub macd_slow: usize,
    #[serde(default = "default_macd_signal")]
    pub macd_signal: usize,
    #[serde(default = "default_bollinger_period")]
    pub bollinger_period: usize,
    #[serde(default = "default_bollinger_std")]
    pub bollinger_std: f64,
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    #[serde(default = "default_stochastic_period")]
    pub stochastic_period: usize,
    #[serde(default = "default_stochastic_smooth")]
    pub stochastic_smooth: usize,
    #[serde(default = "default_roc_period")]
    pub roc_period: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            sma_period: default_sma_period(),
            rsi_period: default_rsi_period(),
            ema_fast: default_ema_fast(),
            macd_slow: default_ema_slow(),
            macd_signal: default_macd_signal(),
            bollinger_period: default_bollinger_period(),
            bollinger_std: default_bollinger_std(),
            atr_period: default_atr_period(),
            stochastic_period: default_stochastic_period(),
            stochastic_smooth: default_stochastic_smooth(),
            roc_period: default_roc_period(),
        }
    }
}

/// Latest value of every indicator for one ticker.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndicatorSnapshot {
    pub bars: usize,
    pub last_close: Option<f64>,
    pub sma: Option<f64>,
    pub ema_fast: Option<f64>,
    pub ema_slow: Option<f64>,
    pub rsi: Option<f64>,
    pub rsi_label: Option<&'static str>,
    pub macd: Option<macd::MacdPoint>,
    pub bollinger: Option<bollinger::BollingerResult>,
    pub bollinger_percent_b: Option<f64>,
    pub roc: Option<f64>,
    pub atr: Option<f64>,
    pub atr_pct: Option<f64>,
    pub adx: Option<f64>,
    pub stochastic: Option<stochastic::StochasticPoint>,
    pub trend: Option<ema::TrendAlignment>,
    pub vwap: Option<f64>,
}

impl IndicatorSnapshot {
    /// Compute everything from bars (oldest first) and, optionally, the
    /// time-and-sales tape for VWAP.
    pub fn compute(bars: &[Bar], tape: &[TimeAndSale], params: &IndicatorParams) -> Self {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let (rsi, rsi_label) = match rsi::current_rsi(&closes, params.rsi_period) {
            Some((v, label)) => (Some(v), Some(label)),
            None => (None, None),
        };

        Self {
            bars: bars.len(),
            last_close: closes.last().copied(),
            sma: sma::current_sma(&closes, params.sma_period),
            ema_fast: ema::calculate_ema(&closes, params.ema_fast).last().copied(),
            ema_slow: ema::calculate_ema(&closes, params.macd_slow).last().copied(),
            rsi,
            rsi_label,
            macd: macd::current_macd(&closes, params.ema_fast, params.macd_slow, params.macd_signal),
            bollinger: bollinger::calculate_bollinger(&closes, params.bollinger_period, params.bollinger_std),
            bollinger_percent_b: bollinger::bollinger_percent_b(
                &closes,
                params.bollinger_period,
                params.bollinger_std,
            ),
            roc: roc::current_roc(&closes, params.roc_period),
            atr: atr::calculate_atr(bars, params.atr_period),
            atr_pct: atr::calculate_atr_pct(bars, params.atr_period),
            adx: adx::calculate_adx(bars, params.atr_period),
            stochastic: stochastic::current_stochastic(
                bars,
                params.stochastic_period,
                params.stochastic_smooth,
            ),
            trend: ema::ema_trend_aligned(&closes),
            vwap: vwap::tape_vwap(tape),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_on_short_history_is_mostly_empty() {
        let bars: Vec<Bar> = (0..5).map(|i| Bar::flat(i, 10.0 + i as f64)).collect();
        let snap = IndicatorSnapshot::compute(&bars, &[], &IndicatorParams::default());
        assert_eq!(snap.bars, 5);
        assert_eq!(snap.last_close, Some(14.0));
        assert!(snap.rsi.is_none());
        assert!(snap.macd.is_none());
        assert!(snap.vwap.is_none());
    }

    #[test]
    fn snapshot_on_long_history_fills_in() {
        let bars: Vec<Bar> = (0..120)
            .map(|i| {
                let base = 20.0 + (i as f64 * 0.2).sin();
                Bar {
                    tick: i,
                    open: base,
                    high: base + 0.3,
                    low: base - 0.3,
                    close: base + 0.1,
                }
            })
            .collect();
        let tape = vec![TimeAndSale {
            id: 1,
            period: 1,
            tick: 3,
            price: 20.0,
            quantity: 100.0,
        }];
        let snap = IndicatorSnapshot::compute(&bars, &tape, &IndicatorParams::default());
        assert!(snap.sma.is_some());
        assert!(snap.rsi.is_some());
        assert!(snap.rsi_label.is_some());
        assert!(snap.macd.is_some());
        assert!(snap.bollinger.is_some());
        assert!(snap.atr.is_some());
        assert!(snap.adx.is_some());
        assert!(snap.stochastic.is_some());
        assert_eq!(snap.vwap, Some(20.0));
    }
}
