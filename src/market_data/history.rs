// =============================================================================
// Price History: per-ticker ring of tick bars
// =============================================================================
//
// Bars are kept in ascending tick order. The server re-sends the live bar on
// every poll, so a bar whose tick is already present replaces the stored
// one. When the history endpoint is unavailable, last-trade or mid samples
// are folded into bars with `record_price`.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use tracing::debug;

use crate::types::Bar;

pub struct PriceHistory {
    series: RwLock<HashMap<String, VecDeque<Bar>>>,
    limit: usize,
}

impl PriceHistory {
    /// Keep at most `limit` bars per ticker (at least one).
    pub fn new(limit: usize) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            limit: limit.max(1),
        }
    }

    /// Insert `bars`, replacing any bar with the same tick.
    pub fn merge(&self, ticker: &str, bars: &[Bar]) {
        let mut map = self.series.write();
        let ring = map.entry(ticker.to_string()).or_default();

        for bar in bars.iter().filter(|b| bar_is_finite(b)) {
            match ring.binary_search_by_key(&bar.tick, |b| b.tick) {
                Ok(i) => ring[i] = *bar,
                Err(i) => ring.insert(i, *bar),
            }
        }
        trim(ring, self.limit);
    }

    /// Fold one price sample into the bar of `tick`.
    pub fn record_price(&self, ticker: &str, tick: u32, price: f64) {
        if !price.is_finite() {
            debug!(ticker, tick, "ignoring non-finite price sample");
            return;
        }
        let mut map = self.series.write();
        let ring = map.entry(ticker.to_string()).or_default();

        match ring.binary_search_by_key(&tick, |b| b.tick) {
            Ok(i) => {
                let bar = &mut ring[i];
                bar.high = bar.high.max(price);
                bar.low = bar.low.min(price);
                bar.close = price;
            }
            Err(i) => ring.insert(i, Bar::flat(tick, price)),
        }
        trim(ring, self.limit);
    }

    /// Bars oldest first.
    pub fn bars(&self, ticker: &str) -> Vec<Bar> {
        self.series
            .read()
            .get(ticker)
            .map(|r| r.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn closes(&self, ticker: &str) -> Vec<f64> {
        self.series
            .read()
            .get(ticker)
            .map(|r| r.iter().map(|b| b.close).collect())
            .unwrap_or_default()
    }

    pub fn last_close(&self, ticker: &str) -> Option<f64> {
        self.series.read().get(ticker)?.back().map(|b| b.close)
    }

    pub fn len(&self, ticker: &str) -> usize {
        self.series.read().get(ticker).map_or(0, VecDeque::len)
    }

    pub fn clear_all(&self) {
        self.series.write().clear();
    }
}

fn bar_is_finite(bar: &Bar) -> bool {
    [bar.open, bar.high, bar.low, bar.close].iter().all(|v| v.is_finite())
}

fn trim(ring: &mut VecDeque<Bar>, limit: usize) {
    while ring.len() > limit {
        ring.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(tick: u32, close: f64) -> Bar {
        Bar {
            tick,
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
        }
    }

    #[test]
    fn merge_orders_by_tick_and_replaces_live_bar() {
        let h = PriceHistory::new(10);
        h.merge("CRZY", &[bar(3, 3.0), bar(1, 1.0), bar(2, 2.0)]);
        h.merge("CRZY", &[bar(3, 3.5), bar(4, 4.0)]);
        assert_eq!(h.closes("CRZY"), vec![1.0, 2.0, 3.5, 4.0]);
        assert_eq!(h.last_close("CRZY"), Some(4.0));
    }

    #[test]
    fn ring_is_capped() {
        let h = PriceHistory::new(3);
        let bars: Vec<Bar> = (1..=5).map(|t| bar(t, t as f64)).collect();
        h.merge("TAME", &bars);
        assert_eq!(h.len("TAME"), 3);
        assert_eq!(h.bars("TAME")[0].tick, 3);
    }

    #[test]
    fn samples_fold_into_bars() {
        let h = PriceHistory::new(10);
        h.record_price("CRZY", 5, 10.0);
        h.record_price("CRZY", 5, 10.4);
        h.record_price("CRZY", 5, 9.8);
        h.record_price("CRZY", 6, 10.1);
        h.record_price("CRZY", 6, f64::NAN);

        let bars = h.bars("CRZY");
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].open, 10.0);
        assert_eq!(bars[0].high, 10.4);
        assert_eq!(bars[0].low, 9.8);
        assert_eq!(bars[0].close, 9.8);
        assert_eq!(bars[1], Bar::flat(6, 10.1));
    }

    #[test]
    fn clear_and_unknown_tickers() {
        let h = PriceHistory::new(10);
        assert!(h.bars("NONE").is_empty());
        assert!(h.last_close("NONE").is_none());
        h.merge("CRZY", &[bar(1, 1.0)]);
        h.merge("TAME", &[bar(1, 2.0)]);
        h.clear_all();
        assert_eq!(h.len("CRZY"), 0);
        assert_eq!(h.len("TAME"), 0);
    }
}
