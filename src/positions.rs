// =============================================================================
// Positions: fill tape, average-cost book and reconciliation
// =============================================================================
//
// RIT only reports order snapshots, so fills are derived by remembering the
// `quantity_filled` last seen for every order id. Each increase becomes one
// `Fill`, which the `PositionBook` folds into a signed quantity with an
// average cost.
//
// SAFETY POLICY: `reconcile` only reports drift between derived and
// server-reported positions. It never submits or cancels anything.
// Logging the drift is left to the caller.
// =============================================================================

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{Order, OrderStatus, Security, Side};

/// Quantities closer than this to each other are treated as equal.
const QTY_EPSILON: f64 = 1e-9;
/// Derived fills kept on the tape; older ones are dropped.
pub const MAX_FILLS: usize = 1000;

// ---------------------------------------------------------------------------
// Fill tape
// ---------------------------------------------------------------------------

/// One execution derived from consecutive order snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: u64,
    pub ticker: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub period: u32,
    pub tick: u32,
}

#[derive(Debug, Clone, Copy)]
struct SeenOrder {
    filled: f64,
    vwap: Option<f64>,
}

/// Remembers how much of every order has already been turned into fills.
#[derive(Debug, Default)]
pub struct FillTape {
    seen: HashMap<u64, SeenOrder>,
    fills: Vec<Fill>,
}

impl FillTape {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff `orders` against what was seen before and return the new fills.
    ///
    /// The fill price is the part of the order VWAP attributable to the new
    /// quantity, falling back to the VWAP itself and then the limit price.
    pub fn ingest(&mut self, orders: &[Order]) -> Vec<Fill> {
        let mut new_fills = Vec::new();

        for order in orders {
            if order.status == OrderStatus::Unknown || !order.quantity_filled.is_finite() {
                continue;
            }
            let prev = self.seen.get(&order.order_id).copied();
            let prev_filled = prev.map_or(0.0, |s| s.filled);
            let delta = order.quantity_filled - prev_filled;
            if delta <= QTY_EPSILON {
                continue;
            }

            self.seen.insert(
                order.order_id,
                SeenOrder {
                    filled: order.quantity_filled,
                    vwap: order.vwap,
                },
            );

            let Some(price) = incremental_price(order, prev, delta) else {
                warn!(order_id = order.order_id, ticker = %order.ticker, "fill without a price, skipped");
                continue;
            };

            let fill = Fill {
                order_id: order.order_id,
                ticker: order.ticker.clone(),
                side: order.action,
                quantity: delta,
                price,
                period: order.period,
                tick: order.tick,
            };
            debug!(order_id = fill.order_id, ticker = %fill.ticker, qty = fill.quantity, price = fill.price, "fill derived");
            new_fills.push(fill);
        }

        self.fills.extend(new_fills.iter().cloned());
        if self.fills.len() > MAX_FILLS {
            let excess = self.fills.len() - MAX_FILLS;
            self.fills.drain(..excess);
        }
        new_fills
    }

    /// Recent fills, oldest first, at most [`MAX_FILLS`].
    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.fills.clear();
    }
}

fn incremental_price(order: &Order, prev: Option<SeenOrder>, delta: f64) -> Option<f64> {
    let vwap = order.vwap.filter(|v| v.is_finite() && *v > 0.0);
    if let (Some(now), Some(SeenOrder { filled, vwap: Some(before) })) = (vwap, prev) {
        let price = (now * order.quantity_filled - before * filled) / delta;
        if price.is_finite() && price > 0.0 {
            return Some(price);
        }
    }
    vwap.or(order.price.filter(|p| p.is_finite() && *p > 0.0))
}

// ---------------------------------------------------------------------------
// Position book
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    /// Signed: positive long, negative short.
    pub quantity: f64,
    pub avg_price: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub last_price: Option<f64>,
}

impl Position {
    fn remark(&mut self) {
        self.unrealized_pnl = match self.last_price {
            Some(p) if self.quantity != 0.0 => (p - self.avg_price) * self.quantity,
            _ => 0.0,
        };
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PnlTotals {
    pub realized: f64,
    pub unrealized: f64,
    pub total: f64,
}

/// Average-cost positions per ticker.
#[derive(Debug, Default)]
pub struct PositionBook {
    positions: BTreeMap<String, Position>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fill in and return the PnL it realized.
    pub fn apply(&mut self, fill: &Fill) -> f64 {
        let pos = self
            .positions
            .entry(fill.ticker.clone())
            .or_insert_with(|| Position {
                ticker: fill.ticker.clone(),
                ..Default::default()
            });

        let signed = fill.side.sign() * fill.quantity;
        let mut realized = 0.0;

        if pos.quantity == 0.0 || pos.quantity.signum() == signed.signum() {
            let held = pos.quantity.abs();
            pos.avg_price = (held * pos.avg_price + fill.quantity * fill.price) / (held + fill.quantity);
            pos.quantity += signed;
        } else {
            let direction = pos.quantity.signum();
            let closed = pos.quantity.abs().min(fill.quantity);
            realized = (fill.price - pos.avg_price) * closed * direction;
            pos.realized_pnl += realized;
            pos.quantity += signed;

            if pos.quantity.abs() <= QTY_EPSILON {
                pos.quantity = 0.0;
                pos.avg_price = 0.0;
            } else if pos.quantity.signum() != direction {
                // Crossed through flat: the remainder opens at the fill price.
                pos.avg_price = fill.price;
            }
        }

        pos.remark();
        realized
    }

    /// Update the mark price of `ticker` and its unrealized PnL.
    pub fn mark(&mut self, ticker: &str, price: f64) {
        if !price.is_finite() {
            return;
        }
        if let Some(pos) = self.positions.get_mut(ticker) {
            pos.last_price = Some(price);
            pos.remark();
        }
    }

    pub fn get(&self, ticker: &str) -> Option<&Position> {
        self.positions.get(ticker)
    }

    /// Open positions sorted by ticker.
    pub fn positions(&self) -> Vec<Position> {
        self.positions
            .values()
            .filter(|p| p.quantity != 0.0)
            .cloned()
            .collect()
    }

    /// Signed quantity per ticker, flat tickers included.
    pub fn quantities(&self) -> BTreeMap<String, f64> {
        self.positions
            .iter()
            .map(|(t, p)| (t.clone(), p.quantity))
            .collect()
    }

    pub fn totals(&self) -> PnlTotals {
        let realized: f64 = self.positions.values().map(|p| p.realized_pnl).sum();
        let unrealized: f64 = self.positions.values().map(|p| p.unrealized_pnl).sum();
        PnlTotals {
            realized,
            unrealized,
            total: realized + unrealized,
        }
    }

    pub fn clear(&mut self) {
        self.positions.clear();
    }
}

// ---------------------------------------------------------------------------
// Ledger: tape + book together
// ---------------------------------------------------------------------------

/// Fill tape feeding a position book.
#[derive(Debug, Default)]
pub struct Ledger {
    pub tape: FillTape,
    pub book: PositionBook,
}

impl Ledger {
    /// Derive fills from `orders` and apply them. Returns the new fills.
    pub fn ingest_orders(&mut self, orders: &[Order]) -> Vec<Fill> {
        let fills = self.tape.ingest(orders);
        for fill in &fills {
            self.book.apply(fill);
        }
        fills
    }

    pub fn clear(&mut self) {
        self.tape.clear();
        self.book.clear();
    }
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// A ticker whose derived position disagrees with the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionDrift {
    pub ticker: String,
    pub derived: f64,
    pub reported: f64,
    pub difference: f64,
}

/// Compare derived quantities with each security's reported `position`.
/// Tickers missing on one side count as flat there.
pub fn reconcile(book: &PositionBook, securities: &[Security]) -> Vec<PositionDrift> {
    let mut reported: BTreeMap<String, f64> = securities
        .iter()
        .map(|s| (s.ticker.clone(), s.position))
        .collect();
    let derived = book.quantities();
    for ticker in derived.keys() {
        reported.entry(ticker.clone()).or_insert(0.0);
    }

    let mut drift = Vec::new();
    for (ticker, server_qty) in reported {
        let ours = derived.get(&ticker).copied().unwrap_or(0.0);
        let difference = ours - server_qty;
        if difference.abs() > 1e-6 {
            drift.push(PositionDrift {
                ticker,
                derived: ours,
                reported: server_qty,
                difference,
            });
        }
    }
    drift
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderType;

    fn order(id: u64, action: Side, qty: f64, filled: f64, vwap: Option<f64>) -> Order {
        Order {
            order_id: id,
            period: 1,
            tick: 10,
            trader_id: None,
            ticker: "CRZY".into(),
            kind: OrderType::Market,
            quantity: qty,
            action,
            price: None,
            quantity_filled: filled,
            vwap,
            status: if filled >= qty { OrderStatus::Transacted } else { OrderStatus::Open },
        }
    }

    fn fill(side: Side, qty: f64, price: f64) -> Fill {
        Fill {
            order_id: 1,
            ticker: "CRZY".into(),
            side,
            quantity: qty,
            price,
            period: 1,
            tick: 1,
        }
    }

    #[test]
    fn tape_emits_only_increases() {
        let mut tape = FillTape::new();
        let fills = tape.ingest(&[order(1, Side::Buy, 100.0, 40.0, Some(10.0))]);
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].quantity, 40.0);
        assert_eq!(fills[0].price, 10.0);

        // Same snapshot again: nothing new.
        assert!(tape.ingest(&[order(1, Side::Buy, 100.0, 40.0, Some(10.0))]).is_empty());
        // A decrease is ignored.
        assert!(tape.ingest(&[order(1, Side::Buy, 100.0, 30.0, Some(10.0))]).is_empty());

        let fills = tape.ingest(&[order(1, Side::Buy, 100.0, 100.0, Some(10.6))]);
        assert_eq!(fills[0].quantity, 60.0);
        // 100 @ 10.6 total minus 40 @ 10.0 => 60 @ 11.0
        assert!((fills[0].price - 11.0).abs() < 1e-9);
        assert_eq!(tape.fills().len(), 2);
    }

    #[test]
    fn tape_keeps_only_recent_fills() {
        let mut tape = FillTape::new();
        for id in 0..(MAX_FILLS as u64 + 5) {
            tape.ingest(&[order(id, Side::Buy, 1.0, 1.0, Some(10.0))]);
        }
        assert_eq!(tape.fills().len(), MAX_FILLS);
        assert_eq!(tape.fills()[0].order_id, 5);

        // Ids already seen still yield nothing after the trim.
        assert!(tape.ingest(&[order(0, Side::Buy, 1.0, 1.0, Some(10.0))]).is_empty());
    }

    #[test]
    fn tape_falls_back_to_limit_price_and_skips_unknown() {
        let mut tape = FillTape::new();
        let mut limit = order(2, Side::Sell, 10.0, 10.0, None);
        limit.price = Some(9.5);
        let mut weird = order(3, Side::Sell, 10.0, 10.0, Some(9.0));
        weird.status = OrderStatus::Unknown;
        let unpriced = order(4, Side::Buy, 5.0, 5.0, None);

        let fills = tape.ingest(&[limit, weird, unpriced]);
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, 9.5);
        assert_eq!(fills[0].side, Side::Sell);
    }

    #[test]
    fn same_direction_reaverages() {
        let mut book = PositionBook::new();
        book.apply(&fill(Side::Buy, 100.0, 10.0));
        book.apply(&fill(Side::Buy, 100.0, 12.0));
        let p = book.get("CRZY").unwrap();
        assert_eq!(p.quantity, 200.0);
        assert!((p.avg_price - 11.0).abs() < 1e-9);
    }

    #[test]
    fn opposing_fill_realizes_pnl() {
        let mut book = PositionBook::new();
        book.apply(&fill(Side::Buy, 100.0, 10.0));
        let realized = book.apply(&fill(Side::Sell, 40.0, 10.5));
        assert!((realized - 20.0).abs() < 1e-9);
        let p = book.get("CRZY").unwrap();
        assert_eq!(p.quantity, 60.0);
        assert!((p.avg_price - 10.0).abs() < 1e-9);

        // Short side realizes the other way round.
        let mut short = PositionBook::new();
        short.apply(&fill(Side::Sell, 50.0, 20.0));
        let realized = short.apply(&fill(Side::Buy, 50.0, 19.0));
        assert!((realized - 50.0).abs() < 1e-9);
        let p = short.get("CRZY").unwrap();
        assert_eq!(p.quantity, 0.0);
        assert_eq!(p.avg_price, 0.0);
        assert!(short.positions().is_empty());
    }

    #[test]
    fn crossing_through_flat_opens_remainder_at_fill_price() {
        let mut book = PositionBook::new();
        book.apply(&fill(Side::Buy, 100.0, 10.0));
        let realized = book.apply(&fill(Side::Sell, 150.0, 11.0));
        assert!((realized - 100.0).abs() < 1e-9);
        let p = book.get("CRZY").unwrap();
        assert_eq!(p.quantity, -50.0);
        assert!((p.avg_price - 11.0).abs() < 1e-9);
    }

    #[test]
    fn marking_and_totals() {
        let mut book = PositionBook::new();
        book.apply(&fill(Side::Buy, 100.0, 10.0));
        book.apply(&fill(Side::Sell, 50.0, 12.0));
        book.mark("CRZY", 11.0);
        book.mark("NONE", 5.0);
        let t = book.totals();
        assert!((t.realized - 100.0).abs() < 1e-9);
        assert!((t.unrealized - 50.0).abs() < 1e-9);
        assert!((t.total - 150.0).abs() < 1e-9);
    }

    #[test]
    fn ledger_and_reconcile() {
        let mut ledger = Ledger::default();
        ledger.ingest_orders(&[order(1, Side::Buy, 100.0, 100.0, Some(10.0))]);

        let agree = vec![Security {
            ticker: "CRZY".into(),
            position: 100.0,
            ..Default::default()
        }];
        assert!(reconcile(&ledger.book, &agree).is_empty());

        let disagree = vec![
            Security {
                ticker: "CRZY".into(),
                position: 80.0,
                ..Default::default()
            },
            Security {
                ticker: "TAME".into(),
                position: -5.0,
                ..Default::default()
            },
        ];
        let drift = reconcile(&ledger.book, &disagree);
        assert_eq!(drift.len(), 2);
        assert_eq!(drift[0].ticker, "CRZY");
        assert!((drift[0].difference - 20.0).abs() < 1e-9);
        assert_eq!(drift[1].derived, 0.0);

        ledger.clear();
        assert!(ledger.tape.fills().is_empty());
        assert!(ledger.book.positions().is_empty());
    }
}
