// =============================================================================
// Price Ladder: fixed tick grid around the book
// =============================================================================
//
// Prices are mapped to integer tick indices (`round(price / tick_size)`) so
// that levels from the book, our own orders and the grid line up exactly
// regardless of float noise. Rows run from the highest price down.
// =============================================================================

use std::collections::HashMap;

use serde::Serialize;

use crate::types::{BookLevel, Order, OrderBook, OrderStatus, Side};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LadderRow {
    pub price: f64,
    pub bid_qty: f64,
    pub ask_qty: f64,
    pub own_bid_qty: f64,
    pub own_ask_qty: f64,
    pub is_best_bid: bool,
    pub is_best_ask: bool,
}

fn tick_index(price: f64, tick_size: f64) -> Option<i64> {
    let idx = (price / tick_size).round();
    idx.is_finite().then_some(idx as i64)
}

/// Price of grid row `idx`, rounded to the tick size's decimals.
fn grid_price(idx: i64, tick_size: f64) -> f64 {
    let decimals = (-tick_size.log10().floor()).clamp(0.0, 10.0) as i32 + 2;
    let scale = 10f64.powi(decimals);
    (idx as f64 * tick_size * scale).round() / scale
}

fn aggregate(levels: &[BookLevel], tick_size: f64) -> HashMap<i64, f64> {
    let mut out = HashMap::new();
    for level in levels {
        let Some(idx) = level.price.and_then(|p| tick_index(p, tick_size)) else {
            continue;
        };
        *out.entry(idx).or_insert(0.0) += level.open_quantity();
    }
    out
}

fn best_index(levels: &[BookLevel], tick_size: f64) -> Option<i64> {
    levels
        .iter()
        .find_map(|l| l.price.and_then(|p| tick_index(p, tick_size)))
}

/// Build `2 * levels + 1` rows centred on the mid, or on whichever best price
/// exists, or on `last_price`. Empty when there is no reference price or the
/// tick size is not positive.
///
/// `own_orders` should already be filtered to the ladder's ticker; only open
/// orders with a price contribute their unfilled quantity.
pub fn build_ladder(
    book: &OrderBook,
    own_orders: &[Order],
    tick_size: f64,
    levels: usize,
    last_price: Option<f64>,
) -> Vec<LadderRow> {
    if !(tick_size.is_finite() && tick_size > 0.0) {
        return Vec::new();
    }

    let best_bid = best_index(&book.bids, tick_size);
    let best_ask = best_index(&book.asks, tick_size);

    let center = match (best_bid, best_ask) {
        (Some(b), Some(a)) => {
            let bid = grid_price(b, tick_size);
            let ask = grid_price(a, tick_size);
            tick_index((bid + ask) / 2.0, tick_size)
        }
        (Some(only), None) | (None, Some(only)) => Some(only),
        (None, None) => last_price.and_then(|p| tick_index(p, tick_size)),
    };
    let Some(center) = center else {
        return Vec::new();
    };

    let bids = aggregate(&book.bids, tick_size);
    let asks = aggregate(&book.asks, tick_size);

    let mut own_bids: HashMap<i64, f64> = HashMap::new();
    let mut own_asks: HashMap<i64, f64> = HashMap::new();
    for order in own_orders.iter().filter(|o| o.status == OrderStatus::Open) {
        let Some(idx) = order.price.and_then(|p| tick_index(p, tick_size)) else {
            continue;
        };
        let open = (order.quantity - order.quantity_filled).max(0.0);
        let side = match order.action {
            Side::Buy => &mut own_bids,
            Side::Sell => &mut own_asks,
        };
        *side.entry(idx).or_insert(0.0) += open;
    }

    let span = levels as i64;
    ((center - span)..=(center + span))
        .rev()
        .map(|idx| LadderRow {
            price: grid_price(idx, tick_size),
            bid_qty: bids.get(&idx).copied().unwrap_or(0.0),
            ask_qty: asks.get(&idx).copied().unwrap_or(0.0),
            own_bid_qty: own_bids.get(&idx).copied().unwrap_or(0.0),
            own_ask_qty: own_asks.get(&idx).copied().unwrap_or(0.0),
            is_best_bid: best_bid == Some(idx),
            is_best_ask: best_ask == Some(idx),
        })
        .collect()
}
