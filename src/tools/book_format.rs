//! Plain-text rendering of a raw `/v1/securities/book` payload.
//!
//! Works on `serde_json::Value` rather than [`crate::types::OrderBook`] so
//! that whatever extra fields the server sends are shown as-is.

use serde_json::{Map, Value};

const SIDE_KEYS: &[&str] = &["bids", "asks", "bid", "ask"];
const QTY_KEYS: &[&str] = &["quantity", "qty", "size", "volume"];
const MAX_ROWS: usize = 50;
const PRICE_WIDTH: usize = 10;
const QTY_WIDTH: usize = 11;

/// Levels of one side; the server has used both `bids` and `bid`.
fn side<'a>(book: &'a Value, plural: &str, singular: &str) -> &'a [Value] {
    let non_empty = |key: &str| {
        book.get(key)
            .and_then(Value::as_array)
            .filter(|levels| !levels.is_empty())
            .map(Vec::as_slice)
    };
    non_empty(plural).or_else(|| non_empty(singular)).unwrap_or(&[])
}

/// First bid and first ask, unparsed.
pub fn top_of_book(book: &Value) -> (Option<&Value>, Option<&Value>) {
    (side(book, "bids", "bid").first(), side(book, "asks", "ask").first())
}

/// `best_bid=<level>, best_ask=<level>`.
pub fn summarize_book(book: &Value) -> String {
    let show = |level: Option<&Value>| level.map_or_else(|| "none".to_string(), Value::to_string);
    let (bid, ask) = top_of_book(book);
    format!("best_bid={}, best_ask={}", show(bid), show(ask))
}

fn format_num(value: Option<&Value>, width: usize) -> String {
    match value {
        None | Some(Value::Null) => " ".repeat(width),
        // `Number`'s own Display ignores width, so go through the primitives.
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                format!("{i:>width$}")
            } else if let Some(u) = n.as_u64() {
                format!("{u:>width$}")
            } else {
                format!("{:>width$.4}", n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Some(Value::String(s)) => format!("{s:>width$}"),
        Some(other) => format!("{:>width$}", other.to_string()),
    }
}

fn level_qty(level: &Map<String, Value>) -> Option<&Value> {
    QTY_KEYS.iter().find_map(|k| level.get(*k))
}

fn level_row(label: &str, level: &Value) -> String {
    let empty = Map::new();
    let fields = level.as_object().unwrap_or(&empty);
    let extra: Map<String, Value> = fields
        .iter()
        .filter(|(k, _)| k.as_str() != "price" && !QTY_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    format!(
        "{label}  |{}|{}| {}",
        format_num(fields.get("price"), PRICE_WIDTH),
        format_num(level_qty(fields), QTY_WIDTH),
        Value::Object(extra)
    )
}

/// Render `book` as a metadata block followed by a BID/ASK table.
///
/// Rows shown: `max(depth, bids, asks)`, capped at 50.
pub fn format_book_pretty(book: &Value, depth: usize) -> String {
    let mut lines = Vec::new();

    if let Some(obj) = book.as_object() {
        let mut meta: Vec<(&String, &Value)> =
            obj.iter().filter(|(k, _)| !SIDE_KEYS.contains(&k.as_str())).collect();
        if !meta.is_empty() {
            meta.sort_by(|a, b| a.0.cmp(b.0));
            for (key, value) in meta {
                match value {
                    Value::String(s) => lines.push(format!("{key}: {s}")),
                    other => lines.push(format!("{key}: {other}")),
                }
            }
            lines.push(String::new());
        }
    }

    let bids = side(book, "bids", "bid");
    let asks = side(book, "asks", "ask");

    lines.push("Order Book (top levels)".to_string());
    lines.push("Side |    Price |       Qty | Extra".to_string());
    lines.push("-----+----------+-----------+------------------------------".to_string());

    let rows = depth.max(bids.len()).max(asks.len()).min(MAX_ROWS);
    for i in 0..rows {
        if let Some(bid) = bids.get(i) {
            lines.push(level_row("BID", bid));
        }
        if let Some(ask) = asks.get(i) {
            lines.push(level_row("ASK", ask));
        }
    }

    lines.join("\n")
}
