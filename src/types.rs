// =============================================================================
// RIT wire model: shared types returned by the REST API
// =============================================================================
//
// The simulation server is loose about optional fields, so nearly everything
// carries `#[serde(default)]`. Types that the tools echo back verbatim keep
// unknown keys in a flattened `extra` map.
// =============================================================================

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

type Extra = serde_json::Map<String, serde_json::Value>;

/// `GET /v1/case`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub period: u32,
    #[serde(default)]
    pub tick: u32,
    #[serde(default)]
    pub ticks_per_period: u32,
    #[serde(default)]
    pub total_periods: u32,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub is_enforce_trading_limits: bool,
}

impl CaseInfo {
    /// Ticks left in the current period, if the server reports a period length.
    pub fn ticks_remaining(&self) -> Option<u32> {
        if self.ticks_per_period == 0 {
            return None;
        }
        Some(self.ticks_per_period.saturating_sub(self.tick))
    }
}

/// One row of `GET /v1/securities`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Security {
    pub ticker: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub position: f64,
    #[serde(default)]
    pub vwap: Option<f64>,
    #[serde(default)]
    pub nlv: Option<f64>,
    #[serde(default)]
    pub last: Option<f64>,
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub bid_size: Option<f64>,
    #[serde(default)]
    pub ask: Option<f64>,
    #[serde(default)]
    pub ask_size: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub unrealized: Option<f64>,
    #[serde(default)]
    pub realized: Option<f64>,
    #[serde(default)]
    pub is_tradeable: Option<bool>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Security {
    pub fn mid(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some(b), Some(a)) => Some((b + a) / 2.0),
            _ => None,
        }
    }
}

/// A resting order on one side of the book.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookLevel {
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default, alias = "qty", alias = "size", alias = "volume")]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub quantity_filled: Option<f64>,
    #[serde(default)]
    pub order_id: Option<u64>,
    #[serde(default)]
    pub trader_id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl BookLevel {
    /// Quantity still resting (total minus filled).
    pub fn open_quantity(&self) -> f64 {
        let total = self.quantity.unwrap_or(0.0);
        let filled = self.quantity_filled.unwrap_or(0.0);
        (total - filled).max(0.0)
    }
}

/// `GET /v1/securities/book`. The server has used both `bid`/`ask` and
/// `bids`/`asks` for the side arrays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    #[serde(default, alias = "bid")]
    pub bids: Vec<BookLevel>,
    #[serde(default, alias = "ask")]
    pub asks: Vec<BookLevel>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// One OHLC bar of `GET /v1/securities/history`, keyed by tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub tick: u32,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Bar {
    pub fn flat(tick: u32, price: f64) -> Self {
        Self {
            tick,
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Market => write!(f, "MARKET"),
            Self::Limit => write!(f, "LIMIT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Open,
    Transacted,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Transacted => write!(f, "TRANSACTED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// One of the trader's own orders (`GET /v1/orders`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: u64,
    #[serde(default)]
    pub period: u32,
    #[serde(default)]
    pub tick: u32,
    #[serde(default)]
    pub trader_id: Option<String>,
    pub ticker: String,
    #[serde(rename = "type")]
    pub kind: OrderType,
    pub quantity: f64,
    pub action: Side,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub quantity_filled: f64,
    #[serde(default)]
    pub vwap: Option<f64>,
    pub status: OrderStatus,
}

/// One print on the time-and-sales tape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeAndSale {
    pub id: u64,
    #[serde(default)]
    pub period: u32,
    #[serde(default)]
    pub tick: u32,
    pub price: f64,
    pub quantity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub news_id: u64,
    #[serde(default)]
    pub period: u32,
    #[serde(default)]
    pub tick: u32,
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub headline: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trader {
    #[serde(default)]
    pub trader_id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub nlv: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradingLimit {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub gross: f64,
    #[serde(default)]
    pub net: f64,
    #[serde(default)]
    pub gross_limit: f64,
    #[serde(default)]
    pub net_limit: f64,
    #[serde(default)]
    pub gross_fine: f64,
    #[serde(default)]
    pub net_fine: f64,
}

/// Body of an order submission coming from the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub ticker: String,
    #[serde(rename = "type")]
    pub kind: OrderType,
    pub quantity: f64,
    pub action: Side,
    #[serde(default)]
    pub price: Option<f64>,
}

impl OrderRequest {
    pub fn validate(&self) -> Result<()> {
        if self.ticker.trim().is_empty() {
            bail!("ticker must not be empty");
        }
        if !(self.quantity.is_finite() && self.quantity > 0.0) {
            bail!("quantity must be positive, got {}", self.quantity);
        }
        if self.kind == OrderType::Limit {
            match self.price {
                Some(p) if p.is_finite() && p > 0.0 => {}
                _ => bail!("limit orders need a positive price"),
            }
        }
        Ok(())
    }

    /// Query parameters in the order RIT expects for `POST /v1/orders`.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("ticker".to_string(), self.ticker.clone()),
            ("type".to_string(), self.kind.to_string()),
            ("quantity".to_string(), self.quantity.to_string()),
            ("action".to_string(), self.action.to_string()),
        ];
        if self.kind == OrderType::Limit {
            if let Some(p) = self.price {
                params.push(("price".to_string(), p.to_string()));
            }
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn book_accepts_singular_side_keys_and_qty_aliases() {
        let json = r#"{
            "bid": [{"price": 9.99, "qty": 300, "order_id": 7, "trader_id": "ANON"}],
            "ask": [{"price": 10.01, "size": 200}]
        }"#;
        let book: OrderBook = serde_json::from_str(json).unwrap();
        assert_eq!(book.bids.len(), 1);
        assert_eq!(book.bids[0].quantity, Some(300.0));
        assert_eq!(book.bids[0].order_id, Some(7));
        assert_eq!(book.asks[0].quantity, Some(200.0));
    }

    #[test]
    fn book_keeps_unknown_keys() {
        let json = r#"{"bids": [], "asks": [], "ticker": "CRZY"}"#;
        let book: OrderBook = serde_json::from_str(json).unwrap();
        assert_eq!(book.extra.get("ticker").and_then(|v| v.as_str()), Some("CRZY"));
    }

    #[test]
    fn open_quantity_subtracts_fills() {
        let level = BookLevel {
            quantity: Some(500.0),
            quantity_filled: Some(120.0),
            ..Default::default()
        };
        assert!((level.open_quantity() - 380.0).abs() < 1e-10);
    }

    #[test]
    fn order_parses_rit_shape() {
        let json = r#"{
            "order_id": 1221, "period": 1, "tick": 10, "trader_id": "trader49",
            "ticker": "CRZY", "type": "LIMIT", "quantity": 100, "action": "BUY",
            "price": 14.21, "quantity_filled": 40, "vwap": 14.2, "status": "OPEN"
        }"#;
        let order: Order = serde_json::from_str(json).unwrap();
        assert_eq!(order.action, Side::Buy);
        assert_eq!(order.kind, OrderType::Limit);
        assert_eq!(order.status, OrderStatus::Open);
        assert!((order.quantity_filled - 40.0).abs() < 1e-10);
    }

    #[test]
    fn unknown_order_status_does_not_fail() {
        let json = r#"{"order_id": 1, "ticker": "X", "type": "MARKET",
            "quantity": 1, "action": "SELL", "status": "EXPIRED"}"#;
        let order: Order = serde_json::from_str(json).unwrap();
        assert_eq!(order.status, OrderStatus::Unknown);
    }

    #[test]
    fn order_request_validation() {
        let mut req = OrderRequest {
            ticker: "CRZY".into(),
            kind: OrderType::Limit,
            quantity: 100.0,
            action: Side::Buy,
            price: None,
        };
        assert!(req.validate().is_err());
        req.price = Some(10.5);
        assert!(req.validate().is_ok());
        req.quantity = 0.0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn market_order_params_omit_price() {
        let req = OrderRequest {
            ticker: "CRZY".into(),
            kind: OrderType::Market,
            quantity: 5.0,
            action: Side::Sell,
            price: Some(1.0),
        };
        let params = req.to_params();
        assert!(params.iter().all(|(k, _)| k != "price"));
        assert!(params.contains(&("action".to_string(), "SELL".to_string())));
    }

    #[test]
    fn ticks_remaining_needs_period_length() {
        let mut case = CaseInfo {
            tick: 120,
            ..Default::default()
        };
        assert_eq!(case.ticks_remaining(), None);
        case.ticks_per_period = 300;
        assert_eq!(case.ticks_remaining(), Some(180));
    }
}
