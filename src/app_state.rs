// =============================================================================
// Desk State: everything the dashboard knows about the RIT session
// =============================================================================
//
// The poller writes, the HTTP API reads. Every mutation bumps
// `state_version`; the WebSocket feed pushes a fresh snapshot whenever it
// moves.
//
// Thread safety:
//   - Atomic counters for lock-free version tracking.
//   - parking_lot::RwLock for all mutable shared collections.
// =============================================================================

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::credentials::ConnectionMode;
use crate::indicators::IndicatorSnapshot;
use crate::market_data::{build_ladder, BookStore, BookSummary, LadderRow, PriceHistory};
use crate::positions::{reconcile, Fill, Ledger, PnlTotals, Position, PositionDrift};
use crate::rit::{RequestStatsSnapshot, RitClient};
use crate::runtime_config::RuntimeConfig;
use crate::types::{CaseInfo, NewsItem, Order, Security, TimeAndSale, Trader, TradingLimit};

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;
/// Time-and-sales prints kept per ticker for VWAP.
const MAX_TAPE: usize = 1000;
/// Fills included in a snapshot.
const SNAPSHOT_FILLS: usize = 100;

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// What was being polled when it failed.
    pub source: Option<String>,
    pub at: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub last_ok: Option<String>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

/// How a new `/case` reading relates to the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseTransition {
    Unchanged,
    First,
    NewCase,
    NewPeriod,
}

impl CaseTransition {
    pub fn resets_session(self) -> bool {
        matches!(self, Self::NewCase | Self::NewPeriod)
    }
}

// =============================================================================
// DeskState
// =============================================================================

pub struct DeskState {
    pub state_version: AtomicU64,

    pub config: RwLock<RuntimeConfig>,
    pub client: RitClient,

    pub case: RwLock<Option<CaseInfo>>,
    pub securities: RwLock<Vec<Security>>,
    pub books: BookStore,
    pub history: PriceHistory,
    pub tapes: RwLock<HashMap<String, VecDeque<TimeAndSale>>>,
    pub orders: RwLock<Vec<Order>>,
    pub ledger: RwLock<Ledger>,
    pub drift: RwLock<Vec<PositionDrift>>,
    pub news: RwLock<VecDeque<NewsItem>>,
    pub tenders: RwLock<Vec<serde_json::Value>>,
    pub leases: RwLock<Vec<serde_json::Value>>,
    pub trader: RwLock<Option<Trader>>,
    pub limits: RwLock<Vec<TradingLimit>>,
    pub indicators: RwLock<HashMap<String, IndicatorSnapshot>>,

    pub connection: RwLock<ConnectionStatus>,
    pub recent_errors: RwLock<Vec<ErrorRecord>>,
    pub disabled_endpoints: RwLock<BTreeSet<String>>,

    /// Bearer token for order entry and the WebSocket feed; `None` refuses both.
    admin_token: Option<String>,

    pub start_time: std::time::Instant,
}

impl DeskState {
    pub fn new(config: RuntimeConfig, client: RitClient) -> Self {
        let history = PriceHistory::new(config.history_limit);
        Self {
            state_version: AtomicU64::new(1),
            config: RwLock::new(config),
            client,
            case: RwLock::new(None),
            securities: RwLock::new(Vec::new()),
            books: BookStore::new(),
            history,
            tapes: RwLock::new(HashMap::new()),
            orders: RwLock::new(Vec::new()),
            ledger: RwLock::new(Ledger::default()),
            drift: RwLock::new(Vec::new()),
            news: RwLock::new(VecDeque::new()),
            tenders: RwLock::new(Vec::new()),
            leases: RwLock::new(Vec::new()),
            trader: RwLock::new(None),
            limits: RwLock::new(Vec::new()),
            indicators: RwLock::new(HashMap::new()),
            connection: RwLock::new(ConnectionStatus::default()),
            recent_errors: RwLock::new(Vec::new()),
            disabled_endpoints: RwLock::new(BTreeSet::new()),
            admin_token: None,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        self
    }

    pub fn admin_token(&self) -> Option<&str> {
        self.admin_token.as_deref()
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Connection & errors ─────────────────────────────────────────────

    pub fn record_ok(&self) {
        let mut conn = self.connection.write();
        let changed = !conn.connected || conn.consecutive_failures > 0;
        conn.connected = true;
        conn.consecutive_failures = 0;
        conn.last_ok = Some(Utc::now().to_rfc3339());
        drop(conn);
        if changed {
            self.increment_version();
        }
    }

    /// Mark the connection down and return the consecutive failure count.
    pub fn record_failure(&self, source: &str, message: String) -> u32 {
        let failures = {
            let mut conn = self.connection.write();
            conn.connected = false;
            conn.consecutive_failures = conn.consecutive_failures.saturating_add(1);
            conn.last_error = Some(message.clone());
            conn.consecutive_failures
        };
        self.push_error(Some(source), message);
        failures
    }

    /// Record an error; the ring is capped at [`MAX_RECENT_ERRORS`].
    pub fn push_error(&self, source: Option<&str>, message: String) {
        let record = ErrorRecord {
            message,
            source: source.map(str::to_string),
            at: Utc::now().to_rfc3339(),
        };
        let mut errors = self.recent_errors.write();
        errors.push(record);
        if errors.len() > MAX_RECENT_ERRORS {
            let excess = errors.len() - MAX_RECENT_ERRORS;
            errors.drain(..excess);
        }
        drop(errors);
        self.increment_version();
    }

    pub fn disable_endpoint(&self, name: &str) {
        if self.disabled_endpoints.write().insert(name.to_string()) {
            info!(endpoint = name, "endpoint not available on this server, disabled for the run");
            self.increment_version();
        }
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled_endpoints.read().contains(name)
    }

    // ── Case / session ──────────────────────────────────────────────────

    /// Store the latest case. A new case name or period wipes the
    /// per-session data (history, tapes, fills, positions, indicators).
    pub fn set_case(&self, case: CaseInfo) -> CaseTransition {
        let transition = {
            let mut current = self.case.write();
            let transition = match current.as_ref() {
                None => CaseTransition::First,
                Some(prev) if prev.name != case.name => CaseTransition::NewCase,
                Some(prev) if prev.period != case.period => CaseTransition::NewPeriod,
                Some(prev) if *prev == case => {
                    return CaseTransition::Unchanged;
                }
                Some(_) => CaseTransition::Unchanged,
            };
            *current = Some(case);
            transition
        };

        if transition.resets_session() {
            self.reset_session();
        }
        self.increment_version();
        transition
    }

    fn reset_session(&self) {
        info!("case or period changed, clearing session data");
        self.history.clear_all();
        self.books.clear();
        self.tapes.write().clear();
        self.ledger.write().clear();
        self.drift.write().clear();
        self.indicators.write().clear();
    }

    pub fn current_tick(&self) -> u32 {
        self.case.read().as_ref().map_or(0, |c| c.tick)
    }

    // ── Market data ─────────────────────────────────────────────────────

    /// Store securities and mark positions at their last (or mid) price.
    pub fn set_securities(&self, securities: Vec<Security>) {
        {
            let mut ledger = self.ledger.write();
            for sec in &securities {
                if let Some(price) = sec.last.or_else(|| sec.mid()) {
                    ledger.book.mark(&sec.ticker, price);
                }
            }
        }
        *self.securities.write() = securities;
        self.increment_version();
    }

    /// Configured tickers, or every listed security when none are.
    pub fn tracked_tickers(&self) -> Vec<String> {
        let configured = self.config.read().tickers.clone();
        if !configured.is_empty() {
            return configured;
        }
        self.securities.read().iter().map(|s| s.ticker.clone()).collect()
    }

    pub fn ticker_known(&self, ticker: &str) -> bool {
        self.securities.read().iter().any(|s| s.ticker == ticker)
            || self.books.book(ticker).is_some()
            || self.config.read().tickers.iter().any(|t| t == ticker)
    }

    pub fn update_book(&self, ticker: &str, book: crate::types::OrderBook) -> BookSummary {
        let summary = self.books.update(ticker, book);
        self.increment_version();
        summary
    }

    /// Append unseen prints (by id) to the ticker's tape. Returns the
    /// highest id now stored.
    pub fn append_tape(&self, ticker: &str, prints: Vec<TimeAndSale>) -> Option<u64> {
        let mut tapes = self.tapes.write();
        let tape = tapes.entry(ticker.to_string()).or_default();
        let last_id = tape.back().map(|t| t.id);
        let mut fresh: Vec<TimeAndSale> = prints
            .into_iter()
            .filter(|p| last_id.map_or(true, |id| p.id > id))
            .collect();
        fresh.sort_by_key(|p| p.id);
        let added = !fresh.is_empty();
        tape.extend(fresh);
        while tape.len() > MAX_TAPE {
            tape.pop_front();
        }
        let cursor = tape.back().map(|t| t.id);
        drop(tapes);
        if added {
            self.increment_version();
        }
        cursor
    }

    pub fn tape_cursor(&self, ticker: &str) -> Option<u64> {
        self.tapes.read().get(ticker)?.back().map(|t| t.id)
    }

    /// Recompute the indicator snapshot of `ticker` from its history and tape.
    pub fn recompute_indicators(&self, ticker: &str) {
        let bars = self.history.bars(ticker);
        let tape: Vec<TimeAndSale> = self
            .tapes
            .read()
            .get(ticker)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default();
        let params = self.config.read().indicators.clone();
        let snapshot = IndicatorSnapshot::compute(&bars, &tape, &params);
        self.indicators.write().insert(ticker.to_string(), snapshot);
        self.increment_version();
    }

    pub fn indicator_snapshot(&self, ticker: &str) -> Option<IndicatorSnapshot> {
        self.indicators.read().get(ticker).cloned()
    }

    pub fn ladder(&self, ticker: &str) -> Option<Vec<LadderRow>> {
        let book = self.books.book(ticker)?;
        let own: Vec<Order> = self
            .orders
            .read()
            .iter()
            .filter(|o| o.ticker == ticker)
            .cloned()
            .collect();
        let last = self
            .securities
            .read()
            .iter()
            .find(|s| s.ticker == ticker)
            .and_then(|s| s.last)
            .or_else(|| self.history.last_close(ticker));
        let (tick_size, levels) = {
            let cfg = self.config.read();
            (cfg.tick_size, cfg.ladder_levels)
        };
        Some(build_ladder(&book, &own, tick_size, levels, last))
    }

    // ── Orders & positions ──────────────────────────────────────────────

    /// Derive fills from every known order view and keep the open ones for
    /// the API and the ladder. Orders that finished between two polls only
    /// show up in `closed`. Returns the new fills.
    pub fn set_orders(&self, open: Vec<Order>, closed: Vec<Order>) -> Vec<Fill> {
        let merged = merge_order_views(&open, &closed);
        let fills = self.ledger.write().ingest_orders(&merged);
        *self.orders.write() = open;
        if !fills.is_empty() {
            info!(count = fills.len(), "new fills");
        }
        self.increment_version();
        fills
    }

    /// True when an order stored as open appears in neither list.
    pub fn open_orders_vanished(&self, open: &[Order], closed: &[Order]) -> bool {
        let listed: HashSet<u64> = open.iter().chain(closed).map(|o| o.order_id).collect();
        self.orders.read().iter().any(|o| !listed.contains(&o.order_id))
    }

    /// Compare derived positions with the server's and store the drift.
    /// Drift is logged only when it differs from the previous reading.
    pub fn reconcile_positions(&self) -> Vec<PositionDrift> {
        let drift = {
            let ledger = self.ledger.read();
            let securities = self.securities.read();
            reconcile(&ledger.book, &securities)
        };

        let mut stored = self.drift.write();
        if *stored == drift {
            return drift;
        }
        for d in &drift {
            warn!(
                ticker = %d.ticker,
                derived = d.derived,
                reported = d.reported,
                "derived position drifts from server, not acting on it"
            );
        }
        if drift.is_empty() {
            info!("derived positions agree with the server again");
        }
        *stored = drift.clone();
        drop(stored);
        self.increment_version();
        drift
    }

    // ── Slow data ───────────────────────────────────────────────────────

    /// Merge news by id (newest last), capped at `max_news`.
    pub fn push_news(&self, items: Vec<NewsItem>) -> usize {
        let max = self.config.read().max_news.max(1);
        let mut news = self.news.write();
        let mut added = 0;
        for item in items {
            if news.iter().any(|n| n.news_id == item.news_id) {
                continue;
            }
            let pos = news.partition_point(|n| n.news_id < item.news_id);
            news.insert(pos, item);
            added += 1;
        }
        while news.len() > max {
            news.pop_front();
        }
        drop(news);
        if added > 0 {
            self.increment_version();
        }
        added
    }

    pub fn news_cursor(&self) -> Option<u64> {
        self.news.read().back().map(|n| n.news_id)
    }

    pub fn set_tenders(&self, tenders: Vec<serde_json::Value>) {
        *self.tenders.write() = tenders;
        self.increment_version();
    }

    pub fn set_leases(&self, leases: Vec<serde_json::Value>) {
        *self.leases.write() = leases;
        self.increment_version();
    }

    pub fn set_trader(&self, trader: Trader) {
        *self.trader.write() = Some(trader);
        self.increment_version();
    }

    pub fn set_limits(&self, limits: Vec<TradingLimit>) {
        *self.limits.write() = limits;
        self.increment_version();
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Payload of `GET /api/v1/state` and of every WebSocket push.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let (positions, pnl, recent_fills) = {
            let ledger = self.ledger.read();
            let fills = ledger.tape.fills();
            let start = fills.len().saturating_sub(SNAPSHOT_FILLS);
            (ledger.book.positions(), ledger.book.totals(), fills[start..].to_vec())
        };
        let tracked = self.tracked_tickers();

        StateSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_s: self.start_time.elapsed().as_secs(),
            base_url: self.client.base_url().to_string(),
            mode: self.client.mode(),
            connection: self.connection.read().clone(),
            request_stats: self.client.stats().snapshot(),
            ticks_remaining: self.case.read().as_ref().and_then(CaseInfo::ticks_remaining),
            case: self.case.read().clone(),
            tracked_tickers: tracked,
            securities: self.securities.read().clone(),
            books: self.books.summaries().into_iter().collect(),
            orders: self.orders.read().clone(),
            positions,
            pnl,
            recent_fills,
            drift: self.drift.read().clone(),
            news: self.news.read().iter().cloned().collect(),
            tenders: self.tenders.read().clone(),
            leases: self.leases.read().clone(),
            trader: self.trader.read().clone(),
            limits: self.limits.read().clone(),
            indicators: self
                .indicators
                .read()
                .iter()
                .map(|(t, s)| (t.clone(), s.clone()))
                .collect(),
            recent_errors: self.recent_errors.read().clone(),
            disabled_endpoints: self.disabled_endpoints.read().iter().cloned().collect(),
        }
    }
}

/// One entry per order id, keeping the view with the most quantity filled.
fn merge_order_views(open: &[Order], closed: &[Order]) -> Vec<Order> {
    let mut by_id: BTreeMap<u64, Order> = BTreeMap::new();
    for order in open.iter().chain(closed) {
        match by_id.get(&order.order_id) {
            Some(seen) if seen.quantity_filled >= order.quantity_filled => {}
            _ => {
                by_id.insert(order.order_id, order.clone());
            }
        }
    }
    by_id.into_values().collect()
}

// =============================================================================
// Serialisable snapshot
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_s: u64,
    pub base_url: String,
    pub mode: ConnectionMode,
    pub connection: ConnectionStatus,
    pub request_stats: RequestStatsSnapshot,
    pub case: Option<CaseInfo>,
    /// Ticks left in the period, when the server reports a period length.
    pub ticks_remaining: Option<u32>,
    pub tracked_tickers: Vec<String>,
    pub securities: Vec<Security>,
    pub books: BTreeMap<String, BookSummary>,
    pub orders: Vec<Order>,
    pub positions: Vec<Position>,
    pub pnl: PnlTotals,
    pub recent_fills: Vec<Fill>,
    pub drift: Vec<PositionDrift>,
    pub news: Vec<NewsItem>,
    pub tenders: Vec<serde_json::Value>,
    pub leases: Vec<serde_json::Value>,
    pub trader: Option<Trader>,
    pub limits: Vec<TradingLimit>,
    pub indicators: BTreeMap<String, IndicatorSnapshot>,
    pub recent_errors: Vec<ErrorRecord>,
    pub disabled_endpoints: Vec<String>,
}
