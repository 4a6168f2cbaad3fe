/// Wire messages exchanged with viewer connections
///
/// These types define the JSON protocol spoken over the fan-out WebSocket:
/// tagged requests from viewers and tagged push events back to them.
use crate::session::SessionStatus;
use crate::symbol::Symbol;
use chrono::{DateTime, Utc};
use derive_more::Constructor;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

/// A normalized point-in-time quote update.
///
/// `timestamp` is the upstream trade time in epoch seconds; `received_at`
/// is assigned locally on arrival. Missing upstream numerics are zero,
/// never null, so downstream arithmetic stays total.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tick {
    pub ltp: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: u64,
    pub bid: f64,
    pub ask: f64,
    pub timestamp: i64,
    pub received_at: DateTime<Utc>,
}

/// One-minute OHLC aggregate.
///
/// `timestamp` is the bucket start, floored to the minute. The last bar of
/// a series stays mutable until its minute closes.
#[derive(Debug, Clone, Copy, PartialEq, Constructor, Serialize)]
pub struct Bar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// A normalized tick paired with its symbol, flowing from the feed adapter
/// to the broadcast dispatcher.
#[derive(Debug, Clone)]
pub struct SymbolTick {
    pub symbol: Symbol,
    pub tick: Tick,
}

/// Upstream connection state as reported to viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamStatus {
    Connected,
    Disconnected,
    Error,
}

/// Rate limiter occupancy embedded in heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateDiagnostics {
    pub current_calls: usize,
    pub max_calls_per_second: usize,
    pub symbols_in_cooldown: usize,
}

/// Requests accepted from viewer connections.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    Subscribe {
        #[serde(default)]
        symbol: Option<String>,
    },
    Unsubscribe {
        #[serde(default)]
        symbol: Option<String>,
    },
    GetTradingStatus,
}

/// Events pushed to viewer connections.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Per-tick push to subscribers, carrying the current indicator snapshot.
    #[serde(rename_all = "camelCase")]
    MarketData {
        symbol: Symbol,
        #[serde(flatten)]
        tick: Tick,
        sma20: f64,
        ema9: f64,
        rsi14: f64,
    },

    /// Throttled chart stream, bounded independently of upstream tick rate.
    #[serde(rename_all = "camelCase")]
    ChartUpdate {
        symbol: Symbol,
        price: f64,
        timestamp: i64,
        volume: u64,
        change: f64,
        change_percent: f64,
    },

    /// Tick history snapshot, sent once per successful subscribe.
    #[serde(rename_all = "camelCase")]
    HistoricalData { symbol: Symbol, data: Vec<Tick> },

    /// Bar history snapshot, sent once per successful subscribe.
    #[serde(rename_all = "camelCase")]
    OhlcData { symbol: Symbol, data: Vec<Bar> },

    #[serde(rename_all = "camelCase")]
    SubscribeAck {
        success: bool,
        symbol: String,
        cached_point_count: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    UnsubscribeAck {
        success: bool,
        symbol: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    TradingStatus {
        trading_active: bool,
        trading_start: String,
        trading_end: String,
        current_time: String,
        is_market_day: bool,
    },

    /// Periodic liveness push to every connection, subscribed or not.
    #[serde(rename_all = "camelCase")]
    Heartbeat {
        timestamp: DateTime<Utc>,
        trading_active: bool,
        active_symbols: usize,
        connected_clients: usize,
        rate_limit: RateDiagnostics,
    },

    #[serde(rename_all = "camelCase")]
    ConnectionStatus {
        status: UpstreamStatus,
        timestamp: DateTime<Utc>,
    },
}

impl ServerEvent {
    /// Serialize into a WebSocket text frame, logging instead of failing.
    pub fn to_message(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(json) => Some(Message::text(json)),
            Err(error) => {
                warn!("failed to serialize outbound event: {}", error);
                None
            }
        }
    }
}

impl From<SessionStatus> for ServerEvent {
    fn from(status: SessionStatus) -> Self {
        Self::TradingStatus {
            trading_active: status.trading_active,
            trading_start: status.trading_start,
            trading_end: status.trading_end,
            current_time: status.current_time,
            is_market_day: status.is_market_day,
        }
    }
}

/// Bounded prefix of raw wire text for log lines, cut on a char boundary
/// so multi-byte payloads cannot split a character.
pub fn frame_preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}
