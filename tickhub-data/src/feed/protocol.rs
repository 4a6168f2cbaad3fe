/// Upstream wire dialect
///
/// Classification of inbound provider frames and the command frames we
/// send back. The provider mixes control chatter with tick payloads on
/// one stream; everything unrecognizable is reported as such so the
/// caller can log and drop it.
use crate::event::Tick;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

/// Commands sent to the provider.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UpstreamCommand {
    Subscribe { symbols: Vec<String> },
    Unsubscribe { symbols: Vec<String> },
}

impl UpstreamCommand {
    pub fn to_message(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(json) => Some(Message::text(json)),
            Err(error) => {
                warn!("failed to serialize upstream command: {}", error);
                None
            }
        }
    }
}

/// One inbound frame after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamFrame {
    /// Handshake or confirmation chatter, safe to drop.
    Control(String),
    /// A quote update for `symbol`, already normalized.
    Tick { symbol: String, tick: Tick },
    /// Anything the dialect does not cover.
    Unrecognized,
}

/// Provider tick fields. Everything is optional on the wire; missing
/// numerics normalize to zero so downstream arithmetic stays total.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    r#type: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    ltp: Option<f64>,
    #[serde(default)]
    ch: Option<f64>,
    #[serde(default)]
    chp: Option<f64>,
    #[serde(default)]
    vol_traded_today: Option<u64>,
    #[serde(default)]
    bid_price: Option<f64>,
    #[serde(default)]
    ask_price: Option<f64>,
    #[serde(default)]
    last_traded_time: Option<i64>,
}

/// Classify one text frame. `received_at` doubles as the tick timestamp
/// when the provider sends none (or a zero placeholder).
pub fn classify(text: &str, received_at: DateTime<Utc>) -> UpstreamFrame {
    let Ok(raw) = serde_json::from_str::<RawFrame>(text) else {
        return UpstreamFrame::Unrecognized;
    };

    if let Some(kind) = &raw.r#type {
        if matches!(kind.as_str(), "cn" | "sub" | "ful") {
            return UpstreamFrame::Control(kind.clone());
        }
    }

    let Some(symbol) = raw.symbol else {
        return UpstreamFrame::Unrecognized;
    };
    let timestamp = raw
        .last_traded_time
        .filter(|&at| at != 0)
        .unwrap_or_else(|| received_at.timestamp());

    UpstreamFrame::Tick {
        symbol,
        tick: Tick {
            ltp: raw.ltp.unwrap_or(0.0),
            change: raw.ch.unwrap_or(0.0),
            change_percent: raw.chp.unwrap_or(0.0),
            volume: raw.vol_traded_today.unwrap_or(0),
            bid: raw.bid_price.unwrap_or(0.0),
            ask: raw.ask_price.unwrap_or(0.0),
            timestamp,
            received_at,
        },
    }
}
