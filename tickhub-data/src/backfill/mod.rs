/// Historical backfill
///
/// Fetches the elapsed session's minute bars over REST, reconstructs a
/// tick series from them and primes the rolling store. Calls are gated
/// by the failure cooldown and the rate budget, and concurrent requests
/// for one symbol collapse into a single upstream call.
mod cooldown;
mod rate;

pub use cooldown::FailureCooldown;
pub use rate::RateBudget;

use crate::config::HubConfig;
use crate::credentials;
use crate::error::DataError;
use crate::event::{Bar, RateDiagnostics, Tick};
use crate::session::SessionClock;
use crate::store::RollingStore;
use crate::symbol::Symbol;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use url::Url;

/// One minute bar as the history endpoint returns it:
/// `[timestamp, open, high, low, close, volume]`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CandleRow(pub i64, pub f64, pub f64, pub f64, pub f64, pub f64);

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    s: String,
    #[serde(default)]
    candles: Vec<CandleRow>,
    #[serde(default)]
    message: Option<String>,
}

/// Where minute-bar history comes from. Abstracted so the fetcher's
/// gating logic is testable without a live endpoint.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch(
        &self,
        symbol: &Symbol,
        from: i64,
        to: i64,
    ) -> Result<Vec<CandleRow>, DataError>;
}

/// Production source talking to the upstream history REST endpoint.
pub struct RestHistorySource {
    client: reqwest::Client,
    endpoint: String,
    credentials_path: PathBuf,
}

impl RestHistorySource {
    pub fn new(config: &HubConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.history_url.clone(),
            credentials_path: config.credentials_path.clone(),
        }
    }
}

#[async_trait]
impl HistorySource for RestHistorySource {
    async fn fetch(
        &self,
        symbol: &Symbol,
        from: i64,
        to: i64,
    ) -> Result<Vec<CandleRow>, DataError> {
        let token = credentials::read_token(&self.credentials_path).await?;
        let from_s = from.to_string();
        let to_s = to.to_string();
        let url = Url::parse_with_params(
            &self.endpoint,
            [
                ("symbol", symbol.as_str()),
                ("resolution", "1"),
                ("range_from", from_s.as_str()),
                ("range_to", to_s.as_str()),
                ("access_token", token.as_str()),
            ],
        )?;

        let body = self
            .client
            .get(url)
            .timeout(Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let response: HistoryResponse =
            serde_json::from_str(&body).map_err(|error| DataError::MalformedResponse {
                symbol: symbol.to_string(),
                detail: error.to_string(),
            })?;

        if response.s == "ok" {
            Ok(response.candles)
        } else {
            Err(DataError::BackfillRejected {
                symbol: symbol.to_string(),
                detail: response
                    .message
                    .unwrap_or_else(|| "unknown upstream error".to_string()),
            })
        }
    }
}

enum Flight {
    Lead(watch::Sender<()>),
    Join(watch::Receiver<()>),
}

/// Gap-fill fetcher shared by all subscribe handlers.
pub struct BackfillFetcher {
    source: Box<dyn HistorySource>,
    store: Arc<RollingStore>,
    clock: SessionClock,
    rate: RateBudget,
    cooldown: FailureCooldown,
    flights: Mutex<FnvHashMap<Symbol, watch::Receiver<()>>>,
    rate_wait: Duration,
}

impl BackfillFetcher {
    pub fn new(
        source: Box<dyn HistorySource>,
        store: Arc<RollingStore>,
        clock: SessionClock,
        config: &HubConfig,
    ) -> Self {
        Self {
            source,
            store,
            clock,
            rate: RateBudget::new(config.max_calls_per_second),
            cooldown: FailureCooldown::new(config.failure_cooldown),
            flights: Mutex::new(FnvHashMap::default()),
            rate_wait: config.rate_wait,
        }
    }

    /// Fetch and cache session history for `symbol`, returning the
    /// reconstructed ticks. Empty means "no data available now": symbol
    /// cooling down, session not open, rate budget spent, or the fetch
    /// failed. Concurrent calls for one symbol share a single fetch.
    pub async fn ensure_history(
        &self,
        symbol: &Symbol,
        date: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> Vec<Tick> {
        if self.cooldown.is_cooling(symbol) {
            debug!("{} in failure cooldown, serving empty history", symbol);
            return Vec::new();
        }

        let flight = {
            let mut flights = self.flights.lock();
            match flights.get(symbol) {
                Some(receiver) => Flight::Join(receiver.clone()),
                None => {
                    let (sender, receiver) = watch::channel(());
                    flights.insert(symbol.clone(), receiver);
                    Flight::Lead(sender)
                }
            }
        };

        let done = match flight {
            Flight::Join(mut receiver) => {
                // Wait for the leader, then read whatever it cached
                let _ = receiver.changed().await;
                return self.store.ticks(symbol);
            }
            Flight::Lead(sender) => sender,
        };

        let ticks = self.fetch_and_prime(symbol, date, now).await;
        self.flights.lock().remove(symbol);
        let _ = done.send(());
        ticks
    }

    /// Rate-limit window occupancy and cooldown census for heartbeats.
    pub fn diagnostics(&self) -> RateDiagnostics {
        RateDiagnostics {
            current_calls: self.rate.current_calls(),
            max_calls_per_second: self.rate.max_per_second(),
            symbols_in_cooldown: self.cooldown.count(),
        }
    }

    async fn fetch_and_prime(
        &self,
        symbol: &Symbol,
        date: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> Vec<Tick> {
        let date = date.unwrap_or_else(|| self.clock.market_date(now));
        let Some((from, to)) = self.clock.fetch_window(date, now) else {
            debug!("{} session on {} not open yet, serving empty history", symbol, date);
            return Vec::new();
        };

        if !self.rate.try_acquire() {
            debug!("rate budget exhausted, waiting before fetching {}", symbol);
            tokio::time::sleep(self.rate_wait).await;
            if !self.rate.try_acquire() {
                warn!("still rate limited, skipping backfill for {}", symbol);
                return Vec::new();
            }
        }

        info!("fetching history for {} [{} .. {}]", symbol, from, to);
        match self.source.fetch(symbol, from, to).await {
            Ok(rows) if rows.is_empty() => {
                debug!("history for {} came back empty", symbol);
                Vec::new()
            }
            Ok(rows) => {
                let count = rows.len();
                let (ticks, bars) = reconstruct(rows, now);
                self.store.prime(symbol, ticks.clone(), bars);
                info!("primed {} with {} bars", symbol, count);
                ticks
            }
            Err(error) => {
                if error.should_cooldown() {
                    self.cooldown.record(symbol);
                    warn!("{} entering failure cooldown: {}", symbol, error);
                } else {
                    error!("backfill for {} failed: {}", symbol, error);
                }
                Vec::new()
            }
        }
    }
}

/// Turn minute bars into a synthetic tick series: one tick per bar at
/// its close, change measured against the first bar's open. Quote depth
/// is unknown for reconstructed points, so bid/ask stay zero.
fn reconstruct(rows: Vec<CandleRow>, received_at: DateTime<Utc>) -> (Vec<Tick>, Vec<Bar>) {
    let first_open = rows.first().map(|row| row.1).unwrap_or(0.0);
    let mut ticks = Vec::with_capacity(rows.len());
    let mut bars = Vec::with_capacity(rows.len());

    for CandleRow(mut timestamp, open, high, low, close, volume) in rows {
        // Some feeds report milliseconds; normalize to seconds
        if timestamp > 10_000_000_000 {
            timestamp /= 1000;
        }
        let volume = volume as u64;
        let change = close - first_open;
        let change_percent = if first_open != 0.0 {
            change / first_open * 100.0
        } else {
            0.0
        };
        ticks.push(Tick {
            ltp: close,
            change,
            change_percent,
            volume,
            bid: 0.0,
            ask: 0.0,
            timestamp,
            received_at,
        });
        bars.push(Bar::new(timestamp, open, high, low, close, volume));
    }
    (ticks, bars)
}
