//! Broadcast dispatcher
//!
//! Background tasks that turn internal state into viewer-facing pushes:
//! per-tick market data with indicator snapshots, a throttled chart
//! stream, periodic heartbeats, upstream status transitions and the
//! retention sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fnv::FnvHashMap;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::backfill::BackfillFetcher;
use crate::event::{ServerEvent, SymbolTick, UpstreamStatus};
use crate::feed::{FeedCommand, FeedState};
use crate::registry::Registry;
use crate::session::SessionClock;
use crate::store::RollingStore;
use crate::symbol::Symbol;

/// Consume the live tick stream: cache each tick, then fan out market
/// data to subscribers, with a per-symbol throttled chart update riding
/// along. Exits when the feed side of the channel closes.
pub async fn run_dispatcher(
    store: Arc<RollingStore>,
    registry: Arc<Registry>,
    mut ticks: mpsc::Receiver<SymbolTick>,
    chart_throttle: Duration,
) {
    let mut last_chart: FnvHashMap<Symbol, Instant> = FnvHashMap::default();

    while let Some(SymbolTick { symbol, tick }) = ticks.recv().await {
        // Nobody subscribed and nothing cached: the upstream unsubscribe
        // is still in flight, drop the tick instead of resurrecting state.
        // Chart gates left behind by evicted symbols go with it.
        if !registry.is_tracked(&symbol) && !store.contains(&symbol) {
            debug!("dropping tick for untracked symbol {}", symbol);
            last_chart.retain(|gated, _| registry.is_tracked(gated) || store.contains(gated));
            continue;
        }

        let snapshot = store.apply_tick(&symbol, tick.clone());

        let market_data = ServerEvent::MarketData {
            symbol: symbol.clone(),
            tick: tick.clone(),
            sma20: snapshot.sma20,
            ema9: snapshot.ema9,
            rsi14: snapshot.rsi14,
        };
        if let Some(message) = market_data.to_message() {
            registry.fan_out(&symbol, &message);
        }

        if chart_due(&mut last_chart, &symbol, chart_throttle) {
            let chart = ServerEvent::ChartUpdate {
                symbol: symbol.clone(),
                price: tick.ltp,
                timestamp: tick.timestamp,
                volume: tick.volume,
                change: tick.change,
                change_percent: tick.change_percent,
            };
            if let Some(message) = chart.to_message() {
                registry.fan_out(&symbol, &message);
            }
        }
    }
    debug!("tick channel closed, dispatcher exiting");
}

/// Per-symbol gate for the chart stream. The first update always passes;
/// later ones only after `throttle` has elapsed for that symbol.
fn chart_due(
    last_sent: &mut FnvHashMap<Symbol, Instant>,
    symbol: &Symbol,
    throttle: Duration,
) -> bool {
    let now = Instant::now();
    match last_sent.get(symbol) {
        Some(previous) if now.duration_since(*previous) < throttle => false,
        _ => {
            last_sent.insert(symbol.clone(), now);
            true
        }
    }
}

/// Broadcast a liveness heartbeat to every connection, subscribed or not,
/// carrying session and rate-limit diagnostics.
pub async fn run_heartbeat(
    registry: Arc<Registry>,
    fetcher: Arc<BackfillFetcher>,
    clock: SessionClock,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let now = Utc::now();
        let event = ServerEvent::Heartbeat {
            timestamp: now,
            trading_active: clock.is_open(now),
            active_symbols: registry.active_symbol_count(),
            connected_clients: registry.connection_count(),
            rate_limit: fetcher.diagnostics(),
        };
        if let Some(message) = event.to_message() {
            let delivered = registry.broadcast(&message);
            debug!("heartbeat delivered to {} connections", delivered);
        }
    }
}

/// Relay upstream lifecycle transitions to viewers as connection-status
/// events, collapsing runs of states that map to the same viewer status.
pub async fn run_status_broadcast(
    registry: Arc<Registry>,
    mut state: watch::Receiver<FeedState>,
) {
    let mut last = UpstreamStatus::from(*state.borrow());
    loop {
        if state.changed().await.is_err() {
            return;
        }
        let status = UpstreamStatus::from(*state.borrow_and_update());
        if status == last {
            continue;
        }
        last = status;

        info!("upstream feed is now {:?}", status);
        let event = ServerEvent::ConnectionStatus {
            status,
            timestamp: Utc::now(),
        };
        if let Some(message) = event.to_message() {
            registry.broadcast(&message);
        }
    }
}

/// Periodically drop cached points past the retention window and tell
/// the feed to stop streaming symbols that ended up with no data and no
/// subscribers.
pub async fn run_retention_sweep(
    store: Arc<RollingStore>,
    registry: Arc<Registry>,
    feed: mpsc::Sender<FeedCommand>,
    retention: Duration,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let cutoff = Utc::now().timestamp() - retention.as_secs() as i64;
        let evicted = store.sweep(cutoff, |symbol| registry.is_tracked(symbol));
        if !evicted.is_empty() {
            info!("retention sweep evicted {:?}", evicted);
            if feed.send(FeedCommand::Unsubscribe(evicted)).await.is_err() {
                return;
            }
        }
    }
}
