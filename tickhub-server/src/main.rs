use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};

use tickhub_data::backfill::{BackfillFetcher, RestHistorySource};
use tickhub_data::{credentials, dispatch, feed};
use tickhub_data::{HubConfig, Registry, RollingStore, SessionClock};

mod client;

use client::ClientContext;

#[tokio::main]
async fn main() {
    init_logging();

    info!("Starting tickhub market data server");

    let config = HubConfig::from_env();
    info!(
        "viewers on ws://{}, upstream {}, history {}",
        config.bind_addr, config.upstream_url, config.history_url
    );
    info!(
        "caps: {} symbols, {} ticks / {} bars each, backfill {}/s, retention {:?}",
        config.max_symbols,
        config.tick_capacity,
        config.bar_capacity,
        config.max_calls_per_second,
        config.retention
    );
    info!(
        "session {}-{} at UTC{:+} minutes, credential file {}",
        config.session_open,
        config.session_close,
        config.utc_offset_minutes,
        config.credentials_path.display()
    );

    let store = Arc::new(RollingStore::new(&config));
    let registry = Arc::new(Registry::new(config.max_symbols));
    let clock = SessionClock::from_config(&config);
    let fetcher = Arc::new(BackfillFetcher::new(
        Box::new(RestHistorySource::new(&config)),
        store.clone(),
        clock.clone(),
        &config,
    ));

    let (tick_tx, tick_rx) = mpsc::channel(1024);
    let feed = feed::spawn_feed(&config, tick_tx);

    tokio::spawn(dispatch::run_dispatcher(
        store.clone(),
        registry.clone(),
        tick_rx,
        config.chart_throttle,
    ));
    tokio::spawn(dispatch::run_heartbeat(
        registry.clone(),
        fetcher.clone(),
        clock.clone(),
        config.heartbeat_interval,
    ));
    tokio::spawn(dispatch::run_status_broadcast(
        registry.clone(),
        feed.watch_state(),
    ));
    tokio::spawn(dispatch::run_retention_sweep(
        store.clone(),
        registry.clone(),
        feed.command_sender(),
        config.retention,
        config.sweep_interval,
    ));
    tokio::spawn(credentials::watch_credentials(
        config.credentials_path.clone(),
        config.credential_poll,
        feed.command_sender(),
    ));

    let context = Arc::new(ClientContext {
        store,
        registry,
        fetcher,
        clock,
        feed,
    });

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind viewer WebSocket listener");
    info!("viewer WebSocket server bound to {}", config.bind_addr);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    tokio::spawn(client::handle_client(stream, peer_addr, context.clone()));
                }
                Err(error) => error!("accept failed: {}", error),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }
}

/// Initialize logging
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
