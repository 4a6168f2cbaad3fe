//! Upstream feed adapter
//!
//! Owns the streaming connection to the market-data provider: dial with a
//! freshly read credential, replay the active subscription set, then pump
//! frames until the stream drops and redial after a fixed delay. Runtime
//! commands (subscribe deltas, credential renewals) arrive over a channel
//! and are absorbed even while disconnected so no subscription is lost
//! across reconnects.

mod protocol;

use std::time::Duration;

use chrono::Utc;
use fnv::FnvHashSet;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::HubConfig;
use crate::credentials;
use crate::error::DataError;
use crate::event::{frame_preview, SymbolTick, UpstreamStatus};
use crate::symbol::Symbol;

use self::protocol::{classify, UpstreamCommand, UpstreamFrame};

/// Lifecycle of the upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Disconnected,
    Connecting,
    Streaming,
    Error,
    Closed,
    Reconnecting,
}

impl From<FeedState> for UpstreamStatus {
    fn from(state: FeedState) -> Self {
        match state {
            FeedState::Streaming => UpstreamStatus::Connected,
            FeedState::Error => UpstreamStatus::Error,
            FeedState::Disconnected
            | FeedState::Connecting
            | FeedState::Closed
            | FeedState::Reconnecting => UpstreamStatus::Disconnected,
        }
    }
}

/// Runtime commands accepted by the adapter.
#[derive(Debug, Clone)]
pub enum FeedCommand {
    Subscribe(Vec<Symbol>),
    Unsubscribe(Vec<Symbol>),
    /// Drop the current session and redial with a re-read credential.
    Reconnect,
}

/// Handle to a spawned feed task.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    commands: mpsc::Sender<FeedCommand>,
    state: watch::Receiver<FeedState>,
}

impl FeedHandle {
    pub async fn subscribe(&self, symbols: Vec<Symbol>) {
        let _ = self.commands.send(FeedCommand::Subscribe(symbols)).await;
    }

    pub async fn unsubscribe(&self, symbols: Vec<Symbol>) {
        let _ = self.commands.send(FeedCommand::Unsubscribe(symbols)).await;
    }

    pub fn command_sender(&self) -> mpsc::Sender<FeedCommand> {
        self.commands.clone()
    }

    pub fn state(&self) -> FeedState {
        *self.state.borrow()
    }

    /// Receiver for state transitions, for connection-status broadcasts.
    pub fn watch_state(&self) -> watch::Receiver<FeedState> {
        self.state.clone()
    }
}

/// Spawn the feed task. Normalized ticks flow out through `ticks`.
pub fn spawn_feed(config: &HubConfig, ticks: mpsc::Sender<SymbolTick>) -> FeedHandle {
    let (command_tx, command_rx) = mpsc::channel(64);
    let (state_tx, state_rx) = watch::channel(FeedState::Disconnected);
    tokio::spawn(run_feed(config.clone(), command_rx, state_tx, ticks));
    FeedHandle {
        commands: command_tx,
        state: state_rx,
    }
}

/// How a streaming session ended, deciding the next lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Upstream closed the stream or a renewal was requested.
    Closed,
    /// Transport or protocol failure.
    Error,
    /// Explicit reconnect command, redial immediately after the delay.
    Refresh,
    /// All command senders dropped, the service is shutting down.
    Shutdown,
}

async fn run_feed(
    config: HubConfig,
    mut commands: mpsc::Receiver<FeedCommand>,
    state: watch::Sender<FeedState>,
    ticks: mpsc::Sender<SymbolTick>,
) {
    info!("starting upstream feed for {}", config.upstream_url);
    let mut subscribed: FnvHashSet<Symbol> = FnvHashSet::default();

    loop {
        let _ = state.send(FeedState::Connecting);

        match dial(&config).await {
            Ok(mut socket) => {
                info!("connected to upstream at {}", config.upstream_url);
                let _ = state.send(FeedState::Streaming);

                let end =
                    stream_session(&mut socket, &mut commands, &mut subscribed, &ticks).await;
                match end {
                    SessionEnd::Shutdown => return,
                    SessionEnd::Closed | SessionEnd::Refresh => {
                        let _ = state.send(FeedState::Closed);
                    }
                    SessionEnd::Error => {
                        let _ = state.send(FeedState::Error);
                    }
                }
            }
            Err(error) => {
                error!(
                    "failed to connect to upstream at {}: {}",
                    config.upstream_url, error
                );
                let _ = state.send(FeedState::Error);
            }
        }

        let _ = state.send(FeedState::Reconnecting);
        debug!("redialing upstream in {:?}", config.reconnect_delay);
        if !absorb_commands_during(config.reconnect_delay, &mut commands, &mut subscribed).await {
            return;
        }
    }
}

/// Read the credential and open the stream. The token is re-read on every
/// attempt so a rotated file takes effect at the next dial.
async fn dial(
    config: &HubConfig,
) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, DataError> {
    let token = credentials::read_token(&config.credentials_path).await?;
    let mut url = Url::parse(&config.upstream_url)?;
    url.query_pairs_mut().append_pair("access_token", &token);
    let (socket, _response) = connect_async(url).await?;
    Ok(socket)
}

/// Pump one connected session: replay the active set, then multiplex
/// inbound frames with runtime commands until something ends the stream.
async fn stream_session<S>(
    socket: &mut WebSocketStream<S>,
    commands: &mut mpsc::Receiver<FeedCommand>,
    subscribed: &mut FnvHashSet<Symbol>,
    ticks: &mpsc::Sender<SymbolTick>,
) -> SessionEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if !subscribed.is_empty() {
        let symbols: Vec<String> = subscribed.iter().map(Symbol::to_string).collect();
        info!("resubscribing {} symbols after connect", symbols.len());
        if let Err(error) = send_command(socket, UpstreamCommand::Subscribe { symbols }).await {
            error!("resubscribe after connect failed: {}", error);
            return SessionEnd::Error;
        }
    }

    loop {
        tokio::select! {
            frame = socket.next() => match frame {
                Some(Ok(Message::Text(text))) => match classify(text.as_str(), Utc::now()) {
                    UpstreamFrame::Control(kind) => {
                        debug!("discarding upstream control frame '{}'", kind)
                    }
                    UpstreamFrame::Tick { symbol, tick } => match Symbol::parse(&symbol) {
                        Ok(symbol) => {
                            if ticks.send(SymbolTick { symbol, tick }).await.is_err() {
                                return SessionEnd::Shutdown;
                            }
                        }
                        Err(_) => {
                            debug!("discarding tick for malformed upstream symbol '{}'", symbol)
                        }
                    },
                    UpstreamFrame::Unrecognized => {
                        let preview = frame_preview(text.as_str(), 100);
                        debug!("discarding unrecognized upstream frame: {}", preview);
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    warn!("upstream closed the stream: {:?}", frame);
                    return SessionEnd::Closed;
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(other)) => {
                    debug!("ignoring non-text upstream frame ({} bytes)", other.len())
                }
                Some(Err(error)) => {
                    error!("upstream stream error: {}", error);
                    return SessionEnd::Error;
                }
                None => {
                    warn!("upstream stream ended");
                    return SessionEnd::Closed;
                }
            },

            command = commands.recv() => match command {
                None => return SessionEnd::Shutdown,
                Some(FeedCommand::Subscribe(symbols)) => {
                    let added: Vec<String> = symbols
                        .into_iter()
                        .filter(|symbol| subscribed.insert(symbol.clone()))
                        .map(|symbol| symbol.to_string())
                        .collect();
                    if !added.is_empty() {
                        debug!("subscribing upstream to {:?}", added);
                        let frame = UpstreamCommand::Subscribe { symbols: added };
                        if let Err(error) = send_command(socket, frame).await {
                            error!("upstream subscribe failed: {}", error);
                            return SessionEnd::Error;
                        }
                    }
                }
                Some(FeedCommand::Unsubscribe(symbols)) => {
                    let removed: Vec<String> = symbols
                        .into_iter()
                        .filter(|symbol| subscribed.remove(symbol))
                        .map(|symbol| symbol.to_string())
                        .collect();
                    if !removed.is_empty() {
                        debug!("unsubscribing upstream from {:?}", removed);
                        let frame = UpstreamCommand::Unsubscribe { symbols: removed };
                        if let Err(error) = send_command(socket, frame).await {
                            error!("upstream unsubscribe failed: {}", error);
                            return SessionEnd::Error;
                        }
                    }
                }
                Some(FeedCommand::Reconnect) => {
                    info!("reconnect requested, dropping upstream session");
                    return SessionEnd::Refresh;
                }
            },
        }
    }
}

async fn send_command<S>(
    socket: &mut WebSocketStream<S>,
    command: UpstreamCommand,
) -> Result<(), tokio_tungstenite::tungstenite::Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match command.to_message() {
        Some(message) => socket.send(message).await,
        None => Ok(()),
    }
}

/// Sleep out the reconnect delay while still applying subscription deltas,
/// so commands sent during an outage survive to the next session. Returns
/// false once all command senders are gone.
async fn absorb_commands_during(
    delay: Duration,
    commands: &mut mpsc::Receiver<FeedCommand>,
    subscribed: &mut FnvHashSet<Symbol>,
) -> bool {
    let deadline = tokio::time::sleep(delay);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => return true,
            command = commands.recv() => match command {
                None => return false,
                Some(FeedCommand::Subscribe(symbols)) => subscribed.extend(symbols),
                Some(FeedCommand::Unsubscribe(symbols)) => {
                    for symbol in &symbols {
                        subscribed.remove(symbol);
                    }
                }
                Some(FeedCommand::Reconnect) => {}
            },
        }
    }
}
