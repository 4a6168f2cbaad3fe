//! Viewer connection handling
//!
//! Per-connection protocol driver: accept the WebSocket, register an
//! outbound queue with the registry so broadcasts reach this socket, and
//! answer tagged JSON requests: subscribe acks with cached snapshots and
//! a backfill when the cache is cold, unsubscribe acks and trading-status
//! queries.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info};

use tickhub_data::backfill::BackfillFetcher;
use tickhub_data::event::frame_preview;
use tickhub_data::feed::FeedHandle;
use tickhub_data::registry::{ConnectionId, Registry};
use tickhub_data::{ClientRequest, RollingStore, ServerEvent, SessionClock, Symbol};

/// Outbound frames buffered per connection before the consumer counts
/// as lagging and fan-out starts dropping for it.
const OUTBOUND_QUEUE: usize = 256;

/// Everything a connection needs to answer requests.
pub struct ClientContext {
    pub store: Arc<RollingStore>,
    pub registry: Arc<Registry>,
    pub fetcher: Arc<BackfillFetcher>,
    pub clock: SessionClock,
    pub feed: FeedHandle,
}

/// Drive one viewer connection until either side drops it.
pub async fn handle_client<S>(stream: S, peer_addr: SocketAddr, ctx: Arc<ClientContext>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(error) => {
            error!("WebSocket handshake failed for {}: {}", peer_addr, error);
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
    let id = ctx.registry.register(out_tx.clone());
    info!("viewer {} connected as {}", peer_addr, id);

    // Current upstream status straight away so the viewer starts consistent
    let status = ServerEvent::ConnectionStatus {
        status: ctx.feed.state().into(),
        timestamp: Utc::now(),
    };
    if let Some(message) = status.to_message() {
        let _ = out_tx.send(message).await;
    }

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if ws_sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let recv_ctx = ctx.clone();
    let recv_out = out_tx.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(message) = ws_receiver.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    handle_request(&recv_ctx, id, &recv_out, text.as_str()).await;
                }
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) => debug!("ping from {}", id),
                Ok(_) => {}
                Err(error) => {
                    error!("viewer socket error for {}: {}", id, error);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {}
        _ = &mut recv_task => {}
    }
    send_task.abort();
    recv_task.abort();

    ctx.registry.remove_connection(id);
    info!("viewer {} ({}) disconnected", peer_addr, id);
}

async fn handle_request(
    ctx: &Arc<ClientContext>,
    id: ConnectionId,
    out: &mpsc::Sender<Message>,
    text: &str,
) {
    let request: ClientRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(error) => {
            let preview = frame_preview(text, 100);
            debug!("{} sent an unrecognized request: {} - {}", id, error, preview);
            return;
        }
    };

    match request {
        ClientRequest::Subscribe { symbol } => subscribe(ctx, id, out, symbol).await,
        ClientRequest::Unsubscribe { symbol } => unsubscribe(ctx, id, out, symbol).await,
        ClientRequest::GetTradingStatus => {
            send(out, &ServerEvent::from(ctx.clock.status(Utc::now()))).await;
        }
    }
}

/// Subscribe flow: validate, register, ack with the cached point count,
/// then serve snapshots, backfilling first when the cache is cold.
async fn subscribe(
    ctx: &Arc<ClientContext>,
    id: ConnectionId,
    out: &mpsc::Sender<Message>,
    symbol: Option<String>,
) {
    let input = symbol.unwrap_or_default();
    let symbol = match Symbol::parse(&input) {
        Ok(symbol) => symbol,
        Err(error) => {
            send(
                out,
                &ServerEvent::SubscribeAck {
                    success: false,
                    symbol: input,
                    cached_point_count: 0,
                    message: Some(error.to_string()),
                },
            )
            .await;
            return;
        }
    };

    let outcome = match ctx.registry.subscribe(id, &symbol) {
        Ok(outcome) => outcome,
        Err(error) => {
            send(
                out,
                &ServerEvent::SubscribeAck {
                    success: false,
                    symbol: symbol.to_string(),
                    cached_point_count: 0,
                    message: Some(error.to_string()),
                },
            )
            .await;
            return;
        }
    };

    let cached = ctx.store.tick_count(&symbol);
    info!("{} subscribed to {} ({} cached points)", id, symbol, cached);
    send(
        out,
        &ServerEvent::SubscribeAck {
            success: true,
            symbol: symbol.to_string(),
            cached_point_count: cached,
            message: None,
        },
    )
    .await;

    if outcome.newly_active {
        ctx.feed.subscribe(vec![symbol.clone()]).await;
    }

    if cached > 0 {
        send_snapshots(ctx, out, &symbol).await;
    } else {
        // Backfill off the request path; snapshots follow when it lands
        let ctx = ctx.clone();
        let out = out.clone();
        tokio::spawn(async move {
            ctx.fetcher.ensure_history(&symbol, None, Utc::now()).await;
            send_snapshots(&ctx, &out, &symbol).await;
        });
    }
}

async fn unsubscribe(
    ctx: &Arc<ClientContext>,
    id: ConnectionId,
    out: &mpsc::Sender<Message>,
    symbol: Option<String>,
) {
    let input = symbol.unwrap_or_default();
    match Symbol::parse(&input) {
        Ok(symbol) => {
            let removed = ctx.registry.unsubscribe(id, &symbol);
            if removed {
                info!("{} unsubscribed from {}", id, symbol);
            }
            send(
                out,
                &ServerEvent::UnsubscribeAck {
                    success: removed,
                    symbol: symbol.to_string(),
                    message: (!removed).then(|| "not subscribed".to_string()),
                },
            )
            .await;
        }
        Err(error) => {
            send(
                out,
                &ServerEvent::UnsubscribeAck {
                    success: false,
                    symbol: input,
                    message: Some(error.to_string()),
                },
            )
            .await;
        }
    }
}

/// Push the symbol's cached history to one connection: the tick series
/// first, then the minute bars. Both go out even when empty so the
/// viewer can stop waiting.
async fn send_snapshots(ctx: &Arc<ClientContext>, out: &mpsc::Sender<Message>, symbol: &Symbol) {
    let ticks = ctx.store.ticks(symbol);
    let bars = ctx.store.bars(symbol);
    debug!(
        "sending {} ticks / {} bars snapshot for {}",
        ticks.len(),
        bars.len(),
        symbol
    );
    send(
        out,
        &ServerEvent::HistoricalData {
            symbol: symbol.clone(),
            data: ticks,
        },
    )
    .await;
    send(
        out,
        &ServerEvent::OhlcData {
            symbol: symbol.clone(),
            data: bars,
        },
    )
    .await;
}

async fn send(out: &mpsc::Sender<Message>, event: &ServerEvent) {
    if let Some(message) = event.to_message() {
        let _ = out.send(message).await;
    }
}
