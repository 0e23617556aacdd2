//! WebSocket session: one accepted socket from upgrade through disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use conduit_core::{ConnectionId, HandshakeAttributes, Transport};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::connection::ClientConnection;
use crate::lifecycle::ConnectionState;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::server::AppState;

/// How long the write task may take to flush a close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Run a WebSocket session.
///
/// 1. Starts the write task (outbound queue, pings, close)
/// 2. Hands the connection to the lifecycle controller
/// 3. Dispatches inbound text and binary frames in arrival order
/// 4. Deregisters on close, transport error, or server shutdown
#[instrument(skip_all, fields(conn_id = %id))]
pub async fn run_ws_session(
    ws: WebSocket,
    id: ConnectionId,
    attributes: HandshakeAttributes,
    state: AppState,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(state.config.send_queue_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(id.clone(), attributes, send_tx));

    let connection_start = Instant::now();
    debug!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    // Write task: outbound queue, periodic pings, close on request.
    let ping_every = state.config.ping_interval();
    let pong_timeout = state.config.pong_timeout();
    let outbound_conn = Arc::clone(&connection);
    let mut outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(ping_every);
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                () = outbound_conn.closed() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(Arc::unwrap_or_clone(text).into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if !outbound_conn.check_alive() && outbound_conn.last_pong_elapsed() > pong_timeout {
                        warn!("client unresponsive for {pong_timeout:?}, disconnecting");
                        let _ = outbound_conn.close();
                        continue;
                    }
                    if ws_tx.send(Message::Ping(Vec::<u8>::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let transport: Arc<dyn Transport> = connection.clone();
    let opened = state.lifecycle.on_open(Arc::clone(&transport)).await;

    if opened != ConnectionState::Closed {
        let shutdown = state.shutdown.token();
        loop {
            let msg = tokio::select! {
                () = connection.closed() => break,
                () = shutdown.cancelled() => {
                    debug!("server shutting down");
                    let _ = connection.close();
                    break;
                }
                msg = ws_rx.next() => msg,
            };

            let msg = match msg {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    let _ = state.lifecycle.on_transport_error(transport.as_ref(), &e);
                    break;
                }
                None => break,
            };

            connection.mark_alive();
            match msg {
                Message::Text(text) => {
                    let _ = state
                        .dispatch
                        .dispatch_text(&id, transport.attributes(), text.as_str())
                        .await;
                }
                Message::Binary(data) => {
                    let _ = state
                        .dispatch
                        .dispatch_binary(&id, transport.attributes(), &data)
                        .await;
                }
                Message::Pong(_) => state.dispatch.on_pong(&id),
                Message::Ping(_) => {}
                Message::Close(_) => {
                    debug!("client sent close frame");
                    break;
                }
            }
        }
    }

    // Clean up
    let _ = state.lifecycle.on_close(&id);
    let _ = connection.close();
    if tokio::time::timeout(CLOSE_GRACE, &mut outbound).await.is_err() {
        outbound.abort();
    }

    info!(
        state = ?opened,
        duration_secs = connection_start.elapsed().as_secs_f64(),
        dropped = connection.drop_count(),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());
}
