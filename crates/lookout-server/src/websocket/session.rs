//! WebSocket session lifecycle: one connected peer from admission through
//! disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use lookout_core::{CloseReason, SessionId, ViewerIdentity};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_REJECTED_TOTAL,
};
use crate::signaling::hub::SignalingHub;
use crate::signaling::peer::AdmittedRole;

use super::connection::{ClientConnection, Outbound};

/// How long the writer gets to flush its close frame after the reader ends.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

fn close_message(reason: CloseReason) -> Message {
    Message::Close(Some(CloseFrame {
        code: reason.code(),
        reason: reason.message().to_owned().into(),
    }))
}

/// Frame sent when the connection token fires. A server shutdown that
/// reached the session before `close_all` still reports 1001.
fn final_frame(reason: Option<CloseReason>, shutting_down: bool) -> Message {
    reason
        .or_else(|| shutting_down.then_some(CloseReason::Shutdown))
        .map_or(Message::Close(None), close_message)
}

/// Close a socket that failed admission.
pub async fn reject(mut socket: WebSocket, reason: CloseReason) {
    info!(code = reason.code(), reason = reason.message(), "connection rejected");
    counter!(WS_REJECTED_TOTAL, "code" => reason.code().to_string()).increment(1);
    let _ = socket.send(close_message(reason)).await;
}

/// Run a WebSocket session for an admitted peer.
///
/// 1. Registers the peer with the hub (closing with 1013 when full)
/// 2. Spawns a writer that drains the outbound queue and sends the close
///    frame once the connection token is cancelled
/// 3. Feeds inbound frames to the hub until the socket or token closes;
///    the connection token is a child of `shutdown`
/// 4. Runs the disconnect cascade exactly once
#[instrument(skip_all, fields(session_id = %session_id, role = role.as_str()))]
pub async fn run_ws_session(
    socket: WebSocket,
    hub: Arc<SignalingHub>,
    session_id: SessionId,
    role: AdmittedRole,
    viewer: Option<ViewerIdentity>,
    shutdown: CancellationToken,
    queue_capacity: usize,
) {
    let cancel = shutdown.child_token();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Outbound>(queue_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(
        session_id.clone(),
        send_tx,
        cancel.clone(),
    ));

    if let Err(e) = hub.connect(connection.clone(), role, viewer) {
        warn!(error = %e, "registration refused");
        counter!(WS_REJECTED_TOTAL, "code" => CloseReason::ServerFull.code().to_string())
            .increment(1);
        let _ = ws_tx.send(close_message(CloseReason::ServerFull)).await;
        return;
    }

    let started = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL, "role" => role.as_str()).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let writer_conn = connection.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                () = writer_conn.token().cancelled() => {
                    let frame = final_frame(writer_conn.close_reason(), shutdown.is_cancelled());
                    let _ = ws_tx.send(frame).await;
                    break;
                }
                item = send_rx.recv() => {
                    let message = match item {
                        Some(Outbound::Text(text)) => Message::Text(String::clone(&text).into()),
                        Some(Outbound::Ping) => Message::Ping(Vec::new().into()),
                        None => break,
                    };
                    if ws_tx.send(message).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = ws_rx.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => hub.handle_text(&session_id, text.as_str()).await,
            Some(Ok(Message::Binary(data))) => {
                if let Ok(text) = std::str::from_utf8(&data) {
                    hub.handle_text(&session_id, text).await;
                } else {
                    hub.touch(&session_id);
                    debug!(len = data.len(), "non-UTF8 binary frame ignored");
                }
            }
            Some(Ok(Message::Pong(_))) => hub.handle_pong(&session_id),
            Some(Ok(Message::Ping(_))) => hub.touch(&session_id),
            Some(Ok(Message::Close(_))) => {
                info!("client sent close frame");
                break;
            }
            Some(Err(e)) => {
                debug!(error = %e, "websocket read failed");
                break;
            }
            None => break,
        }
    }

    let _ = hub.disconnect(&session_id).await;
    cancel.cancel();
    let _ = tokio::time::timeout(WRITER_DRAIN, writer).await;

    info!(
        dropped = connection.drop_count(),
        close_code = connection.close_reason().map(CloseReason::code),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}
