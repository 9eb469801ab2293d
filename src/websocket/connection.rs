//! Per-socket lifecycle: join handshake, send task, receive loop, teardown.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::error_codes::{AdmissionErrorCode, CLOSE_POLICY_VIOLATION};
use crate::protocol::messages::{ClientFrame, ServerFrame};
use crate::room::state::Outbound;
use crate::server::{JoinRequest, QuizServer};

/// Reject the handshake: one typed `error` frame, then close 1008.
async fn reject(sender: &mut SplitSink<WebSocket, Message>, code: AdmissionErrorCode) {
    let frame = ServerFrame::admission_error(code);
    if let Ok(text) = serde_json::to_string(&frame) {
        let _ = sender.send(Message::Text(text.into())).await;
    }
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY_VIOLATION,
            reason: "policy violation".into(),
        })))
        .await;
}

fn join_request_from_frame(frame: ClientFrame) -> Option<JoinRequest> {
    match frame {
        ClientFrame::Join {
            room_id,
            name,
            host_token,
            player_token,
            room_password,
            token,
            client_id,
        } => Some(JoinRequest {
            room_id,
            name,
            host_token,
            player_token,
            room_password,
            bearer_token: token,
            client_id,
        }),
        _ => None,
    }
}

/// Wait up to the join timeout for the first frame and decode it as `join`.
async fn read_join_frame(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    timeout: Duration,
) -> Result<JoinRequest, AdmissionErrorCode> {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            message = receiver.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let frame: ClientFrame = serde_json::from_str(&text)
                            .map_err(|_| AdmissionErrorCode::InvalidJoinPayload)?;
                        return join_request_from_frame(frame)
                            .ok_or(AdmissionErrorCode::InvalidJoinPayload);
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(_)) | Some(Err(_)) | None => {
                        return Err(AdmissionErrorCode::InvalidJoinPayload);
                    }
                }
            }
            () = &mut deadline => return Err(AdmissionErrorCode::JoinTimeout),
        }
    }
}

pub(super) async fn handle_socket(
    socket: WebSocket,
    server: Arc<QuizServer>,
    query_join: Option<JoinRequest>,
) {
    let (mut sender, mut receiver) = socket.split();
    let socket_id = Uuid::new_v4();
    server.metrics().increment(&server.metrics().total_connections);

    let join_timeout = Duration::from_secs(server.config().game.join_timeout_secs);
    let request = match query_join {
        Some(request) => request,
        None => match read_join_frame(&mut receiver, join_timeout).await {
            Ok(request) => request,
            Err(code) => {
                server
                    .metrics()
                    .increment(&server.metrics().admission_rejections);
                reject(&mut sender, code).await;
                return;
            }
        },
    };

    let (outbox_tx, mut outbox_rx) =
        mpsc::channel::<Outbound>(server.config().game.outbox_capacity.max(1));

    let seat = match server.admit(request, outbox_tx, socket_id).await {
        Ok(seat) => seat,
        Err(code) => {
            reject(&mut sender, code).await;
            return;
        }
    };
    server
        .metrics()
        .increment(&server.metrics().active_connections);
    tracing::info!(
        room_id = %seat.room_id,
        peer_id = %seat.peer_id,
        "WebSocket connection established"
    );

    // Outbound pump: serializes frames and honors close requests.
    let send_metrics = Arc::clone(server.metrics());
    let send_task = tokio::spawn(async move {
        while let Some(outbound) = outbox_rx.recv().await {
            match outbound {
                Outbound::Frame(frame) => {
                    let Ok(text) = serde_json::to_string(&frame) else {
                        continue;
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        send_metrics.increment(&send_metrics.send_failures);
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    // Inbound loop: every parseable frame is dispatched under the room mutex.
    while let Some(message) = receiver.next().await {
        let message = match message {
            Ok(message) => message,
            Err(error) => {
                tracing::debug!(peer_id = %seat.peer_id, %error, "WebSocket receive error");
                break;
            }
        };
        match message {
            Message::Text(text) => {
                let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) else {
                    server.metrics().increment(&server.metrics().frames_rejected);
                    continue;
                };
                server.handle_client_frame(&seat, frame).await;
            }
            Message::Close(_) => break,
            // Binary frames are not part of the protocol.
            Message::Binary(_) => {
                server.metrics().increment(&server.metrics().frames_rejected);
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    send_task.abort();
    server
        .metrics()
        .decrement(&server.metrics().active_connections);
    server
        .cleanup_connection(&seat.room_id, seat.peer_id, socket_id)
        .await;
    tracing::info!(
        room_id = %seat.room_id,
        peer_id = %seat.peer_id,
        "WebSocket connection closed"
    );
}
