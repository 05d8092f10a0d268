//! WebSocket endpoint: one connection, many session subscriptions.
//!
//! Commands arrive as JSON text frames and are dispatched against the
//! registry. Each joined session gets a forwarder task that pumps output
//! chunks and resize notices into the connection's outbound queue; the
//! socket writer drains that queue so a slow client never blocks a
//! session's emulator.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::AppState;
use crate::protocol::{ClientCommand, ServerEvent};
use crate::session::{Session, SessionNotice};

/// Outbound queue depth per connection. A client that cannot drain this many
/// events gets disconnected rather than buffering without bound.
const OUTBOUND_CAPACITY: usize = 256;

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One subscription held by a connection.
struct Subscription {
    forwarder: tokio::task::JoinHandle<()>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Aborting the forwarder drops its SubscriberGuard, which removes
        // this connection from the session's subscriber set.
        self.forwarder.abort();
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();
    tracing::debug!(%conn_id, "websocket connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (event_tx, mut event_rx) = mpsc::channel::<ServerEvent>(OUTBOUND_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(?e, "failed to serialize event");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut subscriptions: HashMap<String, Subscription> = HashMap::new();

    while let Some(frame) = ws_rx.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(_) => break,
        };
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            // Ping/pong are answered by axum; binary frames are not part of
            // the protocol.
            _ => continue,
        };

        let command: ClientCommand = match serde_json::from_str(&text) {
            Ok(command) => command,
            Err(e) => {
                send(&event_tx, ServerEvent::error("invalid_command", e.to_string(), None)).await;
                continue;
            }
        };

        handle_command(&state, conn_id, command, &event_tx, &mut subscriptions).await;
    }

    tracing::debug!(%conn_id, subscriptions = subscriptions.len(), "websocket closed");
    drop(subscriptions);
    drop(event_tx);
    let _ = writer.await;
}

async fn handle_command(
    state: &AppState,
    conn_id: Uuid,
    command: ClientCommand,
    event_tx: &mpsc::Sender<ServerEvent>,
    subscriptions: &mut HashMap<String, Subscription>,
) {
    match command {
        ClientCommand::Join { session_id, format } => {
            if subscriptions.contains_key(&session_id) {
                send(
                    event_tx,
                    ServerEvent::error(
                        "already_joined",
                        "This connection is already subscribed to the session",
                        Some(&session_id),
                    ),
                )
                .await;
                return;
            }
            let Some(session) = lookup(state, &session_id, event_tx).await else {
                return;
            };
            match session.join(conn_id, format).await {
                Ok((snapshot, output_rx, guard)) => {
                    send(event_tx, ServerEvent::joined(&session_id, &snapshot)).await;
                    let forwarder = tokio::spawn(forward_output(
                        session.clone(),
                        output_rx,
                        guard,
                        event_tx.clone(),
                    ));
                    subscriptions.insert(session_id, Subscription { forwarder });
                }
                Err(e) => {
                    send(
                        event_tx,
                        ServerEvent::error("session_not_found", e.to_string(), Some(&session_id)),
                    )
                    .await;
                }
            }
        }

        ClientCommand::Leave { session_id } => {
            if subscriptions.remove(&session_id).is_some() {
                send(event_tx, ServerEvent::Left { session_id }).await;
            } else {
                send(
                    event_tx,
                    ServerEvent::error(
                        "not_joined",
                        "This connection is not subscribed to the session",
                        Some(&session_id),
                    ),
                )
                .await;
            }
        }

        ClientCommand::Input { session_id, data } => {
            let Some(session) = lookup(state, &session_id, event_tx).await else {
                return;
            };
            if let Err(e) = session.write(data.into()).await {
                send(
                    event_tx,
                    ServerEvent::error("input_failed", e.to_string(), Some(&session_id)),
                )
                .await;
            }
        }

        ClientCommand::Resize {
            session_id,
            cols,
            rows,
        } => {
            let Some(session) = lookup(state, &session_id, event_tx).await else {
                return;
            };
            match session.resize(cols, rows).await {
                Ok(()) => {
                    // Subscribers hear about it through the notice broadcast;
                    // a non-subscribed requester still deserves an ack.
                    if !subscriptions.contains_key(&session_id) {
                        send(
                            event_tx,
                            ServerEvent::Resized {
                                session_id,
                                cols,
                                rows,
                            },
                        )
                        .await;
                    }
                }
                Err(e) => {
                    send(
                        event_tx,
                        ServerEvent::error("resize_failed", e.to_string(), Some(&session_id)),
                    )
                    .await;
                }
            }
        }

        ClientCommand::Terminate { session_id } => {
            if let Err(e) = state.sessions.terminate(&session_id) {
                send(
                    event_tx,
                    ServerEvent::error("session_not_found", e.to_string(), Some(&session_id)),
                )
                .await;
            }
            // The terminated event reaches subscribers when their output
            // streams close, after pending output has flushed.
        }
    }
}

async fn lookup(
    state: &AppState,
    session_id: &str,
    event_tx: &mpsc::Sender<ServerEvent>,
) -> Option<Session> {
    match state.sessions.get(session_id) {
        Some(session) => Some(session),
        None => {
            send(
                event_tx,
                ServerEvent::error(
                    "session_not_found",
                    format!("Session not found: {session_id}"),
                    Some(session_id),
                ),
            )
            .await;
            None
        }
    }
}

async fn send(event_tx: &mpsc::Sender<ServerEvent>, event: ServerEvent) {
    let _ = event_tx.send(event).await;
}

/// Pump one session's output and notices into the connection's event queue.
///
/// Runs until the session's output stream closes, then emits `terminated`.
/// The stream closes only after the emulator has rebroadcast everything the
/// PTY produced, so pending output always reaches the client first.
async fn forward_output(
    session: Session,
    mut output_rx: tokio::sync::broadcast::Receiver<bytes::Bytes>,
    guard: crate::session::SubscriberGuard,
    event_tx: mpsc::Sender<ServerEvent>,
) {
    let _guard = guard;
    let mut notice_rx = session.notices.subscribe();
    let session_id = session.id.clone();

    loop {
        tokio::select! {
            chunk = output_rx.recv() => match chunk {
                Ok(data) => {
                    let event = ServerEvent::Output {
                        session_id: session_id.clone(),
                        data: data.to_vec(),
                    };
                    if event_tx.send(event).await.is_err() {
                        return;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(session = %session_id, missed, "subscriber lagged, output dropped");
                }
                Err(RecvError::Closed) => break,
            },

            notice = notice_rx.recv() => match notice {
                Ok(SessionNotice::Resized { cols, rows }) => {
                    let event = ServerEvent::Resized {
                        session_id: session_id.clone(),
                        cols,
                        rows,
                    };
                    if event_tx.send(event).await.is_err() {
                        return;
                    }
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    // Give the child-exit monitor a moment to record the exit status before
    // reporting it.
    let _ = tokio::time::timeout(Duration::from_secs(5), session.cancelled.cancelled()).await;
    let exit_status = *session.exit_status.read();
    let _ = event_tx
        .send(ServerEvent::Terminated {
            session_id,
            exit_status,
        })
        .await;
}
