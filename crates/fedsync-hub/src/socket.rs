//! WebSocket transport and per-connection state machine.
//!
//! Each accepted connection runs `handle_socket`: register an
//! unauthenticated session, send the challenge, then drive frames until the
//! transport closes, the auth deadline fires, or the close signal arrives.
//! Frame semantics live in `handle_frame` so they stay testable without a
//! live socket.

use self::FrameOutcome::{Continue, Terminate};
use crate::ConnectionHub;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        ConnectInfo, Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use fedsync_types::{FederationEvent, HubFrame, NodeFrame, ReasonCode, TerminationReason};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Outbound buffer per session. Beyond this the consumer is too slow and
/// frames are dropped.
const OUTBOUND_BUFFER: usize = 256;

/// What a frame did to the connection.
pub(crate) enum FrameOutcome {
    /// Keep reading.
    Continue,
    /// Stop the connection task with this reason.
    Terminate(TerminationReason),
}

/// Mutable per-connection state threaded through frame handling.
///
/// `session_id` starts as the provisional registry id and is re-keyed to
/// the grant's id when the handshake succeeds; `node_id` is `Some` iff the
/// session is authenticated.
pub(crate) struct SessionContext {
    pub session_id: Uuid,
    pub node_id: Option<String>,
}

/// `GET /ws` — upgrades to the federation frame protocol.
///
/// No credentials are checked here: admission happens in-band via the auth
/// frame, bounded by the hub's auth deadline.
pub async fn ws_handler(
    Extension(hub): Extension<Arc<ConnectionHub>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub, addr))
}

async fn handle_socket(socket: WebSocket, hub: Arc<ConnectionHub>, addr: SocketAddr) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Bounded channel so a slow consumer cannot grow memory without bound.
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    let (provisional_id, close) = hub.registry.add_unauthenticated(tx.clone()).await;
    let mut ctx = SessionContext {
        session_id: provisional_id,
        node_id: None,
    };

    tracing::info!(
        session_id = %ctx.session_id,
        remote_addr = %addr,
        "connection accepted, awaiting authentication"
    );

    send_frame(
        &tx,
        &HubFrame::Challenge {
            session_id: ctx.session_id.to_string(),
        },
    );

    // Forward queued frames to the transport.
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(WsMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    let auth_deadline = tokio::time::Instant::now() + hub.config.auth_timeout;
    let mut reason = TerminationReason::Closed;

    loop {
        tokio::select! {
            _ = close.notified() => {
                // Whoever signalled already unregistered the session and
                // reported why; just stop the task.
                break;
            }
            _ = tokio::time::sleep_until(auth_deadline), if ctx.node_id.is_none() => {
                tracing::info!(
                    session_id = %ctx.session_id,
                    remote_addr = %addr,
                    "authentication deadline passed, closing"
                );
                send_frame(
                    &tx,
                    &HubFrame::Error {
                        code: ReasonCode::Unauthenticated,
                        message: "authentication timeout".to_string(),
                    },
                );
                reason = TerminationReason::AuthTimeout;
                break;
            }
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else {
                    break;
                };
                match msg {
                    WsMessage::Text(text) => {
                        hub.registry.touch_activity(ctx.session_id).await;
                        let frame = match serde_json::from_str::<NodeFrame>(text.as_str()) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::warn!(
                                    session_id = %ctx.session_id,
                                    "unparseable frame: {}",
                                    e
                                );
                                send_frame(
                                    &tx,
                                    &HubFrame::Error {
                                        code: ReasonCode::MalformedMessage,
                                        message: "unparseable frame".to_string(),
                                    },
                                );
                                continue;
                            }
                        };
                        match handle_frame(&hub, &mut ctx, &tx, frame).await {
                            Continue => {}
                            Terminate(r) => {
                                reason = r;
                                break;
                            }
                        }
                    }
                    WsMessage::Close(_) => break,
                    // Pings are answered by axum; binary frames carry nothing
                    // in this protocol.
                    _ => {}
                }
            }
        }
    }

    // Idempotent against the sweep and supersession, which unregister and
    // report before signalling close.
    if let Some(held_node) = hub.registry.remove(ctx.session_id).await {
        if let Some(ref node_id) = held_node {
            if let Err(e) = hub.store.update_node_status(node_id, "offline").await {
                tracing::warn!(node_id = %node_id, "failed to report offline status: {}", e);
            }
        }
        tracing::info!(
            session_id = %ctx.session_id,
            node_id = held_node.as_deref().unwrap_or("-"),
            reason = ?reason,
            "connection terminated"
        );
        hub.emit(FederationEvent::ConnectionTerminated {
            node_id: held_node,
            session_id: ctx.session_id,
            reason,
        });
    }

    // Removal dropped the registry's sender clone; dropping ours lets the
    // forward task drain queued frames (including a final error frame) and
    // exit. The timeout guards against a wedged peer.
    drop(tx);
    if tokio::time::timeout(std::time::Duration::from_secs(5), &mut send_task)
        .await
        .is_err()
    {
        send_task.abort();
    }
}

/// Applies one frame to the session.
pub(crate) async fn handle_frame(
    hub: &ConnectionHub,
    ctx: &mut SessionContext,
    tx: &mpsc::Sender<String>,
    frame: NodeFrame,
) -> FrameOutcome {
    match frame {
        NodeFrame::Auth { offer } => {
            if ctx.node_id.is_some() {
                send_frame(
                    tx,
                    &HubFrame::Error {
                        code: ReasonCode::MalformedMessage,
                        message: "session already authenticated".to_string(),
                    },
                );
                return Continue;
            }

            let grant = match hub.engine.verify_offer(&offer) {
                Ok(grant) => grant,
                Err(rejection) => {
                    // Full detail stays in logs; the wire gets the code and
                    // a generic message.
                    tracing::warn!(
                        session_id = %ctx.session_id,
                        node_id = %offer.node_id,
                        "handshake rejected: {}",
                        rejection
                    );
                    send_frame(
                        tx,
                        &HubFrame::Error {
                            code: rejection.reason_code(),
                            message: rejection.public_message().to_string(),
                        },
                    );
                    return Terminate(TerminationReason::AdmissionFailed);
                }
            };

            let superseded = match hub
                .registry
                .authenticate(ctx.session_id, grant.session_id, &grant.node_id, &grant.node_type)
                .await
            {
                Ok(superseded) => superseded,
                Err(e) => {
                    tracing::error!(session_id = %ctx.session_id, "session promotion failed: {}", e);
                    send_frame(
                        tx,
                        &HubFrame::Error {
                            code: ReasonCode::InternalError,
                            message: "session no longer registered".to_string(),
                        },
                    );
                    return Terminate(TerminationReason::Closed);
                }
            };

            if let Some(old) = superseded {
                tracing::info!(
                    node_id = %old.node_id,
                    old_session = %old.session_id,
                    new_session = %grant.session_id,
                    "superseding prior session for node"
                );
                hub.emit(FederationEvent::ConnectionTerminated {
                    node_id: Some(old.node_id.clone()),
                    session_id: old.session_id,
                    reason: TerminationReason::Superseded,
                });
                old.close();
            }

            ctx.session_id = grant.session_id;
            ctx.node_id = Some(grant.node_id.clone());

            if let Err(e) = hub.store.update_node_status(&grant.node_id, "online").await {
                tracing::warn!(node_id = %grant.node_id, "failed to report online status: {}", e);
            }

            send_frame(
                tx,
                &HubFrame::Ack {
                    correlation_id: None,
                    payload: serde_json::json!({
                        "sessionId": grant.session_id,
                        "token": grant.token,
                        "secret": grant.session_secret,
                        "expiresAt": grant.expires_at,
                    }),
                },
            );
            Continue
        }

        NodeFrame::Heartbeat => {
            let Some(_) = ctx.node_id else {
                send_unauthenticated(tx);
                return Continue;
            };
            hub.registry.touch_heartbeat(ctx.session_id).await;
            send_frame(
                tx,
                &HubFrame::Ack {
                    correlation_id: None,
                    payload: serde_json::json!({"heartbeat": "received"}),
                },
            );
            Continue
        }

        NodeFrame::Sync {
            message_id,
            sync_type,
            items,
        } => {
            let Some(ref node_id) = ctx.node_id else {
                send_unauthenticated(tx);
                return Continue;
            };
            match hub
                .store
                .record_sync(node_id, &message_id, &sync_type, &items)
                .await
            {
                Ok(ack) => {
                    hub.emit(FederationEvent::SyncCompleted {
                        node_id: node_id.clone(),
                        sync_type,
                        items_processed: ack.items_processed,
                    });
                    match serde_json::to_value(&ack) {
                        Ok(payload) => send_frame(
                            tx,
                            &HubFrame::Ack {
                                correlation_id: Some(message_id),
                                payload,
                            },
                        ),
                        Err(e) => {
                            tracing::error!("failed to serialize sync ack: {}", e);
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(
                        node_id = %node_id,
                        message_id = %message_id,
                        "sync submission failed: {}",
                        e
                    );
                    send_frame(
                        tx,
                        &HubFrame::Error {
                            code: ReasonCode::InternalError,
                            message: "sync submission failed".to_string(),
                        },
                    );
                }
            }
            Continue
        }

        NodeFrame::Broadcast {
            payload,
            target,
            exclude_self,
        } => {
            let Some(ref node_id) = ctx.node_id else {
                send_unauthenticated(tx);
                return Continue;
            };
            let relay = HubFrame::Broadcast {
                source: node_id.clone(),
                payload,
            };
            let json = match serde_json::to_string(&relay) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("failed to serialize broadcast relay: {}", e);
                    return Continue;
                }
            };

            let delivered = match target {
                Some(ref target_node) => {
                    usize::from(hub.registry.send_to_node(target_node, json).await)
                }
                None => {
                    hub.registry
                        .broadcast(json, exclude_self.then_some(ctx.session_id))
                        .await
                }
            };

            hub.emit(FederationEvent::Broadcast {
                source: node_id.clone(),
                recipients: delivered,
            });
            send_frame(
                tx,
                &HubFrame::Ack {
                    correlation_id: None,
                    payload: serde_json::json!({"delivered": delivered}),
                },
            );
            Continue
        }
    }
}

fn send_unauthenticated(tx: &mpsc::Sender<String>) {
    send_frame(
        tx,
        &HubFrame::Error {
            code: ReasonCode::Unauthenticated,
            message: "not authenticated".to_string(),
        },
    );
}

/// Serializes a frame onto the session's outbound queue.
fn send_frame(tx: &mpsc::Sender<String>, frame: &HubFrame) {
    match serde_json::to_string(frame) {
        Ok(json) => {
            if let Err(e) = tx.try_send(json) {
                tracing::warn!("dropping outbound frame for slow consumer: {}", e);
            }
        }
        Err(e) => {
            tracing::error!("failed to serialize outbound frame: {}", e);
        }
    }
}
