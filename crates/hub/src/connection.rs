// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! Per-connection handling: handshake, heartbeat tracking, frame relay
//! (spec.md §4.4).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use ctrlplane_auth::AuditRecord;
use ctrlplane_core::event::EventDraft;
use ctrlplane_core::{AgentId, AgentRegistration, AgentResponseFrame, EventType, ResponseKind};
use ctrlplane_core::validation::validate_workdir;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::frame::{CloseCode, InboundFrame, OutboundFrame};
use crate::HubInner;

/// Per-connection state machine (spec.md §4.4). Only `Active` accepts
/// inbound or outbound frames; everything else is dropped with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Handshaking,
    Active,
    Closing,
}

pub(crate) async fn handle_socket(hub: Arc<HubInner>, socket: WebSocket, peer_addr: String) {
    let (mut sink, mut stream) = socket.split();
    let mut state = ConnState::Handshaking;

    let register = match timeout(hub.config.handshake_timeout, stream.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        _ => {
            let _ = send_close(&mut sink, CloseCode::ProtocolError).await;
            return;
        }
    };

    let frame: InboundFrame = match serde_json::from_str(&register) {
        Ok(f) => f,
        Err(_) => {
            let _ = send_close(&mut sink, CloseCode::ProtocolError).await;
            return;
        }
    };

    let InboundFrame::Register {
        agent_id: raw_id,
        auth_token,
        capabilities,
        workdir,
    } = frame
    else {
        let _ = send_close(&mut sink, CloseCode::ProtocolError).await;
        return;
    };

    let agent_id = match AgentId::try_from(raw_id) {
        Ok(id) => id,
        Err(_) => {
            let _ = send_close(&mut sink, CloseCode::ProtocolError).await;
            return;
        }
    };

    if let Some(ref w) = workdir {
        if validate_workdir(w).is_err() {
            hub.audit.record(&AuditRecord {
                timestamp: Utc::now(),
                event: "agent.register",
                outcome: "path_violation",
                credential_fingerprint: None,
                peer_address: Some(peer_addr.clone()),
                detail: Some(w.clone()),
            });
            let _ = send_close(&mut sink, CloseCode::ProtocolError).await;
            return;
        }
    }

    let principal = hub.validator.validate(Some(&auth_token));
    hub.audit.record(&AuditRecord {
        timestamp: Utc::now(),
        event: "auth.validate",
        outcome: if principal.is_ok() { "pass" } else { "fail" },
        credential_fingerprint: Some(ctrlplane_auth::fingerprint(&auth_token)),
        peer_address: Some(peer_addr.clone()),
        detail: None,
    });

    if principal.is_err() {
        hub.bus.publish(
            EventDraft::new(EventType::AuthFailure, "bridge auth failed")
                .agent(agent_id.clone()),
        );
        let _ = send_close(&mut sink, CloseCode::AuthFailure).await;
        return;
    }

    let reg = AgentRegistration {
        workdir,
        ..AgentRegistration::new(agent_id.clone(), agent_id.to_string(), capabilities)
    };
    let _prior = hub.registry.upsert(reg);

    let (out_tx, mut out_rx) = mpsc::channel::<OutboundFrame>(64);
    if let Some(old_tx) = hub
        .connections
        .lock()
        .insert(agent_id.clone(), out_tx.clone())
    {
        // Replace the prior live connection for this agent id: it receives
        // `4004 agent_replaced` (spec.md §8 "Re-registering an agent").
        let _ = old_tx.try_send(OutboundFrame::Close {
            reason: CloseCode::AgentReplaced.reason().to_string(),
        });
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let registered = OutboundFrame::Registered {
        session_id,
        server_time: Utc::now(),
    };
    if write_frame(&mut sink, &registered, hub.config.write_timeout)
        .await
        .is_err()
    {
        cleanup(&hub, &agent_id, &out_tx.downgrade());
        return;
    }

    state = ConnState::Active;
    hub.bus.publish(
        EventDraft::new(EventType::AgentRegistered, format!("{agent_id} registered"))
            .agent(agent_id.clone()),
    );
    hub.audit.record(&AuditRecord {
        timestamp: Utc::now(),
        event: "agent.register",
        outcome: "ok",
        credential_fingerprint: None,
        peer_address: Some(peer_addr.clone()),
        detail: None,
    });

    // Writer task: the only task that ever writes to the socket, so a slow
    // or dead peer can't be blocked on by the reader/heartbeat loop
    // (spec.md §9 "Event fan-out vs. dispatcher progress").
    let write_timeout = hub.config.write_timeout;
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if write_frame(&mut sink, &frame, write_timeout).await.is_err() {
                break;
            }
        }
    });

    let mut missed_heartbeats = 0u32;
    let mut close_reason = "peer_closed";
    loop {
        if state != ConnState::Active {
            break;
        }
        match timeout(hub.config.heartbeat_interval, stream.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                missed_heartbeats = 0;
                handle_inbound_text(&hub, &agent_id, &text);
            }
            Ok(Some(Ok(Message::Close(_)))) => {
                break;
            }
            Ok(Some(Ok(_))) => {
                // ping/pong/binary: treat as liveness, ignore content.
                missed_heartbeats = 0;
            }
            Ok(Some(Err(_))) | Ok(None) => {
                close_reason = "read_error";
                break;
            }
            Err(_elapsed) => {
                missed_heartbeats += 1;
                if missed_heartbeats >= 3 {
                    close_reason = CloseCode::HeartbeatTimeout.reason();
                    break;
                }
            }
        }
    }

    state = ConnState::Closing;
    let identity = out_tx.downgrade();
    let _ = out_tx
        .send(OutboundFrame::Close {
            reason: close_reason.to_string(),
        })
        .await;
    // Drop the registry's clone of the sender (if it is still ours) before
    // our own local `out_tx`, so the writer task actually observes the
    // channel close and its `recv()` loop returns — otherwise the map's
    // clone would keep the channel open forever and `writer.await` below
    // would never complete.
    let was_live = cleanup(&hub, &agent_id, &identity);
    drop(out_tx);
    let _ = writer.await;

    // If a replacement connection already overwrote our `connections` entry
    // (`cleanup` found someone else's sender there), this connection was
    // already superseded — the replacement owns the registry entry and the
    // task now. Mutating either here would corrupt a connection that is
    // still alive (spec.md §9 "weak reference" note, §4.4 reconnect
    // semantics).
    if was_live {
        hub.registry.mark_disconnected(&agent_id);
        hub.response_sink().on_agent_disconnected(&agent_id);
        hub.bus.publish(
            EventDraft::new(
                EventType::AgentDisconnected,
                format!("{agent_id} disconnected ({close_reason})"),
            )
            .agent(agent_id.clone()),
        );
    }
}

fn handle_inbound_text(hub: &Arc<HubInner>, agent_id: &AgentId, text: &str) {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(_) => {
            tracing::warn!(%agent_id, "dropping malformed frame");
            return;
        }
    };

    match frame {
        InboundFrame::Heartbeat { .. } => {
            hub.registry.mark_heartbeat(agent_id);
        }
        InboundFrame::Progress { message_id, content } => {
            hub.response_sink().on_progress(agent_id, message_id, content);
        }
        InboundFrame::Response {
            message_id,
            content,
            usage,
            error,
        } => {
            let kind = if error.is_some() {
                ResponseKind::Error
            } else {
                ResponseKind::Response
            };
            hub.response_sink().on_response(
                agent_id,
                AgentResponseFrame {
                    message_id,
                    kind,
                    content: error.unwrap_or(content),
                    usage,
                    timestamp: Utc::now(),
                },
            );
        }
        InboundFrame::Register { .. } => {
            tracing::warn!(%agent_id, "unexpected register frame on active connection, ignoring");
        }
    }
}

/// Removes this connection's own entry from `hub.connections`, if it is
/// still the one installed there, and reports whether it was. Returns
/// `false` when a replacement connection already overwrote the entry with
/// its own sender — the caller must then skip any registry/event teardown,
/// since that state now belongs to the replacement (spec.md §4.4 "Cleanup
/// must leave no dangling subscriptions").
fn cleanup(hub: &Arc<HubInner>, agent_id: &AgentId, identity: &mpsc::WeakSender<OutboundFrame>) -> bool {
    let mut conns = hub.connections.lock();
    // Only remove our own entry, identified via `same_channel`. Comparing
    // the weak upgrade (rather than holding a strong clone across the
    // writer-task join above) avoids keeping this connection's mpsc channel
    // artificially open.
    if let std::collections::hash_map::Entry::Occupied(entry) = conns.entry(agent_id.clone()) {
        let is_ours = identity
            .upgrade()
            .is_some_and(|strong| strong.same_channel(entry.get()));
        if is_ours {
            entry.remove();
        }
        is_ours
    } else {
        // No entry at all (already removed by someone else): this
        // connection is not the live one either.
        false
    }
}

async fn send_close(
    sink: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    code: CloseCode,
) -> Result<(), ()> {
    let _ = sink
        .send(Message::Text(
            serde_json::to_string(&OutboundFrame::Error {
                code: code.code().to_string(),
                message: code.reason().to_string(),
            })
            .unwrap_or_default(),
        ))
        .await;
    let _ = sink.close().await;
    Ok(())
}

async fn write_frame(
    sink: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    frame: &OutboundFrame,
    write_timeout: Duration,
) -> Result<(), ()> {
    let text = serde_json::to_string(frame).map_err(|_| ())?;
    match timeout(write_timeout, sink.send(Message::Text(text))).await {
        Ok(Ok(())) => Ok(()),
        _ => Err(()),
    }
}
