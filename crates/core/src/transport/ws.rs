// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket upgrade handler and the per-connection event loop: hello
//! handshake, inbound message routing, and ordered fan-out of terminal and
//! layout events to the client.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{close_code, ErrorCode};
use crate::layout::{resolve::resolve_target, Content};
use crate::protocol::chunk::{build_snapshot_frames, event_to_frame, PendingAttach};
use crate::protocol::{error_frame, error_frame_for, ClientFrame, ServerFrame};
use crate::session::{CreateDecision, Session};
use crate::terminal::registry::Event;
use crate::terminal::{Mode, TerminalId};
use crate::transport::auth;
use crate::transport::state::AppState;

const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(0);

/// WebSocket upgrade handler. The hello handshake (and thus authentication)
/// happens entirely inside the per-connection loop, not here; the
/// `User-Agent` header is inspected up front since it's only available at
/// upgrade time, not from inside the handshake.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let is_mobile_default = auth::is_mobile_user_agent(&headers);
    ws.on_upgrade(move |socket| handle_connection(state, socket, is_mobile_default))
}

/// Per-connection event loop: hello handshake, then inbound message
/// dispatch interleaved with outbound fan-out from the global broadcast
/// channel, every attached terminal's per-terminal channel, and this
/// connection's own outbound frame queue.
async fn handle_connection(state: Arc<AppState>, socket: WebSocket, is_mobile_default: bool) {
    let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut global_rx = state.broadcast.subscribe();
    let mut session = Session::new();

    // Hello handshake. Anything other than `ping`/`hello` before this
    // completes is a protocol error that closes the connection.
    if !hello_handshake(&state, &mut ws_tx, &mut ws_rx, &mut session, is_mobile_default).await {
        debug!(connection_id, "connection closed during handshake");
        return;
    }

    let mut attached: Vec<(TerminalId, broadcast::Receiver<Event>)> = Vec::new();
    // Frames queued for this connection but not yet written to the socket —
    // a chunked attach's `attached.start`/`attached.chunk`*/`attached.end`
    // sequence lives here so sibling events keep getting a turn between
    // chunks instead of a single send loop monopolizing the connection.
    let mut outbound: VecDeque<ServerFrame> = VecDeque::new();

    loop {
        tokio::select! {
            biased;

            frame = global_rx.recv() => {
                match frame {
                    Ok(frame) => {
                        if send_frame(&mut ws_tx, &frame).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            Some(frame) = recv_queue(&mut outbound) => {
                if let ServerFrame::AttachedChunk { terminal_id, .. } = &frame {
                    if let Some(pending) = session.pending_attach_mut(*terminal_id) {
                        pending.mark_chunk_sent();
                    }
                }
                if send_frame(&mut ws_tx, &frame).await.is_err() {
                    break;
                }
                if let ServerFrame::AttachedEnd { terminal_id, .. } = &frame {
                    if let Some(mut pending) = session.finish_pending_attach(*terminal_id) {
                        for event in pending.finish() {
                            outbound.push_back(event_to_frame(*terminal_id, event));
                        }
                    }
                }
            }

            Some((index, event)) = recv_any(&mut attached) => {
                let (terminal_id, _) = attached[index];
                if let Err(err) = deliver_terminal_event(&mut ws_tx, &mut session, terminal_id, event).await {
                    let _ = send_frame(&mut ws_tx, &error_frame(err, "slow consumer")).await;
                    attached.remove(index);
                }
            }

            msg = ws_rx.next() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        if !dispatch(&state, &mut session, &mut attached, &mut outbound, &mut ws_tx, &text).await {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    for (id, rx) in attached {
        state.registry.detach(id, rx).await;
    }
    for id in session.attached_terminals().copied().collect::<Vec<_>>() {
        session.mark_detached(id);
    }
}

/// Wait for the next queued outbound frame, if any. Mirrors [`recv_any`]'s
/// empty-collection pattern so an empty queue never wins a `select!` race.
async fn recv_queue(queue: &mut VecDeque<ServerFrame>) -> Option<ServerFrame> {
    if queue.is_empty() {
        std::future::pending::<()>().await;
        return None;
    }
    queue.pop_front()
}

/// Wait for the next event from any attached terminal's receiver, returning
/// its index in `attached` so the caller can react (and drop it on lag).
///
/// A manual multi-way select over a `Vec` of receivers, since `tokio::select!`
/// needs a fixed arm count and the attached set grows/shrinks at runtime.
async fn recv_any(
    attached: &mut [(TerminalId, broadcast::Receiver<Event>)],
) -> Option<(usize, Result<Event, broadcast::error::RecvError>)> {
    if attached.is_empty() {
        std::future::pending::<()>().await;
        return None;
    }
    let futures = attached.iter_mut().enumerate().map(|(i, (_, rx))| {
        let fut = rx.recv();
        Box::pin(async move { (i, fut.await) })
    });
    let (result, _index, _rest) = futures_util::future::select_all(futures).await;
    Some(result)
}

async fn deliver_terminal_event(
    ws_tx: &mut (impl SinkExt<Message> + Unpin),
    session: &mut Session,
    terminal_id: TerminalId,
    event: Result<Event, broadcast::error::RecvError>,
) -> Result<(), ErrorCode> {
    let event = match event {
        Ok(event) => event,
        Err(broadcast::error::RecvError::Lagged(_)) => return Err(ErrorCode::SlowConsumer),
        Err(broadcast::error::RecvError::Closed) => return Ok(()),
    };

    if let Some(pending) = session.pending_attach_mut(terminal_id) {
        pending.route(event);
        return Ok(());
    }

    let frame = event_to_frame(terminal_id, event);
    if send_frame(ws_tx, &frame).await.is_err() {
        return Err(ErrorCode::Internal);
    }
    Ok(())
}

/// Drive the hello handshake to completion. Returns `false` if the
/// connection should be closed (auth failure, timeout, or pre-hello
/// protocol violation).
async fn hello_handshake(
    state: &AppState,
    ws_tx: &mut (impl SinkExt<Message> + Unpin),
    ws_rx: &mut (impl futures_util::Stream<Item = Result<Message, axum::Error>> + Unpin),
    session: &mut Session,
    is_mobile_default: bool,
) -> bool {
    let timeout = state.config.hello_timeout();
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                close_with(ws_tx, close_code::HELLO_TIMEOUT).await;
                return false;
            }
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else {
                    return false;
                };
                let Message::Text(text) = msg else { continue };

                let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) else {
                    return fail_handshake(ws_tx, ErrorCode::NotAuthenticated, "not authenticated").await;
                };

                match frame {
                    ClientFrame::Ping {} => {
                        let _ = send_frame(ws_tx, &pong()).await;
                    }
                    ClientFrame::Hello { token, client } => {
                        if let Err(code) = auth::validate_ws_auth(&token, state.config.auth_token.as_deref()) {
                            return fail_handshake(ws_tx, code, "authentication failed").await;
                        }
                        session.authenticated = true;
                        session.is_mobile = client.and_then(|c| c.mobile).unwrap_or(is_mobile_default);
                        let _ = send_frame(ws_tx, &ServerFrame::Ready {}).await;
                        return true;
                    }
                    _ => {
                        return fail_handshake(ws_tx, ErrorCode::NotAuthenticated, "not authenticated").await;
                    }
                }
            }
        }
    }
}

/// Report a pre-hello protocol error and, if [`ErrorCode::closes_connection`]
/// says so, close the socket. Every failure path in [`hello_handshake`]
/// (besides the timeout, which has no `ErrorCode` of its own) goes through
/// here so the close decision has one source of truth.
async fn fail_handshake(ws_tx: &mut (impl SinkExt<Message> + Unpin), code: ErrorCode, message: &str) -> bool {
    let _ = send_frame(ws_tx, &error_frame(code, message)).await;
    if code.closes_connection() {
        close_with(ws_tx, close_code::AUTH_FAILED).await;
    }
    false
}

/// Handle one inbound text frame. Returns `false` if the connection should
/// close.
async fn dispatch(
    state: &Arc<AppState>,
    session: &mut Session,
    attached: &mut Vec<(TerminalId, broadcast::Receiver<Event>)>,
    outbound: &mut VecDeque<ServerFrame>,
    ws_tx: &mut (impl SinkExt<Message> + Unpin),
    text: &str,
) -> bool {
    // `sdk.*` messages route to an external SDK bridge collaborator that
    // isn't part of this core; accept and ignore them rather than treating
    // them as malformed.
    if let Ok(raw) = serde_json::from_str::<serde_json::Value>(text) {
        if raw.get("type").and_then(|t| t.as_str()).is_some_and(|t| t.starts_with("sdk.")) {
            return true;
        }
    }

    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(_) => {
            return send_frame(ws_tx, &error_frame(ErrorCode::InvalidMessage, "invalid message")).await.is_ok();
        }
    };

    match frame {
        ClientFrame::Ping {} => send_frame(ws_tx, &pong()).await.is_ok(),
        ClientFrame::Hello { .. } => true, // post-hello hellos are ignored

        ClientFrame::TerminalCreate { request_id, mode, shell, cwd, cols, rows, restore } => {
            handle_terminal_create(state, session, ws_tx, request_id, mode, shell, cwd, cols, rows, restore).await
        }
        ClientFrame::TerminalAttach { terminal_id, since_sequence } => {
            handle_terminal_attach(state, session, attached, outbound, ws_tx, terminal_id, since_sequence).await
        }
        ClientFrame::TerminalDetach { terminal_id } => {
            if let Some(index) = attached.iter().position(|(id, _)| *id == terminal_id) {
                let (id, rx) = attached.remove(index);
                state.registry.detach(id, rx).await;
            }
            session.mark_detached(terminal_id);
            true
        }
        ClientFrame::TerminalInput { terminal_id, data } => {
            let Ok(decoded) = BASE64.decode(&data) else {
                return send_frame(ws_tx, &error_frame(ErrorCode::InvalidMessage, "invalid base64 input")).await.is_ok();
            };
            match state.registry.input(terminal_id, Bytes::from(decoded)).await {
                Ok(()) => true,
                Err(_) => {
                    send_frame(ws_tx, &error_frame(ErrorCode::InvalidTerminalId, "unknown terminal"))
                        .await
                        .is_ok()
                }
            }
        }
        ClientFrame::TerminalResize { terminal_id, cols, rows } => {
            match state.registry.resize(terminal_id, cols, rows).await {
                Ok(()) => true,
                Err(_) => {
                    send_frame(ws_tx, &error_frame(ErrorCode::InvalidTerminalId, "unknown terminal"))
                        .await
                        .is_ok()
                }
            }
        }
        ClientFrame::TerminalKill { terminal_id } => {
            if !session.owns(terminal_id) {
                return send_frame(ws_tx, &error_frame(ErrorCode::Unauthorized, "not the owner")).await.is_ok();
            }
            match state.registry.kill(terminal_id).await {
                Ok(()) => {
                    state.publish_terminal_list().await;
                    true
                }
                Err(_) => {
                    send_frame(ws_tx, &error_frame(ErrorCode::InvalidTerminalId, "unknown terminal"))
                        .await
                        .is_ok()
                }
            }
        }
        ClientFrame::TerminalList { request_id } => {
            let terminals = state.registry.list().await;
            send_frame(ws_tx, &ServerFrame::TerminalListResponse { request_id, terminals }).await.is_ok()
        }
        ClientFrame::TerminalMetaList { request_id } => {
            let modes = vec!["shell", "claude", "codex", "opencode", "gemini", "kimi"];
            send_frame(ws_tx, &ServerFrame::TerminalMetaListResponse { request_id, modes }).await.is_ok()
        }

        ClientFrame::TabCreate { request_id, title, content } => {
            let (tab_id, pane_id) = {
                let mut layout = state.layout.write().await;
                layout.create_tab(title, content.unwrap_or(Content::Picker))
            };
            state.publish_layout().await;
            send_frame(ws_tx, &ServerFrame::TabCreated { request_id, tab_id, pane_id }).await.is_ok()
        }
        ClientFrame::TabSelect { tab_id } => apply_layout_op(state, ws_tx, |l| l.select_tab(tab_id)).await,
        ClientFrame::TabRename { tab_id, name } => {
            apply_layout_op(state, ws_tx, |l| l.rename_tab(tab_id, name)).await
        }
        ClientFrame::TabClose { tab_id } => apply_layout_op(state, ws_tx, |l| l.close_tab(tab_id)).await,
        ClientFrame::PaneSplit { request_id, pane_id, direction, content, sizes } => {
            let result = state.layout.write().await.split_pane(pane_id, direction, content, sizes);
            match result {
                Ok(new_pane_id) => {
                    state.publish_layout().await;
                    send_frame(ws_tx, &ServerFrame::PaneSplitResponse { request_id, pane_id: new_pane_id })
                        .await
                        .is_ok()
                }
                Err(_) => {
                    send_frame(ws_tx, &error_frame_for(ErrorCode::InvalidMessage, "unknown pane", request_id))
                        .await
                        .is_ok()
                }
            }
        }
        ClientFrame::PaneClose { pane_id } => apply_layout_op(state, ws_tx, |l| l.close_pane(pane_id)).await,
        ClientFrame::PaneResize { tab_id, split_or_pane_id, sizes } => {
            apply_layout_op(state, ws_tx, |l| l.resize_pane(tab_id, split_or_pane_id, sizes)).await
        }
        ClientFrame::PaneSwap { tab_id, pane_id, other_id } => {
            apply_layout_op(state, ws_tx, |l| l.swap_pane(tab_id, pane_id, other_id)).await
        }
        ClientFrame::PaneAttachContent { tab_id, pane_id, content } => {
            apply_layout_op(state, ws_tx, |l| l.attach_pane_content(tab_id, pane_id, content)).await
        }
        ClientFrame::TargetResolve { request_id, raw } => {
            let layout = state.layout.read().await;
            let target = resolve_target(&layout, &raw);
            drop(layout);
            send_frame(ws_tx, &ServerFrame::TargetResolved { request_id, target }).await.is_ok()
        }
    }
}

/// Apply a layout mutation with no meaningful return value: on success,
/// broadcast the converged `ui.command`; on failure, report the error
/// inline (no `requestId` to correlate against, per the operation's
/// signature).
async fn apply_layout_op<F>(state: &Arc<AppState>, ws_tx: &mut (impl SinkExt<Message> + Unpin), op: F) -> bool
where
    F: FnOnce(&mut crate::layout::Layout) -> Result<(), crate::layout::Error>,
{
    let result = {
        let mut layout = state.layout.write().await;
        op(&mut layout)
    };
    match result {
        Ok(()) => {
            state.publish_layout().await;
            true
        }
        Err(_) => send_frame(ws_tx, &error_frame(ErrorCode::InvalidMessage, "invalid layout operation")).await.is_ok(),
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_terminal_create(
    state: &Arc<AppState>,
    session: &mut Session,
    ws_tx: &mut (impl SinkExt<Message> + Unpin),
    request_id: String,
    mode: Mode,
    shell: crate::terminal::Shell,
    cwd: Option<String>,
    cols: Option<u16>,
    rows: Option<u16>,
    restore: bool,
) -> bool {
    match session.begin_create(&request_id, restore) {
        CreateDecision::Replay(terminal_id) => {
            send_frame(ws_tx, &ServerFrame::TerminalCreated { request_id, terminal_id }).await.is_ok()
        }
        CreateDecision::RateLimited => {
            send_frame(ws_tx, &error_frame_for(ErrorCode::RateLimited, "rate limit exceeded", request_id))
                .await
                .is_ok()
        }
        CreateDecision::Proceed => {
            let cwd = cwd.map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
            let result = state
                .registry
                .create(mode, shell, cwd, cols.unwrap_or(DEFAULT_COLS), rows.unwrap_or(DEFAULT_ROWS))
                .await;
            match result {
                Ok(terminal_id) => {
                    session.complete_create(&request_id, terminal_id);
                    state.publish_terminal_list().await;
                    send_frame(ws_tx, &ServerFrame::TerminalCreated { request_id, terminal_id }).await.is_ok()
                }
                Err(_) => {
                    send_frame(ws_tx, &error_frame_for(ErrorCode::SpawnFailed, "failed to spawn terminal", request_id))
                        .await
                        .is_ok()
                }
            }
        }
    }
}

async fn handle_terminal_attach(
    state: &Arc<AppState>,
    session: &mut Session,
    attached: &mut Vec<(TerminalId, broadcast::Receiver<Event>)>,
    outbound: &mut VecDeque<ServerFrame>,
    ws_tx: &mut (impl SinkExt<Message> + Unpin),
    terminal_id: TerminalId,
    since_sequence: Option<u64>,
) -> bool {
    if let Some(since) = since_sequence {
        if let Ok(Some((catch_up, rx))) = state.registry.attach_since(terminal_id, since).await {
            attached.push((terminal_id, rx));
            session.mark_attached(terminal_id);
            let frame = ServerFrame::Output {
                terminal_id,
                data: BASE64.encode(&catch_up.data),
                sequence_number: catch_up.sequence,
            };
            return send_frame(ws_tx, &frame).await.is_ok();
        }
    }

    match state.registry.attach(terminal_id).await {
        Ok((snapshot, rx)) => {
            attached.push((terminal_id, rx));
            session.mark_attached(terminal_id);
            let max_chunk_bytes = state.config.max_ws_chunk_bytes;
            let frames =
                build_snapshot_frames(terminal_id, &snapshot.data, snapshot.sequence, max_chunk_bytes);
            let total_chunks = frames.len().saturating_sub(2) as u32;
            session.begin_pending_attach(terminal_id, PendingAttach::new(total_chunks, snapshot.sequence));
            // Queued, not sent inline: the connection loop drains this one
            // frame at a time so a live event for this terminal (or any
            // other) still gets routed — through `pending.route()` — while
            // the snapshot is still going out.
            outbound.extend(frames);
            true
        }
        Err(_) => {
            send_frame(ws_tx, &error_frame(ErrorCode::InvalidTerminalId, "unknown terminal")).await.is_ok()
        }
    }
}

async fn send_frame(ws_tx: &mut (impl SinkExt<Message> + Unpin), frame: &ServerFrame) -> Result<(), ()> {
    let text = serde_json::to_string(frame).map_err(|_| ())?;
    ws_tx.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn close_with(ws_tx: &mut (impl SinkExt<Message> + Unpin), code: u16) {
    let _ = ws_tx
        .send(Message::Close(Some(axum::extract::ws::CloseFrame {
            code,
            reason: String::new().into(),
        })))
        .await;
}

fn pong() -> ServerFrame {
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
    ServerFrame::Pong { timestamp }
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
