//! Session (C3): the per-connection state machine
//! `CONNECTING → HELLO_SENT → IDENTIFYING → ACTIVE → CLOSING → TERMINATED`.
//!
//! A split-socket design: a reader task (one opcode dispatch per inbound
//! frame, heartbeat-tolerance deadline) and a writer task (per-session
//! sequence numbers, single cancel signal) race each other via
//! `tokio::select!` instead of sharing one forwarding loop.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use uuid::Uuid;

use crate::auth;
use crate::handlers;
use crate::models::{IdentifyPayload, PresenceStatus};
use crate::protocol::{self, close_code, opcode, parse_payload, DecodeError, EventTag, Envelope};
use crate::state::AppState;

/// Everything a handler needs to know about the connection it's acting on.
/// Deliberately thin — the Hub and Store hold the rest of the world.
pub struct LiveSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub server_ids: Vec<Uuid>,
}

/// Drive one WebSocket connection end to end. Entered from the gateway
/// upgrade route; returns once the socket is fully closed and cleaned up.
pub async fn run(socket: WebSocket, state: AppState) {
    let mut socket = socket;

    if send_raw(&mut socket, Envelope::hello(state.config.session.heartbeat_interval_ms)).await.is_err() {
        return;
    }

    let identify_timeout = Duration::from_millis(state.config.session.identify_timeout_ms);
    let live = match tokio::time::timeout(identify_timeout, await_identify(&mut socket, &state)).await {
        Ok(Ok(live)) => live,
        Ok(Err(code)) => {
            close_with(&mut socket, code).await;
            return;
        }
        Err(_elapsed) => {
            close_with(&mut socket, close_code::NOT_AUTHENTICATED).await;
            return;
        }
    };

    let (tx, rx) = mpsc::channel::<Envelope>(state.config.session.outbound_queue_cap);
    let (cancel_tx, cancel_rx) = watch::channel::<Option<u16>>(None);

    let channel_ids = subscribed_channel_ids(&state, &live.server_ids).await;
    state.hub.register(live.id, live.user_id, &live.server_ids, &channel_ids, tx.clone(), cancel_tx.clone());

    state.presence.set_status(live.user_id, PresenceStatus::Online);
    let _ = state.db.users_update_status(live.user_id, PresenceStatus::Online, None).await;

    send_ready_sequence(&tx, &state, &live).await;
    state.hub.broadcast_presence(
        &live.server_ids,
        EventTag::PRESENCE_UPDATE,
        serde_json::json!({ "user_id": live.user_id, "status": "online" }),
    );

    let (ws_tx, ws_rx) = socket.split();
    let session_id = live.id;
    let user_id = live.user_id;
    let server_ids = live.server_ids.clone();
    let writer =
        tokio::spawn(run_writer(ws_tx, rx, cancel_rx, state.config.session.writer_drain_ms, session_id, user_id));

    let reader_state = state.clone();
    let reader_cancel = cancel_tx.clone();
    let reader = tokio::spawn(run_reader(ws_rx, reader_state, live, tx, reader_cancel));

    let _ = tokio::join!(writer, reader);

    cleanup(&state, session_id, user_id, &server_ids, &channel_ids).await;
}

/// Block until an Identify frame arrives on the not-yet-split socket, or a
/// protocol violation closes the handshake early.
async fn await_identify(socket: &mut WebSocket, state: &AppState) -> Result<LiveSession, u16> {
    loop {
        let Some(msg) = socket.recv().await else {
            return Err(close_code::NOT_AUTHENTICATED);
        };
        let msg = msg.map_err(|_| close_code::DECODE_ERROR)?;
        let text = match msg {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => return Err(close_code::NORMAL),
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Binary(_) => continue,
        };

        let envelope = Envelope::decode(&text).map_err(|e| e.close_code())?;
        if envelope.op != opcode::IDENTIFY {
            if envelope.op == opcode::HEARTBEAT {
                continue;
            }
            return Err(close_code::NOT_AUTHENTICATED);
        }

        let payload: IdentifyPayload = parse_payload(&envelope.d).map_err(|e| e.close_code())?;
        let user_id = auth::resolve(state.db.as_ref(), &payload.token).await.map_err(|_| close_code::AUTH_FAILED)?;
        let server_ids = state
            .db
            .servers_list_for_user(user_id)
            .await
            .map_err(|_| close_code::UNKNOWN)?
            .into_iter()
            .map(|s| s.id)
            .collect();

        return Ok(LiveSession { id: Uuid::new_v4(), user_id, server_ids });
    }
}

async fn subscribed_channel_ids(state: &AppState, server_ids: &[Uuid]) -> Vec<Uuid> {
    let mut channel_ids = Vec::new();
    for server_id in server_ids {
        if let Ok(channels) = state.db.channels_list_for_server(*server_id).await {
            channel_ids.extend(channels.into_iter().map(|c| c.id));
        }
    }
    channel_ids
}

/// READY (op=13, no sequence) followed by one SERVER_CREATE dispatch per
/// server the session belongs to — mirrors the per-guild snapshot a client
/// needs to render its sidebar without a second round trip.
async fn send_ready_sequence(tx: &mpsc::Sender<Envelope>, state: &AppState, live: &LiveSession) {
    let user = state
        .db
        .users_find_by_id(live.user_id)
        .await
        .ok()
        .flatten()
        .map(crate::models::UserPublic::from);

    let ready = Envelope::new(
        opcode::READY,
        serde_json::json!({
            "session_id": live.id,
            "user": user,
            "servers": live.server_ids,
        }),
    );
    let _ = tx.send(ready).await;

    for server_id in &live.server_ids {
        if let Some(payload) = build_server_create(state, *server_id).await {
            let event = serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null);
            let _ = tx.send(Envelope::dispatch(0, EventTag::SERVER_CREATE, event)).await;
        }
    }
}

/// Assemble the full per-server snapshot: the server, its channels, its
/// members (with role_ids already populated), its roles, and the distinct set
/// of users referenced by those members.
async fn build_server_create(state: &AppState, server_id: Uuid) -> Option<crate::models::ServerCreatePayload> {
    let server = state.db.servers_find_by_id(server_id).await.ok()??;
    let channels = state.db.channels_list_for_server(server_id).await.unwrap_or_default();
    let members = state.db.members_list_for_server(server_id).await.unwrap_or_default();
    let roles = state.db.roles_list_for_server(server_id).await.unwrap_or_default();

    let member_user_ids: Vec<Uuid> = members.iter().map(|m| m.user_id).collect();
    let users = state
        .db
        .users_find_by_ids(&member_user_ids)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(crate::models::UserPublic::from)
        .collect();

    Some(crate::models::ServerCreatePayload { server, channels, members, roles, users })
}

/// Writer half: dequeues outbound envelopes, stamps sequence numbers on
/// dispatch frames, and races the cancel signal to emit a close frame.
/// Drains up to `drain_ms` of queued traffic before closing so a kicked
/// session still sees the SERVER_MEMBER_REMOVE that preceded its own close.
async fn run_writer(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<Envelope>,
    mut cancel_rx: watch::Receiver<Option<u16>>,
    drain_ms: u64,
    session_id: Uuid,
    user_id: Uuid,
) {
    let mut seq: u64 = 0;

    loop {
        tokio::select! {
            biased;
            changed = cancel_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(code) = *cancel_rx.borrow() else { continue };
                drain_then_close(&mut ws_tx, &mut rx, &mut seq, code, drain_ms, session_id, user_id).await;
                return;
            }
            received = rx.recv() => {
                match received {
                    Some(mut envelope) => {
                        stamp_sequence(&mut envelope, &mut seq);
                        if send_raw(&mut ws_tx, envelope).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                }
            }
        }
    }
}

async fn drain_then_close(
    ws_tx: &mut SplitSink<WebSocket, WsMessage>,
    rx: &mut mpsc::Receiver<Envelope>,
    seq: &mut u64,
    code: u16,
    drain_ms: u64,
    session_id: Uuid,
    user_id: Uuid,
) {
    let deadline = Instant::now() + Duration::from_millis(drain_ms);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some(mut envelope)) => {
                stamp_sequence(&mut envelope, seq);
                if send_raw(ws_tx, envelope).await.is_err() {
                    break;
                }
            }
            _ => break,
        }
    }

    let _ = ws_tx
        .send(WsMessage::Close(Some(CloseFrame {
            code,
            reason: std::borrow::Cow::Borrowed(""),
        })))
        .await;

    log_session_closed(Some(session_id), Some(user_id), code);
}

/// §7: every terminal close records session_id, user_id, close code, reason.
/// Single logging site for both the post-identify path (`drain_then_close`)
/// and the pre-identify path (`close_with`), rather than a log line at every
/// place a close code is decided.
fn log_session_closed(session_id: Option<Uuid>, user_id: Option<Uuid>, code: u16) {
    tracing::info!(
        session_id = ?session_id,
        user_id = ?user_id,
        close_code = code,
        reason = close_reason(code),
        "session closed"
    );
}

fn close_reason(code: u16) -> &'static str {
    match code {
        close_code::NORMAL => "normal",
        close_code::GOING_AWAY => "going_away",
        close_code::UNKNOWN => "unknown",
        close_code::UNKNOWN_OPCODE => "unknown_opcode",
        close_code::DECODE_ERROR => "decode_error",
        close_code::NOT_AUTHENTICATED => "not_authenticated",
        close_code::AUTH_FAILED => "auth_failed",
        close_code::ALREADY_AUTHENTICATED => "already_authenticated",
        close_code::RATE_LIMITED => "rate_limited",
        close_code::SESSION_TIMEOUT => "session_timeout",
        _ => "other",
    }
}

fn stamp_sequence(envelope: &mut Envelope, seq: &mut u64) {
    if envelope.op == opcode::DISPATCH {
        *seq += 1;
        envelope.s = Some(*seq);
    }
}

/// Reader half: decodes inbound frames, enforces the heartbeat tolerance
/// deadline, and dispatches to the matching handler. Handler errors become
/// in-band `err` frames — the session stays open; only decode/opcode/timeout
/// failures are terminal.
async fn run_reader(
    mut ws_rx: SplitStream<WebSocket>,
    state: AppState,
    live: LiveSession,
    tx: mpsc::Sender<Envelope>,
    cancel_tx: watch::Sender<Option<u16>>,
) {
    let tolerance_ms =
        (state.config.session.heartbeat_interval_ms as f64 * state.config.session.heartbeat_tolerance) as u64;
    let mut deadline = Instant::now() + Duration::from_millis(tolerance_ms);

    loop {
        tokio::select! {
            biased;
            _ = tokio::time::sleep_until(deadline) => {
                let _ = cancel_tx.send(Some(close_code::SESSION_TIMEOUT));
                return;
            }
            msg = ws_rx.next() => {
                let Some(msg) = msg else {
                    let _ = cancel_tx.send(Some(close_code::NORMAL));
                    return;
                };
                let Ok(msg) = msg else {
                    let _ = cancel_tx.send(Some(close_code::DECODE_ERROR));
                    return;
                };

                let text = match msg {
                    WsMessage::Text(text) => text,
                    WsMessage::Close(_) => {
                        let _ = cancel_tx.send(Some(close_code::NORMAL));
                        return;
                    }
                    WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Binary(_) => {
                        continue;
                    }
                };

                match handle_frame(&text, &state, &live, &tx).await {
                    Ok(true) => {
                        deadline = Instant::now() + Duration::from_millis(tolerance_ms);
                    }
                    Ok(false) => {}
                    Err(code) => {
                        let _ = cancel_tx.send(Some(code));
                        return;
                    }
                }
            }
        }
    }
}

/// Decode and dispatch one inbound frame. Returns `Err(close_code)` only for
/// terminal protocol violations; handler-level failures are sent in-band and
/// return `Ok(_)` so the reader keeps going. The `bool` tells the reader
/// whether this frame was a heartbeat — only a heartbeat refreshes the
/// heartbeat-tolerance deadline (§4.3); every other opcode advances toward it.
async fn handle_frame(
    text: &str,
    state: &AppState,
    live: &LiveSession,
    tx: &mpsc::Sender<Envelope>,
) -> Result<bool, u16> {
    let envelope = Envelope::decode(text).map_err(|e: DecodeError| e.close_code())?;

    if envelope.op == opcode::HEARTBEAT {
        let _ = tx.send(Envelope::heartbeat_ack()).await;
        return Ok(true);
    }
    if envelope.op == opcode::IDENTIFY {
        return Err(close_code::ALREADY_AUTHENTICATED);
    }
    if !protocol::is_known_client_opcode(envelope.op) {
        return Err(close_code::UNKNOWN_OPCODE);
    }

    let result = match envelope.op {
        opcode::SEND_MESSAGE => handlers::send_message(state, live, &envelope.d).await,
        opcode::REQUEST_MESSAGES => handlers::request_messages(state, live, &envelope.d).await,
        opcode::CHANNEL_CREATE => handlers::channel_create(state, live, &envelope.d).await,
        opcode::CHANNEL_UPDATE => handlers::channel_update(state, live, &envelope.d).await,
        opcode::CHANNEL_DELETE => handlers::channel_delete(state, live, &envelope.d).await,
        opcode::ROLE_ASSIGN => handlers::role_assign(state, live, &envelope.d).await,
        opcode::ROLE_REMOVE => handlers::role_remove(state, live, &envelope.d).await,
        opcode::KICK => handlers::kick(state, live, &envelope.d).await,
        opcode::BAN => handlers::ban(state, live, &envelope.d).await,
        opcode::MUTE => handlers::mute(state, live, &envelope.d).await,
        opcode::PRESENCE_UPDATE => handlers::presence_update(state, live, &envelope.d).await,
        opcode::TYPING_START => handlers::typing_start(state, live, &envelope.d).await,
        opcode::WHISPER => handlers::whisper(state, live, &envelope.d).await,
        // request_guild and voice_state_update are accepted opcodes with no
        // handler yet: request_guild has no corresponding payload/response in
        // the wire contract beyond what READY/SERVER_CREATE already cover,
        // and voice is reserved only.
        opcode::REQUEST_GUILD | opcode::VOICE_STATE_UPDATE => Ok(()),
        _ => unreachable!("is_known_client_opcode already filtered this set"),
    };

    if let Err(err) = result {
        state.hub.record_gateway_error();
        let _ = tx.send(err.into_envelope()).await;
    }
    Ok(false)
}

async fn cleanup(state: &AppState, session_id: Uuid, user_id: Uuid, server_ids: &[Uuid], channel_ids: &[Uuid]) {
    state.hub.unregister(session_id, user_id, server_ids, channel_ids);

    if !state.hub.is_online(user_id) {
        state.presence.set_offline(&user_id);
        let _ = state.db.users_update_status(user_id, PresenceStatus::Offline, None).await;
        state.hub.broadcast_presence(
            server_ids,
            EventTag::PRESENCE_UPDATE,
            serde_json::json!({ "user_id": user_id, "status": "offline" }),
        );
    }
}

async fn send_raw<S>(sink: &mut S, envelope: Envelope) -> Result<(), axum::Error>
where
    S: futures_util::Sink<WsMessage, Error = axum::Error> + Unpin,
{
    sink.send(WsMessage::Text(envelope.encode())).await
}

async fn close_with(socket: &mut WebSocket, code: u16) {
    let _ = socket
        .send(WsMessage::Close(Some(CloseFrame {
            code,
            reason: std::borrow::Cow::Borrowed(""),
        })))
        .await;

    log_session_closed(None, None, code);
}
