//! Handlers (C5): one function per client opcode, each enforcing the
//! authentication → validation → authorization → state change → broadcast
//! discipline from §4.5. Every mutation re-checks permissions right before
//! the write, persists atomically, then broadcasts.

use uuid::Uuid;

use crate::chat;
use crate::error::{GatewayError, GatewayResult};
use crate::models::{
    BanPayload, ChannelType, CreateChannelRequest, DeleteChannelRequest,
    KickPayload, MutePayload, PresenceUpdatePayload, RequestMessagesPayload, RoleAssignPayload,
    SendMessagePayload, TypingStartPayload, UpdateChannelRequest, WhisperPayload,
    DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT,
};
use crate::permissions::{self, Permissions};
use crate::protocol::{parse_payload, close_code, EventTag};
use crate::session::LiveSession;
use crate::state::AppState;
use crate::store::Store;

/// Assemble the effective permission mask for `user_id` on `channel_id`,
/// fetching everything the Permission Engine needs from the Store. The
/// engine itself stays pure (see `permissions::effective`).
async fn effective_permissions(
    store: &dyn Store,
    server_id: Uuid,
    channel_id: Uuid,
    user_id: Uuid,
) -> GatewayResult<Permissions> {
    let server = store
        .servers_find_by_id(server_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound("server not found".into()))?;
    let member = store
        .members_find(user_id, server_id)
        .await?
        .ok_or_else(|| GatewayError::Forbidden("not a member of this server".into()))?;
    let everyone = store.roles_default_role(server_id).await?;
    let member_roles = store.roles_for_member(user_id, server_id).await?;
    let overwrites = store.overwrites_list_for_channel(channel_id).await?;

    let ctx = permissions::PermissionContext {
        owner_id: server.owner_id,
        everyone_role: &everyone,
        member_roles: &member_roles,
        overwrites: &overwrites,
    };
    Ok(permissions::effective(&member, &ctx))
}

fn require(mask: Permissions, bits: Permissions, what: &str) -> GatewayResult<()> {
    if mask.contains(bits) {
        Ok(())
    } else {
        Err(GatewayError::Forbidden(format!("missing required permission for {what}")))
    }
}

/// Validate a prospective `category_id` for a channel being created or moved
/// into it: §3 requires the target to be a category channel on the same
/// server, and categories do not nest, so a category itself may never carry
/// a `category_id`.
async fn validate_category_id(
    store: &dyn Store,
    server_id: Uuid,
    channel_type: ChannelType,
    category_id: Option<Uuid>,
) -> GatewayResult<()> {
    let Some(category_id) = category_id else {
        return Ok(());
    };
    if channel_type == ChannelType::Category {
        return Err(GatewayError::Validation("categories do not nest".into()));
    }
    let category = store
        .channels_find_by_id(category_id)
        .await?
        .ok_or_else(|| GatewayError::Validation("category_id does not reference a channel".into()))?;
    if category.channel_type != ChannelType::Category {
        return Err(GatewayError::Validation("category_id must reference a category channel".into()));
    }
    if category.server_id != Some(server_id) {
        return Err(GatewayError::Validation("category_id must reference a channel on the same server".into()));
    }
    Ok(())
}

// ─── send_message ───────────────────────────────────────────────────────────

pub async fn send_message(state: &AppState, session: &LiveSession, raw: &serde_json::Value) -> GatewayResult<()> {
    let payload: SendMessagePayload = parse_payload(raw).map_err(|e| GatewayError::Validation(e.to_string()))?;

    let channel = state
        .db
        .channels_find_by_id(payload.channel_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound("channel not found".into()))?;
    let server_id = channel
        .server_id
        .ok_or_else(|| GatewayError::Validation("channel has no server".into()))?;

    let mask = effective_permissions(state.db.as_ref(), server_id, payload.channel_id, session.user_id).await?;
    require(mask, Permissions::VIEW_CHANNELS | Permissions::SEND_MESSAGES, "send_message")?;

    let sanitized = chat::sanitize_content(&payload.content);
    chat::validate_message(&sanitized)?;
    let mentions = chat::parse_mentions(&sanitized);

    let id = Uuid::now_v7();
    let message = state
        .db
        .messages_create(id, payload.channel_id, session.user_id, &sanitized, payload.reply_to_id, &mentions)
        .await?;

    state.typing.cancel(payload.channel_id, session.user_id);

    let event = serde_json::to_value(&message).map_err(|e| GatewayError::Internal(e.into()))?;
    state.hub.broadcast_channel(payload.channel_id, EventTag::MESSAGE_CREATE, event, None);
    Ok(())
}

// ─── request_messages ───────────────────────────────────────────────────────

pub async fn request_messages(state: &AppState, session: &LiveSession, raw: &serde_json::Value) -> GatewayResult<()> {
    let payload: RequestMessagesPayload =
        parse_payload(raw).map_err(|e| GatewayError::Validation(e.to_string()))?;

    let channel = state
        .db
        .channels_find_by_id(payload.channel_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound("channel not found".into()))?;
    let server_id = channel
        .server_id
        .ok_or_else(|| GatewayError::Validation("channel has no server".into()))?;

    let mask = effective_permissions(state.db.as_ref(), server_id, payload.channel_id, session.user_id).await?;
    require(mask, Permissions::VIEW_CHANNELS | Permissions::READ_MESSAGE_HISTORY, "request_messages")?;

    let limit = payload.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
    let messages = state.db.messages_list_for_channel(payload.channel_id, payload.before, limit).await?;
    let has_more = messages.len() as i64 == limit;

    let history = crate::models::MessagesHistoryPayload {
        channel_id: payload.channel_id,
        messages,
        has_more,
    };
    let event = serde_json::to_value(&history).map_err(|e| GatewayError::Internal(e.into()))?;
    state.hub.send_to_session(session.id, EventTag::MESSAGES_HISTORY, event);
    Ok(())
}

// ─── channel_create / update / delete ──────────────────────────────────────

pub async fn channel_create(state: &AppState, session: &LiveSession, raw: &serde_json::Value) -> GatewayResult<()> {
    let payload: CreateChannelRequest = parse_payload(raw).map_err(|e| GatewayError::Validation(e.to_string()))?;
    if payload.name.trim().is_empty() {
        return Err(GatewayError::Validation("channel name cannot be empty".into()));
    }
    if !session.server_ids.contains(&payload.server_id) {
        return Err(GatewayError::Forbidden("not a member of this server".into()));
    }

    let default_channel = state
        .db
        .servers_find_by_id(payload.server_id)
        .await?
        .and_then(|s| s.default_channel_id)
        .unwrap_or(payload.server_id);
    let mask = effective_permissions(state.db.as_ref(), payload.server_id, default_channel, session.user_id).await?;
    require(mask, Permissions::MANAGE_CHANNELS, "channel_create")?;

    validate_category_id(state.db.as_ref(), payload.server_id, payload.channel_type, payload.category_id).await?;

    let existing = state.db.channels_list_for_server(payload.server_id).await?;
    let position = existing.len() as i32;
    let channel = state
        .db
        .channels_create(
            Uuid::new_v4(),
            Some(payload.server_id),
            &payload.name,
            payload.topic.as_deref(),
            payload.channel_type,
            position,
            payload.category_id,
        )
        .await?;

    // Every session already in this server is implicitly subscribed to every
    // text channel of it (§4.4) — not just the session that created this one.
    for session_id in state.hub.sessions_for_server(payload.server_id) {
        state.hub.subscribe_channel(channel.id, session_id);
    }
    let event = serde_json::to_value(&channel).map_err(|e| GatewayError::Internal(e.into()))?;
    state.hub.broadcast_server(payload.server_id, EventTag::CHANNEL_CREATE, event, None);
    Ok(())
}

pub async fn channel_update(state: &AppState, session: &LiveSession, raw: &serde_json::Value) -> GatewayResult<()> {
    let payload: UpdateChannelRequest = parse_payload(raw).map_err(|e| GatewayError::Validation(e.to_string()))?;

    let channel = state
        .db
        .channels_find_by_id(payload.channel_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound("channel not found".into()))?;
    let server_id = channel
        .server_id
        .ok_or_else(|| GatewayError::Validation("channel has no server".into()))?;

    let mask = effective_permissions(state.db.as_ref(), server_id, payload.channel_id, session.user_id).await?;
    require(mask, Permissions::MANAGE_CHANNELS, "channel_update")?;
    validate_category_id(state.db.as_ref(), server_id, channel.channel_type, payload.category_id).await?;

    let updated = state
        .db
        .channels_update(payload.channel_id, payload.name.as_deref(), payload.topic.as_deref(), payload.position, payload.category_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound("channel not found".into()))?;

    let event = serde_json::to_value(&updated).map_err(|e| GatewayError::Internal(e.into()))?;
    state.hub.broadcast_server(server_id, EventTag::CHANNEL_UPDATE, event, None);
    Ok(())
}

pub async fn channel_delete(state: &AppState, _session: &LiveSession, raw: &serde_json::Value) -> GatewayResult<()> {
    let payload: DeleteChannelRequest = parse_payload(raw).map_err(|e| GatewayError::Validation(e.to_string()))?;

    let channel = state
        .db
        .channels_find_by_id(payload.channel_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound("channel not found".into()))?;
    let server_id = channel
        .server_id
        .ok_or_else(|| GatewayError::Validation("channel has no server".into()))?;

    let mask = effective_permissions(state.db.as_ref(), server_id, payload.channel_id, _session.user_id).await?;
    require(mask, Permissions::MANAGE_CHANNELS, "channel_delete")?;

    state.db.channels_delete(payload.channel_id).await?;

    let event = serde_json::json!({ "channel_id": payload.channel_id });
    state.hub.broadcast_server(server_id, EventTag::CHANNEL_DELETE, event, None);
    state.hub.drop_channel(payload.channel_id);
    Ok(())
}

// ─── role_assign / role_remove ──────────────────────────────────────────────

pub async fn role_assign(state: &AppState, session: &LiveSession, raw: &serde_json::Value) -> GatewayResult<()> {
    assign_or_remove_role(state, session, raw, true).await
}

pub async fn role_remove(state: &AppState, session: &LiveSession, raw: &serde_json::Value) -> GatewayResult<()> {
    assign_or_remove_role(state, session, raw, false).await
}

async fn assign_or_remove_role(
    state: &AppState,
    session: &LiveSession,
    raw: &serde_json::Value,
    assign: bool,
) -> GatewayResult<()> {
    let payload: RoleAssignPayload = parse_payload(raw).map_err(|e| GatewayError::Validation(e.to_string()))?;

    let server = state
        .db
        .servers_find_by_id(payload.server_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound("server not found".into()))?;
    let default_channel = server.default_channel_id.unwrap_or(payload.server_id);

    let mask = effective_permissions(state.db.as_ref(), payload.server_id, default_channel, session.user_id).await?;
    require(mask, Permissions::MANAGE_ROLES, "role_assign")?;

    let target_role = state
        .db
        .roles_find_by_id(payload.role_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound("role not found".into()))?;
    let assigner_roles = state.db.roles_for_member(session.user_id, payload.server_id).await?;
    let assigner_top_position = assigner_roles.iter().map(|r| r.position).max().unwrap_or(0);
    if assigner_top_position <= target_role.position && server.owner_id != session.user_id {
        return Err(GatewayError::Forbidden(
            "assigner's highest role must exceed the target role's position".into(),
        ));
    }

    if assign {
        state.db.roles_add_member_role(payload.user_id, payload.server_id, payload.role_id).await?;
    } else {
        state.db.roles_remove_member_role(payload.user_id, payload.server_id, payload.role_id).await?;
    }

    let event = serde_json::json!({
        "server_id": payload.server_id,
        "user_id": payload.user_id,
        "role_id": payload.role_id,
    });
    state.hub.broadcast_server(payload.server_id, EventTag::SERVER_MEMBER_UPDATE, event, None);
    Ok(())
}

// ─── kick / ban / mute ──────────────────────────────────────────────────────

pub async fn kick(state: &AppState, session: &LiveSession, raw: &serde_json::Value) -> GatewayResult<()> {
    let payload: KickPayload = parse_payload(raw).map_err(|e| GatewayError::Validation(e.to_string()))?;

    let server = state
        .db
        .servers_find_by_id(payload.server_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound("server not found".into()))?;
    if server.owner_id == payload.user_id {
        return Err(GatewayError::Forbidden("the server owner cannot be kicked".into()));
    }

    let default_channel = server.default_channel_id.unwrap_or(payload.server_id);
    let mask = effective_permissions(state.db.as_ref(), payload.server_id, default_channel, session.user_id).await?;
    require(mask, Permissions::KICK_MEMBERS, "kick")?;

    state.db.members_remove(payload.user_id, payload.server_id).await?;

    let event = serde_json::json!({ "server_id": payload.server_id, "user_id": payload.user_id });
    state.hub.broadcast_server(payload.server_id, EventTag::SERVER_MEMBER_REMOVE, event, None);
    state.hub.close_sessions_in_server(payload.user_id, payload.server_id, close_code::GOING_AWAY);
    Ok(())
}

pub async fn ban(state: &AppState, session: &LiveSession, raw: &serde_json::Value) -> GatewayResult<()> {
    let payload: BanPayload = parse_payload(raw).map_err(|e| GatewayError::Validation(e.to_string()))?;

    let server = state
        .db
        .servers_find_by_id(payload.server_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound("server not found".into()))?;
    if server.owner_id == payload.user_id {
        return Err(GatewayError::Forbidden("the server owner cannot be banned".into()));
    }

    let default_channel = server.default_channel_id.unwrap_or(payload.server_id);
    let mask = effective_permissions(state.db.as_ref(), payload.server_id, default_channel, session.user_id).await?;
    require(mask, Permissions::BAN_MEMBERS, "ban")?;

    // Ban row + membership removal happen as one Store operation so a crash
    // between the two never leaves one without the other.
    state
        .db
        .bans_ban_member(payload.server_id, payload.user_id, payload.reason.as_deref(), session.user_id)
        .await?;

    let event = serde_json::json!({ "server_id": payload.server_id, "user_id": payload.user_id });
    state.hub.broadcast_server(payload.server_id, EventTag::SERVER_MEMBER_REMOVE, event, None);
    state.hub.close_sessions_in_server(payload.user_id, payload.server_id, close_code::GOING_AWAY);
    Ok(())
}

pub async fn mute(state: &AppState, session: &LiveSession, raw: &serde_json::Value) -> GatewayResult<()> {
    let payload: MutePayload = parse_payload(raw).map_err(|e| GatewayError::Validation(e.to_string()))?;

    let server = state
        .db
        .servers_find_by_id(payload.server_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound("server not found".into()))?;
    let default_channel = server.default_channel_id.unwrap_or(payload.server_id);
    let mask = effective_permissions(state.db.as_ref(), payload.server_id, default_channel, session.user_id).await?;
    require(mask, Permissions::MUTE_MEMBERS, "mute")?;

    state.db.members_set_muted(payload.user_id, payload.server_id, payload.muted).await?;

    let event = serde_json::json!({
        "server_id": payload.server_id,
        "user_id": payload.user_id,
        "is_muted": payload.muted,
    });
    state.hub.broadcast_server(payload.server_id, EventTag::SERVER_MEMBER_UPDATE, event, None);
    Ok(())
}

// ─── presence_update / typing_start / whisper ──────────────────────────────

pub async fn presence_update(state: &AppState, session: &LiveSession, raw: &serde_json::Value) -> GatewayResult<()> {
    let payload: PresenceUpdatePayload = parse_payload(raw).map_err(|e| GatewayError::Validation(e.to_string()))?;

    state.presence.set_status(session.user_id, payload.status.clone());
    state
        .db
        .users_update_status(session.user_id, payload.status.clone(), payload.status_text.as_deref())
        .await?;

    let event = serde_json::json!({
        "user_id": session.user_id,
        "status": payload.status,
        "status_text": payload.status_text,
    });
    state.hub.broadcast_presence(&session.server_ids, EventTag::PRESENCE_UPDATE, event);
    Ok(())
}

pub async fn typing_start(state: &AppState, session: &LiveSession, raw: &serde_json::Value) -> GatewayResult<()> {
    let payload: TypingStartPayload = parse_payload(raw).map_err(|e| GatewayError::Validation(e.to_string()))?;

    let channel = state
        .db
        .channels_find_by_id(payload.channel_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound("channel not found".into()))?;
    let server_id = channel
        .server_id
        .ok_or_else(|| GatewayError::Validation("channel has no server".into()))?;

    let mask = effective_permissions(state.db.as_ref(), server_id, payload.channel_id, session.user_id).await?;
    require(mask, Permissions::SEND_MESSAGES, "typing_start")?;

    state.typing.start(payload.channel_id, session.user_id);

    let event = serde_json::json!({ "user_id": session.user_id, "channel_id": payload.channel_id });
    state.hub.broadcast_channel(payload.channel_id, EventTag::TYPING_START, event, Some(session.id));
    Ok(())
}

pub async fn whisper(state: &AppState, session: &LiveSession, raw: &serde_json::Value) -> GatewayResult<()> {
    let payload: WhisperPayload = parse_payload(raw).map_err(|e| GatewayError::Validation(e.to_string()))?;

    let sanitized = chat::sanitize_content(&payload.content);
    chat::validate_message(&sanitized)?;

    if !state.hub.is_online(payload.target_id) {
        return Err(GatewayError::NotFound("target is not online".into()));
    }

    let event = serde_json::json!({
        "from": session.user_id,
        "to": payload.target_id,
        "content": sanitized,
    });
    state.hub.send_to_user(payload.target_id, EventTag::WHISPER_CREATE, event.clone());
    state.hub.send_to_user(session.user_id, EventTag::WHISPER_CREATE, event);
    Ok(())
}
