use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ─── Gateway handshake ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionProperties {
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub browser: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,
    #[serde(default)]
    pub properties: ConnectionProperties,
}

// ─── Users ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::Type)]
#[sqlx(type_name = "presence_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Idle,
    Dnd,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub discriminator: i16,
    pub display_name: String,
    pub email: String,
    pub password_hash: String,
    pub avatar_hash: Option<String>,
    pub status: PresenceStatus,
    pub status_text: Option<String>,
    pub is_bot: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserPublic,
}

/// The user view sent over the wire — never includes `password_hash` or `email`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserPublic {
    pub id: Uuid,
    pub username: String,
    pub discriminator: i16,
    pub display_name: String,
    pub avatar_hash: Option<String>,
    pub status: PresenceStatus,
    pub status_text: Option<String>,
    pub is_bot: bool,
}

impl From<User> for UserPublic {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            discriminator: u.discriminator,
            display_name: u.display_name,
            avatar_hash: u.avatar_hash,
            status: u.status,
            status_text: u.status_text,
            is_bot: u.is_bot,
        }
    }
}

// ─── Servers ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, sqlx::Type)]
#[sqlx(type_name = "invite_policy", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InvitePolicy {
    Open,
    ApprovalRequired,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Server {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub icon_hash: Option<String>,
    pub owner_id: Uuid,
    pub default_channel_id: Option<Uuid>,
    pub system_channel_id: Option<Uuid>,
    pub max_members: i32,
    pub invite_policy: InvitePolicy,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateServerRequest {
    pub name: String,
    pub description: Option<String>,
}

// ─── Channels ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "channel_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Text,
    Voice,
    Category,
    Dm,
    GroupDm,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Channel {
    pub id: Uuid,
    pub server_id: Option<Uuid>,
    pub name: String,
    pub topic: Option<String>,
    pub channel_type: ChannelType,
    pub position: i32,
    pub category_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub server_id: Uuid,
    pub name: String,
    pub channel_type: ChannelType,
    pub category_id: Option<Uuid>,
    pub topic: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateChannelRequest {
    pub channel_id: Uuid,
    pub name: Option<String>,
    pub topic: Option<String>,
    pub position: Option<i32>,
    pub category_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteChannelRequest {
    pub channel_id: Uuid,
}

// ─── Permission overwrites ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "overwrite_target", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OverwriteTarget {
    Role,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PermissionOverwrite {
    pub channel_id: Uuid,
    pub target_id: Uuid,
    pub target_type: OverwriteTarget,
    pub allow: i64,
    pub deny: i64,
}

// ─── Messages ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "message_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Default,
    System,
    Pinned,
    MemberJoin,
    MemberLeave,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMentions {
    pub users: Vec<Uuid>,
    pub roles: Vec<Uuid>,
    pub everyone: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_pinned: bool,
    pub reply_to_id: Option<Uuid>,
    #[sqlx(skip)]
    pub mentions: MessageMentions,
    #[sqlx(skip)]
    pub author: Option<UserPublic>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessagePayload {
    pub channel_id: Uuid,
    pub content: String,
    pub reply_to_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct RequestMessagesPayload {
    pub channel_id: Uuid,
    pub before: Option<Uuid>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MessagesHistoryPayload {
    pub channel_id: Uuid,
    pub messages: Vec<Message>,
    pub has_more: bool,
}

pub const MAX_MESSAGE_LEN: usize = 2000;
pub const DEFAULT_HISTORY_LIMIT: i64 = 200;
pub const MAX_HISTORY_LIMIT: i64 = 200;

// ─── Reactions ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Reaction {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

pub const MAX_REACTIONS_PER_MESSAGE: usize = 20;

// ─── Members ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ServerMember {
    pub user_id: Uuid,
    pub server_id: Uuid,
    pub nickname: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub is_muted: bool,
    pub is_deafened: bool,
    #[sqlx(skip)]
    pub role_ids: Vec<Uuid>,
    #[sqlx(skip)]
    pub user: Option<UserPublic>,
}

// ─── Roles ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: Uuid,
    pub server_id: Uuid,
    pub name: String,
    pub color: i32,
    pub permissions: i64,
    pub position: i32,
    pub is_hoisted: bool,
    pub is_mentionable: bool,
    pub is_default: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub server_id: Uuid,
    pub name: String,
    pub permissions: i64,
    pub color: i32,
}

#[derive(Debug, Deserialize)]
pub struct RoleAssignPayload {
    pub server_id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct KickPayload {
    pub server_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct BanPayload {
    pub server_id: Uuid,
    pub user_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MutePayload {
    pub server_id: Uuid,
    pub user_id: Uuid,
    pub muted: bool,
}

#[derive(Debug, Deserialize)]
pub struct WhisperPayload {
    pub target_id: Uuid,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct PresenceUpdatePayload {
    pub status: PresenceStatus,
    pub status_text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TypingStartPayload {
    pub channel_id: Uuid,
}

// ─── Ready / SERVER_CREATE snapshot ─────────────────────────────────────────

/// The full per-server snapshot dispatched once per server right after
/// `ready`: channels, members (with roles already folded in), roles, and
/// every user referenced by a member — enough for a client to render a
/// sidebar without a second round trip.
#[derive(Debug, Clone, Serialize)]
pub struct ServerCreatePayload {
    pub server: Server,
    pub channels: Vec<Channel>,
    pub members: Vec<ServerMember>,
    pub roles: Vec<Role>,
    pub users: Vec<UserPublic>,
}

// ─── Bans ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ban {
    pub server_id: Uuid,
    pub user_id: Uuid,
    pub reason: Option<String>,
    pub banned_by: Uuid,
    pub banned_at: DateTime<Utc>,
}

// ─── Sessions (persisted auth sessions) ────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct SessionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_digest: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

