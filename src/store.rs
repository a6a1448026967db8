//! The persistence seam (C1): every operation `handlers.rs`/`session.rs`/
//! `api.rs`/`auth.rs` need from the Store, behind one trait. `PgStore` is the
//! production implementation — a thin pass-through to the `db` module's
//! query functions, unchanged. `test_support::MockStore` (test-only) is an
//! in-memory stand-in so the opcode handlers can be exercised without a live
//! Postgres instance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db;
use crate::models::{
    Channel, ChannelType, InvitePolicy, Message, MessageMentions, PermissionOverwrite,
    PresenceStatus, Role, Server, ServerMember, SessionRecord, User,
};

#[async_trait]
pub trait Store: Send + Sync {
    async fn users_create(
        &self,
        id: Uuid,
        username: &str,
        discriminator: i16,
        display_name: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, sqlx::Error>;
    async fn users_find_by_id(&self, id: Uuid) -> Result<Option<User>, sqlx::Error>;
    async fn users_find_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error>;
    async fn users_find_by_username(
        &self,
        username: &str,
        discriminator: i16,
    ) -> Result<Option<User>, sqlx::Error>;
    async fn users_find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<User>, sqlx::Error>;
    async fn users_update_status(
        &self,
        id: Uuid,
        status: PresenceStatus,
        status_text: Option<&str>,
    ) -> Result<(), sqlx::Error>;
    async fn users_touch_last_seen(&self, id: Uuid) -> Result<(), sqlx::Error>;

    async fn servers_create(
        &self,
        id: Uuid,
        name: &str,
        description: Option<&str>,
        owner_id: Uuid,
        max_members: i32,
        invite_policy: InvitePolicy,
    ) -> Result<Server, sqlx::Error>;
    async fn servers_find_by_id(&self, id: Uuid) -> Result<Option<Server>, sqlx::Error>;
    async fn servers_list_for_user(&self, user_id: Uuid) -> Result<Vec<Server>, sqlx::Error>;
    async fn servers_list_all(&self) -> Result<Vec<Server>, sqlx::Error>;
    async fn servers_set_default_channels(
        &self,
        id: Uuid,
        default_channel_id: Uuid,
        system_channel_id: Uuid,
    ) -> Result<(), sqlx::Error>;
    async fn servers_update_owner(&self, id: Uuid, new_owner_id: Uuid) -> Result<(), sqlx::Error>;

    async fn channels_create(
        &self,
        id: Uuid,
        server_id: Option<Uuid>,
        name: &str,
        topic: Option<&str>,
        channel_type: ChannelType,
        position: i32,
        category_id: Option<Uuid>,
    ) -> Result<Channel, sqlx::Error>;
    async fn channels_find_by_id(&self, id: Uuid) -> Result<Option<Channel>, sqlx::Error>;
    async fn channels_list_for_server(&self, server_id: Uuid) -> Result<Vec<Channel>, sqlx::Error>;
    async fn channels_update(
        &self,
        id: Uuid,
        name: Option<&str>,
        topic: Option<&str>,
        position: Option<i32>,
        category_id: Option<Uuid>,
    ) -> Result<Option<Channel>, sqlx::Error>;
    async fn channels_delete(&self, id: Uuid) -> Result<bool, sqlx::Error>;

    async fn overwrites_list_for_channel(
        &self,
        channel_id: Uuid,
    ) -> Result<Vec<PermissionOverwrite>, sqlx::Error>;
    async fn overwrites_upsert(&self, ow: &PermissionOverwrite) -> Result<(), sqlx::Error>;

    async fn messages_create(
        &self,
        id: Uuid,
        channel_id: Uuid,
        author_id: Uuid,
        content: &str,
        reply_to_id: Option<Uuid>,
        mentions: &MessageMentions,
    ) -> Result<Message, sqlx::Error>;
    async fn messages_list_for_channel(
        &self,
        channel_id: Uuid,
        before: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Message>, sqlx::Error>;
    async fn messages_find_by_id(&self, id: Uuid) -> Result<Option<Message>, sqlx::Error>;
    async fn messages_update_content(
        &self,
        id: Uuid,
        content: &str,
    ) -> Result<Option<Message>, sqlx::Error>;
    async fn messages_delete(&self, id: Uuid) -> Result<bool, sqlx::Error>;

    async fn reactions_add(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<i64, sqlx::Error>;
    async fn reactions_remove(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<i64, sqlx::Error>;
    async fn reactions_count_distinct_for_message(&self, message_id: Uuid) -> Result<i64, sqlx::Error>;

    async fn members_add(&self, user_id: Uuid, server_id: Uuid) -> Result<ServerMember, sqlx::Error>;
    async fn members_remove(&self, user_id: Uuid, server_id: Uuid) -> Result<bool, sqlx::Error>;
    async fn members_find(
        &self,
        user_id: Uuid,
        server_id: Uuid,
    ) -> Result<Option<ServerMember>, sqlx::Error>;
    async fn members_list_for_server(&self, server_id: Uuid) -> Result<Vec<ServerMember>, sqlx::Error>;
    async fn members_set_muted(
        &self,
        user_id: Uuid,
        server_id: Uuid,
        muted: bool,
    ) -> Result<(), sqlx::Error>;

    #[allow(clippy::too_many_arguments)]
    async fn roles_create(
        &self,
        id: Uuid,
        server_id: Uuid,
        name: &str,
        color: i32,
        permissions: i64,
        position: i32,
        is_default: bool,
    ) -> Result<Role, sqlx::Error>;
    async fn roles_list_for_server(&self, server_id: Uuid) -> Result<Vec<Role>, sqlx::Error>;
    async fn roles_find_by_id(&self, id: Uuid) -> Result<Option<Role>, sqlx::Error>;
    async fn roles_find_by_name(&self, server_id: Uuid, name: &str) -> Result<Option<Role>, sqlx::Error>;
    async fn roles_default_role(&self, server_id: Uuid) -> Result<Role, sqlx::Error>;
    async fn roles_add_member_role(
        &self,
        user_id: Uuid,
        server_id: Uuid,
        role_id: Uuid,
    ) -> Result<(), sqlx::Error>;
    async fn roles_remove_member_role(
        &self,
        user_id: Uuid,
        server_id: Uuid,
        role_id: Uuid,
    ) -> Result<(), sqlx::Error>;
    async fn roles_for_member(&self, user_id: Uuid, server_id: Uuid) -> Result<Vec<Role>, sqlx::Error>;

    async fn bans_ban_member(
        &self,
        server_id: Uuid,
        user_id: Uuid,
        reason: Option<&str>,
        banned_by: Uuid,
    ) -> Result<(), sqlx::Error>;
    async fn bans_is_banned(&self, server_id: Uuid, user_id: Uuid) -> Result<bool, sqlx::Error>;

    #[allow(clippy::too_many_arguments)]
    async fn sessions_create(
        &self,
        id: Uuid,
        user_id: Uuid,
        token_digest: Vec<u8>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<(), sqlx::Error>;
    async fn sessions_find_by_digest(&self, digest: &[u8]) -> Result<Option<SessionRecord>, sqlx::Error>;
    async fn sessions_touch(&self, id: Uuid) -> Result<(), sqlx::Error>;
    async fn sessions_delete(&self, id: Uuid) -> Result<(), sqlx::Error>;
    async fn sessions_delete_by_digest(&self, digest: &[u8]) -> Result<(), sqlx::Error>;
}

/// Production `Store`: every method is a direct pass-through to `db::<module>`,
/// which still owns the actual SQL.
pub struct PgStore(pub PgPool);

#[async_trait]
impl Store for PgStore {
    async fn users_create(
        &self,
        id: Uuid,
        username: &str,
        discriminator: i16,
        display_name: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, sqlx::Error> {
        db::users::create(&self.0, id, username, discriminator, display_name, email, password_hash).await
    }
    async fn users_find_by_id(&self, id: Uuid) -> Result<Option<User>, sqlx::Error> {
        db::users::find_by_id(&self.0, id).await
    }
    async fn users_find_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        db::users::find_by_email(&self.0, email).await
    }
    async fn users_find_by_username(
        &self,
        username: &str,
        discriminator: i16,
    ) -> Result<Option<User>, sqlx::Error> {
        db::users::find_by_username(&self.0, username, discriminator).await
    }
    async fn users_find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<User>, sqlx::Error> {
        db::users::find_by_ids(&self.0, ids).await
    }
    async fn users_update_status(
        &self,
        id: Uuid,
        status: PresenceStatus,
        status_text: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        db::users::update_status(&self.0, id, status, status_text).await
    }
    async fn users_touch_last_seen(&self, id: Uuid) -> Result<(), sqlx::Error> {
        db::users::touch_last_seen(&self.0, id).await
    }

    async fn servers_create(
        &self,
        id: Uuid,
        name: &str,
        description: Option<&str>,
        owner_id: Uuid,
        max_members: i32,
        invite_policy: InvitePolicy,
    ) -> Result<Server, sqlx::Error> {
        db::servers::create(&self.0, id, name, description, owner_id, max_members, invite_policy).await
    }
    async fn servers_find_by_id(&self, id: Uuid) -> Result<Option<Server>, sqlx::Error> {
        db::servers::find_by_id(&self.0, id).await
    }
    async fn servers_list_for_user(&self, user_id: Uuid) -> Result<Vec<Server>, sqlx::Error> {
        db::servers::list_for_user(&self.0, user_id).await
    }
    async fn servers_list_all(&self) -> Result<Vec<Server>, sqlx::Error> {
        db::servers::list_all(&self.0).await
    }
    async fn servers_set_default_channels(
        &self,
        id: Uuid,
        default_channel_id: Uuid,
        system_channel_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        db::servers::set_default_channels(&self.0, id, default_channel_id, system_channel_id).await
    }
    async fn servers_update_owner(&self, id: Uuid, new_owner_id: Uuid) -> Result<(), sqlx::Error> {
        db::servers::update_owner(&self.0, id, new_owner_id).await
    }

    async fn channels_create(
        &self,
        id: Uuid,
        server_id: Option<Uuid>,
        name: &str,
        topic: Option<&str>,
        channel_type: ChannelType,
        position: i32,
        category_id: Option<Uuid>,
    ) -> Result<Channel, sqlx::Error> {
        db::channels::create(&self.0, id, server_id, name, topic, channel_type, position, category_id).await
    }
    async fn channels_find_by_id(&self, id: Uuid) -> Result<Option<Channel>, sqlx::Error> {
        db::channels::find_by_id(&self.0, id).await
    }
    async fn channels_list_for_server(&self, server_id: Uuid) -> Result<Vec<Channel>, sqlx::Error> {
        db::channels::list_for_server(&self.0, server_id).await
    }
    async fn channels_update(
        &self,
        id: Uuid,
        name: Option<&str>,
        topic: Option<&str>,
        position: Option<i32>,
        category_id: Option<Uuid>,
    ) -> Result<Option<Channel>, sqlx::Error> {
        db::channels::update(&self.0, id, name, topic, position, category_id).await
    }
    async fn channels_delete(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        db::channels::delete(&self.0, id).await
    }

    async fn overwrites_list_for_channel(
        &self,
        channel_id: Uuid,
    ) -> Result<Vec<PermissionOverwrite>, sqlx::Error> {
        db::overwrites::list_for_channel(&self.0, channel_id).await
    }
    async fn overwrites_upsert(&self, ow: &PermissionOverwrite) -> Result<(), sqlx::Error> {
        db::overwrites::upsert(&self.0, ow).await
    }

    async fn messages_create(
        &self,
        id: Uuid,
        channel_id: Uuid,
        author_id: Uuid,
        content: &str,
        reply_to_id: Option<Uuid>,
        mentions: &MessageMentions,
    ) -> Result<Message, sqlx::Error> {
        db::messages::create(&self.0, id, channel_id, author_id, content, reply_to_id, mentions).await
    }
    async fn messages_list_for_channel(
        &self,
        channel_id: Uuid,
        before: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Message>, sqlx::Error> {
        db::messages::list_for_channel(&self.0, channel_id, before, limit).await
    }
    async fn messages_find_by_id(&self, id: Uuid) -> Result<Option<Message>, sqlx::Error> {
        db::messages::find_by_id(&self.0, id).await
    }
    async fn messages_update_content(
        &self,
        id: Uuid,
        content: &str,
    ) -> Result<Option<Message>, sqlx::Error> {
        db::messages::update_content(&self.0, id, content).await
    }
    async fn messages_delete(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        db::messages::delete(&self.0, id).await
    }

    async fn reactions_add(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<i64, sqlx::Error> {
        db::reactions::add(&self.0, message_id, user_id, emoji).await
    }
    async fn reactions_remove(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<i64, sqlx::Error> {
        db::reactions::remove(&self.0, message_id, user_id, emoji).await
    }
    async fn reactions_count_distinct_for_message(&self, message_id: Uuid) -> Result<i64, sqlx::Error> {
        db::reactions::count_distinct_for_message(&self.0, message_id).await
    }

    async fn members_add(&self, user_id: Uuid, server_id: Uuid) -> Result<ServerMember, sqlx::Error> {
        db::members::add(&self.0, user_id, server_id).await
    }
    async fn members_remove(&self, user_id: Uuid, server_id: Uuid) -> Result<bool, sqlx::Error> {
        db::members::remove(&self.0, user_id, server_id).await
    }
    async fn members_find(
        &self,
        user_id: Uuid,
        server_id: Uuid,
    ) -> Result<Option<ServerMember>, sqlx::Error> {
        db::members::find(&self.0, user_id, server_id).await
    }
    async fn members_list_for_server(&self, server_id: Uuid) -> Result<Vec<ServerMember>, sqlx::Error> {
        db::members::list_for_server(&self.0, server_id).await
    }
    async fn members_set_muted(
        &self,
        user_id: Uuid,
        server_id: Uuid,
        muted: bool,
    ) -> Result<(), sqlx::Error> {
        db::members::set_muted(&self.0, user_id, server_id, muted).await
    }

    async fn roles_create(
        &self,
        id: Uuid,
        server_id: Uuid,
        name: &str,
        color: i32,
        permissions: i64,
        position: i32,
        is_default: bool,
    ) -> Result<Role, sqlx::Error> {
        db::roles::create(&self.0, id, server_id, name, color, permissions, position, is_default).await
    }
    async fn roles_list_for_server(&self, server_id: Uuid) -> Result<Vec<Role>, sqlx::Error> {
        db::roles::list_for_server(&self.0, server_id).await
    }
    async fn roles_find_by_id(&self, id: Uuid) -> Result<Option<Role>, sqlx::Error> {
        db::roles::find_by_id(&self.0, id).await
    }
    async fn roles_find_by_name(&self, server_id: Uuid, name: &str) -> Result<Option<Role>, sqlx::Error> {
        db::roles::find_by_name(&self.0, server_id, name).await
    }
    async fn roles_default_role(&self, server_id: Uuid) -> Result<Role, sqlx::Error> {
        db::roles::default_role(&self.0, server_id).await
    }
    async fn roles_add_member_role(
        &self,
        user_id: Uuid,
        server_id: Uuid,
        role_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        db::roles::add_member_role(&self.0, user_id, server_id, role_id).await
    }
    async fn roles_remove_member_role(
        &self,
        user_id: Uuid,
        server_id: Uuid,
        role_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        db::roles::remove_member_role(&self.0, user_id, server_id, role_id).await
    }
    async fn roles_for_member(&self, user_id: Uuid, server_id: Uuid) -> Result<Vec<Role>, sqlx::Error> {
        db::roles::roles_for_member(&self.0, user_id, server_id).await
    }

    async fn bans_ban_member(
        &self,
        server_id: Uuid,
        user_id: Uuid,
        reason: Option<&str>,
        banned_by: Uuid,
    ) -> Result<(), sqlx::Error> {
        db::bans::ban_member(&self.0, server_id, user_id, reason, banned_by).await
    }
    async fn bans_is_banned(&self, server_id: Uuid, user_id: Uuid) -> Result<bool, sqlx::Error> {
        db::bans::is_banned(&self.0, server_id, user_id).await
    }

    async fn sessions_create(
        &self,
        id: Uuid,
        user_id: Uuid,
        token_digest: Vec<u8>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<(), sqlx::Error> {
        db::sessions::create(&self.0, id, user_id, token_digest, created_at, expires_at, ip, user_agent).await
    }
    async fn sessions_find_by_digest(&self, digest: &[u8]) -> Result<Option<SessionRecord>, sqlx::Error> {
        db::sessions::find_by_digest(&self.0, digest).await
    }
    async fn sessions_touch(&self, id: Uuid) -> Result<(), sqlx::Error> {
        db::sessions::touch(&self.0, id).await
    }
    async fn sessions_delete(&self, id: Uuid) -> Result<(), sqlx::Error> {
        db::sessions::delete(&self.0, id).await
    }
    async fn sessions_delete_by_digest(&self, digest: &[u8]) -> Result<(), sqlx::Error> {
        db::sessions::delete_by_digest(&self.0, digest).await
    }
}

/// In-memory `Store` double, used only by the `#[tokio::test]` scenario
/// suite in `handlers.rs` so opcode logic can be exercised without a live
/// Postgres instance. Grounded on the same trait-plus-mock shape a
/// production Store abstraction takes elsewhere in the ecosystem (a
/// `DbClient` trait with a real backend and a swappable test backend) —
/// adapted here with `std::sync::Mutex`-guarded `Vec`s rather than a second
/// real backend, since the point is to stay off the network in tests.
#[cfg(test)]
pub mod test_support {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::Store;
    use crate::models::{
        Ban, Channel, ChannelType, InvitePolicy, Message, MessageMentions, PermissionOverwrite,
        PresenceStatus, Role, Server, ServerMember, SessionRecord, User,
    };
    use chrono::{DateTime, Utc};

    #[derive(Default)]
    struct Tables {
        users: Vec<User>,
        servers: Vec<Server>,
        channels: Vec<Channel>,
        overwrites: Vec<PermissionOverwrite>,
        messages: Vec<Message>,
        members: Vec<ServerMember>,
        roles: Vec<Role>,
        bans: Vec<Ban>,
        sessions: Vec<SessionRecord>,
    }

    /// Single-process, single-connection in-memory Store. Not meant to model
    /// concurrent-transaction semantics — just enough relational shape
    /// (foreign-key-style lookups by id) to drive handler-level scenario
    /// tests deterministically.
    #[derive(Default)]
    pub struct MockStore {
        tables: Mutex<Tables>,
    }

    impl MockStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seeds a server, its `@everyone` role, and a default text channel —
        /// the minimum fixture most scenario tests build on.
        pub fn seed_server(&self, owner_id: Uuid) -> (Server, Role, Channel) {
            let mut t = self.tables.lock().unwrap();
            let server_id = Uuid::new_v4();
            let channel_id = Uuid::new_v4();
            let role_id = Uuid::new_v4();
            let server = Server {
                id: server_id,
                name: "Test".into(),
                description: None,
                icon_hash: None,
                owner_id,
                default_channel_id: Some(channel_id),
                system_channel_id: Some(channel_id),
                max_members: 1000,
                invite_policy: InvitePolicy::Open,
                created_at: Utc::now(),
            };
            let everyone = Role {
                id: role_id,
                server_id,
                name: "@everyone".into(),
                color: 0,
                permissions: (crate::permissions::Permissions::VIEW_CHANNELS
                    | crate::permissions::Permissions::SEND_MESSAGES
                    | crate::permissions::Permissions::READ_MESSAGE_HISTORY)
                    .bits(),
                position: 0,
                is_hoisted: false,
                is_mentionable: true,
                is_default: true,
            };
            let channel = Channel {
                id: channel_id,
                server_id: Some(server_id),
                name: "general".into(),
                topic: None,
                channel_type: ChannelType::Text,
                position: 0,
                category_id: None,
            };
            t.servers.push(server.clone());
            t.roles.push(everyone.clone());
            t.channels.push(channel.clone());
            (server, everyone, channel)
        }

        pub fn seed_member(&self, user_id: Uuid, server_id: Uuid, username: &str) -> User {
            let mut t = self.tables.lock().unwrap();
            let user = User {
                id: user_id,
                username: username.into(),
                discriminator: 1,
                display_name: username.into(),
                email: format!("{username}@example.test"),
                password_hash: String::new(),
                avatar_hash: None,
                status: PresenceStatus::Online,
                status_text: None,
                is_bot: false,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                last_seen_at: Utc::now(),
            };
            t.users.push(user.clone());
            t.members.push(ServerMember {
                user_id,
                server_id,
                nickname: None,
                joined_at: Utc::now(),
                is_muted: false,
                is_deafened: false,
                role_ids: Vec::new(),
                user: None,
            });
            user
        }
    }

    #[async_trait]
    impl Store for MockStore {
        async fn users_create(
            &self,
            id: Uuid,
            username: &str,
            discriminator: i16,
            display_name: &str,
            email: &str,
            password_hash: &str,
        ) -> Result<User, sqlx::Error> {
            let user = User {
                id,
                username: username.into(),
                discriminator,
                display_name: display_name.into(),
                email: email.into(),
                password_hash: password_hash.into(),
                avatar_hash: None,
                status: PresenceStatus::Offline,
                status_text: None,
                is_bot: false,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                last_seen_at: Utc::now(),
            };
            self.tables.lock().unwrap().users.push(user.clone());
            Ok(user)
        }
        async fn users_find_by_id(&self, id: Uuid) -> Result<Option<User>, sqlx::Error> {
            Ok(self.tables.lock().unwrap().users.iter().find(|u| u.id == id).cloned())
        }
        async fn users_find_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
            Ok(self
                .tables
                .lock()
                .unwrap()
                .users
                .iter()
                .find(|u| u.email.eq_ignore_ascii_case(email))
                .cloned())
        }
        async fn users_find_by_username(
            &self,
            username: &str,
            discriminator: i16,
        ) -> Result<Option<User>, sqlx::Error> {
            Ok(self
                .tables
                .lock()
                .unwrap()
                .users
                .iter()
                .find(|u| u.username.eq_ignore_ascii_case(username) && u.discriminator == discriminator)
                .cloned())
        }
        async fn users_find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<User>, sqlx::Error> {
            Ok(self.tables.lock().unwrap().users.iter().filter(|u| ids.contains(&u.id)).cloned().collect())
        }
        async fn users_update_status(
            &self,
            id: Uuid,
            status: PresenceStatus,
            status_text: Option<&str>,
        ) -> Result<(), sqlx::Error> {
            let mut t = self.tables.lock().unwrap();
            if let Some(u) = t.users.iter_mut().find(|u| u.id == id) {
                u.status = status;
                u.status_text = status_text.map(str::to_string);
            }
            Ok(())
        }
        async fn users_touch_last_seen(&self, id: Uuid) -> Result<(), sqlx::Error> {
            let mut t = self.tables.lock().unwrap();
            if let Some(u) = t.users.iter_mut().find(|u| u.id == id) {
                u.last_seen_at = Utc::now();
            }
            Ok(())
        }

        async fn servers_create(
            &self,
            id: Uuid,
            name: &str,
            description: Option<&str>,
            owner_id: Uuid,
            max_members: i32,
            invite_policy: InvitePolicy,
        ) -> Result<Server, sqlx::Error> {
            let server = Server {
                id,
                name: name.into(),
                description: description.map(str::to_string),
                icon_hash: None,
                owner_id,
                default_channel_id: None,
                system_channel_id: None,
                max_members,
                invite_policy,
                created_at: Utc::now(),
            };
            self.tables.lock().unwrap().servers.push(server.clone());
            Ok(server)
        }
        async fn servers_find_by_id(&self, id: Uuid) -> Result<Option<Server>, sqlx::Error> {
            Ok(self.tables.lock().unwrap().servers.iter().find(|s| s.id == id).cloned())
        }
        async fn servers_list_for_user(&self, user_id: Uuid) -> Result<Vec<Server>, sqlx::Error> {
            let t = self.tables.lock().unwrap();
            let ids: Vec<Uuid> = t.members.iter().filter(|m| m.user_id == user_id).map(|m| m.server_id).collect();
            Ok(t.servers.iter().filter(|s| ids.contains(&s.id)).cloned().collect())
        }
        async fn servers_list_all(&self) -> Result<Vec<Server>, sqlx::Error> {
            Ok(self.tables.lock().unwrap().servers.clone())
        }
        async fn servers_set_default_channels(
            &self,
            id: Uuid,
            default_channel_id: Uuid,
            system_channel_id: Uuid,
        ) -> Result<(), sqlx::Error> {
            let mut t = self.tables.lock().unwrap();
            if let Some(s) = t.servers.iter_mut().find(|s| s.id == id) {
                s.default_channel_id = Some(default_channel_id);
                s.system_channel_id = Some(system_channel_id);
            }
            Ok(())
        }
        async fn servers_update_owner(&self, id: Uuid, new_owner_id: Uuid) -> Result<(), sqlx::Error> {
            let mut t = self.tables.lock().unwrap();
            if let Some(s) = t.servers.iter_mut().find(|s| s.id == id) {
                s.owner_id = new_owner_id;
            }
            Ok(())
        }

        async fn channels_create(
            &self,
            id: Uuid,
            server_id: Option<Uuid>,
            name: &str,
            topic: Option<&str>,
            channel_type: ChannelType,
            position: i32,
            category_id: Option<Uuid>,
        ) -> Result<Channel, sqlx::Error> {
            let channel = Channel {
                id,
                server_id,
                name: name.into(),
                topic: topic.map(str::to_string),
                channel_type,
                position,
                category_id,
            };
            self.tables.lock().unwrap().channels.push(channel.clone());
            Ok(channel)
        }
        async fn channels_find_by_id(&self, id: Uuid) -> Result<Option<Channel>, sqlx::Error> {
            Ok(self.tables.lock().unwrap().channels.iter().find(|c| c.id == id).cloned())
        }
        async fn channels_list_for_server(&self, server_id: Uuid) -> Result<Vec<Channel>, sqlx::Error> {
            Ok(self
                .tables
                .lock()
                .unwrap()
                .channels
                .iter()
                .filter(|c| c.server_id == Some(server_id))
                .cloned()
                .collect())
        }
        async fn channels_update(
            &self,
            id: Uuid,
            name: Option<&str>,
            topic: Option<&str>,
            position: Option<i32>,
            category_id: Option<Uuid>,
        ) -> Result<Option<Channel>, sqlx::Error> {
            let mut t = self.tables.lock().unwrap();
            let Some(c) = t.channels.iter_mut().find(|c| c.id == id) else {
                return Ok(None);
            };
            if let Some(name) = name {
                c.name = name.to_string();
            }
            if let Some(topic) = topic {
                c.topic = Some(topic.to_string());
            }
            if let Some(position) = position {
                c.position = position;
            }
            if let Some(category_id) = category_id {
                c.category_id = Some(category_id);
            }
            Ok(Some(c.clone()))
        }
        async fn channels_delete(&self, id: Uuid) -> Result<bool, sqlx::Error> {
            let mut t = self.tables.lock().unwrap();
            let before = t.channels.len();
            t.channels.retain(|c| c.id != id);
            t.messages.retain(|m| m.channel_id != id);
            t.overwrites.retain(|o| o.channel_id != id);
            Ok(t.channels.len() != before)
        }

        async fn overwrites_list_for_channel(
            &self,
            channel_id: Uuid,
        ) -> Result<Vec<PermissionOverwrite>, sqlx::Error> {
            Ok(self
                .tables
                .lock()
                .unwrap()
                .overwrites
                .iter()
                .filter(|o| o.channel_id == channel_id)
                .cloned()
                .collect())
        }
        async fn overwrites_upsert(&self, ow: &PermissionOverwrite) -> Result<(), sqlx::Error> {
            let mut t = self.tables.lock().unwrap();
            t.overwrites.retain(|o| !(o.channel_id == ow.channel_id && o.target_id == ow.target_id && o.target_type == ow.target_type));
            t.overwrites.push(ow.clone());
            Ok(())
        }

        async fn messages_create(
            &self,
            id: Uuid,
            channel_id: Uuid,
            author_id: Uuid,
            content: &str,
            reply_to_id: Option<Uuid>,
            mentions: &MessageMentions,
        ) -> Result<Message, sqlx::Error> {
            let mut t = self.tables.lock().unwrap();
            let author = t.users.iter().find(|u| u.id == author_id).cloned().map(Into::into);
            let message = Message {
                id,
                channel_id,
                author_id,
                content: content.to_string(),
                message_type: crate::models::MessageType::Default,
                created_at: Utc::now(),
                edited_at: None,
                is_pinned: false,
                reply_to_id,
                mentions: mentions.clone(),
                author,
            };
            t.messages.push(message.clone());
            Ok(message)
        }
        async fn messages_list_for_channel(
            &self,
            channel_id: Uuid,
            before: Option<Uuid>,
            limit: i64,
        ) -> Result<Vec<Message>, sqlx::Error> {
            let t = self.tables.lock().unwrap();
            let mut msgs: Vec<Message> = t.messages.iter().filter(|m| m.channel_id == channel_id).cloned().collect();
            msgs.sort_by_key(|m| m.created_at);
            if let Some(before_id) = before {
                if let Some(cutoff) = msgs.iter().find(|m| m.id == before_id).map(|m| m.created_at) {
                    msgs.retain(|m| m.created_at < cutoff);
                }
            }
            msgs.reverse();
            msgs.truncate(limit.max(0) as usize);
            msgs.reverse();
            Ok(msgs)
        }
        async fn messages_find_by_id(&self, id: Uuid) -> Result<Option<Message>, sqlx::Error> {
            Ok(self.tables.lock().unwrap().messages.iter().find(|m| m.id == id).cloned())
        }
        async fn messages_update_content(
            &self,
            id: Uuid,
            content: &str,
        ) -> Result<Option<Message>, sqlx::Error> {
            let mut t = self.tables.lock().unwrap();
            let Some(m) = t.messages.iter_mut().find(|m| m.id == id) else {
                return Ok(None);
            };
            m.content = content.to_string();
            m.edited_at = Some(Utc::now());
            Ok(Some(m.clone()))
        }
        async fn messages_delete(&self, id: Uuid) -> Result<bool, sqlx::Error> {
            let mut t = self.tables.lock().unwrap();
            let before = t.messages.len();
            t.messages.retain(|m| m.id != id);
            Ok(t.messages.len() != before)
        }

        async fn reactions_add(&self, _message_id: Uuid, _user_id: Uuid, _emoji: &str) -> Result<i64, sqlx::Error> {
            Ok(1)
        }
        async fn reactions_remove(&self, _message_id: Uuid, _user_id: Uuid, _emoji: &str) -> Result<i64, sqlx::Error> {
            Ok(0)
        }
        async fn reactions_count_distinct_for_message(&self, _message_id: Uuid) -> Result<i64, sqlx::Error> {
            Ok(0)
        }

        async fn members_add(&self, user_id: Uuid, server_id: Uuid) -> Result<ServerMember, sqlx::Error> {
            let mut t = self.tables.lock().unwrap();
            if let Some(m) = t.members.iter().find(|m| m.user_id == user_id && m.server_id == server_id) {
                return Ok(m.clone());
            }
            let member = ServerMember {
                user_id,
                server_id,
                nickname: None,
                joined_at: Utc::now(),
                is_muted: false,
                is_deafened: false,
                role_ids: Vec::new(),
                user: None,
            };
            t.members.push(member.clone());
            Ok(member)
        }
        async fn members_remove(&self, user_id: Uuid, server_id: Uuid) -> Result<bool, sqlx::Error> {
            let mut t = self.tables.lock().unwrap();
            let before = t.members.len();
            t.members.retain(|m| !(m.user_id == user_id && m.server_id == server_id));
            Ok(t.members.len() != before)
        }
        async fn members_find(
            &self,
            user_id: Uuid,
            server_id: Uuid,
        ) -> Result<Option<ServerMember>, sqlx::Error> {
            Ok(self
                .tables
                .lock()
                .unwrap()
                .members
                .iter()
                .find(|m| m.user_id == user_id && m.server_id == server_id)
                .cloned())
        }
        async fn members_list_for_server(&self, server_id: Uuid) -> Result<Vec<ServerMember>, sqlx::Error> {
            Ok(self.tables.lock().unwrap().members.iter().filter(|m| m.server_id == server_id).cloned().collect())
        }
        async fn members_set_muted(
            &self,
            user_id: Uuid,
            server_id: Uuid,
            muted: bool,
        ) -> Result<(), sqlx::Error> {
            let mut t = self.tables.lock().unwrap();
            if let Some(m) = t.members.iter_mut().find(|m| m.user_id == user_id && m.server_id == server_id) {
                m.is_muted = muted;
            }
            Ok(())
        }

        async fn roles_create(
            &self,
            id: Uuid,
            server_id: Uuid,
            name: &str,
            color: i32,
            permissions: i64,
            position: i32,
            is_default: bool,
        ) -> Result<Role, sqlx::Error> {
            let role = Role {
                id,
                server_id,
                name: name.into(),
                color,
                permissions,
                position,
                is_hoisted: false,
                is_mentionable: true,
                is_default,
            };
            self.tables.lock().unwrap().roles.push(role.clone());
            Ok(role)
        }
        async fn roles_list_for_server(&self, server_id: Uuid) -> Result<Vec<Role>, sqlx::Error> {
            Ok(self.tables.lock().unwrap().roles.iter().filter(|r| r.server_id == server_id).cloned().collect())
        }
        async fn roles_find_by_id(&self, id: Uuid) -> Result<Option<Role>, sqlx::Error> {
            Ok(self.tables.lock().unwrap().roles.iter().find(|r| r.id == id).cloned())
        }
        async fn roles_find_by_name(&self, server_id: Uuid, name: &str) -> Result<Option<Role>, sqlx::Error> {
            Ok(self
                .tables
                .lock()
                .unwrap()
                .roles
                .iter()
                .find(|r| r.server_id == server_id && r.name.eq_ignore_ascii_case(name))
                .cloned())
        }
        async fn roles_default_role(&self, server_id: Uuid) -> Result<Role, sqlx::Error> {
            self.tables
                .lock()
                .unwrap()
                .roles
                .iter()
                .find(|r| r.server_id == server_id && r.is_default)
                .cloned()
                .ok_or(sqlx::Error::RowNotFound)
        }
        async fn roles_add_member_role(
            &self,
            user_id: Uuid,
            server_id: Uuid,
            role_id: Uuid,
        ) -> Result<(), sqlx::Error> {
            let mut t = self.tables.lock().unwrap();
            if let Some(m) = t.members.iter_mut().find(|m| m.user_id == user_id && m.server_id == server_id) {
                if !m.role_ids.contains(&role_id) {
                    m.role_ids.push(role_id);
                }
            }
            Ok(())
        }
        async fn roles_remove_member_role(
            &self,
            user_id: Uuid,
            server_id: Uuid,
            role_id: Uuid,
        ) -> Result<(), sqlx::Error> {
            let mut t = self.tables.lock().unwrap();
            if let Some(m) = t.members.iter_mut().find(|m| m.user_id == user_id && m.server_id == server_id) {
                m.role_ids.retain(|r| *r != role_id);
            }
            Ok(())
        }
        async fn roles_for_member(&self, user_id: Uuid, server_id: Uuid) -> Result<Vec<Role>, sqlx::Error> {
            let t = self.tables.lock().unwrap();
            let Some(member) = t.members.iter().find(|m| m.user_id == user_id && m.server_id == server_id) else {
                return Ok(Vec::new());
            };
            Ok(t.roles.iter().filter(|r| member.role_ids.contains(&r.id)).cloned().collect())
        }

        async fn bans_ban_member(
            &self,
            server_id: Uuid,
            user_id: Uuid,
            reason: Option<&str>,
            banned_by: Uuid,
        ) -> Result<(), sqlx::Error> {
            let mut t = self.tables.lock().unwrap();
            t.bans.retain(|b| !(b.server_id == server_id && b.user_id == user_id));
            t.bans.push(Ban {
                server_id,
                user_id,
                reason: reason.map(str::to_string),
                banned_by,
                banned_at: Utc::now(),
            });
            t.members.retain(|m| !(m.user_id == user_id && m.server_id == server_id));
            Ok(())
        }
        async fn bans_is_banned(&self, server_id: Uuid, user_id: Uuid) -> Result<bool, sqlx::Error> {
            Ok(self
                .tables
                .lock()
                .unwrap()
                .bans
                .iter()
                .any(|b| b.server_id == server_id && b.user_id == user_id))
        }

        async fn sessions_create(
            &self,
            id: Uuid,
            user_id: Uuid,
            token_digest: Vec<u8>,
            created_at: DateTime<Utc>,
            expires_at: DateTime<Utc>,
            ip: Option<String>,
            user_agent: Option<String>,
        ) -> Result<(), sqlx::Error> {
            self.tables.lock().unwrap().sessions.push(SessionRecord {
                id,
                user_id,
                token_digest,
                created_at,
                expires_at,
                last_used_at: created_at,
                ip,
                user_agent,
            });
            Ok(())
        }
        async fn sessions_find_by_digest(&self, digest: &[u8]) -> Result<Option<SessionRecord>, sqlx::Error> {
            Ok(self.tables.lock().unwrap().sessions.iter().find(|s| s.token_digest == digest).cloned())
        }
        async fn sessions_touch(&self, id: Uuid) -> Result<(), sqlx::Error> {
            let mut t = self.tables.lock().unwrap();
            if let Some(s) = t.sessions.iter_mut().find(|s| s.id == id) {
                s.last_used_at = Utc::now();
            }
            Ok(())
        }
        async fn sessions_delete(&self, id: Uuid) -> Result<(), sqlx::Error> {
            self.tables.lock().unwrap().sessions.retain(|s| s.id != id);
            Ok(())
        }
        async fn sessions_delete_by_digest(&self, digest: &[u8]) -> Result<(), sqlx::Error> {
            self.tables.lock().unwrap().sessions.retain(|s| s.token_digest != digest);
            Ok(())
        }
    }
}
