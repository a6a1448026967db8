//! Store (C1): sqlx/Postgres implementation of the query set in §6.4.

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Pool, Postgres};

use crate::config::DatabaseConfig;

pub type DbPool = Pool<Postgres>;

pub async fn init_pool(config: &DatabaseConfig) -> anyhow::Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ─── Users ──────────────────────────────────────────────────────────────────

pub mod users {
    use sqlx::PgPool;
    use uuid::Uuid;

    use crate::models::{PresenceStatus, User};

    pub async fn create(
        pool: &PgPool,
        id: Uuid,
        username: &str,
        discriminator: i16,
        display_name: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, discriminator, display_name, email, password_hash,
                                status, is_bot, created_at, updated_at, last_seen_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'offline', false, NOW(), NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(username)
        .bind(discriminator)
        .bind(display_name)
        .bind(email)
        .bind(password_hash)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_username(
        pool: &PgPool,
        username: &str,
        discriminator: i16,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE LOWER(username) = LOWER($1) AND discriminator = $2",
        )
        .bind(username)
        .bind(discriminator)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_ids(pool: &PgPool, ids: &[Uuid]) -> Result<Vec<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(pool)
            .await
    }

    pub async fn update_status(
        pool: &PgPool,
        id: Uuid,
        status: PresenceStatus,
        status_text: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET status = $2, status_text = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(status_text)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn touch_last_seen(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET last_seen_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}

// ─── Servers ────────────────────────────────────────────────────────────────

pub mod servers {
    use sqlx::PgPool;
    use uuid::Uuid;

    use crate::models::{InvitePolicy, Server};

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        pool: &PgPool,
        id: Uuid,
        name: &str,
        description: Option<&str>,
        owner_id: Uuid,
        max_members: i32,
        invite_policy: InvitePolicy,
    ) -> Result<Server, sqlx::Error> {
        sqlx::query_as::<_, Server>(
            r#"
            INSERT INTO servers (id, name, description, owner_id, max_members, invite_policy, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(description)
        .bind(owner_id)
        .bind(max_members)
        .bind(invite_policy)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Server>, sqlx::Error> {
        sqlx::query_as::<_, Server>("SELECT * FROM servers WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Server>, sqlx::Error> {
        sqlx::query_as::<_, Server>(
            r#"
            SELECT s.* FROM servers s
            INNER JOIN server_members m ON m.server_id = s.id
            WHERE m.user_id = $1
            ORDER BY s.name
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    pub async fn list_all(pool: &PgPool) -> Result<Vec<Server>, sqlx::Error> {
        sqlx::query_as::<_, Server>("SELECT * FROM servers ORDER BY name")
            .fetch_all(pool)
            .await
    }

    pub async fn set_default_channels(
        pool: &PgPool,
        id: Uuid,
        default_channel_id: Uuid,
        system_channel_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE servers SET default_channel_id = $2, system_channel_id = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(default_channel_id)
        .bind(system_channel_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn update_owner(pool: &PgPool, id: Uuid, new_owner_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE servers SET owner_id = $2 WHERE id = $1")
            .bind(id)
            .bind(new_owner_id)
            .execute(pool)
            .await?;
        Ok(())
    }
}

// ─── Channels ───────────────────────────────────────────────────────────────

pub mod channels {
    use sqlx::PgPool;
    use uuid::Uuid;

    use crate::models::{Channel, ChannelType};

    pub async fn create(
        pool: &PgPool,
        id: Uuid,
        server_id: Option<Uuid>,
        name: &str,
        topic: Option<&str>,
        channel_type: ChannelType,
        position: i32,
        category_id: Option<Uuid>,
    ) -> Result<Channel, sqlx::Error> {
        sqlx::query_as::<_, Channel>(
            r#"
            INSERT INTO channels (id, server_id, name, topic, channel_type, position, category_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(server_id)
        .bind(name)
        .bind(topic)
        .bind(channel_type)
        .bind(position)
        .bind(category_id)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Channel>, sqlx::Error> {
        sqlx::query_as::<_, Channel>("SELECT * FROM channels WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_for_server(pool: &PgPool, server_id: Uuid) -> Result<Vec<Channel>, sqlx::Error> {
        sqlx::query_as::<_, Channel>("SELECT * FROM channels WHERE server_id = $1 ORDER BY position")
            .bind(server_id)
            .fetch_all(pool)
            .await
    }

    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        name: Option<&str>,
        topic: Option<&str>,
        position: Option<i32>,
        category_id: Option<Uuid>,
    ) -> Result<Option<Channel>, sqlx::Error> {
        sqlx::query_as::<_, Channel>(
            r#"
            UPDATE channels SET
                name = COALESCE($2, name),
                topic = COALESCE($3, topic),
                position = COALESCE($4, position),
                category_id = COALESCE($5, category_id)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(topic)
        .bind(position)
        .bind(category_id)
        .fetch_optional(pool)
        .await
    }

    /// Deletes the channel and cascades to its messages and overwrites in one transaction.
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM message_mention_users WHERE message_id IN (SELECT id FROM messages WHERE channel_id = $1)")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM message_mention_roles WHERE message_id IN (SELECT id FROM messages WHERE channel_id = $1)")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM reactions WHERE message_id IN (SELECT id FROM messages WHERE channel_id = $1)")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM messages WHERE channel_id = $1").bind(id).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM permission_overwrites WHERE channel_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM channels WHERE id = $1").bind(id).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

// ─── Permission overwrites ──────────────────────────────────────────────────

pub mod overwrites {
    use sqlx::PgPool;
    use uuid::Uuid;

    use crate::models::PermissionOverwrite;

    pub async fn list_for_channel(
        pool: &PgPool,
        channel_id: Uuid,
    ) -> Result<Vec<PermissionOverwrite>, sqlx::Error> {
        sqlx::query_as::<_, PermissionOverwrite>(
            "SELECT * FROM permission_overwrites WHERE channel_id = $1",
        )
        .bind(channel_id)
        .fetch_all(pool)
        .await
    }

    pub async fn upsert(pool: &PgPool, ow: &PermissionOverwrite) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO permission_overwrites (channel_id, target_id, target_type, allow, deny)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (channel_id, target_id, target_type)
            DO UPDATE SET allow = EXCLUDED.allow, deny = EXCLUDED.deny
            "#,
        )
        .bind(ow.channel_id)
        .bind(ow.target_id)
        .bind(ow.target_type)
        .bind(ow.allow)
        .bind(ow.deny)
        .execute(pool)
        .await?;
        Ok(())
    }
}

// ─── Messages ───────────────────────────────────────────────────────────────

pub mod messages {
    use sqlx::{PgPool, Row};
    use uuid::Uuid;

    use crate::models::{Message, MessageMentions, MessageType, UserPublic};

    /// Inserts the message and its mention rows inside one transaction.
    pub async fn create(
        pool: &PgPool,
        id: Uuid,
        channel_id: Uuid,
        author_id: Uuid,
        content: &str,
        reply_to_id: Option<Uuid>,
        mentions: &MessageMentions,
    ) -> Result<Message, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, channel_id, author_id, content, message_type,
                                   created_at, is_pinned, reply_to_id, mentions_everyone)
            VALUES ($1, $2, $3, $4, 'default', NOW(), false, $5, $6)
            "#,
        )
        .bind(id)
        .bind(channel_id)
        .bind(author_id)
        .bind(content)
        .bind(reply_to_id)
        .bind(mentions.everyone)
        .execute(&mut *tx)
        .await?;

        for user_id in &mentions.users {
            sqlx::query("INSERT INTO message_mention_users (message_id, user_id) VALUES ($1, $2)")
                .bind(id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }
        for role_id in &mentions.roles {
            sqlx::query("INSERT INTO message_mention_roles (message_id, role_id) VALUES ($1, $2)")
                .bind(id)
                .bind(role_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        let author = super::users::find_by_id(pool, author_id).await?.map(UserPublic::from);
        Ok(Message {
            id,
            channel_id,
            author_id,
            content: content.to_string(),
            message_type: MessageType::Default,
            created_at: chrono::Utc::now(),
            edited_at: None,
            is_pinned: false,
            reply_to_id,
            mentions: mentions.clone(),
            author,
        })
    }

    /// Returns up to `limit` messages strictly older than `before` (or the newest
    /// window if `before` is `None`), ascending by `created_at`/`id`.
    pub async fn list_for_channel(
        pool: &PgPool,
        channel_id: Uuid,
        before: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Message>, sqlx::Error> {
        let rows = if let Some(before_id) = before {
            sqlx::query(
                r#"
                SELECT m.id, m.channel_id, m.author_id, m.content, m.message_type,
                       m.created_at, m.edited_at, m.is_pinned, m.reply_to_id, m.mentions_everyone,
                       u.id AS author_uid, u.username, u.discriminator, u.display_name,
                       u.avatar_hash, u.status, u.status_text, u.is_bot
                FROM messages m
                JOIN users u ON m.author_id = u.id
                WHERE m.channel_id = $1
                  AND m.created_at < (SELECT created_at FROM messages WHERE id = $2)
                ORDER BY m.created_at DESC
                LIMIT $3
                "#,
            )
            .bind(channel_id)
            .bind(before_id)
            .bind(limit)
            .fetch_all(pool)
            .await?
        } else {
            sqlx::query(
                r#"
                SELECT m.id, m.channel_id, m.author_id, m.content, m.message_type,
                       m.created_at, m.edited_at, m.is_pinned, m.reply_to_id, m.mentions_everyone,
                       u.id AS author_uid, u.username, u.discriminator, u.display_name,
                       u.avatar_hash, u.status, u.status_text, u.is_bot
                FROM messages m
                JOIN users u ON m.author_id = u.id
                WHERE m.channel_id = $1
                ORDER BY m.created_at DESC
                LIMIT $2
                "#,
            )
            .bind(channel_id)
            .bind(limit)
            .fetch_all(pool)
            .await?
        };

        let mut messages: Vec<Message> = Vec::with_capacity(rows.len());
        for row in rows.into_iter().rev() {
            let id: Uuid = row.get("id");
            let (users, roles) = mention_targets(pool, id).await?;
            messages.push(Message {
                id,
                channel_id: row.get("channel_id"),
                author_id: row.get("author_id"),
                content: row.get("content"),
                message_type: row.get("message_type"),
                created_at: row.get("created_at"),
                edited_at: row.get("edited_at"),
                is_pinned: row.get("is_pinned"),
                reply_to_id: row.get("reply_to_id"),
                mentions: MessageMentions {
                    users,
                    roles,
                    everyone: row.get("mentions_everyone"),
                },
                author: Some(UserPublic {
                    id: row.get("author_uid"),
                    username: row.get("username"),
                    discriminator: row.get("discriminator"),
                    display_name: row.get("display_name"),
                    avatar_hash: row.get("avatar_hash"),
                    status: row.get("status"),
                    status_text: row.get("status_text"),
                    is_bot: row.get("is_bot"),
                }),
            });
        }
        Ok(messages)
    }

    async fn mention_targets(pool: &PgPool, message_id: Uuid) -> Result<(Vec<Uuid>, Vec<Uuid>), sqlx::Error> {
        let users: Vec<(Uuid,)> =
            sqlx::query_as("SELECT user_id FROM message_mention_users WHERE message_id = $1")
                .bind(message_id)
                .fetch_all(pool)
                .await?;
        let roles: Vec<(Uuid,)> =
            sqlx::query_as("SELECT role_id FROM message_mention_roles WHERE message_id = $1")
                .bind(message_id)
                .fetch_all(pool)
                .await?;
        Ok((users.into_iter().map(|r| r.0).collect(), roles.into_iter().map(|r| r.0).collect()))
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Message>, sqlx::Error> {
        let row = sqlx::query_as::<_, (Uuid, Uuid, Uuid, String, MessageType, chrono::DateTime<chrono::Utc>, Option<chrono::DateTime<chrono::Utc>>, bool, Option<Uuid>, bool)>(
            "SELECT id, channel_id, author_id, content, message_type, created_at, edited_at, is_pinned, reply_to_id, mentions_everyone FROM messages WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        let Some((id, channel_id, author_id, content, message_type, created_at, edited_at, is_pinned, reply_to_id, everyone)) = row else {
            return Ok(None);
        };
        let (users, roles) = mention_targets(pool, id).await?;
        let author = super::users::find_by_id(pool, author_id).await?.map(UserPublic::from);
        Ok(Some(Message {
            id,
            channel_id,
            author_id,
            content,
            message_type,
            created_at,
            edited_at,
            is_pinned,
            reply_to_id,
            mentions: MessageMentions { users, roles, everyone },
            author,
        }))
    }

    pub async fn update_content(pool: &PgPool, id: Uuid, content: &str) -> Result<Option<Message>, sqlx::Error> {
        let result = sqlx::query("UPDATE messages SET content = $2, edited_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(content)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        find_by_id(pool, id).await
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM message_mention_users WHERE message_id = $1").bind(id).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM message_mention_roles WHERE message_id = $1").bind(id).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM reactions WHERE message_id = $1").bind(id).execute(&mut *tx).await?;
        let result = sqlx::query("DELETE FROM messages WHERE id = $1").bind(id).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

// ─── Reactions ──────────────────────────────────────────────────────────────

pub mod reactions {
    use sqlx::PgPool;
    use uuid::Uuid;

    pub async fn add(pool: &PgPool, message_id: Uuid, user_id: Uuid, emoji: &str) -> Result<i64, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO reactions (message_id, user_id, emoji, created_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (message_id, user_id, emoji) DO NOTHING
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .execute(pool)
        .await?;
        count(pool, message_id, emoji).await
    }

    pub async fn remove(pool: &PgPool, message_id: Uuid, user_id: Uuid, emoji: &str) -> Result<i64, sqlx::Error> {
        sqlx::query("DELETE FROM reactions WHERE message_id = $1 AND user_id = $2 AND emoji = $3")
            .bind(message_id)
            .bind(user_id)
            .bind(emoji)
            .execute(pool)
            .await?;
        count(pool, message_id, emoji).await
    }

    pub async fn count(pool: &PgPool, message_id: Uuid, emoji: &str) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM reactions WHERE message_id = $1 AND emoji = $2",
        )
        .bind(message_id)
        .bind(emoji)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    pub async fn count_distinct_for_message(pool: &PgPool, message_id: Uuid) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(DISTINCT emoji) FROM reactions WHERE message_id = $1",
        )
        .bind(message_id)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }
}

// ─── Members ────────────────────────────────────────────────────────────────

pub mod members {
    use sqlx::PgPool;
    use uuid::Uuid;

    use crate::models::ServerMember;

    pub async fn add(pool: &PgPool, user_id: Uuid, server_id: Uuid) -> Result<ServerMember, sqlx::Error> {
        let mut member = sqlx::query_as::<_, ServerMember>(
            r#"
            INSERT INTO server_members (user_id, server_id, joined_at, is_muted, is_deafened)
            VALUES ($1, $2, NOW(), false, false)
            ON CONFLICT (user_id, server_id) DO UPDATE SET joined_at = server_members.joined_at
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(server_id)
        .fetch_one(pool)
        .await?;
        member.role_ids = super::roles::role_ids_for_member(pool, user_id, server_id).await?;
        Ok(member)
    }

    pub async fn remove(pool: &PgPool, user_id: Uuid, server_id: Uuid) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM member_roles WHERE user_id = $1 AND server_id = $2")
            .bind(user_id)
            .bind(server_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM server_members WHERE user_id = $1 AND server_id = $2")
            .bind(user_id)
            .bind(server_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find(pool: &PgPool, user_id: Uuid, server_id: Uuid) -> Result<Option<ServerMember>, sqlx::Error> {
        let member = sqlx::query_as::<_, ServerMember>(
            "SELECT * FROM server_members WHERE user_id = $1 AND server_id = $2",
        )
        .bind(user_id)
        .bind(server_id)
        .fetch_optional(pool)
        .await?;

        match member {
            Some(mut m) => {
                m.role_ids = super::roles::role_ids_for_member(pool, user_id, server_id).await?;
                Ok(Some(m))
            }
            None => Ok(None),
        }
    }

    /// All members of a server, each with its role_ids populated.
    pub async fn list_for_server(pool: &PgPool, server_id: Uuid) -> Result<Vec<ServerMember>, sqlx::Error> {
        let mut members = sqlx::query_as::<_, ServerMember>(
            "SELECT * FROM server_members WHERE server_id = $1 ORDER BY joined_at",
        )
        .bind(server_id)
        .fetch_all(pool)
        .await?;

        let role_rows: Vec<(Uuid, Uuid)> =
            sqlx::query_as("SELECT user_id, role_id FROM member_roles WHERE server_id = $1")
                .bind(server_id)
                .fetch_all(pool)
                .await?;

        for member in &mut members {
            member.role_ids = role_rows
                .iter()
                .filter(|(uid, _)| *uid == member.user_id)
                .map(|(_, rid)| *rid)
                .collect();
        }
        Ok(members)
    }

    pub async fn set_muted(pool: &PgPool, user_id: Uuid, server_id: Uuid, muted: bool) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE server_members SET is_muted = $3 WHERE user_id = $1 AND server_id = $2")
            .bind(user_id)
            .bind(server_id)
            .bind(muted)
            .execute(pool)
            .await?;
        Ok(())
    }
}

// ─── Roles ──────────────────────────────────────────────────────────────────

pub mod roles {
    use sqlx::PgPool;
    use uuid::Uuid;

    use crate::models::Role;

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        pool: &PgPool,
        id: Uuid,
        server_id: Uuid,
        name: &str,
        color: i32,
        permissions: i64,
        position: i32,
        is_default: bool,
    ) -> Result<Role, sqlx::Error> {
        sqlx::query_as::<_, Role>(
            r#"
            INSERT INTO roles (id, server_id, name, color, permissions, position, is_hoisted, is_mentionable, is_default)
            VALUES ($1, $2, $3, $4, $5, $6, false, true, $7)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(server_id)
        .bind(name)
        .bind(color)
        .bind(permissions)
        .bind(position)
        .bind(is_default)
        .fetch_one(pool)
        .await
    }

    pub async fn list_for_server(pool: &PgPool, server_id: Uuid) -> Result<Vec<Role>, sqlx::Error> {
        sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE server_id = $1 ORDER BY position")
            .bind(server_id)
            .fetch_all(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Role>, sqlx::Error> {
        sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_name(pool: &PgPool, server_id: Uuid, name: &str) -> Result<Option<Role>, sqlx::Error> {
        sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE server_id = $1 AND LOWER(name) = LOWER($2)")
            .bind(server_id)
            .bind(name)
            .fetch_optional(pool)
            .await
    }

    pub async fn default_role(pool: &PgPool, server_id: Uuid) -> Result<Role, sqlx::Error> {
        sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE server_id = $1 AND is_default = true")
            .bind(server_id)
            .fetch_one(pool)
            .await
    }

    pub async fn add_member_role(
        pool: &PgPool,
        user_id: Uuid,
        server_id: Uuid,
        role_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO member_roles (user_id, server_id, role_id) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(server_id)
        .bind(role_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn remove_member_role(
        pool: &PgPool,
        user_id: Uuid,
        server_id: Uuid,
        role_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM member_roles WHERE user_id = $1 AND server_id = $2 AND role_id = $3")
            .bind(user_id)
            .bind(server_id)
            .bind(role_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn role_ids_for_member(pool: &PgPool, user_id: Uuid, server_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error> {
        let rows: Vec<(Uuid,)> =
            sqlx::query_as("SELECT role_id FROM member_roles WHERE user_id = $1 AND server_id = $2")
                .bind(user_id)
                .bind(server_id)
                .fetch_all(pool)
                .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    pub async fn roles_for_member(pool: &PgPool, user_id: Uuid, server_id: Uuid) -> Result<Vec<Role>, sqlx::Error> {
        sqlx::query_as::<_, Role>(
            r#"
            SELECT r.* FROM roles r
            INNER JOIN member_roles mr ON mr.role_id = r.id
            WHERE mr.user_id = $1 AND mr.server_id = $2
            "#,
        )
        .bind(user_id)
        .bind(server_id)
        .fetch_all(pool)
        .await
    }
}

// ─── Bans ───────────────────────────────────────────────────────────────────

pub mod bans {
    use sqlx::PgPool;
    use uuid::Uuid;

    /// Records the ban and removes the membership in one transaction, so a
    /// crash between the two never leaves a ban with no membership removed
    /// (or vice versa) — mirrors `channels::delete`'s multi-statement commit.
    pub async fn ban_member(
        pool: &PgPool,
        server_id: Uuid,
        user_id: Uuid,
        reason: Option<&str>,
        banned_by: Uuid,
    ) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO bans (server_id, user_id, reason, banned_by, banned_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (server_id, user_id) DO UPDATE SET reason = EXCLUDED.reason
            "#,
        )
        .bind(server_id)
        .bind(user_id)
        .bind(reason)
        .bind(banned_by)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM member_roles WHERE user_id = $1 AND server_id = $2")
            .bind(user_id)
            .bind(server_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM server_members WHERE user_id = $1 AND server_id = $2")
            .bind(user_id)
            .bind(server_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn is_banned(pool: &PgPool, server_id: Uuid, user_id: Uuid) -> Result<bool, sqlx::Error> {
        let row = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM bans WHERE server_id = $1 AND user_id = $2",
        )
        .bind(server_id)
        .bind(user_id)
        .fetch_one(pool)
        .await?;
        Ok(row > 0)
    }
}

// ─── Sessions (persisted auth sessions) ────────────────────────────────────

pub mod sessions {
    use chrono::{DateTime, Utc};
    use sqlx::PgPool;
    use uuid::Uuid;

    use crate::models::SessionRecord;

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        pool: &PgPool,
        id: Uuid,
        user_id: Uuid,
        token_digest: Vec<u8>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, token_digest, created_at, expires_at, last_used_at, ip, user_agent)
            VALUES ($1, $2, $3, $4, $5, $4, $6, $7)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(token_digest)
        .bind(created_at)
        .bind(expires_at)
        .bind(ip)
        .bind(user_agent)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_digest(pool: &PgPool, digest: &[u8]) -> Result<Option<SessionRecord>, sqlx::Error> {
        sqlx::query_as::<_, SessionRecord>("SELECT * FROM sessions WHERE token_digest = $1")
            .bind(digest)
            .fetch_optional(pool)
            .await
    }

    pub async fn touch(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE sessions SET last_used_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM sessions WHERE id = $1").bind(id).execute(pool).await?;
        Ok(())
    }

    pub async fn delete_by_digest(pool: &PgPool, digest: &[u8]) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM sessions WHERE token_digest = $1")
            .bind(digest)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn delete_for_user(pool: &PgPool, user_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM sessions WHERE user_id = $1").bind(user_id).execute(pool).await?;
        Ok(())
    }
}
