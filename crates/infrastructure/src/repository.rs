use std::sync::Arc;

use application::{IdentityDirectory, MessageStore, RoomDirectory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    AvatarUrl, HistoryEntry, MessageContent, MessageId, RepositoryError, Room, RoomName,
    StoredMessage, UserProfile, Username,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};

/// 用户上传的头像以相对路径保存，对外暴露时加上媒体前缀
const MEDIA_PREFIX: &str = "/media/";

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

fn avatar_url(stored: Option<String>, default_avatar: &AvatarUrl) -> AvatarUrl {
    match stored {
        Some(path) if !path.trim().is_empty() => {
            if path.starts_with('/') || path.starts_with("http://") || path.starts_with("https://")
            {
                AvatarUrl::new(path)
            } else {
                AvatarUrl::new(format!("{MEDIA_PREFIX}{path}"))
            }
        }
        _ => default_avatar.clone(),
    }
}

#[derive(Debug, FromRow)]
struct StoredRecord {
    id: i64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct HistoryRecord {
    id: i64,
    content: String,
    username: String,
    avatar: Option<String>,
    created_at: DateTime<Utc>,
}

impl HistoryRecord {
    fn into_entry(self, default_avatar: &AvatarUrl) -> Result<HistoryEntry, RepositoryError> {
        let username =
            Username::parse(self.username).map_err(|err| invalid_data(err.to_string()))?;
        Ok(HistoryEntry {
            id: MessageId::new(self.id),
            content: self.content,
            username,
            avatar: avatar_url(self.avatar, default_avatar),
            timestamp: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ProfileRecord {
    username: String,
    avatar: Option<String>,
    bio: String,
}

impl ProfileRecord {
    fn into_profile(self, default_avatar: &AvatarUrl) -> Result<UserProfile, RepositoryError> {
        let username =
            Username::parse(self.username).map_err(|err| invalid_data(err.to_string()))?;
        Ok(UserProfile::new(
            username,
            avatar_url(self.avatar, default_avatar),
            self.bio,
        ))
    }
}

pub struct PgMessageStore {
    pool: PgPool,
    default_avatar: AvatarUrl,
}

impl PgMessageStore {
    pub fn new(pool: PgPool, default_avatar: AvatarUrl) -> Self {
        Self {
            pool,
            default_avatar,
        }
    }

    async fn room_exists(&self, room: &RoomName) -> Result<bool, RepositoryError> {
        sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS(SELECT 1 FROM chat_rooms WHERE name = $1)"#,
        )
        .bind(room.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append_message(
        &self,
        room: &RoomName,
        username: &Username,
        content: &MessageContent,
    ) -> Result<StoredMessage, RepositoryError> {
        let record = sqlx::query_as::<_, StoredRecord>(
            r#"
            INSERT INTO messages (room_id, user_id, content)
            SELECT r.id, u.id, $3
            FROM chat_rooms r
            JOIN users u ON u.username = $2
            WHERE r.name = $1
            RETURNING id, created_at
            "#,
        )
        .bind(room.as_str())
        .bind(username.as_str())
        .bind(content.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        match record {
            Some(record) => Ok(StoredMessage {
                id: MessageId::new(record.id),
                created_at: record.created_at,
            }),
            None if self.room_exists(room).await? => Err(invalid_data(format!(
                "author `{username}` has no user record"
            ))),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn fetch_recent(
        &self,
        room: &RoomName,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, RepositoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = sqlx::query_as::<_, HistoryRecord>(
            r#"
            SELECT id, content, username, avatar, created_at
            FROM (
                SELECT m.id, m.content, u.username, u.avatar, m.created_at
                FROM messages m
                JOIN chat_rooms r ON r.id = m.room_id
                JOIN users u ON u.id = m.user_id
                WHERE r.name = $1
                ORDER BY m.created_at DESC, m.id DESC
                LIMIT $2
            ) recent
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(room.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records
            .into_iter()
            .map(|record| record.into_entry(&self.default_avatar))
            .collect()
    }
}

pub struct PgIdentityDirectory {
    pool: PgPool,
    default_avatar: AvatarUrl,
}

impl PgIdentityDirectory {
    pub fn new(pool: PgPool, default_avatar: AvatarUrl) -> Self {
        Self {
            pool,
            default_avatar,
        }
    }
}

#[async_trait]
impl IdentityDirectory for PgIdentityDirectory {
    async fn resolve_avatar(&self, username: &Username) -> Result<AvatarUrl, RepositoryError> {
        let avatar: Option<Option<String>> =
            sqlx::query_scalar(r#"SELECT avatar FROM users WHERE username = $1"#)
                .bind(username.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_err)?;

        Ok(avatar_url(avatar.flatten(), &self.default_avatar))
    }

    async fn batch_resolve(
        &self,
        usernames: &[Username],
    ) -> Result<Vec<UserProfile>, RepositoryError> {
        if usernames.is_empty() {
            return Ok(Vec::new());
        }

        let names: Vec<String> = usernames.iter().map(|u| u.as_str().to_owned()).collect();
        let records = sqlx::query_as::<_, ProfileRecord>(
            r#"SELECT username, avatar, bio FROM users WHERE username = ANY($1) ORDER BY username"#,
        )
        .bind(&names)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records
            .into_iter()
            .map(|record| record.into_profile(&self.default_avatar))
            .collect()
    }
}

pub struct PgRoomDirectory {
    pool: PgPool,
}

impl PgRoomDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoomDirectory for PgRoomDirectory {
    async fn find_by_name(&self, name: &RoomName) -> Result<Option<Room>, RepositoryError> {
        let stored: Option<String> =
            sqlx::query_scalar(r#"SELECT name FROM chat_rooms WHERE name = $1"#)
                .bind(name.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_err)?;

        stored
            .map(|name| {
                RoomName::parse(name)
                    .map(Room::new)
                    .map_err(|err| invalid_data(err.to_string()))
            })
            .transpose()
    }
}

pub struct PgStorage {
    pub pool: PgPool,
    pub message_store: Arc<PgMessageStore>,
    pub identity_directory: Arc<PgIdentityDirectory>,
    pub room_directory: Arc<PgRoomDirectory>,
}

impl PgStorage {
    pub fn new(pool: PgPool, default_avatar: AvatarUrl) -> Self {
        Self {
            message_store: Arc::new(PgMessageStore::new(pool.clone(), default_avatar.clone())),
            identity_directory: Arc::new(PgIdentityDirectory::new(pool.clone(), default_avatar)),
            room_directory: Arc::new(PgRoomDirectory::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
