use std::sync::Arc;

use application::repository::{
    ChatRepository, FriendRequestRepository, MessageRepository, RevokedTokenStore, UserRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Attachment, Chat, ChatId, FriendRequest, Message, MessageId, PasswordHash, RepositoryError,
    RequestId, Timestamp, User, UserId,
};
use sqlx::{postgres::PgPoolOptions, types::Json, FromRow, PgPool};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

fn uuids<T: Copy + Into<Uuid>>(ids: &[T]) -> Vec<Uuid> {
    ids.iter().copied().map(Into::into).collect()
}

/// ILIKE 模式转义
fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    name: String,
    username: String,
    bio: String,
    password_hash: String,
    avatar: Json<Attachment>,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let password =
            PasswordHash::new(value.password_hash).map_err(|err| invalid_data(err.to_string()))?;

        Ok(User {
            id: UserId::from(value.id),
            name: value.name,
            username: value.username,
            bio: value.bio,
            password,
            avatar: value.avatar.0,
            created_at: value.created_at,
        })
    }
}

const USER_COLUMNS: &str = "id, name, username, bio, password_hash, avatar, created_at";

#[derive(Debug, FromRow)]
struct ChatRecord {
    id: Uuid,
    name: String,
    is_group: bool,
    creator: Option<Uuid>,
    members: Vec<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl From<ChatRecord> for Chat {
    fn from(value: ChatRecord) -> Self {
        Chat {
            id: ChatId::from(value.id),
            name: value.name,
            is_group: value.is_group,
            creator: value.creator.map(UserId::from),
            members: value.members.into_iter().map(UserId::from).collect(),
            created_at: value.created_at,
            updated_at: value.updated_at,
            version: value.version,
        }
    }
}

const CHAT_COLUMNS: &str =
    "id, name, is_group, creator, members, created_at, updated_at, version";

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    chat_id: Uuid,
    sender_id: Uuid,
    content: Option<String>,
    attachments: Json<Vec<Attachment>>,
    created_at: DateTime<Utc>,
}

impl From<MessageRecord> for Message {
    fn from(value: MessageRecord) -> Self {
        Message {
            id: MessageId::from(value.id),
            chat_id: ChatId::from(value.chat_id),
            sender_id: UserId::from(value.sender_id),
            content: value.content,
            attachments: value.attachments.0,
            created_at: value.created_at,
        }
    }
}

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, content, attachments, created_at";

#[derive(Debug, FromRow)]
struct RequestRecord {
    id: Uuid,
    sender: Uuid,
    receiver: Uuid,
    created_at: DateTime<Utc>,
}

impl From<RequestRecord> for FriendRequest {
    fn from(value: RequestRecord) -> Self {
        FriendRequest {
            id: RequestId::from(value.id),
            sender: UserId::from(value.sender),
            receiver: UserId::from(value.receiver),
            created_at: value.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            INSERT INTO users (id, name, username, bio, password_hash, avatar, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::from(user.id))
        .bind(&user.name)
        .bind(&user.username)
        .bind(&user.bio)
        .bind(user.password.as_str())
        .bind(Json(&user.avatar))
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        User::try_from(record)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }

    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1)"
        ))
        .bind(uuids(ids))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(User::try_from).collect()
    }

    async fn search(&self, query: &str, exclude: &[UserId]) -> Result<Vec<User>, RepositoryError> {
        let records = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users
            WHERE (name ILIKE $1 OR username ILIKE $1) AND NOT (id = ANY($2))
            ORDER BY name
            "#
        ))
        .bind(like_pattern(query))
        .bind(uuids(exclude))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(User::try_from).collect()
    }

    async fn list_all(&self) -> Result<Vec<User>, RepositoryError> {
        let records = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(User::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgChatRepository {
    pool: PgPool,
}

impl PgChatRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 条件写入未命中：会话仍在说明版本已变化，否则已被删除
    async fn missed_write(&self, id: ChatId) -> RepositoryError {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM chats WHERE id = $1)")
                .bind(Uuid::from(id))
                .fetch_one(&self.pool)
                .await;
        match exists {
            Ok(true) => RepositoryError::Conflict,
            Ok(false) => RepositoryError::NotFound,
            Err(err) => map_sqlx_err(err),
        }
    }
}

#[async_trait]
impl ChatRepository for PgChatRepository {
    async fn create(&self, chat: Chat) -> Result<Chat, RepositoryError> {
        let record = sqlx::query_as::<_, ChatRecord>(&format!(
            r#"
            INSERT INTO chats (id, name, is_group, creator, members, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {CHAT_COLUMNS}
            "#
        ))
        .bind(Uuid::from(chat.id))
        .bind(&chat.name)
        .bind(chat.is_group)
        .bind(chat.creator.map(Uuid::from))
        .bind(uuids(&chat.members))
        .bind(chat.created_at)
        .bind(chat.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(Chat::from(record))
    }

    async fn update(&self, chat: Chat) -> Result<Chat, RepositoryError> {
        let record = sqlx::query_as::<_, ChatRecord>(&format!(
            r#"
            UPDATE chats
            SET name = $2, creator = $3, members = $4, updated_at = $5, version = version + 1
            WHERE id = $1 AND version = $6
            RETURNING {CHAT_COLUMNS}
            "#
        ))
        .bind(Uuid::from(chat.id))
        .bind(&chat.name)
        .bind(chat.creator.map(Uuid::from))
        .bind(uuids(&chat.members))
        .bind(chat.updated_at)
        .bind(chat.version)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        match record {
            Some(record) => Ok(Chat::from(record)),
            None => Err(self.missed_write(chat.id).await),
        }
    }

    async fn delete(&self, chat: &Chat) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM chats WHERE id = $1 AND version = $2")
            .bind(Uuid::from(chat.id))
            .bind(chat.version)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(self.missed_write(chat.id).await);
        }
        Ok(())
    }

    async fn find_by_id(&self, id: ChatId) -> Result<Option<Chat>, RepositoryError> {
        let record = sqlx::query_as::<_, ChatRecord>(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(Chat::from))
    }

    async fn list_for_member(&self, user_id: UserId) -> Result<Vec<Chat>, RepositoryError> {
        let records = sqlx::query_as::<_, ChatRecord>(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats WHERE $1 = ANY(members) ORDER BY updated_at DESC"
        ))
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(Chat::from).collect())
    }

    async fn list_all(&self) -> Result<Vec<Chat>, RepositoryError> {
        let records = sqlx::query_as::<_, ChatRecord>(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(Chat::from).collect())
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn save(&self, message: Message) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, chat_id, sender_id, content, attachments, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.chat_id))
        .bind(Uuid::from(message.sender_id))
        .bind(message.content.as_deref())
        .bind(Json(&message.attachments))
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }

    async fn list_page(
        &self,
        chat_id: ChatId,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Message>, RepositoryError> {
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE chat_id = $1
            ORDER BY created_at DESC, id DESC
            OFFSET $2 LIMIT $3
            "#
        ))
        .bind(Uuid::from(chat_id))
        .bind(to_i64(offset))
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(Message::from).collect())
    }

    async fn count_for_chat(&self, chat_id: ChatId) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE chat_id = $1")
            .bind(Uuid::from(chat_id))
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn delete_for_chat(&self, chat_id: ChatId) -> Result<Vec<Message>, RepositoryError> {
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            "DELETE FROM messages WHERE chat_id = $1 RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(Uuid::from(chat_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(Message::from).collect())
    }

    async fn list_all(&self) -> Result<Vec<Message>, RepositoryError> {
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(Message::from).collect())
    }

    async fn created_since(&self, since: Timestamp) -> Result<Vec<Timestamp>, RepositoryError> {
        sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT created_at FROM messages WHERE created_at >= $1",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }
}

#[derive(Clone)]
pub struct PgFriendRequestRepository {
    pool: PgPool,
}

impl PgFriendRequestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FriendRequestRepository for PgFriendRequestRepository {
    async fn create(&self, request: FriendRequest) -> Result<FriendRequest, RepositoryError> {
        let record = sqlx::query_as::<_, RequestRecord>(
            r#"
            INSERT INTO friend_requests (id, sender, receiver, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, sender, receiver, created_at
            "#,
        )
        .bind(Uuid::from(request.id))
        .bind(Uuid::from(request.sender))
        .bind(Uuid::from(request.receiver))
        .bind(request.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(FriendRequest::from(record))
    }

    async fn find_by_id(&self, id: RequestId) -> Result<Option<FriendRequest>, RepositoryError> {
        let record = sqlx::query_as::<_, RequestRecord>(
            "SELECT id, sender, receiver, created_at FROM friend_requests WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(FriendRequest::from))
    }

    async fn find_between(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<FriendRequest>, RepositoryError> {
        let record = sqlx::query_as::<_, RequestRecord>(
            r#"
            SELECT id, sender, receiver, created_at FROM friend_requests
            WHERE (sender = $1 AND receiver = $2) OR (sender = $2 AND receiver = $1)
            "#,
        )
        .bind(Uuid::from(a))
        .bind(Uuid::from(b))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(FriendRequest::from))
    }

    async fn delete(&self, id: RequestId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM friend_requests WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_for_receiver(
        &self,
        receiver: UserId,
    ) -> Result<Vec<FriendRequest>, RepositoryError> {
        let records = sqlx::query_as::<_, RequestRecord>(
            r#"
            SELECT id, sender, receiver, created_at FROM friend_requests
            WHERE receiver = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(Uuid::from(receiver))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(FriendRequest::from).collect())
    }
}

#[derive(Clone)]
pub struct PgRevokedTokenStore {
    pool: PgPool,
}

impl PgRevokedTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RevokedTokenStore for PgRevokedTokenStore {
    async fn revoke(&self, token: &str) -> Result<(), RepositoryError> {
        sqlx::query("INSERT INTO revoked_tokens (token) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Ok(())
    }

    async fn is_revoked(&self, token: &str) -> Result<bool, RepositoryError> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM revoked_tokens WHERE token = $1)")
            .bind(token)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)
    }
}

pub struct PgStorage {
    pub pool: PgPool,
    pub user_repository: Arc<PgUserRepository>,
    pub chat_repository: Arc<PgChatRepository>,
    pub message_repository: Arc<PgMessageRepository>,
    pub request_repository: Arc<PgFriendRequestRepository>,
    pub revoked_tokens: Arc<PgRevokedTokenStore>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            user_repository: Arc::new(PgUserRepository::new(pool.clone())),
            chat_repository: Arc::new(PgChatRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            request_repository: Arc::new(PgFriendRequestRepository::new(pool.clone())),
            revoked_tokens: Arc::new(PgRevokedTokenStore::new(pool.clone())),
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
