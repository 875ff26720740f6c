//! 协作者的内存实现。未配置数据库时由二进制使用，也用于测试。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use domain::{
    Attachment, Chat, ChatId, FriendRequest, Message, PasswordHash, RepositoryError, RequestId,
    Timestamp, User, UserId,
};
use tokio::sync::RwLock;

use crate::password::{PasswordHasher, PasswordHasherError};
use crate::repository::{
    ChatRepository, FriendRequestRepository, MessageRepository, RevokedTokenStore, UserRepository,
};
use crate::storage::{ObjectStore, UploadError, UploadFile};

#[derive(Default)]
pub struct MemoryUserRepository {
    users: RwLock<HashMap<UserId, User>>,
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let mut users = self.users.write().await;
        if users.values().any(|existing| existing.username == user.username) {
            return Err(RepositoryError::Conflict);
        }
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.values().find(|user| user.username == username).cloned())
    }

    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>, RepositoryError> {
        let users = self.users.read().await;
        let mut seen = HashSet::new();
        Ok(ids
            .iter()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| users.get(id).cloned())
            .collect())
    }

    async fn search(&self, query: &str, exclude: &[UserId]) -> Result<Vec<User>, RepositoryError> {
        let users = self.users.read().await;
        let mut found: Vec<User> = users
            .values()
            .filter(|user| !exclude.contains(&user.id) && user.matches(query))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn list_all(&self) -> Result<Vec<User>, RepositoryError> {
        let mut all: Vec<User> = self.users.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }
}

#[derive(Default)]
pub struct MemoryChatRepository {
    chats: RwLock<HashMap<ChatId, Chat>>,
}

#[async_trait]
impl ChatRepository for MemoryChatRepository {
    async fn create(&self, chat: Chat) -> Result<Chat, RepositoryError> {
        let mut chats = self.chats.write().await;
        if chats.contains_key(&chat.id) {
            return Err(RepositoryError::Conflict);
        }
        chats.insert(chat.id, chat.clone());
        Ok(chat)
    }

    async fn update(&self, mut chat: Chat) -> Result<Chat, RepositoryError> {
        let mut chats = self.chats.write().await;
        let slot = chats.get_mut(&chat.id).ok_or(RepositoryError::NotFound)?;
        if slot.version != chat.version {
            return Err(RepositoryError::Conflict);
        }
        chat.version += 1;
        *slot = chat.clone();
        Ok(chat)
    }

    async fn delete(&self, chat: &Chat) -> Result<(), RepositoryError> {
        let mut chats = self.chats.write().await;
        let stored = chats.get(&chat.id).ok_or(RepositoryError::NotFound)?;
        if stored.version != chat.version {
            return Err(RepositoryError::Conflict);
        }
        chats.remove(&chat.id);
        Ok(())
    }

    async fn find_by_id(&self, id: ChatId) -> Result<Option<Chat>, RepositoryError> {
        Ok(self.chats.read().await.get(&id).cloned())
    }

    async fn list_for_member(&self, user_id: UserId) -> Result<Vec<Chat>, RepositoryError> {
        let chats = self.chats.read().await;
        let mut found: Vec<Chat> = chats
            .values()
            .filter(|chat| chat.is_member(user_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(found)
    }

    async fn list_all(&self) -> Result<Vec<Chat>, RepositoryError> {
        let mut all: Vec<Chat> = self.chats.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }
}

#[derive(Default)]
pub struct MemoryMessageRepository {
    messages: RwLock<Vec<Message>>,
    fail_writes: AtomicBool,
}

impl MemoryMessageRepository {
    /// 打开后所有写入都返回存储错误
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageRepository for MemoryMessageRepository {
    async fn save(&self, message: Message) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::storage("message store unavailable"));
        }
        self.messages.write().await.push(message);
        Ok(())
    }

    async fn list_page(
        &self,
        chat_id: ChatId,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        let mut in_chat: Vec<&Message> = messages
            .iter()
            .filter(|message| message.chat_id == chat_id)
            .collect();
        // 稳定排序：同一时间戳按写入顺序倒序
        in_chat.reverse();
        in_chat.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(in_chat
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn count_for_chat(&self, chat_id: ChatId) -> Result<u64, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(messages.iter().filter(|m| m.chat_id == chat_id).count() as u64)
    }

    async fn delete_for_chat(&self, chat_id: ChatId) -> Result<Vec<Message>, RepositoryError> {
        let mut messages = self.messages.write().await;
        let (removed, kept): (Vec<Message>, Vec<Message>) = messages
            .drain(..)
            .partition(|message| message.chat_id == chat_id);
        *messages = kept;
        Ok(removed)
    }

    async fn list_all(&self) -> Result<Vec<Message>, RepositoryError> {
        Ok(self.messages.read().await.clone())
    }

    async fn created_since(&self, since: Timestamp) -> Result<Vec<Timestamp>, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .map(|message| message.created_at)
            .filter(|created| *created >= since)
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryFriendRequestRepository {
    requests: RwLock<HashMap<RequestId, FriendRequest>>,
}

#[async_trait]
impl FriendRequestRepository for MemoryFriendRequestRepository {
    async fn create(&self, request: FriendRequest) -> Result<FriendRequest, RepositoryError> {
        let mut requests = self.requests.write().await;
        if requests
            .values()
            .any(|existing| existing.involves_pair(request.sender, request.receiver))
        {
            return Err(RepositoryError::Conflict);
        }
        requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn find_by_id(&self, id: RequestId) -> Result<Option<FriendRequest>, RepositoryError> {
        Ok(self.requests.read().await.get(&id).cloned())
    }

    async fn find_between(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<FriendRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests
            .values()
            .find(|request| request.involves_pair(a, b))
            .cloned())
    }

    async fn delete(&self, id: RequestId) -> Result<(), RepositoryError> {
        self.requests
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    async fn list_for_receiver(
        &self,
        receiver: UserId,
    ) -> Result<Vec<FriendRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        let mut found: Vec<FriendRequest> = requests
            .values()
            .filter(|request| request.receiver == receiver)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }
}

#[derive(Default)]
pub struct MemoryRevokedTokens {
    tokens: RwLock<HashSet<String>>,
}

#[async_trait]
impl RevokedTokenStore for MemoryRevokedTokens {
    async fn revoke(&self, token: &str) -> Result<(), RepositoryError> {
        self.tokens.write().await.insert(token.to_owned());
        Ok(())
    }

    async fn is_revoked(&self, token: &str) -> Result<bool, RepositoryError> {
        Ok(self.tokens.read().await.contains(token))
    }
}

/// 内存对象存储，生成 `memory://` 地址。可按文件名注入上传失败。
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, UploadFile>,
    failing: DashSet<String>,
    sequence: AtomicU64,
}

impl MemoryObjectStore {
    pub fn fail_on(&self, file_name: impl Into<String>) {
        self.failing.insert(file_name.into());
    }

    pub fn stored_count(&self) -> usize {
        self.objects.len()
    }

    pub fn contains(&self, public_id: &str) -> bool {
        self.objects.contains_key(public_id)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, file: UploadFile) -> Result<Attachment, UploadError> {
        if self.failing.contains(&file.file_name) {
            return Err(UploadError::Rejected {
                file_name: file.file_name,
                reason: "injected failure".into(),
            });
        }
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let public_id = format!("{}-{}", uuid::Uuid::new_v4(), sequence);
        let url = format!("memory://{public_id}/{}", file.file_name);
        self.objects.insert(public_id.clone(), file);
        Ok(Attachment::new(public_id, url))
    }

    async fn delete(&self, public_ids: &[String]) -> Result<(), UploadError> {
        for public_id in public_ids {
            self.objects.remove(public_id);
        }
        Ok(())
    }
}

/// 不做哈希的密码处理器，仅用于本地开发和测试
#[derive(Debug, Default)]
pub struct PlaintextPasswordHasher;

#[async_trait]
impl PasswordHasher for PlaintextPasswordHasher {
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError> {
        PasswordHash::new(format!("plain:{plaintext}"))
            .map_err(|err| PasswordHasherError::hash_error(err.to_string()))
    }

    async fn verify(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, PasswordHasherError> {
        Ok(hashed.as_str() == format!("plain:{plaintext}"))
    }
}
