use async_trait::async_trait;
use domain::{
    Chat, ChatId, FriendRequest, Message, RepositoryError, RequestId, Timestamp, User, UserId,
};

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: User) -> Result<User, RepositoryError>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError>;
    /// 批量查询；不存在的 id 被忽略，返回顺序不保证
    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>, RepositoryError>;
    /// 名称或用户名模糊匹配（忽略大小写），排除 `exclude` 中的用户
    async fn search(&self, query: &str, exclude: &[UserId]) -> Result<Vec<User>, RepositoryError>;
    async fn list_all(&self) -> Result<Vec<User>, RepositoryError>;
}

#[async_trait]
pub trait ChatRepository: Send + Sync {
    async fn create(&self, chat: Chat) -> Result<Chat, RepositoryError>;
    /// 仅当存储中的版本与 `chat.version` 相同时写入，返回版本加一后的会话；
    /// 版本不一致返回 `Conflict`
    async fn update(&self, chat: Chat) -> Result<Chat, RepositoryError>;
    /// 与 `update` 相同的版本条件删除
    async fn delete(&self, chat: &Chat) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: ChatId) -> Result<Option<Chat>, RepositoryError>;
    async fn list_for_member(&self, user_id: UserId) -> Result<Vec<Chat>, RepositoryError>;
    async fn list_all(&self) -> Result<Vec<Chat>, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn save(&self, message: Message) -> Result<(), RepositoryError>;

    /// 按创建时间倒序分页
    async fn list_page(
        &self,
        chat_id: ChatId,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn count_for_chat(&self, chat_id: ChatId) -> Result<u64, RepositoryError>;

    /// 删除会话下的全部消息，返回被删除的记录（用于清理附件）
    async fn delete_for_chat(&self, chat_id: ChatId) -> Result<Vec<Message>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<Message>, RepositoryError>;

    async fn created_since(&self, since: Timestamp) -> Result<Vec<Timestamp>, RepositoryError>;
}

#[async_trait]
pub trait FriendRequestRepository: Send + Sync {
    async fn create(&self, request: FriendRequest) -> Result<FriendRequest, RepositoryError>;
    async fn find_by_id(&self, id: RequestId) -> Result<Option<FriendRequest>, RepositoryError>;
    /// 查找无序用户对 {a, b} 之间的待处理请求
    async fn find_between(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<FriendRequest>, RepositoryError>;
    /// 请求已不存在时返回 `NotFound`，并发处理同一请求时只有一方成功
    async fn delete(&self, id: RequestId) -> Result<(), RepositoryError>;
    async fn list_for_receiver(
        &self,
        receiver: UserId,
    ) -> Result<Vec<FriendRequest>, RepositoryError>;
}

/// 已注销令牌列表
#[async_trait]
pub trait RevokedTokenStore: Send + Sync {
    async fn revoke(&self, token: &str) -> Result<(), RepositoryError>;
    async fn is_revoked(&self, token: &str) -> Result<bool, RepositoryError>;
}
