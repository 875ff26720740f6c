use std::sync::Arc;

use domain::{Chat, ChatId, DomainError, UserId};

use crate::error::ApplicationResult;
use crate::repository::ChatRepository;

/// 会话成员解析。每次调用都从会话存储重新读取，不做跨事件缓存，
/// 因此成员变更后的扇出总是基于变更后的成员集合。
#[derive(Clone)]
pub struct MembershipResolver {
    chats: Arc<dyn ChatRepository>,
}

impl MembershipResolver {
    pub fn new(chats: Arc<dyn ChatRepository>) -> Self {
        Self { chats }
    }

    pub async fn chat(&self, chat_id: ChatId) -> ApplicationResult<Chat> {
        self.chats
            .find_by_id(chat_id)
            .await?
            .ok_or_else(|| DomainError::not_found("chat").into())
    }

    pub async fn members(&self, chat_id: ChatId) -> ApplicationResult<Vec<UserId>> {
        Ok(self.chat(chat_id).await?.members)
    }

    /// 解析成员并确认 `user_id` 属于该会话
    pub async fn members_for(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> ApplicationResult<Vec<UserId>> {
        let chat = self.chat(chat_id).await?;
        chat.ensure_member(user_id)?;
        Ok(chat.members)
    }
}
