use std::sync::Arc;

use domain::{Chat, ChatId, DomainError, LeaveOutcome, RepositoryError, User, UserId};
use rand::Rng;

use crate::{
    clock::Clock,
    dto::{ChatDetails, ChatSummary, MemberView, MessagePage, MessageView},
    error::ApplicationResult,
    events::ServerEvent,
    membership::MembershipResolver,
    repository::{ChatRepository, MessageRepository, UserRepository},
    router::EventRouter,
    storage::ObjectStore,
};

/// 版本冲突时重新读取会话的次数上限
const MAX_WRITE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct CreateGroupRequest {
    pub name: String,
    pub members: Vec<UserId>,
}

/// 退出群聊的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveGroupOutcome {
    Left {
        chat: Chat,
        new_creator: Option<UserId>,
    },
    /// 剩余成员不足 3 人，群聊已删除
    Deleted { chat_id: ChatId },
}

/// 变更后的会话如何写回存储
enum ChatWrite {
    Update,
    Delete,
}

pub struct ChatServiceDependencies {
    pub chat_repository: Arc<dyn ChatRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub object_store: Arc<dyn ObjectStore>,
    pub membership: MembershipResolver,
    pub router: EventRouter,
    pub clock: Arc<dyn Clock>,
    pub message_page_size: u64,
}

/// 会话管理。所有成员/元数据变更先落库，再向受影响成员推送 `REFETCH_CHATS`。
pub struct ChatService {
    deps: ChatServiceDependencies,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn create_group(
        &self,
        actor: UserId,
        request: CreateGroupRequest,
    ) -> ApplicationResult<Chat> {
        self.ensure_users_exist(&request.members).await?;
        let chat = Chat::new_group(
            ChatId::generate(),
            request.name,
            actor,
            &request.members,
            self.deps.clock.now(),
        )?;
        let chat = self.deps.chat_repository.create(chat).await?;

        self.deps.router.dispatch(
            &chat.members,
            ServerEvent::alert(chat.id, format!("Welcome to {} group", chat.name)),
        );
        let others: Vec<UserId> = chat
            .members
            .iter()
            .copied()
            .filter(|id| *id != actor)
            .collect();
        self.deps.router.dispatch(&others, ServerEvent::RefetchChats);

        tracing::info!(chat_id = %chat.id, creator = %actor, members = chat.members.len(), "群聊已创建");
        Ok(chat)
    }

    pub async fn my_chats(&self, actor: UserId) -> ApplicationResult<Vec<ChatSummary>> {
        let chats = self.deps.chat_repository.list_for_member(actor).await?;
        self.summarize(actor, &chats).await
    }

    /// 当前用户创建的群聊
    pub async fn my_groups(&self, actor: UserId) -> ApplicationResult<Vec<ChatSummary>> {
        let chats: Vec<Chat> = self
            .deps
            .chat_repository
            .list_for_member(actor)
            .await?
            .into_iter()
            .filter(|chat| chat.is_group && chat.is_creator(actor))
            .collect();
        self.summarize(actor, &chats).await
    }

    pub async fn chat_details(
        &self,
        actor: UserId,
        chat_id: ChatId,
        populate: bool,
    ) -> ApplicationResult<ChatDetails> {
        let chat = self.deps.membership.chat(chat_id).await?;
        chat.ensure_member(actor)?;

        let members = if populate {
            let profiles = self.deps.user_repository.find_many(&chat.members).await?;
            chat.members
                .iter()
                .filter_map(|id| profiles.iter().find(|user| user.id == *id))
                .map(|user| MemberView::Profile(user.summary()))
                .collect()
        } else {
            chat.members.iter().copied().map(MemberView::Id).collect()
        };
        Ok(ChatDetails::new(&chat, members))
    }

    pub async fn add_members(
        &self,
        actor: UserId,
        chat_id: ChatId,
        members: Vec<UserId>,
    ) -> ApplicationResult<Chat> {
        if members.is_empty() {
            return Err(DomainError::validation("members", "please provide members").into());
        }
        self.deps
            .membership
            .chat(chat_id)
            .await?
            .ensure_creator(actor, "add members")?;

        let new_users = self.deps.user_repository.find_many(&members).await?;
        if new_users.len() != dedup_count(&members) {
            return Err(DomainError::not_found("user").into());
        }

        let now = self.deps.clock.now();
        let (chat, added) = self
            .write_chat(chat_id, |chat| {
                chat.ensure_creator(actor, "add members")?;
                let added = chat.add_members(&members, now)?;
                Ok((ChatWrite::Update, added))
            })
            .await?;

        let names = added
            .iter()
            .filter_map(|id| new_users.iter().find(|user| user.id == *id))
            .map(|user| user.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        self.deps.router.dispatch(
            &chat.members,
            ServerEvent::alert(chat.id, format!("{names} have been added to the group")),
        );
        self.deps.router.dispatch(&chat.members, ServerEvent::RefetchChats);

        tracing::info!(chat_id = %chat.id, added = added.len(), "群成员已添加");
        Ok(chat)
    }

    pub async fn remove_member(
        &self,
        actor: UserId,
        chat_id: ChatId,
        user_id: UserId,
    ) -> ApplicationResult<Chat> {
        self.deps
            .membership
            .chat(chat_id)
            .await?
            .ensure_creator(actor, "remove members")?;
        if user_id == actor {
            return Err(DomainError::business_rule(
                "the creator cannot remove themselves, leave the group instead",
            )
            .into());
        }
        let removed = self.find_user(user_id).await?;

        let now = self.deps.clock.now();
        let (chat, before) = self
            .write_chat(chat_id, |chat| {
                chat.ensure_creator(actor, "remove members")?;
                let before = chat.members.clone();
                chat.remove_member(user_id, now)?;
                Ok((ChatWrite::Update, before))
            })
            .await?;

        self.deps.router.dispatch(
            &chat.members,
            ServerEvent::alert(
                chat.id,
                format!("{} has been removed from the group", removed.name),
            ),
        );
        // 被移除者也需要刷新会话列表
        self.deps.router.dispatch(&before, ServerEvent::RefetchChats);

        tracing::info!(chat_id = %chat.id, user_id = %user_id, "群成员已移除");
        Ok(chat)
    }

    pub async fn leave_group(
        &self,
        actor: UserId,
        chat_id: ChatId,
    ) -> ApplicationResult<LeaveGroupOutcome> {
        let leaver = self.find_user(actor).await?;

        let now = self.deps.clock.now();
        let (chat, outcome) = self
            .write_chat(chat_id, |chat| {
                // 新创建者在剩余成员中均匀随机选出
                let outcome =
                    chat.leave(actor, |remaining| rand::rng().random_range(0..remaining), now)?;
                let write = match outcome {
                    LeaveOutcome::Dissolved { .. } => ChatWrite::Delete,
                    LeaveOutcome::Left { .. } => ChatWrite::Update,
                };
                Ok((write, outcome))
            })
            .await?;

        match outcome {
            LeaveOutcome::Dissolved { members } => {
                self.purge_messages(chat.id).await?;
                self.deps.router.dispatch(
                    &members,
                    ServerEvent::alert(
                        chat.id,
                        format!(
                            "{} has left the group & Group had less than 3 members after removal. Group has been deleted.",
                            leaver.name
                        ),
                    ),
                );
                self.deps.router.dispatch(&members, ServerEvent::RefetchChats);
                tracing::info!(chat_id = %chat.id, user_id = %actor, "成员退出后群聊解散");
                Ok(LeaveGroupOutcome::Deleted { chat_id: chat.id })
            }
            LeaveOutcome::Left { new_creator } => {
                self.deps.router.dispatch(
                    &chat.members,
                    ServerEvent::alert(chat.id, format!("{} has left the group", leaver.name)),
                );
                let mut affected = chat.members.clone();
                affected.push(actor);
                self.deps.router.dispatch(&affected, ServerEvent::RefetchChats);

                if let Some(creator) = new_creator {
                    tracing::info!(chat_id = %chat.id, new_creator = %creator, "创建者退出，已重新选出创建者");
                }
                tracing::info!(chat_id = %chat.id, user_id = %actor, "成员已退出群聊");
                Ok(LeaveGroupOutcome::Left { chat, new_creator })
            }
        }
    }

    pub async fn rename_group(
        &self,
        actor: UserId,
        chat_id: ChatId,
        name: &str,
    ) -> ApplicationResult<Chat> {
        let now = self.deps.clock.now();
        let (chat, ()) = self
            .write_chat(chat_id, |chat| {
                chat.ensure_creator(actor, "rename the group")?;
                chat.rename(name, now)?;
                Ok((ChatWrite::Update, ()))
            })
            .await?;

        self.deps.router.dispatch(&chat.members, ServerEvent::RefetchChats);
        Ok(chat)
    }

    /// 群聊仅创建者可删除，私聊任一成员可删除。会一并删除消息及其附件。
    pub async fn delete_chat(
        &self,
        actor: UserId,
        chat_id: ChatId,
    ) -> ApplicationResult<Chat> {
        let (chat, ()) = self
            .write_chat(chat_id, |chat| {
                if chat.is_group {
                    chat.ensure_creator(actor, "delete the group")?;
                } else {
                    chat.ensure_member(actor)?;
                }
                Ok((ChatWrite::Delete, ()))
            })
            .await?;

        self.purge_messages(chat.id).await?;
        self.deps.router.dispatch(&chat.members, ServerEvent::RefetchChats);
        tracing::info!(chat_id = %chat.id, user_id = %actor, "会话已删除");
        Ok(chat)
    }

    /// 分页读取历史消息：按时间倒序分页，每页内部按正序返回。`page` 从 1 开始。
    pub async fn messages(
        &self,
        actor: UserId,
        chat_id: ChatId,
        page: u64,
    ) -> ApplicationResult<MessagePage> {
        if page == 0 {
            return Err(DomainError::validation("page", "must be at least 1").into());
        }
        self.deps.membership.members_for(chat_id, actor).await?;

        let limit = self.deps.message_page_size.max(1);
        let offset = (page - 1)
            .checked_mul(limit)
            .ok_or_else(|| DomainError::validation("page", "is out of range"))?;
        let mut records = self
            .deps
            .message_repository
            .list_page(chat_id, offset, limit)
            .await?;
        let total = self.deps.message_repository.count_for_chat(chat_id).await?;
        records.reverse();

        let sender_ids: Vec<UserId> = records.iter().map(|m| m.sender_id).collect();
        let senders = self.deps.user_repository.find_many(&sender_ids).await?;
        let messages = records
            .iter()
            .map(|message| {
                let name = senders
                    .iter()
                    .find(|user| user.id == message.sender_id)
                    .map(|user| user.name.as_str())
                    .unwrap_or_default();
                MessageView::new(message, name)
            })
            .collect();

        Ok(MessagePage {
            messages,
            total_pages: total.div_ceil(limit),
        })
    }

    /// 读取会话、应用 `apply` 的变更并按版本条件写回。
    /// 写入期间会话被并发修改时重新读取并重放变更，超过上限返回冲突。
    async fn write_chat<T, F>(
        &self,
        chat_id: ChatId,
        mut apply: F,
    ) -> ApplicationResult<(Chat, T)>
    where
        T: Send,
        F: FnMut(&mut Chat) -> ApplicationResult<(ChatWrite, T)> + Send,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let mut chat = self.deps.membership.chat(chat_id).await?;
            let (write, value) = apply(&mut chat)?;
            let written = match write {
                ChatWrite::Update => self.deps.chat_repository.update(chat).await,
                ChatWrite::Delete => self.deps.chat_repository.delete(&chat).await.map(|()| chat),
            };
            match written {
                Ok(chat) => return Ok((chat, value)),
                Err(RepositoryError::Conflict) => {
                    tracing::debug!(chat_id = %chat_id, attempt, "会话版本冲突，重新读取");
                }
                Err(RepositoryError::NotFound) => {
                    return Err(DomainError::not_found("chat").into());
                }
                Err(err) => return Err(err.into()),
            }
        }
        tracing::warn!(chat_id = %chat_id, "会话并发修改过多，放弃写入");
        Err(DomainError::conflict("chat was modified concurrently, please retry").into())
    }

    /// 删除会话下的消息及其附件，会话记录本身已删除
    async fn purge_messages(&self, chat_id: ChatId) -> ApplicationResult<()> {
        let removed = self.deps.message_repository.delete_for_chat(chat_id).await?;
        let public_ids: Vec<String> = removed
            .into_iter()
            .flat_map(|message| message.attachments)
            .map(|attachment| attachment.public_id)
            .collect();
        if !public_ids.is_empty() {
            if let Err(err) = self.deps.object_store.delete(&public_ids).await {
                tracing::warn!(chat_id = %chat_id, error = %err, "删除会话附件失败");
            }
        }
        Ok(())
    }

    async fn summarize(
        &self,
        actor: UserId,
        chats: &[Chat],
    ) -> ApplicationResult<Vec<ChatSummary>> {
        let mut ids: Vec<UserId> = chats.iter().flat_map(|chat| chat.members.clone()).collect();
        ids.sort();
        ids.dedup();
        let profiles: Vec<User> = self.deps.user_repository.find_many(&ids).await?;
        Ok(chats
            .iter()
            .map(|chat| ChatSummary::build(chat, actor, &profiles))
            .collect())
    }

    async fn ensure_users_exist(&self, ids: &[UserId]) -> ApplicationResult<()> {
        let found = self.deps.user_repository.find_many(ids).await?;
        if found.len() != dedup_count(ids) {
            return Err(DomainError::not_found("user").into());
        }
        Ok(())
    }

    async fn find_user(&self, user_id: UserId) -> ApplicationResult<User> {
        self.deps
            .user_repository
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| DomainError::not_found("user").into())
    }
}

fn dedup_count(ids: &[UserId]) -> usize {
    let mut ids = ids.to_vec();
    ids.sort();
    ids.dedup();
    ids.len()
}
