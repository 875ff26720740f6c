use std::sync::Arc;

use chrono::{Duration, NaiveTime};
use domain::Timestamp;

use crate::{
    auth::AuthError,
    clock::Clock,
    dto::{
        AdminChatView, AdminMessageView, AdminSenderView, AdminUserView, CreatorView,
        DashboardStats,
    },
    error::{ApplicationError, ApplicationResult},
    repository::{ChatRepository, MessageRepository, UserRepository},
};

pub struct AdminServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub chat_repository: Arc<dyn ChatRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub clock: Arc<dyn Clock>,
    pub secret_key: String,
}

/// 管理后台：密钥登录、统计面板与全量列表
pub struct AdminService {
    deps: AdminServiceDependencies,
}

impl AdminService {
    pub fn new(deps: AdminServiceDependencies) -> Self {
        Self { deps }
    }

    /// 常量时间比较管理员密钥
    pub fn verify(&self, secret_key: &str) -> ApplicationResult<()> {
        ring::constant_time::verify_slices_are_equal(
            secret_key.as_bytes(),
            self.deps.secret_key.as_bytes(),
        )
        .map_err(|_| {
            tracing::warn!("管理员密钥校验失败");
            ApplicationError::from(AuthError::Invalid)
        })
    }

    pub async fn dashboard(&self) -> ApplicationResult<DashboardStats> {
        let users = self.deps.user_repository.list_all().await?;
        let chats = self.deps.chat_repository.list_all().await?;
        let messages = self.deps.message_repository.list_all().await?;

        let now = self.deps.clock.now();
        let window_start = start_of_day(now) - Duration::days(6);
        let recent = self
            .deps
            .message_repository
            .created_since(window_start)
            .await?;

        Ok(DashboardStats {
            groups_count: chats.iter().filter(|chat| chat.is_group).count() as u64,
            users_count: users.len() as u64,
            messages_count: messages.len() as u64,
            total_chats_count: chats.len() as u64,
            messages_chart: messages_chart(window_start, now, &recent),
        })
    }

    pub async fn users(&self) -> ApplicationResult<Vec<AdminUserView>> {
        let users = self.deps.user_repository.list_all().await?;
        let chats = self.deps.chat_repository.list_all().await?;

        Ok(users
            .into_iter()
            .map(|user| {
                let (groups, friends) = chats
                    .iter()
                    .filter(|chat| chat.is_member(user.id))
                    .fold((0, 0), |(groups, friends), chat| {
                        if chat.is_group {
                            (groups + 1, friends)
                        } else {
                            (groups, friends + 1)
                        }
                    });
                AdminUserView {
                    id: user.id,
                    name: user.name,
                    username: user.username,
                    avatar: user.avatar.url,
                    groups,
                    friends,
                }
            })
            .collect())
    }

    pub async fn chats(&self) -> ApplicationResult<Vec<AdminChatView>> {
        let users = self.deps.user_repository.list_all().await?;
        let chats = self.deps.chat_repository.list_all().await?;

        let mut views = Vec::with_capacity(chats.len());
        for chat in chats {
            let total_messages = self.deps.message_repository.count_for_chat(chat.id).await?;
            let members: Vec<_> = chat
                .members
                .iter()
                .filter_map(|id| users.iter().find(|user| user.id == *id))
                .map(|user| user.summary())
                .collect();
            let creator = chat
                .creator
                .and_then(|id| users.iter().find(|user| user.id == id));

            views.push(AdminChatView {
                id: chat.id,
                group_chat: chat.is_group,
                group_name: chat.name.clone(),
                avatar: members.iter().take(3).map(|m| m.avatar.clone()).collect(),
                total_members: chat.members.len(),
                members,
                creator: CreatorView {
                    name: creator.map_or_else(|| "None".to_owned(), |u| u.name.clone()),
                    avatar: creator.map(|u| u.avatar.url.clone()).unwrap_or_default(),
                },
                total_messages,
            });
        }
        Ok(views)
    }

    /// 发送者或会话已不存在的消息不列出
    pub async fn messages(&self) -> ApplicationResult<Vec<AdminMessageView>> {
        let users = self.deps.user_repository.list_all().await?;
        let chats = self.deps.chat_repository.list_all().await?;
        let messages = self.deps.message_repository.list_all().await?;

        Ok(messages
            .into_iter()
            .filter_map(|message| {
                let sender = users.iter().find(|user| user.id == message.sender_id)?;
                let chat = chats.iter().find(|chat| chat.id == message.chat_id)?;
                Some(AdminMessageView {
                    id: message.id,
                    content: message.content_or_empty().to_owned(),
                    attachments: message.attachments,
                    created_at: message.created_at,
                    chat: chat.id,
                    group_chat: chat.is_group,
                    sender: AdminSenderView {
                        id: sender.id,
                        name: sender.name.clone(),
                        avatar: Some(sender.avatar.url.clone()),
                    },
                })
            })
            .collect())
    }
}

fn start_of_day(at: Timestamp) -> Timestamp {
    at.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// 以 `window_start`（6 天前的零点）为起点，统计每天的消息数
fn messages_chart(window_start: Timestamp, now: Timestamp, created: &[Timestamp]) -> [u64; 7] {
    let mut chart = [0u64; 7];
    for at in created.iter().filter(|at| **at <= now) {
        let day = (start_of_day(*at) - window_start).num_days();
        if (0..7).contains(&day) {
            chart[day as usize] += 1;
        }
    }
    chart
}
