//! 面向 HTTP 响应的视图对象，字段名与线上 JSON 保持一致。

use domain::{Attachment, Chat, ChatId, Message, MessageId, RequestId, Timestamp, User, UserId, UserSummary};
use serde::Serialize;

/// 会话列表中的一项
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    #[serde(rename = "_id")]
    pub id: ChatId,
    pub group_chat: bool,
    /// 群聊取前三位成员头像，私聊取对方头像
    pub avatar: Vec<String>,
    /// 群聊为群名，私聊为对方名称
    pub name: String,
    /// 除当前用户外的成员
    pub members: Vec<UserId>,
}

impl ChatSummary {
    /// `profiles` 需包含会话成员的资料；缺失的成员不出现在头像中
    pub fn build(chat: &Chat, viewer: UserId, profiles: &[User]) -> Self {
        let profile = |id: UserId| profiles.iter().find(|user| user.id == id);
        let (name, avatar) = if chat.is_group {
            let avatar = chat
                .members
                .iter()
                .filter_map(|id| profile(*id))
                .take(3)
                .map(|user| user.avatar.url.clone())
                .collect();
            (chat.name.clone(), avatar)
        } else {
            match chat.other_member(viewer).and_then(profile) {
                Some(other) => (other.name.clone(), vec![other.avatar.url.clone()]),
                None => (chat.name.clone(), Vec::new()),
            }
        };

        Self {
            id: chat.id,
            group_chat: chat.is_group,
            avatar,
            name,
            members: chat
                .members
                .iter()
                .copied()
                .filter(|id| *id != viewer)
                .collect(),
        }
    }
}

/// 成员字段：未展开时为 id，展开时为用户摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MemberView {
    Id(UserId),
    Profile(UserSummary),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatDetails {
    #[serde(rename = "_id")]
    pub id: ChatId,
    pub group_name: String,
    pub group_chat: bool,
    pub creator: Option<UserId>,
    pub members: Vec<MemberView>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ChatDetails {
    pub fn new(chat: &Chat, members: Vec<MemberView>) -> Self {
        Self {
            id: chat.id,
            group_name: chat.name.clone(),
            group_chat: chat.is_group,
            creator: chat.creator,
            members,
            created_at: chat.created_at,
            updated_at: chat.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SenderView {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub name: String,
}

/// 历史消息，发送者展开为名称
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(rename = "_id")]
    pub id: MessageId,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub sender: SenderView,
    pub chat: ChatId,
    pub created_at: Timestamp,
}

impl MessageView {
    pub fn new(message: &Message, sender_name: impl Into<String>) -> Self {
        Self {
            id: message.id,
            content: message.content_or_empty().to_owned(),
            attachments: message.attachments.clone(),
            sender: SenderView {
                id: message.sender_id,
                name: sender_name.into(),
            },
            chat: message.chat_id,
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    /// 当前页内按时间正序
    pub messages: Vec<MessageView>,
    pub total_pages: u64,
}

/// 待处理的好友请求通知
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationView {
    #[serde(rename = "_id")]
    pub id: RequestId,
    pub sender: UserSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminUserView {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub name: String,
    pub username: String,
    pub avatar: String,
    /// 所在群聊数
    pub groups: u64,
    /// 私聊数（即好友数）
    pub friends: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatorView {
    pub name: String,
    pub avatar: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminChatView {
    #[serde(rename = "_id")]
    pub id: ChatId,
    pub group_chat: bool,
    pub group_name: String,
    pub avatar: Vec<String>,
    pub members: Vec<UserSummary>,
    pub creator: CreatorView,
    pub total_members: usize,
    pub total_messages: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminSenderView {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub name: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminMessageView {
    #[serde(rename = "_id")]
    pub id: MessageId,
    pub attachments: Vec<Attachment>,
    pub content: String,
    pub created_at: Timestamp,
    pub chat: ChatId,
    pub group_chat: bool,
    pub sender: AdminSenderView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub groups_count: u64,
    pub users_count: u64,
    pub messages_count: u64,
    pub total_chats_count: u64,
    /// 最近 7 天（含今天）每天的消息数，最后一项为今天
    pub messages_chart: [u64; 7],
}
