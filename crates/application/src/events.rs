//! 实时事件的线上格式。
//!
//! 服务端帧形如 `{"event": "NEW_MESSAGE", "data": {...}}`，每种事件有固定的负载结构；
//! 客户端帧使用相同的外层格式。

use chrono::SecondsFormat;
use domain::{Attachment, ChatId, Message, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;

/// 推送给客户端的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerEvent {
    NewMessage {
        #[serde(rename = "chatId")]
        chat_id: ChatId,
        message: LiveMessage,
    },
    NewMessageAlert {
        #[serde(rename = "chatId")]
        chat_id: ChatId,
    },
    StartTyping {
        #[serde(rename = "chatId")]
        chat_id: ChatId,
    },
    StopTyping {
        #[serde(rename = "chatId")]
        chat_id: ChatId,
    },
    NewRequest,
    RefetchChats,
    Alert {
        message: String,
        #[serde(rename = "chatId")]
        chat_id: ChatId,
    },
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::NewMessage { .. } => "NEW_MESSAGE",
            ServerEvent::NewMessageAlert { .. } => "NEW_MESSAGE_ALERT",
            ServerEvent::StartTyping { .. } => "START_TYPING",
            ServerEvent::StopTyping { .. } => "STOP_TYPING",
            ServerEvent::NewRequest => "NEW_REQUEST",
            ServerEvent::RefetchChats => "REFETCH_CHATS",
            ServerEvent::Alert { .. } => "ALERT",
        }
    }

    pub fn alert(chat_id: ChatId, message: impl Into<String>) -> Self {
        ServerEvent::Alert {
            message: message.into(),
            chat_id,
        }
    }
}

/// 实时推送使用的消息投影。
///
/// `_id` 是本地生成的关联 id，与持久化记录的 `MessageId` 不同。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveMessage {
    pub content: String,
    #[serde(rename = "_id")]
    pub correlation_id: Uuid,
    pub sender: LiveSender,
    pub chat: ChatId,
    /// ISO-8601，毫秒精度
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveSender {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub name: String,
}

impl LiveMessage {
    pub fn project(record: &Message, sender: &AuthenticatedUser) -> Self {
        Self {
            content: record.content_or_empty().to_owned(),
            correlation_id: Uuid::new_v4(),
            sender: LiveSender {
                id: sender.id,
                name: sender.name.clone(),
            },
            chat: record.chat_id,
            created_at: record
                .created_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            attachments: record.attachments.clone(),
        }
    }
}

/// 客户端通过 WebSocket 发送的事件。
///
/// `members` 字段为兼容旧客户端而保留，扇出目标始终由服务端按会话成员解析。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientEvent {
    NewMessage {
        #[serde(rename = "chatId")]
        chat_id: ChatId,
        #[serde(default)]
        members: Vec<UserId>,
        message: String,
    },
    StartTyping {
        #[serde(rename = "chatId")]
        chat_id: ChatId,
        #[serde(default)]
        members: Vec<UserId>,
    },
    StopTyping {
        #[serde(rename = "chatId")]
        chat_id: ChatId,
        #[serde(default)]
        members: Vec<UserId>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use domain::MessageId;
    use serde_json::json;

    #[test]
    fn new_message_wire_shape() {
        let chat_id = ChatId::generate();
        let sender = AuthenticatedUser {
            id: UserId::generate(),
            name: "Alice".into(),
        };
        let created = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let record = Message::text(MessageId::generate(), chat_id, sender.id, "hi", created).unwrap();
        let live = LiveMessage::project(&record, &sender);
        assert_ne!(live.correlation_id, Uuid::from(record.id));

        let value = serde_json::to_value(ServerEvent::NewMessage {
            chat_id,
            message: live.clone(),
        })
        .unwrap();

        assert_eq!(
            value,
            json!({
                "event": "NEW_MESSAGE",
                "data": {
                    "chatId": chat_id.to_string(),
                    "message": {
                        "content": "hi",
                        "_id": live.correlation_id.to_string(),
                        "sender": { "_id": sender.id.to_string(), "name": "Alice" },
                        "chat": chat_id.to_string(),
                        "createdAt": "2024-05-01T12:30:00.000Z"
                    }
                }
            })
        );
    }

    #[test]
    fn payloadless_events_have_no_data() {
        let value = serde_json::to_value(ServerEvent::RefetchChats).unwrap();
        assert_eq!(value, json!({ "event": "REFETCH_CHATS" }));
    }

    #[test]
    fn client_typing_frame_parses_without_members() {
        let chat_id = ChatId::generate();
        let frame = json!({ "event": "START_TYPING", "data": { "chatId": chat_id } });
        let event: ClientEvent = serde_json::from_value(frame).unwrap();
        assert_eq!(
            event,
            ClientEvent::StartTyping {
                chat_id,
                members: Vec::new()
            }
        );
    }
}
