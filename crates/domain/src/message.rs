use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{Attachment, ChatId, MessageId, Timestamp, UserId};

/// 持久化的消息记录，创建后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: MessageId,
    #[serde(rename = "chat")]
    pub chat_id: ChatId,
    #[serde(rename = "sender")]
    pub sender_id: UserId,
    pub content: Option<String>,
    pub attachments: Vec<Attachment>,
    #[serde(rename = "createdAt")]
    pub created_at: Timestamp,
}

impl Message {
    pub fn text(
        id: MessageId,
        chat_id: ChatId,
        sender_id: UserId,
        content: impl Into<String>,
        created_at: Timestamp,
    ) -> DomainResult<Self> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(DomainError::validation("message", "cannot be empty"));
        }
        Ok(Self {
            id,
            chat_id,
            sender_id,
            content: Some(content),
            attachments: Vec::new(),
            created_at,
        })
    }

    pub fn with_attachments(
        id: MessageId,
        chat_id: ChatId,
        sender_id: UserId,
        attachments: Vec<Attachment>,
        created_at: Timestamp,
    ) -> DomainResult<Self> {
        if attachments.is_empty() {
            return Err(DomainError::validation("files", "no files were uploaded"));
        }
        Ok(Self {
            id,
            chat_id,
            sender_id,
            content: None,
            attachments,
            created_at,
        })
    }

    pub fn content_or_empty(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn blank_text_is_rejected() {
        let err = Message::text(
            MessageId::generate(),
            ChatId::generate(),
            UserId::generate(),
            "   ",
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation { .. }));
    }

    #[test]
    fn attachment_message_has_no_content() {
        let message = Message::with_attachments(
            MessageId::generate(),
            ChatId::generate(),
            UserId::generate(),
            vec![Attachment::new("a", "https://cdn/a")],
            Utc::now(),
        )
        .unwrap();
        assert_eq!(message.content_or_empty(), "");
    }
}
