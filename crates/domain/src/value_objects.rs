use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 统一的时间戳类型。
pub type Timestamp = DateTime<Utc>;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(id: Uuid) -> Self {
                Self(id)
            }

            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

uuid_id!(
    /// 用户唯一标识，由外部身份存储分配。
    UserId
);
uuid_id!(
    /// 会话（私聊或群聊）唯一标识。
    ChatId
);
uuid_id!(
    /// 持久化消息记录的唯一标识。
    MessageId
);
uuid_id!(
    /// 好友请求唯一标识。
    RequestId
);

/// 对象存储中的文件引用。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub public_id: String,
    pub url: String,
}

impl Attachment {
    pub fn new(public_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            public_id: public_id.into(),
            url: url.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_plain_uuid_strings() {
        let raw = Uuid::new_v4();
        let json = serde_json::to_string(&UserId::from(raw)).unwrap();
        assert_eq!(json, format!("\"{}\"", raw));

        let back: ChatId = serde_json::from_str(&json).unwrap();
        assert_eq!(Uuid::from(back), raw);
    }
}
