//! 聊天系统核心领域模型
//!
//! 包含用户、会话（私聊/群聊）、消息、好友请求等实体，以及会话成员规则。

pub mod chat;
pub mod errors;
pub mod friend_request;
pub mod message;
pub mod user;
pub mod value_objects;

pub use chat::{Chat, LeaveOutcome, MAX_GROUP_MEMBERS, MIN_GROUP_MEMBERS};
pub use errors::{DomainError, DomainResult, RepositoryError};
pub use friend_request::FriendRequest;
pub use message::Message;
pub use user::{PasswordHash, User, UserSummary};
pub use value_objects::{Attachment, ChatId, MessageId, RequestId, Timestamp, UserId};
