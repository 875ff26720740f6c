use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{RequestId, Timestamp, UserId};

/// 待处理的好友请求；接受或拒绝后即被删除
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRequest {
    #[serde(rename = "_id")]
    pub id: RequestId,
    pub sender: UserId,
    pub receiver: UserId,
    #[serde(rename = "createdAt")]
    pub created_at: Timestamp,
}

impl FriendRequest {
    pub fn new(
        id: RequestId,
        sender: UserId,
        receiver: UserId,
        now: Timestamp,
    ) -> DomainResult<Self> {
        if sender == receiver {
            return Err(DomainError::validation(
                "userId",
                "cannot send a friend request to yourself",
            ));
        }
        Ok(Self {
            id,
            sender,
            receiver,
            created_at: now,
        })
    }

    /// 是否属于无序用户对 {a, b}
    pub fn involves_pair(&self, a: UserId, b: UserId) -> bool {
        (self.sender == a && self.receiver == b) || (self.sender == b && self.receiver == a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn pair_matching_ignores_direction() {
        let (a, b) = (UserId::generate(), UserId::generate());
        let request = FriendRequest::new(RequestId::generate(), a, b, Utc::now()).unwrap();
        assert!(request.involves_pair(b, a));
        assert!(!request.involves_pair(a, UserId::generate()));
    }

    #[test]
    fn self_request_is_invalid() {
        let a = UserId::generate();
        assert!(FriendRequest::new(RequestId::generate(), a, a, Utc::now()).is_err());
    }
}
