use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{ChatId, Timestamp, UserId};

/// 群聊成员上限
pub const MAX_GROUP_MEMBERS: usize = 100;
/// 群聊成员下限，任何成员变更之后低于该值的群聊会被解散
pub const MIN_GROUP_MEMBERS: usize = 3;

/// 会话：两人私聊或 3~100 人群聊
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    #[serde(rename = "_id")]
    pub id: ChatId,
    #[serde(rename = "groupName")]
    pub name: String,
    #[serde(rename = "groupChat")]
    pub is_group: bool,
    /// 仅群聊有创建者
    pub creator: Option<UserId>,
    pub members: Vec<UserId>,
    #[serde(rename = "createdAt")]
    pub created_at: Timestamp,
    #[serde(rename = "updatedAt")]
    pub updated_at: Timestamp,
    /// 存储层的乐观锁版本，每次成功写入加一
    #[serde(skip)]
    pub version: i64,
}

/// 成员退出群聊的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// 群聊保留；若退出者是创建者，`new_creator` 为重新选出的创建者
    Left { new_creator: Option<UserId> },
    /// 剩余成员不足，群聊需要删除，`members` 为退出前的成员
    Dissolved { members: Vec<UserId> },
}

impl Chat {
    /// 创建群聊。`others` 为除创建者外的成员，会去重并剔除创建者本身。
    pub fn new_group(
        id: ChatId,
        name: impl Into<String>,
        creator: UserId,
        others: &[UserId],
        now: Timestamp,
    ) -> DomainResult<Self> {
        let name = validate_name(name.into())?;

        let mut seen = HashSet::from([creator]);
        let others: Vec<UserId> = others.iter().copied().filter(|id| seen.insert(*id)).collect();

        if others.len() < MIN_GROUP_MEMBERS - 1 {
            return Err(DomainError::validation(
                "groupMembers",
                "group must have at least 2 members excluding the creator",
            ));
        }
        if others.len() + 1 > MAX_GROUP_MEMBERS {
            return Err(DomainError::business_rule(format!(
                "group members limit reached ({MAX_GROUP_MEMBERS})"
            )));
        }

        let mut members = others;
        members.push(creator);

        Ok(Self {
            id,
            name,
            is_group: true,
            creator: Some(creator),
            members,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    /// 创建两人私聊（好友请求被接受时）
    pub fn new_direct(
        id: ChatId,
        name: impl Into<String>,
        first: UserId,
        second: UserId,
        now: Timestamp,
    ) -> DomainResult<Self> {
        if first == second {
            return Err(DomainError::validation(
                "members",
                "a direct chat needs two distinct users",
            ));
        }
        Ok(Self {
            id,
            name: validate_name(name.into())?,
            is_group: false,
            creator: None,
            members: vec![first, second],
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    pub fn is_member(&self, user_id: UserId) -> bool {
        self.members.contains(&user_id)
    }

    pub fn is_creator(&self, user_id: UserId) -> bool {
        self.creator == Some(user_id)
    }

    /// 私聊中除自己以外的另一位成员
    pub fn other_member(&self, user_id: UserId) -> Option<UserId> {
        self.members.iter().copied().find(|id| *id != user_id)
    }

    pub fn ensure_group(&self) -> DomainResult<()> {
        if !self.is_group {
            return Err(DomainError::business_rule("this is not a group chat"));
        }
        Ok(())
    }

    pub fn ensure_member(&self, user_id: UserId) -> DomainResult<()> {
        if !self.is_member(user_id) {
            return Err(DomainError::permission_denied("access this chat"));
        }
        Ok(())
    }

    /// 群聊管理操作仅限创建者
    pub fn ensure_creator(&self, user_id: UserId, action: &str) -> DomainResult<()> {
        self.ensure_group()?;
        if !self.is_creator(user_id) {
            return Err(DomainError::permission_denied(action));
        }
        Ok(())
    }

    /// 添加成员，返回真正新增的成员。超过上限时不做任何修改。
    pub fn add_members(
        &mut self,
        candidates: &[UserId],
        now: Timestamp,
    ) -> DomainResult<Vec<UserId>> {
        self.ensure_group()?;

        let mut seen: HashSet<UserId> = self.members.iter().copied().collect();
        let added: Vec<UserId> = candidates
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();

        if added.is_empty() {
            return Err(DomainError::business_rule(
                "all provided users are already group members",
            ));
        }
        if self.members.len() + added.len() > MAX_GROUP_MEMBERS {
            return Err(DomainError::business_rule(format!(
                "group members limit reached ({MAX_GROUP_MEMBERS})"
            )));
        }

        self.members.extend(added.iter().copied());
        self.updated_at = now;
        Ok(added)
    }

    /// 创建者移除成员；移除后仍需满足最少 3 人
    pub fn remove_member(&mut self, user_id: UserId, now: Timestamp) -> DomainResult<()> {
        self.ensure_group()?;
        if self.members.len() <= MIN_GROUP_MEMBERS {
            return Err(DomainError::business_rule(format!(
                "group must have at least {MIN_GROUP_MEMBERS} members"
            )));
        }
        if !self.is_member(user_id) {
            return Err(DomainError::business_rule("user is not a member of the group"));
        }
        self.members.retain(|id| *id != user_id);
        self.updated_at = now;
        Ok(())
    }

    /// 成员主动退出。
    ///
    /// 剩余成员少于 3 人时群聊解散（成员列表保持不变，由调用方删除）；
    /// 创建者退出时由 `elect` 从剩余成员中选出新的创建者，`elect` 接收剩余人数并返回下标。
    pub fn leave(
        &mut self,
        user_id: UserId,
        elect: impl FnOnce(usize) -> usize,
        now: Timestamp,
    ) -> DomainResult<LeaveOutcome> {
        self.ensure_group()?;
        if !self.is_member(user_id) {
            return Err(DomainError::business_rule("user is not a member of the group"));
        }

        let remaining: Vec<UserId> = self
            .members
            .iter()
            .copied()
            .filter(|id| *id != user_id)
            .collect();

        if remaining.len() < MIN_GROUP_MEMBERS {
            return Ok(LeaveOutcome::Dissolved {
                members: self.members.clone(),
            });
        }

        let new_creator = if self.is_creator(user_id) {
            let index = elect(remaining.len()).min(remaining.len() - 1);
            let elected = remaining[index];
            self.creator = Some(elected);
            Some(elected)
        } else {
            None
        };

        self.members = remaining;
        self.updated_at = now;
        Ok(LeaveOutcome::Left { new_creator })
    }

    pub fn rename(&mut self, name: impl Into<String>, now: Timestamp) -> DomainResult<()> {
        self.ensure_group()?;
        self.name = validate_name(name.into())?;
        self.updated_at = now;
        Ok(())
    }
}

fn validate_name(name: String) -> DomainResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("groupName", "cannot be empty"));
    }
    if trimmed.chars().count() > 100 {
        return Err(DomainError::validation("groupName", "too long"));
    }
    Ok(trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn users(n: usize) -> Vec<UserId> {
        (0..n).map(|_| UserId::generate()).collect()
    }

    fn group(creator: UserId, others: &[UserId]) -> Chat {
        Chat::new_group(ChatId::generate(), "team", creator, others, Utc::now()).unwrap()
    }

    #[test]
    fn new_group_requires_two_distinct_others() {
        let creator = UserId::generate();
        let other = UserId::generate();
        let err = Chat::new_group(
            ChatId::generate(),
            "team",
            creator,
            &[other, other, creator],
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation { .. }));
    }

    #[test]
    fn new_group_includes_creator_once() {
        let creator = UserId::generate();
        let others = users(2);
        let chat = group(creator, &[others[0], others[1], creator]);
        assert_eq!(chat.members.len(), 3);
        assert!(chat.is_creator(creator));
        assert!(chat.is_group);
    }

    #[test]
    fn new_group_rejects_more_than_limit() {
        let creator = UserId::generate();
        let others = users(MAX_GROUP_MEMBERS);
        let err =
            Chat::new_group(ChatId::generate(), "big", creator, &others, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::BusinessRule { .. }));
    }

    #[test]
    fn add_members_filters_existing_and_enforces_limit() {
        let creator = UserId::generate();
        let others = users(2);
        let mut chat = group(creator, &others);

        let fresh = UserId::generate();
        let added = chat.add_members(&[others[0], fresh], Utc::now()).unwrap();
        assert_eq!(added, vec![fresh]);
        assert_eq!(chat.members.len(), 4);

        let err = chat.add_members(&[fresh], Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::BusinessRule { .. }));

        let before = chat.members.clone();
        let overflow = users(MAX_GROUP_MEMBERS);
        assert!(chat.add_members(&overflow, Utc::now()).is_err());
        assert_eq!(chat.members, before);
    }

    #[test]
    fn remove_member_keeps_minimum_size() {
        let creator = UserId::generate();
        let others = users(2);
        let mut chat = group(creator, &others);
        assert!(chat.remove_member(others[0], Utc::now()).is_err());

        let extra = UserId::generate();
        chat.add_members(&[extra], Utc::now()).unwrap();
        chat.remove_member(extra, Utc::now()).unwrap();
        assert_eq!(chat.members.len(), 3);
        assert!(!chat.is_member(extra));
    }

    #[test]
    fn creator_leaving_three_member_group_dissolves_it() {
        let creator = UserId::generate();
        let others = users(2);
        let mut chat = group(creator, &others);

        let outcome = chat.leave(creator, |_| 0, Utc::now()).unwrap();
        match outcome {
            LeaveOutcome::Dissolved { members } => assert_eq!(members.len(), 3),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn non_creator_leaving_keeps_creator() {
        let creator = UserId::generate();
        let others = users(3);
        let mut chat = group(creator, &others);

        let outcome = chat.leave(others[1], |_| 0, Utc::now()).unwrap();
        assert_eq!(outcome, LeaveOutcome::Left { new_creator: None });
        assert_eq!(chat.members.len(), 3);
        assert_eq!(chat.creator, Some(creator));
    }

    #[test]
    fn creator_leaving_elects_from_remaining() {
        let creator = UserId::generate();
        let others = users(3);
        let mut chat = group(creator, &others);

        let outcome = chat.leave(creator, |len| len - 1, Utc::now()).unwrap();
        let LeaveOutcome::Left {
            new_creator: Some(elected),
        } = outcome
        else {
            panic!("creator should be re-elected");
        };
        assert!(chat.is_member(elected));
        assert!(!chat.is_member(creator));
        assert_eq!(chat.creator, Some(elected));
    }

    #[test]
    fn direct_chats_reject_group_operations() {
        let (a, b) = (UserId::generate(), UserId::generate());
        let mut chat = Chat::new_direct(ChatId::generate(), "a-b", a, b, Utc::now()).unwrap();
        assert!(chat.rename("x", Utc::now()).is_err());
        assert!(chat.ensure_creator(a, "rename the group").is_err());
        assert_eq!(chat.other_member(a), Some(b));
    }
}
