use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{Attachment, Timestamp, UserId};

/// 经过外部服务生成的密码哈希。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn new(value: impl Into<String>) -> DomainResult<Self> {
        let hash = value.into();
        if hash.trim().is_empty() {
            return Err(DomainError::validation("password_hash", "cannot be empty"));
        }
        Ok(Self(hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub name: String,
    pub username: String,
    pub bio: String,
    #[serde(skip_serializing)] // 密码字段不暴露给客户端
    pub password: PasswordHash,
    pub avatar: Attachment,
    #[serde(rename = "createdAt")]
    pub created_at: Timestamp,
}

impl User {
    pub fn register(
        id: UserId,
        name: impl Into<String>,
        username: impl Into<String>,
        bio: impl Into<String>,
        password: PasswordHash,
        avatar: Attachment,
        now: Timestamp,
    ) -> DomainResult<Self> {
        let name = required("name", name.into())?;
        let username = required("username", username.into())?;
        if username.len() > 50 {
            return Err(DomainError::validation("username", "too long"));
        }
        let bio = required("bio", bio.into())?;

        Ok(Self {
            id,
            name,
            username,
            bio,
            password,
            avatar,
            created_at: now,
        })
    }

    /// 名称或用户名包含查询串（忽略大小写）
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.name.to_lowercase().contains(&query) || self.username.to_lowercase().contains(&query)
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            name: self.name.clone(),
            avatar: self.avatar.url.clone(),
        }
    }
}

/// 列表、通知中使用的用户摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub name: String,
    pub avatar: String,
}

fn required(field: &str, value: String) -> DomainResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(field, "is required"));
    }
    Ok(trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(name: &str, username: &str) -> DomainResult<User> {
        User::register(
            UserId::generate(),
            name,
            username,
            "hello",
            PasswordHash::new("hash").unwrap(),
            Attachment::new("avatar", "https://cdn.example/avatar.png"),
            Utc::now(),
        )
    }

    #[test]
    fn register_trims_and_requires_fields() {
        let user = user("  Alice ", "alice").unwrap();
        assert_eq!(user.name, "Alice");

        let err = user_err("", "alice");
        assert_eq!(err, DomainError::validation("name", "is required"));
    }

    #[test]
    fn matches_name_or_username_case_insensitively() {
        let user = user("Alice Liddell", "wonder").unwrap();
        assert!(user.matches("LIDD"));
        assert!(user.matches("Wond"));
        assert!(!user.matches("bob"));
    }

    #[test]
    fn password_is_not_serialized() {
        let json = serde_json::to_value(user("Alice", "alice").unwrap()).unwrap();
        assert!(json.get("password").is_none());
        assert!(json.get("_id").is_some());
    }

    fn user_err(name: &str, username: &str) -> DomainError {
        user(name, username).unwrap_err()
    }
}
