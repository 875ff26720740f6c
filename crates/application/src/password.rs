use async_trait::async_trait;
use domain::{DomainError, PasswordHash};
use thiserror::Error;

/// 注册时密码的最小长度
pub const MIN_PASSWORD_LENGTH: usize = 6;

#[derive(Debug, Error)]
pub enum PasswordHasherError {
    #[error("hash error: {0}")]
    Hash(String),
    #[error("verify error: {0}")]
    Verify(String),
}

impl PasswordHasherError {
    pub fn hash_error(message: impl Into<String>) -> Self {
        Self::Hash(message.into())
    }

    pub fn verify_error(message: impl Into<String>) -> Self {
        Self::Verify(message.into())
    }
}

/// 密码哈希外部协作者。实现方应避免阻塞异步运行时。
#[async_trait]
pub trait PasswordHasher: Send + Sync {
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError>;
    async fn verify(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, PasswordHasherError>;
}

pub fn validate_password(plaintext: &str) -> Result<(), DomainError> {
    if plaintext.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(DomainError::validation(
            "password",
            format!("must be at least {MIN_PASSWORD_LENGTH} characters"),
        ));
    }
    Ok(())
}
