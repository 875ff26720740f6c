use async_trait::async_trait;
use domain::UserId;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("credential is missing")]
    Missing,
    #[error("credential is invalid")]
    Invalid,
    #[error("credential has expired")]
    Expired,
    #[error("credential has been revoked")]
    Revoked,
    #[error("credential refers to an unknown user")]
    UnknownUser,
    #[error("invalid username or password")]
    BadLogin,
}

/// 通过凭证校验的用户身份，附带实时消息所需的展示字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedUser {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub name: String,
}

/// 身份校验协作者：`verify(credential) -> Identity | AuthError`
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<AuthenticatedUser, AuthError>;
}
