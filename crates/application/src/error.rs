use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::auth::AuthError;
use crate::password::PasswordHasherError;
use crate::storage::UploadError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
    #[error("password error: {0}")]
    Password(#[from] PasswordHasherError),
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),
    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            // 存储层的冲突（如唯一约束）对调用方而言是业务冲突
            RepositoryError::Conflict => {
                ApplicationError::Domain(DomainError::conflict("resource already exists"))
            }
            other => ApplicationError::Repository(other),
        }
    }
}

pub type ApplicationResult<T> = Result<T, ApplicationError>;
