//! 领域模型错误定义
//!
//! 定义了系统中所有可能的错误类型，提供清晰的错误上下文。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 验证错误（请求形状或字段不合法）
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    /// 资源不存在
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// 权限不足
    #[error("not allowed to {action}")]
    PermissionDenied { action: String },

    /// 资源冲突（重复注册、重复请求等）
    #[error("{message}")]
    Conflict { message: String },

    /// 业务规则违反
    #[error("{rule}")]
    BusinessRule { rule: String },
}

impl DomainError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn permission_denied(action: impl Into<String>) -> Self {
        Self::PermissionDenied {
            action: action.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn business_rule(rule: impl Into<String>) -> Self {
        Self::BusinessRule { rule: rule.into() }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 存储层错误，由外部文档存储适配器产生
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    Conflict,
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}
