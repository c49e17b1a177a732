//! 领域模型错误定义
//!
//! 核心对外暴露的错误分类：不存在、无权限、重复成员/重复资源、参数无效，
//! 以及仓储层的瞬时故障。

use thiserror::Error;

/// 领域模型错误类型
///
/// 这些错误都代表调用方的问题，属于终态错误，不应重试。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 资源不存在
    #[error("资源不存在: {entity} {id}")]
    NotFound { entity: String, id: String },

    /// 非成员执行成员操作，或非创建者执行创建者操作
    #[error("权限不足: {action}")]
    Forbidden { action: String },

    /// 用户已是会话成员
    #[error("用户已是会话成员")]
    AlreadyMember,

    /// 资源已存在
    #[error("资源已存在: {entity}")]
    AlreadyExists { entity: String },

    /// 参数无效
    #[error("参数无效: {field}: {reason}")]
    InvalidArgument { field: String, reason: String },
}

impl DomainError {
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn forbidden(action: impl Into<String>) -> Self {
        Self::Forbidden {
            action: action.into(),
        }
    }

    pub fn already_exists(entity: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity: entity.into(),
        }
    }

    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 仓储层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("unique constraint violated")]
    Conflict,
    /// 超时或争用，读操作可由调用层重试一次
    #[error("transient store error: {message}")]
    Transient { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
