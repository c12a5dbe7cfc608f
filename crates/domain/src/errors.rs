//! 领域模型错误定义
//!
//! 值对象校验失败、投递状态回退以及仓储访问失败的错误类型。

use thiserror::Error;

use crate::delivery::DeliveryStatus;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 参数校验失败
    #[error("invalid argument `{field}`: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    /// 投递状态只能前进
    #[error("delivery status cannot move from {from} back to {to}")]
    StatusRegression {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },
}

impl DomainError {
    /// 创建参数校验错误
    pub fn invalid_argument(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 持久化协作方返回的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    Conflict,
    #[error("storage failure: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}
