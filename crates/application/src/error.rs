use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::broadcaster::BroadcastError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
    #[error("broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),
    /// 未认证的连接
    #[error("connection rejected: anonymous identity")]
    RejectedConnection,
    #[error("room not found: {0}")]
    UnknownRoom(String),
    #[error("session is closed")]
    SessionClosed,
}

impl ApplicationError {
    /// 该错误是否终止所在会话
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ApplicationError::RejectedConnection
                | ApplicationError::UnknownRoom(_)
                | ApplicationError::SessionClosed
                | ApplicationError::Broadcast(_)
        )
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Repository(value)
    }
}
