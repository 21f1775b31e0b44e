// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid queue name: {0}")]
    InvalidQueueName(String),

    #[error("Invalid task type: {0}")]
    InvalidTaskType(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
