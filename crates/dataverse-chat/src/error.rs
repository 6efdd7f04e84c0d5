//! Error types for the chat exchange pipeline.

use dataverse_core::error::CoreError;
use dataverse_core::types::{ExchangePhase, MessageId};

/// Errors from the chat engine.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("assistant is still responding")]
    Busy,
    #[error("message not found: {0}")]
    MessageNotFound(MessageId),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
    #[error("invalid phase transition: {0} -> {1}")]
    InvalidTransition(ExchangePhase, ExchangePhase),
    #[error("store error: {0}")]
    Store(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<CoreError> for ChatError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Config(msg) => ChatError::Config(msg),
            other => ChatError::Store(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ChatError::InvalidResponse(err.to_string())
        } else {
            ChatError::Backend(err.to_string())
        }
    }
}
