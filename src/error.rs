//! Session errors and their C ABI status codes

use thiserror::Error;

use crate::inference::EngineError;
use crate::session::SessionState;

/// Integer status returned across the FFI boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    /// Bad input, wrong call order, load/context failures, oversized system prompt
    Invalid = 1,
    /// The engine failed to decode, or the window cannot make room
    DecodeFailure = 2,
}

impl StatusCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Errors raised by session operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Cannot {operation} in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Failed to initialize backend: {0}")]
    BackendInit(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Failed to initialize context: {0}")]
    ContextInit(String),

    #[error("System prompt too long: {tokens} tokens (limit {limit})")]
    PromptTooLong { tokens: usize, limit: u32 },

    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Context overflow: nothing left to evict after system prompt of {boundary} tokens (limit {limit})")]
    ContextOverflow { boundary: u32, limit: u32 },
}

impl SessionError {
    /// Maps the error to its FFI status code
    pub fn status(&self) -> StatusCode {
        match self {
            SessionError::Decode(_) | SessionError::ContextOverflow { .. } => {
                StatusCode::DecodeFailure
            }
            _ => StatusCode::Invalid,
        }
    }
}

impl From<EngineError> for SessionError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::BackendInit(msg) => SessionError::BackendInit(msg),
            EngineError::ModelLoad(msg) => SessionError::ModelLoad(msg),
            EngineError::ContextCreate(msg) => SessionError::ContextInit(msg),
            EngineError::Tokenization(msg) => SessionError::Tokenization(msg),
            other => SessionError::Decode(other.to_string()),
        }
    }
}

/// Converts an operation result into its FFI status code
pub fn status_of<T>(result: &Result<T, SessionError>) -> StatusCode {
    match result {
        Ok(_) => StatusCode::Ok,
        Err(e) => e.status(),
    }
}
