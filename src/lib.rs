//! llamachat
//!
//! Stateful chat sessions over llama.cpp: a context window that keeps the
//! system prompt pinned while evicting old history, batched decoding,
//! UTF-8-safe token streaming and a C ABI for embedding hosts.

pub mod config;
pub mod error;
pub mod ffi;
pub mod inference;
pub mod logging;
pub mod platform;
pub mod session;
pub mod system;
pub mod types;

pub use config::SessionConfig;
pub use error::{SessionError, StatusCode};
pub use inference::{InferenceBackend, LlamaEngine, StreamToken};
pub use session::{Session, SessionState};
