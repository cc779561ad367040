//! LLM inference engine
//!
//! This module handles all interaction with llama-cpp: the engine binding
//! trait, its llama.cpp implementation, and streaming text reassembly.

pub mod backend;
pub mod engine;
pub mod streaming;

// Re-export main types for convenience
pub use backend::{BatchEntry, ContextParams, EngineError, InferenceBackend, SamplerParams, TokenId};
pub use engine::LlamaEngine;
pub use streaming::{StreamToken, Utf8Assembler};
