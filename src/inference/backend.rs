//! Engine binding interface
//!
//! The session state machine only talks to the inference engine through
//! [`InferenceBackend`]. [`LlamaEngine`](super::engine::LlamaEngine) is the
//! production implementation; tests use a scripted in-memory engine.

use std::path::Path;

use thiserror::Error;

/// Token id as understood by the engine vocabulary
pub type TokenId = i32;

/// Errors reported by an engine binding
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("Backend not initialized")]
    BackendNotInitialized,

    #[error("No model loaded")]
    NoModelLoaded,

    #[error("Session not prepared")]
    SessionNotPrepared,

    #[error("Failed to initialize backend: {0}")]
    BackendInit(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Failed to create context: {0}")]
    ContextCreate(String),

    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Failed to convert token {token} to text: {reason}")]
    Detokenize { token: TokenId, reason: String },

    #[error("Memory operation failed: {0}")]
    Memory(String),
}

/// One slot of a decode batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchEntry {
    pub token: TokenId,
    /// Absolute position in the window
    pub position: u32,
    /// Whether the engine should keep the output distribution for this slot
    pub logits: bool,
}

/// Sampler chain settings: top-k → top-p → temperature → seeded draw
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerParams {
    pub top_k: i32,
    pub top_p: f32,
    pub min_keep: usize,
    pub temperature: f32,
    pub seed: u32,
}

/// Everything the engine needs to allocate an inference context
#[derive(Debug, Clone, PartialEq)]
pub struct ContextParams {
    /// Window capacity in tokens
    pub n_ctx: u32,
    /// Maximum tokens per decode call
    pub n_batch: u32,
    /// Threads used for intra-op parallelism
    pub n_threads: i32,
    pub sampler: SamplerParams,
}

/// Black-box inference engine: turns token sequences into distributions and
/// back, and owns the position-indexed memory behind the context window.
///
/// All positions refer to sequence 0; this core never uses more than one.
pub trait InferenceBackend {
    /// Global engine setup. Must be idempotent.
    fn init_backend(&mut self, plugin_dir: Option<&Path>) -> Result<(), EngineError>;

    /// Loads model weights. Any previously loaded model is released first.
    fn load_model(&mut self, path: &Path) -> Result<(), EngineError>;

    /// Allocates the context, decode batch and sampler chain for the loaded model.
    fn prepare(&mut self, params: &ContextParams) -> Result<(), EngineError>;

    fn is_model_loaded(&self) -> bool;

    fn is_prepared(&self) -> bool;

    fn tokenize(&self, text: &str, add_special: bool) -> Result<Vec<TokenId>, EngineError>;

    /// Runs the model over one batch, writing its tokens into memory.
    fn decode(&mut self, batch: &[BatchEntry]) -> Result<(), EngineError>;

    /// Draws the next token from the most recent output distribution.
    fn sample(&mut self) -> Result<TokenId, EngineError>;

    fn is_end_of_generation(&self, token: TokenId) -> bool;

    fn token_to_bytes(&self, token: TokenId) -> Result<Vec<u8>, EngineError>;

    /// Drops memory for positions in `[start, end)`.
    fn remove_positions(&mut self, start: u32, end: u32) -> Result<(), EngineError>;

    /// Adds `delta` to every position in `[start, end)`.
    fn shift_positions(&mut self, start: u32, end: u32, delta: i32) -> Result<(), EngineError>;

    /// Forgets every decoded position.
    fn clear_memory(&mut self);

    /// Releases sampler, context and model. Safe to call repeatedly.
    fn unload(&mut self);

    /// Unloads and releases the global engine state. Safe to call repeatedly.
    fn shutdown(&mut self);

    /// Human-readable description of the engine build and host features.
    fn system_info(&self) -> String;
}
