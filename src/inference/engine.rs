//! Inference engine implementation
//!
//! Binds [`InferenceBackend`] to llama.cpp through llama-cpp-2.
//!
//! # Ownership
//!
//! A `LlamaContext` borrows the `LlamaModel` it was created from. The engine
//! keeps the model boxed and stores the context next to it inside
//! [`LoadedModel`], declared so that the context (and sampler) always drop
//! before the model. Having a model therefore means having either all of
//! context and sampler or none of them.

use std::ffi::{CStr, CString};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;
use llama_cpp_2::{send_logs_to_tracing, LogOptions};

use crate::inference::backend::{
    BatchEntry, ContextParams, EngineError, InferenceBackend, SamplerParams, TokenId,
};

/// Only one sequence is ever used.
const SEQ_ID: i32 = 0;

/// Context, sampler and decode batch for a prepared session
struct PreparedContext {
    sampler: LlamaSampler,
    // Reused by every decode call; holds at most `n_batch` tokens.
    batch: LlamaBatch,
    // Borrows the model owned by the enclosing `LoadedModel`.
    ctx: LlamaContext<'static>,
    n_batch: usize,
}

/// A loaded model plus the session state that depends on it
struct LoadedModel {
    // Must be declared before `model`: fields drop in declaration order.
    prepared: Option<PreparedContext>,
    model: Box<LlamaModel>,
    path: PathBuf,
}

/// llama.cpp engine binding
///
/// Not `Send` by itself because llama-cpp-2 types hold raw pointers; see the
/// `Send` impl below for the contract under which it crosses threads.
pub struct LlamaEngine {
    // Dropped before `backend`.
    loaded: Option<LoadedModel>,
    backend: Option<LlamaBackend>,
}

// SAFETY: llama.cpp objects are not tied to the thread that created them; they
// only forbid concurrent use. The engine is only reachable through `&mut`
// (behind the FFI mutex), so at most one thread touches it at a time.
unsafe impl Send for LlamaEngine {}

impl LlamaEngine {
    /// Creates an engine with no backend, model or context
    pub fn new() -> Self {
        Self {
            loaded: None,
            backend: None,
        }
    }

    /// Returns the path of the loaded model, if any
    pub fn model_path(&self) -> Option<&Path> {
        self.loaded.as_ref().map(|l| l.path.as_path())
    }

    fn loaded(&self) -> Result<&LoadedModel, EngineError> {
        self.loaded.as_ref().ok_or(EngineError::NoModelLoaded)
    }

    fn prepared_mut(&mut self) -> Result<&mut PreparedContext, EngineError> {
        self.loaded
            .as_mut()
            .ok_or(EngineError::NoModelLoaded)?
            .prepared
            .as_mut()
            .ok_or(EngineError::SessionNotPrepared)
    }
}

impl Default for LlamaEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn build_sampler(params: &SamplerParams) -> LlamaSampler {
    LlamaSampler::chain_simple([
        LlamaSampler::top_k(params.top_k),
        LlamaSampler::top_p(params.top_p, params.min_keep),
        LlamaSampler::temp(params.temperature),
        LlamaSampler::dist(params.seed),
    ])
}

/// Refills `batch` with `entries`, rejecting more than `n_batch` tokens
fn fill_batch(
    batch: &mut LlamaBatch,
    entries: &[BatchEntry],
    n_batch: usize,
) -> Result<(), EngineError> {
    if entries.len() > n_batch {
        return Err(EngineError::Decode(format!(
            "batch of {} exceeds n_batch {}",
            entries.len(),
            n_batch
        )));
    }

    batch.clear();
    for entry in entries {
        batch
            .add(
                LlamaToken::new(entry.token),
                entry.position as i32,
                &[SEQ_ID],
                entry.logits,
            )
            .map_err(|e| EngineError::Decode(format!("failed to add token to batch: {e}")))?;
    }
    Ok(())
}

fn load_backend_plugins(dir: &Path) -> Result<(), EngineError> {
    let dir = CString::new(dir.to_string_lossy().as_bytes())
        .map_err(|e| EngineError::BackendInit(format!("invalid plugin path: {e}")))?;
    // SAFETY: `dir` is a valid NUL-terminated string for the duration of the call.
    unsafe { llama_cpp_sys_2::ggml_backend_load_all_from_path(dir.as_ptr()) };
    Ok(())
}

impl InferenceBackend for LlamaEngine {
    fn init_backend(&mut self, plugin_dir: Option<&Path>) -> Result<(), EngineError> {
        if self.backend.is_some() {
            return Ok(());
        }

        send_logs_to_tracing(LogOptions::default());

        match plugin_dir {
            Some(dir) if !dir.as_os_str().is_empty() => {
                tracing::info!("Loading backends from {}", dir.display());
                load_backend_plugins(dir)?;
            }
            _ => tracing::info!("No backend plugin directory, using built-in backends"),
        }

        let backend = LlamaBackend::init().map_err(|e| EngineError::BackendInit(e.to_string()))?;
        self.backend = Some(backend);
        tracing::info!("Backend initialized; llama.cpp logs routed to tracing");
        Ok(())
    }

    fn load_model(&mut self, path: &Path) -> Result<(), EngineError> {
        let backend = self
            .backend
            .as_ref()
            .ok_or(EngineError::BackendNotInitialized)?;

        if self.loaded.take().is_some() {
            tracing::info!("Releasing previously loaded model");
        }

        tracing::debug!("Loading model from {}", path.display());
        let model = LlamaModel::load_from_file(backend, path, &LlamaModelParams::default())
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?;

        tracing::info!(
            "Model loaded: {} ({} params, {} vocab, {} trained ctx)",
            path.display(),
            model.n_params(),
            model.n_vocab(),
            model.n_ctx_train()
        );

        self.loaded = Some(LoadedModel {
            prepared: None,
            model: Box::new(model),
            path: path.to_path_buf(),
        });
        Ok(())
    }

    fn prepare(&mut self, params: &ContextParams) -> Result<(), EngineError> {
        let backend = self
            .backend
            .as_ref()
            .ok_or(EngineError::BackendNotInitialized)?;
        let loaded = self.loaded.as_mut().ok_or(EngineError::NoModelLoaded)?;

        // Drop any old context before creating a new one.
        loaded.prepared = None;

        let n_ctx = NonZeroU32::new(params.n_ctx)
            .ok_or_else(|| EngineError::ContextCreate("context size must be non-zero".into()))?;
        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(Some(n_ctx))
            .with_n_batch(params.n_batch)
            .with_n_ubatch(params.n_batch)
            .with_n_threads(params.n_threads)
            .with_n_threads_batch(params.n_threads);

        // SAFETY: the model lives on the heap inside `loaded.model` and is never
        // moved out or replaced while `loaded.prepared` is `Some`; `prepared` is
        // declared before `model` so the context is dropped first.
        let model: &'static LlamaModel = unsafe { &*(loaded.model.as_ref() as *const LlamaModel) };
        let ctx = model
            .new_context(backend, ctx_params)
            .map_err(|e| EngineError::ContextCreate(e.to_string()))?;

        let n_batch = params.n_batch.max(1) as usize;
        loaded.prepared = Some(PreparedContext {
            sampler: build_sampler(&params.sampler),
            batch: LlamaBatch::new(n_batch, 1),
            ctx,
            n_batch,
        });

        tracing::info!(
            "Context ready: n_ctx={}, n_batch={}, threads={}",
            params.n_ctx,
            params.n_batch,
            params.n_threads
        );
        Ok(())
    }

    fn is_model_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    fn is_prepared(&self) -> bool {
        self.loaded
            .as_ref()
            .map(|l| l.prepared.is_some())
            .unwrap_or(false)
    }

    fn tokenize(&self, text: &str, add_special: bool) -> Result<Vec<TokenId>, EngineError> {
        let add_bos = if add_special {
            AddBos::Always
        } else {
            AddBos::Never
        };
        let tokens = self
            .loaded()?
            .model
            .str_to_token(text, add_bos)
            .map_err(|e| EngineError::Tokenization(e.to_string()))?;
        Ok(tokens.into_iter().map(|t| t.0).collect())
    }

    fn decode(&mut self, entries: &[BatchEntry]) -> Result<(), EngineError> {
        let prepared = self.prepared_mut()?;
        fill_batch(&mut prepared.batch, entries, prepared.n_batch)?;
        prepared
            .ctx
            .decode(&mut prepared.batch)
            .map_err(|e| EngineError::Decode(e.to_string()))
    }

    fn sample(&mut self) -> Result<TokenId, EngineError> {
        let prepared = self.prepared_mut()?;
        let token = prepared.sampler.sample(&prepared.ctx, -1);
        prepared.sampler.accept(token);
        Ok(token.0)
    }

    fn is_end_of_generation(&self, token: TokenId) -> bool {
        self.loaded
            .as_ref()
            .map(|l| l.model.is_eog_token(LlamaToken::new(token)))
            .unwrap_or(false)
    }

    fn token_to_bytes(&self, token: TokenId) -> Result<Vec<u8>, EngineError> {
        self.loaded()?
            .model
            .token_to_bytes(LlamaToken::new(token), Special::Tokenize)
            .map_err(|e| EngineError::Detokenize {
                token,
                reason: e.to_string(),
            })
    }

    fn remove_positions(&mut self, start: u32, end: u32) -> Result<(), EngineError> {
        let prepared = self.prepared_mut()?;
        prepared
            .ctx
            .clear_kv_cache_seq(Some(SEQ_ID as u32), Some(start), Some(end))
            .map_err(|e| EngineError::Memory(e.to_string()))?;
        Ok(())
    }

    fn shift_positions(&mut self, start: u32, end: u32, delta: i32) -> Result<(), EngineError> {
        let prepared = self.prepared_mut()?;
        prepared
            .ctx
            .kv_cache_seq_add(SEQ_ID, Some(start), Some(end), delta)
            .map_err(|e| EngineError::Memory(e.to_string()))
    }

    fn clear_memory(&mut self) {
        if let Ok(prepared) = self.prepared_mut() {
            prepared.ctx.clear_kv_cache();
        }
    }

    fn unload(&mut self) {
        if let Some(loaded) = self.loaded.take() {
            tracing::info!("Released model {}", loaded.path.display());
        }
    }

    fn shutdown(&mut self) {
        self.unload();
        if self.backend.take().is_some() {
            tracing::info!("Backend released");
        }
    }

    fn system_info(&self) -> String {
        // SAFETY: llama.cpp returns a pointer to a static NUL-terminated buffer.
        let raw = unsafe { llama_cpp_sys_2::llama_print_system_info() };
        if raw.is_null() {
            return String::new();
        }
        unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned()
    }
}
