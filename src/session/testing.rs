//! Scripted in-memory engine for tests
//!
//! Tokenizes one token per byte, keeps a position-indexed memory map so
//! eviction and renumbering can be asserted directly, and samples from a
//! queue of pre-scripted tokens, falling back to end-of-generation.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use crate::inference::{BatchEntry, ContextParams, EngineError, InferenceBackend, TokenId};

pub const BOS: TokenId = 1;
pub const EOG: TokenId = 2;
const BYTE_BASE: TokenId = 16;
const FILL_BASE: TokenId = 1000;

#[derive(Debug, Default)]
pub struct ScriptedEngine {
    backend_ready: bool,
    model_loaded: bool,
    prepared: Option<ContextParams>,
    memory: BTreeMap<u32, TokenId>,
    script: VecDeque<TokenId>,
    decode_sizes: Vec<usize>,
    decoded: Vec<TokenId>,
    logits_positions: Vec<u32>,
    fail_decode_on: Option<usize>,
    pub fail_load: bool,
    pub fail_prepare: bool,
    pub clear_calls: usize,
    pub unload_calls: usize,
    pub loaded_path: Option<std::path::PathBuf>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine with a context ready for decoding, as after `prepare`
    pub fn prepared_with_batch(n_batch: u32) -> Self {
        let mut engine = Self::new();
        engine.backend_ready = true;
        engine.model_loaded = true;
        engine.prepared = Some(ContextParams {
            n_ctx: 256,
            n_batch,
            n_threads: 1,
            sampler: crate::config::SessionConfig::default().context_params(1).sampler,
        });
        engine
    }

    pub fn byte_token(byte: u8) -> TokenId {
        BYTE_BASE + TokenId::from(byte)
    }

    /// Queues tokens that spell out `text` byte by byte
    pub fn script_text(&mut self, text: &str) {
        self.script_bytes(text.as_bytes());
    }

    pub fn script_bytes(&mut self, bytes: &[u8]) {
        self.script
            .extend(bytes.iter().map(|&b| Self::byte_token(b)));
    }

    pub fn script_token(&mut self, token: TokenId) {
        self.script.push_back(token);
    }

    /// Writes placeholder tokens into `[start, start + count)` without a decode call
    pub fn fill(&mut self, start: u32, count: u32) {
        for pos in start..start + count {
            self.memory.insert(pos, FILL_BASE + pos as TokenId);
        }
    }

    /// Makes the `call`-th decode (0-based, counting from now) fail
    pub fn fail_decode_on_call(&mut self, call: usize) {
        self.fail_decode_on = Some(self.decode_sizes.len() + call);
    }

    pub fn positions(&self) -> Vec<u32> {
        self.memory.keys().copied().collect()
    }

    pub fn memory_tokens(&self) -> Vec<TokenId> {
        self.memory.values().copied().collect()
    }

    /// Size of every successful decode call
    pub fn decode_batches(&self) -> Vec<usize> {
        self.decode_sizes.clone()
    }

    /// Every token passed to a successful decode call, in order
    pub fn decoded_tokens(&self) -> &[TokenId] {
        &self.decoded
    }

    pub fn logits_positions(&self) -> Vec<u32> {
        self.logits_positions.clone()
    }

    pub fn context_params(&self) -> Option<&ContextParams> {
        self.prepared.as_ref()
    }

    fn require_prepared(&self) -> Result<&ContextParams, EngineError> {
        if !self.model_loaded {
            return Err(EngineError::NoModelLoaded);
        }
        self.prepared.as_ref().ok_or(EngineError::SessionNotPrepared)
    }
}

impl InferenceBackend for ScriptedEngine {
    fn init_backend(&mut self, _plugin_dir: Option<&Path>) -> Result<(), EngineError> {
        self.backend_ready = true;
        Ok(())
    }

    fn load_model(&mut self, path: &Path) -> Result<(), EngineError> {
        if !self.backend_ready {
            return Err(EngineError::BackendNotInitialized);
        }
        self.prepared = None;
        self.memory.clear();
        if self.fail_load {
            self.model_loaded = false;
            return Err(EngineError::ModelLoad("scripted failure".into()));
        }
        self.model_loaded = true;
        self.loaded_path = Some(path.to_path_buf());
        Ok(())
    }

    fn prepare(&mut self, params: &ContextParams) -> Result<(), EngineError> {
        if !self.model_loaded {
            return Err(EngineError::NoModelLoaded);
        }
        if self.fail_prepare {
            return Err(EngineError::ContextCreate("scripted failure".into()));
        }
        self.prepared = Some(params.clone());
        self.memory.clear();
        Ok(())
    }

    fn is_model_loaded(&self) -> bool {
        self.model_loaded
    }

    fn is_prepared(&self) -> bool {
        self.model_loaded && self.prepared.is_some()
    }

    fn tokenize(&self, text: &str, add_special: bool) -> Result<Vec<TokenId>, EngineError> {
        if !self.model_loaded {
            return Err(EngineError::NoModelLoaded);
        }
        let mut tokens = Vec::with_capacity(text.len() + 1);
        if add_special {
            tokens.push(BOS);
        }
        tokens.extend(text.bytes().map(Self::byte_token));
        Ok(tokens)
    }

    fn decode(&mut self, batch: &[BatchEntry]) -> Result<(), EngineError> {
        let params = self.require_prepared()?;
        let (n_ctx, n_batch) = (params.n_ctx, params.n_batch as usize);

        if self.fail_decode_on == Some(self.decode_sizes.len()) {
            self.fail_decode_on = None;
            return Err(EngineError::Decode("scripted failure".into()));
        }
        if batch.len() > n_batch {
            return Err(EngineError::Decode(format!(
                "batch of {} exceeds n_batch {}",
                batch.len(),
                n_batch
            )));
        }
        for entry in batch {
            if entry.position >= n_ctx {
                return Err(EngineError::Decode(format!(
                    "position {} outside window",
                    entry.position
                )));
            }
            if self.memory.contains_key(&entry.position) {
                return Err(EngineError::Decode(format!(
                    "position {} already occupied",
                    entry.position
                )));
            }
        }
        for entry in batch {
            self.memory.insert(entry.position, entry.token);
            self.decoded.push(entry.token);
            if entry.logits {
                self.logits_positions.push(entry.position);
            }
        }
        self.decode_sizes.push(batch.len());
        Ok(())
    }

    fn sample(&mut self) -> Result<TokenId, EngineError> {
        self.require_prepared()?;
        Ok(self.script.pop_front().unwrap_or(EOG))
    }

    fn is_end_of_generation(&self, token: TokenId) -> bool {
        token == EOG
    }

    fn token_to_bytes(&self, token: TokenId) -> Result<Vec<u8>, EngineError> {
        if (BYTE_BASE..BYTE_BASE + 256).contains(&token) {
            Ok(vec![(token - BYTE_BASE) as u8])
        } else {
            Ok(Vec::new())
        }
    }

    fn remove_positions(&mut self, start: u32, end: u32) -> Result<(), EngineError> {
        self.require_prepared()?;
        self.memory.retain(|&pos, _| pos < start || pos >= end);
        Ok(())
    }

    fn shift_positions(&mut self, start: u32, end: u32, delta: i32) -> Result<(), EngineError> {
        self.require_prepared()?;
        let moved: Vec<(u32, TokenId)> = self.memory.range(start..end).map(|(&p, &t)| (p, t)).collect();
        for (pos, _) in &moved {
            self.memory.remove(pos);
        }
        for (pos, token) in moved {
            let target = pos as i64 + i64::from(delta);
            if target < 0 || self.memory.contains_key(&(target as u32)) {
                return Err(EngineError::Memory(format!(
                    "cannot move position {pos} to {target}"
                )));
            }
            self.memory.insert(target as u32, token);
        }
        Ok(())
    }

    fn clear_memory(&mut self) {
        self.memory.clear();
        self.clear_calls += 1;
    }

    fn unload(&mut self) {
        self.prepared = None;
        self.model_loaded = false;
        self.memory.clear();
        self.unload_calls += 1;
    }

    fn shutdown(&mut self) {
        self.unload();
        self.backend_ready = false;
    }

    fn system_info(&self) -> String {
        "scripted engine".to_string()
    }
}
