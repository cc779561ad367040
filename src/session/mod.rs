//! Conversational session
//!
//! [`Session`] owns the engine binding, the context window and the turn state,
//! and sequences the high-level operations:
//!
//! ```text
//! init backend -> load model -> prepare session -> system prompt
//!     -> (user prompt -> generate ... -> end of stream)*
//! ```
//!
//! Every operation checks its own preconditions and returns a
//! [`SessionError`] instead of trusting call order.

use std::path::Path;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::inference::{BatchEntry, InferenceBackend, StreamToken, Utf8Assembler};
use crate::platform::{NativePlatform, PlatformAdapter};
use crate::system::recommended_threads;
use crate::types::{Message, Role};

pub mod decode;
pub mod window;

#[cfg(test)]
pub(crate) mod testing;

pub use decode::decode_in_batches;
pub use window::ContextWindow;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    BackendReady,
    ModelLoaded,
    SessionPrepared,
    SystemPromptSet,
    UserPromptSet,
    Generating,
    /// Model released, backend still up
    Unloaded,
    /// Backend released
    Shutdown,
}

impl SessionState {
    pub fn has_backend(self) -> bool {
        !matches!(self, SessionState::Uninitialized | SessionState::Shutdown)
    }

    pub fn has_model(self) -> bool {
        matches!(
            self,
            SessionState::ModelLoaded
                | SessionState::SessionPrepared
                | SessionState::SystemPromptSet
                | SessionState::UserPromptSet
                | SessionState::Generating
        )
    }

    pub fn is_prepared(self) -> bool {
        self.has_model() && self != SessionState::ModelLoaded
    }

    pub fn has_system_prompt(self) -> bool {
        matches!(
            self,
            SessionState::SystemPromptSet | SessionState::UserPromptSet | SessionState::Generating
        )
    }

    /// A user turn is open and may produce tokens
    pub fn in_turn(self) -> bool {
        matches!(self, SessionState::UserPromptSet | SessionState::Generating)
    }
}

/// A single conversation over one loaded model
pub struct Session<B: InferenceBackend> {
    engine: B,
    config: SessionConfig,
    platform: Box<dyn PlatformAdapter>,
    state: SessionState,
    window: ContextWindow,
    history: Vec<Message>,
    assembler: Utf8Assembler,
    response: String,
    /// A user turn was opened and has since ended
    turn_closed: bool,
}

impl<B: InferenceBackend> Session<B> {
    /// Creates a session using the native platform adapter
    pub fn new(engine: B, config: SessionConfig) -> Self {
        Self::with_platform(engine, config, Box::new(NativePlatform))
    }

    pub fn with_platform(
        engine: B,
        mut config: SessionConfig,
        platform: Box<dyn PlatformAdapter>,
    ) -> Self {
        config.validate();
        let window = ContextWindow::new(config.context_size, config.overflow_headroom);
        Self {
            engine,
            config,
            platform,
            state: SessionState::Uninitialized,
            window,
            history: Vec::new(),
            assembler: Utf8Assembler::new(),
            response: String::new(),
            turn_closed: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn window(&self) -> &ContextWindow {
        &self.window
    }

    pub fn engine(&self) -> &B {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut B {
        &mut self.engine
    }

    /// Messages of the current conversation, oldest first
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Text produced so far in the current (or just finished) turn
    pub fn last_response(&self) -> &str {
        &self.response
    }

    pub fn system_info(&self) -> String {
        self.engine.system_info()
    }

    fn require(
        &self,
        operation: &'static str,
        ok: fn(SessionState) -> bool,
    ) -> Result<(), SessionError> {
        if ok(self.state) {
            Ok(())
        } else {
            tracing::error!("Cannot {} in state {:?}", operation, self.state);
            Err(SessionError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn reset_long_term_states(&mut self, clear_memory: bool) {
        self.history.clear();
        self.turn_closed = false;
        self.window.reset_conversation();
        if clear_memory {
            self.engine.clear_memory();
        }
    }

    fn reset_short_term_states(&mut self) {
        self.window.reset_turn();
        self.assembler.clear();
        self.response.clear();
    }

    /// Sets up the engine's global state. Calling it again is a no-op.
    pub fn init_backend(&mut self, plugin_dir: Option<&Path>) -> Result<(), SessionError> {
        if self.state.has_backend() {
            tracing::debug!("Backend already initialized");
            return Ok(());
        }
        self.engine
            .init_backend(plugin_dir)
            .map_err(|e| SessionError::BackendInit(e.to_string()))?;
        self.state = SessionState::BackendReady;
        tracing::info!("Backend initiated");
        Ok(())
    }

    /// Loads model weights, releasing any model already loaded
    pub fn load_model(&mut self, path: &Path) -> Result<(), SessionError> {
        if path.as_os_str().is_empty() {
            return Err(SessionError::InvalidArgument("model path"));
        }
        self.require("load model", SessionState::has_backend)?;

        if !self.platform.file_exists(path) {
            tracing::error!("Model file {} does not exist", path.display());
            return Err(SessionError::ModelLoad(format!(
                "{} does not exist",
                path.display()
            )));
        }

        if self.state.has_model() {
            self.unload();
        }

        tracing::debug!("Loading model from: {}", path.display());
        if let Err(e) = self.engine.load_model(path) {
            tracing::error!("Failed to load model: {}", e);
            self.state = SessionState::BackendReady;
            return Err(SessionError::ModelLoad(e.to_string()));
        }

        self.state = SessionState::ModelLoaded;
        tracing::info!("Model loaded successfully");
        Ok(())
    }

    /// Allocates context, batch and sampler chain for the loaded model
    pub fn prepare_session(&mut self) -> Result<(), SessionError> {
        self.require("prepare session", SessionState::has_model)?;

        let n_threads = recommended_threads(&self.config.threads);
        tracing::info!("Using {} threads", n_threads);

        let params = self.config.context_params(n_threads);
        if let Err(e) = self.engine.prepare(&params) {
            tracing::error!("Failed to create context: {}", e);
            self.state = SessionState::ModelLoaded;
            return Err(SessionError::ContextInit(e.to_string()));
        }

        self.window = ContextWindow::new(self.config.context_size, self.config.overflow_headroom);
        self.reset_long_term_states(false);
        self.reset_short_term_states();
        self.state = SessionState::SessionPrepared;
        tracing::info!("Session prepared successfully");
        Ok(())
    }

    /// Starts a new conversation with `prompt` pinned at the start of the window.
    ///
    /// An over-long prompt is rejected before anything is reset.
    pub fn process_system_prompt(&mut self, prompt: &str) -> Result<(), SessionError> {
        self.require("process system prompt", SessionState::is_prepared)?;
        tracing::debug!("System prompt received: {}", prompt);

        let formatted = self.config.format_system_prompt(prompt);
        let tokens = self
            .engine
            .tokenize(&formatted, true)
            .map_err(|e| SessionError::Tokenization(e.to_string()))?;

        let limit = self.window.limit();
        if tokens.len() > limit as usize {
            tracing::error!("System prompt too long: {} tokens", tokens.len());
            return Err(SessionError::PromptTooLong {
                tokens: tokens.len(),
                limit,
            });
        }

        self.reset_long_term_states(true);
        self.reset_short_term_states();
        self.state = SessionState::SessionPrepared;

        decode_in_batches(
            &mut self.engine,
            &mut self.window,
            &tokens,
            self.config.batch_size as usize,
            false,
        )?;

        self.window.mark_system_prompt();
        self.history.push(Message::new(Role::System, prompt));
        self.state = SessionState::SystemPromptSet;
        tracing::info!("System prompt processed successfully");
        Ok(())
    }

    /// Opens a user turn allowing up to `n_predict` generated tokens.
    ///
    /// Prompts longer than the usable window keep only their trailing tokens.
    pub fn process_user_prompt(&mut self, prompt: &str, n_predict: u32) -> Result<(), SessionError> {
        self.require("process user prompt", SessionState::has_system_prompt)?;

        self.record_partial_response();
        self.reset_short_term_states();
        self.state = SessionState::SystemPromptSet;
        self.turn_closed = false;
        tracing::debug!("User prompt received: {}", prompt);

        let formatted = self.config.format_user_prompt(prompt);
        let mut tokens = self
            .engine
            .tokenize(&formatted, true)
            .map_err(|e| SessionError::Tokenization(e.to_string()))?;

        let max_tokens = self.window.limit() as usize;
        if tokens.len() > max_tokens {
            let skipped = tokens.len() - max_tokens;
            tokens.drain(..skipped);
            tracing::warn!("User prompt too long! Skipped {} tokens", skipped);
        }

        self.history.push(Message::new(Role::User, prompt));

        decode_in_batches(
            &mut self.engine,
            &mut self.window,
            &tokens,
            self.config.batch_size as usize,
            true,
        )?;

        self.window.begin_turn(n_predict);
        self.state = SessionState::UserPromptSet;
        tracing::info!("User prompt processed successfully");
        Ok(())
    }

    /// Produces the next piece of the assistant's reply.
    ///
    /// Returns an empty token while a multi-byte character is incomplete and
    /// [`StreamToken::Done`] once the turn is over. After an error the caller
    /// should stop polling.
    pub fn generate_next_token(&mut self) -> Result<StreamToken, SessionError> {
        if self.state == SessionState::SystemPromptSet && self.turn_closed {
            return Ok(StreamToken::Done);
        }
        self.require("generate", SessionState::in_turn)?;

        if self.window.would_overflow(1) {
            tracing::warn!("Context full! Shifting...");
            self.window.shift(&mut self.engine)?;
        }

        if self.window.turn_exhausted() {
            tracing::debug!("Reached stop position: {}", self.window.stop_position());
            self.finish_turn();
            return Ok(StreamToken::Done);
        }

        let token = self
            .engine
            .sample()
            .map_err(|e| SessionError::Decode(e.to_string()))?;

        let entry = BatchEntry {
            token,
            position: self.window.current_position(),
            logits: true,
        };
        if let Err(e) = self.engine.decode(&[entry]) {
            tracing::error!("Decode failed for generated token: {}", e);
            return Err(SessionError::Decode(e.to_string()));
        }
        self.window.advance(1);

        if self.engine.is_end_of_generation(token) {
            tracing::debug!("End of generation (EOG token)");
            self.finish_turn();
            return Ok(StreamToken::Done);
        }

        let bytes = self.engine.token_to_bytes(token)?;
        let chunk = self.assembler.push(&bytes);
        self.response.push_str(&chunk);
        self.state = SessionState::Generating;
        Ok(StreamToken::Token(chunk))
    }

    /// Lazily yields non-empty text chunks until the turn ends.
    pub fn stream(&mut self) -> ChunkStream<'_, B> {
        ChunkStream {
            session: self,
            finished: false,
        }
    }

    /// Keeps the reply of an open turn in history; its tokens are in the window
    fn record_partial_response(&mut self) {
        if self.state.in_turn() && !self.response.is_empty() {
            self.history
                .push(Message::new(Role::Assistant, self.response.clone()));
        }
    }

    fn finish_turn(&mut self) {
        self.window.end_turn();
        self.record_partial_response();
        self.state = SessionState::SystemPromptSet;
        self.turn_closed = true;
    }

    /// Abandons the current turn. Tokens already decoded stay in the window.
    pub fn stop_generation(&mut self) {
        self.record_partial_response();
        self.reset_short_term_states();
        if self.state.in_turn() {
            self.state = SessionState::SystemPromptSet;
            self.turn_closed = true;
        }
        tracing::info!("Generation stopped");
    }

    /// Forgets the whole conversation, including the system prompt
    pub fn reset_conversation(&mut self) {
        self.reset_long_term_states(true);
        self.reset_short_term_states();
        if self.state.has_system_prompt() {
            self.state = SessionState::SessionPrepared;
        }
        tracing::info!("Conversation reset");
    }

    /// Releases sampler, context and model. The backend stays initialized.
    pub fn unload(&mut self) {
        self.reset_long_term_states(false);
        self.reset_short_term_states();
        self.engine.unload();
        if self.state.has_backend() {
            self.state = SessionState::Unloaded;
        }
        tracing::info!("Resources unloaded");
    }

    /// Unloads and releases the backend
    pub fn shutdown(&mut self) {
        self.unload();
        self.engine.shutdown();
        self.state = SessionState::Shutdown;
        tracing::info!("Backend shutdown");
    }
}

/// Iterator over the remaining text of the current turn
pub struct ChunkStream<'a, B: InferenceBackend> {
    session: &'a mut Session<B>,
    finished: bool,
}

impl<B: InferenceBackend> Iterator for ChunkStream<'_, B> {
    type Item = Result<String, SessionError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            match self.session.generate_next_token() {
                Ok(StreamToken::Token(text)) if text.is_empty() => continue,
                Ok(StreamToken::Token(text)) => return Some(Ok(text)),
                Ok(StreamToken::Done) => self.finished = true,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
