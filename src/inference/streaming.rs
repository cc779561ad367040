//! Streaming inference support
//!
//! Token-by-token output and reassembly of UTF-8 text from detokenized bytes.
//! A single code point may be split across several sampled tokens, so bytes
//! are held back until the buffered text is complete.

/// Result of one generation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamToken {
    /// Newly completed text. Empty while a multi-byte character is pending.
    Token(String),
    /// The turn is over: stop position or end-of-generation token reached
    Done,
}

impl StreamToken {
    /// Returns true if this is a token variant
    pub fn is_token(&self) -> bool {
        matches!(self, StreamToken::Token(_))
    }

    /// Returns true if generation is complete
    pub fn is_done(&self) -> bool {
        matches!(self, StreamToken::Done)
    }

    /// Extracts the token string if this is a Token variant
    pub fn as_token(&self) -> Option<&str> {
        match self {
            StreamToken::Token(s) => Some(s),
            StreamToken::Done => None,
        }
    }
}

/// Buffers detokenized bytes and releases them only as complete UTF-8 text.
///
/// The whole buffer is validated on every push. A malformed sequence is
/// treated the same as a truncated one and stays buffered; upstream bytes come
/// from the model vocabulary, so only trailing truncation is expected.
#[derive(Debug, Default, Clone)]
pub struct Utf8Assembler {
    pending: Vec<u8>,
}

impl Utf8Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns the buffered text if it is now valid,
    /// or an empty string if it is still incomplete.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_owned();
                self.pending.clear();
                text
            }
            Err(_) => String::new(),
        }
    }

    /// Bytes waiting for the rest of their character
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
