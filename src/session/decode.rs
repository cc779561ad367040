//! Batched decode driver
//!
//! Feeds a token sequence through the engine in fixed-size batches starting
//! at the window's current position, shifting the window whenever the next
//! batch would not fit.

use crate::error::SessionError;
use crate::inference::{BatchEntry, InferenceBackend, TokenId};
use crate::session::window::ContextWindow;

/// Decodes `tokens` in chunks of `batch_size`.
///
/// Positions are taken from `window` and advanced after every successful
/// chunk, so on failure the window still covers the chunks already resident
/// in engine memory. With `last_logits` only the final token of the sequence
/// keeps its output distribution.
pub fn decode_in_batches<B: InferenceBackend + ?Sized>(
    engine: &mut B,
    window: &mut ContextWindow,
    tokens: &[TokenId],
    batch_size: usize,
    last_logits: bool,
) -> Result<(), SessionError> {
    tracing::debug!(
        "Decode {} tokens starting at position {}",
        tokens.len(),
        window.current_position()
    );

    let batch_size = batch_size.max(1);
    let last_index = tokens.len().saturating_sub(1);
    let mut entries = Vec::with_capacity(batch_size);

    for (chunk_index, chunk) in tokens.chunks(batch_size).enumerate() {
        let chunk_len = chunk.len() as u32;
        while window.would_overflow(chunk_len) {
            tracing::warn!("Current batch won't fit into context! Shifting...");
            window.shift(engine)?;
        }

        let start = window.current_position();
        entries.clear();
        entries.extend(chunk.iter().enumerate().map(|(j, &token)| BatchEntry {
            token,
            position: start + j as u32,
            logits: last_logits && chunk_index * batch_size + j == last_index,
        }));

        engine.decode(&entries).map_err(|e| {
            tracing::error!("Decode failed at position {}: {}", start, e);
            SessionError::Decode(e.to_string())
        })?;
        window.advance(chunk_len);
    }

    Ok(())
}
