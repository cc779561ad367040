//! Context window bookkeeping
//!
//! Tracks absolute positions inside the fixed-size token window and evicts
//! old conversation tokens when the window fills up. Tokens before the system
//! prompt boundary are never evicted.

use crate::error::SessionError;
use crate::inference::InferenceBackend;

/// Positions in the engine's token window
///
/// `system_prompt_boundary <= current_position <= limit()` holds after every
/// operation that goes through [`ContextWindow::shift`] and the decode driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextWindow {
    capacity: u32,
    safety_margin: u32,
    system_prompt_boundary: u32,
    current_position: u32,
    stop_position: u32,
}

impl ContextWindow {
    pub fn new(capacity: u32, safety_margin: u32) -> Self {
        Self {
            capacity,
            safety_margin,
            system_prompt_boundary: 0,
            current_position: 0,
            stop_position: 0,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Highest position the window may be filled to
    pub fn limit(&self) -> u32 {
        self.capacity.saturating_sub(self.safety_margin)
    }

    pub fn system_prompt_boundary(&self) -> u32 {
        self.system_prompt_boundary
    }

    /// Next free slot
    pub fn current_position(&self) -> u32 {
        self.current_position
    }

    pub fn stop_position(&self) -> u32 {
        self.stop_position
    }

    /// Free slots below the limit
    pub fn remaining(&self) -> u32 {
        self.limit().saturating_sub(self.current_position)
    }

    /// True if placing `n_tokens` more tokens would cross the limit
    pub fn would_overflow(&self, n_tokens: u32) -> bool {
        u64::from(self.current_position) + u64::from(n_tokens) > u64::from(self.limit())
    }

    /// Tokens the next shift would evict: half of the non-system history
    pub fn discard_count(&self) -> u32 {
        (self.current_position - self.system_prompt_boundary) / 2
    }

    /// Evicts the older half of the non-system history.
    ///
    /// Removes `[boundary, boundary + n_discard)` from engine memory, moves the
    /// rest of the history down by `n_discard`, and returns `n_discard`. An
    /// active turn's stop position moves down with it. Fails with
    /// [`SessionError::ContextOverflow`] when there is nothing to evict.
    pub fn shift<B: InferenceBackend + ?Sized>(
        &mut self,
        engine: &mut B,
    ) -> Result<u32, SessionError> {
        let n_discard = self.discard_count();
        if n_discard == 0 {
            tracing::error!(
                "Context full and nothing to evict (boundary {}, position {})",
                self.system_prompt_boundary,
                self.current_position
            );
            return Err(SessionError::ContextOverflow {
                boundary: self.system_prompt_boundary,
                limit: self.limit(),
            });
        }

        tracing::info!("Discarding {} tokens", n_discard);

        let evict_end = self.system_prompt_boundary + n_discard;
        engine.remove_positions(self.system_prompt_boundary, evict_end)?;
        engine.shift_positions(evict_end, self.current_position, -(n_discard as i32))?;

        self.current_position -= n_discard;
        self.stop_position = self.stop_position.saturating_sub(n_discard);

        tracing::info!(
            "Context shifting done! Current position: {}",
            self.current_position
        );
        Ok(n_discard)
    }

    /// Records `n_tokens` newly decoded tokens
    pub fn advance(&mut self, n_tokens: u32) {
        self.current_position += n_tokens;
    }

    /// Pins everything decoded so far as the system prompt
    pub fn mark_system_prompt(&mut self) {
        self.system_prompt_boundary = self.current_position;
    }

    /// Allows `n_predict` more tokens in this turn
    pub fn begin_turn(&mut self, n_predict: u32) {
        self.stop_position = self.current_position.saturating_add(n_predict);
    }

    pub fn turn_exhausted(&self) -> bool {
        self.current_position >= self.stop_position
    }

    /// Closes the turn so no further tokens are generated
    pub fn end_turn(&mut self) {
        self.stop_position = self.current_position;
    }

    pub fn reset_turn(&mut self) {
        self.stop_position = 0;
    }

    pub fn reset_conversation(&mut self) {
        self.system_prompt_boundary = 0;
        self.current_position = 0;
        self.stop_position = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::ScriptedEngine;

    /// Window with `system` system tokens and `history` further tokens decoded
    fn filled(engine: &mut ScriptedEngine, system: u32, history: u32) -> ContextWindow {
        let mut window = ContextWindow::new(256, 4);
        engine.fill(0, system + history);
        window.advance(system);
        window.mark_system_prompt();
        window.advance(history);
        window
    }

    #[test]
    fn test_new_window() {
        let window = ContextWindow::new(256, 4);
        assert_eq!(window.limit(), 252);
        assert_eq!(window.remaining(), 252);
        assert!(window.turn_exhausted());
        assert!(!window.would_overflow(252));
        assert!(window.would_overflow(253));
    }

    #[test]
    fn test_shift_discards_half_of_history() {
        let mut engine = ScriptedEngine::prepared_with_batch(1);
        let mut window = filled(&mut engine, 10, 241);

        let n_discard = window.shift(&mut engine).unwrap();

        assert_eq!(n_discard, 120);
        assert_eq!(window.system_prompt_boundary(), 10);
        assert_eq!(window.current_position(), 251 - 120);
    }

    #[test]
    fn test_shift_keeps_system_prompt_and_renumbers_history() {
        let mut engine = ScriptedEngine::prepared_with_batch(1);
        let mut window = filled(&mut engine, 4, 8);
        let before = engine.memory_tokens();

        window.shift(&mut engine).unwrap();

        // positions 0..4 untouched, 4..8 evicted, 8..12 moved to 4..8
        let after = engine.memory_tokens();
        assert_eq!(after.len(), 8);
        assert_eq!(&after[..4], &before[..4]);
        assert_eq!(&after[4..], &before[8..]);
        assert_eq!(engine.positions(), (0..8).collect::<Vec<_>>());
        assert_eq!(window.current_position(), 8);
    }

    #[test]
    fn test_shift_never_touches_positions_below_boundary() {
        let mut engine = ScriptedEngine::prepared_with_batch(1);
        let mut window = filled(&mut engine, 50, 3);
        let system: Vec<_> = engine.memory_tokens()[..50].to_vec();

        window.shift(&mut engine).unwrap();
        assert_eq!(window.current_position(), 52);
        assert_eq!(&engine.memory_tokens()[..50], system.as_slice());

        window.shift(&mut engine).unwrap();
        assert_eq!(window.current_position(), 51);
        assert_eq!(&engine.memory_tokens()[..50], system.as_slice());
    }

    #[test]
    fn test_shift_without_history_is_overflow() {
        let mut engine = ScriptedEngine::prepared_with_batch(1);
        let mut window = filled(&mut engine, 20, 1);

        let err = window.shift(&mut engine).unwrap_err();
        assert_eq!(
            err,
            SessionError::ContextOverflow {
                boundary: 20,
                limit: 252
            }
        );
        assert_eq!(window.current_position(), 21);
        assert_eq!(engine.positions().len(), 21);
    }

    #[test]
    fn test_shift_moves_stop_position() {
        let mut engine = ScriptedEngine::prepared_with_batch(1);
        let mut window = filled(&mut engine, 2, 100);
        window.begin_turn(10);
        assert_eq!(window.stop_position(), 112);

        let n_discard = window.shift(&mut engine).unwrap();
        assert_eq!(n_discard, 50);
        assert_eq!(window.stop_position(), 62);
        assert_eq!(window.stop_position() - window.current_position(), 10);
    }

    #[test]
    fn test_turn_lifecycle() {
        let mut window = ContextWindow::new(256, 4);
        window.advance(5);
        window.begin_turn(3);
        assert!(!window.turn_exhausted());
        window.advance(3);
        assert!(window.turn_exhausted());

        window.begin_turn(3);
        window.end_turn();
        assert!(window.turn_exhausted());

        window.reset_turn();
        assert_eq!(window.stop_position(), 0);
        assert_eq!(window.current_position(), 8);

        window.reset_conversation();
        assert_eq!(window.current_position(), 0);
        assert_eq!(window.system_prompt_boundary(), 0);
    }
}
