//! Human-readable transcript of a single game.
//!
//! Engines append one line per noteworthy event (draws, decisions, busts,
//! final ranking). A [`Narrative`] is only ever produced by
//! [`Game::play_one_game_with_narrative`](crate::game_interface::Game::play_one_game_with_narrative),
//! which callers use for debugging or submitter feedback. Batches never
//! collect narratives.

/// Ordered list of transcript lines for one game.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Narrative {
    lines: Vec<String>,
}

impl Narrative {
    /// Creates an empty narrative.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn line(&mut self, text: impl Into<String>) {
        self.lines.push(text.into());
    }

    /// All recorded lines, in game order.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// True if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl std::fmt::Display for Narrative {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}
