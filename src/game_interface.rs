//! Traits and types every game engine implements.
//!
//! A [`Game`] encodes the full state machine, scoring rule and tie-break
//! policy of exactly one game type, driven repeatedly by the batch runner:
//! `reset()` then `play_one_game()` per simulation. [`GameRegistry`] is the
//! only extension point for adding new games; it is read-only after startup
//! and shared freely across concurrent batches.

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::bail;

use crate::isolation::CancelFlag;
use crate::narrative::Narrative;
use crate::strategy_loader::LoadedStrategy;

/// Identifier of a concrete game engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameKind {
    /// Shared-die accumulation game with bank/continue decisions.
    PushYourLuck,
    /// Repeated two-player matrix game over all pairings.
    IteratedMatrix,
}

impl FromStr for GameKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "push_your_luck" => Ok(GameKind::PushYourLuck),
            "iterated_matrix" => Ok(GameKind::IteratedMatrix),
            other => bail!("unknown game type '{other}'"),
        }
    }
}

impl std::fmt::Display for GameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GameKind::PushYourLuck => "push_your_luck",
            GameKind::IteratedMatrix => "iterated_matrix",
        };
        write!(f, "{name}")
    }
}

/// Output of one complete game.
///
/// Every strategy supplied to the engine has exactly one entry in `scores`,
/// even if it crashed; a crashed owner scores the minimum for the game and
/// shows up in `failures`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameResult {
    /// Final score per owner.
    pub scores: HashMap<String, f64>,
    /// Up to 3 named game-specific metrics, each mapping owner to value.
    pub metrics: HashMap<String, HashMap<String, f64>>,
    /// Owners whose decision callable failed during this game, with the
    /// first failure message.
    pub failures: HashMap<String, String>,
}

/// Why a game did not produce a [`GameResult`].
#[derive(Debug)]
pub enum EngineError {
    /// The batch's cancel flag was raised mid-game; the partial game is
    /// discarded, not scored.
    Interrupted,
    /// Internal engine failure unrelated to any specific strategy. Fatal to
    /// the whole batch.
    Fault(anyhow::Error),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Interrupted => write!(f, "game interrupted by deadline"),
            EngineError::Fault(e) => write!(f, "engine fault: {e:#}"),
        }
    }
}

/// One game type's state machine.
///
/// Engines own their strategies for their whole lifetime and are driven from
/// a single thread; strategies are never assumed thread-safe.
pub trait Game: Send {
    /// Returns all per-strategy mutable state to initial values and reseeds
    /// the engine. Callable between games without reallocating strategies.
    fn reset(&mut self, seed: u64);

    /// Runs exactly one complete game to its terminal condition.
    ///
    /// Deterministic given the seed passed to [`reset`](Game::reset) and
    /// deterministic strategies; never blocks on external I/O. `rewards` is
    /// interpreted per game type (rank rewards, or the matrix payoff table).
    fn play_one_game(
        &mut self,
        rewards: Option<&[f64]>,
        cancel: &CancelFlag,
    ) -> Result<GameResult, EngineError>;

    /// Same semantics as [`play_one_game`](Game::play_one_game), plus a
    /// human-readable transcript. Single-game feedback mode only — never
    /// called inside a batch.
    fn play_one_game_with_narrative(
        &mut self,
        rewards: Option<&[f64]>,
        cancel: &CancelFlag,
    ) -> Result<(GameResult, Narrative), EngineError>;
}

/// Builds a fresh engine instance around an ordered set of strategies.
pub trait GameFactory: Send + Sync {
    /// Creates an engine owning `strategies`. Call [`Game::reset`] before the
    /// first game.
    fn create(&self, strategies: Vec<LoadedStrategy>) -> Box<dyn Game>;
}

/// Maps a [`GameKind`] to its engine factory.
///
/// Built once at startup, then read-only: concurrent batches share it behind
/// an `Arc` with no further synchronization.
pub struct GameRegistry {
    factories: HashMap<GameKind, Box<dyn GameFactory>>,
}

impl GameRegistry {
    /// Registry with both built-in games.
    pub fn builtin() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(
            GameKind::PushYourLuck,
            Box::new(crate::games::push_your_luck::PushYourLuckFactory),
        );
        registry.register(
            GameKind::IteratedMatrix,
            Box::new(crate::games::iterated_matrix::IteratedMatrixFactory),
        );
        registry
    }

    /// Registers (or replaces) the factory for `kind`. Only meaningful
    /// before the registry is shared.
    pub fn register(&mut self, kind: GameKind, factory: Box<dyn GameFactory>) {
        self.factories.insert(kind, factory);
    }

    /// Instantiates an engine for `kind`.
    pub fn create(
        &self,
        kind: GameKind,
        strategies: Vec<LoadedStrategy>,
    ) -> anyhow::Result<Box<dyn Game>> {
        match self.factories.get(&kind) {
            Some(factory) => Ok(factory.create(strategies)),
            None => bail!("no engine registered for game type '{kind}'"),
        }
    }

    /// The registered game kinds.
    pub fn kinds(&self) -> Vec<GameKind> {
        self.factories.keys().copied().collect()
    }
}

impl std::fmt::Debug for GameRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_kind_round_trips_through_strings() {
        for kind in [GameKind::PushYourLuck, GameKind::IteratedMatrix] {
            assert_eq!(kind.to_string().parse::<GameKind>().unwrap(), kind);
        }
        assert!("tic_tac_toe".parse::<GameKind>().is_err());
    }

    #[test]
    fn builtin_registry_creates_both_engines() {
        let registry = GameRegistry::builtin();
        assert_eq!(registry.kinds().len(), 2);
        assert!(registry.create(GameKind::PushYourLuck, vec![]).is_ok());
        assert!(registry.create(GameKind::IteratedMatrix, vec![]).is_ok());
    }
}
