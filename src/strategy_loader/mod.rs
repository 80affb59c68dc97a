//! Turns gate-approved source text into callable strategies.
//!
//! The loader parses a submission, looks up the declared entry-point block,
//! rebinds whatever supertype the submitter declared to the built-in decision
//! contract ([`Decider`]) and instantiates the block bound to its owner.
//! Each owner's code lives in its own namespace keyed by owner identifier, so
//! two owners may declare identically-named strategies without collision.
//!
//! A [`StrategyLoader`] is built fresh for every batch invocation and never
//! shared across invocations; concurrent batches therefore need no locking.
//!
//! All failure modes — missing entry point, syntax error, instantiation error
//! — surface as a [`LoadError`] carrying the owner identifier, so the caller
//! can exclude exactly one participant without aborting the whole batch.

use std::collections::HashMap;

use tracing::{instrument, trace};

use crate::isolation::CancelFlag;

pub(crate) mod script;

/// A raw submission: source text, declared entry-point name and owner.
///
/// Immutable once accepted by the safety gate; discarded if rejected. The
/// core never persists it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategySource {
    /// Raw script text.
    pub text: String,
    /// Name of the `strategy` block to instantiate.
    pub entry_point: String,
    /// Team identifier the strategy plays for.
    pub owner: String,
}

impl StrategySource {
    /// Convenience constructor.
    pub fn new(
        text: impl Into<String>,
        entry_point: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            entry_point: entry_point.into(),
            owner: owner.into(),
        }
    }
}

/// Read-only snapshot a game engine offers to a strategy for one decision.
///
/// `vars` are the named numeric observations for this turn; `actions` are the
/// identifiers the decision may evaluate to.
#[derive(Debug, Clone, Copy)]
pub struct StateView<'a> {
    /// Named numeric observations, game-specific.
    pub vars: &'a [(&'static str, f64)],
    /// Action identifiers valid this turn.
    pub actions: &'a [&'static str],
}

impl StateView<'_> {
    /// Looks up a named observation.
    pub fn var(&self, name: &str) -> Option<f64> {
        self.vars
            .iter()
            .find_map(|(n, v)| if *n == name { Some(*v) } else { None })
    }

    /// True if `name` is one of the offered actions.
    pub fn is_action(&self, name: &str) -> bool {
        self.actions.contains(&name)
    }
}

/// Why a decision callable did not produce an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecideError {
    /// The batch's [`CancelFlag`] was raised; the game must be abandoned.
    Interrupted,
    /// The strategy's own code failed. Contained: the engine records the
    /// owner as failed and treats the turn as "no action taken".
    Script(String),
}

/// The closed capability interface every loaded strategy satisfies.
///
/// Game engines only ever call this; how the submitted code was adapted to it
/// is the loader's concern. Implementations must not assume thread safety —
/// a strategy is owned by exactly one engine at a time.
pub trait Decider: Send {
    /// Called by `Game::reset` before every game. Resets per-game state
    /// (scratch, RNG) from `seed`.
    fn begin_game(&mut self, seed: u64) {
        let _ = seed;
    }

    /// Produces one action for the offered `view`, or fails.
    fn decide(&mut self, view: &StateView<'_>, cancel: &CancelFlag) -> Result<String, DecideError>;
}

/// A bound decision callable plus the owner it plays for.
///
/// Owned exclusively by one game engine instance during its lifetime; never
/// shared across concurrent games.
pub struct LoadedStrategy {
    owner: String,
    decider: Box<dyn Decider>,
}

impl LoadedStrategy {
    /// Wraps an already-built decider. Used by the loader and by tests that
    /// need a hand-written decider.
    pub fn from_decider(owner: impl Into<String>, decider: Box<dyn Decider>) -> Self {
        Self {
            owner: owner.into(),
            decider,
        }
    }

    /// The owning team's identifier.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub(crate) fn begin_game(&mut self, seed: u64) {
        self.decider.begin_game(seed);
    }

    pub(crate) fn decide(
        &mut self,
        view: &StateView<'_>,
        cancel: &CancelFlag,
    ) -> Result<String, DecideError> {
        self.decider.decide(view, cancel)
    }
}

impl std::fmt::Debug for LoadedStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedStrategy")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// What went wrong while loading one owner's submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadErrorKind {
    /// No `strategy` block with the declared entry-point name.
    MissingEntryPoint(String),
    /// The source did not parse.
    Syntax(String),
    /// The block parsed but cannot be instantiated (e.g. uses `rand` without
    /// `import random`).
    Instantiation(String),
}

/// A per-owner, non-fatal load failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadError {
    /// Owner whose submission failed; only this participant is excluded.
    pub owner: String,
    /// Failure detail.
    pub kind: LoadErrorKind,
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            LoadErrorKind::MissingEntryPoint(name) => {
                write!(f, "{}: no strategy block named '{name}'", self.owner)
            }
            LoadErrorKind::Syntax(msg) => write!(f, "{}: syntax error: {msg}", self.owner),
            LoadErrorKind::Instantiation(msg) => {
                write!(f, "{}: instantiation failed: {msg}", self.owner)
            }
        }
    }
}

impl std::error::Error for LoadError {}

/// Loads submissions into per-owner namespaces.
#[derive(Default)]
pub struct StrategyLoader {
    namespaces: HashMap<String, script::Module>,
}

impl StrategyLoader {
    /// Creates an empty loader. Build one per batch invocation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `source`, stores its module under the owner's namespace and
    /// instantiates the declared entry point bound to the owner.
    #[instrument(skip_all, fields(owner = %source.owner))]
    pub fn load(&mut self, source: &StrategySource) -> Result<LoadedStrategy, LoadError> {
        let module = script::parse(&source.text).map_err(|e| LoadError {
            owner: source.owner.clone(),
            kind: LoadErrorKind::Syntax(format!("{e:#}")),
        })?;
        let namespace = self.namespaces.entry(source.owner.clone()).or_default();
        *namespace = module;

        let Some(def) = namespace.strategies.get(&source.entry_point) else {
            return Err(LoadError {
                owner: source.owner.clone(),
                kind: LoadErrorKind::MissingEntryPoint(source.entry_point.clone()),
            });
        };

        if let Some(parent) = &def.declared_parent {
            // whatever the submitter extended, the instance is bound to the
            // built-in decision contract
            trace!(declared = parent, "rebinding declared supertype");
        }

        let allow_rand = namespace.allows_rand();
        if script::uses_rand(def) && !allow_rand {
            return Err(LoadError {
                owner: source.owner.clone(),
                kind: LoadErrorKind::Instantiation(
                    "'rand' is used but 'import random' is missing".to_string(),
                ),
            });
        }

        let decider = script::ScriptStrategy::new(def.clone(), allow_rand);
        Ok(LoadedStrategy::from_decider(
            source.owner.clone(),
            Box::new(decider),
        ))
    }

    /// Number of owner namespaces currently held.
    pub fn namespace_count(&self) -> usize {
        self.namespaces.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIEW: StateView<'static> = StateView {
        vars: &[("my_unbanked", 25.0)],
        actions: &["bank", "roll"],
    };

    #[test]
    fn loads_declared_entry_point() {
        let mut loader = StrategyLoader::new();
        let source = StrategySource::new(
            "strategy Careful(Player):\n    if my_unbanked >= 20 then bank else roll\n",
            "Careful",
            "alpha",
        );
        let mut strategy = loader.load(&source).unwrap();
        assert_eq!(strategy.owner(), "alpha");
        strategy.begin_game(3);
        assert_eq!(strategy.decide(&VIEW, &CancelFlag::new()).unwrap(), "bank");
    }

    #[test]
    fn missing_entry_point_names_the_owner() {
        let mut loader = StrategyLoader::new();
        let source = StrategySource::new("strategy Other(Player):\n    roll\n", "Careful", "alpha");
        let err = loader.load(&source).unwrap_err();
        assert_eq!(err.owner, "alpha");
        assert!(matches!(err.kind, LoadErrorKind::MissingEntryPoint(_)));
    }

    #[test]
    fn syntax_error_is_a_load_error() {
        let mut loader = StrategyLoader::new();
        let source = StrategySource::new("strategy :::\n", "X", "alpha");
        let err = loader.load(&source).unwrap_err();
        assert!(matches!(err.kind, LoadErrorKind::Syntax(_)));
    }

    #[test]
    fn rand_without_import_fails_instantiation() {
        let mut loader = StrategyLoader::new();
        let source = StrategySource::new(
            "strategy Coin(Player):\n    if rand(2) == 0 then bank else roll\n",
            "Coin",
            "alpha",
        );
        let err = loader.load(&source).unwrap_err();
        assert!(matches!(err.kind, LoadErrorKind::Instantiation(_)));
    }

    #[test]
    fn owners_get_separate_namespaces() {
        let mut loader = StrategyLoader::new();
        let a = StrategySource::new("strategy Mine(Player):\n    bank\n", "Mine", "alpha");
        let b = StrategySource::new("strategy Mine(Player):\n    roll\n", "Mine", "beta");
        let mut sa = loader.load(&a).unwrap();
        let mut sb = loader.load(&b).unwrap();
        assert_eq!(loader.namespace_count(), 2);

        let cancel = CancelFlag::new();
        sa.begin_game(1);
        sb.begin_game(1);
        assert_eq!(sa.decide(&VIEW, &cancel).unwrap(), "bank");
        assert_eq!(sb.decide(&VIEW, &cancel).unwrap(), "roll");
    }
}
