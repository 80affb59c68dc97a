//! # Strategy Arena
//!
//! A modular Rust crate for evaluating untrusted submitted strategy scripts
//! over repeated turn-based games, with a safety gate, deadline isolation and
//! pluggable game engines.
//!
//! It provides:
//! - Submission screening and league execution (`Arena`)
//! - Pre-execution source scanning via the [`safety_gate`]
//! - A small strategy script language, loaded per owner by the
//!   [`StrategyLoader`](crate::strategy_loader::StrategyLoader)
//! - Built-in games (`push_your_luck`, `iterated_matrix`) behind the
//!   [`Game`](crate::game_interface::Game) /
//!   [`GameFactory`](crate::game_interface::GameFactory) traits
//! - Batch execution with wall-clock deadlines and partial-result reporting
//!
//! Each batch runs on its own worker thread; the [`isolation`] boundary
//! enforces the deadline, discards in-flight games on expiry and always joins
//! the worker. A strategy's failure is contained to its owner: the game goes
//! on, the owner scores the minimum and the failure is reported.
//!
//! # Documentation Overview
//!
//! - For the intake and league lifecycle, see the [`arena`] module.
//! - For configuring validation batches and parallelism, see
//!   [`Configuration`](crate::configuration::Configuration).
//! - To understand deadline and cancellation semantics, see [`isolation`].
//! - For implementing additional games, check out the
//!   [`Game`](crate::game_interface::Game) and
//!   [`GameFactory`](crate::game_interface::GameFactory) traits and the
//!   [`GameRegistry`](crate::game_interface::GameRegistry).
//!
//! The crate never interprets submission text before the gate has passed it,
//! and loaded strategies only ever see the [`StateView`](crate::strategy_loader::StateView)
//! their engine offers — no clock, no I/O, no engine internals.
//!
//! # Usage Example
//!
//! Below is a minimal example running a push-your-luck league between two
//! submitted strategies:
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use strategy_arena::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Configuration::from_env();
//!     let arena = Arena::new(config);
//!
//!     let banker = StrategySource::new(
//!         "strategy Banker(Player):\n    if my_unbanked >= 20 then bank else roll\n",
//!         "Banker",
//!         "team-banker",
//!     );
//!     let daredevil = StrategySource::new(
//!         "strategy Daredevil(Player):\n    if best_other + 10 >= target then bank else roll\n",
//!         "Daredevil",
//!         "team-daredevil",
//!     );
//!
//!     let request = LeagueRequest {
//!         game: GameKind::PushYourLuck,
//!         participants: vec![banker, daredevil],
//!         custom_rewards: None,
//!         num_simulations: 1000,
//!         deadline: Duration::from_secs(30),
//!         seed: None,
//!         with_narrative: false,
//!     };
//!     let report = arena.run_league(&request)?;
//!
//!     if let Some(batch) = report.outcome.batch_result() {
//!         let mut sorted: Vec<_> = batch.wins.iter().collect();
//!         sorted.sort_by(|a, b| b.1.cmp(a.1));
//!         for (owner, wins) in sorted {
//!             println!("{owner}: {wins} wins over {} games", batch.num_simulations);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Submission Requirements
//!
//! - The only permitted import is `import random` (enables `rand(n)`)
//! - The script declares at least one `strategy Name(Parent):` block; the
//!   declared parent is rebound to the built-in decision contract
//! - The decision expression must evaluate to one of the actions the game
//!   offers (e.g. `bank`/`roll`, `cooperate`/`defect`)
//! - `let _name = ...` bindings persist across turns within one game; all
//!   other state is wiped between games
#![warn(missing_docs)]

pub mod aggregator;
pub mod arena;
pub mod batch_runner;
pub mod configuration;
pub mod game_interface;
pub mod games;
pub mod isolation;
mod logger;
pub mod narrative;
pub mod safety_gate;
pub mod strategy_loader;

pub use anyhow;

/// Commonly used types and traits for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use strategy_arena::prelude::*;
/// ```
///
/// Includes:
/// - [`Arena`](crate::arena::Arena) and its request/report types
/// - [`Configuration`](crate::configuration::Configuration)
/// - [`GameKind`](crate::game_interface::GameKind) and the engine traits
/// - [`StrategySource`](crate::strategy_loader::StrategySource)
/// - [`ExecutionOutcome`](crate::isolation::ExecutionOutcome)
pub mod prelude {
    pub use crate::arena::{Arena, LeagueReport, LeagueRequest, SubmissionIntake};
    pub use crate::configuration::Configuration;
    pub use crate::game_interface::{Game, GameFactory, GameKind, GameRegistry};
    pub use crate::isolation::ExecutionOutcome;
    pub use crate::strategy_loader::StrategySource;
}
