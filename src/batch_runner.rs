//! Drives one engine through a batch of independent games.
//!
//! The runner owns its engine for the duration of the batch and streams one
//! [`WorkerMsg`] per event back to the isolation boundary. Per-game seeds are
//! derived from the batch seed by offset, so a batch is reproducible from
//! `(seed, requested)` alone regardless of where the deadline lands.

use std::sync::mpsc::Sender;

use tracing::{instrument, trace};

use crate::game_interface::{EngineError, Game};
use crate::isolation::CancelFlag;

/// Event stream from the batch worker to the isolation boundary.
#[derive(Debug)]
pub enum WorkerMsg {
    /// One game ran to completion.
    Game(crate::game_interface::GameResult),
    /// The cancel flag was observed; no further games will run.
    Interrupted,
    /// The engine failed outside any strategy's turn. Fatal to the batch.
    Fault(String),
    /// Every requested game completed.
    Done,
}

/// One batch invocation: an engine, a reward override, a seed and a count.
pub struct BatchRunner {
    engine: Box<dyn Game>,
    rewards: Option<Vec<f64>>,
    seed: u64,
    requested: usize,
}

impl BatchRunner {
    /// Bundles everything one batch needs. `rewards` is passed through to the
    /// engine unchanged on every game.
    pub fn new(
        engine: Box<dyn Game>,
        rewards: Option<Vec<f64>>,
        seed: u64,
        requested: usize,
    ) -> Self {
        Self {
            engine,
            rewards,
            seed,
            requested,
        }
    }

    /// Number of games this batch will attempt.
    pub fn requested(&self) -> usize {
        self.requested
    }

    /// Runs games until done, cancelled or faulted, emitting exactly one
    /// terminal message. A dropped receiver just ends the batch quietly.
    #[instrument(skip_all, fields(requested = self.requested, seed = self.seed))]
    pub(crate) fn run(mut self, cancel: &CancelFlag, sink: &Sender<WorkerMsg>) {
        for index in 0..self.requested {
            if cancel.is_cancelled() {
                let _ = sink.send(WorkerMsg::Interrupted);
                return;
            }
            self.engine.reset(self.seed.wrapping_add(index as u64));
            match self.engine.play_one_game(self.rewards.as_deref(), cancel) {
                Ok(result) => {
                    trace!(index, "game finished");
                    if sink.send(WorkerMsg::Game(result)).is_err() {
                        return;
                    }
                }
                Err(EngineError::Interrupted) => {
                    let _ = sink.send(WorkerMsg::Interrupted);
                    return;
                }
                Err(EngineError::Fault(e)) => {
                    let _ = sink.send(WorkerMsg::Fault(format!("{e:#}")));
                    return;
                }
            }
        }
        let _ = sink.send(WorkerMsg::Done);
    }
}
