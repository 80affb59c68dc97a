//! Deadline behavior of the isolation boundary, exercised with hand-written
//! deciders that stall or crash on purpose.

use std::thread::sleep;
use std::time::Duration;

use strategy_arena::batch_runner::BatchRunner;
use strategy_arena::game_interface::{GameKind, GameRegistry};
use strategy_arena::isolation::{run_with_deadline, CancelFlag, ExecutionOutcome};
use strategy_arena::strategy_loader::{DecideError, Decider, LoadedStrategy, StateView};

/// Cooperates quickly for the first `fast_games` games, then stalls every
/// decision until the cancel flag is raised.
struct StallAfter {
    games: u32,
    fast_games: u32,
}

impl StallAfter {
    fn new(fast_games: u32) -> Self {
        Self {
            games: 0,
            fast_games,
        }
    }
}

impl Decider for StallAfter {
    fn begin_game(&mut self, _seed: u64) {
        self.games += 1;
    }

    fn decide(&mut self, _view: &StateView<'_>, cancel: &CancelFlag) -> Result<String, DecideError> {
        if self.games <= self.fast_games {
            return Ok("cooperate".to_string());
        }
        loop {
            if cancel.is_cancelled() {
                return Err(DecideError::Interrupted);
            }
            sleep(Duration::from_millis(5));
        }
    }
}

struct Panicker;

impl Decider for Panicker {
    fn decide(&mut self, _view: &StateView<'_>, _cancel: &CancelFlag) -> Result<String, DecideError> {
        panic!("decider blew up");
    }
}

fn matrix_runner(decider: Box<dyn Decider>, requested: usize) -> BatchRunner {
    let engine = GameRegistry::builtin()
        .create(
            GameKind::IteratedMatrix,
            vec![LoadedStrategy::from_decider("staller", decider)],
        )
        .unwrap();
    BatchRunner::new(engine, None, 1, requested)
}

#[test]
fn deadline_reports_exactly_the_completed_games() {
    let runner = matrix_runner(Box::new(StallAfter::new(3)), 100);
    let outcome = run_with_deadline(runner, Duration::from_millis(400));
    match outcome {
        ExecutionOutcome::TimedOut(Some(batch)) => {
            assert_eq!(batch.num_simulations, 3);
            assert_eq!(batch.requested, 100);
            assert!(batch.total_score["staller"] > 0.0);
            assert_eq!(batch.wins["staller"], 3);
        }
        other => panic!("expected a partial timeout, got {other:?}"),
    }
}

#[test]
fn timeout_before_any_game_reports_no_results() {
    let runner = matrix_runner(Box::new(StallAfter::new(0)), 10);
    let outcome = run_with_deadline(runner, Duration::from_millis(200));
    assert_eq!(outcome, ExecutionOutcome::TimedOut(None));
    assert!(outcome.batch_result().is_none());
}

#[test]
fn fast_batch_completes_within_the_deadline() {
    let runner = matrix_runner(Box::new(StallAfter::new(u32::MAX)), 10);
    let outcome = run_with_deadline(runner, Duration::from_secs(30));
    match outcome {
        ExecutionOutcome::Completed(batch) => {
            assert_eq!(batch.num_simulations, 10);
            assert_eq!(batch.requested, 10);
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[test]
fn panicking_decider_crashes_the_batch_without_hanging() {
    let runner = matrix_runner(Box::new(Panicker), 5);
    let outcome = run_with_deadline(runner, Duration::from_secs(30));
    match outcome {
        ExecutionOutcome::Crashed(message) => assert!(message.contains("panicked")),
        other => panic!("expected a crash, got {other:?}"),
    }
}

#[test]
fn repeated_timeouts_do_not_leak_or_wedge() {
    // every run joins its worker; ten back-to-back timeouts must all return
    for _ in 0..10 {
        let runner = matrix_runner(Box::new(StallAfter::new(0)), 10);
        let outcome = run_with_deadline(runner, Duration::from_millis(50));
        assert_eq!(outcome, ExecutionOutcome::TimedOut(None));
    }
}
