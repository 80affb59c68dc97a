//! Top-level facade: submission intake and league execution.
//!
//! [`Arena`] wires the whole pipeline together — safety gate, loader, engine
//! registry, batch runner and isolation boundary — behind two operations:
//! [`validate_submission`](Arena::validate_submission) runs a short smoke
//! batch on one incoming submission, and [`run_league`](Arena::run_league)
//! runs a full scoring batch over a set of participants.
//!
//! Every invocation builds its own [`StrategyLoader`] and engine, so arenas
//! can be shared across threads freely; [`run_leagues`](Arena::run_leagues)
//! does exactly that with a bounded worker pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use tracing::{info, instrument, trace, warn};

use crate::batch_runner::BatchRunner;
use crate::configuration::Configuration;
use crate::game_interface::{GameKind, GameRegistry};
use crate::isolation::{run_with_deadline, CancelFlag, ExecutionOutcome};
use crate::logger::init_logger;
use crate::narrative::Narrative;
use crate::safety_gate::{self, Scan};
use crate::strategy_loader::{LoadedStrategy, StrategyLoader, StrategySource};

/// One incoming submission plus the sparring partners to validate it against.
#[derive(Debug, Clone)]
pub struct SubmissionIntake {
    /// The submission under validation.
    pub source: StrategySource,
    /// Game the submission is entered for.
    pub game: GameKind,
    /// Already-accepted strategies to play against during validation. Any of
    /// these failing to load is logged and skipped, never fatal.
    pub league: Vec<StrategySource>,
}

/// A full scoring run over a set of participants.
#[derive(Debug, Clone)]
pub struct LeagueRequest {
    /// Game to play.
    pub game: GameKind,
    /// Participant submissions, one per owner.
    pub participants: Vec<StrategySource>,
    /// Game-specific reward override (rank rewards or payoff table).
    pub custom_rewards: Option<Vec<f64>>,
    /// Number of games to run.
    pub num_simulations: usize,
    /// Wall-clock budget for the whole batch.
    pub deadline: Duration,
    /// Batch seed; a fresh random seed is drawn when absent.
    pub seed: Option<u64>,
    /// Also produce a single-game transcript after the batch.
    pub with_narrative: bool,
}

/// What a league run produced.
#[derive(Debug)]
pub struct LeagueReport {
    /// Terminal outcome of the batch.
    pub outcome: ExecutionOutcome,
    /// Transcript of one replayed game, when requested and the batch
    /// produced results.
    pub narrative: Option<Narrative>,
    /// Participants excluded before the batch started, with the reason.
    pub excluded: Vec<(String, String)>,
}

/// Shared, read-only entry point for validating and scoring submissions.
#[derive(Debug)]
pub struct Arena {
    registry: Arc<GameRegistry>,
    config: Configuration,
}

impl Arena {
    /// Arena over the built-in games.
    pub fn new(config: Configuration) -> Self {
        Self::with_registry(Arc::new(GameRegistry::builtin()), config)
    }

    /// Arena over a custom registry (extra or replaced engines).
    ///
    /// Installs the process-wide logger on first construction: a TRACE-level
    /// file when `log` is set, otherwise stdout at INFO (`verbose`) or WARN.
    pub fn with_registry(registry: Arc<GameRegistry>, config: Configuration) -> Self {
        init_logger(&config);
        trace!(?config, ?registry);
        Self { registry, config }
    }

    /// Gate plus load for one source. The error string is user-facing.
    fn admit(
        loader: &mut StrategyLoader,
        source: &StrategySource,
    ) -> Result<LoadedStrategy, String> {
        if let Scan::Denied { reason } = safety_gate::scan(&source.text) {
            return Err(format!("safety gate: {reason}"));
        }
        loader.load(source).map_err(|e| e.to_string())
    }

    /// Screens one submission: safety gate, load, then a short smoke batch
    /// against the supplied league under the validation deadline.
    ///
    /// [`ExecutionOutcome::Rejected`] means the submission itself never ran;
    /// every other outcome describes the smoke batch.
    #[instrument(skip_all, fields(owner = %intake.source.owner, game = %intake.game))]
    pub fn validate_submission(&self, intake: &SubmissionIntake) -> anyhow::Result<ExecutionOutcome> {
        let mut loader = StrategyLoader::new();
        let submission = match Self::admit(&mut loader, &intake.source) {
            Ok(strategy) => strategy,
            Err(reason) => {
                info!(%reason, "submission rejected");
                return Ok(ExecutionOutcome::Rejected(reason));
            }
        };

        let mut strategies = vec![submission];
        for opponent in &intake.league {
            match Self::admit(&mut loader, opponent) {
                Ok(strategy) => strategies.push(strategy),
                // a broken sparring partner must not fail someone else's intake
                Err(reason) => {
                    warn!(owner = %opponent.owner, %reason, "sparring partner skipped")
                }
            }
        }

        let engine = self.registry.create(intake.game, strategies)?;
        let runner = BatchRunner::new(engine, None, rand::random(), self.config.validation_games);
        Ok(run_with_deadline(runner, self.config.validation_deadline))
    }

    /// Runs one league to its terminal outcome.
    ///
    /// Participants that fail the gate or the loader are excluded up front
    /// and reported in [`LeagueReport::excluded`]; the batch runs over the
    /// rest. With no survivors the outcome is `Rejected`.
    #[instrument(skip_all, fields(game = %request.game, participants = request.participants.len()))]
    pub fn run_league(&self, request: &LeagueRequest) -> anyhow::Result<LeagueReport> {
        let mut loader = StrategyLoader::new();
        let mut strategies = Vec::new();
        let mut accepted_sources = Vec::new();
        let mut excluded = Vec::new();
        for participant in &request.participants {
            match Self::admit(&mut loader, participant) {
                Ok(strategy) => {
                    strategies.push(strategy);
                    accepted_sources.push(participant.clone());
                }
                Err(reason) => {
                    warn!(owner = %participant.owner, %reason, "participant excluded");
                    excluded.push((participant.owner.clone(), reason));
                }
            }
        }
        if strategies.is_empty() {
            return Ok(LeagueReport {
                outcome: ExecutionOutcome::Rejected(
                    "no participant passed the gate and loader".to_string(),
                ),
                narrative: None,
                excluded,
            });
        }

        let seed = request.seed.unwrap_or_else(rand::random);
        let engine = self.registry.create(request.game, strategies)?;
        let runner = BatchRunner::new(
            engine,
            request.custom_rewards.clone(),
            seed,
            request.num_simulations,
        );
        let outcome = run_with_deadline(runner, request.deadline);
        info!(seed, ?outcome, "league finished");

        let narrative = if request.with_narrative && outcome.batch_result().is_some() {
            self.replay_narrative(request, &accepted_sources, seed)
        } else {
            None
        };

        Ok(LeagueReport {
            outcome,
            narrative,
            excluded,
        })
    }

    /// Replays the batch's first game with fresh strategy instances to
    /// produce a transcript. Best-effort: failures only cost the transcript.
    fn replay_narrative(
        &self,
        request: &LeagueRequest,
        sources: &[StrategySource],
        seed: u64,
    ) -> Option<Narrative> {
        let mut loader = StrategyLoader::new();
        let mut strategies = Vec::new();
        for source in sources {
            strategies.push(Self::admit(&mut loader, source).ok()?);
        }
        let mut engine = self.registry.create(request.game, strategies).ok()?;
        engine.reset(seed);
        match engine.play_one_game_with_narrative(
            request.custom_rewards.as_deref(),
            &CancelFlag::new(),
        ) {
            Ok((_, narrative)) => Some(narrative),
            Err(e) => {
                warn!(error = %e, "narrative replay failed");
                None
            }
        }
    }

    /// Runs several leagues concurrently on a pool of at most
    /// `max_parallel` worker threads, preserving request order in the output.
    pub fn run_leagues(&self, requests: &[LeagueRequest]) -> anyhow::Result<Vec<LeagueReport>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let workers = self.config.max_parallel.min(requests.len());
        let next = AtomicUsize::new(0);
        let slots: Vec<Mutex<Option<anyhow::Result<LeagueReport>>>> =
            requests.iter().map(|_| Mutex::new(None)).collect();

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(request) = requests.get(index) else {
                        break;
                    };
                    let report = self.run_league(request);
                    if let Ok(mut slot) = slots[index].lock() {
                        *slot = Some(report);
                    }
                });
            }
        });

        slots
            .into_iter()
            .map(|slot| match slot.into_inner() {
                Ok(Some(report)) => report,
                _ => Err(anyhow!("league worker panicked before reporting")),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(owner: &str, body: &str) -> StrategySource {
        StrategySource::new(format!("strategy S(Player):\n    {body}\n"), "S", owner)
    }

    fn arena() -> Arena {
        Arena::new(
            Configuration::new()
                .with_verbose(false)
                .with_validation_games(3)
                .with_validation_deadline(Duration::from_secs(5)),
        )
    }

    #[test]
    fn construction_installs_a_global_subscriber() {
        let _arena = Arena::new(Configuration::new().with_verbose(true));
        assert!(tracing::dispatcher::has_been_set());
    }

    #[test]
    fn gated_submission_is_rejected_before_running() {
        let intake = SubmissionIntake {
            source: StrategySource::new("import os\nstrategy S(Player):\n    bank\n", "S", "mallory"),
            game: GameKind::PushYourLuck,
            league: vec![],
        };
        let outcome = arena().validate_submission(&intake).unwrap();
        match outcome {
            ExecutionOutcome::Rejected(reason) => assert!(reason.contains("os")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn validation_runs_the_configured_number_of_games() {
        let intake = SubmissionIntake {
            source: source("alpha", "if my_unbanked >= 20 then bank else roll"),
            game: GameKind::PushYourLuck,
            league: vec![source("beta", "bank")],
        };
        let outcome = arena().validate_submission(&intake).unwrap();
        match outcome {
            ExecutionOutcome::Completed(batch) => assert_eq!(batch.num_simulations, 3),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn broken_sparring_partner_does_not_fail_intake() {
        let intake = SubmissionIntake {
            source: source("alpha", "bank"),
            game: GameKind::PushYourLuck,
            league: vec![StrategySource::new("not a script", "S", "beta")],
        };
        let outcome = arena().validate_submission(&intake).unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Completed(_)));
    }

    #[test]
    fn league_excludes_bad_participants_and_still_runs() {
        let request = LeagueRequest {
            game: GameKind::IteratedMatrix,
            participants: vec![
                source("good", "defect"),
                StrategySource::new("import socket\nstrategy S(Player):\n    defect\n", "S", "bad"),
            ],
            custom_rewards: None,
            num_simulations: 2,
            deadline: Duration::from_secs(5),
            seed: Some(7),
            with_narrative: false,
        };
        let report = arena().run_league(&request).unwrap();
        assert_eq!(report.excluded.len(), 1);
        assert_eq!(report.excluded[0].0, "bad");
        let batch = report.outcome.batch_result().unwrap();
        assert_eq!(batch.num_simulations, 2);
        assert!(batch.total_score.contains_key("good"));
    }

    #[test]
    fn empty_league_is_rejected() {
        let request = LeagueRequest {
            game: GameKind::PushYourLuck,
            participants: vec![StrategySource::new("import os", "S", "bad")],
            custom_rewards: None,
            num_simulations: 1,
            deadline: Duration::from_secs(1),
            seed: Some(1),
            with_narrative: false,
        };
        let report = arena().run_league(&request).unwrap();
        assert!(matches!(report.outcome, ExecutionOutcome::Rejected(_)));
    }

    #[test]
    fn run_leagues_preserves_request_order() {
        let make = |seed| LeagueRequest {
            game: GameKind::PushYourLuck,
            participants: vec![source("alpha", "bank"), source("beta", "roll")],
            custom_rewards: None,
            num_simulations: 2,
            deadline: Duration::from_secs(5),
            seed: Some(seed),
            with_narrative: false,
        };
        let requests: Vec<_> = (0..4).map(make).collect();
        let reports = arena().run_leagues(&requests).unwrap();
        assert_eq!(reports.len(), 4);
        for (request, report) in requests.iter().zip(&reports) {
            let solo = arena().run_league(request).unwrap();
            assert_eq!(
                report.outcome.batch_result().unwrap(),
                solo.outcome.batch_result().unwrap()
            );
        }
    }
}
