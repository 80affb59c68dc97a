//! Shared-die push-your-luck accumulation game.
//!
//! Each round every still-active strategy sees the same die draw. A bust
//! (rolling 1) wipes everyone's unbanked points and ends the round; any other
//! draw is added to each active player's unbanked pile, after which every
//! active player decides — against a snapshot of all totals — whether to
//! `bank` (commit the pile and sit out the rest of the round) or `roll`. The
//! game ends the instant any player's banked+unbanked total reaches the
//! target.
//!
//! Final ranking is by total, descending. Equal totals share the same dense
//! rank and therefore the same reward-vector slot: rank *i* (1-indexed, after
//! tie collapsing) maps to `rewards[i-1]`.

use std::collections::{HashMap, HashSet};

use anyhow::anyhow;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::warn;

use crate::game_interface::{EngineError, Game, GameFactory, GameResult};
use crate::isolation::CancelFlag;
use crate::narrative::Narrative;
use crate::strategy_loader::{DecideError, LoadedStrategy, StateView};

const TARGET: f64 = 100.0;
const DIE_SIDES: u32 = 6;
const BUST: u32 = 1;
/// Hard cap so a pathological strategy set cannot spin the engine forever.
const MAX_ROUNDS: u32 = 10_000;
const ACTIONS: [&str; 2] = ["bank", "roll"];

/// Factory registered under [`GameKind::PushYourLuck`](crate::game_interface::GameKind).
pub struct PushYourLuckFactory;

impl GameFactory for PushYourLuckFactory {
    fn create(&self, strategies: Vec<LoadedStrategy>) -> Box<dyn Game> {
        Box::new(PushYourLuck::new(strategies))
    }
}

#[derive(Debug, Clone, Default)]
struct Seat {
    banked: f64,
    unbanked: f64,
    in_round: bool,
    failure: Option<String>,
    times_banked: f64,
    bust_losses: f64,
    biggest_bank: f64,
}

impl Seat {
    fn total(&self) -> f64 {
        self.banked + self.unbanked
    }
}

/// Engine instance for the push-your-luck game.
pub struct PushYourLuck {
    strategies: Vec<LoadedStrategy>,
    seats: Vec<Seat>,
    rng: ChaCha8Rng,
}

impl PushYourLuck {
    /// Builds an engine owning `strategies`, in the given player order.
    pub fn new(strategies: Vec<LoadedStrategy>) -> Self {
        let seats = vec![Seat::default(); strategies.len()];
        Self {
            strategies,
            seats,
            rng: ChaCha8Rng::seed_from_u64(0),
        }
    }

    fn fail_seat(&mut self, idx: usize, message: String) {
        let seat = &mut self.seats[idx];
        if seat.failure.is_none() {
            warn!(
                owner = self.strategies[idx].owner(),
                %message,
                "strategy failed; no action taken this turn"
            );
            seat.failure = Some(message);
        }
    }

    fn play(
        &mut self,
        rewards: Option<&[f64]>,
        cancel: &CancelFlag,
        mut narrative: Option<&mut Narrative>,
    ) -> Result<GameResult, EngineError> {
        let n = self.strategies.len();
        if n == 0 {
            return Err(EngineError::Fault(anyhow!("no strategies supplied")));
        }
        let owners: HashSet<&str> = self.strategies.iter().map(|s| s.owner()).collect();
        if owners.len() != n {
            return Err(EngineError::Fault(anyhow!("duplicate owner identifiers")));
        }
        let rank_rewards: Vec<f64> = match rewards {
            Some(r) if r.len() < n => {
                return Err(EngineError::Fault(anyhow!(
                    "reward vector has {} entries for {} possible ranks",
                    r.len(),
                    n
                )))
            }
            Some(r) => r.to_vec(),
            None => (0..n).map(|i| (n - i) as f64).collect(),
        };

        let mut round = 0u32;
        'game: loop {
            round += 1;
            if round > MAX_ROUNDS {
                return Err(EngineError::Fault(anyhow!(
                    "no player reached {TARGET} within {MAX_ROUNDS} rounds"
                )));
            }
            for seat in &mut self.seats {
                seat.in_round = true;
                seat.unbanked = 0.0;
            }
            if let Some(n) = narrative.as_deref_mut() {
                n.line(format!("--- round {round} ---"));
            }

            loop {
                if cancel.is_cancelled() {
                    return Err(EngineError::Interrupted);
                }
                let draw = self.rng.gen_range(1..=DIE_SIDES);
                if draw == BUST {
                    for (idx, seat) in self.seats.iter_mut().enumerate() {
                        if seat.in_round && seat.unbanked > 0.0 {
                            seat.bust_losses += seat.unbanked;
                            if let Some(n) = narrative.as_deref_mut() {
                                n.line(format!(
                                    "bust! {} loses {} unbanked points",
                                    self.strategies[idx].owner(),
                                    seat.unbanked
                                ));
                            }
                            seat.unbanked = 0.0;
                        }
                    }
                    if let Some(n) = narrative.as_deref_mut() {
                        n.line(format!("round {round} ends on a bust"));
                    }
                    continue 'game;
                }

                for seat in &mut self.seats {
                    if seat.in_round {
                        seat.unbanked += draw as f64;
                    }
                }
                if let Some(n) = narrative.as_deref_mut() {
                    n.line(format!("draw: {draw}"));
                }
                if self.seats.iter().any(|s| s.total() >= TARGET) {
                    if let Some(n) = narrative.as_deref_mut() {
                        n.line(format!("target {TARGET} reached; game over"));
                    }
                    break 'game;
                }

                // every decision this turn sees the same pre-decision snapshot
                let totals: Vec<f64> = self.seats.iter().map(Seat::total).collect();
                let active_players = self.seats.iter().filter(|s| s.in_round).count();
                let mut wants_bank = vec![false; n];
                for idx in 0..n {
                    if !self.seats[idx].in_round || self.seats[idx].failure.is_some() {
                        continue;
                    }
                    let best_other = totals
                        .iter()
                        .enumerate()
                        .filter(|(j, _)| *j != idx)
                        .map(|(_, t)| *t)
                        .fold(0.0, f64::max);
                    let vars = [
                        ("my_banked", self.seats[idx].banked),
                        ("my_unbanked", self.seats[idx].unbanked),
                        ("my_total", totals[idx]),
                        ("best_other", best_other),
                        ("target", TARGET),
                        ("round", round as f64),
                        ("active_players", active_players as f64),
                    ];
                    let view = StateView {
                        vars: &vars,
                        actions: &ACTIONS,
                    };
                    match self.strategies[idx].decide(&view, cancel) {
                        Ok(action) if action == "bank" => wants_bank[idx] = true,
                        Ok(action) if action == "roll" => {}
                        Ok(other) => self.fail_seat(idx, format!("unknown action '{other}'")),
                        Err(DecideError::Interrupted) => return Err(EngineError::Interrupted),
                        Err(DecideError::Script(message)) => self.fail_seat(idx, message),
                    }
                }

                for (idx, bank) in wants_bank.iter().enumerate() {
                    if !bank {
                        continue;
                    }
                    let seat = &mut self.seats[idx];
                    seat.biggest_bank = seat.biggest_bank.max(seat.unbanked);
                    seat.banked += seat.unbanked;
                    seat.times_banked += 1.0;
                    if let Some(n) = narrative.as_deref_mut() {
                        n.line(format!(
                            "{} banks {} (now {})",
                            self.strategies[idx].owner(),
                            seat.unbanked,
                            seat.banked
                        ));
                    }
                    seat.unbanked = 0.0;
                    seat.in_round = false;
                }

                if self.seats.iter().all(|s| !s.in_round) {
                    if let Some(n) = narrative.as_deref_mut() {
                        n.line(format!("everyone banked; round {round} ends"));
                    }
                    continue 'game;
                }
            }
        }

        Ok(self.score(&rank_rewards, narrative))
    }

    /// Dense-rank totals and map rank *i* to `rewards[i-1]`; tied totals get
    /// the same slot. Failed owners score 0, the minimum.
    fn score(&self, rewards: &[f64], mut narrative: Option<&mut Narrative>) -> GameResult {
        let mut distinct: Vec<f64> = self
            .seats
            .iter()
            .filter(|s| s.failure.is_none())
            .map(Seat::total)
            .collect();
        distinct.sort_by(|a, b| b.total_cmp(a));
        distinct.dedup();

        let mut result = GameResult::default();
        let mut times_banked = HashMap::new();
        let mut bust_losses = HashMap::new();
        let mut biggest_bank = HashMap::new();

        for (idx, seat) in self.seats.iter().enumerate() {
            let owner = self.strategies[idx].owner().to_string();
            let score = match &seat.failure {
                Some(message) => {
                    result.failures.insert(owner.clone(), message.clone());
                    0.0
                }
                None => {
                    let rank = 1 + distinct.iter().filter(|t| **t > seat.total()).count();
                    rewards[rank - 1]
                }
            };
            if let Some(n) = narrative.as_deref_mut() {
                n.line(format!(
                    "{owner}: total {} -> score {score}",
                    seat.total()
                ));
            }
            result.scores.insert(owner.clone(), score);
            times_banked.insert(owner.clone(), seat.times_banked);
            bust_losses.insert(owner.clone(), seat.bust_losses);
            biggest_bank.insert(owner, seat.biggest_bank);
        }
        result.metrics.insert("times_banked".into(), times_banked);
        result.metrics.insert("bust_losses".into(), bust_losses);
        result.metrics.insert("biggest_bank".into(), biggest_bank);
        result
    }
}

impl Game for PushYourLuck {
    fn reset(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        for (idx, seat) in self.seats.iter_mut().enumerate() {
            *seat = Seat::default();
            self.strategies[idx].begin_game(seed.wrapping_add(1 + idx as u64));
        }
    }

    fn play_one_game(
        &mut self,
        rewards: Option<&[f64]>,
        cancel: &CancelFlag,
    ) -> Result<GameResult, EngineError> {
        self.play(rewards, cancel, None)
    }

    fn play_one_game_with_narrative(
        &mut self,
        rewards: Option<&[f64]>,
        cancel: &CancelFlag,
    ) -> Result<(GameResult, Narrative), EngineError> {
        let mut narrative = Narrative::new();
        let result = self.play(rewards, cancel, Some(&mut narrative))?;
        Ok((result, narrative))
    }
}
