//! Round-robin iterated two-player matrix game.
//!
//! Every ordered-independent pairing of participants — self-pairings included
//! — plays a fixed number of rounds. Each round both seats pick an action
//! simultaneously; the payoff table rewards both sides and everything a seat
//! earns accrues to its owner. One "game" here is the complete round-robin
//! over all pairings, so the final scores are directly comparable across
//! owners.
//!
//! `rewards`, when supplied, is the flattened 2x2 payoff table
//! `[cc, cd, dc, dd]`: the row is my action, the column the opponent's, with
//! cooperate = 0 and defect = 1.

use std::collections::{HashMap, HashSet};

use anyhow::anyhow;
use tracing::warn;

use crate::game_interface::{EngineError, Game, GameFactory, GameResult};
use crate::isolation::CancelFlag;
use crate::narrative::Narrative;
use crate::strategy_loader::{DecideError, LoadedStrategy, StateView};

const ROUNDS_PER_PAIRING: u32 = 10;
/// Prisoner's-dilemma payoffs: [cc, cd, dc, dd].
const DEFAULT_PAYOFF: [f64; 4] = [3.0, 0.0, 5.0, 1.0];
const ACTIONS: [&str; 2] = ["cooperate", "defect"];

const COOPERATE: usize = 0;
const DEFECT: usize = 1;

/// Factory registered under [`GameKind::IteratedMatrix`](crate::game_interface::GameKind).
pub struct IteratedMatrixFactory;

impl GameFactory for IteratedMatrixFactory {
    fn create(&self, strategies: Vec<LoadedStrategy>) -> Box<dyn Game> {
        Box::new(IteratedMatrix::new(strategies))
    }
}

/// One seat's view of the pairing so far.
#[derive(Debug, Clone, Copy)]
struct SeatHistory {
    score: f64,
    /// -1 before the first round, then 0 (cooperate) or 1 (defect).
    my_last: f64,
    opp_last: f64,
    defections: f64,
    cooperations: f64,
}

impl SeatHistory {
    fn fresh() -> Self {
        Self {
            score: 0.0,
            my_last: -1.0,
            opp_last: -1.0,
            defections: 0.0,
            cooperations: 0.0,
        }
    }
}

/// Engine instance for the iterated matrix game.
pub struct IteratedMatrix {
    strategies: Vec<LoadedStrategy>,
    failures: Vec<Option<String>>,
}

impl IteratedMatrix {
    /// Builds an engine owning `strategies`, in the given player order.
    pub fn new(strategies: Vec<LoadedStrategy>) -> Self {
        let failures = vec![None; strategies.len()];
        Self {
            strategies,
            failures,
        }
    }

    fn fail_owner(&mut self, idx: usize, message: String) {
        if self.failures[idx].is_none() {
            warn!(
                owner = self.strategies[idx].owner(),
                %message,
                "strategy failed; it cooperates for the rest of the game"
            );
            self.failures[idx] = Some(message);
        }
    }

    /// Asks seat `idx` for an action. A failed owner is never asked again and
    /// plays the harmless default, so the opponent is not penalized.
    fn seat_action(
        &mut self,
        idx: usize,
        mine: &SeatHistory,
        theirs: &SeatHistory,
        round: u32,
        cancel: &CancelFlag,
    ) -> Result<usize, EngineError> {
        if self.failures[idx].is_some() {
            return Ok(COOPERATE);
        }
        let vars = [
            ("round", round as f64),
            ("rounds", ROUNDS_PER_PAIRING as f64),
            ("my_score", mine.score),
            ("opp_score", theirs.score),
            ("my_last", mine.my_last),
            ("opp_last", mine.opp_last),
            ("my_defections", mine.defections),
            ("my_cooperations", mine.cooperations),
            ("opp_defections", theirs.defections),
            ("opp_cooperations", theirs.cooperations),
        ];
        let view = StateView {
            vars: &vars,
            actions: &ACTIONS,
        };
        match self.strategies[idx].decide(&view, cancel) {
            Ok(action) if action == "cooperate" => Ok(COOPERATE),
            Ok(action) if action == "defect" => Ok(DEFECT),
            Ok(other) => {
                self.fail_owner(idx, format!("unknown action '{other}'"));
                Ok(COOPERATE)
            }
            Err(DecideError::Interrupted) => Err(EngineError::Interrupted),
            Err(DecideError::Script(message)) => {
                self.fail_owner(idx, message);
                Ok(COOPERATE)
            }
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
        let payoff: [f64; 4] = match rewards {
            Some(r) => r
                .try_into()
                .map_err(|_| EngineError::Fault(anyhow!(
                    "matrix payoff table needs exactly 4 entries, got {}",
                    r.len()
                )))?,
            None => DEFAULT_PAYOFF,
        };

        let mut totals = vec![0.0f64; n];
        let mut defections = vec![0.0f64; n];
        let mut cooperations = vec![0.0f64; n];
        let mut pairings_won = vec![0.0f64; n];

        for i in 0..n {
            for j in i..n {
                if let Some(nar) = narrative.as_deref_mut() {
                    nar.line(format!(
                        "pairing: {} vs {}",
                        self.strategies[i].owner(),
                        self.strategies[j].owner()
                    ));
                }
                let mut a = SeatHistory::fresh();
                let mut b = SeatHistory::fresh();
                for round in 1..=ROUNDS_PER_PAIRING {
                    if cancel.is_cancelled() {
                        return Err(EngineError::Interrupted);
                    }
                    // both seats decide against the pre-round histories
                    let act_a = self.seat_action(i, &a, &b, round, cancel)?;
                    let act_b = self.seat_action(j, &b, &a, round, cancel)?;

                    a.score += payoff[act_a * 2 + act_b];
                    b.score += payoff[act_b * 2 + act_a];
                    a.my_last = act_a as f64;
                    a.opp_last = act_b as f64;
                    b.my_last = act_b as f64;
                    b.opp_last = act_a as f64;
                    if act_a == DEFECT {
                        a.defections += 1.0;
                    } else {
                        a.cooperations += 1.0;
                    }
                    if act_b == DEFECT {
                        b.defections += 1.0;
                    } else {
                        b.cooperations += 1.0;
                    }
                    if let Some(nar) = narrative.as_deref_mut() {
                        nar.line(format!(
                            "round {round}: {} / {}",
                            ACTIONS[act_a], ACTIONS[act_b]
                        ));
                    }
                }

                // both seats accrue to their owner; in a self-pairing that is
                // the same owner twice
                totals[i] += a.score;
                totals[j] += b.score;
                defections[i] += a.defections;
                cooperations[i] += a.cooperations;
                defections[j] += b.defections;
                cooperations[j] += b.cooperations;
                if i != j {
                    if a.score > b.score {
                        pairings_won[i] += 1.0;
                    } else if b.score > a.score {
                        pairings_won[j] += 1.0;
                    }
                }
                if let Some(nar) = narrative.as_deref_mut() {
                    nar.line(format!("pairing score: {} - {}", a.score, b.score));
                }
            }
        }

        let mut result = GameResult::default();
        let mut m_def = HashMap::new();
        let mut m_coop = HashMap::new();
        let mut m_won = HashMap::new();
        for idx in 0..n {
            let owner = self.strategies[idx].owner().to_string();
            let score = match &self.failures[idx] {
                Some(message) => {
                    result.failures.insert(owner.clone(), message.clone());
                    0.0
                }
                None => totals[idx],
            };
            if let Some(nar) = narrative.as_deref_mut() {
                nar.line(format!("{owner}: score {score}"));
            }
            result.scores.insert(owner.clone(), score);
            m_def.insert(owner.clone(), defections[idx]);
            m_coop.insert(owner.clone(), cooperations[idx]);
            m_won.insert(owner, pairings_won[idx]);
        }
        result.metrics.insert("defections".into(), m_def);
        result.metrics.insert("cooperations".into(), m_coop);
        result.metrics.insert("pairings_won".into(), m_won);
        Ok(result)
    }
}

impl Game for IteratedMatrix {
    fn reset(&mut self, seed: u64) {
        for failure in &mut self.failures {
            *failure = None;
        }
        for (idx, strategy) in self.strategies.iter_mut().enumerate() {
            strategy.begin_game(seed.wrapping_add(1 + idx as u64));
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy_loader::{StrategyLoader, StrategySource};

    fn load(owner: &str, body: &str) -> LoadedStrategy {
        let text = format!("strategy S(Player):\n    {body}\n");
        StrategyLoader::new()
            .load(&StrategySource::new(text, "S", owner))
            .unwrap()
    }

    fn play(
        strategies: Vec<LoadedStrategy>,
        rewards: Option<&[f64]>,
    ) -> GameResult {
        let mut game = IteratedMatrix::new(strategies);
        game.reset(0);
        game.play_one_game(rewards, &CancelFlag::new()).unwrap()
    }

    #[test]
    fn always_defect_beats_always_cooperate_by_twenty() {
        let result = play(
            vec![load("dove", "cooperate"), load("hawk", "defect")],
            Some(&[4.0, 0.0, 6.0, 2.0]),
        );
        // dove: self-pairing 2*4*10 = 80, exploited pairing 0
        // hawk: self-pairing 2*2*10 = 40, exploiting pairing 6*10 = 60
        assert_eq!(result.scores["dove"], 80.0);
        assert_eq!(result.scores["hawk"], 100.0);
        assert_eq!(result.scores["hawk"] - result.scores["dove"], 20.0);
    }

    #[test]
    fn tit_for_tat_mirrors_the_previous_round() {
        let tft = "if opp_last == 1 then defect else cooperate";
        let result = play(vec![load("tft", tft), load("hawk", "defect")], None);
        // self-pairing: both seats cooperate all 10 rounds (20 cooperations);
        // against the hawk: cooperate round 1, defect rounds 2..=10
        assert_eq!(result.metrics["cooperations"]["tft"], 20.0 + 1.0);
        assert_eq!(result.metrics["defections"]["tft"], 9.0);
    }

    #[test]
    fn results_are_owner_order_invariant() {
        let tft = "if opp_last == 1 then defect else cooperate";
        let ab = play(vec![load("tft", tft), load("hawk", "defect")], None);
        let ba = play(vec![load("hawk", "defect"), load("tft", tft)], None);
        // pairing order changes, per-owner scores and metrics must not
        assert_eq!(ab, ba);
    }

    #[test]
    fn self_pairing_is_included() {
        let result = play(vec![load("solo", "cooperate")], None);
        // one self-pairing, both seats cooperate every round
        assert_eq!(result.scores["solo"], 2.0 * DEFAULT_PAYOFF[0] * 10.0);
    }

    #[test]
    fn throwing_strategy_cooperates_and_scores_zero() {
        let result = play(
            vec![load("broken", "missing_var + 1"), load("dove", "cooperate")],
            None,
        );
        assert_eq!(result.scores["broken"], 0.0);
        assert!(result.failures.contains_key("broken"));
        // the opponent is not penalized: the failed seat cooperated throughout
        assert_eq!(
            result.scores["dove"],
            2.0 * DEFAULT_PAYOFF[0] * 10.0 + DEFAULT_PAYOFF[0] * 10.0
        );
    }

    #[test]
    fn wrong_payoff_length_is_an_engine_fault() {
        let mut game = IteratedMatrix::new(vec![load("a", "defect")]);
        game.reset(0);
        let err = game
            .play_one_game(Some(&[1.0, 2.0]), &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Fault(_)));
    }

    #[test]
    fn pairings_won_counts_strict_wins_only() {
        let result = play(
            vec![
                load("hawk", "defect"),
                load("dove", "cooperate"),
                load("dove2", "cooperate"),
            ],
            None,
        );
        assert_eq!(result.metrics["pairings_won"]["hawk"], 2.0);
        assert_eq!(result.metrics["pairings_won"]["dove"], 0.0);
        assert_eq!(result.metrics["pairings_won"]["dove2"], 0.0);
    }
}
