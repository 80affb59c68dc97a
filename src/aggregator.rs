//! Streaming aggregation of per-game results into one batch summary.
//!
//! The aggregator consumes [`GameResult`]s one at a time, so a batch cut
//! short by its deadline still yields a valid summary of the games that did
//! finish. Scores and win counts accumulate across games; the game-specific
//! `metrics` block is a snapshot of the most recent game, replaced wholesale
//! on every observation, because metrics from different games are not
//! meaningfully summable.

use std::collections::HashMap;

use crate::game_interface::GameResult;

/// Batch-level summary across every completed game.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    /// Number of games the batch asked for.
    pub requested: usize,
    /// Number of games that actually completed. Equal to `requested` unless
    /// the deadline cut the batch short.
    pub num_simulations: usize,
    /// Sum of each owner's per-game scores.
    pub total_score: HashMap<String, f64>,
    /// Games in which the owner held (or shared) the top score. Owners whose
    /// code failed during a game earn no win credit for it, even if everyone
    /// else failed too.
    pub wins: HashMap<String, u64>,
    /// Games in which the owner's code failed at least once.
    pub failure_counts: HashMap<String, u64>,
    /// Metrics of the most recent completed game. A snapshot, not a sum.
    pub metrics: HashMap<String, HashMap<String, f64>>,
}

impl BatchResult {
    /// Mean per-game score for `owner`, if any game completed.
    pub fn mean_score(&self, owner: &str) -> Option<f64> {
        if self.num_simulations == 0 {
            return None;
        }
        self.total_score
            .get(owner)
            .map(|total| total / self.num_simulations as f64)
    }
}

/// Folds a stream of [`GameResult`]s into a [`BatchResult`].
#[derive(Debug)]
pub struct Aggregator {
    result: BatchResult,
}

impl Aggregator {
    /// Aggregator for a batch of `requested` games.
    pub fn new(requested: usize) -> Self {
        Self {
            result: BatchResult {
                requested,
                ..BatchResult::default()
            },
        }
    }

    /// Folds one completed game into the summary.
    pub fn observe(&mut self, game: &GameResult) {
        self.result.num_simulations += 1;
        for (owner, score) in &game.scores {
            *self.result.total_score.entry(owner.clone()).or_default() += score;
        }
        // every non-failed owner tied for the top score gets the win; a
        // failed owner's minimum score never counts, so a game where everyone
        // failed credits no one
        let top = game
            .scores
            .iter()
            .filter(|(owner, _)| !game.failures.contains_key(owner.as_str()))
            .map(|(_, score)| *score)
            .fold(f64::NEG_INFINITY, f64::max);
        for (owner, score) in &game.scores {
            if *score == top && !game.failures.contains_key(owner) {
                *self.result.wins.entry(owner.clone()).or_default() += 1;
            }
        }
        for owner in game.failures.keys() {
            *self.result.failure_counts.entry(owner.clone()).or_default() += 1;
        }
        self.result.metrics = game.metrics.clone();
    }

    /// Games observed so far.
    pub fn completed(&self) -> usize {
        self.result.num_simulations
    }

    /// The summary of everything observed.
    pub fn finish(self) -> BatchResult {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game(scores: &[(&str, f64)]) -> GameResult {
        let mut result = GameResult::default();
        for (owner, score) in scores {
            result.scores.insert(owner.to_string(), *score);
        }
        result
    }

    #[test]
    fn accumulates_scores_and_wins() {
        let mut agg = Aggregator::new(3);
        agg.observe(&game(&[("a", 2.0), ("b", 1.0)]));
        agg.observe(&game(&[("a", 1.0), ("b", 2.0)]));
        agg.observe(&game(&[("a", 2.0), ("b", 1.0)]));
        assert_eq!(agg.completed(), 3);
        let batch = agg.finish();
        assert_eq!(batch.requested, 3);
        assert_eq!(batch.num_simulations, 3);
        assert_eq!(batch.total_score["a"], 5.0);
        assert_eq!(batch.total_score["b"], 4.0);
        assert_eq!(batch.wins["a"], 2);
        assert_eq!(batch.wins["b"], 1);
        assert_eq!(batch.mean_score("b"), Some(4.0 / 3.0));
    }

    #[test]
    fn tied_leaders_all_win() {
        let mut agg = Aggregator::new(1);
        agg.observe(&game(&[("a", 2.0), ("b", 2.0), ("c", 1.0)]));
        let batch = agg.finish();
        assert_eq!(batch.wins["a"], 1);
        assert_eq!(batch.wins["b"], 1);
        assert!(!batch.wins.contains_key("c"));
    }

    #[test]
    fn metrics_are_a_snapshot_of_the_last_game() {
        let mut agg = Aggregator::new(2);
        let mut first = game(&[("a", 1.0)]);
        first
            .metrics
            .insert("rolls".into(), HashMap::from([("a".into(), 4.0)]));
        let mut second = game(&[("a", 1.0)]);
        second
            .metrics
            .insert("rolls".into(), HashMap::from([("a".into(), 9.0)]));
        agg.observe(&first);
        agg.observe(&second);
        let batch = agg.finish();
        assert_eq!(batch.metrics["rolls"]["a"], 9.0);
    }

    #[test]
    fn failed_owners_earn_no_win_credit() {
        let mut agg = Aggregator::new(2);
        // the failed owner ties the survivor's score but must not win
        let mut tied = game(&[("a", 0.0), ("b", 0.0)]);
        tied.failures.insert("a".into(), "boom".into());
        agg.observe(&tied);
        // everyone failed: nobody wins this game
        let mut wipeout = game(&[("a", 0.0), ("b", 0.0)]);
        wipeout.failures.insert("a".into(), "boom".into());
        wipeout.failures.insert("b".into(), "boom".into());
        agg.observe(&wipeout);
        let batch = agg.finish();
        assert_eq!(batch.wins.get("b").copied(), Some(1));
        assert!(!batch.wins.contains_key("a"));
    }

    #[test]
    fn failure_counts_accumulate_per_owner() {
        let mut agg = Aggregator::new(2);
        let mut bad = game(&[("a", 0.0), ("b", 3.0)]);
        bad.failures.insert("a".into(), "boom".into());
        agg.observe(&bad);
        agg.observe(&game(&[("a", 1.0), ("b", 2.0)]));
        let batch = agg.finish();
        assert_eq!(batch.failure_counts["a"], 1);
        assert!(!batch.failure_counts.contains_key("b"));
    }

    #[test]
    fn empty_batch_has_no_means() {
        let batch = Aggregator::new(5).finish();
        assert_eq!(batch.num_simulations, 0);
        assert_eq!(batch.mean_score("a"), None);
    }
}
