//! End-to-end league runs through the public `Arena` API.

use std::time::Duration;

use strategy_arena::prelude::*;

fn script(owner: &str, name: &str, body: &str) -> StrategySource {
    StrategySource::new(
        format!("strategy {name}(Player):\n    {body}\n"),
        name,
        owner,
    )
}

fn arena() -> Arena {
    Arena::new(Configuration::new().with_verbose(false))
}

#[test]
fn luck_league_has_no_dominant_strategy() {
    let request = LeagueRequest {
        game: GameKind::PushYourLuck,
        participants: vec![
            script("banker", "AlwaysBank", "bank"),
            script("roller", "NeverBank", "roll"),
        ],
        custom_rewards: None,
        num_simulations: 1000,
        deadline: Duration::from_secs(60),
        seed: Some(42),
        with_narrative: false,
    };
    let report = arena().run_league(&request).unwrap();
    let batch = match report.outcome {
        ExecutionOutcome::Completed(batch) => batch,
        other => panic!("expected completion, got {other:?}"),
    };
    assert_eq!(batch.num_simulations, 1000);
    // the banker grinds small safe gains, the roller gambles on one long
    // round; luck decides individual games, so both win some but not all
    for owner in ["banker", "roller"] {
        let wins = batch.wins.get(owner).copied().unwrap_or(0);
        assert!(wins > 0, "{owner} never won");
        assert!(wins < 1000, "{owner} won every game");
    }
}

#[test]
fn defector_margin_over_cooperator_is_exact() {
    let games = 5;
    let request = LeagueRequest {
        game: GameKind::IteratedMatrix,
        participants: vec![
            script("dove", "AlwaysCooperate", "cooperate"),
            script("hawk", "AlwaysDefect", "defect"),
        ],
        custom_rewards: Some(vec![4.0, 0.0, 6.0, 2.0]),
        num_simulations: games,
        deadline: Duration::from_secs(30),
        seed: Some(123),
        with_narrative: false,
    };
    let report = arena().run_league(&request).unwrap();
    let batch = match report.outcome {
        ExecutionOutcome::Completed(batch) => batch,
        other => panic!("expected completion, got {other:?}"),
    };
    // with [cc=4, cd=0, dc=6, dd=2] every game scores hawk 100, dove 80
    let margin = batch.total_score["hawk"] - batch.total_score["dove"];
    assert_eq!(margin, 20.0 * games as f64);
    assert_eq!(batch.wins.get("hawk").copied().unwrap_or(0), games as u64);
    assert!(!batch.wins.contains_key("dove"));
}

#[test]
fn forbidden_import_is_rejected_with_the_culprit_named() {
    let intake = SubmissionIntake {
        source: StrategySource::new(
            "import os\nstrategy Sneaky(Player):\n    bank\n",
            "Sneaky",
            "mallory",
        ),
        game: GameKind::PushYourLuck,
        league: vec![script("honest", "Honest", "bank")],
    };
    let outcome = arena().validate_submission(&intake).unwrap();
    match outcome {
        ExecutionOutcome::Rejected(reason) => {
            assert!(reason.contains("os"), "reason does not name the import: {reason}")
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[test]
fn narrative_league_reports_a_transcript() {
    let request = LeagueRequest {
        game: GameKind::IteratedMatrix,
        participants: vec![
            script("tft", "TitForTat", "if opp_last == 1 then defect else cooperate"),
            script("hawk", "AlwaysDefect", "defect"),
        ],
        custom_rewards: None,
        num_simulations: 3,
        deadline: Duration::from_secs(30),
        seed: Some(9),
        with_narrative: true,
    };
    let report = arena().run_league(&request).unwrap();
    assert!(matches!(report.outcome, ExecutionOutcome::Completed(_)));
    let narrative = report.narrative.expect("narrative was requested");
    assert!(!narrative.is_empty());
    assert!(narrative.lines().iter().any(|l| l.contains("pairing")));
}

#[test]
fn stateful_strategy_survives_the_whole_league() {
    // the `_seen` scratch variable persists across turns within a game and
    // resets between games; the league must complete either way
    let text = "strategy Counter(Player):\n    let _seen = _seen + 1\n    if _seen >= 3 then bank else roll\n";
    let request = LeagueRequest {
        game: GameKind::PushYourLuck,
        participants: vec![
            StrategySource::new(text, "Counter", "counter"),
            script("baseline", "Baseline", "bank"),
        ],
        custom_rewards: None,
        num_simulations: 50,
        deadline: Duration::from_secs(30),
        seed: Some(5),
        with_narrative: false,
    };
    let report = arena().run_league(&request).unwrap();
    let batch = report.outcome.batch_result().expect("league completed");
    assert_eq!(batch.num_simulations, 50);
    assert!(batch.failure_counts.is_empty(), "{:?}", batch.failure_counts);
}

#[test]
fn same_seed_reproduces_the_whole_batch() {
    let request = LeagueRequest {
        game: GameKind::PushYourLuck,
        participants: vec![
            script("a", "A", "if my_unbanked >= 20 then bank else roll"),
            script("b", "B", "roll"),
        ],
        custom_rewards: None,
        num_simulations: 25,
        deadline: Duration::from_secs(30),
        seed: Some(77),
        with_narrative: false,
    };
    let first = arena().run_league(&request).unwrap();
    let second = arena().run_league(&request).unwrap();
    assert_eq!(
        first.outcome.batch_result().unwrap(),
        second.outcome.batch_result().unwrap()
    );
}
