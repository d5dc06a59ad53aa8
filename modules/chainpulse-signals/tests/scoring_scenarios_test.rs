//! Literal scoring scenarios: percentage velocity semantics, boundary
//! behavior, and score ordering across realistic mention patterns.

use chrono::{Duration, Utc};

use chainpulse_common::SentimentMetrics;
use chainpulse_signals::{
    composite_score, recency_factor, sentiment_metrics, velocity_percent, ScoreWeights,
};

#[test]
fn ethereum_fifty_over_thirty_reads_as_sixty_seven_percent() {
    // 50 primary mentions in the last 24h, 30 in the prior 24h.
    let velocity = velocity_percent(50, 30);
    assert!(
        (velocity - 66.67).abs() < 0.05,
        "the contract is the value 66.7, got {velocity}"
    );
}

#[test]
fn velocity_from_nothing_counts_full_growth() {
    // No prior mentions: +N*100%, never a division by zero.
    assert_eq!(velocity_percent(3, 0), 300.0);
    assert_eq!(velocity_percent(1, 0), 100.0);
}

#[test]
fn collapse_to_zero_bottoms_out_at_minus_100() {
    assert_eq!(velocity_percent(0, 25), -100.0);
}

#[test]
fn dead_entity_scores_zero_regardless_of_history() {
    let score = composite_score(
        0,
        250.0,
        12,
        0.9,
        &sentiment_metrics(&[1.0, 1.0]),
        &ScoreWeights::default(),
    );
    assert_eq!(score, 0.0);
}

#[test]
fn hot_entity_outranks_quiet_entity() {
    let weights = ScoreWeights::default();
    let neutral = sentiment_metrics(&[0.0]);

    // Surging: +200% velocity, 8 sources, most mentions in the last hours.
    let surging = composite_score(40, 200.0, 8, 0.8, &neutral, &weights);
    // Background chatter: flat velocity, 2 sources, evenly spread.
    let chatter = composite_score(40, 0.0, 2, 0.2, &neutral, &weights);

    assert!(surging > chatter);
    assert!(surging <= 10.0 && chatter >= 0.0);
}

#[test]
fn polarized_sentiment_counts_less_than_uniform() {
    let weights = ScoreWeights::default();
    // Same average magnitude, different spread.
    let uniform = sentiment_metrics(&[1.0, 1.0, 1.0, 1.0]);
    let polarized = SentimentMetrics {
        avg: 1.0,
        min: -1.0,
        max: 1.0,
        divergence: 1.0,
    };

    let uniform_score = composite_score(10, 50.0, 4, 0.5, &uniform, &weights);
    let polarized_score = composite_score(10, 50.0, 4, 0.5, &polarized, &weights);
    assert!(uniform_score > polarized_score);
}

#[test]
fn recency_window_boundary_is_the_last_twenty_percent() {
    let end = Utc::now();
    let start = end - Duration::hours(100);
    // The recent cutoff sits at end - 20h. One mention either side of it.
    let stamps = vec![end - Duration::hours(19), end - Duration::hours(21)];
    let recency = recency_factor(&stamps, start, end);
    assert!((recency - 0.5).abs() < 0.01, "got {recency}");
}

#[test]
fn identical_inputs_always_produce_identical_scores() {
    let weights = ScoreWeights::default();
    let sentiment = sentiment_metrics(&[1.0, 0.0, -1.0]);
    let a = composite_score(25, 80.0, 6, 0.4, &sentiment, &weights);
    let b = composite_score(25, 80.0, 6, 0.4, &sentiment, &weights);
    assert_eq!(a, b);
}
