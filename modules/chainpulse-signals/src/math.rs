use chrono::{DateTime, Utc};

use chainpulse_common::SentimentMetrics;

/// Percent growth of the current window over the previous one.
/// 50 now vs 30 before = +66.7 (a percentage, not a decimal). A previous
/// count of zero is treated as a denominator of one, so going 0 -> N reads
/// as +N*100% rather than a division by zero.
pub fn velocity_percent(n_curr: u32, n_prev: u32) -> f64 {
    100.0 * (n_curr as f64 - n_prev as f64) / (n_prev.max(1) as f64)
}

/// Fraction of window mentions that land in the most recent 20% of the window.
pub fn recency_factor(
    timestamps: &[DateTime<Utc>],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> f64 {
    if timestamps.is_empty() || window_end <= window_start {
        return 0.0;
    }
    let window = window_end - window_start;
    let recent_cutoff = window_end - window / 5;
    let recent = timestamps.iter().filter(|t| **t >= recent_cutoff).count();
    recent as f64 / timestamps.len() as f64
}

/// Aggregate mention-level sentiment values (+1 / 0 / -1).
/// Divergence is the max-min spread normalized to [0, 1].
pub fn sentiment_metrics(values: &[f64]) -> SentimentMetrics {
    if values.is_empty() {
        return SentimentMetrics::default();
    }
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    SentimentMetrics {
        avg,
        min,
        max,
        divergence: (max - min) / 2.0,
    }
}

/// Weights for the composite signal score. Tunable, but the monotonicity
/// contract holds for any non-negative weights: raising velocity,
/// source count, or recency never lowers the score.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub velocity: f64,
    pub sources: f64,
    pub recency: f64,
    pub sentiment: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            velocity: 0.4,
            sources: 0.3,
            recency: 0.2,
            sentiment: 0.1,
        }
    }
}

/// Composite score in [0, 10]. Zero mentions always scores zero.
pub fn composite_score(
    mentions: u32,
    velocity: f64,
    source_count: u32,
    recency: f64,
    sentiment: &SentimentMetrics,
    weights: &ScoreWeights,
) -> f64 {
    if mentions == 0 {
        return 0.0;
    }

    // Velocity saturates at +500%; declines contribute nothing rather than
    // dragging the blend negative.
    let velocity_component = (velocity.clamp(0.0, 500.0)) / 500.0;
    // Log-scaled diversity, saturating at ~10 distinct sources.
    let source_component = ((1.0 + source_count as f64).ln() / 11.0f64.ln()).min(1.0);
    let recency_component = recency.clamp(0.0, 1.0);
    // Sentiment salience: strong uniform sentiment counts more than a
    // polarized split.
    let sentiment_component = sentiment.avg.abs() * (1.0 - 0.5 * sentiment.divergence);

    let blended = weights.velocity * velocity_component
        + weights.sources * source_component
        + weights.recency * recency_component
        + weights.sentiment * sentiment_component;

    (10.0 * blended).clamp(0.0, 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 0.01
    }

    // --- velocity ---

    #[test]
    fn velocity_is_a_percentage() {
        // 50 now vs 30 before: +66.7%
        assert!(approx(velocity_percent(50, 30), 66.67));
    }

    #[test]
    fn velocity_decline_is_negative() {
        // 20 now vs 50 before: -60%
        assert!(approx(velocity_percent(20, 50), -60.0));
    }

    #[test]
    fn velocity_from_zero_previous() {
        // 0 -> 5 is +500%, not a division by zero.
        assert!(approx(velocity_percent(5, 0), 500.0));
        assert!(approx(velocity_percent(0, 0), 0.0));
    }

    #[test]
    fn velocity_never_below_minus_100() {
        assert!(approx(velocity_percent(0, 40), -100.0));
    }

    // --- recency ---

    #[test]
    fn recency_all_mentions_recent() {
        let end = Utc::now();
        let start = end - Duration::hours(24);
        // All mentions two hours old: inside the last 20% (4.8h) of the window.
        let stamps = vec![end - Duration::hours(2); 20];
        assert!(approx(recency_factor(&stamps, start, end), 1.0));
    }

    #[test]
    fn recency_no_recent_mentions() {
        let end = Utc::now();
        let start = end - Duration::hours(24);
        let stamps = vec![end - Duration::hours(20); 10];
        assert!(approx(recency_factor(&stamps, start, end), 0.0));
    }

    #[test]
    fn recency_half_recent() {
        let end = Utc::now();
        let start = end - Duration::hours(24);
        let mut stamps = vec![end - Duration::hours(1); 5];
        stamps.extend(vec![end - Duration::hours(12); 5]);
        assert!(approx(recency_factor(&stamps, start, end), 0.5));
    }

    #[test]
    fn recency_empty_is_zero() {
        let end = Utc::now();
        assert_eq!(recency_factor(&[], end - Duration::hours(24), end), 0.0);
    }

    // --- sentiment ---

    #[test]
    fn sentiment_aggregates() {
        let metrics = sentiment_metrics(&[1.0, 0.0, -1.0, 1.0]);
        assert!(approx(metrics.avg, 0.25));
        assert_eq!(metrics.min, -1.0);
        assert_eq!(metrics.max, 1.0);
        assert!(approx(metrics.divergence, 1.0));
    }

    #[test]
    fn sentiment_uniform_has_zero_divergence() {
        let metrics = sentiment_metrics(&[1.0, 1.0, 1.0]);
        assert!(approx(metrics.avg, 1.0));
        assert!(approx(metrics.divergence, 0.0));
    }

    #[test]
    fn sentiment_empty_is_default() {
        let metrics = sentiment_metrics(&[]);
        assert_eq!(metrics.avg, 0.0);
        assert_eq!(metrics.divergence, 0.0);
    }

    // --- composite score ---

    #[test]
    fn zero_mentions_scores_zero() {
        let score = composite_score(
            0,
            400.0,
            10,
            1.0,
            &sentiment_metrics(&[1.0]),
            &ScoreWeights::default(),
        );
        assert_eq!(score, 0.0);
    }

    #[test]
    fn score_bounded_zero_to_ten() {
        let weights = ScoreWeights::default();
        let high = composite_score(100, 10_000.0, 50, 1.0, &sentiment_metrics(&[1.0]), &weights);
        let low = composite_score(1, -90.0, 1, 0.0, &sentiment_metrics(&[0.0]), &weights);
        assert!(high <= 10.0);
        assert!(low >= 0.0);
    }

    #[test]
    fn score_monotone_in_velocity() {
        let weights = ScoreWeights::default();
        let s = sentiment_metrics(&[0.0]);
        let lo = composite_score(10, 50.0, 5, 0.5, &s, &weights);
        let hi = composite_score(10, 200.0, 5, 0.5, &s, &weights);
        assert!(hi > lo);
    }

    #[test]
    fn score_monotone_in_source_count() {
        let weights = ScoreWeights::default();
        let s = sentiment_metrics(&[0.0]);
        let lo = composite_score(10, 50.0, 2, 0.5, &s, &weights);
        let hi = composite_score(10, 50.0, 8, 0.5, &s, &weights);
        assert!(hi > lo);
    }

    #[test]
    fn score_monotone_in_recency() {
        let weights = ScoreWeights::default();
        let s = sentiment_metrics(&[0.0]);
        let lo = composite_score(10, 50.0, 5, 0.2, &s, &weights);
        let hi = composite_score(10, 50.0, 5, 0.9, &s, &weights);
        assert!(hi > lo);
    }
}
