pub mod math;
pub mod scorer;

pub use math::{composite_score, recency_factor, sentiment_metrics, velocity_percent, ScoreWeights};
pub use scorer::{ScoreStats, SignalScorer};
