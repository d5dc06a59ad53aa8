use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use chainpulse_common::{normalize_entity, ChainPulseError, EntityType, Timeframe, TimeframeMetrics};
use chainpulse_store::reader::MentionRow;
use chainpulse_store::{StoreReader, StoreWriter};

use crate::math::{composite_score, recency_factor, sentiment_metrics, velocity_percent, ScoreWeights};

/// Entities scored concurrently inside one run.
const SCORE_FAN_OUT: usize = 4;

#[derive(Debug, Default, Clone)]
pub struct ScoreStats {
    pub entities_scored: u32,
    pub emerging: u32,
    pub failures: u32,
}

impl std::fmt::Display for ScoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "entities_scored={} emerging={} failures={}",
            self.entities_scored, self.emerging, self.failures
        )
    }
}

/// Multi-timeframe signal scorer. Sole owner of the signal_scores collection.
pub struct SignalScorer {
    reader: Arc<StoreReader>,
    writer: Arc<StoreWriter>,
    lookback_hours: i64,
    emerging_floor: f64,
    weights: ScoreWeights,
}

impl SignalScorer {
    pub fn new(
        reader: Arc<StoreReader>,
        writer: Arc<StoreWriter>,
        lookback_hours: i64,
        emerging_floor: f64,
    ) -> Self {
        Self {
            reader,
            writer,
            lookback_hours,
            emerging_floor,
            weights: ScoreWeights::default(),
        }
    }

    /// One score-job run: recompute scores for every primary entity mentioned
    /// inside the rolling lookback, then refresh narrative membership.
    pub async fn run(&self, shutdown: &watch::Receiver<bool>) -> Result<ScoreStats, ChainPulseError> {
        let now = Utc::now();
        let since = now - Duration::hours(self.lookback_hours);
        let entities = self.reader.entities_mentioned_since(since).await?;
        if entities.is_empty() {
            return Ok(ScoreStats::default());
        }
        info!(entities = entities.len(), "Score run starting");

        // Narrative membership is resolved against one snapshot for the whole
        // run; per-entity reads would race the clusterer mid-run.
        let narratives = self.reader.non_archived_narratives().await?;

        let mut stats = ScoreStats::default();
        for chunk in entities.chunks(SCORE_FAN_OUT) {
            if *shutdown.borrow() {
                info!("Shutdown observed, stopping score run");
                break;
            }
            let outcomes = futures::future::join_all(chunk.iter().map(|(entity, entity_type)| {
                self.score_entity(entity, *entity_type, now, &narratives)
            }))
            .await;

            for outcome in outcomes {
                match outcome {
                    Ok(is_emerging) => {
                        stats.entities_scored += 1;
                        if is_emerging {
                            stats.emerging += 1;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Entity scoring failed");
                        stats.failures += 1;
                    }
                }
            }
        }

        info!(%stats, "Score run complete");
        Ok(stats)
    }

    /// Score one entity across all three timeframes and upsert. Returns
    /// whether the entity is flagged emerging.
    async fn score_entity(
        &self,
        entity: &str,
        entity_type: EntityType,
        now: DateTime<Utc>,
        narratives: &[chainpulse_common::Narrative],
    ) -> Result<bool, ChainPulseError> {
        // Canonical form at the query boundary: variants share one row.
        let entity = normalize_entity(entity);

        // One fetch covering the widest current+previous span (2 x 30d);
        // individual windows slice it in memory.
        let widest = Timeframe::D30.hours();
        let rows = self
            .reader
            .mention_window(&entity, now - Duration::hours(2 * widest), now)
            .await?;

        // Sentiment over the most recent window (24h), falling back to 7d
        // when the day is quiet.
        let sentiment = {
            let day = window_values(&rows, now, Timeframe::H24.hours());
            if day.is_empty() {
                sentiment_metrics(&window_values(&rows, now, Timeframe::D7.hours()))
            } else {
                sentiment_metrics(&day)
            }
        };

        // Source diversity over the scorer's rolling lookback.
        let lookback_start = now - Duration::hours(self.lookback_hours);
        let source_count = {
            let mut sources: Vec<&str> = rows
                .iter()
                .filter(|r| r.created_at >= lookback_start)
                .map(|r| r.source.as_str())
                .collect();
            sources.sort_unstable();
            sources.dedup();
            sources.len() as u32
        };

        let mut best_score = 0.0f64;
        for timeframe in Timeframe::all() {
            let hours = timeframe.hours();
            let window_start = now - Duration::hours(hours);
            let prev_start = now - Duration::hours(2 * hours);

            let current: Vec<&MentionRow> = rows
                .iter()
                .filter(|r| r.created_at >= window_start)
                .collect();
            let previous = rows
                .iter()
                .filter(|r| r.created_at >= prev_start && r.created_at < window_start)
                .count() as u32;

            let mentions = current.len() as u32;
            let velocity = velocity_percent(mentions, previous);
            let timestamps: Vec<DateTime<Utc>> = current.iter().map(|r| r.created_at).collect();
            let recency = recency_factor(&timestamps, window_start, now);
            let score = composite_score(
                mentions,
                velocity,
                source_count,
                recency,
                &sentiment,
                &self.weights,
            );
            best_score = best_score.max(score);

            let metrics = TimeframeMetrics {
                score,
                velocity,
                mentions,
                recency,
            };
            self.writer
                .upsert_signal_timeframe(
                    &entity,
                    entity_type,
                    timeframe,
                    &metrics,
                    &sentiment,
                    source_count,
                    now,
                )
                .await?;
        }

        let narrative_ids = narratives_containing(narratives, &entity);
        let is_emerging = narrative_ids.is_empty() && best_score > self.emerging_floor;
        self.writer
            .set_signal_narratives(&entity, &narrative_ids, is_emerging)
            .await?;

        Ok(is_emerging)
    }
}

fn window_values(rows: &[MentionRow], now: DateTime<Utc>, hours: i64) -> Vec<f64> {
    let start = now - Duration::hours(hours);
    rows.iter()
        .filter(|r| r.created_at >= start)
        .map(|r| r.sentiment.value())
        .collect()
}

/// Active narratives whose entity list contains the canonical entity.
fn narratives_containing(
    narratives: &[chainpulse_common::Narrative],
    entity: &str,
) -> Vec<Uuid> {
    narratives
        .iter()
        .filter(|n| n.entities.iter().any(|e| e == entity))
        .map(|n| n.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainpulse_common::{LifecycleState, Momentum, Narrative, NarrativeFingerprint};

    fn narrative(entities: &[&str]) -> Narrative {
        let now = Utc::now();
        Narrative {
            id: Uuid::new_v4(),
            title: "t".into(),
            summary: "s".into(),
            theme: "Bitcoin".into(),
            entities: entities.iter().map(|e| e.to_string()).collect(),
            article_ids: vec![],
            article_count: 0,
            fingerprint: NarrativeFingerprint {
                nucleus_entity: "Bitcoin".into(),
                top_actors: vec![],
                key_actions: vec![],
                timestamp: now,
            },
            lifecycle_state: LifecycleState::Emerging,
            lifecycle_history: vec![],
            mention_velocity: 0.0,
            momentum: Momentum::Unknown,
            recency_score: 0.0,
            first_seen: now,
            last_updated: now,
            reawakening_count: 0,
            reawakened_from: None,
            resurrection_velocity: None,
            peak_activity: None,
            merged_into: None,
            version: 0,
        }
    }

    #[test]
    fn membership_matches_canonical_entities() {
        let narratives = vec![narrative(&["Bitcoin", "MicroStrategy"]), narrative(&["Solana"])];
        assert_eq!(narratives_containing(&narratives, "Bitcoin").len(), 1);
        assert_eq!(narratives_containing(&narratives, "Ethereum").len(), 0);
    }

    #[test]
    fn window_values_slices_by_time() {
        let now = Utc::now();
        let rows = vec![
            MentionRow {
                created_at: now - Duration::hours(2),
                source: "a".into(),
                sentiment: chainpulse_common::Sentiment::Positive,
            },
            MentionRow {
                created_at: now - Duration::hours(50),
                source: "b".into(),
                sentiment: chainpulse_common::Sentiment::Negative,
            },
        ];
        assert_eq!(window_values(&rows, now, 24), vec![1.0]);
        assert_eq!(window_values(&rows, now, 72).len(), 2);
    }
}
