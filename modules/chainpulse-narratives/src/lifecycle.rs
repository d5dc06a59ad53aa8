use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use chainpulse_common::{
    ChainPulseError, LifecycleEntry, LifecycleState, Momentum, Narrative, PeakActivity,
};
use chainpulse_store::{StoreReader, StoreWriter};

/// Lookback for narrative velocity and momentum, in days.
const LOOKBACK_DAYS: i64 = 7;

/// Momentum needs at least this many articles inside the lookback.
const MOMENTUM_MIN_ARTICLES: usize = 4;

/// A continued-activity history entry is logged at most this often.
const HISTORY_HEARTBEAT_HOURS: i64 = 24;

/// Narrative recency decays linearly to zero at this age.
const RECENCY_ZERO_DAYS: f64 = 14.0;

/// Everything the transition function looks at.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleInputs {
    pub article_count: u32,
    /// Articles/day over the 7-day lookback (denominator is the lookback).
    pub velocity: f64,
    pub momentum: Momentum,
    pub days_since_update: f64,
    pub previous_state: Option<LifecycleState>,
}

/// Articles/day over the lookback. The denominator is always the lookback
/// length, never the observed article span: 3 articles from 1.5 days ago
/// is 3/7 = 0.43/day, not 2.0.
pub fn narrative_velocity(
    article_dates: &[DateTime<Utc>],
    now: DateTime<Utc>,
    lookback_days: i64,
) -> f64 {
    let cutoff = now - Duration::days(lookback_days);
    let in_window = article_dates.iter().filter(|d| **d >= cutoff).count();
    in_window as f64 / lookback_days as f64
}

/// Momentum over the lookback: the window is split into two equal halves
/// and each half's velocity compared.
pub fn momentum_of(article_dates: &[DateTime<Utc>], now: DateTime<Utc>) -> Momentum {
    let window_start = now - Duration::days(LOOKBACK_DAYS);
    let midpoint = now - Duration::days(LOOKBACK_DAYS) / 2;
    let half_days = LOOKBACK_DAYS as f64 / 2.0;

    let in_window: Vec<&DateTime<Utc>> = article_dates
        .iter()
        .filter(|d| **d >= window_start)
        .collect();
    if in_window.len() < MOMENTUM_MIN_ARTICLES {
        return Momentum::Unknown;
    }

    let older = in_window.iter().filter(|d| ***d < midpoint).count();
    let newer = in_window.len() - older;
    let v_old = older as f64 / half_days;
    let v_new = newer as f64 / half_days;

    if v_new > 1.25 * v_old {
        Momentum::Growing
    } else if v_new < 0.80 * v_old {
        Momentum::Declining
    } else {
        Momentum::Stable
    }
}

/// Narrative recency: 1.0 for a just-updated narrative, 0.0 at 14+ days.
pub fn narrative_recency(last_updated: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_days = (now - last_updated).num_seconds().max(0) as f64 / 86_400.0;
    (1.0 - age_days / RECENCY_ZERO_DAYS).clamp(0.0, 1.0)
}

/// The transition table, evaluated top to bottom, first match wins.
/// Archival is checked ahead of dormancy (the longer staleness must win);
/// when nothing matches the narrative keeps its previous state.
pub fn next_state(inputs: &LifecycleInputs) -> LifecycleState {
    let LifecycleInputs {
        article_count,
        velocity,
        momentum,
        days_since_update,
        previous_state,
    } = *inputs;

    if article_count <= 4 {
        return LifecycleState::Emerging;
    }
    if momentum == Momentum::Growing {
        return LifecycleState::Rising;
    }
    if velocity >= 2.0 && matches!(momentum, Momentum::Stable | Momentum::Growing) {
        return LifecycleState::Hot;
    }
    if velocity >= 2.0 && momentum == Momentum::Declining {
        return LifecycleState::Cooling;
    }
    if article_count >= 8 && velocity >= 3.0 {
        return LifecycleState::Mature;
    }
    if matches!(
        previous_state,
        Some(LifecycleState::Hot) | Some(LifecycleState::Mature) | Some(LifecycleState::Rising)
    ) && days_since_update > 3.0
    {
        return LifecycleState::Cooling;
    }
    if days_since_update > 30.0 {
        return LifecycleState::Archived;
    }
    if days_since_update > 7.0 {
        return LifecycleState::Dormant;
    }

    previous_state.unwrap_or(LifecycleState::Emerging)
}

/// Outcome of applying one lifecycle evaluation to a narrative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub state: LifecycleState,
    pub changed: bool,
    pub resurrected: bool,
}

/// Apply the transition to a narrative in place: state, append-only history,
/// resurrection bookkeeping, and peak tracking. Idempotent for unchanged
/// inputs: the state settles and at most one history entry exists per
/// distinct state change.
pub fn apply_transition(
    narrative: &mut Narrative,
    inputs: &LifecycleInputs,
    now: DateTime<Utc>,
) -> TransitionOutcome {
    let previous = narrative.lifecycle_state;
    let state = next_state(inputs);
    let changed = state != previous;

    let resurrected = previous.is_resting() && state.is_active();
    if resurrected {
        narrative.reawakening_count += 1;
        narrative.reawakened_from = Some(now);
        narrative.resurrection_velocity = Some(inputs.velocity);
    }

    narrative.lifecycle_state = state;
    narrative.mention_velocity = inputs.velocity;
    narrative.momentum = inputs.momentum;

    // History: append on change, or as a heartbeat while activity continues.
    let heartbeat_due = narrative
        .lifecycle_history
        .last()
        .map(|entry| now - entry.timestamp >= Duration::hours(HISTORY_HEARTBEAT_HOURS))
        .unwrap_or(true);
    if changed || (state.is_active() && inputs.velocity > 0.0 && heartbeat_due) {
        narrative.lifecycle_history.push(LifecycleEntry {
            state,
            timestamp: now,
            article_count: inputs.article_count,
            mention_velocity: inputs.velocity,
        });
    }

    // Peak tracking: best velocity ever seen, with its size and date.
    let beats_peak = narrative
        .peak_activity
        .as_ref()
        .map(|peak| inputs.velocity > peak.velocity)
        .unwrap_or(inputs.velocity > 0.0);
    if beats_peak {
        narrative.peak_activity = Some(PeakActivity {
            date: now,
            article_count: inputs.article_count,
            velocity: inputs.velocity,
        });
    }

    TransitionOutcome {
        state,
        changed,
        resurrected,
    }
}

#[derive(Debug, Default, Clone)]
pub struct SweepStats {
    pub evaluated: u32,
    pub transitions: u32,
    pub resurrections: u32,
    pub failures: u32,
}

impl std::fmt::Display for SweepStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "evaluated={} transitions={} resurrections={} failures={}",
            self.evaluated, self.transitions, self.resurrections, self.failures
        )
    }
}

/// Periodic sweep that re-evaluates every non-archived narrative even when
/// no new articles arrived, driving the time-based transitions.
pub struct LifecycleEngine {
    reader: Arc<StoreReader>,
    writer: Arc<StoreWriter>,
}

impl LifecycleEngine {
    pub fn new(reader: Arc<StoreReader>, writer: Arc<StoreWriter>) -> Self {
        Self { reader, writer }
    }

    pub async fn sweep(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<SweepStats, ChainPulseError> {
        let now = Utc::now();
        let narratives = self.reader.non_archived_narratives().await?;
        let mut stats = SweepStats::default();

        for narrative in narratives {
            if *shutdown.borrow() {
                info!("Shutdown observed, stopping lifecycle sweep");
                break;
            }
            match self.evaluate(narrative, now).await {
                Ok(outcome) => {
                    stats.evaluated += 1;
                    if outcome.changed {
                        stats.transitions += 1;
                    }
                    if outcome.resurrected {
                        stats.resurrections += 1;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Lifecycle evaluation failed");
                    stats.failures += 1;
                }
            }
        }

        info!(%stats, "Lifecycle sweep complete");
        Ok(stats)
    }

    async fn evaluate(
        &self,
        mut narrative: Narrative,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, ChainPulseError> {
        let articles = self.reader.articles_by_ids(&narrative.article_ids).await?;
        let dates: Vec<DateTime<Utc>> = articles.iter().map(|a| a.published_at).collect();

        let inputs = LifecycleInputs {
            article_count: narrative.article_count,
            velocity: narrative_velocity(&dates, now, LOOKBACK_DAYS),
            momentum: momentum_of(&dates, now),
            days_since_update: narrative.days_since_update(now),
            previous_state: Some(narrative.lifecycle_state),
        };

        let expected_version = narrative.version;
        let outcome = apply_transition(&mut narrative, &inputs, now);
        narrative.recency_score = narrative_recency(narrative.last_updated, now);

        // The sweep only writes when something moved; an untouched narrative
        // stays byte-identical (idempotent re-runs).
        if outcome.changed || outcome.resurrected {
            narrative.version += 1;
            if !self
                .writer
                .update_narrative(&narrative, expected_version)
                .await?
            {
                return Err(ChainPulseError::IntegrityConflict(format!(
                    "narrative {} version moved during sweep",
                    narrative.id
                )));
            }
        }

        Ok(outcome)
    }
}
