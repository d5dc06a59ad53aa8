use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// --- Relevance ---

/// Article relevance tier. Tier 3 articles are excluded from signal scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceTier {
    High,
    Medium,
    Low,
}

impl RelevanceTier {
    /// Numeric form persisted in the store (1 = high, 2 = medium, 3 = low).
    pub fn as_i64(self) -> i64 {
        match self {
            RelevanceTier::High => 1,
            RelevanceTier::Medium => 2,
            RelevanceTier::Low => 3,
        }
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            1 => Some(RelevanceTier::High),
            2 => Some(RelevanceTier::Medium),
            3 => Some(RelevanceTier::Low),
            _ => None,
        }
    }

    /// Tiers 1 and 2 feed clustering and signal scoring.
    pub fn is_scorable(self) -> bool {
        !matches!(self, RelevanceTier::Low)
    }
}

impl std::fmt::Display for RelevanceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}

// --- Sentiment ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    /// Numeric mapping used by sentiment aggregation: +1 / 0 / -1.
    pub fn value(self) -> f64 {
        match self {
            Sentiment::Positive => 1.0,
            Sentiment::Neutral => 0.0,
            Sentiment::Negative => -1.0,
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sentiment::Positive => write!(f, "positive"),
            Sentiment::Neutral => write!(f, "neutral"),
            Sentiment::Negative => write!(f, "negative"),
        }
    }
}

impl std::str::FromStr for Sentiment {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "positive" => Ok(Self::Positive),
            "neutral" => Ok(Self::Neutral),
            "negative" => Ok(Self::Negative),
            other => Err(format!("unknown Sentiment: {other}")),
        }
    }
}

// --- Entity Types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Cryptocurrency,
    Blockchain,
    Protocol,
    Company,
    Organization,
    Person,
    Location,
    Concept,
    Event,
}

impl EntityType {
    /// Primary entities are the ones that accrue signal scores.
    pub fn is_primary(self) -> bool {
        matches!(
            self,
            EntityType::Cryptocurrency
                | EntityType::Blockchain
                | EntityType::Protocol
                | EntityType::Company
                | EntityType::Organization
        )
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityType::Cryptocurrency => "cryptocurrency",
            EntityType::Blockchain => "blockchain",
            EntityType::Protocol => "protocol",
            EntityType::Company => "company",
            EntityType::Organization => "organization",
            EntityType::Person => "person",
            EntityType::Location => "location",
            EntityType::Concept => "concept",
            EntityType::Event => "event",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "cryptocurrency" => Ok(Self::Cryptocurrency),
            "blockchain" => Ok(Self::Blockchain),
            "protocol" => Ok(Self::Protocol),
            "company" => Ok(Self::Company),
            "organization" => Ok(Self::Organization),
            "person" => Ok(Self::Person),
            "location" => Ok(Self::Location),
            "concept" => Ok(Self::Concept),
            "event" => Ok(Self::Event),
            other => Err(format!("unknown EntityType: {other}")),
        }
    }
}

// --- Lifecycle ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Emerging,
    Rising,
    Hot,
    Mature,
    Cooling,
    Dormant,
    Archived,
}

impl LifecycleState {
    /// Active states count toward the unique-nucleus constraint and can
    /// trigger resurrection when entered from dormant/archived.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            LifecycleState::Emerging
                | LifecycleState::Rising
                | LifecycleState::Hot
                | LifecycleState::Mature
        )
    }

    pub fn is_resting(self) -> bool {
        matches!(self, LifecycleState::Dormant | LifecycleState::Archived)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleState::Emerging => "emerging",
            LifecycleState::Rising => "rising",
            LifecycleState::Hot => "hot",
            LifecycleState::Mature => "mature",
            LifecycleState::Cooling => "cooling",
            LifecycleState::Dormant => "dormant",
            LifecycleState::Archived => "archived",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for LifecycleState {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "emerging" => Ok(Self::Emerging),
            "rising" => Ok(Self::Rising),
            "hot" => Ok(Self::Hot),
            "mature" => Ok(Self::Mature),
            "cooling" => Ok(Self::Cooling),
            "dormant" => Ok(Self::Dormant),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown LifecycleState: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Momentum {
    Growing,
    Stable,
    Declining,
    Unknown,
}

impl std::fmt::Display for Momentum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Momentum::Growing => write!(f, "growing"),
            Momentum::Stable => write!(f, "stable"),
            Momentum::Declining => write!(f, "declining"),
            Momentum::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for Momentum {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "growing" => Ok(Self::Growing),
            "stable" => Ok(Self::Stable),
            "declining" => Ok(Self::Declining),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown Momentum: {other}")),
        }
    }
}

// --- Timeframes ---

/// Signal scoring windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    H24,
    D7,
    D30,
}

impl Timeframe {
    pub fn all() -> [Timeframe; 3] {
        [Timeframe::H24, Timeframe::D7, Timeframe::D30]
    }

    pub fn hours(self) -> i64 {
        match self {
            Timeframe::H24 => 24,
            Timeframe::D7 => 7 * 24,
            Timeframe::D30 => 30 * 24,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Timeframe::H24 => "24h",
            Timeframe::D7 => "7d",
            Timeframe::D30 => "30d",
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "24h" => Ok(Self::H24),
            "7d" => Ok(Self::D7),
            "30d" => Ok(Self::D30),
            other => Err(format!("unknown Timeframe: {other}")),
        }
    }
}

// --- Articles ---

/// Input contract for ingestion adapters: the fields a source must supply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewArticle {
    pub url: String,
    pub title: String,
    pub text: String,
    pub source: String,
    pub published_at: DateTime<Utc>,
}

/// A news article. Immutable after ingestion except for enrichment fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: Uuid,
    pub url: String,
    pub title: String,
    pub text: String,
    pub source: String,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,

    // --- Enrichment written by the relevance classifier + entity extractor ---
    pub relevance_tier: Option<RelevanceTier>,
    pub relevance_reason: Option<String>,
    pub sentiment_label: Option<Sentiment>,
    /// The single most central actor of the article's story.
    pub nucleus_entity: Option<String>,
    pub actors: Vec<String>,
    /// Actor centrality, 1 (background) to 5 (the story is about them).
    pub actor_salience: BTreeMap<String, u8>,
    pub key_actions: Vec<String>,
    pub narrative_summary: Option<String>,
    /// Content-derived idempotence key: sha256(title + text + extractor version).
    pub narrative_hash: Option<String>,

    // --- Enrichment written by the clusterer ---
    pub narrative_id: Option<Uuid>,
}

impl Article {
    pub fn from_new(new: NewArticle, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: new.url,
            title: new.title,
            text: new.text,
            source: new.source,
            published_at: new.published_at,
            created_at: now,
            relevance_tier: None,
            relevance_reason: None,
            sentiment_label: None,
            nucleus_entity: None,
            actors: Vec::new(),
            actor_salience: BTreeMap::new(),
            key_actions: Vec::new(),
            narrative_summary: None,
            narrative_hash: None,
            narrative_id: None,
        }
    }

    /// An article is enriched once the extractor has stamped its content hash.
    pub fn is_enriched(&self) -> bool {
        self.narrative_hash.is_some()
    }
}

/// Deterministic idempotence key for extractor output.
/// Includes the extractor version so prompt/schema revisions re-enrich.
pub fn content_hash(title: &str, text: &str, extractor_version: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(text.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(extractor_version.as_bytes());
    hex::encode(hasher.finalize())
}

// --- Entity Mentions ---

/// One row per (article, entity) pair. Owned by the entity extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMention {
    pub article_id: Uuid,
    /// Canonical entity name (already normalized).
    pub entity: String,
    pub entity_type: EntityType,
    pub is_primary: bool,
    pub sentiment: Sentiment,
    pub confidence: f32,
    /// Propagated from the article's source for diversity counting.
    pub source: String,
    /// Equals the article's published_at, so window queries follow publication time.
    pub created_at: DateTime<Utc>,
}

// --- Narratives ---

/// Compact identity triple used for narrative similarity and deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeFingerprint {
    pub nucleus_entity: String,
    /// Up to 5 actors, ranked by salience desc, then mention count, then alpha.
    pub top_actors: Vec<String>,
    /// Up to 3 deduped action phrases.
    pub key_actions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEntry {
    pub state: LifecycleState,
    pub timestamp: DateTime<Utc>,
    pub article_count: u32,
    pub mention_velocity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakActivity {
    pub date: DateTime<Utc>,
    pub article_count: u32,
    pub velocity: f64,
}

/// The aggregate of a coherent story over a set of articles.
/// Owned exclusively by the clusterer / matcher / lifecycle engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Narrative {
    pub id: Uuid,
    pub title: String,
    pub summary: String,
    /// Deprecated legacy field. Set from the nucleus at creation, never updated.
    pub theme: String,
    /// Deduped union of actors across member articles, sorted.
    pub entities: Vec<String>,
    pub article_ids: Vec<Uuid>,
    pub article_count: u32,

    pub fingerprint: NarrativeFingerprint,

    pub lifecycle_state: LifecycleState,
    /// Append-only; the last entry's state always equals lifecycle_state.
    pub lifecycle_history: Vec<LifecycleEntry>,

    /// Articles per day over the 7-day lookback (denominator is the lookback).
    pub mention_velocity: f64,
    pub momentum: Momentum,
    pub recency_score: f64,

    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,

    pub reawakening_count: u32,
    pub reawakened_from: Option<DateTime<Utc>>,
    pub resurrection_velocity: Option<f64>,

    pub peak_activity: Option<PeakActivity>,

    /// Set on the losing side of a merge; the narrative is archived.
    pub merged_into: Option<Uuid>,

    /// Optimistic-concurrency counter, bumped on every write.
    pub version: u64,
}

impl Narrative {
    pub fn days_active(&self, now: DateTime<Utc>) -> f64 {
        (now - self.first_seen).num_seconds().max(0) as f64 / 86_400.0
    }

    pub fn days_since_update(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_updated).num_seconds().max(0) as f64 / 86_400.0
    }
}

// --- Signal Scores ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentMetrics {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    /// (max - min) / 2, normalized to [0, 1].
    pub divergence: f64,
}

/// Per-timeframe slice of a signal score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeframeMetrics {
    /// Composite score in [0, 10].
    pub score: f64,
    /// Percent growth vs the previous window (67.0 means +67%).
    pub velocity: f64,
    pub mentions: u32,
    /// Fraction of mentions in the most recent 20% of the window.
    pub recency: f64,
}

/// One row per canonical entity. Owned exclusively by the signal scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalScore {
    pub entity: String,
    pub entity_type: EntityType,
    pub first_seen: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub metrics_24h: TimeframeMetrics,
    pub metrics_7d: TimeframeMetrics,
    pub metrics_30d: TimeframeMetrics,

    /// Aggregated over the most recent window.
    pub sentiment: SentimentMetrics,
    /// Distinct sources over the window.
    pub source_count: u32,

    /// Active narratives whose entity list contains this entity.
    pub narrative_ids: Vec<Uuid>,
    /// True iff narrative_ids is empty and some timeframe score exceeds the floor.
    pub is_emerging: bool,
}

impl SignalScore {
    pub fn metrics(&self, timeframe: Timeframe) -> &TimeframeMetrics {
        match timeframe {
            Timeframe::H24 => &self.metrics_24h,
            Timeframe::D7 => &self.metrics_7d,
            Timeframe::D30 => &self.metrics_30d,
        }
    }

    pub fn metrics_mut(&mut self, timeframe: Timeframe) -> &mut TimeframeMetrics {
        match timeframe {
            Timeframe::H24 => &mut self.metrics_24h,
            Timeframe::D7 => &mut self.metrics_7d,
            Timeframe::D30 => &mut self.metrics_30d,
        }
    }
}

// --- API Costs ---

/// Append-only record of one LLM call. Cache hits are recorded with cost 0
/// so hit-rate analytics stay possible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCostRecord {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub cached: bool,
    pub cache_key: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_primary_partition() {
        assert!(EntityType::Cryptocurrency.is_primary());
        assert!(EntityType::Blockchain.is_primary());
        assert!(EntityType::Protocol.is_primary());
        assert!(EntityType::Company.is_primary());
        assert!(EntityType::Organization.is_primary());
        assert!(!EntityType::Person.is_primary());
        assert!(!EntityType::Location.is_primary());
        assert!(!EntityType::Concept.is_primary());
        assert!(!EntityType::Event.is_primary());
    }

    #[test]
    fn sentiment_value_mapping() {
        assert_eq!(Sentiment::Positive.value(), 1.0);
        assert_eq!(Sentiment::Neutral.value(), 0.0);
        assert_eq!(Sentiment::Negative.value(), -1.0);
    }

    #[test]
    fn lifecycle_state_roundtrip() {
        for s in [
            LifecycleState::Emerging,
            LifecycleState::Rising,
            LifecycleState::Hot,
            LifecycleState::Mature,
            LifecycleState::Cooling,
            LifecycleState::Dormant,
            LifecycleState::Archived,
        ] {
            let parsed: LifecycleState = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn active_states() {
        assert!(LifecycleState::Emerging.is_active());
        assert!(LifecycleState::Mature.is_active());
        assert!(!LifecycleState::Cooling.is_active());
        assert!(!LifecycleState::Dormant.is_active());
        assert!(!LifecycleState::Archived.is_active());
        assert!(LifecycleState::Dormant.is_resting());
        assert!(LifecycleState::Archived.is_resting());
        assert!(!LifecycleState::Cooling.is_resting());
    }

    #[test]
    fn timeframe_hours() {
        assert_eq!(Timeframe::H24.hours(), 24);
        assert_eq!(Timeframe::D7.hours(), 168);
        assert_eq!(Timeframe::D30.hours(), 720);
        assert_eq!("7d".parse::<Timeframe>().unwrap(), Timeframe::D7);
    }

    #[test]
    fn relevance_tier_numeric() {
        assert_eq!(RelevanceTier::High.as_i64(), 1);
        assert_eq!(RelevanceTier::from_i64(3), Some(RelevanceTier::Low));
        assert_eq!(RelevanceTier::from_i64(4), None);
        assert!(RelevanceTier::High.is_scorable());
        assert!(RelevanceTier::Medium.is_scorable());
        assert!(!RelevanceTier::Low.is_scorable());
    }

    #[test]
    fn content_hash_is_deterministic_and_version_sensitive() {
        let a = content_hash("title", "body", "v2");
        let b = content_hash("title", "body", "v2");
        let c = content_hash("title", "body", "v3");
        assert_eq!(a, b);
        assert_ne!(a, c);
        // Field boundaries matter: ("ab", "c") != ("a", "bc")
        assert_ne!(content_hash("ab", "c", "v2"), content_hash("a", "bc", "v2"));
    }

    #[test]
    fn signal_score_metrics_accessor() {
        let mut score = SignalScore {
            entity: "Bitcoin".into(),
            entity_type: EntityType::Cryptocurrency,
            first_seen: Utc::now(),
            updated_at: Utc::now(),
            metrics_24h: TimeframeMetrics::default(),
            metrics_7d: TimeframeMetrics::default(),
            metrics_30d: TimeframeMetrics::default(),
            sentiment: SentimentMetrics::default(),
            source_count: 0,
            narrative_ids: vec![],
            is_emerging: false,
        };
        score.metrics_mut(Timeframe::D7).mentions = 42;
        assert_eq!(score.metrics(Timeframe::D7).mentions, 42);
        assert_eq!(score.metrics(Timeframe::H24).mentions, 0);
    }
}
