use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Raw model output for one extraction batch. Field types are deliberately
/// loose (strings, unclamped ints); `validate` converts them to domain types
/// and rejects malformed articles individually.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BatchExtraction {
    /// One entry per delimited article, in any order; `index` links back.
    pub articles: Vec<ArticleExtraction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ArticleExtraction {
    /// Ordinal of the article inside the batch prompt (0-based).
    pub index: usize,
    pub entities: Vec<ExtractedEntity>,
    /// "positive" | "neutral" | "negative"
    pub sentiment: String,
    /// The single most central actor. Must be non-empty.
    pub nucleus_entity: String,
    pub actors: Vec<String>,
    /// Actor -> centrality 1..=5.
    pub actor_salience: BTreeMap<String, i64>,
    /// Short action phrases ("filed lawsuit", "paused withdrawals").
    pub key_actions: Vec<String>,
    /// 1-2 sentence summary of the story this article tells.
    pub narrative_summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedEntity {
    pub value: String,
    /// One of: cryptocurrency, blockchain, protocol, company, organization,
    /// person, location, concept, event.
    pub entity_type: String,
    /// [0, 1]
    pub confidence: f64,
}
