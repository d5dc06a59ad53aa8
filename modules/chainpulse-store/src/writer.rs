use chrono::{DateTime, Utc};
use neo4rs::query;
use tracing::debug;
use uuid::Uuid;

use chainpulse_common::{
    ApiCostRecord, ChainPulseError, EntityMention, EntityType, Narrative, NewArticle,
    RelevanceTier, Sentiment, SentimentMetrics, Timeframe, TimeframeMetrics,
};

use crate::client::{db_err, format_ts, StoreClient};

/// Enrichment payload written onto an article by the entity extractor.
#[derive(Debug, Clone)]
pub struct ArticleEnrichment {
    pub sentiment: Sentiment,
    pub nucleus_entity: String,
    pub actors: Vec<String>,
    /// actor -> salience (1..=5), serialized as JSON on the node.
    pub actor_salience_json: String,
    pub key_actions: Vec<String>,
    pub narrative_summary: String,
    pub narrative_hash: String,
}

/// Write-side wrapper for the store. All mutation goes through here.
pub struct StoreWriter {
    client: StoreClient,
}

impl StoreWriter {
    pub fn new(client: StoreClient) -> Self {
        Self { client }
    }

    /// Idempotent article ingest keyed on URL. Returns (id, novelty).
    pub async fn upsert_article(
        &self,
        article: &NewArticle,
        now: DateTime<Utc>,
    ) -> Result<(Uuid, bool), ChainPulseError> {
        let candidate_id = Uuid::new_v4();
        let q = query(
            "MERGE (a:Article {url: $url})
             ON CREATE SET a.id = $id,
                           a.title = $title,
                           a.text = $text,
                           a.source = $source,
                           a.published_at = $published_at,
                           a.created_at = $now
             RETURN a.id AS id, a.created_at = $now AS novel",
        )
        .param("url", article.url.as_str())
        .param("id", candidate_id.to_string())
        .param("title", article.title.as_str())
        .param("text", article.text.as_str())
        .param("source", article.source.as_str())
        .param("published_at", format_ts(&article.published_at))
        .param("now", format_ts(&now));

        let mut stream = self.client.graph.execute(q).await.map_err(db_err)?;
        if let Some(row) = stream.next().await.map_err(db_err)? {
            let id_str: String = row.get("id").unwrap_or_default();
            let novel: bool = row.get("novel").unwrap_or(false);
            let id = Uuid::parse_str(&id_str)
                .map_err(|e| ChainPulseError::Database(format!("bad article id: {e}")))?;
            return Ok((id, novel));
        }
        Err(ChainPulseError::Database(
            "article upsert returned no row".to_string(),
        ))
    }

    /// Persist the relevance tier assigned at ingestion.
    pub async fn set_relevance(
        &self,
        article_id: Uuid,
        tier: RelevanceTier,
        reason: &str,
    ) -> Result<(), ChainPulseError> {
        let q = query(
            "MATCH (a:Article {id: $id})
             SET a.relevance_tier = $tier, a.relevance_reason = $reason",
        )
        .param("id", article_id.to_string())
        .param("tier", tier.as_i64())
        .param("reason", reason);

        self.client.graph.run(q).await.map_err(db_err)
    }

    /// Write extractor output onto the article. Owned by the entity extractor;
    /// the narrative_hash stamp makes re-extraction a no-op.
    pub async fn write_enrichment(
        &self,
        article_id: Uuid,
        enrichment: &ArticleEnrichment,
    ) -> Result<(), ChainPulseError> {
        let q = query(
            "MATCH (a:Article {id: $id})
             SET a.sentiment_label = $sentiment,
                 a.nucleus_entity = $nucleus,
                 a.actors = $actors,
                 a.actor_salience = $salience,
                 a.key_actions = $key_actions,
                 a.narrative_summary = $summary,
                 a.narrative_hash = $hash",
        )
        .param("id", article_id.to_string())
        .param("sentiment", enrichment.sentiment.to_string())
        .param("nucleus", enrichment.nucleus_entity.as_str())
        .param("actors", enrichment.actors.clone())
        .param("salience", enrichment.actor_salience_json.as_str())
        .param("key_actions", enrichment.key_actions.clone())
        .param("summary", enrichment.narrative_summary.as_str())
        .param("hash", enrichment.narrative_hash.as_str());

        self.client.graph.run(q).await.map_err(db_err)
    }

    /// Upsert one (article, entity) mention. At most one row per pair.
    pub async fn upsert_mention(&self, mention: &EntityMention) -> Result<(), ChainPulseError> {
        let pair_key = format!("{}:{}", mention.article_id, mention.entity);
        let q = query(
            "MERGE (m:EntityMention {pair_key: $pair_key})
             SET m.article_id = $article_id,
                 m.entity = $entity,
                 m.entity_type = $entity_type,
                 m.is_primary = $is_primary,
                 m.sentiment = $sentiment,
                 m.confidence = $confidence,
                 m.source = $source,
                 m.created_at = $created_at",
        )
        .param("pair_key", pair_key)
        .param("article_id", mention.article_id.to_string())
        .param("entity", mention.entity.as_str())
        .param("entity_type", mention.entity_type.to_string())
        .param("is_primary", mention.is_primary)
        .param("sentiment", mention.sentiment.to_string())
        .param("confidence", mention.confidence as f64)
        .param("source", mention.source.as_str())
        .param("created_at", format_ts(&mention.created_at));

        self.client.graph.run(q).await.map_err(db_err)
    }

    /// Point an article at the narrative that absorbed it.
    pub async fn set_article_narrative(
        &self,
        article_id: Uuid,
        narrative_id: Uuid,
    ) -> Result<(), ChainPulseError> {
        let q = query("MATCH (a:Article {id: $id}) SET a.narrative_id = $narrative_id")
            .param("id", article_id.to_string())
            .param("narrative_id", narrative_id.to_string());
        self.client.graph.run(q).await.map_err(db_err)
    }

    /// Create a narrative. Fails with IntegrityConflict if a non-archived
    /// narrative with the same nucleus already exists (unique sparse index);
    /// callers fall back to attach.
    pub async fn create_narrative(&self, narrative: &Narrative) -> Result<(), ChainPulseError> {
        let q = narrative_set_query(
            "CREATE (n:Narrative {id: $id})
             SET n.theme = $theme, n.first_seen = $first_seen, ",
            "",
            narrative,
        );
        self.client.graph.run(q).await.map_err(db_err)?;
        debug!(narrative = %narrative.id, nucleus = %narrative.fingerprint.nucleus_entity, "Narrative created");
        Ok(())
    }

    /// Versioned narrative update (optimistic concurrency). Returns false when
    /// the expected version no longer matches; callers re-read and retry.
    pub async fn update_narrative(
        &self,
        narrative: &Narrative,
        expected_version: u64,
    ) -> Result<bool, ChainPulseError> {
        // The SET clause writes narrative.version (already bumped by the
        // caller); the RETURN tells us whether the version guard matched.
        let q = narrative_set_query(
            "MATCH (n:Narrative {id: $id})
             WHERE n.version = $expected_version
             SET ",
            "\n             RETURN n.id AS id",
            narrative,
        )
        .param("expected_version", expected_version as i64);

        let mut stream = self.client.graph.execute(q).await.map_err(db_err)?;
        Ok(stream.next().await.map_err(db_err)?.is_some())
    }

    /// Append one ApiCostRecord. Append-only by construction.
    pub async fn record_cost(&self, record: &ApiCostRecord) -> Result<(), ChainPulseError> {
        let q = query(
            "CREATE (c:ApiCost {
                timestamp: $timestamp,
                operation: $operation,
                model: $model,
                input_tokens: $input_tokens,
                output_tokens: $output_tokens,
                cost_usd: $cost_usd,
                cached: $cached,
                cache_key: $cache_key
            })",
        )
        .param("timestamp", format_ts(&record.timestamp))
        .param("operation", record.operation.as_str())
        .param("model", record.model.as_str())
        .param("input_tokens", record.input_tokens as i64)
        .param("output_tokens", record.output_tokens as i64)
        .param("cost_usd", record.cost_usd)
        .param("cached", record.cached)
        .param("cache_key", record.cache_key.clone().unwrap_or_default());

        self.client.graph.run(q).await.map_err(db_err)
    }

    /// Upsert one timeframe slice of a signal score, leaving the other
    /// timeframes untouched (field-level partial update).
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_signal_timeframe(
        &self,
        entity: &str,
        entity_type: EntityType,
        timeframe: Timeframe,
        metrics: &TimeframeMetrics,
        sentiment: &SentimentMetrics,
        source_count: u32,
        now: DateTime<Utc>,
    ) -> Result<(), ChainPulseError> {
        let label = timeframe.label();
        let cypher = format!(
            "MERGE (s:SignalScore {{entity: $entity}})
             ON CREATE SET s.first_seen = $now,
                           s.narrative_ids = [],
                           s.is_emerging = false
             SET s.entity_type = $entity_type,
                 s.updated_at = $now,
                 s.score_{label} = $score,
                 s.velocity_{label} = $velocity,
                 s.mentions_{label} = $mentions,
                 s.recency_{label} = $recency,
                 s.sentiment_avg = $sentiment_avg,
                 s.sentiment_min = $sentiment_min,
                 s.sentiment_max = $sentiment_max,
                 s.sentiment_divergence = $sentiment_divergence,
                 s.source_count = $source_count"
        );
        let q = query(&cypher)
            .param("entity", entity)
            .param("entity_type", entity_type.to_string())
            .param("now", format_ts(&now))
            .param("score", metrics.score)
            .param("velocity", metrics.velocity)
            .param("mentions", metrics.mentions as i64)
            .param("recency", metrics.recency)
            .param("sentiment_avg", sentiment.avg)
            .param("sentiment_min", sentiment.min)
            .param("sentiment_max", sentiment.max)
            .param("sentiment_divergence", sentiment.divergence)
            .param("source_count", source_count as i64);

        self.client.graph.run(q).await.map_err(db_err)
    }

    /// Refresh narrative membership for an entity's signal row.
    pub async fn set_signal_narratives(
        &self,
        entity: &str,
        narrative_ids: &[Uuid],
        is_emerging: bool,
    ) -> Result<(), ChainPulseError> {
        let ids: Vec<String> = narrative_ids.iter().map(|id| id.to_string()).collect();
        let q = query(
            "MATCH (s:SignalScore {entity: $entity})
             SET s.narrative_ids = $ids, s.is_emerging = $is_emerging",
        )
        .param("entity", entity)
        .param("ids", ids)
        .param("is_emerging", is_emerging);

        self.client.graph.run(q).await.map_err(db_err)
    }
}

/// Shared SET clause for narrative create/update so the two stay in sync.
/// `prefix` must end where the SET list begins; `suffix` may add a RETURN.
fn narrative_set_query(prefix: &str, suffix: &str, n: &Narrative) -> neo4rs::Query {
    let set_fields = "n.title = $title,
             n.summary = $summary,
             n.entities = $entities,
             n.article_ids = $article_ids,
             n.article_count = $article_count,
             n.nucleus_entity = $nucleus_entity,
             n.active_nucleus = $active_nucleus,
             n.top_actors = $top_actors,
             n.key_actions = $key_actions,
             n.fingerprint_at = $fingerprint_at,
             n.lifecycle_state = $lifecycle_state,
             n.lifecycle_history = $lifecycle_history,
             n.mention_velocity = $mention_velocity,
             n.momentum = $momentum,
             n.recency_score = $recency_score,
             n.last_updated = $last_updated,
             n.reawakening_count = $reawakening_count,
             n.reawakened_from = $reawakened_from,
             n.resurrection_velocity = $resurrection_velocity,
             n.peak_activity = $peak_activity,
             n.merged_into = $merged_into,
             n.version = $version";

    let cypher = format!("{prefix}{set_fields}{suffix}");

    // The sparse unique index lives on active_nucleus: archived narratives
    // release their nucleus by nulling the property (the constraint ignores nulls).
    let active_nucleus: Option<String> =
        if n.lifecycle_state == chainpulse_common::LifecycleState::Archived {
            None
        } else {
            Some(n.fingerprint.nucleus_entity.clone())
        };

    query(&cypher)
        .param("id", n.id.to_string())
        .param("theme", n.theme.as_str())
        .param("first_seen", format_ts(&n.first_seen))
        .param("title", n.title.as_str())
        .param("summary", n.summary.as_str())
        .param("entities", n.entities.clone())
        .param(
            "article_ids",
            n.article_ids.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
        )
        .param("article_count", n.article_count as i64)
        .param("nucleus_entity", n.fingerprint.nucleus_entity.as_str())
        .param("active_nucleus", active_nucleus)
        .param("top_actors", n.fingerprint.top_actors.clone())
        .param("key_actions", n.fingerprint.key_actions.clone())
        .param("fingerprint_at", format_ts(&n.fingerprint.timestamp))
        .param("lifecycle_state", n.lifecycle_state.to_string())
        .param(
            "lifecycle_history",
            serde_json::to_string(&n.lifecycle_history).unwrap_or_else(|_| "[]".to_string()),
        )
        .param("mention_velocity", n.mention_velocity)
        .param("momentum", n.momentum.to_string())
        .param("recency_score", n.recency_score)
        .param("last_updated", format_ts(&n.last_updated))
        .param("reawakening_count", n.reawakening_count as i64)
        .param(
            "reawakened_from",
            n.reawakened_from.map(|t| format_ts(&t)).unwrap_or_default(),
        )
        .param("resurrection_velocity", n.resurrection_velocity.unwrap_or(0.0))
        .param(
            "peak_activity",
            n.peak_activity
                .as_ref()
                .and_then(|p| serde_json::to_string(p).ok())
                .unwrap_or_default(),
        )
        .param(
            "merged_into",
            n.merged_into.map(|id| id.to_string()).unwrap_or_default(),
        )
        .param("version", n.version as i64)
}
