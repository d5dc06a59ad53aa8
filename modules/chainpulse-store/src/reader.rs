use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, Utc};
use neo4rs::{query, Node};
use uuid::Uuid;

use chainpulse_common::{
    Article, ChainPulseError, EntityType, LifecycleEntry, LifecycleState, Momentum, Narrative,
    NarrativeFingerprint, PeakActivity, RelevanceTier, Sentiment, SentimentMetrics, SignalScore,
    Timeframe, TimeframeMetrics,
};

use crate::client::{db_err, format_ts, parse_ts, StoreClient};

/// One qualifying mention inside a scoring window.
#[derive(Debug, Clone)]
pub struct MentionRow {
    pub created_at: DateTime<Utc>,
    pub source: String,
    pub sentiment: Sentiment,
}

/// Read-side wrapper for the store.
pub struct StoreReader {
    client: StoreClient,
}

impl StoreReader {
    pub fn new(client: StoreClient) -> Self {
        Self { client }
    }

    /// Articles not yet stamped by the extractor, oldest first.
    pub async fn unenriched_articles(&self, limit: usize) -> Result<Vec<Article>, ChainPulseError> {
        let q = query(
            "MATCH (a:Article)
             WHERE a.narrative_hash IS NULL
             RETURN a
             ORDER BY a.published_at ASC
             LIMIT $limit",
        )
        .param("limit", limit as i64);
        self.collect_articles(q).await
    }

    /// Enriched tier-1/2 articles with a nucleus inside the clustering lookback.
    pub async fn articles_for_clustering(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Article>, ChainPulseError> {
        let q = query(
            "MATCH (a:Article)
             WHERE a.published_at >= $since
               AND a.nucleus_entity IS NOT NULL
               AND a.nucleus_entity <> ''
               AND a.relevance_tier <= 2
             RETURN a
             ORDER BY a.published_at ASC",
        )
        .param("since", format_ts(&since));
        self.collect_articles(q).await
    }

    pub async fn articles_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Article>, ChainPulseError> {
        let id_strings: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let q = query(
            "MATCH (a:Article)
             WHERE a.id IN $ids
             RETURN a",
        )
        .param("ids", id_strings);
        self.collect_articles(q).await
    }

    /// Number of mention rows already written for an article.
    pub async fn mention_count(&self, article_id: Uuid) -> Result<u32, ChainPulseError> {
        let q = query(
            "MATCH (m:EntityMention {article_id: $article_id})
             RETURN count(m) AS cnt",
        )
        .param("article_id", article_id.to_string());

        let mut stream = self.client.graph.execute(q).await.map_err(db_err)?;
        if let Some(row) = stream.next().await.map_err(db_err)? {
            let cnt: i64 = row.get("cnt").unwrap_or(0);
            return Ok(cnt as u32);
        }
        Ok(0)
    }

    /// Primary mentions for an entity within [from, to), restricted to
    /// tier-1/2 articles (the tier-3 exclusion join).
    pub async fn mention_window(
        &self,
        entity: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MentionRow>, ChainPulseError> {
        let q = query(
            "MATCH (m:EntityMention {entity: $entity, is_primary: true})
             WHERE m.created_at >= $from AND m.created_at < $to
             MATCH (a:Article {id: m.article_id})
             WHERE coalesce(a.relevance_tier, 2) <= 2
             RETURN m.created_at AS created_at, m.source AS source, m.sentiment AS sentiment",
        )
        .param("entity", entity)
        .param("from", format_ts(&from))
        .param("to", format_ts(&to));

        let mut rows = Vec::new();
        let mut stream = self.client.graph.execute(q).await.map_err(db_err)?;
        while let Some(row) = stream.next().await.map_err(db_err)? {
            let created_at: String = row.get("created_at").unwrap_or_default();
            let source: String = row.get("source").unwrap_or_default();
            let sentiment: String = row.get("sentiment").unwrap_or_default();
            let Some(created_at) = parse_ts(&created_at) else {
                continue;
            };
            rows.push(MentionRow {
                created_at,
                source,
                sentiment: sentiment.parse().unwrap_or(Sentiment::Neutral),
            });
        }
        Ok(rows)
    }

    /// Distinct primary entities (with types) mentioned since the cutoff.
    pub async fn entities_mentioned_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, EntityType)>, ChainPulseError> {
        let q = query(
            "MATCH (m:EntityMention {is_primary: true})
             WHERE m.created_at >= $since
             RETURN DISTINCT m.entity AS entity, m.entity_type AS entity_type",
        )
        .param("since", format_ts(&since));

        let mut out = Vec::new();
        let mut stream = self.client.graph.execute(q).await.map_err(db_err)?;
        while let Some(row) = stream.next().await.map_err(db_err)? {
            let entity: String = row.get("entity").unwrap_or_default();
            let type_str: String = row.get("entity_type").unwrap_or_default();
            if entity.is_empty() {
                continue;
            }
            let Ok(entity_type) = type_str.parse() else {
                continue;
            };
            out.push((entity, entity_type));
        }
        Ok(out)
    }

    pub async fn narrative_by_id(&self, id: Uuid) -> Result<Option<Narrative>, ChainPulseError> {
        let q = query("MATCH (n:Narrative {id: $id}) RETURN n").param("id", id.to_string());
        Ok(self.collect_narratives(q).await?.into_iter().next())
    }

    /// Top-K non-archived narratives sharing a nucleus, freshest first.
    pub async fn candidate_narratives(
        &self,
        nucleus: &str,
        k: usize,
    ) -> Result<Vec<Narrative>, ChainPulseError> {
        let q = query(
            "MATCH (n:Narrative {nucleus_entity: $nucleus})
             WHERE n.lifecycle_state <> 'archived'
             RETURN n
             ORDER BY n.last_updated DESC
             LIMIT $k",
        )
        .param("nucleus", nucleus)
        .param("k", k as i64);
        self.collect_narratives(q).await
    }

    pub async fn non_archived_narratives(&self) -> Result<Vec<Narrative>, ChainPulseError> {
        let q = query(
            "MATCH (n:Narrative)
             WHERE n.lifecycle_state <> 'archived'
             RETURN n
             ORDER BY n.last_updated DESC",
        );
        self.collect_narratives(q).await
    }

    /// Listing: non-archived narratives, optionally filtered by state.
    pub async fn active_narratives(
        &self,
        limit: usize,
        state: Option<LifecycleState>,
    ) -> Result<Vec<Narrative>, ChainPulseError> {
        let q = match state {
            Some(state) => query(
                "MATCH (n:Narrative {lifecycle_state: $state})
                 WHERE n.lifecycle_state <> 'archived'
                 RETURN n ORDER BY n.last_updated DESC LIMIT $limit",
            )
            .param("state", state.to_string()),
            None => query(
                "MATCH (n:Narrative)
                 WHERE n.lifecycle_state <> 'archived'
                 RETURN n ORDER BY n.last_updated DESC LIMIT $limit",
            ),
        }
        .param("limit", limit as i64);
        self.collect_narratives(q).await
    }

    /// Listing: dormant/archived narratives last touched within N days.
    pub async fn archived_narratives(
        &self,
        days: i64,
        limit: usize,
    ) -> Result<Vec<Narrative>, ChainPulseError> {
        let cutoff = Utc::now() - Duration::days(days);
        let q = query(
            "MATCH (n:Narrative)
             WHERE n.lifecycle_state IN ['dormant', 'archived']
               AND n.last_updated >= $cutoff
             RETURN n ORDER BY n.last_updated DESC LIMIT $limit",
        )
        .param("cutoff", format_ts(&cutoff))
        .param("limit", limit as i64);
        self.collect_narratives(q).await
    }

    /// Listing: narratives that came back from dormant/archived recently.
    pub async fn resurrected_narratives(
        &self,
        days: i64,
        limit: usize,
    ) -> Result<Vec<Narrative>, ChainPulseError> {
        let cutoff = Utc::now() - Duration::days(days);
        let q = query(
            "MATCH (n:Narrative)
             WHERE n.reawakening_count >= 1
               AND n.reawakened_from >= $cutoff
             RETURN n ORDER BY n.reawakened_from DESC LIMIT $limit",
        )
        .param("cutoff", format_ts(&cutoff))
        .param("limit", limit as i64);
        self.collect_narratives(q).await
    }

    pub async fn signal_score(&self, entity: &str) -> Result<Option<SignalScore>, ChainPulseError> {
        let q = query("MATCH (s:SignalScore {entity: $entity}) RETURN s").param("entity", entity);
        Ok(self.collect_signals(q).await?.into_iter().next())
    }

    /// Listing: top signal scores for a timeframe, optionally filtered by type.
    pub async fn trending_signals(
        &self,
        timeframe: Timeframe,
        limit: usize,
        entity_type: Option<EntityType>,
    ) -> Result<Vec<SignalScore>, ChainPulseError> {
        let score_field = format!("score_{}", timeframe.label());
        let cypher = match entity_type {
            Some(_) => format!(
                "MATCH (s:SignalScore {{entity_type: $entity_type}})
                 WHERE s.{score_field} > 0
                 RETURN s ORDER BY s.{score_field} DESC LIMIT $limit"
            ),
            None => format!(
                "MATCH (s:SignalScore)
                 WHERE s.{score_field} > 0
                 RETURN s ORDER BY s.{score_field} DESC LIMIT $limit"
            ),
        };
        let mut q = query(&cypher).param("limit", limit as i64);
        if let Some(entity_type) = entity_type {
            q = q.param("entity_type", entity_type.to_string());
        }
        self.collect_signals(q).await
    }

    /// Spend since midnight UTC.
    pub async fn daily_cost_summary(&self) -> Result<CostSummary, ChainPulseError> {
        let now = Utc::now();
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or(now);
        self.cost_summary_since(midnight).await
    }

    /// Spend since the first of the current month (UTC).
    pub async fn monthly_cost_summary(&self) -> Result<CostSummary, ChainPulseError> {
        let now = Utc::now();
        let first = now
            .date_naive()
            .with_day(1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
            .unwrap_or(now);
        self.cost_summary_since(first).await
    }

    /// Total LLM spend and cache hits since the cutoff (cost analytics).
    pub async fn cost_summary_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<CostSummary, ChainPulseError> {
        let q = query(
            "MATCH (c:ApiCost)
             WHERE c.timestamp >= $since
             RETURN sum(c.cost_usd) AS total_usd,
                    count(c) AS calls,
                    sum(CASE WHEN c.cached THEN 1 ELSE 0 END) AS cache_hits",
        )
        .param("since", format_ts(&since));

        let mut stream = self.client.graph.execute(q).await.map_err(db_err)?;
        if let Some(row) = stream.next().await.map_err(db_err)? {
            return Ok(CostSummary {
                total_usd: row.get("total_usd").unwrap_or(0.0),
                calls: row.get::<i64>("calls").unwrap_or(0) as u64,
                cache_hits: row.get::<i64>("cache_hits").unwrap_or(0) as u64,
            });
        }
        Ok(CostSummary::default())
    }

    // --- collection helpers ---

    async fn collect_articles(&self, q: neo4rs::Query) -> Result<Vec<Article>, ChainPulseError> {
        let mut out = Vec::new();
        let mut stream = self.client.graph.execute(q).await.map_err(db_err)?;
        while let Some(row) = stream.next().await.map_err(db_err)? {
            if let Ok(node) = row.get::<Node>("a") {
                if let Some(article) = node_to_article(&node) {
                    out.push(article);
                }
            }
        }
        Ok(out)
    }

    async fn collect_narratives(
        &self,
        q: neo4rs::Query,
    ) -> Result<Vec<Narrative>, ChainPulseError> {
        let mut out = Vec::new();
        let mut stream = self.client.graph.execute(q).await.map_err(db_err)?;
        while let Some(row) = stream.next().await.map_err(db_err)? {
            if let Ok(node) = row.get::<Node>("n") {
                if let Some(narrative) = node_to_narrative(&node) {
                    out.push(narrative);
                }
            }
        }
        Ok(out)
    }

    async fn collect_signals(&self, q: neo4rs::Query) -> Result<Vec<SignalScore>, ChainPulseError> {
        let mut out = Vec::new();
        let mut stream = self.client.graph.execute(q).await.map_err(db_err)?;
        while let Some(row) = stream.next().await.map_err(db_err)? {
            if let Ok(node) = row.get::<Node>("s") {
                if let Some(signal) = node_to_signal(&node) {
                    out.push(signal);
                }
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CostSummary {
    pub total_usd: f64,
    pub calls: u64,
    pub cache_hits: u64,
}

// --- node mapping ---

fn get_string(node: &Node, key: &str) -> String {
    node.get::<String>(key).unwrap_or_default()
}

fn get_opt_string(node: &Node, key: &str) -> Option<String> {
    node.get::<String>(key).ok().filter(|s| !s.is_empty())
}

fn get_ts(node: &Node, key: &str) -> Option<DateTime<Utc>> {
    parse_ts(&get_string(node, key))
}

fn get_uuid(node: &Node, key: &str) -> Option<Uuid> {
    Uuid::parse_str(&get_string(node, key)).ok()
}

pub(crate) fn node_to_article(node: &Node) -> Option<Article> {
    let id = get_uuid(node, "id")?;
    let published_at = get_ts(node, "published_at")?;
    let created_at = get_ts(node, "created_at").unwrap_or(published_at);

    let salience_json = get_string(node, "actor_salience");
    let actor_salience: BTreeMap<String, u8> = if salience_json.is_empty() {
        BTreeMap::new()
    } else {
        serde_json::from_str(&salience_json).unwrap_or_default()
    };

    Some(Article {
        id,
        url: get_string(node, "url"),
        title: get_string(node, "title"),
        text: get_string(node, "text"),
        source: get_string(node, "source"),
        published_at,
        created_at,
        relevance_tier: node
            .get::<i64>("relevance_tier")
            .ok()
            .and_then(RelevanceTier::from_i64),
        relevance_reason: get_opt_string(node, "relevance_reason"),
        sentiment_label: get_opt_string(node, "sentiment_label").and_then(|s| s.parse().ok()),
        nucleus_entity: get_opt_string(node, "nucleus_entity"),
        actors: node.get::<Vec<String>>("actors").unwrap_or_default(),
        actor_salience,
        key_actions: node.get::<Vec<String>>("key_actions").unwrap_or_default(),
        narrative_summary: get_opt_string(node, "narrative_summary"),
        narrative_hash: get_opt_string(node, "narrative_hash"),
        narrative_id: get_opt_string(node, "narrative_id").and_then(|s| Uuid::parse_str(&s).ok()),
    })
}

pub(crate) fn node_to_narrative(node: &Node) -> Option<Narrative> {
    let id = get_uuid(node, "id")?;
    let first_seen = get_ts(node, "first_seen")?;
    let last_updated = get_ts(node, "last_updated").unwrap_or(first_seen);

    let history_json = get_string(node, "lifecycle_history");
    let lifecycle_history: Vec<LifecycleEntry> = if history_json.is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(&history_json).unwrap_or_default()
    };

    let peak_json = get_string(node, "peak_activity");
    let peak_activity: Option<PeakActivity> = if peak_json.is_empty() {
        None
    } else {
        serde_json::from_str(&peak_json).ok()
    };

    Some(Narrative {
        id,
        title: get_string(node, "title"),
        summary: get_string(node, "summary"),
        theme: get_string(node, "theme"),
        entities: node.get::<Vec<String>>("entities").unwrap_or_default(),
        article_ids: node
            .get::<Vec<String>>("article_ids")
            .unwrap_or_default()
            .iter()
            .filter_map(|s| Uuid::parse_str(s).ok())
            .collect(),
        article_count: node.get::<i64>("article_count").unwrap_or(0) as u32,
        fingerprint: NarrativeFingerprint {
            nucleus_entity: get_string(node, "nucleus_entity"),
            top_actors: node.get::<Vec<String>>("top_actors").unwrap_or_default(),
            key_actions: node.get::<Vec<String>>("key_actions").unwrap_or_default(),
            timestamp: get_ts(node, "fingerprint_at").unwrap_or(last_updated),
        },
        lifecycle_state: get_string(node, "lifecycle_state")
            .parse()
            .unwrap_or(LifecycleState::Emerging),
        lifecycle_history,
        mention_velocity: node.get::<f64>("mention_velocity").unwrap_or(0.0),
        momentum: get_string(node, "momentum").parse().unwrap_or(Momentum::Unknown),
        recency_score: node.get::<f64>("recency_score").unwrap_or(0.0),
        first_seen,
        last_updated,
        reawakening_count: node.get::<i64>("reawakening_count").unwrap_or(0) as u32,
        reawakened_from: get_ts(node, "reawakened_from"),
        resurrection_velocity: node
            .get::<f64>("resurrection_velocity")
            .ok()
            .filter(|v| *v > 0.0),
        peak_activity,
        merged_into: get_opt_string(node, "merged_into").and_then(|s| Uuid::parse_str(&s).ok()),
        version: node.get::<i64>("version").unwrap_or(0) as u64,
    })
}

pub(crate) fn node_to_signal(node: &Node) -> Option<SignalScore> {
    let entity = get_opt_string(node, "entity")?;
    let first_seen = get_ts(node, "first_seen")?;

    let tf = |label: &str| TimeframeMetrics {
        score: node.get::<f64>(&format!("score_{label}")).unwrap_or(0.0),
        velocity: node.get::<f64>(&format!("velocity_{label}")).unwrap_or(0.0),
        mentions: node.get::<i64>(&format!("mentions_{label}")).unwrap_or(0) as u32,
        recency: node.get::<f64>(&format!("recency_{label}")).unwrap_or(0.0),
    };

    Some(SignalScore {
        entity,
        entity_type: get_string(node, "entity_type")
            .parse()
            .unwrap_or(EntityType::Concept),
        first_seen,
        updated_at: get_ts(node, "updated_at").unwrap_or(first_seen),
        metrics_24h: tf("24h"),
        metrics_7d: tf("7d"),
        metrics_30d: tf("30d"),
        sentiment: SentimentMetrics {
            avg: node.get::<f64>("sentiment_avg").unwrap_or(0.0),
            min: node.get::<f64>("sentiment_min").unwrap_or(0.0),
            max: node.get::<f64>("sentiment_max").unwrap_or(0.0),
            divergence: node.get::<f64>("sentiment_divergence").unwrap_or(0.0),
        },
        source_count: node.get::<i64>("source_count").unwrap_or(0) as u32,
        narrative_ids: node
            .get::<Vec<String>>("narrative_ids")
            .unwrap_or_default()
            .iter()
            .filter_map(|s| Uuid::parse_str(s).ok())
            .collect(),
        is_emerging: node.get::<bool>("is_emerging").unwrap_or(false),
    })
}
