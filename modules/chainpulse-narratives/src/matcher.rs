use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use ai_client::Claude;
use chainpulse_common::{
    Article, ChainPulseError, LifecycleState, Momentum, Narrative, NarrativeFingerprint,
};
use chainpulse_extract::CostTracker;
use chainpulse_store::{StoreReader, StoreWriter};

use crate::cluster::{build_clusters, ArticleCluster};
use crate::fingerprint::{compute_fingerprint, merge_threshold, similarity};
use crate::lifecycle::{
    apply_transition, momentum_of, narrative_recency, narrative_velocity, LifecycleInputs,
};

/// How many candidate narratives are fetched per cluster nucleus.
const CANDIDATE_K: usize = 5;

/// Optimistic-concurrency attempts before a cluster is deferred to the next cycle.
const MAX_WRITE_ATTEMPTS: u32 = 3;

const VELOCITY_LOOKBACK_DAYS: i64 = 7;

/// What happened to one candidate cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterOutcome {
    Attached(Uuid),
    Created(Uuid),
}

#[derive(Debug, Default, Clone)]
pub struct ClusterRunStats {
    pub clusters: u32,
    pub attached: u32,
    pub created: u32,
    pub merged: u32,
    pub failures: u32,
}

impl std::fmt::Display for ClusterRunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "clusters={} attached={} created={} merged={} failures={}",
            self.clusters, self.attached, self.created, self.merged, self.failures
        )
    }
}

/// Matches candidate clusters against existing narratives: attach when a
/// fingerprint is similar enough, create otherwise, and periodically merge
/// near-duplicate narratives. Sole owner of the narratives collection
/// together with the lifecycle engine.
pub struct NarrativeMatcher {
    reader: Arc<StoreReader>,
    writer: Arc<StoreWriter>,
    /// Narrative-quality model for titles/summaries; None falls back to
    /// article-derived labels (and keeps tests offline).
    claude: Option<Claude>,
    cost: CostTracker,
    lookback_hours: i64,
    min_cluster_size: usize,
    merge_recent: f64,
    merge_old: f64,
}

impl NarrativeMatcher {
    pub fn new(
        reader: Arc<StoreReader>,
        writer: Arc<StoreWriter>,
        claude: Option<Claude>,
        lookback_hours: i64,
        min_cluster_size: usize,
        merge_recent: f64,
        merge_old: f64,
    ) -> Self {
        Self {
            cost: CostTracker::new(Arc::clone(&writer)),
            reader,
            writer,
            claude,
            lookback_hours,
            min_cluster_size,
            merge_recent,
            merge_old,
        }
    }

    /// One cluster-job run: re-cluster the lookback window, assign every
    /// cluster, then run the merger pass.
    pub async fn run(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<ClusterRunStats, ChainPulseError> {
        let now = Utc::now();
        let since = now - Duration::hours(self.lookback_hours);
        let articles = self.reader.articles_for_clustering(since).await?;
        let clusters = build_clusters(articles, self.min_cluster_size);

        let mut stats = ClusterRunStats {
            clusters: clusters.len() as u32,
            ..Default::default()
        };
        if clusters.is_empty() {
            return Ok(stats);
        }
        info!(clusters = clusters.len(), "Cluster run starting");

        for cluster in &clusters {
            if *shutdown.borrow() {
                info!("Shutdown observed, stopping cluster run");
                break;
            }
            match self.assign_cluster(cluster, now).await {
                Ok(ClusterOutcome::Attached(_)) => stats.attached += 1,
                Ok(ClusterOutcome::Created(_)) => stats.created += 1,
                Err(e) => {
                    // Deferred to the next cycle; the window query re-finds it.
                    warn!(nucleus = %cluster.nucleus, error = %e, "Cluster assignment failed");
                    stats.failures += 1;
                }
            }
        }

        stats.merged = self.merge_pass(now).await?;
        info!(%stats, "Cluster run complete");
        Ok(stats)
    }

    /// Attach the cluster to the best-matching narrative, or create a new one.
    pub async fn assign_cluster(
        &self,
        cluster: &ArticleCluster,
        now: DateTime<Utc>,
    ) -> Result<ClusterOutcome, ChainPulseError> {
        let refs: Vec<&Article> = cluster.articles.iter().collect();
        let fingerprint = compute_fingerprint(&refs, now);

        let candidates = self
            .reader
            .candidate_narratives(&cluster.nucleus, CANDIDATE_K)
            .await?;

        if let Some(target) = pick_candidate(
            &fingerprint,
            &candidates,
            now,
            self.merge_recent,
            self.merge_old,
        ) {
            let id = target.id;
            self.attach(id, cluster, now).await?;
            return Ok(ClusterOutcome::Attached(id));
        }

        match self.create(cluster, fingerprint, now).await {
            Ok(id) => Ok(ClusterOutcome::Created(id)),
            Err(ChainPulseError::IntegrityConflict(_)) => {
                // Another cycle created the nucleus first; attach to it.
                let existing = self
                    .reader
                    .candidate_narratives(&cluster.nucleus, 1)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        ChainPulseError::IntegrityConflict(format!(
                            "nucleus '{}' taken but no narrative found",
                            cluster.nucleus
                        ))
                    })?;
                self.attach(existing.id, cluster, now).await?;
                Ok(ClusterOutcome::Attached(existing.id))
            }
            Err(e) => Err(e),
        }
    }

    /// Append the cluster's articles to a narrative, recompute its aggregate
    /// fields, and write with a version guard. Conflicts re-read and retry.
    async fn attach(
        &self,
        narrative_id: Uuid,
        cluster: &ArticleCluster,
        now: DateTime<Utc>,
    ) -> Result<(), ChainPulseError> {
        for attempt in 0..MAX_WRITE_ATTEMPTS {
            let Some(mut narrative) = self.reader.narrative_by_id(narrative_id).await? else {
                return Err(ChainPulseError::Database(format!(
                    "narrative {narrative_id} vanished during attach"
                )));
            };
            let expected_version = narrative.version;

            let mut seen: HashSet<Uuid> = narrative.article_ids.iter().copied().collect();
            let new_ids: Vec<Uuid> = cluster
                .articles
                .iter()
                .map(|a| a.id)
                .filter(|id| seen.insert(*id))
                .collect();
            narrative.article_ids.extend(new_ids.iter().copied());
            narrative.article_count = narrative.article_ids.len() as u32;

            // Aggregates are recomputed over the full member set so the
            // entities/fingerprint invariants hold after every attach.
            let members = self.reader.articles_by_ids(&narrative.article_ids).await?;
            let member_refs: Vec<&Article> = members.iter().collect();
            narrative.entities = entity_union(&member_refs);
            let mut fingerprint = compute_fingerprint(&member_refs, now);
            // The nucleus is the narrative's stable identity; a shifted
            // cluster composition must not move it.
            fingerprint.nucleus_entity = narrative.fingerprint.nucleus_entity.clone();
            narrative.fingerprint = fingerprint;

            let dates: Vec<DateTime<Utc>> = members.iter().map(|a| a.published_at).collect();
            let inputs = LifecycleInputs {
                article_count: narrative.article_count,
                velocity: narrative_velocity(&dates, now, VELOCITY_LOOKBACK_DAYS),
                momentum: momentum_of(&dates, now),
                days_since_update: narrative.days_since_update(now),
                previous_state: Some(narrative.lifecycle_state),
            };
            apply_transition(&mut narrative, &inputs, now);
            narrative.last_updated = now;
            narrative.recency_score = narrative_recency(now, now);
            narrative.version += 1;

            if self
                .writer
                .update_narrative(&narrative, expected_version)
                .await?
            {
                for article_id in new_ids {
                    self.writer
                        .set_article_narrative(article_id, narrative_id)
                        .await?;
                }
                return Ok(());
            }
            warn!(narrative = %narrative_id, attempt, "Attach hit a version conflict, retrying");
        }

        Err(ChainPulseError::IntegrityConflict(format!(
            "narrative {narrative_id} kept moving; cluster deferred"
        )))
    }

    /// Create a fresh narrative from a cluster.
    async fn create(
        &self,
        cluster: &ArticleCluster,
        fingerprint: NarrativeFingerprint,
        now: DateTime<Utc>,
    ) -> Result<Uuid, ChainPulseError> {
        let refs: Vec<&Article> = cluster.articles.iter().collect();
        let (title, summary) = self.label_cluster(&cluster.nucleus, &refs).await;

        let dates: Vec<DateTime<Utc>> = refs.iter().map(|a| a.published_at).collect();
        let mut narrative = Narrative {
            id: Uuid::new_v4(),
            title,
            summary,
            // Legacy field: populated at creation for old readers, never
            // written again. The fingerprint nucleus is authoritative.
            theme: cluster.nucleus.clone(),
            entities: entity_union(&refs),
            article_ids: refs.iter().map(|a| a.id).collect(),
            article_count: refs.len() as u32,
            fingerprint,
            lifecycle_state: LifecycleState::Emerging,
            lifecycle_history: Vec::new(),
            mention_velocity: 0.0,
            momentum: Momentum::Unknown,
            recency_score: narrative_recency(now, now),
            first_seen: now,
            last_updated: now,
            reawakening_count: 0,
            reawakened_from: None,
            resurrection_velocity: None,
            peak_activity: None,
            merged_into: None,
            version: 0,
        };

        let inputs = LifecycleInputs {
            article_count: narrative.article_count,
            velocity: narrative_velocity(&dates, now, VELOCITY_LOOKBACK_DAYS),
            momentum: momentum_of(&dates, now),
            days_since_update: 0.0,
            previous_state: None,
        };
        apply_transition(&mut narrative, &inputs, now);

        self.writer.create_narrative(&narrative).await?;
        for article in &cluster.articles {
            self.writer
                .set_article_narrative(article.id, narrative.id)
                .await?;
        }
        Ok(narrative.id)
    }

    /// Generate a title and summary for a new narrative. LLM when configured,
    /// article-derived fallback otherwise (and whenever the call fails).
    async fn label_cluster(&self, nucleus: &str, articles: &[&Article]) -> (String, String) {
        let fallback = || {
            let summary = articles
                .iter()
                .find_map(|a| a.narrative_summary.clone())
                .unwrap_or_else(|| format!("{} articles about {nucleus}.", articles.len()));
            (nucleus.to_string(), summary)
        };

        let Some(claude) = &self.claude else {
            return fallback();
        };

        let headlines: Vec<String> = articles
            .iter()
            .take(15)
            .map(|a| format!("- {}", a.title))
            .collect();
        let prompt = format!(
            "These crypto news articles form one narrative centered on {nucleus}:\n{}\n\n\
             Write a specific title (max 80 chars) that distinguishes this story, and a \
             2-3 sentence summary. Respond in this exact JSON format:\n\
             {{\"title\": \"...\", \"summary\": \"...\"}}",
            headlines.join("\n")
        );

        match claude
            .chat_completion(
                "You are a concise headline writer for a crypto intelligence system. \
                 Respond only with valid JSON.",
                prompt,
            )
            .await
        {
            Ok(completion) => {
                self.cost
                    .track_call(
                        "narrative_synthesis",
                        claude.model(),
                        completion.usage.input_tokens,
                        completion.usage.output_tokens,
                        false,
                        None,
                    )
                    .await;
                match serde_json::from_str::<serde_json::Value>(&completion.text) {
                    Ok(parsed) => {
                        let title = parsed["title"].as_str().unwrap_or(nucleus).to_string();
                        let summary = parsed["summary"].as_str().unwrap_or_default().to_string();
                        if summary.is_empty() {
                            fallback()
                        } else {
                            (title, summary)
                        }
                    }
                    Err(_) => fallback(),
                }
            }
            Err(e) => {
                warn!(error = %e, "Narrative labeling failed, using fallback");
                fallback()
            }
        }
    }

    /// Pairwise merge scan over non-archived narratives sharing a nucleus.
    /// The smaller narrative is archived with a merged_into pointer; its
    /// articles move to the survivor, whose history is preserved.
    async fn merge_pass(&self, now: DateTime<Utc>) -> Result<u32, ChainPulseError> {
        let narratives = self.reader.non_archived_narratives().await?;
        let mut merged_away: HashSet<Uuid> = HashSet::new();
        let mut merges = 0u32;

        let mut groups: std::collections::HashMap<String, Vec<&Narrative>> =
            std::collections::HashMap::new();
        for narrative in &narratives {
            groups
                .entry(narrative.fingerprint.nucleus_entity.to_lowercase())
                .or_default()
                .push(narrative);
        }

        let mut group_keys: Vec<&String> = groups.keys().collect();
        group_keys.sort();

        for key in group_keys {
            let mut group = groups[key].clone();
            if group.len() < 2 {
                continue;
            }
            // Deterministic scan order: largest first, id as tiebreak.
            group.sort_by(|a, b| {
                b.article_count
                    .cmp(&a.article_count)
                    .then_with(|| a.id.cmp(&b.id))
            });

            for i in 0..group.len() {
                for j in (i + 1)..group.len() {
                    let (survivor, loser) = (group[i], group[j]);
                    if merged_away.contains(&survivor.id) || merged_away.contains(&loser.id) {
                        continue;
                    }
                    let threshold = merge_threshold(
                        survivor.last_updated,
                        loser.last_updated,
                        now,
                        self.merge_recent,
                        self.merge_old,
                    );
                    let sim = similarity(&survivor.fingerprint, &loser.fingerprint);
                    if sim >= threshold {
                        match self.merge_into(survivor.id, loser.id, now).await {
                            Ok(()) => {
                                merged_away.insert(loser.id);
                                merges += 1;
                            }
                            Err(e) => {
                                warn!(
                                    survivor = %survivor.id,
                                    loser = %loser.id,
                                    error = %e,
                                    "Merge failed"
                                );
                            }
                        }
                    }
                }
            }
        }

        Ok(merges)
    }

    async fn merge_into(
        &self,
        survivor_id: Uuid,
        loser_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), ChainPulseError> {
        let Some(loser) = self.reader.narrative_by_id(loser_id).await? else {
            return Ok(());
        };

        // Absorb the loser's articles through the normal attach path so all
        // aggregate invariants are recomputed once.
        let loser_articles = self.reader.articles_by_ids(&loser.article_ids).await?;
        let cluster = ArticleCluster {
            nucleus: loser.fingerprint.nucleus_entity.clone(),
            articles: loser_articles,
        };
        self.attach(survivor_id, &cluster, now).await?;

        // Archive the loser non-destructively with a pointer to the survivor.
        let mut archived = loser.clone();
        let expected_version = archived.version;
        archived.lifecycle_state = LifecycleState::Archived;
        archived.merged_into = Some(survivor_id);
        archived.last_updated = now;
        archived.lifecycle_history.push(chainpulse_common::LifecycleEntry {
            state: LifecycleState::Archived,
            timestamp: now,
            article_count: archived.article_count,
            mention_velocity: archived.mention_velocity,
        });
        archived.version += 1;

        if !self.writer.update_narrative(&archived, expected_version).await? {
            return Err(ChainPulseError::IntegrityConflict(format!(
                "narrative {loser_id} moved during merge"
            )));
        }
        info!(survivor = %survivor_id, loser = %loser_id, "Narratives merged");
        Ok(())
    }
}

/// Sorted, deduped union of actors across member articles.
fn entity_union(articles: &[&Article]) -> Vec<String> {
    let mut entities: Vec<String> = articles
        .iter()
        .flat_map(|a| a.actors.iter().cloned())
        .collect();
    entities.sort();
    entities.dedup();
    entities
}

/// Best candidate above its merge threshold, if any.
fn pick_candidate<'a>(
    fingerprint: &NarrativeFingerprint,
    candidates: &'a [Narrative],
    now: DateTime<Utc>,
    merge_recent: f64,
    merge_old: f64,
) -> Option<&'a Narrative> {
    candidates
        .iter()
        .map(|n| (similarity(fingerprint, &n.fingerprint), n))
        .filter(|(sim, n)| {
            // The cluster side is freshly built, so its threshold is the
            // recent one; the candidate contributes its own.
            *sim >= merge_threshold(now, n.last_updated, now, merge_recent, merge_old)
        })
        .max_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(_, n)| n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainpulse_common::NewArticle;

    fn fp(nucleus: &str, actors: &[&str], actions: &[&str]) -> NarrativeFingerprint {
        NarrativeFingerprint {
            nucleus_entity: nucleus.to_string(),
            top_actors: actors.iter().map(|s| s.to_string()).collect(),
            key_actions: actions.iter().map(|s| s.to_string()).collect(),
            timestamp: Utc::now(),
        }
    }

    fn narrative(nucleus: &str, actors: &[&str], last_updated: DateTime<Utc>) -> Narrative {
        let now = Utc::now();
        Narrative {
            id: Uuid::new_v4(),
            title: nucleus.to_string(),
            summary: String::new(),
            theme: nucleus.to_string(),
            entities: actors.iter().map(|s| s.to_string()).collect(),
            article_ids: vec![],
            article_count: 3,
            fingerprint: fp(nucleus, actors, &[]),
            lifecycle_state: LifecycleState::Emerging,
            lifecycle_history: vec![],
            mention_velocity: 0.0,
            momentum: Momentum::Unknown,
            recency_score: 0.0,
            first_seen: now - Duration::days(3),
            last_updated,
            reawakening_count: 0,
            reawakened_from: None,
            resurrection_velocity: None,
            peak_activity: None,
            merged_into: None,
            version: 0,
        }
    }

    #[test]
    fn picks_best_matching_candidate_above_threshold() {
        let now = Utc::now();
        let cluster_fp = fp("SEC", &["SEC", "Binance", "CZ"], &["filed lawsuit"]);
        let strong = narrative("SEC", &["SEC", "Binance", "CZ"], now - Duration::hours(4));
        let weak = narrative("SEC", &["SEC", "Tether", "Circle"], now - Duration::hours(4));
        let candidates = vec![weak, strong.clone()];

        let picked = pick_candidate(&cluster_fp, &candidates, now, 0.5, 0.6).unwrap();
        assert_eq!(picked.id, strong.id);
    }

    #[test]
    fn no_candidate_when_all_below_threshold() {
        let now = Utc::now();
        let cluster_fp = fp("Ripple", &["Ripple", "Garlinghouse"], &["won appeal"]);
        let unrelated = narrative("Solana", &["Solana Labs"], now - Duration::hours(4));
        assert!(pick_candidate(&cluster_fp, &[unrelated], now, 0.5, 0.6).is_none());
    }

    #[test]
    fn stale_candidate_needs_the_higher_threshold() {
        let now = Utc::now();
        // Same nucleus, one shared actor of five: similarity ~0.62.
        let cluster_fp = fp("SEC", &["SEC", "Binance", "CZ"], &["filed lawsuit"]);
        let stale = narrative(
            "SEC",
            &["SEC", "Coinbase", "Brian Armstrong"],
            now - Duration::days(10),
        );
        // 0.62 >= 0.6: still attaches, but only because it clears the old
        // threshold; with disjoint actors (sim 0.55) it would not.
        assert!(pick_candidate(&cluster_fp, &[stale], now, 0.5, 0.6).is_some());

        let disjoint = narrative("SEC", &["Gensler", "Congress", "Lobbyists"], now - Duration::days(10));
        let weak_fp = fp("SEC", &["SEC"], &["hearing"]);
        // similarity = 0.45 + 0.35*0 + 0.20*0 + 0.10 = 0.55 < 0.6
        assert!(pick_candidate(&weak_fp, &[disjoint], now, 0.5, 0.6).is_none());
    }

    #[test]
    fn entity_union_is_sorted_and_deduped() {
        let mut a = Article::from_new(
            NewArticle {
                url: "https://example.com/a".into(),
                title: "t".into(),
                text: "x".into(),
                source: "s".into(),
                published_at: Utc::now(),
            },
            Utc::now(),
        );
        a.actors = vec!["SEC".into(), "Binance".into()];
        let mut b = a.clone();
        b.actors = vec!["Binance".into(), "CZ".into()];

        assert_eq!(entity_union(&[&a, &b]), vec!["Binance", "CZ", "SEC"]);
    }
}
