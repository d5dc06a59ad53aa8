use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tracing::{info, warn};

use ai_client::{estimate_tokens, AiError, Claude, TokenBucket};
use chainpulse_common::{content_hash, Article, ChainPulseError, EntityMention};
use chainpulse_store::{ArticleEnrichment, StoreReader, StoreWriter};

use crate::cost::CostTracker;
use crate::prompt::{build_batch_prompt, SYSTEM_PROMPT};
use crate::prompt_cache::PromptCache;
use crate::schema::{ArticleExtraction, BatchExtraction};
use crate::validate::{validate_extraction, ValidExtraction};
use crate::EXTRACTOR_VERSION;

const OPERATION: &str = "entity_extraction";

/// Per-run counters, logged at the end of every extract job.
#[derive(Debug, Default, Clone)]
pub struct ExtractionStats {
    pub processed: u32,
    pub skipped: u32,
    pub cache_hits: u32,
    pub validation_failures: u32,
    pub cost_usd: f64,
}

impl std::fmt::Display for ExtractionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "processed={} skipped={} cache_hits={} validation_failures={} cost=${:.4}",
            self.processed, self.skipped, self.cache_hits, self.validation_failures, self.cost_usd
        )
    }
}

/// Batched LLM entity extraction. Writes entity mentions and narrative
/// enrichment onto articles; never creates narratives.
pub struct EntityExtractor {
    claude: Claude,
    bucket: Arc<TokenBucket>,
    writer: Arc<StoreWriter>,
    reader: Arc<StoreReader>,
    cost: CostTracker,
    prompt_cache: PromptCache,
    /// Caps in-flight LLM requests across callers sharing this extractor.
    llm_permits: Semaphore,
    batch_size: usize,
    batch_delay: Duration,
    article_delay: Duration,
}

impl EntityExtractor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        claude: Claude,
        bucket: Arc<TokenBucket>,
        writer: Arc<StoreWriter>,
        reader: Arc<StoreReader>,
        batch_size: usize,
        max_concurrent_llm: usize,
        batch_delay: Duration,
        article_delay: Duration,
    ) -> Self {
        Self {
            cost: CostTracker::new(Arc::clone(&writer)),
            claude,
            bucket,
            writer,
            reader,
            prompt_cache: PromptCache::default(),
            llm_permits: Semaphore::new(max_concurrent_llm.max(1)),
            batch_size: batch_size.clamp(1, 15),
            batch_delay,
            article_delay,
        }
    }

    /// One extract-job run: pick unenriched articles and process them in
    /// batches. Observes the shutdown signal between batches.
    pub async fn run(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<ExtractionStats, ChainPulseError> {
        let articles = self.reader.unenriched_articles(self.batch_size * 4).await?;
        if articles.is_empty() {
            return Ok(ExtractionStats::default());
        }
        info!(candidates = articles.len(), "Extract run starting");

        let mut stats = ExtractionStats::default();
        let mut chunks = articles.chunks(self.batch_size).peekable();
        while let Some(chunk) = chunks.next() {
            if *shutdown.borrow() {
                info!("Shutdown observed, stopping extract run");
                break;
            }
            self.extract_batch(chunk, &mut stats).await;
            if chunks.peek().is_some() {
                tokio::time::sleep(self.batch_delay).await;
            }
        }

        info!(%stats, "Extract run complete");
        Ok(stats)
    }

    /// Process one batch of articles. Safe to call on already-processed
    /// articles: hash-stamped articles with mentions are skipped, and a
    /// repeated prompt (crash between mention writes and the hash stamp)
    /// short-circuits on the prompt cache at zero cost.
    pub async fn extract_batch(&self, articles: &[Article], stats: &mut ExtractionStats) {
        let mut pending: Vec<&Article> = Vec::with_capacity(articles.len());
        for article in articles {
            if self.already_extracted(article).await {
                stats.skipped += 1;
            } else {
                pending.push(article);
            }
        }
        if pending.is_empty() {
            return;
        }

        let prompt = build_batch_prompt(&pending);
        let batch = match self.fetch_batch(&prompt, stats).await {
            Ok(batch) => batch,
            Err(e) => {
                // Transient errors already exhausted their retries inside the
                // client; count the whole batch and let the next run repick it.
                warn!(error = %e, articles = pending.len(), "Batch extraction failed");
                stats.validation_failures += pending.len() as u32;
                return;
            }
        };

        let by_index: HashMap<usize, &ArticleExtraction> =
            batch.articles.iter().map(|a| (a.index, a)).collect();

        for (index, article) in pending.iter().enumerate() {
            let validated = by_index
                .get(&index)
                .ok_or_else(|| {
                    ChainPulseError::Validation(format!("no output for article index {index}"))
                })
                .and_then(|raw| validate_extraction(raw));

            match validated {
                Ok(valid) => {
                    if let Err(e) = self.persist(article, &valid).await {
                        warn!(article = %article.id, error = %e, "Failed to persist extraction");
                        stats.validation_failures += 1;
                    } else {
                        stats.processed += 1;
                    }
                }
                Err(first_error) => {
                    self.retry_individually(article, first_error, stats).await;
                }
            }
            tokio::time::sleep(self.article_delay).await;
        }
    }

    /// A single-article second chance after a validation failure. A second
    /// failure skips the article and bumps the error counter; the rest of
    /// the batch is unaffected.
    async fn retry_individually(
        &self,
        article: &Article,
        first_error: ChainPulseError,
        stats: &mut ExtractionStats,
    ) {
        warn!(article = %article.id, error = %first_error, "Validation failed, retrying individually");

        let prompt = build_batch_prompt(&[article]);
        let retried = match self.fetch_batch(&prompt, stats).await {
            Ok(batch) => batch
                .articles
                .iter()
                .find(|a| a.index == 0)
                .ok_or_else(|| ChainPulseError::Validation("empty retry output".to_string()))
                .and_then(validate_extraction),
            Err(e) => Err(e),
        };

        match retried {
            Ok(valid) => match self.persist(article, &valid).await {
                Ok(()) => stats.processed += 1,
                Err(e) => {
                    warn!(article = %article.id, error = %e, "Failed to persist retried extraction");
                    stats.validation_failures += 1;
                }
            },
            Err(e) => {
                warn!(article = %article.id, error = %e, "Second extraction failure, skipping article");
                stats.validation_failures += 1;
            }
        }
    }

    /// Resolve a batch prompt to parsed output: prompt cache first, then the
    /// rate-limited LLM call. Every path records an ApiCostRecord.
    async fn fetch_batch(
        &self,
        prompt: &str,
        stats: &mut ExtractionStats,
    ) -> Result<BatchExtraction, ChainPulseError> {
        let model = self.claude.model().to_string();
        let key = PromptCache::key(&model, prompt);

        if let Some(hit) = self.prompt_cache.get(&key) {
            stats.cache_hits += 1;
            self.cost
                .track_call(OPERATION, &model, 0, 0, true, Some(&key))
                .await;
            return Ok(hit);
        }

        // Suspend on the token budget before the call; the estimate covers
        // the prompt plus a flat response allowance per batch.
        self.bucket
            .acquire(estimate_tokens(prompt) + 1024)
            .await;

        let _permit = self
            .llm_permits
            .acquire()
            .await
            .map_err(|_| ChainPulseError::Transient("llm permit pool closed".to_string()))?;
        let extraction = self
            .claude
            .extract::<BatchExtraction>(SYSTEM_PROMPT, prompt)
            .await
            .map_err(ai_err)?;

        stats.cost_usd += self
            .cost
            .track_call(
                OPERATION,
                &model,
                extraction.usage.input_tokens,
                extraction.usage.output_tokens,
                false,
                None,
            )
            .await;

        self.prompt_cache.put(key, extraction.value.clone());
        Ok(extraction.value)
    }

    /// An article is done when the current-version content hash is stamped
    /// and mention rows exist.
    async fn already_extracted(&self, article: &Article) -> bool {
        let hash = content_hash(&article.title, &article.text, EXTRACTOR_VERSION);
        if article.narrative_hash.as_deref() != Some(hash.as_str()) {
            return false;
        }
        matches!(self.reader.mention_count(article.id).await, Ok(n) if n > 0)
    }

    /// Mentions first, hash stamp last: a crash in between leaves the article
    /// unstamped so the next run redoes it (idempotent upserts absorb the
    /// duplicate writes).
    async fn persist(
        &self,
        article: &Article,
        valid: &ValidExtraction,
    ) -> Result<(), ChainPulseError> {
        for entity in &valid.entities {
            let mention = EntityMention {
                article_id: article.id,
                entity: entity.value.clone(),
                entity_type: entity.entity_type,
                is_primary: entity.is_primary,
                sentiment: valid.sentiment,
                confidence: entity.confidence,
                source: article.source.clone(),
                created_at: article.published_at,
            };
            self.writer.upsert_mention(&mention).await?;
        }

        let enrichment = ArticleEnrichment {
            sentiment: valid.sentiment,
            nucleus_entity: valid.nucleus_entity.clone(),
            actors: valid.actors.clone(),
            actor_salience_json: serde_json::to_string(&valid.actor_salience)
                .unwrap_or_else(|_| "{}".to_string()),
            key_actions: valid.key_actions.clone(),
            narrative_summary: valid.narrative_summary.clone(),
            narrative_hash: content_hash(&article.title, &article.text, EXTRACTOR_VERSION),
        };
        self.writer.write_enrichment(article.id, &enrichment).await
    }
}

fn ai_err(e: AiError) -> ChainPulseError {
    match e {
        AiError::Transient(msg) => ChainPulseError::Transient(msg),
        AiError::RateLimited { retry_after_secs } => {
            ChainPulseError::RateLimited { retry_after_secs }
        }
        AiError::Provider { status, body } => {
            ChainPulseError::Extraction(format!("provider rejected call ({status}): {body}"))
        }
        AiError::Malformed(msg) => ChainPulseError::Validation(msg),
    }
}
