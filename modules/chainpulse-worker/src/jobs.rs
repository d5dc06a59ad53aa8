use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use chainpulse_extract::EntityExtractor;
use chainpulse_narratives::{LifecycleEngine, NarrativeMatcher};
use chainpulse_signals::SignalScorer;
use chainpulse_store::{CachedReader, StoreWriter};

use crate::ingest::{ingest_once, ArticleSource};
use crate::scheduler::Job;

/// `ingest`: pull every RSS adapter, insert new articles, classify relevance.
pub struct IngestJob {
    pub sources: Vec<Arc<dyn ArticleSource>>,
    pub writer: Arc<StoreWriter>,
}

#[async_trait]
impl Job for IngestJob {
    fn name(&self) -> &'static str {
        "ingest"
    }

    async fn run(&self, _shutdown: &watch::Receiver<bool>) -> anyhow::Result<()> {
        ingest_once(&self.sources, &self.writer).await;
        Ok(())
    }
}

/// `extract`: enrich unprocessed articles in batches via the LLM.
pub struct ExtractJob {
    pub extractor: Arc<EntityExtractor>,
}

#[async_trait]
impl Job for ExtractJob {
    fn name(&self) -> &'static str {
        "extract"
    }

    async fn run(&self, shutdown: &watch::Receiver<bool>) -> anyhow::Result<()> {
        self.extractor.run(shutdown).await?;
        Ok(())
    }
}

/// `cluster`: re-cluster the lookback window, attach/create/merge narratives.
pub struct ClusterJob {
    pub matcher: Arc<NarrativeMatcher>,
    pub cached: Arc<CachedReader>,
}

#[async_trait]
impl Job for ClusterJob {
    fn name(&self) -> &'static str {
        "cluster"
    }

    async fn run(&self, shutdown: &watch::Receiver<bool>) -> anyhow::Result<()> {
        self.matcher.run(shutdown).await?;
        self.cached.invalidate_narratives().await;
        Ok(())
    }
}

/// `score`: recompute signal scores for recently mentioned entities.
pub struct ScoreJob {
    pub scorer: Arc<SignalScorer>,
    pub cached: Arc<CachedReader>,
}

#[async_trait]
impl Job for ScoreJob {
    fn name(&self) -> &'static str {
        "score"
    }

    async fn run(&self, shutdown: &watch::Receiver<bool>) -> anyhow::Result<()> {
        self.scorer.run(shutdown).await?;
        self.cached.invalidate_signals().await;
        Ok(())
    }
}

/// `lifecycle_sweep`: re-evaluate every non-archived narrative, including
/// ones with no new articles (time-based cooling/dormancy/archival).
pub struct LifecycleSweepJob {
    pub engine: Arc<LifecycleEngine>,
    pub cached: Arc<CachedReader>,
}

#[async_trait]
impl Job for LifecycleSweepJob {
    fn name(&self) -> &'static str {
        "lifecycle_sweep"
    }

    async fn run(&self, shutdown: &watch::Receiver<bool>) -> anyhow::Result<()> {
        self.engine.sweep(shutdown).await?;
        self.cached.invalidate_narratives().await;
        Ok(())
    }
}

/// Wall-clock briefing trigger. The briefing generator itself is an external
/// consumer; this job marks the window so it can pick up fresh narratives
/// and signals on schedule.
pub struct BriefingWindowJob {
    pub label: &'static str,
}

#[async_trait]
impl Job for BriefingWindowJob {
    fn name(&self) -> &'static str {
        self.label
    }

    async fn run(&self, _shutdown: &watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(window = self.label, "Briefing window fired");
        Ok(())
    }
}
