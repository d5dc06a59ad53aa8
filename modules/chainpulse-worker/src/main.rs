use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ai_client::{Claude, TokenBucket};
use chainpulse_common::Config;
use chainpulse_extract::EntityExtractor;
use chainpulse_narratives::{LifecycleEngine, NarrativeMatcher};
use chainpulse_signals::SignalScorer;
use chainpulse_store::{
    migrate::migrate, Cache, CachedReader, StoreClient, StoreReader, StoreWriter, TieredCache,
};

use chainpulse_worker::ingest::{ArticleSource, RssSource};
use chainpulse_worker::jobs::{
    BriefingWindowJob, ClusterJob, ExtractJob, IngestJob, LifecycleSweepJob, ScoreJob,
};
use chainpulse_worker::scheduler::{Scheduler, Trigger};

#[derive(Parser)]
#[command(name = "chainpulse-worker", about = "ChainPulse pipeline worker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the periodic worker pool (default).
    Run,
    /// Run one full pipeline cycle and exit.
    Once,
    /// Apply schema migrations and exit.
    Migrate,
    /// Print daily and monthly LLM spend and cache hit rates.
    CostReport,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("chainpulse=info".parse()?))
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Run) {
        Command::Migrate => {
            let config = Config::migrate_from_env();
            let client = connect(&config).await?;
            migrate(&client).await?;
            info!("Migration complete");
            Ok(())
        }
        Command::CostReport => {
            let config = Config::migrate_from_env();
            let client = connect(&config).await?;
            let reader = StoreReader::new(client);
            let daily = reader.daily_cost_summary().await?;
            let monthly = reader.monthly_cost_summary().await?;
            let hit_rate = |s: &chainpulse_store::reader::CostSummary| {
                if s.calls == 0 {
                    0.0
                } else {
                    100.0 * s.cache_hits as f64 / s.calls as f64
                }
            };
            println!(
                "today:      ${:.4} across {} calls ({:.1}% cache hits)",
                daily.total_usd,
                daily.calls,
                hit_rate(&daily)
            );
            println!(
                "this month: ${:.4} across {} calls ({:.1}% cache hits)",
                monthly.total_usd,
                monthly.calls,
                hit_rate(&monthly)
            );
            Ok(())
        }
        Command::Once => {
            let config = Config::worker_from_env();
            config.log_redacted();
            let pipeline = Pipeline::build(&config).await?;
            pipeline.run_once().await
        }
        Command::Run => {
            let config = Config::worker_from_env();
            config.log_redacted();
            let pipeline = Pipeline::build(&config).await?;
            pipeline.run_scheduled(&config).await
        }
    }
}

async fn connect(config: &Config) -> Result<StoreClient> {
    let client = StoreClient::connect(
        &config.database_url,
        &config.database_user,
        &config.database_password,
    )
    .await?;
    Ok(client)
}

/// All wired components. Constructed once at startup and handed to jobs;
/// no global singletons beyond the rate limiter the extractor holds.
struct Pipeline {
    writer: Arc<StoreWriter>,
    cached: Arc<CachedReader>,
    extractor: Arc<EntityExtractor>,
    matcher: Arc<NarrativeMatcher>,
    scorer: Arc<SignalScorer>,
    engine: Arc<LifecycleEngine>,
    sources: Vec<Arc<dyn ArticleSource>>,
}

impl Pipeline {
    async fn build(config: &Config) -> Result<Self> {
        let client = connect(config).await?;
        migrate(&client).await?;

        let writer = Arc::new(StoreWriter::new(client.clone()));
        let reader = Arc::new(StoreReader::new(client.clone()));

        if !config.cache_url.is_empty() {
            warn!("CACHE_URL is set but no distributed tier is wired into this binary; using the in-process tier only");
        }
        let cache: Arc<dyn Cache> = Arc::new(TieredCache::memory_only(256));
        let cached = Arc::new(CachedReader::new(
            StoreReader::new(client.clone()),
            cache,
            Duration::from_secs(config.cache_ttl_signals_seconds),
            Duration::from_secs(config.cache_ttl_narratives_seconds),
        ));

        let bucket = Arc::new(TokenBucket::new(
            config.tokens_per_minute,
            config.rate_limit_safety,
        ));
        let entity_model = Claude::new(&config.llm_api_key, &config.llm_model_entity);
        let narrative_model = Claude::new(&config.llm_api_key, &config.llm_model_narrative);

        let extractor = Arc::new(EntityExtractor::new(
            entity_model,
            bucket,
            Arc::clone(&writer),
            Arc::clone(&reader),
            config.batch_size_extraction,
            config.max_concurrent_llm,
            Duration::from_secs(config.batch_delay_seconds),
            Duration::from_secs_f64(config.article_delay_seconds),
        ));

        let matcher = Arc::new(NarrativeMatcher::new(
            Arc::clone(&reader),
            Arc::clone(&writer),
            Some(narrative_model),
            config.lookback_hours_cluster,
            config.min_cluster_size,
            config.merge_threshold_recent,
            config.merge_threshold_old,
        ));

        let scorer = Arc::new(SignalScorer::new(
            Arc::clone(&reader),
            Arc::clone(&writer),
            config.lookback_hours_signal,
            config.emerging_score_floor,
        ));

        let engine = Arc::new(LifecycleEngine::new(
            Arc::clone(&reader),
            Arc::clone(&writer),
        ));

        let sources: Vec<Arc<dyn ArticleSource>> = config
            .rss_feeds
            .iter()
            .map(|url| Arc::new(RssSource::new(url)) as Arc<dyn ArticleSource>)
            .collect();
        if sources.is_empty() {
            warn!("RSS_FEEDS is empty; the ingest job will be a no-op");
        }

        Ok(Self {
            writer,
            cached,
            extractor,
            matcher,
            scorer,
            engine,
            sources,
        })
    }

    /// One full cycle, in dataflow order.
    async fn run_once(&self) -> Result<()> {
        let (_tx, shutdown) = tokio::sync::watch::channel(false);
        chainpulse_worker::ingest::ingest_once(&self.sources, &self.writer).await;
        self.extractor.run(&shutdown).await?;
        self.matcher.run(&shutdown).await?;
        self.scorer.run(&shutdown).await?;
        self.engine.sweep(&shutdown).await?;
        self.cached.invalidate_signals().await;
        self.cached.invalidate_narratives().await;
        info!("Single cycle complete");
        Ok(())
    }

    async fn run_scheduled(self, config: &Config) -> Result<()> {
        let mut scheduler = Scheduler::new();

        scheduler.register(
            Arc::new(IngestJob {
                sources: self.sources.clone(),
                writer: Arc::clone(&self.writer),
            }),
            Trigger::Every(Duration::from_secs(300)),
        );
        scheduler.register(
            Arc::new(ExtractJob {
                extractor: Arc::clone(&self.extractor),
            }),
            Trigger::Every(Duration::from_secs(300)),
        );
        scheduler.register(
            Arc::new(ClusterJob {
                matcher: Arc::clone(&self.matcher),
                cached: Arc::clone(&self.cached),
            }),
            Trigger::Every(Duration::from_secs(600)),
        );
        scheduler.register(
            Arc::new(ScoreJob {
                scorer: Arc::clone(&self.scorer),
                cached: Arc::clone(&self.cached),
            }),
            Trigger::Every(Duration::from_secs(600)),
        );
        scheduler.register(
            Arc::new(LifecycleSweepJob {
                engine: Arc::clone(&self.engine),
                cached: Arc::clone(&self.cached),
            }),
            Trigger::Every(Duration::from_secs(3600)),
        );
        scheduler.register(
            Arc::new(BriefingWindowJob { label: "briefing_morning" }),
            Trigger::cron(&config.briefing_cron_morning)?,
        );
        scheduler.register(
            Arc::new(BriefingWindowJob { label: "briefing_evening" }),
            Trigger::cron(&config.briefing_cron_evening)?,
        );

        let shutdown = scheduler.shutdown_handle();
        let handles = scheduler.spawn_all();
        info!(jobs = handles.len(), "Worker pool running");

        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");
        shutdown.send(true).ok();
        for handle in handles {
            let _ = handle.await;
        }
        info!("Worker stopped");
        Ok(())
    }
}
