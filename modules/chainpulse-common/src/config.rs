use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Document store (bolt protocol via neo4rs driver)
    pub database_url: String,
    pub database_user: String,
    pub database_password: String,

    // Optional distributed cache tier (empty = in-process tier only)
    pub cache_url: String,

    // LLM provider
    pub llm_api_key: String,
    /// Fast/cheap model for entity extraction.
    pub llm_model_entity: String,
    /// Higher-quality model for narrative summarization.
    pub llm_model_narrative: String,

    // Extraction pacing
    pub batch_size_extraction: usize,
    pub batch_delay_seconds: u64,
    pub article_delay_seconds: f64,

    // Rate limiting
    pub tokens_per_minute: u64,
    /// Fraction of the provider budget we allow ourselves (default 0.8).
    pub rate_limit_safety: f64,
    pub max_concurrent_llm: usize,

    // Clustering / scoring windows
    pub lookback_hours_cluster: i64,
    pub lookback_hours_signal: i64,
    pub min_cluster_size: usize,

    // Narrative matching
    pub merge_threshold_recent: f64,
    pub merge_threshold_old: f64,

    // Lifecycle
    pub dormant_days: f64,
    pub archive_days: f64,

    // Cache TTLs
    pub cache_ttl_signals_seconds: u64,
    pub cache_ttl_narratives_seconds: u64,

    // Signal scoring
    pub emerging_score_floor: f64,

    // Ingestion
    pub rss_feeds: Vec<String>,

    // Wall-clock briefing triggers (cron expressions, consumer out of scope)
    pub briefing_cron_morning: String,
    pub briefing_cron_evening: String,
}

impl Config {
    /// Load the full worker configuration.
    /// Panics with a clear message if required vars are missing.
    pub fn worker_from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            database_user: env::var("DATABASE_USER").unwrap_or_else(|_| "neo4j".to_string()),
            database_password: required_env("DATABASE_PASSWORD"),
            cache_url: env::var("CACHE_URL").unwrap_or_default(),
            llm_api_key: required_env("LLM_API_KEY"),
            llm_model_entity: env::var("LLM_MODEL_ENTITY")
                .unwrap_or_else(|_| "claude-3-5-haiku-20241022".to_string()),
            llm_model_narrative: env::var("LLM_MODEL_NARRATIVE")
                .unwrap_or_else(|_| "claude-3-5-sonnet-20241022".to_string()),
            batch_size_extraction: parsed_env("BATCH_SIZE_EXTRACTION", 15),
            batch_delay_seconds: parsed_env("BATCH_DELAY_SECONDS", 30),
            article_delay_seconds: parsed_env("ARTICLE_DELAY_SECONDS", 1.0),
            tokens_per_minute: parsed_env("TOKENS_PER_MINUTE", 25_000),
            rate_limit_safety: parsed_env("RATE_LIMIT_SAFETY", 0.8),
            max_concurrent_llm: parsed_env("MAX_CONCURRENT_LLM", 4),
            lookback_hours_cluster: parsed_env("LOOKBACK_HOURS_CLUSTER", 48),
            lookback_hours_signal: parsed_env("LOOKBACK_HOURS_SIGNAL", 168),
            min_cluster_size: parsed_env("MIN_CLUSTER_SIZE", 3),
            merge_threshold_recent: parsed_env("MERGE_THRESHOLD_RECENT", 0.5),
            merge_threshold_old: parsed_env("MERGE_THRESHOLD_OLD", 0.6),
            dormant_days: parsed_env("DORMANT_DAYS", 7.0),
            archive_days: parsed_env("ARCHIVE_DAYS", 30.0),
            cache_ttl_signals_seconds: parsed_env("CACHE_TTL_SIGNALS_SECONDS", 120),
            cache_ttl_narratives_seconds: parsed_env("CACHE_TTL_NARRATIVES_SECONDS", 600),
            emerging_score_floor: parsed_env("EMERGING_SCORE_FLOOR", 5.0),
            rss_feeds: env::var("RSS_FEEDS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            briefing_cron_morning: env::var("BRIEFING_CRON_MORNING")
                .unwrap_or_else(|_| "0 0 8 * * *".to_string()),
            briefing_cron_evening: env::var("BRIEFING_CRON_EVENING")
                .unwrap_or_else(|_| "0 0 17 * * *".to_string()),
        }
    }

    /// Load config for one-off migration runs (store credentials only).
    pub fn migrate_from_env() -> Self {
        let mut config = Self::defaults();
        config.database_url = required_env("DATABASE_URL");
        config.database_user = env::var("DATABASE_USER").unwrap_or_else(|_| "neo4j".to_string());
        config.database_password = required_env("DATABASE_PASSWORD");
        config
    }

    /// All-defaults config for tests. No env access.
    pub fn defaults() -> Self {
        Self {
            database_url: String::new(),
            database_user: String::new(),
            database_password: String::new(),
            cache_url: String::new(),
            llm_api_key: String::new(),
            llm_model_entity: "claude-3-5-haiku-20241022".to_string(),
            llm_model_narrative: "claude-3-5-sonnet-20241022".to_string(),
            batch_size_extraction: 15,
            batch_delay_seconds: 30,
            article_delay_seconds: 1.0,
            tokens_per_minute: 25_000,
            rate_limit_safety: 0.8,
            max_concurrent_llm: 4,
            lookback_hours_cluster: 48,
            lookback_hours_signal: 168,
            min_cluster_size: 3,
            merge_threshold_recent: 0.5,
            merge_threshold_old: 0.6,
            dormant_days: 7.0,
            archive_days: 30.0,
            cache_ttl_signals_seconds: 120,
            cache_ttl_narratives_seconds: 600,
            emerging_score_floor: 5.0,
            rss_feeds: Vec::new(),
            briefing_cron_morning: "0 0 8 * * *".to_string(),
            briefing_cron_evening: "0 0 17 * * *".to_string(),
        }
    }

    /// Log the first 8 characters of each sensitive value for debugging.
    pub fn log_redacted(&self) {
        let vars = [
            ("DATABASE_URL", &self.database_url),
            ("LLM_API_KEY", &self.llm_api_key),
            ("CACHE_URL", &self.cache_url),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name}: (not set)");
            } else {
                let prefix: String = value.chars().take(8).collect();
                tracing::info!("{name}: {prefix}…");
            }
        }
    }
}

fn required_env(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| panic!("{name} must be set"))
}

fn parsed_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
