use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use chainpulse_common::{
    Article, ChainPulseError, EntityType, LifecycleState, Narrative, SignalScore, Timeframe,
};

use crate::cache::Cache;
use crate::reader::StoreReader;

/// A narrative with its member articles attached (detail view).
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct NarrativeDetail {
    pub narrative: Narrative,
    pub articles: Vec<Article>,
}

/// Read-through cache over the listing queries. The HTTP surface wraps these
/// operations one-to-one; writes elsewhere invalidate by prefix.
pub struct CachedReader {
    reader: StoreReader,
    cache: Arc<dyn Cache>,
    signals_ttl: Duration,
    narratives_ttl: Duration,
}

impl CachedReader {
    pub fn new(
        reader: StoreReader,
        cache: Arc<dyn Cache>,
        signals_ttl: Duration,
        narratives_ttl: Duration,
    ) -> Self {
        Self {
            reader,
            cache,
            signals_ttl,
            narratives_ttl,
        }
    }

    pub async fn trending_signals(
        &self,
        timeframe: Timeframe,
        limit: usize,
        entity_type: Option<EntityType>,
    ) -> Result<Vec<SignalScore>, ChainPulseError> {
        let key = match entity_type {
            Some(t) => format!("signals:trending:{timeframe}:{limit}:{t}"),
            None => format!("signals:trending:{timeframe}:{limit}"),
        };
        self.read_through(&key, self.signals_ttl, || {
            self.reader.trending_signals(timeframe, limit, entity_type)
        })
        .await
    }

    pub async fn active_narratives(
        &self,
        limit: usize,
        state: Option<LifecycleState>,
    ) -> Result<Vec<Narrative>, ChainPulseError> {
        let key = match state {
            Some(s) => format!("narratives:active:{limit}:{s}"),
            None => format!("narratives:active:{limit}"),
        };
        self.read_through(&key, self.narratives_ttl, || {
            self.reader.active_narratives(limit, state)
        })
        .await
    }

    pub async fn archived_narratives(
        &self,
        days: i64,
        limit: usize,
    ) -> Result<Vec<Narrative>, ChainPulseError> {
        let key = format!("narratives:archived:{days}:{limit}");
        self.read_through(&key, self.narratives_ttl, || {
            self.reader.archived_narratives(days, limit)
        })
        .await
    }

    pub async fn resurrected_narratives(
        &self,
        days: i64,
        limit: usize,
    ) -> Result<Vec<Narrative>, ChainPulseError> {
        let key = format!("narratives:resurrections:{days}:{limit}");
        self.read_through(&key, self.narratives_ttl, || {
            self.reader.resurrected_narratives(days, limit)
        })
        .await
    }

    /// Single-narrative detail with articles attached. Served uncached:
    /// the detail view is rare compared to listings and must be fresh.
    pub async fn narrative_detail(
        &self,
        id: Uuid,
    ) -> Result<Option<NarrativeDetail>, ChainPulseError> {
        let Some(narrative) = self.reader.narrative_by_id(id).await? else {
            return Ok(None);
        };
        let articles = self.reader.articles_by_ids(&narrative.article_ids).await?;
        Ok(Some(NarrativeDetail { narrative, articles }))
    }

    /// Called by the signal scorer after an upsert pass.
    pub async fn invalidate_signals(&self) {
        self.cache.invalidate_prefix("signals:").await;
    }

    /// Called by the clusterer and lifecycle engine after narrative writes.
    pub async fn invalidate_narratives(&self) {
        self.cache.invalidate_prefix("narratives:").await;
    }

    pub fn reader(&self) -> &StoreReader {
        &self.reader
    }

    async fn read_through<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        load: F,
    ) -> Result<T, ChainPulseError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ChainPulseError>>,
    {
        if let Some(hit) = self.cache.get(key).await {
            if let Ok(value) = serde_json::from_str(&hit) {
                debug!(key, "cache hit");
                return Ok(value);
            }
        }

        let value = load().await?;
        if let Ok(serialized) = serde_json::to_string(&value) {
            self.cache.set(key, serialized, ttl).await;
        }
        Ok(value)
    }
}
