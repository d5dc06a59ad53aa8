use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use chainpulse_common::{classify_article, NewArticle};
use chainpulse_store::StoreWriter;

/// Contract for ingestion adapters: supply candidate articles; the core
/// decides novelty via the URL-keyed upsert.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self) -> anyhow::Result<Vec<NewArticle>>;
}

/// RSS/Atom adapter over feed-rs.
pub struct RssSource {
    url: String,
    http: reqwest::Client,
}

impl RssSource {
    pub fn new(url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            url: url.into(),
            http,
        }
    }
}

#[async_trait]
impl ArticleSource for RssSource {
    fn name(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> anyhow::Result<Vec<NewArticle>> {
        let bytes = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let feed = feed_rs::parser::parse(&bytes[..])?;

        let source = feed
            .title
            .as_ref()
            .map(|t| t.content.clone())
            .unwrap_or_else(|| host_of(&self.url));

        let articles = feed
            .entries
            .into_iter()
            .filter_map(|entry| {
                let url = entry.links.first()?.href.clone();
                let title = entry.title.as_ref()?.content.trim().to_string();
                if title.is_empty() {
                    return None;
                }
                let text = entry
                    .content
                    .as_ref()
                    .and_then(|c| c.body.clone())
                    .or_else(|| entry.summary.as_ref().map(|s| s.content.clone()))
                    .unwrap_or_default();
                // Every timestamp crossing into the system is UTC; feeds
                // without one get the fetch time.
                let published_at = entry.published.or(entry.updated).unwrap_or_else(Utc::now);
                Some(NewArticle {
                    url,
                    title,
                    text,
                    source: source.clone(),
                    published_at,
                })
            })
            .collect();

        Ok(articles)
    }
}

fn host_of(url: &str) -> String {
    url.split("://")
        .nth(1)
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or("")
        .to_string()
}

#[derive(Debug, Default)]
pub struct IngestStats {
    pub fetched: u32,
    pub inserted: u32,
    pub duplicates: u32,
    pub source_failures: u32,
}

impl std::fmt::Display for IngestStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "fetched={} inserted={} duplicates={} source_failures={}",
            self.fetched, self.inserted, self.duplicates, self.source_failures
        )
    }
}

/// Pull every source, upsert new articles, and classify relevance at
/// ingestion. A failing source is skipped; the rest proceed.
pub async fn ingest_once(
    sources: &[Arc<dyn ArticleSource>],
    writer: &StoreWriter,
) -> IngestStats {
    let mut stats = IngestStats::default();
    let now = Utc::now();

    for source in sources {
        let articles = match source.fetch().await {
            Ok(articles) => articles,
            Err(e) => {
                warn!(source = source.name(), error = %e, "Source fetch failed");
                stats.source_failures += 1;
                continue;
            }
        };
        stats.fetched += articles.len() as u32;

        for article in articles {
            match writer.upsert_article(&article, now).await {
                Ok((id, true)) => {
                    stats.inserted += 1;
                    let classification = classify_article(&article.title, &article.text);
                    if let Err(e) = writer
                        .set_relevance(id, classification.tier, &classification.reason)
                        .await
                    {
                        warn!(article = %id, error = %e, "Failed to persist relevance tier");
                    }
                }
                Ok((_, false)) => stats.duplicates += 1,
                Err(e) => {
                    warn!(url = %article.url, error = %e, "Article upsert failed");
                }
            }
        }
    }

    info!(%stats, "Ingest complete");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("https://www.coindesk.com/feed/"), "www.coindesk.com");
        assert_eq!(host_of("not-a-url"), "not-a-url");
    }

    #[test]
    fn parses_a_minimal_rss_feed() {
        let xml = r#"<?xml version="1.0"?>
            <rss version="2.0"><channel>
              <title>Example Crypto Wire</title>
              <item>
                <title>Bitcoin steadies after volatile week</title>
                <link>https://example.com/btc-steadies</link>
                <description>Markets calmed on Friday.</description>
                <pubDate>Fri, 07 Mar 2025 12:00:00 GMT</pubDate>
              </item>
            </channel></rss>"#;
        let feed = feed_rs::parser::parse(xml.as_bytes()).unwrap();
        assert_eq!(feed.entries.len(), 1);
        assert_eq!(
            feed.entries[0].links.first().unwrap().href,
            "https://example.com/btc-steadies"
        );
    }
}
