use std::collections::HashMap;

use chainpulse_common::{normalize_entity, Article};

/// A candidate cluster: tier-1/2 articles sharing a canonical nucleus.
#[derive(Debug, Clone)]
pub struct ArticleCluster {
    /// Canonical nucleus entity (the cluster key).
    pub nucleus: String,
    pub articles: Vec<Article>,
}

impl ArticleCluster {
    pub fn size(&self) -> usize {
        self.articles.len()
    }
}

/// Group articles by canonical nucleus and drop clusters below the minimum
/// size. Output order is deterministic: size descending, then nucleus
/// alphabetically — the order the matcher processes them in.
pub fn build_clusters(articles: Vec<Article>, min_cluster_size: usize) -> Vec<ArticleCluster> {
    let mut by_nucleus: HashMap<String, Vec<Article>> = HashMap::new();
    for article in articles {
        let Some(nucleus) = article.nucleus_entity.as_deref() else {
            continue;
        };
        let key = normalize_entity(nucleus);
        if key.is_empty() {
            continue;
        }
        by_nucleus.entry(key).or_default().push(article);
    }

    let mut clusters: Vec<ArticleCluster> = by_nucleus
        .into_iter()
        .filter(|(_, members)| members.len() >= min_cluster_size)
        .map(|(nucleus, articles)| ArticleCluster { nucleus, articles })
        .collect();

    clusters.sort_by(|a, b| {
        b.size()
            .cmp(&a.size())
            .then_with(|| a.nucleus.cmp(&b.nucleus))
    });
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainpulse_common::NewArticle;
    use chrono::Utc;

    fn article(nucleus: &str) -> Article {
        let mut a = Article::from_new(
            NewArticle {
                url: format!("https://example.com/{}", uuid::Uuid::new_v4()),
                title: "t".into(),
                text: "x".into(),
                source: "src".into(),
                published_at: Utc::now(),
            },
            Utc::now(),
        );
        a.nucleus_entity = Some(nucleus.to_string());
        a
    }

    #[test]
    fn groups_by_canonical_nucleus() {
        // Variants of the same entity land in one cluster.
        let articles = vec![article("BTC"), article("Bitcoin"), article("$BTC")];
        let clusters = build_clusters(articles, 3);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].nucleus, "Bitcoin");
        assert_eq!(clusters[0].size(), 3);
    }

    #[test]
    fn min_size_boundary_is_inclusive() {
        // Exactly min_cluster_size is kept...
        let clusters = build_clusters(vec![article("Ripple"); 3], 3);
        assert_eq!(clusters.len(), 1);
        // ...one fewer is dropped.
        let clusters = build_clusters(vec![article("Ripple"); 2], 3);
        assert!(clusters.is_empty());
    }

    #[test]
    fn articles_without_nucleus_ignored() {
        let mut no_nucleus = article("x");
        no_nucleus.nucleus_entity = None;
        let clusters = build_clusters(vec![no_nucleus, article("SEC"), article("SEC"), article("SEC")], 3);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].nucleus, "SEC");
    }

    #[test]
    fn deterministic_order_size_desc_then_alpha() {
        let mut articles = vec![article("Solana"); 3];
        articles.extend(vec![article("Ethereum"); 5]);
        articles.extend(vec![article("Cardano"); 3]);
        let clusters = build_clusters(articles, 3);
        let keys: Vec<&str> = clusters.iter().map(|c| c.nucleus.as_str()).collect();
        assert_eq!(keys, vec!["Ethereum", "Cardano", "Solana"]);
    }

    #[test]
    fn clustering_is_stable_across_runs() {
        let make = || {
            let mut articles = vec![article("SEC"); 4];
            articles.extend(vec![article("Bitcoin"); 4]);
            articles
        };
        let a: Vec<String> = build_clusters(make(), 3).iter().map(|c| c.nucleus.clone()).collect();
        let b: Vec<String> = build_clusters(make(), 3).iter().map(|c| c.nucleus.clone()).collect();
        assert_eq!(a, b);
    }
}
