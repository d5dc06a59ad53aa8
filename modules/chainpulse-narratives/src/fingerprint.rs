use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use chainpulse_common::{Article, NarrativeFingerprint};

/// Similarity weights: nucleus equality dominates, actors refine, actions
/// disambiguate, and a same-nucleus boost lets sibling narratives merge even
/// with disjoint casts.
const NUCLEUS_WEIGHT: f64 = 0.45;
const ACTOR_WEIGHT: f64 = 0.35;
const ACTION_WEIGHT: f64 = 0.20;
const NUCLEUS_BOOST: f64 = 0.10;

const MAX_TOP_ACTORS: usize = 5;
const MAX_KEY_ACTIONS: usize = 3;

/// Narratives updated within this window use the lower merge threshold.
const RECENT_WINDOW_HOURS: i64 = 48;

/// Compute a cluster's fingerprint from its member articles.
///
/// - nucleus: the most common `nucleus_entity`, ties broken by the highest
///   aggregate salience across the cluster.
/// - top_actors: up to 5, ranked by max salience, then mention count, then
///   alphabetically.
/// - key_actions: up to 3 deduped action phrases.
pub fn compute_fingerprint(articles: &[&Article], now: DateTime<Utc>) -> NarrativeFingerprint {
    // Nucleus frequency + aggregate salience per candidate.
    let mut nucleus_counts: HashMap<&str, (u32, i64)> = HashMap::new();
    for article in articles {
        if let Some(nucleus) = article.nucleus_entity.as_deref() {
            if nucleus.is_empty() {
                continue;
            }
            let entry = nucleus_counts.entry(nucleus).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += article
                .actor_salience
                .get(nucleus)
                .copied()
                .unwrap_or(0) as i64;
        }
    }
    let nucleus_entity = nucleus_counts
        .iter()
        .max_by(|(a_name, (a_count, a_sal)), (b_name, (b_count, b_sal))| {
            (a_count, a_sal, std::cmp::Reverse(*a_name))
                .cmp(&(b_count, b_sal, std::cmp::Reverse(*b_name)))
        })
        .map(|(name, _)| (*name).to_string())
        .unwrap_or_default();

    // Actor ranking: max salience desc, mention count desc, alpha asc.
    let mut actor_stats: HashMap<&str, (u8, u32)> = HashMap::new();
    for article in articles {
        for actor in &article.actors {
            let salience = article.actor_salience.get(actor).copied().unwrap_or(1);
            let entry = actor_stats.entry(actor.as_str()).or_insert((0, 0));
            entry.0 = entry.0.max(salience);
            entry.1 += 1;
        }
    }
    let mut ranked: Vec<(&str, u8, u32)> = actor_stats
        .into_iter()
        .map(|(actor, (salience, count))| (actor, salience, count))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| b.2.cmp(&a.2))
            .then_with(|| a.0.cmp(b.0))
    });
    let top_actors: Vec<String> = ranked
        .into_iter()
        .take(MAX_TOP_ACTORS)
        .map(|(actor, _, _)| actor.to_string())
        .collect();

    // Deduped action phrases, first occurrence wins.
    let mut seen = HashSet::new();
    let mut key_actions = Vec::new();
    for article in articles {
        for action in &article.key_actions {
            let normalized = action.trim().to_lowercase();
            if !normalized.is_empty() && seen.insert(normalized) {
                key_actions.push(action.trim().to_string());
                if key_actions.len() == MAX_KEY_ACTIONS {
                    break;
                }
            }
        }
        if key_actions.len() == MAX_KEY_ACTIONS {
            break;
        }
    }

    NarrativeFingerprint {
        nucleus_entity,
        top_actors,
        key_actions,
        timestamp: now,
    }
}

/// Similarity between two fingerprints in [0, 1].
/// nucleus match 0.45 + actor Jaccard x 0.35 + action Jaccard x 0.20,
/// plus a 0.10 same-nucleus boost, capped at 1.0. Nucleus comparison is
/// case-insensitive; empty nuclei never match.
pub fn similarity(a: &NarrativeFingerprint, b: &NarrativeFingerprint) -> f64 {
    let nucleus_match = !a.nucleus_entity.is_empty()
        && !b.nucleus_entity.is_empty()
        && a.nucleus_entity.to_lowercase() == b.nucleus_entity.to_lowercase();

    let mut score = 0.0;
    if nucleus_match {
        score += NUCLEUS_WEIGHT;
    }
    score += ACTOR_WEIGHT * jaccard(&a.top_actors, &b.top_actors);
    score += ACTION_WEIGHT * jaccard(&a.key_actions, &b.key_actions);
    if nucleus_match {
        score += NUCLEUS_BOOST;
    }
    score.min(1.0)
}

/// Case-insensitive Jaccard. Two empty sets count as identical so a
/// fingerprint is always fully similar to itself.
fn jaccard(a: &[String], b: &[String]) -> f64 {
    let set_a: HashSet<String> = a.iter().map(|s| s.to_lowercase()).collect();
    let set_b: HashSet<String> = b.iter().map(|s| s.to_lowercase()).collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Merge threshold for a pair of narratives: 0.5 for a narrative updated
/// within the last 48h, 0.6 otherwise; the lower of the two wins.
pub fn merge_threshold(
    a_last_updated: DateTime<Utc>,
    b_last_updated: DateTime<Utc>,
    now: DateTime<Utc>,
    recent_threshold: f64,
    old_threshold: f64,
) -> f64 {
    let cutoff = now - Duration::hours(RECENT_WINDOW_HOURS);
    let threshold_for = |updated: DateTime<Utc>| {
        if updated >= cutoff {
            recent_threshold
        } else {
            old_threshold
        }
    };
    threshold_for(a_last_updated).min(threshold_for(b_last_updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainpulse_common::NewArticle;
    use std::collections::BTreeMap;

    fn fp(nucleus: &str, actors: &[&str], actions: &[&str]) -> NarrativeFingerprint {
        NarrativeFingerprint {
            nucleus_entity: nucleus.to_string(),
            top_actors: actors.iter().map(|s| s.to_string()).collect(),
            key_actions: actions.iter().map(|s| s.to_string()).collect(),
            timestamp: Utc::now(),
        }
    }

    fn article(nucleus: &str, actors: &[(&str, u8)], actions: &[&str]) -> Article {
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
        a.actors = actors.iter().map(|(name, _)| name.to_string()).collect();
        a.actor_salience = actors
            .iter()
            .map(|(name, s)| (name.to_string(), *s))
            .collect::<BTreeMap<_, _>>();
        a.key_actions = actions.iter().map(|s| s.to_string()).collect();
        a
    }

    // --- similarity ---

    #[test]
    fn identical_fingerprint_is_fully_similar() {
        let f = fp("SEC", &["SEC", "Binance"], &["filed lawsuit"]);
        assert_eq!(similarity(&f, &f), 1.0);
    }

    #[test]
    fn similarity_is_symmetric() {
        let a = fp("SEC", &["SEC", "Binance", "CZ"], &["filed lawsuit"]);
        let b = fp("SEC", &["SEC", "Coinbase"], &["enforcement action"]);
        assert_eq!(similarity(&a, &b), similarity(&b, &a));
    }

    #[test]
    fn same_nucleus_partial_actors_lands_near_point_62() {
        // 0.45 (nucleus) + 0.35 * 1/5 (only SEC shared) + 0 + 0.10 boost
        let a = fp("SEC", &["SEC", "Binance", "CZ"], &["filed lawsuit"]);
        let b = fp("SEC", &["SEC", "Coinbase", "Brian Armstrong"], &["enforcement action"]);
        let sim = similarity(&a, &b);
        assert!((sim - 0.62).abs() < 0.01, "got {sim}");
    }

    #[test]
    fn nucleus_match_is_case_insensitive() {
        let a = fp("Bitcoin", &["MicroStrategy"], &["corporate buying"]);
        let b = fp("BITCOIN", &["BlackRock"], &["ETF approval"]);
        // 0.45 + 0 + 0 + 0.10
        let sim = similarity(&a, &b);
        assert!((sim - 0.55).abs() < 0.01, "got {sim}");
    }

    #[test]
    fn disjoint_narratives_score_zero() {
        let a = fp("Ethereum", &["Vitalik"], &["protocol upgrade"]);
        let b = fp("Solana", &["Solana Labs"], &["network outage"]);
        assert_eq!(similarity(&a, &b), 0.0);
    }

    #[test]
    fn empty_nuclei_never_match() {
        let a = fp("", &["X"], &[]);
        let b = fp("", &["X"], &[]);
        // Actors identical (0.35) + actions both empty (0.20), no nucleus credit.
        let sim = similarity(&a, &b);
        assert!((sim - 0.55).abs() < 0.01, "got {sim}");
    }

    #[test]
    fn score_capped_at_one() {
        let a = fp("SEC", &["SEC"], &["filed lawsuit"]);
        let b = fp("sec", &["sec"], &["Filed Lawsuit"]);
        assert_eq!(similarity(&a, &b), 1.0);
    }

    // --- fingerprint computation ---

    #[test]
    fn nucleus_is_most_common() {
        let a1 = article("SEC", &[("SEC", 5)], &[]);
        let a2 = article("SEC", &[("SEC", 5)], &[]);
        let a3 = article("Binance", &[("Binance", 5)], &[]);
        let f = compute_fingerprint(&[&a1, &a2, &a3], Utc::now());
        assert_eq!(f.nucleus_entity, "SEC");
    }

    #[test]
    fn nucleus_tie_broken_by_aggregate_salience() {
        let a1 = article("SEC", &[("SEC", 3)], &[]);
        let a2 = article("Binance", &[("Binance", 5)], &[]);
        let f = compute_fingerprint(&[&a1, &a2], Utc::now());
        assert_eq!(f.nucleus_entity, "Binance");
    }

    #[test]
    fn top_actors_capped_and_ranked() {
        let a1 = article(
            "SEC",
            &[("SEC", 5), ("Binance", 4), ("CZ", 3), ("Kraken", 2), ("Gemini", 2), ("FTX", 1)],
            &[],
        );
        let f = compute_fingerprint(&[&a1], Utc::now());
        assert_eq!(f.top_actors.len(), 5);
        assert_eq!(f.top_actors[0], "SEC");
        assert_eq!(f.top_actors[1], "Binance");
        // Equal salience (2): alphabetical.
        assert_eq!(f.top_actors[3], "Gemini");
        assert_eq!(f.top_actors[4], "Kraken");
    }

    #[test]
    fn key_actions_deduped_and_capped() {
        let a1 = article("SEC", &[("SEC", 5)], &["filed lawsuit", "Filed Lawsuit"]);
        let a2 = article("SEC", &[("SEC", 5)], &["requested documents", "froze assets", "extra"]);
        let f = compute_fingerprint(&[&a1, &a2], Utc::now());
        assert_eq!(
            f.key_actions,
            vec!["filed lawsuit", "requested documents", "froze assets"]
        );
    }

    // --- merge thresholds ---

    #[test]
    fn both_recent_uses_lower_threshold() {
        let now = Utc::now();
        let t = merge_threshold(now - Duration::hours(2), now - Duration::hours(40), now, 0.5, 0.6);
        assert_eq!(t, 0.5);
    }

    #[test]
    fn both_old_uses_higher_threshold() {
        let now = Utc::now();
        let t = merge_threshold(now - Duration::days(5), now - Duration::days(9), now, 0.5, 0.6);
        assert_eq!(t, 0.6);
    }

    #[test]
    fn mixed_pair_takes_the_minimum() {
        let now = Utc::now();
        let t = merge_threshold(now - Duration::hours(2), now - Duration::days(9), now, 0.5, 0.6);
        assert_eq!(t, 0.5);
    }
}
