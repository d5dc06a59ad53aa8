use chainpulse_common::ChainPulseError;
use chrono::{DateTime, SecondsFormat, Utc};
use neo4rs::{ConfigBuilder, Graph};

/// Thin wrapper around neo4rs::Graph providing connection setup.
/// Collections are node labels: Article, EntityMention, Narrative,
/// SignalScore, ApiCost.
#[derive(Clone)]
pub struct StoreClient {
    pub(crate) graph: Graph,
}

impl StoreClient {
    /// Connect with the given credentials.
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, ChainPulseError> {
        let config = ConfigBuilder::default()
            .uri(uri)
            .user(user)
            .password(password)
            .fetch_size(500)
            .max_connections(20)
            .build()
            .map_err(|e| ChainPulseError::Config(format!("bad store config: {e}")))?;
        let graph = Graph::connect(config).await.map_err(db_err)?;
        Ok(Self { graph })
    }

    /// Get a reference to the underlying neo4rs Graph.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }
}

/// Map a driver error onto the domain taxonomy. Unique-constraint violations
/// become IntegrityConflict so callers can fall back to attach-instead-of-create.
pub(crate) fn db_err(e: neo4rs::Error) -> ChainPulseError {
    let text = e.to_string();
    let lowered = text.to_lowercase();
    if lowered.contains("constraint") || lowered.contains("already exists") {
        ChainPulseError::IntegrityConflict(text)
    } else if lowered.contains("timeout") || lowered.contains("connection") {
        ChainPulseError::Transient(text)
    } else {
        ChainPulseError::Database(text)
    }
}

/// Timestamps are persisted as fixed-width RFC3339 UTC strings so that
/// lexicographic index order equals chronological order.
pub(crate) fn format_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_roundtrip() {
        let dt = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap();
        let s = format_ts(&dt);
        assert_eq!(parse_ts(&s), Some(dt));
    }

    #[test]
    fn timestamp_strings_sort_chronologically() {
        let earlier = Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 11, 2, 9, 0, 0).unwrap();
        assert!(format_ts(&earlier) < format_ts(&later));
    }
}
