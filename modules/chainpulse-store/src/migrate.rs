use neo4rs::query;
use tracing::info;

use chainpulse_common::ChainPulseError;

use crate::client::{db_err, StoreClient};

/// Run idempotent schema migrations: constraints, indexes.
pub async fn migrate(client: &StoreClient) -> Result<(), ChainPulseError> {
    let g = &client.graph;

    info!("Running schema migrations...");

    // --- Uniqueness constraints ---
    // Narrative.active_nucleus carries the nucleus only while the narrative is
    // non-archived; the constraint ignores nulls, which gives the sparse
    // "unique nucleus across non-archived" semantics.
    let constraints = [
        "CREATE CONSTRAINT article_id IF NOT EXISTS FOR (n:Article) REQUIRE n.id IS UNIQUE",
        "CREATE CONSTRAINT article_url IF NOT EXISTS FOR (n:Article) REQUIRE n.url IS UNIQUE",
        "CREATE CONSTRAINT mention_pair IF NOT EXISTS FOR (n:EntityMention) REQUIRE n.pair_key IS UNIQUE",
        "CREATE CONSTRAINT narrative_id IF NOT EXISTS FOR (n:Narrative) REQUIRE n.id IS UNIQUE",
        "CREATE CONSTRAINT narrative_nucleus IF NOT EXISTS FOR (n:Narrative) REQUIRE n.active_nucleus IS UNIQUE",
        "CREATE CONSTRAINT signal_entity IF NOT EXISTS FOR (n:SignalScore) REQUIRE n.entity IS UNIQUE",
    ];

    for c in &constraints {
        g.run(query(c)).await.map_err(db_err)?;
    }
    info!("Uniqueness constraints created");

    // --- Range indexes for the hot query paths ---
    let indexes = [
        "CREATE INDEX article_published IF NOT EXISTS FOR (n:Article) ON (n.published_at)",
        "CREATE INDEX article_narrative IF NOT EXISTS FOR (n:Article) ON (n.narrative_id)",
        "CREATE INDEX mention_entity IF NOT EXISTS FOR (n:EntityMention) ON (n.entity, n.is_primary, n.created_at)",
        "CREATE INDEX mention_article IF NOT EXISTS FOR (n:EntityMention) ON (n.article_id)",
        "CREATE INDEX narrative_updated IF NOT EXISTS FOR (n:Narrative) ON (n.last_updated)",
        "CREATE INDEX narrative_state IF NOT EXISTS FOR (n:Narrative) ON (n.lifecycle_state, n.last_updated)",
        "CREATE INDEX signal_score_7d IF NOT EXISTS FOR (n:SignalScore) ON (n.score_7d)",
        "CREATE INDEX cost_timestamp IF NOT EXISTS FOR (n:ApiCost) ON (n.timestamp)",
        "CREATE INDEX cost_operation IF NOT EXISTS FOR (n:ApiCost) ON (n.operation, n.timestamp)",
    ];

    for i in &indexes {
        g.run(query(i)).await.map_err(db_err)?;
    }
    info!("Indexes created");

    info!("Schema migration complete");
    Ok(())
}
