pub mod cluster;
pub mod fingerprint;
pub mod lifecycle;
pub mod matcher;

pub use cluster::{build_clusters, ArticleCluster};
pub use fingerprint::{compute_fingerprint, merge_threshold, similarity};
pub use lifecycle::{
    apply_transition, momentum_of, narrative_recency, narrative_velocity, next_state,
    LifecycleEngine, LifecycleInputs,
};
pub use matcher::{ClusterOutcome, ClusterRunStats, NarrativeMatcher};
