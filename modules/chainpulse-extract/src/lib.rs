pub mod cost;
pub mod extractor;
pub mod prompt;
pub mod prompt_cache;
pub mod schema;
pub mod validate;

pub use cost::{calculate_cost, CostTracker};
pub use extractor::{EntityExtractor, ExtractionStats};
pub use prompt_cache::PromptCache;
pub use schema::{ArticleExtraction, BatchExtraction, ExtractedEntity};

/// Bumped whenever the prompt or output schema changes, so the content hash
/// stops matching and articles get re-enriched.
pub const EXTRACTOR_VERSION: &str = "v3";
