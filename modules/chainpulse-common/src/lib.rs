pub mod config;
pub mod error;
pub mod normalize;
pub mod relevance;
pub mod types;

pub use config::Config;
pub use error::ChainPulseError;
pub use normalize::{canonical_names, is_canonical, normalize_entity};
pub use relevance::{classify_article, Classification};
pub use types::*;
