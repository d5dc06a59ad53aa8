pub mod cache;
pub mod cached_reader;
pub mod client;
pub mod migrate;
pub mod reader;
pub mod writer;

pub use cache::{Cache, KvTier, MemoryTtlCache, NoopCache, TieredCache};
pub use cached_reader::CachedReader;
pub use client::StoreClient;
pub use reader::StoreReader;
pub use writer::{ArticleEnrichment, StoreWriter};
