use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use sha2::{Digest, Sha256};

use crate::schema::BatchExtraction;

/// Short-circuits identical prompts against the same model. A hit means the
/// batch is re-processed from the cached parse at zero recorded cost.
pub struct PromptCache {
    entries: Mutex<LruCache<String, BatchExtraction>>,
}

impl PromptCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Cache key over (model, prompt).
    pub fn key(model: &str, prompt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(prompt.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<BatchExtraction> {
        self.entries.lock().expect("prompt cache lock poisoned").get(key).cloned()
    }

    pub fn put(&self, key: String, batch: BatchExtraction) {
        self.entries.lock().expect("prompt cache lock poisoned").put(key, batch);
    }
}

impl Default for PromptCache {
    fn default() -> Self {
        Self::new(128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_depends_on_model_and_prompt() {
        let a = PromptCache::key("claude-3-5-haiku-20241022", "prompt");
        let b = PromptCache::key("claude-3-5-haiku-20241022", "prompt");
        let c = PromptCache::key("claude-3-5-sonnet-20241022", "prompt");
        let d = PromptCache::key("claude-3-5-haiku-20241022", "other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn put_then_get_roundtrips() {
        let cache = PromptCache::new(4);
        let key = PromptCache::key("m", "p");
        cache.put(key.clone(), BatchExtraction { articles: vec![] });
        assert!(cache.get(&key).is_some());
        assert!(cache.get("missing").is_none());
    }
}
