use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainPulseError {
    /// Network timeouts, 429/5xx from the LLM provider or database.
    /// Recovered inside the component via backoff; jobs never see these.
    #[error("Transient error: {0}")]
    Transient(String),

    /// Provider signalled a rate limit; sleep for the given seconds before resuming.
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Malformed LLM output or a violated invariant (null nucleus, salience out of range).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unique-index violation: another writer got there first.
    /// Recovered by re-reading and attaching instead of creating.
    #[error("Integrity conflict: {0}")]
    IntegrityConflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Missing API key, wrong database, malformed configuration.
    /// Fails loudly at startup; re-raised to the job boundary at runtime.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl ChainPulseError {
    /// Whether the error should be retried with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainPulseError::Transient(_) | ChainPulseError::RateLimited { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ChainPulseError::Transient("timeout".into()).is_transient());
        assert!(ChainPulseError::RateLimited { retry_after_secs: 5 }.is_transient());
        assert!(!ChainPulseError::Validation("bad".into()).is_transient());
        assert!(!ChainPulseError::Config("missing key".into()).is_transient());
    }

    #[test]
    fn display_includes_detail() {
        let e = ChainPulseError::Validation("nucleus_entity is empty".into());
        assert!(e.to_string().contains("nucleus_entity"));
    }
}
