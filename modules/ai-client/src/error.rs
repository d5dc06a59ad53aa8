use thiserror::Error;

#[derive(Error, Debug)]
pub enum AiError {
    /// Timeouts and 5xx responses. Safe to retry with backoff.
    #[error("Transient provider error: {0}")]
    Transient(String),

    /// 429 from the provider. Sleep for the advertised duration before retrying.
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// 4xx other than 429: bad request, invalid key. Not retryable.
    #[error("Provider rejected request ({status}): {body}")]
    Provider { status: u16, body: String },

    /// The response arrived but did not contain what we asked for.
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl AiError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AiError::Transient(_) | AiError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for AiError {
    fn from(e: reqwest::Error) -> Self {
        // Connection failures and timeouts are transient; everything else
        // surfaced by reqwest at this level is too (we map HTTP statuses
        // ourselves before deserializing).
        AiError::Transient(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(AiError::Transient("timeout".into()).is_retryable());
        assert!(AiError::RateLimited { retry_after_secs: 10 }.is_retryable());
        assert!(!AiError::Provider { status: 400, body: "bad".into() }.is_retryable());
        assert!(!AiError::Malformed("no tool use".into()).is_retryable());
    }
}
