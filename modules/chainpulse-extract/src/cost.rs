use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use chainpulse_common::ApiCostRecord;
use chainpulse_store::StoreWriter;

/// USD per million tokens, matched by model-name prefix so dated snapshots
/// ("claude-3-5-haiku-20241022") resolve without per-release entries.
const PRICING: &[(&str, f64, f64)] = &[
    ("claude-3-5-haiku", 0.80, 4.00),
    ("claude-3-5-sonnet", 3.00, 15.00),
    ("claude-opus", 15.00, 75.00),
];

/// Unknown models are billed at haiku rates rather than silently free.
const DEFAULT_PRICING: (f64, f64) = (0.80, 4.00);

/// Cost of a call in USD.
pub fn calculate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let (input_rate, output_rate) = PRICING
        .iter()
        .find(|(prefix, _, _)| model.starts_with(prefix))
        .map(|(_, input, output)| (*input, *output))
        .unwrap_or(DEFAULT_PRICING);

    (input_tokens as f64 / 1_000_000.0) * input_rate
        + (output_tokens as f64 / 1_000_000.0) * output_rate
}

/// Records per-call LLM costs. Every call emits an ApiCostRecord, including
/// cache hits (at zero cost) so hit rates stay observable.
pub struct CostTracker {
    writer: Arc<StoreWriter>,
}

impl CostTracker {
    pub fn new(writer: Arc<StoreWriter>) -> Self {
        Self { writer }
    }

    /// Compute and persist the cost of one call. Returns the USD amount.
    /// A failed write is logged, not propagated: losing one cost row must
    /// not fail an extraction batch.
    pub async fn track_call(
        &self,
        operation: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        cached: bool,
        cache_key: Option<&str>,
    ) -> f64 {
        let cost_usd = if cached {
            0.0
        } else {
            calculate_cost(model, input_tokens, output_tokens)
        };

        let record = ApiCostRecord {
            timestamp: Utc::now(),
            operation: operation.to_string(),
            model: model.to_string(),
            input_tokens,
            output_tokens,
            cost_usd,
            cached,
            cache_key: cache_key.map(|k| k.to_string()),
        };

        if let Err(e) = self.writer.record_cost(&record).await {
            warn!(operation, error = %e, "Failed to record api cost");
        }

        cost_usd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn haiku_pricing() {
        // 1K input @ $0.80/1M + 1K output @ $4.00/1M = $0.0048
        let cost = calculate_cost("claude-3-5-haiku-20241022", 1000, 1000);
        assert!(approx(cost, 0.0048), "got {cost}");
    }

    #[test]
    fn sonnet_pricing() {
        // 1K input @ $3.00/1M + 1K output @ $15.00/1M = $0.018
        let cost = calculate_cost("claude-3-5-sonnet-20241022", 1000, 1000);
        assert!(approx(cost, 0.018), "got {cost}");
    }

    #[test]
    fn opus_pricing() {
        // 1K input @ $15.00/1M + 1K output @ $75.00/1M = $0.090
        let cost = calculate_cost("claude-opus-4-5-20251101", 1000, 1000);
        assert!(approx(cost, 0.090), "got {cost}");
    }

    #[test]
    fn unknown_model_priced_as_haiku() {
        let cost = calculate_cost("some-future-model", 1000, 1000);
        assert!(approx(cost, 0.0048), "got {cost}");
    }

    #[test]
    fn zero_tokens_cost_nothing() {
        assert_eq!(calculate_cost("claude-3-5-haiku-20241022", 0, 0), 0.0);
    }
}
