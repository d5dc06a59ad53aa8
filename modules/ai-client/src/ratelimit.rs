use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

/// Per-minute token budget shared by all LLM callers in the process.
/// Thread-safe via atomic counters; callers suspend until the next window
/// when a request would exceed the budget.
pub struct TokenBucket {
    /// Tokens allowed per minute after the safety margin is applied.
    effective_budget: u64,
    /// Minute index (since `started`) of the window the counter belongs to.
    window: AtomicU64,
    /// Tokens consumed in the current window.
    used: AtomicU64,
    started: Instant,
}

impl TokenBucket {
    /// `tokens_per_minute` is the provider limit; `safety` is the fraction of
    /// it we allow ourselves (e.g. 0.8 keeps steady state at 80% of TPM).
    pub fn new(tokens_per_minute: u64, safety: f64) -> Self {
        let effective_budget = ((tokens_per_minute as f64) * safety.clamp(0.0, 1.0)) as u64;
        Self {
            effective_budget: effective_budget.max(1),
            window: AtomicU64::new(0),
            used: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    fn current_minute(&self) -> u64 {
        self.started.elapsed().as_secs() / 60
    }

    /// Reserve `tokens` from the budget, sleeping across window boundaries
    /// until the reservation fits. A request larger than the whole budget is
    /// admitted alone at the top of a fresh window rather than blocking forever.
    pub async fn acquire(&self, tokens: u64) {
        loop {
            let minute = self.current_minute();
            let window = self.window.load(Ordering::Acquire);
            if window != minute {
                // New window: first caller in resets the counter.
                if self
                    .window
                    .compare_exchange(window, minute, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.used.store(0, Ordering::Release);
                }
                continue;
            }

            let prev = self.used.fetch_add(tokens, Ordering::AcqRel);
            let oversized = tokens >= self.effective_budget;
            if prev + tokens <= self.effective_budget || (oversized && prev == 0) {
                return;
            }

            // Over budget: undo the reservation and wait out the window.
            self.used.fetch_sub(tokens, Ordering::AcqRel);
            let secs_into_window = self.started.elapsed().as_secs() % 60;
            let wait = Duration::from_secs(60 - secs_into_window.min(59));
            info!(
                tokens,
                used = prev,
                budget = self.effective_budget,
                wait_secs = wait.as_secs(),
                "Token budget exhausted, sleeping until next window"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens still available in the current window.
    pub fn remaining(&self) -> u64 {
        if self.window.load(Ordering::Acquire) != self.current_minute() {
            return self.effective_budget;
        }
        self.effective_budget
            .saturating_sub(self.used.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_within_budget_does_not_block() {
        let bucket = TokenBucket::new(1000, 1.0);
        bucket.acquire(400).await;
        bucket.acquire(400).await;
        assert_eq!(bucket.remaining(), 200);
    }

    #[test]
    fn safety_margin_applied() {
        let bucket = TokenBucket::new(25_000, 0.8);
        assert_eq!(bucket.remaining(), 20_000);
    }

    #[tokio::test(start_paused = true)]
    async fn exceeding_budget_waits_for_next_window() {
        let bucket = TokenBucket::new(100, 1.0);
        bucket.acquire(90).await;

        let start = tokio::time::Instant::now();
        // 20 more tokens do not fit; the call must span a window boundary.
        // Under a paused clock, sleeps advance virtual time instantly.
        bucket.acquire(20).await;
        assert!(tokio::time::Instant::now() - start >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn oversized_request_admitted_alone() {
        let bucket = TokenBucket::new(100, 1.0);
        // Larger than the whole budget; must not deadlock.
        bucket.acquire(500).await;
    }
}
