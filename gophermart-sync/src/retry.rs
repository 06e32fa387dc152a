//! Backoff policy for rate-limited accrual queries.

use rand::Rng;
use std::time::Duration;

/// Jittered exponential backoff applied when the authority answers 429.
///
/// The same order is re-queried after each wait. `max_attempts` bounds how
/// many 429 responses one order may receive in a cycle before the cycle gives up.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl RateLimitPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64, jitter_pct: f64) -> Self {
        let clamped_attempts = max_attempts.max(1);
        let clamped_base = base_delay_ms.max(1);
        let clamped_max_delay = max_delay_ms.max(clamped_base);
        let clamped_jitter = jitter_pct.clamp(0.0, 1.0);
        Self {
            max_attempts: clamped_attempts,
            base_delay_ms: clamped_base,
            max_delay_ms: clamped_max_delay,
            jitter_pct: clamped_jitter,
        }
    }

    /// Whether another wait-and-retry is allowed after `attempt` rate-limited responses.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Wait before retry number `attempt` (0-based).
    ///
    /// A server `Retry-After` hint replaces the computed backoff but is still
    /// capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let cap = Duration::from_millis(self.max_delay_ms);
        match retry_after {
            Some(hint) => hint.min(cap),
            None => self.next_delay(attempt),
        }
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let exp = 2_u64.saturating_pow(attempt);
        let mut delay = self.base_delay_ms.saturating_mul(exp);
        if delay > self.max_delay_ms {
            delay = self.max_delay_ms;
        }
        let jittered = if self.jitter_pct > 0.0 {
            let mut rng = rand::thread_rng();
            let spread = (delay as f64 * self.jitter_pct) as i64;
            let delta = rng.gen_range(-spread..=spread);
            delay.saturating_add_signed(delta).min(self.max_delay_ms)
        } else {
            delay
        };
        Duration::from_millis(jittered)
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::new(12, 5_000, 60_000, 0.2)
    }
}
