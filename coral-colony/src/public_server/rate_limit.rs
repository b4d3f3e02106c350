//! Per-token rate limiting with governor.
//!
//! Each token gets its own direct limiter sized by its configured quota.
//! Exhausted budgets surface as `Unauthorized` with a retry-after hint
//! derived from the quota's refill rate.

use super::tokens::RateLimit;
use governor::{
    clock::QuantaClock,
    state::{direct::NotKeyed, InMemoryState},
    Quota, RateLimiter,
};
use std::{
    collections::HashMap,
    num::NonZeroU32,
    sync::{Arc, Mutex},
};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

/// Lazily created per-token limiters.
#[derive(Default)]
pub struct RateLimiterRegistry {
    limiters: Mutex<HashMap<String, Arc<DirectLimiter>>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ok when the token still has budget; Err carries the retry-after
    /// hint in seconds.
    pub fn check(&self, token_id: &str, limit: RateLimit) -> Result<(), u64> {
        let limiter = {
            let mut limiters = self.limiters.lock().expect("rate limiter registry poisoned");
            limiters
                .entry(token_id.to_string())
                .or_insert_with(|| Arc::new(build_limiter(limit)))
                .clone()
        };

        match limiter.check() {
            Ok(_) => Ok(()),
            Err(_) => Err(refill_hint_secs(limit)),
        }
    }

    /// Forget a token's limiter (revocation, or a changed quota).
    pub fn forget(&self, token_id: &str) {
        self.limiters
            .lock()
            .expect("rate limiter registry poisoned")
            .remove(token_id);
    }
}

fn build_limiter(limit: RateLimit) -> DirectLimiter {
    let quota = match limit {
        RateLimit::PerMinute(n) => {
            Quota::per_minute(NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN))
        }
        RateLimit::PerHour(n) => Quota::per_hour(NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN)),
    };
    RateLimiter::direct(quota)
}

/// Seconds until one unit of budget refills, the retry-after hint.
fn refill_hint_secs(limit: RateLimit) -> u64 {
    let (period_secs, count) = match limit {
        RateLimit::PerMinute(n) => (60, n as u64),
        RateLimit::PerHour(n) => (3600, n as u64),
    };
    (period_secs / count.max(1)).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_exhaustion_yields_retry_after() {
        let registry = RateLimiterRegistry::new();

        for _ in 0..2 {
            registry.check("token-1", RateLimit::PerHour(2)).unwrap();
        }

        let retry_after = registry
            .check("token-1", RateLimit::PerHour(2))
            .unwrap_err();
        assert!(retry_after >= 1);
    }

    #[test]
    fn tokens_have_independent_budgets() {
        let registry = RateLimiterRegistry::new();

        registry.check("token-1", RateLimit::PerHour(1)).unwrap();
        assert!(registry.check("token-1", RateLimit::PerHour(1)).is_err());

        // A different token is unaffected.
        registry.check("token-2", RateLimit::PerHour(1)).unwrap();
    }

    #[test]
    fn forget_resets_the_budget() {
        let registry = RateLimiterRegistry::new();
        registry.check("token-1", RateLimit::PerHour(1)).unwrap();
        assert!(registry.check("token-1", RateLimit::PerHour(1)).is_err());

        registry.forget("token-1");
        registry.check("token-1", RateLimit::PerHour(1)).unwrap();
    }

    #[test]
    fn refill_hints_scale_with_quota() {
        assert_eq!(refill_hint_secs(RateLimit::PerMinute(60)), 1);
        assert_eq!(refill_hint_secs(RateLimit::PerHour(60)), 60);
        assert_eq!(refill_hint_secs(RateLimit::PerHour(100_000)), 1);
    }
}
