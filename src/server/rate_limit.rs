//! Per-connection token-bucket rate limiting. Buckets are keyed by session
//! id and distinguish only `Instruction` (chat/manual-mode messages, higher
//! natural rate) from `Control` (execution/script-management messages,
//! infrequent by nature).

use std::env;
use std::time::{Duration, Instant};

use automaton_core_types::SessionId;
use dashmap::DashMap;

#[derive(Clone, Copy, Debug)]
pub enum RateLimitKind {
    Instruction,
    Control,
}

#[derive(Clone, Copy, Debug)]
pub struct RateLimitConfig {
    pub instruction_per_min: u32,
    pub control_per_min: u32,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        Self {
            instruction_per_min: env_limit("AUTOMATON_RATE_INSTRUCTION_PER_MIN", 120),
            control_per_min: env_limit("AUTOMATON_RATE_CONTROL_PER_MIN", 60),
        }
    }
}

fn env_limit(name: &str, default: u32) -> u32 {
    env::var(name).ok().and_then(|value| value.parse::<u32>().ok()).unwrap_or(default)
}

pub struct RateLimiter {
    buckets: DashMap<String, TokenBucket>,
    limits: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(limits: RateLimitConfig) -> Self {
        Self { buckets: DashMap::new(), limits }
    }

    pub fn allow(&self, session_id: SessionId, kind: RateLimitKind) -> bool {
        let (capacity, refill) = match kind {
            RateLimitKind::Instruction => {
                (self.limits.instruction_per_min, self.limits.instruction_per_min as f64 / 60.0)
            }
            RateLimitKind::Control => {
                (self.limits.control_per_min, self.limits.control_per_min as f64 / 60.0)
            }
        };
        if capacity == 0 {
            return true;
        }

        let bucket_key = format!("{}:{kind:?}", session_id.0);
        let mut entry = self.buckets.entry(bucket_key).or_insert_with(|| TokenBucket::new(capacity));
        entry.allow(capacity, refill)
    }

    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        if max_idle.is_zero() {
            return 0;
        }
        let now = Instant::now();
        let stale: Vec<String> = self
            .buckets
            .iter()
            .filter_map(|entry| entry.value().is_idle(now, max_idle).then(|| entry.key().clone()))
            .collect();
        let mut removed = 0;
        for key in stale {
            if self.buckets.remove(&key).is_some() {
                removed += 1;
            }
        }
        removed
    }
}

struct TokenBucket {
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    fn new(capacity: u32) -> Self {
        Self { tokens: capacity as f64, last: Instant::now() }
    }

    fn allow(&mut self, capacity: u32, refill_per_sec: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_per_sec).min(capacity as f64);
        self.last = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn is_idle(&self, now: Instant, max_idle: Duration) -> bool {
        now.duration_since(self.last) >= max_idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_bucket_rejects_until_refill() {
        let limiter = RateLimiter::new(RateLimitConfig { instruction_per_min: 2, control_per_min: 2 });
        let session = SessionId::new();
        assert!(limiter.allow(session, RateLimitKind::Instruction));
        assert!(limiter.allow(session, RateLimitKind::Instruction));
        assert!(!limiter.allow(session, RateLimitKind::Instruction));
    }

    #[test]
    fn zero_limit_disables_throttling() {
        let limiter = RateLimiter::new(RateLimitConfig { instruction_per_min: 0, control_per_min: 0 });
        let session = SessionId::new();
        for _ in 0..100 {
            assert!(limiter.allow(session, RateLimitKind::Instruction));
        }
    }

    #[test]
    fn prune_idle_removes_stale_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig { instruction_per_min: 10, control_per_min: 5 });
        let session = SessionId::new();
        limiter.buckets.insert(format!("{}:Instruction", session.0), TokenBucket::new(5));
        limiter.buckets.insert(
            format!("{}:Control", session.0),
            TokenBucket { tokens: 0.0, last: Instant::now() - Duration::from_secs(600) },
        );

        let removed = limiter.prune_idle(Duration::from_secs(300));
        assert_eq!(removed, 1);
        assert!(limiter.buckets.contains_key(&format!("{}:Instruction", session.0)));
        assert!(!limiter.buckets.contains_key(&format!("{}:Control", session.0)));
    }
}
