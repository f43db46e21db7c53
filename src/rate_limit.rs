use std::time::Instant;

use dashmap::DashMap;

/// The three independently-limited classes of inbound request (spec.md
/// §4.9): a misbehaving client hammering ORDER must not also starve its
/// own PRODUCTION_UPDATE or ACCEPT_OFFER traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionClass {
    Order,
    Production,
    OfferReply,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-team, per-action-class token bucket. Grounded in
/// `auth/rate_limit.rs`'s `DashMap`-backed limiter, reworked from a
/// fixed sliding window into true token-bucket refill so bursts within
/// capacity are allowed without waiting for a window boundary.
pub struct RateLimiter {
    buckets: DashMap<(String, ActionClass), Bucket>,
    capacity: f64,
    refill_per_sec: f64,
}

impl RateLimiter {
    pub fn new(capacity_per_minute: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity: capacity_per_minute as f64,
            refill_per_sec: capacity_per_minute as f64 / 60.0,
        }
    }

    /// Returns `true` if the request is allowed and consumes one token.
    pub fn allow(&self, team: &str, class: ActionClass) -> bool {
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry((team.to_string(), class))
            .or_insert_with(|| Bucket { tokens: self.capacity, last_refill: now });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_requests_up_to_capacity() {
        let limiter = RateLimiter::new(60);
        for _ in 0..60 {
            assert!(limiter.allow("team-a", ActionClass::Order));
        }
        assert!(!limiter.allow("team-a", ActionClass::Order));
    }

    #[test]
    fn action_classes_are_independent() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.allow("team-a", ActionClass::Order));
        assert!(!limiter.allow("team-a", ActionClass::Order));
        assert!(limiter.allow("team-a", ActionClass::Production));
    }

    #[test]
    fn teams_are_independent() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.allow("team-a", ActionClass::Order));
        assert!(limiter.allow("team-b", ActionClass::Order));
    }
}
