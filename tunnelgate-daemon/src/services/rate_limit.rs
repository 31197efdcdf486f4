//! Rate limiting for the enrollment endpoint.
//!
//! Slows down brute-force guessing of credential words.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// The request exceeded the configured rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate limit exceeded, try again later")]
pub struct RateLimited;

/// Global limiter shared by every redemption request.
#[derive(Clone)]
pub struct EnrollmentRateLimiter {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl EnrollmentRateLimiter {
    /// Create a limiter allowing `per_second` sustained requests and bursts of
    /// `burst_size`. Zero falls back to the defaults (2/s, burst 10).
    pub fn new(per_second: u32, burst_size: u32) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN.saturating_add(1));
        let burst_size = NonZeroU32::new(burst_size).unwrap_or(NonZeroU32::MIN.saturating_add(9));

        let quota = Quota::per_second(per_second).allow_burst(burst_size);

        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    pub fn check(&self) -> Result<(), RateLimited> {
        self.limiter.check().map_err(|_| {
            tracing::warn!("Rate limit exceeded for enrollment endpoint");
            RateLimited
        })
    }
}

impl Default for EnrollmentRateLimiter {
    fn default() -> Self {
        Self::new(2, 10)
    }
}
