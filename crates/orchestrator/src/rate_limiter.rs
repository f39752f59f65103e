//! Scan-start rate limiting

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as Governor};
use std::num::NonZeroU32;

/// Caps how many scans may start per second. A rate of 0 disables limiting.
pub struct RateLimiter {
    inner: Option<DefaultDirectRateLimiter>,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        Self {
            inner: NonZeroU32::new(requests_per_second)
                .map(|rate| Governor::direct(Quota::per_second(rate))),
        }
    }

    #[inline]
    pub fn is_limited(&self) -> bool {
        self.inner.is_some()
    }

    /// Wait for the next permit.
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.inner {
            limiter.until_ready().await;
        }
    }
}
