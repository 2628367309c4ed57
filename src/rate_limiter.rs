// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Rate Limiter
 * Scan-wide token bucket shared by all workers
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use nonzero_ext::*;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::ScanError;

type DirectLimiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// One limiter per scan. `take` suspends the calling worker until a token
/// is available; no fairness is guaranteed beyond the underlying primitive.
#[derive(Clone)]
pub enum RateLimiter {
    /// Never blocks
    Unlimited,
    /// Token bucket with the full budget available as burst at window start
    Limited(Arc<DirectLimiter>),
}

impl RateLimiter {
    /// Bucket of `count` tokens per second
    pub fn per_second(count: u32) -> Self {
        let count = NonZeroU32::new(count).unwrap_or(nonzero!(1u32));
        let quota = Quota::per_second(count).allow_burst(count);
        debug!("Rate limiter: {count} requests/second");
        RateLimiter::Limited(Arc::new(GovernorRateLimiter::direct(quota)))
    }

    /// Bucket of `count` tokens per minute. The whole budget may be spent
    /// at the start of the window; no window of one minute exceeds it.
    pub fn per_minute(count: u32) -> Self {
        let count = NonZeroU32::new(count).unwrap_or(nonzero!(1u32));
        let quota = Quota::per_minute(count).allow_burst(count);
        debug!("Rate limiter: {count} requests/minute");
        RateLimiter::Limited(Arc::new(GovernorRateLimiter::direct(quota)))
    }

    pub fn unlimited() -> Self {
        RateLimiter::Unlimited
    }

    /// Selection ladder: minute budget replaces the per-second bucket;
    /// zero for both means unlimited.
    pub fn from_options(rate_limit: u32, rate_limit_minute: u32) -> Self {
        if rate_limit_minute > 0 {
            Self::per_minute(rate_limit_minute)
        } else if rate_limit > 0 {
            Self::per_second(rate_limit)
        } else {
            Self::unlimited()
        }
    }

    /// Acquire one token, suspending until available. Cancellation releases
    /// the waiter with `ScanError::Cancelled`.
    pub async fn take(&self, cancel: &CancellationToken) -> Result<(), ScanError> {
        match self {
            RateLimiter::Unlimited => Ok(()),
            RateLimiter::Limited(limiter) => {
                tokio::select! {
                    _ = limiter.until_ready() => Ok(()),
                    _ = cancel.cancelled() => Err(ScanError::Cancelled),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_unlimited_never_blocks() {
        let limiter = RateLimiter::unlimited();
        let cancel = CancellationToken::new();
        let start = Instant::now();
        for _ in 0..1000 {
            limiter.take(&cancel).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_burst_within_budget_is_immediate() {
        let limiter = RateLimiter::per_second(50);
        let cancel = CancellationToken::new();
        let start = Instant::now();
        for _ in 0..50 {
            limiter.take(&cancel).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_excess_requests_block() {
        let limiter = RateLimiter::per_second(5);
        let cancel = CancellationToken::new();
        let start = Instant::now();
        // 5 immediate + 5 paced across the following second
        for _ in 0..10 {
            limiter.take(&cancel).await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_cancellation_releases_waiter() {
        let limiter = RateLimiter::per_minute(1);
        let cancel = CancellationToken::new();
        limiter.take(&cancel).await.unwrap();

        let waiter_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let limiter = limiter;
            limiter.take(&waiter_cancel).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(ScanError::Cancelled)));
    }

    #[test]
    fn test_selection_ladder() {
        assert!(matches!(
            RateLimiter::from_options(0, 0),
            RateLimiter::Unlimited
        ));
        assert!(matches!(
            RateLimiter::from_options(150, 0),
            RateLimiter::Limited(_)
        ));
        assert!(matches!(
            RateLimiter::from_options(150, 60),
            RateLimiter::Limited(_)
        ));
    }
}
