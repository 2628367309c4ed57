// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Host Error Cache
 * Bounded, time-decaying per-host failure tracking
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use moka::sync::Cache;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::errors::NetworkError;

/// Default window after which a quiet host's counter decays
pub const DEFAULT_TRACKING_TIME: Duration = Duration::from_secs(300);

/// Default bound on tracked hosts
pub const DEFAULT_MAX_HOSTS: u64 = 10_000;

/// Per-host entry. The counter is monotonic within a tracking window;
/// reads past the window reset it before use.
#[derive(Debug)]
struct HostErrorEntry {
    errors: AtomicU32,
    /// Millis since cache creation of the last update
    last_seen_ms: AtomicU64,
}

/// Bounded map of normalized host -> decaying error counter. Once a host
/// crosses the threshold, `check` answers true and callers skip it until
/// the tracking window elapses after the last increment.
pub struct HostErrorCache {
    entries: Cache<String, Arc<HostErrorEntry>>,
    threshold: u32,
    tracking_time: Duration,
    epoch: Instant,
    closed: std::sync::atomic::AtomicBool,
}

impl HostErrorCache {
    pub fn new(threshold: u32, max_hosts: u64, tracking_time: Duration) -> Self {
        Self {
            entries: Cache::new(max_hosts),
            threshold,
            tracking_time,
            epoch: Instant::now(),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn with_defaults(threshold: u32) -> Self {
        Self::new(threshold, DEFAULT_MAX_HOSTS, DEFAULT_TRACKING_TIME)
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Reset the counter when the entry has been quiet past the window.
    /// Returns the current counter value after any decay.
    fn decayed_count(&self, entry: &HostErrorEntry) -> u32 {
        let last = entry.last_seen_ms.load(Ordering::Acquire);
        let now = self.now_ms();
        if now.saturating_sub(last) > self.tracking_time.as_millis() as u64 {
            // Quiet period elapsed; reopen the host.
            entry.errors.store(0, Ordering::Release);
            entry.last_seen_ms.store(now, Ordering::Release);
            return 0;
        }
        entry.errors.load(Ordering::Acquire)
    }

    /// True when the host crossed the error threshold; callers must skip it.
    pub fn check(&self, host: &str) -> bool {
        if self.closed.load(Ordering::Relaxed) {
            return false;
        }
        match self.entries.get(host) {
            Some(entry) => {
                let count = self.decayed_count(&entry);
                let skip = count >= self.threshold;
                if skip {
                    debug!("Skipping {host}: {count} tracked errors");
                }
                skip
            }
            None => false,
        }
    }

    /// Classify and record a failure. Only dial-class errors count.
    pub fn mark_failed(&self, host: &str, error: &NetworkError) {
        if self.closed.load(Ordering::Relaxed) || !error.is_trackable() {
            return;
        }
        let entry = self
            .entries
            .get_with(host.to_string(), || {
                Arc::new(HostErrorEntry {
                    errors: AtomicU32::new(0),
                    last_seen_ms: AtomicU64::new(self.now_ms()),
                })
            });

        // Decay first so stale counters do not accumulate across windows
        self.decayed_count(&entry);

        let count = entry.errors.fetch_add(1, Ordering::AcqRel) + 1;
        entry.last_seen_ms.store(self.now_ms(), Ordering::Release);

        if count == self.threshold {
            warn!(
                "Host {host} reached error threshold ({count}, kind={})",
                error.kind()
            );
        }
    }

    /// Current counter for a host, after decay
    pub fn error_count(&self, host: &str) -> u32 {
        self.entries
            .get(host)
            .map(|e| self.decayed_count(&e))
            .unwrap_or(0)
    }

    /// Release bookkeeping; subsequent calls are no-ops
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.entries.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refused() -> NetworkError {
        NetworkError::ConnectionRefused {
            target: "10.0.0.1:80".into(),
        }
    }

    #[test]
    fn test_threshold_trips_after_max_errors() {
        let cache = HostErrorCache::with_defaults(30);
        for _ in 0..29 {
            cache.mark_failed("dead.example", &refused());
        }
        assert!(!cache.check("dead.example"));

        cache.mark_failed("dead.example", &refused());
        assert!(cache.check("dead.example"));
    }

    #[test]
    fn test_untracked_errors_do_not_count() {
        let cache = HostErrorCache::with_defaults(3);
        let reset = NetworkError::ConnectionReset {
            target: "x".into(),
        };
        for _ in 0..10 {
            cache.mark_failed("flaky.example", &reset);
        }
        assert!(!cache.check("flaky.example"));
        assert_eq!(cache.error_count("flaky.example"), 0);
    }

    #[test]
    fn test_decay_reopens_host() {
        let cache = HostErrorCache::new(2, 100, Duration::from_millis(50));
        cache.mark_failed("slow.example", &refused());
        cache.mark_failed("slow.example", &refused());
        assert!(cache.check("slow.example"));

        std::thread::sleep(Duration::from_millis(80));
        assert!(!cache.check("slow.example"));
        assert_eq!(cache.error_count("slow.example"), 0);
    }

    #[test]
    fn test_unknown_host_is_clear() {
        let cache = HostErrorCache::with_defaults(30);
        assert!(!cache.check("never-seen.example"));
    }

    #[test]
    fn test_close_disables_tracking() {
        let cache = HostErrorCache::with_defaults(1);
        cache.mark_failed("a.example", &refused());
        assert!(cache.check("a.example"));
        cache.close();
        assert!(!cache.check("a.example"));
        cache.mark_failed("b.example", &refused());
        assert!(!cache.check("b.example"));
    }

    #[test]
    fn test_concurrent_marks() {
        let cache = Arc::new(HostErrorCache::with_defaults(100));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for _ in 0..10 {
                    cache.mark_failed("con.example", &refused());
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.error_count("con.example"), 80);
    }
}
