//! Content-addressed duplicate suppression.
//!
//! Each gossiped consensus topic carries its own filter instance. A message
//! is keyed by its content hash; the first presentation within the TTL wins
//! and every later one is reported as a duplicate. Expired entries are swept
//! lazily on insert, so the sweep can never mistake a fresh message for a
//! duplicate.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Outcome of presenting a message to the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// First sighting within the TTL; process and re-publish.
    Fresh,
    /// Already seen within the TTL; drop.
    Duplicate,
}

/// Fixed-TTL suppression of repeated messages.
pub struct DedupFilter {
    ttl: Duration,
    // Content hash -> time of first sighting.
    seen: Mutex<HashMap<[u8; 32], Instant>>,
    // Inserts since the last sweep; bounds sweep frequency.
    inserts_since_sweep: Mutex<u32>,
}

/// Sweep at most once per this many inserts.
const SWEEP_INTERVAL: u32 = 64;

impl DedupFilter {
    /// A filter with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: Mutex::new(HashMap::new()),
            inserts_since_sweep: Mutex::new(0),
        }
    }

    /// Default filter with a 60 second TTL.
    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(60))
    }

    /// Present a content hash; records it if fresh.
    ///
    /// Read-modify-write is atomic under the internal lock.
    pub fn check_and_set(&self, hash: [u8; 32]) -> Freshness {
        let now = Instant::now();
        let mut seen = self.seen.lock();

        {
            let mut count = self.inserts_since_sweep.lock();
            *count += 1;
            if *count >= SWEEP_INTERVAL {
                *count = 0;
                seen.retain(|_, first_seen| now.duration_since(*first_seen) < self.ttl);
            }
        }

        match seen.get(&hash) {
            Some(first_seen) if now.duration_since(*first_seen) < self.ttl => Freshness::Duplicate,
            _ => {
                seen.insert(hash, now);
                Freshness::Fresh
            }
        }
    }

    /// Number of tracked entries, including any not yet swept.
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Whether the filter tracks no entries.
    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_is_fresh_then_duplicate() {
        let filter = DedupFilter::with_default_ttl();
        let hash = [1u8; 32];
        assert_eq!(filter.check_and_set(hash), Freshness::Fresh);
        assert_eq!(filter.check_and_set(hash), Freshness::Duplicate);
        assert_eq!(filter.check_and_set(hash), Freshness::Duplicate);
    }

    #[test]
    fn distinct_hashes_are_independent() {
        let filter = DedupFilter::with_default_ttl();
        assert_eq!(filter.check_and_set([1u8; 32]), Freshness::Fresh);
        assert_eq!(filter.check_and_set([2u8; 32]), Freshness::Fresh);
    }

    #[test]
    fn fresh_again_after_ttl() {
        let filter = DedupFilter::new(Duration::from_millis(20));
        let hash = [9u8; 32];
        assert_eq!(filter.check_and_set(hash), Freshness::Fresh);
        assert_eq!(filter.check_and_set(hash), Freshness::Duplicate);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(filter.check_and_set(hash), Freshness::Fresh);
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let filter = DedupFilter::new(Duration::from_millis(5));
        for i in 0..10u8 {
            filter.check_and_set([i; 32]);
        }
        std::thread::sleep(Duration::from_millis(10));
        // Push enough inserts to trigger a sweep.
        for i in 10..80u8 {
            filter.check_and_set([i; 32]);
        }
        assert!(filter.len() < 80);
    }
}
