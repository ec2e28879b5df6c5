//! Idempotency cache for inbound trigger deduplication.
//!
//! Remote channels redeliver: the same trigger can arrive more than once
//! in a short window. The cache admits a key the first time and rejects
//! it while it remains inside the expiry window. Admission is an atomic
//! check-and-insert under one lock, so concurrent duplicates yield
//! exactly one admit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

/// Default expiry window for admitted keys.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Default entry-count ceiling that triggers a sweep.
pub const DEFAULT_CEILING: usize = 1000;

/// Bounded, time-windowed admit/reject set.
///
/// Each admitted key is scheduled for individual removal after the
/// window. Independently, whenever the entry count exceeds the ceiling,
/// a sweep drops every entry older than the window — the backstop when
/// timers lag behind a burst of traffic. Construct once and share by
/// clone; all clones see the same membership.
#[derive(Debug, Clone)]
pub struct IdempotencyCache {
    entries: Arc<Mutex<HashMap<String, Instant>>>,
    window: Duration,
    ceiling: usize,
    schedule_timers: bool,
}

impl IdempotencyCache {
    /// Create a cache with the given expiry window and size ceiling.
    #[must_use]
    pub fn new(window: Duration, ceiling: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            window,
            ceiling,
            schedule_timers: true,
        }
    }

    /// Disable per-entry removal timers, leaving only the ceiling sweep.
    ///
    /// Deterministic mode for tests and embeddings without a long-lived
    /// runtime; membership then shrinks only via sweeps.
    #[must_use]
    pub fn without_expiry_timers(mut self) -> Self {
        self.schedule_timers = false;
        self
    }

    /// Admit a key. Returns true exactly once per key per window.
    ///
    /// A key present at lookup time is always "already seen", whether or
    /// not its individual timer has fired yet.
    ///
    /// Must be called within a tokio runtime when timers are enabled.
    pub fn admit(&self, key: &str) -> bool {
        let stamp = Instant::now();
        let admitted = {
            let mut entries = self.entries.lock().expect("dedupe lock poisoned");
            if entries.contains_key(key) {
                false
            } else {
                if entries.len() > self.ceiling {
                    Self::sweep(&mut entries, self.window);
                }
                entries.insert(key.to_string(), stamp);
                true
            }
        };

        if admitted {
            tracing::debug!(key, "Admitted trigger");
            if self.schedule_timers {
                self.schedule_removal(key.to_string(), stamp);
            }
        } else {
            tracing::debug!(key, "Rejected duplicate trigger");
        }
        admitted
    }

    /// Current entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("dedupe lock poisoned").len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn the per-entry removal timer. Only removes the entry when its
    /// stamp still matches, so a key re-admitted after a sweep is not
    /// evicted early by a stale timer.
    fn schedule_removal(&self, key: String, stamp: Instant) {
        let entries = Arc::clone(&self.entries);
        let window = self.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let mut entries = entries.lock().expect("dedupe lock poisoned");
            if entries.get(&key) == Some(&stamp) {
                entries.remove(&key);
            }
        });
    }

    fn sweep(entries: &mut HashMap<String, Instant>, window: Duration) {
        let before = entries.len();
        let cutoff = Instant::now();
        entries.retain(|_, stamp| cutoff.duration_since(*stamp) < window);
        tracing::debug!(before, after = entries.len(), "Swept expired dedupe entries");
    }
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_CEILING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_admit_true_exactly_once() {
        let cache = IdempotencyCache::new(Duration::from_secs(60), 100);
        assert!(cache.admit("chat-1:message-1"));
        assert!(!cache.admit("chat-1:message-1"));
        assert!(!cache.admit("chat-1:message-1"));
        assert!(cache.admit("chat-1:message-2"));
    }

    #[tokio::test]
    async fn test_concurrent_admits_single_winner() {
        let cache = IdempotencyCache::new(Duration::from_secs(60), 100);
        let mut handles = Vec::new();
        for _ in 0..32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.admit("same-key") }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_window() {
        let cache = IdempotencyCache::new(Duration::from_secs(60), 100);
        assert!(cache.admit("k"));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(cache.is_empty());
        assert!(cache.admit("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_inside_window_stays_seen() {
        let cache = IdempotencyCache::new(Duration::from_secs(60), 100);
        assert!(cache.admit("k"));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!cache.admit("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_sweep_removes_stale_entries() {
        let cache = IdempotencyCache::new(Duration::from_secs(60), 3).without_expiry_timers();

        for key in ["a", "b", "c", "d"] {
            assert!(cache.admit(key));
        }
        // Nothing was stale yet, so everything survived the overflow.
        assert_eq!(cache.len(), 4);

        tokio::time::advance(Duration::from_secs(61)).await;

        // All four are now older than the window: the count exceeds the
        // ceiling, so the next admit sweeps membership to zero first.
        assert!(cache.admit("e"));
        assert_eq!(cache.len(), 1);
        assert!(cache.admit("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_fresh_entries() {
        let cache = IdempotencyCache::new(Duration::from_secs(60), 2).without_expiry_timers();

        assert!(cache.admit("old-1"));
        assert!(cache.admit("old-2"));
        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(cache.admit("fresh-1"));
        assert!(cache.admit("fresh-2"));
        // The sweep at the fourth admit dropped only the stale pair.
        assert_eq!(cache.len(), 2);
        assert!(!cache.admit("fresh-1"));
    }

    #[tokio::test]
    async fn test_clones_share_membership() {
        let cache = IdempotencyCache::default();
        let clone = cache.clone();
        assert!(cache.admit("shared"));
        assert!(!clone.admit("shared"));
    }
}
