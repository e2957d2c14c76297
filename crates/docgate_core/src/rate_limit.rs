//! Rate Limiter - Per-Caller Sliding Window Admission
//!
//! Each caller gets a window of call timestamps. On every `admit` the window
//! is pruned of entries at or before `now - W`; the call is admitted and
//! recorded only if fewer than `N` entries remain. This bounds any
//! `W`-length interval to `N` admissions, not just aligned buckets.
//!
//! # Thread Safety
//!
//! Windows live in a fixed number of shards keyed by a hash of the caller id.
//! The prune-count-record sequence runs under the shard's mutex, so two
//! concurrent calls from the same caller can never both observe spare
//! capacity. Callers in different shards proceed in parallel.
//!
//! # Memory
//!
//! Every `SWEEP_INTERVAL` admissions the limiter drops callers whose windows
//! have emptied. An absent window is equivalent to an empty one.

use crate::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

const SWEEP_INTERVAL: u64 = 1024;

type Shard = HashMap<String, VecDeque<DateTime<Utc>>>;

/// Sliding window limits, fixed at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    /// Maximum admitted calls per window (N)
    pub capacity: usize,

    /// Window length (W)
    pub window: Duration,

    /// Number of lock shards
    pub shards: usize,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            capacity: 100,
            window: Duration::seconds(60),
            shards: 16,
        }
    }
}

/// Per-caller sliding window rate limiter
pub struct RateLimiter {
    capacity: usize,
    window: Duration,
    shards: Vec<Mutex<Shard>>,
    clock: Arc<dyn Clock>,
    admissions: AtomicU64,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings, clock: Arc<dyn Clock>) -> Self {
        let shard_count = settings.shards.max(1);
        Self {
            capacity: settings.capacity,
            window: settings.window,
            shards: (0..shard_count).map(|_| Mutex::new(HashMap::new())).collect(),
            clock,
            admissions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit or reject one call from `caller`
    ///
    /// Records the call only when it is admitted. Never fails.
    pub fn admit(&self, caller: &str) -> bool {
        let now = self.clock.now();
        let admitted = {
            let mut shard = self.shard(caller);
            let window = shard.entry(caller.to_string()).or_default();
            prune(window, now - self.window);
            if window.len() < self.capacity {
                window.push_back(now);
                true
            } else {
                false
            }
        };

        if admitted {
            let count = self.admissions.fetch_add(1, Ordering::Relaxed) + 1;
            if count % SWEEP_INTERVAL == 0 {
                self.sweep();
            }
        } else {
            trace!(caller = %caller, "Sliding window full");
        }
        admitted
    }

    /// Calls `caller` may still make in the current window
    pub fn remaining(&self, caller: &str) -> usize {
        let now = self.clock.now();
        let mut shard = self.shard(caller);
        match shard.get_mut(caller) {
            Some(window) => {
                prune(window, now - self.window);
                self.capacity.saturating_sub(window.len())
            }
            None => self.capacity,
        }
    }

    /// Earliest instant at which `caller` will be admitted again
    ///
    /// `now` when the caller has spare capacity.
    pub fn reset_at(&self, caller: &str) -> DateTime<Utc> {
        let now = self.clock.now();
        let mut shard = self.shard(caller);
        let Some(window) = shard.get_mut(caller) else {
            return now;
        };
        prune(window, now - self.window);
        if window.len() < self.capacity {
            return now;
        }
        // The (len - capacity + 1)-th oldest entry must expire first
        let index = window.len() - self.capacity;
        window
            .get(index)
            .map(|oldest| *oldest + self.window)
            .unwrap_or(now)
    }

    /// Drop callers whose windows are empty
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let cutoff = now - self.window;
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap_or_else(|e| e.into_inner());
            let before = shard.len();
            shard.retain(|_, window| {
                prune(window, cutoff);
                !window.is_empty()
            });
            removed += before - shard.len();
        }
        if removed > 0 {
            debug!("Rate limiter sweep dropped {} idle callers", removed);
        }
        removed
    }

    /// Number of callers with a window currently held in memory
    pub fn tracked_callers(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(|e| e.into_inner()).len())
            .sum()
    }

    fn shard(&self, caller: &str) -> MutexGuard<'_, Shard> {
        let mut hasher = DefaultHasher::new();
        caller.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        // A poisoned shard still holds consistent windows: every mutation is a
        // single push or pop.
        self.shards[index].lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("capacity", &self.capacity)
            .field("window", &self.window)
            .field("shards", &self.shards.len())
            .finish()
    }
}

/// Remove timestamps at or before `cutoff` (windows are kept in time order)
fn prune(window: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
    while window.front().is_some_and(|t| *t <= cutoff) {
        window.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(capacity: usize, window_secs: i64) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let limiter = RateLimiter::new(
            RateLimitSettings {
                capacity,
                window: Duration::seconds(window_secs),
                shards: 4,
            },
            clock.clone(),
        );
        (limiter, clock)
    }

    #[test]
    fn test_admits_up_to_capacity_then_rejects() {
        let (limiter, clock) = limiter(100, 60);

        for i in 0..100 {
            assert!(limiter.admit("client-1"), "call {} should be admitted", i + 1);
            clock.advance(Duration::milliseconds(100));
        }
        assert!(!limiter.admit("client-1"));
        assert_eq!(limiter.remaining("client-1"), 0);
    }

    #[test]
    fn test_rejected_calls_are_not_recorded() {
        let (limiter, clock) = limiter(2, 10);

        assert!(limiter.admit("a"));
        assert!(limiter.admit("a"));
        for _ in 0..50 {
            assert!(!limiter.admit("a"));
        }

        // Only the two admitted calls count; both expire together
        clock.advance(Duration::seconds(10));
        assert_eq!(limiter.remaining("a"), 2);
    }

    #[test]
    fn test_window_slides() {
        let (limiter, clock) = limiter(3, 60);

        assert!(limiter.admit("a")); // t=0
        clock.advance(Duration::seconds(20));
        assert!(limiter.admit("a")); // t=20
        clock.advance(Duration::seconds(20));
        assert!(limiter.admit("a")); // t=40
        assert!(!limiter.admit("a"));

        // t=59: nothing has expired yet
        clock.advance(Duration::seconds(19));
        assert!(!limiter.admit("a"));

        // t=60: the first call leaves the window
        clock.advance(Duration::seconds(1));
        assert!(limiter.admit("a"));
        assert!(!limiter.admit("a"));
    }

    #[test]
    fn test_no_burst_across_bucket_boundary() {
        let (limiter, clock) = limiter(5, 60);

        clock.advance(Duration::seconds(55));
        for _ in 0..5 {
            assert!(limiter.admit("a"));
        }
        // A fixed-bucket limiter would reset at t=60
        clock.advance(Duration::seconds(10));
        assert!(!limiter.admit("a"));
    }

    #[test]
    fn test_callers_are_independent() {
        let (limiter, _clock) = limiter(1, 60);

        assert!(limiter.admit("a"));
        assert!(!limiter.admit("a"));
        assert!(limiter.admit("b"));
        assert_eq!(limiter.remaining("c"), 1);
    }

    #[test]
    fn test_reset_at() {
        let (limiter, clock) = limiter(2, 60);
        let start = clock.now();

        assert_eq!(limiter.reset_at("a"), start);
        assert!(limiter.admit("a"));
        clock.advance(Duration::seconds(5));
        assert!(limiter.admit("a"));

        assert_eq!(limiter.reset_at("a"), start + Duration::seconds(60));

        clock.set(start + Duration::seconds(60));
        assert_eq!(limiter.reset_at("a"), clock.now());
        assert!(limiter.admit("a"));
    }

    #[test]
    fn test_sweep_drops_idle_callers() {
        let (limiter, clock) = limiter(5, 10);

        limiter.admit("a");
        limiter.admit("b");
        assert_eq!(limiter.tracked_callers(), 2);

        clock.advance(Duration::seconds(11));
        limiter.admit("c");
        assert_eq!(limiter.sweep(), 2);
        assert_eq!(limiter.tracked_callers(), 1);
    }

    #[test]
    fn test_concurrent_same_caller_never_over_admits() {
        let (limiter, _clock) = limiter(50, 60);
        let admitted = AtomicU64::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..100 {
                        if limiter.admit("shared") {
                            admitted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::Relaxed), 50);
    }
}
