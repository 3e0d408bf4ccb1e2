//! Shared `{low, high}` range of recently observed watch descriptors.
//!
//! # Unsynchronized updates
//!
//! Adders widen the range with a plain load, compare, store sequence on each
//! field. Nothing makes the pair, or even a single read-modify-write, atomic:
//! concurrent adders lose updates, and closers may observe `low > high`. The
//! closers feed whatever they read straight into `inotify_rm_watch`, which is
//! exactly the interleaving the harness exists to produce.
//!
//! The fields are `Relaxed` atomics only so that the race stays a logical one
//! rather than undefined behaviour in Rust. Do not turn `observe` into
//! `fetch_max`/`fetch_min` or put the pair behind a lock; either would close
//! the window under test.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

/// Value of `low` when no descriptor has been observed since the last reset.
pub const LOW_SENTINEL: i32 = i32::MAX;

#[derive(Debug)]
pub struct BoundsTracker {
    low: AtomicI32,
    high: AtomicI32,
    resets: AtomicU64,
}

impl Default for BoundsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundsTracker {
    pub fn new() -> Self {
        Self {
            low: AtomicI32::new(LOW_SENTINEL),
            high: AtomicI32::new(0),
            resets: AtomicU64::new(0),
        }
    }

    /// Widen the range to include `wd`. Racy compare-then-store.
    #[inline]
    pub fn observe(&self, wd: i32) {
        if wd > self.high.load(Ordering::Relaxed) {
            self.high.store(wd, Ordering::Relaxed);
        }
        if wd < self.low.load(Ordering::Relaxed) {
            self.low.store(wd, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn low(&self) -> i32 {
        self.low.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn high(&self) -> i32 {
        self.high.load(Ordering::Relaxed)
    }

    /// Two independent loads; the pair may be inconsistent.
    #[inline]
    pub fn snapshot(&self) -> (i32, i32) {
        (self.low(), self.high())
    }

    /// Forget `low` so adders re-narrow it from live descriptors.
    pub fn reset_low(&self) {
        self.low.store(LOW_SENTINEL, Ordering::Relaxed);
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of [`reset_low`](Self::reset_low) calls so far.
    pub fn reset_count(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }
}
