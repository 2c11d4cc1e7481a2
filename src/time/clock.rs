//! Injectable wall clocks
//!
//! Constrained devices have no battery-backed clock, so the wall time is only
//! meaningful after a network time sync. Instead of mutating the host clock,
//! the time service records the synced value in a [`Clock`] that the session
//! and signer read from.

use super::Timestamp;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Source of token timestamps
pub trait Clock: Send + Sync {
    /// Current time in seconds since the Unix epoch
    fn now(&self) -> Timestamp;

    /// Record an authoritative time value
    fn set(&self, now: Timestamp);

    /// Whether `set` has been called at least once
    fn is_synchronized(&self) -> bool;
}

/// Clock anchored to the last network sync
///
/// After a sync, `now()` is the synced value plus the monotonic time elapsed
/// since, so later host clock jumps do not affect token timestamps. Before
/// the first sync it falls back to the host wall clock.
#[derive(Debug, Default)]
pub struct SyncedClock {
    anchor: Mutex<Option<(Instant, Timestamp)>>,
}

impl SyncedClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SyncedClock {
    fn now(&self) -> Timestamp {
        let anchor = *self.anchor.lock().unwrap_or_else(|e| e.into_inner());
        match anchor {
            Some((at, value)) => {
                let elapsed = i64::try_from(at.elapsed().as_secs()).unwrap_or(i64::MAX);
                value.saturating_add(elapsed)
            }
            None => chrono::Utc::now().timestamp(),
        }
    }

    fn set(&self, now: Timestamp) {
        *self.anchor.lock().unwrap_or_else(|e| e.into_inner()) = Some((Instant::now(), now));
    }

    fn is_synchronized(&self) -> bool {
        self.anchor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

/// Deterministic clock for tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
    synchronized: AtomicBool,
}

impl ManualClock {
    /// A clock reading `now` that counts as synchronized
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(now),
            synchronized: AtomicBool::new(true),
        }
    }

    /// A clock at the epoch that has never been synchronized
    pub fn unsynchronized() -> Self {
        Self {
            now: AtomicI64::new(0),
            synchronized: AtomicBool::new(false),
        }
    }

    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }

    fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
        self.synchronized.store(true, Ordering::SeqCst);
    }

    fn is_synchronized(&self) -> bool {
        self.synchronized.load(Ordering::SeqCst)
    }
}
