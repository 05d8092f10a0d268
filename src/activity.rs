use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

/// Tracks the timestamp of the last session activity (PTY output, input,
/// join, or resize).
///
/// The idle reaper polls `idle_for()` to find sessions whose inactivity
/// exceeds the configured timeout; descriptors report `last_active_ms()` as
/// a wall-clock value.
#[derive(Clone)]
pub struct ActivityTracker {
    tx: Arc<watch::Sender<Instant>>,
    last_active_unix_ms: Arc<AtomicU64>,
}

fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityTracker {
    /// Create a new tracker seeded with the current instant.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Instant::now());
        Self {
            tx: Arc::new(tx),
            last_active_unix_ms: Arc::new(AtomicU64::new(unix_ms_now())),
        }
    }

    /// Record activity. Safe to call from blocking threads.
    pub fn touch(&self) {
        self.last_active_unix_ms.store(unix_ms_now(), Ordering::Release);
        self.tx.send_replace(Instant::now());
    }

    /// How long the session has gone without activity.
    pub fn idle_for(&self) -> Duration {
        self.tx.borrow().elapsed()
    }

    /// Wall-clock timestamp of the last activity, in unix milliseconds.
    pub fn last_active_ms(&self) -> u64 {
        self.last_active_unix_ms.load(Ordering::Acquire)
    }
}
