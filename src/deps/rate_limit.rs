use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::error::DependencyError;

/// Windows are swept for expiry once the map grows past this many
/// identities, at most once per window length.
const SWEEP_AT: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct Window {
    start: Instant,
    count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterSnapshot {
    pub threshold: u32,
    pub window_ms: u64,
    pub tracked_identities: usize,
}

/// Fixed-window request counter keyed by caller identity.
///
/// Each identity may make `threshold` requests per `window`; the window
/// starts at the identity's first request and restarts once it has fully
/// elapsed. Counters survive across requests and are shared by every
/// pipeline built from the same limiter.
#[derive(Debug)]
pub struct RateLimiter {
    threshold: u32,
    window: Duration,
    windows: DashMap<String, Window>,
    next_sweep: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self {
            threshold,
            window,
            windows: DashMap::new(),
            next_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Charge one request to `identity`.
    ///
    /// Returns the requests left in the current window, or `RateLimited`
    /// with the time until the window restarts.
    pub fn check(&self, identity: &str) -> Result<u32, DependencyError> {
        let now = Instant::now();
        self.maybe_sweep(now);

        let mut entry = self
            .windows
            .entry(identity.to_string())
            .or_insert(Window { start: now, count: 0 });
        let window = entry.value_mut();

        let elapsed = now.saturating_duration_since(window.start);
        if elapsed >= self.window {
            *window = Window { start: now, count: 0 };
        }

        if window.count >= self.threshold {
            let retry_after = self.window.saturating_sub(now.saturating_duration_since(window.start));
            debug!(identity, ?retry_after, "rate limit exceeded");
            return Err(DependencyError::RateLimited { retry_after });
        }

        window.count += 1;
        Ok(self.threshold - window.count)
    }

    fn maybe_sweep(&self, now: Instant) {
        if self.windows.len() <= SWEEP_AT {
            return;
        }
        // another caller is already sweeping
        let Ok(mut next) = self.next_sweep.try_lock() else {
            return;
        };
        if now < *next {
            return;
        }
        *next = now + self.window;
        drop(next);

        let removed = self.sweep();
        debug!(removed, tracked = self.windows.len(), "swept rate limit windows");
    }

    /// Drop every window that has fully elapsed. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let window = self.window;
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.start) < window);
        before.saturating_sub(self.windows.len())
    }

    /// Number of identities with a live counter.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    pub fn snapshot(&self) -> RateLimiterSnapshot {
        RateLimiterSnapshot {
            threshold: self.threshold,
            window_ms: self.window.as_millis() as u64,
            tracked_identities: self.windows.len(),
        }
    }
}
