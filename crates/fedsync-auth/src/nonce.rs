//! Replay tracking for single-use random tokens.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// If the ledger grows past this many entries between sweeps, expired
/// entries are evicted inline on the next insert.
const INLINE_EVICTION_THRESHOLD: usize = 10_000;

/// Tracks recently-seen nonces so the message carrying a repeated value can
/// be rejected as a replay.
///
/// Eviction is lossy by design: once an entry ages past the window it is
/// forgotten and the value would be accepted again. The window must
/// therefore exceed the maximum tolerated clock skew plus transit time.
#[derive(Debug)]
pub struct NonceLedger {
    window: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl NonceLedger {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if `nonce` was recorded within the window.
    pub fn contains(&self, nonce: &str) -> bool {
        let seen = self.lock();
        match seen.get(nonce) {
            Some(first_seen) => first_seen.elapsed() <= self.window,
            None => false,
        }
    }

    /// Records a nonce as seen now.
    pub fn record(&self, nonce: String) {
        let mut seen = self.lock();
        if seen.len() > INLINE_EVICTION_THRESHOLD {
            let window = self.window;
            seen.retain(|_, first_seen| first_seen.elapsed() <= window);
        }
        seen.insert(nonce, Instant::now());
    }

    /// Purges entries older than the window. Returns the evicted count.
    pub fn sweep(&self) -> usize {
        let mut seen = self.lock();
        let before = seen.len();
        let window = self.window;
        seen.retain(|_, first_seen| first_seen.elapsed() <= window);
        before - seen.len()
    }

    /// Number of tracked nonces, including any not yet swept.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // Recover from a panicked holder rather than refuse all
                // handshakes; the worst outcome is a stale entry.
                tracing::error!("nonce ledger lock poisoned, recovering with stale state");
                poisoned.into_inner()
            }
        }
    }
}
