//! Sliding-window request counting per session.
//!
//! Sessions that exceed the configured number of requests inside the window
//! are flagged so rules can react through the `volumetric:session` label.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default counting window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Default request allowance per window.
pub const DEFAULT_MAX_REQUESTS: usize = 300;

/// Session count above which idle sessions are swept on insert.
const SWEEP_THRESHOLD: usize = 10_000;

/// Per-session sliding-window counter.
#[derive(Clone)]
pub struct VolumetricTracker {
    window: Duration,
    max_requests: usize,
    sessions: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
}

impl std::fmt::Debug for VolumetricTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumetricTracker")
            .field("window", &self.window)
            .field("max_requests", &self.max_requests)
            .field("sessions", &self.sessions.lock().len())
            .finish()
    }
}

impl Default for VolumetricTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_MAX_REQUESTS)
    }
}

impl VolumetricTracker {
    /// Creates a tracker allowing `max_requests` per `window`.
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            window,
            max_requests,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Records a request and returns true if the session is over its allowance.
    pub fn record(&self, session: &str) -> bool {
        self.record_at(session, Instant::now())
    }

    /// Records a request observed at `now`.
    pub fn record_at(&self, session: &str, now: Instant) -> bool {
        let mut sessions = self.sessions.lock();

        if sessions.len() > SWEEP_THRESHOLD && !sessions.contains_key(session) {
            let window = self.window;
            sessions.retain(|_, hits| {
                hits.back()
                    .is_some_and(|last| now.saturating_duration_since(*last) < window)
            });
        }

        let hits = sessions.entry(session.to_string()).or_default();
        while let Some(first) = hits.front() {
            if now.saturating_duration_since(*first) >= self.window {
                hits.pop_front();
            } else {
                break;
            }
        }
        hits.push_back(now);
        // The newest max_requests + 1 hits decide the flag
        while hits.len() > self.max_requests + 1 {
            hits.pop_front();
        }

        hits.len() > self.max_requests
    }

    /// Number of hits retained for a session.
    pub fn retained_hits(&self, session: &str) -> usize {
        self.sessions.lock().get(session).map_or(0, VecDeque::len)
    }

    /// Number of tracked sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}
