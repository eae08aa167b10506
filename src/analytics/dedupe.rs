use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::analytics::constants::{DEDUPE_CLEANUP_THRESHOLD, DEDUPE_WINDOW};
use crate::platform::Clock;

/// Drops repeats of the same key inside a short window, which is what a double-invoked render
/// effect produces. Two genuinely distinct events sharing a key inside the window merge into one.
pub struct DedupeFilter {
    window_ms: u64,
    threshold: usize,
    clock: Arc<dyn Clock>,
    last_seen: Mutex<HashMap<String, u64>>,
}

impl DedupeFilter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_limits(clock, DEDUPE_WINDOW, DEDUPE_CLEANUP_THRESHOLD)
    }

    pub fn with_limits(clock: Arc<dyn Clock>, window: Duration, threshold: usize) -> Self {
        Self {
            window_ms: window.as_millis() as u64,
            threshold,
            clock,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// `true` when `key` was accepted within the window. A skipped key keeps its original
    /// timestamp, so the window is measured from the last accepted occurrence.
    pub fn should_skip(&self, key: &str) -> bool {
        let now = self.clock.now_millis();
        let mut last_seen = self.last_seen.lock().unwrap();

        if let Some(&last) = last_seen.get(key) {
            if now.saturating_sub(last) < self.window_ms {
                return true;
            }
        }

        last_seen.insert(key.to_string(), now);
        if last_seen.len() > self.threshold {
            let cutoff = now.saturating_sub(self.window_ms);
            last_seen.retain(|_, seen| *seen >= cutoff);
        }
        false
    }

    pub fn len(&self) -> usize {
        self.last_seen.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
