use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{RateLimitDecision, RateLimiter};

struct Window {
    started_at: Instant,
    count: u32,
}

/// In-process limiter backed by a mutex-guarded map. The increment happens
/// under the same guard as the check, so concurrent callers cannot both pass
/// on the last remaining slot. Expired windows are swept on access, keeping
/// the map bounded without a background task.
#[derive(Default)]
pub struct MemoryRateLimiter {
    windows: Mutex<HashMap<(String, String), Window>>,
}

impl MemoryRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimiter for MemoryRateLimiter {
    fn check_and_increment(
        &self,
        subject_key: &str,
        endpoint_key: &str,
        limit: u32,
        window: Duration,
    ) -> RateLimitDecision {
        let now = Instant::now();
        let Ok(mut windows) = self.windows.lock() else {
            // A poisoned lock means a panic elsewhere; fail open rather than
            // deny all traffic.
            return RateLimitDecision::Allowed;
        };

        windows.retain(|_, entry| now.duration_since(entry.started_at) < window);

        let key = (subject_key.to_string(), endpoint_key.to_string());
        let entry = windows.entry(key).or_insert(Window {
            started_at: now,
            count: 0,
        });

        if entry.count >= limit {
            let elapsed = now.duration_since(entry.started_at);
            let retry_after = window.saturating_sub(elapsed);
            return RateLimitDecision::Limited { retry_after };
        }

        entry.count += 1;
        RateLimitDecision::Allowed
    }
}
