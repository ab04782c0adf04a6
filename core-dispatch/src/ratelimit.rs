// =====================================================================================
// File: core-dispatch/src/ratelimit.rs
// Description: Fixed-window rate limiting for session opening
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::RateLimitConfig;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

struct Window {
    requests: u32,
    window_start: Instant,
}

/// In-memory fixed-window rate limiter keyed by anonymous id.
pub struct SessionRateLimiter {
    windows: RwLock<HashMap<String, Window>>,
    limit: u32,
    window: Duration,
}

impl SessionRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            limit: config.open_session_limit,
            window: Duration::from_secs(config.window_seconds),
        }
    }

    /// Record one request for the key. Returns the seconds until the window
    /// resets when the limit is exceeded.
    pub async fn check(&self, key: &str) -> Result<(), u64> {
        let mut windows = self.windows.write().await;
        let entry = windows.entry(key.to_string()).or_insert(Window {
            requests: 0,
            window_start: Instant::now(),
        });

        if entry.window_start.elapsed() >= self.window {
            entry.requests = 0;
            entry.window_start = Instant::now();
        }

        if entry.requests >= self.limit {
            let retry_after = self
                .window
                .saturating_sub(entry.window_start.elapsed())
                .as_secs()
                .max(1);
            debug!(key, retry_after, "rate limit exceeded");
            return Err(retry_after);
        }
        entry.requests += 1;
        Ok(())
    }

    /// Drop expired windows.
    pub async fn cleanup(&self) {
        let window = self.window;
        self.windows
            .write()
            .await
            .retain(|_, entry| entry.window_start.elapsed() < window);
    }
}
