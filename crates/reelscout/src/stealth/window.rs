use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::core::config::instagram::RATE_LIMIT_PER_HOUR;

/// Sliding-window limiter for unofficial platform endpoints.
/// Tracks timestamps of recent requests, per process.
pub struct RequestWindow {
    limit: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl Default for RequestWindow {
    fn default() -> Self {
        Self::new(RATE_LIMIT_PER_HOUR, Duration::from_secs(3600))
    }
}

impl RequestWindow {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Try to acquire a slot. Returns true if under limit, false if rate-limited.
    pub fn acquire(&self) -> bool {
        let mut ts = self.timestamps.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        while ts.front().is_some_and(|t| now.duration_since(*t) >= self.window) {
            ts.pop_front();
        }
        if ts.len() >= self.limit {
            return false;
        }
        ts.push_back(now);
        true
    }

    /// Time until the oldest request leaves the window.
    pub fn retry_after(&self) -> Option<Duration> {
        let ts = self.timestamps.lock().unwrap_or_else(|e| e.into_inner());
        if ts.len() < self.limit {
            return None;
        }
        ts.front().map(|oldest| self.window.saturating_sub(oldest.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_allows_under_limit() {
        let window = RequestWindow::default();
        for _ in 0..10 {
            assert!(window.acquire());
        }
        assert!(window.retry_after().is_none());
    }

    #[test]
    fn test_window_blocks_at_limit() {
        let window = RequestWindow::default();
        for _ in 0..RATE_LIMIT_PER_HOUR {
            assert!(window.acquire());
        }
        // Should be blocked now
        assert!(!window.acquire());
        assert!(window.retry_after().is_some());
    }

    #[test]
    fn test_window_expires_old_requests() {
        let window = RequestWindow::new(1, Duration::from_millis(20));
        assert!(window.acquire());
        assert!(!window.acquire());
        std::thread::sleep(Duration::from_millis(30));
        assert!(window.acquire());
    }
}
