//! Per-client request budget for the IPC command loop

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::ClientId;

/// Fixed-window request counter keyed by IPC client.
///
/// A client may issue `limit` requests per `window`; the count resets when
/// a request arrives after the window has elapsed.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    windows: HashMap<ClientId, Window>,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    opened_at: Instant,
    used: u32,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: HashMap::new(),
        }
    }

    /// Count a request; false when the client is over its budget
    pub fn check(&mut self, client_id: &ClientId) -> bool {
        self.check_at(client_id, Instant::now())
    }

    fn check_at(&mut self, client_id: &ClientId, now: Instant) -> bool {
        let window = self.windows.entry(client_id.clone()).or_insert(Window {
            opened_at: now,
            used: 0,
        });

        if now.duration_since(window.opened_at) >= self.window {
            *window = Window {
                opened_at: now,
                used: 0,
            };
        }

        if window.used >= self.limit {
            return false;
        }
        window.used += 1;
        true
    }

    /// Forget a disconnected client
    pub fn remove_client(&mut self, client_id: &ClientId) {
        self.windows.remove(client_id);
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_per_client() {
        let mut limiter = RateLimiter::new(2, Duration::from_secs(1));
        let a = ClientId::new();
        let b = ClientId::new();

        assert!(limiter.check(&a));
        assert!(limiter.check(&a));
        assert!(!limiter.check(&a));
        assert!(limiter.check(&b));
    }

    #[test]
    fn budget_resets_after_window() {
        let mut limiter = RateLimiter::new(1, Duration::from_secs(1));
        let client = ClientId::new();
        let start = Instant::now();

        assert!(limiter.check_at(&client, start));
        assert!(!limiter.check_at(&client, start + Duration::from_millis(500)));
        assert!(limiter.check_at(&client, start + Duration::from_secs(1)));
    }

    #[test]
    fn removed_client_starts_fresh() {
        let mut limiter = RateLimiter::new(1, Duration::from_secs(60));
        let client = ClientId::new();

        assert!(limiter.check(&client));
        limiter.remove_client(&client);
        assert_eq!(limiter.tracked_clients(), 0);
        assert!(limiter.check(&client));
    }
}
