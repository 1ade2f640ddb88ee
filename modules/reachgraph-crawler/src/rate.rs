use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use reachgraph_common::Clock;

/// Check a sliding-window rate limit. Returns true if the request is
/// allowed, false if rate-limited. Prunes expired entries and records the
/// new request if allowed.
pub fn check_rate_limit(
    entries: &mut Vec<Instant>,
    now: Instant,
    window: Duration,
    max_in_window: usize,
) -> bool {
    let cutoff = now.checked_sub(window).unwrap_or(now);
    entries.retain(|t| *t > cutoff);
    if entries.len() >= max_in_window {
        return false;
    }
    entries.push(now);
    true
}

/// Sliding-window limiter shared by the crawl workers. Independent of the
/// worker-pool bound: the external service meters requests per minute no
/// matter how few workers run.
pub struct RateLimiter {
    entries: Mutex<Vec<Instant>>,
    window: Duration,
    max_in_window: usize,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(max_in_window: usize, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { entries: Mutex::new(Vec::new()), window, max_in_window, clock }
    }

    /// Take one slot, sleeping until the window has room.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut entries = self.entries.lock().await;
                let now = self.clock.now();
                if check_rate_limit(&mut entries, now, self.window, self.max_in_window) {
                    return;
                }
                // Entries are pushed in order, so the head is the next slot
                // to expire.
                entries
                    .first()
                    .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                    .unwrap_or(Duration::ZERO)
            };
            let wait = wait.max(Duration::from_millis(50));
            debug!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reachgraph_common::SystemClock;

    #[test]
    fn window_admits_up_to_max_then_rejects() {
        let mut entries = Vec::new();
        let now = Instant::now();
        let window = Duration::from_secs(60);

        for _ in 0..10 {
            assert!(check_rate_limit(&mut entries, now, window, 10));
        }
        assert!(!check_rate_limit(&mut entries, now, window, 10));
        assert_eq!(entries.len(), 10);
    }

    #[test]
    fn expired_entries_free_slots() {
        let mut entries = Vec::new();
        let start = Instant::now();
        let window = Duration::from_secs(60);

        for _ in 0..10 {
            assert!(check_rate_limit(&mut entries, start, window, 10));
        }
        assert!(!check_rate_limit(&mut entries, start, window, 10));

        let later = start + Duration::from_secs(61);
        assert!(check_rate_limit(&mut entries, later, window, 10));
        assert_eq!(entries.len(), 1, "pruning must drop the expired slots");
    }

    #[tokio::test]
    async fn limiter_blocks_once_saturated() {
        let limiter =
            RateLimiter::new(2, Duration::from_secs(60), Arc::new(SystemClock));
        limiter.acquire().await;
        limiter.acquire().await;

        let third = tokio::time::timeout(Duration::from_millis(100), limiter.acquire()).await;
        assert!(third.is_err(), "third acquire within the window must wait");
    }
}
