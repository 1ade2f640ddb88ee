use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Notify;
use uuid::Uuid;

use reachgraph_common::{Clock, CrawlerConfig};

/// One profile waiting to be scraped for a job.
#[derive(Debug, Clone)]
pub struct CrawlUnit {
    pub job_id: Uuid,
    pub identity: String,
    pub parent: Option<String>,
    pub depth: u32,
    pub attempt: u32,
}

struct Queued {
    unit: CrawlUnit,
    ready_at: Instant,
    seq: u64,
}

/// Delay ceiling for retries, whatever the attempt count says.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// `ready_at` instants may come from a manual clock that tokio timers never
/// observe, so waits are capped at this and re-checked.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Units ordered by (depth, arrival): a shallower unit always dequeues before
/// a deeper one, and units at the same depth come out in insertion order.
/// Units scheduled in the future stay invisible until their delay elapses.
pub struct UnitQueue {
    entries: Mutex<Vec<Queued>>,
    notify: Notify,
    clock: Arc<dyn Clock>,
    child_delay_max: Duration,
    retry_base: Duration,
    seq: AtomicU64,
}

impl UnitQueue {
    pub fn new(clock: Arc<dyn Clock>, config: &CrawlerConfig) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            notify: Notify::new(),
            clock,
            child_delay_max: config.child_delay_max,
            retry_base: config.retry_base,
            seq: AtomicU64::new(0),
        }
    }

    /// Enqueue a fresh unit. Seeds go in ready; deeper units get a randomized
    /// politeness delay so fan-out does not hammer the platform all at once.
    pub fn push(&self, unit: CrawlUnit) {
        let delay = if unit.depth == 0 {
            Duration::ZERO
        } else {
            let max_ms = self.child_delay_max.as_millis() as u64;
            if max_ms == 0 {
                Duration::ZERO
            } else {
                Duration::from_millis(rand::rng().random_range(0..max_ms))
            }
        };
        self.insert(unit, delay);
    }

    /// Re-enqueue a unit after a transient failure. `unit.attempt` must
    /// already count the failure that earned the retry.
    pub fn push_retry(&self, unit: CrawlUnit) {
        let exp = unit.attempt.saturating_sub(1).min(10);
        let backoff = self.retry_base.saturating_mul(2u32.pow(exp)).min(MAX_RETRY_DELAY);
        let jitter = Duration::from_millis(rand::rng().random_range(0..250));
        self.insert(unit, backoff + jitter);
    }

    fn insert(&self, unit: CrawlUnit, delay: Duration) {
        let queued = Queued {
            unit,
            ready_at: self.clock.now() + delay,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        self.entries.lock().unwrap().push(queued);
        self.notify.notify_one();
    }

    /// Next ready unit, waiting as long as it takes for one to arrive.
    pub async fn pop(&self) -> CrawlUnit {
        loop {
            let notified = self.notify.notified();
            let wait = {
                let mut entries = self.entries.lock().unwrap();
                let now = self.clock.now();
                if let Some(i) = best_ready(&entries, now) {
                    return entries.remove(i).unit;
                }
                entries
                    .iter()
                    .map(|q| q.ready_at.saturating_duration_since(now))
                    .min()
                    .unwrap_or(POLL_INTERVAL)
            };
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(wait.min(POLL_INTERVAL)) => {}
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn best_ready(entries: &[Queued], now: Instant) -> Option<usize> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, q)| q.ready_at <= now)
        .min_by_key(|(_, q)| (q.unit.depth, q.seq))
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reachgraph_common::SystemClock;

    fn unit(identity: &str, depth: u32) -> CrawlUnit {
        CrawlUnit {
            job_id: Uuid::new_v4(),
            identity: identity.to_string(),
            parent: None,
            depth,
            attempt: 0,
        }
    }

    fn queue_with(retry_base: Duration) -> UnitQueue {
        let config = CrawlerConfig {
            child_delay_max: Duration::ZERO,
            retry_base,
            ..Default::default()
        };
        UnitQueue::new(Arc::new(SystemClock), &config)
    }

    #[tokio::test]
    async fn pop_prefers_the_shallowest_ready_unit() {
        let queue = queue_with(Duration::from_millis(50));
        queue.push(unit("deep", 2));
        queue.push(unit("mid", 1));
        queue.push(unit("seed", 0));

        assert_eq!(queue.pop().await.identity, "seed");
        assert_eq!(queue.pop().await.identity, "mid");
        assert_eq!(queue.pop().await.identity, "deep");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn units_at_equal_depth_come_out_fifo() {
        let queue = queue_with(Duration::from_millis(50));
        queue.push(unit("a", 1));
        queue.push(unit("b", 1));
        queue.push(unit("c", 1));

        assert_eq!(queue.pop().await.identity, "a");
        assert_eq!(queue.pop().await.identity, "b");
        assert_eq!(queue.pop().await.identity, "c");
    }

    #[tokio::test]
    async fn retried_unit_waits_for_its_backoff() {
        let queue = queue_with(Duration::from_millis(50));
        let mut retried = unit("flaky", 0);
        retried.attempt = 1;
        queue.push_retry(retried);
        queue.push(unit("fresh", 1));

        // The fresh unit is deeper but ready now; the retried one is still
        // serving its backoff even though its depth would win.
        assert_eq!(queue.pop().await.identity, "fresh");
        assert_eq!(queue.pop().await.identity, "flaky");
    }

    #[tokio::test]
    async fn pop_blocks_until_a_unit_arrives() {
        let queue = Arc::new(queue_with(Duration::from_millis(50)));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await.identity })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.push(unit("late", 0));

        let identity = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("pop should wake on push")
            .unwrap();
        assert_eq!(identity, "late");
    }
}
