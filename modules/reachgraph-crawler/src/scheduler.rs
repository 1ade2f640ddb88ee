use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};
use uuid::Uuid;

use reachgraph_common::{
    Clock, CrawlJob, CrawlerConfig, JobEvent, JobStatus, ReachGraphError, ScrapeFlags,
};
use reachgraph_store::GraphStore;

use crate::analysis::{BatchProcessor, ProfileAnalyzer};
use crate::buffer::AnalysisBuffer;
use crate::queue::{CrawlUnit, UnitQueue};
use crate::rate::RateLimiter;
use crate::scraper::ScraperBackend;
use crate::session_pool::SessionPool;
use crate::stats::{CrawlStats, CrawlStatsSnapshot};

/// Orchestrates crawl jobs end to end: owns the unit queue, the session
/// pool, the analysis buffer and the workers that drive them.
pub struct Crawler {
    pub(crate) store: Arc<dyn GraphStore>,
    pub(crate) pool: Arc<SessionPool>,
    pub(crate) queue: UnitQueue,
    pub(crate) buffer: Arc<AnalysisBuffer>,
    pub(crate) processor: Arc<BatchProcessor>,
    pub(crate) limiter: RateLimiter,
    pub(crate) stats: Arc<CrawlStats>,
    pub(crate) config: CrawlerConfig,
    default_account: String,
    /// Identities claimed per job. An identity enters this set at enqueue
    /// time, so a racing sibling expansion cannot enqueue it twice.
    pub(crate) visited: Mutex<HashMap<Uuid, HashSet<String>>>,
}

impl Crawler {
    pub fn new(
        store: Arc<dyn GraphStore>,
        backend: Arc<dyn ScraperBackend>,
        analyzer: Arc<dyn ProfileAnalyzer>,
        clock: Arc<dyn Clock>,
        config: CrawlerConfig,
        default_account: String,
    ) -> Arc<Self> {
        let buffer = Arc::new(AnalysisBuffer::new());
        let stats = Arc::new(CrawlStats::default());
        let pool =
            Arc::new(SessionPool::new(store.clone(), backend, clock.clone(), &config));
        let processor = Arc::new(BatchProcessor::new(
            buffer.clone(),
            analyzer,
            store.clone(),
            stats.clone(),
            config.analysis_batch_size,
        ));
        let queue = UnitQueue::new(clock.clone(), &config);
        let limiter =
            RateLimiter::new(config.rate_limit_per_minute, Duration::from_secs(60), clock);

        Arc::new(Self {
            store,
            pool,
            queue,
            buffer,
            processor,
            limiter,
            stats,
            config,
            default_account,
            visited: Mutex::new(HashMap::new()),
        })
    }

    /// Spawn the crawl workers and the session sweeper.
    pub fn start(self: &Arc<Self>) {
        for worker_id in 0..self.config.crawl_workers {
            let crawler = self.clone();
            tokio::spawn(async move { crawler.worker_loop(worker_id).await });
        }
        self.pool.spawn_sweeper(self.config.session_sweep_interval);
        info!(workers = self.config.crawl_workers, "Crawler started");
    }

    /// Create a job and enqueue its seed as the first unit.
    pub async fn create_job(
        &self,
        seed: &str,
        depth_bound: u32,
        flags: ScrapeFlags,
        account: Option<String>,
    ) -> Result<CrawlJob, ReachGraphError> {
        let seed = seed.trim();
        if seed.is_empty() {
            return Err(ReachGraphError::Validation(
                "seed identity must not be empty".into(),
            ));
        }
        let depth_bound = depth_bound.min(self.config.max_depth);
        let account = account.unwrap_or_else(|| self.default_account.clone());

        let job = CrawlJob::new(seed.to_string(), depth_bound, flags, account);
        self.store.insert_job(job.clone()).await?;
        self.visited
            .lock()
            .unwrap()
            .entry(job.id)
            .or_default()
            .insert(seed.to_string());
        self.store
            .append_job_event(
                job.id,
                JobEvent::JobCreated { seed: seed.to_string(), depth_bound },
            )
            .await?;

        self.queue.push(CrawlUnit {
            job_id: job.id,
            identity: seed.to_string(),
            parent: None,
            depth: 0,
            attempt: 0,
        });

        self.stats.jobs_created.fetch_add(1, Ordering::Relaxed);
        info!(job_id = %job.id, seed, depth_bound, "Crawl job created");
        Ok(job)
    }

    /// Cancel a job. Cooperative: queued units are dropped as workers
    /// dequeue them, while an in-flight unit runs to completion.
    pub async fn cancel_job(&self, id: Uuid) -> Result<(), ReachGraphError> {
        let flipped = self.store.finish_job(id, JobStatus::Cancelled, None).await?;
        if !flipped {
            let status = self
                .store
                .job(id)
                .await?
                .map(|job| job.status.to_string())
                .unwrap_or_else(|| "gone".into());
            return Err(ReachGraphError::StateConflict(format!(
                "job {id} is already {status}"
            )));
        }

        let dropped = self.buffer.drain_for_job(id).len();
        if dropped > 0 {
            debug!(job_id = %id, dropped, "Dropped buffered records for cancelled job");
        }
        self.visited.lock().unwrap().remove(&id);
        self.store.append_job_event(id, JobEvent::JobCancelled).await?;
        self.stats.jobs_cancelled.fetch_add(1, Ordering::Relaxed);
        info!(job_id = %id, "Crawl job cancelled");
        Ok(())
    }

    pub fn stats(&self) -> CrawlStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    use reachgraph_common::ManualClock;
    use reachgraph_store::MemoryStore;

    use crate::analysis::{AnalysisInput, EmbeddingInput, ProfileInsights};
    use crate::buffer::BufferedRecord;
    use crate::scraper::{LoginOutcome, ScraperSession};

    struct NullBackend;

    #[async_trait]
    impl ScraperBackend for NullBackend {
        async fn open_session(
            &self,
            _account: &str,
            _credentials: &str,
        ) -> Result<Box<dyn ScraperSession>, ReachGraphError> {
            Err(ReachGraphError::Scraping("not under test".into()))
        }

        async fn begin_login(
            &self,
            _username: &str,
            _password: &str,
        ) -> Result<LoginOutcome, ReachGraphError> {
            Ok(LoginOutcome::Failed { error: "not under test".into() })
        }
    }

    struct NullAnalyzer;

    #[async_trait]
    impl ProfileAnalyzer for NullAnalyzer {
        async fn analyze_batch(
            &self,
            _batch: Vec<AnalysisInput>,
        ) -> Result<Vec<ProfileInsights>> {
            Ok(Vec::new())
        }

        async fn create_embeddings_batch(&self, _inputs: Vec<EmbeddingInput>) -> Result<()> {
            Ok(())
        }
    }

    // Workers are never started: units stay queued so the lifecycle calls
    // can be asserted in isolation.
    fn crawler() -> Arc<Crawler> {
        Crawler::new(
            Arc::new(MemoryStore::new()),
            Arc::new(NullBackend),
            Arc::new(NullAnalyzer),
            Arc::new(ManualClock::new()),
            CrawlerConfig::default(),
            "bot".into(),
        )
    }

    #[tokio::test]
    async fn create_job_rejects_a_blank_seed() {
        let crawler = crawler();
        let result = crawler.create_job("   ", 1, ScrapeFlags::default(), None).await;
        assert!(matches!(result, Err(ReachGraphError::Validation(_))));
        assert!(crawler.queue.is_empty());
    }

    #[tokio::test]
    async fn create_job_claims_the_seed_and_enqueues_it() {
        let crawler = crawler();
        let job = crawler
            .create_job("alice", 10, ScrapeFlags::default(), None)
            .await
            .unwrap();

        assert_eq!(job.depth_bound, 3, "depth bound is clamped to the ceiling");
        assert_eq!(job.total_profiles, 1);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.account, "bot");
        assert_eq!(crawler.queue.len(), 1);
        assert!(crawler.visited.lock().unwrap()[&job.id].contains("alice"));

        let events = crawler.store.job_events(job.id).await.unwrap();
        assert!(matches!(events[0].event, JobEvent::JobCreated { .. }));
    }

    #[tokio::test]
    async fn cancel_flips_status_once_and_drops_buffered_records() {
        let crawler = crawler();
        let job = crawler
            .create_job("alice", 1, ScrapeFlags::default(), None)
            .await
            .unwrap();
        crawler.buffer.append(BufferedRecord::new(
            job.id,
            "alice".into(),
            "bio".into(),
            vec![],
        ));

        crawler.cancel_job(job.id).await.unwrap();

        let stored = crawler.store.job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert!(crawler.buffer.is_empty());
        assert!(!crawler.visited.lock().unwrap().contains_key(&job.id));

        let again = crawler.cancel_job(job.id).await;
        assert!(matches!(again, Err(ReachGraphError::StateConflict(_))));
    }

    #[tokio::test]
    async fn jobs_keep_their_own_account_when_named() {
        let crawler = crawler();
        let job = crawler
            .create_job("alice", 1, ScrapeFlags::default(), Some("other_bot".into()))
            .await
            .unwrap();
        assert_eq!(job.account, "other_bot");
    }
}
