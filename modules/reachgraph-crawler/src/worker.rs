use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use reachgraph_common::{CrawlJob, JobEvent, JobStatus, ProfileRecord, ReachGraphError};

use crate::buffer::BufferedRecord;
use crate::queue::CrawlUnit;
use crate::scheduler::Crawler;
use crate::scraper::{ProfileData, ScraperSession};

/// Everything one unit scraped. Persistence, counters and fan-out all
/// happen after the session has gone back to the pool.
enum ScrapeOutcome {
    NotFound,
    Scraped {
        profile: ProfileData,
        captions: Vec<String>,
        followers: Vec<String>,
        following: Vec<String>,
    },
}

impl Crawler {
    pub(crate) async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        debug!(worker_id, "Crawl worker started");
        loop {
            let unit = self.queue.pop().await;
            self.handle_unit(unit).await;
        }
    }

    async fn handle_unit(&self, unit: CrawlUnit) {
        let job = match self.store.job(unit.job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %unit.job_id, identity = %unit.identity,
                    "Unit belongs to an unknown job, dropping");
                return;
            }
            Err(e) => {
                error!(job_id = %unit.job_id, error = %e, "Failed to load job for unit");
                return;
            }
        };

        if job.status.is_terminal() {
            debug!(job_id = %job.id, identity = %unit.identity, status = %job.status,
                "Dropping unit for a terminal job");
            return;
        }

        if job.status == JobStatus::Pending {
            if let Err(e) = self.store.mark_job_processing(job.id).await {
                warn!(job_id = %job.id, error = %e, "Failed to mark job processing");
            }
        }

        self.limiter.acquire().await;

        // Session failures are terminal for the unit, never retried.
        let session = match self.pool.acquire(&job.account).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                let error = format!("no stored session for account {}", job.account);
                self.settle_failed(&job, &unit, error).await;
                return;
            }
            Err(e) => {
                self.settle_failed(&job, &unit, e.to_string()).await;
                return;
            }
        };

        let outcome = self.scrape_unit(session.as_ref(), &job, &unit).await;
        // Unconditional: the entry must go idle whatever happened above.
        self.pool.release(&job.account);

        match outcome {
            Ok(ScrapeOutcome::Scraped { profile, captions, followers, following }) => {
                self.settle_scraped(&job, &unit, profile, captions, followers, following)
                    .await;
            }
            Ok(ScrapeOutcome::NotFound) => {
                self.settle_failed(&job, &unit, "profile not found or inaccessible".into())
                    .await;
            }
            Err(e) if e.is_transient() && unit.attempt + 1 < self.config.max_attempts => {
                let mut retry = unit;
                retry.attempt += 1;
                warn!(job_id = %job.id, identity = %retry.identity, attempt = retry.attempt,
                    error = %e, "Transient scrape failure, retrying after backoff");
                self.stats.units_retried.fetch_add(1, Ordering::Relaxed);
                self.queue.push_retry(retry);
            }
            Err(e) => {
                self.settle_failed(&job, &unit, e.to_string()).await;
            }
        }
    }

    /// All the session-bound work for one unit. No shared state is touched
    /// here, so a transient error can retry the whole unit from scratch
    /// without double counting anything.
    async fn scrape_unit(
        &self,
        session: &dyn ScraperSession,
        job: &CrawlJob,
        unit: &CrawlUnit,
    ) -> Result<ScrapeOutcome, ReachGraphError> {
        let Some(profile) = session.fetch_profile(&unit.identity).await? else {
            return Ok(ScrapeOutcome::NotFound);
        };

        let captions = if job.flags.posts && !profile.is_private {
            session
                .fetch_posts(&unit.identity, self.config.posts_per_profile)
                .await?
                .into_iter()
                .filter_map(|post| post.caption)
                .filter(|caption| !caption.trim().is_empty())
                .collect()
        } else {
            Vec::new()
        };

        // Connection lists are only pulled when this unit can still fan out:
        // below the depth bound and not behind a privacy wall.
        let expanding = unit.depth < job.depth_bound && !profile.is_private;
        let followers = if expanding && job.flags.followers {
            session.fetch_followers(&unit.identity).await?
        } else {
            Vec::new()
        };
        let following = if expanding && job.flags.following {
            session.fetch_following(&unit.identity).await?
        } else {
            Vec::new()
        };

        Ok(ScrapeOutcome::Scraped { profile, captions, followers, following })
    }

    async fn settle_scraped(
        &self,
        job: &CrawlJob,
        unit: &CrawlUnit,
        profile: ProfileData,
        captions: Vec<String>,
        followers: Vec<String>,
        following: Vec<String>,
    ) {
        let record = ProfileRecord {
            identity: unit.identity.clone(),
            display_name: profile.display_name,
            bio: profile.bio.clone(),
            is_private: profile.is_private,
            follower_count: profile.follower_count,
            following_count: profile.following_count,
            captions: captions.clone(),
            parent: unit.parent.clone(),
            depth: unit.depth,
            job_id: job.id,
            scraped_at: chrono::Utc::now(),
            interests: Vec::new(),
            niche: None,
        };
        if let Err(e) = self.store.upsert_profile(record).await {
            self.settle_failed(job, unit, format!("failed to persist profile: {e}")).await;
            return;
        }

        // Profiles with nothing to analyze never enter the buffer.
        if !profile.bio.trim().is_empty() || !captions.is_empty() {
            let size = self.buffer.append(BufferedRecord::new(
                job.id,
                unit.identity.clone(),
                profile.bio,
                captions,
            ));
            if size >= self.config.analysis_batch_size {
                let processor = self.processor.clone();
                tokio::spawn(async move {
                    processor.run_threshold_batch().await;
                });
            }
        }

        // Claim children before anything is enqueued or counted, so a
        // concurrent sibling cannot claim the same identity for this job.
        let children = self.claim_children(job, unit, followers, following);
        let new_units = children.len() as u32;

        let updated = match self.store.add_job_counters(job.id, new_units, 1, 0).await {
            Ok(updated) => updated,
            Err(e) => {
                error!(job_id = %job.id, identity = %unit.identity, error = %e,
                    "Failed to update job counters");
                return;
            }
        };

        for identity in children {
            self.queue.push(CrawlUnit {
                job_id: job.id,
                identity,
                parent: Some(unit.identity.clone()),
                depth: unit.depth + 1,
                attempt: 0,
            });
        }

        self.stats.units_processed.fetch_add(1, Ordering::Relaxed);
        info!(job_id = %job.id, identity = %unit.identity, depth = unit.depth,
            children = new_units, "Unit scraped");

        self.append_event(
            job.id,
            JobEvent::UnitScraped { identity: unit.identity.clone(), depth: unit.depth },
        )
        .await;
        if new_units > 0 {
            self.append_event(
                job.id,
                JobEvent::ChildrenEnqueued {
                    parent: unit.identity.clone(),
                    depth: unit.depth + 1,
                    count: new_units,
                },
            )
            .await;
        }

        self.maybe_finish(updated).await;
    }

    /// Followers first, then following, de-duplicated within this expansion
    /// and against every identity already claimed for the job.
    fn claim_children(
        &self,
        job: &CrawlJob,
        unit: &CrawlUnit,
        followers: Vec<String>,
        following: Vec<String>,
    ) -> Vec<String> {
        if unit.depth >= job.depth_bound {
            return Vec::new();
        }
        let mut visited = self.visited.lock().unwrap();
        let claimed = visited.entry(job.id).or_default();
        let mut children = Vec::new();
        for identity in followers.into_iter().chain(following) {
            if identity.is_empty() {
                continue;
            }
            if claimed.insert(identity.clone()) {
                children.push(identity);
            }
        }
        children
    }

    async fn settle_failed(&self, job: &CrawlJob, unit: &CrawlUnit, error: String) {
        warn!(job_id = %job.id, identity = %unit.identity, depth = unit.depth,
            error = %error, "Unit failed");
        let updated = match self.store.add_job_counters(job.id, 0, 0, 1).await {
            Ok(updated) => updated,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to update job counters");
                return;
            }
        };
        self.stats.units_failed.fetch_add(1, Ordering::Relaxed);
        self.append_event(
            job.id,
            JobEvent::UnitFailed {
                identity: unit.identity.clone(),
                depth: unit.depth,
                error,
            },
        )
        .await;
        self.maybe_finish(updated).await;
    }

    /// Terminal bookkeeping, run after every settle. The store's
    /// compare-and-set picks a single winner when two workers race here.
    async fn maybe_finish(&self, job: CrawlJob) {
        if job.status == JobStatus::Cancelled {
            // A unit that was in flight when the job was cancelled may have
            // buffered a record after the cancel drain; discard it.
            let dropped = self.buffer.drain_for_job(job.id).len();
            if dropped > 0 {
                debug!(job_id = %job.id, dropped,
                    "Dropped buffered records for cancelled job");
            }
            self.visited.lock().unwrap().remove(&job.id);
            return;
        }
        if !job.all_units_settled() {
            return;
        }

        // Flush this job's stragglers below the threshold before the flip,
        // so a terminal job never leaves records behind.
        let flushed = self.processor.run_job_batch(job.id).await;
        if flushed > 0 {
            self.append_event(job.id, JobEvent::BatchFlushed { records: flushed as u32 })
                .await;
        }

        let (status, error) = if job.failed_profiles < job.total_profiles {
            (JobStatus::Completed, None)
        } else {
            (JobStatus::Failed, Some(format!("all {} units failed", job.total_profiles)))
        };

        match self.store.finish_job(job.id, status, error).await {
            Ok(true) => {
                self.visited.lock().unwrap().remove(&job.id);
                let event = match status {
                    JobStatus::Completed => {
                        self.stats.jobs_completed.fetch_add(1, Ordering::Relaxed);
                        JobEvent::JobCompleted {
                            processed: job.processed_profiles,
                            failed: job.failed_profiles,
                        }
                    }
                    _ => {
                        self.stats.jobs_failed.fetch_add(1, Ordering::Relaxed);
                        JobEvent::JobFailed {
                            processed: job.processed_profiles,
                            failed: job.failed_profiles,
                        }
                    }
                };
                self.append_event(job.id, event).await;
                info!(job_id = %job.id, status = %status, processed = job.processed_profiles,
                    failed = job.failed_profiles, "Crawl job finished");
            }
            Ok(false) => {
                debug!(job_id = %job.id, "Job already terminal, finish skipped");
            }
            Err(e) => error!(job_id = %job.id, error = %e, "Failed to finish job"),
        }
    }

    async fn append_event(&self, job_id: Uuid, event: JobEvent) {
        if let Err(e) = self.store.append_job_event(job_id, event).await {
            warn!(job_id = %job_id, error = %e, "Failed to append job event");
        }
    }
}
