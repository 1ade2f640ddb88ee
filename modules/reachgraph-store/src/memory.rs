use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use reachgraph_common::{
    CrawlJob, JobEvent, JobEventRecord, JobStatus, ProfileRecord, StoredSession,
};

use crate::GraphStore;

#[derive(Default)]
struct Inner {
    profiles: HashMap<String, ProfileRecord>,
    jobs: HashMap<Uuid, CrawlJob>,
    sessions: HashMap<String, StoredSession>,
    embeddings: HashMap<String, Vec<f32>>,
    events: HashMap<Uuid, Vec<JobEventRecord>>,
}

/// In-process store. One mutex over all tables keeps counter updates and
/// terminal transitions atomic without per-table lock ordering concerns.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored embedding vector, if any. Not part of the `GraphStore` seam;
    /// vector search belongs to a downstream system.
    pub async fn embedding(&self, identity: &str) -> Option<Vec<f32>> {
        self.inner.lock().await.embeddings.get(identity).cloned()
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn upsert_profile(&self, profile: ProfileRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.profiles.insert(profile.identity.clone(), profile);
        Ok(())
    }

    async fn profile(&self, identity: &str) -> Result<Option<ProfileRecord>> {
        Ok(self.inner.lock().await.profiles.get(identity).cloned())
    }

    async fn profiles_by_parent(&self, parent: &str) -> Result<Vec<ProfileRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .profiles
            .values()
            .filter(|p| p.parent.as_deref() == Some(parent))
            .cloned()
            .collect())
    }

    async fn save_insights(
        &self,
        identity: &str,
        interests: Vec<String>,
        niche: Option<String>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let profile = inner
            .profiles
            .get_mut(identity)
            .ok_or_else(|| anyhow!("no profile for {identity}"))?;
        profile.interests = interests;
        profile.niche = niche;
        Ok(())
    }

    async fn save_embedding(&self, identity: &str, vector: Vec<f32>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.embeddings.insert(identity.to_string(), vector);
        Ok(())
    }

    async fn insert_job(&self, job: CrawlJob) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.jobs.insert(job.id, job);
        Ok(())
    }

    async fn job(&self, id: Uuid) -> Result<Option<CrawlJob>> {
        Ok(self.inner.lock().await.jobs.get(&id).cloned())
    }

    async fn mark_job_processing(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&id).ok_or_else(|| anyhow!("job {id} not found"))?;
        if job.status == JobStatus::Pending {
            job.status = JobStatus::Processing;
        }
        Ok(())
    }

    async fn add_job_counters(
        &self,
        id: Uuid,
        total: u32,
        processed: u32,
        failed: u32,
    ) -> Result<CrawlJob> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&id).ok_or_else(|| anyhow!("job {id} not found"))?;
        job.total_profiles += total;
        job.processed_profiles += processed;
        job.failed_profiles += failed;
        Ok(job.clone())
    }

    async fn finish_job(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&id).ok_or_else(|| anyhow!("job {id} not found"))?;
        if job.status.is_terminal() {
            return Ok(false);
        }
        job.status = status;
        job.error = error;
        job.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn save_session(&self, session: StoredSession) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.sessions.insert(session.account.clone(), session);
        Ok(())
    }

    async fn find_session(&self, account: &str) -> Result<Option<StoredSession>> {
        Ok(self.inner.lock().await.sessions.get(account).cloned())
    }

    async fn append_job_event(&self, job_id: Uuid, event: JobEvent) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .events
            .entry(job_id)
            .or_default()
            .push(JobEventRecord { at: Utc::now(), event });
        Ok(())
    }

    async fn job_events(&self, job_id: Uuid) -> Result<Vec<JobEventRecord>> {
        Ok(self.inner.lock().await.events.get(&job_id).cloned().unwrap_or_default())
    }
}
