// Persistence seam for the crawler.
//
// GraphStore covers profile upserts, job lifecycle with increment-style
// counter updates, session credential records, and the per-job event log.
//
// The crawler only ever sees `Arc<dyn GraphStore>`; MemoryStore is the
// in-process implementation used by the server and by every test. Durable
// backends live behind the same trait and are not this crate's concern.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use reachgraph_common::{CrawlJob, JobEvent, JobEventRecord, JobStatus, ProfileRecord, StoredSession};

mod memory;

pub use memory::MemoryStore;

#[async_trait]
pub trait GraphStore: Send + Sync {
    // --- Profiles ---

    /// Insert or replace a profile, keyed by identity. Last write wins;
    /// derived attributes are written separately via `save_insights`.
    async fn upsert_profile(&self, profile: ProfileRecord) -> Result<()>;

    async fn profile(&self, identity: &str) -> Result<Option<ProfileRecord>>;

    /// Profiles discovered through `parent`.
    async fn profiles_by_parent(&self, parent: &str) -> Result<Vec<ProfileRecord>>;

    /// Attach analysis output to an already-persisted profile.
    async fn save_insights(
        &self,
        identity: &str,
        interests: Vec<String>,
        niche: Option<String>,
    ) -> Result<()>;

    /// Store an embedding vector keyed by identity.
    async fn save_embedding(&self, identity: &str, vector: Vec<f32>) -> Result<()>;

    // --- Crawl jobs ---

    async fn insert_job(&self, job: CrawlJob) -> Result<()>;

    async fn job(&self, id: Uuid) -> Result<Option<CrawlJob>>;

    /// Flip a pending job to processing; no-op for any other current status.
    async fn mark_job_processing(&self, id: Uuid) -> Result<()>;

    /// Add deltas to the discovery/progress counters and return the updated
    /// job. Increments are applied under the store's lock so concurrent unit
    /// completions never lose updates.
    async fn add_job_counters(
        &self,
        id: Uuid,
        total: u32,
        processed: u32,
        failed: u32,
    ) -> Result<CrawlJob>;

    /// Move a job to a terminal status and stamp completion time. Returns
    /// false (and changes nothing) when the job is already terminal, so
    /// concurrent completion checks elect exactly one winner.
    async fn finish_job(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<bool>;

    // --- Sessions ---

    async fn save_session(&self, session: StoredSession) -> Result<()>;

    async fn find_session(&self, account: &str) -> Result<Option<StoredSession>>;

    // --- Job events ---

    async fn append_job_event(&self, job_id: Uuid, event: JobEvent) -> Result<()>;

    async fn job_events(&self, job_id: Uuid) -> Result<Vec<JobEventRecord>>;
}
