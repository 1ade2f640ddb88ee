use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Crawl Jobs ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Which connection categories a crawl job expands and whether it pulls posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeFlags {
    pub followers: bool,
    pub following: bool,
    pub posts: bool,
}

impl Default for ScrapeFlags {
    fn default() -> Self {
        Self { followers: true, following: true, posts: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJob {
    pub id: Uuid,
    pub seed: String,
    pub depth_bound: u32,
    pub flags: ScrapeFlags,
    /// Authenticated account whose pooled session performs the scrapes.
    pub account: String,
    /// Units discovered so far, the seed included.
    pub total_profiles: u32,
    pub processed_profiles: u32,
    pub failed_profiles: u32,
    pub status: JobStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CrawlJob {
    pub fn new(seed: String, depth_bound: u32, flags: ScrapeFlags, account: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            seed,
            depth_bound,
            flags,
            account,
            total_profiles: 1,
            processed_profiles: 0,
            failed_profiles: 0,
            status: JobStatus::Pending,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Every discovered unit has been accounted for, one way or the other.
    pub fn all_units_settled(&self) -> bool {
        self.total_profiles > 0
            && self.processed_profiles + self.failed_profiles >= self.total_profiles
    }
}

// --- Profiles ---

/// A scraped profile as persisted, including attributes derived by analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub identity: String,
    pub display_name: Option<String>,
    pub bio: String,
    pub is_private: bool,
    pub follower_count: u32,
    pub following_count: u32,
    pub captions: Vec<String>,
    /// Identity this profile was discovered through; none for seeds.
    pub parent: Option<String>,
    pub depth: u32,
    pub job_id: Uuid,
    pub scraped_at: DateTime<Utc>,
    pub interests: Vec<String>,
    pub niche: Option<String>,
}

// --- Auth ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Pending,
    Processing,
    WaitingSecondFactor,
    Completed,
    Failed,
}

impl AuthState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuthState::Completed | AuthState::Failed)
    }
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthState::Pending => write!(f, "pending"),
            AuthState::Processing => write!(f, "processing"),
            AuthState::WaitingSecondFactor => write!(f, "waiting_second_factor"),
            AuthState::Completed => write!(f, "completed"),
            AuthState::Failed => write!(f, "failed"),
        }
    }
}

/// Reusable login state for an authenticated account, opaque to this system.
/// The scraping relay produces it at login and consumes it when opening a
/// session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    pub account: String,
    pub credentials: String,
    pub saved_at: DateTime<Utc>,
}

// --- Job Events ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    JobCreated { seed: String, depth_bound: u32 },
    UnitScraped { identity: String, depth: u32 },
    UnitFailed { identity: String, depth: u32, error: String },
    ChildrenEnqueued { parent: String, depth: u32, count: u32 },
    BatchFlushed { records: u32 },
    JobCompleted { processed: u32, failed: u32 },
    JobFailed { processed: u32, failed: u32 },
    JobCancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEventRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: JobEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_settles_only_when_counters_cover_total() {
        let mut job = CrawlJob::new("alice".into(), 1, ScrapeFlags::default(), "bot".into());
        assert!(!job.all_units_settled());

        job.total_profiles = 3;
        job.processed_profiles = 2;
        assert!(!job.all_units_settled());

        job.failed_profiles = 1;
        assert!(job.all_units_settled());
    }

    #[test]
    fn status_serializes_snake_case() {
        let s = serde_json::to_string(&AuthState::WaitingSecondFactor).unwrap();
        assert_eq!(s, "\"waiting_second_factor\"");
        let s = serde_json::to_string(&JobStatus::Processing).unwrap();
        assert_eq!(s, "\"processing\"");
    }
}
