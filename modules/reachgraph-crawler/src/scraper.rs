// Trait abstractions for the browser-automation collaborator.
//
// ScraperBackend opens authenticated sessions and starts login flows.
// ScraperSession is one live browser context; all page scraping goes
// through it. PendingLogin is a login flow parked at the second-factor
// checkpoint, resumable with a one-time code.
//
// The orchestration core never touches a page: it drives these traits and
// the relay (or a test fake) does the DOM work. `None`/empty returns mean
// "not found or inaccessible", which is not an error.

use async_trait::async_trait;

use reachgraph_common::ReachGraphError;

// --- Scraped payloads ---

#[derive(Debug, Clone)]
pub struct ProfileData {
    pub username: String,
    pub display_name: Option<String>,
    pub bio: String,
    pub is_private: bool,
    pub follower_count: u32,
    pub following_count: u32,
}

#[derive(Debug, Clone)]
pub struct PostData {
    pub caption: Option<String>,
}

// --- Login flow outcomes ---

pub enum LoginOutcome {
    Success { identity: String, credentials: String },
    /// Password accepted, a one-time code is now required. The flow stays
    /// live inside `pending` until verified or closed.
    SecondFactorRequired { pending: Box<dyn PendingLogin> },
    /// Definitive rejection. The backend has already closed the flow.
    Failed { error: String },
}

pub enum VerifyOutcome {
    Success { identity: String, credentials: String },
    /// The code was wrong but the checkpoint is still open; another code
    /// may be submitted against the same pending flow.
    WrongCode { error: String },
    Failed { error: String },
}

// --- Traits ---

#[async_trait]
pub trait ScraperBackend: Send + Sync {
    /// Construct a live session from stored credentials.
    async fn open_session(
        &self,
        account: &str,
        credentials: &str,
    ) -> Result<Box<dyn ScraperSession>, ReachGraphError>;

    /// Start an interactive login. Errors are infrastructure failures;
    /// bad credentials come back as `LoginOutcome::Failed`.
    async fn begin_login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<LoginOutcome, ReachGraphError>;
}

#[async_trait]
pub trait ScraperSession: Send + Sync {
    async fn fetch_profile(&self, identity: &str)
        -> Result<Option<ProfileData>, ReachGraphError>;

    async fn fetch_followers(&self, identity: &str) -> Result<Vec<String>, ReachGraphError>;

    async fn fetch_following(&self, identity: &str) -> Result<Vec<String>, ReachGraphError>;

    async fn fetch_posts(
        &self,
        identity: &str,
        limit: u32,
    ) -> Result<Vec<PostData>, ReachGraphError>;

    /// Tear down the underlying browser context. Idempotent.
    async fn close(&self);
}

#[async_trait]
pub trait PendingLogin: Send + Sync {
    async fn submit_code(&mut self, code: &str) -> Result<VerifyOutcome, ReachGraphError>;

    /// Abandon the flow and release the underlying browser context.
    async fn close(&mut self);
}
