use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReachGraphError {
    #[error("Scraping error: {0}")]
    Scraping(String),

    #[error("No session available: {0}")]
    SessionUnavailable(String),

    #[error("Auth flow expired: {0}")]
    AuthExpired(String),

    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl ReachGraphError {
    /// Whether a failed crawl unit should be retried by the queue.
    /// Only scraping failures (network, rate limiting, flaky automation)
    /// are worth another attempt; everything else is terminal for the unit.
    pub fn is_transient(&self) -> bool {
        matches!(self, ReachGraphError::Scraping(_))
    }
}
