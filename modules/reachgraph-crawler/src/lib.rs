pub mod analysis;
pub mod auth;
pub mod buffer;
pub mod keyed_lock;
pub mod queue;
pub mod rate;
pub mod scheduler;
pub mod scraper;
pub mod session_pool;
pub mod stats;
mod worker;

pub use analysis::{
    AnalysisInput, BatchProcessor, EmbeddingInput, ProfileAnalyzer, ProfileInsights,
};
pub use auth::{AuthMachine, AuthStatus};
pub use buffer::{AnalysisBuffer, BufferedRecord};
pub use scheduler::Crawler;
pub use scraper::{
    LoginOutcome, PendingLogin, PostData, ProfileData, ScraperBackend, ScraperSession,
    VerifyOutcome,
};
pub use session_pool::SessionPool;
pub use stats::CrawlStatsSnapshot;
