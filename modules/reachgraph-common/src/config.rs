use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Web server
    pub host: String,
    pub port: u16,

    // AI provider
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub analysis_model: String,
    pub embedding_model: String,

    // Scraping relay
    pub scraperelay_url: String,
    pub scraperelay_token: Option<String>,

    /// Account whose session is used when a job does not name one.
    pub default_scrape_account: String,

    pub crawler: CrawlerConfig,
}

/// Tuning knobs for the orchestration core. Plain data so tests can build it
/// literally; `Default` mirrors the environment-variable defaults.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub crawl_workers: usize,
    pub rate_limit_per_minute: usize,
    /// Attempts per crawl unit before it counts as failed.
    pub max_attempts: u32,
    pub retry_base: Duration,
    pub analysis_batch_size: usize,
    pub posts_per_profile: u32,
    /// Hard ceiling on submitted depth bounds.
    pub max_depth: u32,
    /// Upper bound of the randomized enqueue delay for depth > 0 units.
    pub child_delay_max: Duration,
    pub session_idle_age: Duration,
    pub session_sweep_interval: Duration,
    pub session_acquire_retries: u32,
    pub session_acquire_backoff: Duration,
    pub auth_ttl: Duration,
    pub auth_sweep_interval: Duration,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            crawl_workers: 2,
            rate_limit_per_minute: 10,
            max_attempts: 3,
            retry_base: Duration::from_secs(1),
            analysis_batch_size: 10,
            posts_per_profile: 12,
            max_depth: 3,
            child_delay_max: Duration::from_secs(2),
            session_idle_age: Duration::from_secs(600),
            session_sweep_interval: Duration::from_secs(60),
            session_acquire_retries: 10,
            session_acquire_backoff: Duration::from_millis(500),
            auth_ttl: Duration::from_secs(300),
            auth_sweep_interval: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            host: env::var("REACHGRAPH_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("REACHGRAPH_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .expect("REACHGRAPH_PORT must be a number"),
            openai_api_key: required_env("OPENAI_API_KEY"),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            analysis_model: env::var("ANALYSIS_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            scraperelay_url: required_env("SCRAPERELAY_URL"),
            scraperelay_token: env::var("SCRAPERELAY_TOKEN").ok(),
            default_scrape_account: required_env("DEFAULT_SCRAPE_ACCOUNT"),
            crawler: CrawlerConfig::from_env(),
        }
    }
}

impl CrawlerConfig {
    pub fn from_env() -> Self {
        let defaults = CrawlerConfig::default();
        Self {
            crawl_workers: env_num("CRAWL_WORKERS", defaults.crawl_workers),
            rate_limit_per_minute: env_num(
                "CRAWL_RATE_LIMIT_PER_MINUTE",
                defaults.rate_limit_per_minute,
            ),
            max_attempts: env_num("CRAWL_MAX_ATTEMPTS", defaults.max_attempts),
            retry_base: defaults.retry_base,
            analysis_batch_size: env_num("ANALYSIS_BATCH_SIZE", defaults.analysis_batch_size),
            posts_per_profile: env_num("POSTS_PER_PROFILE", defaults.posts_per_profile),
            max_depth: env_num("MAX_CRAWL_DEPTH", defaults.max_depth),
            child_delay_max: defaults.child_delay_max,
            session_idle_age: Duration::from_secs(env_num(
                "SESSION_IDLE_SECS",
                defaults.session_idle_age.as_secs(),
            )),
            session_sweep_interval: Duration::from_secs(env_num(
                "SESSION_SWEEP_SECS",
                defaults.session_sweep_interval.as_secs(),
            )),
            session_acquire_retries: defaults.session_acquire_retries,
            session_acquire_backoff: defaults.session_acquire_backoff,
            auth_ttl: Duration::from_secs(env_num("AUTH_TTL_SECS", defaults.auth_ttl.as_secs())),
            auth_sweep_interval: Duration::from_secs(env_num(
                "AUTH_SWEEP_SECS",
                defaults.auth_sweep_interval.as_secs(),
            )),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_num<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or_else(|_| panic!("{key} must be a number")),
        Err(_) => default,
    }
}
