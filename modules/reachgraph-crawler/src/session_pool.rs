use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use reachgraph_common::{Clock, CrawlerConfig, ReachGraphError};
use reachgraph_store::GraphStore;

use crate::keyed_lock::KeyedLocks;
use crate::scraper::{ScraperBackend, ScraperSession};

struct SessionEntry {
    session: Arc<dyn ScraperSession>,
    busy: bool,
    last_used: Instant,
    use_count: u64,
}

/// Owns at most one live browser session per authenticated account.
///
/// Acquisition runs under that account's keyed lock, so two workers can
/// never construct duplicate handles for one identity; distinct accounts
/// proceed in parallel. Idle sessions are reused until the sweep closes
/// them.
pub struct SessionPool {
    entries: Mutex<HashMap<String, SessionEntry>>,
    locks: KeyedLocks,
    store: Arc<dyn GraphStore>,
    backend: Arc<dyn ScraperBackend>,
    clock: Arc<dyn Clock>,
    idle_age: Duration,
    acquire_retries: u32,
    acquire_backoff: Duration,
}

impl SessionPool {
    pub fn new(
        store: Arc<dyn GraphStore>,
        backend: Arc<dyn ScraperBackend>,
        clock: Arc<dyn Clock>,
        config: &CrawlerConfig,
    ) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            locks: KeyedLocks::new(),
            store,
            backend,
            clock,
            idle_age: config.session_idle_age,
            acquire_retries: config.session_acquire_retries,
            acquire_backoff: config.session_acquire_backoff,
        }
    }

    /// Hand out the account's session, marking it busy. Returns `None` when
    /// no stored credentials exist for the account. A busy session is
    /// retried with backoff up to the configured bound rather than
    /// duplicated.
    pub async fn acquire(
        &self,
        account: &str,
    ) -> Result<Option<Arc<dyn ScraperSession>>, ReachGraphError> {
        for attempt in 0..=self.acquire_retries {
            {
                let _key_guard = self.locks.acquire(account).await;

                let pooled = {
                    let mut entries = self.entries.lock().unwrap();
                    match entries.get_mut(account) {
                        Some(entry) if !entry.busy => {
                            entry.busy = true;
                            entry.use_count += 1;
                            entry.last_used = self.clock.now();
                            debug!(account, uses = entry.use_count, "Reusing pooled session");
                            Some(Some(entry.session.clone()))
                        }
                        Some(_) => None, // busy, back off below
                        None => Some(None), // no entry, construct below
                    }
                };

                match pooled {
                    Some(Some(session)) => return Ok(Some(session)),
                    Some(None) => {
                        let Some(stored) = self
                            .store
                            .find_session(account)
                            .await
                            .map_err(|e| ReachGraphError::Storage(e.to_string()))?
                        else {
                            debug!(account, "No stored credentials, no session");
                            return Ok(None);
                        };

                        // Still under the keyed lock: a racing acquirer for
                        // this account waits instead of opening a duplicate.
                        let session =
                            self.backend.open_session(account, &stored.credentials).await?;
                        let session: Arc<dyn ScraperSession> = Arc::from(session);

                        let mut entries = self.entries.lock().unwrap();
                        entries.insert(
                            account.to_string(),
                            SessionEntry {
                                session: session.clone(),
                                busy: true,
                                last_used: self.clock.now(),
                                use_count: 1,
                            },
                        );
                        info!(account, "Opened new scraper session");
                        return Ok(Some(session));
                    }
                    None => {}
                }
            }

            if attempt < self.acquire_retries {
                tokio::time::sleep(self.acquire_backoff).await;
            }
        }

        Err(ReachGraphError::SessionUnavailable(format!(
            "session for {account} still busy after {} retries",
            self.acquire_retries
        )))
    }

    /// Mark the account's session idle and stamp last-used time. The handle
    /// stays open for reuse.
    pub fn release(&self, account: &str) {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(account) {
            Some(entry) => {
                entry.busy = false;
                entry.last_used = self.clock.now();
            }
            None => debug!(account, "Release for an evicted session"),
        }
    }

    /// Force-close and remove the account's session, busy or not.
    pub async fn evict(&self, account: &str) {
        let removed = self.entries.lock().unwrap().remove(account);
        if let Some(entry) = removed {
            if entry.busy {
                warn!(account, "Evicting a busy session");
            }
            entry.session.close().await;
            info!(account, "Session evicted");
        }
    }

    /// Close and remove idle sessions past the idle-age threshold. Returns
    /// how many were closed. The background sweep calls this on an interval;
    /// tests call it directly.
    pub async fn sweep_idle(&self) -> usize {
        let now = self.clock.now();
        let stale: Vec<(String, SessionEntry)> = {
            let mut entries = self.entries.lock().unwrap();
            let accounts: Vec<String> = entries
                .iter()
                .filter(|(_, e)| !e.busy && now.duration_since(e.last_used) >= self.idle_age)
                .map(|(account, _)| account.clone())
                .collect();
            accounts
                .into_iter()
                .filter_map(|account| entries.remove(&account).map(|e| (account, e)))
                .collect()
        };

        let swept = stale.len();
        for (account, entry) in stale {
            entry.session.close().await;
            info!(account, idle_secs = self.idle_age.as_secs(), "Closed idle session");
        }
        swept
    }

    /// Run the idle sweep forever at the configured interval.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) {
        let pool = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let swept = pool.sweep_idle().await;
                if swept > 0 {
                    debug!(swept, "Session sweep finished");
                }
            }
        });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;

    use reachgraph_common::{ManualClock, StoredSession};
    use reachgraph_store::MemoryStore;

    use crate::scraper::{LoginOutcome, PostData, ProfileData};

    struct FakeSession {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ScraperSession for FakeSession {
        async fn fetch_profile(
            &self,
            _identity: &str,
        ) -> Result<Option<ProfileData>, ReachGraphError> {
            Ok(None)
        }

        async fn fetch_followers(&self, _identity: &str) -> Result<Vec<String>, ReachGraphError> {
            Ok(Vec::new())
        }

        async fn fetch_following(&self, _identity: &str) -> Result<Vec<String>, ReachGraphError> {
            Ok(Vec::new())
        }

        async fn fetch_posts(
            &self,
            _identity: &str,
            _limit: u32,
        ) -> Result<Vec<PostData>, ReachGraphError> {
            Ok(Vec::new())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        opened: AtomicUsize,
        last_closed: Mutex<Vec<Arc<AtomicBool>>>,
    }

    #[async_trait]
    impl ScraperBackend for FakeBackend {
        async fn open_session(
            &self,
            _account: &str,
            _credentials: &str,
        ) -> Result<Box<dyn ScraperSession>, ReachGraphError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let closed = Arc::new(AtomicBool::new(false));
            self.last_closed.lock().unwrap().push(closed.clone());
            Ok(Box::new(FakeSession { closed }))
        }

        async fn begin_login(
            &self,
            _username: &str,
            _password: &str,
        ) -> Result<LoginOutcome, ReachGraphError> {
            Ok(LoginOutcome::Failed { error: "not under test".into() })
        }
    }

    async fn pool_with_creds(
        clock: Arc<dyn Clock>,
        config: &CrawlerConfig,
    ) -> (Arc<SessionPool>, Arc<FakeBackend>) {
        let store = Arc::new(MemoryStore::new());
        store
            .save_session(StoredSession {
                account: "bot".into(),
                credentials: "blob".into(),
                saved_at: Utc::now(),
            })
            .await
            .unwrap();
        let backend = Arc::new(FakeBackend::default());
        let pool = Arc::new(SessionPool::new(store, backend.clone(), clock, config));
        (pool, backend)
    }

    fn fast_config() -> CrawlerConfig {
        CrawlerConfig {
            session_acquire_retries: 50,
            session_acquire_backoff: Duration::from_millis(5),
            ..CrawlerConfig::default()
        }
    }

    #[tokio::test]
    async fn acquire_without_credentials_returns_none() {
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(FakeBackend::default());
        let pool = SessionPool::new(
            store,
            backend.clone(),
            Arc::new(ManualClock::new()),
            &fast_config(),
        );

        let session = pool.acquire("ghost").await.unwrap();
        assert!(session.is_none());
        assert_eq!(backend.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn released_session_is_reused_not_reopened() {
        let clock = Arc::new(ManualClock::new());
        let (pool, backend) = pool_with_creds(clock, &fast_config()).await;

        let first = pool.acquire("bot").await.unwrap();
        assert!(first.is_some());
        pool.release("bot");

        let second = pool.acquire("bot").await.unwrap();
        assert!(second.is_some());
        pool.release("bot");

        assert_eq!(backend.opened.load(Ordering::SeqCst), 1, "idle handle must be reused");
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquires_never_duplicate_a_handle() {
        let clock = Arc::new(ManualClock::new());
        let (pool, backend) = pool_with_creds(clock, &fast_config()).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let session = pool.acquire("bot").await.unwrap();
                assert!(session.is_some());
                tokio::time::sleep(Duration::from_millis(5)).await;
                pool.release("bot");
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(
            backend.opened.load(Ordering::SeqCst),
            1,
            "two live handles for one identity"
        );
    }

    #[tokio::test]
    async fn busy_session_exhausts_retries_with_an_error() {
        let clock = Arc::new(ManualClock::new());
        let config = CrawlerConfig {
            session_acquire_retries: 2,
            session_acquire_backoff: Duration::from_millis(5),
            ..CrawlerConfig::default()
        };
        let (pool, _backend) = pool_with_creds(clock, &config).await;

        let _held = pool.acquire("bot").await.unwrap();
        let second = pool.acquire("bot").await;
        assert!(matches!(second, Err(ReachGraphError::SessionUnavailable(_))));
    }

    #[tokio::test]
    async fn sweep_closes_only_idle_entries_past_the_age() {
        let clock = Arc::new(ManualClock::new());
        let config = CrawlerConfig {
            session_idle_age: Duration::from_secs(600),
            ..fast_config()
        };
        let store = Arc::new(MemoryStore::new());
        for account in ["idle_bot", "busy_bot"] {
            store
                .save_session(StoredSession {
                    account: account.into(),
                    credentials: "blob".into(),
                    saved_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let backend = Arc::new(FakeBackend::default());
        let pool = SessionPool::new(store, backend.clone(), clock.clone(), &config);

        pool.acquire("idle_bot").await.unwrap();
        pool.release("idle_bot");
        pool.acquire("busy_bot").await.unwrap();

        clock.advance(Duration::from_secs(601));
        let swept = pool.sweep_idle().await;

        assert_eq!(swept, 1, "busy sessions must survive the sweep");
        assert_eq!(pool.len(), 1);
        let closed_flags = backend.last_closed.lock().unwrap();
        assert!(closed_flags[0].load(Ordering::SeqCst), "idle session must be closed");
        assert!(!closed_flags[1].load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn evict_bypasses_idle_age() {
        let clock = Arc::new(ManualClock::new());
        let (pool, backend) = pool_with_creds(clock, &fast_config()).await;

        pool.acquire("bot").await.unwrap();
        pool.release("bot");
        pool.evict("bot").await;

        assert_eq!(pool.len(), 0);
        assert!(backend.last_closed.lock().unwrap()[0].load(Ordering::SeqCst));

        // A later acquire builds a fresh handle.
        pool.acquire("bot").await.unwrap();
        assert_eq!(backend.opened.load(Ordering::SeqCst), 2);
    }
}
