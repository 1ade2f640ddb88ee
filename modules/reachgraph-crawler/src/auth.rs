use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use reachgraph_common::{AuthState, Clock, CrawlerConfig, ReachGraphError, StoredSession};
use reachgraph_store::GraphStore;

use crate::scraper::{LoginOutcome, PendingLogin, ScraperBackend, VerifyOutcome};

/// How often pollers waiting on a flow re-check its state.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Point-in-time view of one auth flow, as handed to pollers.
#[derive(Debug, Clone, Serialize)]
pub struct AuthStatus {
    pub id: Uuid,
    pub state: AuthState,
    pub error: Option<String>,
    /// Authenticated account identity, set once the flow completes.
    pub identity: Option<String>,
}

struct AuthEntry {
    state: AuthState,
    error: Option<String>,
    identity: Option<String>,
    expires_at: Instant,
}

struct PendingEntry {
    handle: Box<dyn PendingLogin>,
    expires_at: Instant,
}

enum AuthRequest {
    Login { id: Uuid, username: String, password: String },
    Verify { id: Uuid, code: String },
}

/// Queue-backed login driver. One worker processes flows strictly one at a
/// time; login automation shares a browser handle and is not parallelizable.
///
/// A flow that reaches the second-factor checkpoint parks its live handle in
/// the pending registry under the flow id. The matching code submission
/// resumes it; the expiry sweep closes it if nobody ever does.
pub struct AuthMachine {
    store: Arc<dyn GraphStore>,
    backend: Arc<dyn ScraperBackend>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    sweep_interval: Duration,
    queue: Mutex<VecDeque<AuthRequest>>,
    notify: Notify,
    registry: Mutex<HashMap<Uuid, AuthEntry>>,
    pending: Mutex<HashMap<Uuid, PendingEntry>>,
}

impl AuthMachine {
    pub fn new(
        store: Arc<dyn GraphStore>,
        backend: Arc<dyn ScraperBackend>,
        clock: Arc<dyn Clock>,
        config: &CrawlerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            backend,
            clock,
            ttl: config.auth_ttl,
            sweep_interval: config.auth_sweep_interval,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            registry: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Spawn the single worker and the expiry sweeper.
    pub fn start(self: &Arc<Self>) {
        let machine = self.clone();
        tokio::spawn(async move { machine.worker_loop().await });

        let machine = self.clone();
        let interval = self.sweep_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                machine.sweep_expired().await;
            }
        });
        info!("Auth machine started");
    }

    // --- Submission surface ---

    /// Queue an interactive login. The returned id is what callers poll.
    pub fn submit_login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Uuid, ReachGraphError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(ReachGraphError::Validation(
                "username and password are required".into(),
            ));
        }

        let id = Uuid::new_v4();
        let expires_at = self.clock.now() + self.ttl;
        self.registry.lock().unwrap().insert(
            id,
            AuthEntry { state: AuthState::Pending, error: None, identity: None, expires_at },
        );
        self.queue.lock().unwrap().push_back(AuthRequest::Login {
            id,
            username: username.to_string(),
            password: password.to_string(),
        });
        self.notify.notify_one();
        info!(auth_id = %id, username, "Login job queued");
        Ok(id)
    }

    /// Queue a code against a flow parked at the second-factor checkpoint.
    pub fn submit_second_factor(&self, id: Uuid, code: &str) -> Result<(), ReachGraphError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ReachGraphError::Validation("verification code is required".into()));
        }

        {
            let mut registry = self.registry.lock().unwrap();
            let entry = registry
                .get_mut(&id)
                .ok_or_else(|| ReachGraphError::AuthExpired(format!("no auth job {id}")))?;
            match entry.state {
                AuthState::WaitingSecondFactor => {
                    entry.state = AuthState::Pending;
                    entry.error = None;
                }
                state => {
                    return Err(ReachGraphError::StateConflict(format!(
                        "auth job {id} is {state}, not awaiting a code"
                    )));
                }
            }
        }

        self.queue
            .lock()
            .unwrap()
            .push_back(AuthRequest::Verify { id, code: code.to_string() });
        self.notify.notify_one();
        debug!(auth_id = %id, "Second-factor code queued");
        Ok(())
    }

    pub fn status(&self, id: Uuid) -> Option<AuthStatus> {
        self.registry.lock().unwrap().get(&id).map(|entry| AuthStatus {
            id,
            state: entry.state,
            error: entry.error.clone(),
            identity: entry.identity.clone(),
        })
    }

    /// Poll until the flow leaves `pending`/`processing` or the timeout
    /// elapses, returning the last snapshot seen. `None` means the flow is
    /// unknown or already swept away.
    pub async fn wait_for_outcome(&self, id: Uuid, timeout: Duration) -> Option<AuthStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = self.status(id);
            match &status {
                None => return None,
                Some(s) if !matches!(s.state, AuthState::Pending | AuthState::Processing) => {
                    return status;
                }
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return status;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Live flows currently parked at the second-factor checkpoint.
    pub fn pending_logins(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    // --- Worker ---

    async fn worker_loop(self: Arc<Self>) {
        debug!("Auth worker started");
        loop {
            let request = self.next_request().await;
            match request {
                AuthRequest::Login { id, username, password } => {
                    self.process_login(id, &username, &password).await;
                }
                AuthRequest::Verify { id, code } => {
                    self.process_verify(id, &code).await;
                }
            }
        }
    }

    async fn next_request(&self) -> AuthRequest {
        loop {
            let notified = self.notify.notified();
            if let Some(request) = self.queue.lock().unwrap().pop_front() {
                return request;
            }
            notified.await;
        }
    }

    async fn process_login(&self, id: Uuid, username: &str, password: &str) {
        self.set_processing(id);
        match self.backend.begin_login(username, password).await {
            Ok(LoginOutcome::Success { identity, credentials }) => {
                self.complete_with_session(id, identity, credentials).await;
            }
            Ok(LoginOutcome::SecondFactorRequired { pending }) => {
                let expires_at = self.clock.now() + self.ttl;
                self.pending
                    .lock()
                    .unwrap()
                    .insert(id, PendingEntry { handle: pending, expires_at });
                self.set_state(id, AuthState::WaitingSecondFactor, None, None);
                info!(auth_id = %id, username, "Login needs a second factor");
            }
            Ok(LoginOutcome::Failed { error }) => {
                warn!(auth_id = %id, username, error = %error, "Login rejected");
                self.set_state(id, AuthState::Failed, Some(error), None);
            }
            Err(e) => {
                warn!(auth_id = %id, username, error = %e, "Login attempt errored");
                self.set_state(id, AuthState::Failed, Some(e.to_string()), None);
            }
        }
    }

    async fn process_verify(&self, id: Uuid, code: &str) {
        self.set_processing(id);

        // Taking the entry out of the map disarms the expiry sweep while the
        // code is in flight.
        let entry = self.pending.lock().unwrap().remove(&id);
        let Some(mut entry) = entry else {
            warn!(auth_id = %id, "No pending login for this code, flow expired");
            self.set_state(
                id,
                AuthState::Failed,
                Some("second-factor window expired, restart login".into()),
                None,
            );
            return;
        };

        match entry.handle.submit_code(code).await {
            Ok(VerifyOutcome::Success { identity, credentials }) => {
                self.complete_with_session(id, identity, credentials).await;
                entry.handle.close().await;
            }
            Ok(VerifyOutcome::WrongCode { error }) => {
                // Checkpoint still open: park the handle again with a fresh
                // window and let the caller retry against the same id.
                entry.expires_at = self.clock.now() + self.ttl;
                self.pending.lock().unwrap().insert(id, entry);
                info!(auth_id = %id, "Wrong second-factor code, still waiting");
                self.set_state(id, AuthState::WaitingSecondFactor, Some(error), None);
            }
            Ok(VerifyOutcome::Failed { error }) => {
                entry.handle.close().await;
                warn!(auth_id = %id, error = %error, "Second-factor verification failed");
                self.set_state(id, AuthState::Failed, Some(error), None);
            }
            Err(e) => {
                // Transport trouble, not a verdict. The handle may still be
                // good, so the flow stays resumable.
                entry.expires_at = self.clock.now() + self.ttl;
                self.pending.lock().unwrap().insert(id, entry);
                warn!(auth_id = %id, error = %e, "Second-factor submission errored");
                self.set_state(id, AuthState::WaitingSecondFactor, Some(e.to_string()), None);
            }
        }
    }

    async fn complete_with_session(&self, id: Uuid, identity: String, credentials: String) {
        let session = StoredSession {
            account: identity.clone(),
            credentials,
            saved_at: chrono::Utc::now(),
        };
        match self.store.save_session(session).await {
            Ok(()) => {
                info!(auth_id = %id, identity, "Login completed, session saved");
                self.set_state(id, AuthState::Completed, None, Some(identity));
            }
            Err(e) => {
                error!(auth_id = %id, error = %e, "Failed to persist session");
                self.set_state(
                    id,
                    AuthState::Failed,
                    Some(format!("failed to persist session: {e}")),
                    None,
                );
            }
        }
    }

    fn set_processing(&self, id: Uuid) {
        if let Some(entry) = self.registry.lock().unwrap().get_mut(&id) {
            entry.state = AuthState::Processing;
        }
    }

    /// Record a transition and give the flow a fresh TTL window, so active
    /// flows stay visible and terminal outcomes stay pollable for a while.
    fn set_state(
        &self,
        id: Uuid,
        state: AuthState,
        error: Option<String>,
        identity: Option<String>,
    ) {
        if let Some(entry) = self.registry.lock().unwrap().get_mut(&id) {
            entry.state = state;
            entry.error = error;
            entry.identity = identity;
            entry.expires_at = self.clock.now() + self.ttl;
        }
    }

    // --- Expiry ---

    /// One expiry pass. Pending handles past their window are closed and
    /// their flows failed. Registry rows linger one extra TTL past expiry so
    /// pollers can observe the terminal state, then disappear. Returns how
    /// many pending handles were closed.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now();

        let expired: Vec<(Uuid, PendingEntry)> = {
            let mut pending = self.pending.lock().unwrap();
            let ids: Vec<Uuid> = pending
                .iter()
                .filter(|(_, entry)| now >= entry.expires_at)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        let swept = expired.len();
        for (id, mut entry) in expired {
            entry.handle.close().await;
            info!(auth_id = %id, "Second-factor window expired, closed pending login");
            if let Some(row) = self.registry.lock().unwrap().get_mut(&id) {
                row.state = AuthState::Failed;
                row.error = Some("second-factor window expired".into());
            }
        }

        {
            let mut registry = self.registry.lock().unwrap();
            registry.retain(|id, entry| {
                if !entry.state.is_terminal() && now >= entry.expires_at {
                    entry.state = AuthState::Failed;
                    entry.error = Some("auth job expired".into());
                    debug!(auth_id = %id, "Auth job expired unprocessed");
                }
                now < entry.expires_at + self.ttl
            });
        }

        swept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use reachgraph_common::ManualClock;
    use reachgraph_store::MemoryStore;

    use crate::scraper::ScraperSession;

    struct RefusingBackend;

    #[async_trait]
    impl ScraperBackend for RefusingBackend {
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
            Ok(LoginOutcome::Failed { error: "bad password".into() })
        }
    }

    fn machine() -> Arc<AuthMachine> {
        AuthMachine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(RefusingBackend),
            Arc::new(ManualClock::new()),
            &CrawlerConfig::default(),
        )
    }

    #[tokio::test]
    async fn submit_login_requires_credentials() {
        let machine = machine();
        assert!(matches!(
            machine.submit_login("", "hunter2"),
            Err(ReachGraphError::Validation(_))
        ));
        assert!(matches!(
            machine.submit_login("alice", ""),
            Err(ReachGraphError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn submitted_login_is_visible_as_pending() {
        let machine = machine();
        let id = machine.submit_login("alice", "hunter2").unwrap();

        let status = machine.status(id).unwrap();
        assert_eq!(status.state, AuthState::Pending);
        assert!(status.error.is_none());
        assert!(machine.status(Uuid::new_v4()).is_none());
    }

    #[tokio::test]
    async fn code_for_an_unknown_flow_is_expired() {
        let machine = machine();
        let result = machine.submit_second_factor(Uuid::new_v4(), "123456");
        assert!(matches!(result, Err(ReachGraphError::AuthExpired(_))));
    }

    #[tokio::test]
    async fn code_for_a_flow_not_at_the_checkpoint_conflicts() {
        let machine = machine();
        let id = machine.submit_login("alice", "hunter2").unwrap();

        // Still pending; no second factor has been requested.
        let result = machine.submit_second_factor(id, "123456");
        assert!(matches!(result, Err(ReachGraphError::StateConflict(_))));
    }

    #[tokio::test]
    async fn unprocessed_flows_expire_and_are_reaped_a_ttl_later() {
        let clock = Arc::new(ManualClock::new());
        let machine = AuthMachine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(RefusingBackend),
            clock.clone(),
            &CrawlerConfig::default(),
        );
        let id = machine.submit_login("alice", "hunter2").unwrap();

        clock.advance(Duration::from_secs(301));
        machine.sweep_expired().await;
        let status = machine.status(id).unwrap();
        assert_eq!(status.state, AuthState::Failed);
        assert_eq!(status.error.as_deref(), Some("auth job expired"));

        clock.advance(Duration::from_secs(301));
        machine.sweep_expired().await;
        assert!(machine.status(id).is_none(), "terminal rows are reaped after the grace ttl");
    }
}
