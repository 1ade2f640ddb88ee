//! Client for the scraperelay service: a remote pool of logged-in browser
//! contexts that executes the actual page automation. Sessions and login
//! flows live relay-side and are addressed by the ids this client hands back.

pub mod error;

pub use error::{RelayError, Result};

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

pub struct ScrapeRelayClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

// --- Wire types ---

#[derive(Debug, Clone, Deserialize)]
pub struct RelayProfile {
    pub username: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub follower_count: u32,
    #[serde(default)]
    pub following_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayPost {
    pub caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionOpened {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct UsernameList {
    #[serde(default)]
    usernames: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PostList {
    #[serde(default)]
    posts: Vec<RelayPost>,
}

/// Outcome of starting a login flow on the relay.
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginStart {
    Success { identity: String, credentials: String },
    SecondFactor { flow_id: String },
    Failed { error: String },
}

/// Outcome of submitting a one-time code against a pending flow.
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerifyReply {
    Success { identity: String, credentials: String },
    WrongCode { error: String },
    Failed { error: String },
}

impl ScrapeRelayClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, format!("{}{}", self.base_url, path));
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(RelayError::Api { status: status.as_u16(), message });
        }
        Ok(resp)
    }

    // --- Sessions ---

    /// Open a browser context from stored login credentials.
    pub async fn open_session(&self, credentials: &str) -> Result<String> {
        let body = serde_json::json!({ "credentials": credentials });
        let resp = self.request(reqwest::Method::POST, "/sessions").json(&body).send().await?;
        let opened: SessionOpened = Self::check(resp).await?.json().await?;
        info!(session_id = %opened.session_id, "Relay session opened");
        Ok(opened.session_id)
    }

    pub async fn close_session(&self, session_id: &str) -> Result<()> {
        let resp = self
            .request(reqwest::Method::DELETE, &format!("/sessions/{session_id}"))
            .send()
            .await?;
        Self::check(resp).await?;
        info!(session_id, "Relay session closed");
        Ok(())
    }

    // --- Scraping ---

    /// Profile data for a username; `None` when the relay reports 404
    /// (account missing or inaccessible).
    pub async fn profile(&self, session_id: &str, username: &str) -> Result<Option<RelayProfile>> {
        debug!(username, "Fetching profile via relay");
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/sessions/{session_id}/profile/{username}"),
            )
            .send()
            .await?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        Ok(Some(Self::check(resp).await?.json().await?))
    }

    pub async fn followers(&self, session_id: &str, username: &str) -> Result<Vec<String>> {
        debug!(username, "Fetching followers via relay");
        self.username_list(session_id, username, "followers").await
    }

    pub async fn following(&self, session_id: &str, username: &str) -> Result<Vec<String>> {
        debug!(username, "Fetching following via relay");
        self.username_list(session_id, username, "following").await
    }

    async fn username_list(
        &self,
        session_id: &str,
        username: &str,
        kind: &str,
    ) -> Result<Vec<String>> {
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/sessions/{session_id}/profile/{username}/{kind}"),
            )
            .send()
            .await?;
        if resp.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        let list: UsernameList = Self::check(resp).await?.json().await?;
        Ok(list.usernames)
    }

    pub async fn posts(
        &self,
        session_id: &str,
        username: &str,
        limit: u32,
    ) -> Result<Vec<RelayPost>> {
        debug!(username, limit, "Fetching posts via relay");
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/sessions/{session_id}/profile/{username}/posts?limit={limit}"),
            )
            .send()
            .await?;
        if resp.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        let list: PostList = Self::check(resp).await?.json().await?;
        Ok(list.posts)
    }

    // --- Login flows ---

    pub async fn begin_login(&self, username: &str, password: &str) -> Result<LoginStart> {
        info!(username, "Starting relay login flow");
        let body = serde_json::json!({ "username": username, "password": password });
        let resp = self.request(reqwest::Method::POST, "/logins").json(&body).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    pub async fn submit_code(&self, flow_id: &str, code: &str) -> Result<VerifyReply> {
        info!(flow_id, "Submitting second-factor code to relay");
        let body = serde_json::json!({ "code": code });
        let resp = self
            .request(reqwest::Method::POST, &format!("/logins/{flow_id}/code"))
            .json(&body)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    /// Tear down a pending login flow without completing it.
    pub async fn abandon_login(&self, flow_id: &str) -> Result<()> {
        info!(flow_id, "Abandoning relay login flow");
        let resp =
            self.request(reqwest::Method::DELETE, &format!("/logins/{flow_id}")).send().await?;
        Self::check(resp).await?;
        Ok(())
    }
}
