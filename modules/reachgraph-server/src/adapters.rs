// Concrete collaborators behind the crawler's trait seams: the scraperelay
// service as the scraping backend, and an OpenAI-compatible endpoint as the
// profile analyzer. Relay flow ids are the wire form of a pending login.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, warn};

use ai_client::{EmbedAgent, OpenAi};
use reachgraph_common::ReachGraphError;
use reachgraph_crawler::{
    AnalysisInput, EmbeddingInput, LoginOutcome, PendingLogin, PostData, ProfileAnalyzer,
    ProfileData, ProfileInsights, ScraperBackend, ScraperSession, VerifyOutcome,
};
use reachgraph_store::GraphStore;
use scraperelay_client::{LoginStart, RelayError, RelayProfile, ScrapeRelayClient, VerifyReply};

fn relay_err(e: RelayError) -> ReachGraphError {
    ReachGraphError::Scraping(e.to_string())
}

// --- Scraping over the relay ---

pub struct RelayScraperBackend {
    relay: Arc<ScrapeRelayClient>,
}

impl RelayScraperBackend {
    pub fn new(relay: ScrapeRelayClient) -> Self {
        Self { relay: Arc::new(relay) }
    }
}

#[async_trait]
impl ScraperBackend for RelayScraperBackend {
    async fn open_session(
        &self,
        account: &str,
        credentials: &str,
    ) -> Result<Box<dyn ScraperSession>, ReachGraphError> {
        let session_id = self.relay.open_session(credentials).await.map_err(relay_err)?;
        debug!(account, session_id, "Relay session opened for crawling");
        Ok(Box::new(RelaySession { relay: self.relay.clone(), session_id }))
    }

    async fn begin_login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<LoginOutcome, ReachGraphError> {
        match self.relay.begin_login(username, password).await.map_err(relay_err)? {
            LoginStart::Success { identity, credentials } => {
                Ok(LoginOutcome::Success { identity, credentials })
            }
            LoginStart::SecondFactor { flow_id } => Ok(LoginOutcome::SecondFactorRequired {
                pending: Box::new(RelayPendingLogin { relay: self.relay.clone(), flow_id }),
            }),
            LoginStart::Failed { error } => Ok(LoginOutcome::Failed { error }),
        }
    }
}

struct RelaySession {
    relay: Arc<ScrapeRelayClient>,
    session_id: String,
}

#[async_trait]
impl ScraperSession for RelaySession {
    async fn fetch_profile(
        &self,
        identity: &str,
    ) -> Result<Option<ProfileData>, ReachGraphError> {
        let profile = self.relay.profile(&self.session_id, identity).await.map_err(relay_err)?;
        Ok(profile.map(profile_data))
    }

    async fn fetch_followers(&self, identity: &str) -> Result<Vec<String>, ReachGraphError> {
        self.relay.followers(&self.session_id, identity).await.map_err(relay_err)
    }

    async fn fetch_following(&self, identity: &str) -> Result<Vec<String>, ReachGraphError> {
        self.relay.following(&self.session_id, identity).await.map_err(relay_err)
    }

    async fn fetch_posts(
        &self,
        identity: &str,
        limit: u32,
    ) -> Result<Vec<PostData>, ReachGraphError> {
        let posts = self
            .relay
            .posts(&self.session_id, identity, limit)
            .await
            .map_err(relay_err)?;
        Ok(posts.into_iter().map(|p| PostData { caption: p.caption }).collect())
    }

    async fn close(&self) {
        if let Err(e) = self.relay.close_session(&self.session_id).await {
            warn!(session_id = %self.session_id, error = %e, "Failed to close relay session");
        }
    }
}

fn profile_data(p: RelayProfile) -> ProfileData {
    ProfileData {
        username: p.username,
        display_name: p.display_name,
        bio: p.bio,
        is_private: p.is_private,
        follower_count: p.follower_count,
        following_count: p.following_count,
    }
}

struct RelayPendingLogin {
    relay: Arc<ScrapeRelayClient>,
    flow_id: String,
}

#[async_trait]
impl PendingLogin for RelayPendingLogin {
    async fn submit_code(&mut self, code: &str) -> Result<VerifyOutcome, ReachGraphError> {
        match self.relay.submit_code(&self.flow_id, code).await.map_err(relay_err)? {
            VerifyReply::Success { identity, credentials } => {
                Ok(VerifyOutcome::Success { identity, credentials })
            }
            VerifyReply::WrongCode { error } => Ok(VerifyOutcome::WrongCode { error }),
            VerifyReply::Failed { error } => Ok(VerifyOutcome::Failed { error }),
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.relay.abandon_login(&self.flow_id).await {
            warn!(flow_id = %self.flow_id, error = %e, "Failed to abandon relay login flow");
        }
    }
}

// --- Analysis over an OpenAI-compatible endpoint ---

const ANALYSIS_SYSTEM_PROMPT: &str = "You analyze social media profiles. For each profile in the \
JSON array you receive, infer up to five interests from the bio and post captions, and a short \
niche label where the text clearly supports one. Echo each identity back unchanged and return \
one entry per input profile.";

#[derive(Debug, Deserialize, JsonSchema)]
struct AnalysisResponse {
    profiles: Vec<ProfileInsights>,
}

pub struct OpenAiAnalyzer {
    openai: OpenAi,
    store: Arc<dyn GraphStore>,
}

impl OpenAiAnalyzer {
    pub fn new(openai: OpenAi, store: Arc<dyn GraphStore>) -> Self {
        Self { openai, store }
    }
}

#[async_trait]
impl ProfileAnalyzer for OpenAiAnalyzer {
    async fn analyze_batch(&self, batch: Vec<AnalysisInput>) -> Result<Vec<ProfileInsights>> {
        let user_prompt = serde_json::to_string_pretty(&batch)?;
        let response: AnalysisResponse =
            self.openai.extract(ANALYSIS_SYSTEM_PROMPT, user_prompt).await?;
        debug!(
            requested = batch.len(),
            returned = response.profiles.len(),
            "Analysis batch returned"
        );
        Ok(response.profiles)
    }

    async fn create_embeddings_batch(&self, inputs: Vec<EmbeddingInput>) -> Result<()> {
        if inputs.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = inputs.iter().map(|i| i.text.clone()).collect();
        let vectors = self.openai.embed_batch(texts).await?;
        if vectors.len() != inputs.len() {
            return Err(anyhow!(
                "embedding count mismatch: {} texts, {} vectors",
                inputs.len(),
                vectors.len()
            ));
        }
        for (input, vector) in inputs.into_iter().zip(vectors) {
            if let Err(e) = self.store.save_embedding(&input.identity, vector).await {
                warn!(identity = %input.identity, error = %e, "Failed to persist embedding");
            }
        }
        Ok(())
    }
}
