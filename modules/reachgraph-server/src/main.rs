use std::sync::Arc;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ai_client::OpenAi;
use reachgraph_common::{Config, SystemClock};
use reachgraph_crawler::{AuthMachine, Crawler};
use reachgraph_store::{GraphStore, MemoryStore};
use scraperelay_client::ScrapeRelayClient;

mod adapters;
mod rest;

use adapters::{OpenAiAnalyzer, RelayScraperBackend};

pub struct AppState {
    pub crawler: Arc<Crawler>,
    pub auth: Arc<AuthMachine>,
    pub store: Arc<dyn GraphStore>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("reachgraph=info".parse()?))
        .init();

    let config = Config::from_env();

    let store: Arc<dyn GraphStore> = Arc::new(MemoryStore::new());
    let clock = Arc::new(SystemClock);

    let relay =
        ScrapeRelayClient::new(&config.scraperelay_url, config.scraperelay_token.as_deref());
    let backend = Arc::new(RelayScraperBackend::new(relay));

    let openai = OpenAi::new(&config.openai_api_key, &config.analysis_model)
        .with_embedding_model(&config.embedding_model)
        .with_base_url(&config.openai_base_url);
    let analyzer = Arc::new(OpenAiAnalyzer::new(openai, store.clone()));

    let crawler = Crawler::new(
        store.clone(),
        backend.clone(),
        analyzer,
        clock.clone(),
        config.crawler.clone(),
        config.default_scrape_account.clone(),
    );
    crawler.start();

    let auth = AuthMachine::new(store.clone(), backend, clock, &config.crawler);
    auth.start();

    let state = Arc::new(AppState { crawler: crawler.clone(), auth, store });

    let app = Router::new()
        // Health check
        .route("/", get(|| async { "ok" }))
        // Crawl jobs
        .route("/api/jobs", post(rest::api_create_job))
        .route("/api/jobs/{id}", get(rest::api_job_detail))
        .route("/api/jobs/{id}/cancel", post(rest::api_cancel_job))
        .route("/api/jobs/{id}/events", get(rest::api_job_events))
        // Auth flows
        .route("/api/auth/login", post(rest::api_login))
        .route("/api/auth/{id}/code", post(rest::api_submit_code))
        .route("/api/auth/{id}", get(rest::api_auth_status))
        // Profiles and stats
        .route("/api/profiles/{identity}", get(rest::api_profile))
        .route(
            "/api/profiles/{identity}/connections",
            get(rest::api_profile_connections),
        )
        .route("/api/stats", get(rest::api_stats))
        .with_state(state)
        // CORS
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        // Logging layer: method + path only
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        );

    let addr = format!("{}:{}", config.host, config.port);
    info!("ReachGraph server starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.expect("Failed to listen for shutdown signal");
        })
        .await?;

    info!("Server stopped. {}", crawler.stats());
    Ok(())
}
