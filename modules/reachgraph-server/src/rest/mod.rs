use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use reachgraph_common::{ReachGraphError, ScrapeFlags};

use crate::AppState;

pub const MAX_SEED_LENGTH: usize = 64;

// --- Request bodies ---

#[derive(Deserialize)]
pub struct CreateJobRequest {
    seed: String,
    depth_bound: Option<u32>,
    scrape_followers: Option<bool>,
    scrape_following: Option<bool>,
    scrape_posts: Option<bool>,
    account: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Deserialize)]
pub struct CodeRequest {
    code: String,
}

// --- Helpers ---

fn not_found(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": format!("{what} not found") })),
    )
        .into_response()
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": message }))).into_response()
}

// --- Crawl jobs ---

pub async fn api_create_job(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateJobRequest>,
) -> impl IntoResponse {
    let seed = body.seed.trim().to_string();
    if seed.len() > MAX_SEED_LENGTH {
        return bad_request(format!("seed too long (max {MAX_SEED_LENGTH} characters)"));
    }
    let flags = ScrapeFlags {
        followers: body.scrape_followers.unwrap_or(true),
        following: body.scrape_following.unwrap_or(true),
        posts: body.scrape_posts.unwrap_or(true),
    };
    let depth_bound = body.depth_bound.unwrap_or(1);

    match state.crawler.create_job(&seed, depth_bound, flags, body.account).await {
        Ok(job) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "job_id": job.id.to_string() })),
        )
            .into_response(),
        Err(ReachGraphError::Validation(message)) => bad_request(message),
        Err(e) => {
            warn!(error = %e, "Failed to create crawl job");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn api_job_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.store.job(id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => not_found("job"),
        Err(e) => {
            warn!(job_id = %id, error = %e, "Failed to load job");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn api_cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    // Existence first, so an unknown id reads as 404 rather than a conflict.
    match state.store.job(id).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("job"),
        Err(e) => {
            warn!(job_id = %id, error = %e, "Failed to load job");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    match state.crawler.cancel_job(id).await {
        Ok(()) => Json(serde_json::json!({ "cancelled": true })).into_response(),
        Err(ReachGraphError::StateConflict(_)) => {
            Json(serde_json::json!({ "cancelled": false })).into_response()
        }
        Err(e) => {
            warn!(job_id = %id, error = %e, "Failed to cancel job");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn api_job_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.store.job(id).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("job"),
        Err(e) => {
            warn!(job_id = %id, error = %e, "Failed to load job");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    match state.store.job_events(id).await {
        Ok(events) => Json(events).into_response(),
        Err(e) => {
            warn!(job_id = %id, error = %e, "Failed to load job events");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// --- Auth flows ---

pub async fn api_login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> impl IntoResponse {
    match state.auth.submit_login(&body.username, &body.password) {
        Ok(id) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "auth_job_id": id.to_string() })),
        )
            .into_response(),
        Err(ReachGraphError::Validation(message)) => bad_request(message),
        Err(e) => {
            warn!(error = %e, "Failed to queue login");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn api_submit_code(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<CodeRequest>,
) -> impl IntoResponse {
    match state.auth.submit_second_factor(id, &body.code) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "accepted" })),
        )
            .into_response(),
        Err(ReachGraphError::Validation(message)) => bad_request(message),
        Err(ReachGraphError::AuthExpired(message)) => {
            (StatusCode::GONE, Json(serde_json::json!({ "error": message }))).into_response()
        }
        Err(ReachGraphError::StateConflict(message)) => {
            (StatusCode::CONFLICT, Json(serde_json::json!({ "error": message }))).into_response()
        }
        Err(e) => {
            warn!(auth_id = %id, error = %e, "Failed to queue second-factor code");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn api_auth_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.auth.status(id) {
        Some(status) => Json(status).into_response(),
        None => not_found("auth job"),
    }
}

// --- Profiles and stats ---

pub async fn api_profile(
    State(state): State<Arc<AppState>>,
    Path(identity): Path<String>,
) -> impl IntoResponse {
    match state.store.profile(&identity).await {
        Ok(Some(profile)) => Json(profile).into_response(),
        Ok(None) => not_found("profile"),
        Err(e) => {
            warn!(identity, error = %e, "Failed to load profile");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn api_profile_connections(
    State(state): State<Arc<AppState>>,
    Path(identity): Path<String>,
) -> impl IntoResponse {
    match state.store.profiles_by_parent(&identity).await {
        Ok(profiles) => Json(profiles).into_response(),
        Err(e) => {
            warn!(identity, error = %e, "Failed to load connections");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn api_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.crawler.stats())
}
