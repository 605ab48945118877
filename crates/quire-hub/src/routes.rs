use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::HeaderMap;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use quire_core::auth::Authenticator;
use quire_core::sync::{
    HealthResponse, LoginRequest, LoginResponse, PullQuery, PullResponse, PushRequest,
    PushResponse, StatusResponse, SyncHub,
};
use tower_http::trace::TraceLayer;

use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    hub: SyncHub,
    auth: Arc<dyn Authenticator>,
}

impl AppState {
    pub fn new(hub: SyncHub, auth: Arc<dyn Authenticator>) -> Self {
        Self { hub, auth }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/pull", get(pull))
        .route("/push", post(push))
        .route("/status", get(status))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health))
        .route("/auth/login", post(login))
        .nest("/sync", protected_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let token = state
        .auth
        .login(&request.username, &request.password)
        .await?;
    tracing::info!(username = %request.username, "Issued hub token");
    Ok(Json(LoginResponse { token }))
}

async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    state.auth.verify(token).await?;
    Ok(next.run(request).await)
}

async fn pull(
    State(state): State<AppState>,
    Query(query): Query<PullQuery>,
) -> Result<Json<PullResponse>, AppError> {
    let page = state.hub.pull(&query.peer_id, query.limit).await?;
    tracing::info!(
        endpoint = "pull",
        peer_id = %query.peer_id,
        served = page.changes.len(),
        has_more = page.has_more,
        "Served pull"
    );
    Ok(Json(page))
}

async fn push(
    State(state): State<AppState>,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>, AppError> {
    Ok(Json(state.hub.push(request).await?))
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    Ok(Json(state.hub.status().await?))
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}
