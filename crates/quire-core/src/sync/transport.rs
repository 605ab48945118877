//! Hub transport
//!
//! [`SyncTransport`] is the request/response contract a hub exposes.
//! [`HttpTransport`] speaks it over HTTP with reqwest.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use super::protocol::{
    LoginRequest, LoginResponse, PullQuery, PullResponse, PushRequest, PushResponse,
    StatusResponse,
};
use crate::config::normalize_hub_url;
use crate::util::compact_text;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The token was missing, expired or revoked
    #[error("Unauthorized")]
    Unauthorized,
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Hub API error: {message} ({status})")]
    Api { status: u16, message: String },
    #[error("Hub unavailable: {0}")]
    Unavailable(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn health(&self) -> TransportResult<()>;

    /// Exchange credentials for an opaque bearer token
    async fn login(&self, username: &str, password: &str) -> TransportResult<String>;

    async fn pull(&self, token: &str, peer_id: &str, limit: usize) -> TransportResult<PullResponse>;

    async fn push(&self, token: &str, request: &PushRequest) -> TransportResult<PushResponse>;

    async fn status(&self, token: &str) -> TransportResult<StatusResponse>;
}

/// reqwest-backed transport against a hub's base URL
#[derive(Clone, Debug)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> crate::Result<Self> {
        Ok(Self {
            base_url: normalize_hub_url(base_url.into())?,
            client: reqwest::Client::builder()
                .build()
                .map_err(TransportError::from)?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> TransportResult<T> {
        let response = check(request.send().await?).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn health(&self) -> TransportResult<()> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .map_err(|error| TransportError::Unavailable(error.to_string()))?;
        check(response).await.map(|_| ())
    }

    async fn login(&self, username: &str, password: &str) -> TransportResult<String> {
        let request = self.client.post(self.url("/auth/login")).json(&LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        });
        let payload: LoginResponse = Self::send_json(request).await?;
        Ok(payload.token)
    }

    async fn pull(&self, token: &str, peer_id: &str, limit: usize) -> TransportResult<PullResponse> {
        let request = self
            .client
            .get(self.url("/sync/pull"))
            .bearer_auth(token)
            .query(&PullQuery {
                peer_id: peer_id.to_string(),
                limit: Some(limit),
            });
        Self::send_json(request).await
    }

    async fn push(&self, token: &str, request: &PushRequest) -> TransportResult<PushResponse> {
        let request = self
            .client
            .post(self.url("/sync/push"))
            .bearer_auth(token)
            .json(request);
        Self::send_json(request).await
    }

    async fn status(&self, token: &str) -> TransportResult<StatusResponse> {
        let request = self.client.get(self.url("/sync/status")).bearer_auth(token);
        Self::send_json(request).await
    }
}

/// Map non-success statuses to transport errors
async fn check(response: Response) -> TransportResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(TransportError::Unauthorized);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Api {
        status: status.as_u16(),
        message: parse_api_error(&body),
    })
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.error.or(payload.message) {
            return compact_text(&message);
        }
    }
    let compacted = compact_text(body);
    if compacted.is_empty() {
        "empty response body".to_string()
    } else {
        compacted
    }
}
