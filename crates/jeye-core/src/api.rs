//! REST client for the approval API.
//!
//! Three calls: submit a decision, toggle the pause flag, and query the
//! current prompt/pause status. Responses are advisory; state changes are
//! confirmed through the event channel.

use crate::config::ServerConfig;
use async_trait::async_trait;
use jeye_proto::{DecisionAck, DecisionKind, DecisionRequest, PauseState, TrustStatus};
use reqwest::{Method, RequestBuilder, StatusCode};
use tracing::{debug, warn};

/// Errors from approval API calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("server returned {status} for {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// HTTP 409: the prompt was resolved by someone else.
    #[error("prompt already resolved")]
    AlreadyResolved { recorded: Option<DecisionKind> },

    #[error("invalid response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl ApiError {
    /// Transport-level failures are recovered locally and retried later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// The server operations the approval core needs.
#[async_trait]
pub trait ApprovalApi: Send + Sync {
    /// Submits `{ id, decision }`. Idempotent per `(id, decision)` server-side.
    async fn submit_decision(&self, request: &DecisionRequest) -> Result<DecisionAck, ApiError>;

    /// Requests a pause-flag transition. Idempotent.
    async fn set_paused(&self, paused: bool) -> Result<(), ApiError>;

    /// Fetches the pending prompt and pause flag.
    async fn fetch_status(&self) -> Result<TrustStatus, ApiError>;
}

/// `ApprovalApi` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpApprovalApi {
    client: reqwest::Client,
    server: ServerConfig,
}

impl HttpApprovalApi {
    pub fn new(server: ServerConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(server.request_timeout())
            .build()
            .map_err(ApiError::Client)?;
        Ok(Self { client, server })
    }

    fn request(&self, method: Method, path: &str) -> (String, RequestBuilder) {
        let url = self.server.url(path);
        let mut builder = self.client.request(method, &url);
        if let Some(token) = &self.server.token {
            builder = builder.bearer_auth(token);
        }
        (url, builder)
    }

    async fn send(url: &str, builder: RequestBuilder) -> Result<(StatusCode, String), ApiError> {
        let response = builder.send().await.map_err(|source| ApiError::Transport {
            url: url.to_string(),
            source,
        })?;
        let status = response.status();
        let body = response.text().await.map_err(|source| ApiError::Transport {
            url: url.to_string(),
            source,
        })?;
        debug!(url, status = status.as_u16(), "Approval API response");
        Ok((status, body))
    }
}

/// Lenient decode of the decision response: an empty or unexpected body
/// still means the server accepted.
fn parse_ack(body: &str) -> DecisionAck {
    if body.trim().is_empty() {
        return DecisionAck::default();
    }
    serde_json::from_str(body).unwrap_or_else(|e| {
        warn!(error = %e, "Unreadable decision response body");
        DecisionAck::default()
    })
}

fn status_error(url: String, status: StatusCode, body: String) -> ApiError {
    ApiError::Status {
        url,
        status: status.as_u16(),
        body,
    }
}

#[async_trait]
impl ApprovalApi for HttpApprovalApi {
    async fn submit_decision(&self, request: &DecisionRequest) -> Result<DecisionAck, ApiError> {
        let (url, builder) = self.request(Method::POST, &self.server.decision_path);
        let (status, body) = Self::send(&url, builder.json(request)).await?;

        if status == StatusCode::CONFLICT {
            return Err(ApiError::AlreadyResolved {
                recorded: parse_ack(&body).decision,
            });
        }
        if !status.is_success() {
            return Err(status_error(url, status, body));
        }
        Ok(parse_ack(&body))
    }

    async fn set_paused(&self, paused: bool) -> Result<(), ApiError> {
        let (url, builder) = self.request(Method::POST, &self.server.kill_path);
        let (status, body) = Self::send(&url, builder.json(&PauseState { paused })).await?;
        if !status.is_success() {
            return Err(status_error(url, status, body));
        }
        Ok(())
    }

    async fn fetch_status(&self) -> Result<TrustStatus, ApiError> {
        let (url, builder) = self.request(Method::GET, &self.server.status_path);
        let (status, body) = Self::send(&url, builder).await?;
        if !status.is_success() {
            return Err(status_error(url, status, body));
        }
        serde_json::from_str(&body).map_err(|source| ApiError::Decode { url, source })
    }
}
