use std::time::Duration;

use reqwest::{Client, StatusCode, header};
use thiserror::Error;
use tracing::{debug, warn};

use crate::api::SessionResponse;

/// Request timeout for session probes.
const PROBE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ProbeError {
    /// The server looked at the token and said no.
    #[error("Session rejected: {0}")]
    Rejected(String),

    #[error("Session check unavailable: {0}")]
    Unavailable(String),
}

/// What a successful probe tells the cache about the server-side session.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbedSession {
    pub name: String,
    pub completed_items: Vec<i64>,
}

/// Re-validates a server token.
#[rocket::async_trait]
pub trait AuthProbe: Send + Sync {
    async fn probe(&self, token: &str) -> Result<ProbedSession, ProbeError>;
}

/// Calls `GET {base_url}/api/session` with the token as a bearer credential.
#[derive(Clone)]
pub struct HttpAuthProbe {
    client: Client,
    base_url: String,
}

impl HttpAuthProbe {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProbeError::Unavailable(e.to_string()))?;

        Ok(Self::with_client(client, base_url))
    }

    /// Shares an existing connection pool.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[rocket::async_trait]
impl AuthProbe for HttpAuthProbe {
    async fn probe(&self, token: &str) -> Result<ProbedSession, ProbeError> {
        let url = format!("{}/api/session", self.base_url);
        debug!(url = %url, "Probing session");

        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ProbeError::Unavailable(e.to_string()))?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                warn!(status = %status, "Session probe rejected");
                return Err(ProbeError::Rejected(body));
            }
            s if !s.is_success() => {
                return Err(ProbeError::Unavailable(format!("Status {}", s)));
            }
            _ => {}
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| ProbeError::Unavailable(format!("Invalid session response: {}", e)))?;

        Ok(ProbedSession {
            name: session.user.user.name,
            completed_items: session.user.completed_videos,
        })
    }
}
