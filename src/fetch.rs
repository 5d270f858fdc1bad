//! Retrieval of raw RDF/XML from the repository.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::config::FcrepoConfig;
use crate::error::{OaiError, Result};

/// Status line and body of a fetch, whatever the status.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub reason: String,
    pub body: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Source of a resource's RDF/XML representation.
///
/// Transport failures are errors; non-2xx responses are returned so the
/// caller can log them with the URI.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn get_rdf(&self, uri: &str) -> Result<FetchResponse>;
}

/// [`ResourceFetcher`] over HTTP with optional bearer authentication.
pub struct HttpFetcher {
    client: reqwest::Client,
    token: Option<String>,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                OaiError::Configuration(format!("Unable to build repository client: {}", e))
            })?;
        Ok(Self { client, token })
    }

    pub fn from_config(config: &FcrepoConfig) -> Result<Self> {
        let token = config.jwt_token();
        if token.is_none() {
            warn!(
                "{} is not set; repository requests will be unauthenticated",
                config.jwt_token_env
            );
        }
        Self::new(Duration::from_secs(config.timeout_secs), token)
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn get_rdf(&self, uri: &str) -> Result<FetchResponse> {
        let mut request = self
            .client
            .get(uri)
            .header("Accept", "application/rdf+xml");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(|e| {
            error!("GET {} failed: {}", uri, e);
            OaiError::UpstreamUnavailable("Unable to retrieve resource from fcrepo".to_string())
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            error!("GET {} -> {}: unreadable body: {}", uri, status, e);
            OaiError::UpstreamUnavailable("Unable to retrieve resource from fcrepo".to_string())
        })?;

        Ok(FetchResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        })
    }
}
