//! HTTP client for the generation service.
//!
//! Endpoints:
//! - POST /api/generate - Streamed generation (event frames)
//! - POST /api/scan - Scan an existing artifact
//! - GET /api/health - Liveness probe

use anyhow::{Context, Result};
use reqwest::Response;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::GenerateError;
use crate::stream::Assessment;

/// Body of a generation request.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest<'a> {
    pub description: &'a str,
    pub template_id: Option<&'a str>,
}

/// Body of a scan request.
#[derive(Debug, Serialize)]
struct ScanRequest<'a> {
    content: &'a str,
}

/// Response from the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

/// Thin client over the service's HTTP API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    /// Build a client from configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(http, &config.api_base))
    }

    pub fn with_client(http: reqwest::Client, base: &str) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// Base URL of the service.
    pub fn base(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    /// Issue a generation request. On success the response body is the
    /// event stream.
    pub async fn generate(&self, request: &GenerateRequest<'_>) -> Result<Response, GenerateError> {
        let url = self.url("/api/generate");
        debug!(%url, template = ?request.template_id, "issuing generation request");

        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| GenerateError::from_reqwest(&e, &self.base))?;

        check_status(response).await
    }

    /// Scan an artifact without generating one.
    pub async fn scan(&self, content: &str) -> Result<Assessment, GenerateError> {
        let response = self
            .http
            .post(self.url("/api/scan"))
            .json(&ScanRequest { content })
            .send()
            .await
            .map_err(|e| GenerateError::from_reqwest(&e, &self.base))?;

        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| GenerateError::Transport(e.to_string()))
    }

    /// Probe the service.
    pub async fn health(&self) -> Result<HealthStatus, GenerateError> {
        let response = self
            .http
            .get(self.url("/api/health"))
            .send()
            .await
            .map_err(|e| GenerateError::from_reqwest(&e, &self.base))?;

        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| GenerateError::Transport(e.to_string()))
    }
}

/// Pass successful responses through; turn anything else into an error
/// carrying the body's `detail` when present.
async fn check_status(response: Response) -> Result<Response, GenerateError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await.unwrap_or_default();
    Err(GenerateError::from_status(status, &body))
}
