use super::{
    HealthResponse, IceCandidateInit, IceCandidatesRequest, IceServersResponse, OfferRequest,
    OfferResponse, PipelineLoadRequest, PipelineStatus, ScopeApi,
};
use crate::error::ApiError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, trace};

/// reqwest client for the Scope HTTP API
#[derive(Debug, Clone)]
pub struct ScopeClient {
    base_url: String,
    http: reqwest::Client,
}

impl ScopeClient {
    /// `base_url` is the server root, e.g. `https://scope.example.com`
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Self::build(base_url, None)
    }

    /// Like [`ScopeClient::new`] but every request gives up after `timeout`
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        Self::build(base_url, Some(timeout))
    }

    fn build(base_url: &str, timeout: Option<Duration>) -> Result<Self, ApiError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(ApiError::InvalidBaseUrl(base_url.to_string()));
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            base_url: trimmed.to_string(),
            http: builder.build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check status, then decode the body. Empty and `null` bodies are [`ApiError::Empty`].
    async fn decode<T: DeserializeOwned>(
        endpoint: &str,
        resp: reqwest::Response,
    ) -> Result<T, ApiError> {
        let text = Self::check(endpoint, resp).await?;
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Err(ApiError::Empty(endpoint.to_string()));
        }
        serde_json::from_str(trimmed).map_err(|source| ApiError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }

    async fn check(endpoint: &str, resp: reqwest::Response) -> Result<String, ApiError> {
        let status = resp.status();
        let body = resp.text().await?;
        trace!("{} -> {} ({} bytes)", endpoint, status, body.len());

        if !status.is_success() {
            return Err(ApiError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl ScopeApi for ScopeClient {
    async fn check_health(&self) -> Result<HealthResponse, ApiError> {
        let endpoint = "/health";
        let resp = self.http.get(self.url(endpoint)).send().await?;
        Self::decode(endpoint, resp).await
    }

    async fn get_ice_servers(&self) -> Result<IceServersResponse, ApiError> {
        let endpoint = "/api/v1/webrtc/ice-servers";
        let resp = self.http.get(self.url(endpoint)).send().await?;
        let servers: IceServersResponse = Self::decode(endpoint, resp).await?;
        debug!("Received {} ICE servers", servers.ice_servers.len());
        Ok(servers)
    }

    async fn create_webrtc_offer(&self, offer: &OfferRequest) -> Result<OfferResponse, ApiError> {
        let endpoint = "/api/v1/webrtc/offer";
        let resp = self.http.post(self.url(endpoint)).json(offer).send().await?;
        Self::decode(endpoint, resp).await
    }

    async fn add_ice_candidates(
        &self,
        session_id: &str,
        candidates: &[IceCandidateInit],
    ) -> Result<(), ApiError> {
        let endpoint = format!("/api/v1/webrtc/offer/{}", session_id);
        let body = IceCandidatesRequest {
            candidates: candidates.to_vec(),
        };
        let resp = self.http.patch(self.url(&endpoint)).json(&body).send().await?;
        Self::check(&endpoint, resp).await?;
        Ok(())
    }

    async fn pipeline_status(&self) -> Result<PipelineStatus, ApiError> {
        let endpoint = "/api/v1/pipeline/status";
        let resp = self.http.get(self.url(endpoint)).send().await?;
        Self::decode(endpoint, resp).await
    }

    async fn load_pipeline(&self, request: &PipelineLoadRequest) -> Result<(), ApiError> {
        let endpoint = "/api/v1/pipeline/load";
        let resp = self.http.post(self.url(endpoint)).json(request).send().await?;
        Self::check(endpoint, resp).await?;
        Ok(())
    }
}
