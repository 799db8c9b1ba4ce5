//! Scope API surface
//!
//! [`ScopeApi`] is the seam between the negotiator and HTTP. [`ScopeClient`]
//! is the reqwest implementation; tests substitute their own.

pub mod client;

pub use client::ScopeClient;

use crate::error::ApiError;
use async_trait::async_trait;
use scope_core::parameters::ScopeParameters;
use serde::{Deserialize, Deserializer, Serialize};

/// `GET /health`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vram: Option<f64>,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        matches!(self.status.as_str(), "ok" | "healthy")
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

/// One STUN/TURN server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceServer {
    /// Accepts a single string or a list on the wire
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// `GET /api/v1/webrtc/ice-servers`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IceServersResponse {
    #[serde(rename = "iceServers", default)]
    pub ice_servers: Vec<IceServer>,
}

/// `POST /api/v1/webrtc/offer` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferRequest {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
    #[serde(
        rename = "initialParameters",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub initial_parameters: Option<ScopeParameters>,
}

/// `POST /api/v1/webrtc/offer` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferResponse {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// A trickled ICE candidate in browser `RTCIceCandidateInit` form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidateInit {
    pub fn new(candidate: impl Into<String>, sdp_mid: Option<&str>, sdp_mline_index: Option<u16>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: sdp_mid.map(str::to_string),
            sdp_mline_index,
        }
    }
}

/// `PATCH /api/v1/webrtc/offer/{sessionId}` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidatesRequest {
    pub candidates: Vec<IceCandidateInit>,
}

/// `GET /api/v1/pipeline/status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineStatus {
    pub fn is_loaded(&self) -> bool {
        self.status == "loaded"
    }
}

/// `POST /api/v1/pipeline/load` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineLoadRequest {
    pub pipeline_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_params: Option<serde_json::Value>,
}

/// Remote Scope API
#[async_trait]
pub trait ScopeApi: Send + Sync {
    async fn check_health(&self) -> Result<HealthResponse, ApiError>;

    /// Fails with [`ApiError::Empty`] when the server has no list to give
    async fn get_ice_servers(&self) -> Result<IceServersResponse, ApiError>;

    /// Fails with [`ApiError::Empty`] when the server returns no answer
    async fn create_webrtc_offer(&self, offer: &OfferRequest) -> Result<OfferResponse, ApiError>;

    async fn add_ice_candidates(
        &self,
        session_id: &str,
        candidates: &[IceCandidateInit],
    ) -> Result<(), ApiError>;

    async fn pipeline_status(&self) -> Result<PipelineStatus, ApiError>;

    async fn load_pipeline(&self, request: &PipelineLoadRequest) -> Result<(), ApiError>;
}
