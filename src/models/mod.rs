use serde::{Deserialize, Serialize};

// ============================================================
// Proxy API models
// ============================================================

/// A currently live stream as exposed by `GET /api/streams`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSummary {
    pub name: String,
    pub hls_url: String,
    pub rtmp_ingest_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webrtc_url: Option<String>,
    #[serde(default)]
    pub ready_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamsResponse {
    #[serde(default)]
    pub streams: Vec<StreamSummary>,
}

/// Body of the 503 returned when MediaMTX cannot be reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnavailableResponse {
    pub error: String,
    pub streams: Vec<StreamSummary>,
}

impl UnavailableResponse {
    pub fn media_server() -> Self {
        Self {
            error: "Media server unavailable".to_string(),
            streams: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

// ============================================================
// MediaMTX management API models
// ============================================================

/// Response of MediaMTX `GET /v3/paths/list`. Only the fields we read are modelled.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathList {
    #[serde(default)]
    pub items: Vec<PathItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathItem {
    pub name: String,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub ready_time: Option<String>,
}
