use std::time::Duration;
use tracing::debug;

use crate::error::UpstreamError;
use crate::models::PathList;

/// Client for the MediaMTX management API.
#[derive(Clone)]
pub struct MediaMtxClient {
    http: reqwest::Client,
    api_base: String,
}

impl MediaMtxClient {
    pub fn new(api_base: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Fetch every configured path, ready or not. Exactly one HTTP request per call.
    pub async fn list_paths(&self) -> Result<PathList, UpstreamError> {
        let url = format!("{}/v3/paths/list", self.api_base);
        debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| UpstreamError::Request { url, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status { status });
        }

        response.json::<PathList>().await.map_err(UpstreamError::Decode)
    }
}
