//! HTTP offer/answer exchange shared by WHIP (publish) and WHEP (playback).

use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::Url;
use tracing::debug;

use crate::error::SignalingError;

pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// The server's answer plus the session resource it created, if any.
#[derive(Debug, Clone)]
pub struct SdpAnswer {
    pub sdp: String,
    pub session_url: Option<Url>,
}

/// Resolve a possibly relative URL (`/hls/...`, `/webrtc/...`) against the site origin.
pub fn resolve(origin: &Url, target: &str) -> Result<Url, SignalingError> {
    origin.join(target).map_err(|e| SignalingError::InvalidUrl {
        url: target.to_string(),
        reason: e.to_string(),
    })
}

/// POST an SDP offer and return the SDP answer body.
pub async fn post_offer(
    http: &reqwest::Client,
    endpoint: &Url,
    offer_sdp: &str,
) -> Result<SdpAnswer, SignalingError> {
    debug!("POST offer to {}", endpoint);

    let response = http
        .post(endpoint.clone())
        .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
        .body(offer_sdp.to_owned())
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(SignalingError::Status(status));
    }

    let session_url = response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|location| endpoint.join(location).ok());

    let sdp = response.text().await?;
    if sdp.trim().is_empty() {
        return Err(SignalingError::EmptyAnswer);
    }

    Ok(SdpAnswer { sdp, session_url })
}

/// Best-effort DELETE of the session resource.
pub async fn delete_session(http: &reqwest::Client, session_url: &Url) {
    match http.delete(session_url.clone()).send().await {
        Ok(resp) => debug!("DELETE {} -> {}", session_url, resp.status()),
        Err(e) => debug!("DELETE {} failed: {}", session_url, e),
    }
}
