use std::sync::Arc;

use crate::mediamtx::MediaMtxClient;

/// How viewer-facing URLs are derived from a MediaMTX path name.
#[derive(Debug, Clone)]
pub struct StreamUrls {
    /// Prefix the reverse proxy routes to the MediaMTX HLS muxer, e.g. `/hls`.
    pub hls_prefix: String,
    /// Public RTMP ingest base, e.g. `rtmp://example.com:1935`.
    pub rtmp_base: String,
    /// Prefix for WHEP playback. `None` means WebRTC URLs are not advertised.
    pub webrtc_prefix: Option<String>,
}

impl Default for StreamUrls {
    fn default() -> Self {
        Self {
            hls_prefix: "/hls".to_string(),
            rtmp_base: "rtmp://YOUR_SERVER_IP:1935".to_string(),
            webrtc_prefix: None,
        }
    }
}

impl StreamUrls {
    pub fn hls_url(&self, name: &str) -> String {
        format!("{}/{}/index.m3u8", self.hls_prefix.trim_end_matches('/'), name)
    }

    pub fn rtmp_ingest_url(&self, name: &str) -> String {
        format!("{}/{}", self.rtmp_base.trim_end_matches('/'), name)
    }

    pub fn webrtc_url(&self, name: &str) -> Option<String> {
        self.webrtc_prefix
            .as_deref()
            .map(|prefix| format!("{}/{}/whep", prefix.trim_end_matches('/'), name))
    }
}

/// Immutable context shared by all proxy request handlers.
#[derive(Clone)]
pub struct AppState {
    pub mediamtx: MediaMtxClient,
    pub urls: Arc<StreamUrls>,
}

impl AppState {
    pub fn new(mediamtx: MediaMtxClient, urls: StreamUrls) -> Self {
        Self {
            mediamtx,
            urls: Arc::new(urls),
        }
    }
}
