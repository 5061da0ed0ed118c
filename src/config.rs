use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::state::StreamUrls;

/// Proxy service configuration. Only `MEDIAMTX_API` and `PORT` come from the environment.
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Base URL of the MediaMTX management API
    #[arg(long, env = "MEDIAMTX_API", default_value = "http://mediamtx:9997")]
    pub mediamtx_api: String,

    /// Port the API listens on
    #[arg(long, env = "PORT", default_value_t = 3001)]
    pub port: u16,

    /// Interface to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Path prefix the reverse proxy maps to the MediaMTX HLS server
    #[arg(long, default_value = "/hls")]
    pub hls_prefix: String,

    /// Public RTMP ingest base advertised to publishers
    #[arg(long, default_value = "rtmp://YOUR_SERVER_IP:1935")]
    pub rtmp_base: String,

    /// Path prefix for WHEP playback; when unset no WebRTC URLs are advertised
    #[arg(long)]
    pub webrtc_prefix: Option<String>,

    /// Timeout for each MediaMTX request, in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub upstream_timeout_ms: u64,
}

impl ServeArgs {
    pub fn stream_urls(&self) -> StreamUrls {
        StreamUrls {
            hls_prefix: self.hls_prefix.clone(),
            rtmp_base: self.rtmp_base.clone(),
            webrtc_prefix: self.webrtc_prefix.clone(),
        }
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }
}

/// Viewer (playback client) configuration.
#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// Site origin serving /api, /hls and /webrtc
    #[arg(long, default_value = "http://localhost:8080")]
    pub origin: String,

    /// Start watching this stream as soon as it is live
    #[arg(long)]
    pub stream: Option<String>,

    /// Seconds between stream list refreshes
    #[arg(long, default_value_t = 5)]
    pub poll_interval_secs: u64,

    /// Disable the built-in HLS engine
    #[arg(long)]
    pub no_hls_engine: bool,

    /// External player used for HLS when the built-in engine is disabled (e.g. mpv, ffplay)
    #[arg(long)]
    pub player: Option<String>,

    /// STUN/TURN server for WHEP sessions
    #[arg(long, default_value = "stun:stun.l.google.com:19302")]
    pub ice_server: Vec<String>,
}

/// Broadcast (WHIP publisher) configuration.
#[derive(Args, Debug, Clone)]
pub struct BroadcastArgs {
    /// Site origin whose /webrtc prefix routes to MediaMTX
    #[arg(long, default_value = "http://localhost:8080")]
    pub origin: String,

    /// Stream key; a random `web_` key is generated when omitted
    #[arg(long)]
    pub key: Option<String>,

    /// Input device name; the default input device is used when omitted
    #[arg(long)]
    pub audio_device: Option<String>,

    /// Do not capture audio
    #[arg(long)]
    pub no_audio: bool,

    /// VP8 IVF file looped as the video source
    #[arg(long)]
    pub video_file: Option<PathBuf>,

    /// STUN/TURN server for the publish session
    #[arg(long, default_value = "stun:stun.l.google.com:19302")]
    pub ice_server: Vec<String>,

    /// Go live immediately instead of waiting for `start`
    #[arg(long)]
    pub start: bool,
}

/// Publisher setup helper configuration.
#[derive(Args, Debug, Clone)]
pub struct SetupArgs {
    /// RTMP server URL shown to OBS users
    #[arg(long, default_value = "rtmp://localhost:1935/live")]
    pub rtmp_url: String,

    /// Use this stream key instead of generating one
    #[arg(long)]
    pub key: Option<String>,
}
