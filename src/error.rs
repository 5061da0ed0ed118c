use thiserror::Error;

/// Failure talking to the MediaMTX management API.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("MediaMTX returned {status}")]
    Status { status: reqwest::StatusCode },

    #[error("failed to decode MediaMTX response: {0}")]
    Decode(#[source] reqwest::Error),
}

/// Failure of a WHIP/WHEP offer/answer exchange.
#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("invalid endpoint URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("{0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {}", .0.as_u16())]
    Status(reqwest::StatusCode),

    #[error("empty SDP answer")]
    EmptyAnswer,
}

/// Failure of a WHIP publish attempt. Signaling errors are worded for the user.
#[derive(Error, Debug)]
pub enum WhipError {
    #[error("{0}")]
    Setup(String),

    #[error("Failed to publish stream: {0}")]
    Signaling(#[from] SignalingError),
}

/// Playback-side failures. `Negotiation` is handled by falling back to HLS.
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("WebRTC negotiation failed: {0}")]
    Negotiation(String),

    #[error("No playback source available.")]
    NoSource,

    #[error("Playback is not supported on this runtime.")]
    Unsupported,

    #[error("{0}")]
    Fatal(String),
}

/// Broadcast-side failures.
#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("invalid stream key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("stream key cannot change while broadcasting")]
    KeyLocked,

    #[error("a broadcast is already in progress")]
    AlreadyActive,

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("{0}")]
    Negotiation(String),
}
