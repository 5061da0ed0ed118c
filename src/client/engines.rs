//! Network-backed implementations of the playback and broadcast seams.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;

use super::broadcast::{BroadcastBackend, CaptureResource, PublishResource, StreamKey};
use super::player::{HlsSupport, PlaybackEngines, PlaybackResource};
use crate::error::{BroadcastError, PlaybackError};
use crate::media::capture::{CaptureRequest, CapturedTrack, LocalCapture};
use crate::media::hls::{HlsConfig, HlsEngine};
use crate::media::native::ExternalPlayer;
use crate::media::signaling;
use crate::media::sink::{MediaSink, MeterSink};
use crate::media::whep::WhepSession;
use crate::media::whip::WhipSession;
use crate::media::{PlayerEvent, SessionEvents, TransportEvent};

/// Opens WHEP sessions, the built-in HLS engine or an external player.
pub struct NetworkEngines {
    http: reqwest::Client,
    origin: Url,
    ice_servers: Vec<String>,
    hls_engine: bool,
    hls_config: HlsConfig,
    external_player: Option<String>,
    sink: Arc<MeterSink>,
}

impl NetworkEngines {
    pub fn new(
        http: reqwest::Client,
        origin: Url,
        ice_servers: Vec<String>,
        hls_engine: bool,
        external_player: Option<String>,
    ) -> Self {
        Self {
            http,
            origin,
            ice_servers,
            hls_engine,
            hls_config: HlsConfig::default(),
            external_player,
            sink: Arc::new(MeterSink::default()),
        }
    }

    /// Counters for whatever is currently flowing into the sink.
    pub fn meter(&self) -> Arc<MeterSink> {
        self.sink.clone()
    }
}

#[async_trait]
impl PlaybackEngines for NetworkEngines {
    async fn open_webrtc(
        &self,
        url: &str,
        events: SessionEvents<PlayerEvent>,
    ) -> Result<Box<dyn PlaybackResource>, PlaybackError> {
        let endpoint = signaling::resolve(&self.origin, url)
            .map_err(|e| PlaybackError::Negotiation(e.to_string()))?;
        self.sink.reset();
        let sink: Arc<dyn MediaSink> = self.sink.clone();
        let session = WhepSession::connect(&self.http, &endpoint, &self.ice_servers, sink, events)
            .await
            .map_err(PlaybackError::Negotiation)?;
        Ok(Box::new(session))
    }

    fn hls_support(&self) -> HlsSupport {
        if self.hls_engine {
            HlsSupport::Engine
        } else if self.external_player.is_some() {
            HlsSupport::Native
        } else {
            HlsSupport::Unsupported
        }
    }

    async fn open_hls(
        &self,
        url: &str,
        events: SessionEvents<PlayerEvent>,
    ) -> Result<Box<dyn PlaybackResource>, PlaybackError> {
        let manifest = signaling::resolve(&self.origin, url)
            .map_err(|e| PlaybackError::Fatal(e.to_string()))?;
        self.sink.reset();
        let sink: Arc<dyn MediaSink> = self.sink.clone();
        Ok(Box::new(HlsEngine::start(
            self.http.clone(),
            manifest,
            self.hls_config.clone(),
            sink,
            events,
        )))
    }

    async fn open_native(
        &self,
        url: &str,
        events: SessionEvents<PlayerEvent>,
    ) -> Result<Box<dyn PlaybackResource>, PlaybackError> {
        let program = self
            .external_player
            .as_deref()
            .ok_or(PlaybackError::Unsupported)?;
        let manifest = signaling::resolve(&self.origin, url)
            .map_err(|e| PlaybackError::Fatal(e.to_string()))?;
        let player = ExternalPlayer::spawn(program, &manifest, events).map_err(PlaybackError::Fatal)?;
        Ok(Box::new(player))
    }
}

#[async_trait]
impl PlaybackResource for WhepSession {
    async fn release(&mut self) {
        self.close().await;
    }
}

#[async_trait]
impl PlaybackResource for HlsEngine {
    async fn release(&mut self) {
        self.destroy();
    }
}

#[async_trait]
impl PlaybackResource for ExternalPlayer {
    async fn release(&mut self) {
        self.stop().await;
    }
}

/// Captures from local devices and publishes over WHIP to `{origin}/webrtc/{key}/whip`.
pub struct DeviceBroadcast {
    http: reqwest::Client,
    origin: Url,
    ice_servers: Vec<String>,
    request: CaptureRequest,
}

impl DeviceBroadcast {
    pub fn new(
        http: reqwest::Client,
        origin: Url,
        ice_servers: Vec<String>,
        request: CaptureRequest,
    ) -> Self {
        Self {
            http,
            origin,
            ice_servers,
            request,
        }
    }

    pub fn whip_endpoint(&self, key: &StreamKey) -> Result<Url, BroadcastError> {
        signaling::resolve(&self.origin, &format!("/webrtc/{}/whip", key))
            .map_err(|e| BroadcastError::Negotiation(e.to_string()))
    }
}

#[async_trait]
impl BroadcastBackend for DeviceBroadcast {
    async fn capture(&self) -> Result<Box<dyn CaptureResource>, BroadcastError> {
        let request = self.request.clone();
        // Device start-up blocks until the audio stream is running.
        let capture = tokio::task::spawn_blocking(move || LocalCapture::open(&request))
            .await
            .map_err(|e| BroadcastError::Capture(e.to_string()))?
            .map_err(BroadcastError::Capture)?;
        Ok(Box::new(capture))
    }

    async fn publish(
        &self,
        key: &StreamKey,
        tracks: Vec<CapturedTrack>,
        events: SessionEvents<TransportEvent>,
    ) -> Result<Box<dyn PublishResource>, BroadcastError> {
        let endpoint = self.whip_endpoint(key)?;
        let session = WhipSession::publish(&self.http, &endpoint, &self.ice_servers, tracks, events)
            .await
            .map_err(|e| BroadcastError::Negotiation(e.to_string()))?;
        Ok(Box::new(session))
    }
}

impl CaptureResource for LocalCapture {
    fn take_tracks(&mut self) -> Vec<CapturedTrack> {
        LocalCapture::take_tracks(self)
    }

    fn stop(&mut self) {
        LocalCapture::stop(self)
    }
}

#[async_trait]
impl PublishResource for WhipSession {
    async fn close(&mut self) {
        WhipSession::close(self).await;
    }
}
