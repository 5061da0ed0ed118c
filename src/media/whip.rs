//! WHIP publishing: send-only WebRTC session carrying the local capture.

use std::sync::Arc;

use reqwest::Url;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::capture::CapturedTrack;
use super::{peer, signaling, SessionEvents, TransportEvent};
use crate::error::WhipError;

pub struct WhipSession {
    pc: Arc<RTCPeerConnection>,
    http: reqwest::Client,
    session_url: Option<Url>,
    writers: Vec<JoinHandle<()>>,
    closed: bool,
}

impl WhipSession {
    /// Attach the captured tracks, POST the offer to `endpoint` and apply the answer.
    /// Transport state changes are reported through `events`.
    pub async fn publish(
        http: &reqwest::Client,
        endpoint: &Url,
        ice_servers: &[String],
        tracks: Vec<CapturedTrack>,
        events: SessionEvents<TransportEvent>,
    ) -> Result<Self, WhipError> {
        let pc = peer::new_peer_connection(ice_servers)
            .await
            .map_err(WhipError::Setup)?;

        let mut writers = Vec::new();
        let result = Self::negotiate(&pc, http, endpoint, tracks, events, &mut writers).await;

        match result {
            Ok(session_url) => {
                info!("WHIP publish negotiated with {}", endpoint);
                Ok(Self {
                    pc,
                    http: http.clone(),
                    session_url,
                    writers,
                    closed: false,
                })
            }
            Err(e) => {
                for writer in &writers {
                    writer.abort();
                }
                if let Err(close_err) = pc.close().await {
                    debug!("Error closing failed WHIP connection: {}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn negotiate(
        pc: &Arc<RTCPeerConnection>,
        http: &reqwest::Client,
        endpoint: &Url,
        tracks: Vec<CapturedTrack>,
        events: SessionEvents<TransportEvent>,
        writers: &mut Vec<JoinHandle<()>>,
    ) -> Result<Option<Url>, WhipError> {
        if tracks.is_empty() {
            return Err(WhipError::Setup("no captured tracks to publish".to_string()));
        }

        for captured in tracks {
            let kind = captured.kind;
            let track = Arc::new(TrackLocalStaticSample::new(
                captured.codec,
                format!("{:?}", kind).to_lowercase(),
                "streamflow".to_string(),
            ));

            let rtp_sender = pc
                .add_track(track.clone() as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| WhipError::Setup(format!("Failed to add {:?} track: {}", kind, e)))?;

            // Read incoming RTCP packets (needed by webrtc crate for proper operation)
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while rtp_sender.read(&mut buf).await.is_ok() {}
            });

            let mut samples = captured.samples;
            writers.push(tokio::spawn(async move {
                while let Some(sample) = samples.recv().await {
                    if let Err(e) = track.write_sample(&sample).await {
                        debug!("Failed to write {:?} sample: {}", kind, e);
                    }
                }
            }));
        }

        for transceiver in pc.get_transceivers().await {
            transceiver
                .set_direction(RTCRtpTransceiverDirection::Sendonly)
                .await;
        }

        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events = events.clone();
            Box::pin(async move {
                info!("WebRTC Connection State: {}", state);
                match state {
                    RTCPeerConnectionState::Connected => events.emit(TransportEvent::Connected),
                    RTCPeerConnectionState::Failed => events.emit(TransportEvent::Failed),
                    RTCPeerConnectionState::Closed => events.emit(TransportEvent::Closed),
                    _ => {}
                }
            })
        }));

        let offer = peer::gathered_offer(pc).await.map_err(WhipError::Setup)?;
        let answer = signaling::post_offer(http, endpoint, &offer).await?;
        debug!("Received answer SDP ({} bytes)", answer.sdp.len());
        peer::apply_answer(pc, answer.sdp)
            .await
            .map_err(WhipError::Setup)?;

        Ok(answer.session_url)
    }

    /// Stop the sample writers, close the transport and release the server session. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for writer in self.writers.drain(..) {
            writer.abort();
        }
        if let Err(e) = self.pc.close().await {
            warn!("Error closing WHIP connection: {}", e);
        }
        if let Some(url) = self.session_url.take() {
            signaling::delete_session(&self.http, &url).await;
        }
        info!("WHIP session closed");
    }
}
