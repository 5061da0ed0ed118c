//! WHEP playback: receive-only WebRTC session against the media server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reqwest::Url;
use tracing::{debug, info, warn};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

use super::sink::MediaSink;
use super::{peer, signaling, MediaKind, PlayerEvent, SessionEvents};

pub struct WhepSession {
    pc: Arc<RTCPeerConnection>,
    http: reqwest::Client,
    session_url: Option<Url>,
    closed: bool,
}

impl WhepSession {
    /// Negotiate a recv-only video+audio session. On any error the peer
    /// connection is closed before returning.
    pub async fn connect(
        http: &reqwest::Client,
        endpoint: &Url,
        ice_servers: &[String],
        sink: Arc<dyn MediaSink>,
        events: SessionEvents<PlayerEvent>,
    ) -> Result<Self, String> {
        let pc = peer::new_peer_connection(ice_servers).await?;

        match Self::negotiate(&pc, http, endpoint, sink, events).await {
            Ok(session_url) => {
                info!("WHEP session established with {}", endpoint);
                Ok(Self {
                    pc,
                    http: http.clone(),
                    session_url,
                    closed: false,
                })
            }
            Err(e) => {
                if let Err(close_err) = pc.close().await {
                    debug!("Error closing failed WHEP connection: {}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn negotiate(
        pc: &Arc<RTCPeerConnection>,
        http: &reqwest::Client,
        endpoint: &Url,
        sink: Arc<dyn MediaSink>,
        events: SessionEvents<PlayerEvent>,
    ) -> Result<Option<Url>, String> {
        for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
            pc.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| format!("Failed to add {} transceiver: {}", kind, e))?;
        }

        // Remote tracks: first one marks the session as playing.
        let started = Arc::new(AtomicBool::new(false));
        let events_track = events.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = events_track.clone();
            let started = started.clone();
            let sink = sink.clone();
            Box::pin(async move {
                let kind = MediaKind::from(track.kind());
                info!("Receiving remote {:?} track", kind);
                if !started.swap(true, Ordering::SeqCst) {
                    events.emit(PlayerEvent::MediaStarted);
                }
                tokio::spawn(async move {
                    while let Ok((packet, _)) = track.read_rtp().await {
                        sink.on_rtp(kind, &packet.payload);
                    }
                    debug!("Remote {:?} track ended", kind);
                });
            })
        }));

        let events_state = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events = events_state.clone();
            Box::pin(async move {
                debug!("WHEP connection state: {}", state);
                if state == RTCPeerConnectionState::Failed {
                    events.emit(PlayerEvent::ConnectionFailed(
                        "WebRTC Connection Failed".to_string(),
                    ));
                }
            })
        }));

        let offer = peer::gathered_offer(pc).await?;
        let answer = signaling::post_offer(http, endpoint, &offer)
            .await
            .map_err(|e| format!("WHEP request failed: {}", e))?;
        peer::apply_answer(pc, answer.sdp).await?;

        Ok(answer.session_url)
    }

    /// Close the peer connection and release the server-side session. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.pc.close().await {
            warn!("Error closing WHEP connection: {}", e);
        }
        if let Some(url) = self.session_url.take() {
            signaling::delete_session(&self.http, &url).await;
        }
        info!("WHEP session closed");
    }
}
