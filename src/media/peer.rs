use std::sync::Arc;
use tracing::debug;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine as WrtcMediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

/// Create a peer connection with the default codecs and interceptors registered.
pub async fn new_peer_connection(ice_servers: &[String]) -> Result<Arc<RTCPeerConnection>, String> {
    let mut media_engine = WrtcMediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| format!("Failed to register codecs: {}", e))?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .map_err(|e| format!("Failed to register interceptors: {}", e))?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let config = RTCConfiguration {
        ice_servers: if ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: ice_servers.to_vec(),
                ..Default::default()
            }]
        },
        ..Default::default()
    };

    let pc = api
        .new_peer_connection(config)
        .await
        .map_err(|e| format!("Failed to create peer connection: {}", e))?;

    Ok(Arc::new(pc))
}

/// Create an offer, apply it locally and wait for ICE gathering so the SDP
/// carries every candidate (WHIP/WHEP without trickle).
pub async fn gathered_offer(pc: &RTCPeerConnection) -> Result<String, String> {
    let offer = pc
        .create_offer(None)
        .await
        .map_err(|e| format!("Failed to create offer: {}", e))?;

    let mut gathering_done = pc.gathering_complete_promise().await;

    pc.set_local_description(offer)
        .await
        .map_err(|e| format!("Failed to set local description: {}", e))?;

    let _ = gathering_done.recv().await;
    debug!("ICE gathering complete");

    pc.local_description()
        .await
        .map(|desc| desc.sdp)
        .ok_or_else(|| "No local description".to_string())
}

/// Apply the server's SDP answer as the remote description.
pub async fn apply_answer(pc: &RTCPeerConnection, sdp: String) -> Result<(), String> {
    let answer = RTCSessionDescription::answer(sdp)
        .map_err(|e| format!("Malformed SDP answer: {}", e))?;

    pc.set_remote_description(answer)
        .await
        .map_err(|e| format!("Failed to set remote description: {}", e))
}
