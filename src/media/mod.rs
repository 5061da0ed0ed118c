pub mod audio;
pub mod capture;
pub mod codec;
pub mod hls;
pub mod native;
pub mod peer;
pub mod signaling;
pub mod sink;
pub mod whep;
pub mod whip;

use tokio::sync::mpsc;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl From<RTPCodecType> for MediaKind {
    fn from(kind: RTPCodecType) -> Self {
        match kind {
            RTPCodecType::Audio => MediaKind::Audio,
            _ => MediaKind::Video,
        }
    }
}

/// Events a playback resource reports back to the player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    /// First media arrived (WebRTC track) or the manifest was parsed (HLS).
    MediaStarted,
    /// The WebRTC transport reported `failed`.
    ConnectionFailed(String),
    /// Unrecoverable engine error.
    Fatal(String),
    /// The source ended normally (VOD end of list, external player closed).
    Ended,
}

/// Transport state changes of a WHIP publish session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Failed,
    Closed,
}

/// An event stamped with the session that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tagged<E> {
    pub session: u64,
    pub event: E,
}

/// Sender handed to a media resource; every event it emits carries the session number.
/// Receivers drop events whose session is no longer current.
#[derive(Debug)]
pub struct SessionEvents<E> {
    session: u64,
    tx: mpsc::UnboundedSender<Tagged<E>>,
}

impl<E> Clone for SessionEvents<E> {
    fn clone(&self) -> Self {
        Self {
            session: self.session,
            tx: self.tx.clone(),
        }
    }
}

impl<E> SessionEvents<E> {
    pub fn new(session: u64, tx: mpsc::UnboundedSender<Tagged<E>>) -> Self {
        Self { session, tx }
    }

    pub fn emit(&self, event: E) {
        // Receiver gone means the owner was dropped; nothing left to notify.
        let _ = self.tx.send(Tagged {
            session: self.session,
            event,
        });
    }
}
