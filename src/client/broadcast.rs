//! Broadcast session: capture, WHIP negotiation and the live/stopped lifecycle.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::BroadcastError;
use crate::media::capture::CapturedTrack;
use crate::media::{SessionEvents, Tagged, TransportEvent};

pub const ICE_FAILURE_MESSAGE: &str = "Connection failed. This is often an ICE/STUN issue.";

const MAX_KEY_LEN: usize = 128;
const KEY_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A stream key: the path name viewers see, safe to embed in a URL path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamKey(String);

impl StreamKey {
    pub fn parse(key: &str) -> Result<Self, BroadcastError> {
        let invalid = |reason| BroadcastError::InvalidKey {
            key: key.to_string(),
            reason,
        };
        if key.is_empty() {
            return Err(invalid("key is empty"));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(invalid("key is longer than 128 characters"));
        }
        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '~'))
        {
            return Err(invalid("only letters, digits and _ - . ~ are allowed"));
        }
        Ok(Self(key.to_string()))
    }

    /// `web_` plus six random characters, the default for browser-style broadcasts.
    pub fn generate_web() -> Self {
        Self(format!("web_{}", random_suffix(6)))
    }

    /// `user_` plus eight random characters, handed out to OBS publishers.
    pub fn generate_user() -> Self {
        Self(format!("user_{}", random_suffix(8)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn random_suffix(len: usize) -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| KEY_ALPHABET[rng.gen_range(0..KEY_ALPHABET.len())] as char)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastState {
    Idle,
    Capturing,
    Negotiating,
    Live,
    Stopped,
    Failed(String),
}

/// Running local capture.
pub trait CaptureResource: Send {
    fn take_tracks(&mut self) -> Vec<CapturedTrack>;
    /// Stop every source. Safe to call more than once; dropping must stop too.
    fn stop(&mut self);
}

/// An established publish transport.
#[async_trait]
pub trait PublishResource: Send {
    /// Close the transport. Safe to call more than once.
    async fn close(&mut self);
}

#[async_trait]
pub trait BroadcastBackend: Send + Sync {
    async fn capture(&self) -> Result<Box<dyn CaptureResource>, BroadcastError>;

    async fn publish(
        &self,
        key: &StreamKey,
        tracks: Vec<CapturedTrack>,
        events: SessionEvents<TransportEvent>,
    ) -> Result<Box<dyn PublishResource>, BroadcastError>;
}

enum SetupStep {
    Negotiating,
    Published {
        capture: Box<dyn CaptureResource>,
        transport: Box<dyn PublishResource>,
    },
    Failed(BroadcastError),
}

/// Progress of the spawned capture and publish task.
pub struct Setup {
    session: u64,
    step: SetupStep,
}

pub enum BroadcastUpdate {
    Transport(Tagged<TransportEvent>),
    Setup(Setup),
}

pub struct Broadcaster {
    backend: Arc<dyn BroadcastBackend>,
    key: StreamKey,
    state: BroadcastState,
    session: u64,
    starting: Option<JoinHandle<()>>,
    capture: Option<Box<dyn CaptureResource>>,
    transport: Option<Box<dyn PublishResource>>,
    events_tx: mpsc::UnboundedSender<Tagged<TransportEvent>>,
    events_rx: mpsc::UnboundedReceiver<Tagged<TransportEvent>>,
    setup_tx: mpsc::UnboundedSender<Setup>,
    setup_rx: mpsc::UnboundedReceiver<Setup>,
}

impl Broadcaster {
    pub fn new(backend: Arc<dyn BroadcastBackend>, key: StreamKey) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (setup_tx, setup_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            key,
            state: BroadcastState::Idle,
            session: 0,
            starting: None,
            capture: None,
            transport: None,
            events_tx,
            events_rx,
            setup_tx,
            setup_rx,
        }
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn state(&self) -> &BroadcastState {
        &self.state
    }

    /// True from `start` until the session is stopped or fails.
    pub fn is_active(&self) -> bool {
        self.starting.is_some() || self.capture.is_some() || self.transport.is_some()
    }

    pub fn set_key(&mut self, key: &str) -> Result<(), BroadcastError> {
        if self.is_active() {
            return Err(BroadcastError::KeyLocked);
        }
        self.key = StreamKey::parse(key)?;
        Ok(())
    }

    /// Begin capturing and publishing under the current key. Returns at once;
    /// progress and failures arrive through `next_update`.
    pub fn start(&mut self) -> Result<(), BroadcastError> {
        if self.is_active() {
            return Err(BroadcastError::AlreadyActive);
        }

        self.state = BroadcastState::Capturing;
        self.session += 1;
        let session = self.session;
        let events = SessionEvents::new(session, self.events_tx.clone());
        let backend = self.backend.clone();
        let key = self.key.clone();
        let setup_tx = self.setup_tx.clone();

        self.starting = Some(tokio::spawn(async move {
            let send = |step: SetupStep| {
                let _ = setup_tx.send(Setup { session, step });
            };
            let mut capture = match backend.capture().await {
                Ok(capture) => capture,
                Err(e) => return send(SetupStep::Failed(e)),
            };
            send(SetupStep::Negotiating);

            let tracks = capture.take_tracks();
            match backend.publish(&key, tracks, events).await {
                Ok(transport) => send(SetupStep::Published { capture, transport }),
                Err(e) => {
                    capture.stop();
                    send(SetupStep::Failed(e));
                }
            }
        }));
        Ok(())
    }

    /// Cancel any setup in flight, close the transport and stop capture.
    /// Safe with no active session.
    pub async fn stop(&mut self) {
        if !self.is_active() {
            return;
        }
        self.release().await;
        self.state = BroadcastState::Stopped;
        info!("Broadcast stopped");
    }

    pub async fn next_update(&mut self) -> Option<BroadcastUpdate> {
        tokio::select! {
            Some(setup) = self.setup_rx.recv() => Some(BroadcastUpdate::Setup(setup)),
            Some(tagged) = self.events_rx.recv() => Some(BroadcastUpdate::Transport(tagged)),
            else => None,
        }
    }

    /// Apply an update. Returns false when it belonged to a released session.
    pub async fn handle(&mut self, update: BroadcastUpdate) -> bool {
        match update {
            BroadcastUpdate::Setup(setup) => self.handle_setup(setup).await,
            BroadcastUpdate::Transport(tagged) => self.handle_transport(tagged).await,
        }
    }

    async fn handle_setup(&mut self, setup: Setup) -> bool {
        if setup.session != self.session {
            if let SetupStep::Published {
                mut capture,
                mut transport,
            } = setup.step
            {
                transport.close().await;
                capture.stop();
            }
            return false;
        }

        match setup.step {
            SetupStep::Negotiating => {
                if self.state == BroadcastState::Capturing {
                    self.state = BroadcastState::Negotiating;
                }
            }
            SetupStep::Published { capture, transport } => {
                self.starting = None;
                info!("Publishing as {}", self.key);
                self.capture = Some(capture);
                self.transport = Some(transport);
                // The transport may already have reported Connected.
                if self.state != BroadcastState::Live {
                    self.state = BroadcastState::Negotiating;
                }
            }
            SetupStep::Failed(e) => {
                self.starting = None;
                error!("Broadcast error: {}", e);
                self.release().await;
                self.state = BroadcastState::Failed(e.to_string());
            }
        }
        true
    }

    async fn handle_transport(&mut self, tagged: Tagged<TransportEvent>) -> bool {
        if tagged.session != self.session || !self.is_active() {
            return false;
        }
        match tagged.event {
            TransportEvent::Connected => self.state = BroadcastState::Live,
            TransportEvent::Failed => {
                warn!("Publish transport failed");
                self.release().await;
                self.state = BroadcastState::Failed(ICE_FAILURE_MESSAGE.to_string());
            }
            TransportEvent::Closed => {
                self.release().await;
                self.state = BroadcastState::Stopped;
            }
        }
        true
    }

    async fn release(&mut self) {
        if let Some(task) = self.starting.take() {
            task.abort();
        }
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        self.session += 1;
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        if let Some(task) = self.starting.take() {
            task.abort();
        }
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(mut transport) = self.transport.take() {
            // Closing is async; hand it to the runtime if one is still around.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { transport.close().await });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Counters {
        captures_open: AtomicUsize,
        transports_open: AtomicUsize,
        published_keys: Mutex<Vec<String>>,
    }

    struct FakeCapture(Arc<Counters>, bool);

    impl CaptureResource for FakeCapture {
        fn take_tracks(&mut self) -> Vec<CapturedTrack> {
            Vec::new()
        }

        fn stop(&mut self) {
            if !self.1 {
                self.1 = true;
                self.0.captures_open.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    impl Drop for FakeCapture {
        fn drop(&mut self) {
            self.stop();
        }
    }

    struct FakeTransport(Arc<Counters>, bool);

    #[async_trait]
    impl PublishResource for FakeTransport {
        async fn close(&mut self) {
            if !self.1 {
                self.1 = true;
                self.0.transports_open.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    struct FakeBackend {
        counters: Arc<Counters>,
        capture_error: Option<&'static str>,
        publish_status: Option<u16>,
        publish_hangs: bool,
        events: Mutex<Option<SessionEvents<TransportEvent>>>,
    }

    impl FakeBackend {
        fn new(capture_error: Option<&'static str>, publish_status: Option<u16>) -> Arc<Self> {
            Arc::new(Self {
                counters: Arc::new(Counters::default()),
                capture_error,
                publish_status,
                publish_hangs: false,
                events: Mutex::new(None),
            })
        }

        /// A WHIP endpoint that accepts the offer and never answers.
        fn silent() -> Arc<Self> {
            Arc::new(Self {
                counters: Arc::new(Counters::default()),
                capture_error: None,
                publish_status: None,
                publish_hangs: true,
                events: Mutex::new(None),
            })
        }

        fn emit(&self, event: TransportEvent) {
            self.events.lock().unwrap().as_ref().unwrap().emit(event);
        }
    }

    #[async_trait]
    impl BroadcastBackend for FakeBackend {
        async fn capture(&self) -> Result<Box<dyn CaptureResource>, BroadcastError> {
            if let Some(msg) = self.capture_error {
                return Err(BroadcastError::Capture(msg.to_string()));
            }
            self.counters.captures_open.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeCapture(self.counters.clone(), false)))
        }

        async fn publish(
            &self,
            key: &StreamKey,
            _tracks: Vec<CapturedTrack>,
            events: SessionEvents<TransportEvent>,
        ) -> Result<Box<dyn PublishResource>, BroadcastError> {
            if self.publish_hangs {
                return std::future::pending().await;
            }
            if let Some(status) = self.publish_status {
                return Err(BroadcastError::Negotiation(format!(
                    "Failed to publish stream: HTTP {}",
                    status
                )));
            }
            self.counters
                .published_keys
                .lock()
                .unwrap()
                .push(key.to_string());
            *self.events.lock().unwrap() = Some(events);
            self.counters.transports_open.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeTransport(self.counters.clone(), false)))
        }
    }

    fn key(k: &str) -> StreamKey {
        StreamKey::parse(k).unwrap()
    }

    async fn deliver(b: &mut Broadcaster) -> bool {
        let update = tokio::time::timeout(Duration::from_secs(5), b.next_update())
            .await
            .expect("timed out waiting for broadcast update")
            .unwrap();
        b.handle(update).await
    }

    /// Start and handle the negotiating and published steps.
    async fn start_published(b: &mut Broadcaster) {
        b.start().unwrap();
        assert!(deliver(b).await);
        assert!(deliver(b).await);
    }

    #[test]
    fn key_validation() {
        assert!(StreamKey::parse("my-stream_01.a~b").is_ok());
        assert!(StreamKey::parse("").is_err());
        assert!(StreamKey::parse("has space").is_err());
        assert!(StreamKey::parse("a/b").is_err());
        assert!(StreamKey::parse(&"x".repeat(129)).is_err());
        assert!(StreamKey::parse(&"x".repeat(128)).is_ok());
    }

    #[test]
    fn generated_keys_have_expected_shape() {
        let web = StreamKey::generate_web();
        assert!(web.as_str().starts_with("web_"));
        assert_eq!(web.as_str().len(), 10);

        let user = StreamKey::generate_user();
        assert!(user.as_str().starts_with("user_"));
        assert_eq!(user.as_str().len(), 13);
        assert!(StreamKey::parse(user.as_str()).is_ok());
    }

    #[tokio::test]
    async fn goes_live_when_transport_connects() {
        let backend = FakeBackend::new(None, None);
        let mut b = Broadcaster::new(backend.clone(), key("cam1"));

        b.start().unwrap();
        assert_eq!(b.state(), &BroadcastState::Capturing);
        assert!(deliver(&mut b).await);
        assert_eq!(b.state(), &BroadcastState::Negotiating);
        assert!(deliver(&mut b).await);
        assert_eq!(b.state(), &BroadcastState::Negotiating);

        backend.emit(TransportEvent::Connected);
        assert!(deliver(&mut b).await);
        assert_eq!(b.state(), &BroadcastState::Live);
        assert_eq!(
            *backend.counters.published_keys.lock().unwrap(),
            vec!["cam1".to_string()]
        );
    }

    #[tokio::test]
    async fn key_is_locked_while_broadcasting() {
        let backend = FakeBackend::new(None, None);
        let mut b = Broadcaster::new(backend, key("cam1"));

        b.start().unwrap();
        assert!(matches!(b.set_key("other"), Err(BroadcastError::KeyLocked)));
        assert!(matches!(b.start(), Err(BroadcastError::AlreadyActive)));

        b.stop().await;
        b.set_key("other").unwrap();
        assert_eq!(b.key().as_str(), "other");
    }

    #[tokio::test]
    async fn capture_failure_stops_before_negotiation() {
        let backend = FakeBackend::new(Some("permission denied"), None);
        let mut b = Broadcaster::new(backend.clone(), key("cam1"));

        b.start().unwrap();
        assert!(deliver(&mut b).await);
        assert_eq!(
            b.state(),
            &BroadcastState::Failed("capture failed: permission denied".into())
        );
        assert!(backend.counters.published_keys.lock().unwrap().is_empty());
        assert!(!b.is_active());
    }

    #[tokio::test]
    async fn publish_rejection_releases_capture() {
        let backend = FakeBackend::new(None, Some(400));
        let mut b = Broadcaster::new(backend.clone(), key("cam1"));

        start_published(&mut b).await;
        assert_eq!(
            b.state(),
            &BroadcastState::Failed("Failed to publish stream: HTTP 400".into())
        );
        assert_eq!(backend.counters.captures_open.load(Ordering::SeqCst), 0);
        assert!(!b.is_active());
    }

    #[tokio::test]
    async fn transport_failure_reports_ice_hint_and_cleans_up() {
        let backend = FakeBackend::new(None, None);
        let mut b = Broadcaster::new(backend.clone(), key("cam1"));

        start_published(&mut b).await;
        backend.emit(TransportEvent::Failed);
        assert!(deliver(&mut b).await);

        assert_eq!(b.state(), &BroadcastState::Failed(ICE_FAILURE_MESSAGE.into()));
        assert_eq!(backend.counters.captures_open.load(Ordering::SeqCst), 0);
        assert_eq!(backend.counters.transports_open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_ignores_late_events() {
        let backend = FakeBackend::new(None, None);
        let mut b = Broadcaster::new(backend.clone(), key("cam1"));

        b.stop().await;
        assert_eq!(b.state(), &BroadcastState::Idle);

        start_published(&mut b).await;
        b.stop().await;
        b.stop().await;
        assert_eq!(b.state(), &BroadcastState::Stopped);

        backend.emit(TransportEvent::Closed);
        assert!(!deliver(&mut b).await);
        assert_eq!(backend.counters.transports_open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn silent_whip_endpoint_does_not_block_stop() {
        let backend = FakeBackend::silent();
        let mut b = Broadcaster::new(backend.clone(), key("cam1"));

        b.start().unwrap();
        assert!(deliver(&mut b).await);
        assert_eq!(b.state(), &BroadcastState::Negotiating);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), b.next_update())
                .await
                .is_err()
        );

        tokio::time::timeout(Duration::from_secs(1), b.stop())
            .await
            .expect("stop must not wait for the answer");
        assert_eq!(b.state(), &BroadcastState::Stopped);
        assert!(!b.is_active());
        tokio::time::timeout(Duration::from_secs(1), async {
            while backend.counters.captures_open.load(Ordering::SeqCst) > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("capture held by the cancelled setup was not stopped");

        b.set_key("cam2").unwrap();
        b.start().unwrap();
        assert!(b.is_active());
    }

    #[tokio::test]
    async fn dropping_broadcaster_stops_capture() {
        let backend = FakeBackend::new(None, None);
        let mut b = Broadcaster::new(backend.clone(), key("cam1"));
        start_published(&mut b).await;

        drop(b);
        assert_eq!(backend.counters.captures_open.load(Ordering::SeqCst), 0);
    }
}
