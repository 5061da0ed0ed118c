//! Playback state machine: WebRTC first, HLS as fallback, one live resource at a time.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::PlaybackError;
use crate::media::{PlayerEvent, SessionEvents, Tagged};
use crate::models::StreamSummary;

pub const STREAM_ERROR_MESSAGE: &str = "Stream error — the source may have disconnected.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMethod {
    WebRtc,
    Hls,
    NativeHls,
}

impl PlaybackMethod {
    pub fn label(&self) -> &'static str {
        match self {
            PlaybackMethod::WebRtc => "WebRTC (Ultra-low latency)",
            PlaybackMethod::Hls => "HLS (Standard latency)",
            PlaybackMethod::NativeHls => "HLS (external player)",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Connecting(PlaybackMethod),
    Live(PlaybackMethod),
    Ended,
    Error(String),
}

/// Which HLS path this runtime can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HlsSupport {
    /// Built-in live playlist engine.
    Engine,
    /// Hand the URL to an external player.
    Native,
    Unsupported,
}

/// An open playback session (WHEP peer connection, HLS engine, player process).
#[async_trait]
pub trait PlaybackResource: Send {
    /// Release every underlying resource. Must be safe to call more than once.
    async fn release(&mut self);
}

/// Factory for playback resources. URLs are passed as the proxy reported them.
#[async_trait]
pub trait PlaybackEngines: Send + Sync {
    async fn open_webrtc(
        &self,
        url: &str,
        events: SessionEvents<PlayerEvent>,
    ) -> Result<Box<dyn PlaybackResource>, PlaybackError>;

    fn hls_support(&self) -> HlsSupport;

    async fn open_hls(
        &self,
        url: &str,
        events: SessionEvents<PlayerEvent>,
    ) -> Result<Box<dyn PlaybackResource>, PlaybackError>;

    async fn open_native(
        &self,
        url: &str,
        events: SessionEvents<PlayerEvent>,
    ) -> Result<Box<dyn PlaybackResource>, PlaybackError>;
}

/// Result of an open attempt, delivered once the spawned negotiation finishes.
pub struct Opened {
    session: u64,
    method: PlaybackMethod,
    result: Result<Box<dyn PlaybackResource>, PlaybackError>,
}

/// Everything the player reacts to: resource events and finished open attempts.
pub enum PlayerUpdate {
    Event(Tagged<PlayerEvent>),
    Opened(Opened),
}

pub struct Player {
    engines: Arc<dyn PlaybackEngines>,
    session: u64,
    current: Option<Box<dyn PlaybackResource>>,
    opening: Option<JoinHandle<()>>,
    stream: Option<StreamSummary>,
    state: PlaybackState,
    events_tx: mpsc::UnboundedSender<Tagged<PlayerEvent>>,
    events_rx: mpsc::UnboundedReceiver<Tagged<PlayerEvent>>,
    opened_tx: mpsc::UnboundedSender<Opened>,
    opened_rx: mpsc::UnboundedReceiver<Opened>,
}

impl Player {
    pub fn new(engines: Arc<dyn PlaybackEngines>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        Self {
            engines,
            session: 0,
            current: None,
            opening: None,
            stream: None,
            state: PlaybackState::Idle,
            events_tx,
            events_rx,
            opened_tx,
            opened_rx,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn stream(&self) -> Option<&StreamSummary> {
        self.stream.as_ref()
    }

    pub fn has_resource(&self) -> bool {
        self.current.is_some()
    }

    /// Tear down whatever is playing, then start negotiating `stream`.
    /// Returns immediately; the outcome arrives through `next_update`.
    pub async fn play(&mut self, stream: StreamSummary) {
        self.release().await;
        info!("Opening stream {}", stream.name);
        let webrtc_url = stream.webrtc_url.clone();
        self.stream = Some(stream);

        match webrtc_url {
            Some(url) => self.open(PlaybackMethod::WebRtc, url),
            None => self.start_hls(),
        }
    }

    /// Release the current session, cancelling any negotiation in flight,
    /// and return to idle. Safe with nothing playing.
    pub async fn stop(&mut self) {
        self.release().await;
        self.stream = None;
        self.state = PlaybackState::Idle;
    }

    /// Wait for the next update from any session. Pass the result to `handle`.
    pub async fn next_update(&mut self) -> Option<PlayerUpdate> {
        tokio::select! {
            Some(opened) = self.opened_rx.recv() => Some(PlayerUpdate::Opened(opened)),
            Some(tagged) = self.events_rx.recv() => Some(PlayerUpdate::Event(tagged)),
            else => None,
        }
    }

    /// Apply an update. Returns false when it belonged to a torn-down session.
    pub async fn handle(&mut self, update: PlayerUpdate) -> bool {
        match update {
            PlayerUpdate::Opened(opened) => self.handle_opened(opened).await,
            PlayerUpdate::Event(tagged) => self.handle_event(tagged).await,
        }
    }

    async fn handle_opened(&mut self, opened: Opened) -> bool {
        if opened.session != self.session {
            // Lost the race with a teardown: the resource is already orphaned.
            if let Ok(mut resource) = opened.result {
                resource.release().await;
            }
            return false;
        }
        self.opening = None;

        match opened.result {
            Ok(resource) => self.current = Some(resource),
            Err(e) if opened.method == PlaybackMethod::WebRtc => {
                warn!("WebRTC failed, falling back to HLS: {}", e);
                self.release().await;
                self.start_hls();
            }
            Err(e) => {
                error!("HLS playback failed to start: {}", e);
                self.release().await;
                self.state = PlaybackState::Error(STREAM_ERROR_MESSAGE.to_string());
            }
        }
        true
    }

    async fn handle_event(&mut self, tagged: Tagged<PlayerEvent>) -> bool {
        // Events can overtake the open result, so only the session number decides.
        if tagged.session != self.session || self.method().is_none() {
            return false;
        }

        match tagged.event {
            PlayerEvent::MediaStarted => {
                if let PlaybackState::Connecting(method) = self.state {
                    info!("Playing via {}", method.label());
                    self.state = PlaybackState::Live(method);
                }
            }
            PlayerEvent::ConnectionFailed(reason)
                if self.method() == Some(PlaybackMethod::WebRtc) =>
            {
                warn!("{}, falling back to HLS", reason);
                self.release().await;
                self.start_hls();
            }
            PlayerEvent::ConnectionFailed(reason) | PlayerEvent::Fatal(reason) => {
                error!("Playback error: {}", reason);
                self.release().await;
                self.state = PlaybackState::Error(STREAM_ERROR_MESSAGE.to_string());
            }
            PlayerEvent::Ended => {
                info!("Stream ended");
                self.release().await;
                self.state = PlaybackState::Ended;
            }
        }
        true
    }

    fn method(&self) -> Option<PlaybackMethod> {
        match self.state {
            PlaybackState::Connecting(m) | PlaybackState::Live(m) => Some(m),
            _ => None,
        }
    }

    async fn release(&mut self) {
        if let Some(task) = self.opening.take() {
            task.abort();
        }
        if let Some(mut resource) = self.current.take() {
            resource.release().await;
        }
        // Anything still in flight from the old session is now stale.
        self.session += 1;
    }

    /// Spawn the open call so a hung negotiation never blocks the caller.
    fn open(&mut self, method: PlaybackMethod, url: String) {
        self.state = PlaybackState::Connecting(method);
        self.session += 1;
        let session = self.session;
        let events = SessionEvents::new(session, self.events_tx.clone());
        let engines = self.engines.clone();
        let opened_tx = self.opened_tx.clone();

        self.opening = Some(tokio::spawn(async move {
            let result = match method {
                PlaybackMethod::WebRtc => engines.open_webrtc(&url, events).await,
                PlaybackMethod::Hls => engines.open_hls(&url, events).await,
                PlaybackMethod::NativeHls => engines.open_native(&url, events).await,
            };
            let _ = opened_tx.send(Opened {
                session,
                method,
                result,
            });
        }));
    }

    fn start_hls(&mut self) {
        let url = match self.stream.as_ref().map(|s| s.hls_url.clone()) {
            Some(url) if !url.is_empty() => url,
            _ => {
                self.state = PlaybackState::Error(PlaybackError::NoSource.to_string());
                return;
            }
        };

        match self.engines.hls_support() {
            HlsSupport::Engine => self.open(PlaybackMethod::Hls, url),
            HlsSupport::Native => self.open(PlaybackMethod::NativeHls, url),
            HlsSupport::Unsupported => {
                self.state = PlaybackState::Error(PlaybackError::Unsupported.to_string());
            }
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if let Some(task) = self.opening.take() {
            task.abort();
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
        open: AtomicUsize,
        max_open: AtomicUsize,
        in_flight: AtomicUsize,
        opened: Mutex<Vec<&'static str>>,
    }

    struct FakeResource {
        counters: Arc<Counters>,
        released: bool,
    }

    #[async_trait]
    impl PlaybackResource for FakeResource {
        async fn release(&mut self) {
            if !self.released {
                self.released = true;
                self.counters.open.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    /// Counts a negotiation that is still running; dropped when it finishes or is aborted.
    struct InFlight(Arc<Counters>);

    impl InFlight {
        fn new(counters: &Arc<Counters>) -> Self {
            counters.in_flight.fetch_add(1, Ordering::SeqCst);
            Self(counters.clone())
        }
    }

    impl Drop for InFlight {
        fn drop(&mut self) {
            self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Whep {
        Answers,
        Fails,
        Hangs,
    }

    struct FakeEngines {
        counters: Arc<Counters>,
        whep: Whep,
        hls: HlsSupport,
        last_events: Mutex<Option<SessionEvents<PlayerEvent>>>,
    }

    impl FakeEngines {
        fn new(whep: Whep, hls: HlsSupport) -> Arc<Self> {
            Arc::new(Self {
                counters: Arc::new(Counters::default()),
                whep,
                hls,
                last_events: Mutex::new(None),
            })
        }

        fn open(
            &self,
            kind: &'static str,
            events: SessionEvents<PlayerEvent>,
        ) -> Box<dyn PlaybackResource> {
            let now = self.counters.open.fetch_add(1, Ordering::SeqCst) + 1;
            self.counters.max_open.fetch_max(now, Ordering::SeqCst);
            self.counters.opened.lock().unwrap().push(kind);
            *self.last_events.lock().unwrap() = Some(events);
            Box::new(FakeResource {
                counters: self.counters.clone(),
                released: false,
            })
        }

        fn emit(&self, event: PlayerEvent) {
            self.last_events.lock().unwrap().as_ref().unwrap().emit(event);
        }

        fn opened(&self) -> Vec<&'static str> {
            self.counters.opened.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PlaybackEngines for FakeEngines {
        async fn open_webrtc(
            &self,
            _url: &str,
            events: SessionEvents<PlayerEvent>,
        ) -> Result<Box<dyn PlaybackResource>, PlaybackError> {
            let _guard = InFlight::new(&self.counters);
            match self.whep {
                Whep::Answers => Ok(self.open("webrtc", events)),
                Whep::Fails => Err(PlaybackError::Negotiation("HTTP 500".into())),
                Whep::Hangs => std::future::pending().await,
            }
        }

        fn hls_support(&self) -> HlsSupport {
            self.hls
        }

        async fn open_hls(
            &self,
            _url: &str,
            events: SessionEvents<PlayerEvent>,
        ) -> Result<Box<dyn PlaybackResource>, PlaybackError> {
            Ok(self.open("hls", events))
        }

        async fn open_native(
            &self,
            _url: &str,
            events: SessionEvents<PlayerEvent>,
        ) -> Result<Box<dyn PlaybackResource>, PlaybackError> {
            Ok(self.open("native", events))
        }
    }

    fn stream(name: &str, webrtc: bool) -> StreamSummary {
        StreamSummary {
            name: name.to_string(),
            hls_url: format!("/hls/{}/index.m3u8", name),
            rtmp_ingest_url: format!("rtmp://host:1935/{}", name),
            webrtc_url: webrtc.then(|| format!("/webrtc/{}/whep", name)),
            ready_time: None,
        }
    }

    async fn deliver(player: &mut Player) -> bool {
        let update = tokio::time::timeout(Duration::from_secs(5), player.next_update())
            .await
            .expect("timed out waiting for player update")
            .unwrap();
        player.handle(update).await
    }

    #[tokio::test]
    async fn prefers_webrtc_when_advertised() {
        let engines = FakeEngines::new(Whep::Answers, HlsSupport::Engine);
        let mut player = Player::new(engines.clone());

        player.play(stream("cam", true)).await;
        assert_eq!(
            player.state(),
            &PlaybackState::Connecting(PlaybackMethod::WebRtc)
        );
        assert!(deliver(&mut player).await);
        assert!(player.has_resource());

        engines.emit(PlayerEvent::MediaStarted);
        assert!(deliver(&mut player).await);
        assert_eq!(player.state(), &PlaybackState::Live(PlaybackMethod::WebRtc));
        assert_eq!(engines.opened(), vec!["webrtc"]);
    }

    #[tokio::test]
    async fn falls_back_to_hls_when_negotiation_fails() {
        let engines = FakeEngines::new(Whep::Fails, HlsSupport::Engine);
        let mut player = Player::new(engines.clone());

        player.play(stream("cam", true)).await;
        assert!(deliver(&mut player).await);
        assert_eq!(player.state(), &PlaybackState::Connecting(PlaybackMethod::Hls));
        assert!(deliver(&mut player).await);
        assert!(player.has_resource());
        assert_eq!(engines.opened(), vec!["hls"]);
    }

    #[tokio::test]
    async fn falls_back_to_hls_when_connection_fails_later() {
        let engines = FakeEngines::new(Whep::Answers, HlsSupport::Engine);
        let mut player = Player::new(engines.clone());

        player.play(stream("cam", true)).await;
        assert!(deliver(&mut player).await);
        engines.emit(PlayerEvent::ConnectionFailed("WebRTC Connection Failed".into()));
        assert!(deliver(&mut player).await);
        assert_eq!(player.state(), &PlaybackState::Connecting(PlaybackMethod::Hls));

        assert!(deliver(&mut player).await);
        assert_eq!(engines.opened(), vec!["webrtc", "hls"]);
        assert_eq!(engines.counters.open.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fatal_hls_error_releases_and_reports() {
        let engines = FakeEngines::new(Whep::Answers, HlsSupport::Engine);
        let mut player = Player::new(engines.clone());

        player.play(stream("cam", false)).await;
        assert!(deliver(&mut player).await);
        engines.emit(PlayerEvent::Fatal("manifest load failed: HTTP 404".into()));
        assert!(deliver(&mut player).await);

        assert_eq!(
            player.state(),
            &PlaybackState::Error(STREAM_ERROR_MESSAGE.to_string())
        );
        assert!(!player.has_resource());
        assert_eq!(engines.counters.open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn events_from_stale_session_are_ignored() {
        let engines = FakeEngines::new(Whep::Answers, HlsSupport::Engine);
        let mut player = Player::new(engines.clone());

        player.play(stream("a", false)).await;
        assert!(deliver(&mut player).await);
        let stale = engines.last_events.lock().unwrap().clone().unwrap();
        player.play(stream("b", false)).await;
        assert!(deliver(&mut player).await);

        stale.emit(PlayerEvent::Fatal("old source gone".into()));
        assert!(!deliver(&mut player).await);
        assert_eq!(player.state(), &PlaybackState::Connecting(PlaybackMethod::Hls));
        assert_eq!(player.stream().map(|s| s.name.as_str()), Some("b"));
    }

    #[tokio::test]
    async fn at_most_one_resource_across_switches() {
        let engines = FakeEngines::new(Whep::Answers, HlsSupport::Engine);
        let mut player = Player::new(engines.clone());

        for name in ["a", "b", "c"] {
            player.play(stream(name, true)).await;
            assert!(deliver(&mut player).await);
            player.play(stream(name, false)).await;
            assert!(deliver(&mut player).await);
        }
        player.stop().await;

        assert_eq!(engines.counters.max_open.load(Ordering::SeqCst), 1);
        assert_eq!(engines.counters.open.load(Ordering::SeqCst), 0);
        assert_eq!(player.state(), &PlaybackState::Idle);
    }

    #[tokio::test]
    async fn open_finishing_after_a_switch_is_released() {
        let engines = FakeEngines::new(Whep::Answers, HlsSupport::Engine);
        let mut player = Player::new(engines.clone());

        player.play(stream("a", false)).await;
        // Let the open for "a" complete without handling it.
        while engines.opened().is_empty() {
            tokio::task::yield_now().await;
        }
        player.play(stream("b", false)).await;

        assert!(!deliver(&mut player).await);
        assert!(deliver(&mut player).await);
        assert_eq!(engines.counters.open.load(Ordering::SeqCst), 1);
        assert_eq!(engines.opened(), vec!["hls", "hls"]);
        assert!(player.has_resource());
    }

    #[tokio::test]
    async fn hung_negotiation_does_not_block_stop_or_reselect() {
        let engines = FakeEngines::new(Whep::Hangs, HlsSupport::Engine);
        let mut player = Player::new(engines.clone());

        tokio::time::timeout(Duration::from_secs(1), player.play(stream("a", true)))
            .await
            .expect("play must not wait for the answer");
        assert_eq!(
            player.state(),
            &PlaybackState::Connecting(PlaybackMethod::WebRtc)
        );
        assert!(
            tokio::time::timeout(Duration::from_millis(50), player.next_update())
                .await
                .is_err()
        );
        assert_eq!(engines.counters.in_flight.load(Ordering::SeqCst), 1);

        tokio::time::timeout(Duration::from_secs(1), player.stop())
            .await
            .expect("stop must not wait for the answer");
        assert_eq!(player.state(), &PlaybackState::Idle);
        tokio::time::timeout(Duration::from_secs(1), async {
            while engines.counters.in_flight.load(Ordering::SeqCst) > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("in-flight negotiation was not cancelled");

        player.play(stream("b", false)).await;
        assert!(deliver(&mut player).await);
        assert_eq!(player.stream().map(|s| s.name.as_str()), Some("b"));
        assert_eq!(engines.opened(), vec!["hls"]);
        assert_eq!(engines.counters.max_open.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn native_branch_and_unsupported_runtime() {
        let engines = FakeEngines::new(Whep::Fails, HlsSupport::Native);
        let mut player = Player::new(engines.clone());
        player.play(stream("cam", false)).await;
        assert_eq!(
            player.state(),
            &PlaybackState::Connecting(PlaybackMethod::NativeHls)
        );

        let engines = FakeEngines::new(Whep::Fails, HlsSupport::Unsupported);
        let mut player = Player::new(engines.clone());
        player.play(stream("cam", true)).await;
        assert!(deliver(&mut player).await);
        assert_eq!(
            player.state(),
            &PlaybackState::Error("Playback is not supported on this runtime.".into())
        );
        assert!(engines.opened().is_empty());
    }

    #[tokio::test]
    async fn missing_hls_url_has_no_source() {
        let engines = FakeEngines::new(Whep::Answers, HlsSupport::Engine);
        let mut player = Player::new(engines);
        let mut s = stream("cam", false);
        s.hls_url.clear();

        player.play(s).await;
        assert_eq!(
            player.state(),
            &PlaybackState::Error("No playback source available.".into())
        );
    }
}
