use std::time::Duration;

use reqwest::{StatusCode, Url};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::models::{StreamSummary, StreamsResponse};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Result of one request to `/api/streams`.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Streams(Vec<StreamSummary>),
    /// The proxy answered 503: the media server is down, so nothing is live.
    Unavailable,
    /// Network or decoding failure; the last known list stays in place.
    Failed(String),
}

/// Periodically fetches the live stream list from the proxy.
pub struct StreamPoller {
    http: reqwest::Client,
    endpoint: Url,
}

impl StreamPoller {
    pub fn new(http: reqwest::Client, origin: &Url) -> Result<Self, String> {
        let endpoint = origin
            .join("/api/streams")
            .map_err(|e| format!("Invalid origin {}: {}", origin, e))?;
        Ok(Self { http, endpoint })
    }

    pub async fn poll_once(&self) -> PollOutcome {
        let response = match self.http.get(self.endpoint.clone()).send().await {
            Ok(r) => r,
            Err(e) => return PollOutcome::Failed(e.to_string()),
        };

        match response.status() {
            StatusCode::SERVICE_UNAVAILABLE => PollOutcome::Unavailable,
            status if status.is_success() => match response.json::<StreamsResponse>().await {
                Ok(body) => PollOutcome::Streams(body.streams),
                Err(e) => PollOutcome::Failed(format!("bad stream list: {}", e)),
            },
            status => PollOutcome::Failed(format!("HTTP {}", status)),
        }
    }

    /// Poll immediately, then every `interval`, delivering outcomes on `tx`.
    /// Runs on its own task so playback negotiation never delays a tick.
    pub fn spawn(self, interval: Duration, tx: mpsc::Sender<PollOutcome>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Polling {} every {:?}", self.endpoint, interval);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let outcome = self.poll_once().await;
                if let PollOutcome::Failed(reason) = &outcome {
                    debug!("Stream poll failed, keeping last list: {}", reason);
                }
                if tx.send(outcome).await.is_err() {
                    break;
                }
            }
        })
    }
}

/// Outcome of applying a poll result to the viewer state.
#[derive(Debug, Default, PartialEq)]
pub struct Applied {
    pub list_changed: bool,
    /// The active stream, if it just disappeared from the list.
    pub went_offline: Option<StreamSummary>,
}

/// Stream list plus the viewer's current selection.
#[derive(Debug, Clone)]
pub struct ViewerState {
    streams: Vec<StreamSummary>,
    active: Option<StreamSummary>,
    loading: bool,
}

impl Default for ViewerState {
    fn default() -> Self {
        Self {
            streams: Vec::new(),
            active: None,
            loading: true,
        }
    }
}

impl ViewerState {
    pub fn streams(&self) -> &[StreamSummary] {
        &self.streams
    }

    pub fn active(&self) -> Option<&StreamSummary> {
        self.active.as_ref()
    }

    /// True until the first poll outcome of any kind.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn apply(&mut self, outcome: PollOutcome) -> Applied {
        self.loading = false;

        let streams = match outcome {
            PollOutcome::Streams(streams) => streams,
            PollOutcome::Unavailable => Vec::new(),
            PollOutcome::Failed(_) => return Applied::default(),
        };

        let list_changed = streams != self.streams;
        self.streams = streams;

        let mut went_offline = None;
        if let Some(active) = self.active.take() {
            // Same name may come back with a new readyTime or URLs.
            match self.streams.iter().find(|s| s.name == active.name) {
                Some(fresh) => self.active = Some(fresh.clone()),
                None => went_offline = Some(active),
            }
        }

        Applied {
            list_changed,
            went_offline,
        }
    }

    /// Make `name` the active stream. Returns it, or None if it is not live.
    pub fn select(&mut self, name: &str) -> Option<&StreamSummary> {
        let stream = self.streams.iter().find(|s| s.name == name)?.clone();
        self.active = Some(stream);
        self.active.as_ref()
    }

    pub fn close(&mut self) -> Option<StreamSummary> {
        self.active.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(name: &str) -> StreamSummary {
        StreamSummary {
            name: name.to_string(),
            hls_url: format!("/hls/{}/index.m3u8", name),
            rtmp_ingest_url: format!("rtmp://host:1935/{}", name),
            webrtc_url: None,
            ready_time: None,
        }
    }

    #[test]
    fn active_stream_follows_the_latest_listing() {
        let mut state = ViewerState::default();
        state.apply(PollOutcome::Streams(vec![stream("a")]));
        state.select("a");

        let mut restarted = stream("a");
        restarted.ready_time = Some("2024-06-01T12:00:00Z".to_string());
        restarted.webrtc_url = Some("/webrtc/a/whep".to_string());
        let applied = state.apply(PollOutcome::Streams(vec![restarted.clone()]));

        assert!(applied.went_offline.is_none());
        assert_eq!(state.active(), Some(&restarted));
    }

    #[test]
    fn active_stream_cleared_when_it_goes_offline() {
        let mut state = ViewerState::default();
        state.apply(PollOutcome::Streams(vec![stream("a"), stream("b")]));
        assert!(state.select("a").is_some());

        let applied = state.apply(PollOutcome::Streams(vec![stream("b")]));
        assert_eq!(applied.went_offline.map(|s| s.name), Some("a".to_string()));
        assert!(state.active().is_none());
    }

    #[test]
    fn active_stream_kept_while_live() {
        let mut state = ViewerState::default();
        state.apply(PollOutcome::Streams(vec![stream("a")]));
        state.select("a");

        let applied = state.apply(PollOutcome::Streams(vec![stream("a"), stream("c")]));
        assert!(applied.list_changed);
        assert!(applied.went_offline.is_none());
        assert_eq!(state.active().map(|s| s.name.as_str()), Some("a"));
    }

    #[test]
    fn transport_failure_keeps_last_list_and_selection() {
        let mut state = ViewerState::default();
        state.apply(PollOutcome::Streams(vec![stream("a")]));
        state.select("a");

        let applied = state.apply(PollOutcome::Failed("connection refused".into()));
        assert_eq!(applied, Applied::default());
        assert_eq!(state.streams().len(), 1);
        assert!(state.active().is_some());
    }

    #[test]
    fn unavailable_empties_list_and_clears_selection() {
        let mut state = ViewerState::default();
        state.apply(PollOutcome::Streams(vec![stream("a")]));
        state.select("a");

        let applied = state.apply(PollOutcome::Unavailable);
        assert!(applied.list_changed);
        assert!(applied.went_offline.is_some());
        assert!(state.streams().is_empty());
    }

    #[test]
    fn loading_clears_after_first_outcome_even_on_failure() {
        let mut state = ViewerState::default();
        assert!(state.is_loading());
        state.apply(PollOutcome::Failed("timeout".into()));
        assert!(!state.is_loading());
    }

    #[test]
    fn cannot_select_stream_that_is_not_live() {
        let mut state = ViewerState::default();
        state.apply(PollOutcome::Streams(vec![stream("a")]));
        assert!(state.select("zzz").is_none());
        assert!(state.active().is_none());
    }
}
