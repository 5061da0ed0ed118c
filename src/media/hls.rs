//! Minimal live HLS engine: follows a media playlist near the live edge and
//! feeds downloaded segments to a [`MediaSink`].

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::sink::MediaSink;
use super::{PlayerEvent, SessionEvents};

/// Live playback tuning, mirroring the usual low-latency player settings.
#[derive(Debug, Clone)]
pub struct HlsConfig {
    pub low_latency_mode: bool,
    /// Start this many segments behind the live edge.
    pub live_sync_duration_count: u64,
    /// Jump forward once this many segments behind the live edge.
    pub live_max_latency_duration_count: u64,
    /// Consecutive playlist reload failures tolerated before giving up.
    pub manifest_retry_limit: u32,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            low_latency_mode: true,
            live_sync_duration_count: 2,
            live_max_latency_duration_count: 4,
            manifest_retry_limit: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub uri: String,
    pub duration: f64,
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub target_duration: f64,
    pub media_sequence: u64,
    pub segments: Vec<Segment>,
    pub ended: bool,
}

impl MediaPlaylist {
    /// Sequence number one past the newest segment.
    pub fn live_edge(&self) -> u64 {
        self.media_sequence + self.segments.len() as u64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Playlist {
    /// Multivariant playlist: variant URIs in declaration order.
    Master(Vec<String>),
    Media(MediaPlaylist),
}

fn tag_value<'a>(line: &'a str, tag: &str) -> Option<&'a str> {
    line.strip_prefix(tag).and_then(|rest| rest.strip_prefix(':'))
}

pub fn parse_playlist(text: &str) -> Result<Playlist, String> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    if lines.next() != Some("#EXTM3U") {
        return Err("missing #EXTM3U header".to_string());
    }

    let mut variants = Vec::new();
    let mut expect_variant = false;
    let mut target_duration = None;
    let mut media_sequence = 0u64;
    let mut pending_duration = None;
    let mut uris = Vec::new();
    let mut ended = false;

    for line in lines {
        if let Some(value) = tag_value(line, "#EXT-X-TARGETDURATION") {
            let duration = value
                .parse::<f64>()
                .ok()
                .filter(|d| d.is_finite() && *d > 0.0)
                .ok_or_else(|| format!("bad target duration {:?}", value))?;
            target_duration = Some(duration);
        } else if let Some(value) = tag_value(line, "#EXT-X-MEDIA-SEQUENCE") {
            media_sequence = value
                .parse()
                .map_err(|_| format!("bad media sequence {:?}", value))?;
        } else if let Some(value) = tag_value(line, "#EXTINF") {
            let duration = value.split(',').next().unwrap_or_default();
            pending_duration = Some(duration.parse::<f64>().unwrap_or(0.0));
        } else if line.starts_with("#EXT-X-STREAM-INF") {
            expect_variant = true;
        } else if line == "#EXT-X-ENDLIST" {
            ended = true;
        } else if line.starts_with('#') {
            // Unhandled tag (parts, preload hints, program date time, ...).
        } else if expect_variant {
            variants.push(line.to_string());
            expect_variant = false;
        } else if let Some(duration) = pending_duration.take() {
            uris.push((line.to_string(), duration));
        }
    }

    if !variants.is_empty() {
        return Ok(Playlist::Master(variants));
    }

    let target_duration =
        target_duration.ok_or_else(|| "missing #EXT-X-TARGETDURATION".to_string())?;
    let segments = uris
        .into_iter()
        .enumerate()
        .map(|(i, (uri, duration))| Segment {
            uri,
            duration,
            sequence: media_sequence + i as u64,
        })
        .collect();

    Ok(Playlist::Media(MediaPlaylist {
        target_duration,
        media_sequence,
        segments,
        ended,
    }))
}

const MAX_RELOAD_INTERVAL: Duration = Duration::from_secs(30);

/// Tracks which segment to fetch next as the live window slides.
#[derive(Debug)]
pub struct LiveCursor {
    config: HlsConfig,
    next: Option<u64>,
}

impl LiveCursor {
    pub fn new(config: HlsConfig) -> Self {
        Self { config, next: None }
    }

    pub fn next_sequence(&self) -> Option<u64> {
        self.next
    }

    /// Segments to download from this playlist snapshot, oldest first.
    pub fn take_pending(&mut self, playlist: &MediaPlaylist) -> Vec<Segment> {
        let first = playlist.media_sequence;
        let edge = playlist.live_edge();
        let sync_start = edge
            .saturating_sub(self.config.live_sync_duration_count)
            .max(first);

        let mut next = match self.next {
            Some(next) => next,
            None if playlist.ended => first,
            None => sync_start,
        };

        if next > edge {
            // Sequence numbers went backwards: the publisher restarted on this path.
            debug!("Media sequence reset ({} > edge {}), resyncing", next, edge);
            next = if playlist.ended { first } else { sync_start };
        }

        if !playlist.ended && edge.saturating_sub(next) > self.config.live_max_latency_duration_count {
            debug!("Behind live edge by {} segments, resyncing", edge - next);
            next = sync_start;
        }
        if next < first {
            next = first;
        }

        let pending = playlist
            .segments
            .iter()
            .filter(|s| s.sequence >= next)
            .cloned()
            .collect();
        self.next = Some(edge.max(next));
        pending
    }

    pub fn reload_interval(&self, playlist: &MediaPlaylist) -> Duration {
        let secs = if self.config.low_latency_mode {
            playlist.target_duration / 2.0
        } else {
            playlist.target_duration
        };
        if !secs.is_finite() {
            return MAX_RELOAD_INTERVAL;
        }
        Duration::from_secs_f64(secs.clamp(0.2, MAX_RELOAD_INTERVAL.as_secs_f64()))
    }
}

/// A running engine instance. `destroy` releases it.
pub struct HlsEngine {
    task: Option<JoinHandle<()>>,
}

impl HlsEngine {
    pub fn start(
        http: reqwest::Client,
        manifest_url: Url,
        config: HlsConfig,
        sink: Arc<dyn MediaSink>,
        events: SessionEvents<PlayerEvent>,
    ) -> Self {
        info!("HLS engine loading {}", manifest_url);
        let task = tokio::spawn(run_engine(http, manifest_url, config, sink, events));
        Self { task: Some(task) }
    }

    /// Stop loading and drop all buffered state. Idempotent.
    pub fn destroy(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("HLS engine destroyed");
        }
    }
}

impl Drop for HlsEngine {
    fn drop(&mut self) {
        self.destroy();
    }
}

async fn fetch_playlist(http: &reqwest::Client, url: &Url) -> Result<Playlist, String> {
    let response = http
        .get(url.clone())
        .send()
        .await
        .map_err(|e| format!("manifest request failed: {}", e))?;
    if !response.status().is_success() {
        return Err(format!("manifest load failed: HTTP {}", response.status()));
    }
    let text = response
        .text()
        .await
        .map_err(|e| format!("manifest read failed: {}", e))?;
    parse_playlist(&text)
}

async fn fetch_media_playlist(
    http: &reqwest::Client,
    url: &Url,
) -> Result<(Url, MediaPlaylist), String> {
    match fetch_playlist(http, url).await? {
        Playlist::Media(media) => Ok((url.clone(), media)),
        Playlist::Master(variants) => {
            let variant = variants
                .first()
                .ok_or_else(|| "multivariant playlist without variants".to_string())?;
            let variant_url = url
                .join(variant)
                .map_err(|e| format!("bad variant URI {:?}: {}", variant, e))?;
            debug!("Selected variant {}", variant_url);
            match fetch_playlist(http, &variant_url).await? {
                Playlist::Media(media) => Ok((variant_url, media)),
                Playlist::Master(_) => Err("nested multivariant playlist".to_string()),
            }
        }
    }
}

async fn run_engine(
    http: reqwest::Client,
    manifest_url: Url,
    config: HlsConfig,
    sink: Arc<dyn MediaSink>,
    events: SessionEvents<PlayerEvent>,
) {
    let retry_limit = config.manifest_retry_limit;
    let (media_url, mut playlist) = match fetch_media_playlist(&http, &manifest_url).await {
        Ok(loaded) => loaded,
        Err(e) => {
            warn!("HLS fatal error: {}", e);
            events.emit(PlayerEvent::Fatal(e));
            return;
        }
    };
    events.emit(PlayerEvent::MediaStarted);

    let mut cursor = LiveCursor::new(config);
    let mut failures = 0u32;

    loop {
        for segment in cursor.take_pending(&playlist) {
            let Ok(segment_url) = media_url.join(&segment.uri) else {
                warn!("Skipping segment with bad URI {:?}", segment.uri);
                continue;
            };
            match fetch_segment(&http, &segment_url).await {
                Ok(data) => sink.on_segment(&segment.uri, &data),
                Err(e) => warn!("Segment {} failed: {}", segment.sequence, e),
            }
        }

        if playlist.ended {
            info!("HLS playlist ended");
            events.emit(PlayerEvent::Ended);
            return;
        }

        tokio::time::sleep(cursor.reload_interval(&playlist)).await;

        match fetch_playlist(&http, &media_url).await {
            Ok(Playlist::Media(next)) => {
                failures = 0;
                playlist = next;
            }
            Ok(Playlist::Master(_)) => {
                failures += 1;
                warn!("Media playlist turned into a multivariant playlist");
            }
            Err(e) => {
                failures += 1;
                warn!("Playlist reload failed ({}/{}): {}", failures, retry_limit, e);
            }
        }

        if failures >= retry_limit {
            events.emit(PlayerEvent::Fatal(format!(
                "playlist reload failed {} times",
                failures
            )));
            return;
        }
    }
}

async fn fetch_segment(http: &reqwest::Client, url: &Url) -> Result<bytes::Bytes, String> {
    let response = http
        .get(url.clone())
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("HTTP {}", response.status()));
    }
    response.bytes().await.map_err(|e| e.to_string())
}
