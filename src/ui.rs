//! Terminal rendering. Every function returns text; printing is up to the caller.

use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::client::broadcast::{BroadcastState, StreamKey};
use crate::client::player::PlaybackState;
use crate::media::sink::MeterSnapshot;
use crate::models::StreamSummary;

/// How long a stream has been live, from its MediaMTX `readyTime`.
pub fn format_duration(ready_time: Option<&str>, now: DateTime<Utc>) -> String {
    let Some(started) = ready_time.and_then(|t| DateTime::parse_from_rfc3339(t).ok()) else {
        return "Just started".to_string();
    };
    let seconds = (now - started.with_timezone(&Utc)).num_seconds().max(0);
    if seconds < 60 {
        format!("{}s live", seconds)
    } else if seconds < 3600 {
        format!("{}m live", seconds / 60)
    } else {
        format!("{}h {}m live", seconds / 3600, (seconds % 3600) / 60)
    }
}

pub fn stream_count(count: usize) -> String {
    format!("{} stream{} live", count, if count == 1 { "" } else { "s" })
}

pub fn header(count: usize) -> String {
    format!("▶ StreamFlow  ·  {}", stream_count(count))
}

pub fn empty_state() -> String {
    [
        "No streams live right now",
        "Start streaming from OBS Studio or VLC using RTMP and your stream will appear here automatically.",
        "",
        "How to go live:",
        "  1. Open OBS Studio (or VLC → Media → Stream)",
        "  2. Set RTMP server to rtmp://YOUR_SERVER_IP:1935/live",
        "  3. Set stream key to any name, e.g. mystream",
        "  4. Click Start Streaming; you'll appear here within seconds",
    ]
    .join("\n")
}

pub fn stream_list(
    streams: &[StreamSummary],
    active: Option<&str>,
    loading: bool,
    now: DateTime<Utc>,
) -> String {
    if loading {
        return "Connecting to media server…".to_string();
    }
    if streams.is_empty() {
        return empty_state();
    }

    let mut out = String::from("● LIVE  Active Streams\n");
    for stream in streams {
        let marker = if active == Some(stream.name.as_str()) {
            "▶ Now Playing"
        } else {
            "  Watch Live "
        };
        let _ = writeln!(
            out,
            "  {}  {:<24} ⏱ {}",
            marker,
            stream.name,
            format_duration(stream.ready_time.as_deref(), now)
        );
    }
    out.truncate(out.trim_end().len());
    out
}

pub fn player_status(
    stream: &StreamSummary,
    state: &PlaybackState,
    meter: MeterSnapshot,
    now: DateTime<Utc>,
) -> String {
    let status = match state {
        PlaybackState::Idle => "Idle".to_string(),
        PlaybackState::Connecting(_) => "Connecting to stream…".to_string(),
        PlaybackState::Live(method) => format!(
            "{} · {} packets, {} segments, {} KiB",
            method.label(),
            meter.audio_packets + meter.video_packets,
            meter.segments,
            meter.bytes / 1024
        ),
        PlaybackState::Ended => "Stream ended".to_string(),
        PlaybackState::Error(message) => format!("⚠️ {}", message),
    };
    format!(
        "● LIVE {}\n  {}\n  🎙️ RTMP URL: {}  ·  {}",
        stream.name,
        status,
        stream.rtmp_ingest_url,
        format_duration(stream.ready_time.as_deref(), now)
    )
}

pub fn broadcast_status(key: &StreamKey, state: &BroadcastState) -> String {
    let status = match state {
        BroadcastState::Idle => "Ready. Type `start` to go live.".to_string(),
        BroadcastState::Capturing => "Starting capture…".to_string(),
        BroadcastState::Negotiating => "CONNECTING...".to_string(),
        BroadcastState::Live => "● LIVE".to_string(),
        BroadcastState::Stopped => "Stopped".to_string(),
        BroadcastState::Failed(message) => format!("⚠️ {}", message),
    };
    format!("🎥 Broadcast Live  [{}]  {}", key, status)
}

pub fn setup_info(rtmp_url: &str, key: &StreamKey) -> String {
    format!(
        "⚙️ OBS Studio Setup\n  1. RTMP Server URL: {}\n  2. Stream Key:      {}",
        rtmp_url, key
    )
}

pub fn viewer_help() -> &'static str {
    "Commands: list | watch <name> | close | help | quit"
}

pub fn broadcast_help() -> &'static str {
    "Commands: key <name> | start | stop | devices | help | quit"
}
