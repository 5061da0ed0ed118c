use std::sync::atomic::{AtomicU64, Ordering};

use super::MediaKind;

/// Destination for received media. Stands in for the media element of a player.
pub trait MediaSink: Send + Sync {
    fn on_rtp(&self, kind: MediaKind, payload: &[u8]);
    fn on_segment(&self, uri: &str, data: &[u8]);
}

/// Counts what arrives so the UI can show that playback is flowing.
#[derive(Debug, Default)]
pub struct MeterSink {
    audio_packets: AtomicU64,
    video_packets: AtomicU64,
    segments: AtomicU64,
    bytes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeterSnapshot {
    pub audio_packets: u64,
    pub video_packets: u64,
    pub segments: u64,
    pub bytes: u64,
}

impl MeterSink {
    pub fn snapshot(&self) -> MeterSnapshot {
        MeterSnapshot {
            audio_packets: self.audio_packets.load(Ordering::Relaxed),
            video_packets: self.video_packets.load(Ordering::Relaxed),
            segments: self.segments.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.audio_packets.store(0, Ordering::Relaxed);
        self.video_packets.store(0, Ordering::Relaxed);
        self.segments.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
    }
}

impl MediaSink for MeterSink {
    fn on_rtp(&self, kind: MediaKind, payload: &[u8]) {
        match kind {
            MediaKind::Audio => self.audio_packets.fetch_add(1, Ordering::Relaxed),
            MediaKind::Video => self.video_packets.fetch_add(1, Ordering::Relaxed),
        };
        self.bytes.fetch_add(payload.len() as u64, Ordering::Relaxed);
    }

    fn on_segment(&self, _uri: &str, data: &[u8]) {
        self.segments.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meter_counts_packets_and_segments() {
        let meter = MeterSink::default();
        meter.on_rtp(MediaKind::Video, &[0u8; 100]);
        meter.on_rtp(MediaKind::Audio, &[0u8; 20]);
        meter.on_segment("seg1.mp4", &[0u8; 1000]);

        let snap = meter.snapshot();
        assert_eq!(snap.video_packets, 1);
        assert_eq!(snap.audio_packets, 1);
        assert_eq!(snap.segments, 1);
        assert_eq!(snap.bytes, 1120);

        meter.reset();
        assert_eq!(meter.snapshot(), MeterSnapshot::default());
    }
}
