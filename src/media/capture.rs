//! Local capture for publishing: microphone audio (Opus) and a looped VP8/VP9
//! IVF file standing in for a camera.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MIME_TYPE_VP9};
use webrtc::media::io::ivf_reader::{IVFFileHeader, IVFReader};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

use super::audio::{self, MicrophoneHandle};
use super::codec::{OpusEncoder, DEFAULT_AUDIO_BITRATE};
use super::MediaKind;

const OPUS_FRAME_DURATION: Duration = Duration::from_millis(20);

/// One encoded track ready to be attached to a peer connection.
pub struct CapturedTrack {
    pub kind: MediaKind,
    pub codec: RTCRtpCodecCapability,
    pub samples: mpsc::Receiver<Sample>,
}

/// What to capture.
#[derive(Debug, Clone, Default)]
pub struct CaptureRequest {
    pub audio: bool,
    pub audio_device: Option<String>,
    pub video_file: Option<PathBuf>,
}

/// Live capture resources. Dropping it stops every source.
pub struct LocalCapture {
    microphone: Option<MicrophoneHandle>,
    encoder_task: Option<JoinHandle<()>>,
    video: Option<VideoFileHandle>,
    tracks: Vec<CapturedTrack>,
}

impl LocalCapture {
    /// Open every requested source. Blocks while devices start, so call it
    /// from a blocking context. Must run inside a tokio runtime.
    pub fn open(request: &CaptureRequest) -> Result<Self, String> {
        if !request.audio && request.video_file.is_none() {
            return Err("no capture source requested".to_string());
        }

        let mut capture = LocalCapture {
            microphone: None,
            encoder_task: None,
            video: None,
            tracks: Vec::new(),
        };

        // Video first: a bad file fails before the microphone opens.
        if let Some(path) = &request.video_file {
            let (handle, track) = start_video_file(path)?;
            capture.video = Some(handle);
            capture.tracks.push(track);
        }

        if request.audio {
            let (mic, pcm_rx) = audio::start_microphone(request.audio_device.as_deref())?;
            let encoder = OpusEncoder::new(DEFAULT_AUDIO_BITRATE)?;
            let (tx, rx) = mpsc::channel::<Sample>(64);
            capture.encoder_task = Some(tokio::spawn(encode_audio(pcm_rx, encoder, tx)));
            capture.microphone = Some(mic);
            capture.tracks.push(CapturedTrack {
                kind: MediaKind::Audio,
                codec: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                    rtcp_feedback: vec![],
                },
                samples: rx,
            });
        }

        info!("Local capture started ({} track(s))", capture.tracks.len());
        Ok(capture)
    }

    /// Hand the encoded tracks to the publisher. Subsequent calls return nothing.
    pub fn take_tracks(&mut self) -> Vec<CapturedTrack> {
        std::mem::take(&mut self.tracks)
    }

    /// Stop every source. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(mic) = self.microphone.take() {
            mic.stop();
        }
        if let Some(task) = self.encoder_task.take() {
            task.abort();
        }
        if let Some(video) = self.video.take() {
            video.stop();
        }
        self.tracks.clear();
    }
}

impl Drop for LocalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn encode_audio(
    mut pcm_rx: mpsc::Receiver<Vec<f32>>,
    mut encoder: OpusEncoder,
    tx: mpsc::Sender<Sample>,
) {
    while let Some(frame) = pcm_rx.recv().await {
        let Ok(packet) = encoder.encode(&frame) else {
            continue;
        };
        let sample = Sample {
            data: Bytes::from(packet),
            duration: OPUS_FRAME_DURATION,
            ..Default::default()
        };
        if tx.send(sample).await.is_err() {
            break;
        }
    }
    debug!("Audio encoder task exiting");
}

/// Send+Sync handle for the IVF reader thread.
pub struct VideoFileHandle {
    running: Arc<AtomicBool>,
    _thread: std::thread::JoinHandle<()>,
}

impl VideoFileHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

impl Drop for VideoFileHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

fn open_ivf(path: &Path) -> Result<(IVFReader<BufReader<File>>, IVFFileHeader), String> {
    let file = File::open(path).map_err(|e| format!("Failed to open {}: {}", path.display(), e))?;
    IVFReader::new(BufReader::new(file))
        .map_err(|e| format!("Failed to read IVF header from {}: {}", path.display(), e))
}

fn codec_for_fourcc(four_cc: &[u8; 4]) -> Result<&'static str, String> {
    match four_cc {
        b"VP80" => Ok(MIME_TYPE_VP8),
        b"VP90" => Ok(MIME_TYPE_VP9),
        other => Err(format!(
            "Unsupported IVF codec {:?}",
            String::from_utf8_lossy(other)
        )),
    }
}

fn frame_interval(header: &IVFFileHeader) -> Duration {
    if header.timebase_denominator == 0 {
        return Duration::from_millis(33);
    }
    Duration::from_millis(
        (1000 * header.timebase_numerator as u64) / header.timebase_denominator as u64,
    )
    .max(Duration::from_millis(1))
}

/// Loop an IVF file forever, pacing frames at the file's timebase.
fn start_video_file(path: &Path) -> Result<(VideoFileHandle, CapturedTrack), String> {
    let (mut reader, header) = open_ivf(path)?;
    let mime_type = codec_for_fourcc(&header.four_cc)?;
    let interval = frame_interval(&header);
    info!(
        "Video source {} ({}x{}, {:?}/frame)",
        path.display(),
        header.width,
        header.height,
        interval
    );

    let (tx, rx) = mpsc::channel::<Sample>(32);
    let running = Arc::new(AtomicBool::new(true));
    let running_thread = running.clone();
    let path = path.to_path_buf();

    let thread = std::thread::spawn(move || {
        while running_thread.load(Ordering::Relaxed) {
            match reader.parse_next_frame() {
                Ok((frame, _)) => {
                    let sample = Sample {
                        data: frame.freeze(),
                        duration: interval,
                        ..Default::default()
                    };
                    if tx.blocking_send(sample).is_err() {
                        break;
                    }
                    std::thread::sleep(interval);
                }
                Err(_) => match open_ivf(&path) {
                    // End of file: start over.
                    Ok((next, _)) => reader = next,
                    Err(e) => {
                        warn!("Video source stopped: {}", e);
                        break;
                    }
                },
            }
        }
        info!("Video source thread exiting");
    });

    let track = CapturedTrack {
        kind: MediaKind::Video,
        codec: RTCRtpCodecCapability {
            mime_type: mime_type.to_owned(),
            clock_rate: 90000,
            ..Default::default()
        },
        samples: rx,
    };

    Ok((VideoFileHandle { running, _thread: thread }, track))
}
