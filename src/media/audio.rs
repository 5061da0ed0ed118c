use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, atomic::{AtomicBool, Ordering}};
use tokio::sync::mpsc;
use tracing::{info, error};

use super::codec::OPUS_FRAME_SAMPLES;

/// Names of the available input devices, default first.
pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut names: Vec<String> = host
        .input_devices()
        .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default();

    if let Some(default_name) = default_name {
        if let Some(pos) = names.iter().position(|n| *n == default_name) {
            let name = names.remove(pos);
            names.insert(0, name);
        }
    }
    names
}

/// Send+Sync microphone handle. The cpal::Stream (which is !Send) lives on a
/// dedicated thread; we communicate via the `running` flag.
pub struct MicrophoneHandle {
    running: Arc<AtomicBool>,
    _thread: std::thread::JoinHandle<()>,
}

// Safety: The cpal::Stream is confined to its own thread.
// We only share the AtomicBool flag across threads.
unsafe impl Send for MicrophoneHandle {}
unsafe impl Sync for MicrophoneHandle {}

impl MicrophoneHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

impl Drop for MicrophoneHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

fn find_input_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device, String> {
    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| "No input device available".to_string()),
        Some(wanted) => host
            .input_devices()
            .map_err(|e| format!("Failed to enumerate input devices: {}", e))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| format!("Input device {:?} not found", wanted)),
    }
}

/// Start capturing from an input device (default when `device_name` is None).
/// Returns a receiver of f32 PCM frames (mono, 48kHz, 960-sample chunks = 20ms).
/// Fails when the device is missing or access is denied by the host.
pub fn start_microphone(
    device_name: Option<&str>,
) -> Result<(MicrophoneHandle, mpsc::Receiver<Vec<f32>>), String> {
    let (tx, rx) = mpsc::channel::<Vec<f32>>(64);
    let running = Arc::new(AtomicBool::new(true));
    let running_thread = running.clone();
    let running_callback = running.clone();
    let device_name = device_name.map(str::to_string);

    // Build the stream on a dedicated thread so the !Send cpal::Stream
    // never crosses a thread boundary.
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), String>>();

    let thread = std::thread::spawn(move || {
        let host = cpal::default_host();
        let device = match find_input_device(&host, device_name.as_deref()) {
            Ok(d) => d,
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };

        let name = device.name().unwrap_or_else(|_| "unknown".into());
        info!("Using input device: {}", name);

        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(48000),
            buffer_size: cpal::BufferSize::Default,
        };

        let mut buffer = Vec::with_capacity(OPUS_FRAME_SAMPLES);

        let stream = match device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !running_callback.load(Ordering::Relaxed) {
                    return;
                }
                for &sample in data {
                    buffer.push(sample);
                    if buffer.len() == OPUS_FRAME_SAMPLES {
                        let frame = std::mem::replace(
                            &mut buffer,
                            Vec::with_capacity(OPUS_FRAME_SAMPLES),
                        );
                        let _ = tx.try_send(frame);
                    }
                }
            },
            move |err| {
                error!("Microphone capture error: {}", err);
            },
            None,
        ) {
            Ok(s) => s,
            Err(e) => {
                let _ = ready_tx.send(Err(format!("Failed to open microphone: {}", e)));
                return;
            }
        };

        if let Err(e) = stream.play() {
            let _ = ready_tx.send(Err(format!("Microphone access denied: {}", e)));
            return;
        }

        info!("Microphone capture started (48kHz mono, 20ms frames)");
        let _ = ready_tx.send(Ok(()));

        // Keep the stream alive until stopped
        while running_thread.load(Ordering::Relaxed) {
            std::thread::sleep(std::time::Duration::from_millis(50));
        }

        drop(stream);
        info!("Microphone capture thread exiting");
    });

    // Wait for the stream to be ready
    match ready_rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err("Microphone capture thread panicked".into()),
    }

    Ok((MicrophoneHandle { running, _thread: thread }, rx))
}
