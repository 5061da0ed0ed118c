use tracing::error;

/// Samples per 20 ms frame at 48 kHz.
pub const OPUS_FRAME_SAMPLES: usize = 960;

/// Default publish bitrate for microphone audio.
pub const DEFAULT_AUDIO_BITRATE: i32 = 64_000;

/// Opus encoder for published microphone audio: 48kHz mono, 20ms frames.
pub struct OpusEncoder {
    encoder: opus::Encoder,
}

impl OpusEncoder {
    pub fn new(bitrate_bps: i32) -> Result<Self, String> {
        let mut encoder =
            opus::Encoder::new(48000, opus::Channels::Mono, opus::Application::Audio)
                .map_err(|e| format!("Failed to create Opus encoder: {}", e))?;
        encoder
            .set_bitrate(opus::Bitrate::Bits(bitrate_bps))
            .map_err(|e| format!("Failed to set Opus bitrate: {}", e))?;
        Ok(Self { encoder })
    }

    /// Encode a 960-sample f32 PCM frame to Opus bytes.
    pub fn encode(&mut self, pcm: &[f32]) -> Result<Vec<u8>, String> {
        let mut output = vec![0u8; 4000]; // max opus frame
        let len = self
            .encoder
            .encode_float(pcm, &mut output)
            .map_err(|e| {
                error!("Opus encode error: {}", e);
                format!("Opus encode error: {}", e)
            })?;
        output.truncate(len);
        Ok(output)
    }
}
