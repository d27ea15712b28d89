//! Chunk decoding - encoded audio bytes to raw samples
//!
//! The inference server streams raw 16-bit PCM fragments during an
//! utterance and sends a WAV blob on the non-streaming fallback path.
//! [`AudioDecoder`] is the seam between the pipeline and the concrete
//! format; decode latency is variable and the pipeline runs it off the
//! scheduling path.

use crate::error::{AvatarError, AvatarResult};
use rodio::Source;
use std::io::Cursor;
use std::time::Duration;

/// How a chunk's bytes are encoded, selecting the decoder that handles it.
///
/// The streaming path sends bare PCM fragments; the non-streaming fallback
/// sends one self-describing container blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkFormat {
    /// Raw fragment in the format announced at stream start.
    Stream,
    /// Self-contained container blob (WAV).
    Container,
}

/// Raw decoded audio for one chunk. Immutable once produced.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Interleaved samples, -1.0..1.0.
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Playback duration of this chunk.
    pub fn duration(&self) -> Duration {
        if self.channels == 0 || self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() as u64 / self.channels as u64;
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }
}

/// Turns one encoded chunk into raw audio. Implementations must be cheap to
/// share across decode tasks.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> AvatarResult<DecodedAudio>;
}

/// Decoder for raw signed 16-bit little-endian PCM fragments, the format the
/// server's streaming TTS emits (no container, fixed rate announced in
/// `audio_start`).
#[derive(Debug, Clone)]
pub struct Pcm16Decoder {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Pcm16Decoder {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

impl Default for Pcm16Decoder {
    fn default() -> Self {
        // Piper's default voice rate; overridden per-stream via audio_start.
        Self::new(22_050, 1)
    }
}

impl AudioDecoder for Pcm16Decoder {
    fn decode(&self, bytes: &[u8]) -> AvatarResult<DecodedAudio> {
        if bytes.is_empty() {
            return Err(AvatarError::Decode("empty chunk".to_string()));
        }
        if bytes.len() % 2 != 0 {
            return Err(AvatarError::Decode(format!(
                "PCM16 chunk has odd length {}",
                bytes.len()
            )));
        }
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / i16::MAX as f32)
            .collect();
        Ok(DecodedAudio {
            samples,
            channels: self.channels,
            sample_rate: self.sample_rate,
        })
    }
}

/// Container-aware decoder (WAV and friends) built on `rodio::Decoder`.
/// Used for the complete-utterance fallback blob.
#[derive(Debug, Clone, Default)]
pub struct WavDecoder;

impl AudioDecoder for WavDecoder {
    fn decode(&self, bytes: &[u8]) -> AvatarResult<DecodedAudio> {
        let cursor = Cursor::new(bytes.to_vec());
        let decoder = rodio::Decoder::new(cursor)
            .map_err(|e| AvatarError::Decode(e.to_string()))?;
        let channels = decoder.channels();
        let sample_rate = decoder.sample_rate();
        let samples: Vec<f32> = decoder.convert_samples().collect();
        if samples.is_empty() {
            return Err(AvatarError::Decode("decoded chunk is empty".to_string()));
        }
        Ok(DecodedAudio {
            samples,
            channels,
            sample_rate,
        })
    }
}
