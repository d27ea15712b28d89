//! Inbound event protocol from the inference server
//!
//! The transport collaborator delivers JSON text frames; this module
//! classifies each frame into a typed [`ServerEvent`] and decodes the
//! base64 audio payloads. A malformed frame yields a `Protocol` error and
//! is dropped by the caller - it must never stall the frames behind it.

use crate::error::{AvatarError, AvatarResult};
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};

/// One viseme event: mouth shape plus its window within the utterance.
///
/// `time` and `duration` are seconds relative to the utterance start, not
/// to any individual audio chunk. The list an utterance carries is ordered
/// by `time` and non-overlapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viseme {
    /// Viseme identity (Oculus lip-sync vocabulary: "sil", "PP", "aa", ...).
    pub value: String,
    /// Start offset in seconds from utterance start.
    pub time: f64,
    /// Duration in seconds.
    pub duration: f64,
}

impl Viseme {
    /// Whether `elapsed` (seconds) falls inside this viseme's window.
    pub fn contains(&self, elapsed: f64) -> bool {
        elapsed >= self.time && elapsed < self.time + self.duration
    }
}

fn base64_audio<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = String::deserialize(deserializer)?;
    base64::engine::general_purpose::STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}

/// Typed inbound events, tagged by the wire `type` field.
///
/// Event types the server does not announce in this vocabulary fall into
/// `Unknown` and are dropped with a warning rather than rejected.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A new streamed utterance begins; carries the full subtitle text.
    AudioStart {
        text: String,
        /// PCM rate of the chunks to follow (the server announces it here).
        #[serde(default, alias = "sampleRate")]
        sample_rate: Option<u32>,
    },

    /// Viseme timeline for the current utterance. May arrive before, with,
    /// or after the first audio chunk.
    VisemeData { visemes: Vec<Viseme> },

    /// One encoded audio fragment (base64 on the wire, bytes here).
    AudioChunk {
        #[serde(deserialize_with = "base64_audio")]
        audio: Vec<u8>,
    },

    /// The current utterance's stream is complete; no further chunks.
    AudioEnd,

    /// Non-streaming fallback: a complete pre-rendered utterance in one
    /// message. Handled as a degenerate one-chunk stream.
    AudioResponse {
        text: String,
        #[serde(deserialize_with = "base64_audio")]
        audio: Vec<u8>,
        #[serde(default)]
        visemes: Vec<Viseme>,
    },

    /// Unrecognized event type.
    #[serde(other)]
    Unknown,
}

/// Parse one raw transport frame into a typed event.
pub fn parse_event(raw: &str) -> AvatarResult<ServerEvent> {
    serde_json::from_str(raw).map_err(AvatarError::from)
}
