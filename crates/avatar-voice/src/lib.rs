//! # Avatar Voice - Streaming Playback & Viseme Synchronization
//!
//! Client-side engine for a voice-interactive avatar: receives a stream of
//! small encoded audio fragments plus phoneme timing metadata ("visemes")
//! from an inference server, reconstructs a gapless audio timeline, and
//! exposes a continuously queryable mouth-intensity signal to a renderer
//! running on its own clock.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Playback Engine                         │
//! │  ┌────────────┐   ┌────────────┐   ┌───────────────────┐    │
//! │  │  Protocol  │ → │  Playback  │ → │ Decode & Schedule │    │
//! │  │  Decoder   │   │   Store    │   │     Pipeline      │    │
//! │  └────────────┘   └────────────┘   └───────────────────┘    │
//! │                         ↑                    ↓               │
//! │  ┌────────────┐   ┌────────────┐   ┌───────────────────┐    │
//! │  │  Renderer  │ ← │   Viseme   │ ← │ Playback Timeline │    │
//! │  │ (per frame)│   │  Sampler   │   │  (origin + ends)  │    │
//! │  └────────────┘   └────────────┘   └───────────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Chunks decode concurrently but schedule strictly in arrival order; a new
//! utterance supersedes the old one atomically, letting audio already on
//! the device drain naturally. The renderer's per-frame query never blocks
//! on decode work.

pub mod decode;
pub mod engine;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod protocol;
pub mod sampler;
pub mod store;
pub mod timeline;

pub use decode::{AudioDecoder, ChunkFormat, DecodedAudio, Pcm16Decoder, WavDecoder};
pub use engine::{EngineConfig, PlaybackEngine};
pub use error::{AvatarError, AvatarResult};
pub use output::{AudioOutput, NullOutput, RodioOutput, ScheduleLog};
pub use pipeline::PipelineConfig;
pub use protocol::{parse_event, ServerEvent, Viseme};
pub use sampler::{intensity, sample, AvatarView, UNKNOWN_VISEME_INTENSITY};
pub use store::{PendingChunk, PlaybackStore};
pub use timeline::{Segment, SharedTimeline, Timeline, SCHEDULE_LOOKAHEAD};
