//! Integration tests for the streaming playback engine
//!
//! All tests run headless against `NullOutput`; decode latency is simulated
//! with a delaying decoder so that decode completion order can be forced to
//! differ from chunk arrival order.

use avatar_voice::{
    AudioDecoder, AudioOutput, AvatarResult, DecodedAudio, EngineConfig, NullOutput,
    Pcm16Decoder, PlaybackEngine, ScheduleLog, ServerEvent, Viseme,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const SAMPLE_RATE: u32 = 16_000;

/// PCM16 bytes for `ms` milliseconds of mono silence at 16kHz.
fn pcm_chunk(ms: u64) -> Vec<u8> {
    vec![0u8; (SAMPLE_RATE as u64 * 2 * ms / 1000) as usize]
}

/// A complete WAV file holding `ms` milliseconds of 16kHz mono silence,
/// like the blob the non-streaming fallback carries.
fn wav_blob(ms: u64) -> Vec<u8> {
    let data = pcm_chunk(ms);
    let mut wav = Vec::with_capacity(44 + data.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data.len() as u32).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    wav.extend_from_slice(&(SAMPLE_RATE * 2).to_le_bytes()); // byte rate
    wav.extend_from_slice(&2u16.to_le_bytes()); // block align
    wav.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&(data.len() as u32).to_le_bytes());
    wav.extend_from_slice(&data);
    wav
}

/// Decoder that sleeps a configured time per chunk length before decoding,
/// simulating variable decode latency.
struct DelayedDecoder {
    delays: HashMap<usize, Duration>,
    inner: Pcm16Decoder,
}

impl DelayedDecoder {
    fn new(delays: &[(Vec<u8>, u64)]) -> Self {
        Self {
            delays: delays
                .iter()
                .map(|(bytes, ms)| (bytes.len(), Duration::from_millis(*ms)))
                .collect(),
            inner: Pcm16Decoder::new(SAMPLE_RATE, 1),
        }
    }
}

impl AudioDecoder for DelayedDecoder {
    fn decode(&self, bytes: &[u8]) -> AvatarResult<DecodedAudio> {
        if let Some(delay) = self.delays.get(&bytes.len()) {
            std::thread::sleep(*delay);
        }
        self.inner.decode(bytes)
    }
}

fn headless_engine(decoder: Arc<dyn AudioDecoder>) -> (PlaybackEngine, ScheduleLog) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (output, log) = NullOutput::new();
    let engine = PlaybackEngine::new(EngineConfig::default(), decoder, move || {
        Ok(Box::new(output) as Box<dyn AudioOutput>)
    });
    (engine, log)
}

fn start(engine: &PlaybackEngine, text: &str) {
    engine.handle_event(ServerEvent::AudioStart {
        text: text.into(),
        sample_rate: Some(SAMPLE_RATE),
    });
}

fn chunk(engine: &PlaybackEngine, bytes: Vec<u8>) {
    engine.handle_event(ServerEvent::AudioChunk { audio: bytes });
}

async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test]
async fn chunks_schedule_in_arrival_order_despite_reordered_decodes() {
    // A is long and slow to decode, B is short and fast, C in between:
    // decode completion order is B, C, A. Schedule order must stay A, B, C.
    let a = pcm_chunk(200);
    let b = pcm_chunk(50);
    let c = pcm_chunk(100);
    let decoder = DelayedDecoder::new(&[(a.clone(), 150), (b.clone(), 5), (c.clone(), 60)]);
    let (engine, log) = headless_engine(Arc::new(decoder));

    start(&engine, "ordered");
    chunk(&engine, a);
    chunk(&engine, b);
    chunk(&engine, c);
    engine.handle_event(ServerEvent::AudioEnd);

    settle(600).await;
    assert_eq!(
        log.durations(),
        vec![
            Duration::from_millis(200),
            Duration::from_millis(50),
            Duration::from_millis(100),
        ]
    );
    engine.shutdown();
}

#[tokio::test]
async fn decode_failure_skips_chunk_without_aborting_stream() {
    // The middle chunk has odd length, which the PCM16 decoder rejects.
    let decoder = Arc::new(Pcm16Decoder::new(SAMPLE_RATE, 1));
    let (engine, log) = headless_engine(decoder);

    start(&engine, "gap");
    chunk(&engine, pcm_chunk(100));
    chunk(&engine, vec![0u8; 7]);
    chunk(&engine, pcm_chunk(150));
    engine.handle_event(ServerEvent::AudioEnd);

    settle(400).await;
    assert_eq!(
        log.durations(),
        vec![Duration::from_millis(100), Duration::from_millis(150)]
    );
    engine.shutdown();
}

#[tokio::test]
async fn interruption_discards_unscheduled_backlog() {
    // U1's only chunk decodes slowly; U2 arrives before it finishes. The
    // stale decode must be discarded, and only U2's chunk scheduled against
    // a fresh origin.
    let u1_chunk = pcm_chunk(400);
    let u2_chunk = pcm_chunk(25);
    let decoder = DelayedDecoder::new(&[(u1_chunk.clone(), 250), (u2_chunk.clone(), 5)]);
    let (engine, log) = headless_engine(Arc::new(decoder));

    start(&engine, "first utterance");
    chunk(&engine, u1_chunk);

    settle(50).await;
    start(&engine, "second utterance");
    chunk(&engine, u2_chunk);
    engine.handle_event(ServerEvent::AudioEnd);

    settle(500).await;
    assert_eq!(log.durations(), vec![Duration::from_millis(25)]);
    assert_eq!(engine.view().current_subtitle_text(), "second utterance");
    engine.shutdown();
}

#[tokio::test]
async fn zero_chunk_utterance_goes_straight_to_idle() {
    let decoder = Arc::new(Pcm16Decoder::new(SAMPLE_RATE, 1));
    let (engine, log) = headless_engine(decoder);
    let view = engine.view();

    start(&engine, "silent");
    engine.handle_event(ServerEvent::AudioEnd);

    settle(200).await;
    assert!(log.is_empty());
    assert!(!view.is_utterance_active());
    assert_eq!(view.current_intensity(), 0.0);
    engine.shutdown();
}

#[tokio::test]
async fn utterance_becomes_inactive_after_playout() {
    let decoder = Arc::new(Pcm16Decoder::new(SAMPLE_RATE, 1));
    let (engine, log) = headless_engine(decoder);
    let view = engine.view();

    start(&engine, "short");
    chunk(&engine, pcm_chunk(50));
    engine.handle_event(ServerEvent::AudioEnd);

    settle(60).await;
    assert_eq!(log.len(), 1);
    // 100ms lookahead + 50ms audio; well past that everything has drained.
    settle(400).await;
    assert!(!view.is_utterance_active());
    assert_eq!(view.current_intensity(), 0.0);
    engine.shutdown();
}

#[tokio::test]
async fn complete_utterance_plays_as_one_chunk_stream() {
    // The engine is configured for raw PCM streaming, but the fallback blob
    // is a WAV file. It must go through the container-aware decoder: the
    // scheduled duration is exactly the audio's, with no header bytes
    // misread as samples.
    let decoder = Arc::new(Pcm16Decoder::new(SAMPLE_RATE, 1));
    let (engine, log) = headless_engine(decoder);
    let view = engine.view();

    engine.handle_event(ServerEvent::AudioResponse {
        text: "fallback".into(),
        audio: wav_blob(300),
        visemes: vec![Viseme {
            value: "aa".into(),
            time: 0.0,
            duration: 0.3,
        }],
    });

    settle(250).await;
    assert_eq!(log.durations(), vec![Duration::from_millis(300)]);
    assert_eq!(view.current_subtitle_text(), "fallback");
    // Mid-utterance (past the lookahead, inside the "aa" viseme window).
    assert!(view.is_utterance_active());
    assert_eq!(view.current_intensity(), 1.0);
    engine.shutdown();
}

#[tokio::test]
async fn utterance_stays_active_while_final_chunk_decodes() {
    // The stream closes while its only chunk is still decoding: nothing is
    // scheduled yet and no timeline origin exists, but the renderer must
    // not see an idle flicker before playback starts.
    let slow = pcm_chunk(40);
    let decoder = DelayedDecoder::new(&[(slow.clone(), 250)]);
    let (engine, log) = headless_engine(Arc::new(decoder));
    let view = engine.view();

    start(&engine, "no flicker");
    chunk(&engine, slow);
    engine.handle_event(ServerEvent::AudioEnd);

    settle(100).await;
    assert!(log.is_empty());
    assert!(view.is_utterance_active());

    // Decode finishes, 100ms lookahead + 40ms audio play out, then idle.
    settle(500).await;
    assert_eq!(log.len(), 1);
    assert!(!view.is_utterance_active());
    engine.shutdown();
}

/// Output whose device is permanently gone: every schedule and resume fails.
struct DeadOutput;

impl AudioOutput for DeadOutput {
    fn schedule(&mut self, _audio: &DecodedAudio) -> AvatarResult<()> {
        Err(avatar_voice::AvatarError::Device("no device".into()))
    }

    fn resume(&mut self) -> AvatarResult<()> {
        Err(avatar_voice::AvatarError::Device("no device".into()))
    }

    fn retire_utterance(&mut self) {}

    fn is_draining(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn persistent_device_failure_abandons_utterance() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let engine = PlaybackEngine::new(
        EngineConfig::default(),
        Arc::new(Pcm16Decoder::new(SAMPLE_RATE, 1)),
        || Ok(Box::new(DeadOutput) as Box<dyn AudioOutput>),
    );
    let view = engine.view();

    start(&engine, "doomed");
    chunk(&engine, pcm_chunk(100));

    settle(200).await;
    assert!(!view.is_utterance_active());
    assert_eq!(view.current_intensity(), 0.0);
    engine.shutdown();
}

#[tokio::test]
async fn reset_returns_to_idle() {
    let u1_chunk = pcm_chunk(500);
    let decoder = DelayedDecoder::new(&[(u1_chunk.clone(), 100)]);
    let (engine, log) = headless_engine(Arc::new(decoder));
    let view = engine.view();

    start(&engine, "reset me");
    chunk(&engine, u1_chunk);
    settle(20).await;
    engine.reset();

    settle(300).await;
    assert!(log.is_empty());
    assert!(!view.is_utterance_active());
    assert!(view.current_subtitle_text().is_empty());
    engine.shutdown();
}
