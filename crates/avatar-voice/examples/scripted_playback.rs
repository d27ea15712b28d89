//! Example: scripted playback, both delivery modes
//!
//! Feeds the engine the same JSON frames the inference server emits: first a
//! streamed utterance (start, visemes, audio chunks, end), then the
//! non-streaming fallback that carries a whole utterance as one WAV blob.
//! Between frames it polls the renderer view at ~30fps and prints the
//! mouth-intensity signal.
//!
//! Run with `--headless` on machines without an audio device.

use avatar_voice::{
    AudioOutput, AvatarView, EngineConfig, NullOutput, Pcm16Decoder, PlaybackEngine,
};
use base64::Engine as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const SAMPLE_RATE: u32 = 16_000;

/// PCM16 bytes for `ms` milliseconds of a quiet sine tone.
fn tone_pcm(ms: u64, hz: f64) -> Vec<u8> {
    let frames = SAMPLE_RATE as u64 * ms / 1000;
    let mut bytes = Vec::with_capacity(frames as usize * 2);
    for n in 0..frames {
        let t = n as f64 / SAMPLE_RATE as f64;
        let sample = ((t * hz * std::f64::consts::TAU).sin() * 0.2 * i16::MAX as f64) as i16;
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

fn tone_chunk_b64(ms: u64, hz: f64) -> String {
    base64::engine::general_purpose::STANDARD.encode(tone_pcm(ms, hz))
}

/// A complete WAV file holding `ms` milliseconds of tone, base64-encoded -
/// the payload shape of the `audio_response` fallback.
fn tone_wav_b64(ms: u64, hz: f64) -> String {
    let data = tone_pcm(ms, hz);
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
    base64::engine::general_purpose::STANDARD.encode(wav)
}

/// Poll like a renderer would, one query per animation frame.
async fn poll_mouth(view: &AvatarView) {
    while view.is_utterance_active() {
        let intensity = view.current_intensity();
        let bar = "#".repeat((intensity * 30.0) as usize);
        info!("mouth {:>5.2} |{:<30}|", intensity, bar);
        tokio::time::sleep(Duration::from_millis(33)).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let headless = std::env::args().any(|a| a == "--headless");
    let decoder = Arc::new(Pcm16Decoder::new(SAMPLE_RATE, 1));
    let engine = if headless {
        PlaybackEngine::new(EngineConfig::default(), decoder, || {
            let (output, _log) = NullOutput::new();
            Ok(Box::new(output) as Box<dyn AudioOutput>)
        })
    } else {
        PlaybackEngine::with_default_output(EngineConfig::default(), decoder)
    };
    let view = engine.view();

    let frames = vec![
        r#"{"type":"audio_start","text":"Hi, I am your campus companion."}"#.to_string(),
        r#"{"type":"viseme_data","visemes":[
            {"value":"kk","time":0.0,"duration":0.15},
            {"value":"aa","time":0.15,"duration":0.25},
            {"value":"ih","time":0.4,"duration":0.2},
            {"value":"PP","time":0.6,"duration":0.15},
            {"value":"oh","time":0.75,"duration":0.25}
        ]}"#
        .to_string(),
        format!(
            r#"{{"type":"audio_chunk","audio":"{}"}}"#,
            tone_chunk_b64(400, 440.0)
        ),
        format!(
            r#"{{"type":"audio_chunk","audio":"{}"}}"#,
            tone_chunk_b64(300, 330.0)
        ),
        format!(
            r#"{{"type":"audio_chunk","audio":"{}"}}"#,
            tone_chunk_b64(300, 550.0)
        ),
        r#"{"type":"audio_end"}"#.to_string(),
    ];

    info!("Feeding {} scripted streaming frames", frames.len());
    for frame in &frames {
        engine.handle_raw(frame);
    }
    info!("Subtitle: {}", view.current_subtitle_text());
    poll_mouth(&view).await;
    info!("Streamed utterance finished");

    // The legacy server path sends the whole utterance as one message.
    let fallback = format!(
        concat!(
            r#"{{"type":"audio_response","text":"And sometimes it all arrives at once.","#,
            r#""audio":"{}","visemes":["#,
            r#"{{"value":"aa","time":0.1,"duration":0.35}},"#,
            r#"{{"value":"ou","time":0.45,"duration":0.35}}]}}"#
        ),
        tone_wav_b64(900, 392.0)
    );
    info!("Feeding one complete-utterance fallback frame");
    engine.handle_raw(&fallback);
    info!("Subtitle: {}", view.current_subtitle_text());
    poll_mouth(&view).await;

    info!("Both utterances finished, engine idle");
    engine.shutdown();
    Ok(())
}
