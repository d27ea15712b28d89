//! Audio output device seam
//!
//! [`AudioOutput`] is the boundary between the scheduling pipeline and the
//! physical device. [`RodioOutput`] appends each decoded segment to one
//! `rodio::Sink` per utterance, which plays queued sources back-to-back -
//! that queue is the gapless device schedule. A superseded utterance's sink
//! is retired, not stopped: audio already handed to the device finishes
//! naturally while the new utterance gets a fresh sink.
//!
//! [`NullOutput`] is the headless counterpart for tests and CI boxes with
//! no audio hardware: it accepts every segment and records what it was
//! asked to play.

use crate::decode::DecodedAudio;
use crate::error::{AvatarError, AvatarResult};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// Output device operations the pipeline needs. Implementations live on the
/// pipeline's own thread (audio streams are not `Send` on some platforms),
/// so no `Send` bound here.
pub trait AudioOutput {
    /// Queue one decoded segment immediately after the previous one.
    fn schedule(&mut self, audio: &DecodedAudio) -> AvatarResult<()>;

    /// Ask a suspended device to resume. Called once per failed scheduling
    /// attempt before giving up on the utterance.
    fn resume(&mut self) -> AvatarResult<()>;

    /// End the current utterance's queue. Already-queued audio drains
    /// naturally; future segments go to a fresh queue.
    fn retire_utterance(&mut self);

    /// Whether any queued audio is still playing out.
    fn is_draining(&self) -> bool;
}

/// Real audio output via rodio (default device).
pub struct RodioOutput {
    _stream: OutputStream,
    handle: OutputStreamHandle,
    sink: Option<Sink>,
    draining: Vec<Sink>,
}

impl RodioOutput {
    /// Open the default output device.
    pub fn new() -> AvatarResult<Self> {
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| AvatarError::Device(e.to_string()))?;
        info!("Output: default audio device ready");
        Ok(Self {
            _stream: stream,
            handle,
            sink: None,
            draining: Vec::new(),
        })
    }
}

impl AudioOutput for RodioOutput {
    fn schedule(&mut self, audio: &DecodedAudio) -> AvatarResult<()> {
        if self.sink.is_none() {
            let sink = Sink::try_new(&self.handle)
                .map_err(|e| AvatarError::Device(e.to_string()))?;
            self.sink = Some(sink);
        }
        if let Some(sink) = &self.sink {
            let buffer = SamplesBuffer::new(
                audio.channels,
                audio.sample_rate,
                audio.samples.clone(),
            );
            sink.append(buffer);
        }
        Ok(())
    }

    fn resume(&mut self) -> AvatarResult<()> {
        if let Some(sink) = &self.sink {
            sink.play();
        }
        Ok(())
    }

    fn retire_utterance(&mut self) {
        // Dropping a sink cuts it off; retired sinks are kept alive until
        // their queue has played out.
        self.draining.retain(|sink| !sink.empty());
        if let Some(sink) = self.sink.take() {
            if !sink.empty() {
                self.draining.push(sink);
            }
        }
    }

    fn is_draining(&self) -> bool {
        let current = self.sink.as_ref().map(|s| !s.empty()).unwrap_or(false);
        current || self.draining.iter().any(|s| !s.empty())
    }
}

/// Record of what a [`NullOutput`] was asked to schedule, in order.
#[derive(Debug, Clone, Default)]
pub struct ScheduleLog {
    entries: Arc<Mutex<Vec<Duration>>>,
}

impl ScheduleLog {
    /// Durations of scheduled segments, in scheduling order.
    pub fn durations(&self) -> Vec<Duration> {
        self.entries.lock().expect("schedule log mutex poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("schedule log mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, duration: Duration) {
        self.entries
            .lock()
            .expect("schedule log mutex poisoned")
            .push(duration);
    }
}

/// Headless output: accepts every segment and records its duration.
#[derive(Debug, Default)]
pub struct NullOutput {
    log: ScheduleLog,
}

impl NullOutput {
    /// Build the output plus a shared handle to its schedule log.
    pub fn new() -> (Self, ScheduleLog) {
        let log = ScheduleLog::default();
        (Self { log: log.clone() }, log)
    }
}

impl AudioOutput for NullOutput {
    fn schedule(&mut self, audio: &DecodedAudio) -> AvatarResult<()> {
        self.log.push(audio.duration());
        Ok(())
    }

    fn resume(&mut self) -> AvatarResult<()> {
        Ok(())
    }

    fn retire_utterance(&mut self) {}

    fn is_draining(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_output_records_schedule_order() {
        let (mut output, log) = NullOutput::new();
        let chunk = |ms: u64| DecodedAudio {
            samples: vec![0.0; (16 * ms) as usize],
            channels: 1,
            sample_rate: 16_000,
        };
        output.schedule(&chunk(100)).unwrap();
        output.schedule(&chunk(50)).unwrap();
        assert_eq!(
            log.durations(),
            vec![Duration::from_millis(100), Duration::from_millis(50)]
        );
        assert!(!output.is_draining());
    }
}
