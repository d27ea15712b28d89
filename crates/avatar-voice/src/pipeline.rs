//! Chunk decode-and-schedule pipeline
//!
//! Consumes encoded chunks in arrival order, decodes them concurrently, and
//! schedules the results strictly in sequence for gapless playback. The
//! per-utterance state machine is
//! `Idle -> Priming -> Streaming -> Draining -> Idle`.
//!
//! Decode completion order is not arrival order: a short chunk can finish
//! decoding before a long predecessor. Completions are therefore parked in
//! a sequence-indexed map and flushed only when the next expected sequence
//! is present. A failed decode skips that sequence (a brief silence) without
//! advancing the scheduled end time for it and without aborting the stream.
//!
//! The pipeline runs on a dedicated thread driving its own tokio runtime;
//! audio output handles are not `Send` on some platforms, so the output is
//! constructed inside that thread and never leaves it.

use crate::decode::{AudioDecoder, ChunkFormat, DecodedAudio, WavDecoder};
use crate::error::AvatarResult;
use crate::output::AudioOutput;
use crate::store::{PendingChunk, PlaybackStore};
use crate::timeline::{SharedTimeline, SCHEDULE_LOOKAHEAD};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Configuration for the decode-and-schedule pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Added to "now" when establishing an utterance origin, to absorb the
    /// first chunk's decode latency (default: 100ms).
    pub lookahead: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lookahead: SCHEDULE_LOOKAHEAD,
        }
    }
}

/// Commands from the engine to the pipeline thread.
#[derive(Debug)]
pub enum PipelineCommand {
    /// A new utterance supersedes whatever is in progress.
    BeginUtterance { generation: u64 },
    /// The store backlog for this generation has new chunks.
    ChunkArrived { generation: u64 },
    /// No further chunks for this generation.
    EndOfStream { generation: u64 },
    /// Discard everything and return to idle.
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    Idle,
    /// First chunk decoding; timeline origin not yet set.
    Priming,
    /// Origin set; chunks scheduled as they decode.
    Streaming,
    /// Stream ended; remaining backlog still being scheduled or played.
    Draining,
}

struct DecodeResult {
    generation: u64,
    seq: u64,
    outcome: AvatarResult<DecodedAudio>,
}

/// Spawn the pipeline worker thread.
///
/// `make_output` runs on the worker thread so that non-`Send` device handles
/// never cross threads. Returns the join handle; the worker exits when the
/// command channel closes.
pub(crate) fn spawn_pipeline<F>(
    config: PipelineConfig,
    store: Arc<PlaybackStore>,
    timeline: SharedTimeline,
    decoder: Arc<dyn AudioDecoder>,
    make_output: F,
    cmd_rx: mpsc::UnboundedReceiver<PipelineCommand>,
) -> thread::JoinHandle<()>
where
    F: FnOnce() -> AvatarResult<Box<dyn AudioOutput>> + Send + 'static,
{
    thread::spawn(move || {
        let output = match make_output() {
            Ok(o) => o,
            Err(e) => {
                error!("Pipeline: audio output init failed: {}", e);
                return;
            }
        };
        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                error!("Pipeline: runtime init failed: {}", e);
                return;
            }
        };
        let (decode_tx, decode_rx) = mpsc::unbounded_channel();
        let worker = PipelineWorker {
            config,
            store,
            timeline,
            stream_decoder: decoder,
            container_decoder: Arc::new(WavDecoder),
            output,
            state: PipelineState::Idle,
            generation: 0,
            next_seq: 0,
            parked: BTreeMap::new(),
            inflight: 0,
            end_of_stream: false,
            idle_at: None,
            decode_tx,
        };
        rt.block_on(worker.run(cmd_rx, decode_rx));
    })
}

struct PipelineWorker {
    config: PipelineConfig,
    store: Arc<PlaybackStore>,
    timeline: SharedTimeline,
    /// Decodes raw streamed fragments (format announced at stream start).
    stream_decoder: Arc<dyn AudioDecoder>,
    /// Decodes the self-describing fallback blob.
    container_decoder: Arc<dyn AudioDecoder>,
    output: Box<dyn AudioOutput>,

    state: PipelineState,
    /// Utterance generation currently owned by the pipeline.
    generation: u64,
    /// Next arrival sequence to schedule; never decreases within an utterance.
    next_seq: u64,
    /// Decode completions waiting for their predecessors.
    parked: BTreeMap<u64, AvatarResult<DecodedAudio>>,
    /// Decodes in flight for the current generation.
    inflight: usize,
    end_of_stream: bool,
    /// When set, the instant at which all scheduled audio has played and the
    /// pipeline may go idle.
    idle_at: Option<Instant>,

    decode_tx: mpsc::UnboundedSender<DecodeResult>,
}

impl PipelineWorker {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<PipelineCommand>,
        mut decode_rx: mpsc::UnboundedReceiver<DecodeResult>,
    ) {
        info!(
            "Pipeline: started ({}ms lookahead)",
            self.config.lookahead.as_millis()
        );
        loop {
            let idle_at = self.idle_at;
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(result) = decode_rx.recv() => self.handle_decode(result),
                _ = sleep_until_opt(idle_at), if idle_at.is_some() => self.finish_to_idle(),
            }
        }
        debug!("Pipeline: command channel closed, worker exiting");
    }

    fn handle_command(&mut self, cmd: PipelineCommand) {
        match cmd {
            PipelineCommand::BeginUtterance { generation } => {
                self.begin_utterance(generation)
            }
            PipelineCommand::ChunkArrived { generation } => {
                self.drain_backlog(generation)
            }
            PipelineCommand::EndOfStream { generation } => {
                self.end_of_stream(generation)
            }
            PipelineCommand::Reset => self.reset(),
        }
    }

    /// Enter `Priming` for a new generation, superseding any current work.
    ///
    /// The unscheduled backlog was already discarded by the store; here we
    /// drop parked decodes, forget in-flight ones (their completions arrive
    /// with a stale generation and are ignored), retire the device queue so
    /// already-scheduled audio drains naturally, and reset the timeline.
    fn begin_utterance(&mut self, generation: u64) {
        if self.state != PipelineState::Idle {
            info!(
                "Pipeline: utterance {} supersedes {} (state {:?})",
                generation, self.generation, self.state
            );
        }
        self.generation = generation;
        self.next_seq = 0;
        self.parked.clear();
        self.inflight = 0;
        self.end_of_stream = false;
        self.idle_at = None;
        self.timeline.clear();
        self.output.retire_utterance();
        self.state = PipelineState::Priming;
    }

    /// Pull newly arrived chunks for `generation` and decode them eagerly.
    fn drain_backlog(&mut self, generation: u64) {
        if generation != self.generation {
            debug!("Pipeline: chunk notification for stale utterance {}", generation);
            return;
        }
        if self.state == PipelineState::Idle {
            return;
        }
        for chunk in self.store.take_pending(generation) {
            self.spawn_decode(generation, chunk);
        }
    }

    fn spawn_decode(&mut self, generation: u64, chunk: PendingChunk) {
        let decoder = match chunk.format {
            ChunkFormat::Stream => Arc::clone(&self.stream_decoder),
            ChunkFormat::Container => Arc::clone(&self.container_decoder),
        };
        let tx = self.decode_tx.clone();
        self.inflight += 1;
        tokio::task::spawn_blocking(move || {
            let outcome = decoder.decode(&chunk.bytes);
            let _ = tx.send(DecodeResult {
                generation,
                seq: chunk.seq,
                outcome,
            });
        });
    }

    fn end_of_stream(&mut self, generation: u64) {
        if generation != self.generation || self.state == PipelineState::Idle {
            return;
        }
        // Commands are ordered, but a final chunk notification can coalesce
        // with the end marker; drain whatever is left first.
        for chunk in self.store.take_pending(generation) {
            self.spawn_decode(generation, chunk);
        }
        self.end_of_stream = true;
        if self.state == PipelineState::Priming && self.inflight == 0 && self.parked.is_empty() {
            // Zero-chunk utterance: straight back to idle, origin never set.
            info!("Pipeline: utterance {} ended with no audio", generation);
            self.finish_to_idle();
            return;
        }
        self.state = PipelineState::Draining;
        self.maybe_finish();
    }

    fn reset(&mut self) {
        self.parked.clear();
        self.inflight = 0;
        self.end_of_stream = false;
        self.idle_at = None;
        self.timeline.clear();
        self.output.retire_utterance();
        self.state = PipelineState::Idle;
        info!("Pipeline: reset to idle");
    }

    fn handle_decode(&mut self, result: DecodeResult) {
        if result.generation != self.generation || self.state == PipelineState::Idle {
            debug!(
                "Pipeline: discarding decode for superseded utterance {} (chunk {})",
                result.generation, result.seq
            );
            return;
        }
        self.inflight = self.inflight.saturating_sub(1);
        self.parked.insert(result.seq, result.outcome);
        self.flush_ready();
        self.maybe_finish();
    }

    /// Schedule every parked chunk whose turn has come, strictly in arrival
    /// order. A chunk decoded ahead of its predecessor stays parked.
    fn flush_ready(&mut self) {
        while let Some(outcome) = self.parked.remove(&self.next_seq) {
            let seq = self.next_seq;
            self.next_seq += 1;
            match outcome {
                Ok(audio) => {
                    let segment = self.timeline.schedule_next(audio.duration());
                    if let Err(e) = self.schedule_on_device(&audio) {
                        warn!("Pipeline: device unavailable, abandoning utterance: {}", e);
                        self.abandon_utterance();
                        return;
                    }
                    debug!(
                        "Pipeline: chunk {} scheduled [{:?} .. {:?}]",
                        seq, segment.start, segment.end
                    );
                    if self.state == PipelineState::Priming {
                        self.state = PipelineState::Streaming;
                    }
                }
                Err(e) => {
                    // Skipped chunk: a brief gap in the audio, but later
                    // chunks and the viseme timeline are unaffected.
                    warn!("Pipeline: chunk {} decode failed, skipping: {}", seq, e);
                }
            }
        }
    }

    /// One resume attempt per scheduling attempt before giving up.
    fn schedule_on_device(&mut self, audio: &DecodedAudio) -> AvatarResult<()> {
        match self.output.schedule(audio) {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!("Pipeline: schedule failed ({}), resuming device", first);
                self.output.resume()?;
                self.output.schedule(audio)
            }
        }
    }

    /// Persistent device failure: drop the utterance and go idle.
    fn abandon_utterance(&mut self) {
        self.store.end_utterance();
        self.store.finish_utterance(self.generation);
        self.parked.clear();
        self.inflight = 0;
        self.end_of_stream = false;
        self.idle_at = None;
        self.timeline.clear();
        self.output.retire_utterance();
        self.state = PipelineState::Idle;
    }

    /// Once the stream has ended and every chunk is decoded and scheduled,
    /// arm the idle transition for when the last segment finishes playing.
    fn maybe_finish(&mut self) {
        if !self.end_of_stream || self.inflight > 0 || !self.parked.is_empty() {
            return;
        }
        match self.timeline.drain_deadline() {
            None => self.finish_to_idle(),
            Some(deadline) if deadline <= Instant::now() && !self.output.is_draining() => {
                self.finish_to_idle()
            }
            Some(deadline) => {
                self.state = PipelineState::Draining;
                self.idle_at = Some(deadline);
            }
        }
    }

    fn finish_to_idle(&mut self) {
        if self.state != PipelineState::Idle {
            info!("Pipeline: utterance {} complete, idle", self.generation);
        }
        // Stale-generation finishes are ignored store-side.
        self.store.finish_utterance(self.generation);
        self.timeline.clear();
        self.idle_at = None;
        self.end_of_stream = false;
        self.state = PipelineState::Idle;
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at.into()).await,
        // Guarded out in the select; never polled without a deadline.
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_lookahead() {
        let config = PipelineConfig::default();
        assert_eq!(config.lookahead, Duration::from_millis(100));
    }
}
