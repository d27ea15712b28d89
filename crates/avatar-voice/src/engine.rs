//! Playback engine - the main coordination layer
//!
//! Ties the event decoder, state store, pipeline, timeline and sampler
//! together. The transport collaborator feeds inbound frames in here; the
//! renderer polls the [`AvatarView`] it hands out. There is no synchronous
//! call path between the two.

use crate::decode::{AudioDecoder, ChunkFormat};
use crate::error::AvatarResult;
use crate::output::{AudioOutput, RodioOutput};
use crate::pipeline::{spawn_pipeline, PipelineCommand, PipelineConfig};
use crate::protocol::{parse_event, ServerEvent};
use crate::sampler::AvatarView;
use crate::store::PlaybackStore;
use crate::timeline::SharedTimeline;
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Configuration for the playback engine
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub pipeline: PipelineConfig,
}

/// The streaming playback and viseme-synchronization engine.
///
/// One instance per client session. All state is in-memory and
/// utterance-scoped; nothing survives the engine.
pub struct PlaybackEngine {
    store: Arc<PlaybackStore>,
    timeline: SharedTimeline,
    cmd_tx: Option<mpsc::UnboundedSender<PipelineCommand>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl PlaybackEngine {
    /// Create an engine with an explicit decoder and output factory.
    ///
    /// `decoder` handles the raw streamed fragments; the non-streaming
    /// fallback blob is always decoded container-aware, regardless of it.
    /// `make_output` runs on the pipeline thread (device handles are not
    /// `Send` on some platforms).
    pub fn new<F>(config: EngineConfig, decoder: Arc<dyn AudioDecoder>, make_output: F) -> Self
    where
        F: FnOnce() -> AvatarResult<Box<dyn AudioOutput>> + Send + 'static,
    {
        info!("Engine: initializing playback engine");
        let store = Arc::new(PlaybackStore::new());
        let timeline = SharedTimeline::new(config.pipeline.lookahead);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let worker = spawn_pipeline(
            config.pipeline,
            Arc::clone(&store),
            timeline.clone(),
            decoder,
            make_output,
            cmd_rx,
        );
        Self {
            store,
            timeline,
            cmd_tx: Some(cmd_tx),
            worker: Some(worker),
        }
    }

    /// Create an engine playing on the default audio device.
    pub fn with_default_output(config: EngineConfig, decoder: Arc<dyn AudioDecoder>) -> Self {
        Self::new(config, decoder, || {
            RodioOutput::new().map(|o| Box::new(o) as Box<dyn AudioOutput>)
        })
    }

    /// Parse and apply one raw transport frame.
    ///
    /// A malformed frame is logged and dropped; it never affects the frames
    /// behind it.
    pub fn handle_raw(&self, raw: &str) {
        match parse_event(raw) {
            Ok(event) => self.handle_event(event),
            Err(e) => warn!("Engine: dropping malformed event: {}", e),
        }
    }

    /// Apply one typed inbound event.
    pub fn handle_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::AudioStart { text, sample_rate } => {
                if let Some(rate) = sample_rate {
                    debug!("Engine: stream opened at {}Hz", rate);
                }
                let generation = self.store.begin_utterance(&text);
                self.send(PipelineCommand::BeginUtterance { generation });
            }
            ServerEvent::VisemeData { visemes } => {
                debug!("Engine: {} visemes attached", visemes.len());
                self.store.attach_visemes(visemes);
            }
            ServerEvent::AudioChunk { audio } => {
                if self.store.append_chunk(ChunkFormat::Stream, audio).is_some() {
                    self.send(PipelineCommand::ChunkArrived {
                        generation: self.store.generation(),
                    });
                } else {
                    warn!("Engine: audio chunk outside an open stream, dropped");
                }
            }
            ServerEvent::AudioEnd => {
                self.store.end_utterance();
                self.send(PipelineCommand::EndOfStream {
                    generation: self.store.generation(),
                });
            }
            // Non-streaming fallback: expand into a one-chunk stream so a
            // single playback path handles both delivery modes. The blob is
            // a WAV file, not a raw fragment, so it is tagged for the
            // container-aware decoder.
            ServerEvent::AudioResponse {
                text,
                audio,
                visemes,
            } => {
                let generation = self.store.begin_utterance(&text);
                self.store.attach_visemes(visemes);
                self.send(PipelineCommand::BeginUtterance { generation });
                if self
                    .store
                    .append_chunk(ChunkFormat::Container, audio)
                    .is_some()
                {
                    self.send(PipelineCommand::ChunkArrived { generation });
                }
                self.store.end_utterance();
                self.send(PipelineCommand::EndOfStream { generation });
            }
            ServerEvent::Unknown => {
                warn!("Engine: dropping unrecognized event type");
            }
        }
    }

    /// Read-only handle for the renderer, polled once per animation frame.
    pub fn view(&self) -> AvatarView {
        AvatarView::new(Arc::clone(&self.store), self.timeline.clone())
    }

    /// Discard all playback state and return to idle. Used when the
    /// transport disconnects mid-utterance.
    pub fn reset(&self) {
        self.store.reset();
        self.send(PipelineCommand::Reset);
    }

    /// Stop the pipeline thread and wait for it to exit.
    pub fn shutdown(mut self) {
        // Closing the command channel ends the worker loop.
        self.cmd_tx = None;
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("Engine: pipeline thread panicked during shutdown");
            }
        }
    }

    fn send(&self, cmd: PipelineCommand) {
        let delivered = self
            .cmd_tx
            .as_ref()
            .map(|tx| tx.send(cmd).is_ok())
            .unwrap_or(false);
        if !delivered {
            warn!("Engine: pipeline is gone, command dropped");
        }
    }
}
