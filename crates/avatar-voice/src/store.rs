//! Playback state store - single source of truth for the current utterance
//!
//! Holds the subtitle text, viseme timeline, pending chunk backlog and
//! streaming flag. Every public method is one atomic transition behind a
//! mutex; readers (pipeline, sampler, UI) always observe a fully-updated
//! state. `begin_utterance` supersedes the previous utterance by bumping a
//! generation counter and discarding its unscheduled backlog in the same
//! transition - a superseded backlog is never partially drained.

use crate::decode::ChunkFormat;
use crate::protocol::Viseme;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

/// An encoded chunk waiting for the pipeline, tagged with its arrival index.
#[derive(Debug, Clone)]
pub struct PendingChunk {
    /// Arrival sequence within the utterance, starting at 0.
    pub seq: u64,
    /// Wire format of `bytes`; the pipeline picks the decoder from it.
    pub format: ChunkFormat,
    /// Opaque encoded audio bytes.
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct StoreState {
    subtitle: String,
    visemes: Vec<Viseme>,
    pending: VecDeque<PendingChunk>,
    streaming: bool,
    /// True from `begin_utterance` until the pipeline reports playout
    /// complete (or the utterance is reset). Outlives `streaming`: the
    /// stream can close while chunks are still decoding or playing.
    active: bool,
    generation: u64,
    next_seq: u64,
}

/// Process-wide playback state, mutated only through the action methods.
#[derive(Debug, Default)]
pub struct PlaybackStore {
    state: Mutex<StoreState>,
}

impl PlaybackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new utterance, superseding any prior one.
    ///
    /// Clears the previous backlog and viseme list atomically and returns
    /// the new generation. Chunks of the old generation still in flight are
    /// identified (and discarded) by the pipeline via this counter.
    pub fn begin_utterance(&self, text: &str) -> u64 {
        let mut s = self.state.lock().expect("store mutex poisoned");
        s.generation += 1;
        s.subtitle = text.to_string();
        s.visemes.clear();
        s.pending.clear();
        s.streaming = true;
        s.active = true;
        s.next_seq = 0;
        debug!("Store: utterance {} started ({:?})", s.generation, text);
        s.generation
    }

    /// Attach the viseme timeline for the current utterance.
    pub fn attach_visemes(&self, visemes: Vec<Viseme>) {
        let mut s = self.state.lock().expect("store mutex poisoned");
        s.visemes = visemes;
    }

    /// Append an encoded chunk to the backlog.
    ///
    /// Returns the chunk's arrival sequence, or `None` if no stream is open
    /// (chunks arriving after `end_utterance` are refused).
    pub fn append_chunk(&self, format: ChunkFormat, bytes: Vec<u8>) -> Option<u64> {
        let mut s = self.state.lock().expect("store mutex poisoned");
        if !s.streaming {
            debug!("Store: chunk refused, no open stream");
            return None;
        }
        let seq = s.next_seq;
        s.next_seq += 1;
        s.pending.push_back(PendingChunk { seq, format, bytes });
        Some(seq)
    }

    /// Close the current utterance's stream; no further chunks accepted.
    /// The utterance stays active until its playout completes.
    pub fn end_utterance(&self) {
        let mut s = self.state.lock().expect("store mutex poisoned");
        s.streaming = false;
    }

    /// Pipeline-side: the utterance's audio has fully played out (or was
    /// abandoned). Ignored for a stale generation, so a superseded
    /// utterance finishing late cannot deactivate its successor.
    pub fn finish_utterance(&self, generation: u64) {
        let mut s = self.state.lock().expect("store mutex poisoned");
        if s.generation == generation {
            s.active = false;
        }
    }

    /// Drop all state back to idle. The generation still advances so that
    /// in-flight work for the cleared utterance is recognized as stale.
    pub fn reset(&self) {
        let mut s = self.state.lock().expect("store mutex poisoned");
        s.generation += 1;
        s.subtitle.clear();
        s.visemes.clear();
        s.pending.clear();
        s.streaming = false;
        s.active = false;
        s.next_seq = 0;
    }

    /// Drain the pending backlog, pipeline-side.
    ///
    /// Yields nothing when `generation` is stale: a superseded utterance's
    /// backlog was already discarded by `begin_utterance` and must never
    /// leak into the new one.
    pub fn take_pending(&self, generation: u64) -> Vec<PendingChunk> {
        let mut s = self.state.lock().expect("store mutex poisoned");
        if s.generation != generation {
            return Vec::new();
        }
        s.pending.drain(..).collect()
    }

    /// Subtitle text of the current utterance.
    pub fn subtitle(&self) -> String {
        self.state.lock().expect("store mutex poisoned").subtitle.clone()
    }

    /// Snapshot of the current viseme timeline (short, one utterance).
    pub fn visemes(&self) -> Vec<Viseme> {
        self.state.lock().expect("store mutex poisoned").visemes.clone()
    }

    /// Whether more chunks are expected for the current utterance.
    pub fn is_streaming(&self) -> bool {
        self.state.lock().expect("store mutex poisoned").streaming
    }

    /// Whether an utterance is live, from `begin_utterance` until the
    /// pipeline reports its playout complete.
    pub fn is_active(&self) -> bool {
        self.state.lock().expect("store mutex poisoned").active
    }

    /// Current utterance generation.
    pub fn generation(&self) -> u64 {
        self.state.lock().expect("store mutex poisoned").generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_utterance_supersedes_backlog() {
        let store = PlaybackStore::new();
        let g1 = store.begin_utterance("first");
        store.append_chunk(ChunkFormat::Stream, vec![1]).unwrap();
        store.append_chunk(ChunkFormat::Stream, vec![2]).unwrap();

        let g2 = store.begin_utterance("second");
        assert_ne!(g1, g2);
        // Old backlog is gone; draining with the stale generation yields nothing.
        assert!(store.take_pending(g1).is_empty());
        assert!(store.take_pending(g2).is_empty());
        assert_eq!(store.subtitle(), "second");
    }

    #[test]
    fn chunks_after_end_are_refused() {
        let store = PlaybackStore::new();
        let gen = store.begin_utterance("hi");
        assert_eq!(store.append_chunk(ChunkFormat::Stream, vec![1]), Some(0));
        store.end_utterance();
        assert_eq!(store.append_chunk(ChunkFormat::Stream, vec![2]), None);
        let pending = store.take_pending(gen);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].seq, 0);
    }

    #[test]
    fn sequence_numbers_follow_arrival_order() {
        let store = PlaybackStore::new();
        let gen = store.begin_utterance("hi");
        for i in 0..5u64 {
            assert_eq!(store.append_chunk(ChunkFormat::Stream, vec![i as u8]), Some(i));
        }
        let pending = store.take_pending(gen);
        let seqs: Vec<u64> = pending.iter().map(|c| c.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn chunk_format_survives_the_backlog() {
        let store = PlaybackStore::new();
        let gen = store.begin_utterance("fallback");
        store.append_chunk(ChunkFormat::Container, vec![1, 2, 3]);
        let pending = store.take_pending(gen);
        assert_eq!(pending[0].format, ChunkFormat::Container);
    }

    #[test]
    fn utterance_stays_active_after_stream_end_until_finished() {
        let store = PlaybackStore::new();
        let gen = store.begin_utterance("hi");
        store.end_utterance();
        assert!(!store.is_streaming());
        assert!(store.is_active());
        store.finish_utterance(gen);
        assert!(!store.is_active());
    }

    #[test]
    fn stale_finish_does_not_deactivate_successor() {
        let store = PlaybackStore::new();
        let g1 = store.begin_utterance("one");
        let g2 = store.begin_utterance("two");
        store.finish_utterance(g1);
        assert!(store.is_active());
        store.finish_utterance(g2);
        assert!(!store.is_active());
    }

    #[test]
    fn reset_clears_everything() {
        let store = PlaybackStore::new();
        store.begin_utterance("hi");
        store.attach_visemes(vec![Viseme {
            value: "aa".into(),
            time: 0.0,
            duration: 0.3,
        }]);
        store.append_chunk(ChunkFormat::Stream, vec![1]);
        store.reset();
        assert!(!store.is_streaming());
        assert!(!store.is_active());
        assert!(store.subtitle().is_empty());
        assert!(store.visemes().is_empty());
    }
}
