//! Playback timeline - the authoritative clock origin for one utterance
//!
//! Maps the audio-device clock to elapsed utterance time. The origin is set
//! exactly once per utterance, when the first chunk is about to be
//! scheduled, with a small fixed lookahead so the first chunk's decode
//! latency never causes an audible late start. Both chunk scheduling and
//! per-frame viseme lookups measure against this one origin.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Lookahead added when establishing an utterance origin. Absorbs decode
/// jitter for the first chunk (the original client used 100ms).
pub const SCHEDULE_LOOKAHEAD: Duration = Duration::from_millis(100);

/// A scheduled audio segment, as offsets from the utterance origin.
///
/// Contiguity invariant: for consecutive scheduled chunks i and i+1 of one
/// utterance, `end(i) == start(i+1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: Duration,
    pub end: Duration,
}

/// Per-utterance mapping from device clock to elapsed utterance time.
#[derive(Debug)]
pub struct Timeline {
    origin: Option<Instant>,
    last_end: Duration,
    lookahead: Duration,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new(SCHEDULE_LOOKAHEAD)
    }
}

impl Timeline {
    pub fn new(lookahead: Duration) -> Self {
        Self {
            origin: None,
            last_end: Duration::ZERO,
            lookahead,
        }
    }

    /// Reserve the next contiguous slot for a decoded segment.
    ///
    /// The first call of an utterance sets the origin to now + lookahead and
    /// returns `[0, duration)`; each later call starts exactly where the
    /// previous one ended.
    pub fn schedule_next(&mut self, duration: Duration) -> Segment {
        if self.origin.is_none() {
            self.origin = Some(Instant::now() + self.lookahead);
            self.last_end = Duration::ZERO;
        }
        let start = self.last_end;
        let end = start + duration;
        self.last_end = end;
        Segment { start, end }
    }

    /// Elapsed utterance time, or `None` if no origin has been set.
    /// Clamped to zero while still inside the lookahead window.
    pub fn elapsed(&self) -> Option<Duration> {
        self.origin
            .map(|origin| Instant::now().saturating_duration_since(origin))
    }

    /// End offset of the most recently scheduled segment.
    pub fn last_end(&self) -> Duration {
        self.last_end
    }

    /// Device-clock instant at which all scheduled audio will have played.
    pub fn drain_deadline(&self) -> Option<Instant> {
        self.origin.map(|origin| origin + self.last_end)
    }

    /// Whether an origin has been established for the current utterance.
    pub fn is_started(&self) -> bool {
        self.origin.is_some()
    }

    /// Forget the origin; the utterance is idle or was superseded.
    pub fn clear(&mut self) {
        self.origin = None;
        self.last_end = Duration::ZERO;
    }
}

/// Timeline shared between the pipeline (writer) and the sampler (reader).
///
/// Lock hold times are a few arithmetic operations; the renderer's per-frame
/// query never blocks on decode work.
#[derive(Debug, Clone, Default)]
pub struct SharedTimeline {
    inner: Arc<Mutex<Timeline>>,
}

impl SharedTimeline {
    pub fn new(lookahead: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Timeline::new(lookahead))),
        }
    }

    pub fn schedule_next(&self, duration: Duration) -> Segment {
        self.inner
            .lock()
            .expect("timeline mutex poisoned")
            .schedule_next(duration)
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.inner.lock().expect("timeline mutex poisoned").elapsed()
    }

    pub fn drain_deadline(&self) -> Option<Instant> {
        self.inner
            .lock()
            .expect("timeline mutex poisoned")
            .drain_deadline()
    }

    pub fn clear(&self) {
        self.inner.lock().expect("timeline mutex poisoned").clear()
    }
}
