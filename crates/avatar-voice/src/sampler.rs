//! Viseme sampling - "what should the mouth be doing right now"
//!
//! Pure lookup over one utterance's viseme timeline plus the renderer-facing
//! [`AvatarView`] polled once per animation frame. The view is read-only and
//! returns in bounded time (a scan over at most a few dozen entries); the
//! renderer owns interpolation and smoothing.

use crate::protocol::Viseme;
use crate::store::PlaybackStore;
use crate::timeline::SharedTimeline;
use std::sync::Arc;
use std::time::Duration;

/// Intensity for viseme identities outside the known vocabulary. Upstream
/// vocabularies may extend over time; an unknown mouth shape animates
/// faintly instead of erroring.
pub const UNKNOWN_VISEME_INTENSITY: f32 = 0.1;

/// Map a viseme identity to mouth-open intensity in [0, 1].
///
/// Oculus lip-sync vocabulary, same table the renderer used historically.
pub fn intensity(value: &str) -> f32 {
    match value {
        "sil" => 0.0,
        "PP" => 0.0,
        "FF" => 0.2,
        "TH" => 0.3,
        "DD" => 0.3,
        "kk" => 0.3,
        "CH" => 0.5,
        "SS" => 0.4,
        "nn" => 0.3,
        "RR" => 0.4,
        "aa" => 1.0,
        "E" => 0.8,
        "ih" => 0.6,
        "oh" => 0.9,
        "ou" => 0.9,
        _ => UNKNOWN_VISEME_INTENSITY,
    }
}

/// Resolve the active viseme at `elapsed` utterance time, if any.
///
/// Returns `None` in silence gaps and past the last viseme. Pure: the same
/// inputs always yield the same answer.
pub fn sample(visemes: &[Viseme], elapsed: Duration) -> Option<&Viseme> {
    let t = elapsed.as_secs_f64();
    visemes.iter().find(|v| v.contains(t))
}

/// Read-only per-frame query handle handed to the renderer.
#[derive(Clone)]
pub struct AvatarView {
    store: Arc<PlaybackStore>,
    timeline: SharedTimeline,
}

impl AvatarView {
    pub(crate) fn new(store: Arc<PlaybackStore>, timeline: SharedTimeline) -> Self {
        Self { store, timeline }
    }

    /// Mouth intensity for the current frame; 0.0 when idle or in a gap.
    pub fn current_intensity(&self) -> f32 {
        let Some(elapsed) = self.timeline.elapsed() else {
            return 0.0;
        };
        let visemes = self.store.visemes();
        sample(&visemes, elapsed)
            .map(|v| intensity(&v.value))
            .unwrap_or(0.0)
    }

    /// Whether an utterance is currently live, from its first event until
    /// its audio has fully played out.
    ///
    /// This is the store's liveness flag, not a timeline query: after the
    /// stream closes the timeline may not have started yet (first chunk
    /// still decoding), and the renderer must not see an idle flicker in
    /// that window.
    pub fn is_utterance_active(&self) -> bool {
        self.store.is_active()
    }

    /// Subtitle text for the current utterance.
    pub fn current_subtitle_text(&self) -> String {
        self.store.subtitle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viseme(value: &str, time: f64, duration: f64) -> Viseme {
        Viseme {
            value: value.to_string(),
            time,
            duration,
        }
    }

    fn secs(t: f64) -> Duration {
        Duration::from_secs_f64(t)
    }

    #[test]
    fn samples_active_viseme() {
        let visemes = vec![viseme("aa", 0.0, 0.3), viseme("PP", 0.3, 0.2)];
        assert_eq!(sample(&visemes, secs(0.1)).unwrap().value, "aa");
        // Contiguous boundary belongs to the successor.
        assert_eq!(sample(&visemes, secs(0.3)).unwrap().value, "PP");
        assert_eq!(sample(&visemes, secs(0.35)).unwrap().value, "PP");
    }

    #[test]
    fn past_the_end_is_none() {
        let visemes = vec![viseme("aa", 0.0, 0.3), viseme("PP", 0.3, 0.2)];
        assert!(sample(&visemes, secs(0.5)).is_none());
        assert!(sample(&visemes, secs(0.6)).is_none());
    }

    #[test]
    fn gaps_are_silence() {
        let visemes = vec![viseme("aa", 0.0, 0.2), viseme("E", 0.5, 0.2)];
        assert!(sample(&visemes, secs(0.3)).is_none());
        assert_eq!(sample(&visemes, secs(0.55)).unwrap().value, "E");
    }

    #[test]
    fn sampling_is_idempotent() {
        let visemes = vec![viseme("oh", 0.1, 0.4)];
        let first = sample(&visemes, secs(0.2)).map(|v| v.value.clone());
        for _ in 0..10 {
            assert_eq!(sample(&visemes, secs(0.2)).map(|v| v.value.clone()), first);
        }
    }

    #[test]
    fn unknown_viseme_gets_default_intensity() {
        assert!((intensity("XX") - UNKNOWN_VISEME_INTENSITY).abs() < f32::EPSILON);
        assert!(intensity("XX") > 0.0);
    }

    #[test]
    fn known_intensities() {
        assert_eq!(intensity("sil"), 0.0);
        assert_eq!(intensity("aa"), 1.0);
        assert_eq!(intensity("ih"), 0.6);
    }

    #[test]
    fn view_is_inert_before_any_utterance() {
        let view = AvatarView::new(Arc::new(PlaybackStore::new()), SharedTimeline::default());
        assert_eq!(view.current_intensity(), 0.0);
        assert!(!view.is_utterance_active());
        assert!(view.current_subtitle_text().is_empty());
    }
}
