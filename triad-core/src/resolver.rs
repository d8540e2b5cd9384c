//! # Root Resolution Module
//!
//! Decides which pitch class is the root of the sound in a spectrum and
//! whether its third is major or minor.
//!
//! One call to [`RootResolver::resolve`] runs the full procedure:
//! 1. Peak extraction: local maxima above the threshold, mapped to notes
//! 2. Initial guess from the loudest and the most in-tune peak
//! 3. Interval voting (minor 3rd, major 3rd, 4th, diminished, 5th)
//! 4. Relative-dominant correction
//! 5. Third-bias resolution
//! 6. Direct third evidence
//! 7. Emission of the sticky root and quality
//!
//! The root and quality live in a [`ResolutionSession`] owned by the caller and
//! carry over between calls; everything else is rebuilt each time.

use crate::config::ResolverConfig;
use crate::emit;
use crate::fft::Spectrum;
use crate::pitch::{NoteObservation, PitchMapper};
use crate::sink::{LogSink, SharedSink};
use crate::tuning::{Interval, PitchClass};
use crate::voting::{IntervalVoter, ObservedSet};
use log::Level;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Quality of the chord built on the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Quality {
    #[default]
    None,
    Minor,
    Major,
}

impl Quality {
    /// Suffix appended to the root label.
    pub fn suffix(self) -> &'static str {
        match self {
            Quality::None => "",
            Quality::Minor => " m",
            Quality::Major => " maj",
        }
    }
}

/// Result of one resolution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Chord {
    pub root: Option<PitchClass>,
    pub quality: Quality,
}

impl Chord {
    /// No root and no quality.
    pub const EMPTY: Chord = Chord {
        root: None,
        quality: Quality::None,
    };

    /// Root label, or `""` without a root.
    pub fn root_label(&self) -> &'static str {
        self.root.map_or("", PitchClass::label)
    }

    pub fn quality_label(&self) -> &'static str {
        self.quality.suffix()
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.root_label(), self.quality_label())
    }
}

/// Serialises as `{"root": "A", "quality": " maj"}`.
impl Serialize for Chord {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("Chord", 2)?;
        state.serialize_field("root", self.root_label())?;
        state.serialize_field("quality", self.quality_label())?;
        state.end()
    }
}

/// Evidence gathered during one pass. Rebuilt on every call.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Candidates {
    pub minor_third: Option<PitchClass>,
    pub major_third: Option<PitchClass>,
    pub fourth: Option<PitchClass>,
    pub diminished: Option<PitchClass>,
    pub fifth: Option<PitchClass>,
    /// Loudest and most in-tune peaks when they form a third: (lower, upper).
    pub third_bias: Option<(PitchClass, PitchClass)>,
    /// Most frequently observed pitch class.
    pub mode: Option<PitchClass>,
}

impl Candidates {
    fn set(&mut self, interval: Interval, candidate: Option<PitchClass>) {
        let slot = match interval {
            Interval::MinorThird => &mut self.minor_third,
            Interval::MajorThird => &mut self.major_third,
            Interval::Fourth => &mut self.fourth,
            Interval::Diminished => &mut self.diminished,
            Interval::Fifth => &mut self.fifth,
        };
        *slot = candidate;
    }

    /// True if `root` is backed by the 4th, diminished or 5th vote, or is
    /// the most observed pitch class.
    fn supports(&self, root: PitchClass) -> bool {
        [self.fourth, self.diminished, self.fifth].contains(&Some(root)) || self.mode == Some(root)
    }
}

/// Whether [`ResolutionSession::change_root`] commits or only previews.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootChange {
    Commit,
    Preview,
}

/// Sticky state of the resolver, carried by the caller between calls.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResolutionSession {
    root: Option<PitchClass>,
    quality: Quality,
    candidates: Candidates,
}

impl ResolutionSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<PitchClass> {
        self.root
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    /// The current sticky answer.
    pub fn chord(&self) -> Chord {
        Chord {
            root: self.root,
            quality: self.quality,
        }
    }

    /// Evidence from the last pass that found peaks.
    pub fn candidates(&self) -> &Candidates {
        &self.candidates
    }

    /// Moves the root to `candidate`, or with [`RootChange::Preview`] only
    /// reports the root that would result. Returns that root either way.
    pub fn change_root(
        &mut self,
        candidate: PitchClass,
        change: RootChange,
        sink: &dyn LogSink,
    ) -> PitchClass {
        let from = self.root.map_or("", PitchClass::label);
        match change {
            RootChange::Commit => {
                emit!(sink, Level::Debug, "change root: ({candidate}) from ({from})");
                self.root = Some(candidate);
            }
            RootChange::Preview => {
                emit!(sink, Level::Debug, "test root: {candidate} from {from}");
            }
        }
        candidate
    }
}

/// A chord together with the notes it was derived from, for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub chord: Chord,
    pub observations: Vec<NoteObservation>,
}

/// Runs the resolution procedure over spectra.
pub struct RootResolver {
    threshold: f32,
    mapper: PitchMapper,
    voter: IntervalVoter,
    sink: SharedSink,
}

impl RootResolver {
    pub fn new(config: &ResolverConfig, sink: SharedSink) -> Self {
        Self {
            threshold: config.threshold,
            mapper: PitchMapper::new(sink.clone()),
            voter: IntervalVoter::new(
                config.octave_gains,
                config.weighting,
                config.threshold,
                sink.clone(),
            ),
            sink,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// The peak threshold as a flat series of `len` points, for plotting.
    pub fn threshold_line(&self, len: usize) -> Vec<f32> {
        vec![self.threshold; len]
    }

    pub fn voter(&self) -> &IntervalVoter {
        &self.voter
    }

    /// Maps every strict local maximum above the threshold to a note.
    /// Peaks outside the admissible range are dropped.
    pub fn extract_peaks(&self, spectrum: &Spectrum) -> Vec<NoteObservation> {
        let len = spectrum.len();
        let mags = &spectrum.magnitudes[..len];
        (1..len.saturating_sub(1))
            .filter(|&i| mags[i] > mags[i - 1] && mags[i] > mags[i + 1] && mags[i] > self.threshold)
            .filter_map(|i| self.mapper.map_frequency(spectrum.frequencies[i], mags[i]))
            .collect()
    }

    /// Resolves the chord of `spectrum`, updating `session`.
    pub fn resolve(&self, session: &mut ResolutionSession, spectrum: &Spectrum) -> Chord {
        self.resolve_detailed(session, spectrum).chord
    }

    /// Like [`RootResolver::resolve`], but also hands back the observed notes.
    pub fn resolve_detailed(
        &self,
        session: &mut ResolutionSession,
        spectrum: &Spectrum,
    ) -> Resolution {
        let observations = self.extract_peaks(spectrum);
        if observations.is_empty() {
            emit!(self.sink, Level::Trace, "no peaks above {:.3e}", self.threshold);
            return Resolution {
                chord: Chord::EMPTY,
                observations,
            };
        }

        let sink = self.sink.as_ref();
        let mut candidates = Candidates::default();

        self.initial_guess(session, &observations, &mut candidates);

        let observed = ObservedSet::from_observations(&observations);
        candidates.mode = observed.mode();
        self.vote(&observations, &observed, &mut candidates);

        self.relative_dominant(session, &observed, &candidates);

        let bias_committed = self.resolve_third_bias(session, &mut candidates);
        if !bias_committed {
            self.direct_third(session, &observed, &candidates);
        }

        session.candidates = candidates;
        let chord = session.chord();
        emit!(sink, Level::Debug, "resolved: {chord}");
        Resolution {
            chord,
            observations,
        }
    }

    /// Picks the tentative root from the loudest and the most in-tune peak.
    fn initial_guess(
        &self,
        session: &mut ResolutionSession,
        observations: &[NoteObservation],
        candidates: &mut Candidates,
    ) {
        let loudest = leftmost_best(observations, |a, b| a.magnitude > b.magnitude);
        let exact = leftmost_best(observations, |a, b| a.error < b.error);
        let loud_pc = loudest.pitch_class;
        let exact_pc = exact.pitch_class;

        // Indices are compared as they stand: no wrap past G♯.
        let (lower, upper) = if loud_pc.index() <= exact_pc.index() {
            (loud_pc, exact_pc)
        } else {
            (exact_pc, loud_pc)
        };
        let gap = (upper.index() - lower.index()) as i32;
        let tentative = if gap == Interval::MinorThird.semitones()
            || gap == Interval::MajorThird.semitones()
        {
            candidates.third_bias = Some((lower, upper));
            lower
        } else {
            loud_pc
        };

        emit!(
            self.sink,
            Level::Debug,
            "mag: max {:.3e} {} at {:.3}; err: min {:.3} {} at {:.3}; observed: {:?}",
            loudest.magnitude,
            loudest.label(),
            loudest.frequency,
            exact.error,
            exact.label(),
            exact.frequency,
            observations.iter().map(NoteObservation::label).collect::<Vec<_>>()
        );

        session.change_root(tentative, RootChange::Commit, self.sink.as_ref());
    }

    fn vote(
        &self,
        observations: &[NoteObservation],
        observed: &ObservedSet,
        candidates: &mut Candidates,
    ) {
        let profile = self.voter.accumulate_profile(observations);
        for interval in Interval::ALL {
            let histogram = self
                .voter
                .build_histogram(interval, observations, observed, &profile);
            // An untouched histogram says nothing, whatever argmax returns.
            let best = histogram.best();
            if let Some(pc) = best {
                emit!(
                    self.sink,
                    Level::Debug,
                    "likely {} candidate: {pc}",
                    interval.name()
                );
            }
            candidates.set(interval, best);
        }
    }

    /// When the 4th and the 5th votes agree on another pitch class, the
    /// current root is more likely its subdominant or dominant: move there.
    fn relative_dominant(
        &self,
        session: &mut ResolutionSession,
        observed: &ObservedSet,
        candidates: &Candidates,
    ) {
        let (Some(fourth), Some(fifth)) = (candidates.fourth, candidates.fifth) else {
            return;
        };
        if fourth != fifth {
            return;
        }
        let sink = self.sink.as_ref();
        let target = session.change_root(fourth, RootChange::Preview, sink);
        if session.root() == Some(target) {
            return;
        }

        let third_matches = candidates.minor_third == Some(target.above(Interval::MinorThird))
            || candidates.major_third == Some(target.above(Interval::MajorThird));
        let no_third_evidence = candidates.minor_third.is_none()
            && candidates.major_third.is_none()
            && observed.len() > 1;

        if third_matches || no_third_evidence {
            session.change_root(target, RootChange::Commit, sink);
        }
    }

    /// Settles a recorded third bias by reading its lower member as the minor
    /// or major third of a supported root. Returns true if it was committed.
    fn resolve_third_bias(
        &self,
        session: &mut ResolutionSession,
        candidates: &mut Candidates,
    ) -> bool {
        let Some((lower, _)) = candidates.third_bias else {
            return false;
        };
        let sink = self.sink.as_ref();

        let interpretations = [
            (lower.below(Interval::MinorThird), Quality::Minor),
            (lower.below(Interval::MajorThird), Quality::Major),
        ];
        for (root, quality) in interpretations {
            if candidates.supports(root) {
                let target = session.change_root(root, RootChange::Preview, sink);
                if session.root() != Some(target) {
                    session.change_root(target, RootChange::Commit, sink);
                }
                session.quality = quality;
                emit!(
                    sink,
                    Level::Debug,
                    "third bias on {lower} resolved to {}",
                    session.chord()
                );
                return true;
            }
        }

        emit!(sink, Level::Debug, "third bias on {lower} discarded");
        candidates.third_bias = None;
        false
    }

    /// Sets the quality from the voted thirds. A third only counts when it
    /// was observed and sits the right interval above the current root. The
    /// major third is checked first; both cannot hold at once.
    fn direct_third(
        &self,
        session: &mut ResolutionSession,
        observed: &ObservedSet,
        candidates: &Candidates,
    ) {
        let Some(root) = session.root() else {
            return;
        };
        let checks = [
            (candidates.major_third, Interval::MajorThird, Quality::Major),
            (candidates.minor_third, Interval::MinorThird, Quality::Minor),
        ];
        for (candidate, interval, quality) in checks {
            let Some(third) = candidate else { continue };
            if observed.contains(third) && third == root.above(interval) {
                session.quality = quality;
                emit!(
                    self.sink,
                    Level::Debug,
                    "likely tonic 3rd candidate: {third} ({})",
                    quality.suffix().trim()
                );
                return;
            }
        }
    }
}

/// First element for which no later element is strictly `better`.
fn leftmost_best<T>(items: &[T], better: impl Fn(&T, &T) -> bool) -> &T {
    let mut best = &items[0];
    for item in &items[1..] {
        if better(item, best) {
            best = item;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MemorySink, NullSink};
    use std::sync::Arc;

    /// A spectrum with one isolated peak per `(frequency, magnitude)` pair.
    fn spectrum_with_peaks(peaks: &[(f32, f32)]) -> Spectrum {
        let mut frequencies = Vec::new();
        let mut magnitudes = Vec::new();
        for &(freq, mag) in peaks {
            frequencies.extend([freq - 1.0, freq, freq + 1.0]);
            magnitudes.extend([0.0, mag, 0.0]);
        }
        Spectrum::new(frequencies, magnitudes)
    }

    fn resolver() -> RootResolver {
        RootResolver::new(&ResolverConfig::default(), Arc::new(NullSink))
    }

    #[test]
    fn quality_labels() {
        assert_eq!(Quality::None.suffix(), "");
        assert_eq!(Quality::Minor.suffix(), " m");
        assert_eq!(Quality::Major.suffix(), " maj");
        let chord = Chord {
            root: Some(PitchClass::C_SHARP),
            quality: Quality::Major,
        };
        assert_eq!(chord.to_string(), "C♯/D♭ maj");
        assert_eq!(Chord::EMPTY.to_string(), "");
    }

    #[test]
    fn chord_serializes_as_labels() {
        let chord = Chord {
            root: Some(PitchClass::A),
            quality: Quality::Minor,
        };
        assert_eq!(
            serde_json::to_string(&chord).unwrap(),
            r#"{"root":"A","quality":" m"}"#
        );
        assert_eq!(
            serde_json::to_string(&Chord::EMPTY).unwrap(),
            r#"{"root":"","quality":""}"#
        );
    }

    #[test]
    fn peaks_below_threshold_or_out_of_range_are_ignored() {
        let resolver = resolver();
        let spectrum = spectrum_with_peaks(&[(440.0, 1e3), (20.0, 1e6), (659.26, 5e4)]);
        let peaks = resolver.extract_peaks(&spectrum);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].pitch_class, PitchClass::E);
        assert_eq!(peaks[0].magnitude, 5e4);
    }

    #[test]
    fn edges_are_never_peaks() {
        let resolver = resolver();
        let spectrum = Spectrum::new(vec![440.0, 441.0, 442.0], vec![1e6, 0.0, 1e6]);
        assert!(resolver.extract_peaks(&spectrum).is_empty());
        let flat = Spectrum::new(vec![440.0, 441.0, 442.0], vec![1e6, 1e6, 1e6]);
        assert!(resolver.extract_peaks(&flat).is_empty());
    }

    #[test]
    fn preview_never_moves_the_root() {
        let mut session = ResolutionSession::new();
        let sink = NullSink;
        session.change_root(PitchClass::A, RootChange::Commit, &sink);
        let before = session;

        let would_be = session.change_root(PitchClass::E, RootChange::Preview, &sink);

        assert_eq!(would_be, PitchClass::E);
        assert_eq!(session, before);
        assert_eq!(session.root(), Some(PitchClass::A));
    }

    #[test]
    fn commit_logs_the_transition() {
        let mut session = ResolutionSession::new();
        let sink = MemorySink::new();
        session.change_root(PitchClass::A, RootChange::Commit, &sink);
        session.change_root(PitchClass::C, RootChange::Commit, &sink);
        assert!(sink.contains(Level::Debug, "change root: (C) from (A)"));
    }

    #[test]
    fn single_peak_is_idempotent() {
        let resolver = resolver();
        let mut session = ResolutionSession::new();
        let spectrum = spectrum_with_peaks(&[(440.0, 1e5)]);

        let first = resolver.resolve(&mut session, &spectrum);
        let second = resolver.resolve(&mut session, &spectrum);

        assert_eq!(first, second);
        assert_eq!(first.root_label(), "A");
        assert_eq!(first.quality_label(), "");
    }

    #[test]
    fn silence_leaves_sticky_state_alone() {
        let resolver = resolver();
        let mut session = ResolutionSession::new();
        let triad = spectrum_with_peaks(&[(440.0, 3e5), (554.37, 2e5), (659.26, 2e5)]);
        resolver.resolve(&mut session, &triad);
        let before = session;

        let quiet = spectrum_with_peaks(&[(440.0, 10.0)]);
        let chord = resolver.resolve(&mut session, &quiet);

        assert_eq!(chord, Chord::EMPTY);
        assert_eq!(session, before);
        assert_eq!(session.chord().to_string(), "A maj");
    }

    #[test]
    fn no_peaks_on_a_fresh_session() {
        let resolver = resolver();
        let mut session = ResolutionSession::new();
        let chord = resolver.resolve(&mut session, &Spectrum::default());
        assert_eq!((chord.root_label(), chord.quality_label()), ("", ""));
        assert_eq!(session, ResolutionSession::new());
    }

    #[test]
    fn fourth_and_fifth_agreement_moves_the_root() {
        let resolver = resolver();
        let mut session = ResolutionSession::new();
        // G3 quietly under loud C5 and D5: C is the 4th of G, D its 5th.
        let g3 = 783.99_f32 / 2.0;
        let spectrum = spectrum_with_peaks(&[(g3, 3e4), (523.25, 3e5), (587.33, 2e5)]);

        let chord = resolver.resolve(&mut session, &spectrum);

        let candidates = session.candidates();
        assert_eq!(candidates.fourth, Some(PitchClass::new(10)));
        assert_eq!(candidates.fifth, Some(PitchClass::new(10)));
        assert_eq!(candidates.minor_third, None);
        assert_eq!(candidates.major_third, None);
        assert_eq!(chord.root_label(), "G");
        assert_eq!(chord.quality, Quality::None);
    }

    #[test]
    fn third_bias_can_move_root_to_the_mode() {
        let resolver = resolver();
        let mut session = ResolutionSession::new();
        // E loudest, C exact: the (C, E) pair reads C as the major third of
        // G♯, which nothing but the mode backs.
        let spectrum = spectrum_with_peaks(&[
            (416.0, 1e5),
            (523.25, 1e5),
            (660.0, 3e5),
            (832.0, 1e5),
        ]);

        let chord = resolver.resolve(&mut session, &spectrum);

        let candidates = session.candidates();
        assert_eq!(candidates.mode, Some(PitchClass::new(11)));
        assert_eq!(candidates.fourth, None);
        assert_eq!(candidates.fifth, None);
        assert_eq!(candidates.third_bias, Some((PitchClass::C, PitchClass::E)));
        assert_eq!(chord.root, Some(PitchClass::new(11)));
        assert_eq!(chord.quality, Quality::Major);
    }

    #[test]
    fn detuned_major_triad_resolves_through_the_bias() {
        let resolver = resolver();
        let mut session = ResolutionSession::new();
        // Peaks as an FFT places them: E loudest, C♯ closest to its pitch.
        let spectrum = spectrum_with_peaks(&[(436.05, 2e5), (554.48, 2e5), (656.76, 3e5)]);

        let chord = resolver.resolve(&mut session, &spectrum);

        let candidates = session.candidates();
        assert_eq!(candidates.third_bias, Some((PitchClass::C_SHARP, PitchClass::E)));
        assert_eq!(candidates.fourth, Some(PitchClass::A));
        assert_eq!(chord.to_string(), "A maj");
    }

    #[test]
    fn detuned_minor_triad_resolves_through_the_bias() {
        let resolver = resolver();
        let mut session = ResolutionSession::new();
        let spectrum = spectrum_with_peaks(&[(436.05, 2e5), (523.3, 2e5), (656.76, 3e5)]);

        let chord = resolver.resolve(&mut session, &spectrum);

        assert_eq!(
            session.candidates().third_bias,
            Some((PitchClass::C, PitchClass::E))
        );
        assert_eq!(chord.to_string(), "A m");
    }

    #[test]
    fn bias_logs_the_move_off_the_tentative_root() {
        let memory = Arc::new(MemorySink::new());
        let resolver = RootResolver::new(&ResolverConfig::default(), memory.clone());
        let mut session = ResolutionSession::new();
        let spectrum = spectrum_with_peaks(&[(436.05, 2e5), (554.48, 2e5), (656.76, 3e5)]);

        resolver.resolve(&mut session, &spectrum);

        assert!(memory.contains(Level::Debug, "change root: (C♯/D♭) from ()"));
        assert!(memory.contains(Level::Debug, "change root: (A) from (C♯/D♭)"));
    }

    #[test]
    fn unsupported_bias_is_discarded() {
        let resolver = resolver();
        let mut session = ResolutionSession::new();
        // C♯ loudest, A exact: (A, C♯) is a pair, but neither F♯ nor F is
        // backed, so the voted major third on A decides.
        let spectrum = spectrum_with_peaks(&[(440.0, 1e5), (555.0, 3e5), (660.0, 1e5)]);
        let chord = resolver.resolve(&mut session, &spectrum);
        assert_eq!(session.candidates().third_bias, None);
        assert_eq!(session.candidates().major_third, Some(PitchClass::C_SHARP));
        assert_eq!(chord.to_string(), "A maj");
    }

    #[test]
    fn thirds_do_not_wrap_past_the_last_pitch_class() {
        let resolver = resolver();
        let mut session = ResolutionSession::new();
        // G♯ loudest, B exact: three semitones apart only across the wrap,
        // so there is no bias and G♯ stays the tentative root.
        let g3 = 783.99_f32 / 2.0;
        let spectrum = spectrum_with_peaks(&[
            (g3 + 0.5, 1e5),
            (493.88, 1e5),
            (785.0, 1e5),
            (831.5, 3e5),
        ]);

        let chord = resolver.resolve(&mut session, &spectrum);

        assert_eq!(session.candidates().third_bias, None);
        assert_eq!(session.candidates().minor_third, Some(PitchClass::new(2)));
        assert_eq!(chord.root, Some(PitchClass::new(11)));
        assert_eq!(chord.quality, Quality::Minor);
    }
}
