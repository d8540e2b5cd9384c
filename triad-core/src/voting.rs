//! # Interval Voting Module
//!
//! Collects evidence for interval relationships between the notes observed in
//! one analysis pass. Each observation votes for the pitch class an interval
//! above it, but only if that pitch class was itself observed; the vote is
//! weighted by how much energy the observation's octave carries.

use crate::emit;
use crate::pitch::NoteObservation;
use crate::sink::SharedSink;
use crate::tuning::{Interval, OCTAVE_LOWER, OCTAVE_SPAN, OCTAVE_UPPER, PITCH_CLASS_COUNT, PitchClass};
use log::Level;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of the sine window used by [`ProfileWeighting::Windowed`]:
/// twice the top of the reference octave, three octaves up.
pub const PROFILE_WINDOW_WIDTH: f32 = 2.0 * 830.61 * OCTAVE_UPPER as f32;

/// Floor applied to the match error before dividing by it.
const ERROR_FLOOR: f32 = 1e-3;

/// How an observation contributes to its octave bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum ProfileWeighting {
    /// The peak magnitude itself.
    #[default]
    Magnitude,
    /// `threshold * sin(pi * f / w) / (magnitude * error)`: favours peaks that
    /// sit close to a canonical frequency in the middle of the range.
    Windowed,
}

/// Twelve vote slots; `None` means the slot never received a vote.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Histogram {
    slots: [Option<f32>; PITCH_CLASS_COUNT],
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `weight` to the slot of `pitch_class`, clearing its sentinel.
    pub fn add(&mut self, pitch_class: PitchClass, weight: f32) {
        let slot = &mut self.slots[pitch_class.index()];
        *slot = Some(slot.unwrap_or(0.0) + weight);
    }

    pub fn get(&self, pitch_class: PitchClass) -> Option<f32> {
        self.slots[pitch_class.index()]
    }

    /// True once any slot has received a vote.
    pub fn has_evidence(&self) -> bool {
        self.slots.iter().any(Option::is_some)
    }

    /// Index of the largest slot, scanning left to right and keeping the
    /// first of equal values. Unobserved slots rank below every vote, so an
    /// untouched histogram answers 0: check [`Histogram::has_evidence`] first.
    pub fn argmax(&self) -> usize {
        let mut best = 0;
        for (i, slot) in self.slots.iter().enumerate().skip(1) {
            if *slot > self.slots[best] {
                best = i;
            }
        }
        best
    }

    /// The winning pitch class, or `None` if nothing voted.
    pub fn best(&self) -> Option<PitchClass> {
        self.has_evidence().then(|| PitchClass::new(self.argmax()))
    }
}

impl fmt::Display for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, slot) in self.slots.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match slot {
                Some(weight) => write!(f, "{weight:.3e}")?,
                None => f.write_str("-")?,
            }
        }
        f.write_str("]")
    }
}

/// Set of pitch classes seen in the current pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObservedSet {
    counts: [u32; PITCH_CLASS_COUNT],
}

impl ObservedSet {
    pub fn from_observations(observations: &[NoteObservation]) -> Self {
        let mut set = Self::default();
        for obs in observations {
            set.counts[obs.pitch_class.index()] += 1;
        }
        set
    }

    pub fn contains(&self, pitch_class: PitchClass) -> bool {
        self.counts[pitch_class.index()] > 0
    }

    /// Number of distinct pitch classes observed.
    pub fn len(&self) -> usize {
        self.counts.iter().filter(|&&c| c > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count(&self, pitch_class: PitchClass) -> u32 {
        self.counts[pitch_class.index()]
    }

    /// Most frequently observed pitch class; the lowest index wins ties.
    pub fn mode(&self) -> Option<PitchClass> {
        if self.is_empty() {
            return None;
        }
        let mut best = 0;
        for (i, &count) in self.counts.iter().enumerate().skip(1) {
            if count > self.counts[best] {
                best = i;
            }
        }
        Some(PitchClass::new(best))
    }
}

/// Energy per octave shift, already multiplied by the octave gains.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OctaveProfile {
    buckets: [f32; OCTAVE_SPAN],
}

impl OctaveProfile {
    /// Bucket for `octave_shift`, or `None` outside the covered range.
    pub fn weight(&self, octave_shift: i32) -> Option<f32> {
        bucket_index(octave_shift).map(|i| self.buckets[i])
    }

    pub fn buckets(&self) -> &[f32; OCTAVE_SPAN] {
        &self.buckets
    }
}

fn bucket_index(octave_shift: i32) -> Option<usize> {
    (OCTAVE_LOWER..=OCTAVE_UPPER)
        .contains(&octave_shift)
        .then(|| (octave_shift - OCTAVE_LOWER) as usize)
}

/// Builds the octave profile and the interval histograms.
pub struct IntervalVoter {
    /// Gain per octave shift, `OCTAVE_LOWER..=OCTAVE_UPPER`.
    gains: [f32; OCTAVE_SPAN],
    weighting: ProfileWeighting,
    threshold: f32,
    sink: SharedSink,
}

impl IntervalVoter {
    pub fn new(
        gains: [f32; OCTAVE_SPAN],
        weighting: ProfileWeighting,
        threshold: f32,
        sink: SharedSink,
    ) -> Self {
        Self {
            gains,
            weighting,
            threshold,
            sink,
        }
    }

    /// Value of the sine window at `frequency`.
    pub fn window_at(&self, frequency: f32) -> f32 {
        self.threshold * (std::f32::consts::PI * frequency / PROFILE_WINDOW_WIDTH).sin()
    }

    /// The sine window sampled every `step` Hz, `len` points, for plotting.
    pub fn profile_window(&self, step: f32, len: usize) -> (Vec<f32>, Vec<f32>) {
        let ticks: Vec<f32> = (0..len).map(|i| i as f32 * step).collect();
        let window = ticks.iter().map(|&f| self.window_at(f)).collect();
        (ticks, window)
    }

    fn observation_weight(&self, obs: &NoteObservation) -> f32 {
        match self.weighting {
            ProfileWeighting::Magnitude => obs.magnitude,
            ProfileWeighting::Windowed => {
                let denominator = obs.magnitude * obs.error.max(ERROR_FLOOR);
                if denominator > 0.0 {
                    self.window_at(obs.frequency) / denominator
                } else {
                    0.0
                }
            }
        }
    }

    /// Sums the observation weights per octave, then applies the gains.
    pub fn accumulate_profile(&self, observations: &[NoteObservation]) -> OctaveProfile {
        let mut profile = OctaveProfile::default();
        for obs in observations {
            match bucket_index(obs.octave_shift) {
                Some(i) => profile.buckets[i] += self.observation_weight(obs),
                None => emit!(
                    self.sink,
                    Level::Warn,
                    "out of range: {} at ({:.3}, {:.3e})",
                    obs.label(),
                    obs.frequency,
                    obs.magnitude
                ),
            }
        }
        for (bucket, gain) in profile.buckets.iter_mut().zip(self.gains.iter()) {
            *bucket *= gain;
        }
        emit!(
            self.sink,
            Level::Debug,
            "spatial profile distribution: {:?}",
            profile
                .buckets
                .iter()
                .map(|b| format!("{b:.3}"))
                .collect::<Vec<_>>()
        );
        profile
    }

    /// Votes every observation's `interval` target whose pitch class was
    /// observed, weighted by the profile bucket of the observation's octave.
    pub fn build_histogram(
        &self,
        interval: Interval,
        observations: &[NoteObservation],
        observed: &ObservedSet,
        profile: &OctaveProfile,
    ) -> Histogram {
        let mut histogram = Histogram::new();
        for obs in observations {
            let target = obs.interval(interval);
            if !observed.contains(target) {
                continue;
            }
            match profile.weight(obs.octave_shift) {
                Some(weight) => histogram.add(target, weight),
                None => emit!(
                    self.sink,
                    Level::Warn,
                    "skipping: {} in octave: {}",
                    target,
                    obs.octave_shift
                ),
            }
        }
        emit!(
            self.sink,
            Level::Debug,
            "parse ({}) histogram: {}",
            interval.name(),
            histogram
        );
        histogram
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NullSink;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn note(pc: usize, octave_shift: i32, magnitude: f32) -> NoteObservation {
        NoteObservation {
            frequency: 440.0,
            magnitude,
            octave_shift,
            pitch_class: PitchClass::new(pc),
            error: 0.5,
        }
    }

    fn voter(gains: [f32; OCTAVE_SPAN]) -> IntervalVoter {
        IntervalVoter::new(gains, ProfileWeighting::Magnitude, 2e4, Arc::new(NullSink))
    }

    #[test]
    fn untouched_histogram_defaults_to_zero_without_evidence() {
        let histogram = Histogram::new();
        assert_eq!(histogram.argmax(), 0);
        assert!(!histogram.has_evidence());
        assert_eq!(histogram.best(), None);
    }

    #[test]
    fn zero_weight_vote_is_not_the_sentinel() {
        let mut histogram = Histogram::new();
        histogram.add(PitchClass::new(5), 0.0);
        assert!(histogram.has_evidence());
        assert_eq!(histogram.get(PitchClass::new(5)), Some(0.0));
        assert_eq!(histogram.get(PitchClass::new(4)), None);
        assert_eq!(histogram.best(), Some(PitchClass::new(5)));
    }

    #[test]
    fn argmax_keeps_the_leftmost_tie() {
        let mut histogram = Histogram::new();
        histogram.add(PitchClass::new(9), 2.0);
        histogram.add(PitchClass::new(4), 2.0);
        histogram.add(PitchClass::new(6), 1.0);
        assert_eq!(histogram.argmax(), 4);
        histogram.add(PitchClass::new(6), 1.5);
        assert_eq!(histogram.argmax(), 6);
    }

    #[test]
    fn profile_applies_octave_gains() {
        let mut gains = [1.0; OCTAVE_SPAN];
        gains[(0 - OCTAVE_LOWER) as usize] = 0.5;
        let profile = voter(gains).accumulate_profile(&[note(0, 0, 4.0), note(7, 0, 2.0), note(3, -1, 1.0)]);
        assert_relative_eq!(profile.weight(0).unwrap(), 3.0);
        assert_relative_eq!(profile.weight(-1).unwrap(), 1.0);
        assert_relative_eq!(profile.weight(2).unwrap(), 0.0);
        assert_eq!(profile.weight(4), None);
    }

    #[test]
    fn votes_only_count_when_target_was_observed() {
        let voter = voter([1.0; OCTAVE_SPAN]);
        // A, C, E
        let notes = [note(0, 0, 3.0), note(3, 0, 2.0), note(7, 0, 1.0)];
        let observed = ObservedSet::from_observations(&notes);
        let profile = voter.accumulate_profile(&notes);

        let minor = voter.build_histogram(Interval::MinorThird, &notes, &observed, &profile);
        assert_eq!(minor.best(), Some(PitchClass::C));
        assert_relative_eq!(minor.get(PitchClass::C).unwrap(), 6.0);

        let fifth = voter.build_histogram(Interval::Fifth, &notes, &observed, &profile);
        assert_eq!(fifth.best(), Some(PitchClass::E));

        let diminished = voter.build_histogram(Interval::Diminished, &notes, &observed, &profile);
        assert!(!diminished.has_evidence());
    }

    #[test]
    fn votes_accumulate_across_octaves() {
        let voter = voter([1.0; OCTAVE_SPAN]);
        let notes = [note(0, 0, 1.0), note(0, -1, 2.0), note(7, 0, 1.0)];
        let observed = ObservedSet::from_observations(&notes);
        let profile = voter.accumulate_profile(&notes);
        let fifth = voter.build_histogram(Interval::Fifth, &notes, &observed, &profile);
        // bucket(0) = 2.0 and bucket(-1) = 2.0
        assert_relative_eq!(fifth.get(PitchClass::E).unwrap(), 4.0);
    }

    #[test]
    fn observed_set_mode_prefers_lowest_index() {
        let notes = [note(7, 0, 1.0), note(3, 0, 1.0), note(7, 1, 1.0), note(3, -1, 1.0)];
        let observed = ObservedSet::from_observations(&notes);
        assert_eq!(observed.len(), 2);
        assert_eq!(observed.count(PitchClass::E), 2);
        assert_eq!(observed.mode(), Some(PitchClass::C));
        assert_eq!(ObservedSet::default().mode(), None);
    }

    #[test]
    fn windowed_weighting_divides_by_magnitude_and_error() {
        let voter = IntervalVoter::new(
            [1.0; OCTAVE_SPAN],
            ProfileWeighting::Windowed,
            2e4,
            Arc::new(NullSink),
        );
        let obs = note(0, 0, 2.0);
        let expected = voter.window_at(440.0) / (2.0 * 0.5);
        let profile = voter.accumulate_profile(&[obs]);
        assert_relative_eq!(profile.weight(0).unwrap(), expected);

        let (ticks, window) = voter.profile_window(10.0, 4);
        assert_eq!(ticks, vec![0.0, 10.0, 20.0, 30.0]);
        assert_relative_eq!(window[0], 0.0);
        assert!(window[3] > window[1]);
    }
}
