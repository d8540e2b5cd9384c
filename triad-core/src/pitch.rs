//! # Pitch Mapping Module
//!
//! Turns a single spectral peak into a [`NoteObservation`]: the peak is folded
//! into the reference octave to find how many octaves it sits away from A4,
//! then matched against the canonical table scaled by that many octaves.
//!
//! ## Features
//! - Admissible range A1 (55 Hz) to C8 (4186 Hz); anything else is dropped
//! - Octave fold by repeated halving / doubling
//! - Nearest-note match with the Hz error kept as a confidence measure

use crate::emit;
use crate::sink::SharedSink;
use crate::tuning::{
    self, CANONICAL_FREQUENCIES, Interval, OCTAVE_LOWER, OCTAVE_UPPER, PITCH_CLASS_COUNT,
    PitchClass,
};
use log::Level;
use serde::Serialize;

/// Upper edge of the reference window: halfway from G♯5 to A5.
pub const UPPER_WINDOW_LIMIT: f32 = 830.61 + 0.5 * (880.0 - 830.61);
/// Lower edge of the reference window: halfway from G♯4 to A4.
pub const LOWER_WINDOW_LIMIT: f32 = 440.0 - 0.5 * (440.0 - 415.305);

/// Lowest admissible frequency: A1, three octaves under the reference A.
pub const LOWER_FILTER_LIMIT: f32 = CANONICAL_FREQUENCIES[0] / 8.0;
/// Highest admissible frequency: C8, three octaves over the reference C.
pub const UPPER_FILTER_LIMIT: f32 = CANONICAL_FREQUENCIES[3] * 8.0;

/// A spectral peak labelled with its pitch class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteObservation {
    pub frequency: f32,
    pub magnitude: f32,
    /// Octaves above (positive) or below (negative) the reference octave.
    pub octave_shift: i32,
    pub pitch_class: PitchClass,
    /// Distance in Hz to the matched canonical frequency.
    pub error: f32,
}

impl NoteObservation {
    /// The pitch class `interval` above the observed one.
    pub fn interval(&self, interval: Interval) -> PitchClass {
        self.pitch_class.above(interval)
    }

    pub fn minor_third(&self) -> PitchClass {
        self.interval(Interval::MinorThird)
    }

    pub fn major_third(&self) -> PitchClass {
        self.interval(Interval::MajorThird)
    }

    pub fn fourth(&self) -> PitchClass {
        self.interval(Interval::Fourth)
    }

    pub fn diminished(&self) -> PitchClass {
        self.interval(Interval::Diminished)
    }

    pub fn fifth(&self) -> PitchClass {
        self.interval(Interval::Fifth)
    }

    pub fn label(&self) -> &'static str {
        self.pitch_class.label()
    }
}

/// Counts how many octaves `value` must be moved to land inside the
/// reference window. Positive means it was halved, negative doubled.
pub fn octave_shift(value: f32) -> i32 {
    let mut harmonic = value;
    let mut shift = 0;
    if harmonic > UPPER_WINDOW_LIMIT {
        while harmonic > UPPER_WINDOW_LIMIT {
            harmonic /= 2.0;
            shift += 1;
        }
    } else if harmonic > 0.0 {
        while harmonic < LOWER_WINDOW_LIMIT {
            harmonic *= 2.0;
            shift -= 1;
        }
    }
    shift
}

/// Maps single frequencies onto pitch classes.
pub struct PitchMapper {
    sink: SharedSink,
}

impl PitchMapper {
    pub fn new(sink: SharedSink) -> Self {
        Self { sink }
    }

    /// Maps `value` (Hz) with its spectral `magnitude` to a note observation.
    ///
    /// # Returns
    /// * `Some(observation)` - nearest pitch class, octave shift and error
    /// * `None` - `value` is outside the A1..C8 range
    pub fn map_frequency(&self, value: f32, magnitude: f32) -> Option<NoteObservation> {
        if !(LOWER_FILTER_LIMIT..=UPPER_FILTER_LIMIT).contains(&value) {
            emit!(
                self.sink,
                Level::Trace,
                "outside filter range: ({value:.3}, {magnitude:.3e})"
            );
            return None;
        }

        let shift = octave_shift(value);
        let table = tuning::scaled_frequencies(shift);

        let (index, error) = table
            .iter()
            .map(|&f| (value - f).abs())
            .enumerate()
            .fold((0, f32::INFINITY), |best, (i, err)| {
                if err < best.1 { (i, err) } else { best }
            });
        debug_assert!(index < PITCH_CLASS_COUNT);
        debug_assert!((OCTAVE_LOWER..=OCTAVE_UPPER).contains(&shift));

        let observation = NoteObservation {
            frequency: value,
            magnitude,
            octave_shift: shift,
            pitch_class: PitchClass::new(index),
            error,
        };
        emit!(
            self.sink,
            Level::Trace,
            "found: {value:.3} is \"{}\", shifted: {shift}, err: {error:.3}",
            observation.label()
        );
        Some(observation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NullSink;
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    fn mapper() -> PitchMapper {
        PitchMapper::new(Arc::new(NullSink))
    }

    #[test]
    fn canonical_c_maps_without_shift() {
        let note = mapper().map_frequency(523.25, 1.0).unwrap();
        assert_eq!(note.label(), "C");
        assert_eq!(note.octave_shift, 0);
        assert_abs_diff_eq!(note.error, 0.0, epsilon = 1e-3);
    }

    #[test]
    fn middle_c_folds_one_octave_down() {
        let note = mapper().map_frequency(261.625, 1.0).unwrap();
        assert_eq!(note.label(), "C");
        assert_eq!(note.octave_shift, -1);
        assert_abs_diff_eq!(note.error, 0.0, epsilon = 1e-3);
    }

    #[test]
    fn high_notes_fold_upward() {
        let note = mapper().map_frequency(1318.52, 1.0).unwrap();
        assert_eq!(note.pitch_class, PitchClass::E);
        assert_eq!(note.octave_shift, 1);
        assert!(note.error < 0.1);
    }

    #[test]
    fn out_of_range_frequencies_are_dropped() {
        assert!(mapper().map_frequency(20.0, 1.0).is_none());
        assert!(mapper().map_frequency(5000.0, 1.0).is_none());
        assert!(mapper().map_frequency(55.0, 1.0).is_some());
        assert!(mapper().map_frequency(4186.0, 1.0).is_some());
    }

    #[test]
    fn window_edges_pick_the_nearer_octave() {
        assert_eq!(octave_shift(440.0), 0);
        assert_eq!(octave_shift(830.61), 0);
        assert_eq!(octave_shift(880.0), 1);
        assert_eq!(octave_shift(415.3), -1);
        assert_eq!(octave_shift(55.0), -3);
        assert_eq!(octave_shift(4186.0), 3);
    }

    #[test]
    fn derived_intervals_wrap_around() {
        let note = mapper().map_frequency(783.99, 1.0).unwrap();
        assert_eq!(note.label(), "G");
        assert_eq!(note.minor_third().label(), "A♯/B♭");
        assert_eq!(note.major_third().label(), "B");
        assert_eq!(note.fourth().label(), "C");
        assert_eq!(note.diminished().label(), "C♯/D♭");
        assert_eq!(note.fifth().label(), "D");
    }
}
