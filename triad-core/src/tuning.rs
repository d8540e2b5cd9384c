//! # Musical Tuning Module
//!
//! The twelve equal-tempered pitch classes of the reference octave A4..G♯5,
//! the intervals the resolver votes on, and the octave-shifted copies of the
//! canonical frequency table.
//!
//! ## Features
//! - Cyclic pitch-class arithmetic (index mod 12)
//! - Reference table anchored at A4 = 440 Hz
//! - Octave-scaled tables computed once per supported shift

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of pitch classes in an octave.
pub const PITCH_CLASS_COUNT: usize = 12;

/// Canonical frequencies of the reference octave, A4 through G♯5.
pub const CANONICAL_FREQUENCIES: [f32; PITCH_CLASS_COUNT] = [
    440.0, 466.16, 493.88, 523.25, 554.37, 587.33, 622.25, 659.26, 698.46, 739.99, 783.99, 830.61,
];

/// Display labels, in the same order as [`CANONICAL_FREQUENCIES`].
pub const PITCH_CLASS_LABELS: [&str; PITCH_CLASS_COUNT] = [
    "A", "A♯/B♭", "B", "C", "C♯/D♭", "D", "D♯/E♭", "E", "F", "F♯/G♭", "G", "G♯/A♭",
];

/// Lowest octave shift the tables (and the octave-gain profile) cover.
pub const OCTAVE_LOWER: i32 = -4;
/// Highest octave shift the tables (and the octave-gain profile) cover.
pub const OCTAVE_UPPER: i32 = 3;
/// Number of distinct octave shifts in `OCTAVE_LOWER..=OCTAVE_UPPER`.
pub const OCTAVE_SPAN: usize = (OCTAVE_UPPER - OCTAVE_LOWER + 1) as usize;

/// One of the twelve pitch classes. The index is always in `0..12`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct PitchClass(u8);

impl PitchClass {
    pub const A: PitchClass = PitchClass(0);
    pub const C: PitchClass = PitchClass(3);
    pub const C_SHARP: PitchClass = PitchClass(4);
    pub const E: PitchClass = PitchClass(7);

    /// Builds a pitch class from any index, wrapping cyclically.
    pub fn new(index: usize) -> Self {
        PitchClass((index % PITCH_CLASS_COUNT) as u8)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn label(self) -> &'static str {
        PITCH_CLASS_LABELS[self.index()]
    }

    /// Moves `semitones` up (or down, when negative) around the circle.
    pub fn transpose(self, semitones: i32) -> Self {
        let shifted = (self.0 as i32 + semitones).rem_euclid(PITCH_CLASS_COUNT as i32);
        PitchClass(shifted as u8)
    }

    /// The pitch class `interval` above this one.
    pub fn above(self, interval: Interval) -> Self {
        self.transpose(interval.semitones())
    }

    /// The pitch class `interval` below this one.
    pub fn below(self, interval: Interval) -> Self {
        self.transpose(-interval.semitones())
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl TryFrom<u8> for PitchClass {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (value as usize) < PITCH_CLASS_COUNT {
            Ok(PitchClass(value))
        } else {
            Err(format!("pitch class index {value} out of range"))
        }
    }
}

impl From<PitchClass> for u8 {
    fn from(pc: PitchClass) -> u8 {
        pc.0
    }
}

/// The intervals the resolver collects evidence for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    MinorThird,
    MajorThird,
    Fourth,
    Diminished,
    Fifth,
}

impl Interval {
    /// Every voted interval, in voting order.
    pub const ALL: [Interval; 5] = [
        Interval::MinorThird,
        Interval::MajorThird,
        Interval::Fourth,
        Interval::Diminished,
        Interval::Fifth,
    ];

    pub fn semitones(self) -> i32 {
        match self {
            Interval::MinorThird => 3,
            Interval::MajorThird => 4,
            Interval::Fourth => 5,
            Interval::Diminished => 6,
            Interval::Fifth => 7,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Interval::MinorThird => "minor 3rd",
            Interval::MajorThird => "major 3rd",
            Interval::Fourth => "4th",
            Interval::Diminished => "diminished / augmented",
            Interval::Fifth => "5th",
        }
    }
}

/// Canonical tables scaled by 2^|shift| for every shift in range.
static SCALED_TABLES: Lazy<[[f32; PITCH_CLASS_COUNT]; OCTAVE_SPAN]> = Lazy::new(|| {
    let mut tables = [[0.0; PITCH_CLASS_COUNT]; OCTAVE_SPAN];
    for (slot, shift) in (OCTAVE_LOWER..=OCTAVE_UPPER).enumerate() {
        let factor = 2.0_f32.powi(shift.abs());
        for (i, &freq) in CANONICAL_FREQUENCIES.iter().enumerate() {
            tables[slot][i] = match shift.signum() {
                1 => freq * factor,
                -1 => freq / factor,
                _ => freq,
            };
        }
    }
    tables
});

/// Returns the canonical table moved `shift` octaves away from the reference.
///
/// Shifts inside `OCTAVE_LOWER..=OCTAVE_UPPER` come from the cache; anything
/// else is computed on the spot.
pub fn scaled_frequencies(shift: i32) -> [f32; PITCH_CLASS_COUNT] {
    if (OCTAVE_LOWER..=OCTAVE_UPPER).contains(&shift) {
        return SCALED_TABLES[(shift - OCTAVE_LOWER) as usize];
    }
    let factor = 2.0_f32.powi(shift);
    CANONICAL_FREQUENCIES.map(|freq| freq * factor)
}
