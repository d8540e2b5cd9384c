// triad-core/src/lib.rs

//! The core logic of the triad detector.
//! This crate captures audio, turns it into spectra, and resolves the root
//! and third quality of the chord being played. It is completely headless
//! and contains no GUI code.

pub mod audio;
pub mod config;
pub mod fft;
pub mod pitch;
pub mod resolver;
pub mod sink;
pub mod tuning;
pub mod voting;

pub use config::TriadConfig;
pub use resolver::{Candidates, Chord, Quality, ResolutionSession, RootResolver};
pub use sink::{LogSink, SharedSink};
pub use tuning::PitchClass;

use fft::{Spectrum, SpectrumAnalyzer, SpectrumOptions};
use pitch::NoteObservation;

/// Represents the result of a single audio analysis frame.
#[derive(Debug, Clone, Default)]
pub struct AnalysisResult {
    /// The resolved chord; empty when no peak cleared the threshold.
    pub chord: Chord,
    /// The chord the session holds after this frame.
    pub sticky: Chord,
    /// Spectrum the chord was read from.
    pub spectrum: Spectrum,
    /// Peaks that were mapped to notes.
    pub observations: Vec<NoteObservation>,
    /// Interval votes and third bias behind the chord.
    pub evidence: Candidates,
    /// Profile weighting window at every spectrum bin, for overlays.
    pub profile_window: Vec<f32>,
}

/// Spectrum analysis and root resolution over successive sample buffers,
/// keeping the resolver's sticky state between frames.
pub struct ChordAnalyzer {
    analyzer: SpectrumAnalyzer,
    options: SpectrumOptions,
    resolver: RootResolver,
    session: ResolutionSession,
}

impl ChordAnalyzer {
    pub fn new(config: &TriadConfig, sink: SharedSink) -> Self {
        Self {
            analyzer: SpectrumAnalyzer::new(config.capture.sample_rate),
            options: config.spectrum,
            resolver: RootResolver::new(&config.resolver, sink),
            session: ResolutionSession::new(),
        }
    }

    pub fn resolver(&self) -> &RootResolver {
        &self.resolver
    }

    pub fn session(&self) -> &ResolutionSession {
        &self.session
    }

    /// Forgets the sticky root and quality.
    pub fn reset(&mut self) {
        self.session = ResolutionSession::new();
    }

    pub fn analyze(&mut self, samples: &[i16]) -> AnalysisResult {
        let spectrum = self.analyzer.compute_spectrum(samples, &self.options);
        let resolution = self.resolver.resolve_detailed(&mut self.session, &spectrum);
        let (_, profile_window) = self
            .resolver
            .voter()
            .profile_window(spectrum.bin_width(), spectrum.len());
        AnalysisResult {
            chord: resolution.chord,
            sticky: self.session.chord(),
            spectrum,
            observations: resolution.observations,
            evidence: *self.session.candidates(),
            profile_window,
        }
    }
}
