//! # Fast Fourier Transform (FFT) Module
//!
//! Turns a captured sample window into a magnitude spectrum for peak picking
//! and display.
//!
//! ## Features
//! - FFT using RustFFT, planned once per window length
//! - DC offset removal before the transform
//! - Optional folding of the mirrored half, dB scaling, slicing and gain
//! - Block-average downsampling for display

use rustfft::{num_complex::Complex, Fft, FftPlanner, Length};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Small epsilon value to prevent log(0) in dB scaling.
const EPSILON: f32 = 1e-12;

/// Display normalisation applied to the magnitude axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Gain {
    Multiply(f32),
    Divide(f32),
}

impl Gain {
    fn apply(self, value: f32) -> f32 {
        match self {
            Gain::Multiply(g) => value * g,
            Gain::Divide(g) if g != 0.0 => value / g,
            Gain::Divide(_) => value,
        }
    }
}

/// Knobs for [`SpectrumAnalyzer::compute_spectrum`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumOptions {
    /// Add the reversed upper half of the spectrum onto the lower half.
    pub fold: bool,
    /// Convert magnitudes to `20 * log10(y)`.
    pub log_scale: bool,
    /// Keep only the first `len / slice_fraction` bins; 0 keeps everything.
    pub slice_fraction: usize,
    pub gain: Option<Gain>,
}

impl Default for SpectrumOptions {
    fn default() -> Self {
        Self {
            fold: true,
            log_scale: false,
            slice_fraction: 10,
            gain: Some(Gain::Divide(100.0)),
        }
    }
}

/// Frequency axis (Hz) and magnitude axis of equal length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Spectrum {
    pub frequencies: Vec<f32>,
    pub magnitudes: Vec<f32>,
}

impl Spectrum {
    pub fn new(frequencies: Vec<f32>, magnitudes: Vec<f32>) -> Self {
        debug_assert_eq!(frequencies.len(), magnitudes.len());
        Self {
            frequencies,
            magnitudes,
        }
    }

    pub fn len(&self) -> usize {
        self.magnitudes.len().min(self.frequencies.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spacing of the frequency axis, 0 for fewer than two bins.
    pub fn bin_width(&self) -> f32 {
        match self.frequencies.as_slice() {
            [first, second, ..] => second - first,
            _ => 0.0,
        }
    }
}

/// Removes the DC offset from a signal by making its average value zero.
fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Adds the reversed second half of `magnitudes` onto the first half.
pub fn fold_spectrum(magnitudes: &[f32]) -> Vec<f32> {
    let n = magnitudes.len();
    let half = n / 2;
    (0..half)
        .map(|i| magnitudes[i] + magnitudes[n - 1 - i])
        .collect()
}

/// Averages contiguous blocks of `scale` samples.
///
/// Trailing samples that do not fill a whole block are dropped, so the
/// result has `data.len() / scale` entries. A `scale` of 0 returns the data
/// unchanged.
pub fn downsample(data: &[f32], scale: usize) -> Vec<f32> {
    if scale == 0 {
        return data.to_vec();
    }
    data.chunks_exact(scale)
        .map(|block| block.iter().sum::<f32>() / scale as f32)
        .collect()
}

/// Computes magnitude spectra of 16-bit sample windows.
pub struct SpectrumAnalyzer {
    sample_rate: u32,
    planner: FftPlanner<f32>,
    plan: Option<Arc<dyn Fft<f32>>>,
}

impl SpectrumAnalyzer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            planner: FftPlanner::new(),
            plan: None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn plan_for(&mut self, len: usize) -> Arc<dyn Fft<f32>> {
        match &self.plan {
            Some(plan) if plan.len() == len => plan.clone(),
            _ => {
                let plan = self.planner.plan_fft_forward(len);
                self.plan = Some(plan.clone());
                plan
            }
        }
    }

    /// Magnitude of the forward FFT of `window` (full length, unfolded).
    pub fn magnitudes(&mut self, window: &[i16]) -> Vec<f32> {
        if window.is_empty() {
            return Vec::new();
        }
        let mut signal: Vec<f32> = window.iter().map(|&s| s as f32).collect();
        remove_dc_offset(&mut signal);

        let mut buffer: Vec<Complex<f32>> = signal
            .into_iter()
            .map(|sample| Complex { re: sample, im: 0.0 })
            .collect();
        self.plan_for(buffer.len()).process(&mut buffer);

        buffer.iter().map(|c| c.norm()).collect()
    }

    /// Runs the full spectrum pipeline over `window`.
    ///
    /// 1. FFT magnitudes
    /// 2. Optional fold of the mirrored half
    /// 3. Frequency axis at `sample_rate / window.len()` Hz per bin
    /// 4. Optional dB scaling
    /// 5. Optional slice to the first `len / slice_fraction` bins
    /// 6. Optional gain
    pub fn compute_spectrum(&mut self, window: &[i16], options: &SpectrumOptions) -> Spectrum {
        let full = self.magnitudes(window);
        if full.is_empty() {
            return Spectrum::default();
        }

        let mut magnitudes = if options.fold {
            fold_spectrum(&full)
        } else {
            full
        };

        let hz_per_bin = self.sample_rate as f32 / window.len() as f32;
        let mut frequencies: Vec<f32> = (0..magnitudes.len())
            .map(|i| i as f32 * hz_per_bin)
            .collect();

        if options.log_scale {
            for y in magnitudes.iter_mut() {
                *y = 20.0 * (*y).max(EPSILON).log10();
            }
        }

        if options.slice_fraction > 0 {
            let keep = magnitudes.len() / options.slice_fraction;
            magnitudes.truncate(keep);
            frequencies.truncate(keep);
        }

        if let Some(gain) = options.gain {
            for y in magnitudes.iter_mut() {
                *y = gain.apply(*y);
            }
        }

        Spectrum::new(frequencies, magnitudes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sine(freq: f32, sample_rate: u32, len: usize, amplitude: f32) -> Vec<i16> {
        (0..len)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                (amplitude * (2.0 * std::f32::consts::PI * freq * t).sin()) as i16
            })
            .collect()
    }

    fn raw() -> SpectrumOptions {
        SpectrumOptions {
            fold: false,
            log_scale: false,
            slice_fraction: 0,
            gain: None,
        }
    }

    #[test]
    fn downsample_drops_the_tail() {
        assert_eq!(downsample(&[1.0, 2.0, 3.0, 4.0, 5.0], 2), vec![1.5, 3.5]);
        assert_eq!(downsample(&[1.0, 2.0, 3.0], 3), vec![2.0]);
        assert!(downsample(&[1.0, 2.0], 3).is_empty());
        assert_eq!(downsample(&[1.0, 2.0], 0), vec![1.0, 2.0]);
    }

    #[test]
    fn fold_adds_the_reversed_upper_half() {
        assert_eq!(fold_spectrum(&[1.0, 2.0, 3.0, 4.0]), vec![5.0, 5.0]);
        assert_eq!(fold_spectrum(&[1.0, 2.0, 3.0, 4.0, 5.0]), vec![6.0, 6.0]);
    }

    #[test]
    fn peak_lands_on_the_tone_bin() {
        let sample_rate = 8192;
        let window = sine(512.0, sample_rate, 1024, 10_000.0);
        let mut analyzer = SpectrumAnalyzer::new(sample_rate);
        let spectrum = analyzer.compute_spectrum(&window, &raw());

        assert_eq!(spectrum.len(), 1024);
        assert_relative_eq!(spectrum.bin_width(), 8.0);
        let peak = spectrum.magnitudes[..512]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_relative_eq!(spectrum.frequencies[peak], 512.0);
    }

    #[test]
    fn options_fold_slice_and_scale() {
        let sample_rate = 8192;
        let window = sine(512.0, sample_rate, 1024, 10_000.0);
        let mut analyzer = SpectrumAnalyzer::new(sample_rate);
        let unscaled = analyzer.compute_spectrum(
            &window,
            &SpectrumOptions {
                fold: true,
                ..raw()
            },
        );
        assert_eq!(unscaled.len(), 512);

        let sliced = analyzer.compute_spectrum(&window, &SpectrumOptions::default());
        assert_eq!(sliced.len(), 51);
        assert_eq!(sliced.frequencies.len(), 51);
        assert_relative_eq!(sliced.magnitudes[10], unscaled.magnitudes[10] / 100.0, max_relative = 1e-4);

        let boosted = analyzer.compute_spectrum(
            &window,
            &SpectrumOptions {
                gain: Some(Gain::Multiply(2.0)),
                ..raw()
            },
        );
        let plain = analyzer.compute_spectrum(&window, &raw());
        assert_relative_eq!(boosted.magnitudes[64], plain.magnitudes[64] * 2.0, max_relative = 1e-4);
    }

    #[test]
    fn log_scale_is_decibels() {
        let window = sine(512.0, 8192, 1024, 10_000.0);
        let mut analyzer = SpectrumAnalyzer::new(8192);
        let plain = analyzer.compute_spectrum(&window, &raw());
        let db = analyzer.compute_spectrum(
            &window,
            &SpectrumOptions {
                log_scale: true,
                ..raw()
            },
        );
        assert_relative_eq!(db.magnitudes[64], 20.0 * plain.magnitudes[64].log10(), max_relative = 1e-4);
        assert!(db.magnitudes.iter().all(|y| y.is_finite()));
    }

    #[test]
    fn empty_window_gives_empty_spectrum() {
        let mut analyzer = SpectrumAnalyzer::new(48_100);
        assert!(analyzer.compute_spectrum(&[], &SpectrumOptions::default()).is_empty());
    }
}
