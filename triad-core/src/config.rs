//! # Configuration Module
//!
//! All tunable values of the pipeline in one serde-friendly structure, saved
//! to and loaded from pretty-printed JSON.

use crate::fft::SpectrumOptions;
use crate::tuning::OCTAVE_SPAN;
use crate::voting::ProfileWeighting;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

/// Capture device settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per device read.
    pub window_size: usize,
    /// Target length of one capture pass in seconds.
    pub capture_seconds: f32,
    /// Longest a single device read may block before silence is substituted.
    pub read_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            window_size: 4096,
            capture_seconds: 0.1,
            read_timeout_ms: 500,
        }
    }
}

impl CaptureConfig {
    /// Number of windows per capture pass: `ceil(seconds * rate / window)`,
    /// never less than one.
    pub fn window_count(&self) -> usize {
        if self.window_size == 0 {
            return 1;
        }
        let windows = (self.capture_seconds as f64 * self.sample_rate as f64
            / self.window_size as f64)
            .ceil();
        if windows.is_finite() && windows >= 1.0 {
            windows as usize
        } else {
            1
        }
    }

    /// Total samples held by one published capture buffer.
    pub fn capture_samples(&self) -> usize {
        self.window_count() * self.window_size
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Root resolver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Minimum magnitude for a local maximum to count as a peak.
    pub threshold: f32,
    /// Gain per octave shift, from the lowest covered shift to the highest.
    pub octave_gains: [f32; OCTAVE_SPAN],
    pub weighting: ProfileWeighting,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            threshold: 2e4,
            octave_gains: [1.0; OCTAVE_SPAN],
            weighting: ProfileWeighting::Magnitude,
        }
    }
}

/// Complete configuration of the pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TriadConfig {
    pub capture: CaptureConfig,
    pub spectrum: SpectrumOptions,
    pub resolver: ResolverConfig,
}

impl TriadConfig {
    /// Loads a configuration from a JSON file. Missing fields take defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file =
            File::open(path).with_context(|| format!("opening config {}", path.display()))?;
        let mut data = String::new();
        file.read_to_string(&mut data)?;
        let config = serde_json::from_str(&data)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Saves the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json_string = serde_json::to_string_pretty(self)?;
        let mut file =
            File::create(path).with_context(|| format!("creating config {}", path.display()))?;
        file.write_all(json_string.as_bytes())?;
        Ok(())
    }
}
