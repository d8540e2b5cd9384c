//! # UI Module
//!
//! This module contains all UI components for the triad detector.

pub mod main_display;
pub mod spectrogram;
pub mod waveform;
