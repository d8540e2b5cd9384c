//! # Main Display Module
//!
//! This module contains the main display components and layout logic
//! for the triad detector.

use iced::widget::{button, column, container, horizontal_space, row, text, Space};
use iced::{Alignment, Element, Length};
use triad_core::{AnalysisResult, Chord, PitchClass};

use super::spectrogram::{PeakMarker, Spectrogram};
use super::waveform::Waveform;

/// Configuration for a single button in the settings sidebar
#[derive(Debug, Clone)]
struct ButtonConfig {
    label: &'static str,
    message: crate::Message,
}

const SETTINGS_CONFIG: &[(&str, &[ButtonConfig])] = &[
    ("Tools", &[
        ButtonConfig { label: "Spectrum", message: crate::Message::ToggleSpectrum },
        ButtonConfig { label: "Evidence", message: crate::Message::ToggleEvidence },
        ButtonConfig { label: "Reset chord", message: crate::Message::ResetChord },
    ]),
    ("Program", &[
        ButtonConfig { label: "Save config", message: crate::Message::SaveConfig },
        ButtonConfig { label: "Load config", message: crate::Message::LoadConfig },
        ButtonConfig { label: "Exit", message: crate::Message::Exit },
    ]),
];

/// Creates the complete main application view
pub fn create_main_view(data: &crate::AppDisplayData) -> Element<'static, crate::Message> {
    if !data.audio_worker_active {
        return container(text("Shutting down...").size(40))
            .width(Length::Fill)
            .height(Length::Fill)
            .center_x(Length::Fill)
            .center_y(Length::Fill)
            .into();
    }

    let title = text("Triad").size(28);

    let mut panels = column![create_chord_panel(data)].spacing(10);
    if let Some(panel) = create_spectrum_panel(data) {
        panels = panels.push(panel);
    }
    if let Some(panel) = create_evidence_panel(data) {
        panels = panels.push(panel);
    }

    let status = text(data.status.clone().unwrap_or_default()).size(14);

    let main_content = row![
        column![title, Space::with_height(20), panels, Space::with_height(10), status]
            .width(Length::Fill)
            .spacing(10),
        Space::with_width(10),
        create_sidebar(),
    ]
    .align_y(Alignment::Start)
    .padding(20);

    container(main_content)
        .width(Length::Fill)
        .height(Length::Fill)
        .into()
}

/// Large root and quality labels. Shows the held chord while the input
/// is quiet, dimmed.
fn create_chord_panel(data: &crate::AppDisplayData) -> Element<'static, crate::Message> {
    let (chord, live) = match &data.last_analysis {
        Some(analysis) if analysis.chord.root.is_some() => (analysis.chord, true),
        Some(analysis) => (analysis.sticky, false),
        None => (Chord::EMPTY, false),
    };

    let root = match chord.root {
        Some(_) => chord.root_label(),
        None => "--",
    };
    let quality = chord.quality_label().trim().to_string();
    let color = if live {
        iced::Color::WHITE
    } else {
        iced::Color::from_rgb(0.5, 0.5, 0.5)
    };

    let notes = data
        .last_analysis
        .as_ref()
        .map(observed_notes)
        .unwrap_or_default();

    let content = column![
        row![
            text(root.to_string()).size(64).color(color),
            Space::with_width(10),
            text(quality).size(32).color(color),
        ]
        .align_y(Alignment::End),
        Space::with_height(5),
        text(notes).size(14),
    ]
    .spacing(5);

    container(
        column![text("Chord").size(18), Space::with_height(10), content]
            .spacing(5)
            .padding(15),
    )
    .width(Length::Fill)
    .height(Length::Fixed(180.0))
    .into()
}

/// Observed notes in frequency order, e.g. `A (-1) C♯/D♭ (0)`.
fn observed_notes(analysis: &AnalysisResult) -> String {
    analysis
        .observations
        .iter()
        .map(|obs| format!("{} ({})", obs.label(), obs.octave_shift))
        .collect::<Vec<_>>()
        .join("  ")
}

fn create_spectrum_panel(data: &crate::AppDisplayData) -> Option<Element<'static, crate::Message>> {
    if !data.spectrum_visible {
        return None;
    }

    let spectrogram = match &data.last_analysis {
        Some(analysis) => {
            let peaks = analysis
                .observations
                .iter()
                .map(|obs| PeakMarker {
                    frequency: obs.frequency,
                    label: obs.label(),
                })
                .collect();
            let max_frequency = analysis
                .spectrum
                .frequencies
                .last()
                .copied()
                .unwrap_or_default();
            Spectrogram::new(
                &analysis.spectrum.magnitudes,
                max_frequency,
                data.threshold,
                &analysis.profile_window,
                peaks,
            )
        }
        None => Spectrogram::new(&[], 0.0, data.threshold, &[], Vec::new()),
    };

    let pass_length = if data.waveform.duration > 0.0 {
        format!("{:.0} ms pass", data.waveform.duration * 1000.0)
    } else {
        String::new()
    };

    let panel = container(
        column![
            row![text("Spectrum").size(18), horizontal_space(), text(pass_length).size(14)],
            Space::with_height(10),
            container(spectrogram.view())
                .width(Length::Fill)
                .height(Length::Fill),
            container(Waveform::new(data.waveform.clone()).view())
                .width(Length::Fill)
                .height(Length::Fixed(60.0)),
        ]
        .spacing(5)
        .padding(15),
    )
    .width(Length::Fill)
    .height(Length::Fixed(330.0));

    Some(panel.into())
}

/// Interval candidates of the last pass that found peaks.
fn create_evidence_panel(data: &crate::AppDisplayData) -> Option<Element<'static, crate::Message>> {
    if !data.evidence_visible {
        return None;
    }

    let evidence = data
        .last_analysis
        .as_ref()
        .map(|analysis| analysis.evidence)
        .unwrap_or_default();

    let label = |pc: Option<PitchClass>| pc.map_or("-", PitchClass::label).to_string();
    let bias = evidence
        .third_bias
        .map(|(lower, upper)| format!("{lower} / {upper}"))
        .unwrap_or_else(|| "-".to_string());

    let rows = [
        ("Minor 3rd", label(evidence.minor_third)),
        ("Major 3rd", label(evidence.major_third)),
        ("4th", label(evidence.fourth)),
        ("Diminished", label(evidence.diminished)),
        ("5th", label(evidence.fifth)),
        ("Most observed", label(evidence.mode)),
        ("Third bias", bias),
    ];
    let table = rows.into_iter().fold(column![].spacing(4), |col, (name, value)| {
        col.push(row![text(name).size(14), horizontal_space(), text(value).size(14)])
    });

    let panel = container(
        column![text("Evidence").size(18), Space::with_height(10), table]
            .spacing(5)
            .padding(15),
    )
    .width(Length::Fill);

    Some(panel.into())
}

/// Creates the settings sidebar widget.
fn create_sidebar() -> Element<'static, crate::Message> {
    let sections = SETTINGS_CONFIG
        .iter()
        .fold(column![].spacing(10), |col, &(title, buttons)| {
            col.push(make_settings_section(title, buttons))
        });

    container(sections.padding(15))
        .width(Length::Fixed(200.0))
        .height(Length::Fill)
        .into()
}

fn make_settings_section(
    title: &'static str,
    buttons: &[ButtonConfig],
) -> Element<'static, crate::Message> {
    let items = buttons.iter().fold(column![].spacing(8), |col, config| {
        col.push(
            button(text(config.label).size(14).width(Length::Fill))
                .padding([6, 10])
                .on_press(config.message.clone()),
        )
    });

    column![text(title).size(18), Space::with_height(10), items]
        .spacing(5)
        .into()
}
