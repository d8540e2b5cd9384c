//! # Spectrogram Widget
//!
//! Draws the magnitude spectrum of the last capture pass as a bar chart, with
//! the peak threshold as a horizontal line, the profile weighting window as a
//! curve and a marker above every peak that was mapped to a note.

use iced::widget::canvas::{self, Geometry, Path, Stroke, Text};
use iced::widget::container;
use iced::{mouse, Color, Element, Pixels, Point, Rectangle, Renderer, Size, Theme};
use triad_core::fft;

/// Small epsilon value to prevent log(0) errors in magnitude calculations.
const EPSILON: f32 = 1e-12;

/// Most bars drawn; longer spectra are block-averaged down to this.
const MAX_BARS: usize = 256;

const BAR_COLOR: Color = Color {
    r: 0.204,
    g: 0.596,
    b: 0.859,
    a: 1.0,
};
const THRESHOLD_COLOR: Color = Color {
    r: 0.8,
    g: 0.2,
    b: 0.2,
    a: 1.0,
};
const WINDOW_COLOR: Color = Color {
    r: 0.7,
    g: 0.7,
    b: 0.7,
    a: 0.8,
};
const PEAK_COLOR: Color = Color {
    r: 1.0,
    g: 0.84,
    b: 0.0,
    a: 1.0,
};

/// A labelled peak, placed by frequency.
#[derive(Debug, Clone)]
pub struct PeakMarker {
    pub frequency: f32,
    pub label: &'static str,
}

pub struct Spectrogram {
    bars: Vec<f32>,
    /// Frequency at the right edge of the chart.
    max_frequency: f32,
    threshold: f32,
    /// Profile window, averaged the same way as the bars.
    window: Vec<f32>,
    peaks: Vec<PeakMarker>,
}

impl Spectrogram {
    pub fn new(
        magnitudes: &[f32],
        max_frequency: f32,
        threshold: f32,
        window: &[f32],
        peaks: Vec<PeakMarker>,
    ) -> Self {
        let scale = magnitudes.len().div_ceil(MAX_BARS).max(1);
        Self {
            bars: fft::downsample(magnitudes, scale),
            max_frequency,
            threshold,
            window: fft::downsample(window, scale),
            peaks,
        }
    }

    pub fn view(self) -> Element<'static, crate::Message> {
        container(
            canvas::Canvas::new(self)
                .width(iced::Length::Fill)
                .height(iced::Length::Fill),
        )
        .into()
    }

    /// Height of `magnitude` on a log scale topped by `log_max`.
    fn scaled_height(magnitude: f32, log_max: f32, height: f32) -> f32 {
        ((magnitude + EPSILON).ln() / log_max * height).clamp(0.0, height)
    }
}

impl<Message> canvas::Program<Message> for Spectrogram {
    type State = ();

    fn draw(
        &self,
        _state: &Self::State,
        renderer: &Renderer,
        _theme: &Theme,
        bounds: Rectangle,
        _cursor: mouse::Cursor,
    ) -> Vec<Geometry> {
        let mut frame = canvas::Frame::new(renderer, bounds.size());

        if !bounds.width.is_finite() || !bounds.height.is_finite() || self.bars.is_empty() {
            return vec![frame.into_geometry()];
        }

        let max_magnitude = self
            .bars
            .iter()
            .fold(self.threshold, |max, &val| val.max(max));
        if max_magnitude <= 1.0 {
            return vec![frame.into_geometry()];
        }
        let log_max = (max_magnitude + EPSILON).ln();

        let bar_width = (bounds.width / self.bars.len() as f32).max(1.0);
        for (i, &magnitude) in self.bars.iter().enumerate() {
            let height = Self::scaled_height(magnitude, log_max, bounds.height);
            if height.is_finite() && height > 0.0 {
                let bar = Path::rectangle(
                    Point::new(i as f32 * bar_width, bounds.height - height),
                    Size::new(bar_width, height),
                );
                frame.fill(&bar, BAR_COLOR);
            }
        }

        let threshold_y = bounds.height - Self::scaled_height(self.threshold, log_max, bounds.height);
        let line = Path::line(
            Point::new(0.0, threshold_y),
            Point::new(bounds.width, threshold_y),
        );
        frame.stroke(
            &line,
            Stroke::default().with_width(1.0).with_color(THRESHOLD_COLOR),
        );

        if self.window.len() > 1 {
            let point = |i: usize, value: f32| {
                Point::new(
                    (i as f32 + 0.5) * bar_width,
                    bounds.height - Self::scaled_height(value, log_max, bounds.height),
                )
            };
            let curve = Path::new(|builder| {
                builder.move_to(point(0, self.window[0]));
                for (i, &value) in self.window.iter().enumerate().skip(1) {
                    builder.line_to(point(i, value));
                }
            });
            frame.stroke(
                &curve,
                Stroke::default().with_width(1.0).with_color(WINDOW_COLOR),
            );
        }

        if self.max_frequency > 0.0 {
            for peak in &self.peaks {
                let x = peak.frequency / self.max_frequency * bounds.width;
                if !(0.0..=bounds.width).contains(&x) {
                    continue;
                }
                frame.fill(&Path::circle(Point::new(x, 8.0), 3.0), PEAK_COLOR);
                frame.fill_text(Text {
                    content: peak.label.to_string(),
                    position: Point::new(x + 5.0, 2.0),
                    color: PEAK_COLOR,
                    size: Pixels(12.0),
                    ..Text::default()
                });
            }
        }

        vec![frame.into_geometry()]
    }
}
