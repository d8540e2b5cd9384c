//! # Waveform Widget
//!
//! Draws the last capture pass against its time axis as a single trace.

use iced::widget::canvas::{self, Geometry, Path, Stroke};
use iced::widget::container;
use iced::{mouse, Color, Element, Point, Rectangle, Renderer, Theme};
use triad_core::fft;

const TRACE_COLOR: Color = Color {
    r: 0.298,
    g: 0.686,
    b: 0.314,
    a: 1.0,
};

/// Samples in `-1.0..=1.0` against their capture time in seconds.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    pub times: Vec<f32>,
    pub samples: Vec<f32>,
    /// Time of the last sample of the full pass.
    pub duration: f32,
}

impl Trace {
    /// Block-averages a capture pass down to at most `points` points.
    pub fn from_capture(time_axis: &[f32], samples: &[i16], points: usize) -> Self {
        let len = time_axis.len().min(samples.len());
        let scale = len.div_ceil(points.max(1)).max(1);
        let normalised: Vec<f32> = samples[..len]
            .iter()
            .map(|&s| s as f32 / i16::MAX as f32)
            .collect();
        Self {
            times: fft::downsample(&time_axis[..len], scale),
            samples: fft::downsample(&normalised, scale),
            duration: time_axis[..len].last().copied().unwrap_or_default(),
        }
    }
}

pub struct Waveform {
    trace: Trace,
}

impl Waveform {
    pub fn new(trace: Trace) -> Self {
        Self { trace }
    }

    pub fn view(self) -> Element<'static, crate::Message> {
        container(
            canvas::Canvas::new(self)
                .width(iced::Length::Fill)
                .height(iced::Length::Fill),
        )
        .into()
    }
}

impl<Message> canvas::Program<Message> for Waveform {
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

        let trace = &self.trace;
        if !bounds.width.is_finite() || trace.samples.len() < 2 || trace.duration <= 0.0 {
            return vec![frame.into_geometry()];
        }

        let middle = bounds.height / 2.0;
        let point = |time: f32, sample: f32| {
            Point::new(
                time / trace.duration * bounds.width,
                middle - sample.clamp(-1.0, 1.0) * middle,
            )
        };
        let path = Path::new(|builder| {
            let mut points = trace.times.iter().zip(&trace.samples);
            if let Some((&t, &s)) = points.next() {
                builder.move_to(point(t, s));
            }
            for (&t, &s) in points {
                builder.line_to(point(t, s));
            }
        });
        frame.stroke(
            &path,
            Stroke::default().with_width(1.0).with_color(TRACE_COLOR),
        );

        vec![frame.into_geometry()]
    }
}
