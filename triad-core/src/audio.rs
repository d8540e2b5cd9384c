//! # Audio Capture Module
//!
//! This module owns the audio input device and keeps a bounded buffer of the
//! most recent capture pass up to date from a background thread.
//!
//! ## Features
//! - Default input device selection through CPAL, 16-bit mono PCM
//! - Fixed-size windows read with a timeout
//! - Transparent recovery: a failed or stalled read reopens the device and
//!   yields a window of silence instead of an error
//! - Double buffering: the capture thread fills a private buffer and swaps it
//!   in whole, so readers never see a half-written pass
//!
//! ## Threads
//! The device is opened *inside* the capture thread (CPAL streams may not be
//! sent between threads), which is why the capture loop is handed a
//! [`SourceOpener`] rather than an open device.

use crate::config::CaptureConfig;
use crate::emit;
use crate::sink::SharedSink;
use anyhow::{Result, anyhow, bail};
use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::Level;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Callback packets buffered between the device and the capture thread.
const STREAM_QUEUE_DEPTH: usize = 64;

/// A blocking source of 16-bit mono samples.
pub trait SampleSource {
    /// Fills `chunk` completely, waiting at most `timeout`.
    fn read_chunk(&mut self, chunk: &mut [i16], timeout: Duration) -> Result<()>;
}

/// Opens (or reopens) a sample source. Called on the capture thread.
pub type SourceOpener = Box<dyn FnMut() -> Result<Box<dyn SampleSource>> + Send>;

/// State shared between the capture thread and readers.
#[derive(Debug, Default)]
struct SharedCapture {
    /// The last complete capture pass.
    front: Mutex<Vec<i16>>,
    /// Number of passes published so far.
    generation: AtomicU64,
    has_captured: AtomicBool,
    exiting: AtomicBool,
    running: AtomicBool,
}

/// The loop that runs on the capture thread: reads windows, recovers from
/// device failures and publishes complete passes.
struct CaptureLoop {
    opener: SourceOpener,
    source: Option<Box<dyn SampleSource>>,
    window_size: usize,
    window_count: usize,
    timeout: Duration,
    back: Vec<i16>,
    shared: Arc<SharedCapture>,
    sink: SharedSink,
}

impl CaptureLoop {
    fn new(
        opener: SourceOpener,
        config: &CaptureConfig,
        shared: Arc<SharedCapture>,
        sink: SharedSink,
    ) -> Self {
        let window_size = config.window_size.max(1);
        let window_count = config.window_count();
        Self {
            opener,
            source: None,
            window_size,
            window_count,
            timeout: config.read_timeout(),
            back: vec![0; window_size * window_count],
            shared,
            sink,
        }
    }

    fn into_opener(self) -> SourceOpener {
        self.opener
    }

    fn ensure_open(&mut self) -> bool {
        if self.source.is_none() {
            match (self.opener)() {
                Ok(source) => {
                    emit!(self.sink, Level::Info, "audio input opened");
                    self.source = Some(source);
                }
                Err(e) => {
                    emit!(self.sink, Level::Error, "could not open audio input: {e:#}");
                }
            }
        }
        self.source.is_some()
    }

    /// Reads one window from the device.
    ///
    /// A read that fails or times out is logged, the device is reopened and
    /// a window of silence is returned in its place.
    fn read_chunk(&mut self) -> Vec<i16> {
        let mut chunk = vec![0i16; self.window_size];
        if !self.ensure_open() {
            // Behave like a read that timed out rather than spinning.
            thread::sleep(self.timeout);
            return chunk;
        }

        let timeout = self.timeout;
        let result = match self.source.as_mut() {
            Some(source) => source.read_chunk(&mut chunk, timeout),
            None => Err(anyhow!("audio input not open")),
        };
        if let Err(e) = result {
            emit!(
                self.sink,
                Level::Warn,
                "audio read failed ({e:#}); reopening input and substituting silence"
            );
            self.source = None;
            self.ensure_open();
            chunk.fill(0);
        }
        chunk
    }

    /// Fills the capture buffer window by window and publishes it.
    ///
    /// With `forever` set this repeats until the stop flag is raised,
    /// otherwise exactly one pass is made. A pass interrupted by the stop
    /// flag is not published.
    fn record(&mut self, forever: bool) {
        while !self.shared.exiting.load(Ordering::Acquire) {
            self.shared.running.store(true, Ordering::Release);
            let mut complete = true;
            for i in 0..self.window_count {
                if i > 0 && self.shared.exiting.load(Ordering::Acquire) {
                    complete = false;
                    break;
                }
                let chunk = self.read_chunk();
                let lower = i * self.window_size;
                let upper = lower + self.window_size;
                self.back[lower..upper].copy_from_slice(&chunk);
            }
            if complete {
                self.publish();
            }
            if !forever {
                break;
            }
        }
        self.shared.running.store(false, Ordering::Release);
    }

    fn publish(&mut self) {
        let mut front = self.shared.front.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::swap(&mut *front, &mut self.back);
        drop(front);
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        self.shared.has_captured.store(true, Ordering::Release);
    }
}

/// Bounded capture buffer fed by a background thread.
pub struct CaptureBuffer {
    config: CaptureConfig,
    shared: Arc<SharedCapture>,
    opener: Option<SourceOpener>,
    worker: Option<JoinHandle<SourceOpener>>,
    sink: SharedSink,
}

impl CaptureBuffer {
    /// Creates a capture buffer reading from whatever `opener` opens.
    pub fn new(config: CaptureConfig, opener: SourceOpener, sink: SharedSink) -> Self {
        let samples = config.capture_samples();
        let shared = Arc::new(SharedCapture {
            front: Mutex::new(vec![0; samples]),
            ..SharedCapture::default()
        });
        Self {
            config,
            shared,
            opener: Some(opener),
            worker: None,
            sink,
        }
    }

    /// Creates a capture buffer on the default CPAL input device.
    pub fn with_default_device(config: CaptureConfig, sink: SharedSink) -> Self {
        let sample_rate = config.sample_rate;
        let device_sink = sink.clone();
        let opener: SourceOpener = Box::new(move || {
            let source = CpalSource::open(sample_rate, device_sink.clone())?;
            Ok(Box::new(source) as Box<dyn SampleSource>)
        });
        Self::new(config, opener, sink)
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn window_count(&self) -> usize {
        self.config.window_count()
    }

    /// Starts the background capture loop. Does nothing if it is already running.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let opener = self
            .opener
            .take()
            .ok_or_else(|| anyhow!("capture source lost after a crashed capture thread"))?;

        self.shared.exiting.store(false, Ordering::Release);
        let config = self.config.clone();
        let shared = self.shared.clone();
        let sink = self.sink.clone();
        let handle = thread::Builder::new()
            .name("triad-capture".into())
            .spawn(move || {
                let mut capture = CaptureLoop::new(opener, &config, shared, sink);
                capture.record(true);
                // The device is released here, on the thread that opened it.
                capture.into_opener()
            })?;
        self.worker = Some(handle);
        emit!(self.sink, Level::Debug, "capture thread started");
        Ok(())
    }

    /// Runs capture passes on the calling thread.
    ///
    /// Only available while the background loop is not running; a pass
    /// started with `forever` returns once [`CaptureBuffer::stop`] is called
    /// from elsewhere.
    pub fn record(&mut self, forever: bool) {
        let Some(opener) = self.opener.take() else {
            emit!(self.sink, Level::Warn, "record ignored: capture thread owns the input");
            return;
        };
        self.shared.exiting.store(false, Ordering::Release);
        let mut capture =
            CaptureLoop::new(opener, &self.config, self.shared.clone(), self.sink.clone());
        capture.record(forever);
        self.opener = Some(capture.into_opener());
    }

    /// Reads a single window on the calling thread, with the same recovery
    /// as the capture loop. `None` while the background loop owns the input.
    pub fn read_chunk(&mut self) -> Option<Vec<i16>> {
        let opener = self.opener.take()?;
        let mut capture =
            CaptureLoop::new(opener, &self.config, self.shared.clone(), self.sink.clone());
        let chunk = capture.read_chunk();
        self.opener = Some(capture.into_opener());
        Some(chunk)
    }

    /// Asks the capture loop to finish at the next window boundary.
    pub fn stop(&self) {
        self.shared.exiting.store(true, Ordering::Release);
    }

    /// Stops the loop, waits for the thread and releases the device.
    pub fn close(&mut self) {
        self.stop();
        if let Some(handle) = self.worker.take() {
            match handle.join() {
                Ok(opener) => self.opener = Some(opener),
                Err(_) => emit!(self.sink, Level::Error, "capture thread panicked"),
            }
            emit!(self.sink, Level::Debug, "capture thread joined");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// True once at least one full pass has been published.
    pub fn has_captured(&self) -> bool {
        self.shared.has_captured.load(Ordering::Acquire)
    }

    /// Number of passes published so far.
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }

    /// Copy of the last complete capture pass, if any.
    pub fn snapshot(&self) -> Option<Vec<i16>> {
        if !self.has_captured() {
            return None;
        }
        let front = self.shared.front.lock().unwrap_or_else(PoisonError::into_inner);
        Some(front.clone())
    }

    /// Time in seconds of every sample of a capture pass.
    pub fn time_axis(&self) -> Vec<f32> {
        let period = 1.0 / self.config.sample_rate.max(1) as f32;
        (0..self.config.capture_samples())
            .map(|i| i as f32 * period)
            .collect()
    }
}

impl Drop for CaptureBuffer {
    fn drop(&mut self) {
        self.close();
    }
}

enum StreamEvent {
    Samples(Vec<i16>),
    Failed(String),
}

/// Mono 16-bit input from a CPAL device.
pub struct CpalSource {
    _stream: cpal::Stream,
    events: Receiver<StreamEvent>,
    pending: Vec<i16>,
}

impl CpalSource {
    /// Opens the default input device at `sample_rate` and starts streaming.
    ///
    /// Devices without a 16-bit format are read as 32-bit float and converted.
    pub fn open(sample_rate: u32, sink: SharedSink) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("No input device available"))?;

        emit!(sink, Level::Info, "Using audio input device: {}", device.name()?);

        let configs = device.supported_input_configs()?.collect::<Vec<_>>();
        let supported = find_supported_config(configs, sample_rate)
            .ok_or_else(|| anyhow!("No input format supports {sample_rate} Hz"))?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported
            .with_sample_rate(cpal::SampleRate(sample_rate))
            .into();
        let channels = config.channels.max(1) as usize;

        emit!(
            sink,
            Level::Debug,
            "input config: {} Hz, {} channel(s), {:?}",
            sample_rate,
            channels,
            sample_format
        );

        let (tx, events) = crossbeam_channel::bounded(STREAM_QUEUE_DEPTH);
        let err_tx: Sender<StreamEvent> = tx.clone();
        let err_fn = move |err: cpal::StreamError| {
            let _ = err_tx.try_send(StreamEvent::Failed(err.to_string()));
        };

        let stream = match sample_format {
            cpal::SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let frame = data.iter().step_by(channels).copied().collect();
                    // Dropped if the capture thread is behind.
                    let _ = tx.try_send(StreamEvent::Samples(frame));
                },
                err_fn,
                None,
            )?,
            cpal::SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let frame = data.iter().step_by(channels).map(|&s| f32_to_i16(s)).collect();
                    let _ = tx.try_send(StreamEvent::Samples(frame));
                },
                err_fn,
                None,
            )?,
            other => bail!("unsupported sample format {other:?}"),
        };
        stream.play()?;

        Ok(Self {
            _stream: stream,
            events,
            pending: Vec::new(),
        })
    }
}

impl SampleSource for CpalSource {
    fn read_chunk(&mut self, chunk: &mut [i16], timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while self.pending.len() < chunk.len() {
            match self.events.recv_deadline(deadline) {
                Ok(StreamEvent::Samples(samples)) => self.pending.extend_from_slice(&samples),
                Ok(StreamEvent::Failed(msg)) => bail!("input stream failed: {msg}"),
                Err(RecvTimeoutError::Timeout) => bail!("no audio within {timeout:?}"),
                Err(RecvTimeoutError::Disconnected) => bail!("input stream closed"),
            }
        }
        let n = chunk.len();
        chunk.copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(())
    }
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Picks an input configuration that covers `target_rate`, preferring mono
/// and 16-bit integer samples, then 32-bit float.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    let rate = cpal::SampleRate(target_rate);
    configs
        .into_iter()
        .filter(|c| c.min_sample_rate() <= rate && rate <= c.max_sample_rate())
        .filter(|c| matches!(c.sample_format(), cpal::SampleFormat::I16 | cpal::SampleFormat::F32))
        .min_by_key(|c| {
            let format_rank = if c.sample_format() == cpal::SampleFormat::I16 { 0 } else { 1 };
            (c.channels() != 1, format_rank, c.channels())
        })
}
