//! # Triad - Live Chord Root GUI
//!
//! Shows the root and third quality of whatever is being played into the
//! default input device, with the spectrum it was read from.
//!
//! ## Architecture
//! - **Main Thread**: Iced GUI application with dark theme
//! - **Capture Thread**: Owned by `CaptureBuffer`, fills the sample buffer
//! - **Analysis Thread**: Turns every new capture pass into an `AnalysisResult`
//! - **Communication**: Crossbeam channels for results and worker commands
//! - **Updates**: 60 FPS polling via subscription system

mod ui;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use iced::{window, Element, Subscription, Task, Theme};
use log::{debug, error, info, warn};
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use triad_core::audio::CaptureBuffer;
use triad_core::{sink, AnalysisResult, ChordAnalyzer, SharedSink, TriadConfig};
use ui::main_display::create_main_view;
use ui::waveform::Trace;

/// Configuration file read at startup and by "Load config".
const CONFIG_PATH: &str = "triad.json";

/// How often the analysis thread checks for a new capture pass.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Points kept of each capture pass for the waveform strip.
const WAVEFORM_POINTS: usize = 512;

/// Main entry point for the triad application.
pub fn main() -> iced::Result {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Starting triad application...");

    let result = iced::application("Triad", TriadApp::update, TriadApp::view)
        .subscription(TriadApp::subscription)
        .theme(TriadApp::theme)
        .window(window::Settings {
            exit_on_close_request: false,
            ..window::Settings::default()
        })
        .run();
    info!("Application finished with result: {:?}", result);
    result
}

#[derive(Debug, Clone)]
pub enum Message {
    // Panel visibility
    ToggleSpectrum,
    ToggleEvidence,

    /// Forget the sticky root and quality.
    ResetChord,

    SaveConfig,
    LoadConfig,

    /// Window close button or the Exit button.
    Exit,

    /// Timer tick for real-time updates
    Tick,
}

/// UI-specific data needed for rendering the interface.
#[derive(Debug, Clone)]
pub struct AppDisplayData {
    pub audio_worker_active: bool,
    pub last_analysis: Option<AnalysisResult>,
    /// The pass behind `last_analysis`, for the waveform strip.
    pub waveform: Trace,
    /// Peak threshold, drawn over the spectrum.
    pub threshold: f32,
    pub spectrum_visible: bool,
    pub evidence_visible: bool,
    /// Outcome of the last config save or load.
    pub status: Option<String>,
}

/// One analysed capture pass, sent to the GUI thread.
#[derive(Debug)]
struct Frame {
    analysis: AnalysisResult,
    waveform: Trace,
}

/// Requests from the GUI thread to the analysis thread.
#[derive(Debug)]
enum WorkerCommand {
    Reset,
    Reconfigure(TriadConfig),
    Shutdown,
}

#[derive(Debug)]
struct AudioWorker {
    commands: Sender<WorkerCommand>,
    thread_handle: Option<JoinHandle<()>>,
}

impl AudioWorker {
    fn spawn(config: TriadConfig, results: Sender<Frame>) -> Result<Self> {
        let (commands, command_rx) = crossbeam_channel::unbounded();
        let thread_handle = thread::Builder::new()
            .name("triad-analysis".into())
            .spawn(move || run_analysis(config, command_rx, results))
            .context("spawning the analysis thread")?;
        Ok(Self {
            commands,
            thread_handle: Some(thread_handle),
        })
    }

    fn send(&self, command: WorkerCommand) {
        if self.commands.send(command).is_err() {
            warn!("Analysis thread is gone");
        }
    }

    fn shutdown(&mut self) {
        self.send(WorkerCommand::Shutdown);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("Analysis thread panicked");
            }
        }
    }
}

struct TriadApp {
    config: TriadConfig,
    audio_worker: Option<AudioWorker>,
    analysis_receiver: Receiver<Frame>,
    display_data: AppDisplayData,
}

impl Default for TriadApp {
    fn default() -> Self {
        let config = load_config_or_default(CONFIG_PATH);
        let (analysis_tx, analysis_rx) = crossbeam_channel::unbounded();

        let audio_worker = match AudioWorker::spawn(config.clone(), analysis_tx) {
            Ok(worker) => Some(worker),
            Err(e) => {
                error!("{e:#}");
                None
            }
        };

        Self {
            display_data: AppDisplayData {
                audio_worker_active: audio_worker.is_some(),
                last_analysis: None,
                waveform: Trace::default(),
                threshold: config.resolver.threshold,
                spectrum_visible: true,
                evidence_visible: false,
                status: None,
            },
            config,
            audio_worker,
            analysis_receiver: analysis_rx,
        }
    }
}

impl TriadApp {
    fn update(&mut self, message: Message) -> Task<Message> {
        debug!("Received message: {:?}", message);

        match message {
            Message::Exit => {
                info!("Exit requested - stopping analysis...");
                self.display_data.audio_worker_active = false;
                if let Some(mut worker) = self.audio_worker.take() {
                    worker.shutdown();
                }
                return iced::exit();
            }
            Message::ToggleSpectrum => {
                self.display_data.spectrum_visible = !self.display_data.spectrum_visible;
            }
            Message::ToggleEvidence => {
                self.display_data.evidence_visible = !self.display_data.evidence_visible;
            }
            Message::ResetChord => {
                if let Some(worker) = &self.audio_worker {
                    worker.send(WorkerCommand::Reset);
                }
                self.display_data.last_analysis = None;
            }
            Message::SaveConfig => {
                self.display_data.status = Some(match self.config.save(CONFIG_PATH) {
                    Ok(()) => format!("Saved {CONFIG_PATH}"),
                    Err(e) => {
                        error!("Error saving config: {e:#}");
                        format!("Could not save {CONFIG_PATH}")
                    }
                });
            }
            Message::LoadConfig => match TriadConfig::load(CONFIG_PATH) {
                Ok(config) => {
                    info!("Loaded {CONFIG_PATH}");
                    self.display_data.threshold = config.resolver.threshold;
                    self.display_data.last_analysis = None;
                    if let Some(worker) = &self.audio_worker {
                        worker.send(WorkerCommand::Reconfigure(config.clone()));
                    }
                    self.config = config;
                    self.display_data.status = Some(format!("Loaded {CONFIG_PATH}"));
                }
                Err(e) => {
                    error!("Error loading config: {e:#}");
                    self.display_data.status = Some(format!("Could not load {CONFIG_PATH}"));
                }
            },
            Message::Tick => {
                // Only the newest result is displayed.
                if let Some(frame) = self.analysis_receiver.try_iter().last() {
                    self.display_data.last_analysis = Some(frame.analysis);
                    self.display_data.waveform = frame.waveform;
                }
            }
        }
        Task::none()
    }

    fn view(&self) -> Element<'_, Message> {
        create_main_view(&self.display_data)
    }

    fn subscription(&self) -> Subscription<Message> {
        Subscription::batch([
            iced::time::every(Duration::from_millis(16)).map(|_| Message::Tick),
            window::close_requests().map(|_| Message::Exit),
        ])
    }

    fn theme(&self) -> Theme {
        Theme::Dark
    }
}

fn load_config_or_default(path: &str) -> TriadConfig {
    if !Path::new(path).exists() {
        info!("No {path}, using the default configuration");
        return TriadConfig::default();
    }
    match TriadConfig::load(path) {
        Ok(config) => config,
        Err(e) => {
            warn!("Ignoring {path}: {e:#}");
            TriadConfig::default()
        }
    }
}

fn start_capture(config: &TriadConfig, sink: &SharedSink) -> CaptureBuffer {
    let mut capture = CaptureBuffer::with_default_device(config.capture.clone(), sink.clone());
    if let Err(e) = capture.start() {
        error!("Could not start capture: {e:#}");
    }
    capture
}

/// Analysis thread body: analyses every new capture pass until shut down.
fn run_analysis(
    mut config: TriadConfig,
    commands: Receiver<WorkerCommand>,
    results: Sender<Frame>,
) {
    let sink = sink::facade();
    let mut capture = start_capture(&config, &sink);
    let mut time_axis = capture.time_axis();
    let mut analyzer = ChordAnalyzer::new(&config, sink.clone());
    let mut seen_generation = 0;

    loop {
        crossbeam_channel::select! {
            recv(commands) -> command => match command {
                Ok(WorkerCommand::Reset) => {
                    info!("Chord reset");
                    analyzer.reset();
                }
                Ok(WorkerCommand::Reconfigure(new_config)) => {
                    capture.close();
                    config = new_config;
                    capture = start_capture(&config, &sink);
                    time_axis = capture.time_axis();
                    analyzer = ChordAnalyzer::new(&config, sink.clone());
                    seen_generation = 0;
                }
                Ok(WorkerCommand::Shutdown) | Err(_) => break,
            },
            default(POLL_INTERVAL) => {
                let generation = capture.generation();
                if generation != seen_generation {
                    seen_generation = generation;
                    if let Some(samples) = capture.snapshot() {
                        let frame = Frame {
                            analysis: analyzer.analyze(&samples),
                            waveform: Trace::from_capture(&time_axis, &samples, WAVEFORM_POINTS),
                        };
                        if results.send(frame).is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    capture.close();
    info!("Analysis thread finished");
}
