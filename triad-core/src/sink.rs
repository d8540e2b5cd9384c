//! # Log Sink Module
//!
//! Every component of the core reports its decisions (device failures, root
//! changes, histogram dumps) through a [`LogSink`] handed to it at
//! construction. The core never touches a process-wide logger on its own;
//! the application decides where the messages go.

use log::Level;
use std::fmt::Arguments;
use std::sync::{Arc, Mutex};

/// Target name used when forwarding to the `log` facade.
pub const LOG_TARGET: &str = "triad";

/// Receiver for the diagnostic messages emitted by the core.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, args: &Arguments<'_>);
}

/// Shared handle to a sink, cloned into every component.
pub type SharedSink = Arc<dyn LogSink>;

/// Any thread-safe closure taking a level and the formatted message is a sink.
impl<F> LogSink for F
where
    F: Fn(Level, &Arguments<'_>) + Send + Sync,
{
    fn log(&self, level: Level, args: &Arguments<'_>) {
        self(level, args)
    }
}

/// Forwards every message to the `log` crate under the [`LOG_TARGET`] target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFacadeSink;

impl LogSink for LogFacadeSink {
    fn log(&self, level: Level, args: &Arguments<'_>) {
        log::log!(target: LOG_TARGET, level, "{}", args);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _level: Level, _args: &Arguments<'_>) {}
}

/// Keeps every message in memory. Handy for inspecting what the core decided.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<(Level, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all records logged so far.
    pub fn records(&self) -> Vec<(Level, String)> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// True if any record at `level` contains `needle`.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.records()
            .iter()
            .any(|(l, msg)| *l == level && msg.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn log(&self, level: Level, args: &Arguments<'_>) {
        if let Ok(mut records) = self.records.lock() {
            records.push((level, args.to_string()));
        }
    }
}

/// Default sink for components built without an explicit one.
pub fn facade() -> SharedSink {
    Arc::new(LogFacadeSink)
}

/// Logs through a [`LogSink`] with `format!`-style arguments.
#[macro_export]
macro_rules! emit {
    ($sink:expr, $level:expr, $($arg:tt)+) => {
        $sink.log($level, &format_args!($($arg)+))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_keeps_level_and_text() {
        let sink = MemorySink::new();
        emit!(sink, Level::Warn, "device {} failed", "hw:0");
        emit!(sink, Level::Debug, "root A");

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], (Level::Warn, "device hw:0 failed".to_string()));
        assert!(sink.contains(Level::Debug, "root A"));
        assert!(!sink.contains(Level::Warn, "root A"));
    }

    #[test]
    fn closures_are_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink: SharedSink = Arc::new(move |level: Level, args: &Arguments<'_>| {
            seen_clone.lock().unwrap().push(format!("{level}: {args}"));
        });
        emit!(sink, Level::Info, "hello {}", 42);
        assert_eq!(seen.lock().unwrap().as_slice(), ["INFO: hello 42"]);
    }
}
