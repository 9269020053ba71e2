//! Error types and reporting for pipeline stations.

use std::fmt;
use std::sync::Mutex;

/// Errors that can occur during station processing.
#[derive(Debug, Clone, PartialEq)]
pub enum StationError {
    /// Recoverable error; the station degrades the current unit and continues.
    Recoverable(String),
    /// Fatal error; the session must stop.
    Fatal(String),
}

impl fmt::Display for StationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            StationError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
        }
    }
}

impl std::error::Error for StationError {}

/// Trait for reporting station errors.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error from a station.
    fn report(&self, station: &str, error: &StationError);
}

/// Reporter that writes station errors to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, station: &str, error: &StationError) {
        match error {
            StationError::Recoverable(msg) => tracing::warn!(station, "{}", msg),
            StationError::Fatal(msg) => tracing::error!(station, "{}", msg),
        }
    }
}

/// Reporter that keeps every report in memory (tests, health probes).
#[derive(Debug, Default)]
pub struct CollectingReporter {
    reports: Mutex<Vec<(String, StationError)>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all reports so far.
    pub fn reports(&self) -> Vec<(String, StationError)> {
        self.reports
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Number of reports from `station`.
    pub fn count_for(&self, station: &str) -> usize {
        self.reports()
            .iter()
            .filter(|(name, _)| name == station)
            .count()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, station: &str, error: &StationError) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push((station.to_string(), error.clone()));
        }
    }
}
