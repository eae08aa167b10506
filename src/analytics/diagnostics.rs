//! Internal record of failures the tracker swallows.
//!
//! Nothing in the tracking path may fail the caller, so load, send, fallback and storage errors
//! end up here instead. Non-production builds also echo them to the debug log.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::analytics::constants::DIAGNOSTICS_CAPACITY;
use crate::analytics::error::AnalyticsError;
use crate::analytics::logger::LOGGER;
use crate::platform::Clock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    LoadFailure,
    SendFailure,
    FallbackFailure,
    StorageFailure,
    Misconfiguration,
}

impl DiagnosticKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticKind::LoadFailure => "load-failure",
            DiagnosticKind::SendFailure => "send-failure",
            DiagnosticKind::FallbackFailure => "fallback-failure",
            DiagnosticKind::StorageFailure => "storage-failure",
            DiagnosticKind::Misconfiguration => "misconfiguration",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub at_ms: u64,
}

pub struct Diagnostics {
    verbose: bool,
    clock: Arc<dyn Clock>,
    entries: Mutex<VecDeque<Diagnostic>>,
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("verbose", &self.verbose)
            .field("entries", &self.entries.lock().unwrap().len())
            .finish()
    }
}

impl Diagnostics {
    pub fn new(verbose: bool, clock: Arc<dyn Clock>) -> Self {
        Self {
            verbose,
            clock,
            entries: Mutex::new(VecDeque::with_capacity(DIAGNOSTICS_CAPACITY)),
        }
    }

    pub fn report(&self, kind: DiagnosticKind, error: &AnalyticsError) {
        self.record(kind, error.to_string());
    }

    pub fn record(&self, kind: DiagnosticKind, message: impl Into<String>) {
        let message = message.into();
        self.note(format!("{}: {}", kind.as_str(), message));

        let mut entries = self.entries.lock().unwrap();
        if entries.len() == DIAGNOSTICS_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(Diagnostic {
            kind,
            message,
            at_ms: self.clock.now_millis(),
        });
    }

    /// Debug-level log line, suppressed in production.
    pub fn note(&self, message: impl AsRef<str>) {
        if self.verbose {
            LOGGER.debug(message);
        }
    }

    pub fn recent(&self) -> Vec<Diagnostic> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.kind == kind)
            .count()
    }
}
