//! Side-channel diagnostic collection and deferred assertions
//!
//! A fixture may register passive observers while it is `Ready` and assert
//! against the collected observations during its own teardown. The canonical
//! case: a console-capture fixture records every diagnostic emitted while the
//! test ran and raises a deferred violation for each error-severity event.

use std::sync::{Arc, Mutex};

/// Severity of a diagnostic event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Short uppercase tag used in rendered messages
    pub fn tag(self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

/// A single diagnostic event observed during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEvent {
    /// Event severity
    pub severity: Severity,
    /// Event payload text
    pub message: String,
}

impl DiagnosticEvent {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

/// Shared, thread-safe accumulator of diagnostic events
///
/// Cloning is cheap; all clones observe the same log.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticLog {
    events: Arc<Mutex<Vec<DiagnosticEvent>>>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one event
    pub fn record(&self, event: DiagnosticEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    /// Snapshot of every recorded event, in arrival order
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Snapshot of events at a given severity
    pub fn with_severity(&self, severity: Severity) -> Vec<DiagnosticEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.severity == severity)
            .collect()
    }

    /// Number of recorded events
    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// True when nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A deferred check evaluated during the owning fixture's teardown
///
/// Returns one message per violation; an empty vector means the check passed.
/// Violations become [`crate::errors::DeferredAssertion`] entries in the
/// teardown report, so they are soft and never suppress other teardowns.
pub type DeferredCheck = Box<dyn FnOnce() -> Vec<String> + Send>;
