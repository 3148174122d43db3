//! Console diagnostic capture
//!
//! The `console` fixture subscribes to the host's diagnostic events, hands
//! the test a [`CapturedConsole`] for inspection, and registers a deferred
//! check that fails the run, softly and at teardown, for every error-severity
//! event, unless `console_options` opted out. Deferred means the test body
//! still runs to completion and every independent violation is reported.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use rigging_core::{DiagnosticEvent, DiagnosticLog, FixtureDefinition, Severity};

use crate::host::HostHandle;
use crate::sync::lock;

/// Options consumed by the `console` fixture
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleOptions {
    /// Suppress the deferred no-errors assertion
    pub allow_errors: bool,
}

impl ConsoleOptions {
    /// Opt out of the deferred no-errors assertion
    pub fn allowing_errors() -> Self {
        Self { allow_errors: true }
    }
}

/// Diagnostic events captured from the host, drained on demand
///
/// Draining on read keeps capture deterministic: events buffered by the host
/// channel become visible at the next read, with no background pumping.
#[derive(Clone)]
pub struct CapturedConsole {
    rx: Arc<Mutex<broadcast::Receiver<DiagnosticEvent>>>,
    log: DiagnosticLog,
}

impl CapturedConsole {
    fn new(rx: broadcast::Receiver<DiagnosticEvent>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
            log: DiagnosticLog::new(),
        }
    }

    fn drain(&self) {
        let mut rx = lock(&self.rx);
        loop {
            match rx.try_recv() {
                Ok(event) => self.log.record(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "diagnostic capture lagged, events dropped");
                }
                Err(_) => break,
            }
        }
    }

    /// Every captured event, in arrival order
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.drain();
        self.log.events()
    }

    /// Captured events of error severity
    pub fn errors(&self) -> Vec<DiagnosticEvent> {
        self.drain();
        self.log.with_severity(Severity::Error)
    }
}

/// The overridable `console_options` fixture
pub fn console_options_fixture() -> FixtureDefinition {
    FixtureDefinition::value("console_options", ConsoleOptions::default())
}

/// The `console` fixture: captures diagnostics and defers the no-errors
/// assertion to teardown
pub fn console_capture_fixture() -> FixtureDefinition {
    FixtureDefinition::with_fixture("console", |deps, mut slot| async move {
        let options = deps.get::<ConsoleOptions>("console_options")?;
        let host = deps.get::<HostHandle>("host")?;

        let console = CapturedConsole::new(host.subscribe_diagnostics());
        if !options.allow_errors {
            let watched = console.clone();
            slot.defer_check(move || {
                watched
                    .errors()
                    .into_iter()
                    .map(|event| format!("unexpected error-severity diagnostic: {}", event.message))
                    .collect()
            })?;
        }

        slot.serve(console.clone()).await?;

        // Final drain so late events are on record before the deferred check.
        console.drain();
        Ok(())
    })
    .depends_on(["host", "console_options"])
}
