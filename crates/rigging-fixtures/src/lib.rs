//! Built-in fixtures for page testing
//!
//! This crate supplies the fixtures the telemetry-dashboard test suites are
//! built from: the [`PageHost`] seam over the browser collaborator, manual
//! clock control, console diagnostic capture with a deferred no-errors
//! assertion, and coverage artifact persistence. [`base_registry`] bundles
//! them; suites extend it with their own definitions and override `host`
//! with a real engine adapter.

pub mod clock;
pub mod coverage;
pub mod diagnostics;
pub mod host;
pub mod kit;
mod sync;

pub use clock::{ClockOptions, ManualClock, DEFAULT_CLOCK_EPOCH_MS};
pub use coverage::{CoverageCollector, CoverageOptions, COVERAGE_SINK_FUNCTION};
pub use diagnostics::{CapturedConsole, ConsoleOptions};
pub use host::{HostFunction, HostHandle, MockPageHost, PageHost};
pub use kit::base_registry;
