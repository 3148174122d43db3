//! The base registry
//!
//! Suites start from [`base_registry`] and extend it with their own
//! definitions via [`FixtureRegistry::merge`]; redefining a built-in name
//! (most commonly `host`) replaces it.

use rigging_core::FixtureRegistry;

use crate::clock::{clock_options_fixture, manual_clock_fixture};
use crate::coverage::{coverage_fixture, coverage_options_fixture};
use crate::diagnostics::{console_capture_fixture, console_options_fixture};
use crate::host::host_fixture;

/// Registry of every built-in fixture
pub fn base_registry() -> FixtureRegistry {
    FixtureRegistry::new()
        .with(host_fixture())
        .with(clock_options_fixture())
        .with(manual_clock_fixture())
        .with(console_options_fixture())
        .with(console_capture_fixture())
        .with(coverage_options_fixture())
        .with(coverage_fixture())
}
