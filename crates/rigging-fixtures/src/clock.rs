//! Manual clock control
//!
//! Deterministic page rendering needs a frozen clock installed before any
//! page script runs. The `clock` fixture reads its timestamp from the
//! overridable `clock_options` fixture, installs the override init script
//! into the host, and exposes a [`ManualClock`] handle the test can advance.
//! Teardown releases the freeze so anything still holding the handle
//! observes real time again.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rigging_core::FixtureDefinition;

use crate::host::HostHandle;
use crate::sync::lock;

/// Default freeze point when no timestamp is configured
pub const DEFAULT_CLOCK_EPOCH_MS: u64 = 1_700_000_000_000;

/// Options consumed by the `clock` fixture; override per test to pin time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClockOptions {
    /// Freeze the page clock at this Unix timestamp in milliseconds;
    /// `None` freezes at [`DEFAULT_CLOCK_EPOCH_MS`]
    pub fixed_ms: Option<u64>,
}

impl ClockOptions {
    /// Pin the clock to a specific Unix timestamp in milliseconds
    pub fn fixed(ms: u64) -> Self {
        Self { fixed_ms: Some(ms) }
    }

    /// The effective freeze point
    pub fn origin_ms(&self) -> u64 {
        self.fixed_ms.unwrap_or(DEFAULT_CLOCK_EPOCH_MS)
    }
}

#[derive(Debug)]
struct ClockState {
    now_ms: u64,
    frozen: bool,
}

/// Handle to the frozen page clock
///
/// Cloning is cheap; clones share the same state.
#[derive(Debug, Clone)]
pub struct ManualClock {
    state: Arc<Mutex<ClockState>>,
}

impl ManualClock {
    fn frozen_at(now_ms: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                now_ms,
                frozen: true,
            })),
        }
    }

    /// Current timestamp in milliseconds; wall time once released
    pub fn now_ms(&self) -> u64 {
        let state = lock(&self.state);
        if state.frozen {
            state.now_ms
        } else {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(state.now_ms)
        }
    }

    /// Jump the frozen clock to a specific timestamp
    pub fn set_ms(&self, now_ms: u64) {
        lock(&self.state).now_ms = now_ms;
    }

    /// Advance the frozen clock
    pub fn advance(&self, by: Duration) {
        lock(&self.state).now_ms += by.as_millis() as u64;
    }

    /// Whether the clock is still frozen
    pub fn is_frozen(&self) -> bool {
        lock(&self.state).frozen
    }

    fn release(&self) {
        lock(&self.state).frozen = false;
    }
}

/// The init script freezing `Date.now` and `performance.now` in the page
fn install_script(origin_ms: u64) -> String {
    format!(
        "(() => {{\n  const frozen = {origin_ms};\n  const start = Date.now();\n  Date.now = () => frozen;\n  performance.now = () => 0;\n  window.__rigging_clock = {{ frozen, start }};\n}})();"
    )
}

/// The overridable `clock_options` fixture
pub fn clock_options_fixture() -> FixtureDefinition {
    FixtureDefinition::value("clock_options", ClockOptions::default())
}

/// The `clock` fixture: installs the freeze script and serves a
/// [`ManualClock`]
pub fn manual_clock_fixture() -> FixtureDefinition {
    FixtureDefinition::with_fixture("clock", |deps, mut slot| async move {
        let options = deps.get::<ClockOptions>("clock_options")?;
        let host = deps.get::<HostHandle>("host")?;

        let origin = options.origin_ms();
        host.add_init_script(&install_script(origin)).await?;
        tracing::debug!(origin_ms = origin, "page clock frozen");

        let clock = ManualClock::frozen_at(origin);
        slot.serve(clock.clone()).await?;

        clock.release();
        Ok(())
    })
    .depends_on(["host", "clock_options"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_clock_does_not_tick() {
        let clock = ManualClock::frozen_at(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(clock.now_ms(), 1_000);
    }

    #[test]
    fn advance_moves_the_frozen_clock() {
        let clock = ManualClock::frozen_at(1_000);
        clock.advance(Duration::from_secs(60));
        assert_eq!(clock.now_ms(), 61_000);
    }

    #[test]
    fn release_returns_to_wall_time() {
        let clock = ManualClock::frozen_at(0);
        clock.release();
        assert!(!clock.is_frozen());
        // Wall time is well past the epoch.
        assert!(clock.now_ms() > 0);
    }

    #[test]
    fn install_script_embeds_the_origin() {
        assert!(install_script(42).contains("const frozen = 42;"));
    }
}
