//! Per-fixture lifecycle state machine
//!
//! Every fixture instance moves through
//! `Pending -> Resolving -> Ready -> TearingDown -> Done`, with `Failed`
//! terminal from `Resolving` (setup threw) or `TearingDown` (teardown threw).
//! Transitions outside this machine are internal errors, never silent.

use crate::errors::{ComposeError, Result};

/// Lifecycle state of a single fixture instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureState {
    /// Known to the run, setup not yet started
    Pending,
    /// Setup procedure is executing
    Resolving,
    /// Value available to the test body and to dependents
    Ready,
    /// Teardown procedure is executing
    TearingDown,
    /// Teardown completed
    Done,
    /// Setup or teardown failed; terminal
    Failed,
}

impl FixtureState {
    /// Check and perform a transition, returning the new state
    pub fn advance(self, next: FixtureState) -> Result<FixtureState> {
        use FixtureState::*;
        let legal = matches!(
            (self, next),
            (Pending, Resolving)
                | (Resolving, Ready)
                | (Resolving, Failed)
                | (Ready, TearingDown)
                | (TearingDown, Done)
                | (TearingDown, Failed)
        );
        if legal {
            Ok(next)
        } else {
            Err(ComposeError::internal(format!(
                "illegal fixture state transition {self:?} -> {next:?}"
            )))
        }
    }

    /// True once the fixture can no longer change state
    pub fn is_terminal(self) -> bool {
        matches!(self, FixtureState::Done | FixtureState::Failed)
    }
}
