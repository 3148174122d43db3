//! Unified error system for fixture composition
//!
//! This module provides a single error type covering every phase of a run:
//! graph resolution, setup, teardown, and deferred assertion reporting.
//! Setup-time errors fail fast; teardown-time failures are accumulated into a
//! [`TeardownReport`] and surfaced once, attributed to their fixture.

use std::fmt;

/// Unified error type for all composition operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum ComposeError {
    /// The fixture dependency graph contains a cycle
    #[error("cyclic fixture dependency: {}", chain.join(" -> "))]
    CyclicDependency {
        /// Fixture names along the cycle, first name repeated at the end
        chain: Vec<String>,
    },

    /// A requested or declared fixture name has no definition
    #[error("unknown fixture `{name}`")]
    UnknownFixture {
        /// The name that failed to resolve to a definition
        name: String,
    },

    /// A setup procedure read a dependency it never declared
    #[error("fixture `{fixture}` read undeclared dependency `{dependency}`")]
    UndeclaredDependency {
        /// The fixture whose setup performed the read
        fixture: String,
        /// The name that was read without being declared
        dependency: String,
    },

    /// A fixture's setup procedure returned an error or panicked
    #[error("setup of fixture `{fixture}` failed: {reason}")]
    Setup {
        /// The fixture whose setup failed
        fixture: String,
        /// Rendered failure reason
        reason: String,
    },

    /// A fixture was not resolved because one of its dependencies failed
    #[error("fixture `{fixture}` unavailable: dependency `{dependency}` failed")]
    DependencyFailed {
        /// The fixture that could not be resolved
        fixture: String,
        /// The dependency that failed
        dependency: String,
    },

    /// Composition misuse: bad override target, a setup that never served a
    /// value, a double serve, or a malformed registry
    #[error("configuration error: {message}")]
    Config {
        /// Description of the misuse
        message: String,
    },

    /// A fixture value was present but had a different type than requested
    #[error("fixture `{name}` holds a value of a different type")]
    TypeMismatch {
        /// The fixture whose value failed to downcast
        name: String,
    },

    /// The test body exceeded its configured time limit
    #[error("test body timed out after {limit_ms}ms")]
    BodyTimedOut {
        /// The configured limit in milliseconds
        limit_ms: u64,
    },

    /// One or more teardown procedures failed or deferred assertions fired
    #[error("teardown reported failures: {report}")]
    Teardown {
        /// The accumulated per-fixture failures
        report: TeardownReport,
    },

    /// Internal invariant violation (broken channel, illegal state transition)
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated invariant
        message: String,
    },
}

impl ComposeError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a setup error attributed to a fixture
    pub fn setup(fixture: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Setup {
            fixture: fixture.into(),
            reason: reason.into(),
        }
    }

    /// Create an unknown-fixture error
    pub fn unknown(name: impl Into<String>) -> Self {
        Self::UnknownFixture { name: name.into() }
    }
}

/// A single failed teardown, attributed to its fixture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownFailure {
    /// The fixture whose teardown failed
    pub fixture: String,
    /// Rendered failure reason
    pub reason: String,
}

impl fmt::Display for TeardownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fixture `{}`: {}", self.fixture, self.reason)
    }
}

/// A deferred assertion raised by a passive observer at teardown time
///
/// Deferred assertions are soft: they never prevent other teardowns from
/// running, and one run may report several independent violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredAssertion {
    /// The fixture whose observer raised the violation
    pub fixture: String,
    /// Description of the violated expectation
    pub message: String,
}

impl fmt::Display for DeferredAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fixture `{}`: {}", self.fixture, self.message)
    }
}

/// Accumulated outcome of tearing down a run
///
/// Teardown never short-circuits: every fixture's teardown runs even when an
/// earlier one failed, and everything collected here is surfaced together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Teardown procedures that returned an error, panicked, or timed out
    pub failures: Vec<TeardownFailure>,
    /// Deferred observer assertions that fired
    pub deferred: Vec<DeferredAssertion>,
}

impl TeardownReport {
    /// True when no teardown failed and no deferred assertion fired
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty() && self.deferred.is_empty()
    }

    /// Merge another report into this one, preserving order
    pub fn absorb(&mut self, other: TeardownReport) {
        self.failures.extend(other.failures);
        self.deferred.extend(other.deferred);
    }

    /// Convert into a `Result`, erroring when anything was collected
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ComposeError::Teardown { report: self })
        }
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(self.failures.len() + self.deferred.len());
        for failure in &self.failures {
            parts.push(format!("teardown of {failure}"));
        }
        for assertion in &self.deferred {
            parts.push(format!("deferred assertion on {assertion}"));
        }
        write!(f, "{}", parts.join("; "))
    }
}

/// Standard Result type for composition operations
pub type Result<T> = std::result::Result<T, ComposeError>;
