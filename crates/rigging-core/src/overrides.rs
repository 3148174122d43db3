//! Test-level fixture overrides
//!
//! An override replaces a fixture's value or setup procedure for one run,
//! merged over the registry before instantiation. Every dependent of the
//! overridden fixture observes the override during its own setup.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use indexmap::IndexMap;

use crate::context::DepsView;
use crate::definition::{FixtureValue, SetupFn};
use crate::errors::Result;
use crate::slot::FixtureSlot;

/// A single replacement: either a fixed value or a full setup procedure
#[derive(Clone)]
pub enum Override {
    /// Replace the fixture's value; no setup or teardown runs for it
    Value(FixtureValue),
    /// Replace the fixture's setup procedure
    Setup(SetupFn),
}

impl fmt::Debug for Override {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Override::Value(_) => f.write_str("Override::Value"),
            Override::Setup(_) => f.write_str("Override::Setup"),
        }
    }
}

/// Per-run set of overrides, keyed by fixture name
#[derive(Clone, Debug, Default)]
pub struct OverrideSet {
    entries: IndexMap<String, Override>,
}

impl OverrideSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a fixture with a fixed value
    pub fn value<T: Any + Send + Sync>(mut self, name: impl Into<String>, value: T) -> Self {
        self.entries
            .insert(name.into(), Override::Value(Arc::new(value)));
        self
    }

    /// Replace a fixture's setup procedure
    pub fn setup<F, Fut>(mut self, name: impl Into<String>, procedure: F) -> Self
    where
        F: Fn(DepsView, FixtureSlot) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let setup: SetupFn = Arc::new(move |deps, slot| procedure(deps, slot).boxed());
        self.entries.insert(name.into(), Override::Setup(setup));
        self
    }

    /// Look up the override for a fixture, if any
    pub fn get(&self, name: &str) -> Option<&Override> {
        self.entries.get(name)
    }

    /// Names of every overridden fixture
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
