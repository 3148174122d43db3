//! Fixture definitions
//!
//! A [`FixtureDefinition`] is registration data: a unique name, the declared
//! dependency names, an `auto` flag (instantiate even when no test requests
//! it), a [`Scope`], and a boxed async setup procedure. Definitions are plain
//! values merged into a registry; there is no inheritance hierarchy.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::context::DepsView;
use crate::errors::Result;
use crate::slot::FixtureSlot;

/// Type-erased fixture value as stored in the run context
pub type FixtureValue = Arc<dyn Any + Send + Sync>;

/// Boxed async setup procedure
///
/// Receives a capability-isolated view of its declared dependencies and the
/// slot it must serve its value through.
pub type SetupFn =
    Arc<dyn Fn(DepsView, FixtureSlot) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Lifetime boundary over which a fixture instance is reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// One instance per test run (the default)
    #[default]
    PerTest,
    /// One instance shared by every run of the same composer, torn down at
    /// composer shutdown
    PerSuite,
}

/// A named, reusable piece of test setup/teardown logic
#[derive(Clone)]
pub struct FixtureDefinition {
    name: String,
    dependencies: Vec<String>,
    auto: bool,
    scope: Scope,
    setup: SetupFn,
}

impl FixtureDefinition {
    /// Define a fixture from a full setup/teardown procedure
    ///
    /// The procedure must call `slot.serve(value)` exactly once; everything
    /// after that call runs as teardown.
    pub fn with_fixture<F, Fut>(name: impl Into<String>, procedure: F) -> Self
    where
        F: Fn(DepsView, FixtureSlot) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            auto: false,
            scope: Scope::default(),
            setup: Arc::new(move |deps, slot| procedure(deps, slot).boxed()),
        }
    }

    /// Define a fixture holding a constant value, with no teardown
    ///
    /// The usual shape for overridable options fixtures.
    pub fn value<T>(name: impl Into<String>, value: T) -> Self
    where
        T: Clone + Any + Send + Sync,
    {
        Self::with_fixture(name, move |_deps, mut slot| {
            let value = value.clone();
            async move { slot.serve(value).await }
        })
    }

    /// Define a fixture from an async producer, with no teardown
    pub fn setup<F, Fut, T>(name: impl Into<String>, producer: F) -> Self
    where
        F: Fn(DepsView) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Any + Send + Sync,
    {
        Self::with_fixture(name, move |deps, mut slot| {
            let produced = producer(deps);
            async move {
                let value = produced.await?;
                slot.serve(value).await
            }
        })
    }

    /// Declare dependencies on other fixtures by name
    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = names.into_iter().map(Into::into).collect();
        self
    }

    /// Instantiate this fixture even when no test requests it
    pub fn auto(mut self) -> Self {
        self.auto = true;
        self
    }

    /// Share one instance across every run of the same composer
    pub fn per_suite(mut self) -> Self {
        self.scope = Scope::PerSuite;
        self
    }

    /// Unique fixture name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared dependency names, in declaration order
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Whether this fixture is instantiated without being requested
    pub fn is_auto(&self) -> bool {
        self.auto
    }

    /// The fixture's scope
    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub(crate) fn setup_fn(&self) -> SetupFn {
        Arc::clone(&self.setup)
    }
}

impl fmt::Debug for FixtureDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixtureDefinition")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("auto", &self.auto)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}
