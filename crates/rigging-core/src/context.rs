//! Run context and capability-isolated dependency views
//!
//! A [`RunContext`] maps fixture names to their realized values for one run.
//! It is built incrementally by the composer during setup and read-only to
//! the test body. Setup procedures never see the whole context: each receives
//! a [`DepsView`] restricted to its declared dependencies, so a fixture
//! cannot accidentally read state it never declared.

use std::any::Any;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::definition::FixtureValue;
use crate::errors::{ComposeError, Result};
use crate::lifecycle::FixtureState;
use crate::observers::DeferredCheck;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Live half of an instantiated fixture: the parked setup task plus the
/// release channel that resumes it for teardown
pub(crate) struct FixtureRuntime {
    pub(crate) release_tx: oneshot::Sender<()>,
    pub(crate) task: JoinHandle<Result<()>>,
    pub(crate) checks: Vec<DeferredCheck>,
}

/// Composer-side bookkeeping for one fixture instance
pub(crate) struct FixtureEntry {
    pub(crate) state: FixtureState,
    pub(crate) runtime: Option<FixtureRuntime>,
}

/// Teardown bookkeeping for a whole run: entries plus recorded
/// instantiation order
#[derive(Default)]
pub(crate) struct RunInner {
    pub(crate) entries: IndexMap<String, FixtureEntry>,
    pub(crate) order: Vec<String>,
}

type SharedValues = Arc<Mutex<IndexMap<String, FixtureValue>>>;

/// Mapping from fixture name to realized value for one test run
///
/// Cheap to clone; clones observe the same run. Values are read with
/// [`RunContext::get`], which downcasts to the requested type.
#[derive(Clone)]
pub struct RunContext {
    run_id: Uuid,
    artifact_dir: PathBuf,
    values: SharedValues,
    inner: Arc<Mutex<Option<RunInner>>>,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("artifact_dir", &self.artifact_dir)
            .finish_non_exhaustive()
    }
}

impl RunContext {
    pub(crate) fn new(run_id: Uuid, artifact_dir: PathBuf) -> Self {
        Self {
            run_id,
            artifact_dir,
            values: Arc::new(Mutex::new(IndexMap::new())),
            inner: Arc::new(Mutex::new(Some(RunInner::default()))),
        }
    }

    /// Run-unique identifier, also the artifact namespace for this run
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Per-run artifact directory (namespaced by run id, not yet created)
    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Read a resolved fixture value, downcast to `T`
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let value = lock(&self.values)
            .get(name)
            .cloned()
            .ok_or_else(|| ComposeError::unknown(name))?;
        value
            .downcast::<T>()
            .map_err(|_| ComposeError::TypeMismatch { name: name.into() })
    }

    /// Whether a fixture was resolved in this run
    pub fn contains(&self, name: &str) -> bool {
        lock(&self.values).contains_key(name)
    }

    /// Names of every resolved fixture, in instantiation order
    pub fn resolved_names(&self) -> Vec<String> {
        lock(&self.values).keys().cloned().collect()
    }

    pub(crate) fn insert_value(&self, name: &str, value: FixtureValue) {
        lock(&self.values).insert(name.to_string(), value);
    }

    pub(crate) fn record_entry(&self, name: &str, entry: FixtureEntry) {
        let mut inner = lock(&self.inner);
        if let Some(inner) = inner.as_mut() {
            inner.entries.insert(name.to_string(), entry);
            inner.order.push(name.to_string());
        }
    }

    /// Take the teardown bookkeeping out of the context; `None` when the run
    /// was already torn down
    pub(crate) fn take_inner(&self) -> Option<RunInner> {
        lock(&self.inner).take()
    }

    /// Build the capability-isolated view handed to one setup procedure
    pub(crate) fn deps_view(&self, fixture: &str, declared: &[String]) -> DepsView {
        DepsView {
            fixture: fixture.to_string(),
            declared: declared.iter().cloned().collect(),
            run_id: self.run_id,
            artifact_dir: self.artifact_dir.clone(),
            values: Arc::clone(&self.values),
        }
    }
}

/// The subset of a run visible to one fixture's setup procedure
///
/// Reads are limited to the fixture's declared dependencies; anything else is
/// an [`ComposeError::UndeclaredDependency`].
#[derive(Clone)]
pub struct DepsView {
    fixture: String,
    declared: BTreeSet<String>,
    run_id: Uuid,
    artifact_dir: PathBuf,
    values: SharedValues,
}

impl DepsView {
    /// Run-unique identifier
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Per-run artifact directory
    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Read a declared dependency, downcast to `T`
    ///
    /// Dependencies are instantiated before their dependents, so a declared
    /// name is always present and never partially constructed.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        if !self.declared.contains(name) {
            return Err(ComposeError::UndeclaredDependency {
                fixture: self.fixture.clone(),
                dependency: name.to_string(),
            });
        }
        let value = lock(&self.values)
            .get(name)
            .cloned()
            .ok_or_else(|| ComposeError::internal(format!(
                "declared dependency `{name}` of fixture `{}` missing from run",
                self.fixture
            )))?;
        value
            .downcast::<T>()
            .map_err(|_| ComposeError::TypeMismatch { name: name.into() })
    }
}
