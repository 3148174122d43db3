//! The page host seam
//!
//! The browser-automation engine itself is an external collaborator; the
//! fixtures in this crate require only the four capabilities modeled by
//! [`PageHost`]: installing an init script before page load, exposing a
//! host-side function callable from the page, subscribing to diagnostic
//! events, and (optionally) dictating an artifact output directory.
//! [`MockPageHost`] is the in-repo implementation used by tests.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::broadcast;

use rigging_core::{ComposeError, DiagnosticEvent, FixtureDefinition, Result};

use crate::sync::lock;

/// A host-side function callable from the remote execution context
pub type HostFunction =
    Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync>;

/// Capabilities the composer requires of the browser collaborator
#[async_trait]
pub trait PageHost: Send + Sync {
    /// Install a script evaluated in the remote context before page load
    async fn add_init_script(&self, source: &str) -> Result<()>;

    /// Expose a host-side function callable from the remote context
    async fn expose_function(&self, name: &str, function: HostFunction) -> Result<()>;

    /// Subscribe to diagnostic/log messages emitted by the remote context
    fn subscribe_diagnostics(&self) -> broadcast::Receiver<DiagnosticEvent>;

    /// Output directory dictated by the host, when it has one
    ///
    /// Fixtures fall back to the run's own artifact directory otherwise.
    fn artifact_dir(&self) -> Option<PathBuf> {
        None
    }
}

/// Concrete, clonable handle to a [`PageHost`] as stored in the run context
#[derive(Clone)]
pub struct HostHandle(Arc<dyn PageHost>);

impl HostHandle {
    pub fn new(host: Arc<dyn PageHost>) -> Self {
        Self(host)
    }
}

impl std::ops::Deref for HostHandle {
    type Target = dyn PageHost;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

/// In-memory page host: records installed scripts and exposed functions,
/// and lets tests emit diagnostic events
pub struct MockPageHost {
    init_scripts: Mutex<Vec<String>>,
    functions: Mutex<IndexMap<String, HostFunction>>,
    diagnostics: broadcast::Sender<DiagnosticEvent>,
    artifact_dir: Option<PathBuf>,
}

impl MockPageHost {
    pub fn new() -> Self {
        let (diagnostics, _) = broadcast::channel(256);
        Self {
            init_scripts: Mutex::new(Vec::new()),
            functions: Mutex::new(IndexMap::new()),
            diagnostics,
            artifact_dir: None,
        }
    }

    /// Dictate where artifacts produced against this host land
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    /// Emit a diagnostic event, as the page would
    pub fn emit_diagnostic(&self, event: DiagnosticEvent) {
        // No subscribers is fine; events before the capture fixture attaches
        // are simply not observed.
        let _ = self.diagnostics.send(event);
    }

    /// Every installed init script, in installation order
    pub fn init_scripts(&self) -> Vec<String> {
        lock(&self.init_scripts).clone()
    }

    /// Whether a host-side function with this name is exposed
    pub fn has_function(&self, name: &str) -> bool {
        lock(&self.functions).contains_key(name)
    }

    /// Call an exposed function, as the page would
    pub async fn call_function(
        &self,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let function = lock(&self.functions)
            .get(name)
            .cloned()
            .ok_or_else(|| ComposeError::config(format!("no exposed function `{name}`")))?;
        function(payload).await
    }
}

impl Default for MockPageHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageHost for MockPageHost {
    async fn add_init_script(&self, source: &str) -> Result<()> {
        lock(&self.init_scripts).push(source.to_string());
        Ok(())
    }

    async fn expose_function(&self, name: &str, function: HostFunction) -> Result<()> {
        lock(&self.functions).insert(name.to_string(), function);
        Ok(())
    }

    fn subscribe_diagnostics(&self) -> broadcast::Receiver<DiagnosticEvent> {
        self.diagnostics.subscribe()
    }

    fn artifact_dir(&self) -> Option<PathBuf> {
        self.artifact_dir.clone()
    }
}

/// The `host` fixture: a [`MockPageHost`] by default, overridden with a real
/// engine adapter in production suites
pub fn host_fixture() -> FixtureDefinition {
    FixtureDefinition::setup("host", |_deps| async {
        Ok(HostHandle::new(Arc::new(MockPageHost::new())))
    })
}
