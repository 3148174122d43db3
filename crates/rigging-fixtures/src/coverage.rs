//! Coverage artifact collection
//!
//! The `coverage` fixture installs the collector init script, exposes the
//! host-side sink function the page reports into, and at teardown writes one
//! JSON artifact per run. Artifacts land in the host-dictated directory when
//! there is one, otherwise in the run's own artifact directory; file names
//! carry a fresh random identifier so concurrent runs sharing an output
//! directory never collide.

use std::sync::{Arc, Mutex};

use futures::FutureExt;
use uuid::Uuid;

use rigging_core::{ComposeError, FixtureDefinition, Result};

use crate::host::HostHandle;
use crate::sync::lock;

/// Name of the host-side sink function the collector script reports into
pub const COVERAGE_SINK_FUNCTION: &str = "reportCoverage";

/// The init script installing the in-page collector
const COVERAGE_INIT_SCRIPT: &str = "(() => {\n  window.__rigging_coverage = [];\n  window.addEventListener('beforeunload', () => {\n    if (window.__rigging_coverage.length) {\n      window.reportCoverage(window.__rigging_coverage);\n    }\n  });\n})();";

/// Options consumed by the `coverage` fixture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageOptions {
    /// Collect and persist coverage for this run
    pub enabled: bool,
}

impl Default for CoverageOptions {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl CoverageOptions {
    /// Skip collection entirely
    pub fn disabled() -> Self {
        Self { enabled: false }
    }
}

/// Coverage entries reported by the page, shared with the sink function
#[derive(Clone, Default)]
pub struct CoverageCollector {
    entries: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl CoverageCollector {
    /// Record one reported payload
    pub fn record(&self, entry: serde_json::Value) {
        lock(&self.entries).push(entry);
    }

    /// Number of recorded entries
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&self) -> Vec<serde_json::Value> {
        std::mem::take(&mut *lock(&self.entries))
    }
}

/// The overridable `coverage_options` fixture
pub fn coverage_options_fixture() -> FixtureDefinition {
    FixtureDefinition::value("coverage_options", CoverageOptions::default())
}

/// The `coverage` fixture; `auto`, so every run collects without asking
pub fn coverage_fixture() -> FixtureDefinition {
    FixtureDefinition::with_fixture("coverage", |deps, mut slot| async move {
        let options = deps.get::<CoverageOptions>("coverage_options")?;
        let host = deps.get::<HostHandle>("host")?;

        let collector = CoverageCollector::default();
        if options.enabled {
            host.add_init_script(COVERAGE_INIT_SCRIPT).await?;
            let sink = collector.clone();
            host.expose_function(
                COVERAGE_SINK_FUNCTION,
                Arc::new(move |payload| {
                    sink.record(payload);
                    futures::future::ready(Ok(serde_json::Value::Null)).boxed()
                }),
            )
            .await?;
        }

        let out_dir = host
            .artifact_dir()
            .unwrap_or_else(|| deps.artifact_dir().to_path_buf());

        slot.serve(collector.clone()).await?;

        let entries = collector.take();
        if !entries.is_empty() {
            let path = out_dir.join(format!("coverage-{}.json", Uuid::new_v4()));
            let payload = serde_json::to_vec_pretty(&entries).map_err(|e| {
                ComposeError::internal(format!("failed to encode coverage artifact: {e}"))
            })?;
            tokio::fs::create_dir_all(&out_dir).await.map_err(|e| {
                ComposeError::internal(format!("failed to create artifact directory: {e}"))
            })?;
            tokio::fs::write(&path, payload).await.map_err(|e| {
                ComposeError::internal(format!("failed to write coverage artifact: {e}"))
            })?;
            tracing::debug!(path = %path.display(), entries = entries.len(), "coverage artifact written");
        }
        Ok(())
    })
    .depends_on(["host", "coverage_options"])
    .auto()
}
