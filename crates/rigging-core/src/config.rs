//! Composer configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::{ComposeError, Result};

/// Tunables for a [`crate::composer::Composer`]
///
/// Artifact directories are namespaced under `artifact_root` by run id, so
/// independent parallel runs sharing one root never collide.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    /// Upper bound on each fixture's teardown, in milliseconds; a teardown
    /// that exceeds it is reported as a timeout failure instead of blocking
    /// the run
    pub teardown_grace_ms: u64,
    /// Optional time limit for the test body, in milliseconds
    pub body_timeout_ms: Option<u64>,
    /// Root directory for per-run artifact directories
    pub artifact_root: PathBuf,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            teardown_grace_ms: 5_000,
            body_timeout_ms: None,
            artifact_root: std::env::temp_dir().join("rigging"),
        }
    }
}

impl ComposerConfig {
    /// Teardown grace period as a [`Duration`]
    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }

    /// Test body time limit as a [`Duration`], when configured
    pub fn body_timeout(&self) -> Option<Duration> {
        self.body_timeout_ms.map(Duration::from_millis)
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| ComposeError::config(format!("invalid composer config: {e}")))
    }
}
