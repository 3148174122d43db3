//! Scoped acquisition: the serve/release handoff
//!
//! A setup procedure receives a [`FixtureSlot`] and must call
//! [`FixtureSlot::serve`] exactly once. Serving hands the produced value to
//! the composer and parks the procedure until teardown time; every statement
//! after the `serve` call runs as teardown. This keeps "setup, yield,
//! cleanup" a single linear procedure, so cleanup runs on all exit paths:
//! normal completion, a failing test body, a panic, or cancellation (the
//! composer dropping its side of the release channel also releases the slot).

use std::any::Any;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::definition::FixtureValue;
use crate::errors::{ComposeError, Result};
use crate::observers::DeferredCheck;

/// Everything shipped to the composer when a setup procedure serves
pub(crate) struct ServePayload {
    pub(crate) value: FixtureValue,
    pub(crate) checks: Vec<DeferredCheck>,
}

/// The composer-facing half of one fixture's setup procedure
pub struct FixtureSlot {
    fixture: String,
    value_tx: Option<oneshot::Sender<ServePayload>>,
    release_rx: Option<oneshot::Receiver<()>>,
    checks: Vec<DeferredCheck>,
}

impl FixtureSlot {
    pub(crate) fn new(
        fixture: impl Into<String>,
        value_tx: oneshot::Sender<ServePayload>,
        release_rx: oneshot::Receiver<()>,
    ) -> Self {
        Self {
            fixture: fixture.into(),
            value_tx: Some(value_tx),
            release_rx: Some(release_rx),
            checks: Vec::new(),
        }
    }

    /// Name of the fixture this slot belongs to
    pub fn fixture(&self) -> &str {
        &self.fixture
    }

    /// Register a deferred check evaluated during this fixture's teardown
    ///
    /// Must be called before [`serve`](Self::serve); checks ride along with
    /// the served value.
    pub fn defer_check(
        &mut self,
        check: impl FnOnce() -> Vec<String> + Send + 'static,
    ) -> Result<()> {
        if self.value_tx.is_none() {
            return Err(ComposeError::config(format!(
                "fixture `{}` registered a deferred check after serving",
                self.fixture
            )));
        }
        self.checks.push(Box::new(check));
        Ok(())
    }

    /// Hand the produced value to the composer and park until teardown
    ///
    /// Returns once the composer releases the fixture; code after the call
    /// is the teardown phase. Serving twice is a configuration error.
    pub async fn serve<T: Any + Send + Sync>(&mut self, value: T) -> Result<()> {
        self.serve_erased(Arc::new(value)).await
    }

    pub(crate) async fn serve_erased(&mut self, value: FixtureValue) -> Result<()> {
        let value_tx = self.value_tx.take().ok_or_else(|| {
            ComposeError::config(format!(
                "fixture `{}` served a value more than once",
                self.fixture
            ))
        })?;
        let release_rx = self.release_rx.take().ok_or_else(|| {
            ComposeError::internal(format!("fixture `{}` slot missing release channel", self.fixture))
        })?;

        let payload = ServePayload {
            value,
            checks: std::mem::take(&mut self.checks),
        };
        value_tx.send(payload).map_err(|_| {
            ComposeError::internal(format!(
                "composer went away before fixture `{}` was served",
                self.fixture
            ))
        })?;

        // A dropped sender counts as a release: teardown must still run when
        // the composer side is torn off mid-flight.
        let _ = release_rx.await;
        Ok(())
    }
}
