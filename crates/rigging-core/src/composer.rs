//! The fixture composer
//!
//! Given a validated registry, [`Composer::resolve`] instantiates the
//! transitive closure of the requested fixtures (plus every `auto` fixture)
//! in dependency order, [`Composer::teardown`] releases them in exactly the
//! reverse of that order, and [`Composer::run`] brackets an async test body
//! with both, including on error, panic, and body timeout.
//!
//! Resolution is strictly sequential in dependency order. Setting up
//! independent fixtures concurrently would be a permitted optimization; this
//! implementation does not take it (see DESIGN.md).

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;

use futures::FutureExt;
use indexmap::IndexMap;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::config::ComposerConfig;
use crate::context::{lock, FixtureEntry, FixtureRuntime, RunContext};
use crate::definition::{FixtureDefinition, FixtureValue, Scope, SetupFn};
use crate::errors::{ComposeError, DeferredAssertion, Result, TeardownFailure, TeardownReport};
use crate::graph;
use crate::lifecycle::FixtureState;
use crate::overrides::{Override, OverrideSet};
use crate::registry::FixtureRegistry;
use crate::slot::FixtureSlot;

/// Suite-scoped instances shared by every run of one composer
#[derive(Default)]
struct SuiteState {
    values: IndexMap<String, FixtureValue>,
    entries: IndexMap<String, FixtureEntry>,
    order: Vec<String>,
    /// Suite setups that failed, by name; replayed as failures to later runs
    failed: IndexMap<String, String>,
}

/// Resolves fixture graphs into run contexts and guarantees their teardown
pub struct Composer {
    registry: FixtureRegistry,
    config: ComposerConfig,
    suite: Mutex<SuiteState>,
}

impl std::fmt::Debug for Composer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Composer")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

enum BodyOutcome<T> {
    Completed(T),
    Failed(ComposeError),
    Panicked(Box<dyn Any + Send>),
    TimedOut(u64),
}

impl Composer {
    /// Build a composer over a registry, validating the graph up front
    pub fn new(registry: FixtureRegistry) -> Result<Self> {
        Self::with_config(registry, ComposerConfig::default())
    }

    /// Build a composer with explicit configuration
    pub fn with_config(registry: FixtureRegistry, config: ComposerConfig) -> Result<Self> {
        registry.validate()?;
        Ok(Self {
            registry,
            config,
            suite: Mutex::new(SuiteState::default()),
        })
    }

    /// The registry this composer resolves against
    pub fn registry(&self) -> &FixtureRegistry {
        &self.registry
    }

    /// The active configuration
    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    /// Instantiate the requested fixtures (plus `auto` fixtures) and their
    /// transitive dependencies, in dependency order
    ///
    /// Fails fast on the first setup error; fixtures already `Ready` at that
    /// point are torn down before the error is returned.
    pub async fn resolve(&self, requested: &[&str], overrides: &OverrideSet) -> Result<RunContext> {
        for name in overrides.names() {
            let def = self.registry.get(name).ok_or_else(|| {
                ComposeError::config(format!("override targets unknown fixture `{name}`"))
            })?;
            if def.scope() == Scope::PerSuite {
                return Err(ComposeError::config(format!(
                    "cannot override suite-scoped fixture `{name}`"
                )));
            }
        }

        let mut wanted: Vec<String> = requested.iter().map(|s| (*s).to_string()).collect();
        for auto in self.registry.auto_names() {
            if !wanted.contains(&auto) {
                wanted.push(auto);
            }
        }
        let order = graph::instantiation_order(&self.registry, &wanted)?;

        let run_id = Uuid::new_v4();
        let artifact_dir = self.config.artifact_root.join(run_id.to_string());
        let ctx = RunContext::new(run_id, artifact_dir);
        tracing::debug!(run_id = %run_id, fixtures = order.len(), "resolving fixture graph");

        for name in &order {
            if let Err(err) = self.instantiate(&ctx, name, &wanted, overrides).await {
                tracing::warn!(
                    run_id = %run_id,
                    fixture = %name,
                    error = %err,
                    "setup failed, tearing down resolved fixtures"
                );
                let report = self.teardown(ctx.clone()).await;
                if !report.is_empty() {
                    tracing::warn!(run_id = %run_id, %report, "rollback teardown reported failures");
                }
                return Err(err);
            }
        }
        tracing::debug!(run_id = %run_id, "fixture graph ready");
        Ok(ctx)
    }

    /// Tear down every fixture of a run, in exactly the reverse of its
    /// instantiation order
    ///
    /// Never short-circuits: each teardown runs regardless of earlier
    /// failures, bounded by the configured grace period. Suite-scoped
    /// fixtures are left in place for later runs; see
    /// [`shutdown`](Self::shutdown).
    pub async fn teardown(&self, ctx: RunContext) -> TeardownReport {
        let run_id = ctx.run_id();
        let Some(inner) = ctx.take_inner() else {
            return TeardownReport::default();
        };
        let mut entries = inner.entries;
        let mut report = TeardownReport::default();
        for name in inner.order.iter().rev() {
            if let Some(entry) = entries.shift_remove(name) {
                self.teardown_entry(name, entry, &mut report).await;
            }
        }
        if report.is_empty() {
            tracing::debug!(run_id = %run_id, "run torn down cleanly");
        } else {
            tracing::warn!(run_id = %run_id, %report, "run teardown reported failures");
        }
        report
    }

    /// Tear down suite-scoped fixtures, in reverse of their instantiation
    /// order across the composer's lifetime
    pub async fn shutdown(&self) -> TeardownReport {
        let (mut entries, order) = {
            let mut suite = lock(&self.suite);
            suite.values.clear();
            (
                std::mem::take(&mut suite.entries),
                std::mem::take(&mut suite.order),
            )
        };
        let mut report = TeardownReport::default();
        for name in order.iter().rev() {
            if let Some(entry) = entries.shift_remove(name) {
                self.teardown_entry(name, entry, &mut report).await;
            }
        }
        report
    }

    /// Resolve, run the test body, and tear down on every exit path
    ///
    /// A panicking body is re-raised after teardown completes; teardown
    /// failures and deferred assertions fail an otherwise-passing body.
    pub async fn run<F, Fut, T>(&self, requested: &[&str], overrides: OverrideSet, body: F) -> Result<T>
    where
        F: FnOnce(RunContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let ctx = self.resolve(requested, &overrides).await?;

        let body_fut = AssertUnwindSafe(body(ctx.clone())).catch_unwind();
        let outcome = match self.config.body_timeout() {
            Some(limit) => match tokio::time::timeout(limit, body_fut).await {
                Ok(Ok(Ok(value))) => BodyOutcome::Completed(value),
                Ok(Ok(Err(err))) => BodyOutcome::Failed(err),
                Ok(Err(payload)) => BodyOutcome::Panicked(payload),
                Err(_) => BodyOutcome::TimedOut(limit.as_millis() as u64),
            },
            None => match body_fut.await {
                Ok(Ok(value)) => BodyOutcome::Completed(value),
                Ok(Err(err)) => BodyOutcome::Failed(err),
                Err(payload) => BodyOutcome::Panicked(payload),
            },
        };

        let report = self.teardown(ctx).await;
        match outcome {
            BodyOutcome::Completed(value) => report.into_result().map(|()| value),
            BodyOutcome::Failed(err) => {
                if !report.is_empty() {
                    tracing::warn!(%report, "teardown reported failures after body error");
                }
                Err(err)
            }
            BodyOutcome::TimedOut(limit_ms) => {
                if !report.is_empty() {
                    tracing::warn!(%report, "teardown reported failures after body timeout");
                }
                Err(ComposeError::BodyTimedOut { limit_ms })
            }
            BodyOutcome::Panicked(payload) => {
                if !report.is_empty() {
                    tracing::warn!(%report, "teardown reported failures after body panic");
                }
                std::panic::resume_unwind(payload)
            }
        }
    }

    async fn instantiate(
        &self,
        ctx: &RunContext,
        name: &str,
        requested: &[String],
        overrides: &OverrideSet,
    ) -> Result<()> {
        let def = self
            .registry
            .get(name)
            .ok_or_else(|| ComposeError::unknown(name))?;

        if def.scope() == Scope::PerSuite {
            return self.instantiate_suite(ctx, def, requested).await;
        }

        let (value, runtime) = match overrides.get(name) {
            Some(Override::Value(value)) => {
                tracing::debug!(fixture = %name, "override value installed");
                (value.clone(), None)
            }
            Some(Override::Setup(setup)) => {
                let (value, runtime) = self.run_setup(ctx, def, setup.clone()).await?;
                (value, Some(runtime))
            }
            None => {
                let (value, runtime) = self.run_setup(ctx, def, def.setup_fn()).await?;
                (value, Some(runtime))
            }
        };
        ctx.insert_value(name, value);
        ctx.record_entry(
            name,
            FixtureEntry {
                state: FixtureState::Ready,
                runtime,
            },
        );
        Ok(())
    }

    async fn instantiate_suite(
        &self,
        ctx: &RunContext,
        def: &FixtureDefinition,
        requested: &[String],
    ) -> Result<()> {
        let name = def.name();
        // A suite setup that failed in an earlier run replays as a failure:
        // as its own setup error when the test asked for it directly, or as
        // a dependency failure attributed to the requested fixture that
        // pulled it in.
        if let Some(reason) = self.suite_failure(name) {
            tracing::warn!(fixture = %name, %reason, "suite-scoped setup failed in an earlier run");
            if requested.iter().any(|r| r == name) {
                return Err(ComposeError::setup(
                    name,
                    format!("suite-scoped setup previously failed: {reason}"),
                ));
            }
            let dependent = requested
                .iter()
                .find(|r| self.registry.depends_transitively(r.as_str(), name))
                .cloned()
                .unwrap_or_else(|| name.to_string());
            return Err(ComposeError::DependencyFailed {
                fixture: dependent,
                dependency: name.to_string(),
            });
        }
        if let Some(value) = lock(&self.suite).values.get(name).cloned() {
            ctx.insert_value(name, value);
            tracing::debug!(fixture = %name, "suite-scoped fixture reused");
            return Ok(());
        }

        match self.run_setup(ctx, def, def.setup_fn()).await {
            Ok((value, runtime)) => {
                {
                    let mut suite = lock(&self.suite);
                    suite.values.insert(name.to_string(), value.clone());
                    suite.entries.insert(
                        name.to_string(),
                        FixtureEntry {
                            state: FixtureState::Ready,
                            runtime: Some(runtime),
                        },
                    );
                    suite.order.push(name.to_string());
                }
                ctx.insert_value(name, value);
                Ok(())
            }
            Err(err) => {
                lock(&self.suite)
                    .failed
                    .insert(name.to_string(), err.to_string());
                Err(err)
            }
        }
    }

    /// Drive one setup procedure to its serve point
    async fn run_setup(
        &self,
        ctx: &RunContext,
        def: &FixtureDefinition,
        setup: SetupFn,
    ) -> Result<(FixtureValue, FixtureRuntime)> {
        let name = def.name().to_string();
        let state = FixtureState::Pending.advance(FixtureState::Resolving)?;

        let (value_tx, value_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        let slot = FixtureSlot::new(name.clone(), value_tx, release_rx);
        let deps = ctx.deps_view(&name, def.dependencies());

        tracing::debug!(fixture = %name, "setup started");
        let mut task = tokio::spawn(setup(deps, slot));

        match value_rx.await {
            Ok(payload) => {
                state.advance(FixtureState::Ready)?;
                tracing::debug!(fixture = %name, "fixture ready");
                Ok((
                    payload.value,
                    FixtureRuntime {
                        release_tx,
                        task,
                        checks: payload.checks,
                    },
                ))
            }
            Err(_) => {
                // The setup finished, failed, or panicked without serving.
                state.advance(FixtureState::Failed)?;
                let reason = match (&mut task).await {
                    Ok(Ok(())) => {
                        return Err(ComposeError::config(format!(
                            "setup of fixture `{name}` completed without serving a value"
                        )))
                    }
                    Ok(Err(err)) => err.to_string(),
                    Err(join) if join.is_panic() => panic_message(join.into_panic()),
                    Err(join) => format!("setup task aborted: {join}"),
                };
                Err(ComposeError::setup(name, reason))
            }
        }
    }

    /// Release one fixture and collect whatever its teardown reports
    async fn teardown_entry(&self, name: &str, entry: FixtureEntry, report: &mut TeardownReport) {
        if entry.state != FixtureState::Ready {
            return;
        }
        let Some(runtime) = entry.runtime else {
            // Constant value or override: nothing to release.
            return;
        };
        let state = match FixtureState::Ready.advance(FixtureState::TearingDown) {
            Ok(state) => state,
            Err(err) => {
                report.failures.push(TeardownFailure {
                    fixture: name.to_string(),
                    reason: err.to_string(),
                });
                return;
            }
        };
        tracing::debug!(fixture = %name, "teardown started");

        let FixtureRuntime {
            release_tx,
            mut task,
            checks,
        } = runtime;
        let _ = release_tx.send(());

        let grace = self.config.teardown_grace();
        match tokio::time::timeout(grace, &mut task).await {
            Err(_) => {
                task.abort();
                let _ = state.advance(FixtureState::Failed);
                report.failures.push(TeardownFailure {
                    fixture: name.to_string(),
                    reason: format!("teardown exceeded grace period of {}ms", grace.as_millis()),
                });
            }
            Ok(Err(join)) if join.is_panic() => {
                let _ = state.advance(FixtureState::Failed);
                report.failures.push(TeardownFailure {
                    fixture: name.to_string(),
                    reason: format!("teardown panicked: {}", panic_message(join.into_panic())),
                });
            }
            Ok(Err(join)) => {
                let _ = state.advance(FixtureState::Failed);
                report.failures.push(TeardownFailure {
                    fixture: name.to_string(),
                    reason: format!("teardown task aborted: {join}"),
                });
            }
            Ok(Ok(Err(err))) => {
                let _ = state.advance(FixtureState::Failed);
                report.failures.push(TeardownFailure {
                    fixture: name.to_string(),
                    reason: err.to_string(),
                });
            }
            Ok(Ok(Ok(()))) => {
                let _ = state.advance(FixtureState::Done);
                tracing::debug!(fixture = %name, "teardown complete");
            }
        }

        // Deferred observer checks run after the teardown procedure, in
        // registration order; violations are soft.
        for check in checks {
            for message in check() {
                tracing::warn!(fixture = %name, %message, "deferred assertion fired");
                report.deferred.push(DeferredAssertion {
                    fixture: name.to_string(),
                    message,
                });
            }
        }
    }

    fn suite_failure(&self, name: &str) -> Option<String> {
        lock(&self.suite).failed.get(name).cloned()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panicked".to_string()
    }
}
