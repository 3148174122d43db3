//! Composable async test fixtures
//!
//! A [`FixtureRegistry`] maps names to [`FixtureDefinition`]s: each is a setup
//! procedure with declared dependencies, an optional `auto` flag, and a
//! [`Scope`]. A [`Composer`] resolves the dependency graph, instantiates each
//! required fixture exactly once per scope in dependency order, injects the
//! values into the test body through a [`RunContext`], and tears everything
//! down in reverse order on every exit path.
//!
//! # Usage
//!
//! ```rust,no_run
//! use rigging_core::{Composer, FixtureDefinition, FixtureRegistry, OverrideSet};
//!
//! # async fn demo() -> rigging_core::Result<()> {
//! let registry = FixtureRegistry::new()
//!     .with(FixtureDefinition::value("port", 8080u16))
//!     .with(
//!         FixtureDefinition::with_fixture("server", |deps, mut slot| async move {
//!             let port = deps.get::<u16>("port")?;
//!             let server = format!("listening on {port}");
//!             slot.serve(server).await?;
//!             // Everything after serve runs as teardown.
//!             Ok(())
//!         })
//!         .depends_on(["port"]),
//!     );
//!
//! let composer = Composer::new(registry)?;
//! composer
//!     .run(&["server"], OverrideSet::new(), |ctx| async move {
//!         let server = ctx.get::<String>("server")?;
//!         assert!(server.starts_with("listening"));
//!         Ok(())
//!     })
//!     .await
//! # }
//! ```

pub mod composer;
pub mod config;
pub mod context;
pub mod definition;
pub mod errors;
mod graph;
pub mod lifecycle;
pub mod observers;
pub mod overrides;
pub mod registry;
pub mod slot;

pub use composer::Composer;
pub use config::ComposerConfig;
pub use context::{DepsView, RunContext};
pub use definition::{FixtureDefinition, FixtureValue, Scope, SetupFn};
pub use errors::{
    ComposeError, DeferredAssertion, Result, TeardownFailure, TeardownReport,
};
pub use lifecycle::FixtureState;
pub use observers::{DeferredCheck, DiagnosticEvent, DiagnosticLog, Severity};
pub use overrides::{Override, OverrideSet};
pub use registry::FixtureRegistry;
pub use slot::FixtureSlot;
