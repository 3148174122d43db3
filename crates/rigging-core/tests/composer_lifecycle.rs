//! Composer Lifecycle Tests
//!
//! Behavioral coverage for resolution ordering, teardown sequencing, error
//! attribution, overrides, scopes, and cancellation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use rigging_core::{
    ComposeError, Composer, ComposerConfig, FixtureDefinition, FixtureRegistry, OverrideSet,
};

/// Route composer tracing through the test writer when RUST_LOG is set
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Shared event log fixtures append setup/teardown markers to
#[derive(Clone, Default)]
struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn count_of(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    fn position_of(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

/// A fixture that records its setup and teardown and serves its own name
fn tracked(name: &'static str, deps: &[&'static str], log: &EventLog) -> FixtureDefinition {
    let log = log.clone();
    FixtureDefinition::with_fixture(name, move |_deps, mut slot| {
        let log = log.clone();
        async move {
            log.push(format!("setup:{name}"));
            slot.serve(name.to_string()).await?;
            log.push(format!("teardown:{name}"));
            Ok(())
        }
    })
    .depends_on(deps.iter().copied())
}

fn failing(name: &'static str, deps: &[&'static str]) -> FixtureDefinition {
    FixtureDefinition::with_fixture(name, move |_deps, _slot| async move {
        Err(ComposeError::config(format!("{name} exploded")))
    })
    .depends_on(deps.iter().copied())
}

// ============================================================================
// Resolution ordering
// ============================================================================

#[tokio::test]
async fn dependencies_set_up_before_dependents_and_torn_down_in_reverse() {
    let log = EventLog::default();
    let registry = FixtureRegistry::new()
        .with(tracked("a", &[], &log))
        .with(tracked("b", &["a"], &log))
        .with(tracked("c", &["b"], &log));
    let composer = Composer::new(registry).unwrap();

    let body_log = log.clone();
    composer
        .run(&["c"], OverrideSet::new(), |_ctx| async move {
            body_log.push("body");
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(
        log.events(),
        vec![
            "setup:a",
            "setup:b",
            "setup:c",
            "body",
            "teardown:c",
            "teardown:b",
            "teardown:a",
        ]
    );
}

#[tokio::test]
async fn diamond_shares_a_single_instance() {
    let log = EventLog::default();
    let registry = FixtureRegistry::new()
        .with(tracked("base", &[], &log))
        .with(tracked("left", &["base"], &log))
        .with(tracked("right", &["base"], &log))
        .with(tracked("top", &["left", "right"], &log));
    let composer = Composer::new(registry).unwrap();

    composer
        .run(&["top"], OverrideSet::new(), |_ctx| async { Ok(()) })
        .await
        .unwrap();

    assert_eq!(log.count_of("setup:base"), 1);
    assert_eq!(log.count_of("teardown:base"), 1);
}

#[tokio::test]
async fn test_body_reads_resolved_values_by_name() {
    let log = EventLog::default();
    let registry = FixtureRegistry::new().with(tracked("db", &[], &log));
    let composer = Composer::new(registry).unwrap();

    composer
        .run(&["db"], OverrideSet::new(), |ctx| async move {
            let value = ctx.get::<String>("db")?;
            assert_eq!(*value, "db");
            Ok(())
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn auto_fixtures_join_every_run() {
    let log = EventLog::default();
    let registry = FixtureRegistry::new()
        .with(tracked("a", &[], &log))
        .with(tracked("audit", &[], &log).auto());
    let composer = Composer::new(registry).unwrap();

    composer
        .run(&["a"], OverrideSet::new(), |_ctx| async { Ok(()) })
        .await
        .unwrap();

    assert_eq!(log.count_of("setup:audit"), 1);
    assert_eq!(log.count_of("teardown:audit"), 1);
}

#[tokio::test]
async fn artifact_dirs_are_namespaced_by_run() {
    let dir = tempfile::tempdir().unwrap();
    let registry = FixtureRegistry::new().with(FixtureDefinition::value("unit", ()));
    let composer = Composer::with_config(
        registry,
        ComposerConfig {
            artifact_root: dir.path().to_path_buf(),
            ..ComposerConfig::default()
        },
    )
    .unwrap();

    let ctx1 = composer.resolve(&["unit"], &OverrideSet::new()).await.unwrap();
    let ctx2 = composer.resolve(&["unit"], &OverrideSet::new()).await.unwrap();

    assert_ne!(ctx1.run_id(), ctx2.run_id());
    assert_ne!(ctx1.artifact_dir(), ctx2.artifact_dir());
    assert!(ctx1
        .artifact_dir()
        .starts_with(&composer.config().artifact_root));

    composer.teardown(ctx1).await;
    composer.teardown(ctx2).await;
}

// ============================================================================
// Graph errors
// ============================================================================

#[tokio::test]
async fn cycle_aborts_before_any_setup() {
    let log = EventLog::default();
    let registry = FixtureRegistry::new()
        .with(tracked("a", &["b"], &log))
        .with(tracked("b", &["a"], &log));

    let err = Composer::new(registry).unwrap_err();
    assert_matches!(err, ComposeError::CyclicDependency { .. });
    assert!(log.events().is_empty());
}

#[tokio::test]
async fn requesting_an_unknown_fixture_fails() {
    let registry = FixtureRegistry::new().with(FixtureDefinition::value("known", ()));
    let composer = Composer::new(registry).unwrap();

    let err = composer
        .resolve(&["missing"], &OverrideSet::new())
        .await
        .unwrap_err();
    assert_matches!(err, ComposeError::UnknownFixture { name } if name == "missing");
}

// ============================================================================
// Setup failure
// ============================================================================

#[tokio::test]
async fn setup_failure_mid_chain_rolls_back_resolved_fixtures() {
    let log = EventLog::default();
    let registry = FixtureRegistry::new()
        .with(tracked("a", &[], &log))
        .with(failing("b", &["a"]))
        .with(tracked("c", &["b"], &log));
    let composer = Composer::new(registry).unwrap();

    let err = composer
        .resolve(&["c"], &OverrideSet::new())
        .await
        .unwrap_err();

    assert_matches!(err, ComposeError::Setup { fixture, .. } if fixture == "b");
    assert_eq!(log.count_of("setup:a"), 1);
    assert_eq!(log.count_of("teardown:a"), 1);
    assert_eq!(log.count_of("setup:c"), 0);
}

#[tokio::test]
async fn panicking_setup_is_attributed_to_its_fixture() {
    let registry = FixtureRegistry::new().with(FixtureDefinition::with_fixture(
        "volatile",
        |_deps, _slot| async {
            panic!("setup blew up");
        },
    ));
    let composer = Composer::new(registry).unwrap();

    let err = composer
        .resolve(&["volatile"], &OverrideSet::new())
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ComposeError::Setup { fixture, reason }
            if fixture == "volatile" && reason.contains("setup blew up")
    );
}

#[tokio::test]
async fn undeclared_dependency_read_is_rejected() {
    let log = EventLog::default();
    let registry = FixtureRegistry::new()
        .with(tracked("a", &[], &log))
        .with(FixtureDefinition::with_fixture(
            "sneaky",
            |deps, mut slot| async move {
                let stolen = deps.get::<String>("a")?;
                slot.serve(stolen.to_string()).await
            },
        ));
    let composer = Composer::new(registry).unwrap();

    let err = composer
        .resolve(&["a", "sneaky"], &OverrideSet::new())
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ComposeError::Setup { fixture, reason }
            if fixture == "sneaky" && reason.contains("undeclared dependency `a`")
    );
}

// ============================================================================
// Scoped acquisition misuse
// ============================================================================

#[tokio::test]
async fn setup_without_serving_is_a_config_error() {
    let registry = FixtureRegistry::new().with(FixtureDefinition::with_fixture(
        "token",
        |_deps, _slot| async { Ok(()) },
    ));
    let composer = Composer::new(registry).unwrap();

    let err = composer
        .resolve(&["token"], &OverrideSet::new())
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ComposeError::Config { message } if message.contains("without serving")
    );
}

#[tokio::test]
async fn serving_twice_is_reported_at_teardown() {
    let registry = FixtureRegistry::new().with(FixtureDefinition::with_fixture(
        "eager",
        |_deps, mut slot| async move {
            slot.serve(1u8).await?;
            slot.serve(2u8).await
        },
    ));
    let composer = Composer::new(registry).unwrap();

    let err = composer
        .run(&["eager"], OverrideSet::new(), |_ctx| async { Ok(()) })
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ComposeError::Teardown { report }
            if report.failures.len() == 1
                && report.failures[0].reason.contains("more than once")
    );
}

// ============================================================================
// Teardown semantics
// ============================================================================

#[tokio::test]
async fn teardown_failures_are_all_collected() {
    fn broken(name: &'static str) -> FixtureDefinition {
        FixtureDefinition::with_fixture(name, move |_deps, mut slot| async move {
            slot.serve(()).await?;
            Err(ComposeError::config(format!("{name} cleanup failed")))
        })
    }

    let registry = FixtureRegistry::new()
        .with(broken("first"))
        .with(broken("second"));
    let composer = Composer::new(registry).unwrap();

    let ctx = composer
        .resolve(&["first", "second"], &OverrideSet::new())
        .await
        .unwrap();
    let report = composer.teardown(ctx).await;

    // Reverse instantiation order, one failure each, none skipped.
    let failed: Vec<&str> = report.failures.iter().map(|f| f.fixture.as_str()).collect();
    assert_eq!(failed, vec!["second", "first"]);
}

#[tokio::test]
async fn hanging_teardown_is_reported_as_timeout() {
    init_tracing();
    let log = EventLog::default();
    let registry = FixtureRegistry::new()
        .with(tracked("fine", &[], &log))
        .with(FixtureDefinition::with_fixture(
            "stuck",
            |_deps, mut slot| async move {
                slot.serve(()).await?;
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(())
            },
        ));
    let config = ComposerConfig {
        teardown_grace_ms: 100,
        ..ComposerConfig::default()
    };
    let composer = Composer::with_config(registry, config).unwrap();

    let ctx = composer
        .resolve(&["fine", "stuck"], &OverrideSet::new())
        .await
        .unwrap();
    let report = composer.teardown(ctx).await;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].fixture, "stuck");
    assert!(report.failures[0].reason.contains("grace period"));
    // The hang did not skip the remaining teardown.
    assert_eq!(log.count_of("teardown:fine"), 1);
}

#[tokio::test]
async fn teardown_twice_is_a_no_op() {
    let log = EventLog::default();
    let registry = FixtureRegistry::new().with(tracked("a", &[], &log));
    let composer = Composer::new(registry).unwrap();

    let ctx = composer.resolve(&["a"], &OverrideSet::new()).await.unwrap();
    let first = composer.teardown(ctx.clone()).await;
    let second = composer.teardown(ctx).await;

    assert!(first.is_empty());
    assert!(second.is_empty());
    assert_eq!(log.count_of("teardown:a"), 1);
}

#[tokio::test]
async fn dropping_the_run_context_still_releases_fixtures() {
    let log = EventLog::default();
    let registry = FixtureRegistry::new().with(tracked("a", &[], &log));
    let composer = Composer::new(registry).unwrap();

    let ctx = composer.resolve(&["a"], &OverrideSet::new()).await.unwrap();
    drop(ctx);

    // The parked setup task resumes once its release channel is gone.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(log.count_of("teardown:a"), 1);
}

// ============================================================================
// Deferred assertions
// ============================================================================

#[tokio::test]
async fn deferred_check_violations_surface_after_all_teardowns() {
    let log = EventLog::default();
    let registry = FixtureRegistry::new()
        .with(tracked("plain", &[], &log))
        .with(FixtureDefinition::with_fixture(
            "watch",
            |_deps, mut slot| async move {
                slot.defer_check(|| vec!["first violation".into(), "second violation".into()])?;
                slot.serve(()).await
            },
        ));
    let composer = Composer::new(registry).unwrap();

    let err = composer
        .run(&["plain", "watch"], OverrideSet::new(), |_ctx| async { Ok(()) })
        .await
        .unwrap_err();

    let report = assert_matches!(err, ComposeError::Teardown { report } => report);
    assert!(report.failures.is_empty());
    assert_eq!(report.deferred.len(), 2);
    assert!(report.deferred.iter().all(|d| d.fixture == "watch"));
    // Soft: the unrelated fixture still tore down.
    assert_eq!(log.count_of("teardown:plain"), 1);
}

// ============================================================================
// Overrides
// ============================================================================

#[tokio::test]
async fn value_override_is_observed_by_dependents() {
    let registry = FixtureRegistry::new()
        .with(FixtureDefinition::value("options", 1_000u64))
        .with(
            FixtureDefinition::setup("consumer", |deps| async move {
                let options = deps.get::<u64>("options")?;
                Ok(*options)
            })
            .depends_on(["options"]),
        );
    let composer = Composer::new(registry).unwrap();

    let overrides = OverrideSet::new().value("options", 42u64);
    composer
        .run(&["consumer"], overrides, |ctx| async move {
            assert_eq!(*ctx.get::<u64>("consumer")?, 42);
            Ok(())
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn setup_override_replaces_the_procedure() {
    let registry = FixtureRegistry::new().with(FixtureDefinition::value("greeting", "default".to_string()));
    let composer = Composer::new(registry).unwrap();

    let overrides = OverrideSet::new().setup("greeting", |_deps, mut slot| async move {
        slot.serve("replaced".to_string()).await
    });
    composer
        .run(&["greeting"], overrides, |ctx| async move {
            assert_eq!(*ctx.get::<String>("greeting")?, "replaced");
            Ok(())
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn override_targeting_unknown_fixture_is_rejected() {
    let registry = FixtureRegistry::new().with(FixtureDefinition::value("known", ()));
    let composer = Composer::new(registry).unwrap();

    let overrides = OverrideSet::new().value("ghost", 1u8);
    let err = composer
        .resolve(&["known"], &overrides)
        .await
        .unwrap_err();
    assert_matches!(err, ComposeError::Config { message } if message.contains("ghost"));
}

// ============================================================================
// Body outcomes
// ============================================================================

#[tokio::test]
async fn body_error_still_tears_down() {
    let log = EventLog::default();
    let registry = FixtureRegistry::new().with(tracked("a", &[], &log));
    let composer = Composer::new(registry).unwrap();

    let err = composer
        .run(&["a"], OverrideSet::new(), |_ctx| async {
            Err::<(), _>(ComposeError::config("body failed"))
        })
        .await
        .unwrap_err();

    assert_matches!(err, ComposeError::Config { .. });
    assert_eq!(log.count_of("teardown:a"), 1);
}

#[tokio::test]
async fn body_panic_is_reraised_after_teardown() {
    let log = EventLog::default();
    let registry = FixtureRegistry::new().with(tracked("a", &[], &log));
    let composer = Arc::new(Composer::new(registry).unwrap());

    let handle = tokio::spawn({
        let composer = Arc::clone(&composer);
        async move {
            composer
                .run(&["a"], OverrideSet::new(), |_ctx| async {
                    if true {
                        panic!("body blew up");
                    }
                    Ok(())
                })
                .await
        }
    });

    let joined = handle.await;
    assert!(joined.is_err());
    assert!(joined.unwrap_err().is_panic());
    assert_eq!(log.count_of("teardown:a"), 1);
}

#[tokio::test]
async fn body_timeout_still_tears_down() {
    let log = EventLog::default();
    let registry = FixtureRegistry::new().with(tracked("a", &[], &log));
    let config = ComposerConfig {
        body_timeout_ms: Some(100),
        ..ComposerConfig::default()
    };
    let composer = Composer::with_config(registry, config).unwrap();

    let err = composer
        .run(&["a"], OverrideSet::new(), |_ctx| async {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(())
        })
        .await
        .unwrap_err();

    assert_matches!(err, ComposeError::BodyTimedOut { limit_ms: 100 });
    assert_eq!(log.count_of("teardown:a"), 1);
}

// ============================================================================
// Suite scope
// ============================================================================

#[tokio::test]
async fn suite_fixture_is_reused_across_runs_and_torn_down_at_shutdown() {
    let log = EventLog::default();
    let registry = FixtureRegistry::new()
        .with(tracked("shared", &[], &log).per_suite())
        .with(tracked("worker", &["shared"], &log));
    let composer = Composer::new(registry).unwrap();

    for _ in 0..3 {
        composer
            .run(&["worker"], OverrideSet::new(), |_ctx| async { Ok(()) })
            .await
            .unwrap();
    }

    assert_eq!(log.count_of("setup:shared"), 1);
    assert_eq!(log.count_of("teardown:shared"), 0);
    assert_eq!(log.count_of("teardown:worker"), 3);

    let report = composer.shutdown().await;
    assert!(report.is_empty());
    assert_eq!(log.count_of("teardown:shared"), 1);
}

#[tokio::test]
async fn failed_suite_setup_replays_to_later_runs() {
    init_tracing();
    let attempts = EventLog::default();
    let attempt_log = attempts.clone();
    let registry = FixtureRegistry::new()
        .with(
            FixtureDefinition::with_fixture("shared", move |_deps, _slot| {
                let attempts = attempt_log.clone();
                async move {
                    attempts.push("setup:shared");
                    Err(ComposeError::config("shared exploded"))
                }
            })
            .per_suite(),
        )
        .with(FixtureDefinition::value("dependent", ()).depends_on(["shared"]));
    let composer = Composer::new(registry).unwrap();

    let first = composer
        .resolve(&["shared"], &OverrideSet::new())
        .await
        .unwrap_err();
    assert_matches!(first, ComposeError::Setup { fixture, .. } if fixture == "shared");

    let second = composer
        .resolve(&["dependent"], &OverrideSet::new())
        .await
        .unwrap_err();
    assert_matches!(
        second,
        ComposeError::DependencyFailed { fixture, dependency }
            if fixture == "dependent" && dependency == "shared"
    );

    // The broken setup ran once; the replay did not retry it.
    assert_eq!(attempts.count_of("setup:shared"), 1);
}

#[tokio::test]
async fn overriding_a_suite_fixture_is_rejected() {
    let registry = FixtureRegistry::new()
        .with(FixtureDefinition::value("shared", ()).per_suite());
    let composer = Composer::new(registry).unwrap();

    let overrides = OverrideSet::new().value("shared", 1u8);
    let err = composer
        .resolve(&["shared"], &overrides)
        .await
        .unwrap_err();
    assert_matches!(err, ComposeError::Config { message } if message.contains("suite-scoped"));
}

#[tokio::test]
async fn ordering_survives_shared_instances_across_runs() {
    let log = EventLog::default();
    let registry = FixtureRegistry::new()
        .with(tracked("shared", &[], &log).per_suite())
        .with(tracked("a", &["shared"], &log))
        .with(tracked("b", &["a", "shared"], &log));
    let composer = Composer::new(registry).unwrap();

    composer
        .run(&["b"], OverrideSet::new(), |_ctx| async { Ok(()) })
        .await
        .unwrap();
    composer
        .run(&["b"], OverrideSet::new(), |_ctx| async { Ok(()) })
        .await
        .unwrap();

    // Per-test ordering holds within each run even when `shared` is reused.
    assert!(log.position_of("setup:shared").unwrap() < log.position_of("setup:a").unwrap());
    assert_eq!(log.count_of("setup:a"), 2);
    assert_eq!(log.count_of("setup:shared"), 1);

    composer.shutdown().await;
}
