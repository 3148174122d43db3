//! Fixture registry
//!
//! Registration is data, not inheritance: a registry is an insertion-ordered
//! map from name to [`FixtureDefinition`], and suites compose by merging
//! registries (extension definitions replace base definitions of the same
//! name). [`FixtureRegistry::validate`] checks the whole graph at merge time
//! so misconfiguration fails before any setup runs.

use indexmap::IndexMap;

use crate::definition::{FixtureDefinition, Scope};
use crate::errors::{ComposeError, Result};
use crate::graph;

/// Insertion-ordered collection of fixture definitions
#[derive(Clone, Debug, Default)]
pub struct FixtureRegistry {
    definitions: IndexMap<String, FixtureDefinition>,
}

impl FixtureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a definition
    ///
    /// Defining a name twice replaces the earlier definition; this is the
    /// same replacement rule `merge` applies across registries.
    pub fn define(&mut self, definition: FixtureDefinition) {
        self.definitions
            .insert(definition.name().to_string(), definition);
    }

    /// Builder-style [`define`](Self::define)
    pub fn with(mut self, definition: FixtureDefinition) -> Self {
        self.define(definition);
        self
    }

    /// Merge another registry over this one; `extension` wins on name clashes
    pub fn merge(mut self, extension: FixtureRegistry) -> Self {
        for (name, definition) in extension.definitions {
            self.definitions.insert(name, definition);
        }
        self
    }

    /// Look up a definition by name
    pub fn get(&self, name: &str) -> Option<&FixtureDefinition> {
        self.definitions.get(name)
    }

    /// Every registered name, in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    /// Names of fixtures flagged `auto`, in declaration order
    pub fn auto_names(&self) -> Vec<String> {
        self.definitions
            .values()
            .filter(|d| d.is_auto())
            .map(|d| d.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Whether `from` transitively depends on `on`
    pub fn depends_transitively(&self, from: &str, on: &str) -> bool {
        let mut stack = vec![from.to_string()];
        let mut seen = std::collections::BTreeSet::new();
        while let Some(name) = stack.pop() {
            if let Some(def) = self.get(&name) {
                for dep in def.dependencies() {
                    if dep == on {
                        return true;
                    }
                    if seen.insert(dep.clone()) {
                        stack.push(dep.clone());
                    }
                }
            }
        }
        false
    }

    /// Validate the whole registry: every declared dependency must resolve
    /// to a known name, suite-scoped fixtures may only depend on suite-scoped
    /// fixtures, and the graph must be acyclic
    pub fn validate(&self) -> Result<()> {
        for def in self.definitions.values() {
            for dep in def.dependencies() {
                let dep_def = self
                    .get(dep)
                    .ok_or_else(|| ComposeError::unknown(dep.clone()))?;
                if def.scope() == Scope::PerSuite && dep_def.scope() != Scope::PerSuite {
                    return Err(ComposeError::config(format!(
                        "suite-scoped fixture `{}` depends on per-test fixture `{dep}`",
                        def.name()
                    )));
                }
            }
        }
        let all: Vec<String> = self.names().map(str::to_string).collect();
        graph::instantiation_order(self, &all).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_lets_the_extension_replace_base_definitions() {
        let base = FixtureRegistry::new()
            .with(FixtureDefinition::value("port", 80u16))
            .with(FixtureDefinition::value("name", "base".to_string()));
        let extension = FixtureRegistry::new().with(FixtureDefinition::value("port", 8080u16));

        let merged = base.merge(extension);
        assert_eq!(merged.len(), 2);
        // Declaration order of the base is preserved for names it introduced.
        let names: Vec<&str> = merged.names().collect();
        assert_eq!(names, vec!["port", "name"]);
    }

    #[test]
    fn validate_rejects_unknown_dependencies() {
        let registry = FixtureRegistry::new()
            .with(FixtureDefinition::value("a", ()).depends_on(["missing"]));
        assert!(matches!(
            registry.validate(),
            Err(ComposeError::UnknownFixture { name }) if name == "missing"
        ));
    }

    #[test]
    fn validate_rejects_cycles() {
        let registry = FixtureRegistry::new()
            .with(FixtureDefinition::value("a", ()).depends_on(["b"]))
            .with(FixtureDefinition::value("b", ()).depends_on(["a"]));
        assert!(matches!(
            registry.validate(),
            Err(ComposeError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn validate_rejects_suite_fixture_depending_on_test_fixture() {
        let registry = FixtureRegistry::new()
            .with(FixtureDefinition::value("per_test", ()))
            .with(
                FixtureDefinition::value("shared", ())
                    .depends_on(["per_test"])
                    .per_suite(),
            );
        assert!(matches!(
            registry.validate(),
            Err(ComposeError::Config { .. })
        ));
    }

    #[test]
    fn auto_names_follow_declaration_order() {
        let registry = FixtureRegistry::new()
            .with(FixtureDefinition::value("b", ()).auto())
            .with(FixtureDefinition::value("a", ()))
            .with(FixtureDefinition::value("c", ()).auto());
        assert_eq!(registry.auto_names(), vec!["b", "c"]);
    }
}
