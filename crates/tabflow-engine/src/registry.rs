//! Static registry of named factories, indexed by dotted namespace path.
//!
//! Registrations are made at process start. [`Registry::index`] enumerates
//! the registrations under a namespace root and groups their paths by name,
//! which is what name-only resolution consults.

use std::collections::BTreeMap;

use crate::error::ResolveError;

/// One named factory at a dotted namespace path such as `modules.copy`.
#[derive(Clone)]
pub struct Registration<F> {
    pub path: String,
    pub name: String,
    pub factory: F,
}

impl<F> std::fmt::Debug for Registration<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("path", &self.path)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A successful resolution: where the name was found and its factory.
#[derive(Clone)]
pub struct Resolved<F> {
    pub path: String,
    pub factory: F,
}

/// Names declared under one namespace root, mapped to every path declaring them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclarationIndex {
    root: String,
    names: BTreeMap<String, Vec<String>>,
}

impl DeclarationIndex {
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn paths(&self, name: &str) -> &[String] {
        self.names.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Collection of registrations.
pub struct Registry<F> {
    entries: Vec<Registration<F>>,
}

impl<F> Default for Registry<F> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<F> std::fmt::Debug for Registry<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(&self.entries).finish()
    }
}

/// A path is a non-empty sequence of identifier segments joined by dots.
fn is_valid_path(path: &str) -> bool {
    !path.is_empty()
        && path.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

fn is_under_root(path: &str, root: &str) -> bool {
    path == root
        || path
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with('.'))
}

impl<F: Clone> Registry<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a registration. Registering the same name twice under one root
    /// makes name-only resolution of that name ambiguous.
    pub fn register(
        &mut self,
        path: impl Into<String>,
        name: impl Into<String>,
        factory: F,
    ) -> &mut Self {
        self.entries.push(Registration {
            path: path.into(),
            name: name.into(),
            factory,
        });
        self
    }

    pub fn entries(&self) -> impl Iterator<Item = &Registration<F>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Enumerate the registrations under `root` and group their paths by name.
    ///
    /// Registrations with a malformed path are skipped with a warning.
    pub fn index(&self, root: &str) -> DeclarationIndex {
        let mut names: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entry in &self.entries {
            if !is_valid_path(&entry.path) || entry.name.trim().is_empty() {
                tracing::warn!(
                    path = entry.path.as_str(),
                    name = entry.name.as_str(),
                    "Registration cannot be indexed, skipping"
                );
                continue;
            }
            if !is_under_root(&entry.path, root) {
                continue;
            }
            let paths = names.entry(entry.name.clone()).or_default();
            if !paths.contains(&entry.path) {
                paths.push(entry.path.clone());
            }
        }
        DeclarationIndex {
            root: root.to_string(),
            names,
        }
    }

    /// Direct lookup of `name` at exactly `path`.
    pub fn lookup(&self, path: &str, name: &str) -> Option<&F> {
        self.entries
            .iter()
            .find(|e| e.path == path && e.name == name)
            .map(|e| &e.factory)
    }

    /// Resolve `name` against `index`, or at `explicit_path` when given.
    ///
    /// # Errors
    ///
    /// `ImportFailed` when nothing is registered at the explicit path,
    /// `NotFound` when the index has no declaration of `name`, and
    /// `Ambiguous` when it has more than one.
    pub fn resolve(
        &self,
        index: &DeclarationIndex,
        name: &str,
        explicit_path: Option<&str>,
    ) -> Result<Resolved<F>, ResolveError> {
        if let Some(path) = explicit_path {
            return self
                .lookup(path, name)
                .map(|factory| Resolved {
                    path: path.to_string(),
                    factory: factory.clone(),
                })
                .ok_or_else(|| ResolveError::ImportFailed {
                    name: name.to_string(),
                    path: path.to_string(),
                });
        }

        match index.paths(name) {
            [] => Err(ResolveError::NotFound {
                name: name.to_string(),
                root: index.root().to_string(),
            }),
            [path] => {
                let factory = self
                    .lookup(path, name)
                    .ok_or_else(|| ResolveError::ImportFailed {
                        name: name.to_string(),
                        path: path.clone(),
                    })?;
                Ok(Resolved {
                    path: path.clone(),
                    factory: factory.clone(),
                })
            }
            paths => Err(ResolveError::Ambiguous {
                name: name.to_string(),
                paths: paths.to_vec(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry<u32> {
        let mut registry = Registry::new();
        registry
            .register("modules.scoring", "Materiality", 1)
            .register("modules.scoring.v2", "Materiality", 2)
            .register("modules.copy", "CopyVariable", 3)
            .register("executions.default", "default", 4)
            .register("modules..broken", "Broken", 5);
        registry
    }

    #[test]
    fn index_groups_paths_under_root() {
        let index = registry().index("modules");
        assert_eq!(index.root(), "modules");
        assert_eq!(
            index.paths("Materiality"),
            &["modules.scoring".to_string(), "modules.scoring.v2".to_string()]
        );
        assert_eq!(index.paths("default"), &[] as &[String]);
        assert!(index.names().all(|n| n != "Broken"));
    }

    #[test]
    fn root_prefix_must_match_whole_segment() {
        let mut registry = Registry::new();
        registry.register("modules_extra.copy", "CopyVariable", 1);
        assert!(registry.index("modules").is_empty());
    }

    #[test]
    fn unique_name_resolves_with_stable_path() {
        let registry = registry();
        let index = registry.index("modules");
        let first = registry.resolve(&index, "CopyVariable", None).unwrap();
        let second = registry.resolve(&index, "CopyVariable", None).unwrap();
        assert_eq!(first.path, "modules.copy");
        assert_eq!(first.path, second.path);
        assert_eq!(first.factory, 3);
    }

    #[test]
    fn duplicate_name_is_ambiguous() {
        let registry = registry();
        let index = registry.index("modules");
        let err = registry.resolve(&index, "Materiality", None).err().unwrap();
        match err {
            ResolveError::Ambiguous { paths, .. } => assert_eq!(paths.len(), 2),
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn missing_name_is_not_found() {
        let registry = registry();
        let index = registry.index("modules");
        let err = registry.resolve(&index, "Echo", None).err().unwrap();
        assert!(matches!(err, ResolveError::NotFound { .. }));
    }

    #[test]
    fn explicit_path_disambiguates() {
        let registry = registry();
        let index = registry.index("modules");
        let resolved = registry
            .resolve(&index, "Materiality", Some("modules.scoring.v2"))
            .unwrap();
        assert_eq!(resolved.factory, 2);
    }

    #[test]
    fn explicit_path_without_registration_fails_import() {
        let registry = registry();
        let index = registry.index("modules");
        let err = registry
            .resolve(&index, "Materiality", Some("modules.copy"))
            .err()
            .unwrap();
        assert!(matches!(err, ResolveError::ImportFailed { .. }));
    }
}
