//! Pattern partial index and resolver
//!
//! Patterns are addressed by the shorthand `<namespace>-<name>`, where the
//! name is the file stem without its hidden marker and ordering prefix:
//! `00-atoms/01-forms/_02-text-input.twig` is `atoms-text-input`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::data::MemoryDataStore;
use crate::namespace::{derive_name, NamespaceRegistry};

use super::{read_file, LoaderError, Resolver, Source};

/// A pattern file known to the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternEntry {
    /// Partial shorthand, e.g. `atoms-button`
    pub partial: String,
    pub namespace: String,
    /// Path relative to the namespace directory, `/`-separated
    pub relative: String,
    pub path: PathBuf,
}

impl PatternEntry {
    /// Namespaced reference, e.g. `@atoms/forms/button.twig`
    pub fn reference(&self) -> String {
        format!("@{}/{}", self.namespace, self.relative)
    }
}

/// Partial shorthand → pattern file
#[derive(Debug, Clone, Default)]
pub struct PatternIndex {
    entries: BTreeMap<String, PatternEntry>,
    extension: String,
}

/// Pattern name for a file stem
fn clean_stem(stem: &str) -> String {
    let visible = stem.strip_prefix('_').unwrap_or(stem);
    derive_name(visible).unwrap_or_else(|| visible.to_string())
}

/// Recursively collect files with `extension` under `dir`, sorted per directory
fn collect_files(dir: &Path, extension: &str, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "cannot list pattern directory");
            return;
        }
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with('.'))
        })
        .collect();
    paths.sort();

    for path in paths {
        if path.is_dir() {
            collect_files(&path, extension, out);
        } else if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            out.push(path);
        }
    }
}

impl PatternIndex {
    /// Index every pattern file below each namespace directory
    ///
    /// On a shorthand collision the first file in namespace and path order wins.
    pub fn scan(namespaces: &NamespaceRegistry, extension: &str) -> Self {
        let mut entries: BTreeMap<String, PatternEntry> = BTreeMap::new();

        for namespace in namespaces.iter() {
            let mut files = Vec::new();
            collect_files(&namespace.directory, extension, &mut files);

            for path in files {
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let partial = format!("{}-{}", namespace.name, clean_stem(stem));
                let relative = path
                    .strip_prefix(&namespace.directory)
                    .unwrap_or(&path)
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");

                if let Some(existing) = entries.get(&partial) {
                    warn!(
                        partial = %partial,
                        kept = %existing.path.display(),
                        skipped = %path.display(),
                        "pattern partial collision, keeping the first file"
                    );
                    continue;
                }
                debug!(partial = %partial, path = %path.display(), "indexed pattern");
                entries.insert(
                    partial.clone(),
                    PatternEntry {
                        partial,
                        namespace: namespace.name.clone(),
                        relative,
                        path,
                    },
                );
            }
        }

        Self {
            entries,
            extension: extension.to_string(),
        }
    }

    /// Look up a partial, with or without the template extension
    pub fn get(&self, name: &str) -> Option<&PatternEntry> {
        let suffix = format!(".{}", self.extension);
        let partial = name.strip_suffix(&suffix).unwrap_or(name);
        self.entries.get(partial)
    }

    pub fn entries(&self) -> impl Iterator<Item = &PatternEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Collect `<pattern>.json` sidecars into a data store
    ///
    /// Each object is stored under the partial name and the namespaced reference.
    pub fn load_data(&self) -> MemoryDataStore {
        let mut store = MemoryDataStore::new();
        for entry in self.entries.values() {
            let sidecar = entry.path.with_extension("json");
            if !sidecar.is_file() {
                continue;
            }
            if let Some(data) = MemoryDataStore::read_sidecar(&sidecar) {
                let shared = Arc::new(data);
                store.insert_shared(entry.reference(), Arc::clone(&shared));
                store.insert_shared(entry.partial.clone(), shared);
            }
        }
        store
    }
}

/// Resolves Pattern Lab partial shorthand through a [`PatternIndex`]
#[derive(Debug, Clone)]
pub struct PatternResolver {
    index: Arc<PatternIndex>,
}

impl PatternResolver {
    pub fn new(index: Arc<PatternIndex>) -> Self {
        Self { index }
    }
}

impl Resolver for PatternResolver {
    fn kind(&self) -> &'static str {
        "pattern"
    }

    fn exists(&self, name: &str) -> bool {
        self.index.get(name).is_some()
    }

    fn load(&self, name: &str) -> Result<Source, LoaderError> {
        let entry = self
            .index
            .get(name)
            .ok_or_else(|| LoaderError::not_found(name))?;
        read_file(name, entry.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PatternDataStore;
    use serde_json::json;
    use std::fs;

    fn fixture() -> (tempfile::TempDir, PatternIndex) {
        let root = tempfile::tempdir().unwrap();
        let atoms = root.path().join("00-atoms");
        fs::create_dir_all(atoms.join("01-forms")).unwrap();
        fs::create_dir_all(root.path().join("01-molecules")).unwrap();
        fs::write(atoms.join("00-button.twig"), "<button>").unwrap();
        fs::write(atoms.join("00-button.json"), r#"{"label": "Go"}"#).unwrap();
        fs::write(atoms.join("01-forms/_02-text-input.twig"), "<input>").unwrap();
        fs::write(atoms.join("notes.md"), "ignored").unwrap();
        fs::write(root.path().join("01-molecules/card.twig"), "<div>").unwrap();
        // Same shorthand as 00-button.twig, sorts after it
        fs::write(atoms.join("button.twig"), "<duplicate>").unwrap();

        let namespaces = NamespaceRegistry::build(root.path()).unwrap();
        let index = PatternIndex::scan(&namespaces, "twig");
        (root, index)
    }

    #[test]
    fn test_partial_names() {
        let (_root, index) = fixture();
        let partials: Vec<_> = index.entries().map(|e| e.partial.as_str()).collect();
        assert_eq!(
            partials,
            vec!["atoms-button", "atoms-text-input", "molecules-card"]
        );
    }

    #[test]
    fn test_first_file_wins_on_collision() {
        let (root, index) = fixture();
        assert_eq!(
            index.get("atoms-button").unwrap().path,
            root.path().join("00-atoms/00-button.twig")
        );
    }

    #[test]
    fn test_get_accepts_extension() {
        let (_root, index) = fixture();
        assert!(index.get("atoms-text-input.twig").is_some());
        assert_eq!(
            index.get("atoms-text-input").unwrap().reference(),
            "@atoms/01-forms/_02-text-input.twig"
        );
    }

    #[test]
    fn test_resolver_loads_partials() {
        let (_root, index) = fixture();
        let resolver = PatternResolver::new(Arc::new(index));
        assert_eq!(resolver.load("molecules-card").unwrap().text, "<div>");
        assert!(!resolver.exists("molecules-missing"));
        assert!(resolver.load("molecules-missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_sidecar_data_under_both_keys() {
        let (_root, index) = fixture();
        let store = index.load_data();
        assert_eq!(
            store.lookup("atoms-button").unwrap().get("label"),
            Some(&json!("Go"))
        );
        assert!(store.lookup("@atoms/00-button.twig").is_some());
        assert!(store.lookup("molecules-card").is_none());
    }
}
