//! Namespace registry built from the pattern source root
//!
//! Every immediate subdirectory of the root becomes a namespace whose name is
//! the directory name without its ordering prefix: `00-atoms` is registered as
//! `atoms` and can be referenced as `@atoms/...`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while building the registry
#[derive(Debug, Error)]
pub enum NamespaceError {
    /// Root missing or not listable
    #[error("cannot read namespace source directory {path}: {source}")]
    DirectoryUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A symbolic prefix mapped to a source directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub name: String,
    pub directory: PathBuf,
}

/// Derive a namespace name from a directory name
///
/// A leading `<digits>-` prefix is stripped. A name made only of digits (or
/// only of a prefix) yields no namespace. Anything else is kept unchanged.
pub fn derive_name(dir_name: &str) -> Option<String> {
    let digits = dir_name.bytes().take_while(u8::is_ascii_digit).count();
    if digits == dir_name.len() {
        return None;
    }
    if digits > 0 {
        if let Some(rest) = dir_name[digits..].strip_prefix('-') {
            return (!rest.is_empty()).then(|| rest.to_string());
        }
    }
    Some(dir_name.to_string())
}

/// Ordered, immutable list of namespaces
///
/// Cloning is cheap; clones share the same snapshot.
#[derive(Debug, Clone)]
pub struct NamespaceRegistry {
    namespaces: Arc<[Namespace]>,
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

impl NamespaceRegistry {
    /// Registry with no namespaces
    pub fn empty() -> Self {
        Self {
            namespaces: Arc::from(Vec::new()),
        }
    }

    /// Scan the immediate subdirectories of `root` in lexical order
    ///
    /// When two directories derive the same name the first one wins and the
    /// later one is skipped with a warning. Hidden directories are ignored.
    pub fn build(root: &Path) -> Result<Self, NamespaceError> {
        let unreadable = |source| NamespaceError::DirectoryUnreadable {
            path: root.to_path_buf(),
            source,
        };

        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(root).map_err(unreadable)? {
            let entry = entry.map_err(unreadable)?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if !name.starts_with('.') => dirs.push((name, path)),
                Ok(_) => {}
                Err(raw) => debug!(name = ?raw, "skipping non UTF-8 directory name"),
            }
        }
        dirs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut namespaces: Vec<Namespace> = Vec::with_capacity(dirs.len());
        for (dir_name, directory) in dirs {
            let Some(name) = derive_name(&dir_name) else {
                debug!(directory = %directory.display(), "no namespace name derivable");
                continue;
            };
            if let Some(existing) = namespaces.iter().find(|ns| ns.name == name) {
                warn!(
                    namespace = %name,
                    kept = %existing.directory.display(),
                    skipped = %directory.display(),
                    "namespace collision, keeping the first directory"
                );
                continue;
            }
            debug!(namespace = %name, directory = %directory.display(), "registered namespace");
            namespaces.push(Namespace { name, directory });
        }

        Ok(Self {
            namespaces: namespaces.into(),
        })
    }

    /// Namespaces in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.iter()
    }

    /// Look up a namespace by name
    pub fn get(&self, name: &str) -> Option<&Namespace> {
        self.namespaces.iter().find(|ns| ns.name == name)
    }

    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_derive_name_strips_numeric_prefix() {
        assert_eq!(derive_name("00-atoms").as_deref(), Some("atoms"));
        assert_eq!(derive_name("02-molecules").as_deref(), Some("molecules"));
        assert_eq!(derive_name("100-pages").as_deref(), Some("pages"));
    }

    #[test]
    fn test_derive_name_keeps_unprefixed_names() {
        assert_eq!(derive_name("custom").as_deref(), Some("custom"));
        assert_eq!(derive_name("atoms-2").as_deref(), Some("atoms-2"));
        assert_eq!(derive_name("3d").as_deref(), Some("3d"));
    }

    #[test]
    fn test_derive_name_rejects_bare_prefixes() {
        assert_eq!(derive_name("00"), None);
        assert_eq!(derive_name("00-"), None);
    }

    #[test]
    fn test_build_orders_lexically() {
        let root = tempfile::tempdir().unwrap();
        for dir in ["02-organisms", "00-atoms", "01-molecules", "custom"] {
            fs::create_dir(root.path().join(dir)).unwrap();
        }
        fs::write(root.path().join("readme.md"), "not a namespace").unwrap();

        let registry = NamespaceRegistry::build(root.path()).unwrap();
        let names: Vec<_> = registry.iter().map(|ns| ns.name.as_str()).collect();
        assert_eq!(names, vec!["atoms", "molecules", "organisms", "custom"]);
        assert_eq!(
            registry.get("atoms").map(|ns| ns.directory.clone()),
            Some(root.path().join("00-atoms"))
        );
    }

    #[test]
    fn test_build_first_registered_wins_on_collision() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("00-atoms")).unwrap();
        fs::create_dir(root.path().join("05-atoms")).unwrap();

        let registry = NamespaceRegistry::build(root.path()).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("atoms").unwrap().directory,
            root.path().join("00-atoms")
        );
    }

    #[test]
    fn test_build_missing_root_is_unreadable() {
        let root = tempfile::tempdir().unwrap();
        let result = NamespaceRegistry::build(&root.path().join("nope"));
        assert!(matches!(
            result,
            Err(NamespaceError::DirectoryUnreadable { .. })
        ));
    }

    #[test]
    fn test_clones_share_snapshot() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("00-atoms")).unwrap();
        let registry = NamespaceRegistry::build(root.path()).unwrap();
        let clone = registry.clone();
        assert!(std::ptr::eq(
            registry.iter().next().unwrap(),
            clone.iter().next().unwrap()
        ));
    }
}
