//! Namespaced filesystem resolver

use std::path::{Component, Path, PathBuf};

use crate::namespace::NamespaceRegistry;

use super::{read_file, LoaderError, Resolver, Source};

/// Resolves `@namespace/rest` inside the namespace directory and any other
/// name inside the default search paths, in order
#[derive(Debug, Clone)]
pub struct FilesystemResolver {
    paths: Vec<PathBuf>,
    namespaces: NamespaceRegistry,
    extension: String,
}

impl FilesystemResolver {
    pub fn new(namespaces: NamespaceRegistry, extension: impl Into<String>) -> Self {
        Self {
            paths: Vec::new(),
            namespaces,
            extension: extension.into(),
        }
    }

    /// Append a default search path
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Find the file a name refers to
    pub fn find(&self, name: &str) -> Option<PathBuf> {
        let (dirs, rest): (Vec<&Path>, &str) = match name.strip_prefix('@') {
            Some(qualified) => {
                let (namespace, rest) = qualified.split_once('/')?;
                let namespace = self.namespaces.get(namespace)?;
                (vec![namespace.directory.as_path()], rest)
            }
            None => (self.paths.iter().map(PathBuf::as_path).collect(), name),
        };

        if !is_contained(rest) {
            return None;
        }

        let suffix = format!(".{}", self.extension);
        let with_extension = (!rest.ends_with(&suffix)).then(|| format!("{}{}", rest, suffix));

        dirs.into_iter().find_map(|dir| {
            std::iter::once(rest)
                .chain(with_extension.as_deref())
                .map(|candidate| dir.join(candidate))
                .find(|path| path.is_file())
        })
    }
}

/// True when a relative name stays inside the directory it is joined to
fn is_contained(rest: &str) -> bool {
    !rest.is_empty()
        && Path::new(rest)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

impl Resolver for FilesystemResolver {
    fn kind(&self) -> &'static str {
        "filesystem"
    }

    fn exists(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    fn load(&self, name: &str) -> Result<Source, LoaderError> {
        let path = self
            .find(name)
            .ok_or_else(|| LoaderError::not_found(name))?;
        read_file(name, path)
    }
}
