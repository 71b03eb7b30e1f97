//! Macro libraries from the `_macros` directory
//!
//! Each `<stem>.<extension>` file becomes a library named `stem`; its
//! `{% macro %}` definitions are called as `{{ stem.name(args) }}`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::compiler::{compile, Program};
use crate::loader::{LoaderError, Source};
use crate::parser::Template;
use crate::{parse, EngineError};

/// Tree rewrite applied to each library before lowering
pub type Rewrite<'a> = &'a dyn Fn(Template) -> Template;

#[derive(Debug, Clone)]
struct Library {
    template: Template,
    program: Arc<Program>,
}

#[derive(Debug, Clone, Default)]
pub struct MacroLibraries {
    libraries: BTreeMap<String, Library>,
}

impl MacroLibraries {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load every library in `dir`, in file name order
    ///
    /// A missing directory disables macros.
    pub fn load(
        dir: &Path,
        extension: &str,
        autoescape: bool,
        rewrite: Rewrite<'_>,
    ) -> Result<Self, EngineError> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    path = %dir.display(),
                    error = %e,
                    "macro directory unavailable, macros disabled"
                );
                return Ok(Self::empty());
            }
        };

        let mut paths: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(extension)
            })
            .collect();
        paths.sort();

        let mut libraries = Self::empty();
        for path in paths {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let text = std::fs::read_to_string(&path).map_err(|source| LoaderError::Io {
                name: stem.clone(),
                path: path.clone(),
                source,
            })?;
            let source = Source {
                name: stem,
                text,
                cache_key: path.display().to_string(),
                path: Some(path),
            };
            libraries.add(source, autoescape, rewrite)?;
        }
        Ok(libraries)
    }

    /// Parse, rewrite and compile `source`, registering it under its name
    pub fn add(
        &mut self,
        source: Source,
        autoescape: bool,
        rewrite: Rewrite<'_>,
    ) -> Result<(), EngineError> {
        let template = parse(&source.text).map_err(|errors| EngineError::Parse {
            template: source.name.clone(),
            errors,
        })?;
        let program = Arc::new(compile(&source.name, rewrite(template.clone()), autoescape));
        debug!(
            library = %source.name,
            macros = program.macros.len(),
            "loaded macro library"
        );
        self.libraries.insert(source.name, Library { template, program });
        Ok(())
    }

    /// Compile every library again from its parsed tree
    pub fn relower(&mut self, autoescape: bool, rewrite: Rewrite<'_>) {
        for (name, library) in &mut self.libraries {
            let template = rewrite(library.template.clone());
            library.program = Arc::new(compile(name, template, autoescape));
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Program>> {
        self.libraries.get(name).map(|library| Arc::clone(&library.program))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.libraries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.libraries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }
}
