//! Template resolution
//!
//! A logical template name is resolved by asking an ordered chain of
//! resolvers whether they know it. The first resolver that claims the name
//! loads it; the order is fixed when the chain is built.
//!
//! The engine builds this chain:
//!
//! 1. [`PatternResolver`]: Pattern Lab partial shorthand such as `atoms-button`
//! 2. [`FilesystemResolver`]: `@namespace/path` references and plain paths
//! 3. [`InlineResolver`]: anything that does not look like a path is template text

mod filesystem;
mod inline;
mod pattern;

use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

pub use filesystem::FilesystemResolver;
pub use inline::{looks_like_path, InlineResolver};
pub use pattern::{PatternEntry, PatternIndex, PatternResolver};

/// Errors that can occur while loading template source
#[derive(Debug, Error)]
pub enum LoaderError {
    /// No resolver claims the name
    #[error("template not found: {name}")]
    TemplateNotFound { name: String },

    /// A resolver claimed the name but its file could not be read
    #[error("error reading template {name} from {path}: {source}")]
    Io {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LoaderError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::TemplateNotFound { name: name.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TemplateNotFound { .. })
    }
}

/// Loaded template source
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    /// Logical name the source was requested under
    pub name: String,
    pub text: String,
    /// Identifies the resolved source for compiled-output caching
    pub cache_key: String,
    /// File the source was read from, if any
    pub path: Option<PathBuf>,
}

/// A strategy that can check for and load template source
pub trait Resolver: Send + Sync {
    /// Short label used in diagnostics
    fn kind(&self) -> &'static str;

    fn exists(&self, name: &str) -> bool;

    fn load(&self, name: &str) -> Result<Source, LoaderError>;
}

pub(crate) fn read_file(name: &str, path: PathBuf) -> Result<Source, LoaderError> {
    match std::fs::read_to_string(&path) {
        Ok(text) => Ok(Source {
            name: name.to_string(),
            text,
            cache_key: path.display().to_string(),
            path: Some(path),
        }),
        Err(source) => Err(LoaderError::Io {
            name: name.to_string(),
            path,
            source,
        }),
    }
}

/// Ordered resolver sequence; the first resolver whose `exists` is true wins
#[derive(Default)]
pub struct ResolverChain {
    resolvers: Vec<Box<dyn Resolver>>,
}

impl std::fmt::Debug for ResolverChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.resolvers.iter().map(|r| r.kind()))
            .finish()
    }
}

impl ResolverChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resolver after the existing ones
    pub fn with(mut self, resolver: impl Resolver + 'static) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }

    /// Resolver labels in chain order
    pub fn kinds(&self) -> Vec<&'static str> {
        self.resolvers.iter().map(|r| r.kind()).collect()
    }

    /// The resolver that would handle `name`
    pub fn resolver_for(&self, name: &str) -> Option<&dyn Resolver> {
        self.resolvers
            .iter()
            .find(|r| r.exists(name))
            .map(|r| r.as_ref())
    }
}

impl Resolver for ResolverChain {
    fn kind(&self) -> &'static str {
        "chain"
    }

    fn exists(&self, name: &str) -> bool {
        self.resolver_for(name).is_some()
    }

    fn load(&self, name: &str) -> Result<Source, LoaderError> {
        match self.resolver_for(name) {
            Some(resolver) => {
                debug!(template = name, resolver = resolver.kind(), "resolved template");
                resolver.load(name)
            }
            None => Err(LoaderError::not_found(name)),
        }
    }
}

/// Resolver over an in-memory name → source table
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    templates: HashMap<String, String>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.add_template(name, text);
        self
    }

    pub fn add_template(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.templates.insert(name.into(), text.into());
    }
}

impl Resolver for MemoryResolver {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn exists(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    fn load(&self, name: &str) -> Result<Source, LoaderError> {
        let text = self
            .templates
            .get(name)
            .ok_or_else(|| LoaderError::not_found(name))?;
        Ok(Source {
            name: name.to_string(),
            text: text.clone(),
            cache_key: format!("memory:{}", name),
            path: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_claiming_resolver_wins() {
        let chain = ResolverChain::new()
            .with(MemoryResolver::new().with_template("card", "first"))
            .with(MemoryResolver::new().with_template("card", "second"));
        assert_eq!(chain.load("card").unwrap().text, "first");
    }

    #[test]
    fn test_falls_through_to_later_resolver() {
        let chain = ResolverChain::new()
            .with(MemoryResolver::new().with_template("a", "A"))
            .with(MemoryResolver::new().with_template("b", "B"));
        assert_eq!(chain.load("b").unwrap().text, "B");
    }

    #[test]
    fn test_unclaimed_name_is_not_found() {
        let chain = ResolverChain::new().with(MemoryResolver::new());
        let err = chain.load("ghost").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "template not found: ghost");
    }

    #[test]
    fn test_inline_fallback_only_for_non_paths() {
        let chain = ResolverChain::new()
            .with(MemoryResolver::new())
            .with(InlineResolver);
        assert_eq!(chain.load("Hi {{ name }}").unwrap().text, "Hi {{ name }}");
        assert!(chain.load("atoms/button.twig").unwrap_err().is_not_found());
    }

    #[test]
    fn test_kinds_report_order() {
        let chain = ResolverChain::new()
            .with(MemoryResolver::new())
            .with(InlineResolver);
        assert_eq!(chain.kinds(), vec!["memory", "inline"]);
    }
}
