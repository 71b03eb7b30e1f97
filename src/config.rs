//! Engine configuration
//!
//! Loaded from TOML; every field is optional. Relative paths in a file are
//! taken relative to the directory containing that file.
//!
//! ```toml
//! source_dir = "source"
//! pattern_extension = "twig"
//! template_dirs = ["templates"]
//! autoescape = true
//!
//! [globals]
//! site = "Pattern Lab"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors that can occur when loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Configuration for an [`Engine`](crate::Engine)
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Root holding `_patterns`, `_macros`, `_layouts` and components
    pub source_dir: PathBuf,
    /// Overrides `<source_dir>/_patterns`
    pub pattern_source_dir: Option<PathBuf>,
    pub pattern_extension: String,
    pub macro_extension: String,
    /// Overrides `<source_dir>/_twig-components`
    pub components_dir: Option<PathBuf>,
    /// Searched for plain (non-namespaced) template names, in order
    pub template_dirs: Vec<PathBuf>,
    pub autoescape: bool,
    /// Reuse compiled programs while their source is unchanged
    pub cache: bool,
    /// Variables visible to every template
    pub globals: Map<String, Value>,
}

#[derive(Deserialize, Default)]
struct TomlConfig {
    source_dir: Option<PathBuf>,
    pattern_source_dir: Option<PathBuf>,
    pattern_extension: Option<String>,
    macro_extension: Option<String>,
    components_dir: Option<PathBuf>,
    template_dirs: Option<Vec<PathBuf>>,
    autoescape: Option<bool>,
    cache: Option<bool>,
    globals: Option<Map<String, Value>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("source"),
            pattern_source_dir: None,
            pattern_extension: "twig".to_string(),
            macro_extension: "macro".to_string(),
            components_dir: None,
            template_dirs: Vec::new(),
            autoescape: true,
            cache: true,
            globals: Map::new(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_str(&content)?;
        Ok(match path.parent() {
            Some(base) => config.relative_to(base),
            None => config,
        })
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let parsed: TomlConfig = toml::from_str(content)?;
        let defaults = Self::default();

        Ok(EngineConfig {
            source_dir: parsed.source_dir.unwrap_or(defaults.source_dir),
            pattern_source_dir: parsed.pattern_source_dir,
            pattern_extension: parsed.pattern_extension.unwrap_or(defaults.pattern_extension),
            macro_extension: parsed.macro_extension.unwrap_or(defaults.macro_extension),
            components_dir: parsed.components_dir,
            template_dirs: parsed.template_dirs.unwrap_or_default(),
            autoescape: parsed.autoescape.unwrap_or(defaults.autoescape),
            cache: parsed.cache.unwrap_or(defaults.cache),
            globals: parsed.globals.unwrap_or_default(),
        })
    }

    /// Resolve relative paths against `base`
    pub fn relative_to(mut self, base: &Path) -> Self {
        let join = |path: PathBuf| if path.is_relative() { base.join(path) } else { path };
        self.source_dir = join(self.source_dir);
        self.pattern_source_dir = self.pattern_source_dir.map(join);
        self.components_dir = self.components_dir.map(join);
        self.template_dirs = self.template_dirs.into_iter().map(join).collect();
        self
    }

    pub fn pattern_source_dir(&self) -> PathBuf {
        self.pattern_source_dir
            .clone()
            .unwrap_or_else(|| self.source_dir.join("_patterns"))
    }

    pub fn components_dir(&self) -> PathBuf {
        self.components_dir
            .clone()
            .unwrap_or_else(|| self.source_dir.join("_twig-components"))
    }

    pub fn macros_dir(&self) -> PathBuf {
        self.source_dir.join("_macros")
    }

    pub fn layouts_dir(&self) -> PathBuf {
        self.source_dir.join("_layouts")
    }

    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = dir.into();
        self
    }

    pub fn with_pattern_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pattern_source_dir = Some(dir.into());
        self
    }

    pub fn with_pattern_extension(mut self, extension: impl Into<String>) -> Self {
        self.pattern_extension = extension.into();
        self
    }

    pub fn with_macro_extension(mut self, extension: impl Into<String>) -> Self {
        self.macro_extension = extension.into();
        self
    }

    pub fn with_components_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.components_dir = Some(dir.into());
        self
    }

    /// Append a search directory for plain template names
    pub fn with_template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_dirs.push(dir.into());
        self
    }

    pub fn with_autoescape(mut self, autoescape: bool) -> Self {
        self.autoescape = autoescape;
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_global(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.globals.insert(name.into(), value.into());
        self
    }
}
