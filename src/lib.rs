//! Pattern Engine - template resolution and compile-time data binding for
//! Pattern Lab style component libraries
//!
//! Templates are located through an ordered resolver chain (pattern partials,
//! namespaced files, inline text), parsed, rewritten by tree passes and lowered
//! to programs. The data-binding pass attaches each pattern's JSON data to the
//! includes and embeds that name it literally, so the lookup happens once at
//! compile time.
//!
//! # Example
//!
//! ```rust
//! use pattern_engine::{Engine, EngineConfig};
//! use serde_json::{json, Map};
//!
//! let engine = Engine::new(EngineConfig::new().with_source_dir("does-not-exist")).unwrap();
//! let mut context = Map::new();
//! context.insert("name".to_string(), json!("<World>"));
//!
//! let html = engine.render_string("Hello {{ name }}!", context).unwrap();
//! assert_eq!(html, "Hello &lt;World&gt;!");
//! ```

pub mod compiler;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod extension;
pub mod loader;
pub mod macros;
pub mod namespace;
pub mod parser;
pub mod render;
pub mod visitor;

pub use compiler::{template_arguments, Arguments, Program};
pub use config::{ConfigError, EngineConfig};
pub use data::{MemoryDataStore, PatternDataStore};
pub use engine::Engine;
pub use error::ParseError;
pub use extension::{ExtensionKind, ExtensionRegistry, RegisteredSymbol};
pub use loader::{LoaderError, Resolver, ResolverChain, Source};
pub use namespace::{Namespace, NamespaceError, NamespaceRegistry};
pub use parser::{parse, Template};
pub use render::RenderError;
pub use visitor::{DataBinding, NodePass};

use thiserror::Error;

/// Errors that can occur while compiling or rendering a template
#[derive(Debug, Error)]
pub enum EngineError {
    /// No resolver claims the name, or its source could not be read
    #[error(transparent)]
    Load(#[from] LoaderError),

    #[error("parse errors in {template}: {}", format_parse_errors(.errors))]
    Parse {
        template: String,
        errors: Vec<ParseError>,
    },

    #[error("error rendering {template}: {source}")]
    Render {
        template: String,
        #[source]
        source: RenderError,
    },

    #[error(transparent)]
    Namespace(#[from] NamespaceError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn format_parse_errors(errors: &[ParseError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
