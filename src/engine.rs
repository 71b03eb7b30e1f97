//! The template engine
//!
//! An [`Engine`] owns everything built once per configuration: the namespace
//! registry, the pattern index and its data store, the resolver chain, the
//! extension registry, macro libraries and the rewrite passes. Compiling a
//! template runs resolve, parse, passes and lowering in one synchronous
//! sequence; compiled programs are cached by source cache key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::compiler::{compile, Program};
use crate::config::EngineConfig;
use crate::data::PatternDataStore;
use crate::extension::{ExtensionKind, ExtensionRegistry};
use crate::loader::{
    FilesystemResolver, InlineResolver, PatternIndex, PatternResolver, Resolver, ResolverChain,
    Source,
};
use crate::macros::MacroLibraries;
use crate::namespace::NamespaceRegistry;
use crate::parser::Template;
use crate::render::{self, Environment};
use crate::visitor::{apply, DataBinding, NodePass};
use crate::{parse, EngineError};

struct CachedProgram {
    text: String,
    program: Arc<Program>,
}

pub struct Engine {
    config: EngineConfig,
    namespaces: NamespaceRegistry,
    patterns: Arc<PatternIndex>,
    resolver: ResolverChain,
    data: Arc<dyn PatternDataStore>,
    /// Host passes; data binding is added at compile time
    passes: Vec<Box<dyn NodePass>>,
    extensions: ExtensionRegistry,
    macros: MacroLibraries,
    /// Keyed by source cache key and the name it was requested as
    cache: Mutex<HashMap<(String, String), CachedProgram>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("namespaces", &self.namespaces)
            .field("resolver", &self.resolver)
            .field("patterns", &self.patterns.len())
            .field("macros", &self.macros.names().collect::<Vec<_>>())
            .finish()
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let pattern_dir = config.pattern_source_dir();
        let namespaces = match NamespaceRegistry::build(&pattern_dir) {
            Ok(namespaces) => namespaces,
            Err(e) => {
                warn!(error = %e, "no pattern namespaces available");
                NamespaceRegistry::empty()
            }
        };

        let patterns = Arc::new(PatternIndex::scan(&namespaces, &config.pattern_extension));
        let data: Arc<dyn PatternDataStore> = Arc::new(patterns.load_data());

        let mut filesystem = FilesystemResolver::new(namespaces.clone(), &config.pattern_extension);
        for dir in config
            .template_dirs
            .iter()
            .cloned()
            .chain([config.macros_dir(), config.layouts_dir()])
        {
            if dir.is_dir() {
                filesystem = filesystem.with_path(dir);
            }
        }
        let resolver = ResolverChain::new()
            .with(PatternResolver::new(Arc::clone(&patterns)))
            .with(filesystem)
            .with(InlineResolver);

        let mut extensions = ExtensionRegistry::new();
        let components = config.components_dir();
        for kind in ExtensionKind::ALL {
            extensions.load_all(kind, &components.join(kind.directory()), kind.file_extension());
        }

        let mut engine = Self {
            config,
            namespaces,
            patterns,
            resolver,
            data,
            passes: Vec::new(),
            extensions,
            macros: MacroLibraries::empty(),
            cache: Mutex::new(HashMap::new()),
        };
        let macros = MacroLibraries::load(
            &engine.config.macros_dir(),
            &engine.config.macro_extension,
            engine.config.autoescape,
            &|template| engine.rewrite(template),
        )?;
        engine.macros = macros;

        debug!(
            namespaces = engine.namespaces.len(),
            patterns = engine.patterns.len(),
            macros = engine.macros.len(),
            "engine ready"
        );
        Ok(engine)
    }

    /// Lower the macro libraries again after the passes or data changed
    fn relower_macros(&mut self) {
        let mut macros = std::mem::take(&mut self.macros);
        macros.relower(self.config.autoescape, &|template| self.rewrite(template));
        self.macros = macros;
    }

    /// Replace the auxiliary data store
    pub fn with_data_store(mut self, store: impl PatternDataStore + 'static) -> Self {
        self.data = Arc::new(store);
        self.clear_cache();
        self.relower_macros();
        self
    }

    /// Register an additional rewrite pass
    pub fn add_pass(&mut self, pass: impl NodePass + 'static) {
        self.passes.push(Box::new(pass));
        self.clear_cache();
        self.relower_macros();
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn namespaces(&self) -> &NamespaceRegistry {
        &self.namespaces
    }

    pub fn patterns(&self) -> &PatternIndex {
        &self.patterns
    }

    pub fn resolver(&self) -> &ResolverChain {
        &self.resolver
    }

    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut ExtensionRegistry {
        &mut self.extensions
    }

    pub fn macros(&self) -> &MacroLibraries {
        &self.macros
    }

    pub fn clear_cache(&self) {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Resolve, parse, rewrite and lower `name`
    pub fn compile(&self, name: &str) -> Result<Arc<Program>, EngineError> {
        let source = self.resolver.load(name)?;
        self.compile_source(source)
    }

    /// Run every pass over `template`, lowest priority first
    pub fn rewrite(&self, template: Template) -> Template {
        let binding = DataBinding::new(Arc::clone(&self.data));
        let mut passes: Vec<&dyn NodePass> = self.passes.iter().map(|p| p.as_ref()).collect();
        passes.push(&binding);
        passes.sort_by_key(|pass| pass.priority());
        passes
            .into_iter()
            .fold(template, |template, pass| apply(pass, template))
    }

    fn compile_source(&self, source: Source) -> Result<Arc<Program>, EngineError> {
        let key = (source.cache_key.clone(), source.name.clone());
        if self.config.cache {
            let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = cache.get(&key) {
                if cached.text == source.text {
                    return Ok(Arc::clone(&cached.program));
                }
            }
        }

        let template = parse(&source.text).map_err(|errors| EngineError::Parse {
            template: source.name.clone(),
            errors,
        })?;
        let program = Arc::new(compile(
            &source.name,
            self.rewrite(template),
            self.config.autoescape,
        ));
        debug!(template = %source.name, key = %source.cache_key, "compiled template");

        if self.config.cache {
            self.cache.lock().unwrap_or_else(PoisonError::into_inner).insert(
                key,
                CachedProgram {
                    text: source.text,
                    program: Arc::clone(&program),
                },
            );
        }
        Ok(program)
    }

    /// Render the template `name` resolves to
    pub fn render(&self, name: &str, context: Map<String, Value>) -> Result<String, EngineError> {
        let program = self.compile(name)?;
        self.render_program(&program, context)
    }

    /// Compile `text` itself as a template
    pub fn compile_string(&self, text: &str) -> Result<Arc<Program>, EngineError> {
        self.compile_source(Source {
            name: text.to_string(),
            text: text.to_string(),
            cache_key: format!("inline:{}", text),
            path: None,
        })
    }

    /// Render `text` itself as a template
    pub fn render_string(
        &self,
        text: &str,
        context: Map<String, Value>,
    ) -> Result<String, EngineError> {
        let program = self.compile_string(text)?;
        self.render_program(&program, context)
    }

    fn render_program(
        &self,
        program: &Program,
        context: Map<String, Value>,
    ) -> Result<String, EngineError> {
        render::render(self, program, context).map_err(|source| EngineError::Render {
            template: program.name.clone(),
            source,
        })
    }
}

impl Environment for Engine {
    fn exists(&self, name: &str) -> bool {
        self.resolver.exists(name)
    }

    fn program(&self, name: &str) -> Result<Arc<Program>, EngineError> {
        self.compile(name)
    }

    fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    fn macro_library(&self, name: &str) -> Option<Arc<Program>> {
        self.macros.get(name)
    }

    fn globals(&self) -> &Map<String, Value> {
        &self.config.globals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemoryDataStore;
    use crate::parser::ast::Node;
    use serde_json::json;
    use std::fs;

    fn context(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn fixture() -> (tempfile::TempDir, Engine) {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("source");
        let atoms = source.join("_patterns/00-atoms");
        fs::create_dir_all(&atoms).unwrap();
        fs::write(atoms.join("00-button.twig"), "<button>{{ label }}</button>").unwrap();
        fs::write(atoms.join("00-button.json"), r#"{"label": "Go"}"#).unwrap();
        let engine = Engine::new(EngineConfig::new().with_source_dir(&source)).unwrap();
        (root, engine)
    }

    #[test]
    fn test_engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }

    #[test]
    fn test_chain_order() {
        let (_root, engine) = fixture();
        assert_eq!(engine.resolver().kinds(), vec!["pattern", "filesystem", "inline"]);
    }

    #[test]
    fn test_compile_is_cached_until_source_changes() {
        let (root, engine) = fixture();
        let first = engine.compile("atoms-button").unwrap();
        let second = engine.compile("atoms-button").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        fs::write(
            root.path().join("source/_patterns/00-atoms/00-button.twig"),
            "<a>{{ label }}</a>",
        )
        .unwrap();
        let third = engine.compile("atoms-button").unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(
            engine.render("atoms-button", Map::new()).unwrap(),
            "<a></a>"
        );
    }

    #[test]
    fn test_cached_program_keeps_requested_name() {
        let (_root, engine) = fixture();
        let shorthand = engine.compile("atoms-button").unwrap();
        let reference = engine.compile("@atoms/00-button.twig").unwrap();
        assert_eq!(shorthand.name, "atoms-button");
        assert_eq!(reference.name, "@atoms/00-button.twig");
        assert!(Arc::ptr_eq(&reference, &engine.compile("@atoms/00-button.twig").unwrap()));
    }

    #[test]
    fn test_render_string_binds_data() {
        let (_root, engine) = fixture();
        let output = engine
            .render_string(r#"{% include "atoms-button" %}"#, context(json!({"label": "ctx"})))
            .unwrap();
        assert_eq!(output, "<button>Go</button>");
    }

    #[test]
    fn test_replacing_the_data_store() {
        let (_root, engine) = fixture();
        let mut store = MemoryDataStore::new();
        store.insert("atoms-button", context(json!({"label": "Other"})));
        let engine = engine.with_data_store(store);
        assert_eq!(
            engine.render_string(r#"{% include "atoms-button" %}"#, Map::new()).unwrap(),
            "<button>Other</button>"
        );
    }

    #[test]
    fn test_missing_pattern_root_is_empty_registry() {
        let root = tempfile::tempdir().unwrap();
        let config = EngineConfig::new().with_source_dir(root.path().join("nope"));
        let engine = Engine::new(config).unwrap();
        assert!(engine.namespaces().is_empty());
        assert_eq!(engine.render_string("hi {{ x }}", context(json!({"x": 1}))).unwrap(), "hi 1");
    }

    #[test]
    fn test_host_passes_run_by_priority() {
        struct Shout;
        impl NodePass for Shout {
            fn priority(&self) -> i32 {
                -1
            }
            fn leave(&self, node: Node) -> Node {
                match node {
                    Node::Text(text) => Node::Text(text.to_uppercase()),
                    other => other,
                }
            }
        }

        let (_root, mut engine) = fixture();
        engine.add_pass(Shout);
        assert_eq!(
            engine.render_string("hi {% include 'atoms-button' %}", Map::new()).unwrap(),
            "HI <BUTTON>Go</BUTTON>"
        );
    }

    #[test]
    fn test_not_found_carries_name() {
        let (_root, engine) = fixture();
        let err = engine.render("atoms-missing", Map::new()).unwrap_err();
        assert_eq!(err.to_string(), "template not found: atoms-missing");
    }
}
