//! Filters, functions, tests and body tags available to templates
//!
//! The registry starts with the core callables. Optional callables are
//! enabled by dropping a file named `<name>.<extension>` into the matching
//! components directory; the name is looked up in a static factory table,
//! the file's contents are never executed.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::render::{display, escape_html, is_truthy};

pub type FilterFn = Arc<dyn Fn(&Value, &[Value]) -> Result<Value, String> + Send + Sync>;
pub type FunctionFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;
pub type TestFn = Arc<dyn Fn(&Value, &[Value]) -> bool + Send + Sync>;
/// Receives the rendered body of `{% name %}...{% endname %}`
pub type TagFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExtensionKind {
    Filter,
    Function,
    Tag,
    Test,
}

impl ExtensionKind {
    pub const ALL: [ExtensionKind; 4] = [
        ExtensionKind::Filter,
        ExtensionKind::Function,
        ExtensionKind::Tag,
        ExtensionKind::Test,
    ];

    /// Components subdirectory holding this kind
    pub fn directory(&self) -> &'static str {
        match self {
            ExtensionKind::Filter => "filters",
            ExtensionKind::Function => "functions",
            ExtensionKind::Tag => "tags",
            ExtensionKind::Test => "tests",
        }
    }

    /// File extension marking a file of this kind, e.g. `slugify.filter`
    pub fn file_extension(&self) -> &'static str {
        match self {
            ExtensionKind::Filter => "filter",
            ExtensionKind::Function => "function",
            ExtensionKind::Tag => "tag",
            ExtensionKind::Test => "test",
        }
    }
}

impl fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExtensionKind::Filter => "filter",
            ExtensionKind::Function => "function",
            ExtensionKind::Tag => "tag",
            ExtensionKind::Test => "test",
        };
        write!(f, "{}", label)
    }
}

/// A callable registered from a components directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredSymbol {
    pub kind: ExtensionKind,
    pub name: String,
    pub path: PathBuf,
}

enum Callable {
    Filter(FilterFn),
    Function(FunctionFn),
    Test(TestFn),
    Tag(TagFn),
}

#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    filters: BTreeMap<String, FilterFn>,
    functions: BTreeMap<String, FunctionFn>,
    tests: BTreeMap<String, TestFn>,
    tags: BTreeMap<String, TagFn>,
    loaded: Vec<RegisteredSymbol>,
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .field("tests", &self.tests.keys().collect::<Vec<_>>())
            .field("tags", &self.tags.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ExtensionRegistry {
    /// Registry holding the core callables
    pub fn new() -> Self {
        let mut registry = Self::default();
        registry.add_core();
        registry
    }

    pub fn add_filter(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&Value, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) {
        self.filters.insert(name.into(), Arc::new(f));
    }

    pub fn add_function(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) {
        self.functions.insert(name.into(), Arc::new(f));
    }

    pub fn add_test(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&Value, &[Value]) -> bool + Send + Sync + 'static,
    ) {
        self.tests.insert(name.into(), Arc::new(f));
    }

    pub fn add_tag(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&str) -> String + Send + Sync + 'static,
    ) {
        self.tags.insert(name.into(), Arc::new(f));
    }

    pub fn filter(&self, name: &str) -> Option<&FilterFn> {
        self.filters.get(name)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionFn> {
        self.functions.get(name)
    }

    pub fn test(&self, name: &str) -> Option<&TestFn> {
        self.tests.get(name)
    }

    pub fn tag(&self, name: &str) -> Option<&TagFn> {
        self.tags.get(name)
    }

    /// Symbols registered through [`ExtensionRegistry::load_all`]
    pub fn loaded(&self) -> &[RegisteredSymbol] {
        &self.loaded
    }

    /// Register every convention-named file of `kind` found in `dir`
    ///
    /// Files are matched by `<name>.<extension>`, names starting with `_` are
    /// skipped and registration follows file name order.
    pub fn load_all(
        &mut self,
        kind: ExtensionKind,
        dir: &Path,
        extension: &str,
    ) -> Vec<RegisteredSymbol> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    kind = %kind,
                    path = %dir.display(),
                    error = %e,
                    "extension directory unavailable, skipping"
                );
                return Vec::new();
            }
        };

        let suffix = format!(".{}", extension);
        let mut files: Vec<(String, PathBuf)> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| {
                let file_name = entry.file_name().to_str()?.to_string();
                Some((file_name, entry.path()))
            })
            .filter(|(file_name, _)| file_name.ends_with(&suffix) && !file_name.starts_with('_'))
            .collect();
        files.sort();

        let mut registered = Vec::new();
        for (file_name, path) in files {
            let name = &file_name[..file_name.len() - suffix.len()];
            let Some(callable) = factory(kind, name) else {
                warn!(kind = %kind, name, path = %path.display(), "no such extension, skipping");
                continue;
            };
            match callable {
                Callable::Filter(f) => {
                    self.filters.insert(name.to_string(), f);
                }
                Callable::Function(f) => {
                    self.functions.insert(name.to_string(), f);
                }
                Callable::Test(f) => {
                    self.tests.insert(name.to_string(), f);
                }
                Callable::Tag(f) => {
                    self.tags.insert(name.to_string(), f);
                }
            }
            debug!(kind = %kind, name, "registered extension");
            registered.push(RegisteredSymbol {
                kind,
                name: name.to_string(),
                path,
            });
        }
        self.loaded.extend(registered.iter().cloned());
        registered
    }

    fn add_core(&mut self) {
        self.add_filter("upper", |v, _| Ok(Value::String(display(v).to_uppercase())));
        self.add_filter("lower", |v, _| Ok(Value::String(display(v).to_lowercase())));
        self.add_filter("capitalize", |v, _| Ok(Value::String(capitalize(&display(v)))));
        self.add_filter("trim", |v, _| Ok(Value::String(display(v).trim().to_string())));
        self.add_filter("length", |v, _| Ok(Value::from(length(v))));
        self.add_filter("join", |v, args| {
            let separator = args.first().map(display).unwrap_or_default();
            match v {
                Value::Array(items) => Ok(Value::String(
                    items.iter().map(display).collect::<Vec<_>>().join(&separator),
                )),
                Value::Object(map) => Ok(Value::String(
                    map.values().map(display).collect::<Vec<_>>().join(&separator),
                )),
                other => Ok(Value::String(display(other))),
            }
        });
        self.add_filter("default", |v, args| {
            if is_empty(v) {
                Ok(args.first().cloned().unwrap_or_else(|| Value::String(String::new())))
            } else {
                Ok(v.clone())
            }
        });
        self.add_filter("escape", |v, _| Ok(Value::String(escape_html(&display(v)))));
        self.add_filter("e", |v, _| Ok(Value::String(escape_html(&display(v)))));
        self.add_filter("raw", |v, _| Ok(v.clone()));
        self.add_filter("json_encode", |v, _| {
            serde_json::to_string(v).map(Value::String).map_err(|e| e.to_string())
        });
        self.add_filter("keys", |v, _| match v {
            Value::Object(map) => Ok(Value::Array(
                map.keys().cloned().map(Value::String).collect(),
            )),
            Value::Array(items) => Ok(Value::Array((0..items.len()).map(Value::from).collect())),
            _ => Ok(Value::Array(Vec::new())),
        });
        self.add_filter("first", |v, _| {
            Ok(match v {
                Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
                Value::Object(map) => map.values().next().cloned().unwrap_or(Value::Null),
                Value::String(s) => s
                    .chars()
                    .next()
                    .map(|c| Value::String(c.to_string()))
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            })
        });
        self.add_filter("last", |v, _| {
            Ok(match v {
                Value::Array(items) => items.last().cloned().unwrap_or(Value::Null),
                Value::Object(map) => map.values().last().cloned().unwrap_or(Value::Null),
                Value::String(s) => s
                    .chars()
                    .last()
                    .map(|c| Value::String(c.to_string()))
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            })
        });
        self.add_filter("reverse", |v, _| {
            Ok(match v {
                Value::Array(items) => Value::Array(items.iter().rev().cloned().collect()),
                Value::String(s) => Value::String(s.chars().rev().collect()),
                other => other.clone(),
            })
        });

        self.add_function("range", range);
        self.add_function("min", |args| extreme(args, std::cmp::Ordering::Less));
        self.add_function("max", |args| extreme(args, std::cmp::Ordering::Greater));

        self.add_test("defined", |v, _| !v.is_null());
        self.add_test("empty", |v, _| is_empty(v));
        self.add_test("null", |v, _| v.is_null());
        self.add_test("even", |v, _| v.as_i64().is_some_and(|n| n % 2 == 0));
        self.add_test("odd", |v, _| v.as_i64().is_some_and(|n| n % 2 != 0));
        self.add_test("iterable", |v, _| matches!(v, Value::Array(_) | Value::Object(_)));
    }
}

/// Optional callables that a components directory can switch on
fn factory(kind: ExtensionKind, name: &str) -> Option<Callable> {
    let callable = match (kind, name) {
        (ExtensionKind::Filter, "slugify") => Callable::Filter(Arc::new(slugify_filter)),
        (ExtensionKind::Filter, "wordcount") => Callable::Filter(Arc::new(wordcount_filter)),
        (ExtensionKind::Function, "pl_example") => Callable::Function(Arc::new(pl_example)),
        (ExtensionKind::Test, "url") => Callable::Test(Arc::new(url_test)),
        (ExtensionKind::Tag, "spaceless") => Callable::Tag(Arc::new(spaceless)),
        (ExtensionKind::Tag, "strip") => Callable::Tag(Arc::new(strip_tag)),
        _ => return None,
    };
    Some(callable)
}

fn slugify_filter(v: &Value, _: &[Value]) -> Result<Value, String> {
    Ok(Value::String(slugify(&display(v))))
}

fn wordcount_filter(v: &Value, _: &[Value]) -> Result<Value, String> {
    Ok(Value::from(display(v).split_whitespace().count()))
}

fn pl_example(args: &[Value]) -> Result<Value, String> {
    let arg = args.first().map(display).unwrap_or_default();
    Ok(Value::String(format!(
        "Thanks for testing out the Pattern Lab example extension with this arg: {}",
        arg
    )))
}

fn url_test(v: &Value, _: &[Value]) -> bool {
    v.as_str().is_some_and(|s| {
        s.starts_with("http://") || s.starts_with("https://") || s.starts_with("//")
    })
}

fn strip_tag(body: &str) -> String {
    body.trim().to_string()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn length(v: &Value) -> usize {
    match v {
        Value::Null => 0,
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        other => display(other).chars().count(),
    }
}

fn is_empty(v: &Value) -> bool {
    match v {
        Value::Number(_) | Value::Bool(true) => false,
        other => !is_truthy(other),
    }
}

fn range(args: &[Value]) -> Result<Value, String> {
    let int = |i: usize, default: i64| -> Result<i64, String> {
        match args.get(i) {
            None => Ok(default),
            Some(v) => v
                .as_i64()
                .ok_or_else(|| format!("argument {} must be an integer", i + 1)),
        }
    };
    let start = int(0, 0)?;
    let end = int(1, start)?;
    let step = int(2, 1)?.unsigned_abs() as i64;
    if step == 0 {
        return Err("step must not be zero".to_string());
    }
    let values: Vec<Value> = if start <= end {
        (start..=end).step_by(step as usize).map(Value::from).collect()
    } else {
        (end..=start).rev().step_by(step as usize).map(Value::from).collect()
    };
    Ok(Value::Array(values))
}

/// Smallest or largest of the arguments, or of a single array argument
fn extreme(args: &[Value], wanted: std::cmp::Ordering) -> Result<Value, String> {
    let items: Vec<Value> = match args {
        [Value::Array(items)] => items.clone(),
        [Value::Object(map)] => map.values().cloned().collect(),
        _ => args.to_vec(),
    };
    let mut best: Option<Value> = None;
    for item in items {
        best = match best {
            None => Some(item),
            Some(current) => {
                let ordering = match (&item, &current) {
                    (Value::Number(a), Value::Number(b)) => a.as_f64().partial_cmp(&b.as_f64()),
                    (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                    _ => return Err("cannot compare values of different types".to_string()),
                };
                if ordering == Some(wanted) {
                    Some(item)
                } else {
                    Some(current)
                }
            }
        };
    }
    Ok(best.unwrap_or(Value::Null))
}

fn slugify(s: &str) -> String {
    let mut slug = String::new();
    for c in s.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

fn spaceless(body: &str) -> String {
    let mut out = String::new();
    let mut rest = body.trim();
    while let Some(pos) = rest.find('>') {
        out.push_str(&rest[..=pos]);
        let after = &rest[pos + 1..];
        let trimmed = after.trim_start();
        rest = if trimmed.starts_with('<') { trimmed } else { after };
    }
    out.push_str(rest);
    out
}
