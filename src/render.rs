//! Program evaluation against a JSON context

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::compiler::{Arguments, IncludeOp, MacroDef, Op, Operand, Program};
use crate::extension::{ExtensionKind, ExtensionRegistry};
use crate::parser::ast::{BinaryOp, Expr, Spanned};
use crate::EngineError;

/// Maximum include, embed and macro call nesting
pub const MAX_DEPTH: usize = 64;

/// Errors that can occur while rendering a program
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("variables passed to {target} from {template} must be a mapping, found {found}")]
    NotAMapping {
        template: String,
        target: String,
        found: &'static str,
    },

    #[error("invalid include target in {template}: expected a name or a list of names, found {found}")]
    InvalidTarget {
        template: String,
        found: &'static str,
    },

    #[error("cannot include {name}: {source}")]
    Include {
        name: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("nesting deeper than {limit} levels while rendering {template}")]
    RecursionLimit { template: String, limit: usize },

    #[error("unknown {kind} '{name}' in {template}")]
    Unknown {
        kind: ExtensionKind,
        name: String,
        template: String,
    },

    #[error("unknown macro '{library}.{name}' in {template}")]
    UnknownMacro {
        library: String,
        name: String,
        template: String,
    },

    #[error("{kind} '{name}' failed: {message}")]
    Callable {
        kind: ExtensionKind,
        name: String,
        message: String,
    },

    #[error("unsupported operands for '{op}': {left} and {right}")]
    Operands {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },
}

/// What a running program needs from its host
pub trait Environment {
    /// True when `name` resolves to a template
    fn exists(&self, name: &str) -> bool;

    /// Compiled program for `name`
    fn program(&self, name: &str) -> Result<Arc<Program>, EngineError>;

    fn extensions(&self) -> &ExtensionRegistry;

    /// Macro library registered under `name`
    fn macro_library(&self, name: &str) -> Option<Arc<Program>>;

    /// Variables visible to every rendered template
    fn globals(&self) -> &Map<String, Value>;
}

/// Render `program` with `arguments` layered over the environment's globals
pub fn render<E: Environment + ?Sized>(
    env: &E,
    program: &Program,
    arguments: Map<String, Value>,
) -> Result<String, RenderError> {
    Renderer { env, depth: 0 }.run(program, arguments, None)
}

/// Type label used in error messages
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "mapping",
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// String form of a value as printed into output
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => String::new(),
        Value::Number(n) => display_number(n),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn display_number(n: &Number) -> String {
    if n.is_f64() {
        if let Some(f) = n.as_f64() {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                return format!("{:.0}", f);
            }
        }
    }
    n.to_string()
}

/// Escape text for HTML output
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#039;")
}

/// Per-template render state
struct Frame<'a> {
    template: &'a str,
    scope: Map<String, Value>,
    /// Block overrides supplied by an embedding template
    overrides: Option<&'a BTreeMap<String, Vec<Op>>>,
}

impl<'a> Frame<'a> {
    /// Same template and overrides, different scope
    fn child(&self, scope: Map<String, Value>) -> Frame<'a> {
        Frame {
            template: self.template,
            scope,
            overrides: self.overrides,
        }
    }
}

struct Renderer<'e, E: ?Sized> {
    env: &'e E,
    depth: usize,
}

impl<E: Environment + ?Sized> Renderer<'_, E> {
    fn run(
        &mut self,
        program: &Program,
        arguments: Map<String, Value>,
        overrides: Option<&BTreeMap<String, Vec<Op>>>,
    ) -> Result<String, RenderError> {
        let mut scope = self.env.globals().clone();
        scope.extend(arguments);
        let mut frame = Frame {
            template: &program.name,
            scope,
            overrides,
        };
        let mut out = String::new();
        self.ops(&mut frame, &program.ops, &mut out)?;
        Ok(out)
    }

    fn ops(
        &mut self,
        frame: &mut Frame<'_>,
        ops: &[Op],
        out: &mut String,
    ) -> Result<(), RenderError> {
        for op in ops {
            self.op(frame, op, out)?;
        }
        Ok(())
    }

    fn op(&mut self, frame: &mut Frame<'_>, op: &Op, out: &mut String) -> Result<(), RenderError> {
        match op {
            Op::Text(text) => out.push_str(text),
            Op::Print { expr, escape } => {
                let text = display(&self.eval(frame, expr)?);
                if *escape {
                    out.push_str(&escape_html(&text));
                } else {
                    out.push_str(&text);
                }
            }
            Op::Include(include) => self.include(frame, include, None, out)?,
            Op::Embed { include, blocks } => self.include(frame, include, Some(blocks), out)?,
            Op::Block { name, body } => match frame.overrides.and_then(|o| o.get(name)) {
                Some(replacement) => self.ops(frame, replacement, out)?,
                None => self.ops(frame, body, out)?,
            },
            Op::If {
                branches,
                otherwise,
            } => {
                for (condition, body) in branches {
                    if is_truthy(&self.eval(frame, condition)?) {
                        return self.ops(frame, body, out);
                    }
                }
                self.ops(frame, otherwise, out)?;
            }
            Op::For {
                key,
                value,
                iterable,
                body,
                otherwise,
            } => {
                let items: Vec<(Value, Value)> = match self.eval(frame, iterable)? {
                    Value::Array(items) => items
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| (Value::from(i), v))
                        .collect(),
                    Value::Object(map) => map
                        .into_iter()
                        .map(|(k, v)| (Value::String(k), v))
                        .collect(),
                    _ => Vec::new(),
                };
                if items.is_empty() {
                    return self.ops(frame, otherwise, out);
                }
                let length = items.len();
                for (i, (k, v)) in items.into_iter().enumerate() {
                    let mut scope = frame.scope.clone();
                    if let Some(key) = key {
                        scope.insert(key.clone(), k);
                    }
                    scope.insert(value.clone(), v);
                    scope.insert("loop".to_string(), loop_variable(i, length));
                    let mut inner = frame.child(scope);
                    self.ops(&mut inner, body, out)?;
                }
            }
            Op::Set { name, value } => {
                let value = self.eval(frame, value)?;
                frame.scope.insert(name.clone(), value);
            }
            Op::Tag { name, body } => {
                let mut inner = String::new();
                self.ops(frame, body, &mut inner)?;
                let tag = self.env.extensions().tag(name).ok_or_else(|| RenderError::Unknown {
                    kind: ExtensionKind::Tag,
                    name: name.clone(),
                    template: frame.template.to_string(),
                })?;
                out.push_str(&tag(&inner));
            }
        }
        Ok(())
    }

    fn include(
        &mut self,
        frame: &mut Frame<'_>,
        include: &IncludeOp,
        blocks: Option<&BTreeMap<String, Vec<Op>>>,
        out: &mut String,
    ) -> Result<(), RenderError> {
        let names = match self.eval(frame, &include.target)? {
            Value::String(name) => vec![name],
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(name) => Ok(name),
                    other => Err(RenderError::InvalidTarget {
                        template: frame.template.to_string(),
                        found: type_name(&other),
                    }),
                })
                .collect::<Result<Vec<_>, _>>()?,
            other => {
                return Err(RenderError::InvalidTarget {
                    template: frame.template.to_string(),
                    found: type_name(&other),
                })
            }
        };

        let name = match names.iter().find(|name| self.env.exists(name)) {
            Some(name) => name.clone(),
            None if include.ignore_missing => return Ok(()),
            None => match names.into_iter().next() {
                Some(name) => name,
                None => {
                    return Err(RenderError::InvalidTarget {
                        template: frame.template.to_string(),
                        found: "empty array",
                    })
                }
            },
        };

        let arguments = self.arguments(frame, &include.arguments, &name)?;
        let program = self.env.program(&name).map_err(|e| RenderError::Include {
            name: name.clone(),
            source: Box::new(e),
        })?;
        let rendered = self.nested(&program.name, |renderer| {
            renderer.run(&program, arguments, blocks)
        })?;
        out.push_str(&rendered);
        Ok(())
    }

    fn nested<T>(
        &mut self,
        template: &str,
        f: impl FnOnce(&mut Self) -> Result<T, RenderError>,
    ) -> Result<T, RenderError> {
        if self.depth >= MAX_DEPTH {
            return Err(RenderError::RecursionLimit {
                template: template.to_string(),
                limit: MAX_DEPTH,
            });
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn arguments(
        &mut self,
        frame: &Frame<'_>,
        arguments: &Arguments,
        target: &str,
    ) -> Result<Map<String, Value>, RenderError> {
        match arguments {
            Arguments::Context => Ok(frame.scope.clone()),
            Arguments::Empty => Ok(Map::new()),
            Arguments::Variables(expr) => self.mapping(frame, expr, target),
            Arguments::Merge(operands) => {
                let mut merged = Map::new();
                for operand in operands {
                    match operand {
                        Operand::Context => merged.extend(frame.scope.clone()),
                        Operand::Data(data) => merged.extend(data.as_ref().clone()),
                        Operand::Variables(expr) => {
                            merged.extend(self.mapping(frame, expr, target)?)
                        }
                    }
                }
                Ok(merged)
            }
        }
    }

    fn mapping(
        &mut self,
        frame: &Frame<'_>,
        expr: &Expr,
        target: &str,
    ) -> Result<Map<String, Value>, RenderError> {
        match self.eval(frame, expr)? {
            Value::Object(map) => Ok(map),
            other => Err(RenderError::NotAMapping {
                template: frame.template.to_string(),
                target: target.to_string(),
                found: type_name(&other),
            }),
        }
    }

    fn eval_all(
        &mut self,
        frame: &Frame<'_>,
        args: &[Spanned<Expr>],
    ) -> Result<Vec<Value>, RenderError> {
        args.iter().map(|arg| self.eval(frame, &arg.node)).collect()
    }

    /// Lenient lookup; `None` means the path is undefined
    fn lookup(&mut self, frame: &Frame<'_>, expr: &Expr) -> Result<Option<Value>, RenderError> {
        match expr {
            Expr::Var(name) => Ok(frame.scope.get(name).cloned()),
            Expr::Attr { object, name } => Ok(self
                .lookup(frame, &object.node)?
                .and_then(|object| attribute(&object, &Value::String(name.clone())))),
            Expr::Index { object, index } => {
                let index = self.eval(frame, &index.node)?;
                Ok(self
                    .lookup(frame, &object.node)?
                    .and_then(|object| attribute(&object, &index)))
            }
            other => self.eval(frame, other).map(Some),
        }
    }

    fn eval(&mut self, frame: &Frame<'_>, expr: &Expr) -> Result<Value, RenderError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(_) | Expr::Attr { .. } | Expr::Index { .. } => {
                Ok(self.lookup(frame, expr)?.unwrap_or(Value::Null))
            }
            Expr::Array(items) => Ok(Value::Array(self.eval_all(frame, items)?)),
            Expr::Map(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    map.insert(key.clone(), self.eval(frame, &value.node)?);
                }
                Ok(Value::Object(map))
            }
            Expr::Call { name, args } => {
                let args = self.eval_all(frame, args)?;
                let function = self.env.extensions().function(name).ok_or_else(|| {
                    RenderError::Unknown {
                        kind: ExtensionKind::Function,
                        name: name.clone(),
                        template: frame.template.to_string(),
                    }
                })?;
                function(&args).map_err(|message| RenderError::Callable {
                    kind: ExtensionKind::Function,
                    name: name.clone(),
                    message,
                })
            }
            Expr::MethodCall { object, name, args } => {
                self.call_macro(frame, &object.node, name, args)
            }
            Expr::Filter { value, name, args } => {
                let value = self.eval(frame, &value.node)?;
                let args = self.eval_all(frame, args)?;
                let filter = self.env.extensions().filter(name).ok_or_else(|| RenderError::Unknown {
                    kind: ExtensionKind::Filter,
                    name: name.clone(),
                    template: frame.template.to_string(),
                })?;
                filter(&value, &args).map_err(|message| RenderError::Callable {
                    kind: ExtensionKind::Filter,
                    name: name.clone(),
                    message,
                })
            }
            Expr::Test {
                value,
                name,
                args,
                negated,
            } => {
                let passed = if name == "defined" {
                    self.lookup(frame, &value.node)?.is_some()
                } else {
                    let value = self.eval(frame, &value.node)?;
                    let args = self.eval_all(frame, args)?;
                    let test = self.env.extensions().test(name).ok_or_else(|| RenderError::Unknown {
                        kind: ExtensionKind::Test,
                        name: name.clone(),
                        template: frame.template.to_string(),
                    })?;
                    test(&value, &args)
                };
                Ok(Value::Bool(passed != *negated))
            }
            Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&self.eval(frame, &inner.node)?))),
            Expr::Neg(inner) => match self.eval(frame, &inner.node)? {
                Value::Number(n) => Ok(match n.as_i64().and_then(i64::checked_neg) {
                    Some(i) => Value::from(i),
                    None => Number::from_f64(-n.as_f64().unwrap_or_default())
                        .map(Value::Number)
                        .unwrap_or(Value::Null),
                }),
                other => Err(RenderError::Operands {
                    op: "-",
                    left: "nothing",
                    right: type_name(&other),
                }),
            },
            Expr::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    let left = is_truthy(&self.eval(frame, &left.node)?);
                    Ok(Value::Bool(left && is_truthy(&self.eval(frame, &right.node)?)))
                }
                BinaryOp::Or => {
                    let left = is_truthy(&self.eval(frame, &left.node)?);
                    Ok(Value::Bool(left || is_truthy(&self.eval(frame, &right.node)?)))
                }
                _ => {
                    let left = self.eval(frame, &left.node)?;
                    let right = self.eval(frame, &right.node)?;
                    binary(*op, &left, &right)
                }
            },
        }
    }

    fn call_macro(
        &mut self,
        frame: &Frame<'_>,
        object: &Expr,
        name: &str,
        args: &[Spanned<Expr>],
    ) -> Result<Value, RenderError> {
        let unknown = || RenderError::UnknownMacro {
            library: object.to_string(),
            name: name.to_string(),
            template: frame.template.to_string(),
        };
        let Expr::Var(library) = object else {
            return Err(unknown());
        };
        let program = self.env.macro_library(library).ok_or_else(unknown)?;
        let def: &MacroDef = program.macros.get(name).ok_or_else(unknown)?;

        let mut values = self.eval_all(frame, args)?.into_iter();
        let mut scope = self.env.globals().clone();
        for param in &def.params {
            scope.insert(param.clone(), values.next().unwrap_or(Value::Null));
        }

        let label = format!("{}.{}", library, name);
        let output = self.nested(&label, |renderer| {
            let mut inner = Frame {
                template: &label,
                scope,
                overrides: None,
            };
            let mut out = String::new();
            renderer.ops(&mut inner, &def.body, &mut out)?;
            Ok(out)
        })?;
        Ok(Value::String(output))
    }
}

fn loop_variable(index0: usize, length: usize) -> Value {
    let mut map = Map::new();
    map.insert("index".to_string(), Value::from(index0 + 1));
    map.insert("index0".to_string(), Value::from(index0));
    map.insert("first".to_string(), Value::Bool(index0 == 0));
    map.insert("last".to_string(), Value::Bool(index0 + 1 == length));
    map.insert("length".to_string(), Value::from(length));
    Value::Object(map)
}

/// `object.key` or `object[key]`
fn attribute(object: &Value, key: &Value) -> Option<Value> {
    match (object, key) {
        (Value::Object(map), Value::String(k)) => map.get(k).cloned(),
        (Value::Object(map), Value::Number(n)) => map.get(&n.to_string()).cloned(),
        (Value::Array(items), Value::Number(n)) => {
            n.as_u64().and_then(|i| items.get(i as usize)).cloned()
        }
        (Value::Array(items), Value::String(k)) => {
            k.parse::<usize>().ok().and_then(|i| items.get(i)).cloned()
        }
        _ => None,
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, RenderError> {
    let unsupported = || RenderError::Operands {
        op: op.symbol(),
        left: type_name(left),
        right: type_name(right),
    };
    match op {
        BinaryOp::Equal => Ok(Value::Bool(loose_eq(left, right))),
        BinaryOp::NotEqual => Ok(Value::Bool(!loose_eq(left, right))),
        BinaryOp::Concat => Ok(Value::String(display(left) + &display(right))),
        BinaryOp::Less | BinaryOp::Greater | BinaryOp::LessOrEqual | BinaryOp::GreaterOrEqual => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => {
                    a.as_f64().partial_cmp(&b.as_f64()).ok_or_else(unsupported)?
                }
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ => return Err(unsupported()),
            };
            Ok(Value::Bool(match op {
                BinaryOp::Less => ordering.is_lt(),
                BinaryOp::Greater => ordering.is_gt(),
                BinaryOp::LessOrEqual => ordering.is_le(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::Add | BinaryOp::Sub => {
            let number = |v: &Value| match v {
                Value::Null => Some(Number::from(0)),
                Value::Number(n) => Some(n.clone()),
                _ => None,
            };
            let (Some(a), Some(b)) = (number(left), number(right)) else {
                return Err(unsupported());
            };
            let integer = match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) if op == BinaryOp::Add => x.checked_add(y),
                (Some(x), Some(y)) => x.checked_sub(y),
                _ => None,
            };
            if let Some(i) = integer {
                return Ok(Value::from(i));
            }
            let (x, y) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
            let result = if op == BinaryOp::Add { x + y } else { x - y };
            Ok(Number::from_f64(result).map(Value::Number).unwrap_or(Value::Null))
        }
        BinaryOp::And | BinaryOp::Or => Ok(Value::Bool(match op {
            BinaryOp::And => is_truthy(left) && is_truthy(right),
            _ => is_truthy(left) || is_truthy(right),
        })),
    }
}
