//! Abstract Syntax Tree types for pattern templates

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

/// Auxiliary data frozen into a data-bound inclusion
pub type BoundData = Arc<Map<String, Value>>;

/// AST node with source location
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }

    /// Transform the wrapped node, keeping the span
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            node: f(self.node),
            span: self.span,
        }
    }
}

/// Root AST node - a parsed template
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub nodes: Vec<Spanned<Node>>,
}

/// A template statement
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Raw text copied to the output
    Text(String),
    /// Output tag: `{{ expr }}`
    Print(Spanned<Expr>),
    /// `{% include %}` or `{% embed %}`, plain or data-bound
    Inclusion(Inclusion),
    /// `{% block name %}...{% endblock %}`
    Block(BlockDecl),
    /// `{% if %}...{% elseif %}...{% else %}...{% endif %}`
    If {
        branches: Vec<(Spanned<Expr>, Vec<Spanned<Node>>)>,
        otherwise: Vec<Spanned<Node>>,
    },
    /// `{% for [key,] value in iterable %}...{% else %}...{% endfor %}`
    For {
        key: Option<String>,
        value: String,
        iterable: Spanned<Expr>,
        body: Vec<Spanned<Node>>,
        otherwise: Vec<Spanned<Node>>,
    },
    /// `{% set name = value %}`
    Set { name: String, value: Spanned<Expr> },
    /// `{% macro name(params) %}...{% endmacro %}`
    Macro(MacroDecl),
    /// Extension body tag: `{% name %}...{% endname %}`
    Tag {
        name: String,
        body: Vec<Spanned<Node>>,
    },
}

/// Named block, either a definition in a template or an override inside an embed
#[derive(Debug, Clone, PartialEq)]
pub struct BlockDecl {
    pub name: String,
    pub body: Vec<Spanned<Node>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MacroDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Spanned<Node>>,
}

/// Whether an inclusion is a plain include or an embed with block overrides
#[derive(Debug, Clone, PartialEq)]
pub enum InclusionKind {
    Include,
    Embed { blocks: Vec<Spanned<BlockDecl>> },
}

/// An include or embed instruction
///
/// Plain and data-bound variants share this one type: a node is data-bound
/// exactly when `data` is present.
#[derive(Debug, Clone, PartialEq)]
pub struct Inclusion {
    pub kind: InclusionKind,
    /// Template reference expression
    pub target: Spanned<Expr>,
    /// Explicit variables from `with <expr>`
    pub variables: Option<Spanned<Expr>>,
    /// Isolation flag from `only`
    pub only: bool,
    /// `ignore missing`
    pub ignore_missing: bool,
    /// Compile-time snapshot of auxiliary data
    pub data: Option<BoundData>,
}

impl Inclusion {
    pub fn include(target: Spanned<Expr>) -> Self {
        Self {
            kind: InclusionKind::Include,
            target,
            variables: None,
            only: false,
            ignore_missing: false,
            data: None,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.data.is_some()
    }

    pub fn is_embed(&self) -> bool {
        matches!(self.kind, InclusionKind::Embed { .. })
    }

    /// The target reference when it is known at compile time
    pub fn literal_target(&self) -> Option<&str> {
        match &self.target.node {
            Expr::Literal(Value::String(name)) => Some(name),
            _ => None,
        }
    }

    /// Rebuild this node as its data-bound variant
    pub fn bind(self, data: BoundData) -> Self {
        Self {
            data: Some(data),
            ..self
        }
    }
}

/// Binary operators, loosest binding first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
    Concat,
    Add,
    Sub,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::Greater => ">",
            BinaryOp::LessOrEqual => "<=",
            BinaryOp::GreaterOrEqual => ">=",
            BinaryOp::Concat => "~",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
        }
    }
}

/// Template expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant known at compile time
    Literal(Value),
    /// Context variable lookup
    Var(String),
    Array(Vec<Spanned<Expr>>),
    Map(Vec<(String, Spanned<Expr>)>),
    /// `object.name`
    Attr {
        object: Box<Spanned<Expr>>,
        name: String,
    },
    /// `object[index]`
    Index {
        object: Box<Spanned<Expr>>,
        index: Box<Spanned<Expr>>,
    },
    /// Function call: `name(args)`
    Call {
        name: String,
        args: Vec<Spanned<Expr>>,
    },
    /// Method call on a library value: `library.name(args)`
    MethodCall {
        object: Box<Spanned<Expr>>,
        name: String,
        args: Vec<Spanned<Expr>>,
    },
    /// `value|name(args)`
    Filter {
        value: Box<Spanned<Expr>>,
        name: String,
        args: Vec<Spanned<Expr>>,
    },
    /// `value is [not] name(args)`
    Test {
        value: Box<Spanned<Expr>>,
        name: String,
        args: Vec<Spanned<Expr>>,
        negated: bool,
    },
    Not(Box<Spanned<Expr>>),
    Neg(Box<Spanned<Expr>>),
    Binary {
        op: BinaryOp,
        left: Box<Spanned<Expr>>,
        right: Box<Spanned<Expr>>,
    },
}

/// Source form of an expression, used when emitting compiled programs
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(value) => write!(f, "{}", value),
            Expr::Var(name) => write!(f, "{}", name),
            Expr::Array(items) => {
                write!(f, "[")?;
                write_list(f, items)?;
                write!(f, "]")
            }
            Expr::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value.node)?;
                }
                write!(f, "}}")
            }
            Expr::Attr { object, name } => write!(f, "{}.{}", object.node, name),
            Expr::Index { object, index } => write!(f, "{}[{}]", object.node, index.node),
            Expr::Call { name, args } => {
                write!(f, "{}(", name)?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Expr::MethodCall { object, name, args } => {
                write!(f, "{}.{}(", object.node, name)?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Expr::Filter { value, name, args } => {
                write!(f, "{}|{}", value.node, name)?;
                if !args.is_empty() {
                    write!(f, "(")?;
                    write_list(f, args)?;
                    write!(f, ")")?;
                }
                Ok(())
            }
            Expr::Test {
                value,
                name,
                args,
                negated,
            } => {
                let not = if *negated { "not " } else { "" };
                write!(f, "{} is {}{}", value.node, not, name)?;
                if !args.is_empty() {
                    write!(f, "(")?;
                    write_list(f, args)?;
                    write!(f, ")")?;
                }
                Ok(())
            }
            Expr::Not(inner) => write!(f, "not {}", inner.node),
            Expr::Neg(inner) => write!(f, "-{}", inner.node),
            Expr::Binary { op, left, right } => {
                write!(f, "({} {} {})", left.node, op.symbol(), right.node)
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Spanned<Expr>]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item.node)?;
    }
    Ok(())
}
