//! Lowering of parsed templates to executable programs
//!
//! Every inclusion is lowered with an [`Arguments`] value describing how the
//! included template's variables are built from the render context, the
//! explicit `with` expression and any compile-time bound data.

use std::collections::BTreeMap;
use std::fmt;

use crate::parser::ast::{BoundData, Expr, Inclusion, InclusionKind, Node, Spanned, Template};

/// Filters whose output is already safe for HTML
const SAFE_FILTERS: &[&str] = &["raw", "escape", "e"];

/// A compiled template
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub name: String,
    pub ops: Vec<Op>,
    /// `{% macro %}` definitions, by name
    pub macros: BTreeMap<String, MacroDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MacroDef {
    pub params: Vec<String>,
    pub body: Vec<Op>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Text(String),
    Print {
        expr: Expr,
        escape: bool,
    },
    Include(IncludeOp),
    Embed {
        include: IncludeOp,
        /// Overrides for the embedded template's blocks
        blocks: BTreeMap<String, Vec<Op>>,
    },
    Block {
        name: String,
        body: Vec<Op>,
    },
    If {
        branches: Vec<(Expr, Vec<Op>)>,
        otherwise: Vec<Op>,
    },
    For {
        key: Option<String>,
        value: String,
        iterable: Expr,
        body: Vec<Op>,
        otherwise: Vec<Op>,
    },
    Set {
        name: String,
        value: Expr,
    },
    Tag {
        name: String,
        body: Vec<Op>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncludeOp {
    pub target: Expr,
    pub arguments: Arguments,
    pub ignore_missing: bool,
}

/// One operand of a merge, listed in precedence order
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// The render context at the call site
    Context,
    /// Data bound at compile time
    Data(BoundData),
    /// The `with` expression
    Variables(Expr),
}

/// Variables passed to an included template
#[derive(Debug, Clone, PartialEq)]
pub enum Arguments {
    Context,
    Empty,
    Variables(Expr),
    /// Shallow union; a later operand wins on key collision
    Merge(Vec<Operand>),
}

/// Argument construction for an inclusion
///
/// | data | only  | with | arguments                     |
/// |------|-------|------|-------------------------------|
/// | -    | false | -    | `context`                     |
/// | -    | true  | -    | `{}`                          |
/// | -    | false | V    | `merge(context, V)`           |
/// | -    | true  | V    | `V`                           |
/// | D    | false | -    | `merge(context, D)`           |
/// | D    | false | V    | `merge(context, D, V)`        |
/// | D    | true  | -    | `{}`                          |
/// | D    | true  | V    | `V`                           |
///
/// An isolated inclusion discards its bound data, the same way it discards
/// the context.
pub fn template_arguments(inclusion: &Inclusion) -> Arguments {
    let variables = inclusion.variables.as_ref().map(|v| v.node.clone());
    match (&inclusion.data, inclusion.only, variables) {
        (None, false, None) => Arguments::Context,
        (None, true, None) => Arguments::Empty,
        (None, false, Some(v)) => {
            Arguments::Merge(vec![Operand::Context, Operand::Variables(v)])
        }
        (None, true, Some(v)) => Arguments::Variables(v),
        (Some(data), false, None) => {
            Arguments::Merge(vec![Operand::Context, Operand::Data(data.clone())])
        }
        (Some(data), false, Some(v)) => Arguments::Merge(vec![
            Operand::Context,
            Operand::Data(data.clone()),
            Operand::Variables(v),
        ]),
        (Some(_), true, None) => Arguments::Empty,
        (Some(_), true, Some(v)) => Arguments::Variables(v),
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Context => write!(f, "context"),
            Operand::Data(data) => {
                let repr = serde_json::to_string(data.as_ref()).map_err(|_| fmt::Error)?;
                write!(f, "{}", repr)
            }
            Operand::Variables(expr) => write!(f, "{}", expr),
        }
    }
}

impl fmt::Display for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arguments::Context => write!(f, "context"),
            Arguments::Empty => write!(f, "{{}}"),
            Arguments::Variables(expr) => write!(f, "{}", expr),
            Arguments::Merge(operands) => {
                write!(f, "merge(")?;
                for (i, operand) in operands.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", operand)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// True when printing `expr` must not escape its output
fn is_safe(expr: &Expr) -> bool {
    match expr {
        Expr::Filter { name, .. } => SAFE_FILTERS.contains(&name.as_str()),
        Expr::MethodCall { .. } => true,
        _ => false,
    }
}

struct Lowering {
    autoescape: bool,
    macros: BTreeMap<String, MacroDef>,
}

impl Lowering {
    fn nodes(&mut self, nodes: Vec<Spanned<Node>>) -> Vec<Op> {
        nodes
            .into_iter()
            .filter_map(|spanned| self.node(spanned.node))
            .collect()
    }

    fn node(&mut self, node: Node) -> Option<Op> {
        let op = match node {
            Node::Text(text) => Op::Text(text),
            Node::Print(expr) => Op::Print {
                escape: self.autoescape && !is_safe(&expr.node),
                expr: expr.node,
            },
            Node::Inclusion(inclusion) => {
                let include = IncludeOp {
                    target: inclusion.target.node.clone(),
                    arguments: template_arguments(&inclusion),
                    ignore_missing: inclusion.ignore_missing,
                };
                match inclusion.kind {
                    InclusionKind::Include => Op::Include(include),
                    InclusionKind::Embed { blocks } => Op::Embed {
                        include,
                        blocks: blocks
                            .into_iter()
                            .map(|block| (block.node.name, self.nodes(block.node.body)))
                            .collect(),
                    },
                }
            }
            Node::Block(decl) => Op::Block {
                name: decl.name,
                body: self.nodes(decl.body),
            },
            Node::If {
                branches,
                otherwise,
            } => Op::If {
                branches: branches
                    .into_iter()
                    .map(|(condition, body)| (condition.node, self.nodes(body)))
                    .collect(),
                otherwise: self.nodes(otherwise),
            },
            Node::For {
                key,
                value,
                iterable,
                body,
                otherwise,
            } => Op::For {
                key,
                value,
                iterable: iterable.node,
                body: self.nodes(body),
                otherwise: self.nodes(otherwise),
            },
            Node::Set { name, value } => Op::Set {
                name,
                value: value.node,
            },
            Node::Macro(decl) => {
                let body = self.nodes(decl.body);
                self.macros.insert(
                    decl.name,
                    MacroDef {
                        params: decl.params,
                        body,
                    },
                );
                return None;
            }
            Node::Tag { name, body } => Op::Tag {
                name,
                body: self.nodes(body),
            },
        };
        Some(op)
    }
}

/// Lower a (rewritten) template to a program
pub fn compile(name: &str, template: Template, autoescape: bool) -> Program {
    let mut lowering = Lowering {
        autoescape,
        macros: BTreeMap::new(),
    };
    let ops = lowering.nodes(template.nodes);
    Program {
        name: name.to_string(),
        ops,
        macros: lowering.macros,
    }
}

fn write_include(f: &mut fmt::Formatter<'_>, keyword: &str, include: &IncludeOp) -> fmt::Result {
    write!(f, "{} {} with {}", keyword, include.target, include.arguments)?;
    if include.ignore_missing {
        write!(f, " ignore missing")?;
    }
    writeln!(f)
}

fn write_ops(f: &mut fmt::Formatter<'_>, ops: &[Op], depth: usize) -> fmt::Result {
    let indent = "  ".repeat(depth);
    for op in ops {
        write!(f, "{}", indent)?;
        match op {
            Op::Text(text) => writeln!(f, "text {:?}", text)?,
            Op::Print { expr, escape } => {
                if *escape {
                    writeln!(f, "print escape({})", expr)?
                } else {
                    writeln!(f, "print {}", expr)?
                }
            }
            Op::Include(include) => write_include(f, "include", include)?,
            Op::Embed { include, blocks } => {
                write_include(f, "embed", include)?;
                for (name, body) in blocks {
                    writeln!(f, "{}  block {}", indent, name)?;
                    write_ops(f, body, depth + 2)?;
                }
            }
            Op::Block { name, body } => {
                writeln!(f, "block {}", name)?;
                write_ops(f, body, depth + 1)?;
            }
            Op::If {
                branches,
                otherwise,
            } => {
                for (i, (condition, body)) in branches.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{}else", indent)?;
                    }
                    writeln!(f, "if {}", condition)?;
                    write_ops(f, body, depth + 1)?;
                }
                if !otherwise.is_empty() {
                    writeln!(f, "{}else", indent)?;
                    write_ops(f, otherwise, depth + 1)?;
                }
            }
            Op::For {
                key,
                value,
                iterable,
                body,
                otherwise,
            } => {
                match key {
                    Some(key) => writeln!(f, "for {}, {} in {}", key, value, iterable)?,
                    None => writeln!(f, "for {} in {}", value, iterable)?,
                }
                write_ops(f, body, depth + 1)?;
                if !otherwise.is_empty() {
                    writeln!(f, "{}else", indent)?;
                    write_ops(f, otherwise, depth + 1)?;
                }
            }
            Op::Set { name, value } => writeln!(f, "set {} = {}", name, value)?,
            Op::Tag { name, body } => {
                writeln!(f, "tag {}", name)?;
                write_ops(f, body, depth + 1)?;
            }
        }
    }
    Ok(())
}

/// Textual dump of the program
impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "program {:?}", self.name)?;
        write_ops(f, &self.ops, 1)?;
        for (name, def) in &self.macros {
            writeln!(f, "  macro {}({})", name, def.params.join(", "))?;
            write_ops(f, &def.body, 2)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use serde_json::{json, Map, Value};
    use std::sync::Arc;

    fn inclusion(source: &str) -> Inclusion {
        match parse(source).unwrap().nodes.remove(0).node {
            Node::Inclusion(inc) => inc,
            other => panic!("Expected inclusion, got {:?}", other),
        }
    }

    fn data(value: Value) -> BoundData {
        match value {
            Value::Object(map) => Arc::new(map),
            _ => panic!("expected object"),
        }
    }

    fn arguments(source: &str, bound: Option<Value>) -> String {
        let mut inc = inclusion(source);
        if let Some(value) = bound {
            inc = inc.bind(data(value));
        }
        template_arguments(&inc).to_string()
    }

    #[test]
    fn test_plain_arguments() {
        assert_eq!(arguments(r#"{% include "a" %}"#, None), "context");
        assert_eq!(arguments(r#"{% include "a" only %}"#, None), "{}");
        assert_eq!(
            arguments(r#"{% include "a" with {c: 3} %}"#, None),
            "merge(context, {c: 3})"
        );
        assert_eq!(arguments(r#"{% include "a" with {c: 3} only %}"#, None), "{c: 3}");
    }

    #[test]
    fn test_bound_arguments() {
        let d = || Some(json!({"a": 1}));
        assert_eq!(
            arguments(r#"{% include "a" %}"#, d()),
            r#"merge(context, {"a":1})"#
        );
        assert_eq!(
            arguments(r#"{% include "a" with {c: 3} %}"#, d()),
            r#"merge(context, {"a":1}, {c: 3})"#
        );
    }

    #[test]
    fn test_isolated_bound_arguments_drop_data() {
        let d = || Some(json!({"a": 1}));
        assert_eq!(arguments(r#"{% include "a" only %}"#, d()), "{}");
        assert_eq!(arguments(r#"{% include "a" with x only %}"#, d()), "x");
        assert_eq!(
            template_arguments(&inclusion(r#"{% include "a" only %}"#).bind(Arc::new(Map::new()))),
            Arguments::Empty
        );
    }

    #[test]
    fn test_empty_bound_data_still_merges() {
        assert_eq!(
            arguments(r#"{% embed "a" %}{% endembed %}"#, Some(json!({}))),
            "merge(context, {})"
        );
    }

    #[test]
    fn test_escape_decisions() {
        let program = compile(
            "t",
            parse("{{ a }}{{ a|raw }}{{ a|e }}{{ a|upper }}{{ forms.input(a) }}").unwrap(),
            true,
        );
        let escapes: Vec<bool> = program
            .ops
            .iter()
            .map(|op| match op {
                Op::Print { escape, .. } => *escape,
                _ => panic!("Expected print"),
            })
            .collect();
        assert_eq!(escapes, vec![true, false, false, true, false]);

        let program = compile("t", parse("{{ a }}").unwrap(), false);
        assert!(matches!(program.ops[0], Op::Print { escape: false, .. }));
    }

    #[test]
    fn test_macros_are_collected() {
        let program = compile(
            "forms",
            parse("{% macro input(name, value) %}<input name=\"{{ name }}\">{% endmacro %}")
                .unwrap(),
            true,
        );
        assert!(program.ops.is_empty());
        assert_eq!(program.macros["input"].params, vec!["name", "value"]);
    }

    #[test]
    fn test_emit_program() {
        let source = r#"<h1>{{ title }}</h1>
{% include "atoms-button" with {size: "large"} %}{% embed "molecules-card" only %}{% block body %}{{ text|raw }}{% endblock %}{% endembed %}{% for item in items %}{{ loop.index }}{% else %}none{% endfor %}"#;
        let mut template = parse(source).unwrap();
        if let Node::Inclusion(inc) = &mut template.nodes[3].node {
            *inc = inc.clone().bind(data(json!({"label": "Go"})));
        }
        let program = compile("pages-home", template, true);
        insta::assert_snapshot!(program.to_string(), @r###"
        program "pages-home"
          text "<h1>"
          print escape(title)
          text "</h1>\n"
          include "atoms-button" with merge(context, {"label":"Go"}, {size: "large"})
          embed "molecules-card" with {}
            block body
              print text|raw
          for item in items
            print escape(loop.index)
          else
            text "none"
        "###);
    }

    #[test]
    fn test_emit_conditionals_and_macros() {
        let source = "{% if a %}x{% elseif b %}y{% else %}z{% endif %}{% set n = 1 + 2 %}{% include name ignore missing %}{% macro m(p) %}{{ p }}{% endmacro %}";
        let program = compile("t", parse(source).unwrap(), false);
        insta::assert_snapshot!(program.to_string(), @r###"
        program "t"
          if a
            text "x"
          elseif b
            text "y"
          else
            text "z"
          set n = (1 + 2)
          include name with context ignore missing
          macro m(p)
            print p
        "###);
    }
}
