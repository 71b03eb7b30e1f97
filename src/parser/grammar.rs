//! Parser implementation using chumsky

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use serde_json::Value;

use crate::parser::ast::*;
use crate::parser::lexer::Token;

type ParserError<'a> = extra::Err<Rich<'a, Token>>;

/// Postfix operations applied to an atom, left to right
#[derive(Debug, Clone)]
enum Postfix {
    Attr(String),
    Method(String, Vec<Spanned<Expr>>),
    Index(Spanned<Expr>),
    Filter(String, Vec<Spanned<Expr>>),
}

/// Right-hand side of a comparison-level operator
#[derive(Debug, Clone)]
enum Comparison {
    Binary(BinaryOp, Spanned<Expr>),
    Test {
        negated: bool,
        name: String,
        args: Vec<Spanned<Expr>>,
    },
}

#[derive(Debug, Clone, Copy)]
enum Unary {
    Not,
    Neg,
}

/// Parse template source into an AST
pub fn parse(input: &str) -> Result<Template, Vec<crate::ParseError>> {
    let len = input.len();
    let tokens = crate::parser::lexer::lex(input).map_err(|e| vec![e])?;

    let token_iter = tokens.into_iter().map(|(tok, span)| (tok, span.into()));

    // Turn the token iterator into a stream that chumsky can use
    let token_stream = Stream::from_iter(token_iter)
        // Split (Token, SimpleSpan) into token and span parts
        .map((len..len).into(), |(t, s): (_, _)| (t, s));

    template_parser()
        .parse(token_stream)
        .into_result()
        .map_err(|errs| errs.into_iter().map(|e| e.into()).collect())
}

/// Helper to extract span range from chumsky's MapExtra
fn span_range(e: &impl chumsky::span::Span<Offset = usize>) -> std::ops::Range<usize> {
    e.start()..e.end()
}

fn fold_postfix(acc: Spanned<Expr>, (op, end): (Postfix, usize)) -> Spanned<Expr> {
    let span = acc.span.start..end;
    let object = Box::new(acc);
    let node = match op {
        Postfix::Attr(name) => Expr::Attr { object, name },
        Postfix::Method(name, args) => Expr::MethodCall { object, name, args },
        Postfix::Index(index) => Expr::Index {
            object,
            index: Box::new(index),
        },
        Postfix::Filter(name, args) => Expr::Filter {
            value: object,
            name,
            args,
        },
    };
    Spanned::new(node, span)
}

fn fold_binary(first: Spanned<Expr>, rest: Vec<(BinaryOp, Spanned<Expr>)>) -> Spanned<Expr> {
    rest.into_iter().fold(first, |left, (op, right)| {
        let span = left.span.start..right.span.end;
        Spanned::new(
            Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        )
    })
}

/// One left-associative precedence level
fn binary_level<'a, I, P, O>(
    operand: P,
    op: O,
) -> impl Parser<'a, I, Spanned<Expr>, ParserError<'a>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
    P: Parser<'a, I, Spanned<Expr>, ParserError<'a>> + Clone,
    O: Parser<'a, I, BinaryOp, ParserError<'a>> + Clone,
{
    operand
        .clone()
        .then(op.then(operand).repeated().collect::<Vec<_>>())
        .map(|(first, rest)| fold_binary(first, rest))
}

fn expression_parser<'a, I>() -> impl Parser<'a, I, Spanned<Expr>, ParserError<'a>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    recursive(|expr| {
        let ident = select! { Token::Ident(s) => s };

        let literal = select! {
            Token::String(s) => Value::String(s),
            Token::Integer(n) => Value::from(n),
            Token::Float(n) => Value::from(n),
            Token::True => Value::Bool(true),
            Token::False => Value::Bool(false),
            Token::Null => Value::Null,
        }
        .map(Expr::Literal);

        let items = expr
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>();

        let args = items
            .clone()
            .delimited_by(just(Token::ParenOpen), just(Token::ParenClose));

        let array = items
            .delimited_by(just(Token::BracketOpen), just(Token::BracketClose))
            .map(Expr::Array);

        // Map keys are bare names or quoted strings
        let key = select! {
            Token::Ident(s) => s,
            Token::String(s) => s,
        };
        let map = key
            .then_ignore(just(Token::Colon))
            .then(expr.clone())
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::BraceOpen), just(Token::BraceClose))
            .map(Expr::Map);

        let call_or_var = ident
            .clone()
            .then(args.clone().or_not())
            .map(|(name, args)| match args {
                Some(args) => Expr::Call { name, args },
                None => Expr::Var(name),
            });

        let parenthesized = expr
            .clone()
            .delimited_by(just(Token::ParenOpen), just(Token::ParenClose))
            .map(|inner: Spanned<Expr>| inner.node);

        let atom = choice((literal, call_or_var, array, map, parenthesized))
            .map_with(|node, e| Spanned::new(node, span_range(&e.span())));

        let postfix = choice((
            just(Token::Dot)
                .ignore_then(ident.clone())
                .then(args.clone().or_not())
                .map(|(name, args)| match args {
                    Some(args) => Postfix::Method(name, args),
                    None => Postfix::Attr(name),
                }),
            expr.clone()
                .delimited_by(just(Token::BracketOpen), just(Token::BracketClose))
                .map(Postfix::Index),
            just(Token::Pipe)
                .ignore_then(ident.clone())
                .then(args.clone().or_not())
                .map(|(name, args)| Postfix::Filter(name, args.unwrap_or_default())),
        ))
        .map_with(|op, e| (op, span_range(&e.span()).end));

        let postfixed = atom
            .then(postfix.repeated().collect::<Vec<_>>())
            .map(|(first, rest)| rest.into_iter().fold(first, fold_postfix));

        // Unary operators bind tighter than every binary operator
        let unary = choice((
            just(Token::Not).to(Unary::Not),
            just(Token::Minus).to(Unary::Neg),
        ))
        .map_with(|op, e| (op, span_range(&e.span()).start))
        .repeated()
        .collect::<Vec<_>>()
        .then(postfixed)
        .map(|(ops, operand)| {
            ops.into_iter().rev().fold(operand, |inner, (op, start)| {
                let span = start..inner.span.end;
                let inner = Box::new(inner);
                let node = match op {
                    Unary::Not => Expr::Not(inner),
                    Unary::Neg => Expr::Neg(inner),
                };
                Spanned::new(node, span)
            })
        })
        .boxed();

        let concat = binary_level(unary, just(Token::Tilde).to(BinaryOp::Concat));

        // `~` binds tighter than `+` and `-`
        let additive = binary_level(
            concat,
            choice((
                just(Token::Plus).to(BinaryOp::Add),
                just(Token::Minus).to(BinaryOp::Sub),
            )),
        );

        let comparison_op = choice((
            just(Token::EqualEqual).to(BinaryOp::Equal),
            just(Token::NotEqual).to(BinaryOp::NotEqual),
            just(Token::LessOrEqual).to(BinaryOp::LessOrEqual),
            just(Token::GreaterOrEqual).to(BinaryOp::GreaterOrEqual),
            just(Token::Less).to(BinaryOp::Less),
            just(Token::Greater).to(BinaryOp::Greater),
        ));

        // `null` is a keyword token but also a test name
        let test_name = select! {
            Token::Ident(s) => s,
            Token::Null => "null".to_string(),
        };

        let comparison_rhs = choice((
            comparison_op
                .then(additive.clone())
                .map(|(op, rhs)| Comparison::Binary(op, rhs)),
            just(Token::Is)
                .ignore_then(just(Token::Not).or_not())
                .then(test_name)
                .then(args.or_not())
                .map(|((negated, name), args)| Comparison::Test {
                    negated: negated.is_some(),
                    name,
                    args: args.unwrap_or_default(),
                }),
        ))
        .map_with(|rhs, e| (rhs, span_range(&e.span()).end));

        let comparison = additive
            .then(comparison_rhs.repeated().collect::<Vec<_>>())
            .map(|(first, rest)| {
                rest.into_iter().fold(first, |left, (rhs, end)| {
                    let span = left.span.start..end;
                    let node = match rhs {
                        Comparison::Binary(op, right) => Expr::Binary {
                            op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        Comparison::Test {
                            negated,
                            name,
                            args,
                        } => Expr::Test {
                            value: Box::new(left),
                            name,
                            args,
                            negated,
                        },
                    };
                    Spanned::new(node, span)
                })
            })
            .boxed();

        let and = binary_level(comparison, just(Token::And).to(BinaryOp::And));
        binary_level(and, just(Token::Or).to(BinaryOp::Or))
    })
}

/// `{% keyword`
fn tag<'a, I>(keyword: Token) -> impl Parser<'a, I, (), ParserError<'a>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    just(Token::TagOpen).ignore_then(just(keyword)).ignored()
}

/// `{% keyword %}`
fn closing_tag<'a, I>(keyword: Token) -> impl Parser<'a, I, (), ParserError<'a>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    tag(keyword).then_ignore(just(Token::TagClose))
}

fn template_parser<'a, I>() -> impl Parser<'a, I, Template, ParserError<'a>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    let expr = expression_parser();
    let ident = select! { Token::Ident(s) => s };
    let close = just(Token::TagClose);

    // `[ignore missing] [with <expr>] [only]`, in that order
    let inclusion_options = just(Token::Ignore)
        .ignore_then(just(Token::Missing))
        .or_not()
        .then(just(Token::With).ignore_then(expr.clone()).or_not())
        .then(just(Token::Only).or_not())
        .map(|((ignore, variables), only)| (ignore.is_some(), variables, only.is_some()));

    let node = recursive(|node| {
        let body = node.clone().repeated().collect::<Vec<_>>();

        let text = select! { Token::Text(s) => Node::Text(s) };

        let print = expr
            .clone()
            .delimited_by(just(Token::PrintOpen), just(Token::PrintClose))
            .map(Node::Print);

        let include = tag(Token::Include)
            .ignore_then(expr.clone())
            .then(inclusion_options.clone())
            .then_ignore(close.clone())
            .map(|(target, (ignore_missing, variables, only))| {
                Node::Inclusion(Inclusion {
                    kind: InclusionKind::Include,
                    target,
                    variables,
                    only,
                    ignore_missing,
                    data: None,
                })
            });

        let block = tag(Token::Block)
            .ignore_then(ident.clone())
            .then_ignore(close.clone())
            .then(body.clone())
            .then_ignore(tag(Token::EndBlock))
            .then_ignore(ident.clone().or_not())
            .then_ignore(close.clone())
            .map(|(name, body)| BlockDecl { name, body });

        // Only block overrides are kept from an embed body
        let embed = tag(Token::Embed)
            .ignore_then(expr.clone())
            .then(inclusion_options.clone())
            .then_ignore(close.clone())
            .then(body.clone())
            .then_ignore(closing_tag(Token::EndEmbed))
            .map(|((target, (ignore_missing, variables, only)), body)| {
                let blocks = body
                    .into_iter()
                    .filter_map(|child| match child.node {
                        Node::Block(decl) => Some(Spanned::new(decl, child.span)),
                        _ => None,
                    })
                    .collect();
                Node::Inclusion(Inclusion {
                    kind: InclusionKind::Embed { blocks },
                    target,
                    variables,
                    only,
                    ignore_missing,
                    data: None,
                })
            });

        let else_branch = closing_tag(Token::Else).ignore_then(body.clone());

        let if_node = tag(Token::If)
            .ignore_then(expr.clone())
            .then_ignore(close.clone())
            .then(body.clone())
            .then(
                tag(Token::ElseIf)
                    .ignore_then(expr.clone())
                    .then_ignore(close.clone())
                    .then(body.clone())
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .then(else_branch.clone().or_not())
            .then_ignore(closing_tag(Token::EndIf))
            .map(|(((condition, then), elseifs), otherwise)| {
                let mut branches = vec![(condition, then)];
                branches.extend(elseifs);
                Node::If {
                    branches,
                    otherwise: otherwise.unwrap_or_default(),
                }
            });

        let for_node = tag(Token::For)
            .ignore_then(ident.clone())
            .then(just(Token::Comma).ignore_then(ident.clone()).or_not())
            .then_ignore(just(Token::In))
            .then(expr.clone())
            .then_ignore(close.clone())
            .then(body.clone())
            .then(else_branch.or_not())
            .then_ignore(closing_tag(Token::EndFor))
            .map(|((((first, second), iterable), body), otherwise)| {
                let (key, value) = match second {
                    Some(value) => (Some(first), value),
                    None => (None, first),
                };
                Node::For {
                    key,
                    value,
                    iterable,
                    body,
                    otherwise: otherwise.unwrap_or_default(),
                }
            });

        let set = tag(Token::Set)
            .ignore_then(ident.clone())
            .then_ignore(just(Token::Equals))
            .then(expr.clone())
            .then_ignore(close.clone())
            .map(|(name, value)| Node::Set { name, value });

        let macro_def = tag(Token::Macro)
            .ignore_then(ident.clone())
            .then(
                ident
                    .clone()
                    .separated_by(just(Token::Comma))
                    .allow_trailing()
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::ParenOpen), just(Token::ParenClose)),
            )
            .then_ignore(close.clone())
            .then(body.clone())
            .then_ignore(closing_tag(Token::EndMacro))
            .map(|((name, params), body)| Node::Macro(MacroDecl { name, params, body }));

        // Extension body tags: `{% name %}...{% endname %}`
        let custom_tag = just(Token::TagOpen)
            .ignore_then(
                ident
                    .clone()
                    .filter(|name: &String| !name.starts_with("end")),
            )
            .then_ignore(close.clone())
            .then(body)
            .then(
                just(Token::TagOpen)
                    .ignore_then(ident.clone())
                    .then_ignore(close.clone()),
            )
            .try_map(|((name, body), end), span: SimpleSpan| {
                if end == format!("end{}", name) {
                    Ok(Node::Tag { name, body })
                } else {
                    Err(Rich::custom(
                        span,
                        format!("Expected 'end{}' to close '{}', found '{}'", name, name, end),
                    ))
                }
            });

        choice((
            text,
            print,
            include,
            embed,
            block.map(Node::Block),
            if_node,
            for_node,
            set,
            macro_def,
            custom_tag,
        ))
        .map_with(|n, e| Spanned::new(n, span_range(&e.span())))
        .boxed()
    });

    node.repeated()
        .collect()
        .then_ignore(end())
        .map(|nodes| Template { nodes })
}
