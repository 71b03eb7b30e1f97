//! Lexer for pattern templates
//!
//! Template source is split into raw text and tag regions by a small scanner;
//! the interior of `{{ ... }}` and `{% ... %}` regions is tokenized with logos.

use logos::Logos;

use crate::error::ParseError;

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
pub enum Token {
    /// Raw text between tags (produced by the scanner, never by logos)
    Text(String),
    /// `}}` closing an output tag (produced by the scanner)
    PrintClose,

    // Tag delimiters
    #[token("{{")]
    PrintOpen,
    #[token("{%")]
    TagOpen,
    #[token("%}")]
    TagClose,

    // Inclusion keywords
    #[token("include")]
    Include,
    #[token("embed")]
    Embed,
    #[token("endembed")]
    EndEmbed,
    #[token("with")]
    With,
    #[token("only")]
    Only,
    #[token("ignore")]
    Ignore,
    #[token("missing")]
    Missing,

    // Control flow keywords
    #[token("if")]
    If,
    #[token("elseif")]
    ElseIf,
    #[token("else")]
    Else,
    #[token("endif")]
    EndIf,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("endfor")]
    EndFor,
    #[token("block")]
    Block,
    #[token("endblock")]
    EndBlock,
    #[token("set")]
    Set,
    #[token("macro")]
    Macro,
    #[token("endmacro")]
    EndMacro,

    // Word operators
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("is")]
    Is,

    // Constants
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    #[token("none")]
    Null,

    // Comparison operators (longer first)
    #[token("==")]
    EqualEqual,
    #[token("!=")]
    NotEqual,
    #[token("<=")]
    LessOrEqual,
    #[token(">=")]
    GreaterOrEqual,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,
    #[token("=")]
    Equals,

    // Arithmetic and string operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("~")]
    Tilde,
    #[token("|")]
    Pipe,

    // Delimiters
    #[token("{")]
    BraceOpen,
    #[token("}")]
    BraceClose,
    #[token("[")]
    BracketOpen,
    #[token("]")]
    BracketClose,
    #[token("(")]
    ParenOpen,
    #[token(")")]
    ParenClose,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,

    // Literals - identifiers must come after keywords
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string(), priority = 1)]
    Ident(String),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| unescape(lex.slice()))]
    String(String),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Integer(i64),

    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Print,
    Statement,
}

/// Strip the quotes from a string literal and process backslash escapes
fn unescape(quoted: &str) -> String {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Lex template source into tokens with spans
///
/// Comments (`{# ... #}`) are dropped. An unterminated tag or comment, or a
/// character that cannot start a token inside a tag, is a syntax error.
pub fn lex(input: &str) -> Result<Vec<(Token, Span)>, ParseError> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < input.len() {
        let Some(offset) = find_tag_start(&input[pos..]) else {
            tokens.push((Token::Text(input[pos..].to_string()), pos..input.len()));
            break;
        };
        let start = pos + offset;
        if offset > 0 {
            tokens.push((Token::Text(input[pos..start].to_string()), pos..start));
        }

        match &input[start..start + 2] {
            "{#" => {
                let end = input[start + 2..]
                    .find("#}")
                    .ok_or_else(|| unterminated(start, input.len(), "comment"))?;
                pos = start + 2 + end + 2;
            }
            "{{" => {
                tokens.push((Token::PrintOpen, start..start + 2));
                pos = lex_tag(input, start + 2, TagKind::Print, &mut tokens)?;
            }
            _ => {
                tokens.push((Token::TagOpen, start..start + 2));
                pos = lex_tag(input, start + 2, TagKind::Statement, &mut tokens)?;
            }
        }
    }

    Ok(tokens)
}

fn find_tag_start(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    text.match_indices('{')
        .map(|(i, _)| i)
        .find(|&i| matches!(bytes.get(i + 1), Some(b'{' | b'%' | b'#')))
}

/// Tokenize one tag interior, returning the byte offset just past its closing delimiter
fn lex_tag(
    input: &str,
    start: usize,
    kind: TagKind,
    tokens: &mut Vec<(Token, Span)>,
) -> Result<usize, ParseError> {
    let mut lexer = Token::lexer(&input[start..]);
    let mut depth = 0usize;

    while let Some(result) = lexer.next() {
        let local = lexer.span();
        let span = start + local.start..start + local.end;
        match result {
            Err(()) => {
                return Err(ParseError::Syntax {
                    message: format!("Unexpected character '{}'", &input[span.clone()]),
                    span,
                    expected: Vec::new(),
                });
            }
            Ok(Token::TagClose) if kind == TagKind::Statement => {
                tokens.push((Token::TagClose, span.clone()));
                return Ok(span.end);
            }
            Ok(Token::BraceClose) if depth == 0 && kind == TagKind::Print => {
                if input[span.end..].starts_with('}') {
                    tokens.push((Token::PrintClose, span.start..span.end + 1));
                    return Ok(span.end + 1);
                }
                return Err(ParseError::Syntax {
                    message: "Unexpected '}'".to_string(),
                    span,
                    expected: vec!["'}}'".to_string()],
                });
            }
            Ok(Token::BraceClose) => {
                depth = depth.saturating_sub(1);
                tokens.push((Token::BraceClose, span));
            }
            Ok(Token::BraceOpen) => {
                depth += 1;
                tokens.push((Token::BraceOpen, span));
            }
            // `{{` inside a tag can only be two nested map openings
            Ok(Token::PrintOpen) => {
                depth += 2;
                tokens.push((Token::BraceOpen, span.start..span.start + 1));
                tokens.push((Token::BraceOpen, span.start + 1..span.end));
            }
            Ok(tok) => tokens.push((tok, span)),
        }
    }

    let what = match kind {
        TagKind::Print => "output tag",
        TagKind::Statement => "tag",
    };
    Err(unterminated(start - 2, input.len(), what))
}

fn unterminated(start: usize, end: usize, what: &str) -> ParseError {
    ParseError::Syntax {
        span: start..end,
        message: format!("Unterminated {}", what),
        expected: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        lex(input)
            .expect("Should lex")
            .into_iter()
            .map(|(t, _)| t)
            .collect()
    }

    #[test]
    fn test_text_only() {
        assert_eq!(kinds("<p>hi</p>"), vec![Token::Text("<p>hi</p>".to_string())]);
    }

    #[test]
    fn test_print_tag() {
        assert_eq!(
            kinds("a {{ name }} b"),
            vec![
                Token::Text("a ".to_string()),
                Token::PrintOpen,
                Token::Ident("name".to_string()),
                Token::PrintClose,
                Token::Text(" b".to_string()),
            ]
        );
    }

    #[test]
    fn test_include_tag() {
        assert_eq!(
            kinds(r#"{% include "atoms-button" with {a: 1} only %}"#),
            vec![
                Token::TagOpen,
                Token::Include,
                Token::String("atoms-button".to_string()),
                Token::With,
                Token::BraceOpen,
                Token::Ident("a".to_string()),
                Token::Colon,
                Token::Integer(1),
                Token::BraceClose,
                Token::Only,
                Token::TagClose,
            ]
        );
    }

    #[test]
    fn test_nested_map_in_print() {
        let tokens = kinds("{{ {a: {b: 1}} }}");
        assert_eq!(tokens.first(), Some(&Token::PrintOpen));
        assert_eq!(tokens.last(), Some(&Token::PrintClose));
        let closes = tokens.iter().filter(|t| **t == Token::BraceClose).count();
        assert_eq!(closes, 2);
    }

    #[test]
    fn test_comments_dropped() {
        assert_eq!(
            kinds("a{# note #}b"),
            vec![Token::Text("a".to_string()), Token::Text("b".to_string())]
        );
    }

    #[test]
    fn test_single_braces_are_text() {
        assert_eq!(
            kinds("function() { return 1; }"),
            vec![Token::Text("function() { return 1; }".to_string())]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#"{{ 'it\'s' }}"#)[1],
            Token::String("it's".to_string())
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("{{ 42 3.5 }}")[1..3],
            [Token::Integer(42), Token::Float(3.5)]
        );
    }

    #[test]
    fn test_spans_are_absolute() {
        let tokens = lex("ab{{ x }}").expect("Should lex");
        assert_eq!(tokens[2].1, 5..6);
    }

    #[test]
    fn test_unterminated_tag_error() {
        assert!(matches!(
            lex("{% include 'x'"),
            Err(ParseError::Syntax { .. })
        ));
    }

    #[test]
    fn test_unterminated_comment_error() {
        assert!(lex("{# never closed").is_err());
    }
}
