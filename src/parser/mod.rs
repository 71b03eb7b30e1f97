//! Template parser: logos lexer, chumsky grammar and the syntax tree

pub mod ast;
pub mod grammar;
pub mod lexer;

pub use ast::Template;
pub use grammar::parse;
