//! A very simple imperative language: assignments, `if`/`while` blocks and a
//! `print` statement over integer, float and boolean values.
//!
//! ```text
//! x := 0;
//! while x < 3 do
//!     print x;
//!     x := x + 1;
//! done
//! ```

pub mod ast;
pub mod eval;
pub mod grammar;
pub mod lex;
pub mod parse;

use std::io::Write;

pub use ast::{Expr, Statements, Stmt};
pub use eval::{Environment, Interpreter, RuntimeError, Value};
pub use grammar::Grammar;
pub use lex::{LexError, Lexer, Token};
pub use parse::{Parser, SyntaxError};

/// Tokenizes `source` with the standard grammar. The last token is EOF.
pub fn lex(source: &str) -> miette::Result<Vec<Token<'_>>> {
    Lexer::new(&Grammar::default(), None, source).tokenize()
}

pub fn parse(source: &str) -> miette::Result<Statements> {
    Parser::from_source(&Grammar::default(), None, source)?.parse()
}

/// Runs `source`, printing to stdout. Bindings are left in `environment`.
pub fn interpret(source: &str, environment: &mut Environment) -> miette::Result<()> {
    let program = parse(source)?;
    Interpreter::new(environment).interpret(&program)
}

pub fn interpret_with_output(
    source: &str,
    environment: &mut Environment,
    out: impl Write,
) -> miette::Result<()> {
    let program = parse(source)?;
    Interpreter::with_output(environment, out).interpret(&program)
}
