use std::{
    fmt::Display,
    num::{ParseFloatError, ParseIntError},
};

use miette::{Diagnostic, Error, NamedSource, SourceSpan};
use thiserror::Error;

use crate::grammar::{Category, Grammar, Subcategory};

#[derive(Error, Debug, Diagnostic)]
pub enum LexError {
    #[error("Invalid character: {token}")]
    #[diagnostic(
        code(vsi::lex::invalid_character),
        help("remove or correct the character: `{token}`")
    )]
    InvalidCharacter {
        #[source_code]
        src: NamedSource<String>,

        #[label("this character")]
        bad_bit: SourceSpan,

        token: char,
    },

    #[error("invalid integer literal `{literal}`: {reason}")]
    #[diagnostic(code(vsi::lex::invalid_integer))]
    InvalidInteger {
        #[source_code]
        src: NamedSource<String>,

        #[label("this numeric literal")]
        bad_bit: SourceSpan,

        literal: String,
        reason: ParseIntError,
    },

    #[error("invalid float literal `{literal}`: {reason}")]
    #[diagnostic(
        code(vsi::lex::invalid_float),
        url("https://doc.rust-lang.org/std/num/struct.ParseFloatError.html")
    )]
    InvalidFloat {
        #[source_code]
        src: NamedSource<String>,

        #[label("this numeric literal")]
        bad_bit: SourceSpan,

        literal: String,
        reason: ParseFloatError,
    },
}

impl LexError {
    pub fn line(&self) -> usize {
        let (src, bad_bit) = match self {
            LexError::InvalidCharacter { src, bad_bit, .. }
            | LexError::InvalidInteger { src, bad_bit, .. }
            | LexError::InvalidFloat { src, bad_bit, .. } => (src, bad_bit),
        };
        line_of(src.inner(), bad_bit.offset())
    }
}

/// 1-based line number of the byte at `offset`.
pub(crate) fn line_of(source: &str, offset: usize) -> usize {
    let offset = offset.min(source.len());
    source.as_bytes()[..offset].iter().filter(|&&b| b == b'\n').count() + 1
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenValue<'de> {
    Text(&'de str),
    Int(i64),
    Float(f64),
}

impl Display for TokenValue<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenValue::Text(text) => write!(f, "{text}"),
            TokenValue::Int(n) => write!(f, "{n}"),
            TokenValue::Float(n) => write!(f, "{n:?}"),
        }
    }
}

/// A classified lexeme. Equality ignores where the token came from.
#[derive(Debug, Clone, Copy)]
pub struct Token<'de> {
    pub value: TokenValue<'de>,
    pub category: Category,
    pub subcategory: Option<Subcategory>,
    pub precedence: u8,
    pub span: SourceSpan,
}

impl PartialEq for Token<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
            && self.category == other.category
            && self.subcategory == other.subcategory
            && self.precedence == other.precedence
    }
}

impl<'de> Token<'de> {
    pub const EOF: &'static str = "EOF";

    pub fn new(
        value: TokenValue<'de>,
        category: Category,
        subcategory: Option<Subcategory>,
        precedence: u8,
    ) -> Self {
        Token {
            value,
            category,
            subcategory,
            precedence,
            span: SourceSpan::from(0..0),
        }
    }

    pub fn eof(byte: usize) -> Self {
        Token {
            span: SourceSpan::from(byte..byte),
            ..Token::new(
                TokenValue::Text(Token::EOF),
                Category::Reserved,
                Some(Subcategory::Symbol),
                0,
            )
        }
    }

    pub fn is_eof(&self) -> bool {
        self.value == TokenValue::Text(Token::EOF)
            && self.category == Category::Reserved
            && self.subcategory == Some(Subcategory::Symbol)
    }

    /// The token text, for reserved words, operators and identifiers.
    pub fn text(&self) -> Option<&'de str> {
        match self.value {
            TokenValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_operator(&self) -> bool {
        self.subcategory == Some(Subcategory::Operator)
    }
}

impl Display for Token<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Token {
            value,
            category,
            subcategory,
            precedence,
            ..
        } = self;
        match subcategory {
            Some(subcategory) => write!(f, "{category} {subcategory} {value} {precedence}"),
            None => write!(f, "{category} {value} {precedence}"),
        }
    }
}

/// Streams tokens out of `whole` by trying the grammar rules at each offset.
///
/// Ends with exactly one EOF token. The first lexing error is also the last
/// item produced.
pub struct Lexer<'g, 'de> {
    grammar: &'g Grammar,
    filename: Option<&'de str>,
    whole: &'de str,
    rest: &'de str,
    pub byte: usize,
    finished: bool,
}

impl<'g, 'de> Lexer<'g, 'de> {
    pub fn new(grammar: &'g Grammar, filename: Option<&'de str>, input: &'de str) -> Self {
        Lexer {
            grammar,
            filename,
            whole: input,
            rest: input,
            byte: 0,
            finished: false,
        }
    }

    fn source(&self) -> NamedSource<String> {
        named_source(self.filename, self.whole)
    }

    /// Lexes everything, then converts numeric text into numbers.
    #[tracing::instrument(level = "debug", skip_all, fields(bytes = self.whole.len()))]
    pub fn tokenize(self) -> Result<Vec<Token<'de>>, Error> {
        let (filename, whole) = (self.filename, self.whole);
        let mut tokens = self.collect::<Result<Vec<_>, _>>()?;
        for token in &mut tokens {
            prepare_token(token, filename, whole)?;
        }
        tracing::debug!(tokens = tokens.len(), "tokenized source");
        Ok(tokens)
    }
}

pub(crate) fn named_source(filename: Option<&str>, whole: &str) -> NamedSource<String> {
    NamedSource::new(filename.unwrap_or("<input>"), whole.to_string())
}

fn prepare_token(token: &mut Token<'_>, filename: Option<&str>, whole: &str) -> Result<(), Error> {
    let TokenValue::Text(literal) = token.value else {
        return Ok(());
    };
    match token.subcategory {
        Some(Subcategory::Int) => {
            let n = literal.parse().map_err(|reason| LexError::InvalidInteger {
                src: named_source(filename, whole),
                bad_bit: token.span,
                literal: literal.to_string(),
                reason,
            })?;
            token.value = TokenValue::Int(n);
        }
        Some(Subcategory::Float) => {
            let n = literal.parse().map_err(|reason| LexError::InvalidFloat {
                src: named_source(filename, whole),
                bad_bit: token.span,
                literal: literal.to_string(),
                reason,
            })?;
            token.value = TokenValue::Float(n);
        }
        _ => {}
    }
    Ok(())
}

impl<'de> Iterator for Lexer<'_, 'de> {
    type Item = Result<Token<'de>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            let Some(c) = self.rest.chars().next() else {
                self.finished = true;
                return Some(Ok(Token::eof(self.byte)));
            };

            let Some((rule, len)) = self.grammar.find(self.rest) else {
                self.finished = true;
                return Some(Err(LexError::InvalidCharacter {
                    src: self.source(),
                    bad_bit: SourceSpan::from(self.byte..self.byte + c.len_utf8()),
                    token: c,
                }
                .into()));
            };

            let literal = &self.rest[..len];
            let span = SourceSpan::from(self.byte..self.byte + len);
            self.rest = &self.rest[len..];
            self.byte += len;

            // whitespace and comments
            let Some(category) = rule.category else {
                continue;
            };

            return Some(Ok(Token {
                value: TokenValue::Text(literal),
                category,
                subcategory: rule.subcategory,
                precedence: rule.precedence,
                span,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn lex(input: &str) -> Vec<Token<'_>> {
        Lexer::new(&Grammar::default(), None, input)
            .tokenize()
            .unwrap()
    }

    fn text(value: &str, category: Category, subcategory: Option<Subcategory>, precedence: u8) -> Token<'_> {
        Token::new(TokenValue::Text(value), category, subcategory, precedence)
    }

    fn int(n: i64) -> Token<'static> {
        Token::new(TokenValue::Int(n), Category::Number, Some(Subcategory::Int), 0)
    }

    #[test]
    fn assignment() {
        assert_eq!(
            lex("x := 10;"),
            vec![
                text("x", Category::Id, None, 0),
                text(":=", Category::Reserved, Some(Subcategory::Operator), 0),
                int(10),
                text(";", Category::Reserved, Some(Subcategory::Symbol), 0),
                Token::eof(0),
            ]
        );
    }

    #[test]
    fn whitespace_and_comments() {
        assert_eq!(lex("#comment"), vec![Token::eof(0)]);
        assert_eq!(lex("\n      \n         \n"), vec![Token::eof(0)]);
        assert_eq!(lex("# comment \n        122"), vec![int(122), Token::eof(0)]);
        assert_eq!(lex(""), vec![Token::eof(0)]);
    }

    #[test]
    fn single_tokens() {
        assert_eq!(lex("x"), vec![text("x", Category::Id, None, 0), Token::eof(0)]);
        assert_eq!(lex("11"), vec![int(11), Token::eof(0)]);
        assert_eq!(
            lex(";"),
            vec![
                text(";", Category::Reserved, Some(Subcategory::Symbol), 0),
                Token::eof(0)
            ]
        );
    }

    #[test]
    fn operator_precedence_comes_from_the_grammar() {
        let precedences: Vec<_> = lex("( % * / + - < <= > >= == != and or not")
            .iter()
            .map(|token| token.precedence)
            .collect();
        assert_eq!(precedences, vec![9, 4, 3, 3, 2, 2, 2, 2, 2, 2, 2, 2, 1, 1, 1, 0]);
    }

    #[test]
    fn keywords_do_not_swallow_identifiers() {
        let tokens = lex("while done_x do done");
        let kinds: Vec<_> = tokens
            .iter()
            .map(|token| (token.value, token.category))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (TokenValue::Text("while"), Category::Reserved),
                (TokenValue::Text("done_x"), Category::Id),
                (TokenValue::Text("do"), Category::Reserved),
                (TokenValue::Text("done"), Category::Reserved),
                (TokenValue::Text("EOF"), Category::Reserved),
            ]
        );
    }

    #[test]
    fn float_literals_are_normalized() {
        assert_eq!(
            lex("2.5")[0],
            Token::new(TokenValue::Float(2.5), Category::Number, Some(Subcategory::Float), 0)
        );
    }

    #[test]
    fn spans_point_into_the_source() {
        let tokens = lex("x := 10;");
        assert_eq!(tokens[2].span, SourceSpan::from(5..7));
        assert_eq!(tokens[4].span, SourceSpan::from(8..8));
    }

    #[test]
    fn identifier_named_eof_is_not_end_of_input() {
        let tokens = lex("EOF");
        assert!(!tokens[0].is_eof());
        assert!(tokens[1].is_eof());
    }

    #[test]
    fn invalid_character_stops_the_lexer() {
        let grammar = Grammar::default();
        let mut lexer = Lexer::new(&grammar, None, "x @ y");
        assert!(lexer.next().unwrap().is_ok());
        let err = lexer.next().unwrap().unwrap_err();
        let err = err.downcast_ref::<LexError>().unwrap();
        assert!(matches!(err, LexError::InvalidCharacter { token: '@', .. }));
        assert_eq!(err.line(), 1);
        assert!(lexer.next().is_none());
    }

    #[test]
    fn invalid_character_reports_line() {
        let err = Lexer::new(&Grammar::default(), None, "x := 1;\ny := $;")
            .tokenize()
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid character: $");
        assert_eq!(err.downcast_ref::<LexError>().unwrap().line(), 2);
    }

    #[test]
    fn malformed_float_from_a_custom_rule_is_a_lex_error() {
        use crate::grammar::{Pattern, Rule};

        let grammar = Grammar::new(vec![
            Rule::skip(Pattern::Whitespace),
            Rule::token(Pattern::Identifier, Category::Number, Some(Subcategory::Float), 0),
        ]);
        let err = Lexer::new(&grammar, None, "\nabc").tokenize().unwrap_err();
        let err = err.downcast_ref::<LexError>().unwrap();
        assert!(matches!(
            err,
            LexError::InvalidFloat { literal, .. } if literal == "abc"
        ));
        assert_eq!(err.line(), 2);
    }

    #[test]
    fn oversized_integer_is_rejected() {
        let err = Lexer::new(&Grammar::default(), None, "99999999999999999999")
            .tokenize()
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LexError>(),
            Some(LexError::InvalidInteger { .. })
        ));
    }
}
