use std::fmt::Display;

use miette::{Diagnostic, Error, NamedSource, SourceSpan};
use thiserror::Error;

use crate::{
    ast::{BinaryOp, Expr, RelOp, Statements, Stmt},
    grammar::{Category, Grammar},
    lex::{Lexer, Token, TokenValue, line_of, named_source},
};

#[derive(Error, Debug, Diagnostic)]
pub enum SyntaxError {
    #[error("expecting {expected} found {found}")]
    #[diagnostic(code(vsi::parse::expected), help("expected {expected} here"))]
    Expected {
        #[source_code]
        src: NamedSource<String>,

        #[label("here")]
        bad_bit: SourceSpan,

        expected: String,
        found: String,
    },

    #[error("Invalid operator {operator}")]
    #[diagnostic(code(vsi::parse::invalid_operator))]
    InvalidOperator {
        #[source_code]
        src: NamedSource<String>,

        #[label("this operator")]
        bad_bit: SourceSpan,

        operator: String,
    },

    #[error("unbalanced parenthesis")]
    #[diagnostic(
        code(vsi::parse::unbalanced_parenthesis),
        help("every `(` needs a matching `)`")
    )]
    UnbalancedParenthesis {
        #[source_code]
        src: NamedSource<String>,

        #[label("this parenthesis is never closed")]
        bad_bit: SourceSpan,
    },
}

impl SyntaxError {
    pub fn line(&self) -> usize {
        let (src, bad_bit) = match self {
            SyntaxError::Expected { src, bad_bit, .. }
            | SyntaxError::InvalidOperator { src, bad_bit, .. }
            | SyntaxError::UnbalancedParenthesis { src, bad_bit } => (src, bad_bit),
        };
        line_of(src.inner(), bad_bit.offset())
    }
}

/// What the parser is looking for at the current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenMatch<'a> {
    /// A reserved word, operator or symbol with exactly this text.
    Reserved(&'a str),
    Category(Category),
    Eof,
}

impl TokenMatch<'_> {
    pub fn matches(&self, token: &Token<'_>) -> bool {
        match *self {
            TokenMatch::Reserved(text) => {
                token.category == Category::Reserved && !token.is_eof() && token.text() == Some(text)
            }
            TokenMatch::Category(category) => token.category == category && !token.is_eof(),
            TokenMatch::Eof => token.is_eof(),
        }
    }
}

impl Display for TokenMatch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenMatch::Reserved(text) => write!(f, "{text}"),
            TokenMatch::Category(category) => write!(f, "{category}"),
            TokenMatch::Eof => write!(f, "{}", Token::EOF),
        }
    }
}

const NOT: &str = "not";
const OPEN: &str = "(";
const CLOSE: &str = ")";
const ASSIGN: &str = ":=";

/// Recursive descent over statements, shunting-yard over expressions.
pub struct Parser<'de> {
    filename: Option<&'de str>,
    whole: &'de str,
    tokens: Vec<Token<'de>>,
    pos: usize,
}

impl<'de> Parser<'de> {
    pub fn new(filename: Option<&'de str>, whole: &'de str, tokens: Vec<Token<'de>>) -> Self {
        Parser {
            filename,
            whole,
            tokens,
            pos: 0,
        }
    }

    pub fn from_source(
        grammar: &Grammar,
        filename: Option<&'de str>,
        whole: &'de str,
    ) -> Result<Self, Error> {
        let tokens = Lexer::new(grammar, filename, whole).tokenize()?;
        Ok(Parser::new(filename, whole, tokens))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(tokens = self.tokens.len()))]
    pub fn parse(mut self) -> Result<Statements, Error> {
        let mut program = Statements::default();
        self.parse_statements(&mut program)?;
        let current = self.current();
        if !current.is_eof() {
            return Err(self.unexpected("statement", &current));
        }
        tracing::debug!(statements = program.len(), "parsed program");
        Ok(program)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// The token under the cursor. Past the end this is a synthetic EOF.
    pub fn current(&self) -> Token<'de> {
        self.tokens
            .get(self.pos)
            .copied()
            .unwrap_or_else(|| Token::eof(self.whole.len()))
    }

    pub fn token_ahead(&self, by: usize) -> Option<Token<'de>> {
        self.tokens.get(self.pos + by).copied()
    }

    pub fn advance(&mut self) {
        self.pos += 1;
    }

    pub fn found(&self, wanted: TokenMatch<'_>) -> bool {
        wanted.matches(&self.current())
    }

    pub fn found_one_of(&self, wanted: &[TokenMatch<'_>]) -> bool {
        wanted.iter().any(|wanted| self.found(*wanted))
    }

    /// Checks without consuming and without failing.
    pub fn optional(&self, wanted: TokenMatch<'_>) -> bool {
        self.found(wanted)
    }

    /// Consumes the current token if it matches, fails otherwise.
    pub fn expect(&mut self, wanted: TokenMatch<'_>) -> Result<Token<'de>, Error> {
        self.expect_where(|token| wanted.matches(token), wanted)
    }

    pub fn expect_one_of(&mut self, wanted: &[TokenMatch<'_>]) -> Result<Token<'de>, Error> {
        let expected = format!(
            "one of [{}]",
            wanted
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        self.expect_where(|token| wanted.iter().any(|w| w.matches(token)), expected)
    }

    fn expect_where(
        &mut self,
        check: impl FnOnce(&Token<'de>) -> bool,
        expected: impl Display,
    ) -> Result<Token<'de>, Error> {
        let token = self.current();
        if check(&token) {
            self.advance();
            Ok(token)
        } else {
            Err(self.unexpected(expected, &token))
        }
    }

    fn source(&self) -> NamedSource<String> {
        named_source(self.filename, self.whole)
    }

    fn unexpected(&self, expected: impl Display, token: &Token<'_>) -> Error {
        SyntaxError::Expected {
            src: self.source(),
            bad_bit: token.span,
            expected: expected.to_string(),
            found: token.value.to_string(),
        }
        .into()
    }

    /// Parses statements into `block` until EOF, `else`, or a token that
    /// cannot start a statement. The caller decides whether that is an error.
    pub fn parse_statements(&mut self, block: &mut Statements) -> Result<(), Error> {
        loop {
            if self.found_one_of(&[TokenMatch::Eof, TokenMatch::Reserved("else")]) {
                break;
            }
            let node = if self.found(TokenMatch::Reserved("if")) {
                self.advance();
                self.parse_if_statement()?
            } else if self.found(TokenMatch::Reserved("while")) {
                self.advance();
                self.parse_while_statement()?
            } else if self.found(TokenMatch::Category(Category::Id)) {
                let assigns = self
                    .token_ahead(1)
                    .is_some_and(|token| TokenMatch::Reserved(ASSIGN).matches(&token));
                if assigns {
                    self.parse_var_assignment()?
                } else {
                    self.parse_expression_statement()?
                }
            } else if self.found(TokenMatch::Reserved("print")) {
                self.advance();
                self.parse_print_statement()?
            } else {
                break;
            };
            block.push(node);
        }
        Ok(())
    }

    /// Expects the cursor just past `if`.
    pub fn parse_if_statement(&mut self) -> Result<Stmt, Error> {
        let condition = self.parse_expr()?;
        self.expect(TokenMatch::Reserved("then"))?;
        let mut then_branch = Statements::default();
        self.parse_statements(&mut then_branch)?;
        let else_branch = if self.optional(TokenMatch::Reserved("else")) {
            self.advance();
            let mut else_branch = Statements::default();
            self.parse_statements(&mut else_branch)?;
            Some(else_branch)
        } else {
            None
        };
        self.expect(TokenMatch::Reserved("done"))?;
        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    /// Expects the cursor just past `while`.
    pub fn parse_while_statement(&mut self) -> Result<Stmt, Error> {
        let condition = self.parse_expr()?;
        self.expect(TokenMatch::Reserved("do"))?;
        let mut body = Statements::default();
        self.parse_statements(&mut body)?;
        self.expect(TokenMatch::Reserved("done"))?;
        Ok(Stmt::While { condition, body })
    }

    pub fn parse_var_assignment(&mut self) -> Result<Stmt, Error> {
        let name = self.expect(TokenMatch::Category(Category::Id))?;
        self.expect(TokenMatch::Reserved(ASSIGN))?;
        let value = self.parse_expr()?;
        self.expect(TokenMatch::Reserved(";"))?;
        Ok(Stmt::assign(name.value.to_string(), value))
    }

    /// Expects the cursor just past `print`.
    pub fn parse_print_statement(&mut self) -> Result<Stmt, Error> {
        let expr = self.parse_expr()?;
        self.expect(TokenMatch::Reserved(";"))?;
        Ok(Stmt::Print(expr))
    }

    pub fn parse_expression_statement(&mut self) -> Result<Stmt, Error> {
        let expr = self.parse_expr()?;
        self.expect(TokenMatch::Reserved(";"))?;
        Ok(Stmt::Expression(expr))
    }

    /// Converts the longest run of operands and operators at the cursor into
    /// an expression tree, leaving the cursor on the first token that cannot
    /// extend it.
    pub fn parse_expr(&mut self) -> Result<Expr, Error> {
        let mut output: Vec<Token<'de>> = Vec::new();
        let mut operators: Vec<Token<'de>> = Vec::new();
        let mut expect_operand = true;

        loop {
            let token = self.current();
            if token.is_eof() {
                break;
            }
            match token.category {
                Category::Number | Category::Id => {
                    if !expect_operand {
                        break;
                    }
                    output.push(token);
                    expect_operand = false;
                }
                Category::Reserved if token.is_operator() => match token.text() {
                    Some(ASSIGN) => break,
                    Some(OPEN) | Some(NOT) => {
                        if !expect_operand {
                            break;
                        }
                        operators.push(token);
                    }
                    Some(CLOSE) => {
                        if !operators.iter().any(is_open) {
                            break;
                        }
                        if expect_operand {
                            return Err(self.unexpected("expression", &token));
                        }
                        while let Some(top) = operators.pop() {
                            if is_open(&top) {
                                break;
                            }
                            output.push(top);
                        }
                    }
                    _ => {
                        if expect_operand {
                            return Err(self.unexpected("expression", &token));
                        }
                        while let Some(top) = operators.last() {
                            if is_open(top) || token.precedence > top.precedence {
                                break;
                            }
                            output.extend(operators.pop());
                        }
                        operators.push(token);
                        expect_operand = true;
                    }
                },
                Category::Reserved => break,
            }
            self.advance();
        }

        if expect_operand {
            let current = self.current();
            return Err(self.unexpected("expression", &current));
        }
        while let Some(top) = operators.pop() {
            if is_open(&top) {
                return Err(SyntaxError::UnbalancedParenthesis {
                    src: self.source(),
                    bad_bit: top.span,
                }
                .into());
            }
            output.push(top);
        }
        self.create_ast_from_postfix(&output)
    }

    pub fn create_ast_from_postfix(&self, postfix: &[Token<'de>]) -> Result<Expr, Error> {
        let mut stack: Vec<Expr> = Vec::new();
        for token in postfix {
            match token.category {
                Category::Reserved if token.is_operator() => {
                    let operand_2 = stack.pop().ok_or_else(|| self.missing_operand(token))?;
                    let operand_1 = if token.text() == Some(NOT) {
                        None
                    } else {
                        Some(stack.pop().ok_or_else(|| self.missing_operand(token))?)
                    };
                    stack.push(self.create_ast_from_expr(token, operand_2, operand_1)?);
                }
                Category::Number => stack.push(self.number(token)?),
                Category::Id => stack.push(Expr::Variable(token.value.to_string())),
                Category::Reserved => return Err(self.unexpected("operand or operator", token)),
            }
        }
        let root = stack.pop().ok_or_else(|| {
            let current = self.current();
            self.unexpected("expression", &current)
        })?;
        if !stack.is_empty() {
            let current = self.current();
            return Err(self.unexpected("operator", &current));
        }
        Ok(root)
    }

    /// Builds the node for `operator`. `operand_2` is the right-hand side and
    /// `operand_1` the left; `not` takes `operand_2` alone.
    pub fn create_ast_from_expr(
        &self,
        operator: &Token<'de>,
        operand_2: Expr,
        operand_1: Option<Expr>,
    ) -> Result<Expr, Error> {
        let symbol = operator.text().unwrap_or_default();
        let node = match (symbol, operand_1) {
            (NOT, _) => Expr::not(operand_2),
            ("and", Some(left)) => Expr::and(left, operand_2),
            ("or", Some(left)) => Expr::or(left, operand_2),
            (symbol, Some(left)) => {
                if let Some(op) = BinaryOp::from_symbol(symbol) {
                    Expr::binary(op, left, operand_2)
                } else if let Some(op) = RelOp::from_symbol(symbol) {
                    Expr::relational(op, left, operand_2)
                } else {
                    return Err(SyntaxError::InvalidOperator {
                        src: self.source(),
                        bad_bit: operator.span,
                        operator: operator.value.to_string(),
                    }
                    .into());
                }
            }
            (_, None) => return Err(self.missing_operand(operator)),
        };
        Ok(node)
    }

    fn missing_operand(&self, operator: &Token<'_>) -> Error {
        self.unexpected(format_args!("operand for {}", operator.value), operator)
    }

    fn number(&self, token: &Token<'_>) -> Result<Expr, Error> {
        match token.value {
            TokenValue::Int(n) => Ok(Expr::Integer(n)),
            TokenValue::Float(n) => Ok(Expr::Float(n)),
            TokenValue::Text(text) => {
                if let Ok(n) = text.parse() {
                    Ok(Expr::Integer(n))
                } else if let Ok(n) = text.parse() {
                    Ok(Expr::Float(n))
                } else {
                    Err(self.unexpected("number", token))
                }
            }
        }
    }
}

fn is_open(token: &Token<'_>) -> bool {
    token.is_operator() && token.text() == Some(OPEN)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::grammar::Subcategory;

    fn parser(input: &str) -> Parser<'_> {
        Parser::from_source(&Grammar::default(), None, input).unwrap()
    }

    fn parse(input: &str) -> Statements {
        parser(input).parse().unwrap()
    }

    fn expr(input: &str) -> String {
        parser(input).parse_expr().unwrap().to_string()
    }

    fn syntax_error(input: &str) -> String {
        let err = parser(input).parse().unwrap_err();
        assert!(err.downcast_ref::<SyntaxError>().is_some(), "{err:?}");
        err.to_string()
    }

    fn operator(symbol: &str) -> Token<'_> {
        Token::new(
            TokenValue::Text(symbol),
            Category::Reserved,
            Some(Subcategory::Operator),
            0,
        )
    }

    fn int(n: i64) -> Token<'static> {
        Token::new(TokenValue::Int(n), Category::Number, Some(Subcategory::Int), 0)
    }

    #[test]
    fn print_of_sum() {
        assert_eq!(
            parse("print 1 + 1;"),
            Statements::new(vec![Stmt::Print(Expr::binary(
                BinaryOp::Plus,
                Expr::Integer(1),
                Expr::Integer(1)
            ))])
        );
    }

    #[test]
    fn assignment() {
        assert_eq!(
            parse("x := 10;"),
            Statements::new(vec![Stmt::assign("x", Expr::Integer(10))])
        );
    }

    #[test]
    fn found_and_advance() {
        let mut parser = parser("x := 1 + 1;");
        assert!(parser.found(TokenMatch::Category(Category::Id)));
        assert!(parser.found_one_of(&[
            TokenMatch::Category(Category::Id),
            TokenMatch::Category(Category::Reserved)
        ]));
        parser.advance();
        parser.advance();
        assert_eq!(parser.position(), 2);
        assert!(parser.found(TokenMatch::Category(Category::Number)));
        assert_eq!(parser.token_ahead(1).unwrap().value, TokenValue::Text("+"));
    }

    #[test]
    fn expect_consumes_on_match() {
        let mut parser = parser("print 1;");
        let token = parser.expect(TokenMatch::Category(Category::Reserved)).unwrap();
        assert_eq!(token.value, TokenValue::Text("print"));
        assert_eq!(parser.position(), 1);

        let err = parser.expect(TokenMatch::Reserved(";")).unwrap_err();
        assert_eq!(err.to_string(), "expecting ; found 1");
        assert_eq!(parser.position(), 1);

        parser
            .expect_one_of(&[
                TokenMatch::Category(Category::Id),
                TokenMatch::Category(Category::Number),
            ])
            .unwrap();
        let err = parser
            .expect_one_of(&[TokenMatch::Reserved("then"), TokenMatch::Reserved("do")])
            .unwrap_err();
        assert_eq!(err.to_string(), "expecting one of [then, do] found ;");
    }

    #[test]
    fn optional_does_not_consume() {
        let mut parser = parser("if x > 10 then x := 1; else x := 10; done");
        assert!(!parser.optional(TokenMatch::Reserved("else")));
        for _ in 0..9 {
            parser.advance();
        }
        assert!(parser.optional(TokenMatch::Reserved("else")));
        assert_eq!(parser.position(), 9);
    }

    #[test]
    fn if_statement() {
        let mut parser = parser("if x > 22 then\nprint x;\ndone\n");
        parser.advance();
        assert_eq!(
            parser.parse_if_statement().unwrap(),
            Stmt::If {
                condition: Expr::relational(
                    RelOp::Greater,
                    Expr::variable("x"),
                    Expr::Integer(22)
                ),
                then_branch: Statements::new(vec![Stmt::Print(Expr::variable("x"))]),
                else_branch: None,
            }
        );
    }

    #[test]
    fn if_statement_with_else() {
        let mut parser = parser("if x > 22 then\nprint x;\nelse\nprint 0;\ndone\n");
        parser.advance();
        assert_eq!(
            parser.parse_if_statement().unwrap(),
            Stmt::If {
                condition: Expr::relational(
                    RelOp::Greater,
                    Expr::variable("x"),
                    Expr::Integer(22)
                ),
                then_branch: Statements::new(vec![Stmt::Print(Expr::variable("x"))]),
                else_branch: Some(Statements::new(vec![Stmt::Print(Expr::Integer(0))])),
            }
        );
    }

    #[test]
    fn while_statement() {
        let mut parser = parser("while x > 22 do\nprint x;\nx := x - 1;\ndone\n");
        parser.advance();
        assert_eq!(
            parser.parse_while_statement().unwrap(),
            Stmt::While {
                condition: Expr::relational(
                    RelOp::Greater,
                    Expr::variable("x"),
                    Expr::Integer(22)
                ),
                body: Statements::new(vec![
                    Stmt::Print(Expr::variable("x")),
                    Stmt::assign(
                        "x",
                        Expr::binary(BinaryOp::Minus, Expr::variable("x"), Expr::Integer(1))
                    ),
                ]),
            }
        );
    }

    #[test]
    fn nested_blocks() {
        let program = parse(
            "while i < 3 do\n  if i == 1 then print i; else i := i; done\n  i := i + 1;\ndone",
        );
        assert_eq!(
            program.to_string(),
            "(block (while (< i 3) (block (if (== i 1) (block (print i)) (block (:= i i))) (:= i (+ i 1)))))"
        );
    }

    #[test]
    fn expression_statement() {
        assert_eq!(
            parse("x;"),
            Statements::new(vec![Stmt::Expression(Expr::variable("x"))])
        );
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(expr("1 + 2 * 3;"), "(+ 1 (* 2 3))");
        assert_eq!(expr("1 * 2 + 3;"), "(+ (* 1 2) 3)");
        assert_eq!(expr("10 - 4 - 3;"), "(- (- 10 4) 3)");
        assert_eq!(expr("8 / 4 / 2;"), "(/ (/ 8 4) 2)");
        assert_eq!(expr("2 * 7 % 4;"), "(* 2 (% 7 4))");
        assert_eq!(expr("a < b and b < c;"), "(and (< a b) (< b c))");
        assert_eq!(expr("a or b and c;"), "(and (or a b) c)");
    }

    #[test]
    fn prefix_not() {
        assert_eq!(expr("not a;"), "(not a)");
        assert_eq!(expr("not a and b;"), "(and (not a) b)");
        assert_eq!(expr("a and not b;"), "(and a (not b))");
        assert_eq!(expr("not not a;"), "(not (not a))");
        assert_eq!(expr("not a < b;"), "(not (< a b))");
    }

    #[test]
    fn parentheses_group() {
        assert_eq!(expr("(1 + 2) * 3;"), "(* (+ 1 2) 3)");
        assert_eq!(expr("10 - (4 - 3);"), "(- 10 (- 4 3))");
        assert_eq!(expr("((x));"), "x");
        assert_eq!(expr("not (a or b);"), "(not (or a b))");
    }

    #[test]
    fn expression_stops_at_terminators() {
        let mut before_then = parser("x + 1 then");
        assert_eq!(before_then.parse_expr().unwrap().to_string(), "(+ x 1)");
        assert!(before_then.found(TokenMatch::Reserved("then")));

        let mut before_close = parser("x) y");
        assert_eq!(before_close.parse_expr().unwrap().to_string(), "x");
        assert!(before_close.found(TokenMatch::Reserved(")")));
    }

    #[test]
    fn float_literal() {
        assert_eq!(expr("1.5 * 2;"), "(* 1.5 2)");
    }

    #[test]
    fn postfix_operands_keep_their_sides() {
        let parser = parser("");
        let postfix = [int(7), int(2), operator("-")];
        assert_eq!(
            parser.create_ast_from_postfix(&postfix).unwrap(),
            Expr::binary(BinaryOp::Minus, Expr::Integer(7), Expr::Integer(2))
        );
        assert_eq!(
            parser
                .create_ast_from_expr(&operator("+"), Expr::Integer(1), Some(Expr::Integer(2)))
                .unwrap(),
            Expr::binary(BinaryOp::Plus, Expr::Integer(2), Expr::Integer(1))
        );
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let parser = parser("");
        let err = parser
            .create_ast_from_postfix(&[int(1), int(2), operator(":=")])
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid operator :=");
        assert!(matches!(
            err.downcast_ref::<SyntaxError>(),
            Some(SyntaxError::InvalidOperator { .. })
        ));
    }

    #[test]
    fn syntax_errors() {
        assert_eq!(syntax_error("x := 10"), "expecting ; found EOF");
        assert_eq!(syntax_error("print x y;"), "expecting ; found y");
        assert_eq!(syntax_error("print ;"), "expecting expression found ;");
        assert_eq!(syntax_error("print 1 +;"), "expecting expression found ;");
        assert_eq!(syntax_error("x := * 2;"), "expecting expression found *");
        assert_eq!(syntax_error("if x then print x;"), "expecting done found EOF");
        assert_eq!(syntax_error("while x print x; done"), "expecting do found print");
        assert_eq!(syntax_error("1 + 1;"), "expecting statement found 1");
        assert_eq!(syntax_error("else"), "expecting statement found else");
        assert_eq!(syntax_error("print (1 + 2;"), "unbalanced parenthesis");
        assert_eq!(syntax_error("print 1 + 2);"), "expecting ; found )");
    }

    #[test]
    fn expected_help_names_what_was_expected() {
        use miette::Diagnostic;

        let err = parser("1;").parse().unwrap_err();
        let err = err.downcast_ref::<SyntaxError>().unwrap();
        assert_eq!(err.help().unwrap().to_string(), "expected statement here");
    }

    #[test]
    fn syntax_error_reports_line() {
        let err = parser("x := 1;\nprint ;").parse().unwrap_err();
        assert_eq!(err.downcast_ref::<SyntaxError>().unwrap().line(), 2);
    }
}
