use std::fmt::Display;

/// General token category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Id,
    Number,
    Reserved,
}

/// Specific token category, refining [`Category`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subcategory {
    Operator,
    Symbol,
    Statement,
    Int,
    Float,
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Id => write!(f, "ID"),
            Category::Number => write!(f, "NUMBER"),
            Category::Reserved => write!(f, "RESERVED"),
        }
    }
}

impl Display for Subcategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subcategory::Operator => write!(f, "OPERATOR"),
            Subcategory::Symbol => write!(f, "SYMBOL"),
            Subcategory::Statement => write!(f, "STATEMENT"),
            Subcategory::Int => write!(f, "INT"),
            Subcategory::Float => write!(f, "FLOAT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// `[ \t\r\n]+`
    Whitespace,
    /// The marker character up to, but not including, the next newline.
    LineComment(char),
    Exact(&'static str),
    /// Like [`Pattern::Exact`], but never matches a prefix of a longer identifier.
    Keyword(&'static str),
    /// `[A-Za-z_][A-Za-z0-9_]*`
    Identifier,
    /// `[0-9]+`
    Digits,
    /// `[0-9]+\.[0-9]+`
    Decimal,
}

fn is_ident_char(c: char) -> bool {
    matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_')
}

fn digits(rest: &str) -> usize {
    rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len())
}

impl Pattern {
    /// Length in bytes of the match at the start of `rest`, if any.
    ///
    /// Empty matches are reported as no match so the lexer always advances.
    pub fn match_len(&self, rest: &str) -> Option<usize> {
        let len = match *self {
            Pattern::Whitespace => rest
                .find(|c: char| !matches!(c, ' ' | '\t' | '\r' | '\n'))
                .unwrap_or(rest.len()),
            Pattern::LineComment(marker) => {
                if !rest.starts_with(marker) {
                    return None;
                }
                rest.find('\n').unwrap_or(rest.len())
            }
            Pattern::Exact(text) => {
                if !rest.starts_with(text) {
                    return None;
                }
                text.len()
            }
            Pattern::Keyword(text) => {
                if !rest.starts_with(text) {
                    return None;
                }
                if rest[text.len()..].starts_with(is_ident_char) {
                    return None;
                }
                text.len()
            }
            Pattern::Identifier => {
                if !rest.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
                    return None;
                }
                rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len())
            }
            Pattern::Digits => digits(rest),
            Pattern::Decimal => {
                let whole = digits(rest);
                if whole == 0 || !rest[whole..].starts_with('.') {
                    return None;
                }
                let fraction = digits(&rest[whole + 1..]);
                if fraction == 0 {
                    return None;
                }
                whole + 1 + fraction
            }
        };
        (len > 0).then_some(len)
    }
}

/// One row of the token grammar table.
///
/// A rule without a category is matched and then discarded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rule {
    pub pattern: Pattern,
    pub category: Option<Category>,
    pub subcategory: Option<Subcategory>,
    pub precedence: u8,
}

impl Rule {
    pub const fn skip(pattern: Pattern) -> Self {
        Rule {
            pattern,
            category: None,
            subcategory: None,
            precedence: 0,
        }
    }

    pub const fn token(
        pattern: Pattern,
        category: Category,
        subcategory: Option<Subcategory>,
        precedence: u8,
    ) -> Self {
        Rule {
            pattern,
            category: Some(category),
            subcategory,
            precedence,
        }
    }

    const fn symbol(text: &'static str) -> Self {
        Rule::token(
            Pattern::Exact(text),
            Category::Reserved,
            Some(Subcategory::Symbol),
            0,
        )
    }

    const fn operator(text: &'static str, precedence: u8) -> Self {
        Rule::token(
            Pattern::Exact(text),
            Category::Reserved,
            Some(Subcategory::Operator),
            precedence,
        )
    }

    const fn word_operator(text: &'static str, precedence: u8) -> Self {
        Rule::token(
            Pattern::Keyword(text),
            Category::Reserved,
            Some(Subcategory::Operator),
            precedence,
        )
    }

    const fn statement(text: &'static str) -> Self {
        Rule::token(
            Pattern::Keyword(text),
            Category::Reserved,
            Some(Subcategory::Statement),
            0,
        )
    }
}

/// Ordered token grammar. Rules are tried top to bottom and the first match
/// wins, so longer operators must come before their prefixes.
#[derive(Debug, Clone, PartialEq)]
pub struct Grammar {
    rules: Vec<Rule>,
}

impl Grammar {
    pub fn new(rules: Vec<Rule>) -> Self {
        Grammar { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// First rule matching at the start of `rest`, with the match length.
    pub fn find(&self, rest: &str) -> Option<(&Rule, usize)> {
        self.rules
            .iter()
            .find_map(|rule| rule.pattern.match_len(rest).map(|len| (rule, len)))
    }
}

impl Default for Grammar {
    fn default() -> Self {
        Grammar::new(vec![
            Rule::skip(Pattern::Whitespace),
            Rule::skip(Pattern::LineComment('#')),
            Rule::symbol(";"),
            Rule::operator(":=", 0),
            Rule::operator("(", 9),
            Rule::operator(")", 0),
            Rule::operator("+", 2),
            Rule::operator("-", 2),
            Rule::operator("*", 3),
            Rule::operator("/", 3),
            Rule::operator("%", 4),
            Rule::operator("<=", 2),
            Rule::operator("<", 2),
            Rule::operator(">=", 2),
            Rule::operator(">", 2),
            Rule::operator("==", 2),
            Rule::operator("!=", 2),
            Rule::word_operator("and", 1),
            Rule::word_operator("or", 1),
            Rule::word_operator("not", 1),
            Rule::statement("print"),
            Rule::statement("if"),
            Rule::statement("then"),
            Rule::statement("else"),
            Rule::statement("while"),
            Rule::statement("done"),
            Rule::statement("do"),
            Rule::token(
                Pattern::Decimal,
                Category::Number,
                Some(Subcategory::Float),
                0,
            ),
            Rule::token(Pattern::Digits, Category::Number, Some(Subcategory::Int), 0),
            Rule::token(Pattern::Identifier, Category::Id, None, 0),
        ])
    }
}
