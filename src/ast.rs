use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    EqualEqual,
    BangEqual,
}

impl BinaryOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => BinaryOp::Plus,
            "-" => BinaryOp::Minus,
            "*" => BinaryOp::Star,
            "/" => BinaryOp::Slash,
            "%" => BinaryOp::Percent,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Star => "*",
            BinaryOp::Slash => "/",
            BinaryOp::Percent => "%",
        }
    }
}

impl RelOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "<" => RelOp::Less,
            "<=" => RelOp::LessEqual,
            ">" => RelOp::Greater,
            ">=" => RelOp::GreaterEqual,
            "==" => RelOp::EqualEqual,
            "!=" => RelOp::BangEqual,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            RelOp::Less => "<",
            RelOp::LessEqual => "<=",
            RelOp::Greater => ">",
            RelOp::GreaterEqual => ">=",
            RelOp::EqualEqual => "==",
            RelOp::BangEqual => "!=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Integer(i64),
    Float(f64),
    Variable(String),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Relational {
        op: RelOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn variable(name: impl Into<String>) -> Self {
        Expr::Variable(name.into())
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn relational(op: RelOp, left: Expr, right: Expr) -> Self {
        Expr::Relational {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        Expr::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Expr, right: Expr) -> Self {
        Expr::Or(Box::new(left), Box::new(right))
    }

    pub fn not(expr: Expr) -> Self {
        Expr::Not(Box::new(expr))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign {
        name: String,
        value: Expr,
    },
    If {
        condition: Expr,
        then_branch: Statements,
        else_branch: Option<Statements>,
    },
    While {
        condition: Expr,
        body: Statements,
    },
    Print(Expr),
    Expression(Expr),
}

impl Stmt {
    pub fn assign(name: impl Into<String>, value: Expr) -> Self {
        Stmt::Assign {
            name: name.into(),
            value,
        }
    }
}

/// An ordered block of statements: the program root and every nested body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statements {
    nodes: Vec<Stmt>,
}

impl Statements {
    pub fn new(nodes: Vec<Stmt>) -> Self {
        Statements { nodes }
    }

    pub fn push(&mut self, node: Stmt) {
        self.nodes.push(node);
    }

    pub fn nodes(&self) -> &[Stmt] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Stmt> {
        self.nodes.iter()
    }
}

impl<'a> IntoIterator for &'a Statements {
    type Item = &'a Stmt;
    type IntoIter = std::slice::Iter<'a, Stmt>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}

impl FromIterator<Stmt> for Statements {
    fn from_iter<T: IntoIterator<Item = Stmt>>(iter: T) -> Self {
        Statements::new(iter.into_iter().collect())
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Integer(n) => write!(f, "{n}"),
            Expr::Float(n) => write!(f, "{n:?}"),
            Expr::Variable(name) => write!(f, "{name}"),
            Expr::Binary { op, left, right } => write!(f, "({} {left} {right})", op.symbol()),
            Expr::Relational { op, left, right } => {
                write!(f, "({} {left} {right})", op.symbol())
            }
            Expr::And(left, right) => write!(f, "(and {left} {right})"),
            Expr::Or(left, right) => write!(f, "(or {left} {right})"),
            Expr::Not(expr) => write!(f, "(not {expr})"),
        }
    }
}

impl Display for Stmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stmt::Assign { name, value } => write!(f, "(:= {name} {value})"),
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                write!(f, "(if {condition} {then_branch}")?;
                if let Some(else_branch) = else_branch {
                    write!(f, " {else_branch}")?;
                }
                write!(f, ")")
            }
            Stmt::While { condition, body } => write!(f, "(while {condition} {body})"),
            Stmt::Print(expr) => write!(f, "(print {expr})"),
            Stmt::Expression(expr) => write!(f, "{expr}"),
        }
    }
}

impl Display for Statements {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(block")?;
        for node in &self.nodes {
            write!(f, " {node}")?;
        }
        write!(f, ")")
    }
}
