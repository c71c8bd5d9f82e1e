use std::{
    collections::{HashMap, hash_map},
    fmt::Display,
    io::{self, Stdout, Write},
};

use miette::{Diagnostic, Error};
use thiserror::Error;

use crate::ast::{BinaryOp, Expr, RelOp, Statements, Stmt};

#[derive(Error, Debug, Diagnostic)]
pub enum RuntimeError {
    #[error("Variable {name} is not defined")]
    #[diagnostic(
        code(vsi::eval::undefined_variable),
        help("assign `{name}` with `{name} := ...;` before reading it")
    )]
    UndefinedVariable { name: String },

    #[error("division by zero")]
    #[diagnostic(code(vsi::eval::division_by_zero))]
    DivisionByZero,

    #[error("integer overflow in `{operator}`")]
    #[diagnostic(code(vsi::eval::integer_overflow))]
    IntegerOverflow { operator: &'static str },

    #[error("failed to write output")]
    #[diagnostic(code(vsi::eval::output))]
    Output(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Value {
    pub fn is_truthy(self) -> bool {
        match self {
            Value::Int(n) => n != 0,
            Value::Float(n) => n != 0.0,
            Value::Bool(b) => b,
        }
    }

    fn promote(self) -> Number {
        match self {
            Value::Int(n) => Number::Int(n),
            Value::Float(n) => Number::Float(n),
            Value::Bool(b) => Number::Int(i64::from(b)),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => {
                if n.is_finite() && *n == n.trunc() {
                    write!(f, "{n}.0")
                } else {
                    write!(f, "{n}")
                }
            }
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Operands after numeric promotion: both ints, or both floats.
enum Operands {
    Int(i64, i64),
    Float(f64, f64),
}

enum Number {
    Int(i64),
    Float(f64),
}

impl Operands {
    fn new(lhs: Value, rhs: Value) -> Self {
        match (lhs.promote(), rhs.promote()) {
            (Number::Int(lhs), Number::Int(rhs)) => Operands::Int(lhs, rhs),
            (Number::Int(lhs), Number::Float(rhs)) => Operands::Float(lhs as f64, rhs),
            (Number::Float(lhs), Number::Int(rhs)) => Operands::Float(lhs, rhs as f64),
            (Number::Float(lhs), Number::Float(rhs)) => Operands::Float(lhs, rhs),
        }
    }
}

pub fn arithmetic(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, RuntimeError> {
    let overflow = || RuntimeError::IntegerOverflow {
        operator: op.symbol(),
    };
    Ok(match Operands::new(lhs, rhs) {
        Operands::Int(lhs, rhs) => Value::Int(match op {
            BinaryOp::Plus => lhs.checked_add(rhs).ok_or_else(overflow)?,
            BinaryOp::Minus => lhs.checked_sub(rhs).ok_or_else(overflow)?,
            BinaryOp::Star => lhs.checked_mul(rhs).ok_or_else(overflow)?,
            BinaryOp::Slash | BinaryOp::Percent if rhs == 0 => {
                return Err(RuntimeError::DivisionByZero);
            }
            BinaryOp::Slash => lhs.checked_div(rhs).ok_or_else(overflow)?,
            BinaryOp::Percent => {
                let rem = lhs.wrapping_rem(rhs);
                if rem != 0 && (rem < 0) != (rhs < 0) {
                    rem + rhs
                } else {
                    rem
                }
            }
        }),
        Operands::Float(lhs, rhs) => Value::Float(match op {
            BinaryOp::Plus => lhs + rhs,
            BinaryOp::Minus => lhs - rhs,
            BinaryOp::Star => lhs * rhs,
            BinaryOp::Slash | BinaryOp::Percent if rhs == 0.0 => {
                return Err(RuntimeError::DivisionByZero);
            }
            BinaryOp::Slash => lhs / rhs,
            BinaryOp::Percent => {
                let rem = lhs % rhs;
                if rem != 0.0 && (rem < 0.0) != (rhs < 0.0) {
                    rem + rhs
                } else {
                    rem
                }
            }
        }),
    })
}

pub fn compare(op: RelOp, lhs: Value, rhs: Value) -> Value {
    fn apply<T: PartialOrd>(op: RelOp, lhs: T, rhs: T) -> bool {
        match op {
            RelOp::Less => lhs < rhs,
            RelOp::LessEqual => lhs <= rhs,
            RelOp::Greater => lhs > rhs,
            RelOp::GreaterEqual => lhs >= rhs,
            RelOp::EqualEqual => lhs == rhs,
            RelOp::BangEqual => lhs != rhs,
        }
    }
    Value::Bool(match Operands::new(lhs, rhs) {
        Operands::Int(lhs, rhs) => apply(op, lhs, rhs),
        Operands::Float(lhs, rhs) => apply(op, lhs, rhs),
    })
}

/// Variable bindings for one program run. Callers can pass one in and read
/// it back afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    values: HashMap<String, Value>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Binds `name`, replacing any previous value.
    pub fn assign(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, Value> {
        self.values.iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Environment {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut environment = Environment::new();
        for (name, value) in iter {
            environment.assign(name, value);
        }
        environment
    }
}

impl Expr {
    /// Evaluates the expression against `env`. Both sides of `and`/`or` are
    /// always evaluated.
    pub fn evaluate(&self, env: &Environment) -> Result<Value, RuntimeError> {
        Ok(match self {
            Expr::Integer(n) => Value::Int(*n),
            Expr::Float(n) => Value::Float(*n),
            Expr::Variable(name) => {
                env.get(name)
                    .ok_or_else(|| RuntimeError::UndefinedVariable { name: name.clone() })?
            }
            Expr::Binary { op, left, right } => {
                let lhs = left.evaluate(env)?;
                let rhs = right.evaluate(env)?;
                arithmetic(*op, lhs, rhs)?
            }
            Expr::Relational { op, left, right } => {
                let lhs = left.evaluate(env)?;
                let rhs = right.evaluate(env)?;
                compare(*op, lhs, rhs)
            }
            Expr::And(left, right) => {
                let lhs = left.evaluate(env)?;
                let rhs = right.evaluate(env)?;
                if lhs.is_truthy() { rhs } else { lhs }
            }
            Expr::Or(left, right) => {
                let lhs = left.evaluate(env)?;
                let rhs = right.evaluate(env)?;
                if lhs.is_truthy() { lhs } else { rhs }
            }
            Expr::Not(expr) => Value::Bool(!expr.evaluate(env)?.is_truthy()),
        })
    }
}

/// Walks a program, mutating `environment` and writing `print` output to `out`.
pub struct Interpreter<'env, W = Stdout> {
    environment: &'env mut Environment,
    out: W,
}

impl<'env> Interpreter<'env> {
    pub fn new(environment: &'env mut Environment) -> Self {
        Interpreter::with_output(environment, io::stdout())
    }
}

impl<'env, W: Write> Interpreter<'env, W> {
    pub fn with_output(environment: &'env mut Environment, out: W) -> Self {
        Interpreter { environment, out }
    }

    pub fn environment(&self) -> &Environment {
        self.environment
    }

    pub fn into_output(self) -> W {
        self.out
    }

    #[tracing::instrument(level = "debug", skip_all, fields(statements = program.len()))]
    pub fn interpret(&mut self, program: &Statements) -> Result<(), Error> {
        self.execute_block(program)?;
        self.out.flush().map_err(RuntimeError::from)?;
        tracing::debug!(bindings = self.environment.len(), "program finished");
        Ok(())
    }

    pub fn eval_expression(&self, expr: &Expr) -> Result<Value, Error> {
        Ok(expr.evaluate(self.environment)?)
    }

    fn execute_block(&mut self, block: &Statements) -> Result<(), RuntimeError> {
        for statement in block {
            self.execute(statement)?;
        }
        Ok(())
    }

    fn execute(&mut self, statement: &Stmt) -> Result<(), RuntimeError> {
        tracing::trace!(%statement, "execute");
        match statement {
            Stmt::Assign { name, value } => {
                let value = value.evaluate(self.environment)?;
                self.environment.assign(name.as_str(), value);
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if condition.evaluate(self.environment)?.is_truthy() {
                    self.execute_block(then_branch)?;
                } else if let Some(else_branch) = else_branch {
                    self.execute_block(else_branch)?;
                }
            }
            Stmt::While { condition, body } => {
                while condition.evaluate(self.environment)?.is_truthy() {
                    self.execute_block(body)?;
                }
            }
            Stmt::Print(expr) => {
                let value = expr.evaluate(self.environment)?;
                writeln!(self.out, "{value}")?;
            }
            Stmt::Expression(expr) => {
                expr.evaluate(self.environment)?;
            }
        }
        Ok(())
    }
}
