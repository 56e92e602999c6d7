//! Boolean expression interpreter for ABAC and conditional policies.
//!
//! A deliberately small language over a fixed set of bound names: no
//! scripting engine, no reflection, no side effects. Supported syntax:
//!
//! ```text
//! expr    := or
//! or      := and ("||" and)*
//! and     := cmp ("&&" cmp)*
//! cmp     := sum (("=="|"!="|"<"|">"|"<="|">="|"contains") sum)?
//! sum     := "!" sum | primary
//! primary := literal | "[" exprs "]" | name ("." name)* | name "(" exprs ")"
//!          | "(" expr ")"
//! ```
//!
//! Literals are single- or double-quoted strings, numbers, `true`, `false`
//! and `null`. Identifier resolution and function calls are delegated to the
//! evaluation scope; the only functions the scope exposes are
//! `hasPermission(resource, action)` and `hasAnyPermission([names])`.

use std::collections::BTreeMap;
use std::fmt;
use std::iter::Peekable;
use thiserror::Error;

/// Runtime value produced while evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Loose equality: numbers compare numerically, everything else by
    /// structure. Values of different types are unequal, never an error.
    fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => (a - b).abs() < f64::EPSILON,
            (a, b) => a == b,
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(_) => write!(f, "{{..}}"),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ExprError {
    #[error("Parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("Unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Member access on {0} requires a map")]
    NotAMap(String),
}

/// Name and function resolution for one evaluation.
pub trait Scope {
    fn lookup(&self, name: &str) -> Option<Value>;

    fn call(&self, name: &str, args: &[Value]) -> Result<Value, ExprError>;
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(f64),
    True,
    False,
    Null,
    Contains,
    EqEq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push((offset, Token::LParen));
            }
            ')' => {
                chars.next();
                tokens.push((offset, Token::RParen));
            }
            '[' => {
                chars.next();
                tokens.push((offset, Token::LBracket));
            }
            ']' => {
                chars.next();
                tokens.push((offset, Token::RBracket));
            }
            ',' => {
                chars.next();
                tokens.push((offset, Token::Comma));
            }
            '.' => {
                chars.next();
                tokens.push((offset, Token::Dot));
            }
            '!' => {
                chars.next();
                if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                    tokens.push((offset, Token::NotEq));
                } else {
                    tokens.push((offset, Token::Bang));
                }
            }
            '=' => {
                chars.next();
                if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                    tokens.push((offset, Token::EqEq));
                } else {
                    return Err(ExprError::Parse {
                        offset,
                        message: "expected '==' but found single '='".to_string(),
                    });
                }
            }
            '<' => {
                chars.next();
                if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                    tokens.push((offset, Token::Le));
                } else {
                    tokens.push((offset, Token::Lt));
                }
            }
            '>' => {
                chars.next();
                if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                    tokens.push((offset, Token::Ge));
                } else {
                    tokens.push((offset, Token::Gt));
                }
            }
            '&' => {
                chars.next();
                if matches!(chars.peek(), Some((_, '&'))) {
                    chars.next();
                    tokens.push((offset, Token::AndAnd));
                } else {
                    return Err(ExprError::Parse {
                        offset,
                        message: "expected '&&'".to_string(),
                    });
                }
            }
            '|' => {
                chars.next();
                if matches!(chars.peek(), Some((_, '|'))) {
                    chars.next();
                    tokens.push((offset, Token::OrOr));
                } else {
                    return Err(ExprError::Parse {
                        offset,
                        message: "expected '||'".to_string(),
                    });
                }
            }
            '\'' | '"' => {
                let quote = ch;
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == quote {
                        closed = true;
                        break;
                    }
                    value.push(c);
                }
                if !closed {
                    return Err(ExprError::Parse {
                        offset,
                        message: "unterminated string literal".to_string(),
                    });
                }
                tokens.push((offset, Token::Str(value)));
            }
            c if c.is_ascii_digit() => {
                let mut literal = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        literal.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number = literal.parse::<f64>().map_err(|_| ExprError::Parse {
                    offset,
                    message: format!("invalid number '{literal}'"),
                })?;
                tokens.push((offset, Token::Number(number)));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let token = match ident.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "contains" => Token::Contains,
                    _ => Token::Ident(ident),
                };
                tokens.push((offset, token));
            }
            _ => {
                return Err(ExprError::Parse {
                    offset,
                    message: format!("unexpected character '{ch}'"),
                });
            }
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    Contains,
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Var(String),
    Member(Box<Expr>, String),
    Call(String, Vec<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Peekable<std::vec::IntoIter<(usize, Token)>>,
    input_len: usize,
}

impl Parser {
    fn new(tokens: Vec<(usize, Token)>, input_len: usize) -> Self {
        Self {
            tokens: tokens.into_iter().peekable(),
            input_len,
        }
    }

    fn error(&mut self, message: impl Into<String>) -> ExprError {
        let offset = self
            .tokens
            .peek()
            .map(|(o, _)| *o)
            .unwrap_or(self.input_len);
        ExprError::Parse {
            offset,
            message: message.into(),
        }
    }

    fn eat(&mut self, expected: &Token) -> Result<(), ExprError> {
        match self.tokens.next() {
            Some((_, token)) if &token == expected => Ok(()),
            Some((offset, token)) => Err(ExprError::Parse {
                offset,
                message: format!("expected {expected:?}, found {token:?}"),
            }),
            None => Err(ExprError::Parse {
                offset: self.input_len,
                message: format!("expected {expected:?}, found end of input"),
            }),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ExprError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        while matches!(self.tokens.peek(), Some((_, Token::OrOr))) {
            self.tokens.next();
            let right = self.parse_and()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_cmp()?;
        while matches!(self.tokens.peek(), Some((_, Token::AndAnd))) {
            self.tokens.next();
            let right = self.parse_cmp()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_cmp(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_unary()?;
        let op = match self.tokens.peek() {
            Some((_, Token::EqEq)) => Some(BinOp::Eq),
            Some((_, Token::NotEq)) => Some(BinOp::Ne),
            Some((_, Token::Lt)) => Some(BinOp::Lt),
            Some((_, Token::Gt)) => Some(BinOp::Gt),
            Some((_, Token::Le)) => Some(BinOp::Le),
            Some((_, Token::Ge)) => Some(BinOp::Ge),
            Some((_, Token::Contains)) => Some(BinOp::Contains),
            _ => None,
        };
        if let Some(op) = op {
            self.tokens.next();
            let right = self.parse_unary()?;
            return Ok(Expr::Binary(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if matches!(self.tokens.peek(), Some((_, Token::Bang))) {
            self.tokens.next();
            let operand = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(operand)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let Some((offset, token)) = self.tokens.next() else {
            return Err(ExprError::Parse {
                offset: self.input_len,
                message: "unexpected end of input".to_string(),
            });
        };

        match token {
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.eat(&Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if matches!(self.tokens.peek(), Some((_, Token::RBracket))) {
                    self.tokens.next();
                    return Ok(Expr::List(items));
                }
                loop {
                    items.push(self.parse_expr()?);
                    match self.tokens.next() {
                        Some((_, Token::Comma)) => continue,
                        Some((_, Token::RBracket)) => break,
                        _ => return Err(self.error("expected ',' or ']' in list")),
                    }
                }
                Ok(Expr::List(items))
            }
            Token::Ident(name) => {
                // Function call or variable with optional member chain.
                if matches!(self.tokens.peek(), Some((_, Token::LParen))) {
                    self.tokens.next();
                    let mut args = Vec::new();
                    if matches!(self.tokens.peek(), Some((_, Token::RParen))) {
                        self.tokens.next();
                    } else {
                        loop {
                            args.push(self.parse_expr()?);
                            match self.tokens.next() {
                                Some((_, Token::Comma)) => continue,
                                Some((_, Token::RParen)) => break,
                                _ => return Err(self.error("expected ',' or ')' in call")),
                            }
                        }
                    }
                    return Ok(Expr::Call(name, args));
                }

                let mut expr = Expr::Var(name);
                while matches!(self.tokens.peek(), Some((_, Token::Dot))) {
                    self.tokens.next();
                    match self.tokens.next() {
                        Some((_, Token::Ident(member))) => {
                            expr = Expr::Member(Box::new(expr), member);
                        }
                        _ => return Err(self.error("expected member name after '.'")),
                    }
                }
                Ok(expr)
            }
            other => Err(ExprError::Parse {
                offset,
                message: format!("unexpected token {other:?}"),
            }),
        }
    }
}

/// A parsed expression, ready to evaluate against a scope.
#[derive(Debug, Clone)]
pub struct Expression {
    root: Expr,
}

impl Expression {
    pub fn parse(input: &str) -> Result<Self, ExprError> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(ExprError::Parse {
                offset: 0,
                message: "empty expression".to_string(),
            });
        }
        let mut parser = Parser::new(tokens, input.len());
        let root = parser.parse_expr()?;
        if let Some((offset, token)) = parser.tokens.next() {
            return Err(ExprError::Parse {
                offset,
                message: format!("trailing input starting at {token:?}"),
            });
        }
        Ok(Self { root })
    }

    /// Evaluate to a boolean. A non-boolean result is a type error, keeping
    /// truthiness coercion out of the policy language.
    pub fn eval_bool(&self, scope: &dyn Scope) -> Result<bool, ExprError> {
        match eval(&self.root, scope)? {
            Value::Bool(b) => Ok(b),
            other => Err(ExprError::TypeMismatch(format!(
                "expression must yield a boolean, got {}",
                other.type_name()
            ))),
        }
    }
}

/// Parse and evaluate in one step.
pub fn evaluate_bool(input: &str, scope: &dyn Scope) -> Result<bool, ExprError> {
    Expression::parse(input)?.eval_bool(scope)
}

fn eval(expr: &Expr, scope: &dyn Scope) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval(item, scope)?);
            }
            Ok(Value::List(values))
        }
        Expr::Var(name) => scope
            .lookup(name)
            .ok_or_else(|| ExprError::UnknownIdentifier(name.clone())),
        Expr::Member(base, member) => match eval(base, scope)? {
            Value::Map(map) => Ok(map.get(member).cloned().unwrap_or(Value::Null)),
            other => Err(ExprError::NotAMap(other.type_name().to_string())),
        },
        Expr::Call(name, args) => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, scope)?);
            }
            scope.call(name, &values)
        }
        Expr::Not(inner) => match eval(inner, scope)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(ExprError::TypeMismatch(format!(
                "'!' requires a boolean, got {}",
                other.type_name()
            ))),
        },
        Expr::Binary(op, left, right) => eval_binary(*op, left, right, scope),
    }
}

fn eval_binary(
    op: BinOp,
    left: &Expr,
    right: &Expr,
    scope: &dyn Scope,
) -> Result<Value, ExprError> {
    // Short-circuiting logical operators evaluate lazily.
    if matches!(op, BinOp::And | BinOp::Or) {
        let lhs = expect_bool(eval(left, scope)?, "logical operator")?;
        return match (op, lhs) {
            (BinOp::And, false) => Ok(Value::Bool(false)),
            (BinOp::Or, true) => Ok(Value::Bool(true)),
            _ => {
                let rhs = expect_bool(eval(right, scope)?, "logical operator")?;
                Ok(Value::Bool(rhs))
            }
        };
    }

    let lhs = eval(left, scope)?;
    let rhs = eval(right, scope)?;

    let result = match op {
        BinOp::Eq => lhs.loose_eq(&rhs),
        BinOp::Ne => !lhs.loose_eq(&rhs),
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
            return compare(op, &lhs, &rhs).map(Value::Bool)
        }
        BinOp::Contains => match (&lhs, &rhs) {
            (Value::List(items), needle) => items.iter().any(|item| item.loose_eq(needle)),
            (Value::Str(haystack), Value::Str(needle)) => haystack.contains(needle.as_str()),
            (l, r) => {
                return Err(ExprError::TypeMismatch(format!(
                    "'contains' requires list or string on the left, got {} contains {}",
                    l.type_name(),
                    r.type_name()
                )))
            }
        },
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    };

    Ok(Value::Bool(result))
}

fn compare(op: BinOp, lhs: &Value, rhs: &Value) -> Result<bool, ExprError> {
    let ordering = match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a
            .partial_cmp(b)
            .ok_or_else(|| ExprError::TypeMismatch("cannot order NaN".to_string()))?,
        (Value::Str(a), Value::Str(b)) => a.cmp(b),
        (l, r) => {
            return Err(ExprError::TypeMismatch(format!(
                "cannot order {} against {}",
                l.type_name(),
                r.type_name()
            )))
        }
    };

    Ok(match op {
        BinOp::Lt => ordering.is_lt(),
        BinOp::Gt => ordering.is_gt(),
        BinOp::Le => ordering.is_le(),
        BinOp::Ge => ordering.is_ge(),
        _ => unreachable!(),
    })
}

fn expect_bool(value: Value, context: &str) -> Result<bool, ExprError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(ExprError::TypeMismatch(format!(
            "{context} requires booleans, got {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestScope;

    impl Scope for TestScope {
        fn lookup(&self, name: &str) -> Option<Value> {
            match name {
                "userId" => Some(Value::Str("u-1".to_string())),
                "hour" => Some(Value::Number(14.0)),
                "dayOfWeek" => Some(Value::Str("MONDAY".to_string())),
                "permissionNames" => Some(Value::List(vec![
                    Value::Str("REPORT:READ".to_string()),
                    Value::Str("DATASET:UPDATE".to_string()),
                ])),
                "attributes" => {
                    let mut map = BTreeMap::new();
                    map.insert("department".to_string(), Value::Str("finance".to_string()));
                    map.insert("clearance".to_string(), Value::Number(3.0));
                    Some(Value::Map(map))
                }
                _ => None,
            }
        }

        fn call(&self, name: &str, args: &[Value]) -> Result<Value, ExprError> {
            match name {
                "hasPermission" => match args {
                    [Value::Str(resource), Value::Str(action)] => Ok(Value::Bool(
                        resource == "REPORT" && action == "READ",
                    )),
                    _ => Err(ExprError::TypeMismatch(
                        "hasPermission takes two strings".to_string(),
                    )),
                },
                _ => Err(ExprError::UnknownFunction(name.to_string())),
            }
        }
    }

    fn eval(input: &str) -> Result<bool, ExprError> {
        evaluate_bool(input, &TestScope)
    }

    #[test]
    fn literals_and_equality() {
        assert!(eval("1 == 1").unwrap());
        assert!(eval("'a' != 'b'").unwrap());
        assert!(eval("true").unwrap());
        assert!(!eval("false").unwrap());
        // Cross-type equality is false, not an error.
        assert!(!eval("1 == 'a'").unwrap());
        assert!(eval("1 != 'a'").unwrap());
    }

    #[test]
    fn numeric_and_string_ordering() {
        assert!(eval("hour >= 9 && hour < 17").unwrap());
        assert!(eval("'alpha' < 'beta'").unwrap());
        assert!(eval("hour > 20").map(|b| !b).unwrap());
    }

    #[test]
    fn logical_operators_and_precedence() {
        assert!(eval("hour > 9 && hour < 17 || dayOfWeek == 'SUNDAY'").unwrap());
        assert!(eval("!(hour > 20) && true").unwrap());
        // && binds tighter than ||.
        assert!(eval("false && false || true").unwrap());
    }

    #[test]
    fn short_circuit_skips_rhs_errors() {
        assert!(!eval("false && missingName == 1").unwrap());
        assert!(eval("true || missingName == 1").unwrap());
    }

    #[test]
    fn member_access_on_attributes() {
        assert!(eval("attributes.department == 'finance'").unwrap());
        assert!(eval("attributes.clearance >= 3").unwrap());
        // Missing member is null, not an error.
        assert!(eval("attributes.missing == null").unwrap());
    }

    #[test]
    fn contains_over_lists_and_strings() {
        assert!(eval("permissionNames contains 'REPORT:READ'").unwrap());
        assert!(!eval("permissionNames contains 'REPORT:DELETE'").unwrap());
        assert!(eval("'MONDAY' contains 'MON'").unwrap());
        assert!(eval("['MON','TUE'] contains dayOfWeek").map(|b| !b).unwrap());
    }

    #[test]
    fn helper_function_calls() {
        assert!(eval("hasPermission('REPORT', 'READ')").unwrap());
        assert!(!eval("hasPermission('REPORT', 'DELETE')").unwrap());
        assert_eq!(
            eval("nosuch(1)"),
            Err(ExprError::UnknownFunction("nosuch".to_string()))
        );
    }

    #[test]
    fn unknown_identifier_is_an_error() {
        assert_eq!(
            eval("nope == 1"),
            Err(ExprError::UnknownIdentifier("nope".to_string()))
        );
    }

    #[test]
    fn non_boolean_result_is_an_error() {
        assert!(matches!(eval("hour"), Err(ExprError::TypeMismatch(_))));
        assert!(matches!(eval("'abc'"), Err(ExprError::TypeMismatch(_))));
    }

    #[test]
    fn parse_errors_are_reported() {
        assert!(matches!(eval("hour = 1"), Err(ExprError::Parse { .. })));
        assert!(matches!(eval("(hour > 1"), Err(ExprError::Parse { .. })));
        assert!(matches!(eval("'unterminated"), Err(ExprError::Parse { .. })));
        assert!(matches!(eval(""), Err(ExprError::Parse { .. })));
        assert!(matches!(eval("1 2"), Err(ExprError::Parse { .. })));
    }

    #[test]
    fn member_access_requires_a_map() {
        assert!(matches!(eval("userId.foo == 1"), Err(ExprError::NotAMap(_))));
    }
}
