//! Explicit predicate language for step conditions
//!
//! Conditions are parsed to this AST at step construction time; a condition
//! that doesn't parse fails validation of the whole workflow definition
//! before anything runs. There is no `eval` fallback.
//!
//! Grammar:
//! ```text
//! expr       := or_expr
//! or_expr    := and_expr ("or" and_expr)*
//! and_expr   := unary ("and" unary)*
//! unary      := "not" unary | atom
//! atom       := "(" expr ")" | comparison | named_predicate
//! comparison := path op rhs
//! op         := "==" | "!=" | "<" | "<=" | ">" | ">=" | "in" | "not-in"
//! named_predicate := name "(" path ["," literal] ")"
//! ```

use std::collections::BTreeMap;
use std::fmt;

use super::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Comparison {
        path: String,
        op: CompareOp,
        rhs: Literal,
    },
    Named {
        name: String,
        path: String,
        arg: Option<Literal>,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    String(String),
    Bool(bool),
    List(Vec<Literal>),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PredicateParseError {
    #[error("unexpected end of condition")]
    UnexpectedEnd,
    #[error("unexpected token: {0}")]
    UnexpectedToken(String),
    #[error("unknown predicate: {0}")]
    UnknownPredicate(String),
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Predicate {
    /// Parse a condition string into an AST. Fails closed: anything that
    /// doesn't fully consume the input is a parse error.
    pub fn parse(input: &str) -> Result<Predicate, PredicateParseError> {
        let tokens = tokenize(input);
        let mut parser = Parser { tokens, pos: 0 };
        let predicate = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(PredicateParseError::UnexpectedToken(
                parser.tokens[parser.pos].clone(),
            ));
        }
        Ok(predicate)
    }

    /// Evaluate the predicate against the current execution context
    /// (step id -> output map). Named predicates / comparisons that
    /// reference a missing path evaluate to `false` rather than erroring.
    pub fn evaluate(&self, context: &BTreeMap<String, Value>) -> bool {
        match self {
            Predicate::And(a, b) => a.evaluate(context) && b.evaluate(context),
            Predicate::Or(a, b) => a.evaluate(context) || b.evaluate(context),
            Predicate::Not(inner) => !inner.evaluate(context),
            Predicate::Comparison { path, op, rhs } => {
                let Some(value) = resolve_path(path, context) else {
                    return matches!(op, CompareOp::NotIn);
                };
                compare(&value, *op, rhs)
            }
            Predicate::Named { name, path, arg } => {
                let value = resolve_path(path, context);
                evaluate_named(name, value.as_ref(), arg.as_ref())
            }
        }
    }
}

fn resolve_path(path: &str, context: &BTreeMap<String, Value>) -> Option<Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = context.get(first)?.clone();
    for part in parts {
        current = current.get(part)?.clone();
    }
    Some(current)
}

fn evaluate_named(name: &str, value: Option<&Value>, arg: Option<&Literal>) -> bool {
    match name {
        "exists" => value.is_some(),
        "not_exists" => value.is_none(),
        "is_empty" => value.map(Value::is_empty).unwrap_or(true),
        "is_number" => matches!(value, Some(Value::Number(_))),
        "is_string" => matches!(value, Some(Value::String(_))),
        "contains" => match (value, arg) {
            (Some(Value::String(s)), Some(Literal::String(needle))) => s.contains(needle.as_str()),
            (Some(Value::List(items)), Some(lit)) => items.iter().any(|v| literal_eq(v, lit)),
            _ => false,
        },
        "starts_with" => matches!((value, arg), (Some(Value::String(s)), Some(Literal::String(p))) if s.starts_with(p.as_str())),
        "ends_with" => matches!((value, arg), (Some(Value::String(s)), Some(Literal::String(p))) if s.ends_with(p.as_str())),
        "matches" => match (value, arg) {
            (Some(Value::String(s)), Some(Literal::String(pattern))) => {
                regex::Regex::new(pattern).map(|re| re.is_match(s)).unwrap_or(false)
            }
            _ => false,
        },
        _ => false,
    }
}

fn literal_eq(value: &Value, lit: &Literal) -> bool {
    match (value, lit) {
        (Value::String(s), Literal::String(l)) => s == l,
        (Value::Number(n), Literal::Number(l)) => (n - l).abs() < f64::EPSILON,
        (Value::Bool(b), Literal::Bool(l)) => b == l,
        _ => false,
    }
}

fn compare(value: &Value, op: CompareOp, rhs: &Literal) -> bool {
    match op {
        CompareOp::Eq => literal_eq(value, rhs),
        CompareOp::Ne => !literal_eq(value, rhs),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            let (Value::Number(a), Literal::Number(b)) = (value, rhs) else {
                return false;
            };
            match op {
                CompareOp::Lt => a < b,
                CompareOp::Le => a <= b,
                CompareOp::Gt => a > b,
                CompareOp::Ge => a >= b,
                _ => unreachable!(),
            }
        }
        CompareOp::In => {
            let Literal::List(items) = rhs else { return false };
            items.iter().any(|l| literal_eq(value, l))
        }
        CompareOp::NotIn => {
            let Literal::List(items) = rhs else { return true };
            !items.iter().any(|l| literal_eq(value, l))
        }
    }
}

fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '(' || c == ')' || c == ',' || c == '[' || c == ']' {
            tokens.push(c.to_string());
            i += 1;
            continue;
        }
        if "=!<>".contains(c) {
            let mut op = c.to_string();
            if i + 1 < chars.len() && chars[i + 1] == '=' {
                op.push('=');
                i += 2;
            } else {
                i += 1;
            }
            tokens.push(op);
            continue;
        }
        if c == '\'' || c == '"' {
            let quote = c;
            let mut s = String::new();
            i += 1;
            while i < chars.len() && chars[i] != quote {
                s.push(chars[i]);
                i += 1;
            }
            i += 1;
            tokens.push(format!("\"{}\"", s));
            continue;
        }
        let mut tok = String::new();
        while i < chars.len() && !chars[i].is_whitespace() && !"(),[]".contains(chars[i]) {
            tok.push(chars[i]);
            i += 1;
        }
        tokens.push(tok);
    }
    tokens
}

struct Parser {
    tokens: Vec<String>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn next(&mut self) -> Option<String> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, expected: &str) -> Result<(), PredicateParseError> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(PredicateParseError::UnexpectedToken(t)),
            None => Err(PredicateParseError::UnexpectedEnd),
        }
    }

    fn parse_or(&mut self) -> Result<Predicate, PredicateParseError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some("or") {
            self.next();
            let right = self.parse_and()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Predicate, PredicateParseError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some("and") {
            self.next();
            let right = self.parse_unary()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Predicate, PredicateParseError> {
        if self.peek() == Some("not") {
            self.next();
            return Ok(Predicate::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Predicate, PredicateParseError> {
        if self.peek() == Some("(") {
            self.next();
            let inner = self.parse_or()?;
            self.expect(")")?;
            return Ok(inner);
        }

        let head = self.next().ok_or(PredicateParseError::UnexpectedEnd)?;

        if self.peek() == Some("(") {
            // named_predicate: name(path[, literal])
            self.next();
            let path = self.next().ok_or(PredicateParseError::UnexpectedEnd)?;
            let arg = if self.peek() == Some(",") {
                self.next();
                Some(self.parse_literal()?)
            } else {
                None
            };
            self.expect(")")?;
            if !KNOWN_PREDICATES.contains(&head.as_str()) {
                return Err(PredicateParseError::UnknownPredicate(head));
            }
            return Ok(Predicate::Named {
                name: head,
                path,
                arg,
            });
        }

        // comparison: path op rhs
        let op_tok = self.next().ok_or(PredicateParseError::UnexpectedEnd)?;
        let op = parse_op(&op_tok)?;
        let rhs = if op == CompareOp::In || op == CompareOp::NotIn {
            self.parse_list()?
        } else {
            self.parse_literal()?
        };
        Ok(Predicate::Comparison {
            path: head,
            op,
            rhs,
        })
    }

    fn parse_list(&mut self) -> Result<Literal, PredicateParseError> {
        self.expect("[")?;
        let mut items = Vec::new();
        while self.peek() != Some("]") {
            items.push(self.parse_literal()?);
            if self.peek() == Some(",") {
                self.next();
            }
        }
        self.expect("]")?;
        Ok(Literal::List(items))
    }

    fn parse_literal(&mut self) -> Result<Literal, PredicateParseError> {
        if self.peek() == Some("[") {
            return self.parse_list();
        }
        let tok = self.next().ok_or(PredicateParseError::UnexpectedEnd)?;
        if let Some(stripped) = tok.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
            return Ok(Literal::String(stripped.to_string()));
        }
        if tok == "true" {
            return Ok(Literal::Bool(true));
        }
        if tok == "false" {
            return Ok(Literal::Bool(false));
        }
        if let Ok(n) = tok.parse::<f64>() {
            return Ok(Literal::Number(n));
        }
        Ok(Literal::String(tok))
    }
}

fn parse_op(tok: &str) -> Result<CompareOp, PredicateParseError> {
    match tok {
        "==" => Ok(CompareOp::Eq),
        "!=" => Ok(CompareOp::Ne),
        "<" => Ok(CompareOp::Lt),
        "<=" => Ok(CompareOp::Le),
        ">" => Ok(CompareOp::Gt),
        ">=" => Ok(CompareOp::Ge),
        "in" => Ok(CompareOp::In),
        "not-in" => Ok(CompareOp::NotIn),
        other => Err(PredicateParseError::UnexpectedToken(other.to_string())),
    }
}

const KNOWN_PREDICATES: &[&str] = &[
    "exists",
    "not_exists",
    "contains",
    "starts_with",
    "ends_with",
    "is_number",
    "is_string",
    "is_empty",
    "matches",
];

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with(step: &str, key: &str, value: Value) -> BTreeMap<String, Value> {
        let mut inner = BTreeMap::new();
        inner.insert(key.to_string(), value);
        let mut context = BTreeMap::new();
        context.insert(step.to_string(), Value::Map(inner));
        context
    }

    #[test]
    fn parses_and_evaluates_simple_comparison() {
        let predicate = Predicate::parse("step1.count > 3").unwrap();
        assert!(predicate.evaluate(&ctx_with("step1", "count", Value::Number(5.0))));
        assert!(!predicate.evaluate(&ctx_with("step1", "count", Value::Number(1.0))));
    }

    #[test]
    fn parses_named_predicate_exists() {
        let predicate = Predicate::parse("exists(step1.path)").unwrap();
        assert!(predicate.evaluate(&ctx_with("step1", "path", Value::String("x".into()))));
        assert!(!predicate.evaluate(&BTreeMap::new()));
    }

    #[test]
    fn parses_logical_combination_with_parens() {
        let predicate =
            Predicate::parse("(step1.ok == true) and not (step1.count < 1)").unwrap();
        let mut inner = BTreeMap::new();
        inner.insert("ok".to_string(), Value::Bool(true));
        inner.insert("count".to_string(), Value::Number(2.0));
        let mut context = BTreeMap::new();
        context.insert("step1".to_string(), Value::Map(inner));
        assert!(predicate.evaluate(&context));
    }

    #[test]
    fn rejects_unknown_named_predicate() {
        let err = Predicate::parse("bogus(step1.x)").unwrap_err();
        assert!(matches!(err, PredicateParseError::UnknownPredicate(_)));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(Predicate::parse("step1.x == 1 extra").is_err());
    }

    #[test]
    fn matches_predicate_uses_regex() {
        let predicate = Predicate::parse("matches(step1.name, \"^foo.*\")").unwrap();
        assert!(predicate.evaluate(&ctx_with("step1", "name", Value::String("foobar".into()))));
        assert!(!predicate.evaluate(&ctx_with("step1", "name", Value::String("barfoo".into()))));
    }

    #[test]
    fn in_operator_checks_list_membership() {
        let predicate = Predicate::parse("step1.status in [\"ok\", \"done\"]").unwrap();
        assert!(predicate.evaluate(&ctx_with("step1", "status", Value::String("done".into()))));
        assert!(!predicate.evaluate(&ctx_with("step1", "status", Value::String("failed".into()))));
    }
}
