//! Inline expressions.
//!
//! Two uses:
//!
//! - **Data node lists**: `ds_${0..1}.t_order_${0..3}` expands to the
//!   Cartesian product of every placeholder, first placeholder varying
//!   slowest. Placeholders hold an integer range `a..b`, a list
//!   `['x', 'y']`, or a single literal. Top-level commas separate
//!   independent segments.
//! - **Sharding templates**: `t_order_${order_id % 4}` is evaluated per
//!   sharding value. Placeholders hold integer arithmetic (`+ - * / %`,
//!   parentheses, unary minus) over literals and column names.
//!
//! `$->{...}` is accepted as an alias of `${...}`.

use std::fmt;

use kestrel_common::datum::Datum;
use kestrel_common::error::ConfigError;

/// Expand a data node expression into its concrete strings.
pub fn expand(expression: &str) -> Result<Vec<String>, ConfigError> {
    let mut out = Vec::new();
    for segment in split_top_level(expression) {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let parts = split_placeholders(segment).map_err(|reason| invalid(expression, reason))?;
        let mut acc = vec![String::new()];
        for part in parts {
            let choices = match part {
                RawPart::Text(t) => vec![t],
                RawPart::Placeholder(p) => {
                    expand_placeholder(&p).map_err(|reason| invalid(expression, reason))?
                }
            };
            let mut next = Vec::with_capacity(acc.len() * choices.len());
            for prefix in &acc {
                for choice in &choices {
                    next.push(format!("{}{}", prefix, choice));
                }
            }
            acc = next;
        }
        out.extend(acc);
    }
    if out.is_empty() {
        return Err(invalid(expression, "expression expands to nothing".into()));
    }
    Ok(out)
}

fn invalid(expression: &str, reason: String) -> ConfigError {
    ConfigError::InvalidInlineExpression {
        expression: expression.to_string(),
        reason,
    }
}

fn expand_placeholder(body: &str) -> Result<Vec<String>, String> {
    let body = body.trim();
    if let Some(inner) = body.strip_prefix('[').and_then(|b| b.strip_suffix(']')) {
        return Ok(inner
            .split(',')
            .map(|s| unquote(s.trim()).to_string())
            .filter(|s| !s.is_empty())
            .collect());
    }
    if let Some((lo, hi)) = body.split_once("..") {
        let (lo, hi) = (lo.trim(), hi.trim());
        let start: i64 = lo.parse().map_err(|_| format!("bad range start '{}'", lo))?;
        let end: i64 = hi.parse().map_err(|_| format!("bad range end '{}'", hi))?;
        if start > end {
            return Err(format!("empty range {}..{}", start, end));
        }
        // `00..15` keeps the zero padding of the lower bound.
        let width = if lo.len() > 1 && lo.starts_with('0') { lo.len() } else { 0 };
        return Ok((start..=end)
            .map(|v| format!("{:0width$}", v, width = width))
            .collect());
    }
    Ok(vec![unquote(body).to_string()])
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| s.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
        .unwrap_or(s)
}

fn split_top_level(expression: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in expression.char_indices() {
        match c {
            '{' | '[' => depth += 1,
            '}' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                out.push(&expression[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&expression[start..]);
    out
}

enum RawPart {
    Text(String),
    Placeholder(String),
}

fn split_placeholders(text: &str) -> Result<Vec<RawPart>, String> {
    let mut parts = Vec::new();
    let mut rest = text;
    loop {
        let open = match (rest.find("${"), rest.find("$->{")) {
            (Some(a), Some(b)) if b < a => Some((b, 4)),
            (Some(a), _) => Some((a, 2)),
            (None, Some(b)) => Some((b, 4)),
            (None, None) => None,
        };
        let Some((pos, skip)) = open else {
            if !rest.is_empty() {
                parts.push(RawPart::Text(rest.to_string()));
            }
            return Ok(parts);
        };
        if pos > 0 {
            parts.push(RawPart::Text(rest[..pos].to_string()));
        }
        let body_start = pos + skip;
        let close = rest[body_start..]
            .find('}')
            .ok_or_else(|| "unterminated placeholder".to_string())?;
        parts.push(RawPart::Placeholder(
            rest[body_start..body_start + close].to_string(),
        ));
        rest = &rest[body_start + close + 1..];
    }
}

// ---------------------------------------------------------------------------
// Sharding templates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Int(i64),
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Lit(Value),
    Var(String),
    Neg(Box<Expr>),
    Bin(Box<Expr>, Op, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Text(String),
    Expr(Expr),
}

/// A parsed sharding template such as `t_order_${order_id % 2}`.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineTemplate {
    source: String,
    parts: Vec<Part>,
}

impl InlineTemplate {
    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        let raw = split_placeholders(source).map_err(|reason| invalid(source, reason))?;
        let mut parts = Vec::with_capacity(raw.len());
        for part in raw {
            match part {
                RawPart::Text(t) => parts.push(Part::Text(t)),
                RawPart::Placeholder(body) => {
                    let mut parser = ExprParser::new(&body);
                    let expr = parser.parse_expr().map_err(|reason| invalid(source, reason))?;
                    if !parser.at_end() {
                        return Err(invalid(source, format!("trailing input in '{}'", body)));
                    }
                    parts.push(Part::Expr(expr));
                }
            }
        }
        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Column names referenced by the template, in first-use order.
    pub fn variables(&self) -> Vec<String> {
        fn walk(expr: &Expr, out: &mut Vec<String>) {
            match expr {
                Expr::Var(v) => {
                    if !out.contains(v) {
                        out.push(v.clone());
                    }
                }
                Expr::Neg(e) => walk(e, out),
                Expr::Bin(l, _, r) => {
                    walk(l, out);
                    walk(r, out);
                }
                Expr::Lit(_) => {}
            }
        }
        let mut out = Vec::new();
        for part in &self.parts {
            if let Part::Expr(e) = part {
                walk(e, &mut out);
            }
        }
        out
    }

    /// Render with `lookup` supplying column values (case-insensitive names).
    pub fn evaluate<F>(&self, lookup: F) -> Result<String, String>
    where
        F: Fn(&str) -> Option<Datum>,
    {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(t) => out.push_str(t),
                Part::Expr(e) => out.push_str(&eval(e, &lookup)?.to_string()),
            }
        }
        Ok(out)
    }
}

fn eval<F>(expr: &Expr, lookup: &F) -> Result<Value, String>
where
    F: Fn(&str) -> Option<Datum>,
{
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Var(name) => {
            let datum = lookup(name).ok_or_else(|| format!("no value for '{}'", name))?;
            Ok(match datum.as_i64() {
                Some(i) if !matches!(datum, Datum::Text(_)) => Value::Int(i),
                _ => Value::Str(datum.to_string()),
            })
        }
        Expr::Neg(inner) => match eval(inner, lookup)? {
            Value::Int(v) => Ok(Value::Int(-v)),
            Value::Str(s) => Err(format!("cannot negate '{}'", s)),
        },
        Expr::Bin(l, op, r) => {
            let (lv, rv) = (eval(l, lookup)?, eval(r, lookup)?);
            match (lv, rv) {
                (Value::Int(a), Value::Int(b)) => {
                    let v = match op {
                        Op::Add => a.checked_add(b),
                        Op::Sub => a.checked_sub(b),
                        Op::Mul => a.checked_mul(b),
                        Op::Div => a.checked_div(b),
                        // Non-negative so negative keys still name a real shard.
                        Op::Rem => a.checked_rem_euclid(b),
                    };
                    v.map(Value::Int)
                        .ok_or_else(|| format!("arithmetic error in {:?} {:?} {:?}", a, op, b))
                }
                (a, b) if *op == Op::Add => Ok(Value::Str(format!("{}{}", a, b))),
                (a, b) => Err(format!("cannot apply {:?} to '{}' and '{}'", op, a, b)),
            }
        }
    }
}

struct ExprParser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> ExprParser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn at_end(&mut self) -> bool {
        self.skip_ws();
        self.chars.peek().is_none()
    }

    fn parse_expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_term()?;
        loop {
            self.skip_ws();
            let op = match self.chars.peek() {
                Some('+') => Op::Add,
                Some('-') => Op::Sub,
                _ => return Ok(lhs),
            };
            self.chars.next();
            let rhs = self.parse_term()?;
            lhs = Expr::Bin(Box::new(lhs), op, Box::new(rhs));
        }
    }

    fn parse_term(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_factor()?;
        loop {
            self.skip_ws();
            let op = match self.chars.peek() {
                Some('*') => Op::Mul,
                Some('/') => Op::Div,
                Some('%') => Op::Rem,
                _ => return Ok(lhs),
            };
            self.chars.next();
            let rhs = self.parse_factor()?;
            lhs = Expr::Bin(Box::new(lhs), op, Box::new(rhs));
        }
    }

    fn parse_factor(&mut self) -> Result<Expr, String> {
        self.skip_ws();
        match self.chars.peek().copied() {
            Some('(') => {
                self.chars.next();
                let inner = self.parse_expr()?;
                self.skip_ws();
                match self.chars.next() {
                    Some(')') => Ok(inner),
                    _ => Err("missing ')'".into()),
                }
            }
            Some('-') => {
                self.chars.next();
                Ok(Expr::Neg(Box::new(self.parse_factor()?)))
            }
            Some(q @ ('\'' | '"')) => {
                self.chars.next();
                let mut s = String::new();
                loop {
                    match self.chars.next() {
                        Some(c) if c == q => break,
                        Some(c) => s.push(c),
                        None => return Err("unterminated string literal".into()),
                    }
                }
                Ok(Expr::Lit(Value::Str(s)))
            }
            Some(c) if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&d) = self.chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    self.chars.next();
                }
                digits
                    .parse()
                    .map(|v| Expr::Lit(Value::Int(v)))
                    .map_err(|_| format!("integer literal '{}' out of range", digits))
            }
            Some(c) if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&d) = self.chars.peek() {
                    if !(d.is_alphanumeric() || d == '_') {
                        break;
                    }
                    ident.push(d);
                    self.chars.next();
                }
                Ok(Expr::Var(ident))
            }
            Some(c) => Err(format!("unexpected character '{}'", c)),
            None => Err("unexpected end of expression".into()),
        }
    }
}
