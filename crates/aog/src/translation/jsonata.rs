//! Transform expression engine for converter chains
//!
//! Evaluates the JSONata-style expressions carried in flavor templates
//! against a JSON payload. The expressions in the templates are the stable
//! contract; this engine implements the subset they use:
//!
//! - path navigation with implicit mapping over arrays (`choices.message`)
//! - array index and predicate filters (`choices[0]`, `items[done = true]`)
//! - object `{...}` and array `[...]` constructors (undefined values omitted)
//! - string concatenation `&`, arithmetic, comparisons, `and` / `or`
//! - conditional `cond ? then : else`
//! - `$` for the evaluation context
//! - functions: `$string` `$number` `$boolean` `$count` `$append` `$exists`
//!   `$lowercase` `$uppercase` `$split` `$join` `$merge` `$not`
//!
//! Undefined (a missing path) is distinct from JSON null and is represented
//! as `None`; it propagates the way JSONata propagates it.

use anyhow::{Result, anyhow, bail};
use serde_json::{Map, Number, Value};

/// Evaluate `expression` against `input`. `Ok(None)` means undefined.
pub fn evaluate(expression: &str, input: &Value) -> Result<Option<Value>> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    parser.expect_end()?;
    eval(&expr, input)
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Var(String),
    Str(String),
    Num(f64),
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Colon,
    Dot,
    Question,
    Amp,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '{' => {
                tokens.push(Token::LBrace);
                i += 1;
            }
            '}' => {
                tokens.push(Token::RBrace);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '?' => {
                tokens.push(Token::Question);
                i += 1;
            }
            '&' => {
                tokens.push(Token::Amp);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    bail!("unexpected '!' at offset {i}; did you mean '!='?");
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '\'' | '"' => {
                let (s, next) = read_string(&chars, i, c)?;
                tokens.push(Token::Str(s));
                i = next;
            }
            '`' => {
                let (s, next) = read_string(&chars, i, '`')?;
                tokens.push(Token::Ident(s));
                i = next;
            }
            '$' => {
                let mut j = i + 1;
                let mut name = String::new();
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                    name.push(chars[j]);
                    j += 1;
                }
                tokens.push(Token::Var(name));
                i = j;
            }
            c if c.is_ascii_digit() => {
                let mut j = i;
                let mut text = String::new();
                while j < chars.len()
                    && (chars[j].is_ascii_digit()
                        || chars[j] == '.'
                        || chars[j] == 'e'
                        || chars[j] == 'E')
                {
                    // Stop at a dot that starts a path step rather than a fraction
                    if chars[j] == '.'
                        && !chars.get(j + 1).is_some_and(|n| n.is_ascii_digit())
                    {
                        break;
                    }
                    text.push(chars[j]);
                    j += 1;
                }
                let value: f64 = text
                    .parse()
                    .map_err(|_| anyhow!("invalid number '{text}' at offset {i}"))?;
                tokens.push(Token::Num(value));
                i = j;
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut j = i;
                let mut name = String::new();
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                    name.push(chars[j]);
                    j += 1;
                }
                tokens.push(Token::Ident(name));
                i = j;
            }
            other => bail!("unexpected character '{other}' at offset {i}"),
        }
    }

    Ok(tokens)
}

fn read_string(chars: &[char], start: usize, quote: char) -> Result<(String, usize)> {
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            c if c == quote => return Ok((out, i + 1)),
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("unterminated escape in string"))?;
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    '`' => out.push('`'),
                    other => bail!("unsupported escape '\\{other}' in string"),
                }
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    bail!("unterminated string starting at offset {start}")
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Context,
    Field(String),
    Dot(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Object(Vec<(String, Expr)>),
    Array(Vec<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Option<Box<Expr>>),
    Call(String, Vec<Expr>),
    Negate(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token: &Token) -> Result<()> {
        match self.advance() {
            Some(found) if &found == token => Ok(()),
            found => bail!("expected {token:?}, found {found:?}"),
        }
    }

    fn expect_end(&self) -> Result<()> {
        if self.pos != self.tokens.len() {
            bail!(
                "unexpected trailing tokens starting at {:?}",
                self.tokens[self.pos]
            );
        }
        Ok(())
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        let condition = self.parse_binary(0)?;
        if self.peek() == Some(&Token::Question) {
            self.advance();
            let then = self.parse_expr()?;
            let otherwise = if self.peek() == Some(&Token::Colon) {
                self.advance();
                Some(Box::new(self.parse_expr()?))
            } else {
                None
            };
            return Ok(Expr::Ternary(Box::new(condition), Box::new(then), otherwise));
        }
        Ok(condition)
    }

    fn binding_power(token: &Token) -> Option<(BinOp, u8)> {
        match token {
            Token::Ident(name) if name == "or" => Some((BinOp::Or, 1)),
            Token::Ident(name) if name == "and" => Some((BinOp::And, 2)),
            Token::Eq => Some((BinOp::Eq, 3)),
            Token::Ne => Some((BinOp::Ne, 3)),
            Token::Lt => Some((BinOp::Lt, 3)),
            Token::Le => Some((BinOp::Le, 3)),
            Token::Gt => Some((BinOp::Gt, 3)),
            Token::Ge => Some((BinOp::Ge, 3)),
            Token::Amp => Some((BinOp::Concat, 4)),
            Token::Plus => Some((BinOp::Add, 5)),
            Token::Minus => Some((BinOp::Sub, 5)),
            Token::Star => Some((BinOp::Mul, 6)),
            Token::Slash => Some((BinOp::Div, 6)),
            Token::Percent => Some((BinOp::Rem, 6)),
            _ => None,
        }
    }

    fn parse_binary(&mut self, min_power: u8) -> Result<Expr> {
        let mut lhs = self.parse_postfix()?;
        while let Some(token) = self.peek() {
            let Some((op, power)) = Self::binding_power(token) else {
                break;
            };
            if power < min_power {
                break;
            }
            self.advance();
            let rhs = self.parse_binary(power + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    match self.advance() {
                        Some(Token::Ident(name)) => expr = Expr::Dot(Box::new(expr), name),
                        found => bail!("expected field name after '.', found {found:?}"),
                    }
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Num(n)) => Ok(Expr::Literal(number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ => Ok(Expr::Field(name)),
            },
            Some(Token::Var(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.advance();
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if self.peek() == Some(&Token::Comma) {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(&Token::RParen)?;
                    if name.is_empty() {
                        bail!("'$' is not callable");
                    }
                    Ok(Expr::Call(name, args))
                } else if name.is_empty() {
                    Ok(Expr::Context)
                } else {
                    bail!("unknown variable '${name}'; only '$' and function calls are supported")
                }
            }
            Some(Token::Minus) => Ok(Expr::Negate(Box::new(self.parse_primary()?))),
            Some(Token::LParen) => {
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Some(Token::LBrace) => {
                let mut pairs = Vec::new();
                if self.peek() != Some(&Token::RBrace) {
                    loop {
                        let key = match self.advance() {
                            Some(Token::Str(s)) => s,
                            Some(Token::Ident(s)) => s,
                            found => bail!("expected object key, found {found:?}"),
                        };
                        self.expect(&Token::Colon)?;
                        let value = self.parse_expr()?;
                        pairs.push((key, value));
                        if self.peek() == Some(&Token::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBrace)?;
                Ok(Expr::Object(pairs))
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() != Some(&Token::RBracket) {
                    loop {
                        items.push(self.parse_expr()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Expr::Array(items))
            }
            found => bail!("unexpected token {found:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

fn eval(expr: &Expr, ctx: &Value) -> Result<Option<Value>> {
    match expr {
        Expr::Literal(value) => Ok(Some(value.clone())),
        Expr::Context => Ok(Some(ctx.clone())),
        Expr::Field(name) => Ok(lookup(ctx, name)),
        Expr::Dot(lhs, name) => {
            let Some(base) = eval(lhs, ctx)? else {
                return Ok(None);
            };
            Ok(lookup(&base, name))
        }
        Expr::Index(lhs, index) => {
            let Some(base) = eval(lhs, ctx)? else {
                return Ok(None);
            };
            let items: Vec<Value> = match base {
                Value::Array(items) => items,
                other => vec![other],
            };
            let mut selected = Vec::new();
            for (position, item) in items.iter().enumerate() {
                match eval(index, item)? {
                    Some(Value::Number(n)) => {
                        let wanted = n.as_f64().unwrap_or(f64::NAN).floor();
                        let wanted = if wanted < 0.0 {
                            items.len() as f64 + wanted
                        } else {
                            wanted
                        };
                        if position as f64 == wanted {
                            selected.push(item.clone());
                        }
                    }
                    verdict => {
                        if truthy(verdict.as_ref()) {
                            selected.push(item.clone());
                        }
                    }
                }
            }
            Ok(collapse(selected))
        }
        Expr::Object(pairs) => {
            let mut map = Map::new();
            for (key, value_expr) in pairs {
                if let Some(value) = eval(value_expr, ctx)? {
                    map.insert(key.clone(), value);
                }
            }
            Ok(Some(Value::Object(map)))
        }
        Expr::Array(items) => {
            let mut out = Vec::new();
            for item in items {
                if let Some(value) = eval(item, ctx)? {
                    out.push(value);
                }
            }
            Ok(Some(Value::Array(out)))
        }
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, ctx),
        Expr::Ternary(condition, then, otherwise) => {
            let verdict = eval(condition, ctx)?;
            if truthy(verdict.as_ref()) {
                eval(then, ctx)
            } else if let Some(otherwise) = otherwise {
                eval(otherwise, ctx)
            } else {
                Ok(None)
            }
        }
        Expr::Call(name, args) => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, ctx)?);
            }
            call_function(name, values)
        }
        Expr::Negate(inner) => match eval(inner, ctx)? {
            Some(Value::Number(n)) => {
                Ok(Some(number(-n.as_f64().ok_or_else(|| anyhow!("non-finite number"))?)))
            }
            None => Ok(None),
            Some(other) => bail!("cannot negate {other}"),
        },
    }
}

/// Field lookup with implicit mapping over arrays.
fn lookup(ctx: &Value, name: &str) -> Option<Value> {
    match ctx {
        Value::Object(map) => map.get(name).cloned(),
        Value::Array(items) => {
            let mapped: Vec<Value> = items
                .iter()
                .filter_map(|item| lookup(item, name))
                .collect();
            collapse(mapped)
        }
        _ => None,
    }
}

/// JSONata sequence collapse: empty → undefined, singleton → the value.
fn collapse(mut values: Vec<Value>) -> Option<Value> {
    match values.len() {
        0 => None,
        1 => Some(values.remove(0)),
        _ => Some(Value::Array(values)),
    }
}

fn eval_binary(op: BinOp, lhs: &Expr, rhs: &Expr, ctx: &Value) -> Result<Option<Value>> {
    let left = eval(lhs, ctx)?;
    let right = eval(rhs, ctx)?;
    match op {
        BinOp::Or => Ok(Some(Value::Bool(truthy(left.as_ref()) || truthy(right.as_ref())))),
        BinOp::And => Ok(Some(Value::Bool(truthy(left.as_ref()) && truthy(right.as_ref())))),
        BinOp::Eq => Ok(Some(Value::Bool(loose_eq(left.as_ref(), right.as_ref())))),
        BinOp::Ne => Ok(Some(Value::Bool(!loose_eq(left.as_ref(), right.as_ref())))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let (Some(left), Some(right)) = (left, right) else {
                return Ok(None);
            };
            let ordering = compare(&left, &right)?;
            let verdict = match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                BinOp::Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Some(Value::Bool(verdict)))
        }
        BinOp::Concat => {
            let mut out = String::new();
            if let Some(left) = left {
                out.push_str(&stringify(&left));
            }
            if let Some(right) = right {
                out.push_str(&stringify(&right));
            }
            Ok(Some(Value::String(out)))
        }
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
            let (Some(left), Some(right)) = (left, right) else {
                return Ok(None);
            };
            let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
                bail!("arithmetic requires numbers, found {left} and {right}");
            };
            let result = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Rem => a % b,
                _ => unreachable!(),
            };
            Ok(Some(number(result)))
        }
    }
}

fn call_function(name: &str, mut args: Vec<Option<Value>>) -> Result<Option<Value>> {
    let mut take = |index: usize| -> Option<Value> {
        args.get_mut(index).and_then(Option::take)
    };
    match name {
        "string" => Ok(take(0).map(|v| Value::String(stringify(&v)))),
        "number" => match take(0) {
            Some(Value::Number(n)) => Ok(Some(Value::Number(n))),
            Some(Value::String(s)) => {
                let parsed: f64 = s
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("$number: cannot parse '{s}'"))?;
                Ok(Some(number(parsed)))
            }
            Some(Value::Bool(b)) => Ok(Some(number(if b { 1.0 } else { 0.0 }))),
            Some(other) => bail!("$number: unsupported argument {other}"),
            None => Ok(None),
        },
        "boolean" => Ok(Some(Value::Bool(truthy(take(0).as_ref())))),
        "count" => Ok(Some(match take(0) {
            None => number(0.0),
            Some(Value::Array(items)) => number(items.len() as f64),
            Some(_) => number(1.0),
        })),
        "append" => {
            let left = take(0);
            let right = take(1);
            let mut out = match left {
                None => Vec::new(),
                Some(Value::Array(items)) => items,
                Some(single) => vec![single],
            };
            match right {
                None => {}
                Some(Value::Array(items)) => out.extend(items),
                Some(single) => out.push(single),
            }
            Ok(collapse(out))
        }
        "exists" => Ok(Some(Value::Bool(take(0).is_some()))),
        "lowercase" => match take(0) {
            Some(Value::String(s)) => Ok(Some(Value::String(s.to_lowercase()))),
            None => Ok(None),
            Some(other) => bail!("$lowercase: expected string, found {other}"),
        },
        "uppercase" => match take(0) {
            Some(Value::String(s)) => Ok(Some(Value::String(s.to_uppercase()))),
            None => Ok(None),
            Some(other) => bail!("$uppercase: expected string, found {other}"),
        },
        "split" => {
            let (Some(Value::String(s)), Some(Value::String(sep))) = (take(0), take(1)) else {
                bail!("$split: expected (string, string)");
            };
            Ok(Some(Value::Array(
                s.split(sep.as_str())
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            )))
        }
        "join" => {
            let items = match take(0) {
                None => return Ok(None),
                Some(Value::Array(items)) => items,
                Some(single) => vec![single],
            };
            let sep = match take(1) {
                Some(Value::String(sep)) => sep,
                None => String::new(),
                Some(other) => bail!("$join: separator must be a string, found {other}"),
            };
            let parts: Vec<String> = items.iter().map(stringify).collect();
            Ok(Some(Value::String(parts.join(&sep))))
        }
        "merge" => {
            let items = match take(0) {
                None => return Ok(None),
                Some(Value::Array(items)) => items,
                Some(single) => vec![single],
            };
            let mut merged = Map::new();
            for item in items {
                let Value::Object(map) = item else {
                    bail!("$merge: every element must be an object");
                };
                merged.extend(map);
            }
            Ok(Some(Value::Object(merged)))
        }
        "not" => Ok(Some(Value::Bool(!truthy(take(0).as_ref())))),
        other => bail!("unknown function '${other}'"),
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => items.iter().any(|item| truthy(Some(item))),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

fn loose_eq(left: Option<&Value>, right: Option<&Value>) -> bool {
    match (left, right) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            a.as_f64().zip(b.as_f64()).map(|(a, b)| a == b).unwrap_or(false)
        }
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn compare(left: &Value, right: &Value) -> Result<std::cmp::Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
                bail!("non-finite number in comparison");
            };
            a.partial_cmp(&b)
                .ok_or_else(|| anyhow!("incomparable numbers"))
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        (a, b) => bail!("cannot compare {a} with {b}"),
    }
}

/// `$string` semantics: strings pass through, everything else serializes.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Produce an integer JSON number when the value is integral.
fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(expr: &str, input: Value) -> Option<Value> {
        evaluate(expr, &input).unwrap()
    }

    #[test]
    fn path_navigation_and_mapping() {
        let input = json!({"choices": [
            {"message": {"content": "hi"}, "finish_reason": "stop"},
            {"message": {"content": "there"}, "finish_reason": null}
        ]});
        assert_eq!(
            run("choices.message.content", input.clone()),
            Some(json!(["hi", "there"]))
        );
        assert_eq!(
            run("choices[0].message.content", input.clone()),
            Some(json!("hi"))
        );
        assert_eq!(
            run("choices[-1].message.content", input.clone()),
            Some(json!("there"))
        );
        assert_eq!(
            run("choices[finish_reason = 'stop'].message.content", input),
            Some(json!("hi"))
        );
    }

    #[test]
    fn missing_paths_are_undefined_and_omitted() {
        let input = json!({"model": "llama3.1"});
        assert_eq!(run("missing.deep.path", input.clone()), None);
        assert_eq!(
            run("{\"model\": model, \"stream\": stream}", input),
            Some(json!({"model": "llama3.1"}))
        );
    }

    #[test]
    fn object_and_array_construction() {
        let input = json!({"prompt": "draw a cat", "n": 2});
        assert_eq!(
            run("{\"input\": {\"prompt\": prompt}, \"batch\": [n, n]}", input),
            Some(json!({"input": {"prompt": "draw a cat"}, "batch": [2, 2]}))
        );
    }

    #[test]
    fn concat_arithmetic_and_comparison() {
        let input = json!({"a": 2, "b": 3, "name": "qwen"});
        assert_eq!(run("a + b * 2", input.clone()), Some(json!(8)));
        assert_eq!(run("'model-' & name", input.clone()), Some(json!("model-qwen")));
        assert_eq!(run("a < b and b <= 3", input.clone()), Some(json!(true)));
        assert_eq!(run("a != b", input), Some(json!(true)));
    }

    #[test]
    fn ternary_with_defaults() {
        let input = json!({"stream": true});
        assert_eq!(
            run("$exists(model) ? model : 'default-model'", input),
            Some(json!("default-model"))
        );
    }

    #[test]
    fn functions() {
        assert_eq!(run("$count(items)", json!({"items": [1, 2, 3]})), Some(json!(3)));
        assert_eq!(run("$count(missing)", json!({})), Some(json!(0)));
        assert_eq!(
            run("$append(a, b)", json!({"a": [1], "b": [2, 3]})),
            Some(json!([1, 2, 3]))
        );
        assert_eq!(
            run("$join($split(csv, ','), '|')", json!({"csv": "a,b,c"})),
            Some(json!("a|b|c"))
        );
        assert_eq!(
            run("$merge([{'a': 1}, {'b': 2}])", json!({})),
            Some(json!({"a": 1, "b": 2}))
        );
        assert_eq!(run("$not(done)", json!({"done": false})), Some(json!(true)));
        assert_eq!(run("$string(n)", json!({"n": 42})), Some(json!("42")));
        assert_eq!(run("$number(s)", json!({"s": "3.5"})), Some(json!(3.5)));
    }

    #[test]
    fn context_reference() {
        assert_eq!(run("$", json!("[DONE]")), Some(json!("[DONE]")));
        assert_eq!(
            run("{\"raw\": $}", json!({"k": 1})),
            Some(json!({"raw": {"k": 1}}))
        );
    }

    #[test]
    fn errors_are_reported() {
        assert!(evaluate("model &&", &json!({})).is_err());
        assert!(evaluate("$nosuchfn(1)", &json!({})).is_err());
        assert!(evaluate("'unterminated", &json!({})).is_err());
    }
}
