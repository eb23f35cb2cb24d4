//! Minimal sandboxed expression evaluator for inline script expressions:
//! guard conditions (`ifTrue`), capture transforms, and `{{ ... }}` template
//! expressions.
//!
//! Supported: literals (integers, floats, quoted strings, `true`/`false`/
//! `null`), dotted-path variable lookup, arithmetic, comparisons,
//! `and`/`or`/`not` (also `&&`/`||`/`!`), parentheses and calls to registered
//! generator functions. Evaluation only sees the session's variable map:
//! no engine internals, filesystem or network.
//!
//! Fail-soft contract: a malformed expression returns `None`; a valid
//! expression that hits a type hole (missing variable, bad operand) yields
//! `Value::Null`.

use volley_value::{ObjectMap, Value};

use crate::context::FuncMap;

pub struct Env<'a> {
    pub vars: &'a ObjectMap,
    pub funcs: Option<&'a FuncMap>,
}

pub fn eval(src: &str, env: &Env<'_>) -> Option<Value> {
    let tokens = lex(src)?;
    let mut p = Parser {
        tokens,
        pos: 0,
        env,
    };
    let value = p.or_expr()?;
    if p.pos != p.tokens.len() {
        return None;
    }
    Some(value)
}

/// Loose equality used by both the evaluator and match specs: numbers
/// compare numerically across `I64`/`F64`; everything else must be the same
/// variant and equal.
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(Value),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Comma,
}

fn lex(src: &str) -> Option<Vec<Tok>> {
    let mut out = Vec::new();
    let bytes = src.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                out.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                out.push(Tok::RParen);
                i += 1;
            }
            ',' => {
                out.push(Tok::Comma);
                i += 1;
            }
            '+' => {
                out.push(Tok::Plus);
                i += 1;
            }
            '-' => {
                out.push(Tok::Minus);
                i += 1;
            }
            '*' => {
                out.push(Tok::Star);
                i += 1;
            }
            '/' => {
                out.push(Tok::Slash);
                i += 1;
            }
            '%' => {
                out.push(Tok::Percent);
                i += 1;
            }
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    out.push(Tok::Eq);
                    i += 2;
                } else {
                    return None;
                }
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    out.push(Tok::Ne);
                    i += 2;
                } else {
                    out.push(Tok::Not);
                    i += 1;
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    out.push(Tok::Le);
                    i += 2;
                } else {
                    out.push(Tok::Lt);
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    out.push(Tok::Ge);
                    i += 2;
                } else {
                    out.push(Tok::Gt);
                    i += 1;
                }
            }
            '&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    out.push(Tok::And);
                    i += 2;
                } else {
                    return None;
                }
            }
            '|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    out.push(Tok::Or);
                    i += 2;
                } else {
                    return None;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    let b = *bytes.get(i)? as char;
                    if b == quote {
                        i += 1;
                        break;
                    }
                    if b == '\\' {
                        let esc = *bytes.get(i + 1)? as char;
                        s.push(esc);
                        i += 2;
                        continue;
                    }
                    s.push(b);
                    i += 1;
                }
                out.push(Tok::Str(s));
            }
            '0'..='9' => {
                let start = i;
                let mut is_float = false;
                while i < bytes.len() {
                    match bytes[i] as char {
                        '0'..='9' => i += 1,
                        '.' if bytes
                            .get(i + 1)
                            .is_some_and(|b| (*b as char).is_ascii_digit()) =>
                        {
                            is_float = true;
                            i += 1;
                        }
                        'e' | 'E' => {
                            is_float = true;
                            i += 1;
                            if matches!(bytes.get(i), Some(b'+') | Some(b'-')) {
                                i += 1;
                            }
                        }
                        _ => break,
                    }
                }
                let text = &src[start..i];
                let value = if is_float {
                    Value::F64(text.parse().ok()?)
                } else {
                    Value::I64(text.parse().ok()?)
                };
                out.push(Tok::Num(value));
            }
            'a'..='z' | 'A'..='Z' | '_' | '$' => {
                let start = i;
                while i < bytes.len() {
                    match bytes[i] as char {
                        'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '$' => i += 1,
                        // Dotted paths: a segment after '.' may also be a
                        // bare array index.
                        '.' if bytes.get(i + 1).is_some_and(|b| {
                            matches!(*b as char, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '$')
                        }) =>
                        {
                            i += 1;
                        }
                        _ => break,
                    }
                }
                let word = &src[start..i];
                out.push(match word {
                    "true" => Tok::True,
                    "false" => Tok::False,
                    "null" => Tok::Null,
                    "and" => Tok::And,
                    "or" => Tok::Or,
                    "not" => Tok::Not,
                    _ => Tok::Ident(word.to_string()),
                });
            }
            _ => return None,
        }
    }

    Some(out)
}

struct Parser<'a, 'e> {
    tokens: Vec<Tok>,
    pos: usize,
    env: &'a Env<'e>,
}

impl Parser<'_, '_> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Tok> {
        let t = self.tokens.get(self.pos).cloned()?;
        self.pos += 1;
        Some(t)
    }

    fn expect(&mut self, tok: &Tok) -> Option<()> {
        if self.peek() == Some(tok) {
            self.pos += 1;
            Some(())
        } else {
            None
        }
    }

    fn or_expr(&mut self) -> Option<Value> {
        let mut value = self.and_expr()?;
        while self.peek() == Some(&Tok::Or) {
            self.pos += 1;
            let rhs = self.and_expr()?;
            value = Value::Bool(value.truthy() || rhs.truthy());
        }
        Some(value)
    }

    fn and_expr(&mut self) -> Option<Value> {
        let mut value = self.comparison()?;
        while self.peek() == Some(&Tok::And) {
            self.pos += 1;
            let rhs = self.comparison()?;
            value = Value::Bool(value.truthy() && rhs.truthy());
        }
        Some(value)
    }

    fn comparison(&mut self) -> Option<Value> {
        let lhs = self.additive()?;
        if !matches!(
            self.peek(),
            Some(Tok::Eq | Tok::Ne | Tok::Lt | Tok::Le | Tok::Gt | Tok::Ge)
        ) {
            return Some(lhs);
        }
        let op = self.bump()?;
        let rhs = self.additive()?;
        Some(compare(&op, &lhs, &rhs))
    }

    fn additive(&mut self) -> Option<Value> {
        let mut value = self.multiplicative()?;
        while matches!(self.peek(), Some(Tok::Plus | Tok::Minus)) {
            let op = self.bump()?;
            let rhs = self.multiplicative()?;
            value = arith(&op, &value, &rhs);
        }
        Some(value)
    }

    fn multiplicative(&mut self) -> Option<Value> {
        let mut value = self.unary()?;
        while matches!(self.peek(), Some(Tok::Star | Tok::Slash | Tok::Percent)) {
            let op = self.bump()?;
            let rhs = self.unary()?;
            value = arith(&op, &value, &rhs);
        }
        Some(value)
    }

    fn unary(&mut self) -> Option<Value> {
        if matches!(self.peek(), Some(Tok::Minus)) {
            self.pos += 1;
            let v = self.unary()?;
            return Some(match v {
                Value::I64(n) => Value::I64(-n),
                Value::F64(n) => Value::F64(-n),
                _ => Value::Null,
            });
        }
        if matches!(self.peek(), Some(Tok::Not)) {
            self.pos += 1;
            let v = self.unary()?;
            return Some(Value::Bool(!v.truthy()));
        }
        self.primary()
    }

    fn primary(&mut self) -> Option<Value> {
        match self.bump()? {
            Tok::Num(v) => Some(v),
            Tok::Str(s) => Some(Value::from(s)),
            Tok::True => Some(Value::Bool(true)),
            Tok::False => Some(Value::Bool(false)),
            Tok::Null => Some(Value::Null),
            Tok::LParen => {
                let v = self.or_expr()?;
                self.expect(&Tok::RParen)?;
                Some(v)
            }
            Tok::Ident(name) => {
                if self.peek() == Some(&Tok::LParen) {
                    self.pos += 1;
                    let args = self.call_args()?;
                    return Some(self.call(&name, &args));
                }
                Some(lookup(self.env.vars, &name))
            }
            _ => None,
        }
    }

    fn call_args(&mut self) -> Option<Vec<Value>> {
        let mut args = Vec::new();
        if self.peek() == Some(&Tok::RParen) {
            self.pos += 1;
            return Some(args);
        }
        loop {
            args.push(self.or_expr()?);
            match self.bump()? {
                Tok::Comma => {}
                Tok::RParen => return Some(args),
                _ => return None,
            }
        }
    }

    fn call(&self, name: &str, args: &[Value]) -> Value {
        match self.env.funcs.and_then(|funcs| funcs.get(name)) {
            Some(f) => f(args),
            None => Value::Null,
        }
    }
}

fn lookup(vars: &ObjectMap, path: &str) -> Value {
    let mut segs = path.split('.');
    let Some(first) = segs.next() else {
        return Value::Null;
    };
    let Some(mut cur) = vars.get(first) else {
        return Value::Null;
    };
    for seg in segs {
        match cur.get(seg) {
            Some(next) => cur = next,
            None => return Value::Null,
        }
    }
    cur.clone()
}

fn arith(op: &Tok, a: &Value, b: &Value) -> Value {
    // '+' with a string operand concatenates.
    if matches!(op, Tok::Plus) && (a.as_str().is_some() || b.as_str().is_some()) {
        return Value::from(format!(
            "{}{}",
            a.to_display_string(),
            b.to_display_string()
        ));
    }

    if let (Value::I64(x), Value::I64(y)) = (a, b) {
        match op {
            Tok::Plus => {
                return x
                    .checked_add(*y)
                    .map(Value::I64)
                    .unwrap_or(Value::F64(*x as f64 + *y as f64));
            }
            Tok::Minus => {
                return x
                    .checked_sub(*y)
                    .map(Value::I64)
                    .unwrap_or(Value::F64(*x as f64 - *y as f64));
            }
            Tok::Star => {
                return x
                    .checked_mul(*y)
                    .map(Value::I64)
                    .unwrap_or(Value::F64(*x as f64 * *y as f64));
            }
            Tok::Percent => {
                return match x.checked_rem(*y) {
                    Some(v) => Value::I64(v),
                    None => Value::Null,
                };
            }
            _ => {}
        }
    }

    let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
        return Value::Null;
    };

    match op {
        Tok::Plus => Value::F64(x + y),
        Tok::Minus => Value::F64(x - y),
        Tok::Star => Value::F64(x * y),
        Tok::Slash => {
            if y == 0.0 {
                Value::Null
            } else {
                Value::F64(x / y)
            }
        }
        Tok::Percent => {
            if y == 0.0 {
                Value::Null
            } else {
                Value::F64(x % y)
            }
        }
        _ => Value::Null,
    }
}

fn compare(op: &Tok, a: &Value, b: &Value) -> Value {
    match op {
        Tok::Eq => Value::Bool(values_equal(a, b)),
        Tok::Ne => Value::Bool(!values_equal(a, b)),
        _ => {
            let ord = match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => match (a.as_str(), b.as_str()) {
                    (Some(x), Some(y)) => Some(x.cmp(y)),
                    _ => None,
                },
            };
            let Some(ord) = ord else {
                return Value::Bool(false);
            };
            Value::Bool(match op {
                Tok::Lt => ord.is_lt(),
                Tok::Le => ord.is_le(),
                Tok::Gt => ord.is_gt(),
                Tok::Ge => ord.is_ge(),
                _ => false,
            })
        }
    }
}
