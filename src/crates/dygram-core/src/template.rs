//! Template resolution and guard expression evaluation (C2).
//!
//! Both operate over the same read-only [`TemplateContext`]: a flattened view
//! of the active path's context values, reachable context-node attributes,
//! the current node's own attributes, and machine-level attributes. Neither
//! can fail outward — a missing reference in a template resolves to the
//! literal text, and a guard that can't be evaluated is `false`.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

/// Flattened name → value view consulted by templates and guards.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    values: HashMap<String, Value>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn extend(&mut self, other: &HashMap<String, Value>) {
        for (k, v) in other {
            self.values.insert(k.clone(), v.clone());
        }
    }

    /// Resolve a dotted path (`cfg.mode`) by walking nested objects after the
    /// first segment, which is looked up directly in the flat map.
    pub fn get(&self, dotted: &str) -> Option<&Value> {
        let mut parts = dotted.split('.');
        let head = parts.next()?;
        let mut current = self.values.get(head)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }
}

/// Resolve every `{{ path.attr }}` occurrence in `text` against `ctx`.
/// Unresolvable references are left as the original `{{ ... }}` text and a
/// warning is emitted; this function never returns an error.
pub fn resolve(text: &str, ctx: &TemplateContext) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        match after_open.find("}}") {
            Some(end) => {
                let expr = after_open[..end].trim();
                match ctx.get(expr) {
                    Some(value) => out.push_str(&scalar_to_text(value)),
                    None => {
                        warn!(reference = expr, "template reference did not resolve, leaving literal");
                        out.push_str("{{");
                        out.push_str(&after_open[..end]);
                        out.push_str("}}");
                    }
                }
                rest = &after_open[end + 2..];
            }
            None => {
                // Unterminated `{{` — emit it verbatim and stop scanning.
                out.push_str("{{");
                rest = after_open;
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

fn scalar_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A guard is `when:` or `unless:` followed by a boolean expression, or a
/// bare expression (treated as `when:`).
#[derive(Debug, Clone, PartialEq)]
pub enum GuardKind {
    When,
    Unless,
}

/// Evaluate a guard expression. Any failure to parse or resolve a reference
/// yields `false` — guards never abort evaluation of the edges around them.
pub fn evaluate_guard(kind: GuardKind, expr: &str, ctx: &TemplateContext) -> bool {
    let result = eval_bool_expr(expr, ctx).unwrap_or_else(|reason| {
        warn!(expr, reason, "guard failed to evaluate, treating as false");
        false
    });
    match kind {
        GuardKind::When => result,
        GuardKind::Unless => !result,
    }
}

/// Minimal recursive-descent parser/evaluator for the guard expression
/// language: `||`, `&&`, `!`, comparisons, parentheses, dotted names,
/// string and numeric literals. No function calls, no assignment.
fn eval_bool_expr(expr: &str, ctx: &TemplateContext) -> Result<bool, String> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let value = parser.parse_or(ctx)?;
    if parser.pos != parser.tokens.len() {
        return Err("trailing tokens after expression".to_string());
    }
    truthy(&value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Op(&'static str),
    LParen,
    RParen,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let mut j = i + 1;
                let mut s = String::new();
                while j < chars.len() && chars[j] != quote {
                    s.push(chars[j]);
                    j += 1;
                }
                if j >= chars.len() {
                    return Err("unterminated string literal".to_string());
                }
                tokens.push(Token::Str(s));
                i = j + 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::Op("&&"));
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Op("||"));
                i += 2;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op("=="));
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op("!="));
                i += 2;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op("<="));
                i += 2;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(">="));
                i += 2;
            }
            '<' => {
                tokens.push(Token::Op("<"));
                i += 1;
            }
            '>' => {
                tokens.push(Token::Op(">"));
                i += 1;
            }
            '!' => {
                tokens.push(Token::Op("!"));
                i += 1;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).map(|c| c.is_ascii_digit()).unwrap_or(false)) => {
                let mut j = i + 1;
                while j < chars.len() && (chars[j].is_ascii_digit() || chars[j] == '.') {
                    j += 1;
                }
                let num: String = chars[i..j].iter().collect();
                let value = num.parse::<f64>().map_err(|_| format!("invalid number literal '{num}'"))?;
                tokens.push(Token::Num(value));
                i = j;
            }
            c if c.is_alphanumeric() || c == '_' || c == '.' => {
                let mut j = i + 1;
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_' || chars[j] == '.') {
                    j += 1;
                }
                let ident: String = chars[i..j].iter().collect();
                tokens.push(Token::Ident(ident));
                i = j;
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn parse_or(&mut self, ctx: &TemplateContext) -> Result<Value, String> {
        let mut left = self.parse_and(ctx)?;
        while matches!(self.peek(), Some(Token::Op("||"))) {
            self.advance();
            let right = self.parse_and(ctx)?;
            left = Value::Bool(truthy(&left)? || truthy(&right)?);
        }
        Ok(left)
    }

    fn parse_and(&mut self, ctx: &TemplateContext) -> Result<Value, String> {
        let mut left = self.parse_not(ctx)?;
        while matches!(self.peek(), Some(Token::Op("&&"))) {
            self.advance();
            let right = self.parse_not(ctx)?;
            left = Value::Bool(truthy(&left)? && truthy(&right)?);
        }
        Ok(left)
    }

    fn parse_not(&mut self, ctx: &TemplateContext) -> Result<Value, String> {
        if matches!(self.peek(), Some(Token::Op("!"))) {
            self.advance();
            let value = self.parse_not(ctx)?;
            return Ok(Value::Bool(!truthy(&value)?));
        }
        self.parse_comparison(ctx)
    }

    fn parse_comparison(&mut self, ctx: &TemplateContext) -> Result<Value, String> {
        let left = self.parse_atom(ctx)?;
        if let Some(Token::Op(op @ ("==" | "!=" | "<" | "<=" | ">" | ">="))) = self.peek() {
            let op = *op;
            self.advance();
            let right = self.parse_atom(ctx)?;
            return Ok(Value::Bool(compare(op, &left, &right)?));
        }
        Ok(left)
    }

    fn parse_atom(&mut self, ctx: &TemplateContext) -> Result<Value, String> {
        match self.advance() {
            Some(Token::LParen) => {
                let value = self.parse_or(ctx)?;
                match self.advance() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err("expected closing parenthesis".to_string()),
                }
            }
            Some(Token::Str(s)) => Ok(Value::String(s.clone())),
            Some(Token::Num(n)) => Ok(serde_json::Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null)),
            Some(Token::Ident(ident)) => match ident.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" => Ok(Value::Null),
                name => Ok(ctx.get(name).cloned().unwrap_or(Value::Null)),
            },
            other => Err(format!("unexpected token {other:?}")),
        }
    }
}

fn truthy(value: &Value) -> Result<bool, String> {
    Ok(match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    })
}

fn compare(op: &str, left: &Value, right: &Value) -> Result<bool, String> {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return Ok(match op {
            "==" => l == r,
            "!=" => l != r,
            "<" => l < r,
            "<=" => l <= r,
            ">" => l > r,
            ">=" => l >= r,
            _ => unreachable!(),
        });
    }
    match op {
        "==" => Ok(left == right),
        "!=" => Ok(left != right),
        _ if left.is_string() && right.is_string() => {
            let l = left.as_str().unwrap();
            let r = right.as_str().unwrap();
            Ok(match op {
                "<" => l < r,
                "<=" => l <= r,
                ">" => l > r,
                ">=" => l >= r,
                _ => unreachable!(),
            })
        }
        _ => Err(format!("cannot compare {left:?} {op} {right:?}")),
    }
}
