//! Static Expression Evaluator for the view runtime.
//!
//! Evaluates the small expression subset that lowered argument, initializer and
//! condition code uses in practice: literals, `this.x` reads, local names with
//! dotted paths, `+`, `!`, comparisons, ternaries and JSON-like array/object
//! literals. Anything else evaluates to `null` and logs a warning.

use regex::Regex;
use serde_json::{Map, Number, Value};
use tracing::warn;

lazy_static::lazy_static! {
    /// Bare or single-quoted object keys: `{ a: 1, 'b': 2 }`.
    static ref OBJECT_KEY: Regex =
        Regex::new(r#"([{,]\s*)(?:([A-Za-z_$][A-Za-z0-9_$]*)|'([^']*)')\s*:"#).unwrap();
    static ref SINGLE_QUOTED: Regex = Regex::new(r#"'((?:[^'\\]|\\.)*)'"#).unwrap();
}

/// Where evaluation looks up names.
pub trait EvalScope {
    /// `this.<name>`
    fn field(&self, name: &str) -> Option<Value>;
    /// Bare `<name>`, e.g. a ForEach item variable.
    fn local(&self, name: &str) -> Option<Value>;
}

/// Scope without any names.
pub struct EmptyScope;

impl EvalScope for EmptyScope {
    fn field(&self, _name: &str) -> Option<Value> {
        None
    }

    fn local(&self, _name: &str) -> Option<Value> {
        None
    }
}

pub fn static_eval(expr: &str, scope: &dyn EvalScope) -> Value {
    match try_eval(expr, scope) {
        Some(value) => value,
        None => {
            warn!(expression = %expr, "expression is not statically evaluable; using null");
            Value::Null
        }
    }
}

/// JavaScript truthiness.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// String form used by `+` concatenation.
pub fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn try_eval(expr: &str, scope: &dyn EvalScope) -> Option<Value> {
    let mut trimmed = expr.trim();
    while let Some(rest) = trimmed.strip_suffix(';') {
        trimmed = rest.trim_end();
    }
    if trimmed.is_empty() {
        return None;
    }

    if let Some(inner) = strip_outer_parens(trimmed) {
        return try_eval(inner, scope);
    }

    if let Some(literal) = try_parse_string_literal(trimmed) {
        return Some(Value::String(literal));
    }

    if let Ok(num) = trimmed.parse::<f64>() {
        return number(num);
    }

    match trimmed {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        "null" | "undefined" => return Some(Value::Null),
        _ => {}
    }

    if let Some(resolved) = try_resolve_ternary(trimmed, scope) {
        return Some(resolved);
    }

    if let Some(resolved) = try_resolve_comparison(trimmed, scope) {
        return Some(resolved);
    }

    if let Some(resolved) = try_resolve_concatenation(trimmed, scope) {
        return Some(resolved);
    }

    if let Some(operand) = trimmed.strip_prefix('!') {
        if !operand.starts_with('=') {
            return try_eval(operand, scope).map(|v| Value::Bool(!is_truthy(&v)));
        }
    }

    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        return try_parse_json_like(trimmed);
    }

    resolve_path(trimmed, scope)
}

fn number(num: f64) -> Option<Value> {
    if num.fract() == 0.0 && num.abs() < 9.0e15 {
        Some(Value::Number(Number::from(num as i64)))
    } else {
        Number::from_f64(num).map(Value::Number)
    }
}

/// `this.a.b`, `item.name`, `count`.
fn resolve_path(expr: &str, scope: &dyn EvalScope) -> Option<Value> {
    let mut segments = expr.split('.');
    let first = segments.next()?;
    let mut value = if first == "this" {
        let field = segments.next()?;
        if !is_valid_identifier(field) {
            return None;
        }
        scope.field(field)?
    } else {
        if !is_valid_identifier(first) {
            return None;
        }
        scope.local(first)?
    };

    for segment in segments {
        if !is_valid_identifier(segment) {
            return None;
        }
        value = match (&value, segment) {
            (Value::Array(items), "length") => Value::from(items.len()),
            (Value::String(s), "length") => Value::from(s.chars().count()),
            (Value::Object(map), key) => map.get(key).cloned().unwrap_or(Value::Null),
            _ => return None,
        };
    }
    Some(value)
}

fn strip_outer_parens(expr: &str) -> Option<&str> {
    let inner = expr.strip_prefix('(')?.strip_suffix(')')?;
    // "(a) + (b)" must not lose its outer pair.
    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    Some(inner)
}

/// Try to parse a string literal (single, double, or backtick quoted)
fn try_parse_string_literal(s: &str) -> Option<String> {
    let quoted = |q: char| s.len() >= 2 && s.starts_with(q) && s.ends_with(q);
    if quoted('"') || quoted('\'') {
        let inner = &s[1..s.len() - 1];
        if has_unescaped(inner, s.as_bytes()[0]) {
            return None;
        }
        return Some(unescape_string(inner));
    }
    if quoted('`') {
        let inner = &s[1..s.len() - 1];
        if !inner.contains("${") && !has_unescaped(inner, b'`') {
            return Some(unescape_string(inner));
        }
    }
    None
}

fn has_unescaped(inner: &str, quote: u8) -> bool {
    let bytes = inner.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == quote {
            return true;
        }
        i += 1;
    }
    false
}

/// Unescape basic string escape sequences
fn unescape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some(other) => result.push(other),
                None => result.push('\\'),
            }
        } else {
            result.push(c);
        }
    }

    result
}

/// Byte offsets of top-level occurrences of `op` outside strings and brackets.
fn top_level_positions(expr: &str, op: &str) -> Vec<usize> {
    let bytes = expr.as_bytes();
    let op_bytes = op.as_bytes();
    let mut positions = Vec::new();
    let mut depth: i32 = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b'"' | b'\'' | b'`' => {
                // Skip string content
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            _ if depth == 0 && bytes[i..].starts_with(op_bytes) => {
                positions.push(i);
                i += op_bytes.len();
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    positions
}

/// Try to resolve a ternary expression
fn try_resolve_ternary(expr: &str, scope: &dyn EvalScope) -> Option<Value> {
    let question = *top_level_positions(expr, "?").first()?;
    let colon = top_level_positions(expr, ":")
        .into_iter()
        .find(|&c| c > question)?;

    let condition = try_eval(&expr[..question], scope)?;
    if is_truthy(&condition) {
        try_eval(&expr[question + 1..colon], scope)
    } else {
        try_eval(&expr[colon + 1..], scope)
    }
}

fn try_resolve_comparison(expr: &str, scope: &dyn EvalScope) -> Option<Value> {
    for op in ["===", "!==", "==", "!=", ">=", "<=", ">", "<"] {
        let positions = top_level_positions(expr, op);
        let Some(&at) = positions.first() else {
            continue;
        };
        // ">=" is also found by ">", "==" inside "===" etc; only the longest wins.
        let before = expr[..at].chars().last();
        if matches!(before, Some('=' | '!' | '<' | '>')) {
            continue;
        }
        let lhs = try_eval(&expr[..at], scope)?;
        let rhs_code = &expr[at + op.len()..];
        if rhs_code.starts_with('=') {
            continue;
        }
        let rhs = try_eval(rhs_code, scope)?;
        let result = match op {
            "===" | "==" => lhs == rhs,
            "!==" | "!=" => lhs != rhs,
            _ => {
                let (l, r) = (lhs.as_f64()?, rhs.as_f64()?);
                match op {
                    ">=" => l >= r,
                    "<=" => l <= r,
                    ">" => l > r,
                    _ => l < r,
                }
            }
        };
        return Some(Value::Bool(result));
    }
    None
}

/// Try to resolve `+` as numeric addition or string concatenation
fn try_resolve_concatenation(expr: &str, scope: &dyn EvalScope) -> Option<Value> {
    let positions = top_level_positions(expr, "+");
    if positions.is_empty() || positions[0] == 0 {
        return None;
    }

    let mut parts = Vec::with_capacity(positions.len() + 1);
    let mut start = 0;
    for pos in positions {
        parts.push(&expr[start..pos]);
        start = pos + 1;
    }
    parts.push(&expr[start..]);

    let mut acc = try_eval(parts[0], scope)?;
    for part in &parts[1..] {
        let next = try_eval(part, scope)?;
        acc = match (acc.as_f64(), next.as_f64()) {
            (Some(a), Some(b)) if !acc.is_string() && !next.is_string() => number(a + b)?,
            _ => Value::String(format!("{}{}", display(&acc), display(&next))),
        };
    }
    Some(acc)
}

/// JSON-like literal: quotes bare and single-quoted keys, converts single-quoted
/// strings, drops trailing commas.
fn try_parse_json_like(expr: &str) -> Option<Value> {
    let quoted_keys = OBJECT_KEY.replace_all(expr, |caps: &regex::Captures| {
        let key = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str())
            .unwrap_or_default();
        format!("{}\"{}\":", &caps[1], key)
    });
    let double_quoted = SINGLE_QUOTED.replace_all(&quoted_keys, |caps: &regex::Captures| {
        serde_json::to_string(&unescape_string(&caps[1])).unwrap_or_default()
    });
    let cleaned = double_quoted.replace(",]", "]").replace(",}", "}");
    serde_json::from_str::<Map<String, Value>>(&cleaned)
        .map(Value::Object)
        .or_else(|_| serde_json::from_str::<Value>(&cleaned))
        .ok()
}

/// Check if a string is a valid JavaScript identifier
fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    struct MapScope {
        fields: HashMap<String, Value>,
        locals: HashMap<String, Value>,
    }

    impl EvalScope for MapScope {
        fn field(&self, name: &str) -> Option<Value> {
            self.fields.get(name).cloned()
        }

        fn local(&self, name: &str) -> Option<Value> {
            self.locals.get(name).cloned()
        }
    }

    fn scope() -> MapScope {
        let mut fields = HashMap::new();
        fields.insert("title".to_string(), json!("Home"));
        fields.insert("count".to_string(), json!(10));
        fields.insert("items".to_string(), json!(["a", "b"]));
        let mut locals = HashMap::new();
        locals.insert("item".to_string(), json!({ "name": "first" }));
        MapScope { fields, locals }
    }

    #[test]
    fn test_literals() {
        assert_eq!(static_eval("\"Hello\"", &EmptyScope), json!("Hello"));
        assert_eq!(static_eval("'World';", &EmptyScope), json!("World"));
        assert_eq!(static_eval("42", &EmptyScope), json!(42));
        assert_eq!(static_eval("1.5", &EmptyScope), json!(1.5));
        assert_eq!(static_eval("true", &EmptyScope), json!(true));
        assert_eq!(static_eval("undefined", &EmptyScope), Value::Null);
    }

    #[test]
    fn test_field_and_local_lookup() {
        let s = scope();
        assert_eq!(static_eval("this.title", &s), json!("Home"));
        assert_eq!(static_eval("item.name", &s), json!("first"));
        assert_eq!(static_eval("this.items.length", &s), json!(2));
        assert_eq!(static_eval("this.missing", &s), Value::Null);
    }

    #[test]
    fn test_concatenation_and_addition() {
        let s = scope();
        assert_eq!(static_eval("'Count: ' + this.count", &s), json!("Count: 10"));
        assert_eq!(static_eval("this.count + 5", &s), json!(15));
    }

    #[test]
    fn test_conditions() {
        let s = scope();
        assert_eq!(static_eval("this.count > 5", &s), json!(true));
        assert_eq!(static_eval("this.count === 10", &s), json!(true));
        assert_eq!(static_eval("this.title !== 'Home'", &s), json!(false));
        assert_eq!(static_eval("!this.title", &s), json!(false));
        assert_eq!(static_eval("this.count >= 11 ? 'big' : 'small'", &s), json!("small"));
    }

    #[test]
    fn test_json_like_literals() {
        assert_eq!(
            static_eval("[1, 2, 'three',]", &EmptyScope),
            json!([1, 2, "three"])
        );
        assert_eq!(
            static_eval("{ name: 'x', 'age': 3 }", &EmptyScope),
            json!({ "name": "x", "age": 3 })
        );
    }

    #[test]
    fn test_unsupported_is_null() {
        assert_eq!(static_eval("compute(this.count)", &scope()), Value::Null);
        assert!(!is_truthy(&Value::Null));
        assert!(is_truthy(&json!([])));
    }
}
