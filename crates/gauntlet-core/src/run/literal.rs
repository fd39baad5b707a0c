//! Tolerant parsing of stored target values.
//!
//! Cache rows written by older tooling hold targets as Python `repr` text
//! (`'blue'`, `('a', 'b')`, `True`, `None`) rather than JSON. Reads try
//! JSON first, then the literal grammar, and finally keep the raw string,
//! so a cache is never unreadable because of its vintage.

use serde_json::{Map, Number, Value};

/// Parse `raw` as JSON, then as a Python-style literal, else return the raw
/// string as a JSON string value.
pub fn parse_lenient(raw: &str) -> Value {
    if let Ok(v) = serde_json::from_str::<Value>(raw) {
        return v;
    }
    if let Some(v) = parse_literal(raw) {
        return v;
    }
    Value::String(raw.to_string())
}

/// Strict entry: the whole input must be one literal.
fn parse_literal(raw: &str) -> Option<Value> {
    let mut p = Parser {
        bytes: raw.as_bytes(),
        pos: 0,
    };
    p.skip_ws();
    let value = p.value()?;
    p.skip_ws();
    if p.pos == p.bytes.len() {
        Some(value)
    } else {
        None
    }
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn keyword(&mut self, word: &str) -> bool {
        if self.bytes[self.pos..].starts_with(word.as_bytes()) {
            self.pos += word.len();
            true
        } else {
            false
        }
    }

    fn value(&mut self) -> Option<Value> {
        self.skip_ws();
        match self.peek()? {
            b'\'' | b'"' => self.string().map(Value::String),
            b'[' => self.sequence(b'[', b']'),
            b'(' => self.sequence(b'(', b')'),
            b'{' => self.dict(),
            b'T' => self.keyword("True").then(|| Value::Bool(true)),
            b'F' => self.keyword("False").then(|| Value::Bool(false)),
            b'N' => self.keyword("None").then_some(Value::Null),
            _ => self.number(),
        }
    }

    fn string(&mut self) -> Option<String> {
        let quote = self.bump()?;
        let mut out = String::new();
        loop {
            match self.bump()? {
                b'\\' => match self.bump()? {
                    b'n' => out.push('\n'),
                    b't' => out.push('\t'),
                    b'r' => out.push('\r'),
                    b'\\' => out.push('\\'),
                    b'\'' => out.push('\''),
                    b'"' => out.push('"'),
                    other => {
                        out.push('\\');
                        out.push(other as char);
                    }
                },
                b if b == quote => return Some(out),
                b if b.is_ascii() => out.push(b as char),
                b => {
                    // Re-assemble multi-byte UTF-8 starting at this byte.
                    let start = self.pos - 1;
                    let width = utf8_width(b);
                    let end = start + width;
                    let chunk = self.bytes.get(start..end)?;
                    out.push_str(std::str::from_utf8(chunk).ok()?);
                    self.pos = end;
                }
            }
        }
    }

    fn sequence(&mut self, open: u8, close: u8) -> Option<Value> {
        if !self.eat(open) {
            return None;
        }
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(close) {
                return Some(Value::Array(items));
            }
            items.push(self.value()?);
            self.skip_ws();
            if !self.eat(b',') {
                self.skip_ws();
                return self.eat(close).then(|| Value::Array(items));
            }
        }
    }

    fn dict(&mut self) -> Option<Value> {
        if !self.eat(b'{') {
            return None;
        }
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.eat(b'}') {
                return Some(Value::Object(map));
            }
            let key = match self.peek()? {
                b'\'' | b'"' => self.string()?,
                _ => return None,
            };
            self.skip_ws();
            if !self.eat(b':') {
                return None;
            }
            let value = self.value()?;
            map.insert(key, value);
            self.skip_ws();
            if !self.eat(b',') {
                self.skip_ws();
                return self.eat(b'}').then(|| Value::Object(map));
            }
        }
    }

    fn number(&mut self) -> Option<Value> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'+' | b'-')) {
            self.pos += 1;
        }
        let mut is_float = false;
        while let Some(b) = self.peek() {
            match b {
                b'0'..=b'9' => self.pos += 1,
                b'.' | b'e' | b'E' => {
                    is_float = true;
                    self.pos += 1;
                }
                b'+' | b'-' if is_float => self.pos += 1,
                _ => break,
            }
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).ok()?;
        if text.is_empty() || text == "+" || text == "-" {
            return None;
        }
        if is_float {
            Number::from_f64(text.parse::<f64>().ok()?).map(Value::Number)
        } else {
            text.parse::<i64>().ok().map(|n| Value::Number(n.into()))
        }
    }
}

fn utf8_width(first: u8) -> usize {
    match first {
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::parse_lenient;
    use serde_json::json;

    #[test]
    fn json_passes_through() {
        assert_eq!(parse_lenient(r#"{"a": 1}"#), json!({"a": 1}));
        assert_eq!(parse_lenient("[1, 2, 3]"), json!([1, 2, 3]));
        assert_eq!(parse_lenient("\"quoted\""), json!("quoted"));
        assert_eq!(parse_lenient("42"), json!(42));
    }

    #[test]
    fn python_literals() {
        assert_eq!(parse_lenient("'blue'"), json!("blue"));
        assert_eq!(parse_lenient("('a', 'b')"), json!(["a", "b"]));
        assert_eq!(parse_lenient("['x', 1, 2.5]"), json!(["x", 1, 2.5]));
        assert_eq!(parse_lenient("{'k': 'v', 'n': None}"), json!({"k": "v", "n": null}));
        assert_eq!(parse_lenient("True"), json!(true));
        assert_eq!(parse_lenient("False"), json!(false));
        assert_eq!(parse_lenient("None"), json!(null));
        assert_eq!(parse_lenient("(1,)"), json!([1]));
    }

    #[test]
    fn escapes_and_unicode() {
        assert_eq!(parse_lenient(r"'don\'t'"), json!("don't"));
        assert_eq!(parse_lenient("'line\\nbreak'"), json!("line\nbreak"));
        assert_eq!(parse_lenient("'café'"), json!("café"));
    }

    #[test]
    fn junk_stays_a_string() {
        assert_eq!(parse_lenient("just words"), json!("just words"));
        assert_eq!(parse_lenient("'unclosed"), json!("'unclosed"));
        assert_eq!(parse_lenient("(1, 2) extra"), json!("(1, 2) extra"));
        assert_eq!(parse_lenient(""), json!(""));
    }
}
