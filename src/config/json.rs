//! Flat JSON object codec for [`Document`].
//!
//! Only what a configuration document needs: one object of scalar values.
//! The parser is strict so that half-written or hand-mangled files are
//! rejected instead of loading as a partial configuration.

use super::{ConfigError, Document, MAX_KEY_LEN, MAX_STRING_LEN, Value};
use core::fmt::Write;
use core::str::FromStr;
use heapless::String;

pub(crate) fn write_document<W: Write>(doc: &Document, out: &mut W) -> Result<(), ConfigError> {
    out.write_char('{').map_err(|_| ConfigError::TooLarge)?;
    for (i, (name, value)) in doc.iter().enumerate() {
        if i > 0 {
            out.write_char(',').map_err(|_| ConfigError::TooLarge)?;
        }
        write_string(name, out)?;
        out.write_char(':').map_err(|_| ConfigError::TooLarge)?;
        write_value(value, out)?;
    }
    out.write_char('}').map_err(|_| ConfigError::TooLarge)
}

fn write_value<W: Write>(value: &Value, out: &mut W) -> Result<(), ConfigError> {
    let written = match value {
        Value::Bool(true) => out.write_str("true"),
        Value::Bool(false) => out.write_str("false"),
        Value::Int(i) => write!(out, "{}", i),
        Value::Float(f) if !f.is_finite() => return Err(ConfigError::InvalidValue),
        // Debug keeps a fraction or exponent, so the value reads back as a float
        Value::Float(f) => write!(out, "{:?}", f),
        Value::Str(s) => return write_string(s, out),
    };
    written.map_err(|_| ConfigError::TooLarge)
}

fn write_string<W: Write>(s: &str, out: &mut W) -> Result<(), ConfigError> {
    let mut write = || -> core::fmt::Result {
        out.write_char('"')?;
        for c in s.chars() {
            match c {
                '"' => out.write_str("\\\"")?,
                '\\' => out.write_str("\\\\")?,
                '\n' => out.write_str("\\n")?,
                '\r' => out.write_str("\\r")?,
                '\t' => out.write_str("\\t")?,
                '\u{08}' => out.write_str("\\b")?,
                '\u{0C}' => out.write_str("\\f")?,
                c if (c as u32) < 0x20 => write!(out, "\\u{:04x}", c as u32)?,
                c => out.write_char(c)?,
            }
        }
        out.write_char('"')
    };
    write().map_err(|_| ConfigError::TooLarge)
}

pub(crate) fn parse_document(input: &[u8]) -> Result<Document, ConfigError> {
    let src = core::str::from_utf8(input).map_err(|_| ConfigError::ParseError)?;
    let mut parser = Parser { src, pos: 0 };
    let doc = parser.object()?;
    parser.skip_whitespace();
    if parser.pos != src.len() {
        return Err(ConfigError::ParseError);
    }
    Ok(doc)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn next_byte(&mut self) -> Result<u8, ConfigError> {
        let b = self.peek().ok_or(ConfigError::ParseError)?;
        self.pos += 1;
        Ok(b)
    }

    fn expect(&mut self, expected: u8) -> Result<(), ConfigError> {
        if self.next_byte()? == expected {
            Ok(())
        } else {
            Err(ConfigError::ParseError)
        }
    }

    fn expect_literal(&mut self, literal: &str) -> Result<(), ConfigError> {
        if self.src[self.pos..].starts_with(literal) {
            self.pos += literal.len();
            Ok(())
        } else {
            Err(ConfigError::ParseError)
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(b' ' | b'\t' | b'\n' | b'\r') = self.peek() {
            self.pos += 1;
        }
    }

    fn object(&mut self) -> Result<Document, ConfigError> {
        let mut doc = Document::new();
        self.skip_whitespace();
        self.expect(b'{')?;
        self.skip_whitespace();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(doc);
        }
        loop {
            self.skip_whitespace();
            let name: String<MAX_KEY_LEN> = self.string()?;
            self.skip_whitespace();
            self.expect(b':')?;
            self.skip_whitespace();
            let value = self.value()?;
            if doc.contains_key(&name) {
                return Err(ConfigError::ParseError);
            }
            doc.insert(&name, value)
                .map_err(|_| ConfigError::ParseError)?;
            self.skip_whitespace();
            match self.next_byte()? {
                b',' => continue,
                b'}' => return Ok(doc),
                _ => return Err(ConfigError::ParseError),
            }
        }
    }

    fn value(&mut self) -> Result<Value, ConfigError> {
        match self.peek().ok_or(ConfigError::ParseError)? {
            b'"' => Ok(Value::Str(self.string::<MAX_STRING_LEN>()?)),
            b't' => self.expect_literal("true").map(|_| Value::Bool(true)),
            b'f' => self.expect_literal("false").map(|_| Value::Bool(false)),
            b'-' | b'0'..=b'9' => self.number(),
            // null, nested objects and arrays have no place in a flat document
            _ => Err(ConfigError::ParseError),
        }
    }

    fn digits(&mut self) -> usize {
        let start = self.pos;
        while let Some(b'0'..=b'9') = self.peek() {
            self.pos += 1;
        }
        self.pos - start
    }

    fn number(&mut self) -> Result<Value, ConfigError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        match self.peek() {
            Some(b'0') => self.pos += 1,
            Some(b'1'..=b'9') => {
                self.digits();
            }
            _ => return Err(ConfigError::ParseError),
        }

        let mut is_float = false;
        if self.peek() == Some(b'.') {
            self.pos += 1;
            is_float = true;
            if self.digits() == 0 {
                return Err(ConfigError::ParseError);
            }
        }
        if let Some(b'e' | b'E') = self.peek() {
            self.pos += 1;
            is_float = true;
            if let Some(b'+' | b'-') = self.peek() {
                self.pos += 1;
            }
            if self.digits() == 0 {
                return Err(ConfigError::ParseError);
            }
        }

        let text = &self.src[start..self.pos];
        if !is_float {
            if let Ok(i) = i64::from_str(text) {
                return Ok(Value::Int(i));
            }
        }
        match f64::from_str(text) {
            Ok(f) if f.is_finite() => Ok(Value::Float(f)),
            _ => Err(ConfigError::ParseError),
        }
    }

    fn hex4(&mut self) -> Result<u32, ConfigError> {
        let digits = self
            .src
            .get(self.pos..self.pos + 4)
            .ok_or(ConfigError::ParseError)?;
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ConfigError::ParseError);
        }
        self.pos += 4;
        u32::from_str_radix(digits, 16).map_err(|_| ConfigError::ParseError)
    }

    fn unicode_escape(&mut self) -> Result<char, ConfigError> {
        let first = self.hex4()?;
        let code = match first {
            0xD800..=0xDBFF => {
                self.expect_literal("\\u")?;
                let low = self.hex4()?;
                if !(0xDC00..=0xDFFF).contains(&low) {
                    return Err(ConfigError::ParseError);
                }
                0x10000 + ((first - 0xD800) << 10) + (low - 0xDC00)
            }
            0xDC00..=0xDFFF => return Err(ConfigError::ParseError),
            other => other,
        };
        char::from_u32(code).ok_or(ConfigError::ParseError)
    }

    fn string<const N: usize>(&mut self) -> Result<String<N>, ConfigError> {
        self.expect(b'"')?;
        let mut out = String::new();
        loop {
            let c = match self.peek().ok_or(ConfigError::ParseError)? {
                b'"' => {
                    self.pos += 1;
                    return Ok(out);
                }
                b'\\' => {
                    self.pos += 1;
                    match self.next_byte()? {
                        b'"' => '"',
                        b'\\' => '\\',
                        b'/' => '/',
                        b'b' => '\u{08}',
                        b'f' => '\u{0C}',
                        b'n' => '\n',
                        b'r' => '\r',
                        b't' => '\t',
                        b'u' => self.unicode_escape()?,
                        _ => return Err(ConfigError::ParseError),
                    }
                }
                b if b < 0x20 => return Err(ConfigError::ParseError),
                _ => {
                    // `pos` always sits on a char boundary here
                    let c = self.src[self.pos..]
                        .chars()
                        .next()
                        .ok_or(ConfigError::ParseError)?;
                    self.pos += c.len_utf8();
                    c
                }
            };
            out.push(c).map_err(|_| ConfigError::ParseError)?;
        }
    }
}
