//! Purpose: Tokenize CQL statement text and parse typed literals back into values.
//! Exports: `Token`, `tokenize`, `Parser`, `parse_literal`.
//! Role: Reference grammar for everything the encoder emits; the in-memory store builds its
//! statement parser on top of `Parser`.
//! Invariants: Literal parsing is typed; the declared column type decides which tokens are valid.
//! Invariants: Bare identifiers are case-insensitive (lower-cased); quoted ones are kept verbatim.
use std::fmt;

use time::Date;
use uuid::Uuid;

use crate::core::error::{Error, ErrorKind};
use crate::core::types::{CqlType, NativeType};
use crate::core::value::{
    DATE_FORMAT, Value, is_numeric_text, parse_float_text, parse_time_text, parse_timestamp_text,
    timestamp_from_millis,
};

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Ident(String),
    QuotedIdent(String),
    Str(String),
    /// Signed numeric word; also carries `-Infinity` and duration literals such as `1h30m`.
    Number(String),
    Hex(String),
    Uuid(Uuid),
    Symbol(char),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(text) | Self::Number(text) => f.write_str(text),
            Self::QuotedIdent(text) => write!(f, "\"{text}\""),
            Self::Str(text) => write!(f, "'{text}'"),
            Self::Hex(digits) => write!(f, "0x{digits}"),
            Self::Uuid(uuid) => write!(f, "{uuid}"),
            Self::Symbol(ch) => write!(f, "{ch}"),
        }
    }
}

const SYMBOLS: &str = "(),;=+{}[]:<>.*?";

fn parse_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Parse).with_message(message)
}

pub fn tokenize(text: &str) -> Result<Vec<Token>, Error> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        let next = chars.get(i + 1).copied();
        if ch.is_whitespace() {
            i += 1;
        } else if ch == '\'' || ch == '"' {
            let (body, end) = quoted(&chars, i, ch)?;
            tokens.push(if ch == '\'' {
                Token::Str(body)
            } else {
                Token::QuotedIdent(body)
            });
            i = end;
        } else if ch == '$' && next == Some('$') {
            let start = i + 2;
            let close = (start..chars.len().saturating_sub(1))
                .find(|&j| chars[j] == '$' && chars[j + 1] == '$')
                .ok_or_else(|| parse_error("unterminated $$ string"))?;
            tokens.push(Token::Str(chars[start..close].iter().collect()));
            i = close + 2;
        } else if ch == '0' && matches!(next, Some('x' | 'X')) {
            let start = i + 2;
            let end = scan(&chars, start, |c| c.is_ascii_hexdigit());
            tokens.push(Token::Hex(chars[start..end].iter().collect()));
            i = end;
        } else if let Some(uuid) = uuid_at(&chars, i) {
            tokens.push(Token::Uuid(uuid));
            i += 36;
        } else if ch.is_ascii_digit()
            || (ch == '-' && next.is_some_and(|c| c.is_ascii_alphanumeric() || c == '.'))
        {
            let mut end = i + 1;
            while let Some(&c) = chars.get(end) {
                let exponent_sign = matches!(c, '+' | '-') && matches!(chars[end - 1], 'e' | 'E');
                if !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || exponent_sign) {
                    break;
                }
                end += 1;
            }
            tokens.push(Token::Number(chars[i..end].iter().collect()));
            i = end;
        } else if ch.is_alphabetic() || ch == '_' {
            let end = scan(&chars, i, |c| c.is_alphanumeric() || c == '_');
            tokens.push(Token::Ident(chars[i..end].iter().collect()));
            i = end;
        } else if SYMBOLS.contains(ch) {
            tokens.push(Token::Symbol(ch));
            i += 1;
        } else {
            return Err(parse_error(format!("unexpected character `{ch}`")));
        }
    }
    Ok(tokens)
}

fn scan(chars: &[char], start: usize, keep: impl Fn(char) -> bool) -> usize {
    let mut end = start;
    while end < chars.len() && keep(chars[end]) {
        end += 1;
    }
    end
}

/// Reads a quoted run starting at `start`; a doubled quote is an escaped quote.
fn quoted(chars: &[char], start: usize, quote: char) -> Result<(String, usize), Error> {
    let mut body = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                body.push(quote);
                i += 2;
                continue;
            }
            return Ok((body, i + 1));
        }
        body.push(chars[i]);
        i += 1;
    }
    Err(parse_error(format!("unterminated {quote}-quoted text")))
}

fn uuid_at(chars: &[char], start: usize) -> Option<Uuid> {
    let candidate = chars.get(start..start + 36)?;
    if chars
        .get(start + 36)
        .is_some_and(|c| c.is_ascii_alphanumeric() || *c == '-')
    {
        return None;
    }
    let hyphens_ok = candidate
        .iter()
        .enumerate()
        .all(|(idx, c)| matches!(idx, 8 | 13 | 18 | 23) == (*c == '-'));
    if !hyphens_ok {
        return None;
    }
    let text: String = candidate.iter().collect();
    Uuid::parse_str(&text).ok()
}

pub fn parse_literal(text: &str, ty: &CqlType) -> Result<Value, Error> {
    let mut parser = Parser::new(text)?;
    let value = parser.literal(ty)?;
    parser.finish()?;
    Ok(value)
}

#[derive(Debug)]
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(text: &str) -> Result<Self, Error> {
        Ok(Self {
            tokens: tokenize(text)?,
            pos: 0,
        })
    }

    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    pub fn next_token(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    pub fn is_done(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub fn error(&self, expected: &str) -> Error {
        match self.peek() {
            Some(token) => parse_error(format!("expected {expected}, found `{token}`")),
            None => parse_error(format!("expected {expected}, found end of statement")),
        }
    }

    /// Accepts one optional trailing `;` and then requires the end of input.
    pub fn finish(&mut self) -> Result<(), Error> {
        self.eat_symbol(';');
        if self.is_done() {
            Ok(())
        } else {
            Err(self.error("end of statement"))
        }
    }

    pub fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword))
    }

    pub fn eat_keyword(&mut self, keyword: &str) -> bool {
        let matched = self.peek_keyword(keyword);
        if matched {
            self.pos += 1;
        }
        matched
    }

    pub fn expect_keyword(&mut self, keyword: &str) -> Result<(), Error> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(&keyword.to_ascii_uppercase()))
        }
    }

    /// Next bare word, lower-cased, without treating it as a name.
    pub fn keyword(&mut self) -> Result<String, Error> {
        match self.peek() {
            Some(Token::Ident(word)) => {
                let word = word.to_ascii_lowercase();
                self.pos += 1;
                Ok(word)
            }
            _ => Err(self.error("keyword")),
        }
    }

    pub fn eat_symbol(&mut self, symbol: char) -> bool {
        let matched = self.peek() == Some(&Token::Symbol(symbol));
        if matched {
            self.pos += 1;
        }
        matched
    }

    pub fn expect_symbol(&mut self, symbol: char) -> Result<(), Error> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(self.error(&format!("`{symbol}`")))
        }
    }

    pub fn identifier(&mut self) -> Result<String, Error> {
        match self.peek() {
            Some(Token::Ident(word)) => {
                let name = word.to_ascii_lowercase();
                self.pos += 1;
                Ok(name)
            }
            Some(Token::QuotedIdent(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("identifier")),
        }
    }

    /// `name` or `keyspace.name`.
    pub fn qualified_name(&mut self) -> Result<(Option<String>, String), Error> {
        let first = self.identifier()?;
        if self.eat_symbol('.') {
            let second = self.identifier()?;
            Ok((Some(first), second))
        } else {
            Ok((None, first))
        }
    }

    pub fn string(&mut self) -> Result<String, Error> {
        match self.peek() {
            Some(Token::Str(text)) => {
                let text = text.clone();
                self.pos += 1;
                Ok(text)
            }
            _ => Err(self.error("string literal")),
        }
    }

    pub fn unsigned(&mut self) -> Result<u64, Error> {
        match self.peek() {
            Some(Token::Number(raw)) => {
                let value = raw.parse().map_err(|_| self.error("unsigned integer"))?;
                self.pos += 1;
                Ok(value)
            }
            _ => Err(self.error("unsigned integer")),
        }
    }

    /// A column type such as `map<text, frozen<list<int>>>`.
    pub fn cql_type(&mut self) -> Result<CqlType, Error> {
        let mut text = String::new();
        let mut depth = 0usize;
        loop {
            match self.peek() {
                Some(Token::Ident(word)) => text.push_str(word),
                Some(Token::Symbol('<')) => {
                    depth += 1;
                    text.push('<');
                }
                Some(Token::Symbol('>')) if depth > 0 => {
                    depth -= 1;
                    text.push('>');
                }
                Some(Token::Symbol(',')) if depth > 0 => text.push(','),
                _ => return Err(self.error("column type")),
            }
            self.pos += 1;
            if depth == 0 && self.peek() != Some(&Token::Symbol('<')) {
                break;
            }
        }
        CqlType::parse(&text).map_err(|err| {
            parse_error(err.message().unwrap_or("unrecognized column type").to_string())
        })
    }

    pub fn literal(&mut self, ty: &CqlType) -> Result<Value, Error> {
        if self.eat_keyword("null") {
            return Ok(Value::Null);
        }
        match ty.unfrozen() {
            CqlType::Blob => match self.peek() {
                Some(Token::Hex(digits)) => {
                    let bytes = hex::decode(digits).map_err(|_| self.error("blob literal"))?;
                    self.pos += 1;
                    Ok(Value::Blob(bytes))
                }
                _ => Err(self.error("blob literal")),
            },
            CqlType::Counter => self.scalar(NativeType::Bigint),
            CqlType::List(elem) => self.items(('[', ']'), elem).map(Value::List),
            CqlType::Set(elem) => self.items(('{', '}'), elem).map(Value::Set),
            CqlType::Map(key_ty, value_ty) => {
                self.expect_symbol('{')?;
                let mut entries = Vec::new();
                if self.eat_symbol('}') {
                    return Ok(Value::Map(entries));
                }
                loop {
                    let key = self.element(key_ty)?;
                    self.expect_symbol(':')?;
                    let value = self.element(value_ty)?;
                    entries.push((key, value));
                    if !self.eat_symbol(',') {
                        break;
                    }
                }
                self.expect_symbol('}')?;
                Ok(Value::Map(entries))
            }
            CqlType::Tuple(types) => {
                self.expect_symbol('(')?;
                let mut items = Vec::with_capacity(types.len());
                for (idx, item_ty) in types.iter().enumerate() {
                    if idx > 0 {
                        self.expect_symbol(',')?;
                    }
                    items.push(self.element(item_ty)?);
                }
                self.expect_symbol(')')?;
                Ok(Value::Tuple(items))
            }
            CqlType::Native(native) => self.scalar(*native),
            CqlType::Frozen(inner) => self.literal(inner),
        }
    }

    fn element(&mut self, ty: &CqlType) -> Result<Value, Error> {
        let value = self.literal(ty)?;
        if value.is_null() {
            return Err(parse_error("collection elements cannot be NULL"));
        }
        Ok(value)
    }

    fn items(&mut self, (open, close): (char, char), elem: &CqlType) -> Result<Vec<Value>, Error> {
        self.expect_symbol(open)?;
        let mut items = Vec::new();
        if self.eat_symbol(close) {
            return Ok(items);
        }
        loop {
            items.push(self.element(elem)?);
            if !self.eat_symbol(',') {
                break;
            }
        }
        self.expect_symbol(close)?;
        Ok(items)
    }

    fn scalar(&mut self, native: NativeType) -> Result<Value, Error> {
        let value = self.peek().and_then(|token| scalar_from_token(native, token));
        match value {
            Some(value) => {
                self.pos += 1;
                Ok(value)
            }
            None => Err(self.error(&format!("{} literal", native.name()))),
        }
    }
}

fn scalar_from_token(native: NativeType, token: &Token) -> Option<Value> {
    if let Some((min, max)) = native.integer_range() {
        let Token::Number(raw) = token else {
            return None;
        };
        let number: i64 = raw.parse().ok()?;
        return (min..=max).contains(&number).then_some(Value::Int(number));
    }
    let value = match (native, token) {
        (native, Token::Str(text)) if native.is_textual() => Value::Text(text.clone()),
        (NativeType::Boolean, Token::Ident(word)) => match word.to_ascii_lowercase().as_str() {
            "true" => Value::Boolean(true),
            "false" => Value::Boolean(false),
            _ => return None,
        },
        (NativeType::Varint, Token::Number(raw)) if is_numeric_text(raw, false) => {
            Value::Decimal(raw.clone())
        }
        (NativeType::Decimal, Token::Number(raw)) if is_numeric_text(raw, true) => {
            Value::Decimal(raw.clone())
        }
        (NativeType::Float | NativeType::Double, Token::Number(raw) | Token::Ident(raw)) => {
            Value::Float(parse_float_text(raw)?)
        }
        (NativeType::Uuid | NativeType::Timeuuid, Token::Uuid(uuid)) => Value::Uuid(*uuid),
        (NativeType::Timestamp, Token::Str(text)) => Value::Timestamp(parse_timestamp_text(text)?),
        (NativeType::Timestamp, Token::Number(raw)) => {
            Value::timestamp(timestamp_from_millis(raw.parse().ok()?)?)
        }
        (NativeType::Date, Token::Str(text)) => Value::Date(Date::parse(text, DATE_FORMAT).ok()?),
        (NativeType::Time, Token::Str(text)) => Value::Time(parse_time_text(text)?),
        (NativeType::Inet, Token::Str(text)) => Value::Inet(text.parse().ok()?),
        (NativeType::Duration, Token::Number(raw) | Token::Ident(raw)) => {
            Value::Duration(raw.clone())
        }
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::{Parser, Token, parse_literal, tokenize};
    use crate::core::encode::encode_value;
    use crate::core::error::ErrorKind;
    use crate::core::types::{CqlType, NativeType};
    use crate::core::value::{Value, parse_timestamp_text};
    use uuid::Uuid;

    #[test]
    fn tokenizes_statement_pieces() {
        let tokens =
            tokenize("UPDATE \"ks\".\"t\" SET hits = hits + -5 WHERE id = 0x0aff;").unwrap();
        assert_eq!(tokens[0], Token::Ident("UPDATE".to_string()));
        assert_eq!(tokens[1], Token::QuotedIdent("ks".to_string()));
        assert_eq!(tokens[2], Token::Symbol('.'));
        assert!(tokens.contains(&Token::Number("-5".to_string())));
        assert!(tokens.contains(&Token::Hex("0aff".to_string())));
        assert_eq!(tokens.last(), Some(&Token::Symbol(';')));
    }

    #[test]
    fn uuid_starting_with_digits_is_one_token() {
        let tokens = tokenize("123e4567-e89b-12d3-a456-426614174000").unwrap();
        assert_eq!(
            tokens,
            vec![Token::Uuid(
                Uuid::parse_str("123e4567-e89b-12d3-a456-426614174000").unwrap()
            )]
        );
    }

    #[test]
    fn strings_keep_escaped_quotes_and_semicolons() {
        let tokens = tokenize("'it''s; fine' $$raw 'text'$$").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Str("it's; fine".to_string()),
                Token::Str("raw 'text'".to_string()),
            ]
        );
        assert_eq!(tokenize("'open").unwrap_err().kind(), ErrorKind::Parse);
    }

    #[test]
    fn encoded_collections_parse_back_equal() {
        let ty = CqlType::map(
            NativeType::Text.into(),
            CqlType::frozen(CqlType::set(NativeType::Double.into())),
        );
        let value = Value::Map(vec![
            (
                Value::text("a,b"),
                Value::Set(vec![Value::Float(-0.25), Value::Float(1e21)]),
            ),
            (Value::text("}"), Value::Set(vec![])),
        ]);
        let encoded = encode_value(&value, &ty).unwrap();
        assert_eq!(parse_literal(&encoded, &ty).unwrap(), value);
    }

    #[test]
    fn scalars_parse_back_equal() {
        let ts = parse_timestamp_text("2020-05-06T07:08:09.010Z").unwrap();
        let cases = vec![
            (Value::Timestamp(ts), CqlType::from(NativeType::Timestamp)),
            (Value::Int(-7), NativeType::Smallint.into()),
            (Value::Decimal("123456789012345678901234567890".to_string()), NativeType::Varint.into()),
            (Value::Blob(vec![0xde, 0xad]), CqlType::Blob),
            (Value::Boolean(false), NativeType::Boolean.into()),
            (Value::Inet("::1".parse().unwrap()), NativeType::Inet.into()),
            (Value::Duration("1h30m".to_string()), NativeType::Duration.into()),
            (
                Value::Tuple(vec![Value::Int(1), Value::text("x")]),
                CqlType::Tuple(vec![NativeType::Int.into(), NativeType::Text.into()]),
            ),
        ];
        for (value, ty) in cases {
            let encoded = encode_value(&value, &ty).unwrap();
            assert_eq!(parse_literal(&encoded, &ty).unwrap(), value, "{encoded}");
        }
    }

    #[test]
    fn non_finite_floats_parse() {
        let ty: CqlType = NativeType::Float.into();
        assert!(matches!(parse_literal("NaN", &ty).unwrap(), Value::Float(f) if f.is_nan()));
        assert_eq!(
            parse_literal("-Infinity", &ty).unwrap(),
            Value::Float(f64::NEG_INFINITY)
        );
    }

    #[test]
    fn literal_type_mismatch_is_parse_error() {
        let err = parse_literal("'1'", &NativeType::Int.into()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        let err = parse_literal("[1, NULL]", &CqlType::list(NativeType::Int.into())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn parses_column_types_from_tokens() {
        let mut parser = Parser::new("map<text, frozen<list<int>>> , x").unwrap();
        assert_eq!(
            parser.cql_type().unwrap(),
            CqlType::map(
                NativeType::Text.into(),
                CqlType::frozen(CqlType::list(NativeType::Int.into()))
            )
        );
        parser.expect_symbol(',').unwrap();
        assert_eq!(parser.identifier().unwrap(), "x");
    }
}
