//! Purpose: Model declared column types as a closed variant set decided once at schema load.
//! Exports: `CqlType`, `NativeType`.
//! Role: Every encoder and parser dispatches on these variants instead of type-name strings.
//! Invariants: `CqlType::parse` rejects unknown names; there is no fallback type.
//! Invariants: `Display` renders a name that `parse` accepts and maps to an equal value.
use std::fmt;

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum NativeType {
    Ascii,
    Bigint,
    Boolean,
    Date,
    Decimal,
    Double,
    Duration,
    Float,
    Inet,
    Int,
    Smallint,
    Text,
    Time,
    Timestamp,
    Timeuuid,
    Tinyint,
    Uuid,
    Varchar,
    Varint,
}

impl NativeType {
    pub fn from_name(name: &str) -> Option<Self> {
        let native = match name {
            "ascii" => Self::Ascii,
            "bigint" => Self::Bigint,
            "boolean" => Self::Boolean,
            "date" => Self::Date,
            "decimal" => Self::Decimal,
            "double" => Self::Double,
            "duration" => Self::Duration,
            "float" => Self::Float,
            "inet" => Self::Inet,
            "int" => Self::Int,
            "smallint" => Self::Smallint,
            "text" => Self::Text,
            "time" => Self::Time,
            "timestamp" => Self::Timestamp,
            "timeuuid" => Self::Timeuuid,
            "tinyint" => Self::Tinyint,
            "uuid" => Self::Uuid,
            "varchar" => Self::Varchar,
            "varint" => Self::Varint,
            _ => return None,
        };
        Some(native)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ascii => "ascii",
            Self::Bigint => "bigint",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Decimal => "decimal",
            Self::Double => "double",
            Self::Duration => "duration",
            Self::Float => "float",
            Self::Inet => "inet",
            Self::Int => "int",
            Self::Smallint => "smallint",
            Self::Text => "text",
            Self::Time => "time",
            Self::Timestamp => "timestamp",
            Self::Timeuuid => "timeuuid",
            Self::Tinyint => "tinyint",
            Self::Uuid => "uuid",
            Self::Varchar => "varchar",
            Self::Varint => "varint",
        }
    }

    /// Inclusive range for fixed-width integer types.
    pub fn integer_range(self) -> Option<(i64, i64)> {
        match self {
            Self::Tinyint => Some((i8::MIN.into(), i8::MAX.into())),
            Self::Smallint => Some((i16::MIN.into(), i16::MAX.into())),
            Self::Int => Some((i32::MIN.into(), i32::MAX.into())),
            Self::Bigint => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    pub fn is_textual(self) -> bool {
        matches!(self, Self::Ascii | Self::Text | Self::Varchar)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum CqlType {
    Native(NativeType),
    Blob,
    Counter,
    List(Box<CqlType>),
    Set(Box<CqlType>),
    Map(Box<CqlType>, Box<CqlType>),
    Tuple(Vec<CqlType>),
    Frozen(Box<CqlType>),
}

impl CqlType {
    pub fn parse(input: &str) -> Result<Self, Error> {
        let mut parser = TypeParser { src: input, pos: 0 };
        let ty = parser.parse_type()?;
        parser.skip_ws();
        if parser.pos != input.len() {
            return Err(parser.error());
        }
        Ok(ty)
    }

    pub fn list(elem: CqlType) -> Self {
        Self::List(Box::new(elem))
    }

    pub fn set(elem: CqlType) -> Self {
        Self::Set(Box::new(elem))
    }

    pub fn map(key: CqlType, value: CqlType) -> Self {
        Self::Map(Box::new(key), Box::new(value))
    }

    pub fn frozen(inner: CqlType) -> Self {
        Self::Frozen(Box::new(inner))
    }

    /// The type with any `frozen<>` wrappers removed; literal syntax ignores freezing.
    pub fn unfrozen(&self) -> &CqlType {
        match self {
            Self::Frozen(inner) => inner.unfrozen(),
            other => other,
        }
    }

    pub fn is_counter(&self) -> bool {
        matches!(self.unfrozen(), Self::Counter)
    }
}

impl From<NativeType> for CqlType {
    fn from(value: NativeType) -> Self {
        Self::Native(value)
    }
}

impl fmt::Display for CqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native(native) => f.write_str(native.name()),
            Self::Blob => f.write_str("blob"),
            Self::Counter => f.write_str("counter"),
            Self::List(elem) => write!(f, "list<{elem}>"),
            Self::Set(elem) => write!(f, "set<{elem}>"),
            Self::Map(key, value) => write!(f, "map<{key}, {value}>"),
            Self::Tuple(items) => {
                f.write_str("tuple<")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(">")
            }
            Self::Frozen(inner) => write!(f, "frozen<{inner}>"),
        }
    }
}

struct TypeParser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> TypeParser<'a> {
    fn error(&self) -> Error {
        Error::new(ErrorKind::Encode)
            .with_message(format!("unrecognized column type `{}`", self.src))
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn skip_ws(&mut self) {
        while let Some(ch) = self.peek() {
            if !ch.is_whitespace() {
                break;
            }
            self.pos += ch.len_utf8();
        }
    }

    fn ident(&mut self) -> &'a str {
        self.skip_ws();
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if !(ch.is_ascii_alphanumeric() || ch == '_') {
                break;
            }
            self.pos += 1;
        }
        &self.src[start..self.pos]
    }

    fn parse_type(&mut self) -> Result<CqlType, Error> {
        let name = self.ident().to_ascii_lowercase();
        let ty = match name.as_str() {
            "" => return Err(self.error()),
            "list" => CqlType::list(self.single_arg()?),
            "set" => CqlType::set(self.single_arg()?),
            "frozen" => CqlType::frozen(self.single_arg()?),
            "map" => {
                let mut args = self.args()?;
                if args.len() != 2 {
                    return Err(self.error());
                }
                let value = args.pop().ok_or_else(|| self.error())?;
                let key = args.pop().ok_or_else(|| self.error())?;
                CqlType::map(key, value)
            }
            "tuple" => CqlType::Tuple(self.args()?),
            "blob" => CqlType::Blob,
            "counter" => CqlType::Counter,
            other => NativeType::from_name(other)
                .map(CqlType::Native)
                .ok_or_else(|| self.error())?,
        };
        Ok(ty)
    }

    fn single_arg(&mut self) -> Result<CqlType, Error> {
        let mut args = self.args()?;
        if args.len() != 1 {
            return Err(self.error());
        }
        args.pop().ok_or_else(|| self.error())
    }

    fn args(&mut self) -> Result<Vec<CqlType>, Error> {
        self.skip_ws();
        if self.peek() != Some('<') {
            return Err(self.error());
        }
        self.pos += 1;
        let mut args = Vec::new();
        loop {
            args.push(self.parse_type()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('>') => {
                    self.pos += 1;
                    return Ok(args);
                }
                _ => return Err(self.error()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CqlType, NativeType};
    use crate::core::error::ErrorKind;

    #[test]
    fn parses_scalars_case_insensitively() {
        assert_eq!(
            CqlType::parse("INT").unwrap(),
            CqlType::Native(NativeType::Int)
        );
        assert_eq!(CqlType::parse(" blob ").unwrap(), CqlType::Blob);
        assert_eq!(CqlType::parse("counter").unwrap(), CqlType::Counter);
    }

    #[test]
    fn parses_nested_collections() {
        let ty = CqlType::parse("map<text, frozen<list<int>>>").unwrap();
        assert_eq!(
            ty,
            CqlType::map(
                NativeType::Text.into(),
                CqlType::frozen(CqlType::list(NativeType::Int.into()))
            )
        );
        assert_eq!(ty.to_string(), "map<text, frozen<list<int>>>");
    }

    #[test]
    fn tuple_display_reparses() {
        let ty = CqlType::parse("tuple<int,text, uuid>").unwrap();
        let rendered = ty.to_string();
        assert_eq!(rendered, "tuple<int, text, uuid>");
        assert_eq!(CqlType::parse(&rendered).unwrap(), ty);
    }

    #[test]
    fn unknown_types_are_encode_errors() {
        for input in ["", "string", "list<int", "map<int>", "set<int> x", "list<>"] {
            let err = CqlType::parse(input).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Encode, "input {input:?}");
        }
    }

    #[test]
    fn frozen_is_transparent_for_dispatch() {
        let ty = CqlType::parse("frozen<set<text>>").unwrap();
        assert_eq!(ty.unfrozen(), &CqlType::set(NativeType::Text.into()));
        assert!(!ty.is_counter());
    }
}
