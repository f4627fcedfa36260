//! Purpose: Typed cell values and rows as produced by a read cursor.
//! Exports: `Value`, `Row`, date/time formats, and the JSON bridge used by snapshot files.
//! Role: Shared data model for the encoder, the literal parser, and the in-memory store.
//! Invariants: Timestamps are held in UTC at millisecond precision.
//! Invariants: `from_json` is typed; a JSON value that does not fit its column type is rejected.
use std::net::IpAddr;

use serde_json::{Map, Number, Value as JsonValue};
use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, Time, UtcOffset};
use uuid::Uuid;

use crate::core::error::{Error, ErrorKind};
use crate::core::types::{CqlType, NativeType};

pub const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");
pub const TIME_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[hour]:[minute]:[second].[subsecond digits:9]");
const TIME_PARSE_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[hour]:[minute]:[second].[subsecond]");
const TIME_PARSE_FORMAT_WHOLE: &[BorrowedFormatItem<'static>] =
    format_description!("[hour]:[minute]:[second]");
pub const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3][offset_hour sign:mandatory][offset_minute]"
);

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i64),
    Float(f64),
    /// Arbitrary-precision `decimal`/`varint` digits, kept as validated text.
    Decimal(String),
    Duration(String),
    Text(String),
    Blob(Vec<u8>),
    Uuid(Uuid),
    Timestamp(OffsetDateTime),
    Date(Date),
    Time(Time),
    Inet(IpAddr),
    List(Vec<Value>),
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Decimal(_) => "decimal",
            Self::Duration(_) => "duration",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
            Self::Uuid(_) => "uuid",
            Self::Timestamp(_) => "timestamp",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::Inet(_) => "inet",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
            Self::Tuple(_) => "tuple",
        }
    }

    /// Build a timestamp value, normalized to UTC and truncated to milliseconds.
    pub fn timestamp(value: OffsetDateTime) -> Self {
        Self::Timestamp(truncate_to_millis(value))
    }

    pub fn from_json(json: &JsonValue, ty: &CqlType) -> Result<Self, Error> {
        if json.is_null() {
            return Ok(Self::Null);
        }
        let mismatch = || {
            Error::new(ErrorKind::Parse)
                .with_message(format!("json value {json} does not fit column type {ty}"))
        };
        let value = match ty.unfrozen() {
            CqlType::Blob => {
                let text = json.as_str().ok_or_else(mismatch)?;
                Self::Blob(parse_blob_text(text).ok_or_else(mismatch)?)
            }
            CqlType::Counter => Self::Int(json_i64(json).ok_or_else(mismatch)?),
            CqlType::List(elem) => Self::List(json_items(json, elem, mismatch)?),
            CqlType::Set(elem) => Self::Set(json_items(json, elem, mismatch)?),
            CqlType::Map(key_ty, value_ty) => match json {
                JsonValue::Object(entries) => entries
                    .iter()
                    .map(|(key, value)| {
                        Ok((
                            Self::from_json(&JsonValue::String(key.clone()), key_ty)?,
                            Self::from_json(value, value_ty)?,
                        ))
                    })
                    .collect::<Result<Vec<_>, Error>>()
                    .map(Self::Map)?,
                JsonValue::Array(pairs) => pairs
                    .iter()
                    .map(|pair| match pair.as_array().map(Vec::as_slice) {
                        Some([key, value]) => Ok((
                            Self::from_json(key, key_ty)?,
                            Self::from_json(value, value_ty)?,
                        )),
                        _ => Err(mismatch()),
                    })
                    .collect::<Result<Vec<_>, Error>>()
                    .map(Self::Map)?,
                _ => return Err(mismatch()),
            },
            CqlType::Tuple(types) => {
                let items = json.as_array().ok_or_else(mismatch)?;
                if items.len() != types.len() {
                    return Err(mismatch());
                }
                items
                    .iter()
                    .zip(types)
                    .map(|(item, ty)| Self::from_json(item, ty))
                    .collect::<Result<Vec<_>, Error>>()
                    .map(Self::Tuple)?
            }
            CqlType::Native(native) => native_from_json(json, *native).ok_or_else(mismatch)?,
            CqlType::Frozen(_) => return Err(mismatch()),
        };
        Ok(value)
    }

    /// Snapshot form of the value; timestamps use the same text form as CQL literals.
    pub fn to_json(&self) -> Result<JsonValue, Error> {
        let unformattable = |err: time::error::Format| {
            Error::new(ErrorKind::Encode)
                .with_message(format!("cannot format {} value", self.kind_name()))
                .with_source(err)
        };
        let json = match self {
            Self::Null => JsonValue::Null,
            Self::Boolean(value) => JsonValue::Bool(*value),
            Self::Int(value) => JsonValue::from(*value),
            Self::Float(value) => Number::from_f64(*value)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(non_finite_name(*value).to_string())),
            Self::Decimal(text) | Self::Duration(text) | Self::Text(text) => {
                JsonValue::String(text.clone())
            }
            Self::Blob(bytes) => JsonValue::String(format!("0x{}", hex::encode(bytes))),
            Self::Uuid(uuid) => JsonValue::String(uuid.to_string()),
            Self::Timestamp(ts) => {
                JsonValue::String(ts.format(TIMESTAMP_FORMAT).map_err(unformattable)?)
            }
            Self::Date(date) => JsonValue::String(date.format(DATE_FORMAT).map_err(unformattable)?),
            Self::Time(time) => JsonValue::String(time.format(TIME_FORMAT).map_err(unformattable)?),
            Self::Inet(ip) => JsonValue::String(ip.to_string()),
            Self::List(items) | Self::Set(items) | Self::Tuple(items) => JsonValue::Array(
                items
                    .iter()
                    .map(Self::to_json)
                    .collect::<Result<Vec<_>, Error>>()?,
            ),
            Self::Map(entries) => JsonValue::Array(
                entries
                    .iter()
                    .map(|(key, value)| Ok(JsonValue::Array(vec![key.to_json()?, value.to_json()?])))
                    .collect::<Result<Vec<_>, Error>>()?,
            ),
        };
        Ok(json)
    }
}

/// One row as returned by a read cursor: column name to value, in column order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    cells: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.cells.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.cells
            .iter()
            .find(|(cell, _)| cell == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.cells.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn to_json(&self) -> Result<Map<String, JsonValue>, Error> {
        self.cells
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(name, value)| {
                let json = value.to_json().map_err(|err| {
                    let message = format!(
                        "column `{name}`: {}",
                        err.message().unwrap_or("cannot convert value")
                    );
                    err.with_message(message)
                })?;
                Ok((name.clone(), json))
            })
            .collect()
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            cells: iter.into_iter().collect(),
        }
    }
}

pub fn truncate_to_millis(value: OffsetDateTime) -> OffsetDateTime {
    let utc = value.to_offset(UtcOffset::UTC);
    let millis = utc.nanosecond() / 1_000_000;
    utc.replace_nanosecond(millis * 1_000_000).unwrap_or(utc)
}

pub fn parse_timestamp_text(text: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(text, TIMESTAMP_FORMAT)
        .or_else(|_| OffsetDateTime::parse(text, &Rfc3339))
        .ok()
        .map(truncate_to_millis)
}

pub fn timestamp_from_millis(millis: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
}

pub fn parse_time_text(text: &str) -> Option<Time> {
    if text.contains('.') {
        Time::parse(text, TIME_PARSE_FORMAT).ok()
    } else {
        Time::parse(text, TIME_PARSE_FORMAT_WHOLE).ok()
    }
}

pub fn parse_blob_text(text: &str) -> Option<Vec<u8>> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))?;
    hex::decode(digits).ok()
}

/// Accepts `-?digits`, plus a fraction and exponent when `fractional` is set.
pub fn is_numeric_text(text: &str, fractional: bool) -> bool {
    let body = text.strip_prefix('-').unwrap_or(text);
    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(idx) if fractional => (&body[..idx], Some(&body[idx + 1..])),
        Some(_) => return false,
        None => (body, None),
    };
    let (whole, fraction) = match mantissa.split_once('.') {
        Some(_) if !fractional => return false,
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (mantissa, None),
    };
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(whole) || fraction.is_some_and(|f| !digits(f)) {
        return false;
    }
    match exponent {
        Some(exp) => digits(exp.strip_prefix(['+', '-']).unwrap_or(exp)),
        None => true,
    }
}

pub fn non_finite_name(value: f64) -> &'static str {
    if value.is_nan() {
        "NaN"
    } else if value.is_sign_negative() {
        "-Infinity"
    } else {
        "Infinity"
    }
}

pub fn parse_float_text(text: &str) -> Option<f64> {
    match text {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        _ if is_numeric_text(text, true) => text.parse().ok(),
        _ => None,
    }
}

fn json_i64(json: &JsonValue) -> Option<i64> {
    match json {
        JsonValue::Number(number) => number.as_i64(),
        JsonValue::String(text) => text.parse().ok(),
        _ => None,
    }
}

fn json_items(
    json: &JsonValue,
    elem: &CqlType,
    mismatch: impl Fn() -> Error,
) -> Result<Vec<Value>, Error> {
    json.as_array()
        .ok_or_else(mismatch)?
        .iter()
        .map(|item| Value::from_json(item, elem))
        .collect()
}

fn native_from_json(json: &JsonValue, native: NativeType) -> Option<Value> {
    if let Some((min, max)) = native.integer_range() {
        let value = json_i64(json)?;
        return (min..=max).contains(&value).then_some(Value::Int(value));
    }
    let value = match native {
        NativeType::Ascii | NativeType::Text | NativeType::Varchar => {
            Value::Text(json.as_str()?.to_string())
        }
        NativeType::Boolean => Value::Boolean(json.as_bool()?),
        NativeType::Float | NativeType::Double => match json {
            JsonValue::Number(number) => Value::Float(number.as_f64()?),
            JsonValue::String(text) => Value::Float(parse_float_text(text)?),
            _ => return None,
        },
        NativeType::Decimal | NativeType::Varint => {
            let text = match json {
                JsonValue::Number(number) => number.to_string(),
                JsonValue::String(text) => text.clone(),
                _ => return None,
            };
            is_numeric_text(&text, native == NativeType::Decimal).then_some(Value::Decimal(text))?
        }
        NativeType::Duration => Value::Duration(json.as_str()?.to_string()),
        NativeType::Uuid | NativeType::Timeuuid => Value::Uuid(Uuid::parse_str(json.as_str()?).ok()?),
        NativeType::Timestamp => match json {
            JsonValue::Number(number) => Value::timestamp(timestamp_from_millis(number.as_i64()?)?),
            JsonValue::String(text) => Value::Timestamp(parse_timestamp_text(text)?),
            _ => return None,
        },
        NativeType::Date => Value::Date(Date::parse(json.as_str()?, DATE_FORMAT).ok()?),
        NativeType::Time => Value::Time(parse_time_text(json.as_str()?)?),
        NativeType::Inet => Value::Inet(json.as_str()?.parse().ok()?),
        NativeType::Tinyint | NativeType::Smallint | NativeType::Int | NativeType::Bigint => {
            return None;
        }
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::{Row, Value, is_numeric_text, parse_time_text, parse_timestamp_text};
    use crate::core::types::{CqlType, NativeType};
    use serde_json::json;

    #[test]
    fn numeric_text_validation() {
        assert!(is_numeric_text("-12", false));
        assert!(is_numeric_text("12.50", true));
        assert!(is_numeric_text("1.5E+10", true));
        assert!(!is_numeric_text("12.5", false));
        assert!(!is_numeric_text("1e3", false));
        assert!(!is_numeric_text("", true));
        assert!(!is_numeric_text("1.", true));
        assert!(!is_numeric_text("0x10", true));
    }

    #[test]
    fn timestamps_are_truncated_to_millis() {
        let ts = parse_timestamp_text("2024-03-01T10:20:30.123456Z").unwrap();
        assert_eq!(ts.nanosecond(), 123_000_000);
        let ts = parse_timestamp_text("2024-03-01 10:20:30.500+0200").unwrap();
        assert_eq!(ts.hour(), 8);
    }

    #[test]
    fn time_parses_with_and_without_fraction() {
        assert_eq!(parse_time_text("08:15:00").unwrap().minute(), 15);
        assert_eq!(
            parse_time_text("08:15:00.000000250").unwrap().nanosecond(),
            250
        );
    }

    #[test]
    fn json_bridge_is_typed() {
        let ty = CqlType::map(NativeType::Text.into(), NativeType::Int.into());
        let value = Value::from_json(&json!({"a": 1, "b": 2}), &ty).unwrap();
        assert_eq!(
            value,
            Value::Map(vec![
                (Value::text("a"), Value::Int(1)),
                (Value::text("b"), Value::Int(2)),
            ])
        );

        let tiny: CqlType = NativeType::Tinyint.into();
        assert!(Value::from_json(&json!(300), &tiny).is_err());
        assert!(Value::from_json(&json!("x"), &CqlType::Blob).is_err());
        assert_eq!(
            Value::from_json(&json!("0xCAFE"), &CqlType::Blob).unwrap(),
            Value::Blob(vec![0xca, 0xfe])
        );
    }

    #[test]
    fn json_round_trip_keeps_map_keys_typed() {
        let ty = CqlType::map(NativeType::Int.into(), NativeType::Boolean.into());
        let value = Value::Map(vec![(Value::Int(7), Value::Boolean(true))]);
        assert_eq!(Value::from_json(&value.to_json().unwrap(), &ty).unwrap(), value);
    }

    #[test]
    fn row_json_omits_nulls() {
        let row = Row::new()
            .with("id", Value::Int(2))
            .with("name", Value::Null);
        let json = row.to_json().unwrap();
        assert_eq!(json.len(), 1);
        assert_eq!(json["id"], 2);
    }

    #[test]
    fn json_timestamps_round_trip_outside_rfc3339_years() {
        let ty: CqlType = NativeType::Timestamp.into();
        let early = time::Date::from_calendar_date(-1, time::Month::January, 1)
            .unwrap()
            .midnight()
            .assume_utc();
        let value = Value::Timestamp(early);
        let json = value.to_json().unwrap();
        assert_eq!(json, json!("-0001-01-01 00:00:00.000+0000"));
        assert_eq!(Value::from_json(&json, &ty).unwrap(), value);
    }
}
