//! Purpose: Render one typed value as a CQL literal for its declared column type.
//! Exports: `encode_value`, `NULL_LITERAL`, identifier quoting helpers.
//! Role: Leaf of the export path; the row encoder and the schema serializer build on it.
//! Invariants: A top-level null is always `NULL`; nulls nested in collections are rejected.
//! Invariants: Blobs only ever render as `0x` hex; they never go through string quoting.
//! Invariants: A value whose variant does not fit the declared type is an `Encode` error.

use crate::core::error::{Error, ErrorKind};
use crate::core::types::{CqlType, NativeType};
use crate::core::value::{
    DATE_FORMAT, TIME_FORMAT, TIMESTAMP_FORMAT, Value, is_numeric_text, non_finite_name,
};

pub const NULL_LITERAL: &str = "NULL";

const RESERVED_KEYWORDS: &[&str] = &[
    "add", "allow", "alter", "and", "apply", "asc", "authorize", "batch", "begin", "by",
    "columnfamily", "create", "delete", "desc", "describe", "drop", "entries", "execute", "from",
    "full", "grant", "if", "in", "index", "infinity", "insert", "into", "is", "keyspace", "limit",
    "materialized", "mbean", "mbeans", "modify", "nan", "norecursive", "not", "null", "of", "on",
    "or", "order", "primary", "rename", "replace", "revoke", "schema", "select", "set", "table",
    "to", "token", "truncate", "unlogged", "unset", "update", "use", "using", "view", "where",
    "with",
];

pub fn encode_value(value: &Value, ty: &CqlType) -> Result<String, Error> {
    if value.is_null() {
        return Ok(NULL_LITERAL.to_string());
    }
    let mut out = String::new();
    write_value(&mut out, value, ty)?;
    Ok(out)
}

/// Always double-quote, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Leave plain lower-case identifiers bare; quote anything that would change meaning unquoted.
pub fn maybe_quote_identifier(name: &str) -> String {
    let mut chars = name.chars();
    let plain = chars.next().is_some_and(|ch| ch.is_ascii_lowercase())
        && chars.all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_')
        && !RESERVED_KEYWORDS.contains(&name);
    if plain {
        name.to_string()
    } else {
        quote_identifier(name)
    }
}

pub fn quote_string(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn mismatch(value: &Value, ty: &CqlType) -> Error {
    Error::new(ErrorKind::Encode).with_message(format!(
        "{} value does not match column type {ty}",
        value.kind_name()
    ))
}

fn write_value(out: &mut String, value: &Value, ty: &CqlType) -> Result<(), Error> {
    match (ty.unfrozen(), value) {
        (_, Value::Null) => {
            return Err(Error::new(ErrorKind::Encode)
                .with_message(format!("{ty} elements cannot be NULL")));
        }
        (CqlType::Blob, Value::Blob(bytes)) => {
            out.push_str("0x");
            out.push_str(&hex::encode(bytes));
        }
        (CqlType::Counter, Value::Int(delta)) => {
            out.push_str(&delta.to_string());
        }
        (CqlType::List(elem), Value::List(items)) => write_items(out, ('[', ']'), items, elem)?,
        (CqlType::Set(elem), Value::Set(items)) => write_items(out, ('{', '}'), items, elem)?,
        (CqlType::Map(key_ty, value_ty), Value::Map(entries)) => {
            out.push('{');
            for (idx, (key, item)) in entries.iter().enumerate() {
                if idx > 0 {
                    out.push_str(", ");
                }
                write_value(out, key, key_ty)?;
                out.push_str(": ");
                write_value(out, item, value_ty)?;
            }
            out.push('}');
        }
        (CqlType::Tuple(types), Value::Tuple(items)) if types.len() == items.len() => {
            out.push('(');
            for (idx, (item, item_ty)) in items.iter().zip(types).enumerate() {
                if idx > 0 {
                    out.push_str(", ");
                }
                write_value(out, item, item_ty)?;
            }
            out.push(')');
        }
        (CqlType::Native(native), scalar) => write_scalar(out, *native, scalar)
            .ok_or_else(|| mismatch(value, ty))?,
        _ => return Err(mismatch(value, ty)),
    }
    Ok(())
}

fn write_items(
    out: &mut String,
    (open, close): (char, char),
    items: &[Value],
    elem: &CqlType,
) -> Result<(), Error> {
    out.push(open);
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            out.push_str(", ");
        }
        write_value(out, item, elem)?;
    }
    out.push(close);
    Ok(())
}

/// Returns `None` when the value variant cannot represent `native`.
fn write_scalar(out: &mut String, native: NativeType, value: &Value) -> Option<()> {
    match (native, value) {
        (native, Value::Text(text)) if native.is_textual() => {
            if native == NativeType::Ascii && !text.is_ascii() {
                return None;
            }
            out.push_str(&quote_string(text));
        }
        (NativeType::Boolean, Value::Boolean(flag)) => {
            out.push_str(if *flag { "true" } else { "false" });
        }
        (native, Value::Int(number)) if native.integer_range().is_some() => {
            let (min, max) = native.integer_range()?;
            if !(min..=max).contains(number) {
                return None;
            }
            out.push_str(&number.to_string());
        }
        (NativeType::Varint | NativeType::Decimal, Value::Int(number)) => {
            out.push_str(&number.to_string());
        }
        (NativeType::Varint, Value::Decimal(digits)) if is_numeric_text(digits, false) => {
            out.push_str(digits);
        }
        (NativeType::Decimal, Value::Decimal(digits)) if is_numeric_text(digits, true) => {
            out.push_str(digits);
        }
        (NativeType::Decimal, Value::Float(number)) if number.is_finite() => {
            out.push_str(&number.to_string());
        }
        (NativeType::Float | NativeType::Double, Value::Float(number)) => {
            if number.is_finite() {
                out.push_str(&number.to_string());
            } else {
                out.push_str(non_finite_name(*number));
            }
        }
        (NativeType::Float | NativeType::Double, Value::Int(number)) => {
            out.push_str(&number.to_string());
        }
        (NativeType::Uuid, Value::Uuid(uuid)) => {
            out.push_str(&uuid.to_string());
        }
        (NativeType::Timeuuid, Value::Uuid(uuid)) if uuid.get_version_num() == 1 => {
            out.push_str(&uuid.to_string());
        }
        (NativeType::Timestamp, Value::Timestamp(ts)) => {
            out.push_str(&quote_string(&ts.format(TIMESTAMP_FORMAT).ok()?));
        }
        (NativeType::Timestamp, Value::Int(millis)) => {
            out.push_str(&millis.to_string());
        }
        (NativeType::Date, Value::Date(date)) => {
            out.push_str(&quote_string(&date.format(DATE_FORMAT).ok()?));
        }
        (NativeType::Time, Value::Time(time)) => {
            out.push_str(&quote_string(&time.format(TIME_FORMAT).ok()?));
        }
        (NativeType::Inet, Value::Inet(ip)) => {
            out.push_str(&quote_string(&ip.to_string()));
        }
        (NativeType::Duration, Value::Duration(text))
            if !text.is_empty()
                && text
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '.') =>
        {
            out.push_str(text);
        }
        _ => return None,
    }
    Some(())
}
