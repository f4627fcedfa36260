//! Purpose: Turn rows of one table into INSERT or counter UPDATE statements.
//! Exports: `RowEncoder`.
//! Role: Built once per table so the counter/non-counter partition is computed a single time.
//! Invariants: Column order in every statement follows the table definition.
//! Invariants: NULL values are omitted from INSERTs (sparse encoding; NULL and unset look alike).
//! Invariants: A counter row with no non-NULL delta yields no statement at all.
use crate::core::encode::{NULL_LITERAL, encode_value, maybe_quote_identifier, quote_identifier};
use crate::core::error::{Error, ErrorKind};
use crate::core::schema::TableDefinition;
use crate::core::types::CqlType;
use crate::core::value::Row;

#[derive(Clone, Debug)]
struct EncodedColumn {
    name: String,
    quoted: String,
    bare: String,
    cql_type: CqlType,
}

#[derive(Clone, Debug)]
pub struct RowEncoder {
    keyspace: String,
    table: String,
    target: String,
    counters: Vec<EncodedColumn>,
    others: Vec<EncodedColumn>,
}

impl RowEncoder {
    pub fn new(table: &TableDefinition) -> Result<Self, Error> {
        let fail = |message: String| {
            Error::new(ErrorKind::Encode)
                .with_message(message)
                .with_table(&table.keyspace, &table.name)
        };
        if table.columns.is_empty() {
            return Err(fail("table has no columns".to_string()));
        }

        let mut counters = Vec::new();
        let mut others = Vec::new();
        for column in &table.columns {
            let encoded = EncodedColumn {
                name: column.name.clone(),
                quoted: quote_identifier(&column.name),
                bare: maybe_quote_identifier(&column.name),
                cql_type: column.cql_type.clone(),
            };
            if column.cql_type.is_counter() {
                counters.push(encoded);
            } else {
                others.push(encoded);
            }
        }

        if !counters.is_empty() {
            if !table.has_primary_key() {
                return Err(fail("counter table has no primary key metadata".to_string()));
            }
            if let Some(column) = others.iter().find(|c| !table.is_key_column(&c.name)) {
                return Err(fail(format!(
                    "counter table has non-counter, non-key column `{}`",
                    column.name
                )));
            }
        }

        Ok(Self {
            keyspace: table.keyspace.clone(),
            table: table.name.clone(),
            target: format!(
                "{}.{}",
                quote_identifier(&table.keyspace),
                quote_identifier(&table.name)
            ),
            counters,
            others,
        })
    }

    pub fn is_counter_table(&self) -> bool {
        !self.counters.is_empty()
    }

    /// Encode one row; `Ok(None)` means the row carries nothing to replay.
    pub fn encode(&self, row: &Row) -> Result<Option<String>, Error> {
        self.check_row_shape(row)?;
        if self.is_counter_table() {
            self.counter_update(row)
        } else {
            self.insert(row).map(Some)
        }
    }

    fn error(&self, message: String) -> Error {
        Error::new(ErrorKind::Encode)
            .with_message(message)
            .with_table(&self.keyspace, &self.table)
    }

    fn check_row_shape(&self, row: &Row) -> Result<(), Error> {
        let known = |name: &str| {
            self.counters
                .iter()
                .chain(&self.others)
                .any(|column| column.name == name)
        };
        if let Some((name, _)) = row.iter().find(|(name, _)| !known(name)) {
            return Err(self.error(format!("row column `{name}` is not defined in the table")));
        }
        Ok(())
    }

    fn encoded_cell(&self, row: &Row, column: &EncodedColumn) -> Result<String, Error> {
        let value = row
            .get(&column.name)
            .ok_or_else(|| self.error(format!("row is missing column `{}`", column.name)))?;
        encode_value(value, &column.cql_type).map_err(|err| {
            let message = format!(
                "column `{}`: {}",
                column.name,
                err.message().unwrap_or("cannot encode value")
            );
            self.error(message)
        })
    }

    fn insert(&self, row: &Row) -> Result<String, Error> {
        let mut names = Vec::with_capacity(self.others.len());
        let mut values = Vec::with_capacity(self.others.len());
        for column in &self.others {
            let encoded = self.encoded_cell(row, column)?;
            if encoded == NULL_LITERAL {
                continue;
            }
            names.push(column.quoted.as_str());
            values.push(encoded);
        }
        if names.is_empty() {
            return Err(self.error("row has no non-NULL values".to_string()));
        }
        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({});",
            self.target,
            names.join(", "),
            values.join(", ")
        ))
    }

    fn counter_update(&self, row: &Row) -> Result<Option<String>, Error> {
        let mut assignments = Vec::with_capacity(self.counters.len());
        for column in &self.counters {
            let encoded = self.encoded_cell(row, column)?;
            if encoded == NULL_LITERAL {
                continue;
            }
            assignments.push(format!("{0} = {0} + {1}", column.bare, encoded));
        }
        if assignments.is_empty() {
            return Ok(None);
        }

        let mut predicates = Vec::with_capacity(self.others.len());
        for column in &self.others {
            let encoded = self.encoded_cell(row, column)?;
            if encoded == NULL_LITERAL {
                return Err(self.error(format!("key column `{}` is NULL", column.name)));
            }
            predicates.push(format!("{} = {}", column.bare, encoded));
        }
        if predicates.is_empty() {
            return Err(self.error("counter table has no key columns".to_string()));
        }

        Ok(Some(format!(
            "UPDATE {} SET {} WHERE {};",
            self.target,
            assignments.join(", "),
            predicates.join(" AND ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::RowEncoder;
    use crate::core::error::ErrorKind;
    use crate::core::schema::{ColumnDefinition, TableDefinition};
    use crate::core::types::{CqlType, NativeType};
    use crate::core::value::{Row, Value};

    fn users() -> TableDefinition {
        TableDefinition::new(
            "ks",
            "t",
            vec![
                ColumnDefinition::new("id", NativeType::Int.into()),
                ColumnDefinition::new("name", NativeType::Text.into()),
            ],
        )
        .with_partition_key(["id"])
    }

    fn hits() -> TableDefinition {
        TableDefinition::new(
            "ks",
            "t",
            vec![
                ColumnDefinition::new("id", NativeType::Int.into()),
                ColumnDefinition::new("hits", CqlType::Counter),
            ],
        )
        .with_partition_key(["id"])
    }

    #[test]
    fn regular_rows_become_sparse_inserts() {
        let encoder = RowEncoder::new(&users()).unwrap();
        let alice = Row::new()
            .with("id", Value::Int(1))
            .with("name", Value::text("Alice"));
        let anonymous = Row::new().with("id", Value::Int(2)).with("name", Value::Null);

        assert_eq!(
            encoder.encode(&alice).unwrap().as_deref(),
            Some("INSERT INTO \"ks\".\"t\" (\"id\", \"name\") VALUES (1, 'Alice');")
        );
        assert_eq!(
            encoder.encode(&anonymous).unwrap().as_deref(),
            Some("INSERT INTO \"ks\".\"t\" (\"id\") VALUES (2);")
        );
    }

    #[test]
    fn counter_rows_become_delta_updates() {
        let encoder = RowEncoder::new(&hits()).unwrap();
        assert!(encoder.is_counter_table());
        let row = Row::new().with("id", Value::Int(1)).with("hits", Value::Int(5));
        assert_eq!(
            encoder.encode(&row).unwrap().as_deref(),
            Some("UPDATE \"ks\".\"t\" SET hits = hits + 5 WHERE id = 1;")
        );
    }

    #[test]
    fn counter_partition_preserves_column_order() {
        let table = TableDefinition::new(
            "ks",
            "page_views",
            vec![
                ColumnDefinition::new("views", CqlType::Counter),
                ColumnDefinition::new("site", NativeType::Text.into()),
                ColumnDefinition::new("Unique", CqlType::Counter),
                ColumnDefinition::new("day", NativeType::Date.into()),
            ],
        )
        .with_partition_key(["site"])
        .with_clustering(["day"]);
        let encoder = RowEncoder::new(&table).unwrap();
        let row = Row::new()
            .with("views", Value::Int(-3))
            .with("site", Value::text("a"))
            .with("Unique", Value::Int(2))
            .with("day", Value::Date(time::macros::date!(2024 - 01 - 01)));
        assert_eq!(
            encoder.encode(&row).unwrap().as_deref(),
            Some(
                "UPDATE \"ks\".\"page_views\" SET views = views + -3, \"Unique\" = \"Unique\" + 2 \
                 WHERE site = 'a' AND day = '2024-01-01';"
            )
        );
    }

    #[test]
    fn counter_row_without_deltas_is_skipped() {
        let encoder = RowEncoder::new(&hits()).unwrap();
        let row = Row::new().with("id", Value::Int(1)).with("hits", Value::Null);
        assert_eq!(encoder.encode(&row).unwrap(), None);
    }

    #[test]
    fn counter_table_with_null_key_fails() {
        let encoder = RowEncoder::new(&hits()).unwrap();
        let row = Row::new().with("id", Value::Null).with("hits", Value::Int(1));
        let err = encoder.encode(&row).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Encode);
        assert_eq!(err.table(), Some("ks.t"));
    }

    #[test]
    fn row_shape_mismatch_is_fatal() {
        let encoder = RowEncoder::new(&users()).unwrap();
        let missing = Row::new().with("id", Value::Int(1));
        assert_eq!(
            encoder.encode(&missing).unwrap_err().kind(),
            ErrorKind::Encode
        );
        let extra = Row::new()
            .with("id", Value::Int(1))
            .with("name", Value::Null)
            .with("age", Value::Int(3));
        let err = encoder.encode(&extra).unwrap_err();
        assert!(err.message().unwrap().contains("age"));
    }

    #[test]
    fn counters_cannot_mix_with_regular_columns() {
        let table = TableDefinition::new(
            "ks",
            "bad",
            vec![
                ColumnDefinition::new("id", NativeType::Int.into()),
                ColumnDefinition::new("label", NativeType::Text.into()),
                ColumnDefinition::new("hits", CqlType::Counter),
            ],
        )
        .with_partition_key(["id"]);
        assert_eq!(RowEncoder::new(&table).unwrap_err().kind(), ErrorKind::Encode);
    }

    #[test]
    fn counter_table_without_key_metadata_fails() {
        let table = TableDefinition::new(
            "ks",
            "loose",
            vec![
                ColumnDefinition::new("label", NativeType::Text.into()),
                ColumnDefinition::new("hits", CqlType::Counter),
            ],
        );
        let err = RowEncoder::new(&table).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Encode);
        assert_eq!(err.table(), Some("ks.loose"));
        assert!(err.message().unwrap().contains("primary key"));
    }

    #[test]
    fn type_mismatch_names_the_column() {
        let encoder = RowEncoder::new(&users()).unwrap();
        let row = Row::new()
            .with("id", Value::text("1"))
            .with("name", Value::text("x"));
        let err = encoder.encode(&row).unwrap_err();
        assert!(err.message().unwrap().starts_with("column `id`"));
    }
}
