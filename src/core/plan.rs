//! Purpose: Resolve an export scope into an ordered list of export steps without any I/O.
//! Exports: `ExportScope`, `TableRef`, `ExportStep`, `plan_export`, `SYSTEM_KEYSPACES`.
//! Role: Pure planning layer used by the export driver; surfaces configuration errors early.
//! Invariants: Unknown keyspaces/tables and malformed selectors fail here, before any output.
//! Invariants: Step order is keyspace DDL, then per table: table DDL, then table data.
use tracing::warn;

use crate::core::backend::SchemaProvider;
use crate::core::error::{Error, ErrorKind};
use crate::core::schema::{KeyspaceDefinition, TableDefinition};

pub const SYSTEM_KEYSPACES: &[&str] = &[
    "system",
    "system_auth",
    "system_distributed",
    "system_schema",
    "system_traces",
    "system_views",
    "system_virtual_schema",
];

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableRef {
    pub keyspace: String,
    pub table: String,
}

impl TableRef {
    /// Parse `keyspace.table`.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let invalid = || {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid keyspace.table input `{input}`"))
                .with_hint("Name tables as <keyspace>.<table>, e.g. shop.orders.")
        };
        let (keyspace, table) = input.trim().split_once('.').ok_or_else(invalid)?;
        if keyspace.is_empty() || table.is_empty() || table.contains('.') {
            return Err(invalid());
        }
        Ok(Self {
            keyspace: keyspace.to_string(),
            table: table.to_string(),
        })
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum ExportScope {
    #[default]
    All,
    Keyspaces(Vec<String>),
    Tables(Vec<TableRef>),
    /// Each entry is a SELECT body without `SELECT * FROM`, e.g. `ks.t WHERE id = 1`.
    Filters(Vec<String>),
}

impl ExportScope {
    /// Build a scope from the three mutually exclusive selector lists.
    pub fn from_selectors(
        keyspaces: Vec<String>,
        tables: Vec<String>,
        filters: Vec<String>,
    ) -> Result<Self, Error> {
        let selected = [!keyspaces.is_empty(), !tables.is_empty(), !filters.is_empty()]
            .into_iter()
            .filter(|used| *used)
            .count();
        if selected > 1 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("--cf, --keyspace and --filter can't be combined")
                .with_hint("Run one export per selector kind."));
        }
        if !keyspaces.is_empty() {
            return Ok(Self::Keyspaces(keyspaces));
        }
        if !tables.is_empty() {
            let refs = tables
                .iter()
                .map(|table| TableRef::parse(table))
                .collect::<Result<Vec<_>, Error>>()?;
            return Ok(Self::Tables(refs));
        }
        if !filters.is_empty() {
            return Ok(Self::Filters(filters));
        }
        Ok(Self::All)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExportStep {
    KeyspaceSchema(KeyspaceDefinition),
    TableSchema(TableDefinition),
    TableData {
        table: TableDefinition,
        filter: Option<String>,
    },
}

pub fn plan_export<S: SchemaProvider + ?Sized>(
    schema: &S,
    scope: &ExportScope,
    include_schema: bool,
    include_data: bool,
) -> Result<Vec<ExportStep>, Error> {
    let mut steps = Vec::new();
    match scope {
        ExportScope::All => {
            for name in schema.keyspace_names()? {
                if SYSTEM_KEYSPACES.contains(&name.as_str()) {
                    continue;
                }
                plan_keyspace(schema, &name, include_schema, include_data, &mut steps)?;
            }
        }
        ExportScope::Keyspaces(names) => {
            for name in names {
                plan_keyspace(schema, name, include_schema, include_data, &mut steps)?;
            }
        }
        ExportScope::Tables(refs) => {
            for table_ref in refs {
                let table = resolve_table(schema, &table_ref.keyspace, &table_ref.table)?;
                plan_table(table, include_schema, include_data, &mut steps);
            }
        }
        ExportScope::Filters(filters) => {
            for filter in filters {
                let stripped = filter.trim();
                let target = stripped.split_whitespace().next().unwrap_or_default();
                let table_ref = TableRef::parse(target).map_err(|err| {
                    err.with_message(format!("invalid filter `{stripped}`"))
                        .with_hint("Filters start with <keyspace>.<table>, e.g. \"shop.orders WHERE id = 1\".")
                })?;
                let table = resolve_table(schema, &table_ref.keyspace, &table_ref.table)?;
                if include_data {
                    steps.push(ExportStep::TableData {
                        table,
                        filter: Some(stripped.to_string()),
                    });
                }
            }
        }
    }
    Ok(steps)
}

fn plan_keyspace<S: SchemaProvider + ?Sized>(
    schema: &S,
    name: &str,
    include_schema: bool,
    include_data: bool,
    steps: &mut Vec<ExportStep>,
) -> Result<(), Error> {
    let keyspace = schema.keyspace(name)?.ok_or_else(|| {
        Error::new(ErrorKind::NotFound).with_message(format!("can't find keyspace \"{name}\""))
    })?;
    if include_schema {
        steps.push(ExportStep::KeyspaceSchema(keyspace));
    }
    for table in schema.tables(name)? {
        plan_table(table, include_schema, include_data, steps);
    }
    Ok(())
}

fn plan_table(
    table: TableDefinition,
    include_schema: bool,
    include_data: bool,
    steps: &mut Vec<ExportStep>,
) {
    if !table.cql_compatible {
        warn!(
            keyspace = %table.keyspace,
            table = %table.name,
            "skipping table that is not CQL compatible"
        );
        return;
    }
    if include_schema {
        steps.push(ExportStep::TableSchema(table.clone()));
    }
    if include_data {
        steps.push(ExportStep::TableData {
            table,
            filter: None,
        });
    }
}

fn resolve_table<S: SchemaProvider + ?Sized>(
    schema: &S,
    keyspace: &str,
    table: &str,
) -> Result<TableDefinition, Error> {
    if schema.keyspace(keyspace)?.is_none() {
        return Err(Error::new(ErrorKind::NotFound)
            .with_message(format!("can't find keyspace \"{keyspace}\"")));
    }
    schema.table(keyspace, table)?.ok_or_else(|| {
        Error::new(ErrorKind::NotFound).with_message(format!("can't find table \"{table}\""))
    })
}
