//! Purpose: Keyspace and table definitions plus their DROP/CREATE rendering.
//! Exports: `ColumnDefinition`, `TableDefinition`, `KeyspaceDefinition`, `ClusteringOrder`,
//! `keyspace_ddl`, `table_ddl`.
//! Role: Schema half of the export surface; definitions are consumed as given metadata.
//! Invariants: Rendered DDL always quotes keyspace, table, and column names.
//! Invariants: CREATE TABLE requires a non-empty partition key.
use std::collections::BTreeMap;

use crate::core::encode::{quote_identifier, quote_string};
use crate::core::error::{Error, ErrorKind};
use crate::core::types::CqlType;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub cql_type: CqlType,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, cql_type: CqlType) -> Self {
        Self {
            name: name.into(),
            cql_type,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ClusteringOrder {
    #[default]
    Asc,
    Desc,
}

impl ClusteringOrder {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableDefinition {
    pub keyspace: String,
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub partition_key: Vec<String>,
    pub clustering: Vec<(String, ClusteringOrder)>,
    /// False for legacy tables that cannot be expressed (or read back) through CQL.
    pub cql_compatible: bool,
}

impl TableDefinition {
    pub fn new(
        keyspace: impl Into<String>,
        name: impl Into<String>,
        columns: Vec<ColumnDefinition>,
    ) -> Self {
        Self {
            keyspace: keyspace.into(),
            name: name.into(),
            columns,
            partition_key: Vec::new(),
            clustering: Vec::new(),
            cql_compatible: true,
        }
    }

    pub fn with_partition_key<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partition_key = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_clustering<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.clustering = names
            .into_iter()
            .map(|name| (name.into(), ClusteringOrder::Asc))
            .collect();
        self
    }

    pub fn with_clustering_order(mut self, name: &str, order: ClusteringOrder) -> Self {
        if let Some(entry) = self.clustering.iter_mut().find(|(n, _)| n == name) {
            entry.1 = order;
        }
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn has_primary_key(&self) -> bool {
        !self.partition_key.is_empty()
    }

    pub fn primary_key(&self) -> impl Iterator<Item = &str> {
        self.partition_key
            .iter()
            .map(String::as_str)
            .chain(self.clustering.iter().map(|(name, _)| name.as_str()))
    }

    pub fn is_key_column(&self, name: &str) -> bool {
        self.primary_key().any(|key| key == name)
    }

    pub fn has_counters(&self) -> bool {
        self.columns.iter().any(|column| column.cql_type.is_counter())
    }

    /// Structural checks shared by the store and the serializer.
    pub fn validate(&self) -> Result<(), Error> {
        let fail = |message: String| {
            Error::new(ErrorKind::Usage)
                .with_message(message)
                .with_table(&self.keyspace, &self.name)
        };
        if self.columns.is_empty() {
            return Err(fail("table has no columns".to_string()));
        }
        for (idx, column) in self.columns.iter().enumerate() {
            if self.columns[..idx].iter().any(|c| c.name == column.name) {
                return Err(fail(format!("duplicate column `{}`", column.name)));
            }
        }
        if !self.has_primary_key() {
            return Err(fail("table has no partition key".to_string()));
        }
        let keys: Vec<&str> = self.primary_key().collect();
        for (idx, key) in keys.iter().enumerate() {
            let Some(column) = self.column(key) else {
                return Err(fail(format!("primary key column `{key}` is not defined")));
            };
            if column.cql_type.is_counter() {
                return Err(fail(format!("primary key column `{key}` cannot be a counter")));
            }
            if keys[..idx].contains(key) {
                return Err(fail(format!("primary key column `{key}` is repeated")));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyspaceDefinition {
    pub name: String,
    pub replication: BTreeMap<String, String>,
    pub durable_writes: bool,
}

impl KeyspaceDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replication: default_replication(),
            durable_writes: true,
        }
    }

    pub fn with_replication(mut self, replication: BTreeMap<String, String>) -> Self {
        self.replication = if replication.is_empty() {
            default_replication()
        } else {
            replication
        };
        self
    }
}

fn default_replication() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("class".to_string(), "SimpleStrategy".to_string()),
        ("replication_factor".to_string(), "1".to_string()),
    ])
}

pub fn keyspace_ddl(keyspace: &KeyspaceDefinition) -> Vec<String> {
    let name = quote_identifier(&keyspace.name);
    let replication = keyspace
        .replication
        .iter()
        .map(|(key, value)| format!("{}: {}", quote_string(key), quote_string(value)))
        .collect::<Vec<_>>()
        .join(", ");
    vec![
        format!("DROP KEYSPACE IF EXISTS {name};"),
        format!(
            "CREATE KEYSPACE {name} WITH replication = {{{replication}}} AND durable_writes = {};",
            keyspace.durable_writes
        ),
    ]
}

pub fn table_ddl(table: &TableDefinition) -> Result<Vec<String>, Error> {
    let target = format!(
        "{}.{}",
        quote_identifier(&table.keyspace),
        quote_identifier(&table.name)
    );
    Ok(vec![
        format!("DROP TABLE IF EXISTS {target};"),
        create_table(table, &target)?,
    ])
}

fn create_table(table: &TableDefinition, target: &str) -> Result<String, Error> {
    table.validate().map_err(|err| {
        Error::new(ErrorKind::Encode)
            .with_message(err.message().unwrap_or("invalid table definition").to_string())
            .with_table(&table.keyspace, &table.name)
    })?;

    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|column| format!("{} {}", quote_identifier(&column.name), column.cql_type))
        .collect();

    let partition = table
        .partition_key
        .iter()
        .map(|name| quote_identifier(name))
        .collect::<Vec<_>>()
        .join(", ");
    let mut key = format!("({partition})");
    for (name, _) in &table.clustering {
        key.push_str(", ");
        key.push_str(&quote_identifier(name));
    }
    parts.push(format!("PRIMARY KEY ({key})"));

    let mut statement = format!("CREATE TABLE {target} ({})", parts.join(", "));
    if !table.clustering.is_empty() {
        let order = table
            .clustering
            .iter()
            .map(|(name, order)| format!("{} {}", quote_identifier(name), order.keyword()))
            .collect::<Vec<_>>()
            .join(", ");
        statement.push_str(&format!(" WITH CLUSTERING ORDER BY ({order})"));
    }
    statement.push(';');
    Ok(statement)
}
