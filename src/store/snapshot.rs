//! Purpose: Load and save a `MemoryCluster` as a versioned JSON snapshot file.
//! Exports: `SNAPSHOT_VERSION`; `MemoryCluster::{load, load_or_empty, save}`.
//! Role: Persistence for the CLI's `--store` flag.
//! Invariants: Saves go through a temp file and a rename, so readers never see partial JSON.
//! Invariants: Loaded tables are validated exactly like tables created through DDL.
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::core::error::{Error, ErrorKind};
use crate::core::schema::{ClusteringOrder, ColumnDefinition, KeyspaceDefinition, TableDefinition};
use crate::core::types::CqlType;
use crate::core::value::Value;
use crate::store::{ClusterState, KeyspaceState, MemoryCluster, TableState};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    #[serde(default)]
    keyspaces: Vec<KeyspaceSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyspaceSnapshot {
    name: String,
    #[serde(default)]
    replication: BTreeMap<String, String>,
    #[serde(default = "enabled")]
    durable_writes: bool,
    #[serde(default)]
    tables: Vec<TableSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TableSnapshot {
    name: String,
    columns: Vec<ColumnSnapshot>,
    partition_key: Vec<String>,
    #[serde(default)]
    clustering: Vec<ClusteringSnapshot>,
    #[serde(default = "enabled")]
    cql_compatible: bool,
    #[serde(default)]
    rows: Vec<Map<String, JsonValue>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ColumnSnapshot {
    name: String,
    #[serde(rename = "type")]
    cql_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ClusteringSnapshot {
    column: String,
    #[serde(default)]
    order: OrderSnapshot,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OrderSnapshot {
    #[default]
    Asc,
    Desc,
}

fn enabled() -> bool {
    true
}

fn snapshot_error(path: &Path, message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Parse)
        .with_message(message)
        .with_path(path)
}

impl MemoryCluster {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let bytes = fs::read(path).map_err(|err| {
            let kind = if err.kind() == io::ErrorKind::NotFound {
                ErrorKind::NotFound
            } else {
                ErrorKind::Io
            };
            Error::new(kind)
                .with_message("failed to read store snapshot")
                .with_path(path)
                .with_hint("Create a store by importing a dump with `cqldump import --store`.")
                .with_source(err)
        })?;
        let file: SnapshotFile = serde_json::from_slice(&bytes).map_err(|err| {
            snapshot_error(path, "store snapshot is not valid JSON").with_source(err)
        })?;
        if file.version != SNAPSHOT_VERSION {
            return Err(snapshot_error(
                path,
                format!("unsupported store snapshot version {}", file.version),
            ));
        }

        let mut state = ClusterState::default();
        for keyspace in file.keyspaces {
            let space = restore_keyspace(path, keyspace)?;
            state
                .keyspaces
                .insert(space.definition.name.clone(), space);
        }
        debug!(path = %path.display(), keyspaces = state.keyspaces.len(), "loaded store snapshot");
        Ok(Self::from_state(state))
    }

    /// Like `load`, but a missing file yields an empty cluster.
    pub fn load_or_empty(path: &Path) -> Result<Self, Error> {
        match Self::load(path) {
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::new()),
            other => other,
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let file = {
            let state = self.lock()?;
            SnapshotFile {
                version: SNAPSHOT_VERSION,
                keyspaces: state
                    .keyspaces
                    .values()
                    .map(snapshot_keyspace)
                    .collect::<Result<Vec<_>, Error>>()?,
            }
        };
        let bytes = serde_json::to_vec_pretty(&file).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode store snapshot")
                .with_source(err)
        })?;
        let temp = temp_path(path);
        let write_error = |err: io::Error| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write store snapshot")
                .with_path(path)
                .with_source(err)
        };
        fs::write(&temp, bytes).map_err(write_error)?;
        fs::rename(&temp, path).map_err(write_error)?;
        debug!(path = %path.display(), "saved store snapshot");
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn restore_keyspace(path: &Path, snapshot: KeyspaceSnapshot) -> Result<KeyspaceState, Error> {
    let mut definition =
        KeyspaceDefinition::new(snapshot.name.clone()).with_replication(snapshot.replication);
    definition.durable_writes = snapshot.durable_writes;
    let mut tables: Vec<TableState> = Vec::with_capacity(snapshot.tables.len());
    for table in snapshot.tables {
        if tables.iter().any(|t| t.definition.name == table.name) {
            return Err(snapshot_error(
                path,
                format!("duplicate table \"{}\".\"{}\"", snapshot.name, table.name),
            ));
        }
        tables.push(restore_table(path, &snapshot.name, table)?);
    }
    Ok(KeyspaceState { definition, tables })
}

fn restore_table(path: &Path, keyspace: &str, snapshot: TableSnapshot) -> Result<TableState, Error> {
    let columns = snapshot
        .columns
        .into_iter()
        .map(|column| {
            let cql_type = CqlType::parse(&column.cql_type).map_err(|err| {
                snapshot_error(path, err.message().unwrap_or("bad column type").to_string())
                    .with_table(keyspace, &snapshot.name)
            })?;
            Ok(ColumnDefinition::new(column.name, cql_type))
        })
        .collect::<Result<Vec<_>, Error>>()?;

    let mut definition = TableDefinition::new(keyspace, snapshot.name.clone(), columns)
        .with_partition_key(snapshot.partition_key)
        .with_clustering(snapshot.clustering.iter().map(|c| c.column.clone()));
    for clustering in &snapshot.clustering {
        if let OrderSnapshot::Desc = clustering.order {
            definition = definition.with_clustering_order(&clustering.column, ClusteringOrder::Desc);
        }
    }
    definition.cql_compatible = snapshot.cql_compatible;
    definition.validate().map_err(|err| {
        snapshot_error(path, err.message().unwrap_or("invalid table").to_string())
            .with_table(keyspace, &definition.name)
    })?;

    let mut table = TableState::new(definition);
    for json_row in snapshot.rows {
        let mut cells = Vec::with_capacity(json_row.len());
        for (column, json) in &json_row {
            let cql_type = &table
                .definition
                .column(column)
                .ok_or_else(|| {
                    snapshot_error(path, format!("row has undefined column `{column}`"))
                        .with_table(keyspace, &table.definition.name)
                })?
                .cql_type;
            let value = Value::from_json(json, cql_type).map_err(|err| {
                snapshot_error(path, err.message().unwrap_or("bad value").to_string())
                    .with_table(keyspace, &table.definition.name)
            })?;
            cells.push((column.clone(), value));
        }
        let key = table.row_key(&cells).map_err(|err| {
            snapshot_error(path, err.message().unwrap_or("bad row key").to_string())
                .with_table(keyspace, &table.definition.name)
        })?;
        let row = table.rows.entry(key).or_default();
        row.extend(cells.into_iter().filter(|(_, value)| !value.is_null()));
    }
    Ok(table)
}

fn snapshot_keyspace(space: &KeyspaceState) -> Result<KeyspaceSnapshot, Error> {
    Ok(KeyspaceSnapshot {
        name: space.definition.name.clone(),
        replication: space.definition.replication.clone(),
        durable_writes: space.definition.durable_writes,
        tables: space
            .tables
            .iter()
            .map(snapshot_table)
            .collect::<Result<Vec<_>, Error>>()?,
    })
}

fn snapshot_table(table: &TableState) -> Result<TableSnapshot, Error> {
    let definition = &table.definition;
    let rows = table
        .rows
        .values()
        .map(|cells| {
            table
                .row(cells)
                .to_json()
                .map_err(|err| err.with_table(&definition.keyspace, &definition.name))
        })
        .collect::<Result<Vec<_>, Error>>()?;
    Ok(TableSnapshot {
        name: definition.name.clone(),
        columns: definition
            .columns
            .iter()
            .map(|column| ColumnSnapshot {
                name: column.name.clone(),
                cql_type: column.cql_type.to_string(),
            })
            .collect(),
        partition_key: definition.partition_key.clone(),
        clustering: definition
            .clustering
            .iter()
            .map(|(column, order)| ClusteringSnapshot {
                column: column.clone(),
                order: match order {
                    ClusteringOrder::Asc => OrderSnapshot::Asc,
                    ClusteringOrder::Desc => OrderSnapshot::Desc,
                },
            })
            .collect(),
        cql_compatible: definition.cql_compatible,
        rows,
    })
}
