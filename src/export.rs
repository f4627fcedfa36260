//! Purpose: Drive an export: walk the planned steps, page through rows, write statements.
//! Exports: `ExportConfig`, `EncodeErrorPolicy`, `ExportOutcome`, `Exporter`.
//! Role: Export half of the engine; single-threaded and strictly sequential.
//! Invariants: Every written statement is complete and terminated by `;` and a newline.
//! Invariants: Only encoding errors are subject to `EncodeErrorPolicy`; I/O errors always abort.
//! Invariants: A table whose DDL fails to encode has none of its rows exported.
use std::collections::BTreeSet;
use std::io::Write;

use tracing::{debug, info, warn};

use crate::core::backend::{RowSource, ScanRequest, SchemaProvider};
use crate::core::cursor::RowCursor;
use crate::core::error::{Error, ErrorKind};
use crate::core::plan::{ExportScope, ExportStep, plan_export};
use crate::core::row::RowEncoder;
use crate::core::schema::{TableDefinition, keyspace_ddl, table_ddl};

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const DEFAULT_PROGRESS_EVERY: u64 = 1000;

/// What to do when a table cannot be encoded.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum EncodeErrorPolicy {
    /// Fail the whole export run.
    #[default]
    Abort,
    /// Log the failure, abandon the rest of that table, and carry on with the next one.
    SkipTable,
}

#[derive(Clone, Debug)]
pub struct ExportConfig {
    pub scope: ExportScope,
    pub include_schema: bool,
    pub include_data: bool,
    /// Maximum rows per table (or per filter).
    pub limit: Option<u64>,
    pub page_size: usize,
    pub encode_errors: EncodeErrorPolicy,
    pub progress_every: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            scope: ExportScope::All,
            include_schema: true,
            include_data: true,
            limit: None,
            page_size: DEFAULT_PAGE_SIZE,
            encode_errors: EncodeErrorPolicy::Abort,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ExportOutcome {
    pub keyspaces: u64,
    pub tables: u64,
    pub tables_failed: u64,
    pub rows: u64,
    pub rows_skipped: u64,
    pub statements: u64,
}

pub struct Exporter<'a, S: ?Sized, R: ?Sized> {
    schema: &'a S,
    rows: &'a R,
    config: ExportConfig,
}

impl<'a, S, R> Exporter<'a, S, R>
where
    S: SchemaProvider + ?Sized,
    R: RowSource + ?Sized,
{
    pub fn new(schema: &'a S, rows: &'a R, config: ExportConfig) -> Self {
        Self {
            schema,
            rows,
            config,
        }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn plan(&self) -> Result<Vec<ExportStep>, Error> {
        plan_export(
            self.schema,
            &self.config.scope,
            self.config.include_schema,
            self.config.include_data,
        )
    }

    pub fn run<W: Write>(&self, out: &mut W) -> Result<ExportOutcome, Error> {
        let steps = self.plan()?;
        self.run_plan(&steps, out)
    }

    pub fn run_plan<W: Write>(
        &self,
        steps: &[ExportStep],
        out: &mut W,
    ) -> Result<ExportOutcome, Error> {
        let mut outcome = ExportOutcome::default();
        let mut abandoned: BTreeSet<(String, String)> = BTreeSet::new();
        for step in steps {
            match step {
                ExportStep::KeyspaceSchema(keyspace) => {
                    info!(keyspace = %keyspace.name, "exporting schema for keyspace");
                    for statement in keyspace_ddl(keyspace) {
                        write_statement(out, &statement)?;
                        outcome.statements += 1;
                    }
                    outcome.keyspaces += 1;
                }
                ExportStep::TableSchema(table) => {
                    info!(
                        keyspace = %table.keyspace,
                        table = %table.name,
                        "exporting schema for table"
                    );
                    match table_ddl(table) {
                        Ok(statements) => {
                            for statement in statements {
                                write_statement(out, &statement)?;
                                outcome.statements += 1;
                            }
                        }
                        Err(err) => {
                            self.table_failed(table, err, &mut outcome)?;
                            abandoned.insert((table.keyspace.clone(), table.name.clone()));
                        }
                    }
                }
                ExportStep::TableData { table, filter } => {
                    if abandoned.contains(&(table.keyspace.clone(), table.name.clone())) {
                        debug!(
                            keyspace = %table.keyspace,
                            table = %table.name,
                            "skipping data for table without schema"
                        );
                        continue;
                    }
                    match self.export_rows(table, filter.as_deref(), out, &mut outcome) {
                        Ok(()) => outcome.tables += 1,
                        Err(err) => self.table_failed(table, err, &mut outcome)?,
                    }
                }
            }
        }
        out.flush().map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to flush export output")
                .with_source(err)
        })?;
        info!(
            statements = outcome.statements,
            rows = outcome.rows,
            tables = outcome.tables,
            "export complete"
        );
        Ok(outcome)
    }

    fn table_failed(
        &self,
        table: &TableDefinition,
        err: Error,
        outcome: &mut ExportOutcome,
    ) -> Result<(), Error> {
        let skippable = err.kind() == ErrorKind::Encode
            && self.config.encode_errors == EncodeErrorPolicy::SkipTable;
        if !skippable {
            return Err(err);
        }
        warn!(
            keyspace = %table.keyspace,
            table = %table.name,
            error = %err,
            "skipping rest of table after encoding error"
        );
        outcome.tables_failed += 1;
        Ok(())
    }

    fn export_rows<W: Write>(
        &self,
        table: &TableDefinition,
        filter: Option<&str>,
        out: &mut W,
        outcome: &mut ExportOutcome,
    ) -> Result<(), Error> {
        match filter {
            Some(filter) => info!(filter, "exporting data for filter"),
            None => info!(
                keyspace = %table.keyspace,
                table = %table.name,
                "exporting data for table"
            ),
        }
        let encoder = RowEncoder::new(table)?;
        let request = ScanRequest {
            keyspace: table.keyspace.clone(),
            table: table.name.clone(),
            filter: filter.map(str::to_string),
            page_size: self.config.page_size.max(1),
        };
        let progress_every = self.config.progress_every.max(1);
        let mut rows = 0u64;
        for row in RowCursor::new(self.rows, request, self.config.limit) {
            let row = row?;
            match encoder.encode(&row)? {
                Some(statement) => {
                    write_statement(out, &statement)?;
                    outcome.statements += 1;
                }
                None => {
                    debug!(table = %table.name, "skipping counter row without deltas");
                    outcome.rows_skipped += 1;
                }
            }
            rows += 1;
            outcome.rows += 1;
            if rows % progress_every == 0 {
                info!(table = %table.name, rows, "export progress");
            }
        }
        Ok(())
    }
}

fn write_statement<W: Write>(out: &mut W, statement: &str) -> Result<(), Error> {
    writeln!(out, "{statement}").map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to write statement")
            .with_source(err)
    })
}

#[cfg(test)]
mod tests {
    use super::{EncodeErrorPolicy, ExportConfig, Exporter};
    use crate::core::backend::{
        Page, PagingState, RowSource, ScanRequest, SchemaProvider, StatementExecutor,
    };
    use crate::core::error::{Error, ErrorKind};
    use crate::core::plan::{ExportScope, TableRef};
    use crate::core::schema::{ColumnDefinition, KeyspaceDefinition, TableDefinition};
    use crate::core::types::NativeType;
    use crate::core::value::{Row, Value};
    use crate::store::MemoryCluster;

    fn cluster(statements: &[&str]) -> MemoryCluster {
        let cluster = MemoryCluster::new();
        for statement in statements {
            cluster.execute(statement).expect("setup statement");
        }
        cluster
    }

    fn export(cluster: &MemoryCluster, config: ExportConfig) -> String {
        let mut out = Vec::new();
        Exporter::new(cluster, cluster, config)
            .run(&mut out)
            .expect("export");
        String::from_utf8(out).expect("utf8")
    }

    fn data_only(scope: ExportScope) -> ExportConfig {
        ExportConfig {
            scope,
            include_schema: false,
            ..ExportConfig::default()
        }
    }

    #[test]
    fn regular_table_exports_sparse_inserts() {
        let cluster = cluster(&[
            "CREATE KEYSPACE ks WITH replication = {'class': 'SimpleStrategy', 'replication_factor': '1'};",
            "CREATE TABLE ks.t (id int PRIMARY KEY, name text);",
            "INSERT INTO ks.t (id, name) VALUES (1, 'Alice');",
            "INSERT INTO ks.t (id) VALUES (2);",
        ]);
        let text = export(&cluster, data_only(ExportScope::Keyspaces(vec!["ks".into()])));
        assert_eq!(
            text,
            "INSERT INTO \"ks\".\"t\" (\"id\", \"name\") VALUES (1, 'Alice');\n\
             INSERT INTO \"ks\".\"t\" (\"id\") VALUES (2);\n"
        );
    }

    #[test]
    fn counter_table_exports_updates() {
        let cluster = cluster(&[
            "CREATE KEYSPACE ks WITH replication = {'class': 'SimpleStrategy', 'replication_factor': '1'};",
            "CREATE TABLE ks.t (id int PRIMARY KEY, hits counter);",
            "UPDATE ks.t SET hits = hits + 5 WHERE id = 1;",
        ]);
        let scope = ExportScope::Tables(vec![TableRef::parse("ks.t").unwrap()]);
        let text = export(&cluster, data_only(scope));
        assert_eq!(text, "UPDATE \"ks\".\"t\" SET hits = hits + 5 WHERE id = 1;\n");
    }

    #[test]
    fn schema_precedes_data_and_limit_applies() {
        let cluster = cluster(&[
            "CREATE KEYSPACE ks WITH replication = {'class': 'SimpleStrategy', 'replication_factor': '1'};",
            "CREATE TABLE ks.t (id int PRIMARY KEY);",
            "INSERT INTO ks.t (id) VALUES (1);",
            "INSERT INTO ks.t (id) VALUES (2);",
            "INSERT INTO ks.t (id) VALUES (3);",
        ]);
        let config = ExportConfig {
            limit: Some(2),
            page_size: 1,
            ..ExportConfig::default()
        };
        let text = export(&cluster, config);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "DROP KEYSPACE IF EXISTS \"ks\";");
        assert!(lines[1].starts_with("CREATE KEYSPACE \"ks\""));
        assert_eq!(lines[2], "DROP TABLE IF EXISTS \"ks\".\"t\";");
        assert!(lines[3].starts_with("CREATE TABLE \"ks\".\"t\""));
        assert_eq!(lines.len(), 6);
    }

    #[test]
    fn filters_export_matching_rows_only() {
        let cluster = cluster(&[
            "CREATE KEYSPACE ks WITH replication = {'class': 'SimpleStrategy', 'replication_factor': '1'};",
            "CREATE TABLE ks.t (id int PRIMARY KEY, team text);",
            "INSERT INTO ks.t (id, team) VALUES (1, 'red');",
            "INSERT INTO ks.t (id, team) VALUES (2, 'blue');",
            "INSERT INTO ks.t (id, team) VALUES (3, 'red');",
        ]);
        let scope = ExportScope::Filters(vec!["ks.t WHERE team = 'red' ALLOW FILTERING".into()]);
        let text = export(&cluster, data_only(scope));
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().all(|line| line.ends_with("'red');")));
    }

    struct MismatchedRows;

    impl RowSource for MismatchedRows {
        fn fetch_page(
            &self,
            request: &ScanRequest,
            _paging: Option<&PagingState>,
        ) -> Result<Page, Error> {
            let id = if request.table == "bad" {
                Value::text("not a number")
            } else {
                Value::Int(1)
            };
            Ok(Page {
                rows: vec![Row::new().with("id", id)],
                next: None,
            })
        }
    }

    fn two_tables() -> MemoryCluster {
        cluster(&[
            "CREATE KEYSPACE ks WITH replication = {'class': 'SimpleStrategy', 'replication_factor': '1'};",
            "CREATE TABLE ks.bad (id int PRIMARY KEY);",
            "CREATE TABLE ks.good (id int PRIMARY KEY);",
        ])
    }

    #[test]
    fn encoding_errors_abort_by_default() {
        let schema = two_tables();
        let mut out = Vec::new();
        let err = Exporter::new(&schema, &MismatchedRows, data_only(ExportScope::All))
            .run(&mut out)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Encode);
        assert_eq!(err.table(), Some("ks.bad"));
    }

    #[test]
    fn skip_table_policy_continues_with_next_table() {
        let schema = two_tables();
        let config = ExportConfig {
            encode_errors: EncodeErrorPolicy::SkipTable,
            ..data_only(ExportScope::All)
        };
        let mut out = Vec::new();
        let outcome = Exporter::new(&schema, &MismatchedRows, config)
            .run(&mut out)
            .unwrap();
        assert_eq!(outcome.tables_failed, 1);
        assert_eq!(outcome.tables, 1);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "INSERT INTO \"ks\".\"good\" (\"id\") VALUES (1);\n"
        );
    }

    struct KeylessCatalog;

    impl SchemaProvider for KeylessCatalog {
        fn keyspace_names(&self) -> Result<Vec<String>, Error> {
            Ok(vec!["ks".into()])
        }

        fn keyspace(&self, name: &str) -> Result<Option<KeyspaceDefinition>, Error> {
            Ok((name == "ks").then(|| KeyspaceDefinition::new("ks")))
        }

        fn tables(&self, keyspace: &str) -> Result<Vec<TableDefinition>, Error> {
            if keyspace != "ks" {
                return Ok(Vec::new());
            }
            let id = || vec![ColumnDefinition::new("id", NativeType::Int.into())];
            Ok(vec![
                TableDefinition::new("ks", "good", id()).with_partition_key(["id"]),
                TableDefinition::new("ks", "nokey", id()),
            ])
        }
    }

    #[test]
    fn skip_table_policy_drops_rows_of_table_with_broken_schema() {
        let config = ExportConfig {
            encode_errors: EncodeErrorPolicy::SkipTable,
            ..ExportConfig::default()
        };
        let mut out = Vec::new();
        let outcome = Exporter::new(&KeylessCatalog, &MismatchedRows, config)
            .run(&mut out)
            .unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(outcome.tables_failed, 1);
        assert_eq!(outcome.tables, 1);
        assert_eq!(outcome.rows, 1);
        assert!(text.contains("INSERT INTO \"ks\".\"good\""));
        assert!(!text.contains("\"nokey\""));
    }

    #[test]
    fn broken_schema_aborts_by_default() {
        let mut out = Vec::new();
        let err = Exporter::new(&KeylessCatalog, &MismatchedRows, ExportConfig::default())
            .run(&mut out)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Encode);
        assert_eq!(err.table(), Some("ks.nokey"));
    }
}
