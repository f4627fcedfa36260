//! Purpose: In-process column-family store usable as both export source and import target.
//! Exports: `MemoryCluster`.
//! Role: Reference backend for the three collaborator traits; persisted as a JSON snapshot.
//! Invariants: Rows are keyed by the encoded literals of their primary-key columns.
//! Invariants: Scans walk rows in key order and resume strictly after the last returned key.
//! Invariants: All state sits behind one mutex; each statement applies atomically.
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};

use crate::core::backend::{
    Page, PagingState, RowSource, ScanRequest, SchemaProvider, StatementExecutor,
};
use crate::core::encode::encode_value;
use crate::core::error::{Error, ErrorKind};
use crate::core::literal::Parser;
use crate::core::schema::{KeyspaceDefinition, TableDefinition};
use crate::core::value::{Row, Value};

mod snapshot;
mod statement;

pub use snapshot::SNAPSHOT_VERSION;

pub(crate) type RowKey = Vec<String>;
pub(crate) type Cells = BTreeMap<String, Value>;

#[derive(Clone, Debug, Default)]
pub(crate) struct ClusterState {
    pub(crate) keyspaces: BTreeMap<String, KeyspaceState>,
}

impl ClusterState {
    pub(crate) fn table(&self, keyspace: &str, table: &str) -> Option<&TableState> {
        self.keyspaces.get(keyspace)?.table(table)
    }

    pub(crate) fn table_mut(&mut self, keyspace: &str, table: &str) -> Option<&mut TableState> {
        self.keyspaces
            .get_mut(keyspace)?
            .tables
            .iter_mut()
            .find(|state| state.definition.name == table)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct KeyspaceState {
    pub(crate) definition: KeyspaceDefinition,
    /// Creation order.
    pub(crate) tables: Vec<TableState>,
}

impl KeyspaceState {
    pub(crate) fn table(&self, name: &str) -> Option<&TableState> {
        self.tables.iter().find(|state| state.definition.name == name)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct TableState {
    pub(crate) definition: TableDefinition,
    pub(crate) rows: BTreeMap<RowKey, Cells>,
}

impl TableState {
    pub(crate) fn new(definition: TableDefinition) -> Self {
        Self {
            definition,
            rows: BTreeMap::new(),
        }
    }

    /// Key of the row addressed by `cells`; every primary-key column must be present and non-NULL.
    pub(crate) fn row_key(&self, cells: &[(String, Value)]) -> Result<RowKey, Error> {
        self.definition
            .primary_key()
            .map(|key| {
                let value = cells
                    .iter()
                    .find(|(name, _)| name == key)
                    .map(|(_, value)| value)
                    .filter(|value| !value.is_null())
                    .ok_or_else(|| {
                        Error::new(ErrorKind::Execution)
                            .with_message(format!("missing value for primary key column `{key}`"))
                    })?;
                let cql_type = self
                    .definition
                    .column(key)
                    .map(|column| &column.cql_type)
                    .ok_or_else(|| {
                        Error::new(ErrorKind::Internal)
                            .with_message(format!("primary key column `{key}` is not defined"))
                    })?;
                encode_value(value, cql_type)
            })
            .collect()
    }

    /// Full row in column order; absent cells read back as NULL.
    pub(crate) fn row(&self, cells: &Cells) -> Row {
        self.definition
            .columns
            .iter()
            .map(|column| {
                let value = cells.get(&column.name).cloned().unwrap_or(Value::Null);
                (column.name.clone(), value)
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: Mutex<ClusterState>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_state(state: ClusterState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ClusterState>, Error> {
        self.state.lock().map_err(|_| {
            Error::new(ErrorKind::Internal).with_message("cluster state lock poisoned")
        })
    }

    /// Every row of one table, in key order.
    pub fn rows(&self, keyspace: &str, table: &str) -> Result<Vec<Row>, Error> {
        let state = self.lock()?;
        let table_state = state
            .table(keyspace, table)
            .ok_or_else(|| missing_table(keyspace, table))?;
        Ok(table_state
            .rows
            .values()
            .map(|cells| table_state.row(cells))
            .collect())
    }

    pub fn row_count(&self, keyspace: &str, table: &str) -> Result<usize, Error> {
        let state = self.lock()?;
        state
            .table(keyspace, table)
            .map(|table| table.rows.len())
            .ok_or_else(|| missing_table(keyspace, table))
    }
}

fn missing_table(keyspace: &str, table: &str) -> Error {
    Error::new(ErrorKind::NotFound)
        .with_message("can't find table")
        .with_table(keyspace, table)
}

impl SchemaProvider for MemoryCluster {
    fn keyspace_names(&self) -> Result<Vec<String>, Error> {
        Ok(self.lock()?.keyspaces.keys().cloned().collect())
    }

    fn keyspace(&self, name: &str) -> Result<Option<KeyspaceDefinition>, Error> {
        Ok(self
            .lock()?
            .keyspaces
            .get(name)
            .map(|space| space.definition.clone()))
    }

    fn tables(&self, keyspace: &str) -> Result<Vec<TableDefinition>, Error> {
        Ok(self
            .lock()?
            .keyspaces
            .get(keyspace)
            .map(|space| {
                space
                    .tables
                    .iter()
                    .map(|table| table.definition.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Parsed `ks.t [WHERE col = literal [AND ...]] [ALLOW FILTERING]`.
struct Filter {
    keyspace: String,
    table: String,
    predicates: Vec<(String, Value)>,
}

fn invalid_filter(filter: &str, err: Error) -> Error {
    Error::new(ErrorKind::Parse)
        .with_message(format!(
            "invalid filter `{filter}`: {}",
            err.message().unwrap_or("malformed filter")
        ))
        .with_hint("Filters look like: ks.t WHERE col = 'value' AND other = 1")
}

fn parse_filter(state: &ClusterState, filter: &str) -> Result<Filter, Error> {
    let mut parser = Parser::new(filter).map_err(|err| invalid_filter(filter, err))?;
    let (keyspace, table) = match parser.qualified_name() {
        Ok((Some(keyspace), table)) => (keyspace, table),
        Ok((None, _)) => {
            let err = Error::new(ErrorKind::Parse).with_message("table must be keyspace.table");
            return Err(invalid_filter(filter, err));
        }
        Err(err) => return Err(invalid_filter(filter, err)),
    };
    let definition = &state
        .table(&keyspace, &table)
        .ok_or_else(|| missing_table(&keyspace, &table))?
        .definition;

    let mut predicates = Vec::new();
    let mut parse_rest = || -> Result<(), Error> {
        if parser.eat_keyword("where") {
            loop {
                let column = parser.identifier()?;
                let cql_type = &definition
                    .column(&column)
                    .ok_or_else(|| {
                        Error::new(ErrorKind::Parse)
                            .with_message(format!("undefined column name `{column}`"))
                    })?
                    .cql_type;
                parser.expect_symbol('=')?;
                let value = parser.literal(cql_type)?;
                predicates.push((column, value));
                if !parser.eat_keyword("and") {
                    break;
                }
            }
        }
        if parser.eat_keyword("allow") {
            parser.expect_keyword("filtering")?;
        }
        parser.finish()
    };
    parse_rest().map_err(|err| invalid_filter(filter, err))?;

    Ok(Filter {
        keyspace,
        table,
        predicates,
    })
}

impl RowSource for MemoryCluster {
    fn fetch_page(
        &self,
        request: &ScanRequest,
        paging: Option<&PagingState>,
    ) -> Result<Page, Error> {
        let state = self.lock()?;
        let filter = match &request.filter {
            Some(filter) => parse_filter(&state, filter)?,
            None => Filter {
                keyspace: request.keyspace.clone(),
                table: request.table.clone(),
                predicates: Vec::new(),
            },
        };
        let table = state
            .table(&filter.keyspace, &filter.table)
            .ok_or_else(|| missing_table(&filter.keyspace, &filter.table))?;

        let start = match paging {
            Some(paging) => {
                let key: RowKey = serde_json::from_slice(paging.as_bytes()).map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("invalid paging state")
                        .with_source(err)
                })?;
                Bound::Excluded(key)
            }
            None => Bound::Unbounded,
        };

        let page_size = request.page_size.max(1);
        let mut rows = Vec::with_capacity(page_size);
        let mut last_key = None;
        let mut more = false;
        for (key, cells) in table.rows.range((start, Bound::Unbounded)) {
            let matches = filter
                .predicates
                .iter()
                .all(|(column, value)| cells.get(column) == Some(value));
            if !matches {
                continue;
            }
            if rows.len() == page_size {
                more = true;
                break;
            }
            rows.push(table.row(cells));
            last_key = Some(key);
        }

        let next = match (more, last_key) {
            (true, Some(key)) => {
                let bytes = serde_json::to_vec(key).map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to encode paging state")
                        .with_source(err)
                })?;
                Some(PagingState::new(bytes))
            }
            _ => None,
        };
        Ok(Page { rows, next })
    }
}

impl StatementExecutor for MemoryCluster {
    fn execute(&self, statement: &str) -> Result<(), Error> {
        let mut state = self.lock()?;
        statement::apply(&mut state, statement)
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryCluster;
    use crate::core::backend::{RowSource, ScanRequest, SchemaProvider, StatementExecutor};
    use crate::core::cursor::RowCursor;
    use crate::core::error::ErrorKind;
    use crate::core::value::Value;

    fn cluster() -> MemoryCluster {
        let cluster = MemoryCluster::new();
        for statement in [
            "CREATE KEYSPACE shop WITH replication = {'class': 'SimpleStrategy', 'replication_factor': 1};",
            "CREATE TABLE shop.orders (customer text, id int, total int, PRIMARY KEY ((customer), id));",
            "CREATE TABLE shop.audit (id int PRIMARY KEY);",
        ] {
            cluster.execute(statement).unwrap();
        }
        for id in 0..5 {
            let customer = if id % 2 == 0 { "ann" } else { "bob" };
            cluster
                .execute(&format!(
                    "INSERT INTO shop.orders (customer, id, total) VALUES ('{customer}', {id}, {});",
                    id * 10
                ))
                .unwrap();
        }
        cluster
    }

    fn request(filter: Option<&str>, page_size: usize) -> ScanRequest {
        ScanRequest {
            keyspace: "shop".to_string(),
            table: "orders".to_string(),
            filter: filter.map(str::to_string),
            page_size,
        }
    }

    #[test]
    fn schema_lists_tables_in_creation_order() {
        let cluster = cluster();
        assert_eq!(cluster.keyspace_names().unwrap(), vec!["shop".to_string()]);
        let names: Vec<String> = cluster
            .tables("shop")
            .unwrap()
            .into_iter()
            .map(|table| table.name)
            .collect();
        assert_eq!(names, vec!["orders", "audit"]);
        assert!(cluster.table("shop", "nope").unwrap().is_none());
        assert_eq!(
            cluster.keyspace("shop").unwrap().unwrap().replication["replication_factor"],
            "1"
        );
    }

    #[test]
    fn pages_resume_after_last_key() {
        let cluster = cluster();
        let first = cluster.fetch_page(&request(None, 2), None).unwrap();
        assert_eq!(first.rows.len(), 2);
        let second = cluster
            .fetch_page(&request(None, 2), first.next.as_ref())
            .unwrap();
        assert_eq!(second.rows.len(), 2);
        assert_ne!(first.rows, second.rows);

        let mut cursor = RowCursor::new(&cluster, request(None, 2), None);
        let all: Vec<_> = cursor.by_ref().map(Result::unwrap).collect();
        assert_eq!(all.len(), 5);
        assert_eq!(cursor.pages_fetched(), 3);
    }

    #[test]
    fn filters_match_on_equality() {
        let cluster = cluster();
        let rows: Vec<_> = RowCursor::new(
            &cluster,
            request(Some("shop.orders WHERE customer = 'ann' ALLOW FILTERING"), 1),
            None,
        )
        .map(Result::unwrap)
        .collect();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row.get("customer") == Some(&Value::text("ann"))));
    }

    #[test]
    fn bad_filters_are_rejected() {
        let cluster = cluster();
        for filter in ["shop.orders WHERE nope = 1", "orders", "shop.orders WHERE id = 'x'"] {
            let err = cluster
                .fetch_page(&request(Some(filter), 10), None)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Parse, "{filter}");
        }
        let err = cluster
            .fetch_page(&request(Some("shop.gone"), 10), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn unset_cells_read_back_as_null() {
        let cluster = cluster();
        cluster
            .execute("INSERT INTO shop.orders (customer, id) VALUES ('cy', 9);")
            .unwrap();
        let rows = cluster.rows("shop", "orders").unwrap();
        let row = rows
            .iter()
            .find(|row| row.get("customer") == Some(&Value::text("cy")))
            .unwrap();
        assert_eq!(row.get("total"), Some(&Value::Null));
        assert_eq!(cluster.row_count("shop", "orders").unwrap(), 6);
    }
}
