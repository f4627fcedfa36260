//! Purpose: Contracts for the cluster-side collaborators the dump engine consumes.
//! Exports: `SchemaProvider`, `RowSource`, `ScanRequest`, `Page`, `PagingState`,
//! `StatementExecutor`.
//! Role: Seams between the encoder/replay core and whatever actually talks to a cluster.
//! Invariants: Row sources hand out bounded pages; callers never ask for a whole table at once.
//! Invariants: Executors must be shareable across blocking worker threads.
use crate::core::error::Error;
use crate::core::schema::{KeyspaceDefinition, TableDefinition};
use crate::core::value::Row;

pub trait SchemaProvider {
    fn keyspace_names(&self) -> Result<Vec<String>, Error>;

    fn keyspace(&self, name: &str) -> Result<Option<KeyspaceDefinition>, Error>;

    /// Tables of `keyspace` in definition order; empty when the keyspace is unknown.
    fn tables(&self, keyspace: &str) -> Result<Vec<TableDefinition>, Error>;

    fn table(&self, keyspace: &str, table: &str) -> Result<Option<TableDefinition>, Error> {
        Ok(self
            .tables(keyspace)?
            .into_iter()
            .find(|definition| definition.name == table))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScanRequest {
    pub keyspace: String,
    pub table: String,
    /// Body of a `SELECT * FROM ...` query (`ks.t WHERE ...`); `None` scans the whole table.
    pub filter: Option<String>,
    pub page_size: usize,
}

/// Opaque resume token handed back by a row source.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PagingState(Vec<u8>);

impl PagingState {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Page {
    pub rows: Vec<Row>,
    pub next: Option<PagingState>,
}

pub trait RowSource {
    fn fetch_page(&self, request: &ScanRequest, paging: Option<&PagingState>)
    -> Result<Page, Error>;
}

pub trait StatementExecutor: Send + Sync + 'static {
    /// Execute one complete statement and block until the target acknowledges it.
    fn execute(&self, statement: &str) -> Result<(), Error>;
}
