//! Purpose: Define the stable public Rust API boundary for cqldump.
//! Exports: Collaborator traits, value/schema model, export and replay drivers, the memory store.
//! Role: Public, additive-only surface used by the CLI and integration tests.
//! Invariants: Callers reach encoders and drivers through this module, not `core` paths.
//! Invariants: Everything exported here is usable without a live cluster.

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::backend::{
    Page, PagingState, RowSource, ScanRequest, SchemaProvider, StatementExecutor,
};
pub use crate::core::cursor::RowCursor;
pub use crate::core::encode::{encode_value, maybe_quote_identifier, quote_identifier};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::literal::parse_literal;
pub use crate::core::plan::{ExportScope, ExportStep, SYSTEM_KEYSPACES, TableRef, plan_export};
pub use crate::core::row::RowEncoder;
pub use crate::core::schema::{
    ClusteringOrder, ColumnDefinition, KeyspaceDefinition, TableDefinition, keyspace_ddl,
    table_ddl,
};
pub use crate::core::types::{CqlType, NativeType};
pub use crate::core::value::{Row, Value};
pub use crate::export::{EncodeErrorPolicy, ExportConfig, ExportOutcome, Exporter};
pub use crate::replay::{
    DEFAULT_BATCH_SIZE, ReplayConfig, ReplayOutcome, Replayer, StatementClass, classify,
};
pub use crate::store::MemoryCluster;
