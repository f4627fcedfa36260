//! Purpose: Shared library crate behind the `cqldump` CLI and tests.
//! Exports: `api` (public boundary), `core` (value model, encoders, planning, errors),
//! `export`, `replay`, `store`.
//! Role: Logical dump/restore engine for CQL column-family stores.
//! Invariants: Components receive explicit configuration values; there is no process-wide state.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
pub mod export;
pub mod replay;
pub mod store;
