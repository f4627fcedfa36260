//! Purpose: Hold top-level CLI command dispatch for `cqldump`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Configuration errors surface before any output file is created.
//! Invariants: Import always saves the store, even when replay fails part way.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use cqldump::api::{
    ExportConfig, ExportScope, Exporter, MemoryCluster, ReplayConfig, Replayer,
};
use tracing::info;

use super::*;

pub(super) fn dispatch_command(command: Command) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "cqldump", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Export(args) => run_export(args),
        Command::Import(args) => run_import(args),
    }
}

fn io_error(err: io::Error, message: &str, path: &Path) -> Error {
    Error::new(ErrorKind::Io)
        .with_message(message)
        .with_path(path)
        .with_source(err)
}

fn run_export(args: ExportArgs) -> Result<RunOutcome, Error> {
    if args.no_create && args.no_insert {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--no-create and --no-insert leave nothing to export")
            .with_hint("Drop one of the two flags."));
    }
    let scope = ExportScope::from_selectors(args.keyspaces, args.tables, args.filters)?;
    let cluster = MemoryCluster::load(&args.store)?;
    let config = ExportConfig {
        scope,
        include_schema: !args.no_create,
        include_data: !args.no_insert,
        limit: args.limit,
        page_size: args.page_size,
        encode_errors: args.on_encode_error.into(),
        ..ExportConfig::default()
    };
    let exporter = Exporter::new(&cluster, &cluster, config);
    let steps = exporter.plan()?;

    let outcome = match &args.export_file {
        Some(path) => {
            let file = File::create(path)
                .map_err(|err| io_error(err, "failed to create export file", path))?;
            let mut out = BufWriter::new(file);
            let outcome = exporter.run_plan(&steps, &mut out)?;
            out.flush()
                .map_err(|err| io_error(err, "failed to write export file", path))?;
            info!(path = %path.display(), "export written");
            outcome
        }
        None => {
            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            exporter.run_plan(&steps, &mut out)?
        }
    };

    // stdout holds the dump itself when no file was given.
    if args.export_file.is_some() {
        emit_json(json!({
            "export": {
                "keyspaces": outcome.keyspaces,
                "tables": outcome.tables,
                "tables_failed": outcome.tables_failed,
                "rows": outcome.rows,
                "rows_skipped": outcome.rows_skipped,
                "statements": outcome.statements,
            }
        }));
    }
    Ok(RunOutcome::ok())
}

fn run_import(args: ImportArgs) -> Result<RunOutcome, Error> {
    let reader: Box<dyn BufRead> = match &args.import_file {
        Some(path) => {
            let file = File::open(path).map_err(|err| {
                let err = io_error(err, "failed to open import file", path);
                if !path.exists() {
                    return Error::new(ErrorKind::NotFound)
                        .with_message("import file does not exist")
                        .with_path(path);
                }
                err
            })?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(io::stdin())),
    };
    let cluster = Arc::new(MemoryCluster::load_or_empty(&args.store)?);
    let config = ReplayConfig {
        concurrent: !args.sync,
        batch_size: args.batch_size,
        ..ReplayConfig::default()
    };
    let replayer = Replayer::new(Arc::clone(&cluster), config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to start async runtime")
                .with_source(err)
        })?;
    let result = runtime.block_on(replayer.replay(reader));
    cluster.save(&args.store)?;
    let outcome = result?;

    emit_json(json!({
        "import": {
            "lines": outcome.lines,
            "statements": outcome.statements,
            "concurrent": outcome.concurrent,
            "sequential": outcome.sequential,
            "batches": outcome.batches,
        }
    }));
    Ok(RunOutcome::ok())
}
