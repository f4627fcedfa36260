//! Purpose: `cqldump` CLI entry point.
//! Role: Binary crate root; parses args, installs logging, runs commands, emits JSON on stdout.
//! Invariants: stdout carries only the dump (when no file is given) or the JSON summary.
//! Invariants: Logs go to stderr; non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::ffi::OsString;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{
    Args, CommandFactory, Parser, Subcommand, ValueEnum, ValueHint,
    error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use cqldump::api::{EncodeErrorPolicy, Error, ErrorKind, to_exit_code};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse_from(std::env::args_os().collect::<Vec<OsString>>()) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint("Try `cqldump --help`."),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    init_tracing(cli.quiet);

    command_dispatch::dispatch_command(cli.command)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

fn init_tracing(quiet: bool) {
    let env_filter = if quiet {
        EnvFilter::new("warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "cqldump",
    version,
    about = "Dump keyspaces as replayable CQL statements, and replay them",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"A dump is plain CQL text: optional DROP/CREATE schema statements followed by
one INSERT (or counter UPDATE) per row, each terminated by `;` and a newline.
"#,
    after_help = r#"EXAMPLES
  $ cqldump export --store cluster.json --keyspace shop --export-file shop.cql
  $ cqldump import --store restored.json --import-file shop.cql
  $ cqldump export --store cluster.json --filter "shop.orders WHERE customer = 'ann'"

LEARN MORE
  $ cqldump <command> --help"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[arg(long, global = true, help = "Only log warnings and errors")]
    quiet: bool,
    #[arg(
        long,
        global = true,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum EncodeErrorCli {
    Abort,
    SkipTable,
}

impl From<EncodeErrorCli> for EncodeErrorPolicy {
    fn from(value: EncodeErrorCli) -> Self {
        match value {
            EncodeErrorCli::Abort => EncodeErrorPolicy::Abort,
            EncodeErrorCli::SkipTable => EncodeErrorPolicy::SkipTable,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Write schema and rows as CQL statements",
        long_about = r#"Export keyspaces, tables, or filtered rows as a CQL statement stream.

Without a selector every non-system keyspace is exported. --keyspace, --cf and
--filter are mutually exclusive. A filter is a SELECT body without
`SELECT * FROM`, and exports data only."#,
        after_help = r#"EXAMPLES
  $ cqldump export --store cluster.json > all.cql
  $ cqldump export --store cluster.json --cf shop.orders --no-create
  $ cqldump export --store cluster.json --keyspace shop --limit 100"#
    )]
    Export(ExportArgs),
    #[command(
        about = "Replay a CQL statement stream",
        long_about = r#"Replay a dump produced by `cqldump export`.

INSERT and UPDATE statements run concurrently in batches; every other statement
waits for the pending batch and then runs on its own. Use --sync to run
everything one statement at a time."#,
        after_help = r#"EXAMPLES
  $ cqldump import --store restored.json --import-file shop.cql
  $ cqldump import --store restored.json --sync < shop.cql"#
    )]
    Import(ImportArgs),
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completions",
        after_help = r#"EXAMPLES
  $ cqldump completion bash > ~/.local/share/bash-completion/completions/cqldump
  $ cqldump completion zsh > ~/.zfunc/_cqldump"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Args)]
struct ExportArgs {
    #[arg(long, help = "Store snapshot to read from", value_hint = ValueHint::FilePath)]
    store: PathBuf,
    #[arg(
        long,
        help = "Write statements to this file instead of stdout",
        value_hint = ValueHint::FilePath
    )]
    export_file: Option<PathBuf>,
    #[arg(long = "keyspace", help = "Export only this keyspace (repeatable)")]
    keyspaces: Vec<String>,
    #[arg(long = "cf", help = "Export only this keyspace.table (repeatable)")]
    tables: Vec<String>,
    #[arg(long = "filter", help = "Export rows matching `ks.t WHERE ...` (repeatable)")]
    filters: Vec<String>,
    #[arg(long, help = "Skip DROP/CREATE schema statements")]
    no_create: bool,
    #[arg(long, help = "Skip row data")]
    no_insert: bool,
    #[arg(long, help = "Maximum rows per table or filter")]
    limit: Option<u64>,
    #[arg(long, default_value_t = cqldump::export::DEFAULT_PAGE_SIZE, help = "Rows fetched per page")]
    page_size: usize,
    #[arg(
        long,
        value_enum,
        default_value = "abort",
        help = "What to do when a table cannot be encoded"
    )]
    on_encode_error: EncodeErrorCli,
}

#[derive(Args)]
struct ImportArgs {
    #[arg(long, help = "Store snapshot to replay into (created if missing)", value_hint = ValueHint::FilePath)]
    store: PathBuf,
    #[arg(
        long,
        help = "Read statements from this file instead of stdin",
        value_hint = ValueHint::FilePath
    )]
    import_file: Option<PathBuf>,
    #[arg(long, help = "Run every statement sequentially")]
    sync: bool,
    #[arg(long, default_value_t = cqldump::replay::DEFAULT_BATCH_SIZE, help = "Statements per concurrent batch")]
    batch_size: usize,
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn add_io_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Io || err.hint().is_some() {
        return err;
    }
    err.with_hint("I/O error. Check the path, filesystem, and disk space.")
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint("Internal error. Re-run with RUST_LOG=debug and report the output.")
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Encode => "encoding failed".to_string(),
        ErrorKind::Parse => "parse error".to_string(),
        ErrorKind::Execution => "statement failed".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(table) = err.table() {
        inner.insert("table".to_string(), json!(table));
    }
    if let Some(line) = err.line() {
        inner.insert("line".to_string(), json!(line));
    }
    if let Some(statement) = err.statement() {
        inner.insert("statement".to_string(), json!(statement));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    let label = |name: &str| colorize_label(name, use_color, AnsiColor::Yellow);
    if let Some(hint) = err.hint() {
        lines.push(format!("{} {hint}", label("hint:")));
    }
    if let Some(path) = err.path() {
        lines.push(format!("{} {}", label("path:"), path.display()));
    }
    if let Some(table) = err.table() {
        lines.push(format!("{} {table}", label("table:")));
    }
    if let Some(line) = err.line() {
        lines.push(format!("{} {line}", label("line:")));
    }
    if let Some(statement) = err.statement() {
        lines.push(format!("{} {statement}", label("statement:")));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!("{} {cause}", label("caused by:")));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}
