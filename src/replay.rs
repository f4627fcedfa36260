//! Purpose: Replay a dump's statement stream against an executor, batching row mutations.
//! Exports: `ReplayConfig`, `ReplayOutcome`, `Replayer`, `StatementSplitter`, `ParsedStatement`,
//! `StatementClass`, `classify`, `DEFAULT_BATCH_SIZE`.
//! Role: Import half of the engine; the only place where statements run concurrently.
//! Invariants: No statement of batch N+1 is submitted before every statement of batch N finished.
//! Invariants: Sequential statements run only after the pending batch has been flushed.
//! Invariants: Every parsed statement is executed at most once; a failure halts the replay.
use std::io::{self, BufRead};
use std::sync::Arc;

use bstr::ByteSlice;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::core::backend::StatementExecutor;
use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Clone, Copy, Debug)]
pub struct ReplayConfig {
    /// Run INSERT/UPDATE statements in concurrent batches; otherwise everything is sequential.
    pub concurrent: bool,
    pub batch_size: usize,
    pub progress_every: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            concurrent: true,
            batch_size: DEFAULT_BATCH_SIZE,
            progress_every: 1000,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReplayOutcome {
    pub lines: u64,
    pub statements: u64,
    pub concurrent: u64,
    pub sequential: u64,
    pub batches: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParsedStatement {
    pub text: String,
    /// 1-based line on which the statement starts.
    pub line: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatementClass {
    Concurrent,
    Sequential,
}

/// Row mutations may share a batch; anything else (DDL, DELETE, ...) must run on its own.
pub fn classify(statement: &str, concurrent: bool) -> StatementClass {
    let keyword = statement
        .trim_start()
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default();
    let mutation =
        keyword.eq_ignore_ascii_case("insert") || keyword.eq_ignore_ascii_case("update");
    if concurrent && mutation {
        StatementClass::Concurrent
    } else {
        StatementClass::Sequential
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
enum Quote {
    #[default]
    None,
    Single,
    Double,
    Dollar,
}

/// Incremental, quote-aware statement splitter fed one line at a time.
#[derive(Debug, Default)]
pub struct StatementSplitter {
    buffer: String,
    start_line: Option<u64>,
    quote: Quote,
}

impl StatementSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line without its trailing newline; returns the statements it completed.
    pub fn push_line(&mut self, line: &str, line_no: u64) -> Vec<ParsedStatement> {
        let chars: Vec<char> = line.chars().collect();
        let mut completed = Vec::new();
        let mut i = 0;
        while i < chars.len() {
            let ch = chars[i];
            let next = chars.get(i + 1).copied();
            match self.quote {
                Quote::None => {
                    let comment = matches!((ch, next), ('-', Some('-')) | ('/', Some('/')));
                    if comment {
                        break;
                    }
                    if !ch.is_whitespace() && self.start_line.is_none() {
                        self.start_line = Some(line_no);
                    }
                    self.buffer.push(ch);
                    match ch {
                        ';' => completed.extend(self.take()),
                        '\'' => self.quote = Quote::Single,
                        '"' => self.quote = Quote::Double,
                        '$' if next == Some('$') => {
                            self.buffer.push('$');
                            self.quote = Quote::Dollar;
                            i += 1;
                        }
                        _ => {}
                    }
                }
                Quote::Single | Quote::Double => {
                    self.buffer.push(ch);
                    let closing = if self.quote == Quote::Single { '\'' } else { '"' };
                    if ch == closing {
                        if next == Some(closing) {
                            self.buffer.push(closing);
                            i += 1;
                        } else {
                            self.quote = Quote::None;
                        }
                    }
                }
                Quote::Dollar => {
                    self.buffer.push(ch);
                    if ch == '$' && next == Some('$') {
                        self.buffer.push('$');
                        self.quote = Quote::None;
                        i += 1;
                    }
                }
            }
            i += 1;
        }
        if self.start_line.is_some() {
            self.buffer.push('\n');
        } else {
            self.buffer.clear();
        }
        completed
    }

    /// Whatever is left once the input ends: an unterminated trailing statement, if any.
    pub fn finish(&mut self) -> Option<ParsedStatement> {
        self.quote = Quote::None;
        self.take()
    }

    fn take(&mut self) -> Option<ParsedStatement> {
        let text = self.buffer.trim().to_string();
        let line = self.start_line.take();
        self.buffer.clear();
        if text.is_empty() || text == ";" {
            return None;
        }
        Some(ParsedStatement {
            text,
            line: line.unwrap_or_default(),
        })
    }
}

pub struct Replayer<E: StatementExecutor> {
    executor: Arc<E>,
    config: ReplayConfig,
}

impl<E: StatementExecutor> Replayer<E> {
    pub fn new(executor: Arc<E>, config: ReplayConfig) -> Self {
        Self { executor, config }
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub async fn replay<R: BufRead>(&self, mut reader: R) -> Result<ReplayOutcome, Error> {
        let mut outcome = ReplayOutcome::default();
        let mut splitter = StatementSplitter::new();
        let mut pending = Vec::new();
        let mut buf = Vec::new();
        info!(
            concurrent = self.config.concurrent,
            batch_size = self.batch_size(),
            "replaying statements"
        );
        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .map_err(|err| io_error(err, "failed to read statement stream"))?;
            if read == 0 {
                break;
            }
            outcome.lines += 1;
            let line = buf.to_str().map_err(|err| {
                Error::new(ErrorKind::Parse)
                    .with_message("statement stream is not valid UTF-8")
                    .with_line(outcome.lines)
                    .with_source(err)
            })?;
            let line = line.strip_suffix('\n').unwrap_or(line);
            for statement in splitter.push_line(line, outcome.lines) {
                self.dispatch(statement, &mut pending, &mut outcome).await?;
            }
        }

        if let Some(partial) = splitter.finish() {
            warn!(
                line = partial.line,
                "statement at end of input has no terminator; executing it as-is"
            );
            self.flush(&mut pending, &mut outcome).await?;
            self.execute_one(partial, &mut outcome).await?;
        }
        self.flush(&mut pending, &mut outcome).await?;

        info!(
            statements = outcome.statements,
            batches = outcome.batches,
            "replay complete"
        );
        Ok(outcome)
    }

    fn batch_size(&self) -> usize {
        self.config.batch_size.max(1)
    }

    async fn dispatch(
        &self,
        statement: ParsedStatement,
        pending: &mut Vec<ParsedStatement>,
        outcome: &mut ReplayOutcome,
    ) -> Result<(), Error> {
        match classify(&statement.text, self.config.concurrent) {
            StatementClass::Concurrent => {
                pending.push(statement);
                if pending.len() >= self.batch_size() {
                    self.flush(pending, outcome).await?;
                }
            }
            StatementClass::Sequential => {
                self.flush(pending, outcome).await?;
                self.execute_one(statement, outcome).await?;
            }
        }
        Ok(())
    }

    /// Submit every pending statement, then wait for all of them before returning.
    async fn flush(
        &self,
        pending: &mut Vec<ParsedStatement>,
        outcome: &mut ReplayOutcome,
    ) -> Result<(), Error> {
        if pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(pending);
        let before = outcome.statements;
        outcome.batches += 1;
        debug!(batch = outcome.batches, size = batch.len(), "submitting batch");

        let mut tasks = JoinSet::new();
        for (index, statement) in batch.into_iter().enumerate() {
            let executor = Arc::clone(&self.executor);
            tasks.spawn_blocking(move || {
                let result = executor.execute(&statement.text);
                (index, statement, result)
            });
        }

        let mut first_failure: Option<(usize, Error)> = None;
        let mut worker_failure = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, _, Ok(()))) => {
                    outcome.statements += 1;
                    outcome.concurrent += 1;
                }
                Ok((index, statement, Err(err))) => {
                    let earlier = first_failure
                        .as_ref()
                        .is_none_or(|(first, _)| index < *first);
                    if earlier {
                        first_failure = Some((index, attach_statement(err, statement)));
                    }
                }
                Err(err) => worker_failure = Some(join_error(err)),
            }
        }
        debug!(batch = outcome.batches, "batch complete");

        if let Some((_, err)) = first_failure {
            return Err(err);
        }
        if let Some(err) = worker_failure {
            return Err(err);
        }
        self.report_progress(before, outcome);
        Ok(())
    }

    async fn execute_one(
        &self,
        statement: ParsedStatement,
        outcome: &mut ReplayOutcome,
    ) -> Result<(), Error> {
        let executor = Arc::clone(&self.executor);
        let (statement, result) = tokio::task::spawn_blocking(move || {
            let result = executor.execute(&statement.text);
            (statement, result)
        })
        .await
        .map_err(join_error)?;
        result.map_err(|err| attach_statement(err, statement))?;
        let before = outcome.statements;
        outcome.statements += 1;
        outcome.sequential += 1;
        self.report_progress(before, outcome);
        Ok(())
    }

    fn report_progress(&self, before: u64, outcome: &ReplayOutcome) {
        let every = self.config.progress_every.max(1);
        if before / every != outcome.statements / every {
            info!(statements = outcome.statements, "replay progress");
        }
    }
}

fn attach_statement(err: Error, statement: ParsedStatement) -> Error {
    err.with_line(statement.line).with_statement(statement.text)
}

fn io_error(err: io::Error, message: &str) -> Error {
    Error::new(ErrorKind::Io)
        .with_message(message)
        .with_source(err)
}

fn join_error(err: tokio::task::JoinError) -> Error {
    Error::new(ErrorKind::Internal)
        .with_message("statement worker did not complete")
        .with_source(err)
}

#[cfg(test)]
mod tests {
    use super::{
        ParsedStatement, ReplayConfig, Replayer, StatementClass, StatementSplitter, classify,
    };
    use crate::core::backend::StatementExecutor;
    use crate::core::error::{Error, ErrorKind};
    use std::io::Cursor;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        executed: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail_on: Option<&'static str>,
    }

    impl Recorder {
        fn failing_on(marker: &'static str) -> Self {
            Self {
                fail_on: Some(marker),
                ..Self::default()
            }
        }

        fn executed(&self) -> Vec<String> {
            self.executed.lock().unwrap().clone()
        }
    }

    impl StatementExecutor for Recorder {
        fn execute(&self, statement: &str) -> Result<(), Error> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail_on.is_some_and(|marker| statement.contains(marker)) {
                return Err(Error::new(ErrorKind::Execution).with_message("rejected"));
            }
            self.executed.lock().unwrap().push(statement.to_string());
            Ok(())
        }
    }

    fn config(concurrent: bool, batch_size: usize) -> ReplayConfig {
        ReplayConfig {
            concurrent,
            batch_size,
            ..ReplayConfig::default()
        }
    }

    fn inserts(range: std::ops::Range<u32>) -> String {
        range
            .map(|id| format!("INSERT INTO \"ks\".\"t\" (\"id\") VALUES ({id});\n"))
            .collect()
    }

    #[test]
    fn splits_on_unquoted_semicolons_only() {
        let mut splitter = StatementSplitter::new();
        let out = splitter.push_line(
            "INSERT INTO t (a) VALUES ('x;y'); UPDATE t SET \"we;ird\" = $$a;b$$ WHERE k = 1;",
            1,
        );
        assert_eq!(
            out,
            vec![
                ParsedStatement {
                    text: "INSERT INTO t (a) VALUES ('x;y');".to_string(),
                    line: 1,
                },
                ParsedStatement {
                    text: "UPDATE t SET \"we;ird\" = $$a;b$$ WHERE k = 1;".to_string(),
                    line: 1,
                },
            ]
        );
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn multi_line_statements_keep_their_start_line() {
        let mut splitter = StatementSplitter::new();
        assert!(splitter.push_line("", 1).is_empty());
        assert!(splitter.push_line("-- a comment; not a statement", 2).is_empty());
        assert!(splitter.push_line("INSERT INTO t (a) VALUES ('it''s", 3).is_empty());
        let out = splitter.push_line("two lines'); // trailing", 4);
        assert_eq!(
            out,
            vec![ParsedStatement {
                text: "INSERT INTO t (a) VALUES ('it''s\ntwo lines');".to_string(),
                line: 3,
            }]
        );
    }

    #[test]
    fn trailing_text_without_terminator_is_returned_on_finish() {
        let mut splitter = StatementSplitter::new();
        assert!(splitter.push_line("INSERT INTO t (a) VALUES (1)", 7).is_empty());
        let partial = splitter.finish().unwrap();
        assert_eq!(partial.text, "INSERT INTO t (a) VALUES (1)");
        assert_eq!(partial.line, 7);
    }

    #[test]
    fn only_mutations_are_concurrent() {
        assert_eq!(classify("  insert INTO t", true), StatementClass::Concurrent);
        assert_eq!(classify("UPDATE t SET", true), StatementClass::Concurrent);
        assert_eq!(classify("INSERT INTO t", false), StatementClass::Sequential);
        assert_eq!(classify("CREATE TABLE t", true), StatementClass::Sequential);
        assert_eq!(classify("DELETE FROM t", true), StatementClass::Sequential);
        assert_eq!(classify("INSERTS", true), StatementClass::Sequential);
    }

    #[tokio::test]
    async fn replays_in_fixed_size_batches() {
        let recorder = Arc::new(Recorder::default());
        let replayer = Replayer::new(Arc::clone(&recorder), config(true, 1000));
        let outcome = replayer
            .replay(Cursor::new(inserts(0..2500)))
            .await
            .unwrap();
        assert_eq!(outcome.batches, 3);
        assert_eq!(outcome.statements, 2500);
        assert_eq!(outcome.concurrent, 2500);
        assert_eq!(recorder.executed().len(), 2500);
        assert!(recorder.max_in_flight.load(Ordering::SeqCst) <= 1000);
    }

    #[tokio::test]
    async fn batch_barrier_bounds_in_flight_statements() {
        let recorder = Arc::new(Recorder::default());
        let replayer = Replayer::new(Arc::clone(&recorder), config(true, 4));
        let outcome = replayer.replay(Cursor::new(inserts(0..30))).await.unwrap();
        assert_eq!(outcome.batches, 8);
        assert!(recorder.max_in_flight.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn sequential_statements_wait_for_pending_batch() {
        let mut dump = inserts(0..3);
        dump.push_str("CREATE TABLE \"ks\".\"u\" (\"id\" int, PRIMARY KEY ((\"id\")));\n");
        dump.push_str(&inserts(3..5));
        let recorder = Arc::new(Recorder::default());
        let replayer = Replayer::new(Arc::clone(&recorder), config(true, 100));
        let outcome = replayer.replay(Cursor::new(dump)).await.unwrap();

        let executed = recorder.executed();
        let create = executed
            .iter()
            .position(|s| s.starts_with("CREATE"))
            .unwrap();
        assert_eq!(create, 3);
        assert_eq!(outcome.batches, 2);
        assert_eq!(outcome.sequential, 1);
        assert_eq!(outcome.concurrent, 5);
    }

    #[tokio::test]
    async fn sync_mode_runs_everything_in_order() {
        let recorder = Arc::new(Recorder::default());
        let replayer = Replayer::new(Arc::clone(&recorder), config(false, 2));
        let outcome = replayer.replay(Cursor::new(inserts(0..5))).await.unwrap();
        assert_eq!(outcome.batches, 0);
        assert_eq!(outcome.sequential, 5);
        assert_eq!(recorder.executed(), inserts(0..5).lines().collect::<Vec<_>>());
        assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_statement_is_reported_and_halts_replay() {
        let mut dump = inserts(0..2);
        dump.push_str("INSERT INTO \"ks\".\"t\" (\"id\") VALUES (-1); -- boom\n");
        dump.push_str("INSERT INTO \"ks\".\"t\" (\"id\") VALUES (-2);\n");
        dump.push_str(&inserts(2..10));
        let recorder = Arc::new(Recorder::failing_on("VALUES (-"));
        let replayer = Replayer::new(Arc::clone(&recorder), config(true, 4));
        let err = replayer.replay(Cursor::new(dump)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Execution);
        assert_eq!(
            err.statement(),
            Some("INSERT INTO \"ks\".\"t\" (\"id\") VALUES (-1);")
        );
        assert_eq!(err.line(), Some(3));
        assert_eq!(recorder.executed().len(), 2);
    }

    #[tokio::test]
    async fn unterminated_trailing_statement_still_runs() {
        let mut dump = inserts(0..2);
        dump.push_str("INSERT INTO \"ks\".\"t\" (\"id\") VALUES (9)");
        let recorder = Arc::new(Recorder::default());
        let replayer = Replayer::new(Arc::clone(&recorder), config(true, 10));
        let outcome = replayer.replay(Cursor::new(dump)).await.unwrap();
        assert_eq!(outcome.statements, 3);
        assert_eq!(outcome.sequential, 1);
        assert_eq!(
            recorder.executed().last().map(String::as_str),
            Some("INSERT INTO \"ks\".\"t\" (\"id\") VALUES (9)")
        );
    }

    #[tokio::test]
    async fn invalid_utf8_is_a_parse_error() {
        let recorder = Arc::new(Recorder::default());
        let replayer = Replayer::new(recorder, ReplayConfig::default());
        let err = replayer
            .replay(Cursor::new(b"INSERT \xff;\n".to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(err.line(), Some(1));
    }
}
