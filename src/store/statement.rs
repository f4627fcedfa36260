//! Purpose: Parse and apply one CQL statement against the in-memory cluster state.
//! Exports: `apply` (crate-internal).
//! Role: Executor backend of `MemoryCluster`; understands the statements a dump contains.
//! Invariants: A statement is fully parsed and validated before any state changes.
//! Invariants: Mutations must address rows by their complete primary key.
use std::collections::BTreeMap;

use crate::core::error::{Error, ErrorKind};
use crate::core::literal::{Parser, Token};
use crate::core::schema::{ClusteringOrder, ColumnDefinition, KeyspaceDefinition, TableDefinition};
use crate::core::types::CqlType;
use crate::core::value::Value;
use crate::store::{ClusterState, KeyspaceState, TableState};

fn execution(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Execution).with_message(message)
}

/// Parse failures surface as execution failures: the target rejected the statement text.
fn rejected(err: Error) -> Error {
    if err.kind() == ErrorKind::Parse {
        let message = format!("syntax error: {}", err.message().unwrap_or("malformed statement"));
        execution(message)
    } else {
        err
    }
}

pub(crate) fn apply(state: &mut ClusterState, text: &str) -> Result<(), Error> {
    run(state, text).map_err(rejected)
}

fn run(state: &mut ClusterState, text: &str) -> Result<(), Error> {
    let mut parser = Parser::new(text)?;
    let verb = parser.keyword()?;
    match verb.as_str() {
        "create" => {
            let what = parser.keyword()?;
            match what.as_str() {
                "keyspace" => create_keyspace(state, &mut parser),
                "table" | "columnfamily" => create_table(state, &mut parser),
                other => Err(execution(format!("unsupported statement CREATE {other}"))),
            }
        }
        "drop" => {
            let what = parser.keyword()?;
            match what.as_str() {
                "keyspace" => drop_keyspace(state, &mut parser),
                "table" | "columnfamily" => drop_table(state, &mut parser),
                other => Err(execution(format!("unsupported statement DROP {other}"))),
            }
        }
        "insert" => insert(state, &mut parser),
        "update" => update(state, &mut parser),
        "delete" => delete(state, &mut parser),
        other => Err(execution(format!(
            "unsupported statement {}",
            other.to_ascii_uppercase()
        ))),
    }
}

fn if_exists(parser: &mut Parser) -> Result<bool, Error> {
    if parser.eat_keyword("if") {
        parser.expect_keyword("exists")?;
        return Ok(true);
    }
    Ok(false)
}

fn if_not_exists(parser: &mut Parser) -> Result<bool, Error> {
    if parser.eat_keyword("if") {
        parser.expect_keyword("not")?;
        parser.expect_keyword("exists")?;
        return Ok(true);
    }
    Ok(false)
}

fn table_name(parser: &mut Parser) -> Result<(String, String), Error> {
    match parser.qualified_name()? {
        (Some(keyspace), table) => Ok((keyspace, table)),
        (None, table) => Err(execution(format!(
            "table `{table}` must be qualified with its keyspace"
        ))),
    }
}

fn create_keyspace(state: &mut ClusterState, parser: &mut Parser) -> Result<(), Error> {
    let if_not_exists = if_not_exists(parser)?;
    let name = parser.identifier()?;
    let mut replication = BTreeMap::new();
    let mut durable_writes = true;
    if parser.eat_keyword("with") {
        loop {
            match parser.keyword()?.as_str() {
                "replication" => {
                    parser.expect_symbol('=')?;
                    parser.expect_symbol('{')?;
                    while !parser.eat_symbol('}') {
                        let key = parser.string()?;
                        parser.expect_symbol(':')?;
                        let value = match parser.next_token() {
                            Some(Token::Str(text) | Token::Number(text)) => text,
                            _ => return Err(parser.error("replication option value")),
                        };
                        replication.insert(key, value);
                        parser.eat_symbol(',');
                    }
                }
                "durable_writes" => {
                    parser.expect_symbol('=')?;
                    durable_writes = match parser.keyword()?.as_str() {
                        "true" => true,
                        "false" => false,
                        _ => return Err(parser.error("true or false")),
                    };
                }
                other => return Err(execution(format!("unknown keyspace option `{other}`"))),
            }
            if !parser.eat_keyword("and") {
                break;
            }
        }
    }
    parser.finish()?;

    if state.keyspaces.contains_key(&name) {
        if if_not_exists {
            return Ok(());
        }
        return Err(execution(format!("keyspace \"{name}\" already exists")));
    }
    let mut definition = KeyspaceDefinition::new(name.clone()).with_replication(replication);
    definition.durable_writes = durable_writes;
    state.keyspaces.insert(
        name,
        KeyspaceState {
            definition,
            tables: Vec::new(),
        },
    );
    Ok(())
}

fn drop_keyspace(state: &mut ClusterState, parser: &mut Parser) -> Result<(), Error> {
    let if_exists = if_exists(parser)?;
    let name = parser.identifier()?;
    parser.finish()?;
    if state.keyspaces.remove(&name).is_none() && !if_exists {
        return Err(execution(format!("keyspace \"{name}\" does not exist")));
    }
    Ok(())
}

fn create_table(state: &mut ClusterState, parser: &mut Parser) -> Result<(), Error> {
    let if_not_exists = if_not_exists(parser)?;
    let (keyspace, name) = table_name(parser)?;
    let mut columns = Vec::new();
    let mut partition_key = Vec::new();
    let mut clustering = Vec::new();

    parser.expect_symbol('(')?;
    loop {
        if parser.eat_keyword("primary") {
            parser.expect_keyword("key")?;
            parser.expect_symbol('(')?;
            if parser.eat_symbol('(') {
                partition_key = identifier_list(parser)?;
                parser.expect_symbol(')')?;
            } else {
                partition_key = vec![parser.identifier()?];
            }
            while parser.eat_symbol(',') {
                clustering.push(parser.identifier()?);
            }
            parser.expect_symbol(')')?;
        } else {
            let column = parser.identifier()?;
            let cql_type = parser.cql_type()?;
            if parser.eat_keyword("primary") {
                parser.expect_keyword("key")?;
                partition_key = vec![column.clone()];
            }
            columns.push(ColumnDefinition::new(column, cql_type));
        }
        if !parser.eat_symbol(',') {
            break;
        }
    }
    parser.expect_symbol(')')?;

    let mut definition = TableDefinition::new(keyspace.clone(), name.clone(), columns)
        .with_partition_key(partition_key)
        .with_clustering(clustering);
    if parser.eat_keyword("with") {
        parser.expect_keyword("clustering")?;
        parser.expect_keyword("order")?;
        parser.expect_keyword("by")?;
        parser.expect_symbol('(')?;
        loop {
            let column = parser.identifier()?;
            let order = match parser.keyword()?.as_str() {
                "asc" => ClusteringOrder::Asc,
                "desc" => ClusteringOrder::Desc,
                _ => return Err(parser.error("ASC or DESC")),
            };
            if !definition.clustering.iter().any(|(name, _)| *name == column) {
                return Err(execution(format!(
                    "clustering order names non-clustering column `{column}`"
                )));
            }
            definition = definition.with_clustering_order(&column, order);
            if !parser.eat_symbol(',') {
                break;
            }
        }
        parser.expect_symbol(')')?;
    }
    parser.finish()?;

    definition
        .validate()
        .map_err(|err| execution(err.message().unwrap_or("invalid table definition")))?;
    if definition.has_counters() {
        if let Some(column) = definition
            .columns
            .iter()
            .find(|c| !c.cql_type.is_counter() && !definition.is_key_column(&c.name))
        {
            return Err(execution(format!(
                "counter table cannot have non-counter column `{}`",
                column.name
            )));
        }
    }

    let Some(space) = state.keyspaces.get_mut(&keyspace) else {
        return Err(execution(format!("keyspace \"{keyspace}\" does not exist")));
    };
    if space.table(&name).is_some() {
        if if_not_exists {
            return Ok(());
        }
        return Err(execution(format!(
            "table \"{keyspace}\".\"{name}\" already exists"
        )));
    }
    space.tables.push(TableState::new(definition));
    Ok(())
}

fn drop_table(state: &mut ClusterState, parser: &mut Parser) -> Result<(), Error> {
    let if_exists = if_exists(parser)?;
    let (keyspace, name) = table_name(parser)?;
    parser.finish()?;
    let removed = state.keyspaces.get_mut(&keyspace).is_some_and(|space| {
        let before = space.tables.len();
        space.tables.retain(|table| table.definition.name != name);
        space.tables.len() != before
    });
    if !removed && !if_exists {
        return Err(execution(format!(
            "table \"{keyspace}\".\"{name}\" does not exist"
        )));
    }
    Ok(())
}

fn identifier_list(parser: &mut Parser) -> Result<Vec<String>, Error> {
    let mut names = vec![parser.identifier()?];
    while parser.eat_symbol(',') {
        names.push(parser.identifier()?);
    }
    Ok(names)
}

fn target_table<'a>(
    state: &'a mut ClusterState,
    parser: &mut Parser,
) -> Result<&'a mut TableState, Error> {
    let (keyspace, name) = table_name(parser)?;
    state.table_mut(&keyspace, &name).ok_or_else(|| {
        execution(format!("table \"{keyspace}\".\"{name}\" does not exist"))
    })
}

fn column_type(table: &TableState, column: &str) -> Result<CqlType, Error> {
    table
        .definition
        .column(column)
        .map(|c| c.cql_type.clone())
        .ok_or_else(|| execution(format!("undefined column name `{column}`")))
}

/// `WHERE k1 = v1 AND k2 = v2 ...` covering exactly the primary key.
fn key_predicates(table: &TableState, parser: &mut Parser) -> Result<Vec<String>, Error> {
    parser.expect_keyword("where")?;
    let mut cells = Vec::new();
    loop {
        let column = parser.identifier()?;
        if !table.definition.is_key_column(&column) {
            return Err(execution(format!(
                "`{column}` is not a primary key column; rows are addressed by full key"
            )));
        }
        parser.expect_symbol('=')?;
        let value = parser.literal(&column_type(table, &column)?)?;
        cells.push((column, value));
        if !parser.eat_keyword("and") {
            break;
        }
    }
    table.row_key(&cells)
}

fn insert(state: &mut ClusterState, parser: &mut Parser) -> Result<(), Error> {
    parser.expect_keyword("into")?;
    let table = target_table(state, parser)?;
    parser.expect_symbol('(')?;
    let columns = identifier_list(parser)?;
    parser.expect_symbol(')')?;
    parser.expect_keyword("values")?;
    parser.expect_symbol('(')?;
    let mut cells = Vec::with_capacity(columns.len());
    for (idx, column) in columns.into_iter().enumerate() {
        if idx > 0 {
            parser.expect_symbol(',')?;
        }
        let cql_type = column_type(table, &column)?;
        if cql_type.is_counter() {
            return Err(execution(format!(
                "cannot insert into counter column `{column}`; use UPDATE"
            )));
        }
        let value = parser.literal(&cql_type)?;
        cells.push((column, value));
    }
    parser.expect_symbol(')')?;
    parser.finish()?;

    let key = table.row_key(&cells)?;
    let row = table.rows.entry(key).or_default();
    for (column, value) in cells {
        if value.is_null() {
            row.remove(&column);
        } else {
            row.insert(column, value);
        }
    }
    Ok(())
}

enum Assignment {
    Set(Value),
    Add(i64),
}

fn update(state: &mut ClusterState, parser: &mut Parser) -> Result<(), Error> {
    let table = target_table(state, parser)?;
    parser.expect_keyword("set")?;
    let mut assignments = Vec::new();
    loop {
        let column = parser.identifier()?;
        parser.expect_symbol('=')?;
        let cql_type = column_type(table, &column)?;
        if table.definition.is_key_column(&column) {
            return Err(execution(format!(
                "primary key column `{column}` cannot be updated"
            )));
        }
        let assignment = if cql_type.is_counter() {
            let same = parser.identifier()?;
            if same != column {
                return Err(execution(format!(
                    "counter `{column}` can only be incremented by itself"
                )));
            }
            parser.expect_symbol('+')?;
            match parser.literal(&cql_type)? {
                Value::Int(delta) => Assignment::Add(delta),
                _ => return Err(execution(format!("counter `{column}` needs a delta"))),
            }
        } else {
            Assignment::Set(parser.literal(&cql_type)?)
        };
        assignments.push((column, assignment));
        if !parser.eat_symbol(',') {
            break;
        }
    }
    let key = key_predicates(table, parser)?;
    parser.finish()?;

    let row = table.rows.entry(key).or_default();
    for (column, assignment) in assignments {
        match assignment {
            Assignment::Set(Value::Null) => {
                row.remove(&column);
            }
            Assignment::Set(value) => {
                row.insert(column, value);
            }
            Assignment::Add(delta) => {
                let current = match row.get(&column) {
                    Some(Value::Int(current)) => *current,
                    _ => 0,
                };
                let total = current.checked_add(delta).ok_or_else(|| {
                    execution(format!("counter `{column}` overflowed"))
                })?;
                row.insert(column, Value::Int(total));
            }
        }
    }
    Ok(())
}

fn delete(state: &mut ClusterState, parser: &mut Parser) -> Result<(), Error> {
    parser.expect_keyword("from")?;
    let table = target_table(state, parser)?;
    let key = key_predicates(table, parser)?;
    parser.finish()?;
    table.rows.remove(&key);
    Ok(())
}
