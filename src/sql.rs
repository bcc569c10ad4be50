use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::limits::MAX_QUERY_LEN;
use crate::model::ReservationId;

const RESERVATIONS: &str = "reservations";
const MY_RESERVATIONS: &str = "my_reservations";

/// Column order for `INSERT INTO reservations VALUES (...)` without a column list.
const INSERT_COLUMNS: [&str; 3] = ["date", "start_time", "duration"];

/// Parsed command from SQL input.
///
/// Insert values stay as text; the engine owns their interpretation, so
/// `'10:00'`, `10` and `NULL` all reach it unchanged.
#[derive(Debug, PartialEq)]
pub enum Command {
    CreateReservation {
        date: Option<String>,
        start_time: Option<String>,
        duration: Option<String>,
    },
    CancelReservation {
        id: ReservationId,
    },
    ListReservations,
    /// `my_reservations`: the connection's own user.
    ListOwnReservations,
    ListOwnerReservations {
        owner: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    if sql.len() > MAX_QUERY_LEN {
        return Err(SqlError::TooLong(sql.len()));
    }
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [stmt] => stmt,
        _ => return Err(SqlError::Unsupported("multiple statements".into())),
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != RESERVATIONS {
        return Err(SqlError::UnknownTable(table));
    }

    let row = extract_insert_row(insert)?;
    let columns: Vec<String> = if insert.columns.is_empty() {
        INSERT_COLUMNS.iter().take(row.len()).map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if columns.len() != row.len() {
        return Err(SqlError::WrongArity(columns.len(), row.len()));
    }

    let (mut date, mut start_time, mut duration) = (None, None, None);
    for (column, expr) in columns.iter().zip(row) {
        let slot = match canonical_column(column) {
            Some("date") => &mut date,
            Some("start_time") => &mut start_time,
            Some("duration") => &mut duration,
            _ => return Err(SqlError::UnknownColumn(column.clone())),
        };
        if slot.is_some() {
            return Err(SqlError::DuplicateColumn(column.clone()));
        }
        *slot = Some(text_or_null(expr)?);
    }

    Ok(Command::CreateReservation {
        date: date.flatten(),
        start_time: start_time.flatten(),
        duration: duration.flatten(),
    })
}

fn canonical_column(column: &str) -> Option<&'static str> {
    match column {
        "date" | "day" => Some("date"),
        "start_time" | "time" | "start" => Some("start_time"),
        "duration" | "duration_minutes" | "minutes" => Some("duration"),
        _ => None,
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != RESERVATIONS {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_eq(&delete.selection, "id")?;
    let id = Ulid::from_string(id.trim()).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))?;
    Ok(Command::CancelReservation { id })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match (table.as_str(), &select.selection) {
        (RESERVATIONS, None) => Ok(Command::ListReservations),
        (RESERVATIONS, selection) => Ok(Command::ListOwnerReservations {
            owner: extract_where_eq(selection, "owner")?,
        }),
        (MY_RESERVATIONS, None) => Ok(Command::ListOwnReservations),
        (MY_RESERVATIONS, Some(_)) => Err(SqlError::Unsupported(
            "filters on my_reservations".into(),
        )),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_row(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.as_slice()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// `WHERE <column> = <literal>`, and nothing else.
fn extract_where_eq(selection: &Option<Expr>, column: &'static str) -> Result<String, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter(column))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some(column) => {
            text_or_null(right)?.ok_or(SqlError::MissingFilter(column))
        }
        Expr::Nested(inner) => extract_where_eq(&Some(inner.as_ref().clone()), column),
        _ => Err(SqlError::MissingFilter(column)),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

/// A literal rendered as text; `NULL` becomes `None`.
fn text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(None),
            Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) | Value::Number(s, _) => {
                Ok(Some(s.clone()))
            }
            _ => Err(SqlError::Parse(format!("expected literal, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(text_or_null(expr)?.map(|s| format!("-{s}")))
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("query too long: {0} bytes")]
    TooLong(usize),
    #[error("too many parameters: ${0}")]
    TooManyParams(usize),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("column given twice: {0}")]
    DuplicateColumn(String),
    #[error("expected {0} values, got {1}")]
    WrongArity(usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}
