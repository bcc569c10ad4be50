use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{
    ClientInfo, ClientPortalStore, METADATA_USER, NoopHandler, PgWireServerHandlers, Type,
};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;

use crate::auth::SlotbookAuthSource;
use crate::engine::{Engine, EngineError, parse_minutes};
use crate::identity::{UserDirectory, UserId};
use crate::limits::{MAX_PARAMS, MAX_QUERY_LEN};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};

pub struct SlotbookHandler {
    engine: Arc<Engine>,
    directory: Arc<UserDirectory>,
    query_parser: Arc<SlotbookQueryParser>,
}

impl SlotbookHandler {
    pub fn new(engine: Arc<Engine>, directory: Arc<UserDirectory>) -> Self {
        Self {
            engine,
            directory,
            query_parser: Arc::new(SlotbookQueryParser),
        }
    }

    /// The connection's login name is the request identity.
    fn requester<C: ClientInfo>(&self, client: &C) -> Option<UserId> {
        let login = client.metadata().get(METADATA_USER).map(String::as_str);
        self.directory.current_user(login)
    }

    async fn run(&self, requester: Option<UserId>, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();

        let result = self.execute_command(requester.as_ref(), cmd).await;

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        requester: Option<&UserId>,
        cmd: Command,
    ) -> PgWireResult<Response> {
        match cmd {
            Command::CreateReservation {
                date,
                start_time,
                duration,
            } => {
                let minutes = parse_minutes(duration.as_deref()).map_err(engine_err)?;
                let reservation = self
                    .engine
                    .create_reservation(requester, date.as_deref(), start_time.as_deref(), minutes)
                    .await
                    .map_err(engine_err)?;
                self.reservation_rows(vec![reservation])
            }
            Command::CancelReservation { id } => {
                self.engine
                    .cancel_reservation(requester, id)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::ListReservations => {
                let reservations = self
                    .engine
                    .list_active_reservations()
                    .await
                    .map_err(engine_err)?;
                self.reservation_rows(reservations)
            }
            Command::ListOwnReservations => {
                let reservations = self
                    .engine
                    .list_owner_reservations(requester)
                    .await
                    .map_err(engine_err)?;
                self.reservation_rows(reservations)
            }
            Command::ListOwnerReservations { owner } => {
                if requester.is_none() {
                    return Err(engine_err(EngineError::Unauthenticated));
                }
                let owner = UserId::from_username(&owner);
                let reservations = self
                    .engine
                    .list_owner_reservations(Some(&owner))
                    .await
                    .map_err(engine_err)?;
                self.reservation_rows(reservations)
            }
        }
    }

    fn reservation_rows(&self, reservations: Vec<Reservation>) -> PgWireResult<Response> {
        let schema = Arc::new(reservation_schema());
        let rows: Vec<PgWireResult<_>> = reservations
            .into_iter()
            .map(|r| {
                let title = self
                    .directory
                    .username(&r.owner)
                    .unwrap_or_else(|| r.owner.to_string());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&r.id.to_string())?;
                encoder.encode_field(&title)?;
                encoder.encode_field(&r.span.start.format(DISPLAY_FORMAT).to_string())?;
                encoder.encode_field(&r.span.end.format(DISPLAY_FORMAT).to_string())?;
                Ok(encoder.take_row())
            })
            .collect();

        Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
    }
}

fn reservation_schema() -> Vec<FieldInfo> {
    ["id", "title", "start", "end"]
        .into_iter()
        .map(|name| FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text))
        .collect()
}

/// Row shape a statement will produce, judged by its leading keyword.
fn statement_schema(sql: &str) -> Vec<FieldInfo> {
    let keyword = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    match keyword.as_str() {
        "SELECT" | "INSERT" => reservation_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for SlotbookHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let requester = self.requester(client);
        Ok(vec![self.run(requester, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotbookQueryParser;

#[async_trait]
impl QueryParser for SlotbookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        check_statement(sql).map_err(sql_err)?;
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        param_types(stmt)
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(statement_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotbookHandler {
    type Statement = String;
    type QueryParser = SlotbookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let requester = self.requester(client);
        let params: Vec<Option<String>> = portal
            .parameters
            .iter()
            .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
            .collect();
        let sql = substitute_params(&portal.statement.statement, &params);
        self.run(requester, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribeStatementResponse::new(
            param_types(&target.statement)?,
            statement_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(statement_schema(
            &target.statement.statement,
        )))
    }
}

/// `$N` placeholders outside quoted literals, as `(byte range, N)`.
fn placeholders(sql: &str) -> Vec<(std::ops::Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut in_quote = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                in_quote = !in_quote;
                i += 1;
            }
            b'$' if !in_quote => {
                let digits = bytes[i + 1..]
                    .iter()
                    .take_while(|b| b.is_ascii_digit())
                    .count();
                let end = i + 1 + digits;
                if let Ok(n) = sql[i + 1..end].parse::<usize>() {
                    found.push((i..end, n));
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    found
}

/// Highest `$N` in the statement.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Size checks for a prepared statement. Returns its parameter count.
fn check_statement(sql: &str) -> Result<usize, SqlError> {
    if sql.len() > MAX_QUERY_LEN {
        return Err(SqlError::TooLong(sql.len()));
    }
    let count = count_params(sql);
    if count > MAX_PARAMS {
        return Err(SqlError::TooManyParams(count));
    }
    Ok(count)
}

fn param_types(sql: &str) -> PgWireResult<Vec<Type>> {
    let count = check_statement(sql).map_err(sql_err)?;
    Ok(vec![Type::VARCHAR; count])
}

/// Inline bound text parameters as quoted literals; unbound or NULL become `NULL`.
fn substitute_params(sql: &str, params: &[Option<String>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    for (range, n) in placeholders(sql) {
        out.push_str(&sql[last..range.start]);
        match n.checked_sub(1).and_then(|i| params.get(i)).and_then(Option::as_ref) {
            Some(text) => {
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        last = range.end;
    }
    out.push_str(&sql[last..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SlotbookFactory {
    handler: Arc<SlotbookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<SlotbookAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl SlotbookFactory {
    pub fn new(engine: Arc<Engine>, directory: Arc<UserDirectory>) -> Self {
        let auth_source = SlotbookAuthSource::new(directory.clone());
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SlotbookHandler::new(engine, directory)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotbookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection to completion.
pub async fn process_connection(
    socket: TcpStream,
    factory: SlotbookFactory,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidInterval(_) => "22007",
        EngineError::Unauthenticated => "28000",
        EngineError::SlotConflict(_) => "23P01",
        EngineError::NotFoundOrUnauthorized => "P0002",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Storage(_) => "XX000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    debug!(error = %e, "request rejected");
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::TooLong(_) | SqlError::TooManyParams(_) => "54000",
        _ => "42601",
    };
    user_error(code, e.to_string())
}
