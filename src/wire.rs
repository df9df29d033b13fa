use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
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
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::ProctorAuthSource;
use crate::engine::{AssignmentFilter, Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, OccupancyWindow};
use crate::tenant::TenantManager;

pub struct ProctorHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<ProctorQueryParser>,
}

impl ProctorHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(ProctorQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Parse, execute and record RED metrics for one statement.
    async fn run(&self, engine: &Engine, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = std::time::Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertBooking { id, resource_id, start, end, source_id } => {
                engine
                    .add_booking(id, resource_id, Span { start, end }, source_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::BatchInsertBookings { bookings } => {
                let count = bookings.len();
                let batch = bookings
                    .into_iter()
                    .map(|(id, resource_id, start, end, source_id)| Booking {
                        id,
                        resource_id,
                        span: Span { start, end },
                        source_id,
                    })
                    .collect();
                engine.add_bookings(batch).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(count))])
            }
            Command::DeleteBooking { id } => {
                engine.remove_booking(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectBookings { resource_id, start, end } => {
                let window = match (start, end) {
                    (Some(start), Some(end)) => Span { start, end },
                    (None, None) => engine.day_window(now_ms()).map_err(engine_err)?,
                    (Some(start), None) => engine.day_window(start).map_err(engine_err)?,
                    (None, Some(end)) => engine.day_window(end.saturating_sub(1)).map_err(engine_err)?,
                };
                let bookings = engine.list_bookings(resource_id, window).await.map_err(engine_err)?;
                let schema = Arc::new(bookings_schema());
                let rows: Vec<PgWireResult<_>> = bookings
                    .into_iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.resource_id.to_string())?;
                        encoder.encode_field(&b.span.start)?;
                        encoder.encode_field(&b.span.end)?;
                        encoder.encode_field(&b.source_id.map(|s| s.to_string()))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectOccupancy { resource_id, window } => {
                let intervals = match window {
                    OccupancyWindow::Day(t) => engine.occupancy_for_day(resource_id, t).await,
                    OccupancyWindow::Range { start, end } => {
                        engine.occupancy(resource_id, Span { start, end }).await
                    }
                }
                .map_err(engine_err)?;

                let schema = Arc::new(occupancy_schema());
                let rid_str = resource_id.to_string();
                let rows: Vec<PgWireResult<_>> = intervals
                    .into_iter()
                    .map(|interval| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&rid_str)?;
                        encoder.encode_field(&interval.span.start)?;
                        encoder.encode_field(&interval.span.end)?;
                        encoder.encode_field(&interval.occupied)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::InsertAssignment { id, exam_schedule_id, proctor_id, start, end, room_id } => {
                engine
                    .create_assignment(id, exam_schedule_id, proctor_id, room_id, Span { start, end })
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SelectAssignments { proctor_id, phase } => {
                let now = now_ms();
                let list = match (proctor_id, phase) {
                    (Some(p), Some(phase)) => engine.assignments_in_phase(p, phase, now).await,
                    (Some(p), None) => engine.list_assignments(AssignmentFilter::Proctor(p)).await,
                    (None, _) => engine.list_assignments(AssignmentFilter::All).await,
                };
                Ok(vec![assignment_rows(list, now)])
            }
            Command::GenerateCodes { assignment_ids } => {
                let issued = engine.generate_codes(&assignment_ids).await.map_err(engine_err)?;
                let schema = Arc::new(codes_schema());
                let rows: Vec<PgWireResult<_>> = issued
                    .into_iter()
                    .map(|(id, code)| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&id.to_string())?;
                        encoder.encode_field(&code)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::ResetCode { assignment_id } => {
                engine.reset_code(assignment_id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectVerify { code, person_id } => {
                let v = engine.verify_code(&code, person_id).await.map_err(engine_err)?;
                let schema = Arc::new(verify_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&v.assignment.id.to_string())?;
                encoder.encode_field(&v.assignment.exam_schedule_id.to_string())?;
                encoder.encode_field(&v.assignment.assigned_proctor_id.to_string())?;
                encoder.encode_field(&v.assignment.window.start)?;
                encoder.encode_field(&v.assignment.window.end)?;
                encoder.encode_field(&v.classification.as_str())?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::InsertCheckIn { assignment_id, role, remarks, at } => {
                let status = engine
                    .confirm_attendance(assignment_id, role, remarks.as_deref(), at.unwrap_or_else(now_ms))
                    .await
                    .map_err(engine_err)?;
                Ok(vec![checkin_row(assignment_id, status)?])
            }
            Command::CheckInByCode { code, person_id, remarks, at } => {
                let (assignment_id, status) = engine
                    .check_in(&code, person_id, remarks.as_deref(), at.unwrap_or_else(now_ms))
                    .await
                    .map_err(engine_err)?;
                Ok(vec![checkin_row(assignment_id, status)?])
            }
            Command::SelectSubstitutionCandidates { person_id } => {
                let list = engine.find_substitution_candidates(person_id).await;
                Ok(vec![assignment_rows(list, now_ms())])
            }
            Command::SelectAbsenceSweep { at } => {
                let updated = engine
                    .run_absence_sweep(at.unwrap_or_else(now_ms))
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(sweep_schema());
                let rows: Vec<PgWireResult<_>> = updated
                    .into_iter()
                    .map(|id| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&id.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::InsertOverride { assignment_id, status, remarks } => {
                engine
                    .override_status(assignment_id, status, remarks.as_deref())
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SelectAttendanceSummary => {
                let summary = engine.attendance_summary().await;
                let schema = Arc::new(summary_schema());
                let rows: Vec<PgWireResult<_>> = AttendanceStatus::ALL
                    .into_iter()
                    .map(|status| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&status.as_str())?;
                        encoder.encode_field(&(summary.count(status) as i64))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
        }
    }
}

fn assignment_rows(list: Vec<ExamAssignment>, now: Ms) -> Response {
    let schema = Arc::new(assignments_schema());
    let rows: Vec<PgWireResult<_>> = list
        .into_iter()
        .map(|a| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&a.id.to_string())?;
            encoder.encode_field(&a.exam_schedule_id.to_string())?;
            encoder.encode_field(&a.assigned_proctor_id.to_string())?;
            encoder.encode_field(&a.room_id.map(|r| r.to_string()))?;
            encoder.encode_field(&a.window.start)?;
            encoder.encode_field(&a.window.end)?;
            encoder.encode_field(&a.status.as_str())?;
            encoder.encode_field(&a.code_entry_time)?;
            encoder.encode_field(&a.checked_in_by.map(|p| p.to_string()))?;
            encoder.encode_field(&a.remarks)?;
            encoder.encode_field(&a.phase(now).as_str())?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn checkin_row(assignment_id: ulid::Ulid, status: AttendanceStatus) -> PgWireResult<Response> {
    let schema = Arc::new(checkins_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&assignment_id.to_string())?;
    encoder.encode_field(&status.as_str())?;
    let rows = vec![Ok(encoder.take_row())];
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

// ── Result schemas ───────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![text("id"), text("resource_id"), int8("start"), int8("end"), text("source_id")]
}

fn occupancy_schema() -> Vec<FieldInfo> {
    vec![
        text("resource_id"),
        int8("start"),
        int8("end"),
        FieldInfo::new("occupied".into(), None, None, Type::BOOL, FieldFormat::Text),
    ]
}

fn assignments_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("exam_schedule_id"),
        text("proctor_id"),
        text("room_id"),
        int8("start"),
        int8("end"),
        text("status"),
        int8("code_entry_time"),
        text("checked_in_by"),
        text("remarks"),
        text("phase"),
    ]
}

fn codes_schema() -> Vec<FieldInfo> {
    vec![text("assignment_id"), text("code")]
}

fn verify_schema() -> Vec<FieldInfo> {
    vec![
        text("assignment_id"),
        text("exam_schedule_id"),
        text("proctor_id"),
        int8("start"),
        int8("end"),
        text("classification"),
    ]
}

fn checkins_schema() -> Vec<FieldInfo> {
    vec![text("assignment_id"), text("status")]
}

fn sweep_schema() -> Vec<FieldInfo> {
    vec![text("assignment_id")]
}

fn summary_schema() -> Vec<FieldInfo> {
    vec![text("status"), int8("count")]
}

/// Row schema a statement will produce, judged from its verb and target table
/// before parameters are bound.
fn result_schema(stmt: &str) -> Vec<FieldInfo> {
    let words: Vec<String> = stmt
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .filter(|w| !w.is_empty())
        .map(|w| w.trim_matches('"').to_lowercase())
        .collect();
    let after = |keyword: &str| {
        words
            .iter()
            .position(|w| w == keyword)
            .and_then(|i| words.get(i + 1))
            .map(String::as_str)
    };

    match words.first().map(String::as_str) {
        Some("select") => match after("from") {
            Some("bookings") => bookings_schema(),
            Some("occupancy") => occupancy_schema(),
            Some("assignments") | Some("substitution_candidates") => assignments_schema(),
            Some("verify") => verify_schema(),
            Some("absence_sweep") => sweep_schema(),
            Some("attendance_summary") => summary_schema(),
            _ => vec![],
        },
        Some("insert") => match after("into") {
            Some("codes") => codes_schema(),
            Some("checkins") => checkins_schema(),
            _ => vec![],
        },
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for ProctorHandler {
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
        let engine = self.resolve_engine(client)?;
        self.run(&engine, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ProctorQueryParser;

#[async_trait]
impl QueryParser for ProctorQueryParser {
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
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ProctorHandler {
    type Statement = String;
    type QueryParser = ProctorQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let mut responses = self.run(&engine, &sql).await?;
        Ok(responses.remove(0))
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
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
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
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>() {
                    max = max.max(n);
                }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ProctorFactory {
    handler: Arc<ProctorHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<ProctorAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ProctorFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = ProctorAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ProctorHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ProctorFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = ProctorFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    let code = match e {
        EngineError::CodeNotFound | EngineError::NotFound(_) => "P0002",
        _ => "P0001",
    };
    if matches!(e, EngineError::PersistenceFailure(_)) {
        tracing::error!("{e}");
    }
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
