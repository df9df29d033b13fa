use std::collections::HashMap;

use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// (id, resource_id, start, end, source_id)
pub type BookingRow = (Ulid, Ulid, Ms, Ms, Option<Ulid>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccupancyWindow {
    /// The configured school day containing this instant.
    Day(Ms),
    Range { start: Ms, end: Ms },
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertBooking {
        id: Ulid,
        resource_id: Ulid,
        start: Ms,
        end: Ms,
        source_id: Option<Ulid>,
    },
    BatchInsertBookings {
        bookings: Vec<BookingRow>,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectBookings {
        resource_id: Ulid,
        start: Option<Ms>,
        end: Option<Ms>,
    },
    SelectOccupancy {
        resource_id: Ulid,
        window: OccupancyWindow,
    },
    InsertAssignment {
        id: Ulid,
        exam_schedule_id: Ulid,
        proctor_id: Ulid,
        start: Ms,
        end: Ms,
        room_id: Option<Ulid>,
    },
    SelectAssignments {
        proctor_id: Option<Ulid>,
        phase: Option<Phase>,
    },
    GenerateCodes {
        assignment_ids: Vec<Ulid>,
    },
    ResetCode {
        assignment_id: Ulid,
    },
    SelectVerify {
        code: String,
        person_id: Ulid,
    },
    /// Check-in on an assignment whose code was verified beforehand.
    InsertCheckIn {
        assignment_id: Ulid,
        role: CheckInRole,
        remarks: Option<String>,
        at: Option<Ms>,
    },
    /// Verify and check in with the code in one step.
    CheckInByCode {
        code: String,
        person_id: Ulid,
        remarks: Option<String>,
        at: Option<Ms>,
    },
    SelectSubstitutionCandidates {
        person_id: Ulid,
    },
    SelectAbsenceSweep {
        at: Option<Ms>,
    },
    InsertOverride {
        assignment_id: Ulid,
        status: AttendanceStatus,
        remarks: Option<String>,
    },
    SelectAttendanceSummary,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

const BOOKING_COLUMNS: &[&str] = &["id", "resource_id", "start", "end", "source_id"];
const ASSIGNMENT_COLUMNS: &[&str] = &["id", "exam_schedule_id", "proctor_id", "start", "end", "room_id"];
const CODE_COLUMNS: &[&str] = &["assignment_id"];
const CHECKIN_COLUMNS: &[&str] = &["assignment_id", "role", "remarks", "at"];
const OVERRIDE_COLUMNS: &[&str] = &["assignment_id", "status", "remarks"];

/// One VALUES row, addressable by column name. Without an explicit column
/// list the table's default column order applies.
struct Row<'a> {
    table: &'static str,
    columns: &'a [String],
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    fn has(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    fn required(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(self.table, column))
    }

    fn ulid(&self, column: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid_expr(self.required(column)?)
    }

    fn i64(&self, column: &'static str) -> Result<Ms, SqlError> {
        parse_i64_expr(self.required(column)?)
    }

    fn string(&self, column: &'static str) -> Result<String, SqlError> {
        parse_string_or_null(self.required(column)?)?.ok_or(SqlError::MissingColumn(self.table, column))
    }

    fn opt_ulid(&self, column: &str) -> Result<Option<Ulid>, SqlError> {
        self.get(column).map_or(Ok(None), parse_ulid_or_null)
    }

    fn opt_i64(&self, column: &str) -> Result<Option<Ms>, SqlError> {
        self.get(column).map_or(Ok(None), parse_i64_or_null)
    }

    fn opt_string(&self, column: &str) -> Result<Option<String>, SqlError> {
        self.get(column).map_or(Ok(None), parse_string_or_null)
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let (table, defaults): (&'static str, &[&str]) = match table.as_str() {
        "bookings" => ("bookings", BOOKING_COLUMNS),
        "assignments" => ("assignments", ASSIGNMENT_COLUMNS),
        "codes" => ("codes", CODE_COLUMNS),
        "checkins" => ("checkins", CHECKIN_COLUMNS),
        "overrides" => ("overrides", OVERRIDE_COLUMNS),
        _ => return Err(SqlError::UnknownTable(table)),
    };

    let columns: Vec<String> = if insert.columns.is_empty() {
        defaults.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    let all_rows = extract_all_insert_rows(insert)?;
    let rows: Vec<Row> = all_rows
        .iter()
        .map(|values| Row { table, columns: &columns, values })
        .collect();

    match table {
        "bookings" => {
            let parse_row = |row: &Row| -> Result<BookingRow, SqlError> {
                Ok((
                    row.ulid("id")?,
                    row.ulid("resource_id")?,
                    row.i64("start")?,
                    row.i64("end")?,
                    row.opt_ulid("source_id")?,
                ))
            };
            if rows.len() == 1 {
                let (id, resource_id, start, end, source_id) = parse_row(&rows[0])?;
                Ok(Command::InsertBooking { id, resource_id, start, end, source_id })
            } else {
                let mut bookings = Vec::with_capacity(rows.len());
                for (i, row) in rows.iter().enumerate() {
                    bookings.push(parse_row(row).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?);
                }
                Ok(Command::BatchInsertBookings { bookings })
            }
        }
        "assignments" => {
            let row = single_row(&rows)?;
            Ok(Command::InsertAssignment {
                id: row.ulid("id")?,
                exam_schedule_id: row.ulid("exam_schedule_id")?,
                proctor_id: row.ulid("proctor_id")?,
                start: row.i64("start")?,
                end: row.i64("end")?,
                room_id: row.opt_ulid("room_id")?,
            })
        }
        "codes" => {
            let assignment_ids = rows
                .iter()
                .map(|row| row.ulid("assignment_id"))
                .collect::<Result<_, _>>()?;
            Ok(Command::GenerateCodes { assignment_ids })
        }
        "checkins" => {
            let row = single_row(&rows)?;
            let remarks = row.opt_string("remarks")?;
            let at = row.opt_i64("at")?;
            if row.has("code") {
                Ok(Command::CheckInByCode {
                    code: row.string("code")?,
                    person_id: row.ulid("person_id")?,
                    remarks,
                    at,
                })
            } else {
                let role = row.string("role")?;
                Ok(Command::InsertCheckIn {
                    assignment_id: row.ulid("assignment_id")?,
                    role: CheckInRole::parse(&role).ok_or(SqlError::BadEnum("role", role))?,
                    remarks,
                    at,
                })
            }
        }
        "overrides" => {
            let row = single_row(&rows)?;
            let status = row.string("status")?;
            Ok(Command::InsertOverride {
                assignment_id: row.ulid("assignment_id")?,
                status: AttendanceStatus::parse(&status).ok_or(SqlError::BadEnum("status", status))?,
                remarks: row.opt_string("remarks")?,
            })
        }
        _ => Err(SqlError::UnknownTable(table.to_string())),
    }
}

fn single_row<'r, 'a>(rows: &'r [Row<'a>]) -> Result<&'r Row<'a>, SqlError> {
    match rows {
        [row] => Ok(row),
        _ => Err(SqlError::Unsupported(format!("multi-row INSERT into {}", rows[0].table))),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::collect(delete.selection.as_ref())?;

    match table.as_str() {
        "bookings" => Ok(Command::DeleteBooking { id: filters.ulid("id")? }),
        "codes" => Ok(Command::ResetCode {
            assignment_id: filters.ulid("assignment_id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let f = Filters::collect(select.selection.as_ref())?;

    match table.as_str() {
        "bookings" => Ok(Command::SelectBookings {
            resource_id: f.ulid("resource_id")?,
            start: f.ge("start")?,
            end: f.le("end")?,
        }),
        "occupancy" => {
            let resource_id = f.ulid("resource_id")?;
            let window = match f.opt_i64("day")? {
                Some(day) => OccupancyWindow::Day(day),
                None => OccupancyWindow::Range {
                    start: f.ge("start")?.ok_or(SqlError::MissingFilter("start"))?,
                    end: f.le("end")?.ok_or(SqlError::MissingFilter("end"))?,
                },
            };
            Ok(Command::SelectOccupancy { resource_id, window })
        }
        "assignments" => {
            let phase = match f.opt_string("phase")? {
                Some(p) => Some(Phase::parse(&p).ok_or(SqlError::BadEnum("phase", p))?),
                None => None,
            };
            let proctor_id = f.opt_ulid("proctor_id")?;
            if phase.is_some() && proctor_id.is_none() {
                return Err(SqlError::MissingFilter("proctor_id"));
            }
            Ok(Command::SelectAssignments { proctor_id, phase })
        }
        "verify" => Ok(Command::SelectVerify {
            code: f.string("code")?,
            person_id: f.ulid("person_id")?,
        }),
        "substitution_candidates" => Ok(Command::SelectSubstitutionCandidates {
            person_id: f.ulid("person_id")?,
        }),
        "absence_sweep" => Ok(Command::SelectAbsenceSweep { at: f.opt_i64("at")? }),
        "attendance_summary" => Ok(Command::SelectAttendanceSummary),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Conjunction of `column = v`, `column >= v` and `column <= v` terms.
/// Other predicates are rejected rather than silently ignored.
#[derive(Default)]
struct Filters<'a> {
    eq: HashMap<String, &'a Expr>,
    ge: HashMap<String, &'a Expr>,
    le: HashMap<String, &'a Expr>,
}

impl<'a> Filters<'a> {
    fn collect(selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut filters = Filters::default();
        if let Some(expr) = selection {
            filters.walk(expr)?;
        }
        Ok(filters)
    }

    fn walk(&mut self, expr: &'a Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.walk(inner),
            Expr::BinaryOp { left, op, right } => {
                let target = match op {
                    ast::BinaryOperator::And => {
                        self.walk(left)?;
                        return self.walk(right);
                    }
                    ast::BinaryOperator::Eq => &mut self.eq,
                    ast::BinaryOperator::GtEq => &mut self.ge,
                    ast::BinaryOperator::LtEq => &mut self.le,
                    other => return Err(SqlError::Unsupported(format!("operator {other}"))),
                };
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
                target.insert(col, right.as_ref());
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("predicate {other}"))),
        }
    }

    fn ulid(&self, column: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid_expr(self.eq.get(column).ok_or(SqlError::MissingFilter(column))?)
    }

    fn string(&self, column: &'static str) -> Result<String, SqlError> {
        self.opt_string(column)?.ok_or(SqlError::MissingFilter(column))
    }

    fn opt_ulid(&self, column: &str) -> Result<Option<Ulid>, SqlError> {
        self.eq.get(column).map_or(Ok(None), |e| parse_ulid_or_null(e))
    }

    fn opt_i64(&self, column: &str) -> Result<Option<Ms>, SqlError> {
        self.eq.get(column).map_or(Ok(None), |e| parse_i64_or_null(e))
    }

    fn opt_string(&self, column: &str) -> Result<Option<String>, SqlError> {
        self.eq.get(column).map_or(Ok(None), |e| parse_string_or_null(e))
    }

    fn ge(&self, column: &str) -> Result<Option<Ms>, SqlError> {
        self.ge.get(column).map(|e| parse_i64_expr(e)).transpose()
    }

    fn le(&self, column: &str) -> Result<Option<Ms>, SqlError> {
        self.le.get(column).map(|e| parse_i64_expr(e)).transpose()
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

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) {
        Ok(None)
    } else {
        parse_ulid_expr(expr).map(Some)
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if is_null(expr) {
        Ok(None)
    } else {
        parse_i64_expr(expr).map(Some)
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
    BadEnum(&'static str, String),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::MissingColumn(t, col) => write!(f, "{t}: missing value for {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::BadEnum(col, v) => write!(f, "invalid {col}: {v}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const B: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn parse_insert_booking() {
        let sql = format!(r#"INSERT INTO bookings (id, resource_id, start, "end") VALUES ('{A}', '{B}', 1000, 2000)"#);
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertBooking { id: ulid(A), resource_id: ulid(B), start: 1000, end: 2000, source_id: None }
        );
    }

    #[test]
    fn parse_insert_booking_columns_reordered() {
        let sql = format!(r#"INSERT INTO bookings ("end", start, resource_id, id, source_id) VALUES (2000, 1000, '{B}', '{A}', '{A}')"#);
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertBooking { id: ulid(A), resource_id: ulid(B), start: 1000, end: 2000, source_id: Some(ulid(A)) }
        );
    }

    #[test]
    fn parse_batch_insert_bookings() {
        let sql = format!(
            r#"INSERT INTO bookings (id, resource_id, start, "end") VALUES ('{A}', '{B}', 1000, 2000), ('{B}', '{B}', 3000, 4000)"#
        );
        match parse_sql(&sql).unwrap() {
            Command::BatchInsertBookings { bookings } => {
                assert_eq!(bookings.len(), 2);
                assert_eq!((bookings[0].2, bookings[0].3), (1000, 2000));
                assert_eq!((bookings[1].2, bookings[1].3), (3000, 4000));
            }
            cmd => panic!("expected BatchInsertBookings, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_without_column_list_uses_default_order() {
        let sql = format!("INSERT INTO bookings VALUES ('{A}', '{B}', 1000, 2000)");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::InsertBooking { start: 1000, end: 2000, .. }));
    }

    #[test]
    fn parse_delete_booking() {
        let sql = format!("DELETE FROM bookings WHERE id = '{A}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteBooking { id: ulid(A) });
    }

    #[test]
    fn parse_select_bookings_optional_range() {
        let sql = format!("SELECT * FROM bookings WHERE resource_id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectBookings { resource_id: ulid(A), start: None, end: None }
        );
        let sql = format!(r#"SELECT * FROM bookings WHERE resource_id = '{A}' AND start >= 10 AND "end" <= 20"#);
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectBookings { resource_id: ulid(A), start: Some(10), end: Some(20) }
        );
    }

    #[test]
    fn parse_select_occupancy_day_and_range() {
        let sql = format!("SELECT * FROM occupancy WHERE resource_id = '{A}' AND day = 1700000000000");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectOccupancy { resource_id: ulid(A), window: OccupancyWindow::Day(1_700_000_000_000) }
        );
        let sql = format!(r#"SELECT * FROM occupancy WHERE resource_id = '{A}' AND start >= 100 AND "end" <= 200"#);
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectOccupancy {
                resource_id: ulid(A),
                window: OccupancyWindow::Range { start: 100, end: 200 }
            }
        );
        let sql = format!("SELECT * FROM occupancy WHERE resource_id = '{A}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("start"))));
    }

    #[test]
    fn parse_insert_assignment_with_room() {
        let sql = format!(
            r#"INSERT INTO assignments (id, exam_schedule_id, proctor_id, start, "end", room_id) VALUES ('{A}', '{B}', '{A}', 1000, 2000, '{B}')"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertAssignment {
                id: ulid(A),
                exam_schedule_id: ulid(B),
                proctor_id: ulid(A),
                start: 1000,
                end: 2000,
                room_id: Some(ulid(B)),
            }
        );
    }

    #[test]
    fn parse_select_assignments_filters() {
        assert_eq!(
            parse_sql("SELECT * FROM assignments").unwrap(),
            Command::SelectAssignments { proctor_id: None, phase: None }
        );
        let sql = format!("SELECT * FROM assignments WHERE proctor_id = '{A}' AND phase = 'upcoming'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAssignments { proctor_id: Some(ulid(A)), phase: Some(Phase::Upcoming) }
        );
        assert!(matches!(
            parse_sql("SELECT * FROM assignments WHERE phase = 'ongoing'"),
            Err(SqlError::MissingFilter("proctor_id"))
        ));
    }

    #[test]
    fn parse_generate_and_reset_codes() {
        let sql = format!("INSERT INTO codes (assignment_id) VALUES ('{A}'), ('{B}')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::GenerateCodes { assignment_ids: vec![ulid(A), ulid(B)] }
        );
        let sql = format!("DELETE FROM codes WHERE assignment_id = '{A}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::ResetCode { assignment_id: ulid(A) });
    }

    #[test]
    fn parse_verify() {
        let sql = format!("SELECT * FROM verify WHERE code = 'K7M2QX9P' AND person_id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectVerify { code: "K7M2QX9P".into(), person_id: ulid(A) }
        );
    }

    #[test]
    fn parse_checkin_by_assignment() {
        let sql = format!("INSERT INTO checkins (assignment_id, role, remarks) VALUES ('{A}', 'substitute', 'covering')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertCheckIn {
                assignment_id: ulid(A),
                role: CheckInRole::Substitute,
                remarks: Some("covering".into()),
                at: None,
            }
        );
    }

    #[test]
    fn parse_checkin_by_code() {
        let sql = format!("INSERT INTO checkins (code, person_id, remarks, at) VALUES ('K7M2QX9P', '{A}', NULL, 1234)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::CheckInByCode {
                code: "K7M2QX9P".into(),
                person_id: ulid(A),
                remarks: None,
                at: Some(1234),
            }
        );
    }

    #[test]
    fn parse_checkin_bad_role() {
        let sql = format!("INSERT INTO checkins (assignment_id, role) VALUES ('{A}', 'visitor')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::BadEnum("role", _))));
    }

    #[test]
    fn parse_override() {
        let sql = format!("INSERT INTO overrides (assignment_id, status, remarks) VALUES ('{A}', 'absent', 'left early')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertOverride {
                assignment_id: ulid(A),
                status: AttendanceStatus::Absent,
                remarks: Some("left early".into()),
            }
        );
    }

    #[test]
    fn parse_monitoring_selects() {
        let sql = format!("SELECT * FROM substitution_candidates WHERE person_id = '{A}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::SelectSubstitutionCandidates { person_id: ulid(A) });
        assert_eq!(parse_sql("SELECT * FROM absence_sweep").unwrap(), Command::SelectAbsenceSweep { at: None });
        assert_eq!(
            parse_sql("SELECT * FROM absence_sweep WHERE at = 99").unwrap(),
            Command::SelectAbsenceSweep { at: Some(99) }
        );
        assert_eq!(parse_sql("SELECT * FROM attendance_summary").unwrap(), Command::SelectAttendanceSummary);
    }

    #[test]
    fn unsupported_predicate_rejected() {
        let sql = format!("SELECT * FROM bookings WHERE resource_id = '{A}' OR start >= 1");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO resources (id) VALUES ('{A}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
