//! Read side of the workspace: rosters and fully populated attendance sessions.
//!
//! Everything here returns model values ready for `aggregate`; handlers own the
//! write paths.

use crate::model::{
    AttendanceRecord, AttendanceSession, AttendanceStatus, DayRange, Student, StudentRef,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
    #[error("unexpected stored value: {0}")]
    Corrupt(String),
}

pub const STUDENT_COLUMNS: &str = "id, name, roll_number, department, section, barcode_id";

pub fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        name: r.get(1)?,
        roll_number: r.get(2)?,
        department: r.get(3)?,
        section: r.get(4)?,
        barcode_id: r.get(5)?,
    })
}

fn query_students(conn: &Connection, sql: &str, binds: Vec<Value>) -> Result<Vec<Student>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let students = stmt
        .query_map(params_from_iter(binds), student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(students)
}

/// Students of a department and/or section ordered by roll number; `None` widens the filter.
pub fn load_roster(
    conn: &Connection,
    department: Option<&str>,
    section: Option<&str>,
) -> Result<Vec<Student>, StoreError> {
    let mut sql = format!("SELECT {} FROM students WHERE 1 = 1", STUDENT_COLUMNS);
    let mut binds: Vec<Value> = Vec::new();
    if let Some(d) = department {
        sql.push_str(" AND department = ?");
        binds.push(Value::Text(d.to_string()));
    }
    if let Some(s) = section {
        sql.push_str(" AND section = ?");
        binds.push(Value::Text(s.to_string()));
    }
    sql.push_str(" ORDER BY roll_number");
    query_students(conn, &sql, binds)
}

pub fn find_student(conn: &Connection, student_id: &str) -> Result<Option<Student>, StoreError> {
    let sql = format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS);
    Ok(conn
        .query_row(&sql, [student_id], student_from_row)
        .optional()?)
}

/// Barcode match first, then roll number.
pub fn find_by_scan_code(conn: &Connection, code: &str) -> Result<Option<Student>, StoreError> {
    let code = code.trim();
    let sql = format!("SELECT {} FROM students WHERE barcode_id = ?", STUDENT_COLUMNS);
    if let Some(s) = conn.query_row(&sql, [code], student_from_row).optional()? {
        return Ok(Some(s));
    }
    let sql = format!("SELECT {} FROM students WHERE roll_number = ?", STUDENT_COLUMNS);
    Ok(conn
        .query_row(&sql, [code.to_ascii_uppercase()], student_from_row)
        .optional()?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    All,
    Name,
    RollNumber,
    Barcode,
}

impl SearchKind {
    /// Unknown kinds search every field.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim()) {
            Some("name") => SearchKind::Name,
            Some("usn") | Some("rollNumber") => SearchKind::RollNumber,
            Some("barcode") => SearchKind::Barcode,
            _ => SearchKind::All,
        }
    }

    fn columns(self) -> &'static [&'static str] {
        match self {
            SearchKind::All => &["name", "roll_number", "barcode_id"],
            SearchKind::Name => &["name"],
            SearchKind::RollNumber => &["roll_number"],
            SearchKind::Barcode => &["barcode_id"],
        }
    }
}

fn like_pattern(query: &str) -> String {
    let mut out = String::with_capacity(query.len() + 2);
    out.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/// Case-insensitive substring search, newest students first.
pub fn search_students(
    conn: &Connection,
    query: &str,
    kind: SearchKind,
) -> Result<Vec<Student>, StoreError> {
    let pattern = like_pattern(query.trim());
    let clauses: Vec<String> = kind
        .columns()
        .iter()
        .map(|c| format!("{} LIKE ? ESCAPE '\\'", c))
        .collect();
    let sql = format!(
        "SELECT {} FROM students WHERE {} ORDER BY created_at DESC, rowid DESC",
        STUDENT_COLUMNS,
        clauses.join(" OR ")
    );
    let binds = kind
        .columns()
        .iter()
        .map(|_| Value::Text(pattern.clone()))
        .collect();
    query_students(conn, &sql, binds)
}

#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub department: Option<String>,
    pub section: Option<String>,
    pub subject_code: Option<String>,
    pub days: Option<DayRange>,
    /// Only sessions holding a record for this student.
    pub student_id: Option<String>,
    /// Reverses the day/creation ordering.
    pub newest_first: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

struct SessionRow {
    id: String,
    date: NaiveDate,
    department: String,
    section: String,
    subject_code: String,
    teacher: String,
}

fn day_text(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// `WHERE` over `attendance_sessions a`, shared by the session and record queries.
fn filter_clause(filter: &SessionFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    if let Some(d) = &filter.department {
        clauses.push("a.department = ?");
        binds.push(Value::Text(d.clone()));
    }
    if let Some(s) = &filter.section {
        clauses.push("a.section = ?");
        binds.push(Value::Text(s.clone()));
    }
    if let Some(code) = &filter.subject_code {
        clauses.push("a.subject_code = ?");
        binds.push(Value::Text(code.clone()));
    }
    if let Some(days) = filter.days {
        clauses.push("a.date >= ? AND a.date <= ?");
        binds.push(Value::Text(day_text(days.start)));
        binds.push(Value::Text(day_text(days.end)));
    }
    if let Some(student_id) = &filter.student_id {
        clauses.push(
            "EXISTS (SELECT 1 FROM attendance_records x
                     WHERE x.session_id = a.id AND x.student_id = ?)",
        );
        binds.push(Value::Text(student_id.clone()));
    }
    if clauses.is_empty() {
        (String::new(), binds)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), binds)
    }
}

/// Ordering plus `LIMIT ? OFFSET ?`; a missing limit binds -1 (no limit).
fn window_clause(filter: &SessionFilter) -> (String, Vec<Value>) {
    let dir = if filter.newest_first { "DESC" } else { "ASC" };
    let sql = format!(
        "ORDER BY a.date {dir}, a.created_at {dir}, a.rowid {dir} LIMIT ? OFFSET ?",
        dir = dir
    );
    let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
    (sql, vec![Value::Integer(limit), Value::Integer(filter.offset as i64)])
}

/// Sessions matching `filter` with their records, ordered by day then creation.
pub fn load_sessions(
    conn: &Connection,
    filter: &SessionFilter,
) -> Result<Vec<AttendanceSession>, StoreError> {
    let (where_sql, binds) = filter_clause(filter);
    let (window_sql, window_binds) = window_clause(filter);
    fetch_sessions(conn, &where_sql, &window_sql, [binds, window_binds].concat())
}

/// Number of sessions matching `filter`, ignoring its limit and offset.
pub fn count_sessions(conn: &Connection, filter: &SessionFilter) -> Result<usize, StoreError> {
    let (where_sql, binds) = filter_clause(filter);
    let sql = format!("SELECT COUNT(*) FROM attendance_sessions a {}", where_sql);
    let n: i64 = conn.query_row(&sql, params_from_iter(binds), |r| r.get(0))?;
    Ok(n as usize)
}

pub fn load_session(
    conn: &Connection,
    session_id: &str,
) -> Result<Option<AttendanceSession>, StoreError> {
    let mut sessions = fetch_sessions(
        conn,
        "WHERE a.id = ?",
        "",
        vec![Value::Text(session_id.to_string())],
    )?;
    Ok(sessions.pop())
}

fn fetch_sessions(
    conn: &Connection,
    where_sql: &str,
    window_sql: &str,
    binds: Vec<Value>,
) -> Result<Vec<AttendanceSession>, StoreError> {
    let sql = format!(
        "SELECT a.id, a.date, a.department, a.section, a.subject_code, a.teacher
         FROM attendance_sessions a
         {} {}",
        where_sql, window_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows: Vec<SessionRow> = stmt
        .query_map(params_from_iter(binds.iter()), |r| {
            Ok(SessionRow {
                id: r.get(0)?,
                date: r.get(1)?,
                department: r.get(2)?,
                section: r.get(3)?,
                subject_code: r.get(4)?,
                teacher: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let mut records = load_records(conn, where_sql, window_sql, binds)?;
    Ok(rows
        .into_iter()
        .map(|row| AttendanceSession {
            records: records.remove(&row.id).unwrap_or_default(),
            id: row.id,
            date: row.date,
            department: row.department,
            section: row.section,
            subject_code: row.subject_code,
            teacher: row.teacher,
        })
        .collect())
}

// Inner join on students: a record whose student is gone never reaches the aggregator.
fn load_records(
    conn: &Connection,
    where_sql: &str,
    window_sql: &str,
    binds: Vec<Value>,
) -> Result<HashMap<String, Vec<AttendanceRecord>>, StoreError> {
    let sql = format!(
        "SELECT r.session_id, s.id, s.name, s.roll_number, s.barcode_id, r.status, r.marked_at
         FROM attendance_records r
         JOIN students s ON s.id = r.student_id
         WHERE r.session_id IN (SELECT a.id FROM attendance_sessions a {} {})
         ORDER BY r.rowid",
        where_sql, window_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok((
                r.get::<_, String>(0)?,
                StudentRef {
                    id: r.get(1)?,
                    name: r.get(2)?,
                    roll_number: r.get(3)?,
                    barcode_id: r.get(4)?,
                },
                r.get::<_, String>(5)?,
                r.get::<_, Option<DateTime<Utc>>>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut by_session: HashMap<String, Vec<AttendanceRecord>> = HashMap::new();
    for (session_id, student, status, timestamp) in rows {
        let Some(status) = AttendanceStatus::parse(&status) else {
            return Err(StoreError::Corrupt(format!(
                "attendance status '{}' in session {}",
                status, session_id
            )));
        };
        by_session
            .entry(session_id)
            .or_default()
            .push(AttendanceRecord {
                student,
                status,
                timestamp,
            });
    }
    Ok(by_session)
}

/// Course codes of a department, used to list subjects that have no sessions yet.
pub fn subject_codes_for_department(
    conn: &Connection,
    department: &str,
    semester: Option<i64>,
) -> Result<Vec<String>, StoreError> {
    let mut sql = String::from(
        "SELECT DISTINCT course_code FROM courses WHERE department = ? AND active = 1",
    );
    let mut binds = vec![Value::Text(department.to_string())];
    if let Some(s) = semester {
        sql.push_str(" AND semester = ?");
        binds.push(Value::Integer(s));
    }
    sql.push_str(" ORDER BY course_code");
    let mut stmt = conn.prepare(&sql)?;
    let codes = stmt
        .query_map(params_from_iter(binds), |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(codes)
}
