use crate::aggregate::{self, SessionSummary};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_optional_day, get_optional_str, get_required_str, required_status, with_db, Page,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{
    normalize_code, AttendanceSession, AttendanceStatus, DayRange, Student, DEFAULT_ACADEMIC_YEAR,
};
use crate::store::{self, SessionFilter};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

struct SessionMeta {
    period: String,
    academic_year: String,
    finalized: bool,
}

fn session_meta(conn: &Connection, session_id: &str) -> Result<Option<SessionMeta>, HandlerErr> {
    conn.query_row(
        "SELECT period, academic_year, finalized FROM attendance_sessions WHERE id = ?",
        [session_id],
        |r| {
            Ok(SessionMeta {
                period: r.get(0)?,
                academic_year: r.get(1)?,
                finalized: r.get::<_, i64>(2)? != 0,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::query)
}

fn require_session(conn: &Connection, session_id: &str) -> Result<(AttendanceSession, SessionMeta), HandlerErr> {
    let not_found = || {
        HandlerErr::not_found("attendance session not found")
            .with_details(json!({ "sessionId": session_id }))
    };
    let meta = session_meta(conn, session_id)?.ok_or_else(not_found)?;
    let session = store::load_session(conn, session_id)?.ok_or_else(not_found)?;
    Ok((session, meta))
}

fn require_open_session(conn: &Connection, session_id: &str) -> Result<AttendanceSession, HandlerErr> {
    let (session, meta) = require_session(conn, session_id)?;
    if meta.finalized {
        return Err(HandlerErr::new("session_finalized", "attendance session is already submitted")
            .with_details(json!({ "sessionId": session_id })));
    }
    Ok(session)
}

fn in_class(student: &Student, session: &AttendanceSession) -> bool {
    student.department == session.department && student.section == session.section
}

fn outside_class(student: &Student) -> HandlerErr {
    HandlerErr::bad_params("student does not belong to this class").with_details(json!({
        "studentId": student.id,
        "department": student.department,
        "section": student.section,
    }))
}

fn session_json(session: &AttendanceSession, meta: &SessionMeta) -> serde_json::Value {
    json!({
        "session": session,
        "period": meta.period,
        "academicYear": meta.academic_year,
        "finalized": meta.finalized,
        "summary": aggregate::session_summary(session),
    })
}

fn reload(conn: &Connection, session_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let (session, meta) = require_session(conn, session_id)?;
    Ok(session_json(&session, &meta))
}

/// Explicit `records` from the request, or `None` when the roster should be seeded.
fn parse_records(params: &serde_json::Value) -> Result<Option<Vec<(String, AttendanceStatus)>>, HandlerErr> {
    let Some(raw) = params.get("records").filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let Some(items) = raw.as_array() else {
        return Err(HandlerErr::bad_params("records must be an array"));
    };
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let student_id = get_required_str(item, "studentId")?;
        let status = match item.get("status") {
            None => AttendanceStatus::Absent,
            Some(_) => required_status(item, "status")?,
        };
        if !seen.insert(student_id.clone()) {
            return Err(HandlerErr::bad_params("duplicate student in records")
                .with_details(json!({ "studentId": student_id })));
        }
        out.push((student_id, status));
    }
    Ok(Some(out))
}

fn sessions_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let department = get_required_str(params, "department")?;
    let section = normalize_code(&get_required_str(params, "section")?);
    let subject_code = normalize_code(&get_required_str(params, "subjectCode")?);
    let teacher = get_required_str(params, "teacher")?;
    let date = get_optional_day(params, "date")?.unwrap_or_else(|| Utc::now().date_naive());
    let period = get_optional_str(params, "period")?.unwrap_or_else(|| "FN".to_string());
    let academic_year = get_optional_str(params, "academicYear")?
        .unwrap_or_else(|| DEFAULT_ACADEMIC_YEAR.to_string());

    let records = match parse_records(params)? {
        Some(records) => {
            for (student_id, _) in &records {
                if store::find_student(conn, student_id)?.is_none() {
                    return Err(HandlerErr::not_found("student not found")
                        .with_details(json!({ "studentId": student_id })));
                }
            }
            records
        }
        None => store::load_roster(conn, Some(&department), Some(&section))?
            .into_iter()
            .map(|s| (s.id, AttendanceStatus::Absent))
            .collect(),
    };

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "INSERT INTO attendance_sessions(id, date, department, section, subject_code, teacher,
                                         period, academic_year, created_at, finalized)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 0)",
        (&id, date, &department, &section, &subject_code, &teacher, &period, &academic_year, now),
    )
    .map_err(|e| HandlerErr::write(e, "attendance_sessions"))?;
    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO attendance_records(session_id, student_id, status, marked_at)
                 VALUES(?, ?, ?, ?)",
            )
            .map_err(HandlerErr::query)?;
        for (student_id, status) in &records {
            let marked_at = status.is_present().then_some(now);
            stmt.execute((&id, student_id, status.as_str(), marked_at))
                .map_err(|e| HandlerErr::write(e, "attendance_records"))?;
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(
        session = %id,
        subject = %subject_code,
        department = %department,
        section = %section,
        records = records.len(),
        "attendance session created"
    );
    let mut result = reload(conn, &id)?;
    result["sessionId"] = json!(id);
    Ok(result)
}

fn sessions_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "sessionId")?;
    reload(conn, &id)
}

pub(crate) fn day_window(params: &serde_json::Value) -> Result<Option<DayRange>, HandlerErr> {
    if let Some(day) = get_optional_day(params, "date")? {
        return Ok(Some(DayRange::single(day)));
    }
    let start = get_optional_day(params, "startDate")?;
    let end = get_optional_day(params, "endDate")?;
    match (start, end) {
        (None, None) => Ok(None),
        (Some(s), None) => Ok(Some(DayRange::single(s))),
        (None, Some(e)) => Ok(Some(DayRange::single(e))),
        (Some(s), Some(e)) => DayRange::between(s, e)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params("startDate must not be after endDate")),
    }
}

pub(crate) fn session_filter(params: &serde_json::Value) -> Result<SessionFilter, HandlerErr> {
    Ok(SessionFilter {
        department: get_optional_str(params, "department")?,
        section: get_optional_str(params, "section")?.map(|s| normalize_code(&s)),
        subject_code: get_optional_str(params, "subjectCode")?.map(|s| normalize_code(&s)),
        days: day_window(params)?,
        ..Default::default()
    })
}

fn sessions_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let page = Page::parse(params, 20)?;
    let filter = SessionFilter {
        newest_first: true,
        limit: Some(page.limit),
        offset: page.offset(),
        ..session_filter(params)?
    };
    let total = store::count_sessions(conn, &filter)?;
    let sessions = store::load_sessions(conn, &filter)?;
    let summaries: Vec<SessionSummary> = sessions.iter().map(aggregate::session_summary).collect();
    Ok(json!({
        "sessions": summaries,
        "pagination": page.meta(total),
    }))
}

fn mark_present(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let student_id = get_required_str(params, "studentId")?;
    let session = require_open_session(conn, &session_id)?;
    if session.record_for(&student_id).is_none() {
        return Err(HandlerErr::not_found("student not found in this attendance session")
            .with_details(json!({ "sessionId": session_id, "studentId": student_id })));
    }
    let now = Utc::now();
    conn.execute(
        "UPDATE attendance_records SET status = 'present', marked_at = ?, scanned_at = ?
         WHERE session_id = ? AND student_id = ?",
        (now, now, &session_id, &student_id),
    )
    .map_err(|e| HandlerErr::write(e, "attendance_records"))?;
    reload(conn, &session_id)
}

fn set_status(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let student_id = get_required_str(params, "studentId")?;
    let status = required_status(params, "status")?;
    let session = require_open_session(conn, &session_id)?;
    if session.record_for(&student_id).is_none() {
        let Some(student) = store::find_student(conn, &student_id)? else {
            return Err(HandlerErr::not_found("student not found")
                .with_details(json!({ "studentId": student_id })));
        };
        if !in_class(&student, &session) {
            return Err(outside_class(&student));
        }
    }
    conn.execute(
        "INSERT INTO attendance_records(session_id, student_id, status, marked_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(session_id, student_id) DO UPDATE SET
           status = excluded.status,
           marked_at = excluded.marked_at",
        (&session_id, &student_id, status.as_str(), Utc::now()),
    )
    .map_err(|e| HandlerErr::write(e, "attendance_records"))?;
    reload(conn, &session_id)
}

fn scan(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let code = get_required_str(params, "code")?;
    let session = require_open_session(conn, &session_id)?;
    let Some(student) = store::find_by_scan_code(conn, &code)? else {
        return Err(HandlerErr::not_found("no student matches this barcode or roll number")
            .with_details(json!({ "code": code })));
    };

    let already_present = session
        .record_for(&student.id)
        .map(|r| r.status.is_present())
        .unwrap_or(false);
    if session.record_for(&student.id).is_none() && !in_class(&student, &session) {
        return Err(outside_class(&student));
    }

    if !already_present {
        let now = Utc::now();
        conn.execute(
            "INSERT INTO attendance_records(session_id, student_id, status, marked_at, scanned_at)
             VALUES(?, ?, 'present', ?, ?)
             ON CONFLICT(session_id, student_id) DO UPDATE SET
               status = 'present',
               marked_at = excluded.marked_at,
               scanned_at = excluded.scanned_at",
            (&session_id, &student.id, now, now),
        )
        .map_err(|e| HandlerErr::write(e, "attendance_records"))?;
        tracing::debug!(session = %session_id, student = %student.roll_number, "scan marked present");
    }

    let mut result = reload(conn, &session_id)?;
    result["student"] = json!(student);
    result["alreadyPresent"] = json!(already_present);
    Ok(result)
}

fn submit(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let session = require_open_session(conn, &session_id)?;
    conn.execute(
        "UPDATE attendance_sessions SET finalized = 1 WHERE id = ?",
        [&session_id],
    )
    .map_err(|e| HandlerErr::write(e, "attendance_sessions"))?;
    let summary = aggregate::session_summary(&session);
    tracing::info!(
        session = %session_id,
        present = summary.present_students,
        total = summary.total_students,
        "attendance session submitted"
    );
    reload(conn, &session_id)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.sessions.create" => Some(with_db(state, req, sessions_create)),
        "attendance.sessions.get" => Some(with_db(state, req, sessions_get)),
        "attendance.sessions.list" => Some(with_db(state, req, sessions_list)),
        "attendance.markPresent" => Some(with_db(state, req, mark_present)),
        "attendance.setStatus" => Some(with_db(state, req, set_status)),
        "attendance.scan" => Some(with_db(state, req, scan)),
        "attendance.submit" => Some(with_db(state, req, submit)),
        _ => None,
    }
}
