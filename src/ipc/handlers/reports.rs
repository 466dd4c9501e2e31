use crate::aggregate::{self, ClassKey, StudentProfile};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::attendance::{day_window, session_filter};
use crate::ipc::helpers::{get_optional_bool, get_optional_i64, get_optional_str, get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use crate::model::{normalize_code, DayRange, Student};
use crate::store::{self, SearchKind, SessionFilter};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;

const RECENT_SESSIONS: usize = 10;

fn subject_wise(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let department = get_required_str(params, "department")?;
    let section = normalize_code(&get_required_str(params, "section")?);
    let subject_code = normalize_code(&get_required_str(params, "subjectCode")?);

    let filter = SessionFilter {
        department: Some(department.clone()),
        section: Some(section.clone()),
        subject_code: Some(subject_code.clone()),
        days: day_window(params)?,
        ..Default::default()
    };
    let sessions = store::load_sessions(conn, &filter)?;
    let roster = store::load_roster(conn, Some(&department), Some(&section))?;
    let students = aggregate::subject_wise_attendance(&sessions, &roster, &subject_code)?;

    Ok(json!({
        "subjectCode": subject_code,
        "department": department,
        "section": section,
        "totalSessions": sessions.len(),
        "classAverage": aggregate::class_average(&students),
        "students": students,
    }))
}

fn profile_for(
    conn: &Connection,
    student: &Student,
    days: Option<DayRange>,
) -> Result<StudentProfile, HandlerErr> {
    let filter = SessionFilter {
        department: Some(student.department.clone()),
        section: Some(student.section.clone()),
        days,
        student_id: Some(student.id.clone()),
        ..Default::default()
    };
    let sessions = store::load_sessions(conn, &filter)?;
    Ok(aggregate::student_wise_attendance(&sessions, &student.id)?)
}

/// One student by `studentId`, or every student matching `query` (with `type`).
fn student_wise(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let days = day_window(params)?;
    if let Some(id) = get_optional_str(params, "studentId")? {
        let student = store::find_student(conn, &id)?.ok_or_else(|| {
            HandlerErr::not_found("student not found").with_details(json!({ "studentId": id }))
        })?;
        let profile = profile_for(conn, &student, days)?;
        return Ok(json!({ "student": student, "profile": profile }));
    }
    let Some(query) = get_optional_str(params, "query")? else {
        return Err(HandlerErr::bad_params("studentId or query is required"));
    };
    let kind_raw = get_optional_str(params, "type")?;
    let kind = SearchKind::parse(kind_raw.as_deref());
    let students = store::search_students(conn, &query, kind)?;
    let mut attendance = Vec::with_capacity(students.len());
    for student in &students {
        let profile = profile_for(conn, student, days)?;
        attendance.push(json!({ "student": student, "profile": profile }));
    }
    Ok(json!({ "students": students, "attendance": attendance }))
}

fn class_overview(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let department = get_required_str(params, "department")?;
    let section = normalize_code(&get_required_str(params, "section")?);
    let include_courses = get_optional_bool(params, "includeCourses")?.unwrap_or(true);
    let semester = get_optional_i64(params, "semester")?;

    let filter = SessionFilter {
        department: Some(department.clone()),
        section: Some(section.clone()),
        subject_code: None,
        days: day_window(params)?,
        ..Default::default()
    };
    let sessions = store::load_sessions(conn, &filter)?;
    let roster = store::load_roster(conn, Some(&department), Some(&section))?;
    let known = if include_courses {
        store::subject_codes_for_department(conn, &department, semester)?
    } else {
        Vec::new()
    };
    let class = ClassKey {
        department: &department,
        section: &section,
    };
    let subjects = aggregate::class_overview(&sessions, &roster, class, &known)?;

    Ok(json!({
        "department": department,
        "section": section,
        "totalStudents": roster.len(),
        "totalSessions": sessions.len(),
        "subjects": subjects,
    }))
}

fn records(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let filter = session_filter(params)?;
    let sessions = store::load_sessions(conn, &filter)?;
    let rows = aggregate::flatten_session_records(&sessions);
    let window = filter.days.map(|d| {
        json!({
            "start": d.start_of_day().format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
            "end": d.end_of_day().format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
        })
    });
    Ok(json!({
        "window": window,
        "totalSessions": sessions.len(),
        "totalRecords": rows.len(),
        "records": rows,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DepartmentStats {
    id: String,
    name: String,
    code: Option<String>,
    students: i64,
    teachers: i64,
    courses: i64,
    sessions: i64,
    sections: Vec<String>,
    active_sections: Vec<String>,
}

fn count(conn: &Connection, sql: &str) -> Result<i64, HandlerErr> {
    conn.query_row(sql, [], |r| r.get(0)).map_err(HandlerErr::query)
}

fn count_for(conn: &Connection, sql: &str, key: &str) -> Result<i64, HandlerErr> {
    conn.query_row(sql, [key], |r| r.get(0)).map_err(HandlerErr::query)
}

fn strings_for(conn: &Connection, sql: &str, key: &str) -> Result<Vec<String>, HandlerErr> {
    let mut stmt = conn.prepare(sql).map_err(HandlerErr::query)?;
    stmt.query_map([key], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)
}

fn dashboard(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let stats = json!({
        "totalStudents": count(conn, "SELECT COUNT(*) FROM students")?,
        "totalTeachers": count(conn, "SELECT COUNT(*) FROM teachers")?,
        "totalCourses": count(conn, "SELECT COUNT(*) FROM courses")?,
        "totalDepartments": count(conn, "SELECT COUNT(*) FROM departments WHERE active = 1")?,
        "totalAttendanceSessions": count(conn, "SELECT COUNT(*) FROM attendance_sessions")?,
        "activeStudents": count(conn, "SELECT COUNT(*) FROM students WHERE active = 1")?,
        "activeTeachers": count(conn, "SELECT COUNT(*) FROM teachers WHERE active = 1")?,
        "activeCourses": count(conn, "SELECT COUNT(*) FROM courses WHERE active = 1")?,
    });

    let mut stmt = conn
        .prepare("SELECT id, name, code FROM departments WHERE active = 1 ORDER BY name")
        .map_err(HandlerErr::query)?;
    let departments = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut breakdown = Vec::with_capacity(departments.len());
    for (id, name, code) in departments {
        breakdown.push(DepartmentStats {
            students: count_for(conn, "SELECT COUNT(*) FROM students WHERE department = ?", &name)?,
            teachers: count_for(conn, "SELECT COUNT(*) FROM teachers WHERE department = ?", &name)?,
            courses: count_for(conn, "SELECT COUNT(*) FROM courses WHERE department = ?", &name)?,
            sessions: count_for(
                conn,
                "SELECT COUNT(*) FROM attendance_sessions WHERE department = ?",
                &name,
            )?,
            sections: strings_for(
                conn,
                "SELECT section FROM department_sections WHERE department_id = ? ORDER BY sort_order",
                &id,
            )?,
            active_sections: strings_for(
                conn,
                "SELECT DISTINCT section FROM students WHERE department = ? ORDER BY section",
                &name,
            )?,
            id,
            name,
            code,
        });
    }

    let latest = SessionFilter {
        newest_first: true,
        limit: Some(RECENT_SESSIONS),
        ..Default::default()
    };
    let recent: Vec<_> = store::load_sessions(conn, &latest)?
        .iter()
        .map(aggregate::session_summary)
        .collect();

    Ok(json!({
        "stats": stats,
        "departmentStats": breakdown,
        "recentSessions": recent,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.subjectWise" => Some(with_db(state, req, subject_wise)),
        "reports.studentWise" => Some(with_db(state, req, student_wise)),
        "reports.classOverview" => Some(with_db(state, req, class_overview)),
        "reports.records" => Some(with_db(state, req, records)),
        "reports.dashboard" => Some(with_db(state, req, dashboard)),
        _ => None,
    }
}
