use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_int_in_range, get_optional_i64, get_optional_str, get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use crate::model::{normalize_code, DEFAULT_ACADEMIC_YEAR, DEFAULT_DEPARTMENT};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

const COURSE_TYPES: [&str; 4] = ["Theory", "Laboratory", "Project", "Seminar"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Course {
    id: String,
    course_code: String,
    course_name: String,
    teacher_id: Option<String>,
    teacher_name: Option<String>,
    semester: i64,
    department: String,
    credits: i64,
    course_type: String,
    academic_year: String,
    active: bool,
}

const COURSE_SELECT: &str = "SELECT c.id, c.course_code, c.course_name, c.teacher_id, t.name,
        c.semester, c.department, c.credits, c.course_type, c.academic_year, c.active
     FROM courses c
     LEFT JOIN teachers t ON t.id = c.teacher_id";

fn course_from_row(r: &Row<'_>) -> rusqlite::Result<Course> {
    Ok(Course {
        id: r.get(0)?,
        course_code: r.get(1)?,
        course_name: r.get(2)?,
        teacher_id: r.get(3)?,
        teacher_name: r.get(4)?,
        semester: r.get(5)?,
        department: r.get(6)?,
        credits: r.get(7)?,
        course_type: r.get(8)?,
        academic_year: r.get(9)?,
        active: r.get::<_, i64>(10)? != 0,
    })
}

fn query_courses(conn: &Connection, params: &serde_json::Value) -> Result<Vec<Course>, HandlerErr> {
    let department = get_optional_str(params, "department")?;
    let semester = get_optional_i64(params, "semester")?;
    let mut sql = format!("{} WHERE c.active = 1", COURSE_SELECT);
    let mut binds: Vec<Value> = Vec::new();
    if let Some(d) = department {
        sql.push_str(" AND c.department = ?");
        binds.push(Value::Text(d));
    }
    if let Some(s) = semester {
        sql.push_str(" AND c.semester = ?");
        binds.push(Value::Integer(s));
    }
    sql.push_str(" ORDER BY c.course_code");
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    stmt.query_map(params_from_iter(binds), course_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)
}

fn find_course(conn: &Connection, course_code: &str) -> Result<Option<Course>, HandlerErr> {
    let sql = format!("{} WHERE c.course_code = ?", COURSE_SELECT);
    conn.query_row(&sql, [course_code], course_from_row)
        .optional()
        .map_err(HandlerErr::query)
}

fn courses_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({ "courses": query_courses(conn, params)? }))
}

fn courses_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let code = normalize_code(&get_required_str(params, "courseCode")?);
    let course = find_course(conn, &code)?.ok_or_else(|| HandlerErr::not_found("course not found"))?;
    Ok(json!({ "course": course }))
}

fn courses_subject_codes(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subjects: Vec<serde_json::Value> = query_courses(conn, params)?
        .into_iter()
        .map(|c| json!({ "code": c.course_code, "name": c.course_name }))
        .collect();
    Ok(json!({ "subjects": subjects }))
}

fn parse_course_type(params: &serde_json::Value) -> Result<String, HandlerErr> {
    let Some(raw) = get_optional_str(params, "courseType")? else {
        return Ok(COURSE_TYPES[0].to_string());
    };
    COURSE_TYPES
        .iter()
        .find(|t| t.eq_ignore_ascii_case(&raw))
        .map(|t| t.to_string())
        .ok_or_else(|| {
            HandlerErr::bad_params(format!("courseType must be one of: {}", COURSE_TYPES.join(", ")))
        })
}

fn courses_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let code = normalize_code(&get_required_str(params, "courseCode")?);
    let name = get_required_str(params, "courseName")?;
    let semester = get_int_in_range(params, "semester", 1..=8, None)?;
    let credits = get_int_in_range(params, "credits", 1..=6, Some(3))?;
    let course_type = parse_course_type(params)?;
    let department =
        get_optional_str(params, "department")?.unwrap_or_else(|| DEFAULT_DEPARTMENT.to_string());
    let academic_year = get_optional_str(params, "academicYear")?
        .unwrap_or_else(|| DEFAULT_ACADEMIC_YEAR.to_string());
    let teacher_id = get_optional_str(params, "teacherId")?;

    if let Some(tid) = &teacher_id {
        let known = conn
            .query_row("SELECT 1 FROM teachers WHERE id = ?", [tid], |r| r.get::<_, i64>(0))
            .optional()
            .map_err(HandlerErr::query)?;
        if known.is_none() {
            return Err(HandlerErr::not_found("teacher not found"));
        }
    }
    if find_course(conn, &code)?.is_some() {
        return Err(HandlerErr::conflict("course with this code already exists"));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, course_code, course_name, teacher_id, semester, department,
                             credits, course_type, academic_year, active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &id,
            &code,
            &name,
            &teacher_id,
            semester,
            &department,
            credits,
            &course_type,
            &academic_year,
            Utc::now(),
        ),
    )
    .map_err(|e| HandlerErr::write(e, "courses"))?;

    tracing::info!(course = %code, department = %department, semester, "course created");
    let course = find_course(conn, &code)?.ok_or_else(|| HandlerErr::not_found("course not found"))?;
    Ok(json!({ "courseId": id, "course": course }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(with_db(state, req, courses_list)),
        "courses.get" => Some(with_db(state, req, courses_get)),
        "courses.create" => Some(with_db(state, req, courses_create)),
        "courses.subjectCodes" => Some(with_db(state, req, courses_subject_codes)),
        _ => None,
    }
}
