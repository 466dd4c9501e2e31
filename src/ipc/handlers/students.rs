use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_int_in_range, get_optional_str, get_required_str, normalize_email, with_db, Page,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{normalize_code, DEFAULT_ACADEMIC_YEAR};
use crate::store::{self, SearchKind};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct StudentDetail {
    id: String,
    roll_number: String,
    name: String,
    email: Option<String>,
    phone: Option<String>,
    department: String,
    section: String,
    semester: i64,
    academic_year: String,
    barcode_id: String,
    active: bool,
}

const DETAIL_COLUMNS: &str = "id, roll_number, name, email, phone, department, section, semester,
     academic_year, barcode_id, active";

fn detail_from_row(r: &Row<'_>) -> rusqlite::Result<StudentDetail> {
    Ok(StudentDetail {
        id: r.get(0)?,
        roll_number: r.get(1)?,
        name: r.get(2)?,
        email: r.get(3)?,
        phone: r.get(4)?,
        department: r.get(5)?,
        section: r.get(6)?,
        semester: r.get(7)?,
        academic_year: r.get(8)?,
        barcode_id: r.get(9)?,
        active: r.get::<_, i64>(10)? != 0,
    })
}

fn find_detail(conn: &Connection, student_id: &str) -> Result<Option<StudentDetail>, HandlerErr> {
    let sql = format!("SELECT {} FROM students WHERE id = ?", DETAIL_COLUMNS);
    conn.query_row(&sql, [student_id], detail_from_row)
        .optional()
        .map_err(HandlerErr::query)
}

fn require_detail(conn: &Connection, student_id: &str) -> Result<StudentDetail, HandlerErr> {
    find_detail(conn, student_id)?.ok_or_else(|| HandlerErr::not_found("student not found"))
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let department = get_optional_str(params, "department")?;
    let section = get_optional_str(params, "section")?;
    let page = Page::parse(params, 50)?;

    let mut where_sql = String::from("WHERE active = 1");
    let mut binds: Vec<Value> = Vec::new();
    if let Some(d) = department {
        where_sql.push_str(" AND department = ? COLLATE NOCASE");
        binds.push(Value::Text(d));
    }
    if let Some(s) = section {
        where_sql.push_str(" AND section = ?");
        binds.push(Value::Text(normalize_code(&s)));
    }

    let total: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM students {}", where_sql),
            params_from_iter(binds.iter()),
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;

    let sql = format!(
        "SELECT {} FROM students {} ORDER BY roll_number LIMIT ? OFFSET ?",
        DETAIL_COLUMNS, where_sql
    );
    binds.push(Value::Integer(page.limit as i64));
    binds.push(Value::Integer(page.offset() as i64));
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let students = stmt
        .query_map(params_from_iter(binds), detail_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "students": students, "pagination": page.meta(total as usize) }))
}

fn students_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "studentId")?;
    Ok(json!({ "student": require_detail(conn, &id)? }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let roll_number = normalize_code(&get_required_str(params, "rollNumber")?);
    let name = get_required_str(params, "name")?;
    let department = get_required_str(params, "department")?;
    let section = normalize_code(&get_required_str(params, "section")?);
    let semester = get_int_in_range(params, "semester", 1..=8, Some(1))?;
    let barcode_id = get_optional_str(params, "barcodeId")?.unwrap_or_else(|| roll_number.clone());
    let email = match get_optional_str(params, "email")? {
        Some(raw) => Some(normalize_email(&raw)?),
        None => None,
    };
    let phone = get_optional_str(params, "phone")?;
    let academic_year = get_optional_str(params, "academicYear")?
        .unwrap_or_else(|| DEFAULT_ACADEMIC_YEAR.to_string());

    let taken: Option<String> = conn
        .query_row(
            "SELECT id FROM students
             WHERE roll_number = ? OR barcode_id = ? OR (email IS NOT NULL AND email = ?)",
            (&roll_number, &barcode_id, &email),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    if taken.is_some() {
        return Err(HandlerErr::conflict(
            "student with this roll number, barcode or email already exists",
        ));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, roll_number, name, email, phone, department, section, semester,
                              academic_year, barcode_id, active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &id,
            &roll_number,
            &name,
            &email,
            &phone,
            &department,
            &section,
            semester,
            &academic_year,
            &barcode_id,
            Utc::now(),
        ),
    )
    .map_err(|e| HandlerErr::write(e, "students"))?;

    tracing::info!(roll_number = %roll_number, department = %department, section = %section, "student created");
    Ok(json!({ "studentId": id, "student": require_detail(conn, &id)? }))
}

fn students_search(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let query = get_required_str(params, "query")?;
    let kind_raw = get_optional_str(params, "type")?;
    let kind = SearchKind::parse(kind_raw.as_deref());
    let students = store::search_students(conn, &query, kind)?;
    Ok(json!({ "students": students, "count": students.len() }))
}

fn students_find_by_barcode(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let barcode = get_required_str(params, "barcodeId")?;
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM students WHERE barcode_id = ? COLLATE NOCASE AND active = 1",
            [&barcode],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some(id) = id else {
        return Err(HandlerErr::not_found("student not found with this barcode")
            .with_details(json!({ "barcodeId": barcode })));
    };
    Ok(json!({ "student": require_detail(conn, &id)? }))
}

fn students_update_barcode(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "studentId")?;
    let barcode = get_required_str(params, "barcodeId")?;
    require_detail(conn, &id)?;
    let holder: Option<String> = conn
        .query_row(
            "SELECT id FROM students WHERE barcode_id = ? AND id <> ?",
            (&barcode, &id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    if holder.is_some() {
        return Err(HandlerErr::conflict("barcode is already assigned to another student"));
    }
    conn.execute("UPDATE students SET barcode_id = ? WHERE id = ?", (&barcode, &id))
        .map_err(|e| HandlerErr::write(e, "students"))?;
    Ok(json!({ "student": require_detail(conn, &id)? }))
}

fn distinct_column(conn: &Connection, sql: &str, binds: Vec<Value>) -> Result<Vec<String>, HandlerErr> {
    let mut stmt = conn.prepare(sql).map_err(HandlerErr::query)?;
    stmt.query_map(params_from_iter(binds), |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)
}

fn students_departments(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let departments = distinct_column(
        conn,
        "SELECT DISTINCT department FROM students WHERE active = 1 ORDER BY department",
        Vec::new(),
    )?;
    Ok(json!({ "departments": departments }))
}

fn students_sections(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let sections = match get_optional_str(params, "department")? {
        Some(d) => distinct_column(
            conn,
            "SELECT DISTINCT section FROM students
             WHERE active = 1 AND department = ? COLLATE NOCASE
             ORDER BY section",
            vec![Value::Text(d)],
        )?,
        None => distinct_column(
            conn,
            "SELECT DISTINCT section FROM students WHERE active = 1 ORDER BY section",
            Vec::new(),
        )?,
    };
    Ok(json!({ "sections": sections }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_db(state, req, students_list)),
        "students.get" => Some(with_db(state, req, students_get)),
        "students.create" => Some(with_db(state, req, students_create)),
        "students.search" => Some(with_db(state, req, students_search)),
        "students.findByBarcode" => Some(with_db(state, req, students_find_by_barcode)),
        "students.updateBarcode" => Some(with_db(state, req, students_update_barcode)),
        "students.departments" => Some(with_db(state, req, students_departments)),
        "students.sections" => Some(with_db(state, req, students_sections)),
        _ => None,
    }
}
