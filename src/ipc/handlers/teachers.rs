use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_optional_str, get_required_str, normalize_email, with_db};
use crate::ipc::types::{AppState, Request};
use crate::model::DEFAULT_DEPARTMENT;
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

const DESIGNATIONS: [&str; 5] = [
    "Professor",
    "Associate Professor",
    "Assistant Professor",
    "Lecturer",
    "Dr.",
];
const DEFAULT_DESIGNATION: &str = "Assistant Professor";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Teacher {
    id: String,
    name: String,
    email: String,
    employee_id: Option<String>,
    department: String,
    designation: String,
    phone: Option<String>,
    active: bool,
}

const TEACHER_COLUMNS: &str = "id, name, email, employee_id, department, designation, phone, active";

fn teacher_from_row(r: &Row<'_>) -> rusqlite::Result<Teacher> {
    Ok(Teacher {
        id: r.get(0)?,
        name: r.get(1)?,
        email: r.get(2)?,
        employee_id: r.get(3)?,
        department: r.get(4)?,
        designation: r.get(5)?,
        phone: r.get(6)?,
        active: r.get::<_, i64>(7)? != 0,
    })
}

fn teachers_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let department = get_optional_str(params, "department")?;
    let mut sql = format!("SELECT {} FROM teachers WHERE active = 1", TEACHER_COLUMNS);
    let mut binds: Vec<Value> = Vec::new();
    if let Some(d) = department {
        sql.push_str(" AND department = ?");
        binds.push(Value::Text(d));
    }
    sql.push_str(" ORDER BY name");
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let teachers = stmt
        .query_map(params_from_iter(binds), teacher_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "teachers": teachers }))
}

fn find_teacher(conn: &Connection, teacher_id: &str) -> Result<Option<Teacher>, HandlerErr> {
    let sql = format!("SELECT {} FROM teachers WHERE id = ?", TEACHER_COLUMNS);
    conn.query_row(&sql, [teacher_id], teacher_from_row)
        .optional()
        .map_err(HandlerErr::query)
}

fn teachers_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "teacherId")?;
    let teacher = find_teacher(conn, &id)?.ok_or_else(|| HandlerErr::not_found("teacher not found"))?;
    Ok(json!({ "teacher": teacher }))
}

fn teachers_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let email = normalize_email(&get_required_str(params, "email")?)?;
    let department =
        get_optional_str(params, "department")?.unwrap_or_else(|| DEFAULT_DEPARTMENT.to_string());
    let designation = match get_optional_str(params, "designation")? {
        None => DEFAULT_DESIGNATION.to_string(),
        Some(d) => {
            let Some(known) = DESIGNATIONS.iter().find(|k| k.eq_ignore_ascii_case(&d)) else {
                return Err(HandlerErr::bad_params(format!(
                    "designation must be one of: {}",
                    DESIGNATIONS.join(", ")
                )));
            };
            known.to_string()
        }
    };
    let phone = get_optional_str(params, "phone")?;
    let now = Utc::now();
    let employee_id = get_optional_str(params, "employeeId")?
        .unwrap_or_else(|| format!("EMP{}", now.timestamp_millis()));

    let exists = conn
        .query_row("SELECT 1 FROM teachers WHERE email = ?", [&email], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if exists {
        return Err(HandlerErr::conflict("teacher with this email already exists"));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teachers(id, name, email, employee_id, department, designation, phone, active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 1, ?)",
        (&id, &name, &email, &employee_id, &department, &designation, &phone, now),
    )
    .map_err(|e| HandlerErr::write(e, "teachers"))?;

    tracing::info!(teacher = %name, department = %department, "teacher created");
    let teacher = find_teacher(conn, &id)?.ok_or_else(|| HandlerErr::not_found("teacher not found"))?;
    Ok(json!({ "teacherId": id, "teacher": teacher }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(with_db(state, req, teachers_list)),
        "teachers.get" => Some(with_db(state, req, teachers_get)),
        "teachers.create" => Some(with_db(state, req, teachers_create)),
        _ => None,
    }
}
