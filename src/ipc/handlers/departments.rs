use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_optional_bool, get_optional_str, get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use crate::model::normalize_code;
use chrono::Utc;
use rusqlite::{params_from_iter, Connection, OptionalExtension, ToSql};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

const DEFAULT_SECTIONS: [&str; 3] = ["A", "B", "C"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Department {
    id: String,
    name: String,
    code: Option<String>,
    description: Option<String>,
    active: bool,
    sections: Vec<String>,
}

fn load_sections(conn: &Connection, department_id: &str) -> Result<Vec<String>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT section FROM department_sections
             WHERE department_id = ?
             ORDER BY sort_order",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map([department_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)
}

fn load_department(conn: &Connection, where_sql: &str, key: &str) -> Result<Option<Department>, HandlerErr> {
    let sql = format!(
        "SELECT id, name, code, description, active FROM departments WHERE {}",
        where_sql
    );
    let row = conn
        .query_row(&sql, [key], |r| {
            Ok(Department {
                id: r.get(0)?,
                name: r.get(1)?,
                code: r.get(2)?,
                description: r.get(3)?,
                active: r.get::<_, i64>(4)? != 0,
                sections: Vec::new(),
            })
        })
        .optional()
        .map_err(HandlerErr::query)?;
    let Some(mut department) = row else {
        return Ok(None);
    };
    department.sections = load_sections(conn, &department.id)?;
    Ok(Some(department))
}

fn require_department(conn: &Connection, department_id: &str) -> Result<Department, HandlerErr> {
    load_department(conn, "id = ?", department_id)?
        .ok_or_else(|| HandlerErr::not_found("department not found"))
}

fn parse_sections(params: &serde_json::Value) -> Result<Vec<String>, HandlerErr> {
    let Some(raw) = params.get("sections") else {
        return Ok(Vec::new());
    };
    if raw.is_null() {
        return Ok(Vec::new());
    }
    let Some(items) = raw.as_array() else {
        return Err(HandlerErr::bad_params("sections must be an array of strings"));
    };
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let Some(s) = item.as_str() else {
            return Err(HandlerErr::bad_params("sections must be an array of strings"));
        };
        let code = normalize_code(s);
        if !code.is_empty() && !out.contains(&code) {
            out.push(code);
        }
    }
    Ok(out)
}

fn departments_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let include_inactive = get_optional_bool(params, "includeInactive")?.unwrap_or(false);
    let mut stmt = conn
        .prepare(
            "SELECT id FROM departments
             WHERE active = 1 OR ?
             ORDER BY name",
        )
        .map_err(HandlerErr::query)?;
    let ids = stmt
        .query_map([include_inactive], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    let mut departments = Vec::with_capacity(ids.len());
    for id in ids {
        departments.push(require_department(conn, &id)?);
    }
    Ok(json!({ "departments": departments }))
}

fn departments_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "departmentId")?;
    Ok(json!({ "department": require_department(conn, &id)? }))
}

fn departments_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let code = get_optional_str(params, "code")?.map(|c| normalize_code(&c));
    let description = get_optional_str(params, "description")?;
    let mut sections = parse_sections(params)?;
    if sections.is_empty() {
        sections = DEFAULT_SECTIONS.iter().map(|s| s.to_string()).collect();
    }

    let taken: Option<String> = conn
        .query_row(
            "SELECT id FROM departments WHERE name = ? OR (code IS NOT NULL AND code = ?)",
            (&name, &code),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    if taken.is_some() {
        return Err(HandlerErr::conflict(
            "department with this name or code already exists",
        ));
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "INSERT INTO departments(id, name, code, description, active, created_at, updated_at)
         VALUES(?, ?, ?, ?, 1, ?, ?)",
        (&id, &name, &code, &description, now, now),
    )
    .map_err(|e| HandlerErr::write(e, "departments"))?;
    for (i, section) in sections.iter().enumerate() {
        tx.execute(
            "INSERT INTO department_sections(department_id, section, sort_order) VALUES(?, ?, ?)",
            (&id, section, i as i64),
        )
        .map_err(|e| HandlerErr::write(e, "department_sections"))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(department = %name, sections = sections.len(), "department created");
    Ok(json!({ "departmentId": id, "department": require_department(conn, &id)? }))
}

fn departments_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "departmentId")?;
    let Some(patch) = params.get("patch").filter(|p| p.is_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    require_department(conn, &id)?;

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<Box<dyn ToSql>> = Vec::new();
    if patch.get("name").is_some() {
        let name = get_required_str(patch, "name")?;
        sets.push("name = ?");
        values.push(Box::new(name));
    }
    if patch.get("code").is_some() {
        let code = get_optional_str(patch, "code")?.map(|c| normalize_code(&c));
        sets.push("code = ?");
        values.push(Box::new(code));
    }
    if patch.get("description").is_some() {
        let description = get_optional_str(patch, "description")?;
        sets.push("description = ?");
        values.push(Box::new(description));
    }
    if let Some(active) = get_optional_bool(patch, "active")? {
        sets.push("active = ?");
        values.push(Box::new(active));
    }
    if sets.is_empty() {
        return Err(HandlerErr::bad_params("patch has no updatable fields"));
    }
    sets.push("updated_at = ?");
    values.push(Box::new(Utc::now()));
    values.push(Box::new(id.clone()));

    let sql = format!("UPDATE departments SET {} WHERE id = ?", sets.join(", "));
    conn.execute(&sql, params_from_iter(values.iter()))
        .map_err(|e| HandlerErr::write(e, "departments"))?;
    Ok(json!({ "department": require_department(conn, &id)? }))
}

// Soft delete: sessions and students keep referring to the department by name.
fn departments_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "departmentId")?;
    let changed = conn
        .execute(
            "UPDATE departments SET active = 0, updated_at = ? WHERE id = ?",
            (Utc::now(), &id),
        )
        .map_err(|e| HandlerErr::write(e, "departments"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("department not found"));
    }
    Ok(json!({ "ok": true }))
}

fn sections_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "departmentName")?;
    let department = load_department(conn, "name = ? AND active = 1", &name)?
        .ok_or_else(|| HandlerErr::not_found("department not found"))?;
    Ok(json!({ "sections": department.sections }))
}

fn sections_add(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "departmentId")?;
    let section = normalize_code(&get_required_str(params, "section")?);
    let department = require_department(conn, &id)?;
    if department.sections.contains(&section) {
        return Err(HandlerErr::conflict("section already exists in this department"));
    }
    conn.execute(
        "INSERT INTO department_sections(department_id, section, sort_order)
         VALUES(?, ?, (SELECT COALESCE(MAX(sort_order), -1) + 1 FROM department_sections WHERE department_id = ?))",
        (&id, &section, &id),
    )
    .map_err(|e| HandlerErr::write(e, "department_sections"))?;
    Ok(json!({ "department": require_department(conn, &id)? }))
}

fn sections_remove(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "departmentId")?;
    let section = normalize_code(&get_required_str(params, "section")?);
    require_department(conn, &id)?;
    conn.execute(
        "DELETE FROM department_sections WHERE department_id = ? AND section = ?",
        (&id, &section),
    )
    .map_err(|e| HandlerErr::write(e, "department_sections"))?;
    Ok(json!({ "department": require_department(conn, &id)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "departments.list" => Some(with_db(state, req, departments_list)),
        "departments.get" => Some(with_db(state, req, departments_get)),
        "departments.create" => Some(with_db(state, req, departments_create)),
        "departments.update" => Some(with_db(state, req, departments_update)),
        "departments.delete" => Some(with_db(state, req, departments_delete)),
        "departments.sections.list" => Some(with_db(state, req, sections_list)),
        "departments.sections.add" => Some(with_db(state, req, sections_add)),
        "departments.sections.remove" => Some(with_db(state, req, sections_remove)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_db;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_conn() -> Connection {
        let dir = std::env::temp_dir().join(format!(
            "attendanced-departments-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        open_db(&dir).expect("open db")
    }

    #[test]
    fn update_stamps_updated_at_like_create() {
        let conn = temp_conn();
        let created = departments_create(&conn, &json!({ "name": "Civil", "code": "cv" })).expect("create");
        let id = created["departmentId"].as_str().expect("id").to_string();
        let updated = departments_update(
            &conn,
            &json!({ "departmentId": id, "patch": { "active": false, "code": null } }),
        )
        .expect("update");
        assert_eq!(updated["department"]["active"], json!(false));
        assert!(updated["department"]["code"].is_null());

        let (created_at, updated_at): (String, String) = conn
            .query_row(
                "SELECT created_at, updated_at FROM departments WHERE id = ?",
                [&id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .expect("stamps");
        for stamp in [&created_at, &updated_at] {
            assert!(!stamp.contains('T'), "{}", stamp);
            assert!(stamp.ends_with("+00:00"), "{}", stamp);
        }
        assert!(updated_at >= created_at);
        let parsed: chrono::DateTime<Utc> = conn
            .query_row("SELECT updated_at FROM departments WHERE id = ?", [&id], |r| r.get(0))
            .expect("parse updated_at");
        assert!(parsed.timestamp() > 0);
    }
}
