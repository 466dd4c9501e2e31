use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "attendance.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            code TEXT UNIQUE,
            description TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS department_sections(
            department_id TEXT NOT NULL,
            section TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(department_id, section),
            FOREIGN KEY(department_id) REFERENCES departments(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            employee_id TEXT UNIQUE,
            department TEXT NOT NULL,
            designation TEXT NOT NULL,
            phone TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_department ON teachers(department)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            course_code TEXT NOT NULL UNIQUE,
            course_name TEXT NOT NULL,
            teacher_id TEXT,
            semester INTEGER NOT NULL,
            department TEXT NOT NULL,
            credits INTEGER NOT NULL DEFAULT 3,
            course_type TEXT NOT NULL DEFAULT 'Theory',
            academic_year TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_department ON courses(department, semester)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            roll_number TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            email TEXT UNIQUE,
            phone TEXT,
            department TEXT NOT NULL,
            section TEXT NOT NULL,
            semester INTEGER NOT NULL,
            academic_year TEXT NOT NULL,
            barcode_id TEXT NOT NULL UNIQUE,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(department, section)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_sessions(
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            department TEXT NOT NULL,
            section TEXT NOT NULL,
            subject_code TEXT NOT NULL,
            teacher TEXT NOT NULL,
            period TEXT NOT NULL DEFAULT 'FN',
            academic_year TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    ensure_sessions_finalized(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_class_date ON attendance_sessions(date, department, section)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_subject_date ON attendance_sessions(subject_code, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            session_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'absent',
            marked_at TEXT,
            scanned_at TEXT,
            PRIMARY KEY(session_id, student_id),
            FOREIGN KEY(session_id) REFERENCES attendance_sessions(id) ON DELETE CASCADE,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_student ON attendance_records(student_id)",
        [],
    )?;

    Ok(conn)
}

// Workspaces created before session submission existed lack the flag.
fn ensure_sessions_finalized(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "attendance_sessions", "finalized")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE attendance_sessions ADD COLUMN finalized INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
