use rusqlite::Connection;
use std::path::Path;

use crate::storage;

pub const DB_FILE: &str = "portal.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    std::fs::create_dir_all(workspace.join(storage::ATTACHMENTS_DIR))?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            role TEXT NOT NULL CHECK(role IN ('student','teacher')),
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_profiles(
            user_id TEXT PRIMARY KEY,
            student_no TEXT NOT NULL UNIQUE,
            course TEXT NOT NULL,
            year_of_study INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_profiles(
            user_id TEXT PRIMARY KEY,
            employee_no TEXT NOT NULL UNIQUE,
            department TEXT NOT NULL,
            designation TEXT NOT NULL DEFAULT 'Lecturer',
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS projects(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            student_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            due_date TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            is_submitted INTEGER NOT NULL DEFAULT 1,
            attachment_name TEXT,
            attachment_path TEXT,
            attachment_size INTEGER,
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_projects_student ON projects(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_projects_teacher ON projects(teacher_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_projects_teacher_submitted
            ON projects(teacher_id, submitted_at)",
        [],
    )?;

    // Workspaces created before checksums were recorded keep NULL here;
    // the column fills in as attachments are stored.
    ensure_projects_attachment_sha256(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            score INTEGER NOT NULL DEFAULT 0,
            letter_grade TEXT NOT NULL DEFAULT 'F',
            feedback TEXT NOT NULL DEFAULT '',
            graded_at TEXT NOT NULL,
            FOREIGN KEY(project_id) REFERENCES projects(id),
            FOREIGN KEY(teacher_id) REFERENCES users(id),
            UNIQUE(project_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_teacher ON grades(teacher_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_projects_attachment_sha256(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "projects", "attachment_sha256")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE projects ADD COLUMN attachment_sha256 TEXT", [])?;
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
