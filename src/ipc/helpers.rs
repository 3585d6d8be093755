use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::grading;
use crate::ipc::error::err;
use crate::ipc::types::AppState;
use crate::policy::{Principal, Role};
use crate::storage;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn detailed(
        code: &'static str,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn db_query(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn db_insert(e: rusqlite::Error, table: &str) -> Self {
        Self::detailed("db_insert_failed", e.to_string(), json!({ "table": table }))
    }

    pub fn db_update(e: rusqlite::Error, table: &str) -> Self {
        Self::detailed("db_update_failed", e.to_string(), json!({ "table": table }))
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn param_str<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

pub fn param_i64(params: &serde_json::Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

/// Current instant as RFC 3339 UTC with microseconds and a `Z` suffix.
/// Fixed width keeps TEXT comparison in SQL consistent with time order.
pub fn now_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Re-anchors any RFC 3339 timestamp to the canonical UTC form used in
/// storage. Returns None when the input does not parse.
pub fn normalize_rfc3339(raw: &str) -> Option<String> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// Loads the caller identified by `params.principalId`. Every authenticated
/// method resolves its caller through here; there is no ambient session.
pub fn load_principal(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<Principal, HandlerErr> {
    let principal_id = param_str(params, "principalId")
        .ok_or_else(|| HandlerErr::bad_params("missing principalId"))?;

    let row = conn
        .query_row(
            "SELECT id, role, username, first_name, last_name FROM users WHERE id = ?",
            [principal_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                ))
            },
        )
        .optional()
        .map_err(HandlerErr::db_query)?;

    let Some((id, role, username, first_name, last_name)) = row else {
        return Err(HandlerErr::not_found("principal not found"));
    };
    let Some(role) = Role::parse(&role) else {
        return Err(HandlerErr::detailed(
            "db_query_failed",
            "unrecognized role in users table",
            json!({ "role": role }),
        ));
    };

    Ok(Principal {
        id,
        role,
        username,
        first_name,
        last_name,
    })
}

pub struct ProjectRow {
    pub id: String,
    pub title: String,
    pub description: String,
    pub student_id: String,
    pub teacher_id: String,
    pub due_date: String,
    pub submitted_at: String,
    pub is_submitted: bool,
    pub attachment_name: Option<String>,
    pub attachment_path: Option<String>,
    pub attachment_size: Option<i64>,
    pub attachment_sha256: Option<String>,
}

pub const PROJECT_COLS: &str = "p.id, p.title, p.description, p.student_id, p.teacher_id,
    p.due_date, p.submitted_at, p.is_submitted,
    p.attachment_name, p.attachment_path, p.attachment_size, p.attachment_sha256";

pub fn project_from_row(row: &rusqlite::Row) -> rusqlite::Result<ProjectRow> {
    Ok(ProjectRow {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        student_id: row.get(3)?,
        teacher_id: row.get(4)?,
        due_date: row.get(5)?,
        submitted_at: row.get(6)?,
        is_submitted: row.get::<_, i64>(7)? != 0,
        attachment_name: row.get(8)?,
        attachment_path: row.get(9)?,
        attachment_size: row.get(10)?,
        attachment_sha256: row.get(11)?,
    })
}

pub fn load_project(
    conn: &Connection,
    project_id: &str,
) -> Result<Option<ProjectRow>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {PROJECT_COLS} FROM projects p WHERE p.id = ?"),
        [project_id],
        project_from_row,
    )
    .optional()
    .map_err(HandlerErr::db_query)
}

pub struct GradeRow {
    pub id: String,
    pub project_id: String,
    pub teacher_id: String,
    pub score: i64,
    pub letter_grade: String,
    pub feedback: String,
    pub graded_at: String,
}

fn grade_from_row(row: &rusqlite::Row) -> rusqlite::Result<GradeRow> {
    Ok(GradeRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        teacher_id: row.get(2)?,
        score: row.get(3)?,
        letter_grade: row.get(4)?,
        feedback: row.get(5)?,
        graded_at: row.get(6)?,
    })
}

const GRADE_COLS: &str = "id, project_id, teacher_id, score, letter_grade, feedback, graded_at";

pub fn load_grade(
    conn: &Connection,
    project_id: &str,
) -> Result<Option<GradeRow>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {GRADE_COLS} FROM grades WHERE project_id = ?"),
        [project_id],
        grade_from_row,
    )
    .optional()
    .map_err(HandlerErr::db_query)
}

pub fn load_grade_by_id(
    conn: &Connection,
    grade_id: &str,
) -> Result<Option<GradeRow>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {GRADE_COLS} FROM grades WHERE id = ?"),
        [grade_id],
        grade_from_row,
    )
    .optional()
    .map_err(HandlerErr::db_query)
}

pub fn display_name(conn: &Connection, user_id: &str) -> Result<String, HandlerErr> {
    conn.query_row(
        "SELECT username, first_name, last_name FROM users WHERE id = ?",
        [user_id],
        |r| {
            let username: String = r.get(0)?;
            let first: String = r.get(1)?;
            let last: String = r.get(2)?;
            let full = format!("{} {}", first, last);
            let full = full.trim();
            Ok(if full.is_empty() {
                username
            } else {
                full.to_string()
            })
        },
    )
    .map_err(HandlerErr::db_query)
}

pub fn grade_json(grade: &GradeRow) -> serde_json::Value {
    json!({
        "id": grade.id,
        "projectId": grade.project_id,
        "teacherId": grade.teacher_id,
        "score": grade.score,
        "letterGrade": grade.letter_grade,
        "feedback": grade.feedback,
        "gradedAt": grade.graded_at,
    })
}

pub fn attachment_json(row: &ProjectRow) -> serde_json::Value {
    match (&row.attachment_name, &row.attachment_path, row.attachment_size) {
        (Some(name), Some(_), Some(size)) => json!({
            "fileName": name,
            "extension": storage::file_extension(name),
            "size": size,
            "sizeDisplay": storage::format_file_size(size.max(0) as u64),
            "sha256": row.attachment_sha256,
            "contentType": storage::content_type_for(name),
        }),
        _ => serde_json::Value::Null,
    }
}

/// Full client-facing view of one project, including the people on it, the
/// current grade (if any) and the derived status label.
pub fn project_json(
    conn: &Connection,
    row: &ProjectRow,
    now: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let student_name = display_name(conn, &row.student_id)?;
    let teacher_name = display_name(conn, &row.teacher_id)?;
    let grade = load_grade(conn, &row.id)?;
    let status = grading::project_status(row.is_submitted, grade.is_some(), &row.due_date, now);
    let grade_value = match &grade {
        Some(g) => grade_json(g),
        None => serde_json::Value::Null,
    };

    Ok(json!({
        "id": row.id,
        "title": row.title,
        "description": row.description,
        "studentId": row.student_id,
        "studentName": student_name,
        "teacherId": row.teacher_id,
        "teacherName": teacher_name,
        "dueDate": row.due_date,
        "submittedAt": row.submitted_at,
        "isSubmitted": row.is_submitted,
        "status": status.as_str(),
        "grade": grade_value,
        "attachment": attachment_json(row),
    }))
}

pub fn page_param(params: &serde_json::Value) -> i64 {
    let page = param_i64(params, "page").unwrap_or(1);
    if page < 1 {
        1
    } else {
        page
    }
}

/// Paged listing envelope. `pageCount` never drops below 1 so a client can
/// always render page 1 of an empty listing.
pub fn page_envelope(
    items: Vec<serde_json::Value>,
    page: i64,
    page_size: i64,
    total_count: i64,
) -> serde_json::Value {
    let page_count = if total_count == 0 {
        1
    } else {
        (total_count + page_size - 1) / page_size
    };
    json!({
        "items": items,
        "page": page,
        "pageSize": page_size,
        "totalCount": total_count,
        "pageCount": page_count,
    })
}

const NOT_GRADED: &str = "NOT EXISTS (SELECT 1 FROM grades g WHERE g.project_id = p.id)";
const GRADED: &str = "EXISTS (SELECT 1 FROM grades g WHERE g.project_id = p.id)";

/// Appends the WHERE fragment for a listing status filter. Unknown values are
/// rejected rather than silently treated as "all".
pub fn push_status_filter(
    status: &str,
    now: &str,
    conds: &mut Vec<String>,
    binds: &mut Vec<rusqlite::types::Value>,
) -> Result<(), HandlerErr> {
    match status {
        "all" => {}
        "pending" => {
            conds.push(format!("p.is_submitted = 1 AND {NOT_GRADED}"));
        }
        "graded" => {
            conds.push(GRADED.to_string());
        }
        "overdue" => {
            conds.push(format!("p.due_date < ? AND p.is_submitted = 1 AND {NOT_GRADED}"));
            binds.push(rusqlite::types::Value::from(now.to_string()));
        }
        other => {
            return Err(HandlerErr::detailed(
                "bad_params",
                "status must be one of: all, pending, graded, overdue",
                json!({ "status": other }),
            ));
        }
    }
    Ok(())
}

/// Escapes LIKE wildcards in user search text; callers pair the result with
/// `ESCAPE '\'`.
pub fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}
