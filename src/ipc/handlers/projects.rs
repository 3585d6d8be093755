use crate::ipc::error::{err, ok, validation_err};
use crate::ipc::helpers::{self, HandlerErr, PROJECT_COLS};
use crate::ipc::types::{AppState, Request};
use crate::policy::{self, Role};
use crate::storage;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Map};
use std::path::PathBuf;
use uuid::Uuid;

pub const OWNED_PAGE_SIZE: i64 = 10;
const MIN_TITLE_CHARS: usize = 5;
const MIN_DESCRIPTION_CHARS: usize = 10;

struct AttachmentParams {
    source_path: PathBuf,
    file_name: String,
}

/// Reads and validates `params.attachment`. Returns Ok(None) when absent,
/// records user-facing messages under the "attachment" field otherwise.
fn collect_attachment(
    params: &serde_json::Value,
    fields: &mut Map<String, serde_json::Value>,
) -> Result<Option<AttachmentParams>, HandlerErr> {
    let raw = match params.get("attachment") {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(v) => v,
    };
    let Some(source) = raw.get("sourcePath").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::bad_params("attachment requires sourcePath"));
    };
    let source_path = PathBuf::from(source);

    let raw_name = raw
        .get("fileName")
        .and_then(|v| v.as_str())
        .unwrap_or(source);
    let Some(file_name) = storage::sanitize_file_name(raw_name) else {
        fields.insert("attachment".into(), json!("Invalid attachment file name."));
        return Ok(None);
    };

    if let Err(msg) = storage::check_attachment(&source_path, &file_name) {
        fields.insert("attachment".into(), json!(msg));
        return Ok(None);
    }

    Ok(Some(AttachmentParams {
        source_path,
        file_name,
    }))
}

fn teacher_exists(conn: &Connection, teacher_id: &str) -> Result<bool, HandlerErr> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM users WHERE id = ? AND role = 'teacher'",
            [teacher_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    Ok(hit.is_some())
}

fn handle_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match helpers::require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let principal = match helpers::load_principal(conn, &req.params) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    if !policy::can_submit(&principal) {
        return err(
            &req.id,
            "permission_denied",
            "only students can submit projects",
            None,
        );
    }

    let now = helpers::now_utc();
    let mut fields = Map::new();

    let title = helpers::param_str(&req.params, "title")
        .unwrap_or_default()
        .trim()
        .to_string();
    if title.chars().count() < MIN_TITLE_CHARS {
        fields.insert(
            "title".into(),
            json!(format!(
                "Title must be at least {} characters long.",
                MIN_TITLE_CHARS
            )),
        );
    }

    let description = helpers::param_str(&req.params, "description")
        .unwrap_or_default()
        .trim()
        .to_string();
    if description.chars().count() < MIN_DESCRIPTION_CHARS {
        fields.insert(
            "description".into(),
            json!(format!(
                "Description must be at least {} characters long.",
                MIN_DESCRIPTION_CHARS
            )),
        );
    }

    let due_date = match helpers::param_str(&req.params, "dueDate") {
        None => {
            fields.insert("dueDate".into(), json!("This field is required."));
            None
        }
        Some(raw) => match helpers::normalize_rfc3339(raw) {
            None => {
                fields.insert("dueDate".into(), json!("Enter a valid date/time."));
                None
            }
            Some(normalized) if normalized <= now => {
                fields.insert("dueDate".into(), json!("Due date cannot be in the past."));
                None
            }
            Some(normalized) => Some(normalized),
        },
    };

    let teacher_id = match helpers::param_str(&req.params, "teacherId") {
        None => {
            fields.insert("teacherId".into(), json!("This field is required."));
            None
        }
        Some(id) => match teacher_exists(conn, id) {
            Ok(true) => Some(id.to_string()),
            Ok(false) => {
                fields.insert(
                    "teacherId".into(),
                    json!("Select a valid choice. That choice is not one of the available choices."),
                );
                None
            }
            Err(e) => return e.response(&req.id),
        },
    };

    let attachment = match collect_attachment(&req.params, &mut fields) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    if !fields.is_empty() {
        return validation_err(&req.id, serde_json::Value::Object(fields));
    }
    // Both are Some once the fields map is empty.
    let (Some(due_date), Some(teacher_id)) = (due_date, teacher_id) else {
        return err(&req.id, "bad_params", "incomplete submission", None);
    };

    let project_id = Uuid::new_v4().to_string();

    let stored = match &attachment {
        Some(att) => {
            match storage::store_attachment(
                &workspace,
                &project_id,
                &att.source_path,
                &att.file_name,
            ) {
                Ok(handle) => Some(handle),
                Err(e) => return err(&req.id, "io_failed", format!("{e:?}"), None),
            }
        }
        None => None,
    };

    let insert = conn.execute(
        "INSERT INTO projects(id, title, description, student_id, teacher_id,
            due_date, submitted_at, is_submitted,
            attachment_name, attachment_path, attachment_size, attachment_sha256)
         VALUES(?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)",
        (
            &project_id,
            &title,
            &description,
            &principal.id,
            &teacher_id,
            &due_date,
            &now,
            stored.as_ref().map(|s| s.file_name.clone()),
            stored.as_ref().map(|s| s.rel_path.clone()),
            stored.as_ref().map(|s| s.size as i64),
            stored.as_ref().map(|s| s.sha256.clone()),
        ),
    );
    if let Err(e) = insert {
        if let Some(s) = &stored {
            let _ = std::fs::remove_file(storage::attachment_abs_path(&workspace, &s.rel_path));
        }
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "projects" })),
        );
    }

    log::info!(
        "projects: {} submitted {} (attachment: {})",
        principal.id,
        project_id,
        stored.is_some()
    );

    respond_with_project(conn, &req.id, &project_id, &now)
}

fn respond_with_project(
    conn: &Connection,
    req_id: &str,
    project_id: &str,
    now: &str,
) -> serde_json::Value {
    let row = match helpers::load_project(conn, project_id) {
        Ok(Some(r)) => r,
        Ok(None) => return err(req_id, "not_found", "project not found", None),
        Err(e) => return e.response(req_id),
    };
    match helpers::project_json(conn, &row, now) {
        Ok(project) => ok(req_id, json!({ "project": project })),
        Err(e) => e.response(req_id),
    }
}

fn handle_get_owned(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match helpers::require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let principal = match helpers::load_principal(conn, &req.params) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    if principal.role != Role::Student {
        return err(&req.id, "permission_denied", "student role required", None);
    }
    let Some(project_id) = helpers::param_str(&req.params, "projectId") else {
        return err(&req.id, "bad_params", "missing projectId", None);
    };

    let row = match helpers::load_project(conn, project_id) {
        Ok(Some(r)) => r,
        Ok(None) => return err(&req.id, "not_found", "project not found", None),
        Err(e) => return e.response(&req.id),
    };
    // Ownership mismatch reads exactly like a missing id.
    if !policy::can_read(&principal, &row.student_id, &row.teacher_id) {
        return err(&req.id, "not_found", "project not found", None);
    }

    let now = helpers::now_utc();
    let project = match helpers::project_json(conn, &row, &now) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let totals = conn.query_row(
        "SELECT COUNT(*),
                COUNT(*) FILTER (WHERE EXISTS
                    (SELECT 1 FROM grades g WHERE g.project_id = p.id))
         FROM projects p WHERE p.student_id = ?",
        [&principal.id],
        |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)),
    );
    let (total, graded) = match totals {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "project": project,
            "stats": { "totalProjects": total, "gradedProjects": graded },
        }),
    )
}

fn handle_list_owned(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match helpers::require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let principal = match helpers::load_principal(conn, &req.params) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };

    let page = helpers::page_param(&req.params);
    let total: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM projects WHERE student_id = ?",
        [&principal.id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(&format!(
        "SELECT {PROJECT_COLS} FROM projects p
         WHERE p.student_id = ?
         ORDER BY p.submitted_at DESC, p.id
         LIMIT ? OFFSET ?"
    )) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match stmt
        .query_map(
            (&principal.id, OWNED_PAGE_SIZE, (page - 1) * OWNED_PAGE_SIZE),
            helpers::project_from_row,
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let now = helpers::now_utc();
    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        match helpers::project_json(conn, row, &now) {
            Ok(v) => items.push(v),
            Err(e) => return e.response(&req.id),
        }
    }

    ok(
        &req.id,
        helpers::page_envelope(items, page, OWNED_PAGE_SIZE, total),
    )
}

fn handle_download(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match helpers::require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let principal = match helpers::load_principal(conn, &req.params) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    let Some(project_id) = helpers::param_str(&req.params, "projectId") else {
        return err(&req.id, "bad_params", "missing projectId", None);
    };

    let row = match helpers::load_project(conn, project_id) {
        Ok(Some(r)) => r,
        Ok(None) => return err(&req.id, "not_found", "project not found", None),
        Err(e) => return e.response(&req.id),
    };
    if !policy::can_download(&principal, &row.student_id, &row.teacher_id) {
        return err(&req.id, "not_found", "project not found", None);
    }

    let (Some(_), Some(rel_path), Some(size)) = (
        row.attachment_name.as_ref(),
        row.attachment_path.as_ref(),
        row.attachment_size,
    ) else {
        return err(
            &req.id,
            "no_attachment",
            "project has no attachment",
            None,
        );
    };

    let abs = storage::attachment_abs_path(&workspace, rel_path);
    let meta = match std::fs::metadata(&abs) {
        Ok(m) => m,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                format!("stored attachment missing: {e}"),
                None,
            )
        }
    };
    if meta.len() != size.max(0) as u64 {
        return err(
            &req.id,
            "io_failed",
            "stored attachment size mismatch",
            Some(json!({ "expected": size, "actual": meta.len() })),
        );
    }

    let now = helpers::now_utc();
    let project = match helpers::project_json(conn, &row, &now) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let mut attachment = helpers::attachment_json(&row);
    attachment["path"] = json!(abs.to_string_lossy());

    log::info!("projects: {} downloads {}", principal.id, row.id);
    ok(
        &req.id,
        json!({ "project": project, "attachment": attachment }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "projects.submit" => Some(handle_submit(state, req)),
        "projects.getOwned" => Some(handle_get_owned(state, req)),
        "projects.listOwned" => Some(handle_list_owned(state, req)),
        "projects.download" => Some(handle_download(state, req)),
        _ => None,
    }
}
