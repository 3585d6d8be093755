use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{self, PROJECT_COLS};
use crate::ipc::types::{AppState, Request};
use crate::policy::{self, Role};
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use serde_json::json;

pub const ASSIGNED_PAGE_SIZE: i64 = 15;

fn handle_list_assigned(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match helpers::require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let principal = match helpers::load_principal(conn, &req.params) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };

    let now = helpers::now_utc();
    let mut conds: Vec<String> = vec!["p.teacher_id = ?".to_string()];
    let mut binds: Vec<Value> = vec![Value::from(principal.id.clone())];

    let search = helpers::param_str(&req.params, "search")
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if let Some(q) = search {
        let pattern = helpers::like_pattern(q);
        conds.push(
            "(p.title LIKE ? ESCAPE '\\'
              OR su.first_name LIKE ? ESCAPE '\\'
              OR su.last_name LIKE ? ESCAPE '\\'
              OR su.username LIKE ? ESCAPE '\\')"
                .to_string(),
        );
        for _ in 0..4 {
            binds.push(Value::from(pattern.clone()));
        }
    }

    let status = helpers::param_str(&req.params, "status").unwrap_or("all");
    if let Err(e) = helpers::push_status_filter(status, &now, &mut conds, &mut binds) {
        return e.response(&req.id);
    }

    let where_sql = conds.join(" AND ");
    let count_sql = format!(
        "SELECT COUNT(*) FROM projects p
         JOIN users su ON su.id = p.student_id
         WHERE {where_sql}"
    );
    let total: i64 = match conn.query_row(&count_sql, params_from_iter(binds.iter()), |r| r.get(0))
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let page = helpers::page_param(&req.params);
    let page_sql = format!(
        "SELECT {PROJECT_COLS} FROM projects p
         JOIN users su ON su.id = p.student_id
         WHERE {where_sql}
         ORDER BY p.submitted_at DESC, p.id
         LIMIT ? OFFSET ?"
    );
    binds.push(Value::from(ASSIGNED_PAGE_SIZE));
    binds.push(Value::from((page - 1) * ASSIGNED_PAGE_SIZE));

    let mut stmt = match conn.prepare(&page_sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match stmt
        .query_map(params_from_iter(binds.iter()), helpers::project_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        match helpers::project_json(conn, row, &now) {
            Ok(v) => items.push(v),
            Err(e) => return e.response(&req.id),
        }
    }

    ok(
        &req.id,
        helpers::page_envelope(items, page, ASSIGNED_PAGE_SIZE, total),
    )
}

fn handle_get_assigned(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match helpers::require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let principal = match helpers::load_principal(conn, &req.params) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    if principal.role != Role::Teacher {
        return err(&req.id, "permission_denied", "teacher role required", None);
    }
    let Some(project_id) = helpers::param_str(&req.params, "projectId") else {
        return err(&req.id, "bad_params", "missing projectId", None);
    };

    let row = match helpers::load_project(conn, project_id) {
        Ok(Some(r)) => r,
        Ok(None) => return err(&req.id, "not_found", "project not found", None),
        Err(e) => return e.response(&req.id),
    };
    // An unassigned grader learns nothing beyond "no such project".
    if !policy::can_read(&principal, &row.student_id, &row.teacher_id) {
        return err(&req.id, "not_found", "project not found", None);
    }

    let now = helpers::now_utc();
    match helpers::project_json(conn, &row, &now) {
        Ok(project) => ok(&req.id, json!({ "project": project })),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "projects.listAssigned" => Some(handle_list_assigned(state, req)),
        "projects.getAssigned" => Some(handle_get_assigned(state, req)),
        _ => None,
    }
}
