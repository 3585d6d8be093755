use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{self, PROJECT_COLS};
use crate::ipc::types::{AppState, Request};
use crate::policy::Role;
use rusqlite::Connection;
use serde_json::json;

const RECENT_LIMIT: i64 = 5;

fn recent_projects(
    conn: &Connection,
    sql: &str,
    owner_id: &str,
    now: &str,
) -> Result<Vec<serde_json::Value>, helpers::HandlerErr> {
    let mut stmt = conn.prepare(sql).map_err(helpers::HandlerErr::db_query)?;
    let rows = stmt
        .query_map((owner_id, RECENT_LIMIT), helpers::project_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(helpers::HandlerErr::db_query)?;

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        items.push(helpers::project_json(conn, row, now)?);
    }
    Ok(items)
}

fn handle_student(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let counts = conn.query_row(
        "SELECT COUNT(*),
                COUNT(*) FILTER (WHERE EXISTS
                    (SELECT 1 FROM grades g WHERE g.project_id = p.id)),
                COUNT(*) FILTER (WHERE p.is_submitted = 1 AND NOT EXISTS
                    (SELECT 1 FROM grades g WHERE g.project_id = p.id))
         FROM projects p WHERE p.student_id = ?",
        [&principal.id],
        |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)?,
            ))
        },
    );
    let (total, graded, pending) = match counts {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let average: Option<f64> = match conn.query_row(
        "SELECT AVG(g.score) FROM grades g
         JOIN projects p ON p.id = g.project_id
         WHERE p.student_id = ?",
        [&principal.id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let average = average.map(|a| (a * 10.0).round() / 10.0);

    let now = helpers::now_utc();
    let recent = match recent_projects(
        conn,
        &format!(
            "SELECT {PROJECT_COLS} FROM projects p
             WHERE p.student_id = ?
             ORDER BY p.submitted_at DESC, p.id
             LIMIT ?"
        ),
        &principal.id,
        &now,
    ) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    ok(
        &req.id,
        json!({
            "totalProjects": total,
            "gradedProjects": graded,
            "pendingProjects": pending,
            "averageScore": average,
            "recent": recent,
        }),
    )
}

fn handle_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let counts = conn.query_row(
        "SELECT COUNT(*),
                COUNT(DISTINCT p.student_id),
                COUNT(*) FILTER (WHERE p.is_submitted = 1 AND NOT EXISTS
                    (SELECT 1 FROM grades g WHERE g.project_id = p.id)),
                COUNT(*) FILTER (WHERE EXISTS
                    (SELECT 1 FROM grades g WHERE g.project_id = p.id))
         FROM projects p WHERE p.teacher_id = ?",
        [&principal.id],
        |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, i64>(3)?,
            ))
        },
    );
    let (total, students, pending, graded) = match counts {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let now = helpers::now_utc();
    let recent = match recent_projects(
        conn,
        &format!(
            "SELECT {PROJECT_COLS} FROM projects p
             WHERE p.teacher_id = ? AND p.is_submitted = 1
             ORDER BY p.submitted_at DESC, p.id
             LIMIT ?"
        ),
        &principal.id,
        &now,
    ) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    ok(
        &req.id,
        json!({
            "totalProjects": total,
            "totalStudents": students,
            "pendingReviews": pending,
            "gradedProjects": graded,
            "recentSubmissions": recent,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.student" => Some(handle_student(state, req)),
        "dashboard.teacher" => Some(handle_teacher(state, req)),
        _ => None,
    }
}
