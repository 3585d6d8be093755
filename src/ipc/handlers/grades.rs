use crate::grading::{self, Rubric, MAX_TOTAL_SCORE, RUBRIC_CRITERION_MAX};
use crate::ipc::error::{err, ok, validation_err};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use crate::policy::{self, Role};
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use serde_json::{json, Map};
use uuid::Uuid;

pub const BULK_MAX_IDS: usize = 500;

fn rubric_prefill_json(rubric: &Rubric) -> serde_json::Value {
    json!({
        "contentScore": rubric.content,
        "presentationScore": rubric.presentation,
        "creativityScore": rubric.creativity,
        "technicalScore": rubric.technical,
    })
}

/// Reads one rubric criterion, recording at most one message for the field.
fn criterion_param(
    params: &serde_json::Value,
    key: &str,
    fields: &mut Map<String, serde_json::Value>,
) -> Option<i64> {
    let Some(raw) = params.get(key) else {
        fields.insert(key.to_string(), json!("This field is required."));
        return None;
    };
    let Some(v) = raw.as_i64() else {
        fields.insert(key.to_string(), json!("Enter a whole number."));
        return None;
    };
    if v < 0 {
        fields.insert(
            key.to_string(),
            json!("Ensure this value is greater than or equal to 0."),
        );
        return None;
    }
    if v > RUBRIC_CRITERION_MAX {
        fields.insert(
            key.to_string(),
            json!(format!(
                "Ensure this value is less than or equal to {}.",
                RUBRIC_CRITERION_MAX
            )),
        );
        return None;
    }
    Some(v)
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match helpers::require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let principal = match helpers::load_principal(conn, &req.params) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    if principal.role != Role::Teacher {
        return err(
            &req.id,
            "permission_denied",
            "only teachers can grade",
            None,
        );
    }
    let Some(project_id) = helpers::param_str(&req.params, "projectId") else {
        return err(&req.id, "bad_params", "missing projectId", None);
    };

    let row = match helpers::load_project(conn, project_id) {
        Ok(Some(r)) => r,
        Ok(None) => return err(&req.id, "not_found", "project not found", None),
        Err(e) => return e.response(&req.id),
    };
    if !policy::can_grade(&principal, &row.teacher_id) {
        return err(
            &req.id,
            "permission_denied",
            "not the assigned teacher for this project",
            None,
        );
    }

    // Get-or-create in one statement; the UNIQUE(project_id) constraint
    // resolves concurrent opens without a separate exists check.
    let grade_id = Uuid::new_v4().to_string();
    let now = helpers::now_utc();
    let inserted = match conn.execute(
        "INSERT INTO grades(id, project_id, teacher_id, score, letter_grade, feedback, graded_at)
         VALUES(?, ?, ?, 0, ?, '', ?)
         ON CONFLICT(project_id) DO NOTHING",
        (
            &grade_id,
            &row.id,
            &principal.id,
            grading::derive_letter_grade(0),
            &now,
        ),
    ) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "grades" })),
            )
        }
    };
    let is_new = inserted > 0;

    let grade = match helpers::load_grade(conn, &row.id) {
        Ok(Some(g)) => g,
        Ok(None) => {
            return err(
                &req.id,
                "db_query_failed",
                "grade missing after upsert",
                None,
            )
        }
        Err(e) => return e.response(&req.id),
    };

    let project = match helpers::project_json(conn, &row, &now) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    if is_new {
        log::info!("grading: {} opened grade {} for {}", principal.id, grade.id, row.id);
    }

    ok(
        &req.id,
        json!({
            "project": project,
            "grade": helpers::grade_json(&grade),
            "isNew": is_new,
            "rubricPrefill": rubric_prefill_json(&Rubric::from_total(grade.score)),
        }),
    )
}

fn handle_submit_rubric(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match helpers::require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let principal = match helpers::load_principal(conn, &req.params) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    if principal.role != Role::Teacher {
        return err(
            &req.id,
            "permission_denied",
            "only teachers can grade",
            None,
        );
    }
    let Some(grade_id) = helpers::param_str(&req.params, "gradeId") else {
        return err(&req.id, "bad_params", "missing gradeId", None);
    };

    let grade = match helpers::load_grade_by_id(conn, grade_id) {
        Ok(Some(g)) => g,
        Ok(None) => return err(&req.id, "not_found", "grade not found", None),
        Err(e) => return e.response(&req.id),
    };
    let project = match helpers::load_project(conn, &grade.project_id) {
        Ok(Some(r)) => r,
        Ok(None) => return err(&req.id, "not_found", "project not found", None),
        Err(e) => return e.response(&req.id),
    };
    if !policy::can_grade(&principal, &project.teacher_id) {
        return err(
            &req.id,
            "permission_denied",
            "not the assigned teacher for this project",
            None,
        );
    }

    let mut fields = Map::new();
    let content = criterion_param(&req.params, "contentScore", &mut fields);
    let presentation = criterion_param(&req.params, "presentationScore", &mut fields);
    let creativity = criterion_param(&req.params, "creativityScore", &mut fields);
    let technical = criterion_param(&req.params, "technicalScore", &mut fields);

    if let (Some(c), Some(p), Some(cr), Some(t)) = (content, presentation, creativity, technical)
    {
        let total = Rubric {
            content: c,
            presentation: p,
            creativity: cr,
            technical: t,
        }
        .total();
        if total > MAX_TOTAL_SCORE {
            fields.insert(
                "totalScore".into(),
                json!(format!("Total score cannot exceed {}.", MAX_TOTAL_SCORE)),
            );
        }
    }
    if !fields.is_empty() {
        return validation_err(&req.id, serde_json::Value::Object(fields));
    }
    let (Some(content), Some(presentation), Some(creativity), Some(technical)) =
        (content, presentation, creativity, technical)
    else {
        return err(&req.id, "bad_params", "incomplete rubric", None);
    };

    let rubric = Rubric {
        content,
        presentation,
        creativity,
        technical,
    };
    let score = rubric.total();
    let letter = grading::derive_letter_grade(score);
    let feedback = helpers::param_str(&req.params, "feedback")
        .unwrap_or_default()
        .trim()
        .to_string();

    // graded_at stays untouched so resubmitting the same rubric stores an
    // identical row.
    if let Err(e) = conn.execute(
        "UPDATE grades SET score = ?, letter_grade = ?, feedback = ?, teacher_id = ?
         WHERE id = ?",
        (score, letter, &feedback, &principal.id, &grade.id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "grades" })),
        );
    }

    let updated = match helpers::load_grade_by_id(conn, &grade.id) {
        Ok(Some(g)) => g,
        Ok(None) => return err(&req.id, "not_found", "grade not found", None),
        Err(e) => return e.response(&req.id),
    };

    log::info!(
        "grading: {} scored {} as {} ({})",
        principal.id,
        project.id,
        score,
        letter
    );
    ok(&req.id, json!({ "grade": helpers::grade_json(&updated) }))
}

fn handle_bulk_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match helpers::require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let principal = match helpers::load_principal(conn, &req.params) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    if principal.role != Role::Teacher {
        return err(
            &req.id,
            "permission_denied",
            "only teachers can grade",
            None,
        );
    }

    let mut fields = Map::new();

    let mut ids: Vec<String> = Vec::new();
    match req.params.get("projectIds").and_then(|v| v.as_array()) {
        None => {
            fields.insert("projectIds".into(), json!("This field is required."));
        }
        Some(list) if list.is_empty() => {
            fields.insert("projectIds".into(), json!("This field is required."));
        }
        Some(list) if list.len() > BULK_MAX_IDS => {
            fields.insert(
                "projectIds".into(),
                json!(format!(
                    "Cannot grade more than {} projects at once.",
                    BULK_MAX_IDS
                )),
            );
        }
        Some(list) => {
            if list.iter().all(|v| v.is_string()) {
                ids = list
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
            } else {
                fields.insert("projectIds".into(), json!("Project ids must be strings."));
            }
        }
    }

    let score = match req.params.get("score") {
        None => {
            fields.insert("score".into(), json!("This field is required."));
            None
        }
        Some(raw) => match raw.as_i64() {
            None => {
                fields.insert("score".into(), json!("Enter a whole number."));
                None
            }
            Some(v) if v < 0 => {
                fields.insert(
                    "score".into(),
                    json!("Ensure this value is greater than or equal to 0."),
                );
                None
            }
            Some(v) if v > MAX_TOTAL_SCORE => {
                fields.insert(
                    "score".into(),
                    json!(format!(
                        "Ensure this value is less than or equal to {}.",
                        MAX_TOTAL_SCORE
                    )),
                );
                None
            }
            Some(v) => Some(v),
        },
    };

    if !fields.is_empty() {
        return validation_err(&req.id, serde_json::Value::Object(fields));
    }
    let Some(score) = score else {
        return err(&req.id, "bad_params", "missing score", None);
    };

    // Eligibility is decided here, not by the caller: assigned to this
    // teacher, submitted, and not yet graded. Anything else in the id list
    // is skipped without comment.
    let placeholders = std::iter::repeat_n("?", ids.len())
        .collect::<Vec<_>>()
        .join(",");
    let eligible_sql = format!(
        "SELECT p.id FROM projects p
         WHERE p.id IN ({placeholders})
           AND p.teacher_id = ?
           AND p.is_submitted = 1
           AND NOT EXISTS (SELECT 1 FROM grades g WHERE g.project_id = p.id)"
    );
    let mut binds: Vec<Value> = ids.iter().map(|s| Value::from(s.clone())).collect();
    binds.push(Value::from(principal.id.clone()));

    let mut stmt = match conn.prepare(&eligible_sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let eligible = match stmt
        .query_map(params_from_iter(binds.iter()), |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let letter = grading::derive_letter_grade(score);
    let feedback = helpers::param_str(&req.params, "feedback")
        .unwrap_or_default()
        .trim()
        .to_string();
    let now = helpers::now_utc();

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for pid in &eligible {
        let grade_id = Uuid::new_v4().to_string();
        // DO UPDATE rather than DO NOTHING: losing the race to a concurrent
        // open still counts this project as processed.
        if let Err(e) = tx.execute(
            "INSERT INTO grades(id, project_id, teacher_id, score, letter_grade, feedback, graded_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(project_id) DO UPDATE SET
               score = excluded.score,
               letter_grade = excluded.letter_grade,
               feedback = excluded.feedback,
               teacher_id = excluded.teacher_id",
            (&grade_id, pid, &principal.id, score, letter, &feedback, &now),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "grades" })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    log::info!(
        "grading: {} bulk-set {} on {} of {} requested projects",
        principal.id,
        score,
        eligible.len(),
        ids.len()
    );
    ok(&req.id, json!({ "processedCount": eligible.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grading.open" => Some(handle_open(state, req)),
        "grading.submitRubric" => Some(handle_submit_rubric(state, req)),
        "grading.bulkGrade" => Some(handle_bulk_grade(state, req)),
        _ => None,
    }
}
