use crate::ipc::error::{err, ok, validation_err};
use crate::ipc::helpers::{self, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use serde_json::Map;
use uuid::Uuid;

pub const MIN_YEAR_OF_STUDY: i64 = 1;
pub const MAX_YEAR_OF_STUDY: i64 = 6;
pub const DEFAULT_DESIGNATION: &str = "Lecturer";

fn trimmed(params: &serde_json::Value, key: &str) -> String {
    helpers::param_str(params, key)
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn optional_trimmed(params: &serde_json::Value, key: &str) -> Option<String> {
    let v = trimmed(params, key);
    if v.is_empty() {
        None
    } else {
        Some(v)
    }
}

fn looks_like_email(v: &str) -> bool {
    match v.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    }
}

fn username_taken(conn: &Connection, username: &str) -> Result<bool, HandlerErr> {
    let hit: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE username = ?", [username], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?;
    Ok(hit.is_some())
}

struct CommonFields {
    username: String,
    first_name: String,
    last_name: String,
    email: Option<String>,
    phone: Option<String>,
}

/// Pulls the name/contact fields shared by both roles, recording one message
/// per failed field so the client can flag the whole form at once.
fn collect_common_fields(
    conn: &Connection,
    params: &serde_json::Value,
    fields: &mut Map<String, serde_json::Value>,
) -> Result<CommonFields, HandlerErr> {
    let username = trimmed(params, "username");
    if username.is_empty() {
        fields.insert("username".into(), json!("This field is required."));
    } else if username_taken(conn, &username)? {
        fields.insert(
            "username".into(),
            json!("A user with that username already exists."),
        );
    }

    let first_name = trimmed(params, "firstName");
    if first_name.is_empty() {
        fields.insert("firstName".into(), json!("This field is required."));
    }
    let last_name = trimmed(params, "lastName");
    if last_name.is_empty() {
        fields.insert("lastName".into(), json!("This field is required."));
    }

    let email = optional_trimmed(params, "email");
    if let Some(v) = &email {
        if !looks_like_email(v) {
            fields.insert("email".into(), json!("Enter a valid email address."));
        }
    }
    let phone = optional_trimmed(params, "phone");

    Ok(CommonFields {
        username,
        first_name,
        last_name,
        email,
        phone,
    })
}

fn insert_user(
    conn: &Connection,
    user_id: &str,
    common: &CommonFields,
    role: &str,
    created_at: &str,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO users(id, username, first_name, last_name, email, phone, role, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            user_id,
            &common.username,
            &common.first_name,
            &common.last_name,
            &common.email,
            &common.phone,
            role,
            created_at,
        ),
    )
    .map_err(|e| HandlerErr::db_insert(e, "users"))?;
    Ok(())
}

/// Directory entry with its role profile attached, as returned by the
/// create and get methods.
fn entry_json(conn: &Connection, user_id: &str) -> Result<Option<serde_json::Value>, HandlerErr> {
    let user = conn
        .query_row(
            "SELECT id, username, first_name, last_name, email, phone, role, created_at
             FROM users WHERE id = ?",
            [user_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, Option<String>>(4)?,
                    r.get::<_, Option<String>>(5)?,
                    r.get::<_, String>(6)?,
                    r.get::<_, String>(7)?,
                ))
            },
        )
        .optional()
        .map_err(HandlerErr::db_query)?;

    let Some((id, username, first_name, last_name, email, phone, role, created_at)) = user else {
        return Ok(None);
    };

    let mut entry = json!({
        "id": id,
        "username": username,
        "firstName": first_name,
        "lastName": last_name,
        "email": email,
        "phone": phone,
        "role": role,
        "createdAt": created_at,
    });

    // Each role variant attaches its own profile block; nothing else branches
    // on the role string.
    match role.as_str() {
        "student" => {
            let profile = conn
                .query_row(
                    "SELECT student_no, course, year_of_study
                     FROM student_profiles WHERE user_id = ?",
                    [&id],
                    |r| {
                        Ok(json!({
                            "studentNo": r.get::<_, String>(0)?,
                            "course": r.get::<_, String>(1)?,
                            "yearOfStudy": r.get::<_, i64>(2)?,
                        }))
                    },
                )
                .optional()
                .map_err(HandlerErr::db_query)?;
            if let Some(p) = profile {
                entry["studentProfile"] = p;
            }
        }
        "teacher" => {
            let profile = conn
                .query_row(
                    "SELECT employee_no, department, designation
                     FROM teacher_profiles WHERE user_id = ?",
                    [&id],
                    |r| {
                        Ok(json!({
                            "employeeNo": r.get::<_, String>(0)?,
                            "department": r.get::<_, String>(1)?,
                            "designation": r.get::<_, String>(2)?,
                        }))
                    },
                )
                .optional()
                .map_err(HandlerErr::db_query)?;
            if let Some(p) = profile {
                entry["teacherProfile"] = p;
            }
        }
        _ => {}
    }

    Ok(Some(entry))
}

fn handle_create_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match helpers::require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };

    let mut fields = Map::new();
    let common = match collect_common_fields(conn, &req.params, &mut fields) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let student_no = trimmed(&req.params, "studentNo");
    if student_no.is_empty() {
        fields.insert("studentNo".into(), json!("This field is required."));
    } else {
        let taken: Result<Option<i64>, _> = conn
            .query_row(
                "SELECT 1 FROM student_profiles WHERE student_no = ?",
                [&student_no],
                |r| r.get(0),
            )
            .optional();
        match taken {
            Ok(Some(_)) => {
                fields.insert(
                    "studentNo".into(),
                    json!("A student with that student number already exists."),
                );
            }
            Ok(None) => {}
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let course = trimmed(&req.params, "course");
    if course.is_empty() {
        fields.insert("course".into(), json!("This field is required."));
    }

    let year_of_study = helpers::param_i64(&req.params, "yearOfStudy").unwrap_or(MIN_YEAR_OF_STUDY);
    if !(MIN_YEAR_OF_STUDY..=MAX_YEAR_OF_STUDY).contains(&year_of_study) {
        fields.insert(
            "yearOfStudy".into(),
            json!(format!(
                "Year of study must be between {} and {}.",
                MIN_YEAR_OF_STUDY, MAX_YEAR_OF_STUDY
            )),
        );
    }

    if !fields.is_empty() {
        return validation_err(&req.id, serde_json::Value::Object(fields));
    }

    let user_id = Uuid::new_v4().to_string();
    let created_at = helpers::now_utc();

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = insert_user(&tx, &user_id, &common, "student", &created_at) {
        let _ = tx.rollback();
        return e.response(&req.id);
    }
    if let Err(e) = tx.execute(
        "INSERT INTO student_profiles(user_id, student_no, course, year_of_study)
         VALUES(?, ?, ?, ?)",
        (&user_id, &student_no, &course, year_of_study),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "student_profiles" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    log::info!("directory: created student {}", user_id);
    ok(&req.id, json!({ "principalId": user_id }))
}

fn handle_create_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match helpers::require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };

    let mut fields = Map::new();
    let common = match collect_common_fields(conn, &req.params, &mut fields) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let employee_no = trimmed(&req.params, "employeeNo");
    if employee_no.is_empty() {
        fields.insert("employeeNo".into(), json!("This field is required."));
    } else {
        let taken: Result<Option<i64>, _> = conn
            .query_row(
                "SELECT 1 FROM teacher_profiles WHERE employee_no = ?",
                [&employee_no],
                |r| r.get(0),
            )
            .optional();
        match taken {
            Ok(Some(_)) => {
                fields.insert(
                    "employeeNo".into(),
                    json!("A teacher with that employee number already exists."),
                );
            }
            Ok(None) => {}
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let department = trimmed(&req.params, "department");
    if department.is_empty() {
        fields.insert("department".into(), json!("This field is required."));
    }

    let designation =
        optional_trimmed(&req.params, "designation").unwrap_or_else(|| DEFAULT_DESIGNATION.into());

    if !fields.is_empty() {
        return validation_err(&req.id, serde_json::Value::Object(fields));
    }

    let user_id = Uuid::new_v4().to_string();
    let created_at = helpers::now_utc();

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = insert_user(&tx, &user_id, &common, "teacher", &created_at) {
        let _ = tx.rollback();
        return e.response(&req.id);
    }
    if let Err(e) = tx.execute(
        "INSERT INTO teacher_profiles(user_id, employee_no, department, designation)
         VALUES(?, ?, ?, ?)",
        (&user_id, &employee_no, &department, &designation),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teacher_profiles" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    log::info!("directory: created teacher {}", user_id);
    ok(&req.id, json!({ "principalId": user_id }))
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match helpers::require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let Some(principal_id) = helpers::param_str(&req.params, "principalId") else {
        return err(&req.id, "bad_params", "missing principalId", None);
    };

    match entry_json(conn, principal_id) {
        Ok(Some(entry)) => ok(&req.id, entry),
        Ok(None) => err(&req.id, "not_found", "principal not found", None),
        Err(e) => e.response(&req.id),
    }
}

/// Teacher roster for the submission form's supervisor picker.
fn handle_teachers(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match helpers::require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };

    let mut stmt = match conn.prepare(
        "SELECT u.id, u.username, u.first_name, u.last_name, tp.department, tp.designation
         FROM users u
         JOIN teacher_profiles tp ON tp.user_id = u.id
         WHERE u.role = 'teacher'
         ORDER BY u.first_name, u.last_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let username: String = row.get(1)?;
            let first: String = row.get(2)?;
            let last: String = row.get(3)?;
            let department: String = row.get(4)?;
            let designation: String = row.get(5)?;
            let full = format!("{} {}", first, last);
            let full = full.trim();
            let name = if full.is_empty() {
                username.clone()
            } else {
                full.to_string()
            };
            Ok(json!({
                "id": id,
                "username": username,
                "name": name,
                "department": department,
                "designation": designation,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "directory.createStudent" => Some(handle_create_student(state, req)),
        "directory.createTeacher" => Some(handle_create_teacher(state, req)),
        "directory.get" => Some(handle_get(state, req)),
        "directory.teachers" => Some(handle_teachers(state, req)),
        _ => None,
    }
}
